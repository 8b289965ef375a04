pub mod incident_models;
pub mod monitor_models;
pub mod ping_models;
