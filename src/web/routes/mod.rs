pub mod incident_routes;
pub mod monitor_routes;
pub mod ping_routes;
