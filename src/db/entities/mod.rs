//! SeaORM entities mapping to database tables, one module per table.

pub mod incident;
pub mod incident_event;
pub mod monitor;
pub mod monitor_dependency;
pub mod run;

// Prelude module for easy importing of all entities and their related types
pub mod prelude {
    pub use super::monitor::Entity as Monitor;
    pub use super::monitor::Model as MonitorModel;
    pub use super::monitor::ActiveModel as MonitorActiveModel;
    pub use super::monitor::Column as MonitorColumn;

    pub use super::run::Entity as Run;
    pub use super::run::Model as RunModel;
    pub use super::run::ActiveModel as RunActiveModel;
    pub use super::run::Column as RunColumn;

    pub use super::incident::Entity as Incident;
    pub use super::incident::Model as IncidentModel;
    pub use super::incident::ActiveModel as IncidentActiveModel;
    pub use super::incident::Column as IncidentColumn;

    pub use super::incident_event::Entity as IncidentEvent;
    pub use super::incident_event::Model as IncidentEventModel;
    pub use super::incident_event::ActiveModel as IncidentEventActiveModel;
    pub use super::incident_event::Column as IncidentEventColumn;

    pub use super::monitor_dependency::Entity as MonitorDependency;
    pub use super::monitor_dependency::Model as MonitorDependencyModel;
    pub use super::monitor_dependency::ActiveModel as MonitorDependencyActiveModel;
    pub use super::monitor_dependency::Column as MonitorDependencyColumn;
}
