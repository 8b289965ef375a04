//! The `services` module provides a high-level API for interacting with the
//! database. It encapsulates the data-access patterns so the rest of the
//! application (ping processor, HTTP handlers, background workers) can work
//! with domain models without knowing the underlying queries.
//!
//! Every function takes an injected `&DatabaseConnection`; there is no global
//! persistence handle, which keeps the services testable with fakes.

pub mod dependency_service;
pub mod incident_service;
pub mod monitor_service;
pub mod run_service;

pub use dependency_service::DependencyError;
pub use incident_service::{IncidentService, OpenIncident};
