pub mod alerting;
pub mod analytics;
pub mod cascade;
pub mod db;
pub mod ingest;
pub mod notifications;
pub mod scheduling;
pub mod server;
pub mod web;
