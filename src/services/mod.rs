//! # Services Module
//!
//! Domain stores and background work that sit behind the HTTP routes.

pub mod maintenance;
pub mod monitoring;
pub mod time_entries;

pub use maintenance::MaintenanceTask;
pub use monitoring::MonitoringFacade;
pub use time_entries::TimeEntryStore;
