pub mod config;
pub mod error;
pub mod settings;

// Service control protocol
pub mod control;
pub mod service;

// Log tailing
pub mod log_line;
pub mod tail;

// Standalone runs
pub mod standalone;

// Lifecycle orchestration
pub mod coordinator;
pub mod poller;

pub use error::{ObserverError, Result};
pub use service::{ServiceState, ServiceStateEntry};
pub use settings::ServiceObserverSettings;
