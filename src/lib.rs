// Library exports for the CLI and integration tests

pub mod analytics;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod network;
pub mod preview;
pub mod shutdown;
pub mod uploads;
pub mod validation;
