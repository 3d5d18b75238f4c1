pub mod config;
pub mod errors;
pub mod features;
pub mod logging;
pub mod progress;
