//! `voxnlu` service wiring: configuration and application lifecycle.

pub mod app;
pub mod config;

pub use app::App;
pub use config::ServiceConfig;
