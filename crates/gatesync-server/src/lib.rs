pub mod config;
pub mod handlers;
pub mod observability;
pub mod server;

pub use config::AppConfig;
pub use observability::{apply_logging_level, init_tracing, shutdown_tracing};
pub use server::{GatesyncNode, build_app};
