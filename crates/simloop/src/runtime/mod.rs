mod app;
mod config;
mod keyboard;
mod logging;
mod telemetry;

pub use app::run_from_args;
