pub mod config;
pub mod error_sink;
pub mod relay;
