pub mod config;
pub mod models;
pub mod money;

pub use config::EngineConfig;
pub use models::*;
