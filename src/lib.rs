pub mod backup;
pub mod config;
pub mod engine;
pub mod error;
pub mod ipinfo;
pub mod payment;
pub mod reload;
pub mod store;
pub mod sweeper;
pub mod web;

pub use config::AppConfig;
pub use error::{AppError, AppResult};
