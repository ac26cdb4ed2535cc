pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod hub;
pub mod logging;
pub mod models;
pub mod repository;
pub mod services;
pub mod state;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use state::AppState;
