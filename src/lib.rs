pub mod auth;
pub mod cache;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod logger;
pub mod mailer;
pub mod middleware;
pub mod models;
pub mod permissions;
pub mod schema;
pub mod sequence;
pub mod services;
pub mod state;
pub mod store;

// Re-export common types
pub use crate::config::{AppConfig, DbPool};
pub use crate::errors::ApiError;
pub use crate::state::AppState;
