pub mod clients;
pub mod config;
pub mod models;
pub mod service;

pub use config::Config;
pub use service::{create_app, AppState};
