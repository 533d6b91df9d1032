pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod rate_limiter;
pub mod services;
pub mod state;
