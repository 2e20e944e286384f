pub mod config;
pub mod db;
pub mod errors;
pub mod matching;
pub mod metrics;
pub mod models;
pub mod services;
pub mod store;
