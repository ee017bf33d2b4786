pub mod analytics;
pub mod config;
pub mod error;
pub mod storage;
