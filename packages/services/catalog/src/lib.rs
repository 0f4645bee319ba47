pub mod api;
pub mod audit;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod handlers;
pub mod ingestion;
pub mod migrations;
pub mod models;
pub mod scheduler;
pub mod schema;
pub mod statistics;
pub mod storage;

// Convenient re-exports for tests and external callers
pub use catalog::*;
pub use config::*;
pub use models::*;
pub use storage::*;
