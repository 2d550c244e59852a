pub mod api;
pub mod config;
pub mod db;
pub mod envelope;
pub mod error;
pub mod ingest;
pub mod listener;
pub mod model;
pub mod mqtt;
pub mod repositories;
pub mod validate;

pub use config::Config;
pub use error::{AppError, Result};
pub use ingest::Ingestor;
