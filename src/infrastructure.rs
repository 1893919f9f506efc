//! Infrastructure layer: SQLite store, HTTP feed client, configuration and logging

pub mod config;
pub mod database_connection;
pub mod entity_store;
pub mod feed_client;
pub mod http_client;
pub mod keyed_lock;
pub mod logging;

pub use config::{AppConfig, ConfigError};
pub use database_connection::DatabaseConnection;
pub use entity_store::{EntityStore, StoreError, UpsertOutcome, Upserted};
pub use feed_client::{FeedSource, HttpFeed, PhotoListing};
pub use http_client::{FetchError, HttpClient, HttpClientConfig};
pub use logging::init_logging_with_config;
