//! Pluck service shell: HTTP API, SQLite mapping store, page fetcher and the
//! interactive teaching REPL around the `pluck` core.

pub mod config;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod rate_limit;
pub mod repl;
pub mod rest;
pub mod service;
pub mod sqlite_store;

pub use config::{ConfigOverrides, ServerConfig};
pub use error::{ServiceError, ServiceResult};
pub use events::{EventBus, PluckEvent};
pub use fetcher::{FetchedPage, HttpFetcher, PageFetcher};
pub use rate_limit::RateLimiter;
pub use rest::AppState;
pub use service::PluckService;
pub use sqlite_store::SqliteMappingStore;
