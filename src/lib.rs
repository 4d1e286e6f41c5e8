//! Data-sync core for a terminal Hacker News client: a TTL cache over
//! SQLite, bounded parallel fetching, comment-tree flattening and a
//! background reply monitor.

pub mod actions;
pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod hn_client;
pub mod logging;
pub mod models;
pub mod monitor;
pub mod preview;
pub mod source;
pub mod tree;

pub use cache::{Cache, Cached};
pub use config::SyncConfig;
pub use db::Database;
pub use error::FetchError;
pub use fetcher::BatchFetcher;
pub use hn_client::HackerNewsClient;
pub use models::{FlatComment, Item, ItemId, ItemKind, StoryCategory, User};
pub use monitor::Monitor;
pub use source::{ItemSource, MemorySource, SourceHandle};
