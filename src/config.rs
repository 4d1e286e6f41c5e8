//! Tunables for the cache, the fetcher and the reply monitor.
//!
//! Every component takes its section by value in its constructor, so tests
//! can build independent configurations side by side.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::ItemKind;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheTtls {
    pub story_list_ttl_secs: u64,
    pub item_ttl_secs: u64,
    pub comment_ttl_secs: u64,
    pub user_ttl_secs: u64,
    /// How long a confirmed-missing item is answered locally.
    pub not_found_ttl_secs: u64,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            story_list_ttl_secs: 60,
            item_ttl_secs: 5 * 60,
            comment_ttl_secs: 10 * 60,
            user_ttl_secs: 60 * 60,
            not_found_ttl_secs: 5 * 60,
        }
    }
}

impl CacheTtls {
    pub fn story_list(&self) -> Duration {
        Duration::from_secs(self.story_list_ttl_secs)
    }

    pub fn user(&self) -> Duration {
        Duration::from_secs(self.user_ttl_secs)
    }

    pub fn not_found(&self) -> Duration {
        Duration::from_secs(self.not_found_ttl_secs)
    }

    pub fn item(&self, kind: ItemKind) -> Duration {
        match kind {
            ItemKind::Comment => Duration::from_secs(self.comment_ttl_secs),
            _ => Duration::from_secs(self.item_ttl_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub max_concurrent: usize,
    pub request_timeout_secs: u64,
    pub page_size: usize,
    /// Levels of replies loaded below a thread root.
    pub thread_prefetch_depth: usize,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            request_timeout_secs: 10,
            page_size: 30,
            thread_prefetch_depth: 2,
            user_agent: format!("hacker_news_sync/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl FetchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_secs: u64,
    /// Replies are watched transitively while the watched comment's depth is below this.
    pub max_depth: u32,
    pub seed_count: usize,
    pub poll_batch_size: usize,
    pub preview_chars: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            max_depth: 2,
            seed_count: 50,
            poll_batch_size: 20,
            preview_chars: 200,
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub database_path: PathBuf,
    pub cache: CacheTtls,
    pub fetch: FetchConfig,
    pub monitor: MonitorConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            cache: CacheTtls::default(),
            fetch: FetchConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Loads a TOML file; a missing file means defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: SyncConfig = toml::from_str(content)?;
        if config.fetch.max_concurrent == 0 {
            return Err(anyhow!("fetch.max_concurrent must be at least 1"));
        }
        Ok(config)
    }

    pub fn default_config_path() -> Option<PathBuf> {
        dirs_next::home_dir().map(|home| home.join(".hn_reader").join("config.toml"))
    }
}

fn default_database_path() -> PathBuf {
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hn_reader")
        .join("cache.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = SyncConfig::default();
        assert_eq!(config.cache.story_list(), Duration::from_secs(60));
        assert_eq!(config.cache.item(ItemKind::Story), Duration::from_secs(300));
        assert_eq!(config.cache.item(ItemKind::Comment), Duration::from_secs(600));
        assert_eq!(config.cache.user(), Duration::from_secs(3600));
        assert_eq!(config.cache.not_found(), Duration::from_secs(300));
        assert_eq!(config.fetch.max_concurrent, 10);
        assert_eq!(config.monitor.max_depth, 2);
        assert_eq!(config.monitor.poll_batch_size, 20);
        assert!(config.database_path.ends_with("cache.db"));
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = SyncConfig::from_toml(
            r#"
            database_path = "/tmp/hn.db"

            [cache]
            user_ttl_secs = 7200

            [monitor]
            max_depth = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.database_path, PathBuf::from("/tmp/hn.db"));
        assert_eq!(config.cache.user_ttl_secs, 7200);
        assert_eq!(config.cache.story_list_ttl_secs, 60);
        assert_eq!(config.monitor.max_depth, 1);
        assert_eq!(config.monitor.seed_count, 50);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        assert!(SyncConfig::from_toml("[fetch]\nmax_concurrent = 0\n").is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.fetch.page_size, 30);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[cache\nitem_ttl_secs = ").unwrap();
        assert!(SyncConfig::load(&path).is_err());
    }
}
