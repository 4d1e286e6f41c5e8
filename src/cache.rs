//! TTL freshness over the local store, with read-through loaders.
//!
//! A fresh hit never touches the network. A miss or a stale hit triggers a
//! live fetch; when that fetch fails transiently, a stale value is returned
//! instead of the error. A NotFound answer drops the stored item and is
//! remembered for `not_found_ttl_secs`, so repeated reads of a deleted id stay
//! local.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{CacheTtls, FetchConfig};
use crate::db::Database;
use crate::error::FetchError;
use crate::fetcher::BatchFetcher;
use crate::models::{Item, ItemId, SearchQuery, StoryCategory, User};
use crate::source::SourceHandle;

/// A cache hit. `is_fresh` is false once the entry outlived its TTL.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub value: T,
    pub is_fresh: bool,
}

pub struct Cache {
    db: Database,
    fetcher: BatchFetcher,
    ttls: CacheTtls,
    fetch: FetchConfig,
    clock: Arc<dyn Clock>,
}

impl Cache {
    pub fn new(db: Database, source: SourceHandle, ttls: CacheTtls, fetch: FetchConfig) -> Self {
        Self {
            db,
            fetcher: BatchFetcher::new(source, fetch.max_concurrent),
            ttls,
            fetch,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Database {
        &self.db
    }

    pub fn fetcher(&self) -> &BatchFetcher {
        &self.fetcher
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    // Items

    pub fn get_item(&self, id: ItemId) -> Option<Cached<Item>> {
        match self.db.get_item(id) {
            Ok(entry) => entry.map(|entry| {
                let ttl = self.ttls.item(entry.value.kind);
                Cached {
                    is_fresh: entry.is_fresh(self.now(), ttl),
                    value: entry.value,
                }
            }),
            Err(e) => {
                warn!(item_id = id, error = %e, "Item cache read failed");
                None
            }
        }
    }

    pub fn put_item(&self, item: &Item) {
        if let Err(e) = self.db.put_item(item, self.now()) {
            warn!(item_id = item.id, error = %e, "Item cache write failed");
        }
    }

    pub fn invalidate_item(&self, id: ItemId) {
        if let Err(e) = self.db.delete_item(id) {
            warn!(item_id = id, error = %e, "Item cache invalidation failed");
        }
    }

    /// Whether the remote reported `id` missing within the not-found TTL.
    pub fn is_known_missing(&self, id: ItemId) -> bool {
        match self.db.item_missing_since(id) {
            Ok(Some(checked_at)) => {
                let ttl = self.ttls.not_found().as_secs() as i64;
                self.now() - checked_at < ttl
            }
            Ok(None) => false,
            Err(e) => {
                warn!(item_id = id, error = %e, "Missing-item marker read failed");
                false
            }
        }
    }

    fn record_missing(&self, id: ItemId) {
        debug!(item_id = id, "Remote reports item missing");
        if let Err(e) = self.db.mark_item_missing(id, self.now()) {
            warn!(item_id = id, error = %e, "Missing-item marker write failed");
        }
    }

    pub async fn item(&self, id: ItemId) -> Result<Item, FetchError> {
        if self.is_known_missing(id) {
            return Err(FetchError::NotFound(format!("item {}", id)));
        }
        let source = self.fetcher.source();
        let result = read_through(
            &format!("item {}", id),
            self.get_item(id),
            source.fetch_item(id),
            |item| self.put_item(item),
        )
        .await;
        if let Err(FetchError::NotFound(_)) = &result {
            self.record_missing(id);
        }
        result
    }

    /// Live fetch that bypasses freshness and never falls back.
    pub async fn refresh_item(&self, id: ItemId) -> Result<Item, FetchError> {
        match self.fetcher.source().fetch_item(id).await {
            Ok(item) => {
                self.put_item(&item);
                Ok(item)
            }
            Err(e) => {
                if let FetchError::NotFound(_) = e {
                    self.record_missing(id);
                }
                Err(e)
            }
        }
    }

    /// Batch read-through. Output matches `ids` slot for slot; fresh hits are
    /// served locally and everything else goes out in a single batch.
    pub async fn items(
        &self,
        ids: &[ItemId],
        cancel: &CancellationToken,
    ) -> Result<Vec<Option<Item>>, FetchError> {
        let mut results: Vec<Option<Item>> = Vec::with_capacity(ids.len());
        let mut stale: Vec<Option<Item>> = Vec::with_capacity(ids.len());
        let mut pending_slots = Vec::new();
        let mut pending_ids = Vec::new();

        for (slot, &id) in ids.iter().enumerate() {
            if self.is_known_missing(id) {
                results.push(None);
                stale.push(None);
                continue;
            }
            match self.get_item(id) {
                Some(hit) if hit.is_fresh => {
                    results.push(Some(hit.value));
                    stale.push(None);
                }
                other => {
                    results.push(None);
                    stale.push(other.map(|hit| hit.value));
                    pending_slots.push(slot);
                    pending_ids.push(id);
                }
            }
        }

        if pending_ids.is_empty() {
            return Ok(results);
        }

        debug!(
            requested = ids.len(),
            fetching = pending_ids.len(),
            "Fetching items not fresh in cache"
        );
        let fetched = self.fetcher.fetch_each(&pending_ids, cancel).await?;
        for ((slot, id), result) in pending_slots.into_iter().zip(pending_ids).zip(fetched) {
            results[slot] = match result {
                Ok(item) => {
                    self.put_item(&item);
                    Some(item)
                }
                Err(FetchError::NotFound(_)) => {
                    self.record_missing(id);
                    None
                }
                Err(e) if e.is_transient() => stale[slot].take(),
                Err(_) => None,
            };
        }
        Ok(results)
    }

    /// Live batch fetch that persists every item it gets.
    pub async fn refresh_items(
        &self,
        ids: &[ItemId],
        cancel: &CancellationToken,
    ) -> Result<Vec<Option<Item>>, FetchError> {
        let fetched = self.fetcher.fetch_each(ids, cancel).await?;
        let mut items = Vec::with_capacity(fetched.len());
        for (&id, result) in ids.iter().zip(fetched) {
            match result {
                Ok(item) => {
                    self.put_item(&item);
                    items.push(Some(item));
                }
                Err(e) => {
                    if let FetchError::NotFound(_) = e {
                        self.record_missing(id);
                    }
                    items.push(None);
                }
            }
        }
        Ok(items)
    }

    /// Loads a thread root and up to `thread_prefetch_depth` levels of replies
    /// into the store so the tree can be flattened offline.
    pub async fn load_thread(
        &self,
        root_id: ItemId,
        cancel: &CancellationToken,
    ) -> Result<Item, FetchError> {
        let root = self.item(root_id).await?;

        let mut level = root.children.clone();
        for _ in 0..self.fetch.thread_prefetch_depth {
            if level.is_empty() || cancel.is_cancelled() {
                break;
            }
            let items = self.items(&level, cancel).await?;
            level = items
                .iter()
                .flatten()
                .flat_map(|item| item.children.iter().copied())
                .collect();
        }
        Ok(root)
    }

    // Ranked lists

    pub fn get_story_list(&self, category: StoryCategory) -> Option<Cached<Vec<ItemId>>> {
        match self.db.get_story_list(category) {
            Ok(entry) => entry.map(|entry| Cached {
                is_fresh: entry.is_fresh(self.now(), self.ttls.story_list()),
                value: entry.value,
            }),
            Err(e) => {
                warn!(category = %category, error = %e, "Story list cache read failed");
                None
            }
        }
    }

    pub fn put_story_list(&self, category: StoryCategory, ids: &[ItemId]) {
        if let Err(e) = self.db.put_story_list(category, ids, self.now()) {
            warn!(category = %category, error = %e, "Story list cache write failed");
        }
    }

    pub fn invalidate_story_list(&self, category: StoryCategory) {
        if let Err(e) = self.db.delete_story_list(category) {
            warn!(category = %category, error = %e, "Story list invalidation failed");
        }
    }

    pub async fn story_list(&self, category: StoryCategory) -> Result<Vec<ItemId>, FetchError> {
        read_through(
            &format!("{} list", category),
            self.get_story_list(category),
            self.fetcher.source().fetch_ranked_ids(category),
            |ids| self.put_story_list(category, ids),
        )
        .await
    }

    /// Ignores freshness; still falls back to the stored list on failure.
    pub async fn refresh_story_list(&self, category: StoryCategory) -> Result<Vec<ItemId>, FetchError> {
        let stored = self.get_story_list(category).map(|hit| Cached {
            value: hit.value,
            is_fresh: false,
        });
        read_through(
            &format!("{} list", category),
            stored,
            self.fetcher.source().fetch_ranked_ids(category),
            |ids| self.put_story_list(category, ids),
        )
        .await
    }

    /// The first page of a category, absent stories dropped.
    pub async fn stories(
        &self,
        category: StoryCategory,
        cancel: &CancellationToken,
    ) -> Result<Vec<Item>, FetchError> {
        let ids = self.story_list(category).await?;
        let page: Vec<ItemId> = ids.into_iter().take(self.fetch.page_size).collect();
        let items = self.items(&page, cancel).await?;
        Ok(items.into_iter().flatten().collect())
    }

    // Users

    pub fn get_user(&self, username: &str) -> Option<Cached<User>> {
        match self.db.get_user(username) {
            Ok(entry) => entry.map(|entry| Cached {
                is_fresh: entry.is_fresh(self.now(), self.ttls.user()),
                value: entry.value,
            }),
            Err(e) => {
                warn!(username, error = %e, "User cache read failed");
                None
            }
        }
    }

    pub fn put_user(&self, user: &User) {
        if let Err(e) = self.db.put_user(user, self.now()) {
            warn!(username = %user.id, error = %e, "User cache write failed");
        }
    }

    pub fn invalidate_user(&self, username: &str) {
        if let Err(e) = self.db.delete_user(username) {
            warn!(username, error = %e, "User invalidation failed");
        }
    }

    pub async fn user(&self, username: &str) -> Result<User, FetchError> {
        read_through(
            &format!("user {}", username),
            self.get_user(username),
            self.fetcher.source().fetch_user(username),
            |user| self.put_user(user),
        )
        .await
    }

    /// Ignores freshness; still falls back to the stored profile on failure.
    pub async fn refresh_user(&self, username: &str) -> Result<User, FetchError> {
        let stored = self.get_user(username).map(|hit| Cached {
            value: hit.value,
            is_fresh: false,
        });
        read_through(
            &format!("user {}", username),
            stored,
            self.fetcher.source().fetch_user(username),
            |user| self.put_user(user),
        )
        .await
    }

    // Search results are for display only and are not persisted
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<Item>, FetchError> {
        self.fetcher.source().search_by_date(query).await
    }
}

async fn read_through<T, Fut>(
    what: &str,
    cached: Option<Cached<T>>,
    fetch: Fut,
    store: impl FnOnce(&T),
) -> Result<T, FetchError>
where
    Fut: Future<Output = Result<T, FetchError>>,
{
    let stale = match cached {
        Some(hit) if hit.is_fresh => return Ok(hit.value),
        other => other.map(|hit| hit.value),
    };

    match fetch.await {
        Ok(value) => {
            store(&value);
            Ok(value)
        }
        Err(e) if e.is_transient() => match stale {
            Some(value) => {
                warn!(what, error = %e, "Live fetch failed, serving stale cache");
                Ok(value)
            }
            None => Err(e),
        },
        Err(e) => Err(e),
    }
}
