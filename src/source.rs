//! The remote data contract and an in-memory implementation of it.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::FetchError;
use crate::models::{Item, ItemId, SearchQuery, StoryCategory, User};

/// Read access to the remote service.
#[async_trait]
pub trait ItemSource: Send + Sync {
    async fn fetch_item(&self, id: ItemId) -> Result<Item, FetchError>;

    async fn fetch_ranked_ids(&self, category: StoryCategory) -> Result<Vec<ItemId>, FetchError>;

    async fn fetch_user(&self, username: &str) -> Result<User, FetchError>;

    /// Runs `query` against the index its `endpoint` names.
    async fn search_by_date(&self, query: &SearchQuery) -> Result<Vec<Item>, FetchError>;
}

pub type SourceHandle = Arc<dyn ItemSource>;

#[derive(Default)]
struct MemoryState {
    items: HashMap<ItemId, Item>,
    lists: HashMap<StoryCategory, Vec<ItemId>>,
    users: HashMap<String, User>,
    search_results: Vec<Item>,
    failing_items: HashSet<ItemId>,
    failing_users: HashSet<String>,
    failing_lists: HashSet<StoryCategory>,
    delays: HashMap<ItemId, Duration>,
}

/// An `ItemSource` backed by maps; handy offline and in tests.
///
/// Counts every call and tracks the peak number of item fetches in flight.
#[derive(Default)]
pub struct MemorySource {
    state: Mutex<MemoryState>,
    item_calls: AtomicUsize,
    list_calls: AtomicUsize,
    user_calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MemoryState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }

    pub fn insert_item(&self, item: Item) {
        self.with_state(|s| {
            s.items.insert(item.id, item);
        });
    }

    pub fn remove_item(&self, id: ItemId) {
        self.with_state(|s| {
            s.items.remove(&id);
        });
    }

    /// Appends a reply id to an existing item's children.
    pub fn add_child(&self, parent: ItemId, child: ItemId) {
        self.with_state(|s| {
            if let Some(item) = s.items.get_mut(&parent) {
                item.children.push(child);
            }
        });
    }

    pub fn set_list(&self, category: StoryCategory, ids: Vec<ItemId>) {
        self.with_state(|s| {
            s.lists.insert(category, ids);
        });
    }

    pub fn insert_user(&self, user: User) {
        self.with_state(|s| {
            s.users.insert(user.id.clone(), user);
        });
    }

    pub fn set_search_results(&self, items: Vec<Item>) {
        self.with_state(|s| s.search_results = items);
    }

    pub fn fail_item(&self, id: ItemId, failing: bool) {
        self.with_state(|s| {
            if failing {
                s.failing_items.insert(id);
            } else {
                s.failing_items.remove(&id);
            }
        });
    }

    pub fn fail_user(&self, username: &str, failing: bool) {
        self.with_state(|s| {
            if failing {
                s.failing_users.insert(username.to_string());
            } else {
                s.failing_users.remove(username);
            }
        });
    }

    pub fn fail_list(&self, category: StoryCategory, failing: bool) {
        self.with_state(|s| {
            if failing {
                s.failing_lists.insert(category);
            } else {
                s.failing_lists.remove(&category);
            }
        });
    }

    pub fn set_delay(&self, id: ItemId, delay: Duration) {
        self.with_state(|s| {
            s.delays.insert(id, delay);
        });
    }

    pub fn item_calls(&self) -> usize {
        self.item_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn user_calls(&self) -> usize {
        self.user_calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ItemSource for MemorySource {
    async fn fetch_item(&self, id: ItemId) -> Result<Item, FetchError> {
        self.item_calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let delay = self.with_state(|s| s.delays.get(&id).copied());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        } else {
            tokio::task::yield_now().await;
        }

        self.with_state(|s| {
            if s.failing_items.contains(&id) {
                return Err(FetchError::Transient(format!("item {} unavailable", id)));
            }
            s.items
                .get(&id)
                .cloned()
                .ok_or_else(|| FetchError::NotFound(format!("item {}", id)))
        })
    }

    async fn fetch_ranked_ids(&self, category: StoryCategory) -> Result<Vec<ItemId>, FetchError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.with_state(|s| {
            if s.failing_lists.contains(&category) {
                return Err(FetchError::Transient(format!("{} list unavailable", category)));
            }
            Ok(s.lists.get(&category).cloned().unwrap_or_default())
        })
    }

    async fn fetch_user(&self, username: &str) -> Result<User, FetchError> {
        self.user_calls.fetch_add(1, Ordering::SeqCst);
        self.with_state(|s| {
            if s.failing_users.contains(username) {
                return Err(FetchError::Transient(format!("user {} unavailable", username)));
            }
            s.users
                .get(username)
                .cloned()
                .ok_or_else(|| FetchError::NotFound(format!("user {}", username)))
        })
    }

    async fn search_by_date(&self, query: &SearchQuery) -> Result<Vec<Item>, FetchError> {
        self.with_state(|s| {
            Ok(s.search_results
                .iter()
                .skip(query.page * query.page_size)
                .take(query.page_size)
                .cloned()
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_source_reports_missing_and_failing_items() {
        let source = MemorySource::new();
        source.insert_item(Item::story(1, "pg", "Hello"));
        source.insert_item(Item::story(2, "pg", "World"));
        source.fail_item(2, true);

        assert_eq!(source.fetch_item(1).await.unwrap().title, "Hello");
        assert!(matches!(source.fetch_item(2).await, Err(FetchError::Transient(_))));
        assert!(matches!(source.fetch_item(3).await, Err(FetchError::NotFound(_))));
        assert_eq!(source.item_calls(), 3);

        source.fail_item(2, false);
        assert!(source.fetch_item(2).await.is_ok());
    }

    #[tokio::test]
    async fn search_pages_through_results() {
        let source = MemorySource::new();
        source.set_search_results((1..=5).map(|id| Item::comment(id, 100, "a", "t")).collect());
        let page = source
            .search_by_date(&SearchQuery::newest_comments(2, 1))
            .await
            .unwrap();
        let ids: Vec<ItemId> = page.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![3, 4]);
    }
}
