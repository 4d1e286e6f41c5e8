//! Authenticated write actions and the cache entries each one makes stale.
//!
//! Performing the action itself is left to an `ActionPerformer`; this module
//! only decides what to forget once it succeeded.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::cache::Cache;
use crate::error::FetchError;
use crate::models::{ItemId, StoryCategory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteDirection {
    Up,
    Unvote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteAction {
    Login { username: String, password: String },
    Vote { item_id: ItemId, direction: VoteDirection },
    Reply { parent_id: ItemId, text: String },
    Submit { title: String, url: Option<String>, text: Option<String> },
    Edit { item_id: ItemId, text: String },
}

impl WriteAction {
    pub fn name(&self) -> &'static str {
        match self {
            WriteAction::Login { .. } => "login",
            WriteAction::Vote { .. } => "vote",
            WriteAction::Reply { .. } => "reply",
            WriteAction::Submit { .. } => "submit",
            WriteAction::Edit { .. } => "edit",
        }
    }

    /// The item whose cached copy no longer matches the server afterwards.
    pub fn affected_item(&self) -> Option<ItemId> {
        match self {
            WriteAction::Vote { item_id, .. } | WriteAction::Edit { item_id, .. } => Some(*item_id),
            WriteAction::Reply { parent_id, .. } => Some(*parent_id),
            WriteAction::Login { .. } | WriteAction::Submit { .. } => None,
        }
    }

    pub fn affected_list(&self) -> Option<StoryCategory> {
        match self {
            WriteAction::Submit { .. } => Some(StoryCategory::New),
            _ => None,
        }
    }
}

#[async_trait]
pub trait ActionPerformer: Send + Sync {
    async fn perform(&self, action: &WriteAction) -> Result<(), FetchError>;
}

/// Runs `action` and, only when it succeeds, drops the cache entries it
/// invalidated so the next read goes to the network.
pub async fn perform_and_invalidate(
    performer: &dyn ActionPerformer,
    cache: &Cache,
    action: &WriteAction,
) -> Result<(), FetchError> {
    if let Err(e) = performer.perform(action).await {
        debug!(action = action.name(), error = %e, "Write action failed");
        return Err(e);
    }

    if let Some(id) = action.affected_item() {
        cache.invalidate_item(id);
    }
    if let Some(category) = action.affected_list() {
        cache.invalidate_story_list(category);
    }
    info!(action = action.name(), "Write action completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheTtls, FetchConfig};
    use crate::db::Database;
    use crate::models::Item;
    use crate::source::MemorySource;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingPerformer {
        performed: Mutex<Vec<WriteAction>>,
        fail_with: Option<FetchError>,
    }

    #[async_trait]
    impl ActionPerformer for RecordingPerformer {
        async fn perform(&self, action: &WriteAction) -> Result<(), FetchError> {
            self.performed.lock().unwrap().push(action.clone());
            match &self.fail_with {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }
    }

    fn seeded_cache() -> Cache {
        let cache = Cache::new(
            Database::open_in_memory().unwrap(),
            Arc::new(MemorySource::new()),
            CacheTtls::default(),
            FetchConfig::default(),
        );
        cache.put_item(&Item::story(1, "op", "story"));
        cache.put_item(&Item::comment(2, 1, "a", "text"));
        cache.put_story_list(StoryCategory::New, &[1]);
        cache.put_story_list(StoryCategory::Top, &[1]);
        cache
    }

    #[tokio::test]
    async fn vote_and_edit_forget_the_item() {
        let cache = seeded_cache();
        let performer = RecordingPerformer::default();

        let vote = WriteAction::Vote { item_id: 1, direction: VoteDirection::Up };
        perform_and_invalidate(&performer, &cache, &vote).await.unwrap();
        assert!(cache.get_item(1).is_none());
        assert!(cache.get_item(2).is_some());

        let edit = WriteAction::Edit { item_id: 2, text: "fixed".into() };
        perform_and_invalidate(&performer, &cache, &edit).await.unwrap();
        assert!(cache.get_item(2).is_none());
        assert_eq!(performer.performed.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn reply_forgets_the_parent() {
        let cache = seeded_cache();
        let performer = RecordingPerformer::default();

        let reply = WriteAction::Reply { parent_id: 2, text: "agreed".into() };
        perform_and_invalidate(&performer, &cache, &reply).await.unwrap();
        assert!(cache.get_item(2).is_none());
        assert!(cache.get_item(1).is_some());
    }

    #[tokio::test]
    async fn submit_forgets_only_the_new_list() {
        let cache = seeded_cache();
        let performer = RecordingPerformer::default();

        let submit = WriteAction::Submit {
            title: "Show HN: thing".into(),
            url: Some("https://example.com".into()),
            text: None,
        };
        perform_and_invalidate(&performer, &cache, &submit).await.unwrap();
        assert!(cache.get_story_list(StoryCategory::New).is_none());
        assert!(cache.get_story_list(StoryCategory::Top).is_some());
    }

    #[tokio::test]
    async fn failed_action_keeps_cache() {
        let cache = seeded_cache();
        let performer = RecordingPerformer {
            fail_with: Some(FetchError::AuthRequired),
            ..Default::default()
        };

        let vote = WriteAction::Vote { item_id: 1, direction: VoteDirection::Up };
        let result = perform_and_invalidate(&performer, &cache, &vote).await;
        assert_eq!(result, Err(FetchError::AuthRequired));
        assert!(cache.get_item(1).is_some());
    }

    #[tokio::test]
    async fn login_touches_nothing() {
        let cache = seeded_cache();
        let performer = RecordingPerformer::default();

        let login = WriteAction::Login { username: "me".into(), password: "pw".into() };
        perform_and_invalidate(&performer, &cache, &login).await.unwrap();
        assert!(cache.get_item(1).is_some());
        assert!(cache.get_story_list(StoryCategory::New).is_some());
    }
}
