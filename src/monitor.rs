//! Background watcher that turns new replies into notifications.
//!
//! Watched comments live only in the store; every cycle reads the least
//! recently checked batch, re-fetches each one, and diffs its children against
//! the known set. Replies found within the depth budget become watched too.
//! The unread count is published on a `watch` channel, so a slow reader only
//! ever sees the latest value.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::Cache;
use crate::config::MonitorConfig;
use crate::error::FetchError;
use crate::models::{Item, ItemId, ItemKind, MonitoredComment, Notification};
use crate::preview::text_preview;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeedReport {
    pub fetched: usize,
    pub comments: usize,
    pub registered: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub checked: usize,
    pub failed: usize,
    pub new_notifications: usize,
    pub newly_watched: usize,
    pub cancelled: bool,
}

pub struct Monitor {
    cache: Arc<Cache>,
    config: MonitorConfig,
    unread: watch::Sender<usize>,
}

impl Monitor {
    /// The receiver starts at the stored unread count and is marked changed
    /// after every cycle that created notifications.
    pub fn new(cache: Arc<Cache>, config: MonitorConfig) -> (Self, watch::Receiver<usize>) {
        let initial = cache.store().unread_notification_count().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to count unread notifications");
            0
        });
        let (unread, receiver) = watch::channel(initial);
        (
            Self {
                cache,
                config,
                unread,
            },
            receiver,
        )
    }

    /// Watches the user's most recent comments. Comments already watched keep
    /// their known replies.
    pub async fn seed_from_user(
        &self,
        username: &str,
        cancel: &CancellationToken,
    ) -> Result<SeedReport, FetchError> {
        let user = self.cache.refresh_user(username).await?;
        let recent: Vec<ItemId> = user
            .submitted
            .iter()
            .copied()
            .take(self.config.seed_count)
            .collect();

        let items = self.cache.refresh_items(&recent, cancel).await?;
        let mut report = SeedReport::default();
        let now = self.cache.now();

        for item in items.into_iter().flatten() {
            report.fetched += 1;
            if item.kind != ItemKind::Comment {
                continue;
            }
            report.comments += 1;

            let watched = MonitoredComment {
                item_id: item.id,
                root_story_id: self.resolve_root_story(&item).await,
                known_child_ids: item.children.iter().copied().collect(),
                last_checked_at: now,
                depth: 0,
                created_at: now,
            };
            match self.cache.store().insert_monitored_comment_if_absent(&watched) {
                Ok(true) => report.registered += 1,
                Ok(false) => {}
                Err(e) => warn!(item_id = item.id, error = %e, "Failed to register watched comment"),
            }
        }

        info!(
            username,
            fetched = report.fetched,
            comments = report.comments,
            registered = report.registered,
            "Seeded reply monitor"
        );
        Ok(report)
    }

    /// Walks parents up to the thread root. When an ancestor cannot be
    /// loaded, the last id known on the way up is used.
    pub async fn resolve_root_story(&self, comment: &Item) -> ItemId {
        let mut current = comment.clone();
        let mut seen = HashSet::new();
        while current.parent_id != 0 {
            let parent_id = current.parent_id;
            if !seen.insert(parent_id) {
                return parent_id;
            }
            match self.cache.item(parent_id).await {
                Ok(parent) if parent.kind.is_root_kind() => return parent.id,
                Ok(parent) => current = parent,
                Err(e) => {
                    debug!(item_id = parent_id, error = %e, "Ancestor unavailable, stopping walk");
                    return parent_id;
                }
            }
        }
        current.id
    }

    /// One pass over the stalest watched comments.
    pub async fn poll_once(&self, cancel: &CancellationToken) -> PollReport {
        let mut report = PollReport::default();
        let store = self.cache.store();

        let due = match store.monitored_comments_due(self.config.poll_batch_size) {
            Ok(due) => due,
            Err(e) => {
                warn!(error = %e, "Failed to read watched comments");
                return report;
            }
        };

        for mut watched in due {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                fetched = self.cache.refresh_item(watched.item_id) => fetched,
            };
            // Left unchecked so it sorts first next cycle
            let item = match fetched {
                Ok(item) => item,
                Err(e) => {
                    report.failed += 1;
                    debug!(item_id = watched.item_id, error = %e, "Watched comment fetch failed");
                    continue;
                }
            };
            report.checked += 1;

            let new_children: Vec<ItemId> = item
                .children
                .iter()
                .copied()
                .filter(|id| !watched.known_child_ids.contains(id))
                .collect();

            if !new_children.is_empty() {
                let replies = match self.cache.refresh_items(&new_children, cancel).await {
                    Ok(replies) => replies,
                    Err(_) => {
                        report.cancelled = true;
                        break;
                    }
                };
                for reply in replies.into_iter().flatten() {
                    if self.record_reply(&watched, &reply) {
                        report.new_notifications += 1;
                    }
                    if watched.depth < self.config.max_depth && self.watch_reply(&watched, &reply) {
                        report.newly_watched += 1;
                    }
                }
            }

            watched.known_child_ids.extend(item.children.iter().copied());
            watched.last_checked_at = self.cache.now();
            if let Err(e) = store.upsert_monitored_comment(&watched) {
                warn!(item_id = watched.item_id, error = %e, "Failed to update watched comment");
            }
        }

        if report.new_notifications > 0 {
            self.announce_unread();
        }
        report
    }

    // Returns whether a notification was created
    fn record_reply(&self, watched: &MonitoredComment, reply: &Item) -> bool {
        let notification = Notification {
            item_id: reply.id,
            parent_id: watched.item_id,
            root_story_id: watched.root_story_id,
            author: reply.author.clone(),
            text_preview: text_preview(&reply.text, self.config.preview_chars),
            created_at: reply.created_at,
            read: false,
        };
        match self.cache.store().add_notification(&notification) {
            Ok(inserted) => inserted,
            Err(e) => {
                warn!(item_id = reply.id, error = %e, "Failed to store notification");
                false
            }
        }
    }

    fn watch_reply(&self, watched: &MonitoredComment, reply: &Item) -> bool {
        let now = self.cache.now();
        let child = MonitoredComment {
            item_id: reply.id,
            root_story_id: watched.root_story_id,
            known_child_ids: reply.children.iter().copied().collect(),
            last_checked_at: now,
            depth: watched.depth + 1,
            created_at: now,
        };
        match self.cache.store().insert_monitored_comment_if_absent(&child) {
            Ok(inserted) => inserted,
            Err(e) => {
                warn!(item_id = reply.id, error = %e, "Failed to watch reply");
                false
            }
        }
    }

    fn announce_unread(&self) {
        let unread = match self.cache.store().unread_notification_count() {
            Ok(unread) => unread,
            Err(e) => {
                warn!(error = %e, "Failed to count unread notifications");
                return;
            }
        };
        self.unread.send_replace(unread);
    }

    /// Polls every interval until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let period = self.config.interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = period.as_secs(), "Reply monitor started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = self.poll_once(&cancel).await;
            debug!(
                checked = report.checked,
                failed = report.failed,
                new_notifications = report.new_notifications,
                newly_watched = report.newly_watched,
                "Reply monitor cycle finished"
            );
            if report.cancelled {
                break;
            }
        }
        info!("Reply monitor stopped");
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }
}
