use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::models::{
    CacheEntry, Item, ItemId, ItemKind, MonitoredComment, Notification, StoryCategory, User,
};

const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS items (
        id INTEGER PRIMARY KEY,
        kind TEXT NOT NULL,
        author TEXT NOT NULL DEFAULT '',
        created_at INTEGER NOT NULL DEFAULT 0,
        text TEXT NOT NULL DEFAULT '',
        parent_id INTEGER NOT NULL DEFAULT 0,
        url TEXT NOT NULL DEFAULT '',
        title TEXT NOT NULL DEFAULT '',
        score INTEGER NOT NULL DEFAULT 0,
        comment_count INTEGER NOT NULL DEFAULT 0,
        children TEXT NOT NULL DEFAULT '[]',
        parts TEXT NOT NULL DEFAULT '[]',
        dead INTEGER NOT NULL DEFAULT 0,
        deleted INTEGER NOT NULL DEFAULT 0,
        fetched_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_items_parent ON items(parent_id)",
    "CREATE TABLE IF NOT EXISTS missing_items (
        id INTEGER PRIMARY KEY,
        checked_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS story_lists (
        category TEXT PRIMARY KEY,
        item_ids TEXT NOT NULL,
        fetched_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        created INTEGER NOT NULL DEFAULT 0,
        karma INTEGER NOT NULL DEFAULT 0,
        about TEXT NOT NULL DEFAULT '',
        submitted TEXT NOT NULL DEFAULT '[]',
        fetched_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS monitored_comments (
        item_id INTEGER PRIMARY KEY,
        root_story_id INTEGER NOT NULL,
        known_children TEXT NOT NULL DEFAULT '[]',
        last_checked_at INTEGER NOT NULL,
        depth INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_monitored_last_checked ON monitored_comments(last_checked_at)",
    "CREATE TABLE IF NOT EXISTS notifications (
        item_id INTEGER PRIMARY KEY,
        parent_id INTEGER NOT NULL,
        root_story_id INTEGER NOT NULL,
        author TEXT NOT NULL DEFAULT '',
        text_preview TEXT NOT NULL DEFAULT '',
        created_at INTEGER NOT NULL,
        read INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_notifications_read ON notifications(read)",
];

/// Local SQLite store. Every call is its own atomic statement.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        for migration in MIGRATIONS {
            conn.execute(migration, [])
                .map_err(|e| anyhow!("migration failed: {}\nSQL: {}", e, migration))?;
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Failed to lock database connection"))
    }

    // Items

    pub fn get_item(&self, id: ItemId) -> Result<Option<CacheEntry<Item>>> {
        let conn = self.lock()?;
        let entry = conn
            .query_row(
                "SELECT id, kind, author, created_at, text, parent_id, url, title, score,
                        comment_count, children, parts, dead, deleted, fetched_at
                 FROM items WHERE id = ?1",
                params![id as i64],
                item_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    pub fn put_item(&self, item: &Item, fetched_at: i64) -> Result<()> {
        let children = serde_json::to_string(&item.children)?;
        let parts = serde_json::to_string(&item.parts)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO items (id, kind, author, created_at, text, parent_id, url,
                title, score, comment_count, children, parts, dead, deleted, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                item.id as i64,
                item.kind.as_str(),
                item.author,
                item.created_at,
                item.text,
                item.parent_id as i64,
                item.url,
                item.title,
                item.score,
                item.comment_count,
                children,
                parts,
                item.dead,
                item.deleted,
                fetched_at,
            ],
        )?;
        conn.execute("DELETE FROM missing_items WHERE id = ?1", params![item.id as i64])?;
        Ok(())
    }

    pub fn delete_item(&self, id: ItemId) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM items WHERE id = ?1", params![id as i64])?;
        Ok(())
    }

    /// Records that the remote has no item `id`, dropping any stored copy.
    pub fn mark_item_missing(&self, id: ItemId, checked_at: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM items WHERE id = ?1", params![id as i64])?;
        conn.execute(
            "INSERT OR REPLACE INTO missing_items (id, checked_at) VALUES (?1, ?2)",
            params![id as i64, checked_at],
        )?;
        Ok(())
    }

    /// When the remote last reported `id` missing. Storing the item clears it.
    pub fn item_missing_since(&self, id: ItemId) -> Result<Option<i64>> {
        let conn = self.lock()?;
        let checked_at = conn
            .query_row(
                "SELECT checked_at FROM missing_items WHERE id = ?1",
                params![id as i64],
                |row| row.get(0),
            )
            .optional()?;
        Ok(checked_at)
    }

    // Ranked lists

    pub fn get_story_list(&self, category: StoryCategory) -> Result<Option<CacheEntry<Vec<ItemId>>>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT item_ids, fetched_at FROM story_lists WHERE category = ?1",
                params![category.as_str()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        match row {
            Some((ids, fetched_at)) => Ok(Some(CacheEntry::new(serde_json::from_str(&ids)?, fetched_at))),
            None => Ok(None),
        }
    }

    pub fn put_story_list(&self, category: StoryCategory, ids: &[ItemId], fetched_at: i64) -> Result<()> {
        let ids = serde_json::to_string(ids)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO story_lists (category, item_ids, fetched_at) VALUES (?1, ?2, ?3)",
            params![category.as_str(), ids, fetched_at],
        )?;
        Ok(())
    }

    pub fn delete_story_list(&self, category: StoryCategory) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM story_lists WHERE category = ?1",
            params![category.as_str()],
        )?;
        Ok(())
    }

    // Users

    pub fn get_user(&self, username: &str) -> Result<Option<CacheEntry<User>>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, created, karma, about, submitted, fetched_at FROM users WHERE id = ?1",
                params![username],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()?;
        match row {
            Some((id, created, karma, about, submitted, fetched_at)) => {
                let user = User {
                    id,
                    created,
                    karma,
                    about,
                    submitted: serde_json::from_str(&submitted)?,
                };
                Ok(Some(CacheEntry::new(user, fetched_at)))
            }
            None => Ok(None),
        }
    }

    pub fn put_user(&self, user: &User, fetched_at: i64) -> Result<()> {
        let submitted = serde_json::to_string(&user.submitted)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO users (id, created, karma, about, submitted, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![user.id, user.created, user.karma, user.about, submitted, fetched_at],
        )?;
        Ok(())
    }

    pub fn delete_user(&self, username: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM users WHERE id = ?1", params![username])?;
        Ok(())
    }

    // Monitored comments

    /// Watched comments, least recently checked first.
    pub fn monitored_comments_due(&self, limit: usize) -> Result<Vec<MonitoredComment>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT item_id, root_story_id, known_children, last_checked_at, depth, created_at
             FROM monitored_comments
             ORDER BY last_checked_at ASC, item_id ASC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], monitored_from_row)?;

        let mut comments = Vec::new();
        for row in rows {
            comments.push(row??);
        }
        Ok(comments)
    }

    pub fn get_monitored_comment(&self, item_id: ItemId) -> Result<Option<MonitoredComment>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT item_id, root_story_id, known_children, last_checked_at, depth, created_at
                 FROM monitored_comments WHERE item_id = ?1",
                params![item_id as i64],
                monitored_from_row,
            )
            .optional()?;
        row.transpose()
    }

    pub fn upsert_monitored_comment(&self, comment: &MonitoredComment) -> Result<()> {
        let known = serde_json::to_string(&comment.known_child_ids)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO monitored_comments
                (item_id, root_story_id, known_children, last_checked_at, depth, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                comment.item_id as i64,
                comment.root_story_id as i64,
                known,
                comment.last_checked_at,
                comment.depth,
                comment.created_at,
            ],
        )?;
        Ok(())
    }

    /// Registers a watch unless one already exists. Returns whether it was inserted.
    pub fn insert_monitored_comment_if_absent(&self, comment: &MonitoredComment) -> Result<bool> {
        let known = serde_json::to_string(&comment.known_child_ids)?;
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO monitored_comments
                (item_id, root_story_id, known_children, last_checked_at, depth, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                comment.item_id as i64,
                comment.root_story_id as i64,
                known,
                comment.last_checked_at,
                comment.depth,
                comment.created_at,
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn remove_monitored_comment(&self, item_id: ItemId) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM monitored_comments WHERE item_id = ?1",
            params![item_id as i64],
        )?;
        Ok(())
    }

    pub fn clear_monitored_comments(&self) -> Result<usize> {
        let conn = self.lock()?;
        Ok(conn.execute("DELETE FROM monitored_comments", [])?)
    }

    pub fn monitored_comment_count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM monitored_comments", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // Notifications

    /// Inserts unless a notification for the same reply exists. Returns whether it was inserted.
    pub fn add_notification(&self, notification: &Notification) -> Result<bool> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO notifications
                (item_id, parent_id, root_story_id, author, text_preview, created_at, read)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                notification.item_id as i64,
                notification.parent_id as i64,
                notification.root_story_id as i64,
                notification.author,
                notification.text_preview,
                notification.created_at,
                notification.read,
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Newest first.
    pub fn list_notifications(&self, limit: usize) -> Result<Vec<Notification>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT item_id, parent_id, root_story_id, author, text_preview, created_at, read
             FROM notifications
             ORDER BY created_at DESC, item_id DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(Notification {
                item_id: row.get::<_, i64>(0)? as ItemId,
                parent_id: row.get::<_, i64>(1)? as ItemId,
                root_story_id: row.get::<_, i64>(2)? as ItemId,
                author: row.get(3)?,
                text_preview: row.get(4)?,
                created_at: row.get(5)?,
                read: row.get(6)?,
            })
        })?;

        let mut notifications = Vec::new();
        for notification in rows {
            notifications.push(notification?);
        }
        Ok(notifications)
    }

    pub fn unread_notification_count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE read = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn notification_count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM notifications", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn mark_notification_read(&self, item_id: ItemId) -> Result<bool> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE notifications SET read = 1 WHERE item_id = ?1",
            params![item_id as i64],
        )?;
        Ok(updated > 0)
    }

    pub fn mark_all_notifications_read(&self) -> Result<usize> {
        let conn = self.lock()?;
        Ok(conn.execute("UPDATE notifications SET read = 1 WHERE read = 0", [])?)
    }
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<CacheEntry<Item>> {
    let kind: String = row.get(1)?;
    let kind = ItemKind::parse(&kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown item kind {}", kind).into(),
        )
    })?;
    let children: String = row.get(10)?;
    let parts: String = row.get(11)?;

    let item = Item {
        id: row.get::<_, i64>(0)? as ItemId,
        kind,
        author: row.get(2)?,
        created_at: row.get(3)?,
        text: row.get(4)?,
        parent_id: row.get::<_, i64>(5)? as ItemId,
        url: row.get(6)?,
        title: row.get(7)?,
        score: row.get(8)?,
        comment_count: row.get(9)?,
        children: json_ids(10, &children)?,
        parts: json_ids(11, &parts)?,
        dead: row.get(12)?,
        deleted: row.get(13)?,
    };
    Ok(CacheEntry::new(item, row.get(14)?))
}

fn json_ids(column: usize, raw: &str) -> rusqlite::Result<Vec<ItemId>> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

// The outer result is the row read, the inner one the JSON decode
fn monitored_from_row(row: &Row<'_>) -> rusqlite::Result<Result<MonitoredComment>> {
    let known: String = row.get(2)?;
    let item_id = row.get::<_, i64>(0)? as ItemId;
    let root_story_id = row.get::<_, i64>(1)? as ItemId;
    let last_checked_at: i64 = row.get(3)?;
    let depth: u32 = row.get(4)?;
    let created_at: i64 = row.get(5)?;

    Ok(serde_json::from_str::<BTreeSet<ItemId>>(&known)
        .map(|known_child_ids| MonitoredComment {
            item_id,
            root_story_id,
            known_child_ids,
            last_checked_at,
            depth,
            created_at,
        })
        .map_err(|e| anyhow!("bad known_children for {}: {}", item_id, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watched(item_id: ItemId, last_checked_at: i64) -> MonitoredComment {
        MonitoredComment {
            item_id,
            root_story_id: 1,
            known_child_ids: BTreeSet::new(),
            last_checked_at,
            depth: 0,
            created_at: 0,
        }
    }

    fn notification(item_id: ItemId, created_at: i64) -> Notification {
        Notification {
            item_id,
            parent_id: 7,
            root_story_id: 1,
            author: "bob".to_string(),
            text_preview: "hi".to_string(),
            created_at,
            read: false,
        }
    }

    #[test]
    fn item_survives_storage_with_child_order() {
        let db = Database::open_in_memory().unwrap();
        let mut item = Item::comment(10, 1, "alice", "<p>text</p>").with_children(vec![30, 11, 20]);
        item.dead = true;
        db.put_item(&item, 500).unwrap();

        let entry = db.get_item(10).unwrap().unwrap();
        assert_eq!(entry.value, item);
        assert_eq!(entry.fetched_at, 500);
        assert!(db.get_item(11).unwrap().is_none());
    }

    #[test]
    fn put_replaces_whole_item() {
        let db = Database::open_in_memory().unwrap();
        db.put_item(&Item::story(1, "a", "old").with_children(vec![2]), 1).unwrap();
        db.put_item(&Item::story(1, "a", "new"), 2).unwrap();

        let entry = db.get_item(1).unwrap().unwrap();
        assert_eq!(entry.value.title, "new");
        assert!(entry.value.children.is_empty());
        assert_eq!(entry.fetched_at, 2);

        db.delete_item(1).unwrap();
        assert!(db.get_item(1).unwrap().is_none());
    }

    #[test]
    fn missing_marker_drops_item_until_stored_again() {
        let db = Database::open_in_memory().unwrap();
        db.put_item(&Item::story(1, "a", "t"), 1).unwrap();
        assert_eq!(db.item_missing_since(1).unwrap(), None);

        db.mark_item_missing(1, 40).unwrap();
        assert!(db.get_item(1).unwrap().is_none());
        assert_eq!(db.item_missing_since(1).unwrap(), Some(40));

        db.put_item(&Item::story(1, "a", "back"), 50).unwrap();
        assert_eq!(db.item_missing_since(1).unwrap(), None);
    }

    #[test]
    fn story_lists_and_users_round_trip() {
        let db = Database::open_in_memory().unwrap();
        db.put_story_list(StoryCategory::Best, &[3, 1, 2], 9).unwrap();
        let list = db.get_story_list(StoryCategory::Best).unwrap().unwrap();
        assert_eq!(list.value, vec![3, 1, 2]);
        assert!(db.get_story_list(StoryCategory::Top).unwrap().is_none());

        let user = User {
            id: "pg".to_string(),
            created: 1,
            karma: 99,
            about: "about".to_string(),
            submitted: vec![5, 4],
        };
        db.put_user(&user, 10).unwrap();
        assert_eq!(db.get_user("pg").unwrap().unwrap().value, user);
        db.delete_user("pg").unwrap();
        assert!(db.get_user("pg").unwrap().is_none());
    }

    #[test]
    fn due_comments_come_oldest_first_and_bounded() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_monitored_comment(&watched(1, 300)).unwrap();
        db.upsert_monitored_comment(&watched(2, 100)).unwrap();
        db.upsert_monitored_comment(&watched(3, 200)).unwrap();

        let due: Vec<ItemId> = db
            .monitored_comments_due(2)
            .unwrap()
            .iter()
            .map(|c| c.item_id)
            .collect();
        assert_eq!(due, vec![2, 3]);
    }

    #[test]
    fn insert_if_absent_keeps_existing_watch() {
        let db = Database::open_in_memory().unwrap();
        let mut first = watched(5, 10);
        first.known_child_ids.insert(6);
        assert!(db.insert_monitored_comment_if_absent(&first).unwrap());
        assert!(!db.insert_monitored_comment_if_absent(&watched(5, 99)).unwrap());

        let stored = db.get_monitored_comment(5).unwrap().unwrap();
        assert_eq!(stored.last_checked_at, 10);
        assert!(stored.known_child_ids.contains(&6));

        assert_eq!(db.monitored_comment_count().unwrap(), 1);
        db.remove_monitored_comment(5).unwrap();
        assert_eq!(db.monitored_comment_count().unwrap(), 0);
    }

    #[test]
    fn notifications_are_unique_per_reply() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.add_notification(&notification(8, 100)).unwrap());
        assert!(!db.add_notification(&notification(8, 200)).unwrap());
        assert!(db.add_notification(&notification(9, 150)).unwrap());

        assert_eq!(db.notification_count().unwrap(), 2);
        assert_eq!(db.unread_notification_count().unwrap(), 2);

        let listed: Vec<ItemId> = db
            .list_notifications(10)
            .unwrap()
            .iter()
            .map(|n| n.item_id)
            .collect();
        assert_eq!(listed, vec![9, 8]);

        assert!(db.mark_notification_read(8).unwrap());
        assert_eq!(db.unread_notification_count().unwrap(), 1);
        assert_eq!(db.mark_all_notifications_read().unwrap(), 1);
        assert_eq!(db.unread_notification_count().unwrap(), 0);
    }

    #[test]
    fn open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.db");
        let db = Database::open(&path).unwrap();
        db.put_item(&Item::story(1, "a", "t"), 1).unwrap();
        drop(db);

        let reopened = Database::open(&path).unwrap();
        assert!(reopened.get_item(1).unwrap().is_some());
    }
}
