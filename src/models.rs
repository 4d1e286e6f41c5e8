use chrono::{Duration as ChronoDuration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub type ItemId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Story,
    Comment,
    Job,
    Poll,
    #[serde(rename = "pollopt")]
    PollOption,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Story => "story",
            ItemKind::Comment => "comment",
            ItemKind::Job => "job",
            ItemKind::Poll => "poll",
            ItemKind::PollOption => "pollopt",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "story" => Some(ItemKind::Story),
            "comment" => Some(ItemKind::Comment),
            "job" => Some(ItemKind::Job),
            "poll" => Some(ItemKind::Poll),
            "pollopt" => Some(ItemKind::PollOption),
            _ => None,
        }
    }

    /// Kinds that anchor a comment tree.
    pub fn is_root_kind(&self) -> bool {
        matches!(self, ItemKind::Story | ItemKind::Job | ItemKind::Poll)
    }
}

/// A node of the discussion tree, in the shape the item API returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    #[serde(rename = "by", default)]
    pub author: String,
    #[serde(rename = "time", default)]
    pub created_at: i64,
    #[serde(default)]
    pub text: String,
    #[serde(rename = "parent", default)]
    pub parent_id: ItemId,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub score: i64,
    #[serde(rename = "descendants", default)]
    pub comment_count: i64,
    // Reply order as given by the source
    #[serde(rename = "kids", default)]
    pub children: Vec<ItemId>,
    #[serde(default)]
    pub parts: Vec<ItemId>,
    #[serde(default)]
    pub dead: bool,
    #[serde(default)]
    pub deleted: bool,
}

impl Item {
    pub fn new(id: ItemId, kind: ItemKind) -> Self {
        Self {
            id,
            kind,
            author: String::new(),
            created_at: 0,
            text: String::new(),
            parent_id: 0,
            url: String::new(),
            title: String::new(),
            score: 0,
            comment_count: 0,
            children: Vec::new(),
            parts: Vec::new(),
            dead: false,
            deleted: false,
        }
    }

    pub fn story(id: ItemId, author: &str, title: &str) -> Self {
        let mut item = Self::new(id, ItemKind::Story);
        item.author = author.to_string();
        item.title = title.to_string();
        item
    }

    pub fn comment(id: ItemId, parent_id: ItemId, author: &str, text: &str) -> Self {
        let mut item = Self::new(id, ItemKind::Comment);
        item.parent_id = parent_id;
        item.author = author.to_string();
        item.text = text.to_string();
        item
    }

    pub fn with_children(mut self, children: Vec<ItemId>) -> Self {
        self.children = children;
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_id == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub karma: i64,
    #[serde(default)]
    pub about: String,
    // Newest first
    #[serde(default)]
    pub submitted: Vec<ItemId>,
}

/// The ranked lists the item API publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoryCategory {
    Top,
    New,
    Best,
    Ask,
    Show,
    Jobs,
}

impl StoryCategory {
    pub const ALL: [StoryCategory; 6] = [
        StoryCategory::Top,
        StoryCategory::New,
        StoryCategory::Best,
        StoryCategory::Ask,
        StoryCategory::Show,
        StoryCategory::Jobs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoryCategory::Top => "top",
            StoryCategory::New => "new",
            StoryCategory::Best => "best",
            StoryCategory::Ask => "ask",
            StoryCategory::Show => "show",
            StoryCategory::Jobs => "jobs",
        }
    }

    /// Path segment of the list endpoint, e.g. `topstories`.
    pub fn endpoint(&self) -> &'static str {
        match self {
            StoryCategory::Top => "topstories",
            StoryCategory::New => "newstories",
            StoryCategory::Best => "beststories",
            StoryCategory::Ask => "askstories",
            StoryCategory::Show => "showstories",
            StoryCategory::Jobs => "jobstories",
        }
    }
}

impl fmt::Display for StoryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoryCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "top" | "hot" => Ok(StoryCategory::Top),
            "new" | "newest" => Ok(StoryCategory::New),
            "best" => Ok(StoryCategory::Best),
            "ask" => Ok(StoryCategory::Ask),
            "show" => Ok(StoryCategory::Show),
            "jobs" | "job" => Ok(StoryCategory::Jobs),
            other => Err(format!("unknown story category: {}", other)),
        }
    }
}

/// A stored value together with the time it was fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub value: T,
    pub fetched_at: i64,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, fetched_at: i64) -> Self {
        Self { value, fetched_at }
    }

    pub fn is_fresh(&self, now: i64, ttl: Duration) -> bool {
        now.saturating_sub(self.fetched_at) < ttl.as_secs() as i64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredComment {
    pub item_id: ItemId,
    pub root_story_id: ItemId,
    pub known_child_ids: BTreeSet<ItemId>,
    pub last_checked_at: i64,
    // 0 = the user's own comment
    pub depth: u32,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub item_id: ItemId,
    pub parent_id: ItemId,
    pub root_story_id: ItemId,
    pub author: String,
    pub text_preview: String,
    pub created_at: i64,
    pub read: bool,
}

/// Which number `FlatComment::descendant_count` holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountScope {
    /// Every id referenced anywhere below the node.
    Subtree,
    /// Only the node's direct replies; used while the node is collapsed.
    ImmediateChildren,
    /// Expanded, but a collapsed node lies below it; that node contributes
    /// only its direct replies, so the number is a lower bound.
    Partial,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlatComment {
    pub item: Item,
    pub depth: usize,
    pub is_collapsed: bool,
    pub descendant_count: usize,
    pub count_scope: CountScope,
    pub is_original_poster: bool,
}

/// Which search index answers a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchEndpoint {
    /// Newest first.
    ByDate,
    /// Relevance, then points.
    Ranked,
}

impl SearchEndpoint {
    pub fn path(&self) -> &'static str {
        match self {
            SearchEndpoint::ByDate => "search_by_date",
            SearchEndpoint::Ranked => "search",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub endpoint: SearchEndpoint,
    pub tags: String,
    pub page_size: usize,
    pub page: usize,
    pub numeric_filters: Option<String>,
}

impl SearchQuery {
    pub fn newest_comments(page_size: usize, page: usize) -> Self {
        Self {
            endpoint: SearchEndpoint::ByDate,
            tags: "comment".to_string(),
            page_size,
            page,
            numeric_filters: None,
        }
    }

    /// Stories that made the front page on `day` (UTC).
    pub fn front_page_for_day(day: NaiveDate, page_size: usize) -> Self {
        let start = day.and_hms_opt(0, 0, 0).map(|t| t.and_utc().timestamp()).unwrap_or(0);
        let end = start + ChronoDuration::days(1).num_seconds();
        Self {
            endpoint: SearchEndpoint::Ranked,
            tags: "front_page".to_string(),
            page_size,
            page: 0,
            numeric_filters: Some(format!("created_at_i>{},created_at_i<{}", start, end)),
        }
    }
}
