use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::models::{Item, ItemId, ItemKind, SearchQuery, StoryCategory, User};
use crate::source::ItemSource;

const ITEM_API_URL: &str = "https://hacker-news.firebaseio.com/v0";
const SEARCH_API_URL: &str = "https://hn.algolia.com/api/v1";

/// Client for the public item API and the Algolia search API.
pub struct HackerNewsClient {
    client: Client,
    item_api_url: String,
    search_api_url: String,
}

impl HackerNewsClient {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        Self::with_base_urls(config, ITEM_API_URL, SEARCH_API_URL)
    }

    pub fn with_base_urls(
        config: &FetchConfig,
        item_api_url: &str,
        search_api_url: &str,
    ) -> Result<Self, FetchError> {
        // One timeout bounds single and batched fetches alike
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| FetchError::Transient(format!("building HTTP client: {}", e)))?;

        Ok(Self {
            client,
            item_api_url: item_api_url.trim_end_matches('/').to_string(),
            search_api_url: search_api_url.trim_end_matches('/').to_string(),
        })
    }

    // The item API answers unknown ids with a literal `null`
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::from_status(status, url));
        }
        Ok(response.json::<Option<T>>().await?)
    }

    pub fn item_url(&self, id: ItemId) -> String {
        format!("{}/item/{}.json", self.item_api_url, id)
    }

    pub fn search_url(&self, query: &SearchQuery) -> String {
        let mut url = format!(
            "{}/{}?tags={}&hitsPerPage={}&page={}",
            self.search_api_url,
            query.endpoint.path(),
            urlencoding::encode(&query.tags),
            query.page_size,
            query.page
        );
        if let Some(filters) = &query.numeric_filters {
            url.push_str("&numericFilters=");
            url.push_str(&urlencoding::encode(filters));
        }
        url
    }
}

#[async_trait]
impl ItemSource for HackerNewsClient {
    async fn fetch_item(&self, id: ItemId) -> Result<Item, FetchError> {
        let url = self.item_url(id);
        let item: Item = self
            .get_json(&url)
            .await?
            .ok_or_else(|| FetchError::NotFound(format!("item {}", id)))?;
        if item.id != id {
            return Err(FetchError::Malformed(format!(
                "asked for item {} but got {}",
                id, item.id
            )));
        }
        Ok(item)
    }

    async fn fetch_ranked_ids(&self, category: StoryCategory) -> Result<Vec<ItemId>, FetchError> {
        let url = format!("{}/{}.json", self.item_api_url, category.endpoint());
        let ids: Option<Vec<ItemId>> = self.get_json(&url).await?;
        let ids = ids.unwrap_or_default();
        debug!(category = %category, count = ids.len(), "Fetched ranked ids");
        Ok(ids)
    }

    async fn fetch_user(&self, username: &str) -> Result<User, FetchError> {
        let url = format!(
            "{}/user/{}.json",
            self.item_api_url,
            urlencoding::encode(username)
        );
        self.get_json(&url)
            .await?
            .ok_or_else(|| FetchError::NotFound(format!("user {}", username)))
    }

    async fn search_by_date(&self, query: &SearchQuery) -> Result<Vec<Item>, FetchError> {
        let url = self.search_url(query);
        let response: SearchResponse = self
            .get_json(&url)
            .await?
            .ok_or_else(|| FetchError::Malformed("empty search response".to_string()))?;
        Ok(response.hits.into_iter().filter_map(SearchHit::into_item).collect())
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "objectID")]
    object_id: String,
    title: Option<String>,
    url: Option<String>,
    author: Option<String>,
    points: Option<i64>,
    num_comments: Option<i64>,
    #[serde(default)]
    created_at_i: i64,
    story_text: Option<String>,
    comment_text: Option<String>,
    parent_id: Option<ItemId>,
    story_id: Option<ItemId>,
    story_title: Option<String>,
}

impl SearchHit {
    fn into_item(self) -> Option<Item> {
        let id = match self.object_id.parse::<ItemId>() {
            Ok(id) => id,
            Err(_) => {
                debug!(object_id = %self.object_id, "Skipping search hit with non-numeric id");
                return None;
            }
        };

        let title = self.title.unwrap_or_default();
        let mut item = if !title.is_empty() {
            let mut story = Item::new(id, ItemKind::Story);
            story.title = title;
            story.url = self.url.unwrap_or_default();
            story.comment_count = self.num_comments.unwrap_or(0);
            story.text = self.story_text.unwrap_or_default();
            story
        } else {
            let mut comment = Item::new(id, ItemKind::Comment);
            comment.text = self.comment_text.unwrap_or_default();
            // Feed entries point at their story so the thread can be opened
            comment.parent_id = self.story_id.or(self.parent_id).unwrap_or(0);
            comment.title = self.story_title.unwrap_or_default();
            comment
        };
        item.author = self.author.unwrap_or_default();
        item.created_at = self.created_at_i;
        item.score = self.points.unwrap_or(0);
        Some(item)
    }
}
