use crate::config::{env_or, Settings};
use crate::domain::currency::Currency;
use crate::error::FetchError;
use crate::http;
use crate::storage::{load_or_default, save, KeyValueStore, FAVORITE_NEWS_KEY};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://gnews.io";
const DEFAULT_TIMEOUT_MS: u64 = 8_000;
pub const DEFAULT_MAX_RESULTS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NewsCategory {
    #[default]
    All,
    Business,
    Technology,
    Economy,
    Markets,
}

impl NewsCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            NewsCategory::All => "all",
            NewsCategory::Business => "business",
            NewsCategory::Technology => "technology",
            NewsCategory::Economy => "economy",
            NewsCategory::Markets => "markets",
        }
    }
}

impl FromStr for NewsCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(NewsCategory::All),
            "business" => Ok(NewsCategory::Business),
            "technology" => Ok(NewsCategory::Technology),
            "economy" => Ok(NewsCategory::Economy),
            "markets" => Ok(NewsCategory::Markets),
            other => Err(format!("unknown news category: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    #[serde(rename = "publishedAt")]
    PublishedAt,
    #[serde(rename = "relevance")]
    Relevance,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::PublishedAt => "publishedAt",
            SortOrder::Relevance => "relevance",
        }
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "publishedAt" | "published_at" | "date" => Ok(SortOrder::PublishedAt),
            "relevance" => Ok(SortOrder::Relevance),
            other => Err(format!("unknown sort order: {other}")),
        }
    }
}

/// One article. `id` is the article URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub url: String,
    pub image_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub source: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewsClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl NewsClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let base_url = settings
            .gnews_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let timeout = Duration::from_millis(env_or("NEWS_TIMEOUT_MS", DEFAULT_TIMEOUT_MS));
        Self::new(base_url, settings.gnews_api_key.clone(), timeout)
    }

    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            http: http::build_client(timeout)?,
            base_url: base_url.into(),
            api_key,
            timeout,
        })
    }

    fn api_key(&self) -> Result<&str, FetchError> {
        self.api_key
            .as_deref()
            .ok_or(FetchError::Configuration("GNEWS_API_KEY"))
    }

    /// Articles mentioning `currency`.
    pub async fn search(
        &self,
        currency: Currency,
        category: NewsCategory,
        sort: SortOrder,
        max: u32,
    ) -> Result<Vec<NewsItem>, FetchError> {
        let api_key = self.api_key()?;
        let mut query = vec![
            ("q", format!("{currency} currency")),
            ("lang", "en".to_string()),
            ("country", "us".to_string()),
            ("max", max.to_string()),
            ("sortby", sort.as_str().to_string()),
        ];
        if category != NewsCategory::All {
            query.push(("category", category.as_str().to_string()));
        }
        query.push(("apikey", api_key.to_string()));

        tracing::debug!(%currency, category = category.as_str(), max, "searching news");
        let url = http::join_url(&self.base_url, "api/v4/search");
        let raw = http::get_json(self.http.get(url).query(&query), self.timeout).await?;
        parse_articles(raw)
    }

    pub async fn top_headlines(
        &self,
        category: NewsCategory,
        max: u32,
    ) -> Result<Vec<NewsItem>, FetchError> {
        let api_key = self.api_key()?;
        // GNews has no "all" headline category.
        let category = match category {
            NewsCategory::All => NewsCategory::Business,
            other => other,
        };
        let query = [
            ("category", category.as_str().to_string()),
            ("lang", "en".to_string()),
            ("country", "us".to_string()),
            ("max", max.to_string()),
            ("apikey", api_key.to_string()),
        ];

        tracing::debug!(category = category.as_str(), max, "fetching top headlines");
        let url = http::join_url(&self.base_url, "api/v4/top-headlines");
        let raw = http::get_json(self.http.get(url).query(&query), self.timeout).await?;
        parse_articles(raw)
    }
}

#[derive(Debug, Deserialize)]
struct ArticlesResponse {
    articles: Vec<Article>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Article {
    title: String,
    #[serde(default)]
    description: Option<String>,
    url: String,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    source: Option<ArticleSource>,
}

#[derive(Debug, Deserialize)]
struct ArticleSource {
    #[serde(default)]
    name: Option<String>,
}

fn parse_articles(raw: Value) -> Result<Vec<NewsItem>, FetchError> {
    let body = serde_json::from_value::<ArticlesResponse>(raw)
        .map_err(|err| FetchError::Malformed(format!("unexpected news shape: {err}")))?;

    Ok(body
        .articles
        .into_iter()
        .map(|a| NewsItem {
            id: a.url.clone(),
            title: a.title,
            description: a.description,
            url: a.url,
            image_url: a.image,
            published_at: a.published_at,
            source: a.source.and_then(|s| s.name),
        })
        .collect())
}

/// Saved articles, in insertion order.
pub struct NewsFavorites {
    store: Arc<dyn KeyValueStore>,
    items: RwLock<Arc<Vec<NewsItem>>>,
}

impl NewsFavorites {
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let items: Vec<NewsItem> = load_or_default(store.as_ref(), FAVORITE_NEWS_KEY);
        Self {
            store,
            items: RwLock::new(Arc::new(items)),
        }
    }

    pub fn list(&self) -> Arc<Vec<NewsItem>> {
        self.items.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Returns false when an item with the same id is already saved.
    pub fn add(&self, item: NewsItem) -> anyhow::Result<bool> {
        let mut guard = self.items.write().unwrap_or_else(PoisonError::into_inner);
        if guard.iter().any(|i| i.id == item.id) {
            return Ok(false);
        }
        let mut next = (**guard).clone();
        next.push(item);
        *guard = Arc::new(next);
        save(self.store.as_ref(), FAVORITE_NEWS_KEY, guard.as_slice())?;
        Ok(true)
    }

    pub fn remove(&self, id: &str) -> anyhow::Result<bool> {
        let mut guard = self.items.write().unwrap_or_else(PoisonError::into_inner);
        let next: Vec<NewsItem> = guard.iter().filter(|i| i.id != id).cloned().collect();
        if next.len() == guard.len() {
            return Ok(false);
        }
        *guard = Arc::new(next);
        save(self.store.as_ref(), FAVORITE_NEWS_KEY, guard.as_slice())?;
        Ok(true)
    }

    pub fn is_favorite(&self, id: &str) -> bool {
        self.list().iter().any(|i| i.id == id)
    }
}
