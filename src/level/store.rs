//! Level store client. Levels are owned by an external service; the match
//! server only fetches them by id when a match starts loading.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use reqwest::{Client, Url};

use super::{is_valid_level_id, LevelDefinition};

/// Source of level definitions
pub trait LevelStore: Send + Sync {
    fn fetch_level<'a>(
        &'a self,
        level_id: &'a str,
    ) -> BoxFuture<'a, Result<LevelDefinition, LevelStoreError>>;
}

/// REST client for the level service (`GET {base_url}/levels/{id}`)
#[derive(Clone)]
pub struct HttpLevelStore {
    client: Client,
    base_url: String,
}

impl HttpLevelStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// `{base_url}/levels/{id}` with the id as a single encoded path segment
    fn level_url(&self, level_id: &str) -> Result<Url, LevelStoreError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|_| LevelStoreError::BaseUrl(self.base_url.clone()))?;
        url.path_segments_mut()
            .map_err(|_| LevelStoreError::BaseUrl(self.base_url.clone()))?
            .pop_if_empty()
            .push("levels")
            .push(level_id);
        Ok(url)
    }

    async fn get_level(&self, level_id: &str) -> Result<LevelDefinition, LevelStoreError> {
        if !is_valid_level_id(level_id) {
            return Err(LevelStoreError::InvalidId(level_id.to_string()));
        }

        let response = self
            .client
            .get(self.level_url(level_id)?)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(LevelStoreError::Request)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(LevelStoreError::NotFound(level_id.to_string()));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LevelStoreError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let level: LevelDefinition = response.json().await.map_err(LevelStoreError::Parse)?;
        level
            .validate()
            .map_err(|e| LevelStoreError::Invalid(e.to_string()))?;
        Ok(level)
    }
}

impl LevelStore for HttpLevelStore {
    fn fetch_level<'a>(
        &'a self,
        level_id: &'a str,
    ) -> BoxFuture<'a, Result<LevelDefinition, LevelStoreError>> {
        Box::pin(self.get_level(level_id))
    }
}

/// Levels held in memory, keyed by id
#[derive(Clone, Default)]
pub struct InMemoryLevelStore {
    levels: Arc<DashMap<String, LevelDefinition>>,
}

impl InMemoryLevelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_levels(levels: impl IntoIterator<Item = LevelDefinition>) -> Self {
        let store = Self::new();
        for level in levels {
            store.insert(level);
        }
        store
    }

    pub fn insert(&self, level: LevelDefinition) {
        self.levels.insert(level.id.clone(), level);
    }
}

impl LevelStore for InMemoryLevelStore {
    fn fetch_level<'a>(
        &'a self,
        level_id: &'a str,
    ) -> BoxFuture<'a, Result<LevelDefinition, LevelStoreError>> {
        let result = self
            .levels
            .get(level_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| LevelStoreError::NotFound(level_id.to_string()));
        Box::pin(async move { result })
    }
}

/// Level store errors
#[derive(Debug, thiserror::Error)]
pub enum LevelStoreError {
    #[error("Level not found: {0}")]
    NotFound(String),

    #[error("HTTP request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("Level service error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse level: {0}")]
    Parse(#[source] reqwest::Error),

    #[error("Invalid level geometry: {0}")]
    Invalid(String),

    #[error("Invalid level id: {0:?}")]
    InvalidId(String),

    #[error("Level store URL is not a usable base: {0}")]
    BaseUrl(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::fixtures::two_spawn_level;

    #[tokio::test]
    async fn in_memory_store_returns_inserted_level() {
        let store = InMemoryLevelStore::with_levels([two_spawn_level()]);

        let level = store.fetch_level("meadow").await.unwrap();
        assert_eq!(level.name, "Meadow");
    }

    #[tokio::test]
    async fn in_memory_store_reports_missing_level() {
        let store = InMemoryLevelStore::new();

        let err = store.fetch_level("nowhere").await.unwrap_err();
        assert!(matches!(err, LevelStoreError::NotFound(id) if id == "nowhere"));
    }

    #[test]
    fn inserted_level_replaces_previous_version() {
        let store = InMemoryLevelStore::with_levels([two_spawn_level()]);
        let mut renamed = two_spawn_level();
        renamed.name = "Meadow II".to_string();
        store.insert(renamed);

        let level = tokio_test::block_on(store.fetch_level("meadow")).unwrap();
        assert_eq!(level.name, "Meadow II");
    }

    #[test]
    fn http_store_builds_level_url_without_double_slash() {
        let store = HttpLevelStore::new("https://levels.example.com/");
        assert_eq!(
            store.level_url("abc").unwrap().as_str(),
            "https://levels.example.com/levels/abc"
        );
    }

    #[test]
    fn level_id_stays_inside_levels_path() {
        let store = HttpLevelStore::new("https://levels.example.com/api");
        assert_eq!(
            store.level_url("meadow").unwrap().path(),
            "/api/levels/meadow"
        );

        let url = store.level_url("admin/users?token=x#").unwrap();
        assert!(url.path().starts_with("/api/levels/"));
        assert_eq!(url.path_segments().unwrap().count(), 3);
        assert!(url.query().is_none());
        assert!(url.fragment().is_none());
    }

    #[test]
    fn traversal_ids_are_refused_before_any_request() {
        let store = HttpLevelStore::new("https://levels.example.com/api");
        let err = tokio_test::block_on(store.fetch_level("../admin/users?token=x#")).unwrap_err();
        assert!(matches!(err, LevelStoreError::InvalidId(_)));
    }
}
