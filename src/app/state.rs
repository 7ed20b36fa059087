//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::MatchRegistry;
use crate::level::{HttpLevelStore, LevelStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub match_registry: Arc<MatchRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let level_store = Arc::new(HttpLevelStore::new(config.level_store_url.clone()));
        Self::with_level_store(config, level_store)
    }

    /// State backed by a caller-provided level store (tests, local runs)
    pub fn with_level_store(config: Config, level_store: Arc<dyn LevelStore>) -> Self {
        let match_registry = Arc::new(MatchRegistry::new(config.match_settings(), level_store));

        Self {
            config: Arc::new(config),
            match_registry,
        }
    }
}
