//! Caching layer for judge responses.
//!
//! Memoises raw judge text by (template, prompt) so recomputing confidence
//! for an unchanged run converges even when the judge is not deterministic.

use moka::future::Cache;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use crate::prompts::JudgeTemplate;

/// Cache key for a rendered judge prompt.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    template: JudgeTemplate,
    prompt_hash: u64,
    prompt_len: usize,
}

impl CacheKey {
    pub fn new(template: JudgeTemplate, prompt: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        prompt.hash(&mut hasher);
        Self {
            template,
            prompt_hash: hasher.finish(),
            prompt_len: prompt.len(),
        }
    }
}

/// Judge response cache using moka.
pub struct JudgeCache {
    cache: Cache<CacheKey, String>,
}

impl JudgeCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    pub async fn get(&self, key: &CacheKey) -> Option<String> {
        self.cache.get(key).await
    }

    pub async fn insert(&self, key: CacheKey, response: String) {
        self.cache.insert(key, response).await;
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for JudgeCache {
    fn default() -> Self {
        Self::new(1_000, Duration::from_secs(3600))
    }
}
