//! Two-tier font asset cache: stylesheet text and base64 font binaries.
//!
//! Entries are keyed by URL, written once on first miss and never evicted;
//! the key space is the handful of families the templates use. Concurrent
//! misses on one key may fetch twice; both results are identical, so the
//! later write simply replaces the earlier one. Failed fetches are not cached.

use super::fetch::FontFetcher;
use crate::{FontConfig, Result};
use base64::Engine as Base64Engine;
use log::debug;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

type Tier = RwLock<HashMap<String, String>>;

/// Counters for [`FontCache`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FontCacheStats {
    pub stylesheets: usize,
    pub binaries: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct FontCache {
    fetcher: Arc<dyn FontFetcher>,
    config: FontConfig,
    stylesheets: Tier,
    binaries: Tier,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl FontCache {
    pub fn new(fetcher: Arc<dyn FontFetcher>, config: FontConfig) -> Self {
        Self {
            fetcher,
            config,
            stylesheets: RwLock::new(HashMap::new()),
            binaries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Stylesheet text for a family, fetched from its stylesheet URL on first use
    pub fn stylesheet(&self, family: &str) -> Result<String> {
        let url = self.config.stylesheet_url(family);
        self.lookup(&self.stylesheets, &url, || self.fetcher.fetch_text(&url))
    }

    /// Base64 encoding of the font binary at `url`
    pub fn binary_base64(&self, url: &str) -> Result<String> {
        self.lookup(&self.binaries, url, || {
            let bytes = self.fetcher.fetch_bytes(url)?;
            Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
        })
    }

    fn lookup(&self, tier: &Tier, key: &str, fetch: impl FnOnce() -> Result<String>) -> Result<String> {
        if let Some(hit) = tier
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!("font cache miss: {}", key);
        let value = fetch()?;
        tier.write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.clone());
        Ok(value)
    }

    /// Pre-populate the stylesheet tier for a family
    pub fn seed_stylesheet(&self, family: &str, css: impl Into<String>) {
        let url = self.config.stylesheet_url(family);
        self.stylesheets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url, css.into());
    }

    /// Pre-populate the binary tier with raw font bytes
    pub fn seed_binary(&self, url: impl Into<String>, bytes: &[u8]) {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        self.binaries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.into(), encoded);
    }

    pub fn contains_stylesheet(&self, family: &str) -> bool {
        let url = self.config.stylesheet_url(family);
        self.stylesheets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&url)
    }

    pub fn contains_binary(&self, url: &str) -> bool {
        self.binaries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(url)
    }

    pub fn stats(&self) -> FontCacheStats {
        FontCacheStats {
            stylesheets: self.stylesheets.read().unwrap_or_else(PoisonError::into_inner).len(),
            binaries: self.binaries.read().unwrap_or_else(PoisonError::into_inner).len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
