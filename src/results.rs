//! Finished-PDF cache.
//!
//! Memory only. Entries are keyed by a SHA-256 digest of everything that
//! affects the output and expire after a fixed TTL. When the cache is full the
//! least recently used entry makes room for the new one.

use crate::hydration::HydrationRequest;
use crate::{PdfOptions, RenderJob, ResultCacheConfig};
use log::debug;
use lru::LruCache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Counters for [`ResultCache`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ResultCacheStats {
    pub entries: usize,
    /// Total size of cached documents
    pub bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

struct CachedPdf {
    bytes: Arc<Vec<u8>>,
    inserted: Instant,
}

impl CachedPdf {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted.elapsed() >= ttl
    }
}

#[derive(Serialize)]
struct KeyInput<'a> {
    html: &'a str,
    hydration: Option<&'a HydrationRequest>,
    font_family: Option<&'a str>,
    pdf: &'a PdfOptions,
}

pub struct ResultCache {
    ttl: Duration,
    entries: Mutex<LruCache<String, CachedPdf>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new(config: ResultCacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl: Duration::from_secs(config.ttl_secs),
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, CachedPdf>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `pdf:` followed by the hex SHA-256 of the job's output-relevant fields
    pub fn key_for(job: &RenderJob, pdf: &PdfOptions) -> String {
        let input = KeyInput {
            html: &job.html,
            hydration: job.hydration.as_ref(),
            font_family: job.font_family.as_deref().map(str::trim),
            pdf,
        };
        // Plain data with string keys; serialization cannot fail.
        let canonical = serde_json::to_vec(&input).unwrap_or_default();
        format!("pdf:{}", hex::encode(Sha256::digest(&canonical)))
    }

    pub fn get(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        let mut entries = self.lock();
        let expired = entries.peek(key).map(|e| e.is_expired(self.ttl));
        let fresh = match expired {
            Some(false) => entries.get(key).map(|e| e.bytes.clone()),
            Some(true) => {
                entries.pop(key);
                None
            }
            None => None,
        };
        match &fresh {
            Some(_) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("result cache hit: {}", key);
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        fresh
    }

    pub fn insert(&self, key: impl Into<String>, pdf: Vec<u8>) {
        let key = key.into();
        debug!("result cached: {} ({} bytes)", key, pdf.len());
        let entry = CachedPdf {
            bytes: Arc::new(pdf),
            inserted: Instant::now(),
        };
        if let Some((evicted, _)) = self.lock().push(key.clone(), entry) {
            if evicted != key {
                debug!("result cache full; evicted {}", evicted);
            }
        }
    }

    /// Drop expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.is_expired(self.ttl))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    pub fn stats(&self) -> ResultCacheStats {
        let entries = self.lock();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        ResultCacheStats {
            entries: entries.len(),
            bytes: entries.iter().map(|(_, e)| e.bytes.len()).sum(),
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache(ttl_secs: u64, max_entries: usize) -> ResultCache {
        ResultCache::new(ResultCacheConfig { ttl_secs, max_entries })
    }

    #[test]
    fn key_depends_on_every_output_input() {
        let pdf = PdfOptions::default();
        let base = RenderJob::new("<p>a</p>");
        let key = ResultCache::key_for(&base, &pdf);
        assert!(key.starts_with("pdf:"));
        assert_eq!(key.len(), 4 + 64);
        assert_eq!(key, ResultCache::key_for(&base.clone().streamed(), &pdf));

        let with_font = base.clone().font_family("Inter");
        assert_ne!(key, ResultCache::key_for(&with_font, &pdf));
        let hydrated = base.clone().hydrate(HydrationRequest::new("text", json!({"a": "b"})));
        assert_ne!(key, ResultCache::key_for(&hydrated, &pdf));
        let landscape = PdfOptions {
            landscape: true,
            ..PdfOptions::default()
        };
        assert_ne!(key, ResultCache::key_for(&base, &landscape));
    }

    #[test]
    fn get_counts_hits_and_misses() {
        let c = cache(60, 10);
        assert!(c.get("pdf:x").is_none());
        c.insert("pdf:x", b"%PDF-1.4".to_vec());
        assert_eq!(c.get("pdf:x").unwrap().as_slice(), b"%PDF-1.4");

        let stats = c.stats();
        assert_eq!((stats.entries, stats.bytes, stats.hits, stats.misses), (1, 8, 1, 1));
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn full_cache_evicts_oldest() {
        let c = cache(60, 2);
        c.insert("a", vec![1]);
        c.insert("b", vec![2]);
        c.insert("c", vec![3]);
        assert!(c.get("a").is_none());
        assert!(c.get("b").is_some());
        assert!(c.get("c").is_some());
        assert_eq!(c.stats().entries, 2);
    }

    #[test]
    fn recently_read_entries_survive_eviction() {
        let c = cache(60, 2);
        c.insert("a", vec![1]);
        c.insert("b", vec![2]);
        assert!(c.get("a").is_some());
        c.insert("c", vec![3]);
        assert!(c.get("a").is_some());
        assert!(c.get("b").is_none());
    }

    #[test]
    fn reinserting_a_key_replaces_it() {
        let c = cache(60, 2);
        c.insert("a", vec![1]);
        c.insert("a", vec![1, 2]);
        let stats = c.stats();
        assert_eq!((stats.entries, stats.bytes), (1, 2));
    }

    #[test]
    fn expired_entries_are_dropped() {
        let c = ResultCache {
            ttl: Duration::from_millis(10),
            ..cache(1, 10)
        };
        c.insert("a", vec![1]);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(c.purge_expired(), 1);
        c.insert("b", vec![2]);
        std::thread::sleep(Duration::from_millis(20));
        assert!(c.get("b").is_none());
        assert_eq!(c.stats().entries, 0);
    }
}
