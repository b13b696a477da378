//! Font transports

use crate::{Error, FontConfig, Result};
use reqwest::blocking::Client;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{OnceLock, PoisonError, RwLock};
use std::time::Duration;

/// Fetches font stylesheets and binaries.
///
/// Failures are reported as [`Error::FontFetch`] so the pipeline can apply
/// its font policy.
pub trait FontFetcher: Send + Sync {
    fn fetch_text(&self, url: &str) -> Result<String>;
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>>;
}

/// Blocking HTTP transport.
///
/// The client is built on first use so that construction inside an async
/// context never creates the blocking runtime there.
pub struct HttpFontFetcher {
    timeout: Duration,
    user_agent: String,
    client: OnceLock<Client>,
}

impl HttpFontFetcher {
    pub fn new(config: &FontConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.fetch_timeout_ms),
            user_agent: config.user_agent.clone(),
            client: OnceLock::new(),
        }
    }

    fn client(&self) -> Result<&Client> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.clone())
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(self.client.get_or_init(|| client))
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response> {
        let resp = self.client()?.get(url).send().map_err(|e| font_error(url, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::FontFetch {
                url: url.to_string(),
                reason: format!("HTTP {}", status),
            });
        }
        Ok(resp)
    }
}

impl FontFetcher for HttpFontFetcher {
    fn fetch_text(&self, url: &str) -> Result<String> {
        self.get(url)?.text().map_err(|e| font_error(url, e))
    }

    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = self.get(url)?.bytes().map_err(|e| font_error(url, e))?;
        Ok(bytes.to_vec())
    }
}

fn font_error(url: &str, err: impl std::fmt::Display) -> Error {
    Error::FontFetch {
        url: url.to_string(),
        reason: err.to_string(),
    }
}

/// In-memory transport for bundled fonts and offline hosts.
///
/// Unknown URLs fail like a 404.
#[derive(Default)]
pub struct StaticFontFetcher {
    texts: RwLock<HashMap<String, String>>,
    binaries: RwLock<HashMap<String, Vec<u8>>>,
    fetches: AtomicUsize,
}

impl StaticFontFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_text(&self, url: impl Into<String>, text: impl Into<String>) {
        self.texts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.into(), text.into());
    }

    pub fn insert_bytes(&self, url: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.binaries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.into(), bytes.into());
    }

    /// Number of fetch calls served, hits and misses alike
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl FontFetcher for StaticFontFetcher {
    fn fetch_text(&self, url: &str) -> Result<String> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.texts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
            .ok_or_else(|| font_error(url, "HTTP 404 Not Found"))
    }

    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.binaries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
            .ok_or_else(|| font_error(url, "HTTP 404 Not Found"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_fetcher_serves_and_counts() {
        let f = StaticFontFetcher::new();
        f.insert_text("https://f/css", "@font-face{}");
        f.insert_bytes("https://f/a.woff2", vec![1u8, 2, 3]);
        assert_eq!(f.fetch_text("https://f/css").unwrap(), "@font-face{}");
        assert_eq!(f.fetch_bytes("https://f/a.woff2").unwrap(), vec![1, 2, 3]);
        let err = f.fetch_bytes("https://f/missing.woff2").unwrap_err();
        assert!(matches!(err, Error::FontFetch { .. }));
        assert_eq!(f.fetch_count(), 3);
    }
}
