//! Proxy pool for the external-tool provider.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use crate::config::ProxyConfig;

/// Round-robin proxy pool. The start offset is shared by every caller so
/// concurrent jobs spread across proxies.
#[derive(Debug, Default)]
pub struct ProxyPool {
    proxies: Vec<String>,
    cursor: AtomicUsize,
}

impl ProxyPool {
    pub fn new(proxies: Vec<String>) -> Self {
        let mut seen = Vec::with_capacity(proxies.len());
        for proxy in proxies {
            let proxy = proxy.trim().to_string();
            if !proxy.is_empty() && !seen.contains(&proxy) {
                seen.push(proxy);
            }
        }
        Self {
            proxies: seen,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Build from inline URLs plus an optional file (one URL per line, `#` comments).
    pub fn from_config(config: &ProxyConfig) -> std::io::Result<Self> {
        let mut proxies = config.urls.clone();
        if let Some(path) = &config.file {
            proxies.extend(read_proxy_file(path)?);
        }
        let pool = Self::new(proxies);
        debug!(proxies = pool.len(), "Proxy pool loaded");
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// Up to `max` distinct proxies to try in order, starting at the next
    /// position of the shared cursor.
    pub fn rotation(&self, max: usize) -> Vec<String> {
        if self.proxies.is_empty() || max == 0 {
            return Vec::new();
        }
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % self.proxies.len();
        (0..max.min(self.proxies.len()))
            .map(|i| self.proxies[(start + i) % self.proxies.len()].clone())
            .collect()
    }
}

fn read_proxy_file(path: &Path) -> std::io::Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}
