//! Lazy resolution of the external extractor executable.
//!
//! Lookup order: explicitly configured path, an installed copy on `PATH`,
//! then a standalone build downloaded once into the cache directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{ErrorCode, FetchError};
use crate::config::YtDlpConfig;
use crate::http_client::build_client;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Resolves an executable at most once per resolver.
///
/// Concurrent first callers share a single in-flight resolution. A failed
/// resolution is not cached, so a later call tries again.
pub struct BinaryResolver {
    name: String,
    explicit: Option<PathBuf>,
    download_url: Option<String>,
    cache_dir: PathBuf,
    resolved: OnceCell<PathBuf>,
}

impl BinaryResolver {
    pub fn new(
        name: impl Into<String>,
        explicit: Option<PathBuf>,
        download_url: Option<String>,
        cache_dir: PathBuf,
    ) -> Self {
        Self {
            name: name.into(),
            explicit,
            download_url: download_url.filter(|u| !u.trim().is_empty()),
            cache_dir,
            resolved: OnceCell::new(),
        }
    }

    pub fn from_config(config: &YtDlpConfig) -> Self {
        Self::new(
            "yt-dlp",
            config.binary_path.clone(),
            Some(config.download_url.clone()),
            config.resolved_cache_dir(),
        )
    }

    /// Path of the executable, resolving it on first use.
    pub async fn resolve(&self) -> Result<PathBuf, FetchError> {
        self.resolved
            .get_or_try_init(|| self.locate())
            .await
            .cloned()
    }

    /// Already-resolved path, without triggering resolution.
    pub fn resolved(&self) -> Option<&Path> {
        self.resolved.get().map(PathBuf::as_path)
    }

    async fn locate(&self) -> Result<PathBuf, FetchError> {
        if let Some(path) = &self.explicit {
            if path.is_file() {
                debug!(path = %path.display(), "Using configured {}", self.name);
                return Ok(path.clone());
            }
            return Err(self.config_error(format!(
                "configured {} path does not exist: {}",
                self.name,
                path.display()
            )));
        }

        if let Ok(path) = which::which(&self.name) {
            debug!(path = %path.display(), "Using installed {}", self.name);
            return Ok(path);
        }

        let cached = self.cache_dir.join(&self.name);
        if cached.is_file() {
            debug!(path = %cached.display(), "Using cached {}", self.name);
            return Ok(cached);
        }

        self.download(&cached).await?;
        Ok(cached)
    }

    async fn download(&self, dest: &Path) -> Result<(), FetchError> {
        let Some(url) = self.download_url.as_deref() else {
            return Err(self.config_error(format!(
                "{} not found on PATH and no download URL configured",
                self.name
            )));
        };

        info!(url, dest = %dest.display(), "Downloading {}", self.name);

        let client = build_client(DOWNLOAD_TIMEOUT, None)
            .map_err(|e| self.config_error(format!("HTTP client error: {}", e)))?;
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| self.download_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.config_error(format!(
                "download of {} failed with HTTP {}",
                self.name, status
            )));
        }
        let bytes = response.bytes().await.map_err(|e| self.download_error(&e))?;

        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| self.config_error(format!("cannot create cache dir: {}", e)))?;

        // Write beside the destination and rename so a partial file is never executed.
        let partial = dest.with_extension(format!("part-{}", std::process::id()));
        tokio::fs::write(&partial, &bytes)
            .await
            .map_err(|e| self.config_error(format!("cannot write {}: {}", partial.display(), e)))?;
        make_executable(&partial)
            .await
            .map_err(|e| self.config_error(format!("cannot mark executable: {}", e)))?;
        tokio::fs::rename(&partial, dest)
            .await
            .map_err(|e| self.config_error(format!("cannot install {}: {}", dest.display(), e)))?;

        info!(path = %dest.display(), bytes = bytes.len(), "Installed {}", self.name);
        Ok(())
    }

    fn config_error(&self, message: String) -> FetchError {
        FetchError::new(ErrorCode::ConfigError, self.name.clone(), message)
    }

    fn download_error(&self, err: &reqwest::Error) -> FetchError {
        // Network trouble while fetching the tool is worth retrying later.
        FetchError::new(
            ErrorCode::TransientFetchError,
            self.name.clone(),
            format!("download of {} failed: {}", self.name, err),
        )
    }
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::transcript::test_server::serve;

    const MISSING_NAME: &str = "transcriptq-test-tool-that-is-not-installed";

    #[tokio::test]
    async fn test_explicit_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("tool");
        std::fs::write(&tool, "#!/bin/sh\n").unwrap();

        let resolver = BinaryResolver::new(MISSING_NAME, Some(tool.clone()), None, dir.path().into());
        assert_eq!(resolver.resolve().await.unwrap(), tool);
        assert_eq!(resolver.resolved(), Some(tool.as_path()));
    }

    #[tokio::test]
    async fn test_missing_explicit_path_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = BinaryResolver::new(
            MISSING_NAME,
            Some(dir.path().join("nope")),
            None,
            dir.path().into(),
        );
        let err = resolver.resolve().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigError);
        assert!(resolver.resolved().is_none());
    }

    #[tokio::test]
    async fn test_cached_copy_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let cached = dir.path().join(MISSING_NAME);
        std::fs::write(&cached, "#!/bin/sh\n").unwrap();

        let resolver = BinaryResolver::new(MISSING_NAME, None, None, dir.path().into());
        assert_eq!(resolver.resolve().await.unwrap(), cached);
    }

    #[tokio::test]
    async fn test_concurrent_callers_download_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let base = serve(move |req| {
            assert_eq!(req.path, "/tool");
            counter.fetch_add(1, Ordering::SeqCst);
            (200, "#!/bin/sh\necho downloaded\n".to_string())
        })
        .await;

        let dir = tempfile::tempdir().unwrap();
        let resolver = Arc::new(BinaryResolver::new(
            MISSING_NAME,
            None,
            Some(format!("{}/tool", base)),
            dir.path().join("bin"),
        ));

        let calls: Vec<_> = (0..5)
            .map(|_| {
                let resolver = resolver.clone();
                tokio::spawn(async move { resolver.resolve().await })
            })
            .collect();
        for call in calls {
            let path = call.await.unwrap().unwrap();
            assert_eq!(path, dir.path().join("bin").join(MISSING_NAME));
        }

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let installed = std::fs::read_to_string(dir.path().join("bin").join(MISSING_NAME)).unwrap();
        assert!(installed.contains("downloaded"));
    }

    #[tokio::test]
    async fn test_failed_download_is_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let base = serve(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                (500, "oops".to_string())
            } else {
                (200, "#!/bin/sh\n".to_string())
            }
        })
        .await;

        let dir = tempfile::tempdir().unwrap();
        let resolver = BinaryResolver::new(
            MISSING_NAME,
            None,
            Some(format!("{}/tool", base)),
            dir.path().into(),
        );
        assert!(resolver.resolve().await.is_err());
        assert!(resolver.resolve().await.is_ok());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
