//! External-tool provider: subtitles extracted with yt-dlp.
//!
//! Each attempt runs in a fresh temp dir with a hard timeout. Failures are
//! classified from the tool's stderr. Blocked attempts are retried once per
//! proxy from the pool, up to the configured rotation cap.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::binary::BinaryResolver;
use super::parse::parse_vtt;
use super::provider::{base_language, TranscriptProvider};
use super::proxy::ProxyPool;
use super::{classify_failure, ErrorCode, FetchError};
use crate::config::YtDlpConfig;
use crate::models::Segment;

pub const PROVIDER_NAME: &str = "ytdlp";

const WATCH_URL: &str = "https://www.youtube.com/watch?v=";

pub struct YtDlpProvider {
    resolver: Arc<BinaryResolver>,
    proxies: Arc<ProxyPool>,
    timeout: Duration,
    max_proxy_rotations: usize,
    enabled: bool,
}

impl YtDlpProvider {
    pub fn new(config: &YtDlpConfig, resolver: Arc<BinaryResolver>, proxies: Arc<ProxyPool>) -> Self {
        Self {
            resolver,
            proxies,
            timeout: Duration::from_secs(config.timeout_secs),
            max_proxy_rotations: config.max_proxy_rotations,
            enabled: config.enabled,
        }
    }

    /// One extraction attempt, optionally through a proxy.
    async fn attempt(
        &self,
        binary: &Path,
        video_id: &str,
        language: &str,
        proxy: Option<&str>,
    ) -> Result<Vec<Segment>, FetchError> {
        let workdir = tempfile::tempdir().map_err(|e| {
            FetchError::new(ErrorCode::TransientFetchError, PROVIDER_NAME, format!("temp dir: {}", e))
        })?;

        let wanted = format!("{},{}.*", language, base_language(language));
        let output = self
            .run(binary, workdir.path(), video_id, &wanted, proxy)
            .await?;
        let mut files = subtitle_files(workdir.path()).await;

        if files.is_empty() && output.status.success() {
            debug!(video_id, language, "No subtitle in requested language, listing all");
            let retry = self
                .run(binary, workdir.path(), video_id, "all,-live_chat", proxy)
                .await?;
            files = subtitle_files(workdir.path()).await;
            if files.is_empty() {
                return Err(failure_from_output(&retry));
            }
        } else if files.is_empty() {
            return Err(failure_from_output(&output));
        }

        let Some(path) = pick_subtitle(&files, video_id, language) else {
            return Err(FetchError::new(ErrorCode::NoCaptions, PROVIDER_NAME, "no subtitle file written"));
        };
        let body = tokio::fs::read_to_string(path).await.map_err(|e| {
            FetchError::new(ErrorCode::ParserError, PROVIDER_NAME, format!("unreadable subtitle: {}", e))
        })?;

        let segments = parse_vtt(&body)
            .map_err(|e| FetchError::new(ErrorCode::ParserError, PROVIDER_NAME, e.to_string()))?;
        if segments.is_empty() {
            return Err(FetchError::new(
                ErrorCode::NoCaptions,
                PROVIDER_NAME,
                "subtitle file has no cues",
            ));
        }
        Ok(segments)
    }

    async fn run(
        &self,
        binary: &Path,
        workdir: &Path,
        video_id: &str,
        sub_langs: &str,
        proxy: Option<&str>,
    ) -> Result<Output, FetchError> {
        let template = workdir.join("%(id)s.%(ext)s");

        let mut cmd = Command::new(binary);
        cmd.args([
            "--skip-download",
            "--write-subs",
            "--write-auto-subs",
            "--sub-format",
            "vtt",
            "--sub-langs",
            sub_langs,
            "--no-playlist",
            "--no-progress",
            "--no-warnings",
            "-o",
        ])
        .arg(&template);

        if let Some(proxy) = proxy {
            debug!("Using proxy for yt-dlp: {}", proxy);
            cmd.args(["--proxy", proxy]);
        }
        cmd.arg("--").arg(format!("{}{}", WATCH_URL, video_id));

        run_with_timeout(cmd, self.timeout).await
    }
}

/// Spawn `cmd` in its own process group and wait at most `timeout`.
/// On expiry the whole group is killed.
async fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Result<Output, FetchError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let child = cmd.spawn().map_err(|e| {
        FetchError::new(
            ErrorCode::ConfigError,
            PROVIDER_NAME,
            format!("failed to execute yt-dlp: {}", e),
        )
    })?;
    let pid = child.id();

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(FetchError::new(
            ErrorCode::TransientFetchError,
            PROVIDER_NAME,
            format!("yt-dlp wait failed: {}", e),
        )),
        Err(_) => {
            kill_process_group(pid);
            warn!(pid, timeout_secs = timeout.as_secs(), "yt-dlp timed out, killed");
            Err(FetchError::new(
                ErrorCode::TransientFetchError,
                PROVIDER_NAME,
                format!("yt-dlp timed out after {}s", timeout.as_secs()),
            ))
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        // SAFETY: killpg has no memory-safety preconditions; a stale group id
        // only yields ESRCH.
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

fn failure_from_output(output: &Output) -> FetchError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if output.status.success() || stderr.is_empty() {
        return FetchError::new(ErrorCode::NoCaptions, PROVIDER_NAME, "yt-dlp wrote no subtitles");
    }
    let last_lines: Vec<&str> = stderr.lines().rev().take(5).collect();
    let message: Vec<&str> = last_lines.into_iter().rev().collect();
    FetchError::new(classify_failure(stderr), PROVIDER_NAME, message.join("\n"))
}

async fn subtitle_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return files;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("vtt") {
            files.push(path);
        }
    }
    files.sort();
    files
}

/// Language tag from `<id>.<lang>.vtt`.
fn subtitle_language<'a>(path: &'a Path, video_id: &str) -> Option<&'a str> {
    let stem = path.file_stem()?.to_str()?;
    stem.strip_prefix(video_id)?.strip_prefix('.')
}

/// Exact language, then base language, then the first file.
fn pick_subtitle<'a>(files: &'a [PathBuf], video_id: &str, language: &str) -> Option<&'a PathBuf> {
    let wanted = language.to_lowercase();
    let wanted_base = base_language(&wanted).to_string();
    let lang_of = |p: &PathBuf| subtitle_language(p, video_id).map(str::to_lowercase);

    files
        .iter()
        .find(|p| lang_of(*p).as_deref() == Some(wanted.as_str()))
        .or_else(|| {
            files.iter().find(|p| {
                lang_of(*p)
                    .map(|l| base_language(&l) == wanted_base)
                    .unwrap_or(false)
            })
        })
        .or_else(|| files.first())
}

/// Proxy failures and blocks move on to the next proxy; anything about the
/// video itself ends the rotation.
fn rotates_on(code: ErrorCode) -> bool {
    matches!(
        code,
        ErrorCode::BlockedOrRateLimited | ErrorCode::TransientFetchError
    )
}

#[async_trait]
impl TranscriptProvider for YtDlpProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn is_available(&self) -> bool {
        self.enabled
    }

    async fn fetch(&self, video_id: &str, language: &str) -> Result<Vec<Segment>, FetchError> {
        let binary = self.resolver.resolve().await?;

        let first = match self.attempt(&binary, video_id, language, None).await {
            Ok(segments) => return Ok(segments),
            Err(e) => e,
        };
        if first.code != ErrorCode::BlockedOrRateLimited {
            return Err(first);
        }

        let rotation = self.proxies.rotation(self.max_proxy_rotations);
        if rotation.is_empty() {
            return Err(first);
        }

        let mut last = first;
        for proxy in rotation {
            info!(video_id, proxy = %proxy, "yt-dlp blocked, retrying through proxy");
            match self.attempt(&binary, video_id, language, Some(proxy.as_str())).await {
                Ok(segments) => return Ok(segments),
                Err(e) if rotates_on(e.code) => {
                    warn!(video_id, proxy = %proxy, code = %e.code, "yt-dlp proxy attempt failed");
                    last = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::time::Instant;

    use super::*;

    const VTT: &str = "WEBVTT\n\n00:00:00.000 --> 00:00:01.500\nhello there\n\n00:00:01.500 --> 00:00:03.000\nmy friend\n";

    /// Write an executable shell script standing in for yt-dlp.
    fn fake_tool(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-yt-dlp");
        let script = format!(
            "#!/bin/sh\nout=\"\"\nproxy=\"\"\nlangs=\"\"\nwhile [ $# -gt 0 ]; do\n  case \"$1\" in\n    -o) out=\"$2\"; shift 2;;\n    --proxy) proxy=\"$2\"; shift 2;;\n    --sub-langs) langs=\"$2\"; shift 2;;\n    *) shift;;\n  esac\ndone\ndir=$(dirname \"$out\")\n{}\n",
            body
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn provider(tool: PathBuf, proxies: Vec<String>, timeout_secs: u64) -> YtDlpProvider {
        let cache = tool.parent().unwrap().to_path_buf();
        let config = YtDlpConfig {
            timeout_secs,
            ..YtDlpConfig::default()
        };
        YtDlpProvider::new(
            &config,
            Arc::new(BinaryResolver::new("yt-dlp", Some(tool), None, cache)),
            Arc::new(ProxyPool::new(proxies)),
        )
    }

    #[test]
    fn test_pick_subtitle() {
        let files = vec![
            PathBuf::from("/t/abc.de.vtt"),
            PathBuf::from("/t/abc.en-GB.vtt"),
            PathBuf::from("/t/abc.en.vtt"),
        ];
        assert_eq!(pick_subtitle(&files, "abc", "en").unwrap(), &files[2]);
        assert_eq!(pick_subtitle(&files, "abc", "en-us").unwrap(), &files[1]);
        assert_eq!(pick_subtitle(&files, "abc", "ja").unwrap(), &files[0]);
        assert!(pick_subtitle(&[], "abc", "en").is_none());
    }

    #[tokio::test]
    async fn test_fetch_parses_written_subtitles() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(
            dir.path(),
            &format!("cat > \"$dir/abc.en.vtt\" <<'EOF'\n{}EOF", VTT),
        );
        let segments = provider(tool, vec![], 10).fetch("abc", "en").await.unwrap();
        let texts: Vec<&str> = segments.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["hello there", "my friend"]);
    }

    #[tokio::test]
    async fn test_falls_back_to_all_languages() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(
            dir.path(),
            &format!(
                "case \"$langs\" in all*) cat > \"$dir/abc.fr.vtt\" <<'EOF'\n{}EOF\n;; esac",
                VTT
            ),
        );
        let segments = provider(tool, vec![], 10).fetch("abc", "en").await.unwrap();
        assert_eq!(segments.len(), 2);
    }

    #[tokio::test]
    async fn test_no_subtitles_anywhere() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "exit 0");
        let err = provider(tool, vec![], 10).fetch("abc", "en").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NoCaptions);
    }

    #[tokio::test]
    async fn test_stderr_is_classified() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "echo 'ERROR: [youtube] abc: Video unavailable' >&2; exit 1");
        let err = provider(tool, vec![], 10).fetch("abc", "en").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SourceUnavailable);
    }

    #[tokio::test]
    async fn test_blocked_rotates_through_proxies() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(
            dir.path(),
            &format!(
                "if [ \"$proxy\" != \"http://good:1\" ]; then echo \"ERROR: Sign in to confirm you're not a bot\" >&2; exit 1; fi\ncat > \"$dir/abc.en.vtt\" <<'EOF'\n{}EOF",
                VTT
            ),
        );
        let proxies = vec!["http://bad:1".to_string(), "http://good:1".to_string()];
        let segments = provider(tool, proxies, 10).fetch("abc", "en").await.unwrap();
        assert_eq!(segments.len(), 2);
    }

    #[tokio::test]
    async fn test_dead_proxy_does_not_end_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(
            dir.path(),
            &format!(
                "case \"$proxy\" in\n  '') echo \"ERROR: Sign in to confirm you're not a bot\" >&2; exit 1;;\n  http://dead:1) echo 'ERROR: Unable to download webpage: Unable to connect to proxy (caused by ProxyError)' >&2; exit 1;;\nesac\ncat > \"$dir/abc.en.vtt\" <<'EOF'\n{}EOF",
                VTT
            ),
        );
        let proxies = vec!["http://dead:1".to_string(), "http://good:1".to_string()];
        let segments = provider(tool, proxies, 10).fetch("abc", "en").await.unwrap();
        assert_eq!(segments.len(), 2);
    }

    #[tokio::test]
    async fn test_video_error_through_proxy_stops_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let calls = dir.path().join("calls");
        let tool = fake_tool(
            dir.path(),
            &format!(
                "echo x >> '{}'\nif [ -z \"$proxy\" ]; then echo 'HTTP Error 429: Too Many Requests' >&2; exit 1; fi\necho 'ERROR: [youtube] abc: Video unavailable' >&2; exit 1",
                calls.display()
            ),
        );
        let proxies = vec!["http://a:1".to_string(), "http://b:1".to_string()];
        let err = provider(tool, proxies, 10).fetch("abc", "en").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SourceUnavailable);
        let calls = std::fs::read_to_string(&calls).unwrap();
        assert_eq!(calls.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_blocked_without_proxies_gives_up() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "echo 'HTTP Error 429: Too Many Requests' >&2; exit 1");
        let err = provider(tool, vec![], 10).fetch("abc", "en").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::BlockedOrRateLimited);
        assert!(err.transient);
    }

    #[tokio::test]
    async fn test_timeout_kills_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("survived");
        let tool = fake_tool(
            dir.path(),
            &format!("(sleep 3; touch '{}') &\nsleep 30", marker.display()),
        );

        let started = Instant::now();
        let err = provider(tool, vec![], 1).fetch("abc", "en").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::TransientFetchError);
        assert!(started.elapsed() < Duration::from_secs(10));

        // The backgrounded grandchild was in the same group and must be gone.
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!marker.exists());
    }
}
