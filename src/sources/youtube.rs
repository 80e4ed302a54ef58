use anyhow::{Context, Result};
use async_process::Command;
use regex::Regex;
use serde::Deserialize;
use serenity::model::id::UserId;
use std::{path::PathBuf, sync::LazyLock, time::Duration};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{MusicSource, ResolveError, Track};

static YOUTUBE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(https?://)?(www\.|m\.)?(youtube\.com/(watch\?v=|embed/|v/|shorts/)|youtu\.be/|music\.youtube\.com/)",
    )
    .expect("youtube url pattern is valid")
});

/// Resolver backed by the `yt-dlp` executable.
pub struct YtDlpSource {
    program: String,
    cookies: Option<PathBuf>,
    timeout: Duration,
    // Limit concurrent extractions to avoid rate limiting
    rate_limiter: Semaphore,
}

/// Subset of the `--dump-json` output we care about.
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
    original_url: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    thumbnail: Option<String>,
    is_live: Option<bool>,
    entries: Option<Vec<YtDlpInfo>>,
}

impl YtDlpSource {
    pub fn new(program: String, cookies: Option<PathBuf>, timeout: Duration) -> Self {
        if let Some(path) = &cookies {
            if path.exists() {
                info!("🍪 Using cookies from: {}", path.display());
            } else {
                warn!("🍪 Cookie file not found: {}", path.display());
            }
        }

        Self {
            program,
            cookies,
            timeout,
            rate_limiter: Semaphore::new(3),
        }
    }

    pub fn is_youtube_url(url: &str) -> bool {
        YOUTUBE_URL.is_match(url)
    }

    /// Any http(s) URL goes straight to the extractor, the rest is a search.
    fn target(query: &str) -> String {
        match url::Url::parse(query) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => query.to_string(),
            _ => format!("ytsearch1:{}", query),
        }
    }

    fn build_args(&self, query: &str) -> Vec<String> {
        let mut args: Vec<String> = [
            "--no-playlist",
            "--dump-json",
            "--no-warnings",
            "-f",
            "bestaudio/best",
        ]
        .iter()
        .map(|arg| arg.to_string())
        .collect();

        if let Some(cookies) = &self.cookies {
            args.push("--cookies".to_string());
            args.push(cookies.display().to_string());
        }

        args.push(Self::target(query));
        args
    }

    async fn run(&self, args: &[String]) -> Result<std::process::Output, ResolveError> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| ResolveError::Extractor(e.to_string()))?;

        let output = Command::new(&self.program)
            .args(args)
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.timeout, output).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ResolveError::Timeout(self.timeout.as_secs())),
        }
    }

    /// Reports the installed yt-dlp version.
    pub async fn version(&self) -> Result<String> {
        let output = Command::new(&self.program)
            .arg("--version")
            .output()
            .await
            .context("Error running yt-dlp")?;

        if !output.status.success() {
            anyhow::bail!("yt-dlp --version exited with {}", output.status);
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Builds a track from the first JSON document printed by yt-dlp.
fn track_from_output(stdout: &str, query: &str, requested_by: UserId) -> Result<Track, ResolveError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| ResolveError::NoResults(query.to_string()))?;

    let mut info: YtDlpInfo = serde_json::from_str(line)?;

    // Search wrappers carry the hit in `entries`
    if let Some(entries) = info.entries.take() {
        info = entries
            .into_iter()
            .next()
            .ok_or_else(|| ResolveError::NoResults(query.to_string()))?;
    }

    let stream_url = info
        .url
        .ok_or_else(|| ResolveError::Extractor("no playable audio format".to_string()))?;

    if info.is_live.unwrap_or(false) {
        debug!("🔴 Live stream resolved for: {}", query);
    }

    let mut track = Track::new(
        info.title.unwrap_or_else(|| query.to_string()),
        stream_url,
        requested_by,
    );

    if let Some(page) = info.webpage_url.or(info.original_url) {
        track = track.with_source_url(page).refreshable();
    }

    if let Some(artist) = info.uploader {
        track = track.with_artist(artist);
    }

    if let Some(duration) = info.duration.filter(|d| d.is_finite() && *d > 0.0) {
        track = track.with_duration(Duration::from_secs_f64(duration));
    }

    if let Some(thumbnail) = info.thumbnail {
        track = track.with_thumbnail(thumbnail);
    }

    Ok(track)
}

#[async_trait::async_trait]
impl MusicSource for YtDlpSource {
    async fn resolve(&self, query: &str, requested_by: UserId) -> Result<Track, ResolveError> {
        info!("🔍 Resolving with yt-dlp: {}", query);

        let output = self.run(&self.build_args(query)).await?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            let reason = error
                .lines()
                .rev()
                .find(|line| line.contains("ERROR"))
                .unwrap_or(error.trim())
                .to_string();
            warn!("❌ yt-dlp failed for {}: {}", query, reason);
            return Err(ResolveError::Extractor(reason));
        }

        track_from_output(&String::from_utf8_lossy(&output.stdout), query, requested_by)
    }

    fn is_valid_url(&self, url: &str) -> bool {
        Self::is_youtube_url(url)
    }

    fn source_name(&self) -> &'static str {
        "yt-dlp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::PlaySource;
    use pretty_assertions::assert_eq;

    const VIDEO_JSON: &str = r#"{"id":"dQw4w9WgXcQ","title":"Never Gonna Give You Up","url":"https://rr1.googlevideo.com/videoplayback?x=1","webpage_url":"https://www.youtube.com/watch?v=dQw4w9WgXcQ","duration":213.0,"uploader":"Rick Astley","thumbnail":"https://i.ytimg.com/vi/dQw4w9WgXcQ/hq.jpg","is_live":false}"#;

    fn source(cookies: Option<PathBuf>) -> YtDlpSource {
        YtDlpSource::new("yt-dlp".to_string(), cookies, Duration::from_secs(5))
    }

    #[test]
    fn test_youtube_url_detection() {
        assert!(YtDlpSource::is_youtube_url(
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        ));
        assert!(YtDlpSource::is_youtube_url("https://youtu.be/dQw4w9WgXcQ"));
        assert!(YtDlpSource::is_youtube_url(
            "https://music.youtube.com/watch?v=test"
        ));
        assert!(!YtDlpSource::is_youtube_url("https://example.com/video"));
    }

    #[test]
    fn search_terms_become_a_single_result_search() {
        let args = source(None).build_args("never gonna give you up");
        assert_eq!(args.last().map(String::as_str), Some("ytsearch1:never gonna give you up"));
        assert!(!args.contains(&"--cookies".to_string()));
    }

    #[test]
    fn urls_are_passed_through_with_cookies() {
        let args = source(Some(PathBuf::from("/tmp/cookies.txt")))
            .build_args("https://youtu.be/dQw4w9WgXcQ");

        let cookies_at = args.iter().position(|a| a == "--cookies").unwrap();
        assert_eq!(args[cookies_at + 1], "/tmp/cookies.txt");
        assert_eq!(args.last().unwrap(), "https://youtu.be/dQw4w9WgXcQ");
    }

    #[test]
    fn parses_video_metadata() {
        let track = track_from_output(VIDEO_JSON, "rick", UserId::new(1)).unwrap();

        assert_eq!(track.title, "Never Gonna Give You Up");
        assert_eq!(track.stream_url, "https://rr1.googlevideo.com/videoplayback?x=1");
        assert_eq!(
            track.source_url.as_deref(),
            Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
        );
        assert_eq!(track.artist.as_deref(), Some("Rick Astley"));
        assert_eq!(track.duration, Some(Duration::from_secs(213)));
        assert_eq!(track.requested_by, UserId::new(1));
    }

    #[test]
    fn resolved_tracks_refresh_on_replay() {
        let mut track = track_from_output(VIDEO_JSON, "rick", UserId::new(1)).unwrap();
        track.mark_started();
        track.mark_started();

        assert_eq!(
            track.play_source(),
            PlaySource::Refresh("https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string())
        );
    }

    #[test]
    fn takes_first_entry_of_a_search_wrapper() {
        let wrapped = format!(r#"{{"title":"ytsearch1","entries":[{}]}}"#, VIDEO_JSON);
        let track = track_from_output(&wrapped, "rick", UserId::new(1)).unwrap();
        assert_eq!(track.title, "Never Gonna Give You Up");
    }

    #[test]
    fn empty_output_means_no_results() {
        let err = track_from_output("\n", "nothing here", UserId::new(1)).unwrap_err();
        assert!(matches!(err, ResolveError::NoResults(q) if q == "nothing here"));

        let err = track_from_output(r#"{"entries":[]}"#, "q", UserId::new(1)).unwrap_err();
        assert!(matches!(err, ResolveError::NoResults(_)));
    }

    #[test]
    fn missing_stream_url_is_an_extractor_error() {
        let err = track_from_output(r#"{"title":"x"}"#, "x", UserId::new(1)).unwrap_err();
        assert!(matches!(err, ResolveError::Extractor(_)));
    }

    #[test]
    fn garbage_output_is_malformed() {
        let err = track_from_output("not json", "x", UserId::new(1)).unwrap_err();
        assert!(matches!(err, ResolveError::Malformed(_)));
    }
}
