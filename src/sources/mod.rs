pub mod direct_url;
pub mod youtube;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serenity::model::id::UserId;
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, info};

pub use direct_url::DirectUrlSource;
pub use youtube::YtDlpSource;

use crate::config::Config;

/// Resolved stream URLs are only trusted for this long before a refresh.
const STREAM_TTL: Duration = Duration::from_secs(30 * 60);

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

/// Errors produced while turning a query or URL into a playable [`Track`].
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no results found for \"{0}\"")]
    NoResults(String),
    #[error("the extractor rejected the request: {0}")]
    Extractor(String),
    #[error("resolution timed out after {0}s")]
    Timeout(u64),
    #[error("could not run the resolver: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("unexpected resolver output: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Common trait for every music source.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MusicSource: Send + Sync {
    /// Resolves a search term or URL into a track with a streamable URL.
    async fn resolve(&self, query: &str, requested_by: UserId) -> Result<Track, ResolveError>;

    /// Whether the URL can be handled by this source.
    fn is_valid_url(&self, url: &str) -> bool;

    fn source_name(&self) -> &'static str;
}

/// Process-unique identity of a track, independent of its URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackId(u64);

/// What the voice layer should feed into the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaySource {
    /// Already resolved stream endpoint.
    Stream(String),
    /// Page URL to re-resolve at play time, the old stream may be gone.
    Refresh(String),
}

/// A resolved, playable audio reference plus display metadata.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    pub title: String,
    pub stream_url: String,
    pub source_url: Option<String>,
    pub artist: Option<String>,
    pub duration: Option<Duration>,
    pub thumbnail: Option<String>,
    pub requested_by: UserId,
    pub added_at: DateTime<Utc>,
    resolved_at: Instant,
    refreshable: bool,
    starts: u32,
}

impl Track {
    pub fn new(title: String, stream_url: String, requested_by: UserId) -> Self {
        Self {
            id: TrackId(NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed)),
            title,
            stream_url,
            source_url: None,
            artist: None,
            duration: None,
            thumbnail: None,
            requested_by,
            added_at: Utc::now(),
            resolved_at: Instant::now(),
            refreshable: false,
            starts: 0,
        }
    }

    pub fn with_source_url(mut self, source_url: String) -> Self {
        self.source_url = Some(source_url);
        self
    }

    pub fn with_artist(mut self, artist: String) -> Self {
        self.artist = Some(artist);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: String) -> Self {
        self.thumbnail = Some(thumbnail);
        self
    }

    /// Marks the source URL as re-resolvable through the extractor.
    pub fn refreshable(mut self) -> Self {
        self.refreshable = self.source_url.is_some();
        self
    }

    /// Number of times this track has been bound to the voice connection.
    pub fn starts(&self) -> u32 {
        self.starts
    }

    pub(crate) fn mark_started(&mut self) {
        self.starts += 1;
    }

    /// Picks the input for the upcoming start.
    ///
    /// Must be called after [`Track::mark_started`] for that start.
    pub fn play_source(&self) -> PlaySource {
        let stale = self.starts > 1 || self.resolved_at.elapsed() > STREAM_TTL;

        match (&self.source_url, self.refreshable && stale) {
            (Some(source_url), true) => PlaySource::Refresh(source_url.clone()),
            _ => PlaySource::Stream(self.stream_url.clone()),
        }
    }

    /// Link shown to users: the original reference when known.
    pub fn display_url(&self) -> &str {
        self.source_url.as_deref().unwrap_or(&self.stream_url)
    }
}

/// Picks a source for each query.
pub struct SourceManager {
    ytdlp: YtDlpSource,
    direct_url: DirectUrlSource,
}

impl SourceManager {
    pub fn new(config: &Config) -> Self {
        Self {
            ytdlp: YtDlpSource::new(
                config.ytdlp_path.clone(),
                config.cookies_path.clone(),
                config.resolve_timeout(),
            ),
            direct_url: DirectUrlSource::new(),
        }
    }

    /// Checks that the extractor binary can run.
    pub async fn verify_dependencies(&self) -> Result<String> {
        self.ytdlp.version().await
    }
}

#[async_trait]
impl MusicSource for SourceManager {
    /// Resolves direct audio links locally and everything else through yt-dlp.
    async fn resolve(&self, query: &str, requested_by: UserId) -> Result<Track, ResolveError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ResolveError::NoResults(String::new()));
        }

        let source: &dyn MusicSource = if self.direct_url.is_valid_url(query) {
            &self.direct_url
        } else {
            &self.ytdlp
        };
        debug!("🔎 Resolving \"{}\" via {}", query, source.source_name());

        let track = source.resolve(query, requested_by).await?;

        info!("🎯 Resolved \"{}\" to: {}", query, track.title);
        Ok(track)
    }

    fn is_valid_url(&self, url: &str) -> bool {
        self.direct_url.is_valid_url(url) || self.ytdlp.is_valid_url(url)
    }

    fn source_name(&self) -> &'static str {
        "auto"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn track() -> Track {
        Track::new(
            "Song".to_string(),
            "https://cdn.example/stream".to_string(),
            UserId::new(7),
        )
    }

    #[test]
    fn ids_are_unique_per_track() {
        let a = track();
        let b = track();
        assert_ne!(a.id, b.id);
        assert_eq!(a.clone().id, a.id);
    }

    #[test]
    fn first_start_uses_the_resolved_stream() {
        let mut track = track()
            .with_source_url("https://youtube.com/watch?v=x".to_string())
            .refreshable();
        track.mark_started();

        assert_eq!(
            track.play_source(),
            PlaySource::Stream("https://cdn.example/stream".to_string())
        );
    }

    #[test]
    fn replays_refresh_through_the_source_url() {
        let mut track = track()
            .with_source_url("https://youtube.com/watch?v=x".to_string())
            .refreshable();
        track.mark_started();
        track.mark_started();

        assert_eq!(
            track.play_source(),
            PlaySource::Refresh("https://youtube.com/watch?v=x".to_string())
        );
    }

    #[test]
    fn non_refreshable_tracks_always_stream() {
        let mut track = track().with_source_url("https://files.example/a.mp3".to_string());
        track.mark_started();
        track.mark_started();

        assert_eq!(
            track.play_source(),
            PlaySource::Stream("https://cdn.example/stream".to_string())
        );
        assert_eq!(track.display_url(), "https://files.example/a.mp3");
    }

    #[test]
    fn refreshable_requires_a_source_url() {
        let mut track = track().refreshable();
        track.mark_started();
        track.mark_started();

        assert!(matches!(track.play_source(), PlaySource::Stream(_)));
    }
}
