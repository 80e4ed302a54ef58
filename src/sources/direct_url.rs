use super::{MusicSource, ResolveError, Track};
use async_trait::async_trait;
use serenity::model::id::UserId;

const AUDIO_EXTENSIONS: [&str; 7] = [".mp3", ".wav", ".ogg", ".flac", ".m4a", ".opus", ".webm"];

/// Plain links to audio files, played as-is without the extractor.
pub struct DirectUrlSource {}

impl DirectUrlSource {
    pub fn new() -> Self {
        Self {}
    }
}

#[async_trait]
impl MusicSource for DirectUrlSource {
    async fn resolve(&self, query: &str, requested_by: UserId) -> Result<Track, ResolveError> {
        let url = url::Url::parse(query)
            .map_err(|e| ResolveError::Extractor(format!("invalid URL: {}", e)))?;

        let title = url
            .path_segments()
            .and_then(|segments| segments.last())
            .filter(|segment| !segment.is_empty())
            .unwrap_or(query)
            .to_string();

        Ok(Track::new(title, query.to_string(), requested_by).with_source_url(query.to_string()))
    }

    fn is_valid_url(&self, url: &str) -> bool {
        let Ok(parsed) = url::Url::parse(url) else {
            return false;
        };

        if !matches!(parsed.scheme(), "http" | "https") {
            return false;
        }

        let path = parsed.path().to_lowercase();
        AUDIO_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
    }

    fn source_name(&self) -> &'static str {
        "direct"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::PlaySource;
    use pretty_assertions::assert_eq;

    #[test]
    fn detects_audio_file_links() {
        let source = DirectUrlSource::new();
        assert!(source.is_valid_url("https://files.example/music/track.MP3"));
        assert!(source.is_valid_url("http://files.example/a.ogg?token=abc"));
        assert!(!source.is_valid_url("https://www.youtube.com/watch?v=x"));
        assert!(!source.is_valid_url("ftp://files.example/a.mp3"));
        assert!(!source.is_valid_url("lofi beats.mp3"));
    }

    #[tokio::test]
    async fn uses_the_file_name_as_title() {
        let track = DirectUrlSource::new()
            .resolve("https://files.example/music/track.mp3", UserId::new(3))
            .await
            .unwrap();

        assert_eq!(track.title, "track.mp3");
        assert_eq!(track.stream_url, "https://files.example/music/track.mp3");
        assert_eq!(
            track.play_source(),
            PlaySource::Stream("https://files.example/music/track.mp3".to_string())
        );
    }
}
