use thiserror::Error;

use crate::{config::MAX_VOLUME, sources::ResolveError};

pub type PlayerResult<T> = ::std::result::Result<T, PlayerError>;

/// Failures surfaced by the playback manager and the voice layer.
///
/// The `Display` text is what users see in chat.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("You must be in a voice channel to do that.")]
    NotInVoiceChannel,
    #[error("Nothing is playing right now.")]
    NothingPlaying,
    #[error("The queue is full (max {0} songs).")]
    QueueFull(usize),
    #[error("Volume must be between 0% and {max}%, got {0}%.", max = (MAX_VOLUME * 100.0) as u32)]
    VolumeOutOfRange(i64),
    #[error("Could not play the song: {0}")]
    Resolution(#[from] ResolveError),
    #[error("Voice connection failed: {0}")]
    VoiceConnection(String),
    #[error("The request was cancelled because playback was stopped.")]
    Cancelled,
    #[error("This server's player is unavailable, try again.")]
    GuildUnavailable,
}

impl PlayerError {
    /// Shorthand for wrapping voice-layer failures.
    pub fn voice(err: impl std::fmt::Display) -> Self {
        Self::VoiceConnection(err.to_string())
    }
}
