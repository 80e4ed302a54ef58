use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use serenity::model::id::GuildId;
use songbird::{
    error::JoinError,
    input::{HttpRequest, Input, YoutubeDl},
    tracks::{PlayMode, TrackHandle},
    Call, Event, Songbird, TrackEvent,
};
use std::{path::PathBuf, sync::Arc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    audio::player::FinishedNotifier,
    bot::events::TrackFinishedHandler,
    error::{PlayerError, PlayerResult},
    sources::{PlaySource, Track},
};

/// Per-guild voice connection as seen by the playback manager.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoiceLink: Send + Sync {
    /// Replaces whatever is playing with `source`; `notifier` fires once it finishes.
    async fn play(
        &self,
        source: PlaySource,
        volume: f32,
        notifier: FinishedNotifier,
    ) -> PlayerResult<()>;

    async fn stop(&self);

    async fn pause(&self) -> PlayerResult<()>;

    async fn resume(&self) -> PlayerResult<()>;

    /// True when no source is playing or paused.
    async fn is_idle(&self) -> bool;

    async fn set_volume(&self, volume: f32);

    async fn disconnect(&self) -> PlayerResult<()>;
}

/// Where asynchronous playback news for a guild is posted.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn say(&self, text: String);

    async fn now_playing(&self, track: Track);
}

/// [`VoiceLink`] over a songbird call.
pub struct SongbirdLink {
    guild_id: GuildId,
    manager: Arc<Songbird>,
    call: Arc<Mutex<Call>>,
    http: reqwest::Client,
    cookies: Option<PathBuf>,
    current: SyncMutex<Option<TrackHandle>>,
}

impl SongbirdLink {
    pub fn new(
        guild_id: GuildId,
        manager: Arc<Songbird>,
        call: Arc<Mutex<Call>>,
        http: reqwest::Client,
        cookies: Option<PathBuf>,
    ) -> Self {
        Self {
            guild_id,
            manager,
            call,
            http,
            cookies,
            current: SyncMutex::new(None),
        }
    }

    /// Voice channel the call is bound to, if still connected.
    pub async fn channel(&self) -> Option<u64> {
        let call = self.call.lock().await;
        call.current_channel().map(|channel| channel.0.get())
    }

    fn input(&self, source: PlaySource) -> Input {
        match source {
            PlaySource::Stream(url) => HttpRequest::new(self.http.clone(), url).into(),
            PlaySource::Refresh(url) => {
                debug!("🔄 Re-resolving stream for {}", url);
                let mut ytdl = YoutubeDl::new(self.http.clone(), url);
                if let Some(cookies) = &self.cookies {
                    ytdl = ytdl.user_args(vec![
                        "--cookies".to_string(),
                        cookies.display().to_string(),
                    ]);
                }
                ytdl.into()
            }
        }
    }

    fn handle(&self) -> Option<TrackHandle> {
        self.current.lock().clone()
    }
}

#[async_trait]
impl VoiceLink for SongbirdLink {
    async fn play(
        &self,
        source: PlaySource,
        volume: f32,
        notifier: FinishedNotifier,
    ) -> PlayerResult<()> {
        let input = self.input(source);

        let handle = {
            let mut call = self.call.lock().await;
            call.play_only_input(input)
        };

        arm(&handle, volume, self.guild_id, &notifier)?;

        *self.current.lock() = Some(handle);
        Ok(())
    }

    async fn stop(&self) {
        self.current.lock().take();
        self.call.lock().await.stop();
    }

    async fn pause(&self) -> PlayerResult<()> {
        let handle = self.handle().ok_or(PlayerError::NothingPlaying)?;
        handle.pause().map_err(PlayerError::voice)?;
        info!("⏸️ Paused in guild {}", self.guild_id);
        Ok(())
    }

    async fn resume(&self) -> PlayerResult<()> {
        let handle = self.handle().ok_or(PlayerError::NothingPlaying)?;
        handle.play().map_err(PlayerError::voice)?;
        info!("▶️ Resumed in guild {}", self.guild_id);
        Ok(())
    }

    async fn is_idle(&self) -> bool {
        let Some(handle) = self.handle() else {
            return true;
        };

        match handle.get_info().await {
            Ok(state) => !matches!(state.playing, PlayMode::Play | PlayMode::Pause),
            Err(_) => true,
        }
    }

    async fn set_volume(&self, volume: f32) {
        if let Some(handle) = self.handle() {
            if let Err(e) = handle.set_volume(volume) {
                warn!("Could not apply volume in guild {}: {:?}", self.guild_id, e);
            }
        }
    }

    async fn disconnect(&self) -> PlayerResult<()> {
        self.current.lock().take();

        match self.manager.remove(self.guild_id).await {
            Ok(()) | Err(JoinError::NoCall) => {
                info!("👋 Disconnected from voice in guild {}", self.guild_id);
                Ok(())
            }
            Err(e) => Err(PlayerError::voice(e)),
        }
    }
}

/// Controls `play` needs on a source that has just started.
#[cfg_attr(test, mockall::automock)]
trait StartedTrack {
    fn set_volume(&self, volume: f32) -> PlayerResult<()>;

    fn watch(&self, event: TrackEvent, handler: TrackFinishedHandler) -> PlayerResult<()>;

    fn stop(&self);
}

impl StartedTrack for TrackHandle {
    fn set_volume(&self, volume: f32) -> PlayerResult<()> {
        TrackHandle::set_volume(self, volume).map_err(PlayerError::voice)
    }

    fn watch(&self, event: TrackEvent, handler: TrackFinishedHandler) -> PlayerResult<()> {
        self.add_event(Event::Track(event), handler)
            .map_err(PlayerError::voice)
    }

    fn stop(&self) {
        if let Err(e) = TrackHandle::stop(self) {
            debug!("Track was already gone when stopping: {:?}", e);
        }
    }
}

/// Applies the volume and finish handlers to a started source.
///
/// The source is stopped if either fails, so nothing plays unobserved.
fn arm(
    track: &impl StartedTrack,
    volume: f32,
    guild_id: GuildId,
    notifier: &FinishedNotifier,
) -> PlayerResult<()> {
    let armed = track.set_volume(volume).and_then(|()| {
        [TrackEvent::End, TrackEvent::Error]
            .into_iter()
            .try_for_each(|event| {
                track.watch(
                    event,
                    TrackFinishedHandler {
                        guild_id,
                        notifier: notifier.clone(),
                    },
                )
            })
    });

    if armed.is_err() {
        track.stop();
    }
    armed
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUILD: GuildId = GuildId::new(3);

    #[test]
    fn armed_track_gets_both_finish_handlers() {
        let mut track = MockStartedTrack::new();
        track.expect_set_volume().times(1).returning(|_| Ok(()));
        track.expect_watch().times(2).returning(|_, _| Ok(()));
        track.expect_stop().never();

        assert!(arm(&track, 0.5, GUILD, &FinishedNotifier::detached()).is_ok());
    }

    #[test]
    fn failed_handler_registration_stops_the_source() {
        let mut track = MockStartedTrack::new();
        track.expect_set_volume().returning(|_| Ok(()));
        track
            .expect_watch()
            .returning(|_, _| Err(PlayerError::voice("track ended")));
        track.expect_stop().times(1).return_const(());

        let err = arm(&track, 1.0, GUILD, &FinishedNotifier::detached()).unwrap_err();
        assert!(matches!(err, PlayerError::VoiceConnection(_)));
    }

    #[test]
    fn failed_volume_stops_the_source() {
        let mut track = MockStartedTrack::new();
        track
            .expect_set_volume()
            .returning(|_| Err(PlayerError::voice("track ended")));
        track.expect_watch().never();
        track.expect_stop().times(1).return_const(());

        assert!(arm(&track, 1.0, GUILD, &FinishedNotifier::detached()).is_err());
    }
}
