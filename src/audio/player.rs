use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::model::id::GuildId;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        queue::{Advance, Enqueued, FinishReason, GuildPlaybackState, PlaybackToken, QueueInfo},
        voice::{ReplySink, VoiceLink},
    },
    error::{PlayerError, PlayerResult},
    sources::Track,
};

#[derive(Debug, Clone)]
pub struct PlayerSettings {
    pub default_volume: f32,
    pub max_queue_size: usize,
    /// `None` disables the idle auto-leave.
    pub idle_timeout: Option<Duration>,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            default_volume: 1.0,
            max_queue_size: 500,
            idle_timeout: Some(Duration::from_secs(300)),
        }
    }
}

/// Messages processed, one at a time, by a guild's worker task.
pub enum GuildCommand {
    Enqueue {
        track: Track,
        voice: Arc<dyn VoiceLink>,
        sink: Arc<dyn ReplySink>,
        cancelled: CancellationToken,
        reply: oneshot::Sender<PlayerResult<Enqueued>>,
    },
    Attach {
        voice: Arc<dyn VoiceLink>,
        sink: Arc<dyn ReplySink>,
        reply: oneshot::Sender<()>,
    },
    Finished {
        token: PlaybackToken,
        reason: FinishReason,
    },
    Skip {
        reply: oneshot::Sender<PlayerResult<Option<Track>>>,
    },
    Stop {
        reply: oneshot::Sender<PlayerResult<bool>>,
    },
    Pause {
        reply: oneshot::Sender<PlayerResult<()>>,
    },
    Resume {
        reply: oneshot::Sender<PlayerResult<()>>,
    },
    SetLoop {
        enabled: Option<bool>,
        reply: oneshot::Sender<bool>,
    },
    SetVolume {
        volume: f32,
        reply: oneshot::Sender<PlayerResult<f32>>,
    },
    Shuffle {
        reply: oneshot::Sender<usize>,
    },
    ClearQueue {
        reply: oneshot::Sender<usize>,
    },
    Info {
        reply: oneshot::Sender<QueueInfo>,
    },
    VoiceLost,
}

/// Posts a finish event back onto the owning guild worker.
///
/// Safe to call from the voice driver's threads.
#[derive(Clone)]
pub struct FinishedNotifier {
    events: mpsc::UnboundedSender<GuildCommand>,
    token: PlaybackToken,
}

impl FinishedNotifier {
    pub fn notify(&self, reason: FinishReason) {
        let finished = GuildCommand::Finished {
            token: self.token,
            reason,
        };
        if self.events.send(finished).is_err() {
            debug!("Finish event dropped, guild worker is gone");
        }
    }
}

#[cfg(test)]
impl FinishedNotifier {
    /// A notifier whose events go nowhere.
    pub(crate) fn detached() -> Self {
        let (events, _) = mpsc::unbounded_channel();
        Self { events, token: 0 }
    }
}

#[derive(Clone)]
struct GuildHandle {
    commands: mpsc::UnboundedSender<GuildCommand>,
    resolutions: Arc<Mutex<CancellationToken>>,
}

/// Registry of per-guild playback workers.
pub struct AudioPlayer {
    guilds: DashMap<GuildId, GuildHandle>,
    settings: PlayerSettings,
}

impl AudioPlayer {
    pub fn new(settings: PlayerSettings) -> Self {
        Self {
            guilds: DashMap::new(),
            settings,
        }
    }

    /// Plays `track` now if the guild is idle, otherwise queues it.
    ///
    /// `cancelled` is the guard taken before resolving the track. If the guild
    /// was stopped since, nothing is queued and [`PlayerError::Cancelled`] is
    /// returned.
    pub async fn enqueue_or_play(
        &self,
        guild_id: GuildId,
        track: Track,
        voice: Arc<dyn VoiceLink>,
        sink: Arc<dyn ReplySink>,
        cancelled: CancellationToken,
    ) -> PlayerResult<Enqueued> {
        self.request(guild_id, |reply| GuildCommand::Enqueue {
            track,
            voice,
            sink,
            cancelled,
            reply,
        })
        .await?
    }

    /// Hands a connection opened without playing to the guild, so the idle
    /// timer covers it.
    pub async fn attach(
        &self,
        guild_id: GuildId,
        voice: Arc<dyn VoiceLink>,
        sink: Arc<dyn ReplySink>,
    ) -> PlayerResult<()> {
        self.request(guild_id, |reply| GuildCommand::Attach { voice, sink, reply })
            .await
    }

    /// Stops the current source and starts the next queued track, if any.
    pub async fn skip(&self, guild_id: GuildId) -> PlayerResult<Option<Track>> {
        self.request(guild_id, |reply| GuildCommand::Skip { reply }).await?
    }

    /// Clears the guild, cancels pending resolutions and disconnects.
    ///
    /// Returns whether a voice connection was torn down.
    pub async fn stop(&self, guild_id: GuildId) -> PlayerResult<bool> {
        let Some(handle) = self.guilds.get(&guild_id).map(|h| h.clone()) else {
            return Ok(false);
        };

        {
            let mut resolutions = handle.resolutions.lock();
            resolutions.cancel();
            *resolutions = CancellationToken::new();
        }

        self.request(guild_id, |reply| GuildCommand::Stop { reply }).await?
    }

    pub async fn pause(&self, guild_id: GuildId) -> PlayerResult<()> {
        self.request(guild_id, |reply| GuildCommand::Pause { reply }).await?
    }

    pub async fn resume(&self, guild_id: GuildId) -> PlayerResult<()> {
        self.request(guild_id, |reply| GuildCommand::Resume { reply }).await?
    }

    /// Sets the loop flag, or toggles it with `None`. Returns the new value.
    pub async fn set_loop(&self, guild_id: GuildId, enabled: Option<bool>) -> PlayerResult<bool> {
        self.request(guild_id, |reply| GuildCommand::SetLoop { enabled, reply })
            .await
    }

    pub async fn toggle_loop(&self, guild_id: GuildId) -> PlayerResult<bool> {
        self.set_loop(guild_id, None).await
    }

    pub async fn set_volume(&self, guild_id: GuildId, volume: f32) -> PlayerResult<f32> {
        self.request(guild_id, |reply| GuildCommand::SetVolume { volume, reply })
            .await?
    }

    pub async fn shuffle(&self, guild_id: GuildId) -> PlayerResult<usize> {
        self.request(guild_id, |reply| GuildCommand::Shuffle { reply }).await
    }

    pub async fn clear_queue(&self, guild_id: GuildId) -> PlayerResult<usize> {
        self.request(guild_id, |reply| GuildCommand::ClearQueue { reply })
            .await
    }

    pub async fn info(&self, guild_id: GuildId) -> PlayerResult<QueueInfo> {
        self.request(guild_id, |reply| GuildCommand::Info { reply }).await
    }

    /// The voice connection went away without us asking.
    pub fn voice_lost(&self, guild_id: GuildId) {
        if let Some(handle) = self.guilds.get(&guild_id) {
            let _ = handle.commands.send(GuildCommand::VoiceLost);
        }
    }

    /// Token that is cancelled when the guild is stopped.
    ///
    /// Resolutions running on behalf of the guild should give up once it fires.
    pub fn resolution_guard(&self, guild_id: GuildId) -> CancellationToken {
        self.guild(guild_id).resolutions.lock().child_token()
    }

    fn guild(&self, guild_id: GuildId) -> GuildHandle {
        self.guilds
            .entry(guild_id)
            .or_insert_with(|| GuildWorker::spawn(guild_id, &self.settings))
            .clone()
    }

    async fn request<T>(
        &self,
        guild_id: GuildId,
        command: impl FnOnce(oneshot::Sender<T>) -> GuildCommand,
    ) -> PlayerResult<T> {
        let (reply, response) = oneshot::channel();

        if self.guild(guild_id).commands.send(command(reply)).is_err() {
            error!("❌ Player worker for guild {} is gone, resetting", guild_id);
            self.guilds.remove(&guild_id);
            return Err(PlayerError::GuildUnavailable);
        }

        response.await.map_err(|_| PlayerError::GuildUnavailable)
    }
}

/// Owns one guild's playback state; every mutation happens on its turn.
struct GuildWorker {
    guild_id: GuildId,
    state: GuildPlaybackState,
    voice: Option<Arc<dyn VoiceLink>>,
    sink: Option<Arc<dyn ReplySink>>,
    events: mpsc::UnboundedSender<GuildCommand>,
    idle_timeout: Option<Duration>,
    idle_since: Option<Instant>,
}

impl GuildWorker {
    fn spawn(guild_id: GuildId, settings: &PlayerSettings) -> GuildHandle {
        let (commands, receiver) = mpsc::unbounded_channel();

        let worker = Self {
            guild_id,
            state: GuildPlaybackState::new(settings.max_queue_size, settings.default_volume),
            voice: None,
            sink: None,
            events: commands.clone(),
            idle_timeout: settings.idle_timeout,
            idle_since: None,
        };
        tokio::spawn(worker.run(receiver));

        GuildHandle {
            commands,
            resolutions: Arc::new(Mutex::new(CancellationToken::new())),
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<GuildCommand>) {
        debug!("🎛️ Player worker started for guild {}", self.guild_id);

        loop {
            let deadline = self
                .idle_timeout
                .zip(self.idle_since)
                .map(|(timeout, since)| since + timeout);

            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = idle_elapsed(deadline) => self.leave_idle().await,
            }

            self.refresh_idle();
        }

        debug!("Player worker stopped for guild {}", self.guild_id);
    }

    async fn handle(&mut self, command: GuildCommand) {
        match command {
            GuildCommand::Enqueue {
                track,
                voice,
                sink,
                cancelled,
                reply,
            } => {
                if cancelled.is_cancelled() {
                    self.drop_cancelled(voice).await;
                    let _ = reply.send(Err(PlayerError::Cancelled));
                    return;
                }

                let idle = voice.is_idle().await;
                self.voice = Some(voice);
                self.sink = Some(sink);

                let result = match self.state.enqueue(track, idle) {
                    Ok(Enqueued::PlayingNow) => self.start_current().await.map(|_| Enqueued::PlayingNow),
                    other => other,
                };
                let _ = reply.send(result);
            }
            GuildCommand::Attach { voice, sink, reply } => {
                self.voice = Some(voice);
                self.sink = Some(sink);
                let _ = reply.send(());
            }
            GuildCommand::Finished { token, reason } => self.on_finished(token, reason).await,
            GuildCommand::Skip { reply } => {
                let _ = reply.send(self.skip().await);
            }
            GuildCommand::Stop { reply } => {
                let _ = reply.send(self.stop().await);
            }
            GuildCommand::Pause { reply } => {
                let result = match self.playing_voice() {
                    Ok(voice) => voice.pause().await,
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            GuildCommand::Resume { reply } => {
                let result = match self.playing_voice() {
                    Ok(voice) => voice.resume().await,
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            GuildCommand::SetLoop { enabled, reply } => {
                let looping = match enabled {
                    Some(enabled) => {
                        self.state.set_loop(enabled);
                        enabled
                    }
                    None => self.state.toggle_loop(),
                };
                let _ = reply.send(looping);
            }
            GuildCommand::SetVolume { volume, reply } => {
                let result = self.state.set_volume(volume);
                if let (Ok(volume), Ok(voice)) = (&result, self.playing_voice()) {
                    voice.set_volume(*volume).await;
                }
                let _ = reply.send(result);
            }
            GuildCommand::Shuffle { reply } => {
                let _ = reply.send(self.state.shuffle());
            }
            GuildCommand::ClearQueue { reply } => {
                let _ = reply.send(self.state.clear_queue());
            }
            GuildCommand::Info { reply } => {
                let _ = reply.send(self.state.info(self.voice.is_some()));
            }
            GuildCommand::VoiceLost => {
                if self.voice.take().is_some() {
                    warn!("🔌 Voice connection lost in guild {}", self.guild_id);
                }
                self.state.stop();
            }
        }
    }

    /// Advancement after the voice layer reported the end of a source.
    async fn on_finished(&mut self, token: PlaybackToken, reason: FinishReason) {
        let finished_title = self.state.current().map(|t| t.title.clone());

        let Some(advance) = self.state.finish(token, &reason) else {
            return;
        };

        match &reason {
            FinishReason::NaturalEnd => debug!("Track ended in guild {}", self.guild_id),
            FinishReason::ExplicitStop => info!("⏹️ Track stopped externally in guild {}", self.guild_id),
            FinishReason::Error(why) => {
                warn!("⚠️ Playback error in guild {}: {}", self.guild_id, why);
            }
            FinishReason::StartFailed(why) => {
                error!("❌ Could not start track in guild {}: {}", self.guild_id, why);
                self.say(format!(
                    "❌ Could not play **{}**: {}",
                    finished_title.unwrap_or_default(),
                    why
                ))
                .await;
            }
        }

        self.apply(advance).await;
    }

    async fn skip(&mut self) -> PlayerResult<Option<Track>> {
        if self.state.current().is_none() && self.state.len() == 0 {
            return Err(PlayerError::NothingPlaying);
        }

        if let Some(voice) = &self.voice {
            voice.stop().await;
        }

        match self.state.skip() {
            Advance::Next(track) | Advance::Replay(track) => {
                self.start_current().await?;
                Ok(Some(track))
            }
            Advance::Idle => Ok(None),
        }
    }

    async fn stop(&mut self) -> PlayerResult<bool> {
        self.state.stop();

        let Some(voice) = self.voice.take() else {
            return Ok(false);
        };

        voice.stop().await;
        voice.disconnect().await?;
        info!("⏹️ Playback stopped in guild {}", self.guild_id);
        Ok(true)
    }

    /// A play request outlived a stop. Its fresh connection is closed unless
    /// the guild has been connected again since.
    async fn drop_cancelled(&self, voice: Arc<dyn VoiceLink>) {
        info!("🚫 Dropping a play request cancelled by stop in guild {}", self.guild_id);

        if self.voice.is_some() {
            return;
        }
        if let Err(e) = voice.disconnect().await {
            warn!("Error leaving voice after a cancelled play in guild {}: {:?}", self.guild_id, e);
        }
    }

    async fn leave_idle(&mut self) {
        info!("💤 Leaving voice in guild {} after inactivity", self.guild_id);

        self.state.stop();
        if let Some(voice) = self.voice.take() {
            if let Err(e) = voice.disconnect().await {
                warn!("Error leaving idle voice in guild {}: {:?}", self.guild_id, e);
            }
        }

        self.say("👋 Left the voice channel due to inactivity.".to_string())
            .await;
    }

    /// Submits the outcome of an advancement to the voice layer.
    async fn apply(&mut self, advance: Advance) {
        let (track, announce) = match advance {
            Advance::Next(track) => (track, true),
            Advance::Replay(track) => (track, false),
            Advance::Idle => return,
        };

        match self.start_current().await {
            Ok(()) if announce => {
                if let Some(sink) = &self.sink {
                    sink.now_playing(track).await;
                }
            }
            Ok(()) => {}
            Err(e) => {
                self.say(format!("❌ Could not play **{}**: {}", track.title, e))
                    .await;
            }
        }
    }

    /// Starts the bound track; on failure the guild is left idle.
    async fn start_current(&mut self) -> PlayerResult<()> {
        let Some(track) = self.state.current() else {
            return Ok(());
        };
        let source = track.play_source();
        let title = track.title.clone();
        debug!("Start #{} of {} in guild {}: {:?}", track.starts(), title, self.guild_id, source);

        let notifier = FinishedNotifier {
            events: self.events.clone(),
            token: self.state.token(),
        };

        let result = match &self.voice {
            Some(voice) => voice.play(source, self.state.volume(), notifier).await,
            None => Err(PlayerError::voice("not connected to a voice channel")),
        };

        match result {
            Ok(()) => {
                info!("🎵 Playing in guild {}: {}", self.guild_id, title);
                Ok(())
            }
            Err(e) => {
                error!("❌ Could not start {} in guild {}: {}", title, self.guild_id, e);
                self.state.abandon_current();
                Err(e)
            }
        }
    }

    fn playing_voice(&self) -> PlayerResult<Arc<dyn VoiceLink>> {
        match (&self.voice, self.state.current()) {
            (Some(voice), Some(_)) => Ok(voice.clone()),
            _ => Err(PlayerError::NothingPlaying),
        }
    }

    async fn say(&self, text: String) {
        if let Some(sink) = &self.sink {
            sink.say(text).await;
        }
    }

    fn refresh_idle(&mut self) {
        let idle = self.voice.is_some() && self.state.current().is_none();

        self.idle_since = match (idle, self.idle_since) {
            (true, Some(since)) => Some(since),
            (true, None) => Some(Instant::now()),
            (false, _) => None,
        };
    }
}

async fn idle_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
