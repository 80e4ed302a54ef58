//! # Bot Module
//!
//! Discord side of TuneBot.
//!
//! - [`commands`] turns chat messages into [`commands::Command`]s
//! - [`handlers`] runs each command against the playback manager
//! - [`events`] bridges songbird track events and text-channel replies
//!
//! [`TuneBot`] implements Serenity's [`EventHandler`] and owns the guilds'
//! voice connections; playback state itself lives in [`AudioPlayer`].

use dashmap::DashMap;
use serenity::{
    all::{ActivityData, ChannelId, Context, EventHandler, GuildId, Message, Ready, VoiceState},
    async_trait,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod events;
pub mod handlers;

use crate::{
    audio::{player::AudioPlayer, voice::SongbirdLink},
    config::Config,
    error::{PlayerError, PlayerResult},
    sources::SourceManager,
};

/// How often the resolver binary is re-checked in the background.
const DEPENDENCY_CHECK_INTERVAL_SECS: u64 = 3600;

pub struct TuneBot {
    config: Arc<Config>,
    pub player: Arc<AudioPlayer>,
    sources: Arc<SourceManager>,
    /// Voice connections the bot opened, per guild.
    voice_links: DashMap<GuildId, Arc<SongbirdLink>>,
    /// Shared client for the stream requests songbird makes.
    http: reqwest::Client,
    maintenance_started: AtomicBool,
}

impl TuneBot {
    pub fn new(config: Config) -> Self {
        let player = Arc::new(AudioPlayer::new(config.player_settings()));
        let sources = Arc::new(SourceManager::new(&config));

        Self {
            config: Arc::new(config),
            player,
            sources,
            voice_links: DashMap::new(),
            http: reqwest::Client::new(),
            maintenance_started: AtomicBool::new(false),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.config.command_prefix
    }

    pub fn sources(&self) -> &SourceManager {
        &self.sources
    }

    /// Connects to `channel_id`, or moves the existing call there.
    ///
    /// The returned link is reused for as long as songbird keeps the call.
    pub async fn connect_voice(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> PlayerResult<Arc<SongbirdLink>> {
        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| PlayerError::voice("voice client not initialised"))?;

        let existing = self.voice_links.get(&guild_id).map(|link| link.clone());
        if let Some(link) = existing {
            if manager.get(guild_id).is_some() {
                if link.channel().await != Some(channel_id.get()) {
                    manager
                        .join(guild_id, channel_id)
                        .await
                        .map_err(PlayerError::voice)?;
                    info!("🔀 Moved to voice channel {} in guild {}", channel_id, guild_id);
                }
                return Ok(link);
            }
            debug!("Dropping stale voice link for guild {}", guild_id);
            self.voice_links.remove(&guild_id);
        }

        let call = manager.join(guild_id, channel_id).await.map_err(|e| {
            error!("Error joining voice in guild {}: {:?}", guild_id, e);
            PlayerError::voice(e)
        })?;

        let link = Arc::new(SongbirdLink::new(
            guild_id,
            manager,
            call,
            self.http.clone(),
            self.config.cookies_path.clone(),
        ));
        self.voice_links.insert(guild_id, link.clone());

        info!("🔊 Connected to voice channel {} in guild {}", channel_id, guild_id);
        Ok(link)
    }

    /// Stops playback and leaves voice. Returns whether the bot was connected.
    pub async fn disconnect_voice(&self, ctx: &Context, guild_id: GuildId) -> PlayerResult<bool> {
        // forget the link first so the voice state update is not taken for a loss
        self.voice_links.remove(&guild_id);

        if self.player.stop(guild_id).await? {
            return Ok(true);
        }

        // connected through `join` without ever playing
        let Some(manager) = songbird::get(ctx).await else {
            return Ok(false);
        };
        if manager.get(guild_id).is_none() {
            return Ok(false);
        }

        manager.remove(guild_id).await.map_err(PlayerError::voice)?;
        info!("👋 Disconnected from voice in guild {}", guild_id);
        Ok(true)
    }
}

#[async_trait]
impl EventHandler for TuneBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} is online!", ready.user.name);
        info!("📊 Connected to {} servers", ready.guilds.len());

        ctx.set_activity(Some(ActivityData::listening(format!("{}help", self.prefix()))));

        if !self.maintenance_started.swap(true, Ordering::SeqCst) {
            tokio::spawn(maintenance_tasks(self.sources.clone()));
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let Some(guild_id) = msg.guild_id else {
            return;
        };
        let Some(parsed) = commands::parse(self.prefix(), &msg.content) else {
            return;
        };

        debug!("📨 {:?} from {} in guild {}", parsed, msg.author.name, guild_id);

        let result = match parsed {
            Ok(command) => handlers::handle_command(&ctx, &msg, guild_id, command, self).await,
            Err(e) => Err(e.into()),
        };

        if let Err(e) = result {
            handlers::report_error(&ctx, &msg, e).await;
        }
    }

    async fn voice_state_update(&self, ctx: Context, _old: Option<VoiceState>, new: VoiceState) {
        if new.user_id != ctx.cache.current_user().id || new.channel_id.is_some() {
            return;
        }
        let Some(guild_id) = new.guild_id else {
            return;
        };

        if self.voice_links.remove(&guild_id).is_some() {
            warn!("🔌 Bot was removed from voice in guild {}", guild_id);
            self.player.voice_lost(guild_id);
        }
    }
}

/// Periodically checks that the resolver still runs.
async fn maintenance_tasks(sources: Arc<SourceManager>) {
    let mut interval =
        tokio::time::interval(tokio::time::Duration::from_secs(DEPENDENCY_CHECK_INTERVAL_SECS));

    loop {
        interval.tick().await;

        match sources.verify_dependencies().await {
            Ok(version) => debug!("🧹 yt-dlp {} available", version),
            Err(e) => warn!("Error verifying dependencies: {:?}", e),
        }
    }
}
