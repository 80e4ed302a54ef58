use serenity::{
    async_trait,
    builder::CreateMessage,
    http::Http,
    model::id::{ChannelId, GuildId},
};
use songbird::{
    tracks::{PlayError, PlayMode},
    Event as VoiceEvent, EventContext, EventHandler as VoiceEventHandler,
};
use std::sync::Arc;
use tracing::{debug, error};

use crate::{
    audio::{player::FinishedNotifier, queue::FinishReason, voice::ReplySink},
    sources::Track,
    ui::embeds,
};

/// Forwards track end and error events to the guild's player worker.
///
/// One handler is attached per played source; its notifier carries the
/// playback token of that source.
pub struct TrackFinishedHandler {
    pub guild_id: GuildId,
    pub notifier: FinishedNotifier,
}

#[async_trait]
impl VoiceEventHandler for TrackFinishedHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        if let EventContext::Track(track_list) = ctx {
            for (state, _handle) in *track_list {
                match finish_reason(&state.playing) {
                    Some(reason) => {
                        debug!("Track finished in guild {}: {:?}", self.guild_id, reason);
                        self.notifier.notify(reason);
                    }
                    None => debug!(
                        "Ignoring track event in guild {}: {:?}",
                        self.guild_id, state.playing
                    ),
                }
            }
        }

        None
    }
}

/// Maps the driver's terminal play modes onto finish reasons.
fn finish_reason(mode: &PlayMode) -> Option<FinishReason> {
    match mode {
        PlayMode::End => Some(FinishReason::NaturalEnd),
        PlayMode::Stop => Some(FinishReason::ExplicitStop),
        // the input never produced audio
        PlayMode::Errored(PlayError::Create(e)) => Some(FinishReason::StartFailed(e.to_string())),
        PlayMode::Errored(PlayError::Parse(e)) => Some(FinishReason::StartFailed(e.to_string())),
        PlayMode::Errored(e) => Some(FinishReason::Error(format!("{:?}", e))),
        _ => None,
    }
}

/// Posts playback news into the text channel the last command came from.
pub struct ChannelAnnouncer {
    http: Arc<Http>,
    channel_id: ChannelId,
}

impl ChannelAnnouncer {
    pub fn new(http: Arc<Http>, channel_id: ChannelId) -> Self {
        Self { http, channel_id }
    }
}

#[async_trait]
impl ReplySink for ChannelAnnouncer {
    async fn say(&self, text: String) {
        if let Err(e) = self.channel_id.say(&self.http, text).await {
            error!("Error sending message to {}: {:?}", self.channel_id, e);
        }
    }

    async fn now_playing(&self, track: Track) {
        let message = CreateMessage::new().embed(embeds::now_playing(&track));

        if let Err(e) = self.channel_id.send_message(&self.http, message).await {
            error!("Error sending now playing to {}: {:?}", self.channel_id, e);
        }
    }
}
