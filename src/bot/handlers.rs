use anyhow::Result;
use serenity::{
    all::{ChannelId, Context, GuildId, Message, UserId},
    builder::{CreateEmbed, CreateMessage, EditMessage},
};
use std::{future::Future, sync::Arc, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    audio::{
        player::AudioPlayer,
        queue::Enqueued,
        voice::{ReplySink, VoiceLink},
    },
    bot::{
        commands::{Command, ParseError},
        events::ChannelAnnouncer,
        TuneBot,
    },
    error::{PlayerError, PlayerResult},
    sources::{MusicSource, Track},
    ui::embeds,
};

/// Runs one parsed command for a guild.
pub async fn handle_command(
    ctx: &Context,
    msg: &Message,
    guild_id: GuildId,
    command: Command,
    bot: &TuneBot,
) -> Result<()> {
    match command {
        Command::Play(query) => handle_play(ctx, msg, guild_id, &query, bot).await,
        Command::Pause => {
            bot.player.pause(guild_id).await?;
            say(ctx, msg, "⏸️ Paused.").await
        }
        Command::Resume => {
            bot.player.resume(guild_id).await?;
            say(ctx, msg, "▶️ Resumed.").await
        }
        Command::Stop => {
            if bot.disconnect_voice(ctx, guild_id).await? {
                say(ctx, msg, "⏹ Stopped and disconnected from the voice channel.").await
            } else {
                say(ctx, msg, "❌ I'm not in a voice channel.").await
            }
        }
        Command::Skip => handle_skip(ctx, msg, guild_id, bot).await,
        Command::Queue(page) => {
            let info = bot.player.info(guild_id).await?;
            send_embed(ctx, msg, embeds::queue_page(&info, page, bot.prefix())).await
        }
        Command::Loop(enabled) => {
            let enabled = match enabled {
                Some(enabled) => bot.player.set_loop(guild_id, Some(enabled)).await?,
                None => bot.player.toggle_loop(guild_id).await?,
            };
            let state = if enabled { "enabled" } else { "disabled" };
            say(ctx, msg, &format!("🔁 Loop has been {}.", state)).await
        }
        Command::Volume(None) => {
            let info = bot.player.info(guild_id).await?;
            say(
                ctx,
                msg,
                &format!("🔊 Current volume: {}%", embeds::percent(info.volume)),
            )
            .await
        }
        Command::Volume(Some(volume)) => {
            let volume = bot.player.set_volume(guild_id, volume).await?;
            say(
                ctx,
                msg,
                &format!("🔊 Volume set to {}%", embeds::percent(volume)),
            )
            .await
        }
        Command::Shuffle => match bot.player.shuffle(guild_id).await? {
            0 => say(ctx, msg, "❌ The queue is empty.").await,
            count => say(ctx, msg, &format!("🔀 Shuffled {} songs.", count)).await,
        },
        Command::Clear => {
            let removed = bot.player.clear_queue(guild_id).await?;
            say(ctx, msg, &format!("🗑️ Removed {} songs from the queue.", removed)).await
        }
        Command::Leave => {
            if bot.disconnect_voice(ctx, guild_id).await? {
                say(ctx, msg, "👋 Left the voice channel.").await
            } else {
                say(ctx, msg, "❌ I'm not in a voice channel.").await
            }
        }
        Command::NowPlaying => {
            let info = bot.player.info(guild_id).await?;
            let embed = embeds::current_status(&info).ok_or(PlayerError::NothingPlaying)?;
            send_embed(ctx, msg, embed).await
        }
        Command::Join => {
            let channel_id = user_voice_channel(ctx, guild_id, msg.author.id)?;
            let link = bot.connect_voice(ctx, guild_id, channel_id).await?;
            let sink = Arc::new(ChannelAnnouncer::new(ctx.http.clone(), msg.channel_id));
            bot.player.attach(guild_id, link, sink).await?;
            say(ctx, msg, &format!("🔊 Joined <#{}>", channel_id)).await
        }
        Command::Help => send_embed(ctx, msg, embeds::help(bot.prefix())).await,
        Command::Ping => handle_ping(ctx, msg).await,
    }
}

/// Voice check, then the play request, then the reply.
async fn handle_play(
    ctx: &Context,
    msg: &Message,
    guild_id: GuildId,
    query: &str,
    bot: &TuneBot,
) -> Result<()> {
    let channel_id = user_voice_channel(ctx, guild_id, msg.author.id)?;

    let cancelled = bot.player.resolution_guard(guild_id);
    let connect = async {
        bot.connect_voice(ctx, guild_id, channel_id)
            .await
            .map(|link| link as Arc<dyn VoiceLink>)
    };
    let sink = Arc::new(ChannelAnnouncer::new(ctx.http.clone(), msg.channel_id));

    let typing = msg.channel_id.start_typing(&ctx.http);
    let played = play_request(
        &bot.player,
        bot.sources(),
        guild_id,
        query,
        msg.author.id,
        cancelled,
        connect,
        sink,
    )
    .await;
    drop(typing);

    match played? {
        (track, Enqueued::PlayingNow) => send_embed(ctx, msg, embeds::now_playing(&track)).await,
        (track, Enqueued::Queued(position)) => {
            info!("📋 Queued {} at {} in guild {}", track.title, position, guild_id);
            send_embed(ctx, msg, embeds::track_queued(&track, position)).await
        }
    }
}

/// Resolves `query`, connects, and hands the track to the guild's player.
///
/// The guild is left as it was when resolution fails or when `cancelled`
/// fires before the track reaches the player. `connect` only runs once a
/// track was resolved.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn play_request<C>(
    player: &AudioPlayer,
    source: &dyn MusicSource,
    guild_id: GuildId,
    query: &str,
    requested_by: UserId,
    cancelled: CancellationToken,
    connect: C,
    sink: Arc<dyn ReplySink>,
) -> PlayerResult<(Track, Enqueued)>
where
    C: Future<Output = PlayerResult<Arc<dyn VoiceLink>>>,
{
    let track = tokio::select! {
        _ = cancelled.cancelled() => return Err(PlayerError::Cancelled),
        resolved = source.resolve(query, requested_by) => resolved?,
    };

    // a stop may have landed while we were resolving
    if cancelled.is_cancelled() {
        return Err(PlayerError::Cancelled);
    }

    let voice = connect.await?;
    let enqueued = player
        .enqueue_or_play(guild_id, track.clone(), voice, sink, cancelled)
        .await?;

    Ok((track, enqueued))
}

async fn handle_skip(ctx: &Context, msg: &Message, guild_id: GuildId, bot: &TuneBot) -> Result<()> {
    match bot.player.skip(guild_id).await? {
        Some(next) => {
            say(ctx, msg, "⏭️ Skipped.").await?;
            send_embed(ctx, msg, embeds::now_playing(&next)).await
        }
        None => say(ctx, msg, "⏭️ Skipped. The queue is empty.").await,
    }
}

/// Replies with the HTTP round-trip time of the reply itself.
async fn handle_ping(ctx: &Context, msg: &Message) -> Result<()> {
    let start = Instant::now();
    let mut reply = msg.channel_id.say(&ctx.http, "🏓 Pong!").await?;
    let elapsed = start.elapsed().as_millis();

    reply
        .edit(
            &ctx.http,
            EditMessage::new().content(format!("🏓 Pong! {}ms", elapsed)),
        )
        .await?;

    Ok(())
}

/// Turns a failed command into a single user-facing reply.
pub async fn report_error(ctx: &Context, msg: &Message, e: anyhow::Error) {
    let text = user_message(&e);

    if let Err(send_error) = msg.channel_id.say(&ctx.http, format!("❌ {}", text)).await {
        error!("Error replying to {}: {:?}", msg.channel_id, send_error);
    }
}

fn user_message(e: &anyhow::Error) -> String {
    if let Some(player_error) = e.downcast_ref::<PlayerError>() {
        return player_error.to_string();
    }
    if let Some(parse_error) = e.downcast_ref::<ParseError>() {
        return parse_error.to_string();
    }

    error!("Unexpected command error: {:?}", e);
    "Something went wrong, please try again.".to_string()
}

fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> PlayerResult<ChannelId> {
    let guild = guild_id
        .to_guild_cached(&ctx.cache)
        .ok_or(PlayerError::GuildUnavailable)?;

    let channel_id = guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
        .ok_or(PlayerError::NotInVoiceChannel)?;

    Ok(channel_id)
}

async fn say(ctx: &Context, msg: &Message, text: &str) -> Result<()> {
    msg.channel_id.say(&ctx.http, text).await?;
    Ok(())
}

async fn send_embed(ctx: &Context, msg: &Message, embed: CreateEmbed) -> Result<()> {
    msg.channel_id
        .send_message(&ctx.http, CreateMessage::new().embed(embed))
        .await?;
    Ok(())
}
