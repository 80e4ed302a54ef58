use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::{
    audio::queue::QueueInfo,
    sources::{Track, YtDlpSource},
};

const ITEMS_PER_PAGE: usize = 10;

/// Standard colour palette
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

const STANDARD_FOOTER: &str = "🎵 TuneBot";

/// Announcement for a track that just started.
pub fn now_playing(track: &Track) -> CreateEmbed {
    track_embed(track)
        .title("🎵 Now Playing")
        .color(colors::SUCCESS_GREEN)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Reply for a track that went to the back of the queue.
pub fn track_queued(track: &Track, position: usize) -> CreateEmbed {
    track_embed(track)
        .title("✅ Added to Queue")
        .field("📍 Position", position.to_string(), true)
        .color(colors::MUSIC_PURPLE)
        .footer(CreateEmbedFooter::new(
            "🎵 It will play automatically when its turn comes",
        ))
}

/// Embed for `nowplaying`, with the guild's loop and volume state.
pub fn current_status(info: &QueueInfo) -> Option<CreateEmbed> {
    let current = info.current.as_ref()?;

    Some(
        now_playing(current)
            .field("🔁 Loop", if info.loop_enabled { "On" } else { "Off" }, true)
            .field("🔊 Volume", format!("{}%", percent(info.volume)), true),
    )
}

fn track_embed(track: &Track) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .description(format!("**{}**", track.title))
        .field(
            "🎤 Artist",
            track.artist.as_deref().unwrap_or("Unknown"),
            true,
        );

    embed = match track.duration {
        Some(duration) => embed.field("⏱️ Duration", format_duration(duration), true),
        None => embed.field("⏱️ Duration", "🔴 Live", true),
    };

    embed = embed
        .field("👤 Requested by", format!("<@{}>", track.requested_by), true)
        .field("🔗 Source", source_label(track), true)
        .field("🕒 Added", format!("<t:{}:R>", track.added_at.timestamp()), true);

    if let Some(thumbnail) = &track.thumbnail {
        embed = embed.thumbnail(thumbnail);
    }

    embed.url(track.display_url()).timestamp(Timestamp::now())
}

fn source_label(track: &Track) -> &'static str {
    match &track.source_url {
        Some(url) if YtDlpSource::is_youtube_url(url) => "YouTube",
        _ => "Web",
    }
}

/// One page of the queue listing.
pub fn queue_page(info: &QueueInfo, page: usize, prefix: &str) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📋 Queue")
        .color(colors::INFO_BLUE);

    if info.current.is_none() && info.items.is_empty() {
        return embed
            .description(format!(
                "😴 **The queue is empty**\n\n💡 Use `{}play <song>` to add music",
                prefix
            ))
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now());
    }

    if let Some(current) = &info.current {
        let status = if info.loop_enabled { "🔂" } else { "▶️" };
        embed = embed.field(format!("{} Now Playing", status), line(current), false);
    }

    let page = info.page(page, ITEMS_PER_PAGE);

    if !page.items.is_empty() {
        let listing = page
            .items
            .iter()
            .enumerate()
            .map(|(i, track)| format!("**{}**. {}", page.first_position + i, line(track)))
            .collect::<Vec<_>>()
            .join("\n");

        embed = embed.field("Up Next", listing, false);
    }

    let mut summary = format!("**Total:** {} queued", info.items.len());
    if info.total_duration > Duration::ZERO {
        summary.push_str(&format!(
            " • **Duration:** {}",
            format_duration(info.total_duration)
        ));
    }
    if info.loop_enabled {
        summary.push_str(" • 🔁 **Loop**");
    }
    if !info.connected {
        summary.push_str(" • 🔇 **Not connected**");
    }
    embed = embed.field("Info", summary, false);

    let footer = if page.total_pages > 1 {
        format!(
            "Page {} of {} • TuneBot",
            page.current_page, page.total_pages
        )
    } else {
        STANDARD_FOOTER.to_string()
    };

    embed
        .footer(CreateEmbedFooter::new(footer))
        .timestamp(Timestamp::now())
}

fn line(track: &Track) -> String {
    let mut line = track.title.clone();
    if let Some(artist) = &track.artist {
        line.push_str(&format!(" - {}", artist));
    }
    if let Some(duration) = track.duration {
        line.push_str(&format!(" `[{}]`", format_duration(duration)));
    }
    line
}

pub fn help(prefix: &str) -> CreateEmbed {
    let p = prefix;

    CreateEmbed::default()
        .title("🎵 TuneBot - Commands")
        .color(colors::INFO_BLUE)
        .field(
            "🎵 Playback",
            format!(
                "• `{p}play <song or URL>` - Play or queue a song (`{p}p`)\n\
                • `{p}pause` - Pause playback\n\
                • `{p}resume` - Resume playback\n\
                • `{p}skip` - Skip the current song (`{p}s`)\n\
                • `{p}stop` - Stop, clear the queue and leave"
            ),
            false,
        )
        .field(
            "📜 Queue",
            format!(
                "• `{p}queue [page]` - Show the queue (`{p}q`)\n\
                • `{p}nowplaying` - Show the current song (`{p}np`)\n\
                • `{p}shuffle` - Shuffle the queue\n\
                • `{p}loop [on|off]` - Repeat the current song\n\
                • `{p}clear` - Clear the queue"
            ),
            false,
        )
        .field(
            "🎛️ Audio",
            format!("• `{p}volume [0-200]` - Show or set the volume (`{p}vol`)"),
            false,
        )
        .field(
            "🔊 Connection",
            format!(
                "• `{p}join` - Join your voice channel\n\
                • `{p}leave` - Leave the voice channel\n\
                • `{p}ping` - Check the bot's latency"
            ),
            false,
        )
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now())
}

pub fn percent(volume: f32) -> u32 {
    (volume * 100.0).round() as u32
}

/// `m:ss`, or `h:mm:ss` from one hour up.
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
