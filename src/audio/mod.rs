//! # Audio Module
//!
//! Per-guild playback for TuneBot.
//!
//! ## Architecture
//!
//! ### [`queue`] - Playback State
//! - Pure per-guild state: FIFO queue, current track, loop flag, volume
//! - Playback tokens that discard finish events from superseded sources
//!
//! ### [`player`] - Playback Manager
//! - One worker task per guild, fed through a command channel
//! - Advancement on finish, skip, stop and idle auto-leave
//! - Cancellation of in-flight resolutions when a guild is stopped
//!
//! ### [`voice`] - Voice Layer
//! - [`voice::VoiceLink`], the seam between the manager and songbird
//! - [`voice::ReplySink`], where asynchronous playback news is posted
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! let player = AudioPlayer::new(config.player_settings());
//!
//! let guard = player.resolution_guard(guild_id);
//! // resolve the track...
//! match player.enqueue_or_play(guild_id, track, voice, sink, guard).await? {
//!     Enqueued::PlayingNow => { /* announce */ }
//!     Enqueued::Queued(position) => { /* report position */ }
//! }
//!
//! player.skip(guild_id).await?;
//! player.stop(guild_id).await?;
//! ```

pub mod player;
pub mod queue;
pub mod voice;
