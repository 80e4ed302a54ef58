use rand::seq::SliceRandom;
use std::{collections::VecDeque, time::Duration};
use tracing::{debug, info};

use crate::{
    config::MAX_VOLUME,
    error::{PlayerError, PlayerResult},
    sources::Track,
};

/// Monotonic tag handed to the voice layer with every start.
///
/// Finish notifications carrying an older token describe a source that was
/// already replaced, skipped or stopped and are ignored.
pub type PlaybackToken = u64;

/// Outcome of [`GuildPlaybackState::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    PlayingNow,
    /// 1-based position in the pending queue.
    Queued(usize),
}

/// Why the voice layer stopped feeding the current source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    NaturalEnd,
    /// Stopped by someone other than the manager.
    ExplicitStop,
    /// The stream broke mid-playback.
    Error(String),
    /// The source could not be opened at all.
    StartFailed(String),
}

/// What the manager must submit to the voice layer next.
#[derive(Debug, Clone)]
pub enum Advance {
    Replay(Track),
    Next(Track),
    Idle,
}

#[derive(Debug)]
pub struct GuildPlaybackState {
    queue: VecDeque<Track>,
    current: Option<Track>,
    loop_enabled: bool,
    volume: f32,
    max_size: usize,
    token: PlaybackToken,
}

impl GuildPlaybackState {
    pub fn new(max_size: usize, volume: f32) -> Self {
        Self {
            queue: VecDeque::new(),
            current: None,
            loop_enabled: false,
            volume,
            max_size,
            token: 0,
        }
    }

    pub fn token(&self) -> PlaybackToken {
        self.token
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Plays right away when nothing is bound and the voice layer is idle,
    /// otherwise appends to the queue.
    pub fn enqueue(&mut self, track: Track, voice_idle: bool) -> PlayerResult<Enqueued> {
        if self.current.is_none() && voice_idle {
            self.bind(track);
            return Ok(Enqueued::PlayingNow);
        }

        if self.queue.len() >= self.max_size {
            return Err(PlayerError::QueueFull(self.max_size));
        }

        info!("➕ Queued: {}", track.title);
        self.queue.push_back(track);
        Ok(Enqueued::Queued(self.queue.len()))
    }

    /// Advancement after the voice layer reported the end of `token`'s source.
    ///
    /// Returns `None` for stale notifications.
    pub fn finish(&mut self, token: PlaybackToken, reason: &FinishReason) -> Option<Advance> {
        if token != self.token {
            debug!("Ignoring stale finish (token {} != {})", token, self.token);
            return None;
        }

        self.token += 1;
        let Some(finished) = self.current.take() else {
            return Some(Advance::Idle);
        };

        let advance = match reason {
            FinishReason::ExplicitStop | FinishReason::StartFailed(_) => Advance::Idle,
            FinishReason::NaturalEnd | FinishReason::Error(_) if self.loop_enabled => {
                info!("🔂 Replaying: {}", finished.title);
                Advance::Replay(self.bind(finished))
            }
            FinishReason::NaturalEnd | FinishReason::Error(_) => self.advance(),
        };

        Some(advance)
    }

    /// Drops the current track and moves on, ignoring the loop flag.
    pub fn skip(&mut self) -> Advance {
        self.token += 1;
        if let Some(skipped) = self.current.take() {
            info!("⏭️ Skipped: {}", skipped.title);
        }
        self.advance()
    }

    /// Clears everything; calling it again changes nothing.
    pub fn stop(&mut self) {
        self.token += 1;
        self.current = None;
        self.queue.clear();
    }

    /// The bound track could not be started: leave the guild idle.
    pub fn abandon_current(&mut self) -> Option<Track> {
        self.token += 1;
        self.current.take()
    }

    pub fn clear_queue(&mut self) -> usize {
        let removed = self.queue.len();
        self.queue.clear();
        info!("🗑️ Queue cleared ({} removed)", removed);
        removed
    }

    pub fn shuffle(&mut self) -> usize {
        let mut rng = rand::thread_rng();
        self.queue.make_contiguous().shuffle(&mut rng);
        info!("🔀 Queue shuffled");
        self.queue.len()
    }

    pub fn set_loop(&mut self, enabled: bool) {
        self.loop_enabled = enabled;
        if enabled {
            info!("🔂 Loop enabled");
        } else {
            info!("➡️ Loop disabled");
        }
    }

    pub fn toggle_loop(&mut self) -> bool {
        self.set_loop(!self.loop_enabled);
        self.loop_enabled
    }

    pub fn set_volume(&mut self, volume: f32) -> PlayerResult<f32> {
        if !(0.0..=MAX_VOLUME).contains(&volume) {
            return Err(PlayerError::VolumeOutOfRange((volume * 100.0).round() as i64));
        }

        self.volume = volume;
        info!("🔊 Volume set to {}%", (volume * 100.0).round() as u32);
        Ok(volume)
    }

    pub fn info(&self, connected: bool) -> QueueInfo {
        QueueInfo {
            current: self.current.clone(),
            items: self.queue.iter().cloned().collect(),
            loop_enabled: self.loop_enabled,
            volume: self.volume,
            connected,
            total_duration: self.calculate_total_duration(),
        }
    }

    // Private helpers

    fn bind(&mut self, mut track: Track) -> Track {
        track.mark_started();
        self.token += 1;
        self.current = Some(track.clone());
        track
    }

    fn advance(&mut self) -> Advance {
        match self.queue.pop_front() {
            Some(next) => {
                info!("➡️ Next in queue: {}", next.title);
                Advance::Next(self.bind(next))
            }
            None => {
                info!("📭 Queue empty, going idle");
                Advance::Idle
            }
        }
    }

    fn calculate_total_duration(&self) -> Duration {
        let queue_duration: Duration = self.queue.iter().filter_map(|t| t.duration).sum();
        let current_duration = self
            .current
            .as_ref()
            .and_then(|c| c.duration)
            .unwrap_or_default();

        queue_duration + current_duration
    }
}

/// Read-only snapshot used by the queue, now-playing and volume commands.
#[derive(Debug, Clone)]
pub struct QueueInfo {
    pub current: Option<Track>,
    pub items: Vec<Track>,
    pub loop_enabled: bool,
    pub volume: f32,
    pub connected: bool,
    pub total_duration: Duration,
}

impl QueueInfo {
    /// Returns one page of the pending queue (pages start at 1).
    pub fn page(&self, page: usize, items_per_page: usize) -> QueuePage {
        let items_per_page = items_per_page.max(1);
        let total_pages = self.items.len().div_ceil(items_per_page).max(1);
        let current_page = page.clamp(1, total_pages);
        let start = (current_page - 1) * items_per_page;
        let end = (start + items_per_page).min(self.items.len());

        QueuePage {
            items: self.items[start..end].to_vec(),
            first_position: start + 1,
            current_page,
            total_pages,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuePage {
    pub items: Vec<Track>,
    pub first_position: usize,
    pub current_page: usize,
    pub total_pages: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::TrackId;
    use pretty_assertions::assert_eq;
    use serenity::model::id::UserId;

    fn track(title: &str) -> Track {
        Track::new(
            title.to_string(),
            format!("https://cdn.example/{}", title),
            UserId::new(1),
        )
    }

    fn current_title(state: &GuildPlaybackState) -> Option<String> {
        state.current().map(|t| t.title.clone())
    }

    fn queued_titles(state: &GuildPlaybackState) -> Vec<String> {
        state.info(true).items.into_iter().map(|t| t.title).collect()
    }

    fn assert_disjoint(state: &GuildPlaybackState) {
        if let Some(current) = state.current() {
            let ids: Vec<TrackId> = state.info(true).items.iter().map(|t| t.id).collect();
            assert!(!ids.contains(&current.id));
        }
    }

    fn natural_end(state: &mut GuildPlaybackState) -> Option<Advance> {
        let token = state.token();
        state.finish(token, &FinishReason::NaturalEnd)
    }

    #[test]
    fn first_enqueue_plays_then_positions_increase() {
        let mut state = GuildPlaybackState::new(100, 1.0);

        assert_eq!(state.enqueue(track("a"), true).unwrap(), Enqueued::PlayingNow);
        for (i, title) in ["b", "c", "d", "e"].iter().enumerate() {
            // once something is bound the voice layer is no longer idle
            let result = state.enqueue(track(title), false).unwrap();
            assert_eq!(result, Enqueued::Queued(i + 1));
            assert_disjoint(&state);
        }
        assert_eq!(current_title(&state).as_deref(), Some("a"));
    }

    #[test]
    fn busy_voice_layer_queues_even_without_current() {
        let mut state = GuildPlaybackState::new(100, 1.0);
        assert_eq!(state.enqueue(track("a"), false).unwrap(), Enqueued::Queued(1));
        assert!(state.current().is_none());
    }

    #[test]
    fn fifo_order_then_idle() {
        let mut state = GuildPlaybackState::new(100, 1.0);
        state.enqueue(track("t"), true).unwrap();
        for title in ["a", "b", "c"] {
            state.enqueue(track(title), false).unwrap();
        }

        let mut order = vec![current_title(&state).unwrap()];
        for _ in 0..3 {
            match natural_end(&mut state) {
                Some(Advance::Next(next)) => order.push(next.title),
                other => panic!("expected next track, got {:?}", other),
            }
            assert_disjoint(&state);
        }

        assert_eq!(order, vec!["t", "a", "b", "c"]);
        assert!(matches!(natural_end(&mut state), Some(Advance::Idle)));
        assert!(state.current().is_none());
        assert_eq!(state.len(), 0);
    }

    #[test]
    fn loop_replays_current_and_leaves_queue_alone() {
        let mut state = GuildPlaybackState::new(100, 1.0);
        state.enqueue(track("t"), true).unwrap();
        state.enqueue(track("a"), false).unwrap();
        state.set_loop(true);
        let looped = state.current().unwrap().id;

        for _ in 0..5 {
            match natural_end(&mut state) {
                Some(Advance::Replay(replayed)) => assert_eq!(replayed.id, looped),
                other => panic!("expected replay, got {:?}", other),
            }
        }

        assert_eq!(state.current().unwrap().id, looped);
        assert_eq!(state.current().unwrap().starts(), 6);
        assert_eq!(queued_titles(&state), vec!["a"]);
    }

    #[test]
    fn playback_errors_advance_like_natural_end() {
        let mut state = GuildPlaybackState::new(100, 1.0);
        state.enqueue(track("t"), true).unwrap();
        state.enqueue(track("a"), false).unwrap();

        let token = state.token();
        let advance = state.finish(token, &FinishReason::Error("stream interrupted".into()));
        assert!(matches!(advance, Some(Advance::Next(t)) if t.title == "a"));
    }

    #[test]
    fn start_failure_goes_idle_and_keeps_queue() {
        let mut state = GuildPlaybackState::new(100, 1.0);
        state.enqueue(track("t"), true).unwrap();
        state.enqueue(track("a"), false).unwrap();
        state.set_loop(true);

        let token = state.token();
        let advance = state.finish(token, &FinishReason::StartFailed("403".into()));
        assert!(matches!(advance, Some(Advance::Idle)));
        assert!(state.current().is_none());
        assert_eq!(queued_titles(&state), vec!["a"]);
    }

    #[test]
    fn foreign_stop_does_not_auto_advance() {
        let mut state = GuildPlaybackState::new(100, 1.0);
        state.enqueue(track("t"), true).unwrap();
        state.enqueue(track("a"), false).unwrap();

        let token = state.token();
        assert!(matches!(
            state.finish(token, &FinishReason::ExplicitStop),
            Some(Advance::Idle)
        ));
        assert_eq!(queued_titles(&state), vec!["a"]);
    }

    #[test]
    fn stale_finish_is_ignored() {
        let mut state = GuildPlaybackState::new(100, 1.0);
        state.enqueue(track("song1"), true).unwrap();
        state.enqueue(track("song2"), false).unwrap();
        let old_token = state.token();

        assert!(matches!(state.skip(), Advance::Next(t) if t.title == "song2"));

        // the stop issued by skip reports late with the old token
        assert!(state.finish(old_token, &FinishReason::ExplicitStop).is_none());
        assert_eq!(current_title(&state).as_deref(), Some("song2"));
    }

    #[test]
    fn skip_scenario_moves_to_next_song() {
        let mut state = GuildPlaybackState::new(100, 1.0);
        assert_eq!(state.enqueue(track("song1"), true).unwrap(), Enqueued::PlayingNow);
        assert_eq!(state.enqueue(track("song2"), false).unwrap(), Enqueued::Queued(1));

        state.skip();

        assert_eq!(current_title(&state).as_deref(), Some("song2"));
        assert_eq!(state.len(), 0);
    }

    #[test]
    fn skip_ignores_loop_and_can_go_idle() {
        let mut state = GuildPlaybackState::new(100, 1.0);
        state.enqueue(track("t"), true).unwrap();
        state.set_loop(true);

        assert!(matches!(state.skip(), Advance::Idle));
        assert!(state.current().is_none());
    }

    #[test]
    fn stop_is_idempotent() {
        let mut state = GuildPlaybackState::new(100, 1.0);
        state.enqueue(track("t"), true).unwrap();
        state.enqueue(track("a"), false).unwrap();

        state.stop();
        let once = (current_title(&state), queued_titles(&state));
        state.stop();
        let twice = (current_title(&state), queued_titles(&state));

        assert_eq!(once, (None, vec![]));
        assert_eq!(once, twice);
    }

    #[test]
    fn queue_full_is_rejected_without_mutation() {
        let mut state = GuildPlaybackState::new(1, 1.0);
        state.enqueue(track("t"), true).unwrap();
        state.enqueue(track("a"), false).unwrap();

        let err = state.enqueue(track("b"), false).unwrap_err();
        assert!(matches!(err, PlayerError::QueueFull(1)));
        assert_eq!(queued_titles(&state), vec!["a"]);
    }

    #[test]
    fn volume_is_bounded() {
        let mut state = GuildPlaybackState::new(10, 1.0);

        let err = state.set_volume(3.0).unwrap_err();
        assert!(matches!(err, PlayerError::VolumeOutOfRange(300)));
        assert_eq!(state.volume(), 1.0);

        assert_eq!(state.set_volume(0.5).unwrap(), 0.5);
        assert_eq!(state.volume(), 0.5);
        assert!(state.set_volume(-0.1).is_err());
        assert!(state.set_volume(f32::NAN).is_err());
    }

    #[test]
    fn shuffle_keeps_the_same_tracks() {
        let mut state = GuildPlaybackState::new(100, 1.0);
        state.enqueue(track("t"), true).unwrap();
        for i in 0..20 {
            state.enqueue(track(&i.to_string()), false).unwrap();
        }

        assert_eq!(state.shuffle(), 20);

        let mut titles = queued_titles(&state);
        titles.sort_by_key(|t| t.parse::<u32>().unwrap());
        let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        assert_eq!(titles, expected);
        assert_eq!(current_title(&state).as_deref(), Some("t"));
    }

    #[test]
    fn toggling_loop_and_clearing() {
        let mut state = GuildPlaybackState::new(100, 1.0);
        assert!(state.toggle_loop());
        assert!(!state.toggle_loop());

        state.enqueue(track("t"), true).unwrap();
        state.enqueue(track("a"), false).unwrap();
        state.enqueue(track("b"), false).unwrap();
        assert_eq!(state.clear_queue(), 2);
        assert_eq!(current_title(&state).as_deref(), Some("t"));
    }

    #[test]
    fn pages_are_clamped() {
        let mut state = GuildPlaybackState::new(100, 1.0);
        state.enqueue(track("t"), true).unwrap();
        for i in 0..12 {
            state.enqueue(track(&i.to_string()), false).unwrap();
        }
        let info = state.info(true);

        let second = info.page(2, 10);
        assert_eq!(second.items.len(), 2);
        assert_eq!(second.first_position, 11);
        assert_eq!(second.total_pages, 2);

        assert_eq!(info.page(0, 10).current_page, 1);
        assert_eq!(info.page(99, 10).current_page, 2);

        let empty = GuildPlaybackState::new(1, 1.0).info(false);
        let page = empty.page(3, 10);
        assert_eq!((page.current_page, page.total_pages, page.items.len()), (1, 1, 0));
    }
}
