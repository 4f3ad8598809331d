//! Slideshow playback over the completed panels of a project.
//!
//! Pure state machine: the host drives time through [`Slideshow::tick`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::storyboard::model::{Panel, Project};

pub const DEFAULT_INTERVAL_MS: u64 = 2000;
pub const MIN_INTERVAL_MS: u64 = 500;
pub const MAX_INTERVAL_MS: u64 = 5000;
pub const INTERVAL_STEP_MS: u64 = 500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Playing,
    Paused,
}

/// Clamps to the allowed bounds and snaps to the nearest step.
pub fn normalize_interval(ms: u64) -> u64 {
    let snapped = (ms + INTERVAL_STEP_MS / 2) / INTERVAL_STEP_MS * INTERVAL_STEP_MS;
    snapped.clamp(MIN_INTERVAL_MS, MAX_INTERVAL_MS)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Slideshow {
    panels: Vec<Panel>,
    index: usize,
    state: PlaybackState,
    interval_ms: u64,
    /// Time accumulated towards the next advance.
    elapsed: Duration,
}

impl Slideshow {
    /// Builds a slideshow from the complete panels among `panels`, in order.
    pub fn new(panels: impl IntoIterator<Item = Panel>) -> Self {
        Self {
            panels: panels.into_iter().filter(Panel::is_complete).collect(),
            index: 0,
            state: PlaybackState::Playing,
            interval_ms: DEFAULT_INTERVAL_MS,
            elapsed: Duration::ZERO,
        }
    }

    pub fn from_project(project: &Project) -> Self {
        Self::new(project.panels.iter().cloned())
    }

    pub fn len(&self) -> usize {
        self.panels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panels.is_empty()
    }

    pub fn panels(&self) -> &[Panel] {
        &self.panels
    }

    pub fn current(&self) -> Option<&Panel> {
        self.panels.get(self.index)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    // =========================================================================
    // PLAYBACK
    // =========================================================================

    pub fn play(&mut self) {
        if self.is_empty() || self.is_playing() {
            return;
        }
        self.state = PlaybackState::Playing;
        self.elapsed = Duration::ZERO;
    }

    pub fn pause(&mut self) {
        if self.is_empty() {
            return;
        }
        self.state = PlaybackState::Paused;
    }

    pub fn toggle(&mut self) {
        match self.state {
            PlaybackState::Playing => self.pause(),
            PlaybackState::Paused => self.play(),
        }
    }

    /// Moves to the next panel, wrapping to the first. Playback state is kept.
    pub fn next(&mut self) {
        if self.is_empty() {
            return;
        }
        self.index = (self.index + 1) % self.panels.len();
    }

    /// Moves to the previous panel, wrapping to the last. Playback state is kept.
    pub fn previous(&mut self) {
        if self.is_empty() {
            return;
        }
        self.index = (self.index + self.panels.len() - 1) % self.panels.len();
    }

    /// Advances time. Returns how many panels were advanced.
    pub fn tick(&mut self, elapsed: Duration) -> usize {
        if self.is_empty() || !self.is_playing() {
            return 0;
        }
        self.elapsed = self.elapsed.saturating_add(elapsed);
        let interval = u128::from(self.interval_ms);
        let elapsed_ms = self.elapsed.as_millis();
        let steps = elapsed_ms / interval;
        if steps == 0 {
            return 0;
        }
        // Keep the sub-interval remainder, including sub-millisecond time.
        let remainder = (elapsed_ms % interval) as u64;
        let sub_ms = self.elapsed.subsec_nanos() % 1_000_000;
        self.elapsed = Duration::from_millis(remainder) + Duration::from_nanos(u64::from(sub_ms));
        let len = self.panels.len();
        self.index = (self.index + (steps % len as u128) as usize) % len;
        usize::try_from(steps).unwrap_or(usize::MAX)
    }

    // =========================================================================
    // SPEED
    // =========================================================================

    /// Sets the interval, clamped and snapped. Restarts the countdown.
    pub fn set_interval(&mut self, ms: u64) {
        if self.is_empty() {
            return;
        }
        self.interval_ms = normalize_interval(ms);
        self.elapsed = Duration::ZERO;
    }

    /// Shortens the interval by one step.
    pub fn faster(&mut self) {
        self.set_interval(self.interval_ms.saturating_sub(INTERVAL_STEP_MS));
    }

    /// Lengthens the interval by one step.
    pub fn slower(&mut self) {
        self.set_interval(self.interval_ms + INTERVAL_STEP_MS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storyboard::model::PanelImage;

    fn complete(id: i32) -> Panel {
        Panel::new(id, "wide", format!("p{id}"), "").with_image(PanelImage::new("image/png", "QUJD"))
    }

    fn show(n: i32) -> Slideshow {
        Slideshow::new((1..=n).map(complete))
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_starts_playing_at_first_panel() {
        let s = show(4);
        assert!(s.is_playing());
        assert_eq!(s.index(), 0);
        assert_eq!(s.interval_ms(), DEFAULT_INTERVAL_MS);
        assert_eq!(s.current().unwrap().panel_id, 1);
    }

    #[test]
    fn test_only_complete_panels_are_shown() {
        let mut pending = Panel::new(2, "wide", "p2", "");
        pending.begin_generation();
        let s = Slideshow::new(vec![complete(1), pending, complete(3)]);
        let ids: Vec<i32> = s.panels().iter().map(|p| p.panel_id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_next_and_previous_wrap() {
        let mut s = show(4);
        s.previous();
        assert_eq!(s.current().unwrap().panel_id, 4);
        s.next();
        assert_eq!(s.current().unwrap().panel_id, 1);
        for _ in 0..5 {
            s.next();
        }
        assert_eq!(s.current().unwrap().panel_id, 2);
    }

    #[test]
    fn test_navigation_keeps_playback_state() {
        let mut s = show(3);
        s.pause();
        s.next();
        s.previous();
        assert_eq!(s.state(), PlaybackState::Paused);
    }

    #[test]
    fn test_tick_advances_per_full_interval() {
        let mut s = show(4);
        assert_eq!(s.tick(ms(1999)), 0);
        assert_eq!(s.tick(ms(1)), 1);
        assert_eq!(s.index(), 1);
        assert_eq!(s.tick(ms(4500)), 2);
        assert_eq!(s.index(), 3);
        assert_eq!(s.tick(ms(1500)), 1);
        assert_eq!(s.index(), 0);
    }

    #[test]
    fn test_huge_tick_wraps_without_looping() {
        let mut s = show(4);
        s.tick(ms(1000));
        let advanced = s.tick(Duration::MAX);
        assert!(advanced > 0);
        assert!(s.index() < 4);

        // Elapsed saturates instead of overflowing.
        s.tick(Duration::MAX);
        assert!(s.index() < 4);

        let mut s = show(3);
        assert_eq!(s.tick(ms(2000 * 7 + 10)), 7);
        assert_eq!(s.index(), 1);
        assert_eq!(s.tick(ms(1990)), 1);
        assert_eq!(s.index(), 2);
    }

    #[test]
    fn test_paused_does_not_advance() {
        let mut s = show(4);
        s.toggle();
        assert_eq!(s.tick(ms(10_000)), 0);
        assert_eq!(s.index(), 0);
    }

    #[test]
    fn test_resume_restarts_countdown() {
        let mut s = show(4);
        s.tick(ms(1500));
        s.pause();
        s.play();
        assert_eq!(s.tick(ms(1500)), 0);
        assert_eq!(s.tick(ms(500)), 1);
    }

    #[test]
    fn test_interval_bounds_and_steps() {
        let mut s = show(2);
        for _ in 0..10 {
            s.faster();
        }
        assert_eq!(s.interval_ms(), MIN_INTERVAL_MS);
        for _ in 0..20 {
            s.slower();
        }
        assert_eq!(s.interval_ms(), MAX_INTERVAL_MS);
        s.set_interval(1240);
        assert_eq!(s.interval_ms(), 1000);
        s.set_interval(1250);
        assert_eq!(s.interval_ms(), 1500);
        s.set_interval(0);
        assert_eq!(s.interval_ms(), 500);
    }

    #[test]
    fn test_interval_change_applies_to_next_advance() {
        let mut s = show(4);
        s.tick(ms(1900));
        s.set_interval(500);
        assert_eq!(s.tick(ms(499)), 0);
        assert_eq!(s.tick(ms(1)), 1);
    }

    #[test]
    fn test_empty_slideshow_is_inert() {
        let mut s = Slideshow::new(Vec::new());
        assert!(s.current().is_none());
        s.next();
        s.previous();
        s.toggle();
        s.faster();
        assert_eq!(s.tick(ms(10_000)), 0);
        assert_eq!(s.index(), 0);
        assert_eq!(s.interval_ms(), DEFAULT_INTERVAL_MS);
    }
}
