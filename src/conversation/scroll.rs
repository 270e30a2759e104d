//! Viewport observation: autoload near the top, follow new content at the bottom.

use serde::{Deserialize, Serialize};

/// Thresholds, as multiples of the viewport height.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScrollPolicy {
    /// Load older history when closer than this many viewports to the top.
    pub near_top_factor: f64,
    /// Follow new content when closer than this fraction of a viewport to the bottom.
    pub scroll_lock_factor: f64,
}

impl Default for ScrollPolicy {
    fn default() -> Self {
        Self {
            near_top_factor: 2.0,
            scroll_lock_factor: 0.3,
        }
    }
}

/// Scroll geometry reported by the viewport.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ScrollMetrics {
    /// Distance scrolled from the top.
    pub scroll_top: f64,
    /// Total content height.
    pub scroll_height: f64,
    /// Visible height.
    pub client_height: f64,
}

impl ScrollMetrics {
    /// Build metrics from raw values.
    #[must_use]
    pub const fn new(scroll_top: f64, scroll_height: f64, client_height: f64) -> Self {
        Self {
            scroll_top,
            scroll_height,
            client_height,
        }
    }

    /// Whether the content is taller than the viewport.
    #[must_use]
    pub fn overflows(&self) -> bool {
        self.scroll_height > self.client_height
    }

    /// Distance between the bottom of the viewport and the end of the content.
    #[must_use]
    pub fn distance_from_bottom(&self) -> f64 {
        (self.scroll_height - self.scroll_top - self.client_height).max(0.0)
    }

    /// Scroll offset that shows the end of the content.
    #[must_use]
    pub fn bottom_offset(&self) -> f64 {
        (self.scroll_height - self.client_height).max(0.0)
    }
}

/// Flags derived from the latest viewport notification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ViewportState {
    /// Older history should be requested.
    pub near_top: bool,
    /// New content should keep the view pinned to the bottom.
    pub scroll_locked: bool,
}

/// Tracks the viewport and decides on autoload and auto-scroll.
#[derive(Debug)]
pub struct ScrollCoordinator {
    policy: ScrollPolicy,
    state: ViewportState,
}

impl ScrollCoordinator {
    /// Create a coordinator. Starts scroll-locked so the first page lands at the bottom.
    #[must_use]
    pub const fn new(policy: ScrollPolicy) -> Self {
        Self {
            policy,
            state: ViewportState {
                near_top: false,
                scroll_locked: true,
            },
        }
    }

    /// Recompute both flags from fresh metrics.
    pub fn observe(&mut self, metrics: ScrollMetrics) -> ViewportState {
        let near_top = !metrics.overflows()
            || metrics.scroll_top < self.policy.near_top_factor * metrics.client_height;
        let scroll_locked =
            metrics.distance_from_bottom() < self.policy.scroll_lock_factor * metrics.client_height;
        self.state = ViewportState {
            near_top,
            scroll_locked,
        };
        self.state
    }

    /// Latest flags.
    #[must_use]
    pub const fn state(&self) -> ViewportState {
        self.state
    }

    /// Target offset after history or draft height changed.
    ///
    /// `Some(offset)` forces the view to the bottom; `None` leaves the user's
    /// position untouched.
    #[must_use]
    pub fn follow(&self, metrics: ScrollMetrics) -> Option<f64> {
        self.state.scroll_locked.then(|| metrics.bottom_offset())
    }
}

impl Default for ScrollCoordinator {
    fn default() -> Self {
        Self::new(ScrollPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_content_counts_as_near_top() {
        let mut coordinator = ScrollCoordinator::default();
        let state = coordinator.observe(ScrollMetrics::new(0.0, 300.0, 500.0));
        assert!(state.near_top);
        assert!(state.scroll_locked);
    }

    #[test]
    fn test_near_top_threshold() {
        let mut coordinator = ScrollCoordinator::default();
        assert!(coordinator.observe(ScrollMetrics::new(999.0, 10_000.0, 500.0)).near_top);
        assert!(!coordinator.observe(ScrollMetrics::new(1000.0, 10_000.0, 500.0)).near_top);
    }

    #[test]
    fn test_scroll_lock_threshold() {
        let mut coordinator = ScrollCoordinator::default();
        // 100px from the bottom, under 0.3 * 500
        assert!(coordinator.observe(ScrollMetrics::new(9400.0, 10_000.0, 500.0)).scroll_locked);
        // 200px from the bottom
        assert!(!coordinator.observe(ScrollMetrics::new(9300.0, 10_000.0, 500.0)).scroll_locked);
    }

    #[test]
    fn test_follow_when_locked() {
        let mut coordinator = ScrollCoordinator::default();
        coordinator.observe(ScrollMetrics::new(9500.0, 10_000.0, 500.0));
        // a message was appended and the content grew
        let grown = ScrollMetrics::new(9500.0, 10_400.0, 500.0);
        assert_eq!(coordinator.follow(grown), Some(9900.0));
    }

    #[test]
    fn test_user_position_preserved_when_unlocked() {
        let mut coordinator = ScrollCoordinator::default();
        coordinator.observe(ScrollMetrics::new(4000.0, 10_000.0, 500.0));
        let grown = ScrollMetrics::new(4000.0, 10_400.0, 500.0);
        assert_eq!(coordinator.follow(grown), None);
    }

    #[test]
    fn test_custom_policy() {
        let mut coordinator = ScrollCoordinator::new(ScrollPolicy {
            near_top_factor: 0.5,
            scroll_lock_factor: 1.0,
        });
        let state = coordinator.observe(ScrollMetrics::new(300.0, 10_000.0, 500.0));
        assert!(!state.near_top);
        assert!(!state.scroll_locked);
    }
}
