//! Auto-scroll policy: follow new messages only while the reader is already
//! at the bottom, otherwise count them behind a "new messages" affordance.

/// Geometry of the message list as reported by the view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub scroll_offset: f64,
    pub viewport_height: f64,
    pub content_height: f64,
}

impl Viewport {
    pub fn distance_from_bottom(&self) -> f64 {
        (self.content_height - self.scroll_offset - self.viewport_height).max(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAction {
    FollowLatest,
    ShowNewMessages { unseen: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollState {
    pub near_bottom: bool,
    pub unseen: usize,
}

#[derive(Debug, Clone)]
pub struct ScrollTracker {
    threshold: f64,
    near_bottom: bool,
    unseen: usize,
}

impl ScrollTracker {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            near_bottom: true,
            unseen: 0,
        }
    }

    pub fn viewport_changed(&mut self, viewport: Viewport) {
        self.near_bottom = viewport.distance_from_bottom() <= self.threshold;
        if self.near_bottom {
            self.unseen = 0;
        }
    }

    /// `count` rows from elsewhere were appended.
    pub fn on_arrival(&mut self, count: usize) -> Option<ScrollAction> {
        if count == 0 {
            return None;
        }
        if self.near_bottom {
            Some(ScrollAction::FollowLatest)
        } else {
            self.unseen += count;
            Some(ScrollAction::ShowNewMessages { unseen: self.unseen })
        }
    }

    /// The user's own send always brings the latest message into view.
    pub fn on_local_send(&mut self) -> ScrollAction {
        self.jump_to_latest()
    }

    pub fn jump_to_latest(&mut self) -> ScrollAction {
        self.near_bottom = true;
        self.unseen = 0;
        ScrollAction::FollowLatest
    }

    pub fn state(&self) -> ScrollState {
        ScrollState {
            near_bottom: self.near_bottom,
            unseen: self.unseen,
        }
    }
}
