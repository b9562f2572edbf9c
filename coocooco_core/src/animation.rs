use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Facing {
    Left,
    #[default]
    Right,
}

impl Facing {
    /// Facing implied by a horizontal displacement; `None` when there is none.
    pub fn from_dx(dx: f32) -> Option<Facing> {
        if dx > 0.0 {
            Some(Facing::Right)
        } else if dx < 0.0 {
            Some(Facing::Left)
        } else {
            None
        }
    }
}

/// Looping frame cursor for a strip animation.
///
/// Advances one tick at a time, wraps at the end of the cycle, and can be
/// peeked without moving. A zero-length loop always reports frame 0, so
/// renderers can keep drawing whatever frame they last had.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLoop {
    frame_count: usize,
    ticks_per_frame: u32,
    frame: usize,
    ticks: u32,
}

impl FrameLoop {
    pub fn new(frame_count: usize, ticks_per_frame: u32) -> Self {
        Self {
            frame_count,
            ticks_per_frame: ticks_per_frame.max(1),
            frame: 0,
            ticks: 0,
        }
    }

    pub fn current(&self) -> usize {
        self.frame
    }

    pub fn advance(&mut self) {
        if self.frame_count <= 1 {
            return;
        }
        self.ticks += 1;
        if self.ticks >= self.ticks_per_frame {
            self.ticks = 0;
            self.frame = (self.frame + 1) % self.frame_count;
        }
    }

    pub fn restart(&mut self) {
        self.frame = 0;
        self.ticks = 0;
    }
}
