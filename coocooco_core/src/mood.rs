//! Process-wide rage meter shared by every bird on the field.
//!
//! One writer (the dialogue pipeline closing a session) and many readers
//! (agents and UI, once per tick). Values are published through atomics so
//! readers never block; a reader may observe the previous value for one
//! tick, which is fine for a behavioral gauge.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::config::MoodConfig;

pub type SharedMood = Arc<MoodState>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoodSnapshot {
    pub rage_level: f32,
    pub max_rage: f32,
    pub crashout: bool,
}

impl MoodSnapshot {
    /// Meter fill in `[0, 1]`.
    pub fn fraction(&self) -> f32 {
        if self.max_rage <= 0.0 {
            return 0.0;
        }
        (self.rage_level / self.max_rage).clamp(0.0, 1.0)
    }
}

#[derive(Debug)]
pub struct MoodState {
    rage_bits: AtomicU32,
    crashout: AtomicBool,
    max_rage: f32,
    epsilon: f32,
}

impl MoodState {
    pub fn new(config: &MoodConfig) -> Self {
        let max_rage = config.max_rage.max(0.0);
        let initial = config.initial_rage.clamp(0.0, max_rage);
        let state = Self {
            rage_bits: AtomicU32::new(initial.to_bits()),
            crashout: AtomicBool::new(false),
            max_rage,
            epsilon: config.crashout_epsilon.max(0.0),
        };
        if initial >= max_rage - state.epsilon {
            state.crashout.store(true, Ordering::Release);
        }
        state
    }

    pub fn shared(config: &MoodConfig) -> SharedMood {
        Arc::new(Self::new(config))
    }

    pub fn rage_level(&self) -> f32 {
        f32::from_bits(self.rage_bits.load(Ordering::Acquire))
    }

    pub fn max_rage(&self) -> f32 {
        self.max_rage
    }

    pub fn is_crashout(&self) -> bool {
        self.crashout.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> MoodSnapshot {
        MoodSnapshot {
            rage_level: self.rage_level(),
            max_rage: self.max_rage,
            crashout: self.is_crashout(),
        }
    }

    /// Raises the rage level. Ignored once crashout is active; negative and
    /// non-finite amounts are ignored so the level never decreases here.
    pub fn add(&self, amount: f32) {
        if self.is_crashout() {
            return;
        }
        if !amount.is_finite() || amount <= 0.0 {
            return;
        }

        let level = (self.rage_level() + amount).min(self.max_rage);
        self.rage_bits.store(level.to_bits(), Ordering::Release);

        if level >= self.max_rage - self.epsilon {
            self.crashout.store(true, Ordering::Release);
            tracing::warn!(
                "CRASHOUT: rage meter saturated at {:.2}/{:.2}",
                level,
                self.max_rage
            );
        }
    }

    pub fn reset(&self) {
        self.rage_bits.store(0.0_f32.to_bits(), Ordering::Release);
        self.crashout.store(false, Ordering::Release);
        tracing::info!("Rage meter reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mood(max: f32) -> MoodState {
        MoodState::new(&MoodConfig {
            max_rage: max,
            initial_rage: 0.0,
            crashout_epsilon: 0.01,
        })
    }

    #[test]
    fn add_is_a_no_op_once_saturated() {
        let state = mood(100.0);
        state.add(150.0);
        assert!(state.is_crashout());
        assert_eq!(state.rage_level(), 100.0);

        for _ in 0..10 {
            state.add(5.0);
        }
        let snapshot = state.snapshot();
        assert_eq!(snapshot.rage_level, 100.0);
        assert!(snapshot.crashout);
    }

    #[test]
    fn crashout_triggers_exactly_at_threshold() {
        let state = mood(100.0);
        state.add(150.0);
        state.reset();
        assert!(!state.is_crashout());
        assert_eq!(state.rage_level(), 0.0);

        state.add(99.0);
        assert!(!state.is_crashout());
        state.add(0.98);
        assert!(!state.is_crashout());

        state.reset();
        state.add(100.0 - 0.01);
        assert!(state.is_crashout());
    }

    #[test]
    fn negative_amounts_never_lower_the_level() {
        let state = mood(100.0);
        state.add(40.0);
        state.add(-30.0);
        state.add(f32::NAN);
        assert_eq!(state.rage_level(), 40.0);
    }

    #[test]
    fn initial_level_at_max_starts_in_crashout() {
        let state = MoodState::new(&MoodConfig {
            max_rage: 10.0,
            initial_rage: 25.0,
            crashout_epsilon: 0.01,
        });
        assert!(state.is_crashout());
        assert_eq!(state.rage_level(), 10.0);
        assert_eq!(state.snapshot().fraction(), 1.0);
    }
}
