//! Per-bird behavior state machine.
//!
//! Each tick runs in a fixed order:
//! 1. Crashout check against the shared mood. While crashout is active the
//!    bird only vibrates around its ground-anchored base and nothing else
//!    runs. This is an override, not a stored state.
//! 2. Pause check (dialogue card open on this bird).
//! 3. The stored state: Idle, Moving, or one of the event states.

use rand::Rng;

use crate::animation::{Facing, FrameLoop};
use crate::config::WorldConfig;
use crate::events::{random_event, EventDescriptor, EventKind};
use crate::geometry::{Rect, Vec2, WorldBounds};
use crate::mood::MoodState;
use crate::storage::BirdRecord;

/// Frames per strip in the bundled sprite sheets.
pub const STRIP_FRAMES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BehaviorState {
    Idle,
    Moving,
    EventHappy,
    EventSad,
    EventAngry,
}

impl BehaviorState {
    pub fn for_event(kind: EventKind) -> Self {
        match kind {
            EventKind::Happy => BehaviorState::EventHappy,
            EventKind::Sad => BehaviorState::EventSad,
            EventKind::Angry => BehaviorState::EventAngry,
        }
    }

    pub fn event_kind(self) -> Option<EventKind> {
        match self {
            BehaviorState::EventHappy => Some(EventKind::Happy),
            BehaviorState::EventSad => Some(EventKind::Sad),
            BehaviorState::EventAngry => Some(EventKind::Angry),
            BehaviorState::Idle | BehaviorState::Moving => None,
        }
    }

    pub fn is_event(self) -> bool {
        self.event_kind().is_some()
    }

    /// Transition table. Events are entered from Idle (or from Moving when
    /// forced by the caller) and always exit to Idle.
    pub fn allows(self, next: BehaviorState) -> bool {
        use BehaviorState::*;
        match (self, next) {
            (Idle, Moving) | (Moving, Idle) => true,
            (Idle | Moving, EventHappy | EventSad | EventAngry) => true,
            (EventHappy | EventSad | EventAngry, Idle) => true,
            (a, b) => a == b,
        }
    }
}

/// Which sprite family a renderer should draw for the agent this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpriteKey {
    Walk(Facing),
    Stand(Facing),
    Mad,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentVisual {
    pub sprite: SpriteKey,
    pub frame: usize,
    pub overlay: Option<(EventKind, usize)>,
    /// Top-left in world space, jitter included.
    pub position: Vec2,
    pub size: Vec2,
}

pub struct Agent {
    record: BirdRecord,
    bounds: WorldBounds,
    tuning: WorldConfig,
    size: Vec2,
    ground_y: f32,
    position: Vec2,
    target: Option<Vec2>,
    state: BehaviorState,
    idle_countdown: f32,
    event_countdown: f32,
    current_event: Option<&'static EventDescriptor>,
    facing: Facing,
    paused: bool,
    raging: bool,
    jitter: Vec2,
    walk: FrameLoop,
    mad: FrameLoop,
    overlay: FrameLoop,
}

impl Agent {
    /// Creates an agent standing on the ground at `start_x` and immediately
    /// starts it hopping toward a first target.
    pub fn new<R: Rng + ?Sized>(
        record: BirdRecord,
        bounds: WorldBounds,
        size: Vec2,
        start_x: f32,
        tuning: &WorldConfig,
        rng: &mut R,
    ) -> Self {
        let ground_y = bounds.height * tuning.ground_fraction;
        let mut agent = Self {
            record,
            bounds,
            tuning: tuning.clone(),
            size,
            ground_y,
            position: Vec2::ZERO,
            target: None,
            state: BehaviorState::Idle,
            idle_countdown: 0.0,
            event_countdown: 0.0,
            current_event: None,
            facing: Facing::Right,
            paused: false,
            raging: false,
            jitter: Vec2::ZERO,
            walk: FrameLoop::new(STRIP_FRAMES, tuning.ticks_per_frame),
            mad: FrameLoop::new(STRIP_FRAMES, tuning.ticks_per_frame),
            overlay: FrameLoop::new(STRIP_FRAMES, tuning.ticks_per_frame),
        };
        agent.position = Vec2::new(bounds.clamp_x(start_x, size.x), agent.base_y());
        agent.pick_new_target(rng);
        agent
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn record(&self) -> &BirdRecord {
        &self.record
    }

    pub fn set_record(&mut self, record: BirdRecord) {
        self.record = record;
    }

    pub fn state(&self) -> BehaviorState {
        self.state
    }

    pub fn current_event(&self) -> Option<&'static EventDescriptor> {
        self.current_event
    }

    pub fn position(&self) -> Vec2 {
        self.position
    }

    pub fn target(&self) -> Option<Vec2> {
        self.target
    }

    pub fn size(&self) -> Vec2 {
        self.size
    }

    pub fn facing(&self) -> Facing {
        self.facing
    }

    pub fn bounds(&self) -> WorldBounds {
        self.bounds
    }

    pub fn idle_countdown(&self) -> f32 {
        self.idle_countdown
    }

    pub fn event_countdown(&self) -> f32 {
        self.event_countdown
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_raging(&self) -> bool {
        self.raging
    }

    /// Ground-anchored top edge for the agent's current size.
    pub fn base_y(&self) -> f32 {
        (self.ground_y - self.size.y).max(0.0)
    }

    /// Drawn position: the logical position plus any crashout jitter.
    pub fn draw_position(&self) -> Vec2 {
        self.position + self.jitter
    }

    pub fn hit_rect(&self) -> Rect {
        Rect {
            min: self.draw_position(),
            size: self.size,
        }
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn update<R: Rng + ?Sized>(&mut self, dt: f32, mood: &MoodState, rng: &mut R) {
        if mood.is_crashout() {
            self.rage_tick(rng);
            return;
        }
        if self.raging {
            self.raging = false;
            self.jitter = Vec2::ZERO;
            self.mad.restart();
        }

        if self.paused {
            return;
        }

        match self.state {
            BehaviorState::Moving => self.tick_moving(dt, rng),
            BehaviorState::Idle => self.tick_idle(dt, rng),
            BehaviorState::EventHappy | BehaviorState::EventSad | BehaviorState::EventAngry => {
                self.tick_event(dt, rng)
            }
        }
    }

    fn rage_tick<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.raging = true;
        self.position.y = self.base_y();
        let r = self.tuning.jitter_radius.max(0.0);
        self.jitter = if r > 0.0 {
            Vec2::new(rng.random_range(-r..=r), rng.random_range(-r..=r))
        } else {
            Vec2::ZERO
        };
        self.mad.advance();
    }

    fn tick_moving<R: Rng + ?Sized>(&mut self, dt: f32, rng: &mut R) {
        self.walk.advance();
        self.position.y = self.base_y();

        let Some(target) = self.target else {
            self.enter_idle(rng);
            return;
        };

        let delta = target - self.position;
        let distance = delta.length();
        if distance < self.tuning.arrival_epsilon {
            self.position = target;
            self.target = None;
            self.enter_idle(rng);
        } else {
            let step = (self.tuning.speed * dt).min(distance);
            self.position += delta.normalized() * step;
        }
    }

    fn tick_idle<R: Rng + ?Sized>(&mut self, dt: f32, rng: &mut R) {
        self.position.y = self.base_y();

        let probability = self.tuning.event_probability.clamp(0.0, 1.0);
        if probability > 0.0 && rng.random_bool(probability) {
            self.trigger_random_event(rng);
        }

        self.idle_countdown -= dt;
        if self.idle_countdown <= 0.0 {
            self.begin_moving(rng);
        }
    }

    fn tick_event<R: Rng + ?Sized>(&mut self, dt: f32, rng: &mut R) {
        self.event_countdown -= dt;
        if self.event_countdown <= 0.0 {
            self.end_event(rng);
            return;
        }

        self.walk.advance();
        self.overlay.advance();
        self.position.y = self.base_y();

        let target = match self.target {
            Some(target) => target,
            None => {
                self.pick_new_target(rng);
                match self.target {
                    Some(target) => target,
                    None => return,
                }
            }
        };

        let delta = target - self.position;
        let distance = delta.length();
        if distance < self.tuning.arrival_epsilon {
            self.pick_new_target(rng);
        } else {
            let speed = self.tuning.speed * self.tuning.event_speed_multiplier;
            let step = (speed * dt).min(distance);
            self.position += delta.normalized() * step;
            if let Some(facing) = Facing::from_dx(delta.x) {
                self.facing = facing;
            }
        }
    }

    fn set_state(&mut self, next: BehaviorState) {
        if self.state == next {
            return;
        }
        if !self.state.allows(next) {
            tracing::warn!(
                "Bird {} ignored transition {:?} -> {:?}",
                self.record.id,
                self.state,
                next
            );
            return;
        }
        tracing::trace!("Bird {}: {:?} -> {:?}", self.record.id, self.state, next);
        self.state = next;
    }

    fn enter_idle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.set_state(BehaviorState::Idle);
        self.idle_countdown = random_between(
            rng,
            self.tuning.idle_min_secs,
            self.tuning.idle_max_secs,
        );
    }

    /// Leaves Idle, heading for a target staged at the end of an event if
    /// there is one, else a fresh hop.
    fn begin_moving<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        if self.target.is_none() {
            self.stage_target(rng);
        }
        if !self.state.is_event() {
            self.set_state(BehaviorState::Moving);
        }
    }

    /// Picks a short hop left or right and heads for it. Event states keep
    /// their state and just wander.
    pub fn pick_new_target<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.stage_target(rng);
        if !self.state.is_event() {
            self.set_state(BehaviorState::Moving);
        }
    }

    fn stage_target<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let direction = if rng.random_bool(0.5) { 1.0 } else { -1.0 };
        let distance = random_between(rng, self.tuning.hop_min, self.tuning.hop_max);
        let target_x = self
            .bounds
            .clamp_x(self.position.x + direction * distance, self.size.x);
        self.target = Some(Vec2::new(target_x, self.base_y()));

        // Facing follows the clamped displacement; a hop pinned against a
        // wall keeps the previous facing.
        if let Some(facing) = Facing::from_dx(target_x - self.position.x) {
            self.facing = facing;
            self.walk.restart();
        }
    }

    /// Starts a random mood event. Returns false if one is already running.
    pub fn trigger_random_event<R: Rng + ?Sized>(&mut self, rng: &mut R) -> bool {
        let event = random_event(rng);
        self.start_event(event)
    }

    pub fn start_event(&mut self, event: &'static EventDescriptor) -> bool {
        if self.state.is_event() {
            return false;
        }
        self.set_state(BehaviorState::for_event(event.kind));
        self.current_event = Some(event);
        self.event_countdown = self.tuning.event_duration_secs;
        self.overlay.restart();
        tracing::debug!(
            "Bird {} entered {} event",
            self.record.id,
            event.kind.as_str()
        );
        true
    }

    fn end_event<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.set_state(BehaviorState::Idle);
        self.current_event = None;
        self.event_countdown = 0.0;
        self.overlay.restart();
        // Stage the next hop; the idle branch departs on the next tick.
        self.stage_target(rng);
        self.idle_countdown = 0.0;
    }

    /// Rescales the agent into new world bounds. Horizontal position keeps
    /// its fraction of the world width, vertical snaps to the new ground.
    pub fn resize(&mut self, new_bounds: WorldBounds) {
        let old_width = self.bounds.width;
        let rel_x = if old_width > 0.0 {
            self.position.x / old_width
        } else {
            0.5
        };

        self.bounds = new_bounds;
        self.ground_y = new_bounds.height * self.tuning.ground_fraction;

        let base_y = self.base_y();
        let x = new_bounds.clamp_x(rel_x * new_bounds.width, self.size.x);
        self.position = Vec2::new(x, base_y);

        if let Some(target) = self.target.as_mut() {
            target.x = new_bounds.clamp_x(target.x, self.size.x);
            target.y = base_y;
        }
    }

    pub fn visual(&self) -> AgentVisual {
        let (sprite, frame) = if self.raging {
            (SpriteKey::Mad, self.mad.current())
        } else {
            match self.state {
                BehaviorState::Idle => (SpriteKey::Stand(self.facing), 0),
                _ => (SpriteKey::Walk(self.facing), self.walk.current()),
            }
        };
        let overlay = match (self.raging, self.current_event) {
            (false, Some(event)) => Some((event.kind, self.overlay.current())),
            _ => None,
        };

        AgentVisual {
            sprite,
            frame,
            overlay,
            position: self.draw_position(),
            size: self.size,
        }
    }
}

fn random_between<R: Rng + ?Sized>(rng: &mut R, a: f32, b: f32) -> f32 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    if hi - lo <= f32::EPSILON {
        return lo;
    }
    rng.random_range(lo..=hi)
}
