//! The scrollable world the birds live in.
//!
//! Holds one [`Agent`] per on-field record, converts window-space pointer
//! input into world space, and turns press/release pairs into actions for
//! the screen that owns it.

use std::collections::HashSet;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::agent::Agent;
use crate::config::WorldConfig;
use crate::events::EventDescriptor;
use crate::geometry::{Vec2, WorldBounds};
use crate::mood::MoodState;
use crate::scene::InputEvent;
use crate::storage::BirdRecord;

/// What a completed click on a bird asks the screen to do.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldAction {
    /// Agent is paused; show its info card.
    OpenCard(String),
    /// Agent was mid-event; hand the event over to the event screen.
    OpenEvent {
        record: BirdRecord,
        event: &'static EventDescriptor,
    },
}

/// Press/release pairing: an action fires only if the release lands on the
/// agent that was top-most under the press.
#[derive(Debug, Default)]
pub struct ClickResolver {
    pressed: Option<String>,
}

impl ClickResolver {
    pub fn press(&mut self, hit: Option<&str>) {
        self.pressed = hit.map(str::to_string);
    }

    pub fn release(&mut self, hit: Option<&str>) -> Option<String> {
        let pressed = self.pressed.take()?;
        (hit == Some(pressed.as_str())).then_some(pressed)
    }

    pub fn cancel(&mut self) {
        self.pressed = None;
    }
}

pub struct Field {
    tuning: WorldConfig,
    agents: Vec<Agent>,
    window: Vec2,
    bounds: WorldBounds,
    top_bar_height: f32,
    scroll_x: f32,
    drag_last_x: Option<f32>,
    clicks: ClickResolver,
    selected: Option<String>,
    rng: SmallRng,
}

impl Field {
    pub fn new(tuning: WorldConfig, window: Vec2, top_bar_height: f32) -> Self {
        Self::with_rng(tuning, window, top_bar_height, SmallRng::from_rng(&mut rand::rng()))
    }

    pub fn with_rng(tuning: WorldConfig, window: Vec2, top_bar_height: f32, rng: SmallRng) -> Self {
        let bounds = world_bounds(&tuning, window);
        Self {
            tuning,
            agents: Vec::new(),
            window,
            bounds,
            top_bar_height,
            scroll_x: 0.0,
            drag_last_x: None,
            clicks: ClickResolver::default(),
            selected: None,
            rng,
        }
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn agent(&self, id: &str) -> Option<&Agent> {
        self.agents.iter().find(|agent| agent.id() == id)
    }

    pub fn bounds(&self) -> WorldBounds {
        self.bounds
    }

    pub fn window(&self) -> Vec2 {
        self.window
    }

    pub fn scroll_x(&self) -> f32 {
        self.scroll_x
    }

    pub fn max_scroll(&self) -> f32 {
        (self.bounds.width - self.window.x).max(0.0)
    }

    pub fn selected(&self) -> Option<&Agent> {
        self.selected.as_deref().and_then(|id| self.agent(id))
    }

    pub fn screen_to_world(&self, point: Vec2) -> Vec2 {
        Vec2::new(point.x + self.scroll_x, point.y)
    }

    pub fn world_to_screen(&self, point: Vec2) -> Vec2 {
        Vec2::new(point.x - self.scroll_x, point.y)
    }

    pub fn scroll_by(&mut self, dx: f32) {
        self.scroll_x = (self.scroll_x + dx).clamp(0.0, self.max_scroll());
    }

    /// Rebuilds the agent set from the records currently on the field.
    /// Existing agents keep their position and state and pick up the
    /// refreshed record; agents whose record left the field are dropped.
    pub fn resync<F>(&mut self, records: Vec<BirdRecord>, size_for: F)
    where
        F: Fn(&BirdRecord) -> Vec2,
    {
        let live: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
        let before = self.agents.len();
        self.agents.retain(|agent| live.contains(agent.id()));
        let removed = before - self.agents.len();
        if self
            .selected
            .as_deref()
            .is_some_and(|id| !live.contains(id))
        {
            self.selected = None;
        }

        let mut added = 0;
        for record in records {
            if let Some(agent) = self.agents.iter_mut().find(|a| a.id() == record.id) {
                agent.set_record(record);
                continue;
            }
            let size = size_for(&record);
            let max_x = self.bounds.max_x(size.x);
            let x = if max_x > 0.0 {
                self.rng.random_range(0.0..=max_x)
            } else {
                0.0
            };
            self.spawn_at(record, x, size);
            added += 1;
        }

        tracing::debug!(
            "Field resync: {} agents ({} added, {} removed)",
            self.agents.len(),
            added,
            removed
        );
    }

    pub fn spawn_at(&mut self, record: BirdRecord, x: f32, size: Vec2) {
        let agent = Agent::new(record, self.bounds, size, x, &self.tuning, &mut self.rng);
        self.agents.push(agent);
    }

    pub fn remove_agent(&mut self, id: &str) -> bool {
        let before = self.agents.len();
        self.agents.retain(|agent| agent.id() != id);
        if self.selected.as_deref() == Some(id) {
            self.selected = None;
        }
        self.agents.len() != before
    }

    pub fn update(&mut self, dt: f32, mood: &MoodState) {
        for agent in &mut self.agents {
            agent.update(dt, mood, &mut self.rng);
        }
    }

    pub fn resize(&mut self, window: Vec2) {
        self.window = window;
        self.bounds = world_bounds(&self.tuning, window);
        for agent in &mut self.agents {
            agent.resize(self.bounds);
        }
        self.scroll_by(0.0);
    }

    /// Closes the info card and lets its bird move again.
    pub fn close_card(&mut self) {
        if let Some(id) = self.selected.take() {
            if let Some(agent) = self.agents.iter_mut().find(|a| a.id() == id) {
                agent.resume();
            }
        }
    }

    /// Top-most agent under a world-space point. Later agents draw on top.
    pub fn agent_at(&self, world: Vec2) -> Option<&Agent> {
        self.agents
            .iter()
            .rev()
            .find(|agent| agent.hit_rect().contains(world))
    }

    /// Feeds one pointer event. `modal_open` blocks field interaction while
    /// a card or popup is on screen.
    pub fn handle_input(&mut self, event: &InputEvent, modal_open: bool) -> Option<FieldAction> {
        if modal_open {
            self.clicks.cancel();
            self.drag_last_x = None;
            return None;
        }

        match *event {
            InputEvent::PointerPressed(point) => {
                if point.y < self.top_bar_height {
                    return None;
                }
                let hit = self
                    .agent_at(self.screen_to_world(point))
                    .map(|agent| agent.id().to_string());
                self.clicks.press(hit.as_deref());
                self.drag_last_x = Some(point.x);
                None
            }
            InputEvent::PointerMoved(point) => {
                if let Some(last_x) = self.drag_last_x {
                    self.scroll_by(last_x - point.x);
                    self.drag_last_x = Some(point.x);
                }
                None
            }
            InputEvent::PointerReleased(point) => {
                self.drag_last_x = None;
                let hit = if point.y < self.top_bar_height {
                    None
                } else {
                    self.agent_at(self.screen_to_world(point))
                        .map(|agent| agent.id().to_string())
                };
                let id = self.clicks.release(hit.as_deref())?;
                self.activate(&id)
            }
            InputEvent::Scroll(delta) => {
                let amount = if delta.x != 0.0 { delta.x } else { delta.y };
                self.scroll_by(-amount);
                None
            }
        }
    }

    fn activate(&mut self, id: &str) -> Option<FieldAction> {
        let agent = self.agents.iter_mut().find(|a| a.id() == id)?;
        if agent.is_raging() {
            return None;
        }
        if let Some(event) = agent.current_event() {
            return Some(FieldAction::OpenEvent {
                record: agent.record().clone(),
                event,
            });
        }
        agent.pause();
        self.selected = Some(id.to_string());
        Some(FieldAction::OpenCard(id.to_string()))
    }
}

fn world_bounds(tuning: &WorldConfig, window: Vec2) -> WorldBounds {
    WorldBounds::new(window.x * tuning.world_width_screens.max(1.0), window.y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MoodConfig;
    use crate::events::{event_for, EventKind};

    const TOP_BAR: f32 = 60.0;
    const SIZE: Vec2 = Vec2::new(100.0, 100.0);

    fn field() -> Field {
        let tuning = WorldConfig {
            event_probability: 0.0,
            ..WorldConfig::default()
        };
        Field::with_rng(tuning, Vec2::new(400.0, 800.0), TOP_BAR, SmallRng::seed_from_u64(1))
    }

    fn bird(species: &str) -> BirdRecord {
        BirdRecord::new(species, format!("{species}.png"))
    }

    /// Window-space point in the middle of an agent.
    fn centre_of(field: &Field, id: &str) -> Vec2 {
        let rect = field.agent(id).expect("agent").hit_rect();
        field.world_to_screen(rect.min + rect.size * 0.5)
    }

    #[test]
    fn world_is_three_windows_wide_and_scroll_clamps() {
        let mut field = field();
        assert_eq!(field.bounds().width, 1_200.0);
        field.scroll_by(-50.0);
        assert_eq!(field.scroll_x(), 0.0);
        field.scroll_by(10_000.0);
        assert_eq!(field.scroll_x(), 800.0);
        assert_eq!(field.screen_to_world(Vec2::new(10.0, 500.0)), Vec2::new(810.0, 500.0));
    }

    #[test]
    fn drag_scrolls_opposite_to_pointer_motion() {
        let mut field = field();
        field.handle_input(&InputEvent::PointerPressed(Vec2::new(300.0, 400.0)), false);
        field.handle_input(&InputEvent::PointerMoved(Vec2::new(200.0, 400.0)), false);
        assert_eq!(field.scroll_x(), 100.0);
        field.handle_input(&InputEvent::PointerReleased(Vec2::new(200.0, 400.0)), false);
        field.handle_input(&InputEvent::PointerMoved(Vec2::new(0.0, 400.0)), false);
        assert_eq!(field.scroll_x(), 100.0);
    }

    #[test]
    fn click_on_same_agent_opens_card_and_pauses() {
        let mut field = field();
        let record = bird("Sparrow");
        let id = record.id.clone();
        field.spawn_at(record, 100.0, SIZE);

        let at = centre_of(&field, &id);
        assert!(field.handle_input(&InputEvent::PointerPressed(at), false).is_none());
        let action = field.handle_input(&InputEvent::PointerReleased(at), false);
        assert_eq!(action, Some(FieldAction::OpenCard(id.clone())));
        assert!(field.agent(&id).expect("agent").is_paused());
        assert_eq!(field.selected().map(Agent::id), Some(id.as_str()));

        field.close_card();
        assert!(!field.agent(&id).expect("agent").is_paused());
        assert!(field.selected().is_none());
    }

    #[test]
    fn release_elsewhere_cancels_the_click() {
        let mut field = field();
        let a = bird("Owl");
        let b = bird("Dove");
        let (a_id, b_id) = (a.id.clone(), b.id.clone());
        field.spawn_at(a, 0.0, SIZE);
        field.spawn_at(b, 250.0, SIZE);

        let on_a = centre_of(&field, &a_id);
        let on_b = centre_of(&field, &b_id);
        field.handle_input(&InputEvent::PointerPressed(on_a), false);
        assert!(field
            .handle_input(&InputEvent::PointerReleased(Vec2::new(on_a.x, TOP_BAR + 5.0)), false)
            .is_none());

        field.handle_input(&InputEvent::PointerPressed(on_b), false);
        assert!(field.handle_input(&InputEvent::PointerReleased(on_a), false).is_none());
        assert!(!field.agent(&a_id).expect("a").is_paused());
        assert!(!field.agent(&b_id).expect("b").is_paused());
    }

    #[test]
    fn overlapping_agents_resolve_to_the_top_most() {
        let mut field = field();
        let under = bird("Owl");
        let over = bird("Pigeon");
        let over_id = over.id.clone();
        field.spawn_at(under, 100.0, SIZE);
        field.spawn_at(over, 120.0, SIZE);

        let at = centre_of(&field, &over_id);
        field.handle_input(&InputEvent::PointerPressed(at), false);
        let action = field.handle_input(&InputEvent::PointerReleased(at), false);
        assert_eq!(action, Some(FieldAction::OpenCard(over_id)));
    }

    #[test]
    fn clicking_an_event_bird_hands_over_the_event() {
        let mut field = field();
        let record = bird("Sparrow");
        let id = record.id.clone();
        field.spawn_at(record.clone(), 100.0, SIZE);
        let event = event_for(EventKind::Angry);
        field.agents[0].start_event(event);

        let at = centre_of(&field, &id);
        field.handle_input(&InputEvent::PointerPressed(at), false);
        match field.handle_input(&InputEvent::PointerReleased(at), false) {
            Some(FieldAction::OpenEvent { record: got, event: e }) => {
                assert_eq!(got.id, id);
                assert_eq!(e.kind, EventKind::Angry);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!field.agent(&id).expect("agent").is_paused());
    }

    #[test]
    fn modal_and_top_bar_block_interaction() {
        let mut field = field();
        let record = bird("Owl");
        let id = record.id.clone();
        field.spawn_at(record, 100.0, SIZE);
        let at = centre_of(&field, &id);

        field.handle_input(&InputEvent::PointerPressed(at), false);
        assert!(field.handle_input(&InputEvent::PointerReleased(at), true).is_none());

        field.handle_input(&InputEvent::PointerPressed(Vec2::new(at.x, 10.0)), false);
        assert!(field.handle_input(&InputEvent::PointerReleased(at), false).is_none());
    }

    #[test]
    fn resync_adds_refreshes_and_drops() {
        let mut field = field();
        let keep = bird("Owl");
        let gone = bird("Dove");
        field.resync(vec![keep.clone(), gone.clone()], |_| SIZE);
        assert_eq!(field.agents().len(), 2);
        let keep_position = field.agent(&keep.id).expect("keep").position();

        let mut renamed = keep.clone();
        renamed.personality = Some("Brave".into());
        let fresh = bird("Sparrow");
        field.resync(vec![renamed, fresh.clone()], |_| SIZE);

        assert_eq!(field.agents().len(), 2);
        assert!(field.agent(&gone.id).is_none());
        assert!(field.agent(&fresh.id).is_some());
        let kept = field.agent(&keep.id).expect("keep");
        assert_eq!(kept.position(), keep_position);
        assert_eq!(kept.record().personality.as_deref(), Some("Brave"));

        for agent in field.agents() {
            let x = agent.position().x;
            assert!(x >= 0.0 && x <= field.bounds().width - SIZE.x);
        }
    }

    #[test]
    fn resize_rescales_world_and_agents() {
        let mut field = field();
        let record = bird("Owl");
        let id = record.id.clone();
        field.spawn_at(record, 600.0, SIZE);
        field.scroll_by(800.0);

        field.resize(Vec2::new(200.0, 500.0));
        assert_eq!(field.bounds().width, 600.0);
        assert_eq!(field.scroll_x(), 400.0);
        let agent = field.agent(&id).expect("agent");
        assert!((agent.position().x - 300.0).abs() < 1e-3);
        assert_eq!(agent.position().y, 500.0 * 0.9 - 100.0);
    }

    #[test]
    fn update_drives_every_agent() {
        let mut field = field();
        field.spawn_at(bird("Owl"), 100.0, SIZE);
        field.spawn_at(bird("Dove"), 700.0, SIZE);
        let before: Vec<Vec2> = field.agents().iter().map(Agent::position).collect();
        let mood = MoodState::new(&MoodConfig::default());
        field.update(0.25, &mood);
        let after: Vec<Vec2> = field.agents().iter().map(Agent::position).collect();
        assert!(before.iter().zip(&after).all(|(a, b)| a != b));
    }
}
