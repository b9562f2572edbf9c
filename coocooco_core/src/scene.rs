//! Single-active-screen orchestration.
//!
//! Screens are registered once and kept alive; only the active one receives
//! input, update, draw and resize. Switching runs `cleanup` on the old
//! screen and `setup` on the new one with the current window size, so
//! inactive screens never need resize notifications.

use std::collections::HashMap;

use crate::events::EventDescriptor;
use crate::geometry::Vec2;
use crate::storage::BirdRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScreenId {
    Field,
    Camera,
    Archive,
    Dialogue,
    RandomEvent,
}

impl ScreenId {
    pub fn as_str(self) -> &'static str {
        match self {
            ScreenId::Field => "field",
            ScreenId::Camera => "camera",
            ScreenId::Archive => "archive",
            ScreenId::Dialogue => "dialogue",
            ScreenId::RandomEvent => "random_event",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum ScreenPayload {
    #[default]
    None,
    Dialogue {
        record: BirdRecord,
        event: Option<&'static EventDescriptor>,
    },
    RandomEvent {
        record: BirdRecord,
        event: &'static EventDescriptor,
    },
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub to: ScreenId,
    pub payload: ScreenPayload,
}

impl Transition {
    pub fn to(to: ScreenId) -> Self {
        Self {
            to,
            payload: ScreenPayload::None,
        }
    }

    pub fn with_payload(to: ScreenId, payload: ScreenPayload) -> Self {
        Self { to, payload }
    }
}

/// Pointer input in window coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    PointerPressed(Vec2),
    PointerMoved(Vec2),
    PointerReleased(Vec2),
    Scroll(Vec2),
}

/// Lifecycle every screen implements. `S` is the drawing surface.
pub trait Screen<S: ?Sized> {
    fn setup(&mut self, payload: ScreenPayload, window_size: Vec2);

    fn process_event(&mut self, _event: &InputEvent) -> Option<Transition> {
        None
    }

    fn update(&mut self, dt: f32) -> Option<Transition>;

    fn draw(&mut self, surface: &mut S) -> Option<Transition>;

    fn cleanup(&mut self) {}

    fn resize(&mut self, _new_size: Vec2) {}
}

pub struct ScreenManager<S: ?Sized> {
    screens: HashMap<ScreenId, Box<dyn Screen<S>>>,
    active: Option<ScreenId>,
    window_size: Vec2,
}

impl<S: ?Sized> ScreenManager<S> {
    pub fn new(window_size: Vec2) -> Self {
        Self {
            screens: HashMap::new(),
            active: None,
            window_size,
        }
    }

    pub fn register(&mut self, id: ScreenId, screen: Box<dyn Screen<S>>) {
        self.screens.insert(id, screen);
    }

    pub fn active(&self) -> Option<ScreenId> {
        self.active
    }

    pub fn window_size(&self) -> Vec2 {
        self.window_size
    }

    /// Cleans up the active screen and sets up `id`. Returns false, leaving
    /// the current screen active, if `id` was never registered.
    pub fn switch_to(&mut self, id: ScreenId, payload: ScreenPayload) -> bool {
        if !self.screens.contains_key(&id) {
            tracing::warn!("Unknown screen {}", id.as_str());
            return false;
        }

        if let Some(current) = self.active.take() {
            if let Some(screen) = self.screens.get_mut(&current) {
                screen.cleanup();
            }
        }

        tracing::debug!("Switching to screen {}", id.as_str());
        self.active = Some(id);
        let window_size = self.window_size;
        if let Some(screen) = self.screens.get_mut(&id) {
            screen.setup(payload, window_size);
        }
        true
    }

    pub fn process_event(&mut self, event: &InputEvent) {
        let transition = self
            .active_screen()
            .and_then(|screen| screen.process_event(event));
        self.apply(transition);
    }

    pub fn update(&mut self, dt: f32) {
        let transition = self.active_screen().and_then(|screen| screen.update(dt));
        self.apply(transition);
    }

    pub fn draw(&mut self, surface: &mut S) {
        let transition = self.active_screen().and_then(|screen| screen.draw(surface));
        self.apply(transition);
    }

    pub fn resize(&mut self, new_size: Vec2) {
        if new_size == self.window_size {
            return;
        }
        self.window_size = new_size;
        if let Some(screen) = self.active_screen() {
            screen.resize(new_size);
        }
    }

    fn active_screen(&mut self) -> Option<&mut Box<dyn Screen<S>>> {
        let id = self.active?;
        self.screens.get_mut(&id)
    }

    fn apply(&mut self, transition: Option<Transition>) {
        if let Some(transition) = transition {
            self.switch_to(transition.to, transition.payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        log: Log,
        next: Option<ScreenId>,
    }

    impl Recorder {
        fn boxed(name: &'static str, log: &Log) -> Box<dyn Screen<Vec<String>>> {
            Box::new(Self {
                name,
                log: log.clone(),
                next: None,
            })
        }

        fn push(&self, entry: String) {
            self.log.borrow_mut().push(format!("{}:{}", self.name, entry));
        }
    }

    impl Screen<Vec<String>> for Recorder {
        fn setup(&mut self, payload: ScreenPayload, window_size: Vec2) {
            let kind = match payload {
                ScreenPayload::None => "none",
                ScreenPayload::Dialogue { .. } => "dialogue",
                ScreenPayload::RandomEvent { .. } => "event",
            };
            self.push(format!("setup({kind},{})", window_size.x));
        }

        fn process_event(&mut self, event: &InputEvent) -> Option<Transition> {
            self.push(format!("event({:?})", event));
            if matches!(event, InputEvent::PointerReleased(_)) {
                self.next = Some(ScreenId::Archive);
            }
            None
        }

        fn update(&mut self, dt: f32) -> Option<Transition> {
            self.push(format!("update({dt})"));
            self.next.take().map(Transition::to)
        }

        fn draw(&mut self, surface: &mut Vec<String>) -> Option<Transition> {
            surface.push(self.name.to_string());
            None
        }

        fn cleanup(&mut self) {
            self.push("cleanup".to_string());
        }

        fn resize(&mut self, new_size: Vec2) {
            self.push(format!("resize({})", new_size.x));
        }
    }

    fn manager(log: &Log) -> ScreenManager<Vec<String>> {
        let mut manager = ScreenManager::new(Vec2::new(390.0, 844.0));
        manager.register(ScreenId::Field, Recorder::boxed("field", log));
        manager.register(ScreenId::Archive, Recorder::boxed("archive", log));
        manager
    }

    #[test]
    fn switch_cleans_up_then_sets_up() {
        let log = Log::default();
        let mut manager = manager(&log);
        assert!(manager.switch_to(ScreenId::Field, ScreenPayload::None));
        assert!(manager.switch_to(ScreenId::Archive, ScreenPayload::None));
        assert_eq!(manager.active(), Some(ScreenId::Archive));
        assert_eq!(
            *log.borrow(),
            vec!["field:setup(none,390)", "field:cleanup", "archive:setup(none,390)"]
        );
    }

    #[test]
    fn unknown_screen_keeps_current_one() {
        let log = Log::default();
        let mut manager = manager(&log);
        manager.switch_to(ScreenId::Field, ScreenPayload::None);
        assert!(!manager.switch_to(ScreenId::Camera, ScreenPayload::None));
        assert_eq!(manager.active(), Some(ScreenId::Field));
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn only_active_screen_sees_ticks_and_draws() {
        let log = Log::default();
        let mut manager = manager(&log);
        manager.switch_to(ScreenId::Field, ScreenPayload::None);

        let mut surface = Vec::new();
        manager.update(0.5);
        manager.draw(&mut surface);
        assert_eq!(surface, vec!["field"]);
        assert!(log.borrow().iter().all(|entry| entry.starts_with("field:")));
    }

    #[test]
    fn transitions_returned_by_screens_are_applied() {
        let log = Log::default();
        let mut manager = manager(&log);
        manager.switch_to(ScreenId::Field, ScreenPayload::None);
        manager.process_event(&InputEvent::PointerReleased(Vec2::ZERO));
        assert_eq!(manager.active(), Some(ScreenId::Field));
        manager.update(0.1);
        assert_eq!(manager.active(), Some(ScreenId::Archive));
    }

    #[test]
    fn resize_reaches_only_the_active_screen_and_later_setups() {
        let log = Log::default();
        let mut manager = manager(&log);
        manager.switch_to(ScreenId::Field, ScreenPayload::None);
        manager.resize(Vec2::new(800.0, 600.0));
        manager.resize(Vec2::new(800.0, 600.0));
        manager.switch_to(ScreenId::Archive, ScreenPayload::None);

        let log = log.borrow();
        assert_eq!(log.iter().filter(|e| e.contains("resize")).count(), 1);
        assert!(log.contains(&"field:resize(800)".to_string()));
        assert!(!log.iter().any(|e| e.starts_with("archive:resize")));
        assert_eq!(log.last().map(String::as_str), Some("archive:setup(none,800)"));
    }
}
