use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Happy,
    Sad,
    Angry,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Happy => "happy",
            EventKind::Sad => "sad",
            EventKind::Angry => "angry",
        }
    }
}

/// A timed mood excursion a bird can wander into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDescriptor {
    pub kind: EventKind,
    pub description: &'static str,
    /// Appended to the chat backend's system prompt while the event lasts.
    pub prompt: &'static str,
    pub opening_line: &'static str,
}

pub static EVENT_POOL: [EventDescriptor; 3] = [
    EventDescriptor {
        kind: EventKind::Happy,
        description: "I found a shiny button!",
        prompt: "You are extremely happy because you found a shiny button on the ground. Act very excited.",
        opening_line: "*Chirp!* Look what I found! A shiny button! Isn't it amazing?",
    },
    EventDescriptor {
        kind: EventKind::Sad,
        description: "I dropped my worm...",
        prompt: "You are very sad because you dropped your delicious worm. Act depressed and sniffle a lot.",
        opening_line: "*Sniff*... my worm... it fell in the dirt...",
    },
    EventDescriptor {
        kind: EventKind::Angry,
        description: "A squirrel stole my spot!",
        prompt: "You are angry because a squirrel took your favorite branch. Rant about squirrels.",
        opening_line: "*Screech!* That squirrel! He TOOK my spot! Can you believe the nerve?",
    },
];

pub fn random_event<R: Rng + ?Sized>(rng: &mut R) -> &'static EventDescriptor {
    EVENT_POOL.choose(rng).unwrap_or(&EVENT_POOL[0])
}

pub fn event_for(kind: EventKind) -> &'static EventDescriptor {
    match kind {
        EventKind::Happy => &EVENT_POOL[0],
        EventKind::Sad => &EVENT_POOL[1],
        EventKind::Angry => &EVENT_POOL[2],
    }
}
