//! One dialogue at a time between the user and a bird.
//!
//! The user's turn is appended on the calling (tick) thread before any
//! network work starts. The backend exchange runs as a spawned task that
//! publishes into a one-slot channel; [`ConversationPipeline::update`] drains
//! that slot once per tick. Each session carries a generation number and a
//! reply tagged with an older generation is dropped, so responses that land
//! after a session closed are no-ops.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::IndexedRandom;

use crate::chat::{ChatBackend, SessionIds, SessionRequest};
use crate::config::DialogueConfig;
use crate::events::EventDescriptor;
use crate::mood::SharedMood;
use crate::storage::{BirdPatch, BirdRecord, BirdStore, TraitScores};
use crate::traits::{blend_traits, dominant_personality, TraitClassifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Bird,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub speaker: Speaker,
    pub text: String,
}

impl ChatTurn {
    fn user(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::User,
            text: text.into(),
        }
    }

    fn bird(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Bird,
            text: text.into(),
        }
    }
}

pub struct ChatSession {
    record: BirdRecord,
    event: Option<&'static EventDescriptor>,
    turns: Vec<ChatTurn>,
    waiting: bool,
    generation: u64,
}

impl ChatSession {
    pub fn record(&self) -> &BirdRecord {
        &self.record
    }

    pub fn event(&self) -> Option<&'static EventDescriptor> {
        self.event
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    fn user_text(&self) -> String {
        self.turns
            .iter()
            .filter(|turn| turn.speaker == Speaker::User)
            .map(|turn| turn.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Dispatched,
    NoSession,
    Waiting,
    Empty,
}

/// What closing a session did to the bird and the mood.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    /// The record after the close; unchanged if classification produced
    /// nothing or the store refused the write.
    pub record: BirdRecord,
    pub scores: TraitScores,
    pub rage_added: f32,
    pub personality_changed: bool,
}

struct PendingReply {
    generation: u64,
    text: String,
    ids: Option<SessionIds>,
}

pub struct ConversationPipeline {
    backend: Arc<dyn ChatBackend>,
    classifier: Arc<dyn TraitClassifier>,
    store: Arc<dyn BirdStore>,
    mood: SharedMood,
    config: DialogueConfig,
    runtime: tokio::runtime::Handle,
    reply_timeout: Duration,
    session: Option<ChatSession>,
    generation: u64,
    reply_tx: flume::Sender<PendingReply>,
    reply_rx: flume::Receiver<PendingReply>,
}

impl ConversationPipeline {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        classifier: Arc<dyn TraitClassifier>,
        store: Arc<dyn BirdStore>,
        mood: SharedMood,
        config: DialogueConfig,
        runtime: tokio::runtime::Handle,
        reply_timeout: Duration,
    ) -> Self {
        let (reply_tx, reply_rx) = flume::bounded(1);
        Self {
            backend,
            classifier,
            store,
            mood,
            config,
            runtime,
            reply_timeout,
            session: None,
            generation: 0,
            reply_tx,
            reply_rx,
        }
    }

    pub fn session(&self) -> Option<&ChatSession> {
        self.session.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_waiting(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.waiting)
    }

    /// Starts a session, closing any previous one first.
    pub fn open(&mut self, record: BirdRecord, event: Option<&'static EventDescriptor>) {
        if self.session.is_some() {
            self.close();
        }
        self.generation += 1;

        let opening = match event {
            Some(event) => event.opening_line.to_string(),
            None => greeting(&record),
        };
        tracing::debug!(
            "Opened dialogue with {} (event: {})",
            record.id,
            event.map(|e| e.kind.as_str()).unwrap_or("none")
        );

        self.session = Some(ChatSession {
            record,
            event,
            turns: vec![ChatTurn::bird(opening)],
            waiting: false,
            generation: self.generation,
        });
    }

    pub fn send(&mut self, text: &str) -> SendOutcome {
        let text = text.trim();
        let Some(session) = self.session.as_mut() else {
            return SendOutcome::NoSession;
        };
        if session.waiting {
            return SendOutcome::Waiting;
        }
        if text.is_empty() {
            return SendOutcome::Empty;
        }

        session.turns.push(ChatTurn::user(text));
        session.waiting = true;

        let request = SessionRequest {
            species: session.record.species.clone(),
            personality: session.record.personality.clone(),
            event_prompt: session.event.map(|event| event.prompt),
            ids: SessionIds {
                assistant_id: session.record.backboard_assistant_id.clone(),
                thread_id: session.record.backboard_thread_id.clone(),
            },
        };
        let generation = session.generation;
        let filler = self.pick_filler();
        let backend = Arc::clone(&self.backend);
        let tx = self.reply_tx.clone();
        let timeout = self.reply_timeout;
        let message = text.to_string();

        self.runtime.spawn(async move {
            let exchange = async {
                let ids = backend.ensure_session(&request).await?;
                let reply = backend.send_message(&ids, &message).await?;
                Some((reply, ids))
            };
            let pending = match tokio::time::timeout(timeout, exchange).await {
                Ok(Some((text, ids))) => PendingReply {
                    generation,
                    text,
                    ids: Some(ids),
                },
                Ok(None) => {
                    tracing::warn!("Chat backend unavailable; using filler reply");
                    PendingReply {
                        generation,
                        text: filler,
                        ids: None,
                    }
                }
                Err(_) => {
                    tracing::warn!(
                        "Chat backend timed out after {:?}; using filler reply",
                        timeout
                    );
                    PendingReply {
                        generation,
                        text: filler,
                        ids: None,
                    }
                }
            };
            // Waits while a stale reply still occupies the slot; the tick
            // path drains it. Errors only once the pipeline is gone.
            let _ = tx.send_async(pending).await;
        });

        SendOutcome::Dispatched
    }

    /// Drains the reply slot. Returns true if a bird turn was appended.
    pub fn update(&mut self) -> bool {
        let mut appended = false;
        while let Ok(reply) = self.reply_rx.try_recv() {
            let Some(session) = self.session.as_mut() else {
                tracing::debug!("Dropping reply for closed session");
                continue;
            };
            if reply.generation != session.generation {
                tracing::debug!("Dropping stale reply from session {}", reply.generation);
                continue;
            }

            session.turns.push(ChatTurn::bird(reply.text));
            session.waiting = false;
            appended = true;

            if let Some(ids) = reply.ids {
                persist_session_ids(self.store.as_ref(), &mut session.record, ids);
            }
        }
        appended
    }

    /// Ends the session and runs trait classification over the user's
    /// turns. Returns `None` if no session was open.
    pub fn close(&mut self) -> Option<SessionSummary> {
        let session = self.session.take()?;
        // Invalidate anything still in flight.
        self.generation += 1;

        let mut record = session.record.clone();
        let text = session.user_text();
        let mut labels = Vec::with_capacity(self.config.personality_labels.len() + 1);
        labels.push(self.config.friction_label.clone());
        labels.extend(self.config.personality_labels.iter().cloned());

        let scores = self.classifier.classify(&text, &labels);
        if scores.is_empty() {
            tracing::info!("No trait signal for {}; record unchanged", record.id);
            return Some(SessionSummary {
                record,
                scores,
                rage_added: 0.0,
                personality_changed: false,
            });
        }

        let mut rage_added = 0.0;
        let friction = scores
            .get(&self.config.friction_label)
            .copied()
            .unwrap_or(0.0);
        if friction > self.config.friction_threshold {
            rage_added = friction * self.config.rage_multiplier;
            self.mood.add(rage_added);
            tracing::info!(
                "{} scored {:.2} {}; rage +{:.2}",
                record.id,
                friction,
                self.config.friction_label,
                rage_added
            );
        }

        let personality_scores: TraitScores = scores
            .iter()
            .filter(|(label, _)| **label != self.config.friction_label)
            .map(|(label, score)| (label.clone(), *score))
            .collect();
        if !personality_scores.values().any(|score| *score > 0.0) {
            tracing::info!("No personality signal for {}; traits unchanged", record.id);
            return Some(SessionSummary {
                record,
                scores,
                rage_added,
                personality_changed: false,
            });
        }

        let blended = blend_traits(
            record.trait_scores.as_ref(),
            &personality_scores,
            self.config.blend_weight,
        );
        let personality = dominant_personality(&blended).map(str::to_string);

        let patch = BirdPatch {
            personality: personality.clone(),
            trait_scores: Some(blended.clone()),
            ..BirdPatch::default()
        };
        let mut personality_changed = false;
        match self.store.update_fields(&record.id, &patch) {
            Ok(true) => {
                personality_changed = personality != record.personality;
                if personality_changed {
                    tracing::info!(
                        "{} personality: {} -> {}",
                        record.id,
                        record.personality.as_deref().unwrap_or("none"),
                        personality.as_deref().unwrap_or("none")
                    );
                }
                record.personality = personality;
                record.trait_scores = Some(blended);
            }
            Ok(false) => tracing::warn!("Bird {} vanished before traits were saved", record.id),
            Err(error) => tracing::error!("Failed to save traits for {}: {:#}", record.id, error),
        }

        Some(SessionSummary {
            record,
            scores,
            rage_added,
            personality_changed,
        })
    }

    fn pick_filler(&self) -> String {
        let mut rng = rand::rng();
        self.config
            .filler_replies
            .choose(&mut rng)
            .cloned()
            .unwrap_or_else(|| "*Chirp?*".to_string())
    }
}

fn greeting(record: &BirdRecord) -> String {
    match record.personality.as_deref() {
        Some(personality) => format!(
            "*Chirp!* Oh, it's you again! I'm feeling very {} today.",
            personality.to_lowercase()
        ),
        None => format!(
            "*Tweet?* Hello there! I'm a {}. Who are you?",
            record.species
        ),
    }
}

fn persist_session_ids(store: &dyn BirdStore, record: &mut BirdRecord, ids: SessionIds) {
    let assistant_changed =
        ids.assistant_id.is_some() && ids.assistant_id != record.backboard_assistant_id;
    let thread_changed = ids.thread_id.is_some() && ids.thread_id != record.backboard_thread_id;
    if !assistant_changed && !thread_changed {
        return;
    }

    let patch = BirdPatch {
        backboard_assistant_id: ids.assistant_id.clone(),
        backboard_thread_id: ids.thread_id.clone(),
        ..BirdPatch::default()
    };
    match store.update_fields(&record.id, &patch) {
        Ok(true) => {
            record.backboard_assistant_id = ids.assistant_id;
            record.backboard_thread_id = ids.thread_id;
        }
        Ok(false) => tracing::warn!("Bird {} missing; chat ids not saved", record.id),
        Err(error) => tracing::error!("Failed to save chat ids for {}: {:#}", record.id, error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MoodConfig;
    use crate::events::{event_for, EventKind};
    use crate::mood::MoodState;
    use crate::storage::{BirdStatus, JsonBirdStore};
    use crate::traits::LexiconClassifier;
    use async_trait::async_trait;
    use std::time::Instant;

    struct EchoBackend {
        delay: Duration,
    }

    #[async_trait]
    impl ChatBackend for EchoBackend {
        async fn ensure_session(&self, request: &SessionRequest) -> Option<SessionIds> {
            Some(SessionIds {
                assistant_id: Some(request.ids.assistant_id.clone().unwrap_or("asst-1".into())),
                thread_id: Some(request.ids.thread_id.clone().unwrap_or("thread-1".into())),
            })
        }

        async fn send_message(&self, _session: &SessionIds, text: &str) -> Option<String> {
            tokio::time::sleep(self.delay).await;
            Some(format!("echo: {}", text))
        }
    }

    struct Fixture {
        runtime: tokio::runtime::Runtime,
        _dir: tempfile::TempDir,
        store: Arc<JsonBirdStore>,
        mood: SharedMood,
        record: BirdRecord,
    }

    impl Fixture {
        fn new() -> Self {
            let runtime = tokio::runtime::Runtime::new().expect("runtime");
            let dir = tempfile::tempdir().expect("tempdir");
            let store = Arc::new(JsonBirdStore::new(dir.path().join("birds.json")));
            let record = BirdRecord::new("House Sparrow", "sparrow.png");
            store.add(record.clone()).expect("add");
            Self {
                runtime,
                _dir: dir,
                store,
                mood: MoodState::shared(&MoodConfig::default()),
                record,
            }
        }

        fn pipeline(&self, backend: Arc<dyn ChatBackend>) -> ConversationPipeline {
            self.pipeline_on(backend, self.store.clone())
        }

        fn pipeline_on(
            &self,
            backend: Arc<dyn ChatBackend>,
            store: Arc<dyn BirdStore>,
        ) -> ConversationPipeline {
            ConversationPipeline::new(
                backend,
                Arc::new(LexiconClassifier::default()),
                store,
                self.mood.clone(),
                DialogueConfig::default(),
                self.runtime.handle().clone(),
                Duration::from_secs(5),
            )
        }
    }

    /// Every write fails, or finds no record when `missing` is set.
    struct StuckStore {
        missing: bool,
    }

    impl BirdStore for StuckStore {
        fn load_all(&self) -> anyhow::Result<Vec<BirdRecord>> {
            Ok(Vec::new())
        }

        fn save_all(&self, _birds: &[BirdRecord]) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }

        fn add(&self, _bird: BirdRecord) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }

        fn update_status(&self, _id: &str, _status: BirdStatus) -> anyhow::Result<bool> {
            anyhow::bail!("disk full")
        }

        fn update_fields(&self, _id: &str, _patch: &BirdPatch) -> anyhow::Result<bool> {
            if self.missing {
                Ok(false)
            } else {
                anyhow::bail!("disk full")
            }
        }

        fn delete(&self, _id: &str) -> anyhow::Result<bool> {
            anyhow::bail!("disk full")
        }
    }

    fn push_user_turn(pipeline: &mut ConversationPipeline, text: &str) {
        pipeline
            .session
            .as_mut()
            .expect("session")
            .turns
            .push(ChatTurn::user(text));
    }

    fn pump(pipeline: &mut ConversationPipeline, limit: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < limit {
            if pipeline.update() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn greeting_depends_on_event_and_personality() {
        let fixture = Fixture::new();
        let mut pipeline = fixture.pipeline(Arc::new(crate::chat::OfflineChatBackend));

        pipeline.open(fixture.record.clone(), None);
        let first = pipeline.session().expect("session").turns()[0].text.clone();
        assert!(first.contains("House Sparrow"));

        let mut known = fixture.record.clone();
        known.personality = Some("Brave".into());
        pipeline.open(known, None);
        let first = pipeline.session().expect("session").turns()[0].text.clone();
        assert!(first.contains("brave"));

        pipeline.open(fixture.record.clone(), Some(event_for(EventKind::Sad)));
        let turns = pipeline.session().expect("session").turns();
        assert_eq!(turns[0].text, event_for(EventKind::Sad).opening_line);
    }

    #[test]
    fn user_turn_is_visible_before_reply_and_send_rejected_while_waiting() {
        let fixture = Fixture::new();
        let mut pipeline = fixture.pipeline(Arc::new(EchoBackend {
            delay: Duration::from_millis(50),
        }));
        pipeline.open(fixture.record.clone(), None);

        assert_eq!(pipeline.send("hello"), SendOutcome::Dispatched);
        let session = pipeline.session().expect("session");
        assert_eq!(session.turns().len(), 2);
        assert_eq!(session.turns()[1], ChatTurn::user("hello"));
        assert!(pipeline.is_waiting());

        assert_eq!(pipeline.send("again"), SendOutcome::Waiting);
        assert_eq!(pipeline.session().expect("session").turns().len(), 2);

        assert!(pump(&mut pipeline, Duration::from_secs(2)));
        let session = pipeline.session().expect("session");
        assert_eq!(session.turns().len(), 3);
        assert_eq!(session.turns()[2], ChatTurn::bird("echo: hello"));
        assert!(!session.is_waiting());

        // Slot was cleared: nothing more to append.
        assert!(!pipeline.update());
        assert_eq!(pipeline.session().expect("session").turns().len(), 3);
    }

    #[test]
    fn new_session_ids_are_persisted() {
        let fixture = Fixture::new();
        let mut pipeline = fixture.pipeline(Arc::new(EchoBackend {
            delay: Duration::ZERO,
        }));
        pipeline.open(fixture.record.clone(), None);
        pipeline.send("hi");
        assert!(pump(&mut pipeline, Duration::from_secs(2)));

        let stored = fixture
            .store
            .get(&fixture.record.id)
            .expect("read")
            .expect("record");
        assert_eq!(stored.backboard_assistant_id.as_deref(), Some("asst-1"));
        assert_eq!(stored.backboard_thread_id.as_deref(), Some("thread-1"));
    }

    #[test]
    fn offline_backend_falls_back_to_filler() {
        let fixture = Fixture::new();
        let mut pipeline = fixture.pipeline(Arc::new(crate::chat::OfflineChatBackend));
        pipeline.open(fixture.record.clone(), None);
        pipeline.send("hi there");
        assert!(pump(&mut pipeline, Duration::from_secs(2)));

        let reply = &pipeline.session().expect("session").turns()[2];
        assert_eq!(reply.speaker, Speaker::Bird);
        assert!(DialogueConfig::default().filler_replies.contains(&reply.text));
    }

    #[test]
    fn reply_after_close_is_discarded() {
        let fixture = Fixture::new();
        let mut pipeline = fixture.pipeline(Arc::new(EchoBackend {
            delay: Duration::from_millis(40),
        }));
        pipeline.open(fixture.record.clone(), None);
        pipeline.send("first");
        pipeline.close();

        pipeline.open(fixture.record.clone(), None);
        assert!(!pump(&mut pipeline, Duration::from_millis(300)));
        let session = pipeline.session().expect("session");
        assert_eq!(session.turns().len(), 1);
        assert!(!session.is_waiting());

        // The stale reply no longer blocks the slot.
        pipeline.send("second");
        assert!(pump(&mut pipeline, Duration::from_secs(2)));
        assert_eq!(
            pipeline.session().expect("session").turns()[2].text,
            "echo: second"
        );
    }

    #[test]
    fn close_feeds_friction_into_mood_and_personality_into_store() {
        let fixture = Fixture::new();
        let mut pipeline = fixture.pipeline(Arc::new(crate::chat::OfflineChatBackend));
        pipeline.open(fixture.record.clone(), None);
        push_user_turn(
            &mut pipeline,
            "ugh you are so annoying and stupid, go away. I just want to nap and sleep",
        );

        let summary = pipeline.close().expect("summary");
        assert!(!pipeline.is_open());
        assert!(summary.rage_added > 0.0);
        assert!((fixture.mood.rage_level() - summary.rage_added).abs() < 1e-4);

        let stored = fixture
            .store
            .get(&fixture.record.id)
            .expect("read")
            .expect("record");
        assert_eq!(stored.personality.as_deref(), Some("Lazy"));
        let traits = stored.trait_scores.expect("traits");
        assert!(!traits.contains_key("Annoyed"));
        assert_eq!(summary.record.personality.as_deref(), Some("Lazy"));
        assert!(summary.personality_changed);
    }

    #[test]
    fn close_without_signal_leaves_record_and_mood_alone() {
        let fixture = Fixture::new();
        let mut pipeline = fixture.pipeline(Arc::new(crate::chat::OfflineChatBackend));
        pipeline.open(fixture.record.clone(), None);

        let summary = pipeline.close().expect("summary");
        assert!(summary.scores.is_empty());
        assert_eq!(summary.record, fixture.record);
        assert_eq!(fixture.mood.rage_level(), 0.0);
        let stored = fixture
            .store
            .get(&fixture.record.id)
            .expect("read")
            .expect("record");
        assert_eq!(stored, fixture.record);
        assert!(pipeline.close().is_none());
    }

    #[test]
    fn friction_alone_adds_rage_without_inventing_a_personality() {
        let fixture = Fixture::new();
        let mut pipeline = fixture.pipeline(Arc::new(crate::chat::OfflineChatBackend));
        pipeline.open(fixture.record.clone(), None);
        push_user_turn(&mut pipeline, "ugh stupid, go away");

        let summary = pipeline.close().expect("summary");
        assert!(summary.scores["Annoyed"] > 0.0);
        assert!(summary.rage_added > 0.0);
        assert!((fixture.mood.rage_level() - summary.rage_added).abs() < 1e-4);
        assert!(!summary.personality_changed);
        assert_eq!(summary.record.personality, None);
        assert_eq!(summary.record.trait_scores, None);

        let stored = fixture
            .store
            .get(&fixture.record.id)
            .expect("read")
            .expect("record");
        assert_eq!(stored.personality, None);
        assert_eq!(stored.trait_scores, None);
    }

    #[test]
    fn failed_trait_write_keeps_record_but_still_adds_rage() {
        for missing in [false, true] {
            let fixture = Fixture::new();
            let mut pipeline = fixture.pipeline_on(
                Arc::new(crate::chat::OfflineChatBackend),
                Arc::new(StuckStore { missing }),
            );
            pipeline.open(fixture.record.clone(), None);
            push_user_turn(
                &mut pipeline,
                "ugh you are so annoying and stupid, go away. I just want to nap and sleep",
            );

            let summary = pipeline.close().expect("summary");
            assert_eq!(summary.record, fixture.record);
            assert!(!summary.personality_changed);
            assert!(summary.rage_added > 0.0);
            assert!((fixture.mood.rage_level() - summary.rage_added).abs() < 1e-4);
        }
    }
}
