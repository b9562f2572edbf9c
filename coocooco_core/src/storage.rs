//! Flat JSON store of captured birds.
//!
//! The whole collection lives in one file and every mutation is a
//! read-modify-write of that file under a process-local lock. Writes go to a
//! sibling temp file first and are renamed into place, so a failed write
//! leaves the previous collection intact.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BirdStatus {
    Field,
    Archived,
}

impl BirdStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BirdStatus::Field => "field",
            BirdStatus::Archived => "archived",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "field" => Some(BirdStatus::Field),
            "archived" => Some(BirdStatus::Archived),
            _ => None,
        }
    }
}

/// Per-trait score in `[0, 1]`, keyed by label.
pub type TraitScores = BTreeMap<String, f32>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BirdRecord {
    pub id: String,
    pub species: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub image_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cropped_path: Option<String>,
    #[serde(default)]
    pub timestamp: String,
    pub status: BirdStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trait_scores: Option<TraitScores>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backboard_assistant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backboard_thread_id: Option<String>,
    /// Fields written by other tools are carried through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl BirdRecord {
    pub fn new(species: impl Into<String>, image_path: impl Into<String>) -> Self {
        Self {
            id: new_bird_id(),
            species: species.into(),
            name: None,
            image_path: image_path.into(),
            cropped_path: None,
            timestamp: chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
            status: BirdStatus::Field,
            personality: None,
            trait_scores: None,
            backboard_assistant_id: None,
            backboard_thread_id: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.species)
    }

    /// Cropped photo when detection found one, otherwise the original capture.
    pub fn best_image_path(&self) -> Option<&str> {
        self.cropped_path
            .as_deref()
            .or(Some(self.image_path.as_str()))
            .filter(|path| !path.is_empty())
    }

    fn apply(&mut self, patch: &BirdPatch) {
        if let Some(species) = &patch.species {
            self.species = species.clone();
        }
        if let Some(name) = &patch.name {
            self.name = Some(name.clone());
        }
        if let Some(cropped_path) = &patch.cropped_path {
            self.cropped_path = Some(cropped_path.clone());
        }
        if let Some(personality) = &patch.personality {
            self.personality = Some(personality.clone());
        }
        if let Some(scores) = &patch.trait_scores {
            self.trait_scores = Some(scores.clone());
        }
        if let Some(assistant_id) = &patch.backboard_assistant_id {
            self.backboard_assistant_id = Some(assistant_id.clone());
        }
        if let Some(thread_id) = &patch.backboard_thread_id {
            self.backboard_thread_id = Some(thread_id.clone());
        }
    }
}

/// Partial update; `None` leaves the stored value alone. `id` and `status`
/// are deliberately absent: ids never change and status moves only through
/// `update_status`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BirdPatch {
    pub species: Option<String>,
    pub name: Option<String>,
    pub cropped_path: Option<String>,
    pub personality: Option<String>,
    pub trait_scores: Option<TraitScores>,
    pub backboard_assistant_id: Option<String>,
    pub backboard_thread_id: Option<String>,
}

pub fn new_bird_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// CRUD contract over bird records.
///
/// `Err` means the store could not be read or written. `Ok(false)` means no
/// record carries the given id. In both cases nothing was changed.
pub trait BirdStore: Send + Sync {
    fn load_all(&self) -> Result<Vec<BirdRecord>>;
    fn save_all(&self, birds: &[BirdRecord]) -> Result<()>;
    fn add(&self, bird: BirdRecord) -> Result<()>;
    fn update_status(&self, id: &str, status: BirdStatus) -> Result<bool>;
    fn update_fields(&self, id: &str, patch: &BirdPatch) -> Result<bool>;
    fn delete(&self, id: &str) -> Result<bool>;

    fn by_status(&self, status: BirdStatus) -> Result<Vec<BirdRecord>> {
        Ok(self
            .load_all()?
            .into_iter()
            .filter(|bird| bird.status == status)
            .collect())
    }

    fn get(&self, id: &str) -> Result<Option<BirdRecord>> {
        Ok(self.load_all()?.into_iter().find(|bird| bird.id == id))
    }
}

/// On-disk shape before migration: early captures were written without
/// `id`/`status`.
#[derive(Debug, Deserialize)]
struct StoredBird {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    species: Option<String>,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

pub struct JsonBirdStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonBirdStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        // A panic while holding the guard cannot leave the file half-written,
        // so a poisoned lock is still safe to reuse.
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reads and migrates without taking the lock; callers hold it.
    fn read_locked(&self) -> Result<Vec<BirdRecord>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read bird store {:?}", self.path))
            }
        };
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }

        let stored: Vec<StoredBird> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse bird store {:?}", self.path))?;

        let mut migrated = 0usize;
        let mut birds = Vec::with_capacity(stored.len());
        for raw in stored {
            let (bird, changed) = migrate_record(raw)?;
            if changed {
                migrated += 1;
            }
            birds.push(bird);
        }

        if migrated > 0 {
            tracing::info!(
                "Migrated {} bird record(s) missing id/status in {:?}",
                migrated,
                self.path
            );
            self.write_locked(&birds)?;
        }

        Ok(birds)
    }

    fn write_locked(&self, birds: &[BirdRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create store directory {:?}", parent))?;
        }

        let json = serde_json::to_string_pretty(birds).context("Failed to serialize birds")?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json)
            .with_context(|| format!("Failed to write bird store {:?}", tmp_path))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace bird store {:?}", self.path))?;
        Ok(())
    }

    fn modify<F>(&self, mutate: F) -> Result<bool>
    where
        F: FnOnce(&mut Vec<BirdRecord>) -> bool,
    {
        let _guard = self.lock();
        let mut birds = self.read_locked()?;
        if !mutate(&mut birds) {
            return Ok(false);
        }
        self.write_locked(&birds)?;
        Ok(true)
    }
}

fn migrate_record(raw: StoredBird) -> Result<(BirdRecord, bool)> {
    let mut changed = false;

    let id = match raw.id.filter(|id| !id.trim().is_empty()) {
        Some(id) => id,
        None => {
            changed = true;
            new_bird_id()
        }
    };

    let status = match raw.status.as_deref().and_then(BirdStatus::parse) {
        Some(status) => status,
        None => {
            changed = true;
            BirdStatus::Field
        }
    };

    let mut object = raw.rest;
    object.insert("id".to_string(), serde_json::Value::String(id));
    object.insert(
        "status".to_string(),
        serde_json::Value::String(status.as_str().to_string()),
    );
    object.insert(
        "species".to_string(),
        serde_json::Value::String(raw.species.unwrap_or_else(|| "Unknown Bird".to_string())),
    );

    let bird: BirdRecord = serde_json::from_value(serde_json::Value::Object(object))
        .context("Failed to decode bird record")?;
    Ok((bird, changed))
}

impl BirdStore for JsonBirdStore {
    fn load_all(&self) -> Result<Vec<BirdRecord>> {
        let _guard = self.lock();
        self.read_locked()
    }

    fn save_all(&self, birds: &[BirdRecord]) -> Result<()> {
        let _guard = self.lock();
        self.write_locked(birds)
    }

    fn add(&self, bird: BirdRecord) -> Result<()> {
        let id = bird.id.clone();
        self.modify(move |birds| {
            birds.push(bird);
            true
        })?;
        tracing::info!("Bird saved: {}", id);
        Ok(())
    }

    fn update_status(&self, id: &str, status: BirdStatus) -> Result<bool> {
        self.modify(|birds| match birds.iter_mut().find(|bird| bird.id == id) {
            Some(bird) => {
                bird.status = status;
                true
            }
            None => false,
        })
    }

    fn update_fields(&self, id: &str, patch: &BirdPatch) -> Result<bool> {
        self.modify(|birds| match birds.iter_mut().find(|bird| bird.id == id) {
            Some(bird) => {
                bird.apply(patch);
                true
            }
            None => false,
        })
    }

    fn delete(&self, id: &str) -> Result<bool> {
        self.modify(|birds| {
            let before = birds.len();
            birds.retain(|bird| bird.id != id);
            birds.len() != before
        })
    }
}
