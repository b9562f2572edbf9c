use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

/// Behavior knobs for the field simulation.
///
/// Speeds are in world units per second; the frontend ticks at a fixed
/// 60 Hz so the defaults reproduce a two-pixel hop per tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    #[serde(default = "default_hop_min")]
    pub hop_min: f32,
    #[serde(default = "default_hop_max")]
    pub hop_max: f32,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default = "default_event_speed_multiplier")]
    pub event_speed_multiplier: f32,
    #[serde(default = "default_idle_min_secs")]
    pub idle_min_secs: f32,
    #[serde(default = "default_idle_max_secs")]
    pub idle_max_secs: f32,
    #[serde(default = "default_event_duration_secs")]
    pub event_duration_secs: f32,
    /// Per-tick chance that an idle bird wanders into a mood event.
    #[serde(default = "default_event_probability")]
    pub event_probability: f64,
    #[serde(default = "default_arrival_epsilon")]
    pub arrival_epsilon: f32,
    /// Fraction of the world height where the birds' feet rest.
    #[serde(default = "default_ground_fraction")]
    pub ground_fraction: f32,
    #[serde(default = "default_jitter_radius")]
    pub jitter_radius: f32,
    #[serde(default = "default_world_width_screens")]
    pub world_width_screens: f32,
    #[serde(default = "default_placeholder_size")]
    pub placeholder_size: f32,
    #[serde(default = "default_ticks_per_frame")]
    pub ticks_per_frame: u32,
}

fn default_hop_min() -> f32 {
    100.0
}

fn default_hop_max() -> f32 {
    300.0
}

fn default_speed() -> f32 {
    120.0
}

fn default_event_speed_multiplier() -> f32 {
    0.5
}

fn default_idle_min_secs() -> f32 {
    1.0
}

fn default_idle_max_secs() -> f32 {
    3.0
}

fn default_event_duration_secs() -> f32 {
    4.0
}

fn default_event_probability() -> f64 {
    0.005
}

fn default_arrival_epsilon() -> f32 {
    5.0
}

fn default_ground_fraction() -> f32 {
    0.9
}

fn default_jitter_radius() -> f32 {
    5.0
}

fn default_world_width_screens() -> f32 {
    3.0
}

fn default_placeholder_size() -> f32 {
    100.0
}

fn default_ticks_per_frame() -> u32 {
    8
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            hop_min: default_hop_min(),
            hop_max: default_hop_max(),
            speed: default_speed(),
            event_speed_multiplier: default_event_speed_multiplier(),
            idle_min_secs: default_idle_min_secs(),
            idle_max_secs: default_idle_max_secs(),
            event_duration_secs: default_event_duration_secs(),
            event_probability: default_event_probability(),
            arrival_epsilon: default_arrival_epsilon(),
            ground_fraction: default_ground_fraction(),
            jitter_radius: default_jitter_radius(),
            world_width_screens: default_world_width_screens(),
            placeholder_size: default_placeholder_size(),
            ticks_per_frame: default_ticks_per_frame(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoodConfig {
    #[serde(default = "default_max_rage")]
    pub max_rage: f32,
    #[serde(default)]
    pub initial_rage: f32,
    #[serde(default = "default_crashout_epsilon")]
    pub crashout_epsilon: f32,
}

fn default_max_rage() -> f32 {
    100.0
}

fn default_crashout_epsilon() -> f32 {
    0.01
}

impl Default for MoodConfig {
    fn default() -> Self {
        Self {
            max_rage: default_max_rage(),
            initial_rage: 0.0,
            crashout_epsilon: default_crashout_epsilon(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueConfig {
    /// The one label whose score feeds the shared rage meter.
    #[serde(default = "default_friction_label")]
    pub friction_label: String,
    #[serde(default = "default_personality_labels")]
    pub personality_labels: Vec<String>,
    #[serde(default = "default_friction_threshold")]
    pub friction_threshold: f32,
    #[serde(default = "default_rage_multiplier")]
    pub rage_multiplier: f32,
    #[serde(default = "default_blend_weight")]
    pub blend_weight: f32,
    #[serde(default = "default_filler_replies")]
    pub filler_replies: Vec<String>,
}

fn default_friction_label() -> String {
    "Annoyed".to_string()
}

fn default_personality_labels() -> Vec<String> {
    vec![
        "Intelligent".to_string(),
        "Curious".to_string(),
        "Brave".to_string(),
        "Lazy".to_string(),
        "Friendly".to_string(),
    ]
}

fn default_friction_threshold() -> f32 {
    0.3
}

fn default_rage_multiplier() -> f32 {
    25.0
}

fn default_blend_weight() -> f32 {
    0.5
}

fn default_filler_replies() -> Vec<String> {
    vec![
        "*Chirp chirp!*".to_string(),
        "*Tilts head curiously*".to_string(),
        "*Tweet?*".to_string(),
        "*Flaps wings excitedly*".to_string(),
        "*Pecks at the ground*".to_string(),
    ]
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            friction_label: default_friction_label(),
            personality_labels: default_personality_labels(),
            friction_threshold: default_friction_threshold(),
            rage_multiplier: default_rage_multiplier(),
            blend_weight: default_blend_weight(),
            filler_replies: default_filler_replies(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_backend_llm_provider")]
    pub llm_provider: String,
    #[serde(default = "default_backend_llm_model")]
    pub llm_model: String,
    #[serde(default = "default_setup_timeout_secs")]
    pub setup_timeout_secs: u64,
    #[serde(default = "default_message_timeout_secs")]
    pub message_timeout_secs: u64,
}

fn default_backend_url() -> String {
    "https://app.backboard.io/api".to_string()
}

fn default_backend_llm_provider() -> String {
    "openai".to_string()
}

fn default_backend_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_setup_timeout_secs() -> u64 {
    10
}

fn default_message_timeout_secs() -> u64 {
    30
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_url: default_backend_url(),
            api_key: None,
            llm_provider: default_backend_llm_provider(),
            llm_model: default_backend_llm_model(),
            setup_timeout_secs: default_setup_timeout_secs(),
            message_timeout_secs: default_message_timeout_secs(),
        }
    }
}

/// OpenAI-compatible endpoint used for species classification and cropping.
/// An empty `api_url` disables the vision service entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionConfig {
    #[serde(default)]
    pub api_url: String,
    #[serde(default = "default_vision_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_vision_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_vision_model() -> String {
    "llava".to_string()
}

fn default_vision_timeout_secs() -> u64 {
    60
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            model: default_vision_model(),
            api_key: None,
            timeout_secs: default_vision_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    #[serde(default)]
    pub world: WorldConfig,
    #[serde(default)]
    pub mood: MoodConfig,
    #[serde(default)]
    pub dialogue: DialogueConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub vision: VisionConfig,

    #[serde(default = "default_store_path")]
    pub store_path: String,
    #[serde(default = "default_captures_dir")]
    pub captures_dir: String,
    #[serde(default = "default_assets_dir")]
    pub assets_dir: String,

    #[serde(default = "default_window_width")]
    pub window_width: f32,
    #[serde(default = "default_window_height")]
    pub window_height: f32,
}

fn default_store_path() -> String {
    "assets/saved_birds.json".to_string()
}

fn default_captures_dir() -> String {
    "assets/captures".to_string()
}

fn default_assets_dir() -> String {
    "assets".to_string()
}

fn default_window_width() -> f32 {
    390.0
}

fn default_window_height() -> f32 {
    844.0
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            world: WorldConfig::default(),
            mood: MoodConfig::default(),
            dialogue: DialogueConfig::default(),
            backend: BackendConfig::default(),
            vision: VisionConfig::default(),
            store_path: default_store_path(),
            captures_dir: default_captures_dir(),
            assets_dir: default_assets_dir(),
            window_width: default_window_width(),
            window_height: default_window_height(),
        }
    }
}

impl GameConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Get the path to the config file (relative to executable)
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("coocooco_config.toml")
    }

    /// Load config from coocooco_config.toml (next to executable), then apply env overrides
    pub fn load() -> Self {
        let path = Self::config_path();

        let mut config = match fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str::<GameConfig>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    config
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::warn!("No config file found, using defaults + env vars");
                Self::default()
            }
        };

        config.apply_env();
        if config.backend.api_key.is_none() {
            config.backend.api_key = read_secret_file(&Self::get_base_dir().join("secrets.txt"));
        }
        config
    }

    fn apply_env(&mut self) {
        if let Ok(path) = env::var("COOCOOCO_STORE_PATH") {
            if !path.trim().is_empty() {
                self.store_path = path;
            }
        }

        if let Ok(dir) = env::var("COOCOOCO_ASSETS_DIR") {
            if !dir.trim().is_empty() {
                self.assets_dir = dir;
            }
        }

        if let Ok(key) = env::var("BACKBOARD_API_KEY") {
            if !key.trim().is_empty() {
                self.backend.api_key = Some(key);
            }
        }

        if let Ok(url) = env::var("BACKBOARD_API_URL") {
            self.backend.api_url = url;
        }

        if let Ok(url) = env::var("VISION_API_URL") {
            self.vision.api_url = url;
        }

        if let Ok(model) = env::var("VISION_MODEL") {
            self.vision.model = model;
        }

        if let Ok(key) = env::var("VISION_API_KEY") {
            self.vision.api_key = Some(key);
        }

        if let Ok(probability) = env::var("COOCOOCO_EVENT_PROBABILITY") {
            if let Ok(value) = probability.parse::<f64>() {
                self.world.event_probability = value.clamp(0.0, 1.0);
            }
        }
    }
}

/// Reads `BACKBOARD_API_KEY=...` from a secrets file, if one exists.
fn read_secret_file(path: &std::path::Path) -> Option<String> {
    let contents = fs::read_to_string(path).ok()?;
    parse_secret_line(&contents, "BACKBOARD_API_KEY")
}

fn parse_secret_line(contents: &str, key: &str) -> Option<String> {
    contents.lines().find_map(|line| {
        let line = line.trim();
        let value = line.strip_prefix(key)?.strip_prefix('=')?;
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}
