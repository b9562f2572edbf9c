//! Species classification and bird cropping for captured photos.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::config::VisionConfig;
use crate::llm_client::LlmClient;

pub const UNKNOWN_BIRD: &str = "Unknown Bird";

/// Labels the classifier is never allowed to hand out.
const BLOCKED_KEYWORD: &str = "looney";

/// Labels containing any of these win over a higher-scored generic label,
/// since they map onto the bundled sprite families.
const PRIORITY_KEYWORDS: [&str; 4] = ["dove", "owl", "sparrow", "pigeon"];

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LabelScore {
    pub label: String,
    #[serde(default)]
    pub score: f32,
}

impl LabelScore {
    pub fn new(label: impl Into<String>, score: f32) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

/// Pixel-space box with inclusive-exclusive corners.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

/// Vision contract for the capture flow. Failures fold into "no labels" and
/// "no crop"; nothing here may abort a capture.
#[async_trait]
pub trait VisionService: Send + Sync {
    /// Ranked candidate labels, best first. Empty on failure.
    async fn classify_labels(&self, image: &Path) -> Vec<LabelScore>;

    /// Crops the most prominent bird into `crops_dir`. `None` if no bird
    /// was found or anything failed.
    async fn detect_and_crop(&self, image: &Path, crops_dir: &Path) -> Option<PathBuf>;

    async fn classify(&self, image: &Path) -> String {
        let labels = self.classify_labels(image).await;
        select_species_label(&labels)
    }
}

/// Picks a species from ranked labels. A blocked top label means the whole
/// result is untrustworthy.
pub fn select_species_label(labels: &[LabelScore]) -> String {
    let Some(top) = labels.first() else {
        return UNKNOWN_BIRD.to_string();
    };
    if is_blocked(&top.label) {
        tracing::info!("Top label '{}' is blocked; using {}", top.label, UNKNOWN_BIRD);
        return UNKNOWN_BIRD.to_string();
    }

    let chosen = labels
        .iter()
        .find(|candidate| {
            let lower = candidate.label.to_lowercase();
            PRIORITY_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
        })
        .unwrap_or(top);

    if is_blocked(&chosen.label) || chosen.label.trim().is_empty() {
        return UNKNOWN_BIRD.to_string();
    }
    chosen.label.trim().to_string()
}

fn is_blocked(label: &str) -> bool {
    label.to_lowercase().contains(BLOCKED_KEYWORD)
}

fn sort_by_score(labels: &mut [LabelScore]) {
    labels.sort_by(|a, b| b.score.total_cmp(&a.score));
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "image/png",
    }
}

/// Crops `image_path` to `bbox` (clamped to the image) and writes the result
/// under `crops_dir` with the source file name.
pub fn crop_to_box(image_path: &Path, bbox: BoundingBox, crops_dir: &Path) -> Result<PathBuf> {
    let img = image::open(image_path)
        .with_context(|| format!("Failed to open image {:?}", image_path))?;
    let (width, height) = (img.width() as f32, img.height() as f32);

    let x0 = bbox.x_min.min(bbox.x_max).clamp(0.0, width);
    let x1 = bbox.x_min.max(bbox.x_max).clamp(0.0, width);
    let y0 = bbox.y_min.min(bbox.y_max).clamp(0.0, height);
    let y1 = bbox.y_min.max(bbox.y_max).clamp(0.0, height);
    let (w, h) = ((x1 - x0).round() as u32, (y1 - y0).round() as u32);
    if w == 0 || h == 0 {
        anyhow::bail!("Bounding box {:?} is empty inside {}x{}", bbox, width, height);
    }

    let cropped = img.crop_imm(x0.round() as u32, y0.round() as u32, w, h);

    std::fs::create_dir_all(crops_dir)
        .with_context(|| format!("Failed to create crops directory {:?}", crops_dir))?;
    let file_name = image_path
        .file_name()
        .context("Image path has no file name")?;
    let crop_path = crops_dir.join(file_name);
    cropped
        .save(&crop_path)
        .with_context(|| format!("Failed to save crop {:?}", crop_path))?;
    Ok(crop_path)
}

/// Used when no vision endpoint is configured.
pub struct NullVisionService;

#[async_trait]
impl VisionService for NullVisionService {
    async fn classify_labels(&self, _image: &Path) -> Vec<LabelScore> {
        Vec::new()
    }

    async fn detect_and_crop(&self, _image: &Path, _crops_dir: &Path) -> Option<PathBuf> {
        None
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LabelsReply {
    Bare(Vec<LabelScore>),
    Wrapped { labels: Vec<LabelScore> },
}

#[derive(Debug, Deserialize)]
struct DetectionReply {
    #[serde(default)]
    found: bool,
    #[serde(default)]
    bbox: Option<BoundingBox>,
}

const CLASSIFY_SYSTEM: &str = "You are a bird species classifier. Reply with JSON only.";
const CLASSIFY_PROMPT: &str = "Identify the bird species in this photo. Respond with a JSON \
    array of up to five candidates ordered from most to least likely, like \
    [{\"label\": \"Rock Pigeon\", \"score\": 0.82}]. Scores are probabilities in [0, 1].";
const DETECT_SYSTEM: &str = "You are an object detector. Reply with JSON only.";
const DETECT_PROMPT: &str = "Find the most prominent bird in this photo. Respond with \
    {\"found\": true, \"bbox\": {\"x_min\": 0, \"y_min\": 0, \"x_max\": 0, \"y_max\": 0}} \
    in pixel coordinates of the original image, or {\"found\": false} if there is no bird.";

/// Vision over an OpenAI-compatible multimodal chat endpoint.
pub struct LlmVisionService {
    client: LlmClient,
}

impl LlmVisionService {
    pub fn new(config: &VisionConfig) -> Result<Self> {
        Ok(Self {
            client: LlmClient::new(config)?,
        })
    }

    async fn try_classify(&self, image: &Path) -> Result<Vec<LabelScore>> {
        let bytes = tokio::fs::read(image)
            .await
            .with_context(|| format!("Failed to read {:?}", image))?;
        let reply: LabelsReply = self
            .client
            .ask_json(CLASSIFY_SYSTEM, CLASSIFY_PROMPT, &bytes, mime_for(image))
            .await?;
        let mut labels = match reply {
            LabelsReply::Bare(labels) | LabelsReply::Wrapped { labels } => labels,
        };
        sort_by_score(&mut labels);
        Ok(labels)
    }

    async fn try_detect_and_crop(&self, image: &Path, crops_dir: &Path) -> Result<Option<PathBuf>> {
        let bytes = tokio::fs::read(image)
            .await
            .with_context(|| format!("Failed to read {:?}", image))?;
        let reply: DetectionReply = self
            .client
            .ask_json(DETECT_SYSTEM, DETECT_PROMPT, &bytes, mime_for(image))
            .await?;
        let bbox = match (reply.found, reply.bbox) {
            (true, Some(bbox)) => bbox,
            _ => return Ok(None),
        };

        let image = image.to_path_buf();
        let crops_dir = crops_dir.to_path_buf();
        let crop = tokio::task::spawn_blocking(move || crop_to_box(&image, bbox, &crops_dir))
            .await
            .context("Crop task failed")??;
        Ok(Some(crop))
    }
}

#[async_trait]
impl VisionService for LlmVisionService {
    async fn classify_labels(&self, image: &Path) -> Vec<LabelScore> {
        match self.try_classify(image).await {
            Ok(labels) => {
                for label in labels.iter().take(5) {
                    tracing::debug!("  {}: {:.4}", label.label, label.score);
                }
                labels
            }
            Err(error) => {
                tracing::warn!("Classification failed for {:?}: {:#}", image, error);
                Vec::new()
            }
        }
    }

    async fn detect_and_crop(&self, image: &Path, crops_dir: &Path) -> Option<PathBuf> {
        match self.try_detect_and_crop(image, crops_dir).await {
            Ok(Some(path)) => {
                tracing::info!("Bird detected and cropped to {:?}", path);
                Some(path)
            }
            Ok(None) => {
                tracing::info!("No bird detected in {:?}", image);
                None
            }
            Err(error) => {
                tracing::warn!("Detection failed for {:?}: {:#}", image, error);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, f32)]) -> Vec<LabelScore> {
        pairs.iter().map(|(l, s)| LabelScore::new(*l, *s)).collect()
    }

    #[test]
    fn priority_keyword_beats_higher_generic_label() {
        let ranked = labels(&[("Common Starling", 0.6), ("Mourning Dove", 0.3), ("Barn Owl", 0.1)]);
        assert_eq!(select_species_label(&ranked), "Mourning Dove");
    }

    #[test]
    fn falls_back_to_top_label_without_priority_match() {
        let ranked = labels(&[("Blue Jay", 0.7), ("Cardinal", 0.2)]);
        assert_eq!(select_species_label(&ranked), "Blue Jay");
    }

    #[test]
    fn blocked_top_label_or_empty_result_is_unknown() {
        let ranked = labels(&[("LOONEY Bird", 0.9), ("Rock Pigeon", 0.1)]);
        assert_eq!(select_species_label(&ranked), UNKNOWN_BIRD);
        assert_eq!(select_species_label(&[]), UNKNOWN_BIRD);
    }

    #[test]
    fn labels_sort_best_first() {
        let mut ranked = labels(&[("a", 0.1), ("b", 0.9), ("c", 0.5)]);
        sort_by_score(&mut ranked);
        let order: Vec<&str> = ranked.iter().map(|l| l.label.as_str()).collect();
        assert_eq!(order, vec!["b", "c", "a"]);
    }

    #[test]
    fn wrapped_and_bare_label_replies_parse() {
        let bare: LabelsReply =
            crate::llm_client::parse_json(r#"[{"label":"Owl","score":0.5}]"#).expect("bare");
        assert!(matches!(bare, LabelsReply::Bare(ref l) if l.len() == 1));
        let wrapped: LabelsReply =
            crate::llm_client::parse_json(r#"{"labels":[{"label":"Owl"}]}"#).expect("wrapped");
        assert!(matches!(wrapped, LabelsReply::Wrapped { ref labels } if labels[0].score == 0.0));
    }

    #[test]
    fn crop_clamps_box_and_keeps_file_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("bird_20240101_120000.png");
        image::RgbImage::from_pixel(40, 30, image::Rgb([200, 10, 10]))
            .save(&source)
            .expect("write source");

        let crops = dir.path().join("crops");
        let bbox = BoundingBox {
            x_min: 10.0,
            y_min: -5.0,
            x_max: 80.0,
            y_max: 20.0,
        };
        let crop = crop_to_box(&source, bbox, &crops).expect("crop");
        assert_eq!(crop, crops.join("bird_20240101_120000.png"));
        let saved = image::open(&crop).expect("open crop");
        assert_eq!((saved.width(), saved.height()), (30, 20));
    }

    #[test]
    fn degenerate_box_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("tiny.png");
        image::RgbImage::new(10, 10).save(&source).expect("write");
        let bbox = BoundingBox {
            x_min: 50.0,
            y_min: 50.0,
            x_max: 60.0,
            y_max: 60.0,
        };
        assert!(crop_to_box(&source, bbox, dir.path()).is_err());
    }

    #[test]
    fn null_service_yields_unknown_bird() {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        let species = runtime.block_on(NullVisionService.classify(Path::new("missing.png")));
        assert_eq!(species, UNKNOWN_BIRD);
    }
}
