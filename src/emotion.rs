//! Camera emotion classifier seam.

use crate::error::Result;
use crate::types::EmotionContext;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// One classifier reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionReading {
    pub emotion: String,
    pub confidence: f32,
    pub face_detected: bool,
    #[serde(default)]
    pub visual_description: Option<String>,
}

impl EmotionReading {
    /// Stamp the reading, clamping confidence into `0.0..=1.0`.
    pub fn into_context(self) -> EmotionContext {
        EmotionContext {
            emotion: self.emotion,
            confidence: self.confidence.clamp(0.0, 1.0),
            visual_description: self.visual_description,
            face_detected: self.face_detected,
            observed_at: Utc::now(),
        }
    }
}

/// Periodically polled classifier. `Ok(None)` means "no frame available".
#[async_trait]
pub trait EmotionClassifier: Send + Sync {
    async fn classify(&self) -> Result<Option<EmotionReading>>;
}

/// Whether a reading is worth a spoken reaction. Confidence must be strictly
/// above the floor.
pub fn is_actionable(emotion: &EmotionContext, confidence_floor: f32) -> bool {
    emotion.face_detected
        && emotion.confidence > confidence_floor
        && !emotion.emotion.eq_ignore_ascii_case("neutral")
}
