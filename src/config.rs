//! Configuration types for the speech arbitration layer.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for a tutoring speech session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// User activity and context flag settings.
    pub activity: ActivityConfig,
    /// Per-kind throttle windows.
    pub throttle: ThrottleConfig,
    /// History, queue and scheduling settings for the orchestrator.
    pub orchestrator: OrchestratorConfig,
    /// Avatar behaviour (mute, idle chatter, greeting).
    pub avatar: AvatarConfig,
    /// Camera emotion reading settings.
    pub emotion: EmotionConfig,
    /// Text-to-speech settings.
    pub tts: TtsConfig,
    /// Text-generation backend settings.
    pub backend: BackendConfig,
    /// Identity forwarded to the backend.
    pub user: UserConfig,
}

/// User activity tracking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    /// Seconds without interaction before the user counts as idle.
    pub idle_threshold_secs: u64,
    /// Stricter window used when deciding whether the user is still around
    /// for a follow-up.
    pub follow_up_window_secs: u64,
    /// Lifetime of a context flag that was set without a guard.
    pub context_flag_ttl_secs: u64,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            idle_threshold_secs: 60,
            follow_up_window_secs: 30,
            context_flag_ttl_secs: 1800,
        }
    }
}

impl ActivityConfig {
    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }

    pub fn follow_up_window(&self) -> Duration {
        Duration::from_secs(self.follow_up_window_secs)
    }

    pub fn context_flag_ttl(&self) -> Duration {
        Duration::from_secs(self.context_flag_ttl_secs)
    }
}

/// Minimum spacing between two utterances of the same kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Minimum seconds between emotion reactions.
    pub emotion_aware_secs: u64,
    /// Minimum seconds between idle remarks.
    pub idle_secs: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            emotion_aware_secs: 15,
            idle_secs: 300,
        }
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum number of history entries kept in the ring.
    pub history_capacity: usize,
    /// Entries older than this are purged by the maintenance task.
    pub history_retention_secs: u64,
    /// Number of recent entries included in a generation context.
    pub context_entries: usize,
    /// Per-entry character cap inside a generation context.
    pub context_entry_max_chars: usize,
    /// Pause between the end of one utterance and draining the next queued one.
    pub settle_delay_ms: u64,
    /// Maximum number of queued requests; further requests are dropped.
    pub max_pending: usize,
    /// Interval of the history purge / stale flag sweep.
    pub maintenance_interval_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            history_capacity: 50,
            history_retention_secs: 3600,
            context_entries: 8,
            context_entry_max_chars: 200,
            settle_delay_ms: 1000,
            max_pending: 16,
            maintenance_interval_secs: 60,
        }
    }
}

impl OrchestratorConfig {
    pub fn history_retention(&self) -> Duration {
        Duration::from_secs(self.history_retention_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}

/// Avatar behaviour configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarConfig {
    /// Start with the avatar muted.
    pub muted: bool,
    /// Whether the avatar may speak up on its own when the user is idle.
    pub idle_responses: bool,
    /// How often the idle loop checks whether the avatar may speak.
    pub idle_check_interval_secs: u64,
    /// Whether `handle_greeting` speaks at all.
    pub greeting_enabled: bool,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            muted: false,
            idle_responses: true,
            idle_check_interval_secs: 30,
            greeting_enabled: true,
        }
    }
}

/// Camera emotion reading configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotionConfig {
    /// Readings below this confidence never trigger a reaction.
    ///
    /// Must be within `0.0..=1.0`.
    pub confidence_floor: f32,
    /// Poll interval for the emotion classifier.
    pub poll_interval_secs: u64,
}

impl Default for EmotionConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.35,
            poll_interval_secs: 5,
        }
    }
}

/// Text-to-speech configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Use the remote synthesizer when an endpoint is configured.
    pub remote_enabled: bool,
    /// Remote synthesis endpoint (POST, JSON body `{text, voice}`).
    pub endpoint: Option<String>,
    /// Bearer token for the remote synthesizer.
    pub api_key: Option<String>,
    /// Voice identifier forwarded to the remote synthesizer.
    pub voice: Option<String>,
    /// Request timeout for remote synthesis.
    pub timeout_secs: u64,
    /// How long synthesized phrases stay cached.
    pub cache_ttl_secs: u64,
    /// Maximum number of cached phrases.
    pub cache_max_entries: usize,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            remote_enabled: true,
            endpoint: None,
            api_key: None,
            voice: None,
            timeout_secs: 20,
            cache_ttl_secs: 3600,
            cache_max_entries: 256,
        }
    }
}

impl TtsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Text-generation backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Generation endpoint (POST, JSON body `{prompt, user, context}`).
    pub endpoint: Option<String>,
    /// Bearer token for the backend.
    pub api_key: Option<String>,
    /// Request timeout for generation.
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            timeout_secs: 30,
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Identity forwarded with every generation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub id: Option<String>,
    pub display_name: Option<String>,
}

impl SpeechConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| crate::error::SpeechError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::SpeechError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/tutor-voice/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("tutor-voice").join("config.toml")
        } else if let Some(config) = dirs::config_dir() {
            config.join("tutor-voice").join("config.toml")
        } else {
            PathBuf::from("/tmp/tutor-voice-config/config.toml")
        }
    }

    /// Reject settings that would make the arbitration rules meaningless.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Config`](crate::error::SpeechError::Config)
    /// naming the first offending field.
    pub fn validate(&self) -> crate::error::Result<()> {
        let invalid = |field: &str| {
            Err(crate::error::SpeechError::Config(format!(
                "{field} must be greater than zero"
            )))
        };
        if self.activity.idle_threshold_secs == 0 {
            return invalid("activity.idle_threshold_secs");
        }
        if self.activity.follow_up_window_secs == 0 {
            return invalid("activity.follow_up_window_secs");
        }
        if self.activity.context_flag_ttl_secs == 0 {
            return invalid("activity.context_flag_ttl_secs");
        }
        if self.orchestrator.history_capacity == 0 {
            return invalid("orchestrator.history_capacity");
        }
        if self.orchestrator.maintenance_interval_secs == 0 {
            return invalid("orchestrator.maintenance_interval_secs");
        }
        if self.avatar.idle_check_interval_secs == 0 {
            return invalid("avatar.idle_check_interval_secs");
        }
        if self.emotion.poll_interval_secs == 0 {
            return invalid("emotion.poll_interval_secs");
        }
        if !(0.0..=1.0).contains(&self.emotion.confidence_floor) {
            return Err(crate::error::SpeechError::Config(format!(
                "emotion.confidence_floor must be within 0.0..=1.0, got {}",
                self.emotion.confidence_floor
            )));
        }
        Ok(())
    }
}
