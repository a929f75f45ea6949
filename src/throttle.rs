//! Per-kind minimum spacing between utterances.

use crate::config::ThrottleConfig;
use crate::types::UtteranceKind;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Last-fired timestamps for throttled utterance kinds.
#[derive(Debug, Clone)]
pub struct ThrottleWindows {
    windows: HashMap<UtteranceKind, Duration>,
    last_fired: HashMap<UtteranceKind, Instant>,
}

impl ThrottleWindows {
    #[must_use]
    pub fn new(config: &ThrottleConfig) -> Self {
        let mut windows = HashMap::new();
        windows.insert(
            UtteranceKind::EmotionAware,
            Duration::from_secs(config.emotion_aware_secs),
        );
        windows.insert(UtteranceKind::Idle, Duration::from_secs(config.idle_secs));
        Self {
            windows,
            last_fired: HashMap::new(),
        }
    }

    /// Time left before `kind` may fire again, or `None` if it may fire now.
    ///
    /// Kinds without a configured window are never throttled.
    #[must_use]
    pub fn remaining(&self, kind: UtteranceKind) -> Option<Duration> {
        let window = self.windows.get(&kind)?;
        let last = self.last_fired.get(&kind)?;
        let elapsed = Instant::now().duration_since(*last);
        let left = window.saturating_sub(elapsed);
        (!left.is_zero()).then_some(left)
    }

    pub fn record(&mut self, kind: UtteranceKind) {
        self.last_fired.insert(kind, Instant::now());
    }

    pub fn reset(&mut self) {
        self.last_fired.clear();
    }
}
