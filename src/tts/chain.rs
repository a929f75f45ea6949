//! Ordered synthesizer fallback.
//!
//! Providers are tried in order; the first success wins. Remote results are
//! cached by phrase so repeated lines ("Nice work!") are not re-synthesized.

use super::{SpeechSynthesizer, SynthesisCache, SynthesizedAudio};
use crate::error::{Result, SpeechError};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cache plus ordered provider list.
pub struct SynthesisChain {
    providers: Vec<Arc<dyn SpeechSynthesizer>>,
    cache: Option<SynthesisCache>,
}

impl std::fmt::Debug for SynthesisChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesisChain")
            .field("providers", &self.provider_names())
            .field("cached", &self.cache.as_ref().map(SynthesisCache::len))
            .finish()
    }
}

impl SynthesisChain {
    /// Create a chain trying `providers` in order, without a cache.
    pub fn new(providers: Vec<Arc<dyn SpeechSynthesizer>>) -> Self {
        Self {
            providers,
            cache: None,
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: SynthesisCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn cache(&self) -> Option<&SynthesisCache> {
        self.cache.as_ref()
    }
}

#[async_trait]
impl SpeechSynthesizer for SynthesisChain {
    fn name(&self) -> &str {
        "chain"
    }

    async fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        if let Some(audio) = self.cache.as_ref().and_then(|cache| cache.get(text)) {
            debug!(chars = text.len(), "synthesis cache hit");
            return Ok(audio);
        }

        let mut failures = Vec::new();
        for (index, provider) in self.providers.iter().enumerate() {
            match provider.synthesize(text).await {
                Ok(audio) => {
                    if index > 0 {
                        info!(
                            provider = provider.name(),
                            skipped = index,
                            "synthesis served by fallback provider"
                        );
                    }
                    if !provider.is_on_device() {
                        if let Some(cache) = &self.cache {
                            cache.insert(text, audio.clone());
                        }
                    }
                    return Ok(audio);
                }
                Err(e) => {
                    warn!(provider = provider.name(), "synthesis failed: {e}");
                    failures.push(format!("{}: {e}", provider.name()));
                }
            }
        }

        if failures.is_empty() {
            return Err(SpeechError::Synthesis(
                "no synthesizers configured".to_owned(),
            ));
        }
        Err(SpeechError::Synthesis(format!(
            "all synthesizers failed ({})",
            failures.join("; ")
        )))
    }
}
