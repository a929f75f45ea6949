//! Time-boxed cache of synthesized phrases keyed by a hash of the text.

use super::SynthesizedAudio;
use crate::lock_unpoisoned;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct CachedClip {
    stored_at: Instant,
    audio: SynthesizedAudio,
}

/// Phrase cache. Audio bytes are reference counted, so hits are cheap clones.
#[derive(Debug)]
pub struct SynthesisCache {
    ttl: Duration,
    max_entries: usize,
    clips: Mutex<HashMap<String, CachedClip>>,
}

impl SynthesisCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            clips: Mutex::new(HashMap::new()),
        }
    }

    /// Stable key for `text`.
    pub fn key(text: &str) -> String {
        blake3::hash(text.as_bytes()).to_hex().to_string()
    }

    pub fn get(&self, text: &str) -> Option<SynthesizedAudio> {
        let key = Self::key(text);
        let mut clips = lock_unpoisoned(&self.clips);
        let fresh = clips
            .get(&key)
            .map(|clip| Instant::now().duration_since(clip.stored_at) < self.ttl)?;
        if fresh {
            clips.get(&key).map(|clip| clip.audio.clone())
        } else {
            clips.remove(&key);
            None
        }
    }

    pub fn insert(&self, text: &str, audio: SynthesizedAudio) {
        let now = Instant::now();
        let mut clips = lock_unpoisoned(&self.clips);
        clips.retain(|_, clip| now.duration_since(clip.stored_at) < self.ttl);
        if clips.len() >= self.max_entries {
            let oldest = clips
                .iter()
                .min_by_key(|(_, clip)| clip.stored_at)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                clips.remove(&oldest);
            }
        }
        clips.insert(
            Self::key(text),
            CachedClip {
                stored_at: now,
                audio,
            },
        );
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.clips).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock_unpoisoned(&self.clips).clear();
    }
}
