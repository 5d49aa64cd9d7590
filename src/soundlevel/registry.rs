//! Registry of per-source [`SoundLevelProcessor`]s.

use crate::error::{IngestError, Result};
use crate::soundlevel::{SoundLevelProcessor, SoundLevelReport};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

pub struct SoundLevelRegistry {
    processors: RwLock<HashMap<String, Arc<Mutex<SoundLevelProcessor>>>>,
    sample_rate: u32,
    interval_seconds: u32,
}

impl SoundLevelRegistry {
    pub fn new(sample_rate: u32, interval_seconds: u32) -> Self {
        Self { processors: RwLock::new(HashMap::new()), sample_rate, interval_seconds }
    }

    pub async fn register(&self, source_id: &str) -> Result<()> {
        let mut processors = self.processors.write().await;
        if processors.contains_key(source_id) {
            return Err(IngestError::resource_already_exists("sound level processor", source_id));
        }
        let processor = SoundLevelProcessor::new(source_id, self.sample_rate, self.interval_seconds)?;
        processors.insert(source_id.to_string(), Arc::new(Mutex::new(processor)));
        debug!(source_id, "registered sound level processor");
        Ok(())
    }

    pub async fn remove(&self, source_id: &str) -> Result<()> {
        let mut processors = self.processors.write().await;
        processors
            .remove(source_id)
            .map(|_| ())
            .ok_or_else(|| IngestError::resource_missing("sound level processor", source_id))
    }

    async fn entry(&self, source_id: &str) -> Result<Arc<Mutex<SoundLevelProcessor>>> {
        let processors = self.processors.read().await;
        processors
            .get(source_id)
            .cloned()
            .ok_or_else(|| IngestError::resource_missing("sound level processor", source_id))
    }

    pub async fn process_audio(&self, source_id: &str, bytes: &[u8]) -> Result<Option<SoundLevelReport>> {
        let processor = self.entry(source_id).await?;
        let result = processor.lock().await.process_audio(bytes);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_rejects_duplicate() {
        let reg = SoundLevelRegistry::new(48_000, 5);
        reg.register("s").await.unwrap();
        assert!(reg.register("s").await.is_err());
    }

    #[tokio::test]
    async fn process_audio_on_unknown_source_is_resource_missing() {
        let reg = SoundLevelRegistry::new(48_000, 5);
        assert!(reg.process_audio("missing", &[0u8; 4]).await.is_err());
    }
}
