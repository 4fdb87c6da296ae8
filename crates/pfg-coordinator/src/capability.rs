//! Named capability lookup tables: signal producers and position sizers.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use pfg_schemas::Signal;
use pfg_sizing::{SizerMeta, SizerRegistry};

use crate::CoordinatorError;

/// Produce-signal capability. Implementations wrap whatever turns market
/// context into a candidate trade; the coordinator only routes the result.
#[async_trait::async_trait]
pub trait SignalProvider: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` when the provider has nothing to offer right now.
    async fn next_signal(&self) -> Result<Option<Signal>>;
}

/// FIFO provider fed by `push`; used for manual signal entry and tests.
#[derive(Debug)]
pub struct QueuedSignals {
    name: String,
    queue: Mutex<VecDeque<Signal>>,
}

impl QueuedSignals {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, signal: Signal) {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(signal);
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl SignalProvider for QueuedSignals {
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_signal(&self) -> Result<Option<Signal>> {
        Ok(self
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front())
    }
}

pub struct CapabilityRegistry {
    providers: BTreeMap<String, Arc<dyn SignalProvider>>,
    sizers: SizerRegistry,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityRegistry {
    /// Built-in sizers, no providers.
    pub fn new() -> Self {
        Self::with_sizers(SizerRegistry::with_defaults())
    }

    pub fn with_sizers(sizers: SizerRegistry) -> Self {
        Self {
            providers: BTreeMap::new(),
            sizers,
        }
    }

    pub fn register_provider(&mut self, provider: Arc<dyn SignalProvider>) -> Result<(), CoordinatorError> {
        let name = provider.name().to_string();
        if self.providers.contains_key(&name) {
            return Err(CoordinatorError::DuplicateProvider { name });
        }
        self.providers.insert(name, provider);
        Ok(())
    }

    pub fn provider(&self, name: &str) -> Result<Arc<dyn SignalProvider>, CoordinatorError> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| CoordinatorError::UnknownProvider {
                name: name.to_string(),
            })
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    pub fn sizers(&self) -> &SizerRegistry {
        &self.sizers
    }

    pub fn sizers_mut(&mut self) -> &mut SizerRegistry {
        &mut self.sizers
    }

    pub fn sizer_list(&self) -> Vec<SizerMeta> {
        self.sizers.list().into_iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pfg_schemas::Direction;

    #[tokio::test]
    async fn queued_provider_is_fifo_and_names_are_unique() {
        let q = Arc::new(QueuedSignals::new("manual"));
        q.push(Signal::new("ES", Direction::Long, 5_000.0, 4_990.0, 5_020.0, 0.7));
        q.push(Signal::new("NQ", Direction::Short, 18_000.0, 18_050.0, 17_900.0, 0.7));

        let mut caps = CapabilityRegistry::new();
        caps.register_provider(q.clone()).unwrap();
        assert!(matches!(
            caps.register_provider(Arc::new(QueuedSignals::new("manual"))),
            Err(CoordinatorError::DuplicateProvider { .. })
        ));

        let p = caps.provider("manual").unwrap();
        assert_eq!(p.next_signal().await.unwrap().unwrap().symbol, "ES");
        assert_eq!(p.next_signal().await.unwrap().unwrap().symbol, "NQ");
        assert!(p.next_signal().await.unwrap().is_none());
        assert!(caps.provider("ocr").is_err());
        assert!(caps.sizers().contains("half_kelly"));
    }
}
