
use ack_gate::consumers::MessageProcessor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Accepts every payload except the ones starting with `TX-BAD`, keeping track of what
/// it has been asked to process.
#[derive(Clone, Default)]
pub struct AcceptUnlessBad {
    processed: Arc<Mutex<Vec<Vec<u8>>>>,
    processing_time: Duration,
}

impl AcceptUnlessBad {
    pub fn taking(processing_time: Duration) -> Self {
        Self {
            processing_time,
            ..Self::default()
        }
    }

    pub fn processed(&self) -> Vec<Vec<u8>> {
        self.processed.lock().unwrap().clone()
    }

    pub fn processed_count(&self) -> usize {
        self.processed.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl MessageProcessor for AcceptUnlessBad {
    async fn process(&self, payload: &[u8]) -> Result<bool, anyhow::Error> {
        if !self.processing_time.is_zero() {
            tokio::time::sleep(self.processing_time).await;
        }
        self.processed.lock().unwrap().push(payload.to_vec());
        Ok(!payload.starts_with(b"TX-BAD"))
    }
}
