//! Handlers shared by the crate's unit tests

use crate::envelope::Envelope;
use crate::error::PipelineError;
use crate::registry::MessageHandler;
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

/// Records every payload it sees; fails the first `failures` calls
pub(crate) struct RecordingHandler {
    failures: u32,
    calls: AtomicU32,
    seen: Mutex<Vec<Vec<u8>>>,
}

impl RecordingHandler {
    pub(crate) fn new() -> Self {
        Self::failing(0)
    }

    pub(crate) fn failing(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Payloads of successful calls, in call order
    pub(crate) fn seen(&self) -> Vec<Vec<u8>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, envelope: &Envelope) -> Result<(), PipelineError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(PipelineError::handler(format!("failure {}", call)));
        }
        self.seen.lock().unwrap().push(envelope.value.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "RecordingHandler"
    }
}

/// Poll `condition` every 5ms until it holds
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    while !condition() {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
}
