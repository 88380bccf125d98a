use async_trait::async_trait;

use super::StreamFragment;

/// Receives fragments while a streaming call is in flight.
///
/// Called inline by the aggregator, in arrival order, at most once per
/// fragment. Implementations must return promptly; the next fragment is not
/// read until this one has been handed over.
#[async_trait]
pub trait FragmentSink: Send + Sync {
    async fn send_streaming_chunk(&self, fragment: &StreamFragment);
}

/// Drops everything; stands in when a streaming route runs without a listener.
pub(crate) struct DiscardSink;

#[async_trait]
impl FragmentSink for DiscardSink {
    async fn send_streaming_chunk(&self, _fragment: &StreamFragment) {}
}

#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingSink {
    received: std::sync::Mutex<Vec<StreamFragment>>,
}

#[cfg(test)]
impl RecordingSink {
    pub(crate) fn fragments(&self) -> Vec<StreamFragment> {
        self.received.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl FragmentSink for RecordingSink {
    async fn send_streaming_chunk(&self, fragment: &StreamFragment) {
        self.received.lock().unwrap().push(fragment.clone());
    }
}
