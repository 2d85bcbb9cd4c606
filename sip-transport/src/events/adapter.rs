//! Fans a transport's single event receiver out to multiple subscribers.

use tokio::sync::{broadcast, mpsc};

use crate::transport::TransportEvent;

const DEFAULT_CAPACITY: usize = 256;

/// Bridges an owned `mpsc::Receiver<TransportEvent>` (what a `Transport`
/// hands back from `bind`) into a `broadcast` channel so the transaction
/// layer and diagnostics/logging can both observe events independently.
pub struct TransportEventAdapter {
    tx: broadcast::Sender<TransportEvent>,
}

impl TransportEventAdapter {
    pub fn new(source: mpsc::Receiver<TransportEvent>) -> Self {
        Self::with_capacity(source, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(mut source: mpsc::Receiver<TransportEvent>, capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        let adapter_tx = tx.clone();

        tokio::spawn(async move {
            while let Some(event) = source.recv().await {
                // No subscribers is not an error: events are simply dropped.
                let _ = adapter_tx.send(event);
            }
        });

        TransportEventAdapter { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.tx.subscribe()
    }
}
