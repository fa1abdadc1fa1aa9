use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::peer::{Relay, RelayEvent, SignalError};

/// In-process relay network
///
/// Every published event fans out to every subscriber of its topic,
/// including the publisher, which matches how public relays echo a
/// client's own events back.
#[derive(Clone)]
pub struct MemoryRelay {
    events: broadcast::Sender<RelayEvent>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self { events }
    }
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Relay for MemoryRelay {
    async fn publish(&self, event: RelayEvent) -> Result<(), SignalError> {
        // no subscribers yet is not an error
        let _ = self.events.send(event);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<RelayEvent>, SignalError> {
        let mut events = self.events.subscribe();
        let topic = topic.to_string();
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if event.topic() != Some(topic.as_str()) {
                            continue;
                        }
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(rx)
    }
}
