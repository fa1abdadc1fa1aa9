use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::peer::connection::{ChannelPair, Session, Transport, TransportError};

type Switchboard = Arc<Mutex<HashMap<String, oneshot::Sender<ChannelPair>>>>;

/// In-process transport
///
/// An "offer" is a random token registered on a shared switchboard; the
/// responder's `apply_offer` looks the token up, wires two channel pairs
/// together, and both sides' `establish` futures resolve. Answers and
/// candidates are accepted and ignored, so the full handshake choreography
/// still runs over the relay without affecting the outcome.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    offers: Switchboard,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn new_session(&self) -> Result<Box<dyn Session>, TransportError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        Ok(Box::new(MemorySession {
            offers: self.offers.clone(),
            ready_tx: Mutex::new(Some(ready_tx)),
            ready_rx: Mutex::new(Some(ready_rx)),
        }))
    }
}

struct MemorySession {
    offers: Switchboard,
    ready_tx: Mutex<Option<oneshot::Sender<ChannelPair>>>,
    ready_rx: Mutex<Option<oneshot::Receiver<ChannelPair>>>,
}

#[async_trait]
impl Session for MemorySession {
    async fn create_offer(&self) -> Result<String, TransportError> {
        let token = uuid::Uuid::new_v4().to_string();
        let ready_tx = self.ready_tx.lock().take().ok_or(TransportError::Closed)?;
        self.offers.lock().insert(token.clone(), ready_tx);
        Ok(token)
    }

    async fn apply_offer(&self, offer: &str) -> Result<String, TransportError> {
        let initiator = self.offers.lock().remove(offer).ok_or_else(|| {
            TransportError::InvalidDescription(format!("unknown offer token {}", offer))
        })?;

        let (initiator_tx, responder_rx) = mpsc::channel(64);
        let (responder_tx, initiator_rx) = mpsc::channel(64);
        initiator
            .send(ChannelPair {
                tx: initiator_tx,
                rx: initiator_rx,
            })
            .map_err(|_| TransportError::Closed)?;

        let ready_tx = self.ready_tx.lock().take().ok_or(TransportError::Closed)?;
        ready_tx
            .send(ChannelPair {
                tx: responder_tx,
                rx: responder_rx,
            })
            .map_err(|_| TransportError::Closed)?;

        Ok(format!("answer:{}", offer))
    }

    async fn apply_answer(&self, _answer: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn apply_candidate(&self, _candidate: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn local_candidates(&self) -> Result<Vec<String>, TransportError> {
        Ok(vec!["memory:direct".to_string()])
    }

    fn establish(&self) -> BoxFuture<'static, Result<ChannelPair, TransportError>> {
        let ready_rx = self.ready_rx.lock().take();
        Box::pin(async move {
            match ready_rx {
                Some(rx) => rx.await.map_err(|_| TransportError::Closed),
                None => Err(TransportError::Closed),
            }
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::peer::Frame;

    #[tokio::test]
    async fn test_sessions_pair_up() {
        let transport = MemoryTransport::new();
        let a = transport.new_session().await.unwrap();
        let b = transport.new_session().await.unwrap();

        let a_ready = a.establish();
        let b_ready = b.establish();

        let offer = a.create_offer().await.unwrap();
        b.apply_offer(&offer).await.unwrap();

        let mut a_pair = a_ready.await.unwrap();
        let mut b_pair = b_ready.await.unwrap();

        a_pair.tx.send(Frame::Text("ping".into())).await.unwrap();
        assert_eq!(b_pair.rx.recv().await, Some(Frame::Text("ping".into())));

        b_pair.tx.send(Frame::Text("pong".into())).await.unwrap();
        assert_eq!(a_pair.rx.recv().await, Some(Frame::Text("pong".into())));
    }

    #[tokio::test]
    async fn test_unknown_offer_rejected() {
        let transport = MemoryTransport::new();
        let session = transport.new_session().await.unwrap();
        assert!(matches!(
            session.apply_offer("no-such-token").await,
            Err(TransportError::InvalidDescription(_))
        ));
    }
}
