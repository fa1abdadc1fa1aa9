//! Connection establishment over a pluggable transport
//!
//! The signaling layer only moves opaque strings (offers, answers,
//! candidates); what those strings mean belongs to a [`Transport`]
//! implementation. A [`Connection`] drives one [`Session`] through the
//! offer/answer handshake, buffering remote candidates that arrive before
//! the session has a remote description to attach them to.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::exchange::Frame;

/// Errors from the transport layer
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("session closed")]
    Closed,
    #[error("invalid description: {0}")]
    InvalidDescription(String),
}

/// Lifecycle of a peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Peer discovered, no handshake started
    Announced,
    /// We sent an offer and are waiting for an answer
    Offering,
    /// We received an offer and sent an answer
    Answering,
    /// Descriptions exchanged, candidates still flowing
    IceExchange,
    /// Data channel open
    Connected,
    Closed,
}

/// The two halves of an established data channel
pub struct ChannelPair {
    pub tx: mpsc::Sender<Frame>,
    pub rx: mpsc::Receiver<Frame>,
}

/// One handshake attempt with one remote peer
#[async_trait]
pub trait Session: Send + Sync {
    /// Produce a local offer description
    async fn create_offer(&self) -> Result<String, TransportError>;

    /// Apply a remote offer and produce the local answer
    async fn apply_offer(&self, offer: &str) -> Result<String, TransportError>;

    /// Apply the remote answer to our offer
    async fn apply_answer(&self, answer: &str) -> Result<(), TransportError>;

    /// Apply one remote connectivity candidate
    async fn apply_candidate(&self, candidate: &str) -> Result<(), TransportError>;

    /// Local candidates to send to the remote, available after a
    /// description exists
    async fn local_candidates(&self) -> Result<Vec<String>, TransportError>;

    /// Resolve once the data channel is open
    ///
    /// Returned as a detached future so the caller can keep applying
    /// candidates on the session while waiting.
    fn establish(&self) -> BoxFuture<'static, Result<ChannelPair, TransportError>>;
}

/// Factory for handshake sessions
#[async_trait]
pub trait Transport: Send + Sync {
    async fn new_session(&self) -> Result<Box<dyn Session>, TransportError>;
}

/// A single peer connection being negotiated
///
/// Owns the session plus the candidate buffer. Candidates can arrive on
/// the relay before the offer does, so they are queued until a remote
/// description has been applied and then flushed in arrival order.
pub struct Connection {
    session: Box<dyn Session>,
    state: Arc<Mutex<ConnectionState>>,
    pending_candidates: Mutex<Vec<String>>,
    remote_described: Mutex<bool>,
}

impl Connection {
    pub fn new(session: Box<dyn Session>) -> Self {
        Self {
            session,
            state: Arc::new(Mutex::new(ConnectionState::Announced)),
            pending_candidates: Mutex::new(Vec::new()),
            remote_described: Mutex::new(false),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: ConnectionState) {
        debug!("connection state -> {:?}", state);
        *self.state.lock() = state;
    }

    /// Start the handshake as initiator
    pub async fn offer(&self) -> Result<String, TransportError> {
        let offer = self.session.create_offer().await?;
        self.set_state(ConnectionState::Offering);
        Ok(offer)
    }

    /// Accept a remote offer as responder, producing our answer
    pub async fn answer(&self, offer: &str) -> Result<String, TransportError> {
        let answer = self.session.apply_offer(offer).await?;
        *self.remote_described.lock() = true;
        self.set_state(ConnectionState::Answering);
        self.flush_candidates().await?;
        Ok(answer)
    }

    /// Apply the remote answer to our outstanding offer
    pub async fn accept_answer(&self, answer: &str) -> Result<(), TransportError> {
        self.session.apply_answer(answer).await?;
        *self.remote_described.lock() = true;
        self.set_state(ConnectionState::IceExchange);
        self.flush_candidates().await
    }

    /// Apply a remote candidate, or buffer it if no remote description
    /// has been applied yet
    pub async fn add_candidate(&self, candidate: String) -> Result<(), TransportError> {
        if *self.remote_described.lock() {
            self.session.apply_candidate(&candidate).await
        } else {
            debug!("buffering candidate before remote description");
            self.pending_candidates.lock().push(candidate);
            Ok(())
        }
    }

    async fn flush_candidates(&self) -> Result<(), TransportError> {
        let buffered: Vec<String> = std::mem::take(&mut *self.pending_candidates.lock());
        if !buffered.is_empty() {
            debug!("flushing {} buffered candidates", buffered.len());
        }
        for candidate in buffered {
            self.session.apply_candidate(&candidate).await?;
        }
        Ok(())
    }

    pub async fn local_candidates(&self) -> Result<Vec<String>, TransportError> {
        self.session.local_candidates().await
    }

    /// Future resolving to the open data channel
    pub fn established(&self) -> BoxFuture<'static, Result<ChannelPair, TransportError>> {
        self.session.establish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Session stub recording the order candidates were applied in
    struct RecordingSession {
        described: AtomicBool,
        applied: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingSession {
        fn new() -> (Self, Arc<Mutex<Vec<String>>>) {
            let applied = Arc::new(Mutex::new(Vec::new()));
            let session = Self {
                described: AtomicBool::new(false),
                applied: applied.clone(),
            };
            (session, applied)
        }
    }

    #[async_trait]
    impl Session for RecordingSession {
        async fn create_offer(&self) -> Result<String, TransportError> {
            Ok("offer".into())
        }

        async fn apply_offer(&self, _offer: &str) -> Result<String, TransportError> {
            self.described.store(true, Ordering::SeqCst);
            Ok("answer".into())
        }

        async fn apply_answer(&self, _answer: &str) -> Result<(), TransportError> {
            self.described.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn apply_candidate(&self, candidate: &str) -> Result<(), TransportError> {
            if !self.described.load(Ordering::SeqCst) {
                return Err(TransportError::InvalidDescription(
                    "candidate before description".into(),
                ));
            }
            self.applied.lock().push(candidate.to_string());
            Ok(())
        }

        async fn local_candidates(&self) -> Result<Vec<String>, TransportError> {
            Ok(vec!["cand-local".into()])
        }

        fn establish(&self) -> BoxFuture<'static, Result<ChannelPair, TransportError>> {
            Box::pin(async { Err(TransportError::Closed) })
        }
    }

    #[tokio::test]
    async fn test_candidates_buffered_until_offer() {
        let (session, applied) = RecordingSession::new();
        let conn = Connection::new(Box::new(session));

        conn.add_candidate("early-1".into()).await.unwrap();
        conn.add_candidate("early-2".into()).await.unwrap();

        conn.answer("offer").await.unwrap();
        conn.add_candidate("late".into()).await.unwrap();

        assert_eq!(*applied.lock(), vec!["early-1", "early-2", "late"]);
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let (session, _applied) = RecordingSession::new();
        let conn = Connection::new(Box::new(session));
        assert_eq!(conn.state(), ConnectionState::Announced);

        conn.offer().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Offering);

        conn.accept_answer("answer").await.unwrap();
        assert_eq!(conn.state(), ConnectionState::IceExchange);

        conn.set_state(ConnectionState::Connected);
        assert_eq!(conn.state(), ConnectionState::Connected);
    }
}
