//! Peer orchestration
//!
//! The [`PeerManager`] sits in front of the local store: reads that miss
//! locally are requested from every connected peer at once, the first
//! response whose bytes actually hash to the requested value wins, and the
//! verified block is written back to the local store. Discovery, handshake
//! routing, and per-peer request multiplexing all live here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, warn};

use block_store::{Hash, Store, StoreError};

use crate::crypto::SecretKey;

use super::connection::{Connection, ConnectionState, Transport, TransportError};
use super::exchange::{decode_data_frame, encode_data_frame, Control, ExchangeError, Frame};
use super::peer_id::PeerId;
use super::signal::{unix_now, Relay, RelayEvent, SignalError, SignalPayload};

/// Errors that can occur in the peer manager
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("peer error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("signal error: {0}")]
    Signal(#[from] SignalError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),
}

/// Tunables for discovery and block exchange
#[derive(Debug, Clone)]
pub struct PeerManagerConfig {
    /// Rendezvous topic on the relay network
    pub topic: String,
    /// How long to wait for one peer to answer one block request
    pub request_timeout: Duration,
    /// How long a handshake may take before the attempt is abandoned
    pub connect_timeout: Duration,
    /// Expiration attached to published relay events
    pub event_ttl: Duration,
}

impl Default for PeerManagerConfig {
    fn default() -> Self {
        Self {
            topic: super::signal::DEFAULT_TOPIC.to_string(),
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(30),
            event_ttl: Duration::from_secs(60),
        }
    }
}

/// Most buffered candidates kept for a peer whose offer has not arrived
const MAX_EARLY_CANDIDATES: usize = 32;

/// Relay messages routed into an in-flight handshake task
enum Negotiation {
    RemoteAnswer(String),
    RemoteCandidate(String),
}

/// An established data channel to one peer
///
/// Requests are multiplexed by a locally assigned id; each in-flight id
/// maps to a oneshot that the receive loop resolves with the block bytes
/// (or `None` for a miss or teardown).
struct PeerLink {
    outbound: mpsc::Sender<Frame>,
    pending: Mutex<HashMap<u32, oneshot::Sender<Option<Bytes>>>>,
    next_id: AtomicU32,
}

impl PeerLink {
    fn new(outbound: mpsc::Sender<Frame>) -> Self {
        Self {
            outbound,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(0),
        }
    }

    /// Request one block from this peer, resolving to `None` on a miss or
    /// when the peer does not answer within `timeout`
    ///
    /// The pending entry is removed on every exit path; a silent peer must
    /// not grow the table for the life of the connection.
    async fn request(&self, hash: &Hash, timeout: Duration) -> Result<Option<Bytes>, PeerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let control = match Control::req(id, hash).encode() {
            Ok(control) => control,
            Err(e) => {
                self.pending.lock().remove(&id);
                return Err(e.into());
            }
        };
        if self.outbound.send(Frame::Text(control)).await.is_err() {
            self.pending.lock().remove(&id);
            return Err(ExchangeError::ChannelClosed.into());
        }

        match tokio::time::timeout(timeout, rx).await {
            // a dropped sender means the link tore down mid-request
            Ok(reply) => Ok(reply.unwrap_or(None)),
            Err(_) => {
                self.pending.lock().remove(&id);
                Ok(None)
            }
        }
    }

    fn resolve(&self, id: u32, data: Option<Bytes>) {
        if let Some(tx) = self.pending.lock().remove(&id) {
            let _ = tx.send(data);
        } else {
            debug!("response for unknown request id {}", id);
        }
    }

    /// Fail every in-flight request; called when the channel closes
    fn drain(&self) {
        for (_, tx) in self.pending.lock().drain() {
            let _ = tx.send(None);
        }
    }
}

struct ManagerInner {
    secret: SecretKey,
    local: PeerId,
    store: Arc<dyn Store>,
    relay: Arc<dyn Relay>,
    transport: Arc<dyn Transport>,
    config: PeerManagerConfig,
    /// Negotiation inboxes for handshakes still in flight
    handles: Mutex<HashMap<PeerId, mpsc::Sender<Negotiation>>>,
    /// Open data channels
    links: Mutex<HashMap<PeerId, Arc<PeerLink>>>,
    /// Candidates that arrived on the relay before the matching offer
    early_candidates: Mutex<HashMap<PeerId, Vec<String>>>,
    shutdown: watch::Sender<bool>,
}

/// Peer-assisted front of the local block store
#[derive(Clone)]
pub struct PeerManager {
    inner: Arc<ManagerInner>,
}

/// Deterministic tiebreak when two peers greet each other at once: the
/// lexicographically smaller peer id sends the offer, the other waits.
fn should_initiate(local: &PeerId, remote: &PeerId) -> bool {
    local.to_string() < remote.to_string()
}

impl PeerManager {
    pub fn new(
        secret: SecretKey,
        store: Arc<dyn Store>,
        relay: Arc<dyn Relay>,
        transport: Arc<dyn Transport>,
        config: PeerManagerConfig,
    ) -> Self {
        let local = PeerId::generate(&secret);
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(ManagerInner {
                secret,
                local,
                store,
                relay,
                transport,
                config,
                handles: Mutex::new(HashMap::new()),
                links: Mutex::new(HashMap::new()),
                early_candidates: Mutex::new(HashMap::new()),
                shutdown,
            }),
        }
    }

    /// This process's peer identity
    pub fn local_id(&self) -> &PeerId {
        &self.inner.local
    }

    /// Peers with an open data channel
    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.inner.links.lock().keys().cloned().collect()
    }

    /// Subscribe to the rendezvous topic and announce presence
    pub async fn start(&self) -> Result<(), PeerError> {
        let events = self.inner.relay.subscribe(&self.inner.config.topic).await?;
        let inner = self.inner.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = ManagerInner::discovery_loop(inner, events) => {}
                _ = shutdown.wait_for(|stop| *stop) => {}
            }
        });
        self.announce().await
    }

    /// Publish a presence announcement to the topic
    pub async fn announce(&self) -> Result<(), PeerError> {
        debug!("announcing as {}", self.inner.local.short());
        self.inner
            .send_signal(SignalPayload::Hello {
                peer_id: self.inner.local.clone(),
            })
            .await
    }

    /// Stop discovery and drop all peer state
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
        self.inner.handles.lock().clear();
        for (_, link) in self.inner.links.lock().drain() {
            link.drain();
        }
    }

    /// Get a block, consulting connected peers on a local miss
    ///
    /// All connected peers are asked concurrently; the first response whose
    /// bytes hash to the requested value is stored locally and returned.
    /// Mismatched responses are discarded. `Ok(None)` means no peer holds
    /// the block (or none answered in time).
    pub async fn fetch(&self, hash: &Hash) -> Result<Option<Bytes>, PeerError> {
        if let Some(data) = self.inner.store.get(hash).await? {
            return Ok(Some(data));
        }

        let links: Vec<(PeerId, Arc<PeerLink>)> = self
            .inner
            .links
            .lock()
            .iter()
            .map(|(peer, link)| (peer.clone(), link.clone()))
            .collect();
        if links.is_empty() {
            return Ok(None);
        }
        debug!("fetching {} from {} peers", hash, links.len());

        let timeout = self.inner.config.request_timeout;
        let mut requests: FuturesUnordered<_> = links
            .into_iter()
            .map(|(peer, link)| async move {
                let hash = *hash;
                match link.request(&hash, timeout).await {
                    Ok(data) => (peer, data),
                    Err(e) => {
                        debug!("request to {} failed: {}", peer.short(), e);
                        (peer, None)
                    }
                }
            })
            .collect();

        while let Some((peer, data)) = requests.next().await {
            let Some(data) = data else { continue };
            if Hash::of(&data) != *hash {
                warn!("peer {} sent bytes not matching {}", peer.short(), hash);
                continue;
            }
            self.inner.store.put(*hash, data.clone()).await?;
            return Ok(Some(data));
        }
        Ok(None)
    }
}

impl ManagerInner {
    async fn send_signal(&self, payload: SignalPayload) -> Result<(), PeerError> {
        let event = RelayEvent::new(
            &self.secret,
            &self.config.topic,
            &payload,
            self.config.event_ttl,
        )?;
        self.relay.publish(event).await?;
        Ok(())
    }

    async fn discovery_loop(inner: Arc<Self>, mut events: mpsc::Receiver<RelayEvent>) {
        while let Some(event) = events.recv().await {
            if let Err(e) = inner.clone().handle_event(event).await {
                debug!("dropping relay event: {}", e);
            }
        }
        debug!("relay subscription closed");
    }

    async fn handle_event(self: Arc<Self>, event: RelayEvent) -> Result<(), SignalError> {
        event.verify()?;
        if event.is_expired(unix_now()) {
            return Err(SignalError::Protocol("event expired".to_string()));
        }
        let payload = event.payload()?;

        // the envelope author must be the peer the payload claims to be
        if event.author()? != *payload.sender().pubkey() {
            return Err(SignalError::Protocol(
                "payload sender does not match event author".to_string(),
            ));
        }
        // our own announcements echo back from the relay
        if payload.sender() == &self.local {
            return Ok(());
        }
        // directed messages for other peers are not ours to act on
        if matches!(payload.recipient(), Some(to) if to != &self.local) {
            return Ok(());
        }

        match payload {
            SignalPayload::Hello { peer_id } => self.on_hello(peer_id).await,
            SignalPayload::Offer { peer_id, sdp, .. } => {
                self.on_offer(peer_id, sdp);
                Ok(())
            }
            SignalPayload::Answer { peer_id, sdp, .. } => {
                self.route(&peer_id, Negotiation::RemoteAnswer(sdp)).await;
                Ok(())
            }
            SignalPayload::Candidate {
                peer_id, candidate, ..
            } => {
                self.on_candidate(peer_id, candidate).await;
                Ok(())
            }
        }
    }

    async fn on_hello(self: &Arc<Self>, remote: PeerId) -> Result<(), SignalError> {
        if self.links.lock().contains_key(&remote) || self.handles.lock().contains_key(&remote) {
            return Ok(());
        }
        if should_initiate(&self.local, &remote) {
            debug!("hello from {}, initiating", remote.short());
            self.clone().spawn_handshake(remote, None);
        } else {
            // make sure the other side has seen us; it will initiate
            debug!("hello from {}, re-announcing", remote.short());
            self.send_signal(SignalPayload::Hello {
                peer_id: self.local.clone(),
            })
            .await
            .map_err(|e| SignalError::Protocol(format!("re-announce failed: {}", e)))?;
        }
        Ok(())
    }

    fn on_offer(self: &Arc<Self>, remote: PeerId, sdp: String) {
        if self.links.lock().contains_key(&remote) {
            debug!("offer from already-connected {}", remote.short());
            return;
        }
        self.clone().spawn_handshake(remote, Some(sdp));
    }

    async fn on_candidate(self: &Arc<Self>, remote: PeerId, candidate: String) {
        if self.handles.lock().contains_key(&remote) {
            self.route(&remote, Negotiation::RemoteCandidate(candidate))
                .await;
            return;
        }

        // relay delivery can reorder; hold it for the offer
        debug!("candidate from {} before handshake", remote.short());
        let first = {
            let mut early = self.early_candidates.lock();
            let buffer = early.entry(remote.clone()).or_default();
            if buffer.len() >= MAX_EARLY_CANDIDATES {
                debug!("candidate buffer for {} full, dropping", remote.short());
                return;
            }
            buffer.push(candidate);
            buffer.len() == 1
        };

        // a peer whose offer never arrives must not grow the buffer map
        // forever; give it one handshake window, then forget it
        if first {
            let inner = self.clone();
            let window = self.config.connect_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                if !inner.handles.lock().contains_key(&remote)
                    && inner.early_candidates.lock().remove(&remote).is_some()
                {
                    debug!("discarding stale candidates from {}", remote.short());
                }
            });
        }
    }

    async fn route(&self, remote: &PeerId, msg: Negotiation) {
        let handle = self.handles.lock().get(remote).cloned();
        match handle {
            Some(tx) => {
                if tx.send(msg).await.is_err() {
                    debug!("handshake with {} already finished", remote.short());
                }
            }
            None => debug!("no handshake in flight with {}", remote.short()),
        }
    }

    /// Run one handshake to completion on its own task
    ///
    /// `remote_offer` is `Some` when we are the responder. The negotiation
    /// inbox is registered before the task starts so answer/candidate
    /// events arriving immediately after have somewhere to go.
    fn spawn_handshake(self: Arc<Self>, remote: PeerId, remote_offer: Option<String>) {
        let (tx, rx) = mpsc::channel(16);
        self.handles.lock().insert(remote.clone(), tx);

        tokio::spawn(async move {
            let timeout = self.config.connect_timeout;
            let result =
                tokio::time::timeout(timeout, self.handshake(remote.clone(), remote_offer, rx))
                    .await;
            self.handles.lock().remove(&remote);
            match result {
                Ok(Ok(())) => debug!("connected to {}", remote.short()),
                Ok(Err(e)) => error!("handshake with {} failed: {}", remote.short(), e),
                Err(_) => warn!("handshake with {} timed out", remote.short()),
            }
        });
    }

    async fn handshake(
        self: &Arc<Self>,
        remote: PeerId,
        remote_offer: Option<String>,
        mut inbox: mpsc::Receiver<Negotiation>,
    ) -> Result<(), PeerError> {
        let session = self.transport.new_session().await?;
        let conn = Connection::new(session);
        let mut established = conn.established();

        match remote_offer {
            Some(offer) => {
                let answer = conn.answer(&offer).await?;
                self.send_signal(SignalPayload::Answer {
                    peer_id: self.local.clone(),
                    to: remote.clone(),
                    sdp: answer,
                })
                .await?;
            }
            None => {
                let offer = conn.offer().await?;
                self.send_signal(SignalPayload::Offer {
                    peer_id: self.local.clone(),
                    to: remote.clone(),
                    sdp: offer,
                })
                .await?;
            }
        }

        // candidates that raced ahead of this handshake; the connection
        // buffers them itself until a remote description is in place
        let early = self
            .early_candidates
            .lock()
            .remove(&remote)
            .unwrap_or_default();
        for candidate in early {
            conn.add_candidate(candidate).await?;
        }

        for candidate in conn.local_candidates().await? {
            self.send_signal(SignalPayload::Candidate {
                peer_id: self.local.clone(),
                to: remote.clone(),
                candidate,
            })
            .await?;
        }

        loop {
            tokio::select! {
                msg = inbox.recv() => match msg {
                    Some(Negotiation::RemoteAnswer(sdp)) => conn.accept_answer(&sdp).await?,
                    Some(Negotiation::RemoteCandidate(c)) => conn.add_candidate(c).await?,
                    None => return Err(TransportError::Closed.into()),
                },
                pair = &mut established => {
                    let pair = pair?;
                    conn.set_state(ConnectionState::Connected);
                    self.clone().register_link(remote, pair.tx, pair.rx);
                    return Ok(());
                }
            }
        }
    }

    /// Install an open channel and start serving/receiving on it
    fn register_link(
        self: Arc<Self>,
        remote: PeerId,
        tx: mpsc::Sender<Frame>,
        mut rx: mpsc::Receiver<Frame>,
    ) {
        let link = Arc::new(PeerLink::new(tx));
        self.links.lock().insert(remote.clone(), link.clone());

        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = self.handle_frame(&link, frame).await {
                    debug!("frame from {} dropped: {}", remote.short(), e);
                }
            }
            debug!("channel to {} closed", remote.short());
            self.links.lock().remove(&remote);
            link.drain();
        });
    }

    async fn handle_frame(&self, link: &PeerLink, frame: Frame) -> Result<(), PeerError> {
        match frame {
            Frame::Text(text) => match Control::decode(&text)? {
                Control::Req { id, hash } => {
                    let hash: Hash = hash
                        .parse()
                        .map_err(|_| ExchangeError::Protocol("malformed hash in req".into()))?;
                    let data = self.store.get(&hash).await?;
                    let res = Control::res(id, &hash, data.is_some()).encode()?;
                    link.outbound
                        .send(Frame::Text(res))
                        .await
                        .map_err(|_| ExchangeError::ChannelClosed)?;
                    if let Some(data) = data {
                        link.outbound
                            .send(Frame::Binary(encode_data_frame(id, &data)))
                            .await
                            .map_err(|_| ExchangeError::ChannelClosed)?;
                    }
                }
                Control::Res { id, found, .. } => {
                    // a found response is resolved by the binary frame
                    if !found {
                        link.resolve(id, None);
                    }
                }
            },
            Frame::Binary(bytes) => {
                let (id, data) = decode_data_frame(&bytes)?;
                link.resolve(id, Some(data));
            }
        }
        Ok(())
    }
}
