//! Session management module
//!
//! A session is one client connection as seen by the tick:
//! - Lifecycle state machine (connected -> login queue -> in game -> logout)
//! - Outbound queue of game messages built during the tick
//! - Optional transport channel the queue is flushed into
//! - Thread-safe session registry

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::error::{GameError, ProtocolError, Result};
use crate::protocol::messages::OutgoingGamePacket;

/// Unique session identifier
pub type SessionId = u64;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Socket accepted, not yet authenticated
    Connected,
    /// Credentials accepted, waiting for the tick to admit the player
    LoginQueue,
    /// Admitted into the world
    LoggedIn,
    /// Logout requested, waiting for the tick to remove the player
    LogoutQueue,
    /// Removed from the world
    LoggedOut,
}

impl SessionState {
    /// Whether `next` is a legal successor of this state
    ///
    /// Transitions only move forward; `LoggedIn -> LogoutQueue` is the
    /// only way out of the active state.
    pub fn can_advance_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Connected, SessionState::LoginQueue)
                | (SessionState::LoginQueue, SessionState::LoggedIn)
                | (SessionState::LoggedIn, SessionState::LogoutQueue)
                | (SessionState::LogoutQueue, SessionState::LoggedOut)
        )
    }

    /// Whether the player is part of the simulation
    pub fn is_in_world(self) -> bool {
        matches!(self, SessionState::LoggedIn | SessionState::LogoutQueue)
    }

    /// Get a human-readable name for the state
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Connected => "Connected",
            SessionState::LoginQueue => "LoginQueue",
            SessionState::LoggedIn => "LoggedIn",
            SessionState::LogoutQueue => "LogoutQueue",
            SessionState::LoggedOut => "LoggedOut",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A connected client session
pub struct Session {
    /// Unique session identifier
    pub id: SessionId,
    /// Remote address of the client
    pub address: SocketAddr,
    /// Current lifecycle state
    state: RwLock<SessionState>,
    /// Messages queued this tick, in order
    pending: Mutex<Vec<OutgoingGamePacket>>,
    /// Time of session creation
    pub created_at: Instant,
    /// Outbound channel to the transport task
    outbound_tx: Option<mpsc::Sender<Vec<u8>>>,
}

impl Session {
    /// Create a new session
    pub fn new(id: SessionId, address: SocketAddr) -> Self {
        Self {
            id,
            address,
            state: RwLock::new(SessionState::Connected),
            pending: Mutex::new(Vec::new()),
            created_at: Instant::now(),
            outbound_tx: None,
        }
    }

    /// Create a new session with an outbound channel
    pub fn with_channel(
        id: SessionId,
        address: SocketAddr,
        outbound_tx: mpsc::Sender<Vec<u8>>,
    ) -> Self {
        let mut session = Self::new(id, address);
        session.outbound_tx = Some(outbound_tx);
        session
    }

    /// Get the current lifecycle state
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Check if session is in a specific state
    pub fn is_state(&self, check_state: SessionState) -> bool {
        *self.state.read() == check_state
    }

    /// Move from `expected` to `next`
    ///
    /// Fails without changing anything if the session is not in `expected`
    /// or if the transition would go backwards.
    pub fn advance(&self, expected: SessionState, next: SessionState) -> Result<()> {
        let mut state = self.state.write();
        if *state != expected {
            return Err(GameError::InvalidLifecycleState {
                expected,
                actual: *state,
            }
            .into());
        }
        if !expected.can_advance_to(next) {
            return Err(GameError::IllegalTransition {
                from: expected,
                to: next,
            }
            .into());
        }
        *state = next;
        drop(state);

        debug!(
            session_id = self.id,
            old_state = %expected,
            new_state = %next,
            "Session state changed"
        );
        Ok(())
    }

    /// Credentials accepted; wait for the next tick to admit the player
    pub fn enqueue_login(&self) -> Result<()> {
        self.advance(SessionState::Connected, SessionState::LoginQueue)
    }

    /// Logout requested; the next tick removes the player
    pub fn request_logout(&self) -> Result<()> {
        self.advance(SessionState::LoggedIn, SessionState::LogoutQueue)
    }

    /// Queue a message for the end-of-tick flush
    pub fn queue(&self, packet: OutgoingGamePacket) {
        self.pending.lock().push(packet);
    }

    /// Number of queued messages
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Copy of the queued messages, oldest first
    pub fn pending(&self) -> Vec<OutgoingGamePacket> {
        self.pending.lock().clone()
    }

    /// Take every queued message, leaving the queue empty
    pub fn drain_pending(&self) -> Vec<OutgoingGamePacket> {
        std::mem::take(&mut *self.pending.lock())
    }

    /// Encode and hand every queued message to the transport
    ///
    /// Never blocks. When the channel is full or closed the unsent
    /// messages go back to the front of the queue, in order, and the error
    /// is returned. A message that fails to encode is dropped. Without a
    /// channel the queue is discarded. Returns the number of messages sent.
    pub fn flush(&self) -> Result<usize> {
        let mut packets = self.drain_pending();
        let Some(tx) = &self.outbound_tx else {
            trace!(session_id = self.id, dropped = packets.len(), "No transport, discarding");
            return Ok(0);
        };

        let mut sent = 0;
        while sent < packets.len() {
            let encoded = match packets[sent].encode() {
                Ok(encoded) => encoded,
                Err(e) => {
                    self.requeue(packets.split_off(sent + 1));
                    return Err(e);
                }
            };
            if let Err(e) = tx.try_send(encoded) {
                self.requeue(packets.split_off(sent));
                return Err(match e {
                    mpsc::error::TrySendError::Full(_) => ProtocolError::ChannelFull(self.id),
                    mpsc::error::TrySendError::Closed(_) => ProtocolError::ChannelClosed(self.id),
                }
                .into());
            }
            sent += 1;
        }
        Ok(sent)
    }

    /// Put messages back ahead of anything queued since the flush began
    fn requeue(&self, unsent: Vec<OutgoingGamePacket>) {
        if unsent.is_empty() {
            return;
        }
        let mut pending = self.pending.lock();
        let mut newer = std::mem::replace(&mut *pending, unsent);
        pending.append(&mut newer);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Thread-safe session registry
pub struct SessionManager {
    /// Map of session ID to session
    sessions: DashMap<SessionId, Arc<Session>>,
    /// Next session ID to assign
    next_id: AtomicU64,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    fn register(&self, session: Session) -> Arc<Session> {
        let session = Arc::new(session);
        self.sessions.insert(session.id, session.clone());
        info!(
            session_id = session.id,
            address = %session.address,
            "Session created"
        );
        session
    }

    /// Create a session without a transport channel
    pub fn create_session(&self, address: SocketAddr) -> Arc<Session> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.register(Session::new(id, address))
    }

    /// Create a session with an outbound channel
    pub fn create_session_with_channel(
        &self,
        address: SocketAddr,
        outbound_tx: mpsc::Sender<Vec<u8>>,
    ) -> Arc<Session> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.register(Session::with_channel(id, address, outbound_tx))
    }

    /// Get a session by ID
    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|r| r.clone())
    }

    /// Remove a session
    pub fn remove(&self, id: SessionId) {
        if let Some((_, session)) = self.sessions.remove(&id) {
            info!(
                session_id = id,
                state = %session.state(),
                "Session removed"
            );
        }
    }

    /// Get the count of sessions
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Get the count of sessions per state
    pub fn count_by_state(&self) -> HashMap<SessionState, usize> {
        let mut counts = HashMap::new();
        for session in self.sessions.iter() {
            *counts.entry(session.state()).or_insert(0) += 1;
        }
        counts
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
