//! Per-connection session state.
//!
//! A [`Session`] is allocated once per pool slot and reused across
//! connections: [`Session::initialize`] binds it to a freshly accepted
//! [`Link`], [`Session::reset`] unbinds it. Every connection gets a new
//! session id, and every asynchronous completion carries the id it was posted
//! under, so completions that arrive after the slot was recycled are
//! recognised as stale and dropped.
//!
//! Locks are always taken in the order inbound, outbound, identity.

use crate::error::SessionError;
use crate::ring::RingBuffer;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use switchboard_proto::MAX_PACKET_SIZE;

/// A connection's handle on its socket.
///
/// Each posted operation completes asynchronously and reports back exactly
/// once through the engine's completion queue.
pub trait Link: Send + Sync {
    /// Arm one read of at most `max_len` bytes.
    fn post_recv(&self, max_len: usize) -> io::Result<()>;

    /// Start writing all of `data`.
    fn post_send(&self, data: Bytes) -> io::Result<()>;

    /// Shut the socket down. Pending operations complete with an error or
    /// zero bytes.
    fn close(&self);

    /// Remote address, if known.
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, not logged in
    Connected,
    /// Logged in and registered under a username
    Authenticated,
    /// Being torn down, or idle in the pool
    Disconnecting,
}

/// Buffer sizes and bounds applied to every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    /// Inbound ring capacity
    pub recv_buffer_size: usize,
    /// Largest single read
    pub read_chunk: usize,
    /// Largest outbound packet
    pub send_slot_size: usize,
    /// Most packets queued for sending
    pub max_send_backlog: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            recv_buffer_size: MAX_PACKET_SIZE * 2,
            read_chunk: MAX_PACKET_SIZE,
            send_slot_size: MAX_PACKET_SIZE,
            max_send_backlog: 256,
        }
    }
}

/// What teardown needs to know about a session, captured when it begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    /// Id of the departing connection
    pub session_id: u32,
    /// Username, if the session was authenticated
    pub username: Option<String>,
    /// Session token, if one was issued
    pub token: Option<String>,
}

struct Inbound {
    ring: RingBuffer,
    last_activity: Instant,
}

struct Outbound {
    queue: VecDeque<Bytes>,
    sending: bool,
}

struct Identity {
    id: u32,
    state: SessionState,
    username: String,
    token: Option<String>,
    link: Option<Arc<dyn Link>>,
}

/// Server-side state for one client connection.
pub struct Session {
    slot: usize,
    limits: SessionLimits,
    inbound: Mutex<Inbound>,
    outbound: Mutex<Outbound>,
    identity: RwLock<Identity>,
    leased: AtomicBool,
}

impl Session {
    /// Create an idle session for pool slot `slot`.
    pub fn new(slot: usize, limits: SessionLimits) -> Self {
        Self {
            slot,
            limits,
            inbound: Mutex::new(Inbound {
                ring: RingBuffer::new(limits.recv_buffer_size),
                last_activity: Instant::now(),
            }),
            outbound: Mutex::new(Outbound {
                queue: VecDeque::new(),
                sending: false,
            }),
            identity: RwLock::new(Identity {
                id: 0,
                state: SessionState::Disconnecting,
                username: String::new(),
                token: None,
                link: None,
            }),
            leased: AtomicBool::new(false),
        }
    }

    /// Pool slot index.
    pub const fn slot(&self) -> usize {
        self.slot
    }

    /// Current session id; 0 while idle.
    pub fn id(&self) -> u32 {
        self.identity.read().id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.identity.read().state
    }

    /// Username, once authenticated.
    pub fn username(&self) -> Option<String> {
        let identity = self.identity.read();
        (identity.state == SessionState::Authenticated).then(|| identity.username.clone())
    }

    /// Username, if connection `session_id` still owns the slot and is
    /// authenticated.
    pub fn username_for(&self, session_id: u32) -> Option<String> {
        let identity = self.identity.read();
        (identity.id == session_id && identity.state == SessionState::Authenticated)
            .then(|| identity.username.clone())
    }

    /// Remote address of the current connection.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.identity.read().link.as_ref().and_then(|link| link.peer_addr())
    }

    /// Whether the session holds a live connection that is not being torn down.
    pub fn is_valid(&self) -> bool {
        let identity = self.identity.read();
        identity.link.is_some() && identity.state != SessionState::Disconnecting
    }

    /// Whether the session is logged in.
    pub fn is_authenticated(&self) -> bool {
        let identity = self.identity.read();
        identity.link.is_some() && identity.state == SessionState::Authenticated
    }

    /// Time since bytes last arrived.
    pub fn idle_for(&self) -> Duration {
        self.inbound.lock().last_activity.elapsed()
    }

    /// Bind the session to a new connection.
    pub fn initialize(&self, session_id: u32, link: Arc<dyn Link>) {
        let previous = {
            let mut inbound = self.inbound.lock();
            let mut outbound = self.outbound.lock();
            let mut identity = self.identity.write();

            inbound.ring.clear();
            inbound.last_activity = Instant::now();
            outbound.queue.clear();
            outbound.sending = false;

            identity.id = session_id;
            identity.state = SessionState::Connected;
            identity.username.clear();
            identity.token = None;
            identity.link.replace(link)
        };

        if let Some(previous) = previous {
            previous.close();
        }
    }

    /// Close the connection and clear all per-connection state. Idempotent.
    pub fn reset(&self) {
        let link = {
            let mut inbound = self.inbound.lock();
            let mut outbound = self.outbound.lock();
            let mut identity = self.identity.write();

            inbound.ring.clear();
            outbound.queue.clear();
            outbound.sending = false;

            identity.id = 0;
            identity.state = SessionState::Disconnecting;
            identity.username.clear();
            identity.token = None;
            identity.link.take()
        };

        if let Some(link) = link {
            link.close();
        }
    }

    /// Arm the next read, sized to what the receive buffer can still take.
    pub fn register_read(&self, session_id: u32) -> Result<(), SessionError> {
        let (link, len) = {
            let inbound = self.inbound.lock();
            let identity = self.identity.read();
            Self::check_current(&identity, session_id)?;

            let free = inbound.ring.free_size();
            if free == 0 {
                return Err(SessionError::RecvOverflow {
                    incoming: 0,
                    free: 0,
                });
            }
            let link = identity.link.clone().ok_or(SessionError::Closed)?;
            (link, self.limits.read_chunk.min(free))
        };

        link.post_recv(len)?;
        Ok(())
    }

    /// Append bytes delivered by a receive completion.
    pub fn buffer_received(&self, session_id: u32, data: &[u8]) -> Result<(), SessionError> {
        let mut inbound = self.inbound.lock();
        Self::check_current(&self.identity.read(), session_id)?;

        if !inbound.ring.write(data) {
            return Err(SessionError::RecvOverflow {
                incoming: data.len(),
                free: inbound.ring.free_size(),
            });
        }
        inbound.last_activity = Instant::now();
        Ok(())
    }

    /// Run `f` with exclusive access to the receive buffer of connection
    /// `session_id`.
    ///
    /// The id is checked under the buffer lock, so `f` never sees bytes that
    /// belong to a later occupant of the slot.
    pub fn with_inbound_for<R>(
        &self,
        session_id: u32,
        f: impl FnOnce(&mut RingBuffer) -> R,
    ) -> Result<R, SessionError> {
        let mut inbound = self.inbound.lock();
        Self::check_current(&self.identity.read(), session_id)?;
        Ok(f(&mut inbound.ring))
    }

    /// Bytes waiting in the receive buffer.
    pub fn buffered(&self) -> usize {
        self.inbound.lock().ring.data_size()
    }

    /// Queue `data` for sending, starting transmission if nothing is in flight.
    ///
    /// Returns `false` if the packet was dropped: it is larger than a send
    /// slot, the backlog is full, or the session is not live.
    pub fn send(&self, data: Bytes) -> bool {
        self.enqueue(None, data)
    }

    /// Like [`Session::send`], but only while connection `session_id` still
    /// owns the slot. Replies to a request use this so they cannot reach a
    /// later occupant.
    pub fn send_for(&self, session_id: u32, data: Bytes) -> bool {
        self.enqueue(Some(session_id), data)
    }

    fn enqueue(&self, session_id: Option<u32>, data: Bytes) -> bool {
        if data.len() > self.limits.send_slot_size {
            tracing::warn!(
                slot = self.slot,
                size = data.len(),
                limit = self.limits.send_slot_size,
                "Dropping oversized outbound packet"
            );
            return false;
        }

        let mut outbound = self.outbound.lock();
        let identity = self.identity.read();
        let Some(link) = identity.link.as_deref() else {
            return false;
        };
        if identity.state == SessionState::Disconnecting
            || session_id.is_some_and(|id| id != identity.id)
        {
            return false;
        }

        if outbound.queue.len() >= self.limits.max_send_backlog {
            tracing::warn!(
                session_id = identity.id,
                backlog = outbound.queue.len(),
                "Send backlog full, dropping packet"
            );
            return false;
        }

        outbound.queue.push_back(data);
        if !outbound.sending {
            Self::start_next(&mut outbound, link, identity.id);
        }
        true
    }

    /// Retire the in-flight write and start the next queued one.
    pub fn on_send_completed(&self, session_id: u32) {
        let mut outbound = self.outbound.lock();
        let identity = self.identity.read();
        if identity.id != session_id {
            return;
        }

        outbound.queue.pop_front();
        match identity.link.as_deref() {
            Some(link) => Self::start_next(&mut outbound, link, session_id),
            None => outbound.sending = false,
        }
    }

    /// Number of packets queued or in flight.
    pub fn pending_sends(&self) -> usize {
        self.outbound.lock().queue.len()
    }

    /// Move a live session to `Disconnecting`.
    ///
    /// Only the first caller for a given connection gets `Some`; everyone
    /// else (a second failing completion, the idle sweep, shutdown) gets
    /// `None` and must leave teardown to the winner.
    pub fn begin_disconnect(&self, session_id: u32) -> Option<Departure> {
        let mut identity = self.identity.write();
        if identity.id != session_id
            || identity.link.is_none()
            || identity.state == SessionState::Disconnecting
        {
            return None;
        }

        let was_authenticated = identity.state == SessionState::Authenticated;
        identity.state = SessionState::Disconnecting;
        Some(Departure {
            session_id,
            username: was_authenticated.then(|| identity.username.clone()),
            token: identity.token.take(),
        })
    }

    /// Mark the session authenticated. Called by the registry under its lock.
    pub(crate) fn authenticate(&self, session_id: u32, username: &str, token: String) -> bool {
        let mut identity = self.identity.write();
        if identity.id != session_id
            || identity.link.is_none()
            || identity.state != SessionState::Connected
        {
            return false;
        }
        identity.state = SessionState::Authenticated;
        identity.username.clear();
        identity.username.push_str(username);
        identity.token = Some(token);
        true
    }

    /// Registry keys of a session that authenticated on this connection.
    /// Still available while the session is being torn down.
    pub(crate) fn registration(&self) -> Option<(u32, String)> {
        let identity = self.identity.read();
        (!identity.username.is_empty()).then(|| (identity.id, identity.username.clone()))
    }

    pub(crate) fn try_lease(&self) -> bool {
        self.leased
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn end_lease(&self) -> bool {
        self.leased.swap(false, Ordering::AcqRel)
    }

    fn check_current(identity: &Identity, session_id: u32) -> Result<(), SessionError> {
        if identity.id != session_id {
            return Err(SessionError::Stale {
                expected: session_id,
                current: identity.id,
            });
        }
        if identity.link.is_none() {
            return Err(SessionError::Closed);
        }
        Ok(())
    }

    fn start_next(outbound: &mut Outbound, link: &dyn Link, session_id: u32) {
        while let Some(front) = outbound.queue.front() {
            match link.post_send(front.clone()) {
                Ok(()) => {
                    outbound.sending = true;
                    return;
                }
                Err(err) => {
                    tracing::warn!(session_id, error = %err, "Failed to post send, dropping packet");
                    outbound.queue.pop_front();
                }
            }
        }
        outbound.sending = false;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let identity = self.identity.read();
        f.debug_struct("Session")
            .field("slot", &self.slot)
            .field("id", &identity.id)
            .field("state", &identity.state)
            .field("username", &identity.username)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_utils::{RecordingLink, connected_session};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_idle_session() {
        let session = Session::new(3, SessionLimits::default());
        assert_eq!(session.slot(), 3);
        assert_eq!(session.id(), 0);
        assert_eq!(session.state(), SessionState::Disconnecting);
        assert!(!session.is_valid());
        assert!(!session.send(Bytes::from_static(b"nobody home")));
    }

    #[test]
    fn test_one_write_in_flight() {
        let (session, link) = connected_session(0, 7);

        assert!(session.send(Bytes::from_static(b"one")));
        assert!(session.send(Bytes::from_static(b"two")));
        assert!(session.send(Bytes::from_static(b"three")));
        assert_eq!(link.take_sends(), vec![Bytes::from_static(b"one")]);
        assert_eq!(session.pending_sends(), 3);

        session.on_send_completed(7);
        assert_eq!(link.take_sends(), vec![Bytes::from_static(b"two")]);
        session.on_send_completed(7);
        assert_eq!(link.take_sends(), vec![Bytes::from_static(b"three")]);
        session.on_send_completed(7);
        assert!(link.take_sends().is_empty());
        assert_eq!(session.pending_sends(), 0);

        // Idle again: the next send goes straight out
        assert!(session.send(Bytes::from_static(b"four")));
        assert_eq!(link.take_sends(), vec![Bytes::from_static(b"four")]);
    }

    #[test]
    fn test_stale_send_completion_is_ignored() {
        let (session, link) = connected_session(0, 7);
        assert!(session.send(Bytes::from_static(b"a")));
        assert!(session.send(Bytes::from_static(b"b")));
        link.take_sends();

        session.on_send_completed(6);
        assert!(link.take_sends().is_empty());
        assert_eq!(session.pending_sends(), 2);
    }

    #[test]
    fn test_oversized_packet_is_dropped() {
        let (session, link) = connected_session(0, 1);
        let big = Bytes::from(vec![0u8; MAX_PACKET_SIZE + 1]);
        assert!(!session.send(big));
        assert!(link.take_sends().is_empty());
        assert_eq!(session.pending_sends(), 0);
    }

    #[test]
    fn test_backlog_bound() {
        let limits = SessionLimits {
            max_send_backlog: 2,
            ..SessionLimits::default()
        };
        let session = Session::new(0, limits);
        let link = Arc::new(RecordingLink::default());
        session.initialize(1, link.clone());

        assert!(session.send(Bytes::from_static(b"1")));
        assert!(session.send(Bytes::from_static(b"2")));
        assert!(!session.send(Bytes::from_static(b"3")));
        assert_eq!(session.pending_sends(), 2);
    }

    #[test]
    fn test_failed_post_moves_to_next_packet() {
        let (session, link) = connected_session(0, 1);
        link.fail_sends(true);
        assert!(session.send(Bytes::from_static(b"lost")));
        assert_eq!(session.pending_sends(), 0);

        link.fail_sends(false);
        assert!(session.send(Bytes::from_static(b"kept")));
        assert_eq!(link.take_sends(), vec![Bytes::from_static(b"kept")]);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let (session, link) = connected_session(2, 9);
        assert!(session.buffer_received(9, b"partial").is_ok());
        assert!(session.send(Bytes::from_static(b"queued")));

        session.reset();
        assert!(link.is_closed());
        assert_eq!(session.id(), 0);
        assert_eq!(session.state(), SessionState::Disconnecting);
        assert_eq!(session.pending_sends(), 0);
        assert_eq!(session.buffered(), 0);

        session.reset();
        assert_eq!(session.state(), SessionState::Disconnecting);
    }

    #[test]
    fn test_register_read_is_bounded_by_free_space() {
        let limits = SessionLimits {
            recv_buffer_size: 64,
            read_chunk: 32,
            ..SessionLimits::default()
        };
        let session = Session::new(0, limits);
        let link = Arc::new(RecordingLink::default());
        session.initialize(4, link.clone());

        session.register_read(4).unwrap();
        assert!(session.buffer_received(4, &[1u8; 50]).is_ok());
        session.register_read(4).unwrap();
        assert_eq!(link.recv_posts(), vec![32, 13]);

        assert!(session.buffer_received(4, &[2u8; 13]).is_ok());
        assert!(matches!(
            session.register_read(4),
            Err(SessionError::RecvOverflow { .. })
        ));
    }

    #[test]
    fn test_buffer_received_overflow_and_stale() {
        let limits = SessionLimits {
            recv_buffer_size: 8,
            ..SessionLimits::default()
        };
        let session = Session::new(0, limits);
        session.initialize(5, Arc::new(RecordingLink::default()));

        assert!(matches!(
            session.buffer_received(5, b"too many bytes"),
            Err(SessionError::RecvOverflow {
                incoming: 14,
                free: 7
            })
        ));
        assert!(matches!(
            session.buffer_received(4, b"x"),
            Err(SessionError::Stale {
                expected: 4,
                current: 5
            })
        ));
    }

    #[test]
    fn test_begin_disconnect_has_one_winner() {
        let (session, _link) = connected_session(0, 11);
        assert!(session.authenticate(11, "alice", "tok".to_string()));

        let departure = session.begin_disconnect(11).unwrap();
        assert_eq!(
            departure,
            Departure {
                session_id: 11,
                username: Some("alice".to_string()),
                token: Some("tok".to_string()),
            }
        );
        assert!(!session.is_valid());
        assert!(session.begin_disconnect(11).is_none());
        assert!(!session.send(Bytes::from_static(b"late")));
    }

    #[test]
    fn test_authenticate_requires_connected_state() {
        let (session, _link) = connected_session(0, 1);
        assert!(session.username().is_none());
        assert!(session.authenticate(1, "bob", "t1".to_string()));
        assert_eq!(session.username().as_deref(), Some("bob"));
        assert!(session.is_authenticated());
        assert!(!session.authenticate(1, "bob2", "t2".to_string()));

        session.reset();
        assert!(!session.authenticate(1, "bob", "t3".to_string()));
    }

    #[test]
    fn test_recycled_slot_rejects_previous_connection() {
        let (session, old_link) = connected_session(0, 1);
        assert!(session.buffer_received(1, b"old").is_ok());
        session.reset();

        let new_link = Arc::new(RecordingLink::default());
        session.initialize(2, new_link.clone());
        assert!(session.buffer_received(2, b"new bytes").is_ok());

        assert!(matches!(
            session.with_inbound_for(1, |ring| ring.consume(3)),
            Err(SessionError::Stale {
                expected: 1,
                current: 2
            })
        ));
        assert_eq!(session.buffered(), 9);
        assert_eq!(session.with_inbound_for(2, |ring| ring.data_size()).unwrap(), 9);

        assert!(!session.send_for(1, Bytes::from_static(b"late reply")));
        assert!(new_link.take_sends().is_empty());
        assert!(session.send_for(2, Bytes::from_static(b"reply")));
        assert_eq!(new_link.take_sends(), vec![Bytes::from_static(b"reply")]);
        assert!(old_link.take_sends().is_empty());

        assert!(!session.authenticate(1, "mallory", "t".to_string()));
        assert!(session.username_for(1).is_none());
        assert!(session.authenticate(2, "carol", "t".to_string()));
        assert_eq!(session.username_for(2).as_deref(), Some("carol"));
        assert!(session.username_for(1).is_none());
    }
}
