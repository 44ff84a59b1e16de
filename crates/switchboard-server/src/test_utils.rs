//! Shared helpers for unit tests.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use crate::session::{Link, Session, SessionLimits};
use bytes::Bytes;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use switchboard_proto::Packet;

/// Link that records posted operations instead of touching a socket.
#[derive(Debug, Default)]
pub struct RecordingLink {
    sends: Mutex<Vec<Bytes>>,
    recvs: Mutex<Vec<usize>>,
    closed: AtomicBool,
    fail_sends: AtomicBool,
}

impl RecordingLink {
    /// Drain the writes posted so far.
    pub fn take_sends(&self) -> Vec<Bytes> {
        std::mem::take(&mut *self.sends.lock())
    }

    /// Sizes of every read posted so far.
    pub fn recv_posts(&self) -> Vec<usize> {
        self.recvs.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Make subsequent `post_send` calls fail.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Release);
    }
}

impl Link for RecordingLink {
    fn post_recv(&self, max_len: usize) -> io::Result<()> {
        self.recvs.lock().push(max_len);
        Ok(())
    }

    fn post_send(&self, data: Bytes) -> io::Result<()> {
        if self.fail_sends.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link down"));
        }
        self.sends.lock().push(data);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// A session in slot `slot` bound to a fresh recording link.
pub fn connected_session(slot: usize, session_id: u32) -> (Arc<Session>, Arc<RecordingLink>) {
    let session = Arc::new(Session::new(slot, SessionLimits::default()));
    let link = Arc::new(RecordingLink::default());
    session.initialize(session_id, link.clone());
    (session, link)
}

/// Complete every write the session posts until its queue is empty and
/// return the decoded packets in send order.
pub fn flush_sent(session: &Session, link: &RecordingLink) -> Vec<Packet> {
    let mut packets = Vec::new();
    loop {
        let sent = link.take_sends();
        if sent.is_empty() {
            return packets;
        }
        for bytes in sent {
            packets.push(Packet::decode(&bytes).expect("server sent a malformed packet"));
            session.on_send_completed(session.id());
        }
    }
}
