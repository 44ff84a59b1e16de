//! Completion-driven I/O engine.
//!
//! Socket operations are posted asynchronously and report back through one
//! shared completion queue:
//!
//! ```text
//!   accept thread ──► SessionRegistry::acquire ──► Session::initialize ──► post read
//!
//!   I/O runtime tasks ──► Completion ──► [bounded MPMC queue] ──► worker 0..N
//!                                                                  │
//!        Received: buffer bytes, drain packets, post next read ◄───┤
//!        Sent:     retire write, post next queued write       ◄────┘
//! ```
//!
//! A small tokio runtime stands in for the operating system's overlapped I/O:
//! each posted read or write is one task performing exactly one operation and
//! producing exactly one [`Completion`]. All protocol work happens on the
//! worker threads, any of which may service any session. Reads for a session
//! are serialized because the next read is posted only after the previous
//! bytes were drained.

use crate::config::ServerConfig;
use crate::dispatcher::PacketDispatcher;
use crate::error::{ServerError, SessionError};
use crate::registry::SessionRegistry;
use crate::session::{Link, Session};
use crate::store::CredentialStore;
use bytes::{Bytes, BytesMut};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::{Handle, Runtime};
use tokio::sync::watch;

/// Outcome of one asynchronous socket operation.
#[derive(Debug)]
pub enum Completion {
    /// A read finished; zero bytes means the peer closed the connection
    Received {
        /// Pool slot of the owning session
        slot: usize,
        /// Session id the read was posted under
        session_id: u32,
        /// Bytes read, or the socket error
        result: io::Result<Bytes>,
    },
    /// A write finished
    Sent {
        /// Pool slot of the owning session
        slot: usize,
        /// Session id the write was posted under
        session_id: u32,
        /// Bytes written, or the socket error
        result: io::Result<usize>,
    },
    /// Sentinel telling one worker to exit
    Shutdown,
}

/// [`Link`] over a TCP socket driven by the I/O runtime.
struct TcpLink {
    slot: usize,
    session_id: u32,
    peer: SocketAddr,
    stream: Arc<TcpStream>,
    control: std::net::TcpStream,
    completions: Sender<Completion>,
    handle: Handle,
}

impl TcpLink {
    /// Must be called from within the I/O runtime context.
    fn new(
        stream: TcpStream,
        peer: SocketAddr,
        slot: usize,
        session_id: u32,
        completions: Sender<Completion>,
        handle: Handle,
    ) -> io::Result<Self> {
        let stream = stream.into_std()?;
        stream.set_nodelay(true)?;
        let control = stream.try_clone()?;
        let stream = Arc::new(TcpStream::from_std(stream)?);

        Ok(Self {
            slot,
            session_id,
            peer,
            stream,
            control,
            completions,
            handle,
        })
    }
}

impl Link for TcpLink {
    fn post_recv(&self, max_len: usize) -> io::Result<()> {
        let stream = Arc::clone(&self.stream);
        let completions = self.completions.clone();
        let (slot, session_id) = (self.slot, self.session_id);

        self.handle.spawn(async move {
            let result = read_some(&stream, max_len).await;
            // Receiver gone means the engine is shutting down
            let _ = completions.send(Completion::Received {
                slot,
                session_id,
                result,
            });
        });
        Ok(())
    }

    fn post_send(&self, data: Bytes) -> io::Result<()> {
        let stream = Arc::clone(&self.stream);
        let completions = self.completions.clone();
        let (slot, session_id) = (self.slot, self.session_id);

        self.handle.spawn(async move {
            let result = write_all(&stream, &data).await;
            let _ = completions.send(Completion::Sent {
                slot,
                session_id,
                result,
            });
        });
        Ok(())
    }

    fn close(&self) {
        if let Err(err) = self.control.shutdown(Shutdown::Both)
            && err.kind() != io::ErrorKind::NotConnected
        {
            tracing::debug!(session_id = self.session_id, error = %err, "Socket shutdown failed");
        }
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }
}

async fn read_some(stream: &TcpStream, max_len: usize) -> io::Result<Bytes> {
    let mut buf = BytesMut::zeroed(max_len);
    loop {
        stream.readable().await?;
        match stream.try_read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                return Ok(buf.freeze());
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => return Err(err),
        }
    }
}

async fn write_all(stream: &TcpStream, data: &[u8]) -> io::Result<usize> {
    let mut written = 0;
    while written < data.len() {
        stream.writable().await?;
        match stream.try_write(&data[written..]) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => written += n,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => return Err(err),
        }
    }
    Ok(written)
}

/// State shared by the accept, worker and housekeeping threads.
struct EngineCore {
    registry: Arc<SessionRegistry>,
    dispatcher: PacketDispatcher,
    store: Arc<dyn CredentialStore>,
    completions: Sender<Completion>,
    handle: Handle,
    running: AtomicBool,
    next_session_id: AtomicU32,
}

impl EngineCore {
    async fn accept_loop(self: Arc<Self>, listener: TcpListener, mut stop: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = stop.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.admit(stream, peer),
                    Err(err) => {
                        tracing::warn!(error = %err, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
            }
        }
        tracing::debug!("Accept loop stopped");
    }

    fn admit(&self, stream: TcpStream, peer: SocketAddr) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }

        let Some(session) = self.registry.acquire() else {
            tracing::warn!(
                %peer,
                capacity = self.registry.capacity(),
                "Session pool exhausted, refusing connection"
            );
            return;
        };

        let session_id = self.allocate_session_id();
        let link = match TcpLink::new(
            stream,
            peer,
            session.slot(),
            session_id,
            self.completions.clone(),
            self.handle.clone(),
        ) {
            Ok(link) => link,
            Err(err) => {
                tracing::warn!(%peer, error = %err, "Failed to set up connection");
                self.registry.release(&session);
                return;
            }
        };

        session.initialize(session_id, Arc::new(link));
        if let Err(err) = session.register_read(session_id) {
            tracing::warn!(session_id, error = %err, "Failed to post first read");
            self.registry.release(&session);
            return;
        }

        tracing::info!(session_id, slot = session.slot(), %peer, "Client connected");
    }

    fn allocate_session_id(&self) -> u32 {
        loop {
            let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    fn run_worker(&self, completions: &Receiver<Completion>) {
        while let Ok(completion) = completions.recv() {
            match completion {
                Completion::Shutdown => break,
                Completion::Received {
                    slot,
                    session_id,
                    result,
                } => self.on_received(slot, session_id, result),
                Completion::Sent {
                    slot,
                    session_id,
                    result,
                } => self.on_sent(slot, session_id, result),
            }
        }
    }

    fn on_received(&self, slot: usize, session_id: u32, result: io::Result<Bytes>) {
        let Some(session) = self.registry.slot(slot).cloned() else {
            return;
        };

        let data = match result {
            Ok(data) if !data.is_empty() => data,
            Ok(_) => {
                self.disconnect(&session, session_id, "closed by peer");
                return;
            }
            Err(err) => {
                tracing::debug!(session_id, error = %err, "Receive failed");
                self.disconnect(&session, session_id, "receive error");
                return;
            }
        };
        tracing::trace!(session_id, size = data.len(), "Received bytes");

        match session.buffer_received(session_id, &data) {
            Ok(()) => {}
            Err(SessionError::Stale { .. } | SessionError::Closed) => return,
            Err(err) => {
                tracing::warn!(session_id, error = %err, "Dropping connection");
                self.disconnect(&session, session_id, "receive buffer overflow");
                return;
            }
        }

        if let Err(err) = self.dispatcher.drain(&session, session_id) {
            tracing::warn!(session_id, error = %err, "Protocol violation");
            self.disconnect(&session, session_id, "protocol violation");
            return;
        }

        match session.register_read(session_id) {
            Ok(()) | Err(SessionError::Stale { .. } | SessionError::Closed) => {}
            Err(err) => {
                tracing::warn!(session_id, error = %err, "Failed to post read");
                self.disconnect(&session, session_id, "read failed");
            }
        }
    }

    fn on_sent(&self, slot: usize, session_id: u32, result: io::Result<usize>) {
        let Some(session) = self.registry.slot(slot) else {
            return;
        };

        match result {
            Ok(size) => {
                tracing::trace!(session_id, size, "Sent bytes");
                session.on_send_completed(session_id);
            }
            Err(err) => {
                tracing::debug!(session_id, error = %err, "Send failed");
                self.disconnect(session, session_id, "send error");
            }
        }
    }

    /// Tear a connection down. Only the first caller per connection acts.
    fn disconnect(&self, session: &Arc<Session>, session_id: u32, reason: &str) {
        let Some(departure) = session.begin_disconnect(session_id) else {
            return;
        };

        if let Some(username) = &departure.username {
            if let Some(token) = &departure.token
                && let Err(err) = self.store.delete_session_token(token)
            {
                tracing::warn!(session_id, error = %err, "Failed to delete session token");
            }
            if let Err(err) = self.store.clear_online_presence(username) {
                tracing::warn!(session_id, %username, error = %err, "Failed to clear presence");
            }
        }

        let peer = session.peer_addr();
        self.registry.release(session);
        tracing::info!(
            session_id,
            slot = session.slot(),
            peer = ?peer,
            reason,
            "Client disconnected"
        );

        if let Some(username) = departure.username
            && self.running.load(Ordering::Acquire)
        {
            self.dispatcher.announce_departure(&username);
        }
    }

    /// Purge expired tokens and, if enabled, close idle sessions until
    /// `stop` fires.
    fn run_housekeeping(&self, idle_timeout: Option<Duration>, stop: &Receiver<()>) {
        let interval = housekeeping_interval(idle_timeout);

        loop {
            match stop.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }

            match self.store.purge_expired_tokens() {
                Ok(0) => {}
                Ok(purged) => tracing::debug!(purged, "Purged expired session tokens"),
                Err(err) => tracing::warn!(error = %err, "Failed to purge session tokens"),
            }

            let Some(idle_timeout) = idle_timeout else {
                continue;
            };
            for session in self.registry.sessions() {
                let session_id = session.id();
                if session_id != 0 && session.is_valid() && session.idle_for() >= idle_timeout {
                    self.disconnect(session, session_id, "idle timeout");
                }
            }
        }
    }
}

/// Listener, worker pool and I/O runtime of a running server.
///
/// Dropping the engine shuts it down.
pub struct IoEngine {
    core: Arc<EngineCore>,
    local_addr: SocketAddr,
    runtime: Option<Runtime>,
    stop_accept: Option<watch::Sender<bool>>,
    stop_housekeeping: Option<Sender<()>>,
    acceptor: Option<JoinHandle<()>>,
    housekeeper: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl IoEngine {
    /// Bind the listener and start all threads.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if the runtime cannot be built, the address
    /// cannot be bound, or a thread cannot be spawned.
    pub fn start(
        config: &ServerConfig,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, ServerError> {
        let bind_failed = |source| ServerError::BindFailed {
            addr: config.bind,
            source,
        };
        let listener = std::net::TcpListener::bind(config.bind).map_err(bind_failed)?;
        listener.set_nonblocking(true).map_err(bind_failed)?;
        let local_addr = listener.local_addr().map_err(bind_failed)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.io_threads)
            .thread_name("switchboard-io")
            .enable_io()
            .enable_time()
            .build()
            .map_err(|source| ServerError::StartFailed {
                what: "I/O runtime",
                source,
            })?;

        // A plain drop of the runtime panics when called from async code
        let registered = {
            let _guard = runtime.enter();
            TcpListener::from_std(listener)
        };
        let listener = match registered {
            Ok(listener) => listener,
            Err(source) => {
                runtime.shutdown_background();
                return Err(bind_failed(source));
            }
        };

        let (completions, queue) = crossbeam_channel::bounded(config.completion_queue_depth);
        let registry = Arc::new(SessionRegistry::new(
            config.max_sessions,
            config.session_limits(),
        ));
        let dispatcher = PacketDispatcher::new(registry.clone(), store.clone(), config.token_ttl());

        let core = Arc::new(EngineCore {
            registry,
            dispatcher,
            store,
            completions,
            handle: runtime.handle().clone(),
            running: AtomicBool::new(true),
            next_session_id: AtomicU32::new(1),
        });

        let mut engine = Self {
            core: core.clone(),
            local_addr,
            runtime: Some(runtime),
            stop_accept: None,
            stop_housekeeping: None,
            acceptor: None,
            housekeeper: None,
            workers: Vec::with_capacity(config.workers),
        };

        // From here on a failed spawn drops `engine`, which stops whatever
        // already started.
        for index in 0..config.workers {
            let core = core.clone();
            let queue = queue.clone();
            let worker = spawn_thread(format!("switchboard-worker-{index}"), "worker thread", move || {
                core.run_worker(&queue);
            })?;
            engine.workers.push(worker);
        }

        {
            let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
            let core = core.clone();
            let idle_timeout = config.idle_timeout();
            engine.stop_housekeeping = Some(stop_tx);
            engine.housekeeper = Some(spawn_thread(
                "switchboard-housekeeping".to_string(),
                "housekeeping thread",
                move || core.run_housekeeping(idle_timeout, &stop_rx),
            )?);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        engine.stop_accept = Some(stop_tx);
        let handle = core.handle.clone();
        engine.acceptor = Some(spawn_thread(
            "switchboard-accept".to_string(),
            "accept thread",
            move || handle.block_on(core.accept_loop(listener, stop_rx)),
        )?);

        tracing::info!(
            addr = %local_addr,
            workers = config.workers,
            max_sessions = config.max_sessions,
            "I/O engine started"
        );
        Ok(engine)
    }

    /// Address the listener is bound to.
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Session pool and directory.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.core.registry
    }

    /// Whether the engine is accepting and processing.
    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::Acquire)
    }

    /// Stop accepting, drain the workers, close every session and release
    /// the I/O runtime.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.core.running.store(false, Ordering::Release);

        if let Some(stop) = self.stop_accept.take() {
            let _ = stop.send(true);
        }
        if let Some(acceptor) = self.acceptor.take()
            && acceptor.join().is_err()
        {
            tracing::error!("Accept thread panicked");
        }

        // Dropping the sender wakes the housekeeper
        self.stop_housekeeping.take();
        if let Some(housekeeper) = self.housekeeper.take()
            && housekeeper.join().is_err()
        {
            tracing::error!("Housekeeping thread panicked");
        }

        for _ in &self.workers {
            let _ = self.core.completions.send(Completion::Shutdown);
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("Worker thread panicked");
            }
        }

        for session in self.core.registry.sessions() {
            let session_id = session.id();
            if session_id != 0 {
                self.core.disconnect(session, session_id, "server shutdown");
            }
        }

        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
            tracing::info!("I/O engine stopped");
        }
    }
}

impl Drop for IoEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Housekeeping tick: a quarter of the idle timeout within bounds, or the
/// upper bound when idle sessions are kept.
fn housekeeping_interval(idle_timeout: Option<Duration>) -> Duration {
    const MIN: Duration = Duration::from_millis(100);
    const MAX: Duration = Duration::from_secs(5);
    idle_timeout.map_or(MAX, |timeout| (timeout / 4).clamp(MIN, MAX))
}

fn spawn_thread<F>(name: String, what: &'static str, body: F) -> Result<JoinHandle<()>, ServerError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name)
        .spawn(body)
        .map_err(|source| ServerError::StartFailed { what, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_housekeeping_interval() {
        assert_eq!(housekeeping_interval(None), Duration::from_secs(5));
        assert_eq!(
            housekeeping_interval(Some(Duration::from_secs(1))),
            Duration::from_millis(250)
        );
        assert_eq!(
            housekeeping_interval(Some(Duration::from_millis(10))),
            Duration::from_millis(100)
        );
        assert_eq!(
            housekeeping_interval(Some(Duration::from_secs(600))),
            Duration::from_secs(5)
        );
    }
}
