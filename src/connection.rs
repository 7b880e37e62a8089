//! Connection builder and lifecycle.
//!
//! [`ConnectionBuilder`] provides a fluent API for configuring handlers
//! and registrations; [`ConnectionBuilder::connect`] manages the lifecycle:
//!
//! 1. Open the TCP stream
//! 2. Exchange versioned hellos (peer class, protocol version)
//! 3. Flush seeded event registrations
//! 4. Spawn the writer task and the receive loop
//!
//! The receive loop runs in its own task; sends go through the writer
//! task, so the two directions never contend. Handlers run inline on the
//! receive loop.
//!
//! # Example
//!
//! ```ignore
//! use broccoli_client::{Connection, Event};
//! use broccoli_client::value::BroPort;
//!
//! #[tokio::main]
//! async fn main() -> broccoli_client::Result<()> {
//!     let conn = Connection::builder()
//!         .peer_class("rust-client")
//!         .register("foo")
//!         .on_event("foo", |event| async move {
//!             println!("foo with {} parameters", event.len());
//!             Ok(())
//!         })
//!         .connect("bro.yourorg.com:1234")
//!         .await?;
//!
//!     let accepted = conn.send(&Event::new("bar").arg(BroPort::tcp(80))).await?;
//!     println!("event bar {}", if accepted { "queued" } else { "rejected" });
//!     conn.close().await;
//!     Ok(())
//! }
//! ```

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Notify;
use tokio::task::{AbortHandle, JoinHandle};

use crate::dispatch::{EventRegistry, HandlerResult};
use crate::error::{BroError, Result};
use crate::protocol::{
    build_frame, is_reserved_event, registration_frame, registration_update, validate_event,
    Event, FrameBuffer, FrameLimits, Hello, MAX_PEER_CLASS_LEN, PROTOCOL_VERSION,
};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterConfig, WriterHandle};

/// Lifecycle state of a connection.
///
/// `Unconnected` and `Handshaking` are transient states inside
/// [`ConnectionBuilder::connect`]; a [`Connection`] handle is observed as
/// `Ready` until it fails or is closed. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Created, transport not yet opened.
    Unconnected = 0,
    /// Transport open, hello exchange in progress.
    Handshaking = 1,
    /// Handshake complete, events flowing.
    Ready = 2,
    /// Terminal: transport released, all operations fail.
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Unconnected,
            1 => ConnectionState::Handshaking,
            2 => ConnectionState::Ready,
            _ => ConnectionState::Closed,
        }
    }
}

/// Builder for configuring and connecting a [`Connection`].
pub struct ConnectionBuilder {
    peer_class: String,
    registry: EventRegistry,
    registrations: HashSet<String>,
    limits: FrameLimits,
    writer_config: WriterConfig,
}

impl ConnectionBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self {
            peer_class: "broccoli-client".to_string(),
            registry: EventRegistry::new(),
            registrations: HashSet::new(),
            limits: FrameLimits::default(),
            writer_config: WriterConfig::default(),
        }
    }

    /// Set the class identifier reported to the peer in the hello.
    pub fn peer_class(mut self, peer_class: impl Into<String>) -> Self {
        self.peer_class = peer_class.into();
        self
    }

    /// Register a handler for a named event, replacing any prior one.
    pub fn on_event<F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry.set(name, handler);
        self
    }

    /// Register the default handler for events with no named handler.
    pub fn on_unhandled<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry.set_unhandled(handler);
        self
    }

    /// Seed the registration set with an event name.
    ///
    /// Seeded names are sent to the peer during the handshake, before the
    /// connection reaches `Ready`.
    pub fn register(mut self, name: impl Into<String>) -> Self {
        self.registrations.insert(name.into());
        self
    }

    /// Override the inbound frame limits.
    pub fn frame_limits(mut self, limits: FrameLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Override the writer task configuration.
    pub fn writer_config(mut self, config: WriterConfig) -> Self {
        self.writer_config = config;
        self
    }

    /// Open the transport, perform the handshake, and start the
    /// connection tasks.
    ///
    /// # Errors
    ///
    /// `Io` for transport failures while dialing or during the exchange,
    /// `Handshake` for bad magic, version mismatch, or a peer that closes
    /// before completing its hello. On any error the transport is
    /// released and the connection is `Closed` without reaching `Ready`.
    pub async fn connect<A: ToSocketAddrs>(self, addr: A) -> Result<Connection> {
        if self.peer_class.len() > MAX_PEER_CLASS_LEN as usize {
            return Err(BroError::Handshake(format!(
                "peer class length {} exceeds maximum {}",
                self.peer_class.len(),
                MAX_PEER_CLASS_LEN
            )));
        }

        let stream = TcpStream::connect(addr).await?;
        let _ = stream.set_nodelay(true);
        let (mut read_half, mut write_half) = stream.into_split();

        tracing::debug!(peer_class = %self.peer_class, "handshaking");
        write_half
            .write_all(&Hello::new(self.peer_class.as_str()).encode())
            .await?;
        write_half.flush().await?;

        let (peer_hello, leftover) = read_hello(&mut read_half).await?;
        if peer_hello.version != PROTOCOL_VERSION {
            return Err(BroError::Handshake(format!(
                "protocol version mismatch: peer speaks {}, local speaks {}",
                peer_hello.version, PROTOCOL_VERSION
            )));
        }
        tracing::debug!(peer_class = %peer_hello.peer_class, "handshake complete");

        let (writer, writer_task) = spawn_writer_task(write_half, self.writer_config);

        // Tell the peer which events to push before going Ready.
        for name in &self.registrations {
            writer
                .send(OutboundFrame::new(registration_frame(name, true)))
                .await
                .map_err(|_| {
                    BroError::Handshake("connection closed while sending registrations".to_string())
                })?;
        }

        let shared = Arc::new(Shared {
            state: AtomicU8::new(ConnectionState::Ready as u8),
            peer_class: peer_hello.peer_class,
            registrations: Mutex::new(self.registrations),
            limits: self.limits,
            writer,
            writer_abort: writer_task.abort_handle(),
            shutdown: Notify::new(),
            closed: Notify::new(),
        });

        let registry = Arc::new(self.registry);
        let read_task = tokio::spawn(read_loop(
            read_half,
            leftover,
            registry,
            shared.clone(),
            writer_task,
        ));

        Ok(Connection {
            shared,
            read_task: Mutex::new(Some(read_task)),
        })
    }
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Read the peer's hello, returning it plus any bytes the peer sent
/// right behind it (those seed the frame buffer, so nothing is lost
/// between handshake and receive loop).
async fn read_hello(reader: &mut OwnedReadHalf) -> Result<(Hello, Bytes)> {
    let mut buf = BytesMut::with_capacity(1024);
    loop {
        if let Some((hello, consumed)) = Hello::try_decode(&buf)? {
            buf.advance(consumed);
            return Ok((hello, buf.freeze()));
        }

        let n = reader.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(BroError::Handshake(
                "peer closed the connection during handshake".to_string(),
            ));
        }
    }
}

/// State shared between the connection handle and its tasks.
#[derive(Debug)]
struct Shared {
    state: AtomicU8,
    peer_class: String,
    registrations: Mutex<HashSet<String>>,
    limits: FrameLimits,
    writer: WriterHandle,
    /// Aborts the writer task, dropping the write half of the socket.
    writer_abort: AbortHandle,
    /// Signals the receive loop to stop, unblocking a pending read.
    shutdown: Notify,
    /// Signals waiters that the connection reached `Closed`.
    closed: Notify,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Transition to `Closed` and release the writer. The first caller
    /// wins; every fatal path funnels through here, so the transport is
    /// torn down exactly once no matter which side failed.
    fn mark_closed(&self) -> bool {
        let prior = self
            .state
            .swap(ConnectionState::Closed as u8, Ordering::AcqRel);
        let newly_closed = prior != ConnectionState::Closed as u8;
        if newly_closed {
            self.writer_abort.abort();
            self.closed.notify_waiters();
        }
        newly_closed
    }
}

/// A connected client for the event-exchange protocol.
///
/// Send and receive paths are independent: [`Connection::send`] queues
/// frames to the writer task while the receive loop dispatches inbound
/// events to the handlers registered at build time.
#[derive(Debug)]
pub struct Connection {
    shared: Arc<Shared>,
    read_task: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Create a connection builder.
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// The class identifier the peer reported during the handshake.
    pub fn peer_class(&self) -> &str {
        &self.shared.peer_class
    }

    /// Event names currently registered for reception, sorted.
    pub fn registered_events(&self) -> Vec<String> {
        let set = self.shared.registrations.lock().unwrap();
        let mut names: Vec<String> = set.iter().cloned().collect();
        names.sort();
        names
    }

    /// Reject events that must not reach the wire: sends after close,
    /// reserved names, and values exceeding the limits a receiving peer
    /// enforces. None of these close the connection.
    fn check_outbound(&self, event: &Event) -> Result<()> {
        if self.state() == ConnectionState::Closed {
            return Err(BroError::ConnectionClosed);
        }
        if is_reserved_event(event.name()) {
            return Err(BroError::Protocol(format!(
                "event name {:?} is reserved",
                event.name()
            )));
        }
        validate_event(event, &self.shared.limits)
    }

    /// Send an event to the peer.
    ///
    /// `Ok(true)` means the frame was accepted into the outbound buffer -
    /// not that the peer received or acknowledged it. `Ok(false)` means
    /// the transport rejected it (writer gone or backpressure window
    /// full); the peer is likely closing and callers should react.
    ///
    /// # Errors
    ///
    /// `ConnectionClosed` when called after close, `Protocol` for
    /// reserved event names, `Frame` for events exceeding the limits a
    /// receiving peer enforces. The connection stays usable after any of
    /// these.
    pub async fn send(&self, event: &Event) -> Result<bool> {
        self.check_outbound(event)?;

        let frame = OutboundFrame::new(build_frame(event));
        match self.shared.writer.send(frame).await {
            Ok(()) => Ok(true),
            Err(BroError::ConnectionClosed) | Err(BroError::SendTimeout) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Send an event without waiting for backpressure to clear.
    ///
    /// Same contract as [`Connection::send`], but returns `Ok(false)`
    /// immediately when the outbound buffer is full.
    pub fn try_send(&self, event: &Event) -> Result<bool> {
        self.check_outbound(event)?;

        let frame = OutboundFrame::new(build_frame(event));
        match self.shared.writer.try_send(frame) {
            Ok(()) => Ok(true),
            Err(BroError::ConnectionClosed) | Err(BroError::SendTimeout) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Register interest in a named event, pushing an update frame to the
    /// peer immediately. Registering a name twice is a no-op.
    pub async fn register_for_event(&self, name: &str) -> Result<()> {
        self.update_registration(name, true).await
    }

    /// Revoke interest in a named event, pushing an update frame to the
    /// peer immediately. Unregistering an unknown name is a no-op.
    pub async fn unregister_for_event(&self, name: &str) -> Result<()> {
        self.update_registration(name, false).await
    }

    async fn update_registration(&self, name: &str, register: bool) -> Result<()> {
        if self.state() == ConnectionState::Closed {
            return Err(BroError::ConnectionClosed);
        }
        if is_reserved_event(name) {
            return Err(BroError::Protocol(format!(
                "event name {:?} is reserved",
                name
            )));
        }

        let changed = {
            let mut set = self.shared.registrations.lock().unwrap();
            if register {
                set.insert(name.to_string())
            } else {
                set.remove(name)
            }
        };
        if !changed {
            return Ok(());
        }

        tracing::debug!(event = name, register, "sending registration update");
        self.shared
            .writer
            .send(OutboundFrame::new(registration_frame(name, register)))
            .await
    }

    /// Whether the outbound pending window is currently full.
    pub fn is_backpressure_active(&self) -> bool {
        self.shared.writer.is_backpressure_active()
    }

    /// Number of frames queued but not yet written.
    pub fn pending_frames(&self) -> usize {
        self.shared.writer.pending_count()
    }

    /// Wait until the connection reaches `Closed` (peer disconnect,
    /// protocol error, or a local [`Connection::close`]).
    pub async fn wait_until_closed(&self) {
        loop {
            let closed = self.shared.closed.notified();
            if self.state() == ConnectionState::Closed {
                return;
            }
            closed.await;
        }
    }

    /// Close the connection.
    ///
    /// Idempotent: the transport is released exactly once, pending sends
    /// are discarded, and a receive loop blocked on the socket is woken
    /// promptly. Subsequent `send`/`register` calls fail with
    /// `ConnectionClosed`.
    pub async fn close(&self) {
        let newly_closed = self.shared.mark_closed();
        self.shared.shutdown.notify_one();

        let read_task = self.read_task.lock().unwrap().take();
        if let Some(read_task) = read_task {
            let _ = read_task.await;
        }

        if newly_closed {
            tracing::debug!("connection closed");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.writer_abort.abort();
        if let Ok(mut guard) = self.read_task.lock() {
            if let Some(read_task) = guard.take() {
                read_task.abort();
            }
        }
    }
}

/// Receive loop: reads inbound bytes, reassembles frames, and dispatches
/// events to handlers. Exits on peer close, transport error, protocol
/// violation, writer-task failure, or the shutdown signal; always leaves
/// the connection `Closed` with the transport released (the exit path
/// runs `mark_closed`, which aborts the writer, and returning drops the
/// read half).
async fn read_loop(
    mut reader: OwnedReadHalf,
    seed: Bytes,
    registry: Arc<EventRegistry>,
    shared: Arc<Shared>,
    mut writer_task: JoinHandle<Result<()>>,
) {
    let mut frames = FrameBuffer::with_limits(shared.limits);
    let mut buf = vec![0u8; 64 * 1024];

    // Bytes the peer sent right behind its hello.
    match frames.push(&seed) {
        Ok(events) => {
            for event in events {
                deliver(event, &registry).await;
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "malformed data after handshake");
            shared.mark_closed();
            return;
        }
    }

    loop {
        tokio::select! {
            _ = shared.shutdown.notified() => {
                tracing::debug!("receive loop shutting down");
                break;
            }
            joined = &mut writer_task => {
                match joined {
                    Ok(Ok(())) => tracing::debug!("writer task finished"),
                    Ok(Err(e)) => tracing::error!(error = %e, "writer task failed"),
                    Err(_) => {} // aborted during close
                }
                break;
            }
            result = reader.read(&mut buf) => match result {
                Ok(0) => {
                    tracing::debug!("peer closed the connection");
                    break;
                }
                Ok(n) => {
                    let events = match frames.push(&buf[..n]) {
                        Ok(events) => events,
                        Err(e) => {
                            tracing::error!(error = %e, "protocol violation on inbound stream");
                            break;
                        }
                    };
                    for event in events {
                        deliver(event, &registry).await;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "transport read failed");
                    break;
                }
            }
        }
    }

    shared.mark_closed();
}

/// Route one inbound event. Reserved control frames never reach user
/// handlers; handler errors are logged, not fatal.
async fn deliver(event: Event, registry: &EventRegistry) {
    if is_reserved_event(event.name()) {
        // A client has no push registry of its own to update.
        if let Some((name, register)) = registration_update(&event) {
            tracing::debug!(event = name, register, "peer sent registration update");
        } else {
            tracing::debug!(event = event.name(), "ignoring reserved control frame");
        }
        return;
    }

    let name = event.name().to_string();
    if let Err(e) = registry.dispatch(event).await {
        tracing::error!(event = %name, error = %e, "event handler failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_from_u8_roundtrip() {
        for state in [
            ConnectionState::Unconnected,
            ConnectionState::Handshaking,
            ConnectionState::Ready,
            ConnectionState::Closed,
        ] {
            assert_eq!(ConnectionState::from_u8(state as u8), state);
        }
        // Unknown values degrade to Closed, never to a live state.
        assert_eq!(ConnectionState::from_u8(200), ConnectionState::Closed);
    }

    #[test]
    fn test_builder_chaining() {
        let builder = Connection::builder()
            .peer_class("tester")
            .register("foo")
            .register("foo") // duplicate collapses
            .register("ping")
            .on_event("foo", |_| async { Ok(()) })
            .on_unhandled(|_| async { Ok(()) });

        assert_eq!(builder.peer_class, "tester");
        assert_eq!(builder.registrations.len(), 2);
        assert!(builder.registry.contains("foo"));
    }

    #[tokio::test]
    async fn test_mark_closed_is_idempotent_and_stops_the_writer() {
        let writer_task = tokio::spawn(async {
            std::future::pending::<()>().await;
        });
        let shared = Shared {
            state: AtomicU8::new(ConnectionState::Ready as u8),
            peer_class: String::new(),
            registrations: Mutex::new(HashSet::new()),
            limits: FrameLimits::default(),
            writer: {
                let (tx, _rx) = tokio::sync::mpsc::channel(1);
                // A detached handle is enough for state tests.
                crate::writer::WriterHandle::test_handle(tx)
            },
            writer_abort: writer_task.abort_handle(),
            shutdown: Notify::new(),
            closed: Notify::new(),
        };

        assert!(shared.mark_closed());
        assert!(!shared.mark_closed());
        assert_eq!(shared.state(), ConnectionState::Closed);

        // The first transition must have aborted the writer task.
        assert!(writer_task.await.unwrap_err().is_cancelled());
    }
}
