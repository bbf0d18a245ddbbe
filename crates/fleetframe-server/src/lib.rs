//! Fleetframe production server.
//!
//! Production "glue" around [`fleetframe_core`]'s Sans-IO dispatcher: Quinn
//! for QUIC transport, Tokio for the async runtime, system time and
//! cryptographic RNG. Each accepted connection gets one task that owns its
//! [`Connection`] state machine and drives the dispatcher serially, which is
//! what gives a single connection's events their required ordering; the
//! dispatcher's shared registries handle cross-connection concurrency.
//!
//! # Components
//!
//! - [`Server`]: accept loop and per-connection session driver
//! - [`QuinnTransport`]: QUIC endpoint with TLS 1.3 and ALPN `fleetframe`
//! - [`SystemEnv`]: production environment (real clocks, crypto RNG)
//! - [`TracingAudit`]: audit events as structured tracing output

#![forbid(unsafe_code)]

mod audit;
mod error;
mod system_env;
mod transport;

use std::{collections::HashMap, sync::Arc, time::Duration};

pub use audit::TracingAudit;
use bytes::BytesMut;
pub use error::ServerError;
use fleetframe_core::{
    Action, Connection, ConnectionPhase, CoreConfig, Dispatcher, LogLevel, MemoryDeliveryStore,
    TokenAuthenticator,
};
use fleetframe_proto::{Frame, FrameHeader};
pub use system_env::SystemEnv;
use tokio::sync::{RwLock, mpsc};
pub use transport::{QuinnConnection, QuinnTransport};

/// Dispatcher instantiation used by this runtime.
///
/// The delivery store is in-memory here; a production deployment substitutes
/// the platform datastore behind the same trait.
pub type AppDispatcher = Dispatcher<SystemEnv, MemoryDeliveryStore, TracingAudit>;

/// Outbound frame channels for all live connections.
///
/// Each connection has a dedicated writer task fed by an unbounded channel;
/// sending to a connection whose writer has died is silently dropped, which
/// is the lazy dead-member cleanup the room contract allows.
struct SharedState {
    senders: RwLock<HashMap<u64, mpsc::UnboundedSender<Frame>>>,
}

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:4433")
    pub bind_address: String,
    /// Path to TLS certificate (PEM format)
    pub cert_path: Option<String>,
    /// Path to TLS private key (PEM format)
    pub key_path: Option<String>,
    /// Shared HS256 secret for connection credentials
    pub jwt_secret: String,
    /// Dispatcher configuration (limits, timeouts)
    pub core: CoreConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4433".to_string(),
            cert_path: None,
            key_path: None,
            jwt_secret: String::new(),
            core: CoreConfig::default(),
        }
    }
}

/// Production fleetframe server.
pub struct Server {
    dispatcher: Arc<AppDispatcher>,
    transport: QuinnTransport,
    store: MemoryDeliveryStore,
    shared: Arc<SharedState>,
}

impl Server {
    /// Create and bind a new server.
    pub fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        if config.jwt_secret.is_empty() {
            return Err(ServerError::Config("jwt secret must not be empty".to_string()));
        }

        let env = SystemEnv::new();
        let store = MemoryDeliveryStore::new();
        let auth = TokenAuthenticator::new(config.jwt_secret.as_bytes());
        let dispatcher = Arc::new(Dispatcher::new(
            env,
            store.clone(),
            TracingAudit::new(),
            auth,
            config.core,
        ));

        let transport = QuinnTransport::bind(
            &config.bind_address,
            config.cert_path.as_deref(),
            config.key_path.as_deref(),
        )?;

        Ok(Self {
            dispatcher,
            transport,
            store,
            shared: Arc::new(SharedState { senders: RwLock::new(HashMap::new()) }),
        })
    }

    /// The dispatcher (introspection for tooling and tests).
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<AppDispatcher> {
        &self.dispatcher
    }

    /// The in-memory delivery store backing this runtime.
    #[must_use]
    pub fn store(&self) -> &MemoryDeliveryStore {
        &self.store
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// Run the server, accepting connections until shutdown.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!("server listening on {}", self.transport.local_addr()?);

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let dispatcher = Arc::clone(&self.dispatcher);
                    let shared = Arc::clone(&self.shared);

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, dispatcher, shared).await {
                            tracing::debug!("connection ended with error: {}", e);
                        }
                    });
                },
                Err(e) => {
                    tracing::error!("accept error: {}", e);
                },
            }
        }
    }
}

/// Drive one QUIC connection through its whole lifecycle.
async fn handle_connection(
    conn: QuinnConnection,
    dispatcher: Arc<AppDispatcher>,
    shared: Arc<SharedState>,
) -> Result<(), ServerError> {
    let remote = conn.remote_addr();
    let (mut session, actions) = dispatcher.accept(remote);
    let connection_id = session.id();

    execute_actions(&dispatcher, &shared, actions).await;

    if session.phase() == ConnectionPhase::Closed {
        // Refused at admission (capacity); nothing was registered.
        conn.close("max connections exceeded");
        return Ok(());
    }

    let reason = match conn.accept_bi().await {
        Ok((send, recv)) => {
            let (tx, rx) = mpsc::unbounded_channel();
            shared.senders.write().await.insert(connection_id, tx);
            tokio::spawn(write_frames(send, rx));

            drive_session(recv, &dispatcher, &shared, &mut session).await
        },
        Err(e) => format!("failed to accept frame stream: {e}"),
    };

    // Cleanup order: stop accepting outbound sends for this connection,
    // then run dispatcher cleanup. The session task is the only caller of
    // handle_frame for this connection, so no event can race the cleanup.
    shared.senders.write().await.remove(&connection_id);
    let actions = dispatcher.disconnect(&mut session, &reason);
    execute_actions(&dispatcher, &shared, actions).await;
    conn.close(&reason);

    Ok(())
}

/// Read frames off the connection's stream and feed the dispatcher,
/// interleaving periodic ticks for timeouts and heartbeats.
///
/// Returns the reason the session ended.
async fn drive_session(
    mut recv: quinn::RecvStream,
    dispatcher: &AppDispatcher,
    shared: &SharedState,
    session: &mut Connection<std::time::Instant>,
) -> String {
    let mut acc = BytesMut::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        // Plain `read` is used instead of `read_exact` because the read
        // future is dropped whenever the tick branch wins the select, and
        // partially-read frames must survive that.
        tokio::select! {
            read = recv.read(&mut chunk) => match read {
                Ok(Some(n)) => {
                    acc.extend_from_slice(&chunk[..n]);
                    match drain_frames(&mut acc, dispatcher, shared, session).await {
                        Ok(None) => {},
                        Ok(Some(reason)) | Err(reason) => return reason,
                    }
                },
                Ok(None) => return "peer closed stream".to_string(),
                Err(e) => return format!("transport read failed: {e}"),
            },
            _ = ticker.tick() => {
                let actions = dispatcher.tick(session);
                if let Some(reason) = execute_actions(dispatcher, shared, actions).await {
                    return reason;
                }
            },
        }
    }
}

/// Decode and dispatch every complete frame in the accumulator.
///
/// Returns `Ok(Some(reason))` when the dispatcher closed the session, and
/// `Err(reason)` on a framing violation (which always closes the
/// connection - a desynchronized stream cannot be trusted).
async fn drain_frames(
    acc: &mut BytesMut,
    dispatcher: &AppDispatcher,
    shared: &SharedState,
    session: &mut Connection<std::time::Instant>,
) -> Result<Option<String>, String> {
    loop {
        if acc.len() < FrameHeader::SIZE {
            return Ok(None);
        }

        let header =
            FrameHeader::from_bytes(&acc[..FrameHeader::SIZE]).map_err(|e| e.to_string())?;
        let total = FrameHeader::SIZE + header.payload_size() as usize;
        if acc.len() < total {
            return Ok(None);
        }

        let frame_bytes = acc.split_to(total);
        let frame = Frame::decode(&frame_bytes).map_err(|e| e.to_string())?;

        let actions = dispatcher.handle_frame(session, &frame);
        if let Some(reason) = execute_actions(dispatcher, shared, actions).await {
            return Ok(Some(reason));
        }
    }
}

/// Feed a connection's outbound frames onto its send stream.
async fn write_frames(mut send: quinn::SendStream, mut rx: mpsc::UnboundedReceiver<Frame>) {
    let mut buf = Vec::with_capacity(1024);

    while let Some(frame) = rx.recv().await {
        buf.clear();
        if frame.encode(&mut buf).is_err() {
            tracing::error!("dropping unencodable outbound frame");
            continue;
        }
        if send.write_all(&buf).await.is_err() {
            break;
        }
    }

    let _ = send.finish();
}

/// Execute dispatcher actions. Returns a close reason if one was requested.
async fn execute_actions(
    dispatcher: &AppDispatcher,
    shared: &SharedState,
    actions: Vec<Action>,
) -> Option<String> {
    let mut close_reason = None;

    for action in actions {
        match action {
            Action::Send { connection_id, frame } => {
                let senders = shared.senders.read().await;
                if let Some(tx) = senders.get(&connection_id) {
                    if tx.send(frame).is_err() {
                        tracing::debug!(connection_id, "send to closed connection dropped");
                    }
                } else {
                    tracing::debug!(connection_id, "send to unknown connection dropped");
                }
            },

            Action::Broadcast { delivery_id, frame, exclude } => {
                let members = dispatcher.rooms().members(delivery_id);
                let senders = shared.senders.read().await;

                for member in members {
                    if Some(member) == exclude {
                        continue;
                    }
                    if let Some(tx) = senders.get(&member) {
                        if tx.send(frame.clone()).is_err() {
                            tracing::debug!(
                                connection_id = member,
                                delivery_id,
                                "broadcast to closed connection dropped"
                            );
                        }
                    }
                }
            },

            Action::Close { connection_id, reason } => {
                tracing::info!(connection_id, %reason, "closing connection");
                close_reason = Some(reason);
            },

            Action::Log { level, message } => match level {
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
        }
    }

    close_reason
}
