use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use dashmap::DashMap;
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::{RelayConfig, RoutingMode};
use crate::protocol::{ClientId, Envelope, MessageKind};

pub type ConnectionId = Uuid;

const MIN_PING_INTERVAL: Duration = Duration::from_secs(1);

struct Connection {
    identity: Option<ClientId>,
    tx: mpsc::UnboundedSender<String>,
}

/// What the relay did with one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    Registered(ClientId),
    Forwarded { delivered: usize },
    Unhandled,
    Malformed,
}

/// Live connection table shared by every socket task.
///
/// Holds nothing beyond what the open connections need: entries appear on
/// connect and are gone the moment the socket closes.
#[derive(Clone)]
pub struct RelayState {
    connections: Arc<DashMap<ConnectionId, Connection>>,
    identities: Arc<DashMap<ClientId, ConnectionId>>,
    routing: RoutingMode,
    ping_interval: Duration,
}

impl RelayState {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            identities: Arc::new(DashMap::new()),
            routing: config.routing,
            // interval timers reject a zero period
            ping_interval: config.ping_interval.max(MIN_PING_INTERVAL),
        }
    }

    pub fn connect(&self, tx: mpsc::UnboundedSender<String>) -> ConnectionId {
        let id = Uuid::new_v4();
        self.connections.insert(id, Connection { identity: None, tx });
        debug!("Connection {} opened ({} live)", id, self.connections.len());
        id
    }

    pub fn disconnect(&self, id: ConnectionId) {
        let Some((_, connection)) = self.connections.remove(&id) else {
            return;
        };
        if let Some(identity) = connection.identity {
            // A newer connection may already own this identity.
            self.identities.remove_if(&identity, |_, owner| *owner == id);
            info!("Client {} disconnected", identity);
        } else {
            debug!("Connection {} closed before registering", id);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn identity_of(&self, id: ConnectionId) -> Option<ClientId> {
        self.connections.get(&id).and_then(|c| c.identity.clone())
    }

    pub fn lookup(&self, identity: &ClientId) -> Option<ConnectionId> {
        self.identities.get(identity).map(|entry| *entry.value())
    }

    /// Routes one text frame from `sender`. Never fails: bad input is logged
    /// and dropped without touching the connection.
    pub fn handle_text(&self, sender: ConnectionId, text: &str) -> Routed {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping malformed frame from {}: {}", sender, e);
                return Routed::Malformed;
            }
        };

        match envelope.kind {
            MessageKind::Register => match envelope.client_id() {
                Some(identity) => {
                    self.register(sender, identity.clone());
                    Routed::Registered(identity)
                }
                None => {
                    warn!("Dropping register without clientId from {}", sender);
                    Routed::Malformed
                }
            },
            MessageKind::Offer | MessageKind::Answer | MessageKind::IceCandidate => {
                let target = match self.routing {
                    RoutingMode::Targeted => envelope.target(),
                    RoutingMode::Broadcast => None,
                };
                let delivered = match target {
                    Some(target) => self.send_to(sender, &target, text),
                    None => self.broadcast_except(sender, text),
                };
                trace!("{:?} from {} reached {} connection(s)", envelope.kind, sender, delivered);
                Routed::Forwarded { delivered }
            }
            MessageKind::Unknown => {
                warn!("Unhandled message type from {}", sender);
                Routed::Unhandled
            }
        }
    }

    fn register(&self, connection: ConnectionId, identity: ClientId) {
        let previous = match self.connections.get_mut(&connection) {
            Some(mut entry) => entry.identity.replace(identity.clone()),
            None => return,
        };
        if let Some(previous) = previous.filter(|p| *p != identity) {
            self.identities.remove_if(&previous, |_, owner| *owner == connection);
        }
        self.identities.insert(identity.clone(), connection);
        info!("Client {} registered on {}", identity, connection);
    }

    /// Fan-out to every other open connection.
    fn broadcast_except(&self, sender: ConnectionId, text: &str) -> usize {
        let mut delivered = 0;
        for entry in self.connections.iter() {
            if *entry.key() == sender || entry.tx.is_closed() {
                continue;
            }
            if entry.tx.send(text.to_owned()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    fn send_to(&self, sender: ConnectionId, target: &ClientId, text: &str) -> usize {
        let Some(connection) = self.lookup(target).filter(|c| *c != sender) else {
            warn!("No live connection for {}, dropping frame from {}", target, sender);
            return 0;
        };
        match self.connections.get(&connection) {
            Some(entry) if entry.tx.send(text.to_owned()).is_ok() => 1,
            _ => 0,
        }
    }
}

pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: RelayState) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}

async fn health(State(state): State<RelayState>) -> impl IntoResponse {
    format!("ok {}", state.connection_count())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<RelayState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: RelayState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let connection = state.connect(tx);
    let ping_every = state.ping_interval;

    // Writer: relay queue to socket, plus keep-alive pings
    let send_task = tokio::spawn(async move {
        let mut ping_interval = time::interval_at(time::Instant::now() + ping_every, ping_every);
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(text) = msg else { break };
                    if sender.send(Message::Text(text.into())).await.is_err() { break; }
                }
                _ = ping_interval.tick() => {
                    if sender.send(Message::Ping(vec![].into())).await.is_err() { break; }
                }
            }
        }
    });

    // Reader: every frame is routed independently
    while let Some(frame) = receiver.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Socket error on {}: {}", connection, e);
                break;
            }
        };
        match frame {
            Message::Text(text) => {
                state.handle_text(connection, text.as_str());
            }
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => {
                    state.handle_text(connection, text);
                }
                Err(_) => debug!("Ignoring non-UTF-8 binary frame from {}", connection),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.disconnect(connection);
    send_task.abort();
}
