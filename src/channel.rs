//! Client end of the signaling channel: one WebSocket to the relay, kept
//! alive with fixed-delay reconnects and re-registration under the same
//! identity.

use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::controller::{ControllerEvent, SignalSink};
use crate::error::{CallError, Result};
use crate::protocol::{ClientId, SignalingMessage};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Controller-facing sender. Frames offered while the channel is down are
/// dropped, never queued for a later connection.
#[derive(Clone)]
pub struct ChannelSink {
    outbound: mpsc::UnboundedSender<String>,
    open: Arc<AtomicBool>,
}

impl SignalSink for ChannelSink {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn send(&self, message: SignalingMessage) -> Result<()> {
        if !self.is_open() {
            return Err(CallError::Transport("channel closed".into()));
        }
        let text = message.to_json()?;
        self.outbound
            .send(text)
            .map_err(|_| CallError::Transport("channel task gone".into()))
    }
}

pub struct SignalingChannel {
    url: String,
    identity: ClientId,
    reconnect_delay: Duration,
    events: mpsc::UnboundedSender<ControllerEvent>,
    outbound: mpsc::UnboundedReceiver<String>,
    open: Arc<AtomicBool>,
}

impl SignalingChannel {
    pub fn new(
        config: &ClientConfig,
        identity: ClientId,
        events: mpsc::UnboundedSender<ControllerEvent>,
    ) -> (ChannelSink, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));
        let sink = ChannelSink { outbound: tx, open: open.clone() };
        let channel = Self {
            url: config.relay_url.clone(),
            identity,
            reconnect_delay: config.reconnect_delay,
            events,
            outbound: rx,
            open,
        };
        (sink, channel)
    }

    /// Runs until every [`ChannelSink`] is dropped. Connection loss is
    /// retried forever.
    pub async fn run(mut self) {
        loop {
            match connect_async(self.url.as_str()).await {
                Ok((socket, _)) => {
                    if !self.session(socket).await {
                        break;
                    }
                }
                Err(e) => warn!("Connecting to relay {} failed: {}", self.url, e),
            }
            if self.outbound.is_closed() {
                break;
            }
            debug!("Reconnecting to {} in {:?}", self.url, self.reconnect_delay);
            tokio::time::sleep(self.reconnect_delay).await;
        }
        debug!("Signaling channel for {} stopped", self.identity);
    }

    /// Drives one connection. Returns `false` when the owner has gone away.
    async fn session(&mut self, socket: Socket) -> bool {
        let (mut write, mut read) = socket.split();

        let register = match SignalingMessage::register(self.identity.clone()).to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!("Cannot encode register frame: {}", e);
                return false;
            }
        };
        if let Err(e) = write.send(Message::text(register)).await {
            warn!("Register with relay failed: {}", e);
            return true;
        }

        // Anything queued against the previous connection is stale.
        while self.outbound.try_recv().is_ok() {}
        self.open.store(true, Ordering::Release);
        info!("Signaling channel open as {}", self.identity);
        let _ = self.events.send(ControllerEvent::ChannelOpened);

        let keep_running = loop {
            tokio::select! {
                out = self.outbound.recv() => {
                    let Some(text) = out else {
                        let _ = write.close().await;
                        break false;
                    };
                    if let Err(e) = write.send(Message::text(text)).await {
                        debug!("Relay write failed: {}", e);
                        break true;
                    }
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.deliver(text.as_str()),
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => self.deliver(text),
                        Err(_) => debug!("Ignoring non-UTF-8 frame from relay"),
                    },
                    Some(Ok(Message::Close(_))) | None => break true,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Relay read failed: {}", e);
                        break true;
                    }
                },
            }
        };

        self.open.store(false, Ordering::Release);
        warn!("Signaling channel for {} closed", self.identity);
        let _ = self.events.send(ControllerEvent::ChannelClosed);
        keep_running
    }

    fn deliver(&self, text: &str) {
        match SignalingMessage::from_json(text) {
            Ok(message) => {
                let _ = self.events.send(ControllerEvent::Inbound(message));
            }
            Err(e) => warn!("Discarding unparsable frame from relay: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_drops_frames_while_closed() {
        let (events, _events_rx) = mpsc::unbounded_channel();
        let (sink, mut channel) =
            SignalingChannel::new(&ClientConfig::default(), "1111".into(), events);

        let err = sink
            .send(SignalingMessage::register("1111".into()))
            .unwrap_err();
        assert!(matches!(err, CallError::Transport(_)));
        assert!(channel.outbound.try_recv().is_err());

        sink.open.store(true, Ordering::Release);
        sink.send(SignalingMessage::register("1111".into())).unwrap();
        assert!(channel.outbound.try_recv().unwrap().contains("\"clientId\":\"1111\""));
    }
}
