use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::channel::SignalingChannel;
use crate::config::ClientConfig;
use crate::controller::{CallController, CallSnapshot, ControllerEvent};
use crate::identity::{IdentityError, IdentityStore};
use crate::media::MediaTransport;
use crate::protocol::ClientId;

/// A running client: signaling channel task plus controller task.
pub struct CallClient {
    id: ClientId,
    events: mpsc::UnboundedSender<ControllerEvent>,
    snapshot: watch::Receiver<CallSnapshot>,
    controller: JoinHandle<()>,
    channel: JoinHandle<()>,
}

impl CallClient {
    pub fn spawn<M: MediaTransport>(
        config: &ClientConfig,
        identity: &IdentityStore,
        media: M,
    ) -> Result<Self, IdentityError> {
        let id = identity.load_or_create()?;
        let (events, events_rx) = mpsc::unbounded_channel();

        let (sink, channel) = SignalingChannel::new(config, id.clone(), events.clone());
        let controller = CallController::new(id.clone(), media, sink, events.clone());
        let snapshot = controller.subscribe();

        info!("Starting client {} against {}", id, config.relay_url);
        Ok(Self {
            id,
            events,
            snapshot,
            controller: tokio::spawn(controller.run(events_rx)),
            channel: tokio::spawn(channel.run()),
        })
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    pub fn start_media(&self) {
        self.post(ControllerEvent::StartMedia);
    }

    /// A no-op unless the channel is open, media was acquired and the
    /// client is idle.
    pub fn call(&self, target: ClientId) {
        self.post(ControllerEvent::Call(target));
    }

    pub fn hang_up(&self) {
        self.post(ControllerEvent::HangUp);
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshot.clone()
    }

    pub async fn shutdown(self) {
        self.post(ControllerEvent::Shutdown);
        let _ = self.controller.await;
        // The channel may be parked in a reconnect delay.
        self.channel.abort();
        let _ = self.channel.await;
    }

    fn post(&self, event: ControllerEvent) {
        let _ = self.events.send(event);
    }
}
