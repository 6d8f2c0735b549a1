//! Per-client call state machine.
//!
//! Every input (UI command, inbound frame, channel transition, media
//! callback) arrives as a [`ControllerEvent`] on one queue and is handled to
//! completion before the next is looked at. That makes the controller the
//! only writer of its link and state, so an answer can never race the local
//! offer it answers.

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::error::{CallError, Result};
use crate::media::{LinkEvent, LinkEvents, LinkId, LinkState, MediaTransport};
use crate::protocol::{ClientId, IceCandidate, SessionDescription, SignalingMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallState {
    #[default]
    Idle,
    Calling,
    Receiving,
    Connected,
}

/// What a UI may read about the controller.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallSnapshot {
    pub state: CallState,
    pub remote: Option<ClientId>,
    pub channel_open: bool,
    /// Local media has been captured at least once.
    pub media_acquired: bool,
    /// The last capture attempt was refused.
    pub media_denied: bool,
    pub remote_tracks: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    StartMedia,
    Call(ClientId),
    HangUp,
    ChannelOpened,
    ChannelClosed,
    Inbound(SignalingMessage),
    Link { link: LinkId, event: LinkEvent },
    Shutdown,
}

/// Outbound half of the signaling channel as the controller sees it.
pub trait SignalSink: Send + Sync + 'static {
    fn is_open(&self) -> bool;

    /// Fails with [`CallError::Transport`] when the channel is down.
    fn send(&self, message: SignalingMessage) -> Result<()>;
}

struct PeerLink<L> {
    id: LinkId,
    remote: ClientId,
    handle: L,
    answered: bool,
}

pub struct CallController<M: MediaTransport, S: SignalSink> {
    id: ClientId,
    media: M,
    sink: S,
    events: mpsc::UnboundedSender<ControllerEvent>,
    local_media: Option<M::Media>,
    link: Option<PeerLink<M::Link>>,
    next_link: u64,
    snapshot: watch::Sender<CallSnapshot>,
}

impl<M: MediaTransport, S: SignalSink> CallController<M, S> {
    /// `events` must feed the queue this controller is driven from; media
    /// callbacks are posted there.
    pub fn new(
        id: ClientId,
        media: M,
        sink: S,
        events: mpsc::UnboundedSender<ControllerEvent>,
    ) -> Self {
        let (snapshot, _) = watch::channel(CallSnapshot::default());
        Self {
            id,
            media,
            sink,
            events,
            local_media: None,
            link: None,
            next_link: 0,
            snapshot,
        }
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    pub fn state(&self) -> CallState {
        self.snapshot.borrow().state
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn has_link(&self) -> bool {
        self.link.is_some()
    }

    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<ControllerEvent>) {
        while let Some(event) = events.recv().await {
            if !self.handle(event).await {
                break;
            }
        }
        self.reset().await;
        debug!("Controller {} stopped", self.id);
    }

    /// Applies one event. Returns `false` once the controller should stop.
    pub async fn handle(&mut self, event: ControllerEvent) -> bool {
        match event {
            ControllerEvent::StartMedia => self.start_media().await,
            ControllerEvent::Call(target) => self.start_call(target).await,
            ControllerEvent::HangUp => {
                info!("Client {} hanging up", self.id);
                self.reset().await;
            }
            ControllerEvent::ChannelOpened => {
                self.snapshot.send_modify(|s| s.channel_open = true);
            }
            ControllerEvent::ChannelClosed => {
                // An active link is left to the media layer to fail.
                self.snapshot.send_modify(|s| s.channel_open = false);
            }
            ControllerEvent::Inbound(message) => self.on_inbound(message).await,
            ControllerEvent::Link { link, event } => self.on_link_event(link, event).await,
            ControllerEvent::Shutdown => return false,
        }
        true
    }

    async fn start_media(&mut self) {
        if self.local_media.is_some() {
            return;
        }
        if let Err(e) = self.ensure_media().await {
            self.fail(e).await;
        }
    }

    async fn ensure_media(&mut self) -> Result<()> {
        if self.local_media.is_none() {
            let media = self.media.capture_local_media().await?;
            self.local_media = Some(media);
            self.snapshot.send_modify(|s| {
                s.media_acquired = true;
                s.media_denied = false;
            });
        }
        Ok(())
    }

    fn can_call(&self, target: &ClientId) -> bool {
        let snapshot = self.snapshot.borrow();
        self.sink.is_open()
            && snapshot.media_acquired
            && snapshot.state == CallState::Idle
            && !target.is_empty()
            && *target != self.id
    }

    async fn start_call(&mut self, target: ClientId) {
        if !self.can_call(&target) {
            debug!("Ignoring call request to {} from {}", target, self.id);
            return;
        }
        info!("Client {} calling {}", self.id, target);
        if let Err(e) = self.place_call(target).await {
            self.fail(e).await;
        }
    }

    async fn place_call(&mut self, target: ClientId) -> Result<()> {
        self.open_link(target.clone()).await?;
        self.ensure_media().await?;
        self.attach_tracks().await?;

        let link = self.active_link()?;
        let offer = self.media.create_offer(&link.handle).await?;
        self.media.set_local_description(&link.handle, offer.clone()).await?;
        self.send(SignalingMessage::offer(offer, target.clone()));

        self.set_state(CallState::Calling, Some(target));
        Ok(())
    }

    async fn on_inbound(&mut self, message: SignalingMessage) {
        if let Some(target) = message.target() {
            if *target != self.id {
                trace!("Client {} discarding {:?} meant for {}", self.id, message.kind(), target);
                return;
            }
        }

        match message {
            SignalingMessage::Register { .. } => {
                debug!("Client {} ignoring relayed register", self.id);
            }
            SignalingMessage::Offer { offer, from, .. } => self.on_offer(offer, from).await,
            SignalingMessage::Answer { answer, from, .. } => self.on_answer(answer, from).await,
            SignalingMessage::IceCandidate { candidate, from, .. } => {
                self.on_candidate(candidate, from).await
            }
        }
    }

    async fn on_offer(&mut self, offer: SessionDescription, from: Option<ClientId>) {
        let Some(from) = from.filter(|peer| !peer.is_empty() && *peer != self.id) else {
            warn!("Client {} dropping offer without a usable sender", self.id);
            return;
        };
        if self.state() != CallState::Idle {
            debug!("Client {} busy, ignoring offer from {}", self.id, from);
            return;
        }

        info!("Client {} received offer from {}", self.id, from);
        if let Err(e) = self.accept_offer(offer, from).await {
            self.fail(e).await;
        }
    }

    async fn accept_offer(&mut self, offer: SessionDescription, from: ClientId) -> Result<()> {
        self.open_link(from.clone()).await?;
        self.ensure_media().await?;
        self.attach_tracks().await?;

        let link = self.active_link()?;
        self.media.set_remote_description(&link.handle, offer).await?;
        let answer = self.media.create_answer(&link.handle).await?;
        self.media.set_local_description(&link.handle, answer.clone()).await?;
        self.send(SignalingMessage::answer(answer, from.clone()));

        if let Some(link) = self.link.as_mut() {
            link.answered = true;
        }
        self.set_state(CallState::Receiving, Some(from));
        Ok(())
    }

    async fn on_answer(&mut self, answer: SessionDescription, from: Option<ClientId>) {
        if self.state() != CallState::Calling {
            debug!("Client {} not calling, ignoring answer", self.id);
            return;
        }
        let Some(link) = self.link.as_ref() else {
            return;
        };
        if from.as_ref() != Some(&link.remote) {
            debug!("Client {} ignoring answer from {:?}", self.id, from);
            return;
        }

        let remote = link.remote.clone();
        let applied = self.media.set_remote_description(&link.handle, answer).await;
        match applied {
            Ok(()) => {
                info!("Client {} connected to {}", self.id, remote);
                self.set_state(CallState::Connected, Some(remote));
            }
            Err(e) => self.fail(e).await,
        }
    }

    async fn on_candidate(&mut self, payload: serde_json::Value, from: Option<ClientId>) {
        if self.state() == CallState::Idle {
            return;
        }
        let Some(link) = self.link.as_ref() else {
            return;
        };
        if from.as_ref().is_some_and(|peer| *peer != link.remote) {
            debug!("Client {} ignoring candidate from {:?}", self.id, from);
            return;
        }
        let Some(candidate) = IceCandidate::from_payload(&payload) else {
            debug!("Client {} skipping empty or malformed candidate", self.id);
            return;
        };

        if let Err(e) = self.media.add_candidate(&link.handle, candidate).await {
            warn!("Client {} dropped remote candidate: {}", self.id, e);
        }
    }

    async fn on_link_event(&mut self, id: LinkId, event: LinkEvent) {
        let Some(link) = self.link.as_ref().filter(|link| link.id == id) else {
            trace!("Client {} ignoring event from stale link {:?}", self.id, id);
            return;
        };

        match event {
            LinkEvent::LocalCandidate(candidate) => {
                let target = link.remote.clone();
                self.send(SignalingMessage::ice_candidate(&candidate, target));
            }
            LinkEvent::RemoteTrack(track) => {
                debug!("Client {} got remote {} track {}", self.id, track.kind, track.id);
                self.snapshot.send_modify(|s| s.remote_tracks += 1);
            }
            LinkEvent::StateChanged(state) if state.is_terminal() => {
                info!("Client {} link to {} ended ({:?})", self.id, link.remote, state);
                self.reset().await;
            }
            LinkEvent::StateChanged(LinkState::Connected)
                if link.answered && self.state() == CallState::Receiving =>
            {
                let remote = link.remote.clone();
                info!("Client {} connected to {}", self.id, remote);
                self.set_state(CallState::Connected, Some(remote));
            }
            LinkEvent::StateChanged(state) => {
                debug!("Client {} link state {:?}", self.id, state);
            }
        }
    }

    /// Replaces any existing link. The old one is closed before the new one
    /// exists.
    async fn open_link(&mut self, remote: ClientId) -> Result<()> {
        self.close_link().await;

        self.next_link += 1;
        let id = LinkId(self.next_link);
        let handle = self
            .media
            .create_link(LinkEvents::new(id, self.events.clone()))
            .await?;
        self.link = Some(PeerLink { id, remote, handle, answered: false });
        Ok(())
    }

    async fn attach_tracks(&mut self) -> Result<()> {
        let (Some(link), Some(media)) = (self.link.as_ref(), self.local_media.as_ref()) else {
            return Err(CallError::Negotiation("no link or local media to attach".into()));
        };
        self.media.add_local_tracks(&link.handle, media).await
    }

    fn active_link(&self) -> Result<&PeerLink<M::Link>> {
        self.link
            .as_ref()
            .ok_or_else(|| CallError::Negotiation("no active link".into()))
    }

    async fn close_link(&mut self) {
        if let Some(link) = self.link.take() {
            debug!("Client {} closing link {:?} to {}", self.id, link.id, link.remote);
            self.media.close_link(link.handle).await;
        }
    }

    /// Releases the link and local media and returns to idle.
    async fn reset(&mut self) {
        self.close_link().await;
        if let Some(media) = self.local_media.take() {
            self.media.release_media(media).await;
        }
        self.snapshot.send_modify(|s| {
            s.state = CallState::Idle;
            s.remote = None;
            s.remote_tracks = 0;
        });
    }

    async fn fail(&mut self, error: CallError) {
        warn!("Client {} call failed: {}", self.id, error);
        if matches!(error, CallError::MediaAccessDenied(_)) {
            self.snapshot.send_modify(|s| s.media_denied = true);
        }
        self.reset().await;
    }

    fn set_state(&self, state: CallState, remote: Option<ClientId>) {
        self.snapshot.send_modify(|s| {
            s.state = state;
            s.remote = remote;
        });
    }

    fn send(&self, message: SignalingMessage) {
        let message = message.with_from(self.id.clone());
        if message.target() == Some(&self.id) {
            warn!("Client {} refusing to signal itself", self.id);
            return;
        }
        let kind = message.kind();
        if let Err(e) = self.sink.send(message) {
            debug!("Client {} dropped outbound {:?}: {}", self.id, kind, e);
        }
    }
}
