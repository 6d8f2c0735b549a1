//! Seam to the real-time media transport. Capture, encoding and the media
//! path itself live behind [`MediaTransport`]; the controller only sequences
//! calls into it.

use std::future::Future;
use tokio::sync::mpsc;

use crate::controller::ControllerEvent;
use crate::error::Result;
use crate::protocol::{IceCandidate, SessionDescription};

/// Generation number of a link. Bumped every time the controller replaces
/// its link so late callbacks from a torn-down one can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl LinkState {
    /// States after which the link can never carry media again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    LocalCandidate(IceCandidate),
    RemoteTrack(RemoteTrack),
    StateChanged(LinkState),
}

/// Callback sink handed to [`MediaTransport::create_link`].
#[derive(Debug, Clone)]
pub struct LinkEvents {
    link: LinkId,
    tx: mpsc::UnboundedSender<ControllerEvent>,
}

impl LinkEvents {
    pub(crate) fn new(link: LinkId, tx: mpsc::UnboundedSender<ControllerEvent>) -> Self {
        Self { link, tx }
    }

    pub fn link(&self) -> LinkId {
        self.link
    }

    pub fn local_candidate(&self, candidate: IceCandidate) {
        self.emit(LinkEvent::LocalCandidate(candidate));
    }

    pub fn remote_track(&self, track: RemoteTrack) {
        self.emit(LinkEvent::RemoteTrack(track));
    }

    pub fn state_changed(&self, state: LinkState) {
        self.emit(LinkEvent::StateChanged(state));
    }

    fn emit(&self, event: LinkEvent) {
        // Controller gone: nobody is left to care.
        let _ = self.tx.send(ControllerEvent::Link { link: self.link, event });
    }
}

/// The external media transport, one instance shared by a controller.
///
/// `Media` is the captured local stream, `Link` a single peer connection.
pub trait MediaTransport: Send + Sync + 'static {
    type Media: Send + Sync + 'static;
    type Link: Send + Sync + 'static;

    /// Fails with [`CallError::MediaAccessDenied`](crate::error::CallError).
    fn capture_local_media(&self) -> impl Future<Output = Result<Self::Media>> + Send;

    fn create_link(&self, events: LinkEvents) -> impl Future<Output = Result<Self::Link>> + Send;

    fn add_local_tracks(
        &self,
        link: &Self::Link,
        media: &Self::Media,
    ) -> impl Future<Output = Result<()>> + Send;

    fn create_offer(
        &self,
        link: &Self::Link,
    ) -> impl Future<Output = Result<SessionDescription>> + Send;

    fn create_answer(
        &self,
        link: &Self::Link,
    ) -> impl Future<Output = Result<SessionDescription>> + Send;

    fn set_local_description(
        &self,
        link: &Self::Link,
        description: SessionDescription,
    ) -> impl Future<Output = Result<()>> + Send;

    fn set_remote_description(
        &self,
        link: &Self::Link,
        description: SessionDescription,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Fails with [`CallError::Candidate`](crate::error::CallError), which is
    /// never fatal to the call.
    fn add_candidate(
        &self,
        link: &Self::Link,
        candidate: IceCandidate,
    ) -> impl Future<Output = Result<()>> + Send;

    fn close_link(&self, link: Self::Link) -> impl Future<Output = ()> + Send;

    fn release_media(&self, media: Self::Media) -> impl Future<Output = ()> + Send;
}
