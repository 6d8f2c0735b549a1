#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use koda_call_signal::controller::{CallSnapshot, SignalSink};
use koda_call_signal::error::{CallError, Result};
use koda_call_signal::media::{LinkEvents, MediaTransport};
use koda_call_signal::protocol::{IceCandidate, SdpType, SessionDescription, SignalingMessage};
use koda_call_signal::{RelayConfig, RelayState, relay};
use tokio::net::TcpListener;
use tokio::sync::watch;

#[derive(Default)]
pub struct FakeMediaState {
    pub deny_capture: bool,
    pub fail_remote_description: bool,
    pub fail_candidates: bool,
    /// Emit one local candidate whenever a local description is set.
    pub auto_candidates: bool,
    /// Report the link connected once both descriptions are in place.
    pub auto_connect: bool,

    pub captures: usize,
    pub live_media: usize,
    pub next_link: u64,
    pub live_links: BTreeSet<u64>,
    pub max_live_links: usize,
    pub closed_links: Vec<u64>,
    pub remote_descriptions: Vec<SessionDescription>,
    pub candidates: Vec<IceCandidate>,
}

/// Recording stand-in for the browser media stack.
#[derive(Clone, Default)]
pub struct FakeMedia {
    pub state: Arc<Mutex<FakeMediaState>>,
}

impl FakeMedia {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn negotiating() -> Self {
        let media = Self::default();
        media.with(|s| {
            s.auto_candidates = true;
            s.auto_connect = true;
        });
        media
    }

    pub fn with<T>(&self, f: impl FnOnce(&mut FakeMediaState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }
}

pub struct FakeLink {
    pub id: u64,
    events: LinkEvents,
}

pub struct FakeStream;

fn host_candidate(link: u64) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{link} 1 udp 2122260223 192.168.1.{link} 5000{link} typ host"),
        sdp_mid: Some("0".into()),
        sdp_m_line_index: Some(0),
        username_fragment: Some("frag".into()),
    }
}

impl MediaTransport for FakeMedia {
    type Media = FakeStream;
    type Link = FakeLink;

    async fn capture_local_media(&self) -> Result<FakeStream> {
        self.with(|s| {
            if s.deny_capture {
                return Err(CallError::MediaAccessDenied("camera blocked".into()));
            }
            s.captures += 1;
            s.live_media += 1;
            Ok(FakeStream)
        })
    }

    async fn create_link(&self, events: LinkEvents) -> Result<FakeLink> {
        let id = self.with(|s| {
            s.next_link += 1;
            s.live_links.insert(s.next_link);
            s.max_live_links = s.max_live_links.max(s.live_links.len());
            s.next_link
        });
        Ok(FakeLink { id, events })
    }

    async fn add_local_tracks(&self, _link: &FakeLink, _media: &FakeStream) -> Result<()> {
        Ok(())
    }

    async fn create_offer(&self, link: &FakeLink) -> Result<SessionDescription> {
        Ok(SessionDescription::offer(format!("offer-{}", link.id)))
    }

    async fn create_answer(&self, link: &FakeLink) -> Result<SessionDescription> {
        Ok(SessionDescription::answer(format!("answer-{}", link.id)))
    }

    async fn set_local_description(
        &self,
        link: &FakeLink,
        description: SessionDescription,
    ) -> Result<()> {
        let (candidates, connect) = self.with(|s| (s.auto_candidates, s.auto_connect));
        if candidates {
            link.events.local_candidate(host_candidate(link.id));
        }
        if connect && description.kind == SdpType::Answer {
            link.events.state_changed(koda_call_signal::LinkState::Connected);
        }
        Ok(())
    }

    async fn set_remote_description(
        &self,
        link: &FakeLink,
        description: SessionDescription,
    ) -> Result<()> {
        let connect = self.with(|s| {
            if s.fail_remote_description {
                return Err(CallError::Negotiation("rejected description".into()));
            }
            s.remote_descriptions.push(description.clone());
            Ok(s.auto_connect)
        })?;
        if connect && description.kind == SdpType::Answer {
            link.events.state_changed(koda_call_signal::LinkState::Connected);
        }
        Ok(())
    }

    async fn add_candidate(&self, _link: &FakeLink, candidate: IceCandidate) -> Result<()> {
        self.with(|s| {
            if s.fail_candidates {
                return Err(CallError::Candidate("unknown ufrag".into()));
            }
            s.candidates.push(candidate);
            Ok(())
        })
    }

    async fn close_link(&self, link: FakeLink) {
        self.with(|s| {
            s.live_links.remove(&link.id);
            s.closed_links.push(link.id);
        });
    }

    async fn release_media(&self, _media: FakeStream) {
        self.with(|s| s.live_media -= 1);
    }
}

/// Sink that keeps every frame the controller sends.
#[derive(Clone)]
pub struct RecordingSink {
    pub sent: Arc<Mutex<Vec<SignalingMessage>>>,
    pub open: Arc<AtomicBool>,
}

impl RecordingSink {
    pub fn open() -> Self {
        Self {
            sent: Arc::default(),
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub fn take(&self) -> Vec<SignalingMessage> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

impl SignalSink for RecordingSink {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send(&self, message: SignalingMessage) -> Result<()> {
        if !self.is_open() {
            return Err(CallError::Transport("closed".into()));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

/// Starts a relay on an ephemeral port and returns its WebSocket URL.
pub async fn start_relay(config: RelayConfig) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = RelayState::new(&config);
    tokio::spawn(async move {
        let _ = relay::serve(listener, state).await;
    });
    format!("ws://{addr}/ws")
}

pub async fn wait_until(
    rx: &mut watch::Receiver<CallSnapshot>,
    predicate: impl FnMut(&CallSnapshot) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
        .await
        .expect("timed out waiting for controller state")
        .expect("controller stopped");
}
