use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque routing key for one participant. Stable across reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Session description as produced and consumed by the media transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpType::Offer, sdp: sdp.into() }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpType::Answer, sdp: sdp.into() }
    }
}

/// A network candidate in the shape browsers serialize `RTCIceCandidate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Reads a candidate out of an untrusted payload. `None` for anything
    /// unusable, including the empty end-of-candidates marker.
    pub fn from_payload(payload: &serde_json::Value) -> Option<Self> {
        let candidate: Self = serde_json::from_value(payload.clone()).ok()?;
        if candidate.candidate.trim().is_empty() {
            return None;
        }
        Some(candidate)
    }
}

/// Every frame exchanged over the signaling channel.
///
/// `from` is stamped by the sending controller; `target` absent means the
/// message is meant for every other connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalingMessage {
    Register {
        #[serde(rename = "clientId")]
        client_id: ClientId,
    },
    Offer {
        offer: SessionDescription,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<ClientId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<ClientId>,
    },
    Answer {
        answer: SessionDescription,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<ClientId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<ClientId>,
    },
    IceCandidate {
        // Kept raw: the receiver decides whether it is usable.
        candidate: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<ClientId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<ClientId>,
    },
}

impl SignalingMessage {
    pub fn register(client_id: ClientId) -> Self {
        Self::Register { client_id }
    }

    pub fn offer(offer: SessionDescription, target: ClientId) -> Self {
        Self::Offer { offer, target: Some(target), from: None }
    }

    pub fn answer(answer: SessionDescription, target: ClientId) -> Self {
        Self::Answer { answer, target: Some(target), from: None }
    }

    pub fn ice_candidate(candidate: &IceCandidate, target: ClientId) -> Self {
        Self::IceCandidate {
            candidate: serde_json::to_value(candidate).unwrap_or(serde_json::Value::Null),
            target: Some(target),
            from: None,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Register { .. } => MessageKind::Register,
            Self::Offer { .. } => MessageKind::Offer,
            Self::Answer { .. } => MessageKind::Answer,
            Self::IceCandidate { .. } => MessageKind::IceCandidate,
        }
    }

    pub fn target(&self) -> Option<&ClientId> {
        match self {
            Self::Register { .. } => None,
            Self::Offer { target, .. }
            | Self::Answer { target, .. }
            | Self::IceCandidate { target, .. } => target.as_ref(),
        }
    }

    pub fn sender(&self) -> Option<&ClientId> {
        match self {
            Self::Register { .. } => None,
            Self::Offer { from, .. } | Self::Answer { from, .. } | Self::IceCandidate { from, .. } => {
                from.as_ref()
            }
        }
    }

    /// Stamps the sender. Register frames carry their identity in `clientId`.
    pub fn with_from(mut self, sender: ClientId) -> Self {
        match &mut self {
            Self::Register { .. } => {}
            Self::Offer { from, .. } | Self::Answer { from, .. } | Self::IceCandidate { from, .. } => {
                *from = Some(sender);
            }
        }
        self
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    Register,
    Offer,
    Answer,
    IceCandidate,
    #[serde(other)]
    Unknown,
}

/// The relay's partial view of a frame. Only `type` must be well formed;
/// everything else is read on demand and tolerated when it is odd.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub kind: MessageKind,
    frame: serde_json::Value,
}

impl Envelope {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let frame: serde_json::Value = serde_json::from_str(text)?;
        let kind = match frame.get("type") {
            Some(kind) => MessageKind::deserialize(kind)?,
            None => return Err(serde::de::Error::missing_field("type")),
        };
        Ok(Self { kind, frame })
    }

    /// Identity announced by a `register` frame.
    pub fn client_id(&self) -> Option<ClientId> {
        self.string_field("clientId")
    }

    pub fn target(&self) -> Option<ClientId> {
        self.string_field("target")
    }

    fn string_field(&self, name: &str) -> Option<ClientId> {
        self.frame
            .get(name)
            .and_then(|value| value.as_str())
            .map(ClientId::new)
            .filter(|id| !id.is_empty())
    }
}
