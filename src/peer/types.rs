use crate::error::{PeerError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Роль стороны в звонке
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    pub fn is_initiator(self) -> bool {
        self == Role::Initiator
    }
}

/// Роль в perfect negotiation: вежливая сторона уступает встречному offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    Polite,
    Impolite,
}

impl NegotiationRole {
    /// По умолчанию уступает отвечающая сторона
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Initiator => NegotiationRole::Impolite,
            Role::Responder => NegotiationRole::Polite,
        }
    }

    /// Симметричное назначение по стабильным идентификаторам:
    /// меньший id вежливый, обе стороны приходят к одному ответу.
    /// Одинаковые id развести нельзя, для них `None`.
    pub fn from_peer_ids(local: &str, remote: &str) -> Option<Self> {
        match local.cmp(remote) {
            Ordering::Less => Some(NegotiationRole::Polite),
            Ordering::Greater => Some(NegotiationRole::Impolite),
            Ordering::Equal => None,
        }
    }

    pub fn is_polite(self) -> bool {
        self == NegotiationRole::Polite
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// SDP описание без привязки к платформе
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE кандидат для WebRTC соединения
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>, sdp_mid: Option<String>, sdp_mline_index: Option<u16>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid,
            sdp_mline_index,
            username_fragment: None,
        }
    }

    /// Тип кандидата из строки `... typ host ...`
    pub fn candidate_type(&self) -> Option<&str> {
        let mut parts = self.candidate.split_whitespace();
        parts.find(|p| *p == "typ")?;
        parts.next()
    }
}

/// Полезная нагрузка сигналинга, которую приложение доставляет другой стороне
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalPayload {
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate { candidate: IceCandidate },
}

impl SignalPayload {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| PeerError::Signaling(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| PeerError::Signaling(e.to_string()))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SignalPayload::Offer { .. } => "offer",
            SignalPayload::Answer { .. } => "answer",
            SignalPayload::Candidate { .. } => "candidate",
        }
    }
}

impl From<SessionDescription> for SignalPayload {
    fn from(desc: SessionDescription) -> Self {
        match desc.kind {
            SdpKind::Offer => SignalPayload::Offer { sdp: desc.sdp },
            SdpKind::Answer => SignalPayload::Answer { sdp: desc.sdp },
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    Stun,
    Turn,
}

/// Конфигурация ICE сервера
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ServerKind,
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl ServerConfig {
    pub fn stun(id: &str, url: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: ServerKind::Stun,
            url: url.to_string(),
            username: None,
            credential: None,
        }
    }

    pub fn turn(id: &str, url: &str, username: &str, credential: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: ServerKind::Turn,
            url: url.to_string(),
            username: Some(username.to_string()),
            credential: Some(credential.to_string()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(PeerError::Config(format!("server '{}': URL cannot be empty", self.id)));
        }
        if self.kind == ServerKind::Turn && (self.username.is_none() || self.credential.is_none()) {
            return Err(PeerError::Config(format!(
                "server '{}': TURN servers require username and credential",
                self.id
            )));
        }
        Ok(())
    }
}
