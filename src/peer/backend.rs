//! Граница с платформой WebRTC.
//!
//! Сессия не знает, чья реализация peer connection под ней: webrtc-rs
//! (`crate::webrtc_peer`) или тестовая. Колбэки платформы приходят
//! событиями `PlatformEvent` в один канал на сессию.

use crate::capability::PlatformFeatures;
use crate::error::Result;
use crate::media::{LocalTrack, RemoteTrack};
use crate::peer::types::{IceCandidate, ServerConfig, SessionDescription};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Состояние транспорта по данным платформы
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Кадр data channel как он идёт по проводу
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

pub enum PlatformEvent {
    LocalCandidate(IceCandidate),
    GatheringComplete,
    ConnectionState(ConnectionState),
    NegotiationNeeded,
    RemoteTrack(RemoteTrack),
    /// Канал, открытый удалённой стороной; колбэки уже привязаны
    IncomingChannel(Arc<dyn ChannelBackend>),
    ChannelOpen(ChannelId),
    ChannelMessage(ChannelId, Frame),
    ChannelClosed(ChannelId),
}

impl fmt::Debug for PlatformEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformEvent::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            PlatformEvent::GatheringComplete => f.write_str("GatheringComplete"),
            PlatformEvent::ConnectionState(s) => f.debug_tuple("ConnectionState").field(s).finish(),
            PlatformEvent::NegotiationNeeded => f.write_str("NegotiationNeeded"),
            PlatformEvent::RemoteTrack(t) => f.debug_tuple("RemoteTrack").field(&t.id).finish(),
            PlatformEvent::IncomingChannel(ch) => {
                f.debug_tuple("IncomingChannel").field(&ch.label()).finish()
            }
            PlatformEvent::ChannelOpen(id) => f.debug_tuple("ChannelOpen").field(id).finish(),
            PlatformEvent::ChannelMessage(id, _) => {
                f.debug_tuple("ChannelMessage").field(id).finish()
            }
            PlatformEvent::ChannelClosed(id) => f.debug_tuple("ChannelClosed").field(id).finish(),
        }
    }
}

pub type EventSink = UnboundedSender<PlatformEvent>;

/// Идентификатор sender'а внутри одного соединения
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SenderId(pub u64);

/// Идентификатор data channel внутри одного соединения
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u64);

/// Настройки, которые нужны платформе для открытия соединения
#[derive(Debug, Clone)]
pub struct RtcSettings {
    pub ice_servers: Vec<ServerConfig>,
    pub ice_candidate_pool_size: u8,
}

/// Фабрика соединений конкретной платформы
#[async_trait]
pub trait Platform: Send + Sync {
    fn features(&self) -> PlatformFeatures;

    async fn open(&self, settings: &RtcSettings, sink: EventSink) -> Result<Arc<dyn RtcBackend>>;
}

/// Одно peer connection платформы
#[async_trait]
pub trait RtcBackend: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    /// Откат собственного offer (have-local-offer → stable)
    async fn rollback(&self) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Упорядоченный надёжный канал, колбэки которого уже идут в sink
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn ChannelBackend>>;

    async fn add_track(&self, track: &LocalTrack) -> Result<SenderId>;

    async fn remove_track(&self, sender: SenderId) -> Result<()>;

    /// Замена трека в sender'е без ренеготиации
    async fn replace_track(&self, sender: SenderId, track: &LocalTrack) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Data channel платформы. Платформа привязывает open/message/close
/// колбэки сама, до того как отдаёт канал сессии: ранние кадры не теряются.
#[async_trait]
pub trait ChannelBackend: Send + Sync {
    fn id(&self) -> ChannelId;

    fn label(&self) -> String;

    fn is_open(&self) -> bool;

    async fn send(&self, frame: Frame) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
