use crate::capability::UnsupportedReason;
use crate::media::TrackKind;
use thiserror::Error;

/// Класс ошибки: определяет, что делать вызывающей стороне
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Сессию создать нельзя, повтор бессмысленен
    Precondition,
    /// Сессия продолжает работу
    Transient,
    /// Сессия будет закрыта, нужна новая
    Terminal,
}

/// Ошибки ядра peer-соединения.
///
/// `Clone`, потому что ошибки после создания сессии уходят подписчикам
/// через шину событий.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerError {
    #[error("insecure context: WebRTC requires HTTPS or localhost (origin {0})")]
    InsecureContext(String),

    #[error("platform does not support WebRTC: {0}")]
    Unsupported(UnsupportedReason),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("camera/microphone permission denied")]
    PermissionDenied,

    #[error("no {0} device found")]
    DeviceNotFound(TrackKind),

    #[error("media device is busy or unreadable")]
    DeviceBusy,

    #[error("media constraints cannot be satisfied: {0}")]
    Overconstrained(String),

    #[error("signaling failed: {0}")]
    Signaling(String),

    #[error("malformed data channel frame: {0}")]
    Frame(String),

    #[error("ICE failed: no viable candidate pair")]
    IceFailed,

    #[error("connection lost and not recovered within grace period")]
    ConnectionLost,

    #[error("connection closed by remote peer")]
    RemoteClosed,

    #[error("platform error: {0}")]
    Platform(String),
}

impl PeerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            PeerError::InsecureContext(_)
            | PeerError::Unsupported(_)
            | PeerError::Config(_)
            | PeerError::PermissionDenied
            | PeerError::DeviceNotFound(_)
            | PeerError::DeviceBusy
            | PeerError::Overconstrained(_) => ErrorClass::Precondition,
            PeerError::IceFailed | PeerError::ConnectionLost | PeerError::RemoteClosed => {
                ErrorClass::Terminal
            }
            PeerError::Signaling(_)
            | PeerError::Frame(_)
            | PeerError::Platform(_) => ErrorClass::Transient,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.class() == ErrorClass::Terminal
    }
}

impl From<webrtc::Error> for PeerError {
    fn from(e: webrtc::Error) -> Self {
        PeerError::Platform(e.to_string())
    }
}

impl From<serde_json::Error> for PeerError {
    fn from(e: serde_json::Error) -> Self {
        PeerError::Frame(e.to_string())
    }
}

pub type Result<T, E = PeerError> = std::result::Result<T, E>;
