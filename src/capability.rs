use crate::error::{PeerError, Result};
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use url::Url;

/// Чего не хватает платформе для звонка
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum UnsupportedReason {
    InsecureContext,
    MissingPeerConnection,
    MissingDataChannel,
}

impl fmt::Display for UnsupportedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            UnsupportedReason::InsecureContext => "page must be served over HTTPS or localhost",
            UnsupportedReason::MissingPeerConnection => "peer connections are not available",
            UnsupportedReason::MissingDataChannel => "data channels are not available",
        };
        f.write_str(msg)
    }
}

/// Примитивы, которые платформа реально предоставляет
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformFeatures {
    pub peer_connection: bool,
    pub data_channel: bool,
    pub media_capture: bool,
}

/// Откуда запущено приложение. Нативный процесс всегда безопасен,
/// веб-origin — только https/wss или localhost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    origin: Option<Url>,
}

impl ExecutionContext {
    pub fn native() -> Self {
        Self { origin: None }
    }

    pub fn from_origin(origin: &str) -> Result<Self> {
        let url = Url::parse(origin)
            .map_err(|e| PeerError::Config(format!("invalid origin '{origin}': {e}")))?;
        Ok(Self { origin: Some(url) })
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_ref().map(Url::as_str)
    }

    pub fn is_secure(&self) -> bool {
        let Some(url) = &self.origin else {
            return true;
        };
        match url.scheme() {
            "https" | "wss" | "file" => true,
            "http" | "ws" => url.host_str().is_some_and(is_loopback_host),
            _ => false,
        }
    }
}

fn is_loopback_host(host: &str) -> bool {
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .is_ok_and(|ip| ip.is_loopback())
}

/// Результат проверки: вместо ошибки UI получает причину
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SupportReport {
    pub supported: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<UnsupportedReason>,
    /// Можно ли захватывать камеру и микрофон (звонок без них возможен)
    pub media_capture: bool,
}

pub fn check_support(features: PlatformFeatures, ctx: &ExecutionContext) -> SupportReport {
    let error = if !ctx.is_secure() {
        Some(UnsupportedReason::InsecureContext)
    } else if !features.peer_connection {
        Some(UnsupportedReason::MissingPeerConnection)
    } else if !features.data_channel {
        Some(UnsupportedReason::MissingDataChannel)
    } else {
        None
    };
    SupportReport {
        supported: error.is_none(),
        error,
        media_capture: features.media_capture,
    }
}

/// То же, но как предусловие создания сессии
pub fn ensure_supported(features: PlatformFeatures, ctx: &ExecutionContext) -> Result<()> {
    match check_support(features, ctx).error {
        None => Ok(()),
        Some(UnsupportedReason::InsecureContext) => Err(PeerError::InsecureContext(
            ctx.origin().unwrap_or_default().to_string(),
        )),
        Some(reason) => Err(PeerError::Unsupported(reason)),
    }
}
