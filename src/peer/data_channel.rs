use crate::error::{PeerError, Result};
use crate::peer::backend::{ChannelBackend, ChannelId, Frame};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Сообщение приложения, уже декодированное
#[derive(Debug, Clone, PartialEq)]
pub enum DataMessage {
    Text(String),
    Json(Value),
    Binary(Bytes),
}

impl DataMessage {
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        Ok(DataMessage::Json(serde_json::to_value(value)?))
    }

    /// Разбирает JSON сообщение в структуру приложения
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        match self {
            DataMessage::Json(v) => Ok(serde_json::from_value(v.clone())?),
            DataMessage::Text(s) => Ok(serde_json::from_str(s)?),
            DataMessage::Binary(_) => Err(PeerError::Frame("binary message is not JSON".into())),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            DataMessage::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<String> for DataMessage {
    fn from(s: String) -> Self {
        DataMessage::Text(s)
    }
}

impl From<&str> for DataMessage {
    fn from(s: &str) -> Self {
        DataMessage::Text(s.to_string())
    }
}

impl From<Value> for DataMessage {
    fn from(v: Value) -> Self {
        DataMessage::Json(v)
    }
}

impl From<Bytes> for DataMessage {
    fn from(b: Bytes) -> Self {
        DataMessage::Binary(b)
    }
}

impl From<Vec<u8>> for DataMessage {
    fn from(b: Vec<u8>) -> Self {
        DataMessage::Binary(Bytes::from(b))
    }
}

/// Текстовый кадр: `{"type":"text"|"json","body":...}`
#[derive(Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "lowercase")]
enum Envelope {
    Text(String),
    Json(Value),
}

pub fn encode(message: &DataMessage) -> Result<Frame> {
    let envelope = match message {
        DataMessage::Binary(b) => return Ok(Frame::Binary(b.clone())),
        DataMessage::Text(s) => Envelope::Text(s.clone()),
        DataMessage::Json(v) => Envelope::Json(v.clone()),
    };
    Ok(Frame::Text(serde_json::to_string(&envelope)?))
}

pub fn decode(frame: Frame) -> Result<DataMessage> {
    match frame {
        Frame::Binary(b) => Ok(DataMessage::Binary(b)),
        Frame::Text(text) => match serde_json::from_str::<Envelope>(&text)? {
            Envelope::Text(s) => Ok(DataMessage::Text(s)),
            Envelope::Json(v) => Ok(DataMessage::Json(v)),
        },
    }
}

/// Data channel сессии: создан инициатором или принят отвечающей стороной
pub struct DataChannel {
    inner: Arc<dyn ChannelBackend>,
    open: AtomicBool,
}

impl DataChannel {
    /// Колбэки канала платформа уже привязала, здесь только состояние
    pub fn attach(inner: Arc<dyn ChannelBackend>) -> Self {
        debug!("Attaching data channel '{}'", inner.label());
        let open = AtomicBool::new(inner.is_open());
        Self { inner, open }
    }

    pub fn id(&self) -> ChannelId {
        self.inner.id()
    }

    pub fn label(&self) -> String {
        self.inner.label()
    }

    pub fn mark_open(&self) -> bool {
        !self.open.swap(true, Ordering::SeqCst)
    }

    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.inner.is_open()
    }

    /// `Ok(false)`, если канал не открыт: сообщение не отправлялось
    pub async fn send(&self, message: &DataMessage) -> Result<bool> {
        if !self.is_open() {
            debug!("Data channel not open, dropping outbound message");
            return Ok(false);
        }
        let frame = encode(message)?;
        self.inner.send(frame).await?;
        Ok(true)
    }

    pub async fn close(&self) {
        self.mark_closed();
        if let Err(e) = self.inner.close().await {
            warn!("Failed to close data channel: {}", e);
        }
    }
}
