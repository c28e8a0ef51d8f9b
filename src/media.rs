//! Локальные и удалённые медиа-потоки и получение медиа с устройств.
//!
//! Сессия пользуется треками приложения, но не владеет ими: она никогда
//! не останавливает чужие треки, только отвязывает от них свои sender'ы.

use crate::error::{PeerError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

impl TrackKind {
    pub fn from_codec_type(kind: RTPCodecType) -> Option<Self> {
        match kind {
            RTPCodecType::Audio => Some(TrackKind::Audio),
            RTPCodecType::Video => Some(TrackKind::Video),
            _ => None,
        }
    }
}

/// Исходящий трек. Идентичность трека — идентичность `Arc`, а не id.
#[derive(Clone)]
pub struct LocalTrack {
    inner: Arc<dyn TrackLocal + Send + Sync>,
}

impl LocalTrack {
    pub fn new(inner: Arc<dyn TrackLocal + Send + Sync>) -> Self {
        Self { inner }
    }

    /// VP8 трек, в который приложение пишет сэмплы
    pub fn video(id: &str, stream_id: &str) -> Self {
        Self::sample(MIME_TYPE_VP8, 90000, 0, id, stream_id)
    }

    /// Opus трек
    pub fn audio(id: &str, stream_id: &str) -> Self {
        Self::sample(MIME_TYPE_OPUS, 48000, 2, id, stream_id)
    }

    fn sample(mime: &str, clock_rate: u32, channels: u16, id: &str, stream_id: &str) -> Self {
        let track = TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime.to_owned(),
                clock_rate,
                channels,
                ..Default::default()
            },
            id.to_owned(),
            stream_id.to_owned(),
        );
        Self::new(Arc::new(track))
    }

    pub fn id(&self) -> &str {
        self.inner.id()
    }

    pub fn stream_id(&self) -> &str {
        self.inner.stream_id()
    }

    pub fn kind(&self) -> Option<TrackKind> {
        TrackKind::from_codec_type(self.inner.kind())
    }

    pub fn same_track(&self, other: &LocalTrack) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.inner), Arc::as_ptr(&other.inner))
    }

    pub fn as_track_local(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.inner.clone()
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id())
            .field("stream_id", &self.stream_id())
            .field("kind", &self.kind())
            .finish()
    }
}

/// Поток приложения: набор треков под одним id
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<LocalTrack>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tracks: Vec::new(),
        }
    }

    pub fn with_track(mut self, track: LocalTrack) -> Self {
        self.add_track(track);
        self
    }

    pub fn add_track(&mut self, track: LocalTrack) {
        if !self.tracks.iter().any(|t| t.same_track(&track)) {
            self.tracks.push(track);
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &LocalTrack> {
        self.tracks.iter().filter(move |t| t.kind() == Some(kind))
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

/// Входящий трек удалённой стороны
#[derive(Debug, Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
    /// RTP читатель; `None`, если платформа его не отдаёт
    pub remote: Option<Arc<TrackRemote>>,
}

/// Удалённый поток. Треки, пришедшие позже, добавляются в тот же поток.
#[derive(Debug, Clone)]
pub struct RemoteStream {
    id: String,
    tracks: Arc<RwLock<Vec<RemoteTrack>>>,
}

impl RemoteStream {
    pub(crate) fn new(first: RemoteTrack) -> Self {
        Self {
            id: first.stream_id.clone(),
            tracks: Arc::new(RwLock::new(vec![first])),
        }
    }

    pub(crate) fn push(&self, track: RemoteTrack) {
        let mut tracks = self.tracks.write();
        if !tracks.iter().any(|t| t.id == track.id) {
            tracks.push(track);
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> Vec<RemoteTrack> {
        self.tracks.read().clone()
    }

    pub fn len(&self) -> usize {
        self.tracks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.read().is_empty()
    }
}

// ========== CONSTRAINTS ==========

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VideoQuality {
    Low,
    Medium,
    High,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    User,
    Environment,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// Желаемые параметры видео; `None` — на усмотрение устройства
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoConstraints {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<u32>,
    pub facing_mode: Option<FacingMode>,
}

impl VideoConstraints {
    pub fn preset(quality: VideoQuality) -> Self {
        let (width, height, frame_rate) = match quality {
            VideoQuality::Low => (320, 240, 15),
            VideoQuality::Medium => (640, 480, 24),
            VideoQuality::High => (1280, 720, 30),
        };
        Self {
            width: Some(width),
            height: Some(height),
            frame_rate: Some(frame_rate),
            facing_mode: Some(FacingMode::User),
        }
    }

    fn is_relaxed(&self) -> bool {
        self.width.is_none() && self.height.is_none() && self.frame_rate.is_none()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: Option<AudioConstraints>,
    pub video: Option<VideoConstraints>,
}

impl MediaConstraints {
    pub fn call(quality: VideoQuality) -> Self {
        Self {
            audio: Some(AudioConstraints::default()),
            video: Some(VideoConstraints::preset(quality)),
        }
    }

    pub fn audio_only() -> Self {
        Self {
            audio: Some(AudioConstraints::default()),
            video: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }
}

// ========== ACQUISITION ==========

/// Ошибки устройства в терминах платформы (как DOMException в браузере)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaAccessError {
    NotAllowed,
    NotFound,
    NotReadable,
    Overconstrained(String),
    Other(String),
}

/// Источник медиа приложения (камера, микрофон, захват экрана)
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> std::result::Result<MediaStream, MediaAccessError>;
}

/// Классифицирует ошибку устройства так, чтобы UI мог выбрать сообщение
pub fn classify_media_error(err: &MediaAccessError, constraints: &MediaConstraints) -> PeerError {
    match err {
        MediaAccessError::NotAllowed => PeerError::PermissionDenied,
        MediaAccessError::NotFound => {
            if constraints.video.is_some() {
                PeerError::DeviceNotFound(TrackKind::Video)
            } else {
                PeerError::DeviceNotFound(TrackKind::Audio)
            }
        }
        MediaAccessError::NotReadable => PeerError::DeviceBusy,
        MediaAccessError::Overconstrained(what) => PeerError::Overconstrained(what.clone()),
        MediaAccessError::Other(msg) => PeerError::Platform(msg.clone()),
    }
}

/// Получает локальный поток, постепенно ослабляя ограничения:
/// сначала как просили, затем видео без разрешения, затем только звук.
/// Отказ в доступе не ретраится.
pub async fn acquire_local_stream(
    devices: &dyn MediaDevices,
    constraints: &MediaConstraints,
) -> Result<MediaStream> {
    if constraints.is_empty() {
        return Err(PeerError::Config("no audio or video requested".into()));
    }

    let mut attempts = vec![constraints.clone()];
    if let Some(video) = &constraints.video {
        if !video.is_relaxed() {
            attempts.push(MediaConstraints {
                audio: constraints.audio.clone(),
                video: Some(VideoConstraints {
                    facing_mode: video.facing_mode,
                    ..Default::default()
                }),
            });
        }
        if constraints.audio.is_some() {
            attempts.push(MediaConstraints {
                audio: constraints.audio.clone(),
                video: None,
            });
        }
    }

    let mut first_err = None;
    for attempt in &attempts {
        match devices.get_user_media(attempt).await {
            Ok(stream) => {
                if first_err.is_some() {
                    warn!(
                        "Media acquired with relaxed constraints: audio={} video={}",
                        attempt.audio.is_some(),
                        attempt.video.is_some()
                    );
                }
                return Ok(stream);
            }
            Err(MediaAccessError::NotAllowed) => return Err(PeerError::PermissionDenied),
            Err(e @ (MediaAccessError::NotFound | MediaAccessError::Overconstrained(_))) => {
                debug!("getUserMedia failed with {:?}, relaxing constraints", e);
                first_err.get_or_insert_with(|| classify_media_error(&e, attempt));
            }
            Err(e) => return Err(classify_media_error(&e, attempt)),
        }
    }
    // Первая ошибка самая информативная, если отпало всё
    Err(first_err.unwrap_or_else(|| classify_media_error(&MediaAccessError::NotFound, constraints)))
}
