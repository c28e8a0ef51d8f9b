//! Реализация платформы поверх webrtc-rs.
//!
//! Все колбэки `RTCPeerConnection` и `RTCDataChannel` переводятся в
//! `PlatformEvent` и уходят в канал сессии; логики тут нет.

use crate::capability::PlatformFeatures;
use crate::error::{PeerError, Result};
use crate::media::{LocalTrack, RemoteTrack, TrackKind};
use crate::peer::backend::{
    ChannelBackend, ChannelId, ConnectionState, EventSink, Frame, Platform, PlatformEvent,
    RtcBackend, RtcSettings, SenderId,
};
use crate::peer::ice::to_rtc_ice_servers;
use crate::peer::types::{IceCandidate, SdpKind, SessionDescription};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

/// Нативная платформа: peer connection и data channel есть всегда,
/// захвата устройств нет (треки приложение пишет само)
#[derive(Debug, Clone, Copy, Default)]
pub struct WebRtcPlatform {
    loopback: bool,
}

impl WebRtcPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Добавляет loopback-кандидаты: два соединения в одном процессе
    /// находят друг друга без сети
    pub fn with_loopback_candidates(mut self) -> Self {
        self.loopback = true;
        self
    }
}

#[async_trait]
impl Platform for WebRtcPlatform {
    fn features(&self) -> PlatformFeatures {
        PlatformFeatures {
            peer_connection: true,
            data_channel: true,
            media_capture: false,
        }
    }

    async fn open(&self, settings: &RtcSettings, sink: EventSink) -> Result<Arc<dyn RtcBackend>> {
        let backend = WebRtcBackend::open(settings, self.loopback, sink).await?;
        Ok(Arc::new(backend) as Arc<dyn RtcBackend>)
    }
}

fn rtc_config(settings: &RtcSettings) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: to_rtc_ice_servers(&settings.ice_servers),
        ice_candidate_pool_size: settings.ice_candidate_pool_size,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

fn map_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let rtc = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp)?,
    };
    Ok(rtc)
}

fn from_rtc_description(desc: RTCSessionDescription) -> Result<SessionDescription> {
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
        other => Err(PeerError::Platform(format!("unexpected sdp type {other}"))),
    }
}

/// Одно `RTCPeerConnection` с таблицей sender'ов
pub struct WebRtcBackend {
    pc: Arc<RTCPeerConnection>,
    senders: Mutex<HashMap<u64, Arc<RTCRtpSender>>>,
    next_sender: AtomicU64,
    /// Последний собственный offer: нужен для отката
    last_offer: Mutex<Option<String>>,
    sink: EventSink,
    next_channel: Arc<AtomicU64>,
}

impl WebRtcBackend {
    pub async fn open(settings: &RtcSettings, loopback: bool, sink: EventSink) -> Result<Self> {
        let mut media = MediaEngine::default();
        media.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media)?;

        let mut setting = SettingEngine::default();
        setting.set_include_loopback_candidate(loopback);

        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting)
            .build();

        let pc = Arc::new(api.new_peer_connection(rtc_config(settings)).await?);
        debug!("Peer connection opened with {} ICE servers", settings.ice_servers.len());

        let next_channel = Arc::new(AtomicU64::new(1));
        wire_callbacks(&pc, sink.clone(), next_channel.clone());

        Ok(Self {
            pc,
            senders: Mutex::new(HashMap::new()),
            next_sender: AtomicU64::new(1),
            last_offer: Mutex::new(None),
            sink,
            next_channel,
        })
    }

    fn sender(&self, id: SenderId) -> Result<Arc<RTCRtpSender>> {
        self.senders
            .lock()
            .get(&id.0)
            .cloned()
            .ok_or_else(|| PeerError::Platform(format!("unknown sender {}", id.0)))
    }
}

fn wire_callbacks(pc: &Arc<RTCPeerConnection>, sink: EventSink, next_channel: Arc<AtomicU64>) {
    let tx = sink.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        let event = match cand {
            Some(c) => match c.to_json() {
                Ok(init) => Some(PlatformEvent::LocalCandidate(IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_mline_index: init.sdp_mline_index,
                    username_fragment: init.username_fragment,
                })),
                Err(e) => {
                    warn!("Failed to serialize local candidate: {}", e);
                    None
                }
            },
            // cand == None означает конец сбора
            None => Some(PlatformEvent::GatheringComplete),
        };
        if let Some(event) = event {
            let _ = tx.send(event);
        }
        Box::pin(async {})
    }));

    let tx = sink.clone();
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        if let Some(state) = map_state(st) {
            let _ = tx.send(PlatformEvent::ConnectionState(state));
        }
        Box::pin(async {})
    }));

    let tx = sink.clone();
    pc.on_negotiation_needed(Box::new(move || {
        let _ = tx.send(PlatformEvent::NegotiationNeeded);
        Box::pin(async {})
    }));

    let tx = sink.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
            match TrackKind::from_codec_type(track.kind()) {
                Some(kind) => {
                    let _ = tx.send(PlatformEvent::RemoteTrack(RemoteTrack {
                        id: track.id(),
                        stream_id: track.stream_id(),
                        kind,
                        remote: Some(track.clone()),
                    }));
                }
                None => debug!("Remote track of unknown kind ignored"),
            }
            Box::pin(async {})
        },
    ));

    let tx = sink;
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        // колбэки вешаем до возврата: цикл чтения канала стартует сразу после
        let id = ChannelId(next_channel.fetch_add(1, Ordering::SeqCst));
        let channel = WebRtcChannel::new(dc, id, tx.clone());
        let _ = tx.send(PlatformEvent::IncomingChannel(Arc::new(channel)));
        Box::pin(async {})
    }));
}

#[async_trait]
impl RtcBackend for WebRtcBackend {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await?;
        *self.last_offer.lock() = Some(offer.sdp.clone());
        from_rtc_description(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.pc.create_answer(None).await?;
        from_rtc_description(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_local_description(to_rtc_description(desc)?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc.set_remote_description(to_rtc_description(desc)?).await?;
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        // пустой sdp для rollback webrtc-rs не принимает (JSEP 5.4)
        let sdp = self
            .last_offer
            .lock()
            .take()
            .ok_or_else(|| PeerError::Platform("no local offer to roll back".into()))?;
        let mut desc = RTCSessionDescription::default();
        desc.sdp_type = RTCSdpType::Rollback;
        desc.sdp = sdp;
        self.pc.set_local_description(desc).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn ChannelBackend>> {
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let dc = self.pc.create_data_channel(label, Some(init)).await?;
        let id = ChannelId(self.next_channel.fetch_add(1, Ordering::SeqCst));
        let channel = WebRtcChannel::new(dc, id, self.sink.clone());
        Ok(Arc::new(channel) as Arc<dyn ChannelBackend>)
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<SenderId> {
        let sender = self.pc.add_track(track.as_track_local()).await?;
        let id = self.next_sender.fetch_add(1, Ordering::SeqCst);
        self.senders.lock().insert(id, sender);
        Ok(SenderId(id))
    }

    async fn remove_track(&self, sender: SenderId) -> Result<()> {
        let rtp_sender = self.sender(sender)?;
        self.pc.remove_track(&rtp_sender).await?;
        self.senders.lock().remove(&sender.0);
        Ok(())
    }

    async fn replace_track(&self, sender: SenderId, track: &LocalTrack) -> Result<()> {
        let rtp_sender = self.sender(sender)?;
        rtp_sender.replace_track(Some(track.as_track_local())).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.senders.lock().clear();
        self.pc.close().await?;
        Ok(())
    }
}

/// `RTCDataChannel` за границей платформы
pub struct WebRtcChannel {
    id: ChannelId,
    dc: Arc<RTCDataChannel>,
}

impl WebRtcChannel {
    /// Оборачивает канал и сразу переводит его колбэки в события
    pub fn new(dc: Arc<RTCDataChannel>, id: ChannelId, sink: EventSink) -> Self {
        bind_channel(&dc, id, sink);
        Self { id, dc }
    }
}

fn bind_channel(dc: &Arc<RTCDataChannel>, id: ChannelId, sink: EventSink) {
    let tx = sink.clone();
    dc.on_open(Box::new(move || {
        let _ = tx.send(PlatformEvent::ChannelOpen(id));
        Box::pin(async {})
    }));

    let tx = sink.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let frame = if msg.is_string {
            match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => Frame::Text(text),
                Err(_) => Frame::Binary(msg.data),
            }
        } else {
            Frame::Binary(msg.data)
        };
        let _ = tx.send(PlatformEvent::ChannelMessage(id, frame));
        Box::pin(async {})
    }));

    let tx = sink;
    dc.on_close(Box::new(move || {
        let _ = tx.send(PlatformEvent::ChannelClosed(id));
        Box::pin(async {})
    }));
}

#[async_trait]
impl ChannelBackend for WebRtcChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn label(&self) -> String {
        self.dc.label().to_string()
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn send(&self, frame: Frame) -> Result<()> {
        match frame {
            Frame::Text(text) => self.dc.send_text(text).await?,
            Frame::Binary(bytes) => self.dc.send(&bytes).await?,
        };
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.dc.close().await?;
        Ok(())
    }
}
