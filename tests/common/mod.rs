//! Фейковая платформа для интеграционных тестов.
//!
//! SDP здесь упрощённый: строка `m=application` и `a=channel:<id>` на каждый
//! свой data channel, `m=<kind> <track> <stream>` на каждый трек. Соединение
//! считается установленным, когда обе description применены, сигналинг
//! стабилен и пришёл хотя бы один удалённый кандидат. Как и в webrtc-rs,
//! после соединения каждый канал удалённой стороны появляется входящим,
//! а кадры ходят между парными каналами.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use peerlink::capability::PlatformFeatures;
use peerlink::error::{PeerError, Result};
use peerlink::events::{EventStream, PeerEvent};
use peerlink::media::{LocalTrack, RemoteTrack, TrackKind};
use peerlink::peer::backend::{
    ChannelBackend, ChannelId, ConnectionState, EventSink, Frame, Platform, PlatformEvent,
    RtcBackend, RtcSettings, SenderId,
};
use peerlink::peer::types::{IceCandidate, SdpKind, SessionDescription, SignalPayload};
use peerlink::signaling::{feed_signals, forward_signals, ChannelTransport};
use peerlink::capability::ExecutionContext;
use peerlink::{PeerSession, SessionOptions};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Каналы всех соединений платформы: удалённая сторона находит пару по id
#[derive(Default)]
pub struct Wire {
    next: AtomicU64,
    channels: Mutex<HashMap<u64, Weak<FakeChannel>>>,
}

impl Wire {
    fn register(&self, channel: &Arc<FakeChannel>) {
        self.channels.lock().insert(channel.id.0, Arc::downgrade(channel));
    }

    fn find(&self, id: u64) -> Option<Arc<FakeChannel>> {
        self.channels.lock().get(&id).and_then(Weak::upgrade)
    }

    fn next_id(&self) -> ChannelId {
        ChannelId(self.next.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

pub struct FakePlatform {
    features: PlatformFeatures,
    backends: Mutex<Vec<Arc<FakeBackend>>>,
    hosts: AtomicU32,
    wire: Arc<Wire>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::with_features(PlatformFeatures {
            peer_connection: true,
            data_channel: true,
            media_capture: true,
        })
    }

    pub fn with_features(features: PlatformFeatures) -> Self {
        Self {
            features,
            backends: Mutex::new(Vec::new()),
            hosts: AtomicU32::new(1),
            wire: Arc::new(Wire::default()),
        }
    }

    pub fn backend(&self, idx: usize) -> Arc<FakeBackend> {
        self.backends.lock()[idx].clone()
    }

    pub fn opened(&self) -> usize {
        self.backends.lock().len()
    }
}

#[async_trait]
impl Platform for FakePlatform {
    fn features(&self) -> PlatformFeatures {
        self.features
    }

    async fn open(&self, settings: &RtcSettings, sink: EventSink) -> Result<Arc<dyn RtcBackend>> {
        let host = self.hosts.fetch_add(1, Ordering::SeqCst);
        let backend = Arc::new(FakeBackend::new(host, settings.clone(), sink, self.wire.clone()));
        self.backends.lock().push(backend.clone());
        Ok(backend as Arc<dyn RtcBackend>)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signaling {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
}

struct FakeState {
    signaling: Signaling,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    version: u32,
    tracks: Vec<(SenderId, LocalTrack)>,
    next_sender: u64,
    /// Свои и входящие каналы в порядке появления
    channels: Vec<Arc<FakeChannel>>,
    /// Каналы удалённой стороны из её SDP
    remote_channels: BTreeSet<u64>,
    mirrored: HashSet<u64>,
    applied: Vec<IceCandidate>,
    announced: bool,
    connected: bool,
    established: bool,
    closed: bool,
    rollbacks: u32,
    replaced: u32,
    remote_tracks: HashSet<String>,
    reject_remote: bool,
}

pub struct FakeBackend {
    host: u32,
    pub settings: RtcSettings,
    sink: EventSink,
    wire: Arc<Wire>,
    state: Mutex<FakeState>,
}

impl FakeBackend {
    fn new(host: u32, settings: RtcSettings, sink: EventSink, wire: Arc<Wire>) -> Self {
        Self {
            host,
            settings,
            sink,
            wire,
            state: Mutex::new(FakeState {
                signaling: Signaling::Stable,
                local: None,
                remote: None,
                version: 0,
                tracks: Vec::new(),
                next_sender: 1,
                channels: Vec::new(),
                remote_channels: BTreeSet::new(),
                mirrored: HashSet::new(),
                applied: Vec::new(),
                announced: false,
                connected: false,
                established: false,
                closed: false,
                rollbacks: 0,
                replaced: 0,
                remote_tracks: HashSet::new(),
                reject_remote: false,
            }),
        }
    }

    /// Событие от имени платформы
    pub fn emit(&self, event: PlatformEvent) {
        let _ = self.sink.send(event);
    }

    /// Следующий `set_remote_description` завершится ошибкой
    pub fn reject_next_remote(&self) {
        self.state.lock().reject_remote = true;
    }

    pub fn signaling(&self) -> Signaling {
        self.state.lock().signaling
    }

    pub fn applied(&self) -> Vec<IceCandidate> {
        self.state.lock().applied.clone()
    }

    pub fn rollbacks(&self) -> u32 {
        self.state.lock().rollbacks
    }

    pub fn replaced(&self) -> u32 {
        self.state.lock().replaced
    }

    pub fn track_ids(&self) -> Vec<String> {
        self.state.lock().tracks.iter().map(|(_, t)| t.id().to_string()).collect()
    }

    pub fn channel(&self, idx: usize) -> Arc<FakeChannel> {
        self.state.lock().channels[idx].clone()
    }

    pub fn channel_count(&self) -> usize {
        self.state.lock().channels.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn render_sdp(&self, state: &FakeState, origin: &str) -> String {
        let mut sdp = format!("v=0\r\no={origin} {} {}\r\n", self.host, state.version);
        let own: Vec<_> = state.channels.iter().filter(|ch| !ch.incoming).collect();
        if !own.is_empty() {
            sdp.push_str("m=application\r\n");
        }
        for channel in own {
            sdp.push_str(&format!("a=channel:{}\r\n", channel.id.0));
        }
        for (_, track) in &state.tracks {
            let kind = track.kind().unwrap_or(TrackKind::Video);
            sdp.push_str(&format!("m={kind} {} {}\r\n", track.id(), track.stream_id()));
        }
        sdp
    }

    fn host_candidate(&self) -> IceCandidate {
        IceCandidate::new(
            format!(
                "candidate:{} 1 udp 2122260223 10.0.0.{} {} typ host",
                self.host,
                self.host,
                50000 + self.host
            ),
            Some("0".into()),
            Some(0),
        )
    }

    /// Разбирает треки и каналы из удалённого SDP
    fn absorb_remote(&self, state: &mut FakeState, sdp: &str) {
        for line in sdp.lines() {
            if let Some(id) = line.strip_prefix("a=channel:") {
                if let Ok(id) = id.trim().parse() {
                    state.remote_channels.insert(id);
                }
                continue;
            }
            let Some(media) = line.strip_prefix("m=") else {
                continue;
            };
            let parts: Vec<&str> = media.split_whitespace().collect();
            if let [kind, id, stream] = parts.as_slice() {
                if !state.remote_tracks.insert(id.to_string()) {
                    continue;
                }
                let kind = if *kind == "audio" { TrackKind::Audio } else { TrackKind::Video };
                self.emit(PlatformEvent::RemoteTrack(RemoteTrack {
                    id: id.to_string(),
                    stream_id: stream.to_string(),
                    kind,
                    remote: None,
                }));
            }
        }
    }

    fn check_connected(&self, state: &mut FakeState) {
        if state.closed {
            return;
        }
        if !state.connected {
            if state.local.is_none()
                || state.remote.is_none()
                || state.signaling != Signaling::Stable
                || state.applied.is_empty()
            {
                return;
            }
            state.connected = true;
            self.emit(PlatformEvent::ConnectionState(ConnectionState::Connected));
            for channel in &state.channels {
                if !channel.is_closed() {
                    channel.open_now();
                }
            }
        }
        self.mirror_remote_channels(state);
    }

    /// Каждый канал удалённой стороны появляется у нас входящим
    fn mirror_remote_channels(&self, state: &mut FakeState) {
        let fresh: Vec<u64> = state
            .remote_channels
            .iter()
            .copied()
            .filter(|id| !state.mirrored.contains(id))
            .collect();
        for remote_id in fresh {
            state.mirrored.insert(remote_id);
            let peer = self.wire.find(remote_id);
            let label = peer.as_ref().map_or_else(|| "peerlink".to_string(), |p| p.label.clone());
            let channel = FakeChannel::create(&self.wire, &label, true, self.sink.clone());
            if let Some(peer) = peer {
                FakeChannel::link(&channel, &peer);
            }
            state.channels.push(channel.clone());
            self.emit(PlatformEvent::IncomingChannel(channel.clone()));
            channel.open_now();
        }
    }

    fn negotiation_needed(&self, state: &FakeState) {
        if state.established {
            self.emit(PlatformEvent::NegotiationNeeded);
        }
    }
}

#[async_trait]
impl RtcBackend for FakeBackend {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let mut state = self.state.lock();
        state.version += 1;
        Ok(SessionDescription::offer(self.render_sdp(&state, "offer")))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let mut state = self.state.lock();
        if state.signaling != Signaling::HaveRemoteOffer {
            return Err(PeerError::Platform("create_answer without remote offer".into()));
        }
        state.version += 1;
        Ok(SessionDescription::answer(self.render_sdp(&state, "answer")))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        let mut state = self.state.lock();
        state.signaling = match (desc.kind, state.signaling) {
            (SdpKind::Offer, Signaling::Stable) => Signaling::HaveLocalOffer,
            (SdpKind::Answer, Signaling::HaveRemoteOffer) => {
                state.established = true;
                Signaling::Stable
            }
            (kind, current) => {
                return Err(PeerError::Platform(format!(
                    "set_local {kind:?} in {current:?}"
                )))
            }
        };
        state.local = Some(desc);
        if !state.announced {
            state.announced = true;
            self.emit(PlatformEvent::LocalCandidate(self.host_candidate()));
            self.emit(PlatformEvent::GatheringComplete);
        }
        self.check_connected(&mut state);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.reject_remote) {
            return Err(PeerError::Platform("remote description rejected".into()));
        }
        state.signaling = match (desc.kind, state.signaling) {
            (SdpKind::Offer, Signaling::Stable) => Signaling::HaveRemoteOffer,
            (SdpKind::Answer, Signaling::HaveLocalOffer) => {
                state.established = true;
                Signaling::Stable
            }
            (kind, current) => {
                return Err(PeerError::Platform(format!(
                    "set_remote {kind:?} in {current:?}"
                )))
            }
        };
        self.absorb_remote(&mut state, &desc.sdp);
        state.remote = Some(desc);
        self.check_connected(&mut state);
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.signaling != Signaling::HaveLocalOffer {
            return Err(PeerError::Platform("nothing to roll back".into()));
        }
        state.signaling = Signaling::Stable;
        state.rollbacks += 1;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut state = self.state.lock();
        if state.remote.is_none() {
            return Err(PeerError::Platform("candidate before remote description".into()));
        }
        state.applied.push(candidate);
        self.check_connected(&mut state);
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn ChannelBackend>> {
        let channel = FakeChannel::create(&self.wire, label, false, self.sink.clone());
        self.state.lock().channels.push(channel.clone());
        Ok(channel as Arc<dyn ChannelBackend>)
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<SenderId> {
        let mut state = self.state.lock();
        let id = SenderId(state.next_sender);
        state.next_sender += 1;
        state.tracks.push((id, track.clone()));
        self.negotiation_needed(&state);
        Ok(id)
    }

    async fn remove_track(&self, sender: SenderId) -> Result<()> {
        let mut state = self.state.lock();
        let idx = state
            .tracks
            .iter()
            .position(|(id, _)| *id == sender)
            .ok_or_else(|| PeerError::Platform("unknown sender".into()))?;
        state.tracks.remove(idx);
        self.negotiation_needed(&state);
        Ok(())
    }

    async fn replace_track(&self, sender: SenderId, track: &LocalTrack) -> Result<()> {
        let mut state = self.state.lock();
        let slot = state
            .tracks
            .iter_mut()
            .find(|(id, _)| *id == sender)
            .ok_or_else(|| PeerError::Platform("unknown sender".into()))?;
        slot.1 = track.clone();
        state.replaced += 1;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.closed = true;
        for channel in &state.channels {
            channel.shut();
        }
        self.emit(PlatformEvent::ConnectionState(ConnectionState::Closed));
        Ok(())
    }
}

/// Канал с колбэками, привязанными при создании, как у платформы
pub struct FakeChannel {
    id: ChannelId,
    label: String,
    incoming: bool,
    sink: EventSink,
    open: AtomicBool,
    closed: AtomicBool,
    peer: Mutex<Weak<FakeChannel>>,
    sent: Mutex<Vec<Frame>>,
}

impl FakeChannel {
    fn create(wire: &Wire, label: &str, incoming: bool, sink: EventSink) -> Arc<Self> {
        let channel = Arc::new(Self {
            id: wire.next_id(),
            label: label.to_string(),
            incoming,
            sink,
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            peer: Mutex::new(Weak::new()),
            sent: Mutex::new(Vec::new()),
        });
        wire.register(&channel);
        channel
    }

    fn link(a: &Arc<FakeChannel>, b: &Arc<FakeChannel>) {
        *a.peer.lock() = Arc::downgrade(b);
        *b.peer.lock() = Arc::downgrade(a);
    }

    fn open_now(&self) {
        self.open.store(true, Ordering::SeqCst);
        let _ = self.sink.send(PlatformEvent::ChannelOpen(self.id));
    }

    fn shut(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_incoming(&self) -> bool {
        self.incoming
    }

    pub fn sent(&self) -> Vec<Frame> {
        self.sent.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Кадр от удалённой стороны
    pub fn deliver(&self, frame: Frame) {
        if self.is_closed() {
            return;
        }
        let _ = self.sink.send(PlatformEvent::ChannelMessage(self.id, frame));
    }

    /// Удалённая сторона закрыла канал
    pub fn close_from_remote(&self) {
        self.shut();
        let _ = self.sink.send(PlatformEvent::ChannelClosed(self.id));
    }
}

#[async_trait]
impl ChannelBackend for FakeChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, frame: Frame) -> Result<()> {
        if !self.is_open() {
            return Err(PeerError::Platform("channel not open".into()));
        }
        self.sent.lock().push(frame.clone());
        let peer = self.peer.lock().upgrade();
        if let Some(peer) = peer {
            peer.deliver(frame);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.shut();
        Ok(())
    }
}

// ========== HELPERS ==========

pub fn init_log() {
    peerlink::logger::init_logging();
}

/// Даёт фоновым задачам разобрать очереди
pub async fn settle() {
    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn drain(rx: &mut EventStream) -> Vec<PeerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn count(events: &[PeerEvent], name: &str) -> usize {
    events.iter().filter(|e| e.name() == name).count()
}

pub fn signals(events: &[PeerEvent]) -> Vec<SignalPayload> {
    events
        .iter()
        .filter_map(|e| match e {
            PeerEvent::Signal(payload) => Some(payload.clone()),
            _ => None,
        })
        .collect()
}

pub fn errors(events: &[PeerEvent]) -> Vec<PeerError> {
    events
        .iter()
        .filter_map(|e| match e {
            PeerEvent::Error(err) => Some(err.clone()),
            _ => None,
        })
        .collect()
}

/// Собирает события до первого с именем `name` включительно
pub async fn wait_for(rx: &mut EventStream, name: &str) -> Vec<PeerEvent> {
    wait_for_within(rx, name, Duration::from_secs(5)).await
}

pub async fn wait_for_within(rx: &mut EventStream, name: &str, limit: Duration) -> Vec<PeerEvent> {
    let mut seen = Vec::new();
    let found = tokio::time::timeout(limit, async {
        while let Some(event) = rx.recv().await {
            let done = event.name() == name;
            seen.push(event);
            if done {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    assert!(found, "no '{name}' event, got {:?}", seen.iter().map(|e| e.name()).collect::<Vec<_>>());
    seen
}

/// Соединяет две сессии транспортом внутри процесса
pub fn link(
    a: &PeerSession,
    a_events: EventStream,
    b: &PeerSession,
    b_events: EventStream,
) -> (EventStream, EventStream) {
    let ((a_transport, a_inbound), (b_transport, b_inbound)) = ChannelTransport::pair();
    let a_out = forward_signals(a_events, Arc::new(a_transport));
    let b_out = forward_signals(b_events, Arc::new(b_transport));
    feed_signals(a.clone(), a_inbound);
    feed_signals(b.clone(), b_inbound);
    (a_out, b_out)
}

/// Две сессии, прошедшие `connect`. События до него сохранены в `*_seen`.
pub struct Pair {
    pub a: PeerSession,
    pub a_events: EventStream,
    pub a_seen: Vec<PeerEvent>,
    pub b: PeerSession,
    pub b_events: EventStream,
    pub b_seen: Vec<PeerEvent>,
}

pub async fn connected_pair(
    platform: &FakePlatform,
    a_options: SessionOptions,
    b_options: SessionOptions,
) -> Pair {
    let ctx = ExecutionContext::native();
    let (a, a_events) = PeerSession::create(a_options, platform, &ctx).await.unwrap();
    let (b, b_events) = PeerSession::create(b_options, platform, &ctx).await.unwrap();
    let (mut a_events, mut b_events) = link(&a, a_events, &b, b_events);

    let a_seen = wait_for(&mut a_events, "connect").await;
    let b_seen = wait_for(&mut b_events, "connect").await;
    Pair {
        a,
        a_events,
        a_seen,
        b,
        b_events,
        b_seen,
    }
}
