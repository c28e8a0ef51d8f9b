//! Менеджер peer connection: одна сессия на одного удалённого участника.
//!
//! Сессия сама не ходит в сеть. Исходящие offer/answer/кандидаты уходят
//! событием `PeerEvent::Signal`, входящие приложение передаёт в `signal()`.
//! Ошибки после создания не возвращаются, а публикуются событием `Error`.

use crate::capability::{ensure_supported, ExecutionContext};
use crate::config::PeerConfig;
use crate::error::{PeerError, Result};
use crate::events::{EventBus, EventStream, PeerEvent};
use crate::logger::dump_candidate;
use crate::media::{LocalTrack, MediaStream, RemoteStream, RemoteTrack};
use crate::peer::backend::{
    ChannelBackend, ChannelId, ConnectionState, Platform, PlatformEvent, RtcBackend, RtcSettings,
};
use crate::peer::data_channel::{decode, DataChannel, DataMessage};
use crate::peer::ice::{analyze_candidates, resolve_ice_servers, CandidateQueue};
use crate::peer::state::{NegotiationState, OfferDecision, SessionState};
use crate::peer::tracks::TrackBindings;
use crate::peer::types::{IceCandidate, NegotiationRole, Role, SessionDescription, SignalPayload};
use crate::utils::random_id;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Параметры создания сессии
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub role: Role,
    /// Поток приложения; треки подключаются до первого offer
    pub local_stream: Option<MediaStream>,
    /// `None` — по роли: отвечающая сторона вежливая
    pub negotiation: Option<NegotiationRole>,
    pub config: PeerConfig,
}

impl SessionOptions {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            local_stream: None,
            negotiation: None,
            config: PeerConfig::default(),
        }
    }

    pub fn initiator() -> Self {
        Self::new(Role::Initiator)
    }

    pub fn responder() -> Self {
        Self::new(Role::Responder)
    }

    pub fn with_stream(mut self, stream: MediaStream) -> Self {
        self.local_stream = Some(stream);
        self
    }

    pub fn with_negotiation_role(mut self, role: NegotiationRole) -> Self {
        self.negotiation = Some(role);
        self
    }

    pub fn with_config(mut self, config: PeerConfig) -> Self {
        self.config = config;
        self
    }
}

struct Inner {
    id: String,
    role: Role,
    config: PeerConfig,
    backend: Arc<dyn RtcBackend>,
    bus: EventBus<PeerEvent>,
    state: Mutex<SessionState>,
    negotiation: Mutex<NegotiationState>,
    /// Цепочка операций сигналинга: offer/answer/кандидаты по одному
    ops: tokio::sync::Mutex<()>,
    candidates: Mutex<CandidateQueue>,
    local_candidates: Mutex<Vec<IceCandidate>>,
    channel: Mutex<Option<Arc<DataChannel>>>,
    tracks: tokio::sync::Mutex<TrackBindings>,
    remote_streams: Mutex<HashMap<String, RemoteStream>>,
    transport_connected: AtomicBool,
    connected_once: AtomicBool,
    /// Отложенная проверка после disconnected
    grace: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
    shutdown: Arc<Notify>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        // все хэндлы брошены без destroy(): освобождаем соединение сами
        self.shutdown.notify_one();
        if let Some(handle) = self.grace.get_mut().take() {
            handle.abort();
        }
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            let backend = self.backend.clone();
            rt.spawn(async move {
                let _ = backend.close().await;
            });
        }
    }
}

/// Peer-сессия. Клонируется дёшево, все клоны — одна сессия.
#[derive(Clone)]
pub struct PeerSession {
    inner: Arc<Inner>,
}

impl PeerSession {
    /// Создаёт сессию в состоянии `New`.
    ///
    /// Предусловия (безопасный контекст, примитивы WebRTC, валидный
    /// конфиг) проверяются до любого обращения к платформе. Возвращённый
    /// поток событий подписан до первого события, так что первый offer
    /// инициатора не теряется.
    pub async fn create(
        options: SessionOptions,
        platform: &dyn Platform,
        ctx: &ExecutionContext,
    ) -> Result<(PeerSession, EventStream)> {
        ensure_supported(platform.features(), ctx)?;
        options.config.validate()?;

        let id = random_id();
        let polite = options
            .negotiation
            .unwrap_or_else(|| NegotiationRole::for_role(options.role))
            .is_polite();
        let settings = RtcSettings {
            ice_servers: resolve_ice_servers(&options.config),
            ice_candidate_pool_size: options.config.ice_candidate_pool_size,
        };

        let (sink, rx) = mpsc::unbounded_channel();
        let backend = platform.open(&settings, sink).await?;

        let bus = EventBus::new();
        let events = bus.subscribe();
        let shutdown = Arc::new(Notify::new());

        let session = PeerSession {
            inner: Arc::new(Inner {
                id,
                role: options.role,
                config: options.config.clone(),
                backend,
                bus,
                state: Mutex::new(SessionState::New),
                negotiation: Mutex::new(NegotiationState::new(polite)),
                ops: tokio::sync::Mutex::new(()),
                candidates: Mutex::new(CandidateQueue::new()),
                local_candidates: Mutex::new(Vec::new()),
                channel: Mutex::new(None),
                tracks: tokio::sync::Mutex::new(TrackBindings::new()),
                remote_streams: Mutex::new(HashMap::new()),
                transport_connected: AtomicBool::new(false),
                connected_once: AtomicBool::new(false),
                grace: Mutex::new(None),
                destroyed: AtomicBool::new(false),
                shutdown: shutdown.clone(),
            }),
        };

        if let Err(e) = session.setup(&options).await {
            // сессии не было: close не публикуем, просто освобождаем соединение
            session.inner.destroyed.store(true, Ordering::SeqCst);
            let _ = session.inner.backend.close().await;
            return Err(e);
        }

        tokio::spawn(drive(Arc::downgrade(&session.inner), rx, shutdown));

        info!(
            session = %session.inner.id,
            role = ?session.inner.role,
            polite,
            "Peer session created"
        );

        if session.inner.role.is_initiator() {
            session.negotiate().await;
        }
        Ok((session, events))
    }

    /// Медиа и канал до сигналинга: первый offer сразу описывает все секции
    async fn setup(&self, options: &SessionOptions) -> Result<()> {
        if let Some(stream) = &options.local_stream {
            for track in stream.tracks() {
                self.bind_track(track, stream.id()).await?;
            }
        }
        if self.inner.role.is_initiator() {
            let channel = self
                .inner
                .backend
                .create_data_channel(&self.inner.config.channel_label)
                .await?;
            self.attach_channel(channel).await;
        }
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn is_polite(&self) -> bool {
        self.inner.negotiation.lock().is_polite()
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    pub fn has_data_channel(&self) -> bool {
        self.inner.channel.lock().is_some()
    }

    /// Дополнительный подписчик на события
    pub fn subscribe(&self) -> EventStream {
        self.inner.bus.subscribe()
    }

    pub async fn local_tracks(&self) -> Vec<LocalTrack> {
        self.inner.tracks.lock().await.tracks()
    }

    pub fn remote_streams(&self) -> Vec<RemoteStream> {
        self.inner.remote_streams.lock().values().cloned().collect()
    }

    // ========== SIGNALING ==========

    /// Применяет нагрузку от удалённой стороны. Никогда не падает:
    /// ошибки уходят событием `Error`, сессия продолжает работу.
    pub async fn signal(&self, payload: SignalPayload) {
        if self.is_destroyed() {
            debug!(session = %self.inner.id, "Signal after destroy ignored");
            return;
        }
        debug!(session = %self.inner.id, kind = payload.kind(), "Applying remote signal");
        let result = match payload {
            SignalPayload::Offer { sdp } => self.apply_offer(sdp).await,
            SignalPayload::Answer { sdp } => self.apply_answer(sdp).await,
            SignalPayload::Candidate { candidate } => self.apply_candidate(candidate).await,
        };
        if let Err(e) = result {
            self.report(e);
        }
    }

    /// То же для сырого JSON из транспорта
    pub async fn signal_json(&self, json: &str) {
        match SignalPayload::from_json(json) {
            Ok(payload) => self.signal(payload).await,
            Err(e) => self.report(e),
        }
    }

    async fn negotiate(&self) {
        let _ops = self.inner.ops.lock().await;
        if self.is_destroyed() {
            return;
        }
        if !self.inner.negotiation.lock().begin_offer() {
            debug!(session = %self.inner.id, "Offer already in flight, skipping negotiation");
            return;
        }
        self.transition(SessionState::Negotiating);

        match self.make_offer().await {
            Ok(offer) => {
                self.inner.negotiation.lock().offer_sent();
                debug!(session = %self.inner.id, "Local offer ready");
                self.emit(PeerEvent::Signal(offer.into()));
            }
            Err(e) => {
                self.inner.negotiation.lock().offer_failed();
                self.report(e);
            }
        }
    }

    async fn make_offer(&self) -> Result<SessionDescription> {
        let offer = self.inner.backend.create_offer().await?;
        self.inner.backend.set_local_description(offer.clone()).await?;
        Ok(offer)
    }

    async fn apply_offer(&self, sdp: String) -> Result<()> {
        let mut offer_lost = false;
        match self.accept_offer(sdp, &mut offer_lost).await {
            // свой offer откатан, встречный не применился: предлагаем заново
            Err(e) if offer_lost => {
                self.report(e);
                self.negotiate().await;
                Ok(())
            }
            result => result,
        }
    }

    async fn accept_offer(&self, sdp: String, offer_lost: &mut bool) -> Result<()> {
        let _ops = self.inner.ops.lock().await;
        if self.is_destroyed() {
            return Ok(());
        }

        let decision = self.inner.negotiation.lock().on_remote_offer();
        match decision {
            OfferDecision::Ignore => {
                debug!(session = %self.inner.id, "Offer collision: impolite side keeps its own offer");
                return Ok(());
            }
            OfferDecision::RollbackAndAccept => {
                debug!(session = %self.inner.id, "Offer collision: polite side rolls back");
                self.inner.backend.rollback().await?;
                self.inner.negotiation.lock().local_offer_rolled_back();
                *offer_lost = true;
            }
            OfferDecision::Accept => {}
        }
        self.transition(SessionState::Negotiating);

        self.inner
            .backend
            .set_remote_description(SessionDescription::offer(sdp))
            .await?;
        if std::mem::take(offer_lost) {
            self.retire_local_channel().await;
        }
        self.inner.negotiation.lock().remote_offer_applied();
        self.flush_candidates().await;

        match self.make_answer().await {
            Ok(answer) => {
                self.inner.negotiation.lock().answer_sent();
                debug!(session = %self.inner.id, "Local answer ready");
                self.emit(PeerEvent::Signal(answer.into()));
                Ok(())
            }
            Err(e) => {
                self.inner.negotiation.lock().remote_failed();
                Err(e)
            }
        }
    }

    async fn make_answer(&self) -> Result<SessionDescription> {
        let answer = self.inner.backend.create_answer().await?;
        self.inner.backend.set_local_description(answer.clone()).await?;
        Ok(answer)
    }

    async fn apply_answer(&self, sdp: String) -> Result<()> {
        let _ops = self.inner.ops.lock().await;
        if self.is_destroyed() {
            return Ok(());
        }
        if !self.inner.negotiation.lock().accepts_answer() {
            debug!(session = %self.inner.id, "Not awaiting an answer, ignoring");
            return Ok(());
        }

        self.inner
            .backend
            .set_remote_description(SessionDescription::answer(sdp))
            .await?;
        self.inner.negotiation.lock().remote_answer_applied();
        self.flush_candidates().await;
        Ok(())
    }

    async fn apply_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let _ops = self.inner.ops.lock().await;
        if self.is_destroyed() {
            return Ok(());
        }

        let has_remote = self.inner.negotiation.lock().has_remote_description();
        {
            let mut queue = self.inner.candidates.lock();
            if !queue.admit(&candidate) {
                debug!(session = %self.inner.id, "Duplicate candidate ignored");
                return Ok(());
            }
            if !has_remote {
                queue.defer(candidate);
                return Ok(());
            }
        }
        dump_candidate("REMOTE", &candidate);
        self.add_remote_candidate(candidate).await
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        match self.inner.backend.add_ice_candidate(candidate).await {
            Ok(()) => Ok(()),
            // кандидаты проигнорированного offer применяться и не должны
            Err(e) if self.inner.negotiation.lock().ignoring_offer() => {
                debug!(session = %self.inner.id, "Candidate of ignored offer failed: {}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Вызывается под `ops`, сразу после установки remote description
    async fn flush_candidates(&self) {
        let pending = self.inner.candidates.lock().drain();
        if !pending.is_empty() {
            debug!(session = %self.inner.id, "Applying {} queued candidates", pending.len());
        }
        for candidate in pending {
            if let Err(e) = self.add_remote_candidate(candidate).await {
                self.report(e);
            }
        }
    }

    // ========== DATA ==========

    /// Отправка по data channel. Если канал не открыт — ничего не происходит.
    pub async fn send(&self, message: impl Into<DataMessage>) {
        if self.is_destroyed() {
            return;
        }
        let channel = self.inner.channel.lock().clone();
        let Some(channel) = channel else {
            debug!(session = %self.inner.id, "No data channel available for sending");
            return;
        };
        if let Err(e) = channel.send(&message.into()).await {
            self.report(e);
        }
    }

    pub async fn send_json<T: Serialize>(&self, value: &T) {
        match DataMessage::json(value) {
            Ok(message) => self.send(message).await,
            Err(e) => self.report(e),
        }
    }

    /// Занимает слот канала сессии; лишний канал сразу закрывается
    async fn attach_channel(&self, channel: Arc<dyn ChannelBackend>) {
        let extra = {
            let mut slot = self.inner.channel.lock();
            if slot.is_some() {
                Some(channel)
            } else {
                *slot = Some(Arc::new(DataChannel::attach(channel)));
                None
            }
        };
        if let Some(channel) = extra {
            debug!(session = %self.inner.id, "Extra data channel '{}' closed", channel.label());
            if let Err(e) = channel.close().await {
                warn!(session = %self.inner.id, "Failed to close extra data channel: {}", e);
            }
        }
    }

    /// Вежливая сторона уступила первый обмен: её канал ещё не открыт и
    /// больше не нужен, слот займёт канал из встречного offer
    async fn retire_local_channel(&self) {
        if self.inner.negotiation.lock().is_established() {
            return;
        }
        let retired = {
            let mut slot = self.inner.channel.lock();
            if slot.as_ref().is_some_and(|ch| !ch.is_open()) {
                slot.take()
            } else {
                None
            }
        };
        if let Some(channel) = retired {
            debug!(session = %self.inner.id, "Local data channel '{}' retired after rollback", channel.label());
            channel.close().await;
        }
    }

    /// Текущий канал сессии, если событие пришло именно от него
    fn channel_by_id(&self, id: ChannelId) -> Option<Arc<DataChannel>> {
        self.inner
            .channel
            .lock()
            .as_ref()
            .filter(|ch| ch.id() == id)
            .cloned()
    }

    // ========== MEDIA ==========

    pub async fn add_track(&self, track: &LocalTrack, stream: &MediaStream) {
        if self.is_destroyed() {
            return;
        }
        if let Err(e) = self.bind_track(track, stream.id()).await {
            self.report(e);
        }
    }

    async fn bind_track(&self, track: &LocalTrack, stream_id: &str) -> Result<()> {
        let mut table = self.inner.tracks.lock().await;
        if table.contains(track) {
            debug!(session = %self.inner.id, track = track.id(), "Track already attached");
            return Ok(());
        }
        let sender = self.inner.backend.add_track(track).await?;
        table.bind(track.clone(), stream_id, sender);
        debug!(session = %self.inner.id, track = track.id(), "Track attached");
        Ok(())
    }

    /// Отвязывает трек от соединения; сам трек не останавливается
    pub async fn remove_track(&self, track: &LocalTrack) {
        if self.is_destroyed() {
            return;
        }
        let mut table = self.inner.tracks.lock().await;
        let Some(sender) = table.sender_of(track) else {
            debug!(session = %self.inner.id, track = track.id(), "remove_track: track not attached");
            return;
        };
        match self.inner.backend.remove_track(sender).await {
            Ok(()) => {
                table.unbind(track);
            }
            Err(e) => self.report(e),
        }
    }

    /// Замена трека на месте (смена камеры/микрофона) без ренеготиации.
    /// Неизвестный `old` — молчаливый no-op.
    pub async fn replace_track(&self, old: &LocalTrack, new: &LocalTrack) {
        if self.is_destroyed() {
            return;
        }
        let mut table = self.inner.tracks.lock().await;
        let Some(sender) = table.sender_of(old) else {
            debug!(session = %self.inner.id, track = old.id(), "replace_track: track not attached");
            return;
        };
        match self.inner.backend.replace_track(sender, new).await {
            Ok(()) => {
                table.rebind(old, new.clone());
            }
            Err(e) => self.report(e),
        }
    }

    /// Например, включение демонстрации экрана
    pub async fn add_stream(&self, stream: &MediaStream) {
        for track in stream.tracks() {
            self.add_track(track, stream).await;
        }
    }

    /// Убирает только треки этого потока, остальные не трогает
    pub async fn remove_stream(&self, stream: &MediaStream) {
        for track in stream.tracks() {
            self.remove_track(track).await;
        }
    }

    // ========== LIFECYCLE ==========

    /// Идемпотентно закрывает сессию; `Close` публикуется ровно один раз
    pub async fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(session = %self.inner.id, "Destroying peer session");

        self.inner.shutdown.notify_one();
        if let Some(handle) = self.inner.grace.lock().take() {
            handle.abort();
        }

        let channel = self.inner.channel.lock().take();
        if let Some(channel) = channel {
            channel.close().await;
        }
        // свои sender'ы отпускаем, треки приложения не останавливаем
        self.inner.tracks.lock().await.clear();
        if let Err(e) = self.inner.backend.close().await {
            warn!(session = %self.inner.id, "Failed to close peer connection: {}", e);
        }
        self.inner.candidates.lock().clear();
        *self.inner.state.lock() = SessionState::Closed;

        self.inner.bus.finish(PeerEvent::Close);
    }

    /// Терминальная ошибка: сначала `Error`, затем `Close`
    async fn fail(&self, error: PeerError) {
        if self.is_destroyed() {
            return;
        }
        warn!(session = %self.inner.id, "Terminal failure: {}", error);
        self.emit(PeerEvent::Error(error));
        self.destroy().await;
    }

    fn report(&self, error: PeerError) {
        warn!(session = %self.inner.id, "{}", error);
        self.emit(PeerEvent::Error(error));
    }

    fn emit(&self, event: PeerEvent) {
        if self.is_destroyed() {
            return;
        }
        self.inner.bus.emit(event);
    }

    fn transition(&self, next: SessionState) -> bool {
        {
            let mut state = self.inner.state.lock();
            if !state.can_transition(next) {
                return false;
            }
            *state = next;
        }
        debug!(session = %self.inner.id, "Session state -> {:?}", next);
        self.emit(PeerEvent::State(next));
        true
    }

    // ========== PLATFORM EVENTS ==========

    async fn handle(&self, event: PlatformEvent) {
        match event {
            PlatformEvent::LocalCandidate(candidate) => {
                dump_candidate("LOCAL", &candidate);
                self.inner.local_candidates.lock().push(candidate.clone());
                self.emit(PeerEvent::Signal(SignalPayload::Candidate { candidate }));
            }
            PlatformEvent::GatheringComplete => {
                debug!(session = %self.inner.id, "ICE candidate gathering completed");
                analyze_candidates(&self.inner.local_candidates.lock());
            }
            PlatformEvent::ConnectionState(state) => self.on_connection_state(state).await,
            PlatformEvent::NegotiationNeeded => {
                let established = self.inner.negotiation.lock().is_established();
                if self.inner.role.is_initiator() || established {
                    self.negotiate().await;
                } else {
                    debug!(session = %self.inner.id, "Negotiation needed before first exchange, answer will cover it");
                }
            }
            PlatformEvent::RemoteTrack(track) => self.on_remote_track(track),
            PlatformEvent::IncomingChannel(channel) => {
                debug!(session = %self.inner.id, "Incoming data channel '{}'", channel.label());
                self.attach_channel(channel).await;
                self.maybe_connect();
            }
            PlatformEvent::ChannelOpen(id) => {
                let Some(channel) = self.channel_by_id(id) else {
                    debug!(session = %self.inner.id, "Open of a foreign data channel ignored");
                    return;
                };
                if channel.mark_open() {
                    debug!(session = %self.inner.id, "Data channel '{}' open", channel.label());
                }
                self.maybe_connect();
            }
            PlatformEvent::ChannelMessage(id, frame) => {
                if self.channel_by_id(id).is_none() {
                    debug!(session = %self.inner.id, "Frame on a foreign data channel dropped");
                    return;
                }
                match decode(frame) {
                    Ok(message) => self.emit(PeerEvent::Data(message)),
                    Err(e) => self.report(e),
                }
            }
            PlatformEvent::ChannelClosed(id) => {
                let Some(channel) = self.channel_by_id(id) else {
                    return;
                };
                channel.mark_closed();
                self.fail(PeerError::RemoteClosed).await;
            }
        }
    }

    async fn on_connection_state(&self, state: ConnectionState) {
        debug!(session = %self.inner.id, "Peer connection state changed to: {:?}", state);
        match state {
            ConnectionState::Connected => {
                self.inner.transport_connected.store(true, Ordering::SeqCst);
                // отменяем отложенный disconnect, если он был
                if let Some(handle) = self.inner.grace.lock().take() {
                    handle.abort();
                }
                if self.state() == SessionState::Disconnected {
                    info!(session = %self.inner.id, "Connection recovered");
                    self.transition(SessionState::Connected);
                } else {
                    self.maybe_connect();
                }
            }
            ConnectionState::Disconnected => {
                self.inner.transport_connected.store(false, Ordering::SeqCst);
                if self.transition(SessionState::Disconnected) {
                    self.start_grace_timer();
                }
            }
            ConnectionState::Failed => self.fail(PeerError::IceFailed).await,
            ConnectionState::Closed => self.fail(PeerError::RemoteClosed).await,
            ConnectionState::New | ConnectionState::Connecting => {}
        }
    }

    /// `Connect` — когда и транспорт подключён, и канал открыт
    fn maybe_connect(&self) {
        if !self.inner.transport_connected.load(Ordering::SeqCst) {
            return;
        }
        let channel_open = self
            .inner
            .channel
            .lock()
            .as_ref()
            .is_some_and(|ch| ch.is_open());
        if !channel_open || self.inner.connected_once.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(session = %self.inner.id, "Peer connected");
        self.transition(SessionState::Connected);
        self.emit(PeerEvent::Connect);
    }

    fn start_grace_timer(&self) {
        let mut slot = self.inner.grace.lock();
        // уже ожидаем? – ничего не делаем
        if slot.is_some() {
            return;
        }
        let grace = self.inner.config.disconnect_grace;
        info!(session = %self.inner.id, "Connection disconnected, waiting {:?} for recovery", grace);

        let weak = Arc::downgrade(&self.inner);
        *slot = Some(tokio::spawn(async move {
            sleep(grace).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            // снимаем свой хэндл, чтобы destroy() не прервал эту задачу
            inner.grace.lock().take();
            let session = PeerSession { inner };
            if session.state() != SessionState::Connected {
                session.fail(PeerError::ConnectionLost).await;
            }
        }));
    }

    fn on_remote_track(&self, track: RemoteTrack) {
        debug!(session = %self.inner.id, track = %track.id, stream = %track.stream_id, "Remote track");
        let new_stream = {
            let mut streams = self.inner.remote_streams.lock();
            match streams.get(&track.stream_id) {
                Some(stream) => {
                    stream.push(track.clone());
                    None
                }
                None => {
                    let stream = RemoteStream::new(track.clone());
                    streams.insert(track.stream_id.clone(), stream.clone());
                    Some(stream)
                }
            }
        };
        if let Some(stream) = new_stream {
            self.emit(PeerEvent::Stream(stream));
        }
        self.emit(PeerEvent::Track(track));
    }
}

/// Разбирает колбэки платформы по одному, пока сессия жива
async fn drive(
    weak: Weak<Inner>,
    mut rx: UnboundedReceiver<PlatformEvent>,
    shutdown: Arc<Notify>,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.notified() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        let Some(inner) = weak.upgrade() else {
            break;
        };
        let session = PeerSession { inner };
        if session.is_destroyed() {
            break;
        }
        session.handle(event).await;
    }
    debug!("Platform event loop finished");
}
