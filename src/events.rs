//! Шина событий сессии.
//!
//! Минимальный publish/subscribe: каждый подписчик получает свой
//! неограниченный канал, публикация никогда не блокирует.

use crate::error::PeerError;
use crate::media::{RemoteStream, RemoteTrack};
use crate::peer::data_channel::DataMessage;
use crate::peer::state::SessionState;
use crate::peer::types::SignalPayload;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// События, на которые программирует UI
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// Исходящая нагрузка сигналинга: приложение доставляет её другой стороне
    Signal(SignalPayload),
    /// Транспорт подключён и data channel открыт
    Connect,
    /// Новый удалённый поток (один раз на stream id)
    Stream(RemoteStream),
    /// Каждый удалённый трек
    Track(RemoteTrack),
    /// Декодированное сообщение data channel
    Data(DataMessage),
    State(SessionState),
    /// Нефатальная или предшествующая `Close` ошибка
    Error(PeerError),
    /// Терминальное событие, ровно одно за жизнь сессии
    Close,
}

impl PeerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PeerEvent::Signal(_) => "signal",
            PeerEvent::Connect => "connect",
            PeerEvent::Stream(_) => "stream",
            PeerEvent::Track(_) => "track",
            PeerEvent::Data(_) => "data",
            PeerEvent::State(_) => "state",
            PeerEvent::Error(_) => "error",
            PeerEvent::Close => "close",
        }
    }
}

pub type EventStream<E = PeerEvent> = UnboundedReceiver<E>;

pub struct EventBus<E: Clone> {
    subscribers: Mutex<Option<Vec<UnboundedSender<E>>>>,
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Some(Vec::new())),
        }
    }

    /// Подписка после `close()` сразу получает закрытый канал
    pub fn subscribe(&self) -> EventStream<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(subs) = self.subscribers.lock().as_mut() {
            subs.push(tx);
        }
        rx
    }

    /// Рассылает событие всем живым подписчикам, отвалившихся удаляет.
    /// Возвращает число получателей.
    pub fn emit(&self, event: E) -> usize {
        let mut guard = self.subscribers.lock();
        let Some(subs) = guard.as_mut() else {
            return 0;
        };
        subs.retain(|tx| tx.send(event.clone()).is_ok());
        subs.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().as_ref().map_or(0, Vec::len)
    }

    /// Отпускает всех подписчиков: их каналы завершатся после
    /// уже отправленных событий
    pub fn close(&self) {
        self.subscribers.lock().take();
    }

    /// Последнее событие и закрытие под одной блокировкой:
    /// после него ничего не доставляется
    pub fn finish(&self, event: E) -> usize {
        let Some(subs) = self.subscribers.lock().take() else {
            return 0;
        };
        subs.iter().filter(|tx| tx.send(event.clone()).is_ok()).count()
    }

    pub fn is_closed(&self) -> bool {
        self.subscribers.lock().is_none()
    }
}
