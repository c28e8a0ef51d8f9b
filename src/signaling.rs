//! Доставка сигналинга между сторонами.
//!
//! Транспорт приложения (WebSocket, QR, что угодно) реализует
//! `SignalingTransport`. Сессия о нём не знает: исходящие нагрузки берутся
//! из событий `Signal`, входящие передаются в `PeerSession::signal`.

use crate::error::{PeerError, Result};
use crate::events::{EventStream, PeerEvent};
use crate::peer::connection::PeerSession;
use crate::peer::types::SignalPayload;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[async_trait]
pub trait SignalingTransport: Send + Sync {
    async fn send(&self, payload: SignalPayload) -> Result<()>;
}

/// Отправляет каждое `Signal` событие в транспорт и пропускает все
/// события дальше, в возвращённый поток. Завершается после `Close`.
pub fn forward_signals(
    mut events: EventStream,
    transport: Arc<dyn SignalingTransport>,
) -> EventStream {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let PeerEvent::Signal(payload) = &event {
                debug!("Forwarding {} to signaling transport", payload.kind());
                if let Err(e) = transport.send(payload.clone()).await {
                    warn!("Signaling transport failed: {}", e);
                    let _ = tx.send(PeerEvent::Error(e));
                }
            }
            let last = matches!(event, PeerEvent::Close);
            // приложение могло бросить поток, сигналинг при этом продолжаем
            let _ = tx.send(event);
            if last {
                break;
            }
        }
    });
    rx
}

/// Передаёт входящие нагрузки в сессию, пока та жива
pub fn feed_signals(
    session: PeerSession,
    mut inbound: UnboundedReceiver<SignalPayload>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(payload) = inbound.recv().await {
            if session.is_destroyed() {
                break;
            }
            session.signal(payload).await;
        }
        debug!(session = %session.id(), "Inbound signaling finished");
    })
}

/// Транспорт внутри процесса. Нагрузка проходит через JSON, как по сети.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: UnboundedSender<SignalPayload>,
}

impl ChannelTransport {
    pub fn new(tx: UnboundedSender<SignalPayload>) -> Self {
        Self { tx }
    }

    /// Два связанных конца: отправленное одним приходит в receiver другого
    pub fn pair() -> (
        (ChannelTransport, UnboundedReceiver<SignalPayload>),
        (ChannelTransport, UnboundedReceiver<SignalPayload>),
    ) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        ((ChannelTransport::new(b_tx), a_rx), (ChannelTransport::new(a_tx), b_rx))
    }
}

#[async_trait]
impl SignalingTransport for ChannelTransport {
    async fn send(&self, payload: SignalPayload) -> Result<()> {
        let wire = payload.to_json()?;
        let payload = SignalPayload::from_json(&wire)?;
        self.tx
            .send(payload)
            .map_err(|_| PeerError::Signaling("remote side is gone".into()))
    }
}
