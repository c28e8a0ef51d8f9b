use crate::media::LocalTrack;
use crate::peer::backend::SenderId;

/// Связь локального трека с sender'ом платформы
#[derive(Debug, Clone)]
pub struct TrackBinding {
    pub track: LocalTrack,
    /// Поток, под которым трек был добавлен
    pub stream_id: String,
    pub sender: SenderId,
}

/// Таблица привязок; владеет ей сессия, не приложение
#[derive(Debug, Default)]
pub struct TrackBindings {
    bindings: Vec<TrackBinding>,
}

impl TrackBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sender_of(&self, track: &LocalTrack) -> Option<SenderId> {
        self.bindings
            .iter()
            .find(|b| b.track.same_track(track))
            .map(|b| b.sender)
    }

    pub fn contains(&self, track: &LocalTrack) -> bool {
        self.sender_of(track).is_some()
    }

    pub fn bind(&mut self, track: LocalTrack, stream_id: &str, sender: SenderId) {
        self.bindings.push(TrackBinding {
            track,
            stream_id: stream_id.to_string(),
            sender,
        });
    }

    pub fn unbind(&mut self, track: &LocalTrack) -> Option<TrackBinding> {
        let idx = self.bindings.iter().position(|b| b.track.same_track(track))?;
        Some(self.bindings.remove(idx))
    }

    /// Подменяет трек в привязке, sender остаётся прежним
    pub fn rebind(&mut self, old: &LocalTrack, new: LocalTrack) -> Option<SenderId> {
        let binding = self.bindings.iter_mut().find(|b| b.track.same_track(old))?;
        binding.track = new;
        Some(binding.sender)
    }

    pub fn senders(&self) -> Vec<SenderId> {
        self.bindings.iter().map(|b| b.sender).collect()
    }

    pub fn tracks(&self) -> Vec<LocalTrack> {
        self.bindings.iter().map(|b| b.track.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }
}
