use serde::Serialize;

/// Публичное состояние сессии
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    New,
    Negotiating,
    Connected,
    Disconnected,
    Closed,
}

impl SessionState {
    /// Допустимые переходы; `Closed` достижим из любого состояния
    pub fn can_transition(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (New, Negotiating) => true,
            (Negotiating, Connected) => true,
            (Connected, Disconnected) => true,
            (Disconnected, Connected) => true,
            // ренеготиация поверх живого соединения не меняет состояние
            _ => false,
        }
    }
}

/// Под-состояние обмена offer/answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiation {
    Stable,
    /// Offer создаётся прямо сейчас
    MakingOffer,
    HaveLocalOffer,
    HaveRemoteOffer,
}

/// Что делать со встречным offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferDecision {
    /// Коллизии нет
    Accept,
    /// Коллизия, мы вежливые: откатываем свой offer
    RollbackAndAccept,
    /// Коллизия, мы невежливые: наш offer побеждает
    Ignore,
}

/// Perfect negotiation в виде явной машины состояний
#[derive(Debug, Clone)]
pub struct NegotiationState {
    polite: bool,
    phase: Negotiation,
    /// Последний встречный offer проигнорирован (глушим ошибки его кандидатов)
    ignore_offer: bool,
    /// Хотя бы один обмен завершён
    established: bool,
    remote_applied: bool,
}

impl NegotiationState {
    pub fn new(polite: bool) -> Self {
        Self {
            polite,
            phase: Negotiation::Stable,
            ignore_offer: false,
            established: false,
            remote_applied: false,
        }
    }

    pub fn phase(&self) -> Negotiation {
        self.phase
    }

    pub fn is_polite(&self) -> bool {
        self.polite
    }

    pub fn is_established(&self) -> bool {
        self.established
    }

    pub fn ignoring_offer(&self) -> bool {
        self.ignore_offer
    }

    pub fn has_remote_description(&self) -> bool {
        self.remote_applied
    }

    /// Начать свой offer можно только из стабильного состояния
    pub fn begin_offer(&mut self) -> bool {
        if self.phase != Negotiation::Stable {
            return false;
        }
        self.phase = Negotiation::MakingOffer;
        true
    }

    pub fn offer_sent(&mut self) {
        if self.phase == Negotiation::MakingOffer {
            self.phase = Negotiation::HaveLocalOffer;
        }
    }

    /// Создание offer сорвалось
    pub fn offer_failed(&mut self) {
        if self.phase == Negotiation::MakingOffer {
            self.phase = Negotiation::Stable;
        }
    }

    pub fn collides(&self) -> bool {
        matches!(
            self.phase,
            Negotiation::MakingOffer | Negotiation::HaveLocalOffer
        )
    }

    pub fn on_remote_offer(&mut self) -> OfferDecision {
        let collision = self.collides();
        self.ignore_offer = collision && !self.polite;
        match (collision, self.polite) {
            (false, _) => OfferDecision::Accept,
            (true, true) => OfferDecision::RollbackAndAccept,
            (true, false) => OfferDecision::Ignore,
        }
    }

    pub fn local_offer_rolled_back(&mut self) {
        if self.phase == Negotiation::HaveLocalOffer {
            self.phase = Negotiation::Stable;
        }
    }

    pub fn remote_offer_applied(&mut self) {
        self.phase = Negotiation::HaveRemoteOffer;
        self.remote_applied = true;
    }

    pub fn answer_sent(&mut self) {
        if self.phase == Negotiation::HaveRemoteOffer {
            self.phase = Negotiation::Stable;
            self.established = true;
        }
    }

    /// Answer принимается только пока мы ждём его
    pub fn accepts_answer(&self) -> bool {
        self.phase == Negotiation::HaveLocalOffer
    }

    pub fn remote_answer_applied(&mut self) {
        self.phase = Negotiation::Stable;
        self.remote_applied = true;
        self.established = true;
        self.ignore_offer = false;
    }

    /// Применение remote description сорвалось: возвращаемся к стабильному
    /// состоянию, если это был встречный offer
    pub fn remote_failed(&mut self) {
        if self.phase == Negotiation::HaveRemoteOffer {
            self.phase = Negotiation::Stable;
        }
    }
}
