use crate::config::{Environment, PeerConfig};
use crate::peer::types::{IceCandidate, ServerConfig};
use crate::utils::add_ice_url_scheme;
use once_cell::sync::Lazy;
use std::collections::HashSet;
use tracing::{debug, warn};
use webrtc::ice_transport::ice_server::RTCIceServer;

/// Избыточный набор публичных STUN серверов для продакшена
static PRODUCTION_STUN: Lazy<Vec<ServerConfig>> = Lazy::new(|| {
    (0..5)
        .map(|i| {
            let host = if i == 0 {
                "stun.l.google.com".to_string()
            } else {
                format!("stun{i}.l.google.com")
            };
            ServerConfig::stun(&format!("google-stun-{i}"), &format!("stun:{host}:19302"))
        })
        .collect()
});

/// В разработке хватает одного STUN сервера
static DEVELOPMENT_STUN: Lazy<Vec<ServerConfig>> =
    Lazy::new(|| vec![ServerConfig::stun("default-stun", "stun:stun.l.google.com:19302")]);

/// Список ICE серверов по окружению. TURN здесь нет: для строгих NAT
/// оператор передаёт свой сервер через `PeerConfig::turn`.
pub fn get_ice_servers(environment: Environment) -> Vec<ServerConfig> {
    match environment {
        Environment::Production => PRODUCTION_STUN.clone(),
        Environment::Development => DEVELOPMENT_STUN.clone(),
    }
}

/// Итоговый список для сессии: пользовательские серверы заменяют
/// список по окружению, TURN оператора добавляется в конец
pub fn resolve_ice_servers(config: &PeerConfig) -> Vec<ServerConfig> {
    let mut servers = config
        .ice_servers
        .clone()
        .unwrap_or_else(|| get_ice_servers(config.environment));
    if let Some(turn) = &config.turn {
        servers.push(turn.clone());
    }
    servers
}

/// Перевод в конфигурацию webrtc-rs
pub fn to_rtc_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

/// Удалённые кандидаты: дедупликация и очередь до установки remote description
#[derive(Debug, Default)]
pub struct CandidateQueue {
    seen: HashSet<IceCandidate>,
    pending: Vec<IceCandidate>,
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// `false`, если такой кандидат уже приходил
    pub fn admit(&mut self, candidate: &IceCandidate) -> bool {
        self.seen.insert(candidate.clone())
    }

    pub fn defer(&mut self, candidate: IceCandidate) {
        debug!("Remote description not set yet, queuing candidate");
        self.pending.push(candidate);
    }

    pub fn drain(&mut self) -> Vec<IceCandidate> {
        self.pending.drain(..).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
        self.pending.clear();
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateStats {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
    pub other: usize,
}

pub fn analyze_candidates(candidates: &[IceCandidate]) -> CandidateStats {
    let mut stats = CandidateStats::default();
    for candidate in candidates {
        match candidate.candidate_type() {
            Some("host") => stats.host += 1,
            Some("srflx") => stats.srflx += 1,
            Some("relay") => stats.relay += 1,
            _ => stats.other += 1,
        }
    }

    debug!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        stats.host, stats.srflx, stats.relay
    );
    if stats.relay == 0 && !candidates.is_empty() {
        warn!("No TURN relay candidates found! Connection through strict NAT may fail.");
    }
    stats
}
