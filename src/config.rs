// Конфигурация сессии
// Конфигурация передаётся явно при создании сессии, глобального состояния нет

use crate::error::{PeerError, Result};
use crate::peer::types::ServerConfig;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // В режиме отладки подробное логирование

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // В продакшене только info и выше

/// Период ожидания перед признанием соединения потерянным
pub const GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Метка data channel по умолчанию
pub const DEFAULT_CHANNEL_LABEL: &str = "peerlink";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Development,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

impl Default for Environment {
    #[cfg(debug_assertions)]
    fn default() -> Self {
        Environment::Development
    }

    #[cfg(not(debug_assertions))]
    fn default() -> Self {
        Environment::Production
    }
}

impl FromStr for Environment {
    type Err = PeerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "development" | "dev" => Ok(Environment::Development),
            other => Err(PeerError::Config(format!("unknown environment '{other}'"))),
        }
    }
}

/// Настройки peer-сессии
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PeerConfig {
    pub environment: Environment,
    /// Полная замена списка ICE серверов (пользовательские серверы)
    pub ice_servers: Option<Vec<ServerConfig>>,
    /// TURN сервер оператора, добавляется к списку по окружению
    pub turn: Option<ServerConfig>,
    pub ice_candidate_pool_size: u8,
    pub channel_label: String,
    #[serde(with = "grace_secs")]
    pub disconnect_grace: Duration,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            ice_servers: None,
            turn: None,
            ice_candidate_pool_size: 0,
            channel_label: DEFAULT_CHANNEL_LABEL.to_string(),
            disconnect_grace: GRACE_PERIOD,
        }
    }
}

impl PeerConfig {
    pub fn for_environment(environment: Environment) -> Self {
        Self {
            environment,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel_label.is_empty() {
            return Err(PeerError::Config("channel label cannot be empty".into()));
        }
        if let Some(servers) = &self.ice_servers {
            if servers.is_empty() {
                return Err(PeerError::Config("custom ICE server list is empty".into()));
            }
            for server in servers {
                server.validate()?;
            }
        }
        if let Some(turn) = &self.turn {
            turn.validate()?;
        }
        Ok(())
    }
}

mod grace_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
