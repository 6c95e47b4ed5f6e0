//! Channel Configuration
//!
//! Signing-domain binding plus the constants the arbiter contract exposes
//! (challenge period, response period, move cap, win threshold).

use thiserror::Error;

use crate::core::address::Address;
use crate::game::board::TOTAL_SHIP_CELLS;
use crate::network::signing::SigningDomain;

/// Default challenge period in arbiter time units.
pub const DEFAULT_CHALLENGE_PERIOD: u64 = 300;

/// Default response period in arbiter time units.
pub const DEFAULT_RESPONSE_PERIOD: u64 = 300;

/// Default cap on resolved moves per game.
pub const DEFAULT_MAX_MOVES: u32 = 200;

/// Configuration shared by both replicas of a channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Typed-data domain every state signature is bound to.
    pub domain: SigningDomain,
    /// Window after a dispute opens during which it may be challenged.
    pub challenge_period: u64,
    /// Window the respondent has to submit a counter-state.
    pub response_period: u64,
    /// Maximum resolved moves before the arbiter refuses further play.
    pub max_moves: u32,
    /// Hits needed to win.
    pub win_threshold: u8,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            domain: SigningDomain::default(),
            challenge_period: DEFAULT_CHALLENGE_PERIOD,
            response_period: DEFAULT_RESPONSE_PERIOD,
            max_moves: DEFAULT_MAX_MOVES,
            win_threshold: TOTAL_SHIP_CELLS,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
    },

    /// Win threshold disagrees with the fleet's total cell count.
    #[error("win threshold {threshold} does not match fleet total of {fleet_cells} cells")]
    ThresholdMismatch {
        /// Configured threshold.
        threshold: u8,
        /// Sum of fleet lengths.
        fleet_cells: u8,
    },

    /// A period or cap is zero.
    #[error("{field} must be non-zero")]
    Zero {
        /// Offending field.
        field: &'static str,
    },
}

impl ChannelConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let domain = SigningDomain {
            name: std::env::var("CHANNEL_DOMAIN_NAME").unwrap_or(defaults.domain.name),
            version: std::env::var("CHANNEL_DOMAIN_VERSION").unwrap_or(defaults.domain.version),
            chain_id: env_parse("CHANNEL_CHAIN_ID", defaults.domain.chain_id)?,
            verifying_contract: match std::env::var("CHANNEL_CONTRACT") {
                Ok(raw) => raw.parse::<Address>().map_err(|_| ConfigError::InvalidValue {
                    var: "CHANNEL_CONTRACT",
                    value: raw,
                })?,
                Err(_) => defaults.domain.verifying_contract,
            },
        };

        let config = Self {
            domain,
            challenge_period: env_parse("CHANNEL_CHALLENGE_PERIOD", defaults.challenge_period)?,
            response_period: env_parse("CHANNEL_RESPONSE_PERIOD", defaults.response_period)?,
            max_moves: env_parse("CHANNEL_MAX_MOVES", defaults.max_moves)?,
            win_threshold: env_parse("CHANNEL_WIN_THRESHOLD", defaults.win_threshold)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency.
    ///
    /// A threshold other than the fleet total (e.g. 17, the classic
    /// five-ship fleet) is reported rather than silently accepted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.win_threshold != TOTAL_SHIP_CELLS {
            return Err(ConfigError::ThresholdMismatch {
                threshold: self.win_threshold,
                fleet_cells: TOTAL_SHIP_CELLS,
            });
        }
        if self.response_period == 0 {
            return Err(ConfigError::Zero { field: "response_period" });
        }
        if self.challenge_period == 0 {
            return Err(ConfigError::Zero { field: "challenge_period" });
        }
        if self.max_moves == 0 {
            return Err(ConfigError::Zero { field: "max_moves" });
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value: raw }),
        Err(_) => Ok(default),
    }
}
