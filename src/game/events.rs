//! Channel Events
//!
//! Notifications queued by the channel as it changes. The caller drains
//! them with `Channel::take_events` after each call, so "state changed"
//! always happens before "caller observes it".

use serde::{Serialize, Deserialize};

use crate::core::address::Address;
use crate::core::hash::{hex_hash, StateHash};
use crate::dispute::DisputeType;

/// Something that happened to a channel replica.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelEvent {
    /// Genesis state created.
    GameCreated {
        /// Game identifier.
        game_id: String,
        /// Player to move first.
        first_turn: Address,
        /// Genesis digest.
        #[serde(with = "hex_hash")]
        state_hash: StateHash,
    },

    /// A move was scored.
    MoveApplied {
        /// Nonce after the move.
        nonce: u64,
        /// Player who guessed.
        attacker: Address,
        /// Column.
        x: u8,
        /// Row.
        y: u8,
        /// Result.
        is_hit: bool,
    },

    /// The turn passed to another player.
    TurnSwitched {
        /// Nonce after the switch.
        nonce: u64,
        /// Player now to move.
        current_turn: Address,
    },

    /// A winner was fixed.
    GameEnded {
        /// Winning player.
        winner: Address,
        /// Final nonce.
        nonce: u64,
    },

    /// Local state was replaced by a higher-nonce peer state.
    StateSynchronized {
        /// Nonce before.
        from_nonce: u64,
        /// Nonce after.
        to_nonce: u64,
    },

    /// Cooperation broke down; escalate to the arbiter.
    DisputeRequired {
        /// Suggested dispute kind.
        dispute_type: DisputeType,
        /// What happened.
        reason: String,
    },
}

impl ChannelEvent {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelEvent::GameCreated { .. } => "game_created",
            ChannelEvent::MoveApplied { .. } => "move_applied",
            ChannelEvent::TurnSwitched { .. } => "turn_switched",
            ChannelEvent::GameEnded { .. } => "game_ended",
            ChannelEvent::StateSynchronized { .. } => "state_synchronized",
            ChannelEvent::DisputeRequired { .. } => "dispute_required",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_tag() {
        let event = ChannelEvent::TurnSwitched { nonce: 3, current_turn: Address::new([1; 20]) };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "turn_switched");
        assert_eq!(event.kind(), "turn_switched");
    }
}
