//! Position-reliability state of a linear stage.
//!
//! The controller only knows where the carriage is while the motor is powered
//! and every motion went through a counted move. Jogging (free run until a
//! stop) or releasing the motor breaks that knowledge:
//!
//! ```text
//!            jog                      sync (powered)
//!   Homed ──────────► Dirty{false} ─────────────────► Homed
//!   Ranged ─────────► Dirty{true}  ─────────────────► Ranged
//!   any   ── release ──► PermanentlyDirty ── home ──► Homed
//!   any   ── find range ──► Ranged
//! ```
//!
//! `PermanentlyDirty` can only be left by homing (or a fresh range-finding,
//! which ends at a synced end stop). A released motor may also have been pushed
//! past the old limits, so homing from there drops the ranged status.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    /// Position is trusted; travel limits are the controller defaults.
    Homed,
    /// Position is trusted and the travel range has been measured.
    Ranged,
    /// Position went stale after a jog; a powered sync recovers it.
    Dirty { was_ranged: bool },
    /// Position is lost until the stage is homed.
    PermanentlyDirty,
}

impl PositionState {
    pub fn after_jog(self) -> Self {
        match self {
            PositionState::Homed => PositionState::Dirty { was_ranged: false },
            PositionState::Ranged => PositionState::Dirty { was_ranged: true },
            other => other,
        }
    }

    /// Position re-read from the controller. Only clears dirtiness while powered.
    pub fn after_sync(self, powered: bool) -> Self {
        match self {
            PositionState::Dirty { was_ranged } if powered => {
                if was_ranged {
                    PositionState::Ranged
                } else {
                    PositionState::Homed
                }
            }
            other => other,
        }
    }

    pub fn after_home(self) -> Self {
        match self {
            PositionState::Ranged | PositionState::Dirty { was_ranged: true } => PositionState::Ranged,
            _ => PositionState::Homed,
        }
    }

    pub fn after_range(self) -> Self {
        PositionState::Ranged
    }

    pub fn after_release(self) -> Self {
        PositionState::PermanentlyDirty
    }

    pub fn is_reliable(self) -> bool {
        matches!(self, PositionState::Homed | PositionState::Ranged)
    }

    pub fn is_ranged(self) -> bool {
        matches!(self, PositionState::Ranged | PositionState::Dirty { was_ranged: true })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jog_then_powered_sync_restores_previous_state() {
        let s = PositionState::Ranged.after_jog();
        assert_eq!(s, PositionState::Dirty { was_ranged: true });
        assert!(!s.is_reliable());
        assert!(s.is_ranged());
        assert_eq!(s.after_sync(true), PositionState::Ranged);

        let s = PositionState::Homed.after_jog();
        assert_eq!(s.after_sync(true), PositionState::Homed);
    }

    #[test]
    fn unpowered_sync_leaves_dirty_state() {
        let s = PositionState::Homed.after_jog();
        assert_eq!(s.after_sync(false), s);
    }

    #[test]
    fn release_is_only_cleared_by_home_or_range() {
        let s = PositionState::Ranged.after_release();
        assert_eq!(s.after_jog(), PositionState::PermanentlyDirty);
        assert_eq!(s.after_sync(true), PositionState::PermanentlyDirty);
        assert!(!s.is_ranged());
        assert_eq!(s.after_home(), PositionState::Homed);
        assert_eq!(s.after_range(), PositionState::Ranged);
    }

    #[test]
    fn homing_keeps_a_measured_range() {
        assert_eq!(PositionState::Dirty { was_ranged: true }.after_home(), PositionState::Ranged);
        assert_eq!(PositionState::Homed.after_home(), PositionState::Homed);
    }
}
