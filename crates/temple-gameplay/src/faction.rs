//! Combat factions and their matchup tables.
//!
//! The damage matrix is deliberately asymmetric: the player's Sith faction
//! dominates Jedi, while allied troopers cannot hurt the player (or the boss).

use serde::{Deserialize, Serialize};

/// Combat allegiance of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Faction {
    /// The player.
    Sith,
    /// Allied clone troopers.
    Imperial,
    /// Jedi defenders.
    Jedi,
    /// Temple guards.
    TempleGuard,
    /// Boss duelist.
    Boss,
}

impl Faction {
    /// All factions in table order.
    pub const ALL: [Faction; 5] = [
        Self::Sith,
        Self::Imperial,
        Self::Jedi,
        Self::TempleGuard,
        Self::Boss,
    ];

    const fn index(self) -> usize {
        match self {
            Self::Sith => 0,
            Self::Imperial => 1,
            Self::Jedi => 2,
            Self::TempleGuard => 3,
            Self::Boss => 4,
        }
    }

    /// Whether two factions fight on the same side.
    #[must_use]
    pub const fn is_allied_with(self, other: Faction) -> bool {
        matches!(
            (self, other),
            (Self::Sith | Self::Imperial, Self::Sith | Self::Imperial)
                | (
                    Self::Jedi | Self::TempleGuard | Self::Boss,
                    Self::Jedi | Self::TempleGuard | Self::Boss
                )
        )
    }

    /// Parry timing profile for defenders of this faction.
    #[must_use]
    pub const fn parry_profile(self) -> ParryProfile {
        match self {
            Self::Sith => ParryProfile::new(0.0, 200.0, 2.0, 500.0, 800.0),
            Self::Imperial => ParryProfile::new(0.0, 80.0, 1.2, 1000.0, 400.0),
            Self::Jedi => ParryProfile::new(0.0, 150.0, 1.5, 800.0, 600.0),
            Self::TempleGuard => ParryProfile::new(0.0, 120.0, 1.4, 900.0, 500.0),
            Self::Boss => ParryProfile::new(0.0, 100.0, 1.2, 1200.0, 500.0),
        }
    }

    /// Multiplier applied to knockback this faction deals.
    #[must_use]
    pub const fn knockback_dealt(self) -> f32 {
        match self {
            Self::Sith => 1.5,
            Self::Imperial => 0.8,
            Self::Jedi => 1.0,
            Self::TempleGuard => 1.2,
            Self::Boss => 1.3,
        }
    }

    /// Multiplier applied to knockback this faction receives.
    #[must_use]
    pub const fn knockback_taken(self) -> f32 {
        match self {
            Self::Sith => 0.3,
            Self::Imperial => 1.2,
            Self::Jedi => 1.0,
            Self::TempleGuard => 0.7,
            Self::Boss => 0.5,
        }
    }
}

// Rows: attacker, columns: defender (Sith, Imperial, Jedi, TempleGuard, Boss).
const FACTION_DAMAGE: [[f32; 5]; 5] = [
    [1.0, 0.8, 2.0, 1.5, 1.2],
    [0.0, 1.0, 0.5, 0.4, 0.0],
    [0.7, 1.5, 1.0, 1.0, 1.0],
    [0.8, 1.5, 1.0, 1.0, 1.0],
    [1.0, 2.0, 1.0, 1.0, 1.0],
];

/// Damage multiplier for an attacker / defender faction pairing.
#[must_use]
pub const fn faction_multiplier(attacker: Faction, defender: Faction) -> f32 {
    FACTION_DAMAGE[attacker.index()][defender.index()]
}

/// Faction-specific parry timing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParryProfile {
    /// Parry window opens this long after the block starts (ms).
    pub window_start_ms: f32,
    /// Width of the parry window (ms).
    pub window_ms: f32,
    /// Damage multiplier for a counter inside the counter window.
    pub counter_multiplier: f32,
    /// Minimum time between parries (ms).
    pub cooldown_ms: f32,
    /// How long the post-parry counter opportunity lasts (ms).
    pub counter_window_ms: f32,
}

impl ParryProfile {
    /// Creates a profile.
    #[must_use]
    pub const fn new(
        window_start_ms: f32,
        window_ms: f32,
        counter_multiplier: f32,
        cooldown_ms: f32,
        counter_window_ms: f32,
    ) -> Self {
        Self {
            window_start_ms,
            window_ms,
            counter_multiplier,
            cooldown_ms,
            counter_window_ms,
        }
    }

    /// Whether a block held for `block_duration_ms` is inside the window (inclusive).
    #[must_use]
    pub fn in_window(&self, block_duration_ms: f32) -> bool {
        block_duration_ms >= self.window_start_ms
            && block_duration_ms <= self.window_start_ms + self.window_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_asymmetry_preserved() {
        assert_eq!(faction_multiplier(Faction::Sith, Faction::Jedi), 2.0);
        assert_eq!(faction_multiplier(Faction::Sith, Faction::TempleGuard), 1.5);
        assert_eq!(faction_multiplier(Faction::Sith, Faction::Imperial), 0.8);
        assert_eq!(faction_multiplier(Faction::Imperial, Faction::Sith), 0.0);
        assert_eq!(faction_multiplier(Faction::Imperial, Faction::Boss), 0.0);
        assert!(faction_multiplier(Faction::Jedi, Faction::Sith) < 1.0);
    }

    #[test]
    fn test_every_window_opens_at_block_start() {
        for faction in Faction::ALL {
            let profile = faction.parry_profile();
            assert!(profile.in_window(0.0), "{faction:?}");
            assert!(!profile.in_window(profile.window_ms + 1.0));
        }
        assert_eq!(Faction::Sith.parry_profile().counter_multiplier, 2.0);
        assert_eq!(Faction::Boss.parry_profile().window_ms, 100.0);
    }

    #[test]
    fn test_alliances() {
        assert!(Faction::Sith.is_allied_with(Faction::Imperial));
        assert!(Faction::Jedi.is_allied_with(Faction::Boss));
        assert!(!Faction::Imperial.is_allied_with(Faction::TempleGuard));
    }
}
