//! Per-entity combat profile.

use serde::{Deserialize, Serialize};

use crate::faction::Faction;

/// Stagger meter cap; reaching it breaks the entity's posture.
pub const STAGGER_MAX: f32 = 100.0;

/// How an entity is currently defending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DefenseType {
    /// Open to hits.
    #[default]
    None,
    /// Guard raised.
    Block,
    /// Inside a parry / counter window.
    Parry,
    /// Evading.
    Dodge,
    /// Force barrier up.
    ForceBarrier,
}

impl DefenseType {
    pub(crate) const fn index(self) -> usize {
        match self {
            Self::None => 0,
            Self::Block => 1,
            Self::Parry => 2,
            Self::Dodge => 3,
            Self::ForceBarrier => 4,
        }
    }
}

/// Numeric combat profile of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombatStats {
    /// Allegiance
    pub faction: Faction,
    /// Current health (never below 0)
    pub health: f32,
    /// Maximum health
    pub max_health: f32,
    /// Outgoing damage multiplier
    pub attack_power: f32,
    /// Incoming damage divisor
    pub defense: f32,
    /// Probability of a critical hit (0..1)
    pub crit_chance: f32,
    /// Critical damage multiplier (>= 1)
    pub crit_multiplier: f32,
    /// Current defense mode
    pub defense_type: DefenseType,
    /// Stagger meter (0..100)
    pub stagger: f32,
}

impl Default for CombatStats {
    fn default() -> Self {
        Self {
            faction: Faction::Jedi,
            health: 100.0,
            max_health: 100.0,
            attack_power: 1.0,
            defense: 1.0,
            crit_chance: 0.0,
            crit_multiplier: 1.5,
            defense_type: DefenseType::None,
            stagger: 0.0,
        }
    }
}

impl CombatStats {
    /// Baseline stats for a faction archetype.
    #[must_use]
    pub fn for_faction(faction: Faction) -> Self {
        let base = Self {
            faction,
            ..Self::default()
        };
        match faction {
            Faction::Sith => base
                .with_health(500.0)
                .with_attack_power(1.5)
                .with_defense(1.5)
                .with_crit(0.15, 2.0),
            Faction::Imperial => base.with_health(80.0).with_attack_power(0.8),
            Faction::Jedi => base
                .with_health(150.0)
                .with_defense(1.1)
                .with_crit(0.05, 1.5),
            Faction::TempleGuard => base
                .with_health(200.0)
                .with_attack_power(1.1)
                .with_defense(1.3),
            Faction::Boss => base
                .with_health(3000.0)
                .with_attack_power(1.3)
                .with_defense(1.2)
                .with_crit(0.1, 1.75),
        }
    }

    /// Sets max and current health (builder pattern).
    #[must_use]
    pub fn with_health(mut self, health: f32) -> Self {
        self.max_health = health.max(1.0);
        self.health = self.max_health;
        self
    }

    /// Sets attack power (builder pattern).
    #[must_use]
    pub fn with_attack_power(mut self, attack_power: f32) -> Self {
        self.attack_power = attack_power.max(0.0);
        self
    }

    /// Sets defense (builder pattern). Clamped away from zero.
    #[must_use]
    pub fn with_defense(mut self, defense: f32) -> Self {
        self.defense = defense.max(0.01);
        self
    }

    /// Sets crit chance and multiplier (builder pattern).
    #[must_use]
    pub fn with_crit(mut self, chance: f32, multiplier: f32) -> Self {
        self.crit_chance = chance.clamp(0.0, 1.0);
        self.crit_multiplier = multiplier.max(1.0);
        self
    }

    /// Whether health has reached zero.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.health <= 0.0
    }

    /// Health as a fraction of max (0..1).
    #[must_use]
    pub fn health_fraction(&self) -> f32 {
        if self.max_health > 0.0 {
            (self.health / self.max_health).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Subtracts damage, clamping at zero. Returns the damage actually applied.
    pub fn apply_damage(&mut self, amount: f32) -> f32 {
        let before = self.health;
        self.health = (self.health - amount.max(0.0)).max(0.0);
        before - self.health
    }

    /// Restores health up to max.
    pub fn heal(&mut self, amount: f32) {
        self.health = (self.health + amount.max(0.0)).min(self.max_health);
    }

    /// Adds stagger. Returns true when the meter filled (it resets to 0).
    pub fn add_stagger(&mut self, amount: f32) -> bool {
        self.stagger += amount.max(0.0);
        if self.stagger >= STAGGER_MAX {
            self.stagger = 0.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_clamps_at_zero() {
        let mut stats = CombatStats::for_faction(Faction::Imperial);
        let applied = stats.apply_damage(1000.0);
        assert_eq!(applied, 80.0);
        assert_eq!(stats.health, 0.0);
        assert!(stats.is_dead());
    }

    #[test]
    fn test_stagger_break_resets() {
        let mut stats = CombatStats::default();
        assert!(!stats.add_stagger(60.0));
        assert!(stats.add_stagger(45.0));
        assert_eq!(stats.stagger, 0.0);
    }

    #[test]
    fn test_faction_baselines() {
        assert_eq!(CombatStats::for_faction(Faction::Boss).max_health, 3000.0);
        let jedi = CombatStats::for_faction(Faction::Jedi);
        assert_eq!(jedi.faction, Faction::Jedi);
        assert_eq!(jedi.defense_type, DefenseType::None);
        assert_eq!(jedi.health_fraction(), 1.0);
    }
}
