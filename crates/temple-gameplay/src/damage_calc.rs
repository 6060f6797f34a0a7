//! Damage calculation.
//!
//! This module provides:
//! - The faction- and defense-aware damage formula
//! - Combo scaling
//! - Stagger (posture) damage
//! - Crit rolls drawn from the simulation RNG
//!
//! [`calculate_damage`] is pure: given the same crit roll it always returns
//! the same [`DamageResult`].

use serde::{Deserialize, Serialize};
use temple_common::SimRng;

use crate::attack_data::{AttackData, AttackType};
use crate::combat_stats::{CombatStats, DefenseType};
use crate::faction::{faction_multiplier, Faction};

/// Damage category shown by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DamageKind {
    /// Plain hit
    Normal,
    /// Critical hit
    Critical,
    /// Blocked or parried
    Blocked,
    /// Force power
    Force,
}

// Rows: attack type, columns: defense type (None, Block, Parry, Dodge, ForceBarrier).
const ATTACK_VS_DEFENSE: [[f32; 5]; 4] = [
    [1.0, 0.2, 0.0, 0.0, 0.5],
    [1.0, 0.5, 0.3, 0.0, 0.6],
    [1.0, 0.6, 0.4, 0.5, 0.7],
    [1.0, 0.8, 0.8, 0.5, 0.3],
];

/// Damage multiplier per zero-based combo hit.
pub const COMBO_SCALING: [f32; 11] = [
    1.0, 0.95, 0.9, 0.85, 0.8, 0.75, 0.7, 0.65, 0.6, 0.55, 0.5,
];

/// Fraction of an attack that still lands against a defense.
#[must_use]
pub const fn attack_vs_defense(attack_type: AttackType, defense: DefenseType) -> f32 {
    ATTACK_VS_DEFENSE[attack_type.index()][defense.index()]
}

/// Scaling for the `combo_count`-th hit (zero-based), floored at 0.5.
#[must_use]
pub fn combo_scaling(combo_count: u32) -> f32 {
    let last = COMBO_SCALING.len() - 1;
    let index = usize::try_from(combo_count).map_or(last, |n| n.min(last));
    COMBO_SCALING[index]
}

/// Outcome of one damage calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamageResult {
    /// Final damage after every modifier
    pub damage: f32,
    /// Damage after charge, power and crit, before matchup and defense
    pub raw_damage: f32,
    /// Crit landed
    pub is_critical: bool,
    /// Defender was blocking
    pub was_blocked: bool,
    /// Defender parried
    pub was_parried: bool,
    /// Knockback magnitude
    pub knockback: f32,
    /// Hitstun (ms)
    pub hitstun_ms: f32,
    /// UI category
    pub kind: DamageKind,
}

/// Resolves one hit.
///
/// `crit_roll` is a uniform draw in `[0, 1)`; the hit is critical when it is
/// below the attacker's crit chance.
#[must_use]
pub fn calculate_damage(
    attack: &AttackData,
    attacker: &CombatStats,
    defender: &CombatStats,
    combo_count: u32,
    charge_multiplier: f32,
    crit_roll: f32,
) -> DamageResult {
    let mut raw = attack.damage * charge_multiplier * attacker.attack_power;

    let is_critical = crit_roll < attacker.crit_chance;
    if is_critical {
        raw *= attacker.crit_multiplier;
    }
    let raw_damage = raw;

    raw *= faction_multiplier(attacker.faction, defender.faction);

    raw *= attack_vs_defense(attack.attack_type, defender.defense_type);
    let was_blocked = defender.defense_type == DefenseType::Block;
    let was_parried = defender.defense_type == DefenseType::Parry;

    if defender.defense > 0.0 {
        raw /= defender.defense;
    }

    raw *= combo_scaling(combo_count);

    let (knockback, hitstun_ms) = if was_parried {
        (0.0, 0.0)
    } else if was_blocked {
        (attack.knockback * 0.3, attack.hitstun_ms * 0.5)
    } else {
        (attack.knockback, attack.hitstun_ms)
    };

    let kind = if was_blocked || was_parried {
        DamageKind::Blocked
    } else if attack.attack_type == AttackType::ForcePower {
        DamageKind::Force
    } else if is_critical {
        DamageKind::Critical
    } else {
        DamageKind::Normal
    };

    let floor = if was_parried { 0.0 } else { 1.0 };
    DamageResult {
        damage: raw.round().max(floor),
        raw_damage,
        is_critical,
        was_blocked,
        was_parried,
        knockback,
        hitstun_ms,
        kind,
    }
}

/// Draws a crit roll from the simulation RNG.
pub fn roll_crit(rng: &mut SimRng) -> f32 {
    rng.next_f32()
}

/// Stagger (posture) damage of an attack.
///
/// Doubled against a blocking defender, ×1.5 when the attacker is the player.
#[must_use]
pub fn calculate_stagger_damage(
    attack: &AttackData,
    attacker_faction: Faction,
    defender_blocking: bool,
) -> f32 {
    let mut stagger = match attack.attack_type {
        AttackType::Light => 10.0,
        AttackType::Heavy => 25.0,
        AttackType::Special => 20.0,
        AttackType::ForcePower => 30.0,
    };
    if defender_blocking {
        stagger *= 2.0;
    }
    if attacker_faction == Faction::Sith {
        stagger *= 1.5;
    }
    stagger
}

/// Whether a result would bring `current_health` to zero.
#[must_use]
pub fn would_kill(result: &DamageResult, current_health: f32) -> bool {
    result.damage >= current_health
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sith() -> CombatStats {
        CombatStats {
            faction: Faction::Sith,
            ..CombatStats::default()
        }
    }

    fn jedi(defense_type: DefenseType) -> CombatStats {
        CombatStats {
            faction: Faction::Jedi,
            defense_type,
            ..CombatStats::default()
        }
    }

    fn light_attack() -> AttackData {
        AttackData::new("light", "Light", AttackType::Light, 50.0).with_knockback(100.0, 200.0)
    }

    #[test]
    fn test_sith_light_vs_open_jedi() {
        let result = calculate_damage(&light_attack(), &sith(), &jedi(DefenseType::None), 0, 1.0, 0.99);
        assert_eq!(result.damage, 100.0);
        assert_eq!(result.raw_damage, 50.0);
        assert!(!result.is_critical);
        assert_eq!(result.kind, DamageKind::Normal);
        assert_eq!(result.knockback, 100.0);
    }

    #[test]
    fn test_sith_light_vs_blocking_jedi() {
        let result = calculate_damage(&light_attack(), &sith(), &jedi(DefenseType::Block), 0, 1.0, 0.99);
        assert_eq!(result.damage, 20.0);
        assert!(result.was_blocked);
        assert!((result.knockback - 30.0).abs() < 1e-4);
        assert_eq!(result.hitstun_ms, 100.0);
        assert_eq!(result.kind, DamageKind::Blocked);
    }

    #[test]
    fn test_parry_zeroes_everything() {
        let result = calculate_damage(&light_attack(), &sith(), &jedi(DefenseType::Parry), 0, 1.0, 0.99);
        assert_eq!(result.damage, 0.0);
        assert!(result.was_parried);
        assert_eq!(result.knockback, 0.0);
        assert_eq!(result.hitstun_ms, 0.0);
    }

    #[test]
    fn test_minimum_one_damage() {
        let trooper = CombatStats {
            faction: Faction::Imperial,
            ..CombatStats::default()
        };
        // Troopers deal 0x to the Sith but a landed hit still does 1.
        let result = calculate_damage(&light_attack(), &trooper, &sith(), 0, 1.0, 0.99);
        assert_eq!(result.damage, 1.0);
    }

    #[test]
    fn test_crit_and_kind() {
        let mut attacker = sith();
        attacker.crit_chance = 0.5;
        attacker.crit_multiplier = 2.0;
        let result = calculate_damage(&light_attack(), &attacker, &jedi(DefenseType::None), 0, 1.0, 0.1);
        assert!(result.is_critical);
        assert_eq!(result.raw_damage, 100.0);
        assert_eq!(result.damage, 200.0);
        assert_eq!(result.kind, DamageKind::Critical);

        let force = AttackData::new("push", "Push", AttackType::ForcePower, 50.0);
        let result = calculate_damage(&force, &attacker, &jedi(DefenseType::None), 0, 1.0, 0.1);
        assert_eq!(result.kind, DamageKind::Force);
    }

    #[test]
    fn test_force_pierces_block() {
        assert_eq!(attack_vs_defense(AttackType::ForcePower, DefenseType::Block), 0.8);
        assert_eq!(attack_vs_defense(AttackType::Light, DefenseType::Block), 0.2);
    }

    #[test]
    fn test_combo_scaling_table() {
        assert_eq!(combo_scaling(0), 1.0);
        assert_eq!(combo_scaling(1), 0.95);
        assert_eq!(combo_scaling(10), 0.5);
        assert_eq!(combo_scaling(u32::MAX), 0.5);
    }

    #[test]
    fn test_stagger_damage() {
        let heavy = AttackData::new("h", "H", AttackType::Heavy, 10.0);
        assert_eq!(calculate_stagger_damage(&heavy, Faction::Jedi, false), 25.0);
        assert_eq!(calculate_stagger_damage(&heavy, Faction::Jedi, true), 50.0);
        assert_eq!(calculate_stagger_damage(&heavy, Faction::Sith, true), 75.0);
    }

    #[test]
    fn test_would_kill() {
        let result = calculate_damage(&light_attack(), &sith(), &jedi(DefenseType::None), 0, 1.0, 0.99);
        assert!(would_kill(&result, 100.0));
        assert!(!would_kill(&result, 101.0));
    }

    proptest! {
        #[test]
        fn prop_combo_scaling_monotonic(m in 0u32..50, extra in 0u32..50) {
            let n = m + extra;
            prop_assert!(combo_scaling(n) <= combo_scaling(m));
            prop_assert!(combo_scaling(n) >= 0.5);
        }

        #[test]
        fn prop_damage_deterministic(
            damage in 1.0f32..500.0,
            combo in 0u32..20,
            charge in 1.0f32..3.0,
            roll in 0.0f32..1.0,
        ) {
            let attack = AttackData::new("p", "P", AttackType::Heavy, damage);
            let mut attacker = sith();
            attacker.crit_chance = 0.3;
            let defender = jedi(DefenseType::Block);
            let a = calculate_damage(&attack, &attacker, &defender, combo, charge, roll);
            let b = calculate_damage(&attack, &attacker, &defender, combo, charge, roll);
            prop_assert_eq!(a, b);
        }
    }
}
