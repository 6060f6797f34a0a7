//! Attack frame data and the read-only attack catalog.
//!
//! Every move in the game is an immutable [`AttackData`] entry, created once
//! and shared through [`Arc`]. Timing is expressed in milliseconds: the hitbox
//! of an attack is live only during `[startup, startup + active)`.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use temple_common::Vec2;
use thiserror::Error;

/// Catalog validation errors. These are programming errors in move data.
#[derive(Debug, Error, PartialEq)]
pub enum CatalogError {
    /// Two entries share an id
    #[error("Duplicate attack id: {0}")]
    DuplicateId(String),
    /// A cancel route points at a missing attack
    #[error("Attack `{attack}` cancels into unknown attack `{target}`")]
    UnknownCancelTarget {
        /// Attack declaring the route
        attack: String,
        /// Missing target
        target: String,
    },
    /// An attack lists itself as a cancel target
    #[error("Attack `{0}` cancels into itself")]
    SelfCancel(String),
    /// A combo chain references a missing attack
    #[error("Combo chain entry `{0}` is not in the catalog")]
    MissingChainEntry(String),
    /// Negative or non-finite timing value
    #[error("Attack `{0}` has invalid timing")]
    InvalidTiming(String),
}

/// Result type for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Attack weight class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttackType {
    /// Fast, low commitment
    Light,
    /// Slow, high damage
    Heavy,
    /// Signature moves
    Special,
    /// Force powers
    ForcePower,
}

impl AttackType {
    pub(crate) const fn index(self) -> usize {
        match self {
            Self::Light => 0,
            Self::Heavy => 1,
            Self::Special => 2,
            Self::ForcePower => 3,
        }
    }
}

/// Which way the hitbox extends from its owner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HitDirection {
    /// In front of the owner (mirrored when facing left)
    #[default]
    Forward,
    /// Above the owner
    Up,
    /// Below the owner
    Down,
    /// Centered on the owner
    Around,
}

/// Hitbox geometry relative to the owner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HitboxShape {
    /// Offset from the owner's center when facing right
    pub offset: Vec2,
    /// Full width
    pub width: f32,
    /// Full height
    pub height: f32,
    /// Extension direction
    pub direction: HitDirection,
}

impl HitboxShape {
    /// Creates a forward-facing shape.
    #[must_use]
    pub const fn forward(offset_x: f32, width: f32, height: f32) -> Self {
        Self {
            offset: Vec2::new(offset_x, 0.0),
            width,
            height,
            direction: HitDirection::Forward,
        }
    }

    /// Creates a shape centered on the owner.
    #[must_use]
    pub const fn around(width: f32, height: f32) -> Self {
        Self {
            offset: Vec2::ZERO,
            width,
            height,
            direction: HitDirection::Around,
        }
    }

    /// World-space center for an owner at `owner_pos`, mirroring the x offset
    /// when facing left.
    #[must_use]
    pub fn world_center(&self, owner_pos: Vec2, facing_right: bool) -> Vec2 {
        let dx = if facing_right {
            self.offset.x
        } else {
            -self.offset.x
        };
        Vec2::new(owner_pos.x + dx, owner_pos.y + self.offset.y)
    }
}

impl Default for HitboxShape {
    fn default() -> Self {
        Self::forward(40.0, 60.0, 50.0)
    }
}

/// Knockback archetype tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KnockbackKind {
    /// Small shove
    Light,
    /// Big shove
    Heavy,
    /// Upward launcher
    Launch,
    /// Ground slam
    Slam,
    /// Force push away from the attacker
    ForcePush,
    /// Force pull toward the attacker
    ForcePull,
}

/// Charge-up parameters for holdable attacks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChargeParams {
    /// Charge time that yields the full multiplier (ms)
    pub max_charge_ms: f32,
    /// Damage multiplier at full charge
    pub max_multiplier: f32,
}

impl ChargeParams {
    /// Damage multiplier for a charge held `held_ms`. Linear from 1.0.
    #[must_use]
    pub fn multiplier(&self, held_ms: f32) -> f32 {
        if self.max_charge_ms <= 0.0 {
            return self.max_multiplier.max(1.0);
        }
        let t = (held_ms / self.max_charge_ms).clamp(0.0, 1.0);
        1.0 + (self.max_multiplier - 1.0).max(0.0) * t
    }
}

/// Immutable frame data for one attack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackData {
    /// Catalog id
    pub id: String,
    /// Display name
    pub name: String,
    /// Weight class
    pub attack_type: AttackType,
    /// Base damage
    pub damage: f32,
    /// Wind-up before the hitbox appears (ms)
    pub startup_ms: f32,
    /// Hitbox lifetime (ms)
    pub active_ms: f32,
    /// Recovery after the hitbox vanishes (ms)
    pub recovery_ms: f32,
    /// Hitbox geometry
    pub hitbox: HitboxShape,
    /// Knockback magnitude override (0 uses the archetype base)
    pub knockback: f32,
    /// Hitstun inflicted (ms)
    pub hitstun_ms: f32,
    /// Explicit knockback archetype; `None` derives it from the attack type
    pub knockback_kind: Option<KnockbackKind>,
    /// Projectile attack (deflectable by a block)
    pub ranged: bool,
    /// Per-attacker cooldown after starting this attack (ms)
    pub cooldown_ms: f32,
    /// Attacks this one may cancel into during active / recovery
    pub cancel_into: Vec<String>,
    /// Force energy cost
    pub force_cost: Option<f32>,
    /// Re-hit interval for multi-hit attacks (ms)
    pub multi_hit_interval_ms: Option<f32>,
    /// Charge parameters
    pub charge: Option<ChargeParams>,
}

impl AttackData {
    /// Creates an attack with default timing (100 / 100 / 200 ms).
    #[must_use]
    pub fn new(id: &str, name: &str, attack_type: AttackType, damage: f32) -> Self {
        Self {
            id: id.to_owned(),
            name: name.to_owned(),
            attack_type,
            damage,
            startup_ms: 100.0,
            active_ms: 100.0,
            recovery_ms: 200.0,
            hitbox: HitboxShape::default(),
            knockback: 0.0,
            hitstun_ms: 200.0,
            knockback_kind: None,
            ranged: false,
            cooldown_ms: 0.0,
            cancel_into: Vec::new(),
            force_cost: None,
            multi_hit_interval_ms: None,
            charge: None,
        }
    }

    /// Sets startup / active / recovery (builder pattern).
    #[must_use]
    pub fn with_timing(mut self, startup_ms: f32, active_ms: f32, recovery_ms: f32) -> Self {
        self.startup_ms = startup_ms;
        self.active_ms = active_ms;
        self.recovery_ms = recovery_ms;
        self
    }

    /// Sets the hitbox shape (builder pattern).
    #[must_use]
    pub fn with_hitbox(mut self, hitbox: HitboxShape) -> Self {
        self.hitbox = hitbox;
        self
    }

    /// Sets knockback magnitude and hitstun (builder pattern).
    #[must_use]
    pub fn with_knockback(mut self, knockback: f32, hitstun_ms: f32) -> Self {
        self.knockback = knockback;
        self.hitstun_ms = hitstun_ms;
        self
    }

    /// Tags the knockback archetype (builder pattern).
    #[must_use]
    pub fn with_knockback_kind(mut self, kind: KnockbackKind) -> Self {
        self.knockback_kind = Some(kind);
        self
    }

    /// Marks the attack as a projectile (builder pattern).
    #[must_use]
    pub fn ranged(mut self) -> Self {
        self.ranged = true;
        self
    }

    /// Sets the per-attacker cooldown (builder pattern).
    #[must_use]
    pub fn with_cooldown(mut self, cooldown_ms: f32) -> Self {
        self.cooldown_ms = cooldown_ms;
        self
    }

    /// Sets the cancel routes (builder pattern).
    #[must_use]
    pub fn with_cancels(mut self, targets: &[&str]) -> Self {
        self.cancel_into = targets.iter().map(|t| (*t).to_owned()).collect();
        self
    }

    /// Sets the Force cost (builder pattern).
    #[must_use]
    pub fn with_force_cost(mut self, cost: f32) -> Self {
        self.force_cost = Some(cost);
        self
    }

    /// Makes the attack multi-hit (builder pattern).
    #[must_use]
    pub fn with_multi_hit(mut self, interval_ms: f32) -> Self {
        self.multi_hit_interval_ms = Some(interval_ms);
        self
    }

    /// Makes the attack chargeable (builder pattern).
    #[must_use]
    pub fn with_charge(mut self, max_charge_ms: f32, max_multiplier: f32) -> Self {
        self.charge = Some(ChargeParams {
            max_charge_ms,
            max_multiplier,
        });
        self
    }

    /// Whether this attack can strike the same target more than once.
    #[must_use]
    pub fn is_multi_hit(&self) -> bool {
        self.multi_hit_interval_ms.is_some()
    }
}

// ============================================================================
// Timing queries
// ============================================================================

/// Phase of an attack in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttackPhase {
    /// Wind-up
    Startup,
    /// Hitbox live
    Active,
    /// Recovering
    Recovery,
}

/// Total duration of an attack (ms).
#[must_use]
pub fn attack_duration(attack: &AttackData) -> f32 {
    attack.startup_ms + attack.active_ms + attack.recovery_ms
}

/// Phase at `elapsed_ms` since the attack started; `None` once complete.
#[must_use]
pub fn attack_phase(attack: &AttackData, elapsed_ms: f32) -> Option<AttackPhase> {
    if elapsed_ms < attack.startup_ms {
        Some(AttackPhase::Startup)
    } else if elapsed_ms < attack.startup_ms + attack.active_ms {
        Some(AttackPhase::Active)
    } else if elapsed_ms < attack_duration(attack) {
        Some(AttackPhase::Recovery)
    } else {
        None
    }
}

/// Whether `current` lists `target_id` as a cancel route.
#[must_use]
pub fn can_cancel_into(current: &AttackData, target_id: &str) -> bool {
    current.cancel_into.iter().any(|id| id == target_id)
}

/// Player light combo order.
pub const LIGHT_CHAIN: [&str; 3] = ["light_1", "light_2", "light_3"];
/// Player heavy combo order.
pub const HEAVY_CHAIN: [&str; 2] = ["heavy_1", "heavy_2"];

/// Next attack in the fixed light / heavy chain, `None` at the end or when
/// `id` is not part of a chain.
#[must_use]
pub fn next_in_chain(id: &str) -> Option<&'static str> {
    [&LIGHT_CHAIN[..], &HEAVY_CHAIN[..]].into_iter().find_map(|chain| {
        let pos = chain.iter().position(|entry| *entry == id)?;
        chain.get(pos + 1).copied()
    })
}

// ============================================================================
// Catalog
// ============================================================================

/// Read-only registry of attacks keyed by id.
#[derive(Debug, Clone, Default)]
pub struct AttackCatalog {
    attacks: BTreeMap<String, Arc<AttackData>>,
}

impl AttackCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an attack. Duplicate ids are rejected.
    pub fn insert(&mut self, attack: AttackData) -> CatalogResult<()> {
        if self.attacks.contains_key(&attack.id) {
            return Err(CatalogError::DuplicateId(attack.id));
        }
        self.attacks.insert(attack.id.clone(), Arc::new(attack));
        Ok(())
    }

    /// Looks up an attack.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<AttackData>> {
        self.attacks.get(id).cloned()
    }

    /// Whether an id is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.attacks.contains_key(id)
    }

    /// Number of attacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.attacks.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attacks.is_empty()
    }

    /// Iterates over attack ids in order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.attacks.keys().map(String::as_str)
    }

    /// Checks the catalog for malformed move data.
    pub fn validate(&self) -> CatalogResult<()> {
        for chain_id in LIGHT_CHAIN.iter().chain(HEAVY_CHAIN.iter()) {
            if !self.contains(chain_id) {
                return Err(CatalogError::MissingChainEntry((*chain_id).to_owned()));
            }
        }
        for attack in self.attacks.values() {
            let timings = [
                attack.startup_ms,
                attack.active_ms,
                attack.recovery_ms,
                attack.cooldown_ms,
                attack.hitstun_ms,
            ];
            if timings.iter().any(|t| !t.is_finite() || *t < 0.0) {
                return Err(CatalogError::InvalidTiming(attack.id.clone()));
            }
            if attack.multi_hit_interval_ms.is_some_and(|i| i <= 0.0)
                || attack.charge.is_some_and(|c| c.max_charge_ms <= 0.0)
            {
                return Err(CatalogError::InvalidTiming(attack.id.clone()));
            }
            for target in &attack.cancel_into {
                if *target == attack.id {
                    return Err(CatalogError::SelfCancel(attack.id.clone()));
                }
                if !self.contains(target) {
                    return Err(CatalogError::UnknownCancelTarget {
                        attack: attack.id.clone(),
                        target: target.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// The game's full move list.
    #[must_use]
    pub fn standard() -> Self {
        let mut catalog = Self::new();
        for attack in standard_moves() {
            // Ids in the standard list are unique; a duplicate is caught by validate tests.
            let _ = catalog.insert(attack);
        }
        catalog
    }
}

/// Process-wide standard catalog.
#[must_use]
pub fn standard_catalog() -> &'static AttackCatalog {
    static CATALOG: OnceLock<AttackCatalog> = OnceLock::new();
    CATALOG.get_or_init(AttackCatalog::standard)
}

/// Looks up an attack in the standard catalog.
#[must_use]
pub fn get_attack_data(id: &str) -> Option<Arc<AttackData>> {
    standard_catalog().get(id)
}

fn standard_moves() -> Vec<AttackData> {
    use AttackType::{ForcePower, Heavy, Light, Special};
    use KnockbackKind as Kb;

    vec![
        // Player
        AttackData::new("light_1", "Saber Slash", Light, 50.0)
            .with_timing(80.0, 100.0, 150.0)
            .with_knockback(150.0, 200.0)
            .with_cancels(&["light_2", "heavy_1", "force_push"]),
        AttackData::new("light_2", "Backhand Slash", Light, 55.0)
            .with_timing(70.0, 100.0, 150.0)
            .with_knockback(150.0, 200.0)
            .with_cancels(&["light_3", "heavy_1", "force_push"]),
        AttackData::new("light_3", "Finishing Cut", Light, 70.0)
            .with_timing(90.0, 120.0, 250.0)
            .with_hitbox(HitboxShape::forward(45.0, 80.0, 60.0))
            .with_knockback(250.0, 300.0)
            .with_knockback_kind(Kb::Heavy)
            .with_cancels(&["heavy_1"]),
        AttackData::new("heavy_1", "Overhead Cleave", Heavy, 120.0)
            .with_timing(300.0, 150.0, 400.0)
            .with_hitbox(HitboxShape::forward(50.0, 90.0, 70.0))
            .with_knockback(300.0, 400.0)
            .with_charge(1000.0, 2.0)
            .with_cancels(&["heavy_2"]),
        AttackData::new("heavy_2", "Saber Slam", Heavy, 150.0)
            .with_timing(350.0, 150.0, 450.0)
            .with_hitbox(HitboxShape::forward(40.0, 120.0, 60.0))
            .with_knockback(350.0, 500.0)
            .with_knockback_kind(Kb::Slam),
        AttackData::new("rising_slash", "Rising Slash", Special, 90.0)
            .with_timing(150.0, 150.0, 300.0)
            .with_hitbox(HitboxShape {
                offset: Vec2::new(30.0, -30.0),
                width: 60.0,
                height: 100.0,
                direction: HitDirection::Up,
            })
            .with_knockback(300.0, 450.0)
            .with_knockback_kind(Kb::Launch)
            .with_cooldown(2000.0),
        AttackData::new("saber_throw", "Saber Throw", Special, 40.0)
            .with_timing(200.0, 600.0, 200.0)
            .with_hitbox(HitboxShape::forward(150.0, 220.0, 40.0))
            .with_knockback(80.0, 150.0)
            .with_multi_hit(150.0)
            .with_force_cost(15.0)
            .with_cooldown(4000.0),
        AttackData::new("force_push", "Force Push", ForcePower, 60.0)
            .with_timing(200.0, 200.0, 300.0)
            .with_hitbox(HitboxShape::forward(80.0, 160.0, 120.0))
            .with_knockback(500.0, 500.0)
            .with_knockback_kind(Kb::ForcePush)
            .with_force_cost(25.0)
            .with_cooldown(1500.0),
        AttackData::new("force_pull", "Force Pull", ForcePower, 30.0)
            .with_timing(150.0, 200.0, 250.0)
            .with_hitbox(HitboxShape::forward(150.0, 260.0, 80.0))
            .with_knockback(400.0, 400.0)
            .with_knockback_kind(Kb::ForcePull)
            .with_force_cost(20.0)
            .with_cooldown(1500.0),
        // Clone trooper
        AttackData::new("blaster_shot", "Blaster Shot", Light, 15.0)
            .with_timing(30.0, 30.0, 30.0)
            .with_hitbox(HitboxShape::forward(200.0, 400.0, 10.0))
            .with_knockback(40.0, 100.0)
            .ranged(),
        AttackData::new("suppressive_fire", "Suppressive Fire", Special, 8.0)
            .with_timing(100.0, 2000.0, 200.0)
            .with_hitbox(HitboxShape::forward(220.0, 440.0, 60.0))
            .with_knockback(20.0, 80.0)
            .with_multi_hit(200.0)
            .with_cooldown(6000.0)
            .ranged(),
        AttackData::new("rifle_butt", "Rifle Butt", Light, 20.0)
            .with_timing(100.0, 80.0, 200.0)
            .with_hitbox(HitboxShape::forward(30.0, 40.0, 40.0))
            .with_knockback(180.0, 250.0),
        // Jedi defender
        AttackData::new("jedi_slash_1", "Jedi Slash", Light, 25.0)
            .with_timing(100.0, 100.0, 150.0)
            .with_knockback(120.0, 200.0)
            .with_cancels(&["jedi_slash_2"]),
        AttackData::new("jedi_slash_2", "Jedi Cross Slash", Light, 30.0)
            .with_timing(90.0, 100.0, 150.0)
            .with_knockback(140.0, 220.0)
            .with_cancels(&["jedi_slash_3"]),
        AttackData::new("jedi_slash_3", "Jedi Finisher", Heavy, 45.0)
            .with_timing(150.0, 120.0, 300.0)
            .with_hitbox(HitboxShape::forward(45.0, 80.0, 60.0))
            .with_knockback(250.0, 350.0)
            .with_knockback_kind(Kb::Heavy),
        AttackData::new("jedi_counter", "Riposte", Special, 50.0)
            .with_timing(50.0, 100.0, 200.0)
            .with_knockback(200.0, 300.0)
            .with_cooldown(1000.0),
        AttackData::new("jedi_force_push", "Jedi Force Push", ForcePower, 30.0)
            .with_timing(250.0, 150.0, 300.0)
            .with_hitbox(HitboxShape::forward(70.0, 140.0, 100.0))
            .with_knockback(350.0, 300.0)
            .with_knockback_kind(Kb::ForcePush)
            .with_force_cost(30.0)
            .with_cooldown(5000.0),
        // Temple guard
        AttackData::new("pike_thrust", "Pike Thrust", Light, 30.0)
            .with_timing(150.0, 100.0, 200.0)
            .with_hitbox(HitboxShape::forward(90.0, 140.0, 30.0))
            .with_knockback(180.0, 250.0),
        AttackData::new("pike_sweep", "Pike Sweep", Heavy, 50.0)
            .with_timing(250.0, 150.0, 350.0)
            .with_hitbox(HitboxShape::forward(60.0, 200.0, 50.0))
            .with_knockback(280.0, 350.0)
            .with_knockback_kind(Kb::Heavy),
        AttackData::new("pike_spin", "Pike Spin", Special, 40.0)
            .with_timing(200.0, 450.0, 300.0)
            .with_hitbox(HitboxShape::around(220.0, 80.0))
            .with_knockback(200.0, 250.0)
            .with_multi_hit(150.0)
            .with_cooldown(4000.0),
        // Boss: Shii-Cho
        AttackData::new("shii_cho_sweep", "Shii-Cho Sweep", Light, 60.0)
            .with_timing(120.0, 120.0, 200.0)
            .with_hitbox(HitboxShape::forward(50.0, 100.0, 60.0))
            .with_knockback(200.0, 250.0)
            .with_cancels(&["shii_cho_combo"]),
        AttackData::new("shii_cho_combo", "Shii-Cho Combination", Heavy, 90.0)
            .with_timing(200.0, 150.0, 300.0)
            .with_hitbox(HitboxShape::forward(50.0, 100.0, 70.0))
            .with_knockback(280.0, 350.0)
            .with_knockback_kind(Kb::Heavy),
        // Boss: Ataru
        AttackData::new("ataru_flurry", "Ataru Flurry", Light, 45.0)
            .with_timing(100.0, 300.0, 200.0)
            .with_hitbox(HitboxShape::forward(45.0, 90.0, 70.0))
            .with_knockback(120.0, 200.0)
            .with_multi_hit(100.0),
        AttackData::new("ataru_flip_strike", "Ataru Flip Strike", Special, 110.0)
            .with_timing(250.0, 150.0, 300.0)
            .with_hitbox(HitboxShape::forward(60.0, 110.0, 90.0))
            .with_knockback(300.0, 400.0)
            .with_knockback_kind(Kb::Launch)
            .with_cooldown(3000.0),
        // Boss: Juyo
        AttackData::new("juyo_onslaught", "Juyo Onslaught", Heavy, 130.0)
            .with_timing(150.0, 200.0, 250.0)
            .with_hitbox(HitboxShape::forward(55.0, 120.0, 80.0))
            .with_knockback(320.0, 400.0)
            .with_knockback_kind(Kb::Heavy),
        AttackData::new("juyo_fury", "Juyo Fury", Special, 250.0)
            .with_timing(400.0, 300.0, 500.0)
            .with_hitbox(HitboxShape::around(300.0, 140.0))
            .with_knockback(500.0, 600.0)
            .with_knockback_kind(Kb::Slam)
            .with_cooldown(10_000.0),
        // Boss: any form
        AttackData::new("boss_leap_strike", "Leap Strike", Special, 150.0)
            .with_timing(400.0, 150.0, 400.0)
            .with_hitbox(HitboxShape::around(160.0, 100.0))
            .with_knockback(400.0, 450.0)
            .with_knockback_kind(Kb::Slam)
            .with_cooldown(10_000.0),
        AttackData::new("boss_force_wave", "Force Wave", ForcePower, 100.0)
            .with_timing(300.0, 200.0, 400.0)
            .with_hitbox(HitboxShape::around(280.0, 160.0))
            .with_knockback(500.0, 500.0)
            .with_knockback_kind(Kb::ForcePush)
            .with_force_cost(40.0)
            .with_cooldown(10_000.0),
        AttackData::new("boss_force_pull", "Boss Force Pull", ForcePower, 40.0)
            .with_timing(200.0, 200.0, 200.0)
            .with_hitbox(HitboxShape::forward(180.0, 320.0, 100.0))
            .with_knockback(350.0, 300.0)
            .with_knockback_kind(Kb::ForcePull)
            .with_force_cost(25.0)
            .with_cooldown(6000.0),
    ]
}
