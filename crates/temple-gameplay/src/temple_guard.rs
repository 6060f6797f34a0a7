//! Temple guard archetype: pike reach, stances, block fatigue, pairing and
//! protection duty.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use temple_common::{EntityId, Vec2};
use tracing::{debug, info};

use crate::block::BlockResult;
use crate::combat::AutoBlockProfile;
use crate::enemy::{EnemyBrain, EnemyCore};
use crate::events::{topics, EventPayload, GameEvent, StanceEvent};

const FATIGUE_BLOCKS: usize = 5;
const FATIGUE_WINDOW_MS: f64 = 1000.0;
const FATIGUE_DURATION_MS: f64 = 2000.0;
const AGGRESSIVE_HEALTH: f32 = 0.25;
const SPIN_RANGE: f32 = 70.0;
const GUARD_OFFSET: f32 = 50.0;

/// Guard stance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GuardStance {
    /// Holds ground, blocks often
    Defensive,
    /// Presses the attack
    Aggressive,
    /// Works with a partner guard
    Paired,
    /// Shields a charge
    Protector,
}

impl GuardStance {
    /// Chance to raise guard against a new swing.
    #[must_use]
    pub const fn block_chance(self) -> f32 {
        match self {
            Self::Defensive => 0.6,
            Self::Aggressive => 0.2,
            Self::Paired => 0.45,
            Self::Protector => 0.7,
        }
    }

    /// Pause between attacks (ms).
    #[must_use]
    pub const fn attack_cooldown_ms(self) -> f32 {
        match self {
            Self::Defensive => 1400.0,
            Self::Aggressive => 700.0,
            Self::Paired => 1000.0,
            Self::Protector => 1200.0,
        }
    }

    /// Event name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Defensive => "defensive",
            Self::Aggressive => "aggressive",
            Self::Paired => "paired",
            Self::Protector => "protector",
        }
    }
}

/// Spot on the far side of the threat from a partner, at `reach`.
#[must_use]
pub fn paired_spot(threat: Vec2, partner: Vec2, reach: f32) -> Vec2 {
    let away = (threat - partner).normalize_or_zero();
    let away = if away == Vec2::ZERO { Vec2::X } else { away };
    threat + away * reach
}

/// Spot between a protectee and the threat, `offset` px in front of the protectee.
#[must_use]
pub fn guard_spot(protectee: Vec2, threat: Vec2, offset: f32) -> Vec2 {
    protectee + (threat - protectee).normalize_or_zero() * offset
}

/// Temple guard brain.
#[derive(Debug, Clone)]
pub struct TempleGuard {
    stance: GuardStance,
    partner: Option<EntityId>,
    protectee: Option<EntityId>,
    recent_blocks: VecDeque<f64>,
    fatigued_until: f64,
    saw_attack: bool,
}

impl Default for TempleGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl TempleGuard {
    /// Creates a guard in the defensive stance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stance: GuardStance::Defensive,
            partner: None,
            protectee: None,
            recent_blocks: VecDeque::new(),
            fatigued_until: 0.0,
            saw_attack: false,
        }
    }

    /// Pairs with another guard (builder pattern).
    #[must_use]
    pub fn with_partner(mut self, partner: EntityId) -> Self {
        self.partner = Some(partner);
        self.stance = GuardStance::Paired;
        self
    }

    /// Protects an entity (builder pattern).
    #[must_use]
    pub fn with_protectee(mut self, protectee: EntityId) -> Self {
        self.protectee = Some(protectee);
        self.stance = GuardStance::Protector;
        self
    }

    /// Current stance.
    #[must_use]
    pub fn stance(&self) -> GuardStance {
        self.stance
    }

    /// Whether blocks are currently ineffective.
    #[must_use]
    pub fn is_fatigued(&self, now: f64) -> bool {
        now < self.fatigued_until
    }

    fn set_stance(&mut self, core: &mut EnemyCore, stance: GuardStance) {
        if self.stance == stance {
            return;
        }
        info!("{} takes {} stance", core.id, stance.name());
        self.stance = stance;
        core.bus.emit(GameEvent::new(
            topics::ENEMY_STANCE_CHANGE,
            EventPayload::Stance(StanceEvent {
                entity: core.id,
                stance: stance.name().to_owned(),
            }),
        ));
    }
}

impl EnemyBrain for TempleGuard {
    fn name(&self) -> &'static str {
        "temple_guard"
    }

    fn attack_ids(&self) -> &'static [&'static str] {
        &["pike_thrust", "pike_sweep", "pike_spin"]
    }

    fn select_attack(&mut self, core: &mut EnemyCore) -> Option<String> {
        let distance = core.distance_to_target();
        if distance <= SPIN_RANGE && core.perception.is_ready("pike_spin") && core.rng.chance(0.3) {
            return Some("pike_spin".to_owned());
        }
        let sweep_chance = if self.stance == GuardStance::Aggressive { 0.5 } else { 0.3 };
        if distance <= SPIN_RANGE && core.rng.chance(sweep_chance) {
            return Some("pike_sweep".to_owned());
        }
        Some("pike_thrust".to_owned())
    }

    fn chase(&mut self, core: &mut EnemyCore, dt_ms: f32) {
        if core.run_behaviors(dt_ms) {
            return;
        }
        let Some(threat) = core.perception.target_position else {
            core.stop();
            return;
        };
        let watched = |id: Option<EntityId>| id.and_then(|e| core.perception.watched.get(&e).copied());
        let spot = match self.stance {
            GuardStance::Protector => watched(self.protectee).map(|p| guard_spot(p, threat, GUARD_OFFSET)),
            GuardStance::Paired => watched(self.partner).map(|p| paired_spot(threat, p, core.config.attack_range * 0.9)),
            _ => None,
        };
        match spot {
            Some(spot) if core.position().distance(spot) > 8.0 => {
                core.move_towards(spot, 1.0);
                core.face_target();
            }
            Some(_) => {
                core.stop();
                core.face_target();
            }
            None => core.default_chase(),
        }
    }

    fn think(&mut self, core: &mut EnemyCore, _dt_ms: f32) {
        if core.perception.health_fraction < AGGRESSIVE_HEALTH {
            self.set_stance(core, GuardStance::Aggressive);
        }
        while self
            .recent_blocks
            .front()
            .is_some_and(|at| core.now - at > FATIGUE_WINDOW_MS)
        {
            self.recent_blocks.pop_front();
        }

        let swing_started = core.perception.target_attacking && !self.saw_attack;
        self.saw_attack = core.perception.target_attacking;
        core.wants_block = swing_started
            && !self.is_fatigued(core.now)
            && !core.perception.is_attacking
            && core.rng.chance(self.stance.block_chance());
    }

    fn on_blocked(&mut self, core: &mut EnemyCore, _result: BlockResult) {
        self.recent_blocks.push_back(core.now);
        if self.recent_blocks.len() >= FATIGUE_BLOCKS {
            debug!("{} guard fatigued", core.id);
            self.recent_blocks.clear();
            self.fatigued_until = core.now + FATIGUE_DURATION_MS;
        }
    }

    fn auto_block(&self, core: &EnemyCore) -> Option<AutoBlockProfile> {
        if core.perception.is_attacking || self.is_fatigued(core.now) {
            return None;
        }
        Some(AutoBlockProfile {
            chance: self.stance.block_chance() * 0.6,
            effectiveness: 0.9,
        })
    }

    fn cooldown_scale(&self, core: &EnemyCore) -> f32 {
        self.stance.attack_cooldown_ms() / core.config.attack_cooldown_ms.max(1.0)
    }

    fn watched(&self) -> Vec<EntityId> {
        self.partner.into_iter().chain(self.protectee).collect()
    }
}
