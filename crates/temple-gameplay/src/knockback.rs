//! Knockback and stun physics.
//!
//! Knockback is a decaying velocity applied independently of damage, so
//! scripted effects can push entities around too. Friction is expressed per
//! 60 Hz frame and converted to the actual tick length.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use temple_common::{EntityId, Vec2};
use tracing::debug;

use crate::attack_data::{AttackData, AttackType, KnockbackKind};
use crate::events::{topics, EventBus, EventPayload, GameEvent, KnockbackEvent};
use crate::faction::Faction;

/// Tuning for one knockback archetype.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KnockbackProfile {
    /// Base speed (px/s)
    pub force: f32,
    /// How long the push lasts (ms)
    pub duration_ms: f32,
    /// Velocity retained per 60 Hz frame
    pub friction: f32,
    /// Stun applied (ms)
    pub stun_ms: f32,
    /// Whether a block reduces it
    pub blockable: bool,
    /// Multiplier applied when blocked
    pub block_factor: f32,
    /// Upward component mixed into the direction (negative pushes down)
    pub vertical_bias: f32,
}

impl KnockbackProfile {
    const fn new(
        force: f32,
        duration_ms: f32,
        friction: f32,
        stun_ms: f32,
        blockable: bool,
        block_factor: f32,
        vertical_bias: f32,
    ) -> Self {
        Self {
            force,
            duration_ms,
            friction,
            stun_ms,
            blockable,
            block_factor,
            vertical_bias,
        }
    }
}

/// Knockback tuning for all archetypes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnockbackConfig {
    /// Light hits
    pub light: KnockbackProfile,
    /// Heavy hits
    pub heavy: KnockbackProfile,
    /// Launchers
    pub launch: KnockbackProfile,
    /// Slams
    pub slam: KnockbackProfile,
    /// Force push
    pub force_push: KnockbackProfile,
    /// Force pull
    pub force_pull: KnockbackProfile,
}

impl Default for KnockbackConfig {
    fn default() -> Self {
        Self {
            light: KnockbackProfile::new(200.0, 150.0, 0.85, 0.0, true, 0.3, 0.0),
            heavy: KnockbackProfile::new(400.0, 250.0, 0.88, 200.0, true, 0.5, 0.1),
            launch: KnockbackProfile::new(350.0, 400.0, 0.92, 400.0, false, 1.0, 0.8),
            slam: KnockbackProfile::new(300.0, 300.0, 0.8, 500.0, true, 0.6, -0.3),
            force_push: KnockbackProfile::new(600.0, 400.0, 0.9, 300.0, false, 1.0, 0.2),
            force_pull: KnockbackProfile::new(450.0, 300.0, 0.85, 250.0, false, 1.0, 0.0),
        }
    }
}

impl KnockbackConfig {
    /// Profile for an archetype.
    #[must_use]
    pub fn profile(&self, kind: KnockbackKind) -> KnockbackProfile {
        match kind {
            KnockbackKind::Light => self.light,
            KnockbackKind::Heavy => self.heavy,
            KnockbackKind::Launch => self.launch,
            KnockbackKind::Slam => self.slam,
            KnockbackKind::ForcePush => self.force_push,
            KnockbackKind::ForcePull => self.force_pull,
        }
    }
}

/// Archetype of an attack: its explicit tag, else derived from its type.
#[must_use]
pub fn knockback_kind(attack: &AttackData) -> KnockbackKind {
    attack.knockback_kind.unwrap_or(match attack.attack_type {
        AttackType::Light => KnockbackKind::Light,
        AttackType::Heavy | AttackType::Special => KnockbackKind::Heavy,
        AttackType::ForcePower => KnockbackKind::ForcePush,
    })
}

/// Knockback produced by one application.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KnockbackResult {
    /// Initial velocity (px/s)
    pub velocity: Vec2,
    /// Stun inflicted (ms)
    pub stun_ms: f32,
    /// Archetype
    pub kind: KnockbackKind,
}

#[derive(Debug, Clone)]
struct Motion {
    velocity: Vec2,
    remaining_ms: f32,
    friction: f32,
    kind: KnockbackKind,
}

/// Active knockback and stun timers.
#[derive(Debug)]
pub struct KnockbackSystem {
    config: KnockbackConfig,
    bus: EventBus,
    motions: BTreeMap<EntityId, Motion>,
    stuns: BTreeMap<EntityId, f32>,
}

impl KnockbackSystem {
    /// Creates a knockback system.
    #[must_use]
    pub fn new(config: KnockbackConfig, bus: EventBus) -> Self {
        Self {
            config,
            bus,
            motions: BTreeMap::new(),
            stuns: BTreeMap::new(),
        }
    }

    /// Tuning in use.
    #[must_use]
    pub fn config(&self) -> &KnockbackConfig {
        &self.config
    }

    /// Knocks `target` away from `source_pos` using an attack's archetype.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_knockback(
        &mut self,
        target: EntityId,
        target_pos: Vec2,
        source_pos: Vec2,
        attack: &AttackData,
        attacker_faction: Faction,
        target_faction: Faction,
        blocking: bool,
    ) -> KnockbackResult {
        let kind = knockback_kind(attack);
        let profile = self.config.profile(kind);

        let base = if attack.knockback > 0.0 {
            attack.knockback
        } else {
            profile.force
        };
        let mut magnitude =
            base * attacker_faction.knockback_dealt() * target_faction.knockback_taken();
        if blocking && profile.blockable {
            magnitude *= profile.block_factor;
        }

        let mut horizontal = (target_pos - source_pos).normalize_or_zero();
        if horizontal == Vec2::ZERO {
            horizontal = Vec2::X;
        }
        if kind == KnockbackKind::ForcePull {
            horizontal = -horizontal;
        }
        // Screen space: negative y is up.
        let direction = (horizontal - Vec2::Y * profile.vertical_bias).normalize_or_zero();

        let stun_ms = if blocking {
            profile.stun_ms * 0.5
        } else {
            profile.stun_ms
        };
        let velocity = direction * magnitude;
        self.start(target, velocity, profile.duration_ms, profile.friction, stun_ms, kind);
        KnockbackResult {
            velocity,
            stun_ms,
            kind,
        }
    }

    /// Applies an explicit velocity, bypassing attack-derived tuning.
    pub fn apply_direct_knockback(
        &mut self,
        target: EntityId,
        velocity: Vec2,
        duration_ms: f32,
        friction: f32,
        stun_ms: f32,
    ) {
        self.start(
            target,
            velocity,
            duration_ms,
            friction,
            stun_ms,
            KnockbackKind::Light,
        );
    }

    fn start(
        &mut self,
        target: EntityId,
        velocity: Vec2,
        duration_ms: f32,
        friction: f32,
        stun_ms: f32,
        kind: KnockbackKind,
    ) {
        debug!("{} knocked back {:?} ({:?})", target, velocity, kind);
        self.motions.insert(
            target,
            Motion {
                velocity,
                remaining_ms: duration_ms,
                friction: friction.clamp(0.0, 1.0),
                kind,
            },
        );
        if stun_ms > 0.0 {
            let stun = self.stuns.entry(target).or_insert(0.0);
            *stun = stun.max(stun_ms);
        }
        self.bus.emit(GameEvent::new(
            topics::COMBAT_KNOCKBACK,
            EventPayload::Knockback(KnockbackEvent {
                entity: target,
                velocity,
                stun_ms,
                kind,
            }),
        ));
    }

    /// Current knockback velocity (zero when not being pushed).
    #[must_use]
    pub fn velocity(&self, entity: EntityId) -> Vec2 {
        self.motions.get(&entity).map_or(Vec2::ZERO, |m| m.velocity)
    }

    /// Whether the entity is being pushed.
    #[must_use]
    pub fn is_knocked_back(&self, entity: EntityId) -> bool {
        self.motions.contains_key(&entity)
    }

    /// Whether the entity is stunned.
    #[must_use]
    pub fn is_stunned(&self, entity: EntityId) -> bool {
        self.stuns.contains_key(&entity)
    }

    /// Remaining stun (ms).
    #[must_use]
    pub fn stun_remaining(&self, entity: EntityId) -> f32 {
        self.stuns.get(&entity).copied().unwrap_or(0.0)
    }

    /// Forgets an entity.
    pub fn remove(&mut self, entity: EntityId) {
        self.motions.remove(&entity);
        self.stuns.remove(&entity);
    }

    /// Decays velocities and timers. Returns entities whose knockback ended.
    pub fn update(&mut self, dt_ms: f32) -> Vec<EntityId> {
        let frames = dt_ms / 1000.0 * 60.0;
        let mut ended = Vec::new();
        for (entity, motion) in &mut self.motions {
            motion.remaining_ms -= dt_ms;
            if motion.remaining_ms <= 0.0 {
                motion.velocity = Vec2::ZERO;
                ended.push(*entity);
            } else {
                motion.velocity *= motion.friction.powf(frames);
            }
        }
        for entity in &ended {
            if let Some(motion) = self.motions.remove(entity) {
                self.bus.emit(GameEvent::new(
                    topics::COMBAT_KNOCKBACK_END,
                    EventPayload::Knockback(KnockbackEvent {
                        entity: *entity,
                        velocity: Vec2::ZERO,
                        stun_ms: 0.0,
                        kind: motion.kind,
                    }),
                ));
            }
        }

        self.stuns.retain(|_, remaining| {
            *remaining -= dt_ms;
            *remaining > 0.0
        });
        ended
    }
}
