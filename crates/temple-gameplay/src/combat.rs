//! Combat orchestration.
//!
//! [`CombatManager`] is the integration point every combatant talks to. It
//! owns the combat record of each registered entity together with the hitbox,
//! block and knockback systems, validates attack starts, and resolves every
//! hit of a tick in one pass:
//!
//! block / parry → damage → stagger → knockback → events
//!
//! Outcome events are queued on the bus and delivered when the owner flushes
//! it, so no entity reacts before all hits of the tick are resolved.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use temple_common::{Aabb, EntityId, HitboxId, SimClock, SimRng, Vec2};
use tracing::{debug, info};

use crate::attack_data::{
    attack_phase, can_cancel_into, standard_catalog, AttackCatalog, AttackData, AttackPhase,
};
use crate::block::{BlockConfig, BlockOutcome, BlockResult, BlockSystem};
use crate::combat_stats::{CombatStats, DefenseType};
use crate::damage_calc::{
    calculate_damage, calculate_stagger_damage, roll_crit, DamageKind, DamageResult,
};
use crate::events::{
    topics, AttackEvent, BlockEvent, DamageEvent, DeathEvent, EventBus, EventPayload,
    FeedbackEvent, ForceEvent, GameEvent, HitEvent, StaggerEvent,
};
use crate::faction::Faction;
use crate::force::ForcePool;
use crate::hitbox::{HitResult, HitboxSystem};
use crate::knockback::{KnockbackConfig, KnockbackSystem};

/// Combat tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombatConfig {
    /// Hits further apart than this restart the attacker's combo (ms)
    pub combo_window_ms: f32,
    /// Whether allied factions can hurt each other
    pub friendly_fire: bool,
    /// Block / parry tuning
    pub block: BlockConfig,
    /// Knockback tuning
    pub knockback: KnockbackConfig,
}

impl Default for CombatConfig {
    fn default() -> Self {
        Self {
            combo_window_ms: 1000.0,
            friendly_fire: false,
            block: BlockConfig::default(),
            knockback: KnockbackConfig::default(),
        }
    }
}

/// Probabilistic guard used by AI defenders that are not actively blocking.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutoBlockProfile {
    /// Chance to block each hit (0..1)
    pub chance: f32,
    /// How much of a normal block's protection applies (0..1)
    pub effectiveness: f32,
}

#[derive(Debug, Clone)]
struct CurrentAttack {
    attack: Arc<AttackData>,
    started_at: f64,
    hitbox: HitboxId,
}

#[derive(Debug, Clone)]
struct CombatEntity {
    stats: CombatStats,
    is_player: bool,
    position: Vec2,
    facing_right: bool,
    current: Option<CurrentAttack>,
    ready_at: BTreeMap<String, f64>,
    combo_count: u32,
    last_combo_hit: f64,
    invulnerable_until: Option<f64>,
    hitstun_until: f64,
    auto_block: Option<AutoBlockProfile>,
    force: Option<ForcePool>,
    dead: bool,
}

/// Read-only view of a registered combatant, used for AI perception.
#[derive(Debug, Clone, PartialEq)]
pub struct CombatantView {
    /// Entity id
    pub id: EntityId,
    /// Faction
    pub faction: Faction,
    /// Player-controlled
    pub is_player: bool,
    /// Position
    pub position: Vec2,
    /// Health fraction (0..1)
    pub health_fraction: f32,
    /// Mid-attack
    pub is_attacking: bool,
    /// Guard raised
    pub is_blocking: bool,
    /// Dead
    pub dead: bool,
}

/// Registers entities, starts attacks and resolves hits.
#[derive(Debug)]
pub struct CombatManager {
    config: CombatConfig,
    clock: SimClock,
    bus: EventBus,
    rng: SimRng,
    catalog: AttackCatalog,
    entities: BTreeMap<EntityId, CombatEntity>,
    hitboxes: HitboxSystem,
    blocks: BlockSystem,
    knockback: KnockbackSystem,
}

impl CombatManager {
    /// Creates a manager using the standard attack catalog.
    #[must_use]
    pub fn new(config: CombatConfig, clock: SimClock, bus: EventBus, rng: SimRng) -> Self {
        Self {
            hitboxes: HitboxSystem::new(clock.clone()),
            blocks: BlockSystem::new(config.block.clone(), clock.clone(), bus.clone()),
            knockback: KnockbackSystem::new(config.knockback.clone(), bus.clone()),
            catalog: standard_catalog().clone(),
            entities: BTreeMap::new(),
            config,
            clock,
            bus,
            rng,
        }
    }

    /// Replaces the attack catalog (builder pattern).
    #[must_use]
    pub fn with_catalog(mut self, catalog: AttackCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Attack catalog in use.
    #[must_use]
    pub fn catalog(&self) -> &AttackCatalog {
        &self.catalog
    }

    /// Event bus shared with the rest of the simulation.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Simulation clock.
    #[must_use]
    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    /// Hitbox registry, for debug overlays.
    #[must_use]
    pub fn hitboxes(&self) -> &HitboxSystem {
        &self.hitboxes
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Registers a combatant with a hurtbox of `size` centered on `position`.
    pub fn register_entity(
        &mut self,
        id: EntityId,
        stats: CombatStats,
        is_player: bool,
        position: Vec2,
        size: Vec2,
    ) {
        let faction = stats.faction;
        self.hitboxes.register_hurtbox(
            id,
            Aabb::from_center(position, size.x, size.y),
        );
        self.hitboxes.set_defense_type(id, stats.defense_type);
        self.blocks.register(id, faction);
        self.entities.insert(
            id,
            CombatEntity {
                stats,
                is_player,
                position,
                facing_right: true,
                current: None,
                ready_at: BTreeMap::new(),
                combo_count: 0,
                last_combo_hit: f64::NEG_INFINITY,
                invulnerable_until: None,
                hitstun_until: 0.0,
                auto_block: None,
                force: None,
                dead: false,
            },
        );
        debug!("Registered {} ({:?})", id, faction);
    }

    /// Removes a combatant and everything it owns.
    pub fn unregister_entity(&mut self, id: EntityId) {
        if self.entities.remove(&id).is_some() {
            self.hitboxes.remove_hurtbox(id);
            self.blocks.unregister(id);
            self.knockback.remove(id);
        }
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn is_registered(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Gives an entity a Force pool.
    pub fn set_force_pool(&mut self, id: EntityId, pool: ForcePool) {
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.force = Some(pool);
        }
    }

    /// Force pool of an entity.
    #[must_use]
    pub fn force_pool(&self, id: EntityId) -> Option<&ForcePool> {
        self.entities.get(&id).and_then(|e| e.force.as_ref())
    }

    /// Sets or clears the probabilistic auto-block of an entity.
    pub fn set_auto_block(&mut self, id: EntityId, profile: Option<AutoBlockProfile>) {
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.auto_block = profile;
        }
    }

    /// Auto-block profile of an entity.
    #[must_use]
    pub fn auto_block(&self, id: EntityId) -> Option<AutoBlockProfile> {
        self.entities.get(&id).and_then(|e| e.auto_block)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Combat stats of an entity.
    #[must_use]
    pub fn stats(&self, id: EntityId) -> Option<&CombatStats> {
        self.entities.get(&id).map(|e| &e.stats)
    }

    /// Mutable stats, for buffs such as enrage.
    pub fn stats_mut(&mut self, id: EntityId) -> Option<&mut CombatStats> {
        self.entities.get_mut(&id).map(|e| &mut e.stats)
    }

    /// Whether the entity is registered and alive.
    #[must_use]
    pub fn is_alive(&self, id: EntityId) -> bool {
        self.entities.get(&id).is_some_and(|e| !e.dead)
    }

    /// Health fraction (0 for unknown entities).
    #[must_use]
    pub fn health_fraction(&self, id: EntityId) -> f32 {
        self.entities
            .get(&id)
            .map_or(0.0, |e| e.stats.health_fraction())
    }

    /// Last reported position.
    #[must_use]
    pub fn position(&self, id: EntityId) -> Option<Vec2> {
        self.entities.get(&id).map(|e| e.position)
    }

    /// Perception view of an entity.
    #[must_use]
    pub fn view(&self, id: EntityId) -> Option<CombatantView> {
        let now = self.clock.now_ms();
        self.entities.get(&id).map(|e| CombatantView {
            id,
            faction: e.stats.faction,
            is_player: e.is_player,
            position: e.position,
            health_fraction: e.stats.health_fraction(),
            is_attacking: e.is_attacking(now),
            is_blocking: self.blocks.is_blocking(id),
            dead: e.dead,
        })
    }

    /// Views of every living entity in id order.
    #[must_use]
    pub fn living(&self) -> Vec<CombatantView> {
        self.entities
            .iter()
            .filter(|(_, e)| !e.dead)
            .filter_map(|(id, _)| self.view(*id))
            .collect()
    }

    /// Whether the entity is mid-attack.
    #[must_use]
    pub fn is_attacking(&self, id: EntityId) -> bool {
        let now = self.clock.now_ms();
        self.entities.get(&id).is_some_and(|e| e.is_attacking(now))
    }

    /// Current attack and its phase.
    #[must_use]
    pub fn current_attack(&self, id: EntityId) -> Option<(Arc<AttackData>, AttackPhase)> {
        let now = self.clock.now_ms();
        let current = self.entities.get(&id)?.current.as_ref()?;
        let phase = attack_phase(&current.attack, (now - current.started_at) as f32)?;
        Some((Arc::clone(&current.attack), phase))
    }

    /// Whether the entity is stunned by knockback or hitstun.
    #[must_use]
    pub fn is_stunned(&self, id: EntityId) -> bool {
        let now = self.clock.now_ms();
        self.knockback.is_stunned(id)
            || self.entities.get(&id).is_some_and(|e| now < e.hitstun_until)
    }

    /// Current knockback velocity.
    #[must_use]
    pub fn knockback_velocity(&self, id: EntityId) -> Vec2 {
        self.knockback.velocity(id)
    }

    /// Whether a knockback is moving the entity.
    #[must_use]
    pub fn is_knocked_back(&self, id: EntityId) -> bool {
        self.knockback.is_knocked_back(id)
    }

    /// Hits landed in the attacker's current combo.
    #[must_use]
    pub fn combo_count(&self, id: EntityId) -> u32 {
        let now = self.clock.now_ms();
        self.entities.get(&id).map_or(0, |e| {
            if now - e.last_combo_hit > f64::from(self.config.combo_window_ms) {
                0
            } else {
                e.combo_count
            }
        })
    }

    /// Milliseconds until `attack_id` is off cooldown for the entity.
    #[must_use]
    pub fn cooldown_remaining(&self, id: EntityId, attack_id: &str) -> f32 {
        let now = self.clock.now_ms();
        self.entities
            .get(&id)
            .and_then(|e| e.ready_at.get(attack_id))
            .map_or(0.0, |ready| (ready - now).max(0.0) as f32)
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Moves an entity, its hurtbox and its live hitboxes.
    pub fn set_position(&mut self, id: EntityId, position: Vec2, facing_right: bool) {
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        entity.position = position;
        entity.facing_right = facing_right;
        self.hitboxes.update_hurtbox(id, position);
        self.hitboxes.follow_owner(id, position);
    }

    /// Starts an attack. Returns false when the attack is unknown, the entity
    /// is dead, stunned or busy, the attack is on cooldown, or its Force cost
    /// cannot be paid.
    pub fn start_attack(&mut self, id: EntityId, attack_id: &str) -> bool {
        self.start_charged_attack(id, attack_id, 0.0)
    }

    /// Starts an attack released after charging for `held_ms`.
    pub fn start_charged_attack(&mut self, id: EntityId, attack_id: &str, held_ms: f32) -> bool {
        let now = self.clock.now_ms();
        let Some(attack) = self.catalog.get(attack_id) else {
            return false;
        };
        let stunned = self.is_stunned(id);
        let Some(entity) = self.entities.get_mut(&id) else {
            return false;
        };
        if entity.dead || stunned {
            return false;
        }
        if entity.ready_at.get(attack_id).is_some_and(|ready| *ready > now) {
            return false;
        }

        let mut cancelled = None;
        if let Some(current) = &entity.current {
            match attack_phase(&current.attack, (now - current.started_at) as f32) {
                None => {}
                Some(AttackPhase::Active | AttackPhase::Recovery)
                    if can_cancel_into(&current.attack, attack_id) =>
                {
                    cancelled = Some(current.hitbox);
                }
                Some(_) => return false,
            }
        }

        let force_remaining = match attack.force_cost {
            Some(cost) => {
                let Some(pool) = entity.force.as_mut() else {
                    return false;
                };
                if !pool.try_spend(cost) {
                    return false;
                }
                Some((cost, pool.energy))
            }
            None => None,
        };

        if let Some(hitbox) = cancelled {
            self.hitboxes.remove_hitbox(hitbox);
        }
        let charge = attack.charge.map_or(1.0, |c| c.multiplier(held_ms));
        let hitbox = self.hitboxes.create_charged_hitbox(
            id,
            Arc::clone(&attack),
            entity.position,
            entity.facing_right,
            charge,
        );
        if attack.cooldown_ms > 0.0 {
            entity
                .ready_at
                .insert(attack.id.clone(), now + f64::from(attack.cooldown_ms));
        }
        entity.current = Some(CurrentAttack {
            attack: Arc::clone(&attack),
            started_at: now,
            hitbox,
        });
        let is_player = entity.is_player;

        debug!("{} starts {} (charge x{:.2})", id, attack.id, charge);
        if let Some((cost, remaining)) = force_remaining {
            self.bus.queue(GameEvent::new(
                topics::FORCE_POWER_USED,
                EventPayload::Force(ForceEvent {
                    entity: id,
                    power: attack.id.clone(),
                    cost,
                    remaining,
                }),
            ));
        }
        if !is_player {
            self.bus.queue(GameEvent::new(
                topics::ENEMY_ATTACK,
                EventPayload::Attack(AttackEvent {
                    entity: id,
                    attack_id: attack.id.clone(),
                }),
            ));
        }
        true
    }

    /// Aborts the entity's current attack and removes its hitboxes.
    pub fn cancel_attack(&mut self, id: EntityId) {
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.current = None;
            self.hitboxes.remove_owner_hitboxes(id);
        }
    }

    /// Sets the standing defense mode (dodge, force barrier, ...).
    pub fn set_defense_type(&mut self, id: EntityId, defense_type: DefenseType) {
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.stats.defense_type = defense_type;
            self.hitboxes.set_defense_type(id, defense_type);
        }
    }

    /// Toggles invulnerability; `duration_ms` of `None` lasts until cleared.
    pub fn set_invulnerable(&mut self, id: EntityId, invulnerable: bool, duration_ms: Option<f32>) {
        let now = self.clock.now_ms();
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        entity.invulnerable_until = invulnerable
            .then(|| duration_ms.map_or(f64::INFINITY, |d| now + f64::from(d)));
        self.hitboxes.set_invulnerable(id, invulnerable);
    }

    /// Whether the entity currently ignores hits.
    #[must_use]
    pub fn is_invulnerable(&self, id: EntityId) -> bool {
        self.entities
            .get(&id)
            .is_some_and(|e| e.invulnerable_until.is_some())
    }

    /// Raises the entity's guard.
    pub fn start_block(&mut self, id: EntityId) -> bool {
        if !self.is_alive(id) {
            return false;
        }
        self.blocks.start_block(id)
    }

    /// Lowers the entity's guard.
    pub fn end_block(&mut self, id: EntityId) {
        self.blocks.end_block(id);
    }

    /// Whether the entity's guard is up.
    #[must_use]
    pub fn is_blocking(&self, id: EntityId) -> bool {
        self.blocks.is_blocking(id)
    }

    /// Remaining block stamina.
    #[must_use]
    pub fn block_stamina(&self, id: EntityId) -> f32 {
        self.blocks.stamina(id)
    }

    /// Whether the entity may counter after a parry.
    #[must_use]
    pub fn is_in_counter_window(&self, id: EntityId) -> bool {
        self.blocks.is_in_counter_window(id)
    }

    /// Applies scripted damage (hazards, explosions). Returns damage applied.
    pub fn apply_damage(&mut self, id: EntityId, amount: f32, knockback: Option<Vec2>) -> f32 {
        let Some(entity) = self.entities.get_mut(&id) else {
            return 0.0;
        };
        if entity.dead || entity.invulnerable_until.is_some() {
            return 0.0;
        }
        let applied = entity.stats.apply_damage(amount);
        let remaining = entity.stats.health;
        let is_player = entity.is_player;
        self.queue_damage(None, id, applied, remaining, DamageKind::Normal, is_player);
        if let Some(velocity) = knockback {
            self.knockback
                .apply_direct_knockback(id, velocity, 200.0, 0.85, 0.0);
        }
        if remaining <= 0.0 {
            self.die(id, None);
        }
        applied
    }

    /// Kills an entity outright. Repeated calls have no further effect.
    pub fn kill(&mut self, id: EntityId) {
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.stats.health = 0.0;
        }
        self.die(id, None);
    }

    // ========================================================================
    // Per-tick
    // ========================================================================

    /// Resolves this tick's hits and advances every combat timer.
    pub fn update(&mut self, dt_ms: f32) {
        let now = self.clock.now_ms();

        for (id, entity) in &mut self.entities {
            if entity.invulnerable_until.is_some_and(|until| until <= now) {
                entity.invulnerable_until = None;
                self.hitboxes.set_invulnerable(*id, false);
            }
        }

        for hit in self.hitboxes.check_hits() {
            self.resolve_hit(&hit);
        }

        self.blocks.update(dt_ms);
        self.knockback.update(dt_ms);

        for (id, entity) in &mut self.entities {
            if let Some(pool) = entity.force.as_mut() {
                if pool.update(dt_ms) {
                    self.bus.queue(GameEvent::new(
                        topics::FORCE_RECHARGED,
                        EventPayload::Force(ForceEvent {
                            entity: *id,
                            power: String::new(),
                            cost: 0.0,
                            remaining: pool.energy,
                        }),
                    ));
                }
            }
            if entity.current.as_ref().is_some_and(|c| {
                attack_phase(&c.attack, (now - c.started_at) as f32).is_none()
            }) {
                entity.current = None;
            }
        }

        self.hitboxes.update();
    }

    fn resolve_hit(&mut self, hit: &HitResult) {
        let now = self.clock.now_ms();
        let (Some(attacker), Some(defender)) = (
            self.entities.get(&hit.attacker),
            self.entities.get(&hit.defender),
        ) else {
            return;
        };
        if attacker.dead || defender.dead {
            return;
        }
        let attacker_faction = attacker.stats.faction;
        let defender_faction = defender.stats.faction;
        if !self.config.friendly_fire && attacker_faction.is_allied_with(defender_faction) {
            return;
        }
        let attacker_stats = attacker.stats.clone();
        let mut defender_stats = defender.stats.clone();
        let attacker_pos = attacker.position;
        let defender_pos = defender.position;
        let defender_is_player = defender.is_player;
        let auto_block = defender.auto_block;
        let attack = &hit.attack;

        // Block / parry
        let mut outcome = self.blocks.process_block(
            hit.defender,
            hit.attacker,
            attack,
            attacker_faction,
            defender_faction,
        );
        let mut auto_effectiveness = None;
        if outcome.result == BlockResult::None {
            if let Some(profile) = auto_block {
                if self.rng.chance(profile.chance) {
                    auto_effectiveness = Some(profile.effectiveness.clamp(0.0, 1.0));
                    outcome = auto_block_outcome(attack);
                    self.bus.queue(GameEvent::new(
                        topics::COMBAT_BLOCK,
                        EventPayload::Block(BlockEvent {
                            defender: hit.defender,
                            attacker: Some(hit.attacker),
                            result: BlockResult::Block,
                            stamina: self.blocks.stamina(hit.defender),
                            damage_blocked: attack.damage * profile.effectiveness,
                        }),
                    ));
                }
            }
        }
        // A guarded hit is scaled from the undefended hit by the guard outcome;
        // otherwise the defender's standing defense picks the matrix column.
        let guarded = outcome.result.is_defended();
        defender_stats.defense_type = match outcome.result {
            BlockResult::None => match self.blocks.defense_type(hit.defender) {
                DefenseType::None => defender_stats.defense_type,
                other => other,
            },
            _ => DefenseType::None,
        };

        // Damage
        let mut charge = hit.charge_multiplier;
        if self.blocks.is_in_counter_window(hit.attacker) {
            charge *= self.blocks.counter_multiplier(hit.attacker);
            self.blocks.consume_counter(hit.attacker);
        }
        let combo_index = self.next_combo_index(hit.attacker, now);
        let crit_roll = roll_crit(&mut self.rng);
        let mut result = calculate_damage(
            attack,
            &attacker_stats,
            &defender_stats,
            combo_index,
            charge,
            crit_roll,
        );
        if guarded {
            result = apply_guard(result, &outcome, auto_effectiveness.unwrap_or(1.0));
        }

        let mut remaining_health = defender_stats.health;
        if let Some(defender) = self.entities.get_mut(&hit.defender) {
            if result.damage > 0.0 {
                defender.stats.apply_damage(result.damage);
            }
            remaining_health = defender.stats.health;
            if result.hitstun_ms > 0.0 {
                defender.hitstun_until = defender
                    .hitstun_until
                    .max(now + f64::from(result.hitstun_ms));
            }
        }
        let combo_count = combo_index + 1;

        // Stagger
        if outcome.result == BlockResult::Parry {
            self.add_stagger(hit.attacker, outcome.attacker_stagger, Some(hit.defender));
            if !defender_is_player {
                self.bus.queue(GameEvent::new(
                    topics::ENEMY_PARRY,
                    EventPayload::Block(BlockEvent {
                        defender: hit.defender,
                        attacker: Some(hit.attacker),
                        result: BlockResult::Parry,
                        stamina: self.blocks.stamina(hit.defender),
                        damage_blocked: outcome.damage_blocked,
                    }),
                ));
            }
        } else {
            let stagger = calculate_stagger_damage(attack, attacker_faction, guarded);
            self.add_stagger(hit.defender, stagger, Some(hit.attacker));
        }

        // Knockback
        if outcome.result != BlockResult::Parry && result.knockback > 0.0 {
            self.knockback.apply_knockback(
                hit.defender,
                defender_pos,
                attacker_pos,
                attack,
                attacker_faction,
                defender_faction,
                guarded,
            );
        }

        // Events
        debug!(
            "{} -> {}: {} {:.0} dmg ({:?}, combo {})",
            hit.attacker, hit.defender, attack.id, result.damage, outcome.result, combo_count
        );
        self.bus.queue(GameEvent::new(
            topics::COMBAT_HIT,
            EventPayload::Hit(HitEvent {
                attacker: hit.attacker,
                defender: hit.defender,
                attack_id: attack.id.clone(),
                position: hit.position,
            }),
        ));
        if result.damage > 0.0 {
            self.queue_damage(
                Some(hit.attacker),
                hit.defender,
                result.damage,
                remaining_health,
                result.kind,
                defender_is_player,
            );
        }
        self.bus.queue(GameEvent::new(
            topics::COMBAT_FEEDBACK,
            EventPayload::Feedback(FeedbackEvent {
                hit_position: hit.position,
                damage: result.damage,
                damage_kind: result.kind,
                hit_type: attack.attack_type,
                block: outcome.result,
                attacker_id: hit.attacker,
                defender_id: hit.defender,
                combo_count,
                hitstun_ms: result.hitstun_ms,
            }),
        ));

        if remaining_health <= 0.0 {
            self.die(hit.defender, Some(hit.attacker));
        }
    }

    fn next_combo_index(&mut self, attacker: EntityId, now: f64) -> u32 {
        let window = f64::from(self.config.combo_window_ms);
        let Some(entity) = self.entities.get_mut(&attacker) else {
            return 0;
        };
        if now - entity.last_combo_hit > window {
            entity.combo_count = 0;
        }
        let index = entity.combo_count;
        entity.combo_count = entity.combo_count.saturating_add(1);
        entity.last_combo_hit = now;
        index
    }

    fn add_stagger(&mut self, id: EntityId, amount: f32, source: Option<EntityId>) {
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        if entity.dead || !entity.stats.add_stagger(amount) {
            return;
        }
        debug!("{} posture broken", id);
        self.bus.queue(GameEvent::new(
            topics::COMBAT_STAGGER_BREAK,
            EventPayload::Stagger(StaggerEvent { entity: id, source }),
        ));
    }

    fn queue_damage(
        &self,
        attacker: Option<EntityId>,
        defender: EntityId,
        damage: f32,
        remaining_health: f32,
        kind: DamageKind,
        defender_is_player: bool,
    ) {
        let payload = EventPayload::Damage(DamageEvent {
            attacker,
            defender,
            damage,
            remaining_health,
            kind,
        });
        if !defender_is_player {
            self.bus
                .queue(GameEvent::new(topics::ENEMY_DAMAGED, payload.clone()));
        }
        self.bus.queue(GameEvent::new(topics::COMBAT_DAMAGE, payload));
    }

    fn die(&mut self, id: EntityId, killer: Option<EntityId>) {
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        if entity.dead {
            return;
        }
        entity.dead = true;
        entity.current = None;
        let faction = entity.stats.faction;
        let is_player = entity.is_player;
        self.hitboxes.remove_owner_hitboxes(id);
        self.hitboxes.set_invulnerable(id, true);
        self.blocks.end_block(id);

        info!("{} ({:?}) died", id, faction);
        let payload = EventPayload::Death(DeathEvent {
            entity: id,
            killer,
            faction,
        });
        self.bus
            .queue(GameEvent::new(topics::COMBAT_DEATH, payload.clone()));
        if !is_player {
            self.bus
                .queue(GameEvent::new(topics::ENEMY_DEATH, payload.clone()));
        }
        if faction == Faction::Boss {
            self.bus.queue(GameEvent::new(topics::BOSS_DEFEATED, payload));
        }
    }
}

impl CombatEntity {
    fn is_attacking(&self, now: f64) -> bool {
        self.current
            .as_ref()
            .is_some_and(|c| attack_phase(&c.attack, (now - c.started_at) as f32).is_some())
    }
}

/// Scales an undefended hit by a guard outcome. `effectiveness` below 1.0
/// lets part of the hit through.
fn apply_guard(mut hit: DamageResult, outcome: &BlockOutcome, effectiveness: f32) -> DamageResult {
    let keep = |multiplier: f32| 1.0 - (1.0 - multiplier) * effectiveness;
    let parried = outcome.result == BlockResult::Parry;
    hit.damage = if parried {
        0.0
    } else {
        (hit.damage * keep(outcome.damage_multiplier)).round().max(1.0)
    };
    hit.knockback *= keep(outcome.knockback_multiplier);
    hit.hitstun_ms *= if parried { 0.0 } else { keep(0.5) };
    hit.was_blocked = !parried;
    hit.was_parried = parried;
    hit.kind = DamageKind::Blocked;
    hit
}

fn auto_block_outcome(attack: &AttackData) -> BlockOutcome {
    BlockOutcome {
        result: BlockResult::Block,
        damage_blocked: attack.damage * 0.8,
        damage_multiplier: 0.2,
        knockback_multiplier: 0.3,
        attacker_stagger: 0.0,
        stamina_cost: 0.0,
        counter_window_active: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attack_data::AttackType;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Arena {
        clock: SimClock,
        bus: EventBus,
        combat: CombatManager,
    }

    const SITH: EntityId = EntityId::from_raw(1);
    const JEDI: EntityId = EntityId::from_raw(2);
    const TROOPER: EntityId = EntityId::from_raw(3);

    fn arena() -> Arena {
        let clock = SimClock::new();
        let bus = EventBus::with_clock(clock.clone());
        let combat = CombatManager::new(
            CombatConfig::default(),
            clock.clone(),
            bus.clone(),
            SimRng::new(1),
        );
        Arena { clock, bus, combat }
    }

    fn plain(faction: Faction) -> CombatStats {
        CombatStats {
            faction,
            health: 500.0,
            max_health: 500.0,
            ..CombatStats::default()
        }
    }

    fn duel(a: &mut Arena) {
        a.combat.register_entity(SITH, plain(Faction::Sith), true, Vec2::ZERO, Vec2::new(32.0, 48.0));
        a.combat.register_entity(JEDI, plain(Faction::Jedi), false, Vec2::new(50.0, 0.0), Vec2::new(32.0, 48.0));
    }

    fn record(bus: &EventBus, topic: &str) -> Rc<RefCell<Vec<GameEvent>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        bus.on(topic, 0, move |e| l.borrow_mut().push(e.clone()));
        log
    }

    /// Advances until the attack's active window and resolves.
    fn run(a: &mut Arena, ms: f64) {
        let steps = (ms / 10.0) as usize;
        for _ in 0..steps {
            a.clock.advance(10.0);
            a.combat.update(10.0);
        }
        a.bus.flush();
    }

    #[test]
    fn test_light_hit_resolves_once() {
        let mut a = arena();
        duel(&mut a);
        let feedback = record(&a.bus, topics::COMBAT_FEEDBACK);

        assert!(a.combat.start_attack(SITH, "light_1"));
        run(&mut a, 400.0);

        let events = feedback.borrow();
        assert_eq!(events.len(), 1);
        let EventPayload::Feedback(f) = &events[0].payload else {
            panic!("wrong payload");
        };
        assert_eq!(f.damage, 100.0);
        assert_eq!(f.combo_count, 1);
        assert_eq!(f.block, BlockResult::None);
        assert_eq!(a.combat.stats(JEDI).map(|s| s.health), Some(400.0));
        assert!(!a.combat.is_attacking(SITH));
    }

    #[test]
    fn test_start_attack_rejections() {
        let mut a = arena();
        duel(&mut a);
        assert!(!a.combat.start_attack(SITH, "no_such_move"));
        assert!(!a.combat.start_attack(EntityId::from_raw(99), "light_1"));

        assert!(a.combat.start_attack(SITH, "light_1"));
        assert!(!a.combat.start_attack(SITH, "heavy_2"), "busy, not a cancel route");
        assert!(!a.combat.start_attack(SITH, "light_2"), "startup cannot cancel");

        a.clock.advance(100.0);
        assert!(a.combat.start_attack(SITH, "light_2"), "active window cancels into chain");

        // No Force pool registered
        let mut b = arena();
        duel(&mut b);
        assert!(!b.combat.start_attack(SITH, "force_push"));
        b.combat.set_force_pool(SITH, ForcePool::new(30.0, 0.0, 0.0));
        assert!(b.combat.start_attack(SITH, "force_push"));
        b.clock.advance(2000.0);
        b.combat.update(10.0);
        assert!(!b.combat.start_attack(SITH, "force_push"), "only 5 energy left");
    }

    #[test]
    fn test_cooldown_blocks_restart() {
        let mut a = arena();
        duel(&mut a);
        assert!(a.combat.start_attack(SITH, "rising_slash"));
        a.clock.advance(700.0);
        a.combat.update(10.0);
        assert!(!a.combat.start_attack(SITH, "rising_slash"));
        assert!(a.combat.cooldown_remaining(SITH, "rising_slash") > 0.0);
        a.clock.advance(1300.0);
        assert!(a.combat.start_attack(SITH, "rising_slash"));
    }

    #[test]
    fn test_parry_staggers_attacker_and_negates() {
        let mut a = arena();
        duel(&mut a);
        let parries = record(&a.bus, topics::ENEMY_PARRY);
        assert!(a.combat.start_attack(SITH, "light_1"));
        a.clock.advance(70.0);
        assert!(a.combat.start_block(JEDI));
        run(&mut a, 200.0);

        assert_eq!(a.combat.stats(JEDI).map(|s| s.health), Some(500.0));
        assert_eq!(parries.borrow().len(), 1);
        assert!(a.combat.stats(SITH).is_some_and(|s| s.stagger > 0.0));
    }

    #[test]
    fn test_allies_do_not_hit_each_other() {
        let mut a = arena();
        duel(&mut a);
        a.combat.register_entity(TROOPER, plain(Faction::Imperial), false, Vec2::new(40.0, 0.0), Vec2::new(32.0, 48.0));
        assert!(a.combat.start_attack(SITH, "light_1"));
        run(&mut a, 400.0);
        assert_eq!(a.combat.stats(TROOPER).map(|s| s.health), Some(500.0));
        assert!(a.combat.stats(JEDI).is_some_and(|s| s.health < 500.0));
    }

    #[test]
    fn test_death_is_idempotent() {
        let mut a = arena();
        duel(&mut a);
        let deaths = record(&a.bus, topics::ENEMY_DEATH);
        a.combat.apply_damage(JEDI, 1000.0, None);
        a.combat.apply_damage(JEDI, 1000.0, None);
        a.combat.kill(JEDI);
        a.bus.flush();
        assert_eq!(deaths.borrow().len(), 1);
        assert!(!a.combat.is_alive(JEDI));
        assert!(!a.combat.start_attack(JEDI, "jedi_slash_1"));
    }

    #[test]
    fn test_invulnerability_expires() {
        let mut a = arena();
        duel(&mut a);
        a.combat.set_invulnerable(JEDI, true, Some(100.0));
        assert_eq!(a.combat.apply_damage(JEDI, 10.0, None), 0.0);
        a.clock.advance(100.0);
        a.combat.update(10.0);
        assert!(!a.combat.is_invulnerable(JEDI));
        assert_eq!(a.combat.apply_damage(JEDI, 10.0, None), 10.0);
    }

    #[test]
    fn test_combo_counter_and_window() {
        let mut a = arena();
        duel(&mut a);
        assert!(a.combat.start_attack(SITH, "light_1"));
        run(&mut a, 200.0);
        assert_eq!(a.combat.combo_count(SITH), 1);
        assert!(a.combat.start_attack(SITH, "light_2"));
        run(&mut a, 200.0);
        assert_eq!(a.combat.combo_count(SITH), 2);
        a.clock.advance(1500.0);
        assert_eq!(a.combat.combo_count(SITH), 0);
    }

    #[test]
    fn test_full_auto_block_matches_manual_block_damage() {
        let mut a = arena();
        duel(&mut a);
        a.combat.set_auto_block(JEDI, Some(AutoBlockProfile { chance: 1.0, effectiveness: 1.0 }));
        assert!(a.combat.start_attack(SITH, "light_1"));
        run(&mut a, 300.0);
        // 50 x 2.0 x 0.2
        assert_eq!(a.combat.stats(JEDI).map(|s| s.health), Some(480.0));
    }

    // (attack, attack type, startup ms, damage after 2.0 Sith vs Jedi and 0.2 guard)
    const GUARD_TABLE: [(&str, AttackType, f64, f32); 4] = [
        ("light_1", AttackType::Light, 80.0, 20.0),
        ("heavy_1", AttackType::Heavy, 300.0, 48.0),
        ("rising_slash", AttackType::Special, 150.0, 36.0),
        ("force_push", AttackType::ForcePower, 200.0, 24.0),
    ];

    fn guard_duel() -> (Arena, Rc<RefCell<Vec<GameEvent>>>) {
        let mut a = arena();
        duel(&mut a);
        a.combat.set_force_pool(SITH, ForcePool::new(100.0, 0.0, 0.0));
        let feedback = record(&a.bus, topics::COMBAT_FEEDBACK);
        (a, feedback)
    }

    fn only_feedback(log: &Rc<RefCell<Vec<GameEvent>>>) -> FeedbackEvent {
        let events = log.borrow();
        assert_eq!(events.len(), 1);
        match &events[0].payload {
            EventPayload::Feedback(f) => f.clone(),
            other => panic!("wrong payload {other:?}"),
        }
    }

    #[test]
    fn test_parry_negates_every_attack_type() {
        for (attack, attack_type, startup, _) in GUARD_TABLE {
            let (mut a, feedback) = guard_duel();
            assert!(a.combat.start_attack(SITH, attack), "{attack}");
            a.clock.advance(startup - 50.0);
            assert!(a.combat.start_block(JEDI));
            run(&mut a, 300.0);

            let f = only_feedback(&feedback);
            assert_eq!(f.hit_type, attack_type);
            assert_eq!(f.block, BlockResult::Parry, "{attack}");
            assert_eq!(f.damage, 0.0, "{attack}");
            assert_eq!(f.hitstun_ms, 0.0, "{attack}");
            assert_eq!(a.combat.stats(JEDI).map(|s| s.health), Some(500.0), "{attack}");
            assert!(!a.combat.is_knocked_back(JEDI), "{attack}");
            assert!(a.combat.stats(SITH).is_some_and(|s| s.stagger > 0.0), "{attack}");
        }
    }

    #[test]
    fn test_block_absorbs_eighty_percent_of_every_attack_type() {
        for (attack, attack_type, _, expected) in GUARD_TABLE {
            let (mut a, feedback) = guard_duel();
            assert!(a.combat.start_block(JEDI));
            a.clock.advance(200.0);
            assert!(a.combat.start_attack(SITH, attack), "{attack}");
            run(&mut a, 400.0);

            let f = only_feedback(&feedback);
            let guard = if attack_type == AttackType::ForcePower {
                BlockResult::Deflect
            } else {
                BlockResult::Block
            };
            assert_eq!(f.block, guard, "{attack}");
            assert_eq!(f.damage, expected, "{attack}");
            assert_eq!(f.damage_kind, DamageKind::Blocked);
            assert_eq!(a.combat.stats(JEDI).map(|s| s.health), Some(500.0 - expected), "{attack}");
        }
    }

    #[test]
    fn test_manual_block_of_heavy_keeps_twenty_percent() {
        let (mut a, _) = guard_duel();
        assert!(a.combat.start_block(JEDI));
        a.clock.advance(200.0);
        assert!(a.combat.start_attack(SITH, "heavy_1"));
        run(&mut a, 400.0);
        // 120 x 2.0 x 0.2
        assert_eq!(a.combat.stats(JEDI).map(|s| s.health), Some(452.0));
        assert!(a.combat.block_stamina(JEDI) < BlockConfig::default().max_stamina);
    }

    #[test]
    fn test_partial_auto_block_leaks_damage() {
        let mut a = arena();
        duel(&mut a);
        a.combat.set_auto_block(JEDI, Some(AutoBlockProfile { chance: 1.0, effectiveness: 0.5 }));
        assert!(a.combat.start_attack(SITH, "light_1"));
        run(&mut a, 300.0);
        // 100 x (1 - 0.8 x 0.5)
        assert_eq!(a.combat.stats(JEDI).map(|s| s.health), Some(440.0));
    }

    #[test]
    fn test_hitstun_and_knockback_after_hit() {
        let mut a = arena();
        duel(&mut a);
        assert!(a.combat.start_attack(SITH, "light_1"));
        a.clock.advance(80.0);
        a.combat.update(0.0);
        assert!(a.combat.is_stunned(JEDI));
        assert!(a.combat.knockback_velocity(JEDI).x > 0.0);
        assert!(!a.combat.start_attack(JEDI, "jedi_slash_1"));
    }
}
