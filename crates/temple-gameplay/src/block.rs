//! Block, parry and guard-break resolution.
//!
//! Blocking drains stamina per absorbed hit. A hit that lands inside the
//! defender faction's parry window (measured from block start) becomes a
//! parry instead: full damage negated, stagger sent back to the attacker and a
//! short counter window opened for the defender.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use temple_common::{EntityId, SimClock};
use tracing::debug;

use crate::attack_data::{AttackData, AttackType};
use crate::combat_stats::DefenseType;
use crate::events::{topics, BlockEvent, EventBus, EventPayload, GameEvent};
use crate::faction::Faction;

/// Block tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockConfig {
    /// Stamina pool size
    pub max_stamina: f32,
    /// Stamina regained per second while not blocking
    pub stamina_regen_per_sec: f32,
    /// Fraction of the normal stamina cost charged for a parry
    pub parry_cost_fraction: f32,
    /// Damage removed by a successful block (0..1)
    pub damage_reduction: f32,
    /// Knockback removed by a successful block (0..1)
    pub knockback_reduction: f32,
    /// Stagger dealt back to an attacker who gets parried
    pub parry_stagger: f32,
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            max_stamina: 100.0,
            stamina_regen_per_sec: 20.0,
            parry_cost_fraction: 0.2,
            damage_reduction: 0.8,
            knockback_reduction: 0.7,
            parry_stagger: 40.0,
        }
    }
}

/// Stamina spent blocking one attack of this type.
#[must_use]
pub const fn stamina_cost(attack_type: AttackType) -> f32 {
    match attack_type {
        AttackType::Light => 10.0,
        AttackType::Heavy => 25.0,
        AttackType::Special => 20.0,
        AttackType::ForcePower => 30.0,
    }
}

/// How a hit interacted with the defender's guard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockResult {
    /// Not blocking
    #[default]
    None,
    /// Absorbed
    Block,
    /// Perfect timing
    Parry,
    /// Stamina ran out
    GuardBreak,
    /// Force power or blaster bolt turned aside
    Deflect,
}

impl BlockResult {
    /// Whether the guard held.
    #[must_use]
    pub const fn is_defended(self) -> bool {
        matches!(self, Self::Block | Self::Parry | Self::Deflect)
    }
}

/// Details of one processed block.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockOutcome {
    /// Outcome
    pub result: BlockResult,
    /// Damage absorbed
    pub damage_blocked: f32,
    /// Fraction of damage still applied
    pub damage_multiplier: f32,
    /// Fraction of knockback still applied
    pub knockback_multiplier: f32,
    /// Stagger inflicted on the attacker
    pub attacker_stagger: f32,
    /// Stamina spent
    pub stamina_cost: f32,
    /// A counter window opened for the defender
    pub counter_window_active: bool,
}

impl BlockOutcome {
    fn unblocked() -> Self {
        Self {
            result: BlockResult::None,
            damage_blocked: 0.0,
            damage_multiplier: 1.0,
            knockback_multiplier: 1.0,
            attacker_stagger: 0.0,
            stamina_cost: 0.0,
            counter_window_active: false,
        }
    }
}

/// Per-entity guard state.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockState {
    /// Defender faction (selects the parry profile)
    pub faction: Faction,
    /// Guard raised
    pub is_blocking: bool,
    /// When the guard was raised (ms)
    pub block_start: f64,
    /// Remaining stamina
    pub stamina: f32,
    /// Post-parry counter window open
    pub counter_window_active: bool,
    /// Counter window closes at (ms)
    pub counter_window_end: f64,
    /// Last successful parry (ms)
    pub last_parry: Option<f64>,
    /// Current defense mode
    pub defense_type: DefenseType,
}

/// Guard state for every registered entity.
#[derive(Debug)]
pub struct BlockSystem {
    config: BlockConfig,
    clock: SimClock,
    bus: EventBus,
    states: BTreeMap<EntityId, BlockState>,
}

impl BlockSystem {
    /// Creates a block system.
    #[must_use]
    pub fn new(config: BlockConfig, clock: SimClock, bus: EventBus) -> Self {
        Self {
            config,
            clock,
            bus,
            states: BTreeMap::new(),
        }
    }

    /// Tuning in use.
    #[must_use]
    pub fn config(&self) -> &BlockConfig {
        &self.config
    }

    /// Starts tracking an entity with a full stamina bar.
    pub fn register(&mut self, entity: EntityId, faction: Faction) {
        self.states.insert(
            entity,
            BlockState {
                faction,
                is_blocking: false,
                block_start: 0.0,
                stamina: self.config.max_stamina,
                counter_window_active: false,
                counter_window_end: 0.0,
                last_parry: None,
                defense_type: DefenseType::None,
            },
        );
    }

    /// Stops tracking an entity.
    pub fn unregister(&mut self, entity: EntityId) {
        self.states.remove(&entity);
    }

    /// Guard state of an entity.
    #[must_use]
    pub fn state(&self, entity: EntityId) -> Option<&BlockState> {
        self.states.get(&entity)
    }

    /// Whether an entity's guard is up.
    #[must_use]
    pub fn is_blocking(&self, entity: EntityId) -> bool {
        self.states.get(&entity).is_some_and(|s| s.is_blocking)
    }

    /// Remaining stamina (0 for unknown entities).
    #[must_use]
    pub fn stamina(&self, entity: EntityId) -> f32 {
        self.states.get(&entity).map_or(0.0, |s| s.stamina)
    }

    /// Current defense mode (None for unknown entities).
    #[must_use]
    pub fn defense_type(&self, entity: EntityId) -> DefenseType {
        self.states
            .get(&entity)
            .map_or(DefenseType::None, |s| s.defense_type)
    }

    /// Raises the guard. Fails without side effects when stamina is empty.
    pub fn start_block(&mut self, entity: EntityId) -> bool {
        let now = self.clock.now_ms();
        let Some(state) = self.states.get_mut(&entity) else {
            return false;
        };
        if state.stamina <= 0.0 {
            return false;
        }
        if state.is_blocking {
            return true;
        }
        state.is_blocking = true;
        state.block_start = now;
        if !state.counter_window_active {
            state.defense_type = DefenseType::Block;
        }
        let stamina = state.stamina;
        self.emit(topics::COMBAT_BLOCK_START, entity, None, BlockResult::None, stamina, 0.0);
        true
    }

    /// Lowers the guard.
    pub fn end_block(&mut self, entity: EntityId) {
        let Some(state) = self.states.get_mut(&entity) else {
            return;
        };
        if !state.is_blocking {
            return;
        }
        state.is_blocking = false;
        if !state.counter_window_active {
            state.defense_type = DefenseType::None;
        }
        let stamina = state.stamina;
        self.emit(topics::COMBAT_BLOCK_END, entity, None, BlockResult::None, stamina, 0.0);
    }

    /// Resolves an incoming attack against the defender's guard.
    pub fn process_block(
        &mut self,
        defender: EntityId,
        attacker: EntityId,
        attack: &AttackData,
        attacker_faction: Faction,
        defender_faction: Faction,
    ) -> BlockOutcome {
        let now = self.clock.now_ms();
        let config = &self.config;
        let Some(state) = self.states.get_mut(&defender) else {
            return BlockOutcome::unblocked();
        };
        if !state.is_blocking {
            return BlockOutcome::unblocked();
        }

        let profile = defender_faction.parry_profile();
        let block_duration = (now - state.block_start) as f32;
        let parry_ready = state
            .last_parry
            .map_or(true, |last| now - last >= f64::from(profile.cooldown_ms));
        let full_cost = stamina_cost(attack.attack_type);

        let outcome = if profile.in_window(block_duration) && parry_ready {
            let cost = full_cost * config.parry_cost_fraction;
            state.stamina = (state.stamina - cost).max(0.0);
            state.last_parry = Some(now);
            state.counter_window_active = true;
            state.counter_window_end = now + f64::from(profile.counter_window_ms);
            state.defense_type = DefenseType::Parry;
            BlockOutcome {
                result: BlockResult::Parry,
                damage_blocked: attack.damage,
                damage_multiplier: 0.0,
                knockback_multiplier: 0.0,
                attacker_stagger: config.parry_stagger,
                stamina_cost: cost,
                counter_window_active: true,
            }
        } else if full_cost > state.stamina {
            state.stamina = 0.0;
            state.is_blocking = false;
            state.defense_type = DefenseType::None;
            BlockOutcome {
                stamina_cost: full_cost,
                result: BlockResult::GuardBreak,
                ..BlockOutcome::unblocked()
            }
        } else {
            state.stamina -= full_cost;
            let result = if attack.attack_type == AttackType::ForcePower || attack.ranged {
                BlockResult::Deflect
            } else {
                BlockResult::Block
            };
            BlockOutcome {
                result,
                damage_blocked: attack.damage * config.damage_reduction,
                damage_multiplier: 1.0 - config.damage_reduction,
                knockback_multiplier: 1.0 - config.knockback_reduction,
                attacker_stagger: 0.0,
                stamina_cost: full_cost,
                counter_window_active: false,
            }
        };

        let stamina = state.stamina;
        debug!(
            "{} vs {} ({:?} -> {:?}): {:?}, stamina {:.0}",
            defender, attacker, attacker_faction, defender_faction, outcome.result, stamina
        );
        let topic = match outcome.result {
            BlockResult::Parry => topics::COMBAT_PARRY_SUCCESS,
            BlockResult::GuardBreak => topics::COMBAT_GUARD_BREAK,
            _ => topics::COMBAT_BLOCK_SUCCESS,
        };
        self.emit(
            topic,
            defender,
            Some(attacker),
            outcome.result,
            stamina,
            outcome.damage_blocked,
        );
        outcome
    }

    /// Whether the entity may counter-attack after a parry.
    #[must_use]
    pub fn is_in_counter_window(&self, entity: EntityId) -> bool {
        let now = self.clock.now_ms();
        self.states
            .get(&entity)
            .is_some_and(|s| s.counter_window_active && now < s.counter_window_end)
    }

    /// Damage multiplier for the entity's next hit (1.0 outside a counter window).
    #[must_use]
    pub fn counter_multiplier(&self, entity: EntityId) -> f32 {
        if !self.is_in_counter_window(entity) {
            return 1.0;
        }
        self.states
            .get(&entity)
            .map_or(1.0, |s| s.faction.parry_profile().counter_multiplier)
    }

    /// Closes a counter window early (the counter was used).
    pub fn consume_counter(&mut self, entity: EntityId) {
        if let Some(state) = self.states.get_mut(&entity) {
            close_counter_window(state);
        }
    }

    /// Regenerates stamina for idle guards and expires counter windows.
    pub fn update(&mut self, dt_ms: f32) {
        let now = self.clock.now_ms();
        let regen = self.config.stamina_regen_per_sec * dt_ms / 1000.0;
        let max = self.config.max_stamina;
        for state in self.states.values_mut() {
            if !state.is_blocking {
                state.stamina = (state.stamina + regen).min(max);
            }
            if state.counter_window_active && now >= state.counter_window_end {
                close_counter_window(state);
            }
        }
    }

    fn emit(
        &self,
        topic: &str,
        defender: EntityId,
        attacker: Option<EntityId>,
        result: BlockResult,
        stamina: f32,
        damage_blocked: f32,
    ) {
        let payload = EventPayload::Block(BlockEvent {
            defender,
            attacker,
            result,
            stamina,
            damage_blocked,
        });
        self.bus.emit(GameEvent::new(topic, payload.clone()));
        if attacker.is_some() {
            self.bus.emit(GameEvent::new(topics::COMBAT_BLOCK, payload));
        }
    }
}

fn close_counter_window(state: &mut BlockState) {
    state.counter_window_active = false;
    state.defense_type = if state.is_blocking {
        DefenseType::Block
    } else {
        DefenseType::None
    };
}
