//! Enemy behaviour core.
//!
//! Every non-player combatant runs the same state topology on the generic
//! [`StateMachine`]:
//!
//! ```text
//! Idle → Alert → Chase → Attack ⇄ Block / Staggered / Hitstun / Retreat → Dead
//! ```
//!
//! Archetypes plug in through [`EnemyBrain`], a strategy object that picks
//! attacks, drives chase movement and reacts to damage. The machine's context
//! is an [`EnemyContext`]: the shared [`EnemyCore`] plus the brain.
//!
//! Enemies never touch the [`CombatManager`] from inside state hooks. Hooks
//! push [`CombatCommand`]s into the core's outbox; [`Enemy`] applies them
//! after the machine has run. Reactions to combat (hits, stagger breaks,
//! blocks, death) arrive through bus listeners into an inbox and are folded
//! into the core at the start of the next update.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use temple_common::{direction_or_zero, distance_or_infinity, EntityId, SimClock, SimRng, Vec2};
use tracing::debug;

use crate::attack_data::{attack_duration, get_attack_data};
use crate::behavior::BehaviorSet;
use crate::block::BlockResult;
use crate::body::{Body, KinematicBody};
use crate::combat::{AutoBlockProfile, CombatManager};
use crate::combat_stats::DefenseType;
use crate::events::{topics, EventBus, EventPayload, ListenerId};
use crate::faction::Faction;
use crate::squad::FormationRole;
use crate::state_machine::{State, StateMachine, Transition};

// ============================================================================
// States and commands
// ============================================================================

/// States shared by every enemy archetype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CombatState {
    /// No target in range
    Idle,
    /// Target spotted, reacting
    Alert,
    /// Closing in / positioning
    Chase,
    /// Executing an attack
    Attack,
    /// Guard raised
    Block,
    /// Posture broken
    Staggered,
    /// Reeling from a hit
    Hitstun,
    /// Falling back
    Retreat,
    /// Dead
    Dead,
}

impl CombatState {
    /// Display name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Alert => "alert",
            Self::Chase => "chase",
            Self::Attack => "attack",
            Self::Block => "block",
            Self::Staggered => "staggered",
            Self::Hitstun => "hitstun",
            Self::Retreat => "retreat",
            Self::Dead => "dead",
        }
    }
}

/// Request from an entity's logic to the combat manager.
#[derive(Debug, Clone, PartialEq)]
pub enum CombatCommand {
    /// Start an attack by id
    StartAttack(String),
    /// Start a charged attack by id, released after the given hold (ms)
    StartChargedAttack(String, f32),
    /// Abort the current attack
    CancelAttack,
    /// Raise guard
    StartBlock,
    /// Lower guard
    EndBlock,
    /// Toggle invulnerability for an optional duration (ms)
    SetInvulnerable(bool, Option<f32>),
    /// Change standing defense mode
    SetDefenseType(DefenseType),
    /// Multiply attack power
    ScaleAttackPower(f32),
}

/// Applies one command. Returns false when an attack start was refused.
pub(crate) fn apply_command(combat: &mut CombatManager, id: EntityId, command: &CombatCommand) -> bool {
    match command {
        CombatCommand::StartAttack(attack) => return combat.start_attack(id, attack),
        CombatCommand::StartChargedAttack(attack, held_ms) => {
            return combat.start_charged_attack(id, attack, *held_ms)
        }
        CombatCommand::CancelAttack => combat.cancel_attack(id),
        CombatCommand::StartBlock => {
            combat.start_block(id);
        }
        CombatCommand::EndBlock => combat.end_block(id),
        CombatCommand::SetInvulnerable(on, duration) => combat.set_invulnerable(id, *on, *duration),
        CombatCommand::SetDefenseType(defense) => combat.set_defense_type(id, *defense),
        CombatCommand::ScaleAttackPower(factor) => {
            if let Some(stats) = combat.stats_mut(id) {
                stats.attack_power *= factor;
            }
        }
    }
    true
}

// ============================================================================
// Configuration
// ============================================================================

/// Per-archetype tuning shared by the state topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnemyConfig {
    /// Distance at which a target is noticed (px)
    pub detection_range: f32,
    /// Distance at which a target is given up (px)
    pub lose_range: f32,
    /// Distance from which attacks are started (px)
    pub attack_range: f32,
    /// Movement speed (px/s)
    pub move_speed: f32,
    /// Pause between attacks (ms)
    pub attack_cooldown_ms: f32,
    /// Reaction time after spotting a target (ms)
    pub alert_delay_ms: f32,
    /// How long a deliberate block is held (ms)
    pub block_duration_ms: f32,
    /// Length of the stagger state (ms)
    pub stagger_duration_ms: f32,
    /// Length of the retreat state (ms)
    pub retreat_duration_ms: f32,
    /// Hurtbox size (px)
    pub size: Vec2,
}

impl Default for EnemyConfig {
    fn default() -> Self {
        Self {
            detection_range: 350.0,
            lose_range: 700.0,
            attack_range: 70.0,
            move_speed: 110.0,
            attack_cooldown_ms: 900.0,
            alert_delay_ms: 300.0,
            block_duration_ms: 500.0,
            stagger_duration_ms: 1200.0,
            retreat_duration_ms: 1500.0,
            size: Vec2::new(32.0, 48.0),
        }
    }
}

impl EnemyConfig {
    /// Clone trooper: long range, fragile.
    #[must_use]
    pub fn trooper() -> Self {
        Self {
            detection_range: 450.0,
            attack_range: 320.0,
            move_speed: 100.0,
            attack_cooldown_ms: 1200.0,
            ..Self::default()
        }
    }

    /// Jedi defender: quick duelist.
    #[must_use]
    pub fn defender() -> Self {
        Self {
            attack_range: 65.0,
            move_speed: 140.0,
            attack_cooldown_ms: 700.0,
            alert_delay_ms: 200.0,
            ..Self::default()
        }
    }

    /// Temple guard: pike reach, slow.
    #[must_use]
    pub fn temple_guard() -> Self {
        Self {
            attack_range: 95.0,
            move_speed: 90.0,
            attack_cooldown_ms: 1200.0,
            block_duration_ms: 700.0,
            size: Vec2::new(36.0, 56.0),
            ..Self::default()
        }
    }

    /// Boss duelist.
    #[must_use]
    pub fn boss() -> Self {
        Self {
            detection_range: 600.0,
            lose_range: 2000.0,
            attack_range: 80.0,
            move_speed: 130.0,
            attack_cooldown_ms: 800.0,
            alert_delay_ms: 500.0,
            stagger_duration_ms: 800.0,
            size: Vec2::new(40.0, 60.0),
            ..Self::default()
        }
    }
}

// ============================================================================
// Core
// ============================================================================

/// What an enemy knows about itself and its target this tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Perception {
    /// Own health fraction
    pub health_fraction: f32,
    /// Own attack still running
    pub is_attacking: bool,
    /// Own stun from knockback or hitstun
    pub is_stunned: bool,
    /// Knockback currently moving this entity
    pub knocked_back: bool,
    /// Knockback velocity (px/s)
    pub knockback_velocity: Vec2,
    /// Post-parry counter window open
    pub in_counter_window: bool,
    /// Force energy (0 without a pool)
    pub force_energy: f32,
    /// Block stamina
    pub stamina: f32,
    /// Target position, `None` without a living target
    pub target_position: Option<Vec2>,
    /// Target mid-attack
    pub target_attacking: bool,
    /// Target guarding
    pub target_blocking: bool,
    /// Remaining cooldown per attack id (ms)
    pub cooldowns: BTreeMap<String, f32>,
    /// Positions of watched allies / protectees
    pub watched: BTreeMap<EntityId, Vec2>,
}

impl Perception {
    /// Whether `attack_id` is off cooldown.
    #[must_use]
    pub fn is_ready(&self, attack_id: &str) -> bool {
        self.cooldowns.get(attack_id).map_or(true, |r| *r <= 0.0)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Reaction {
    Hit {
        damage: f32,
        hitstun_ms: f32,
        block: BlockResult,
    },
    StaggerBreak,
    Blocked(BlockResult),
    Died,
}

/// Shared enemy state handed to hooks, conditions, brains and behaviours.
#[derive(Debug)]
pub struct EnemyCore {
    /// Entity id
    pub id: EntityId,
    /// Faction
    pub faction: Faction,
    /// Tuning
    pub config: EnemyConfig,
    /// Movement body
    pub body: KinematicBody,
    /// Per-entity random stream
    pub rng: SimRng,
    /// Bus for archetype events
    pub bus: EventBus,
    /// Time of the current tick (ms)
    pub now: f64,
    /// Current target
    pub target: Option<EntityId>,
    /// Perception snapshot
    pub perception: Perception,
    /// Slot assigned by the squad
    pub formation_slot: Option<Vec2>,
    /// Movement speed scale set by the brain
    pub speed_multiplier: f32,
    /// Earliest time the next attack may start
    pub attack_ready_at: f64,
    /// No actions before this time
    pub action_locked_until: f64,
    /// Last time Retreat was entered
    pub last_retreat_at: Option<f64>,
    /// Brain asks to block
    pub wants_block: bool,
    /// Brain asks to retreat
    pub wants_retreat: bool,
    /// Dead
    pub dead: bool,
    /// Posture broken since the last tick
    pub stagger_broken: bool,
    /// Behaviours run while idle or chasing
    pub behaviors: BehaviorSet,
    pending_hitstun_ms: f32,
    hitstun_remaining_ms: f32,
    attack_lock_ms: f32,
    attack_failed: bool,
    current_attack: Option<String>,
    outbox: Vec<CombatCommand>,
}

impl EnemyCore {
    /// Creates a core at `position`.
    #[must_use]
    pub fn new(
        id: EntityId,
        faction: Faction,
        config: EnemyConfig,
        position: Vec2,
        rng: SimRng,
        bus: EventBus,
    ) -> Self {
        let body = KinematicBody::new(position, config.size);
        Self {
            id,
            faction,
            config,
            body,
            rng,
            bus,
            now: 0.0,
            target: None,
            perception: Perception {
                health_fraction: 1.0,
                ..Perception::default()
            },
            formation_slot: None,
            speed_multiplier: 1.0,
            attack_ready_at: 0.0,
            action_locked_until: 0.0,
            last_retreat_at: None,
            wants_block: false,
            wants_retreat: false,
            dead: false,
            stagger_broken: false,
            behaviors: BehaviorSet::default(),
            pending_hitstun_ms: 0.0,
            hitstun_remaining_ms: 0.0,
            attack_lock_ms: 0.0,
            attack_failed: false,
            current_attack: None,
            outbox: Vec::new(),
        }
    }

    /// Position.
    #[must_use]
    pub fn position(&self) -> Vec2 {
        self.body.position
    }

    /// Distance to the target, infinite without one.
    #[must_use]
    pub fn distance_to_target(&self) -> f32 {
        distance_or_infinity(self.body.position, self.perception.target_position)
    }

    /// Unit direction to the target, zero without one.
    #[must_use]
    pub fn direction_to_target(&self) -> Vec2 {
        direction_or_zero(self.body.position, self.perception.target_position)
    }

    /// Whether a living target is known.
    #[must_use]
    pub fn has_target(&self) -> bool {
        self.perception.target_position.is_some()
    }

    /// Whether the target is within attack range.
    #[must_use]
    pub fn in_attack_range(&self) -> bool {
        self.distance_to_target() <= self.config.attack_range
    }

    /// Whether an action lock is running.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.now < self.action_locked_until
    }

    /// Whether a new attack may start now.
    #[must_use]
    pub fn can_attack(&self) -> bool {
        !self.dead && self.has_target() && !self.is_locked() && self.now >= self.attack_ready_at
    }

    /// Locks out every action for `ms`.
    pub fn lock_actions(&mut self, ms: f32) {
        self.action_locked_until = self.action_locked_until.max(self.now + f64::from(ms));
    }

    /// Effective movement speed (px/s).
    #[must_use]
    pub fn speed(&self) -> f32 {
        self.config.move_speed * self.speed_multiplier
    }

    /// Attack started on entering the Attack state, if any.
    #[must_use]
    pub fn current_attack(&self) -> Option<&str> {
        self.current_attack.as_deref()
    }

    /// Queues a command for the combat manager.
    pub fn command(&mut self, command: CombatCommand) {
        self.outbox.push(command);
    }

    /// Queues an attack and holds the Attack state for its duration.
    pub fn start_attack(&mut self, attack_id: &str) {
        let duration = get_attack_data(attack_id).map_or(0.0, |a| attack_duration(&a));
        self.attack_lock_ms = self.attack_lock_ms.max(duration);
        self.current_attack = Some(attack_id.to_owned());
        self.command(CombatCommand::StartAttack(attack_id.to_owned()));
    }

    /// Keeps the Attack state alive for at least `ms` after entry.
    pub fn extend_attack_lock(&mut self, ms: f32) {
        self.attack_lock_ms = self.attack_lock_ms.max(ms);
    }

    /// Turns toward the target.
    pub fn face_target(&mut self) {
        if let Some(target) = self.perception.target_position {
            self.body.face_towards(target);
        }
    }

    /// Moves toward `point` at `speed_scale` × speed; stops inside 4 px.
    pub fn move_towards(&mut self, point: Vec2, speed_scale: f32) {
        let offset = point - self.body.position;
        if offset.length() < 4.0 {
            self.stop();
            return;
        }
        self.body
            .set_velocity(offset.normalize_or_zero() * self.speed() * speed_scale);
        self.body.face_towards(point);
    }

    /// Moves directly away from `point`.
    pub fn move_away_from(&mut self, point: Vec2, speed_scale: f32) {
        let mut away = (self.body.position - point).normalize_or_zero();
        if away == Vec2::ZERO {
            away = if self.body.facing_right { -Vec2::X } else { Vec2::X };
        }
        self.body.set_velocity(away * self.speed() * speed_scale);
    }

    /// Circles the target; `side` picks the direction.
    pub fn strafe(&mut self, side: f32, speed_scale: f32) {
        let dir = self.direction_to_target();
        let tangent = Vec2::new(-dir.y, dir.x) * side.signum();
        self.body.set_velocity(tangent * self.speed() * speed_scale);
        self.face_target();
    }

    /// Halts movement.
    pub fn stop(&mut self) {
        self.body.set_velocity(Vec2::ZERO);
    }

    /// Runs the behaviour set. Returns false when no behaviour was active.
    pub fn run_behaviors(&mut self, dt_ms: f32) -> bool {
        if self.behaviors.is_empty() {
            return false;
        }
        let mut behaviors = std::mem::take(&mut self.behaviors);
        let active = behaviors.update(self, dt_ms);
        self.behaviors = behaviors;
        active
    }

    /// Default positioning: hold the formation slot, else close to attack range.
    pub fn default_chase(&mut self) {
        if let Some(slot) = self.formation_slot {
            if self.body.position.distance(slot) > 12.0 {
                self.move_towards(slot, 1.0);
                return;
            }
        }
        match self.perception.target_position {
            Some(target) if self.distance_to_target() > self.config.attack_range * 0.8 => {
                self.move_towards(target, 1.0);
            }
            Some(_) => {
                self.stop();
                self.face_target();
            }
            None => self.stop(),
        }
    }
}

// ============================================================================
// Brain
// ============================================================================

/// Archetype strategy plugged into the shared topology.
pub trait EnemyBrain {
    /// Archetype name.
    fn name(&self) -> &'static str;

    /// Every attack id the archetype may use (cooldowns are tracked for these).
    fn attack_ids(&self) -> &'static [&'static str];

    /// Picks the attack for a new Attack state. `None` aborts the attack.
    fn select_attack(&mut self, core: &mut EnemyCore) -> Option<String>;

    /// Per-tick hook while attacking (burst follow-ups).
    fn update_attack(&mut self, _core: &mut EnemyCore, _dt_ms: f32) {}

    /// Called when the Attack state ends.
    fn on_attack_finished(&mut self, _core: &mut EnemyCore) {}

    /// Called when the combat manager refused a started attack.
    fn on_attack_rejected(&mut self, _core: &mut EnemyCore, _attack_id: &str) {}

    /// Chase movement.
    fn chase(&mut self, core: &mut EnemyCore, dt_ms: f32) {
        if !core.run_behaviors(dt_ms) {
            core.default_chase();
        }
    }

    /// Per-tick thinking before transitions are evaluated.
    fn think(&mut self, _core: &mut EnemyCore, _dt_ms: f32) {}

    /// Called for every hit taken.
    fn on_damaged(&mut self, _core: &mut EnemyCore, _damage: f32) {}

    /// Called when a hit was blocked, deflected or parried.
    fn on_blocked(&mut self, _core: &mut EnemyCore, _result: BlockResult) {}

    /// Probabilistic guard while not blocking deliberately.
    fn auto_block(&self, _core: &EnemyCore) -> Option<AutoBlockProfile> {
        None
    }

    /// Scale applied to the pause between attacks.
    fn cooldown_scale(&self, _core: &EnemyCore) -> f32 {
        1.0
    }

    /// Squad role assignment.
    fn set_role(&mut self, _role: Option<FormationRole>) {}

    /// Entities whose positions the brain wants each tick.
    fn watched(&self) -> Vec<EntityId> {
        Vec::new()
    }

    /// Called once on entering Dead.
    fn on_death(&mut self, _core: &mut EnemyCore) {}
}

/// Machine context: shared core plus archetype brain.
#[derive(Debug)]
pub struct EnemyContext<B> {
    /// Shared state
    pub core: EnemyCore,
    /// Archetype strategy
    pub brain: B,
}

// ============================================================================
// Combatant
// ============================================================================

/// Anything the simulation ticks as an AI combatant.
pub trait Combatant {
    /// Entity id.
    fn id(&self) -> EntityId;
    /// Faction.
    fn faction(&self) -> Faction;
    /// Archetype name.
    fn kind(&self) -> &'static str;
    /// Position.
    fn position(&self) -> Vec2;
    /// Active state.
    fn state(&self) -> Option<CombatState>;
    /// Dead.
    fn is_dead(&self) -> bool;
    /// Current target.
    fn target(&self) -> Option<EntityId>;
    /// Sets the target.
    fn set_target(&mut self, target: Option<EntityId>);
    /// Sets or clears the squad slot.
    fn set_formation_slot(&mut self, slot: Option<Vec2>);
    /// Sets or clears the squad role.
    fn set_role(&mut self, role: Option<FormationRole>);
    /// Runs one tick against the combat manager.
    fn update(&mut self, combat: &mut CombatManager, dt_ms: f32);
}

/// An AI combatant: state machine over [`EnemyContext`].
pub struct Enemy<B: EnemyBrain> {
    machine: StateMachine<EnemyContext<B>, CombatState>,
    inbox: Rc<RefCell<VecDeque<Reaction>>>,
    listeners: Vec<ListenerId>,
    bus: EventBus,
    clock: SimClock,
}

impl<B: EnemyBrain + 'static> Enemy<B> {
    /// Creates an enemy and starts it in Idle.
    #[must_use]
    pub fn new(core: EnemyCore, brain: B, clock: SimClock) -> Self {
        let bus = core.bus.clone();
        let id = core.id;
        let inbox = Rc::new(RefCell::new(VecDeque::new()));
        let listeners = subscribe(&bus, id, &inbox);
        let mut machine =
            StateMachine::new(EnemyContext { core, brain }).with_observer(bus.clone(), id);
        build_topology(&mut machine);
        machine.start(CombatState::Idle);
        Self {
            machine,
            inbox,
            listeners,
            bus,
            clock,
        }
    }

    /// Adds movement behaviours (builder pattern).
    #[must_use]
    pub fn with_behaviors(mut self, behaviors: BehaviorSet) -> Self {
        self.machine.context_mut().core.behaviors = behaviors;
        self
    }

    /// Shared state.
    #[must_use]
    pub fn core(&self) -> &EnemyCore {
        &self.machine.context().core
    }

    /// Shared state, mutably.
    pub fn core_mut(&mut self) -> &mut EnemyCore {
        &mut self.machine.context_mut().core
    }

    /// Archetype brain.
    #[must_use]
    pub fn brain(&self) -> &B {
        &self.machine.context().brain
    }

    /// Archetype brain, mutably.
    pub fn brain_mut(&mut self) -> &mut B {
        &mut self.machine.context_mut().brain
    }

    /// Milliseconds in the active state.
    #[must_use]
    pub fn time_in_state(&self) -> f32 {
        self.machine.time_in_state()
    }

    fn drain_inbox(&mut self) {
        let reactions: Vec<Reaction> = self.inbox.borrow_mut().drain(..).collect();
        let staggered = self.machine.is_in(CombatState::Staggered);
        let EnemyContext { core, brain } = self.machine.context_mut();
        for reaction in reactions {
            match reaction {
                Reaction::Hit {
                    damage,
                    hitstun_ms,
                    block,
                } => {
                    if !block.is_defended() && !staggered && hitstun_ms > 0.0 {
                        core.pending_hitstun_ms = core.pending_hitstun_ms.max(hitstun_ms);
                    }
                    brain.on_damaged(core, damage);
                }
                Reaction::StaggerBreak => core.stagger_broken = true,
                Reaction::Blocked(result) => brain.on_blocked(core, result),
                Reaction::Died => core.dead = true,
            }
        }
    }

    fn perceive(&mut self, combat: &CombatManager) {
        let EnemyContext { core, brain } = self.machine.context_mut();
        let id = core.id;
        let p = &mut core.perception;
        match combat.view(id) {
            Some(view) => {
                p.health_fraction = view.health_fraction;
                p.is_attacking = view.is_attacking;
                if view.dead {
                    core.dead = true;
                }
            }
            None => core.dead = true,
        }
        p.is_stunned = combat.is_stunned(id);
        p.knocked_back = combat.is_knocked_back(id);
        p.knockback_velocity = combat.knockback_velocity(id);
        p.in_counter_window = combat.is_in_counter_window(id);
        p.force_energy = combat.force_pool(id).map_or(0.0, |pool| pool.energy);
        p.stamina = combat.block_stamina(id);

        let target = core.target.and_then(|t| combat.view(t)).filter(|v| !v.dead);
        match target {
            Some(view) => {
                p.target_position = Some(view.position);
                p.target_attacking = view.is_attacking;
                p.target_blocking = view.is_blocking;
            }
            None => {
                core.target = None;
                p.target_position = None;
                p.target_attacking = false;
                p.target_blocking = false;
            }
        }

        p.cooldowns = brain
            .attack_ids()
            .iter()
            .map(|a| ((*a).to_owned(), combat.cooldown_remaining(id, a)))
            .collect();
        p.watched = brain
            .watched()
            .into_iter()
            .filter_map(|w| combat.view(w).filter(|v| !v.dead).map(|v| (w, v.position)))
            .collect();
    }
}

impl<B: EnemyBrain + 'static> Combatant for Enemy<B> {
    fn id(&self) -> EntityId {
        self.core().id
    }

    fn faction(&self) -> Faction {
        self.core().faction
    }

    fn kind(&self) -> &'static str {
        self.brain().name()
    }

    fn position(&self) -> Vec2 {
        self.core().body.position
    }

    fn state(&self) -> Option<CombatState> {
        self.machine.current()
    }

    fn is_dead(&self) -> bool {
        self.core().dead
    }

    fn target(&self) -> Option<EntityId> {
        self.core().target
    }

    fn set_target(&mut self, target: Option<EntityId>) {
        self.core_mut().target = target;
    }

    fn set_formation_slot(&mut self, slot: Option<Vec2>) {
        self.core_mut().formation_slot = slot;
    }

    fn set_role(&mut self, role: Option<FormationRole>) {
        self.brain_mut().set_role(role);
    }

    fn update(&mut self, combat: &mut CombatManager, dt_ms: f32) {
        self.drain_inbox();
        self.perceive(combat);
        {
            let now = self.clock.now_ms();
            let EnemyContext { core, brain } = self.machine.context_mut();
            core.now = now;
            if !core.dead {
                brain.think(core, dt_ms);
            }
        }
        self.machine.update(dt_ms);

        let EnemyContext { core, brain } = self.machine.context_mut();
        if core.perception.knocked_back {
            core.body.set_velocity(core.perception.knockback_velocity);
        } else if core.dead {
            core.stop();
        }
        core.body.integrate(dt_ms);
        combat.set_position(core.id, core.body.position, core.body.facing_right);

        for command in std::mem::take(&mut core.outbox) {
            if !apply_command(combat, core.id, &command) {
                if let CombatCommand::StartAttack(attack) | CombatCommand::StartChargedAttack(attack, _) =
                    &command
                {
                    debug!("{} attack {} refused", core.id, attack);
                    core.attack_failed = true;
                    brain.on_attack_rejected(core, attack);
                }
            }
        }
        if !core.dead {
            combat.set_auto_block(core.id, brain.auto_block(core));
        }
    }
}

impl<B: EnemyBrain> Drop for Enemy<B> {
    fn drop(&mut self) {
        for id in self.listeners.drain(..) {
            self.bus.off_listener(id);
        }
    }
}

impl<B: EnemyBrain> std::fmt::Debug for Enemy<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enemy")
            .field("kind", &self.machine.context().brain.name())
            .field("id", &self.machine.context().core.id)
            .field("state", &self.machine.current())
            .finish()
    }
}

pub(crate) fn subscribe(
    bus: &EventBus,
    id: EntityId,
    inbox: &Rc<RefCell<VecDeque<Reaction>>>,
) -> Vec<ListenerId> {
    let mut listeners = Vec::new();

    let sink = Rc::clone(inbox);
    listeners.push(bus.on(topics::COMBAT_FEEDBACK, 0, move |event| {
        if let EventPayload::Feedback(f) = &event.payload {
            if f.defender_id == id {
                sink.borrow_mut().push_back(Reaction::Hit {
                    damage: f.damage,
                    hitstun_ms: f.hitstun_ms,
                    block: f.block,
                });
            }
        }
    }));

    let sink = Rc::clone(inbox);
    listeners.push(bus.on(topics::COMBAT_STAGGER_BREAK, 0, move |event| {
        if let EventPayload::Stagger(s) = &event.payload {
            if s.entity == id {
                sink.borrow_mut().push_back(Reaction::StaggerBreak);
            }
        }
    }));

    let sink = Rc::clone(inbox);
    listeners.push(bus.on(topics::COMBAT_BLOCK, 0, move |event| {
        if let EventPayload::Block(b) = &event.payload {
            if b.defender == id && b.result.is_defended() {
                sink.borrow_mut().push_back(Reaction::Blocked(b.result));
            }
        }
    }));

    let sink = Rc::clone(inbox);
    listeners.push(bus.on(topics::COMBAT_DEATH, 0, move |event| {
        if let EventPayload::Death(d) = &event.payload {
            if d.entity == id {
                sink.borrow_mut().push_back(Reaction::Died);
            }
        }
    }));

    listeners
}

// ============================================================================
// Topology
// ============================================================================

fn build_topology<B: EnemyBrain + 'static>(machine: &mut StateMachine<EnemyContext<B>, CombatState>) {
    use CombatState as S;

    machine.add_state(
        S::Idle,
        State::new().on_update(|ctx: &mut EnemyContext<B>, dt| {
            let core = &mut ctx.core;
            if !core.run_behaviors(dt) {
                match core.formation_slot {
                    Some(slot) => core.move_towards(slot, 0.6),
                    None => core.stop(),
                }
            }
        }),
    );
    machine.add_state(
        S::Alert,
        State::new().on_enter(|ctx: &mut EnemyContext<B>| {
            ctx.core.stop();
            ctx.core.face_target();
        }),
    );
    machine.add_state(
        S::Chase,
        State::new().on_update(|ctx: &mut EnemyContext<B>, dt| {
            let EnemyContext { core, brain } = ctx;
            if core.is_locked() {
                core.stop();
            } else {
                brain.chase(core, dt);
            }
        }),
    );
    machine.add_state(
        S::Attack,
        State::new()
            .on_enter(|ctx: &mut EnemyContext<B>| {
                let EnemyContext { core, brain } = ctx;
                core.stop();
                core.face_target();
                core.attack_lock_ms = 0.0;
                core.attack_failed = false;
                match brain.select_attack(core) {
                    Some(attack) => core.start_attack(&attack),
                    None => core.attack_failed = true,
                }
            })
            .on_update(|ctx: &mut EnemyContext<B>, dt| {
                let EnemyContext { core, brain } = ctx;
                brain.update_attack(core, dt);
            })
            .on_exit(|ctx: &mut EnemyContext<B>| {
                let EnemyContext { core, brain } = ctx;
                let pause = core.config.attack_cooldown_ms * brain.cooldown_scale(core);
                core.attack_ready_at = core.now + f64::from(pause);
                brain.on_attack_finished(core);
                core.current_attack = None;
            }),
    );
    machine.add_state(
        S::Block,
        State::new()
            .on_enter(|ctx: &mut EnemyContext<B>| {
                let core = &mut ctx.core;
                core.wants_block = false;
                core.stop();
                core.face_target();
                core.command(CombatCommand::StartBlock);
            })
            .on_exit(|ctx: &mut EnemyContext<B>| ctx.core.command(CombatCommand::EndBlock)),
    );
    machine.add_state(
        S::Staggered,
        State::new().on_enter(|ctx: &mut EnemyContext<B>| {
            let core = &mut ctx.core;
            core.stagger_broken = false;
            core.pending_hitstun_ms = 0.0;
            core.stop();
            core.command(CombatCommand::CancelAttack);
            core.command(CombatCommand::EndBlock);
        }),
    );
    machine.add_state(
        S::Hitstun,
        State::new()
            .on_enter(|ctx: &mut EnemyContext<B>| {
                let core = &mut ctx.core;
                core.hitstun_remaining_ms = core.pending_hitstun_ms;
                core.pending_hitstun_ms = 0.0;
                core.stop();
                core.command(CombatCommand::CancelAttack);
            })
            .on_update(|ctx: &mut EnemyContext<B>, dt| {
                let core = &mut ctx.core;
                core.hitstun_remaining_ms =
                    core.hitstun_remaining_ms.max(core.pending_hitstun_ms) - dt;
                core.pending_hitstun_ms = 0.0;
            }),
    );
    machine.add_state(
        S::Retreat,
        State::new()
            .on_enter(|ctx: &mut EnemyContext<B>| {
                let core = &mut ctx.core;
                core.wants_retreat = false;
                core.last_retreat_at = Some(core.now);
            })
            .on_update(|ctx: &mut EnemyContext<B>, _| {
                let core = &mut ctx.core;
                match core.perception.target_position {
                    Some(threat) => core.move_away_from(threat, 1.0),
                    None => core.stop(),
                }
            }),
    );
    machine.add_state(
        S::Dead,
        State::new().on_enter(|ctx: &mut EnemyContext<B>| {
            let EnemyContext { core, brain } = ctx;
            core.stop();
            debug!("{} ({}) down", core.id, brain.name());
            brain.on_death(core);
        }),
    );

    // Preemptions
    machine.add_transition(
        Transition::from_any(S::Dead)
            .when(|ctx: &EnemyContext<B>, _| ctx.core.dead)
            .priority(100),
    );
    machine.add_transition(
        Transition::from_any(S::Staggered)
            .when(|ctx: &EnemyContext<B>, _| !ctx.core.dead && ctx.core.stagger_broken)
            .priority(90),
    );
    machine.add_transition(
        Transition::from_any(S::Hitstun)
            .when(|ctx: &EnemyContext<B>, _| !ctx.core.dead && ctx.core.pending_hitstun_ms > 0.0)
            .priority(80),
    );

    // Engagement
    machine.add_transition(Transition::new(S::Idle, S::Alert).when(|ctx: &EnemyContext<B>, _| {
        ctx.core.distance_to_target() <= ctx.core.config.detection_range
    }));
    machine.add_transition(
        Transition::new(S::Alert, S::Idle)
            .when(|ctx: &EnemyContext<B>, _| !ctx.core.has_target())
            .priority(1),
    );
    machine.add_transition(
        Transition::new(S::Alert, S::Chase)
            .when(|ctx: &EnemyContext<B>, t| t >= ctx.core.config.alert_delay_ms),
    );
    machine.add_transition(
        Transition::new(S::Chase, S::Idle)
            .when(|ctx: &EnemyContext<B>, _| ctx.core.distance_to_target() > ctx.core.config.lose_range)
            .priority(20),
    );
    machine.add_transition(
        Transition::new(S::Chase, S::Retreat)
            .when(|ctx: &EnemyContext<B>, _| ctx.core.wants_retreat)
            .priority(15),
    );
    machine.add_transition(
        Transition::new(S::Chase, S::Block)
            .when(|ctx: &EnemyContext<B>, _| ctx.core.wants_block && !ctx.core.is_locked())
            .priority(10),
    );
    machine.add_transition(
        Transition::new(S::Chase, S::Attack)
            .when(|ctx: &EnemyContext<B>, _| ctx.core.can_attack() && ctx.core.in_attack_range())
            .priority(5),
    );
    machine.add_transition(Transition::new(S::Attack, S::Chase).when(|ctx: &EnemyContext<B>, t| {
        ctx.core.attack_failed || t >= ctx.core.attack_lock_ms
    }));

    // Recovery
    machine.add_transition(
        Transition::new(S::Block, S::Attack)
            .when(|ctx: &EnemyContext<B>, _| {
                ctx.core.perception.in_counter_window
                    && ctx.core.has_target()
                    && ctx.core.in_attack_range()
                    && !ctx.core.is_locked()
            })
            .priority(5),
    );
    machine.add_transition(
        Transition::new(S::Block, S::Chase)
            .when(|ctx: &EnemyContext<B>, t| t >= ctx.core.config.block_duration_ms),
    );
    machine.add_transition(
        Transition::new(S::Staggered, S::Chase)
            .when(|ctx: &EnemyContext<B>, t| t >= ctx.core.config.stagger_duration_ms),
    );
    machine.add_transition(Transition::new(S::Hitstun, S::Chase).when(|ctx: &EnemyContext<B>, _| {
        ctx.core.hitstun_remaining_ms <= 0.0 && !ctx.core.perception.is_stunned
    }));
    machine.add_transition(
        Transition::new(S::Retreat, S::Chase)
            .when(|ctx: &EnemyContext<B>, t| t >= ctx.core.config.retreat_duration_ms),
    );
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::combat::CombatConfig;
    use crate::combat_stats::CombatStats;

    /// Minimal melee brain used to exercise the shared topology.
    #[derive(Debug, Default)]
    pub(crate) struct Dummy {
        pub(crate) attacks: u32,
        pub(crate) block: bool,
    }

    impl EnemyBrain for Dummy {
        fn name(&self) -> &'static str {
            "dummy"
        }

        fn attack_ids(&self) -> &'static [&'static str] {
            &["jedi_slash_1"]
        }

        fn select_attack(&mut self, _core: &mut EnemyCore) -> Option<String> {
            self.attacks += 1;
            Some("jedi_slash_1".to_owned())
        }

        fn think(&mut self, core: &mut EnemyCore, _dt_ms: f32) {
            core.wants_block = self.block && core.perception.target_attacking;
        }
    }

    pub(crate) struct World {
        pub(crate) clock: SimClock,
        pub(crate) bus: EventBus,
        pub(crate) combat: CombatManager,
    }

    pub(crate) const PLAYER: EntityId = EntityId::from_raw(1);
    pub(crate) const FOE: EntityId = EntityId::from_raw(2);

    pub(crate) fn world() -> World {
        let clock = SimClock::new();
        let bus = EventBus::with_clock(clock.clone());
        let combat = CombatManager::new(CombatConfig::default(), clock.clone(), bus.clone(), SimRng::new(9));
        World { clock, bus, combat }
    }

    pub(crate) fn spawn<B: EnemyBrain + 'static>(
        w: &mut World,
        brain: B,
        faction: Faction,
        config: EnemyConfig,
        stats: CombatStats,
        position: Vec2,
    ) -> Enemy<B> {
        w.combat.register_entity(FOE, stats, false, position, config.size);
        let core = EnemyCore::new(FOE, faction, config, position, SimRng::new(4), w.bus.clone());
        let mut enemy = Enemy::new(core, brain, w.clock.clone());
        enemy.set_target(Some(PLAYER));
        enemy
    }

    pub(crate) fn step<B: EnemyBrain + 'static>(w: &mut World, enemy: &mut Enemy<B>, ticks: usize) {
        for _ in 0..ticks {
            w.clock.advance(16.0);
            enemy.update(&mut w.combat, 16.0);
            w.combat.update(16.0);
            w.bus.flush();
        }
    }

    fn duel(block: bool) -> (World, Enemy<Dummy>) {
        let mut w = world();
        w.combat.register_entity(
            PLAYER,
            CombatStats::for_faction(Faction::Sith),
            true,
            Vec2::new(200.0, 0.0),
            Vec2::new(32.0, 48.0),
        );
        let enemy = spawn(
            &mut w,
            Dummy { attacks: 0, block },
            Faction::Jedi,
            EnemyConfig::defender(),
            CombatStats::for_faction(Faction::Jedi),
            Vec2::ZERO,
        );
        (w, enemy)
    }

    #[test]
    fn test_idle_alert_chase_attack() {
        let (mut w, mut enemy) = duel(false);
        assert_eq!(enemy.state(), Some(CombatState::Idle));
        step(&mut w, &mut enemy, 1);
        assert_eq!(enemy.state(), Some(CombatState::Alert));
        step(&mut w, &mut enemy, 14);
        assert_eq!(enemy.state(), Some(CombatState::Chase));
        assert!(enemy.core().body.velocity.x > 0.0, "closes in");

        step(&mut w, &mut enemy, 120);
        assert!(enemy.brain().attacks > 0);
        assert!(w.combat.stats(PLAYER).is_some_and(|s| s.health < s.max_health));
    }

    #[test]
    fn test_missing_target_stays_idle() {
        let (mut w, mut enemy) = duel(false);
        enemy.set_target(None);
        step(&mut w, &mut enemy, 30);
        assert_eq!(enemy.state(), Some(CombatState::Idle));
        assert_eq!(enemy.core().distance_to_target(), f32::INFINITY);
        assert_eq!(enemy.core().direction_to_target(), Vec2::ZERO);
    }

    #[test]
    fn test_hit_forces_hitstun_then_recovers() {
        let (mut w, mut enemy) = duel(false);
        w.combat.set_position(PLAYER, Vec2::new(50.0, 0.0), false);
        w.combat.set_position(FOE, Vec2::new(0.0, 0.0), true);
        step(&mut w, &mut enemy, 2);
        assert!(w.combat.start_attack(PLAYER, "light_1"));
        step(&mut w, &mut enemy, 8);
        assert_eq!(enemy.state(), Some(CombatState::Hitstun));
        step(&mut w, &mut enemy, 40);
        assert_ne!(enemy.state(), Some(CombatState::Hitstun));
    }

    #[test]
    fn test_stagger_break_preempts() {
        let (mut w, mut enemy) = duel(false);
        step(&mut w, &mut enemy, 2);
        if let Some(stats) = w.combat.stats_mut(FOE) {
            stats.stagger = 99.0;
        }
        w.combat.set_position(PLAYER, Vec2::new(40.0, 0.0), false);
        enemy.core_mut().body.position = Vec2::ZERO;
        w.combat.set_position(FOE, Vec2::ZERO, true);
        assert!(w.combat.start_attack(PLAYER, "light_1"));
        step(&mut w, &mut enemy, 8);
        assert_eq!(enemy.state(), Some(CombatState::Staggered));
    }

    #[test]
    fn test_death_is_terminal() {
        let (mut w, mut enemy) = duel(false);
        step(&mut w, &mut enemy, 2);
        w.combat.kill(FOE);
        w.bus.flush();
        step(&mut w, &mut enemy, 2);
        assert_eq!(enemy.state(), Some(CombatState::Dead));
        assert!(enemy.is_dead());
        step(&mut w, &mut enemy, 20);
        assert_eq!(enemy.state(), Some(CombatState::Dead));
    }

    #[test]
    fn test_block_when_target_swings() {
        let (mut w, mut enemy) = duel(true);
        w.combat.set_position(PLAYER, Vec2::new(140.0, 0.0), false);
        step(&mut w, &mut enemy, 20);
        assert_eq!(enemy.state(), Some(CombatState::Chase));
        assert!(w.combat.start_attack(PLAYER, "heavy_1"));
        step(&mut w, &mut enemy, 2);
        assert_eq!(enemy.state(), Some(CombatState::Block));
        assert!(w.combat.is_blocking(FOE));
        step(&mut w, &mut enemy, 100);
        assert!(!w.combat.is_blocking(FOE));
    }

    #[test]
    fn test_listeners_removed_on_drop() {
        let (w, enemy) = duel(false);
        let before = w.bus.listener_count(topics::COMBAT_FEEDBACK);
        drop(enemy);
        assert_eq!(w.bus.listener_count(topics::COMBAT_FEEDBACK), before - 1);
    }
}
