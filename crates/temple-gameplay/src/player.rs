//! Player combatant driven by input intent.
//!
//! The player runs on the same [`StateMachine`] as enemies, with its own
//! state set. Each tick the current [`PlayerIntent`] is turned into edge
//! events (button pressed / released), requested moves are queued for the
//! machine, and resulting combat commands are applied to the
//! [`CombatManager`] after the machine has run.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use temple_common::{EntityId, Vec2};
use tracing::debug;

use crate::attack_data::{
    attack_duration, attack_phase, can_cancel_into, get_attack_data, next_in_chain, AttackPhase, HEAVY_CHAIN,
    LIGHT_CHAIN,
};
use crate::body::{Body, KinematicBody};
use crate::combat::CombatManager;
use crate::enemy::{apply_command, subscribe, CombatCommand, Reaction};
use crate::events::{EventBus, ListenerId};
use crate::state_machine::{State, StateMachine, Transition};

/// Input snapshot for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerIntent {
    /// Desired movement direction (any length)
    pub movement: Vec2,
    /// Light attack button held
    pub light: bool,
    /// Heavy attack button held (released to strike)
    pub heavy: bool,
    /// Block button held
    pub block: bool,
    /// Force push button held
    pub force_push: bool,
    /// Force pull button held
    pub force_pull: bool,
}

/// Player tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Run speed (px/s)
    pub move_speed: f32,
    /// Hurtbox size (px)
    pub size: Vec2,
    /// Length of the stagger state (ms)
    pub stagger_duration_ms: f32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            move_speed: 220.0,
            size: Vec2::new(32.0, 48.0),
            stagger_duration_ms: 600.0,
        }
    }
}

/// Player states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerState {
    /// Standing
    Idle,
    /// Moving
    Run,
    /// Swinging
    Attack,
    /// Holding a heavy attack
    Charge,
    /// Guarding
    Block,
    /// Reeling from a hit
    Hitstun,
    /// Posture broken
    Staggered,
    /// Dead
    Dead,
}

#[derive(Debug, Clone, PartialEq)]
enum Move {
    Strike(String),
    Charged(String, f32),
}

#[derive(Debug)]
struct PlayerContext {
    id: EntityId,
    config: PlayerConfig,
    body: KinematicBody,
    intent: PlayerIntent,
    requested: Option<Move>,
    wants_charge: bool,
    buffered: Option<&'static str>,
    current: Option<String>,
    attack_elapsed_ms: f32,
    attack_duration_ms: f32,
    attack_failed: bool,
    charge_ms: f32,
    pending_hitstun_ms: f32,
    hitstun_remaining_ms: f32,
    stunned: bool,
    stagger_broken: bool,
    dead: bool,
    outbox: Vec<CombatCommand>,
}

impl PlayerContext {
    fn begin(&mut self, attack_id: &str, command: CombatCommand) {
        self.current = Some(attack_id.to_owned());
        self.attack_elapsed_ms = 0.0;
        self.attack_duration_ms = get_attack_data(attack_id).map_or(0.0, |a| attack_duration(&a));
        self.outbox.push(command);
    }

    /// Next link for a button press during the current attack.
    fn chain_link(&self, heavy: bool) -> Option<&'static str> {
        let current = self.current.as_deref()?;
        let in_chain = |chain: &[&str]| chain.contains(&current);
        if heavy {
            if in_chain(&HEAVY_CHAIN) {
                next_in_chain(current)
            } else {
                Some(HEAVY_CHAIN[0])
            }
        } else if in_chain(&LIGHT_CHAIN) {
            next_in_chain(current)
        } else {
            None
        }
    }
}

/// The player combatant.
pub struct Player {
    machine: StateMachine<PlayerContext, PlayerState>,
    previous_intent: PlayerIntent,
    inbox: Rc<RefCell<VecDeque<Reaction>>>,
    listeners: Vec<ListenerId>,
    bus: EventBus,
}

impl Player {
    /// Creates a player at `position`, started in Idle.
    #[must_use]
    pub fn new(id: EntityId, config: PlayerConfig, position: Vec2, bus: EventBus) -> Self {
        let body = KinematicBody::new(position, config.size);
        let context = PlayerContext {
            id,
            config,
            body,
            intent: PlayerIntent::default(),
            requested: None,
            wants_charge: false,
            buffered: None,
            current: None,
            attack_elapsed_ms: 0.0,
            attack_duration_ms: 0.0,
            attack_failed: false,
            charge_ms: 0.0,
            pending_hitstun_ms: 0.0,
            hitstun_remaining_ms: 0.0,
            stunned: false,
            stagger_broken: false,
            dead: false,
            outbox: Vec::new(),
        };
        let inbox = Rc::new(RefCell::new(VecDeque::new()));
        let listeners = subscribe(&bus, id, &inbox);
        let mut machine = StateMachine::new(context).with_observer(bus.clone(), id);
        build_topology(&mut machine);
        machine.start(PlayerState::Idle);
        Self {
            machine,
            previous_intent: PlayerIntent::default(),
            inbox,
            listeners,
            bus,
        }
    }

    /// Entity id.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.machine.context().id
    }

    /// Position.
    #[must_use]
    pub fn position(&self) -> Vec2 {
        self.machine.context().body.position
    }

    /// Facing.
    #[must_use]
    pub fn facing_right(&self) -> bool {
        self.machine.context().body.facing_right
    }

    /// Movement body.
    #[must_use]
    pub fn body(&self) -> &KinematicBody {
        &self.machine.context().body
    }

    /// Movement body, mutably.
    pub fn body_mut(&mut self) -> &mut KinematicBody {
        &mut self.machine.context_mut().body
    }

    /// Active state.
    #[must_use]
    pub fn state(&self) -> Option<PlayerState> {
        self.machine.current()
    }

    /// Dead.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.machine.context().dead
    }

    /// Attack currently being performed.
    #[must_use]
    pub fn current_attack(&self) -> Option<&str> {
        self.machine.context().current.as_deref()
    }

    /// Milliseconds the heavy attack has been held.
    #[must_use]
    pub fn charge_ms(&self) -> f32 {
        self.machine.context().charge_ms
    }

    /// Replaces the input snapshot for the next tick.
    pub fn set_intent(&mut self, intent: PlayerIntent) {
        self.machine.context_mut().intent = intent;
    }

    /// Runs one tick against the combat manager.
    pub fn update(&mut self, combat: &mut CombatManager, dt_ms: f32) {
        self.drain_inbox();
        self.perceive(combat);
        self.plan();
        self.machine.update(dt_ms);

        let ctx = self.machine.context_mut();
        if combat.is_knocked_back(ctx.id) {
            ctx.body.set_velocity(combat.knockback_velocity(ctx.id));
        } else if ctx.dead {
            ctx.body.set_velocity(Vec2::ZERO);
        }
        ctx.body.integrate(dt_ms);
        combat.set_position(ctx.id, ctx.body.position, ctx.body.facing_right);
        for command in std::mem::take(&mut ctx.outbox) {
            if !apply_command(combat, ctx.id, &command) {
                debug!("{} player move {:?} refused", ctx.id, command);
                ctx.attack_failed = true;
                ctx.buffered = None;
            }
        }
        self.previous_intent = self.machine.context().intent;
    }

    fn drain_inbox(&mut self) {
        let reactions: Vec<Reaction> = self.inbox.borrow_mut().drain(..).collect();
        let staggered = self.machine.is_in(PlayerState::Staggered);
        let ctx = self.machine.context_mut();
        for reaction in reactions {
            match reaction {
                Reaction::Hit { hitstun_ms, block, .. } => {
                    if !block.is_defended() && !staggered && hitstun_ms > 0.0 {
                        ctx.pending_hitstun_ms = ctx.pending_hitstun_ms.max(hitstun_ms);
                    }
                }
                Reaction::StaggerBreak => ctx.stagger_broken = true,
                Reaction::Blocked(_) => {}
                Reaction::Died => ctx.dead = true,
            }
        }
    }

    fn perceive(&mut self, combat: &CombatManager) {
        let ctx = self.machine.context_mut();
        ctx.stunned = combat.is_stunned(ctx.id);
        if !combat.is_alive(ctx.id) {
            ctx.dead = true;
        }
    }

    /// Turns button edges into requested moves for the current state.
    fn plan(&mut self) {
        let previous = self.previous_intent;
        let state = self.machine.current();
        let ctx = self.machine.context_mut();
        let intent = ctx.intent;
        let light = intent.light && !previous.light;
        let heavy = intent.heavy && !previous.heavy;
        let heavy_released = !intent.heavy && previous.heavy;
        let push = intent.force_push && !previous.force_push;
        let pull = intent.force_pull && !previous.force_pull;

        match state {
            Some(PlayerState::Idle | PlayerState::Run) => {
                ctx.requested = if light {
                    Some(Move::Strike(LIGHT_CHAIN[0].to_owned()))
                } else if push {
                    Some(Move::Strike("force_push".to_owned()))
                } else if pull {
                    Some(Move::Strike("force_pull".to_owned()))
                } else {
                    None
                };
                ctx.wants_charge = heavy;
            }
            Some(PlayerState::Attack) => {
                if light || heavy {
                    let link = ctx.chain_link(heavy);
                    let legal = link.is_some_and(|next| {
                        ctx.current
                            .as_deref()
                            .and_then(get_attack_data)
                            .is_some_and(|current| can_cancel_into(&current, next))
                    });
                    if legal {
                        ctx.buffered = link;
                    }
                }
            }
            Some(PlayerState::Charge) => {
                if heavy_released {
                    ctx.requested = Some(Move::Charged(HEAVY_CHAIN[0].to_owned(), ctx.charge_ms));
                }
            }
            _ => {
                ctx.requested = None;
                ctx.wants_charge = false;
            }
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        for id in self.listeners.drain(..) {
            self.bus.off_listener(id);
        }
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("id", &self.machine.context().id)
            .field("state", &self.machine.current())
            .field("position", &self.machine.context().body.position)
            .finish()
    }
}

fn build_topology(machine: &mut StateMachine<PlayerContext, PlayerState>) {
    use PlayerState as S;

    let halt = |ctx: &mut PlayerContext| ctx.body.set_velocity(Vec2::ZERO);

    machine.add_state(S::Idle, State::new().on_enter(halt));
    machine.add_state(
        S::Run,
        State::new().on_update(|ctx: &mut PlayerContext, _| {
            let direction = ctx.intent.movement.normalize_or_zero();
            ctx.body.set_velocity(direction * ctx.config.move_speed);
            if direction.x.abs() > f32::EPSILON {
                ctx.body.set_facing_right(direction.x > 0.0);
            }
        }),
    );
    machine.add_state(
        S::Attack,
        State::new()
            .on_enter(|ctx: &mut PlayerContext| {
                ctx.body.set_velocity(Vec2::ZERO);
                ctx.attack_failed = false;
                ctx.buffered = None;
                match ctx.requested.take() {
                    Some(Move::Strike(id)) => ctx.begin(&id, CombatCommand::StartAttack(id.clone())),
                    Some(Move::Charged(id, held)) => {
                        ctx.begin(&id, CombatCommand::StartChargedAttack(id.clone(), held));
                    }
                    None => ctx.attack_failed = true,
                }
            })
            .on_update(|ctx: &mut PlayerContext, dt| {
                ctx.attack_elapsed_ms += dt;
                let Some(next) = ctx.buffered else {
                    return;
                };
                let cancellable = ctx
                    .current
                    .as_deref()
                    .and_then(get_attack_data)
                    .and_then(|a| attack_phase(&a, ctx.attack_elapsed_ms))
                    .is_some_and(|p| matches!(p, AttackPhase::Active | AttackPhase::Recovery));
                if cancellable {
                    ctx.buffered = None;
                    ctx.begin(next, CombatCommand::StartAttack(next.to_owned()));
                }
            })
            .on_exit(|ctx: &mut PlayerContext| {
                ctx.current = None;
                ctx.buffered = None;
                ctx.charge_ms = 0.0;
            }),
    );
    machine.add_state(
        S::Charge,
        State::new()
            .on_enter(|ctx: &mut PlayerContext| {
                ctx.wants_charge = false;
                ctx.charge_ms = 0.0;
                ctx.body.set_velocity(Vec2::ZERO);
            })
            .on_update(|ctx: &mut PlayerContext, dt| ctx.charge_ms += dt),
    );
    machine.add_state(
        S::Block,
        State::new()
            .on_enter(|ctx: &mut PlayerContext| {
                ctx.body.set_velocity(Vec2::ZERO);
                ctx.outbox.push(CombatCommand::StartBlock);
            })
            .on_exit(|ctx: &mut PlayerContext| ctx.outbox.push(CombatCommand::EndBlock)),
    );
    machine.add_state(
        S::Hitstun,
        State::new()
            .on_enter(|ctx: &mut PlayerContext| {
                ctx.hitstun_remaining_ms = ctx.pending_hitstun_ms;
                ctx.pending_hitstun_ms = 0.0;
                ctx.body.set_velocity(Vec2::ZERO);
                ctx.outbox.push(CombatCommand::CancelAttack);
            })
            .on_update(|ctx: &mut PlayerContext, dt| {
                ctx.hitstun_remaining_ms = ctx.hitstun_remaining_ms.max(ctx.pending_hitstun_ms) - dt;
                ctx.pending_hitstun_ms = 0.0;
            }),
    );
    machine.add_state(
        S::Staggered,
        State::new().on_enter(|ctx: &mut PlayerContext| {
            ctx.stagger_broken = false;
            ctx.pending_hitstun_ms = 0.0;
            ctx.body.set_velocity(Vec2::ZERO);
            ctx.outbox.push(CombatCommand::CancelAttack);
            ctx.outbox.push(CombatCommand::EndBlock);
        }),
    );
    machine.add_state(S::Dead, State::new().on_enter(halt));

    machine.add_transition(Transition::from_any(S::Dead).when(|ctx: &PlayerContext, _| ctx.dead).priority(100));
    machine.add_transition(
        Transition::from_any(S::Staggered)
            .when(|ctx: &PlayerContext, _| !ctx.dead && ctx.stagger_broken)
            .priority(90),
    );
    machine.add_transition(
        Transition::from_any(S::Hitstun)
            .when(|ctx: &PlayerContext, _| !ctx.dead && ctx.pending_hitstun_ms > 0.0)
            .priority(80),
    );

    for from in [S::Idle, S::Run] {
        machine.add_transition(
            Transition::new(from, S::Block)
                .when(|ctx: &PlayerContext, _| ctx.intent.block)
                .priority(12),
        );
        machine.add_transition(
            Transition::new(from, S::Attack)
                .when(|ctx: &PlayerContext, _| ctx.requested.is_some())
                .priority(10),
        );
        machine.add_transition(
            Transition::new(from, S::Charge)
                .when(|ctx: &PlayerContext, _| ctx.wants_charge)
                .priority(9),
        );
    }
    machine.add_transition(
        Transition::new(S::Idle, S::Run).when(|ctx: &PlayerContext, _| ctx.intent.movement != Vec2::ZERO),
    );
    machine.add_transition(
        Transition::new(S::Run, S::Idle).when(|ctx: &PlayerContext, _| ctx.intent.movement == Vec2::ZERO),
    );
    machine.add_transition(
        Transition::new(S::Charge, S::Attack).when(|ctx: &PlayerContext, _| ctx.requested.is_some()),
    );
    machine.add_transition(Transition::new(S::Attack, S::Idle).when(|ctx: &PlayerContext, _| {
        ctx.attack_failed || (ctx.buffered.is_none() && ctx.attack_elapsed_ms >= ctx.attack_duration_ms)
    }));
    machine.add_transition(Transition::new(S::Block, S::Idle).when(|ctx: &PlayerContext, _| !ctx.intent.block));
    machine.add_transition(
        Transition::new(S::Hitstun, S::Idle)
            .when(|ctx: &PlayerContext, _| ctx.hitstun_remaining_ms <= 0.0 && !ctx.stunned),
    );
    machine.add_transition(
        Transition::new(S::Staggered, S::Idle)
            .when(|ctx: &PlayerContext, t| t >= ctx.config.stagger_duration_ms),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::CombatConfig;
    use crate::combat_stats::CombatStats;
    use crate::faction::Faction;
    use crate::force::ForcePool;
    use temple_common::{SimClock, SimRng};

    const ME: EntityId = EntityId::from_raw(1);
    const JEDI: EntityId = EntityId::from_raw(2);

    struct Rig {
        clock: SimClock,
        bus: EventBus,
        combat: CombatManager,
        player: Player,
    }

    fn rig() -> Rig {
        let clock = SimClock::new();
        let bus = EventBus::with_clock(clock.clone());
        let mut combat = CombatManager::new(CombatConfig::default(), clock.clone(), bus.clone(), SimRng::new(2));
        let config = PlayerConfig::default();
        combat.register_entity(ME, CombatStats::for_faction(Faction::Sith), true, Vec2::ZERO, config.size);
        combat.register_entity(
            JEDI,
            CombatStats::for_faction(Faction::Jedi).with_health(5000.0),
            false,
            Vec2::new(45.0, 0.0),
            Vec2::new(32.0, 48.0),
        );
        let player = Player::new(ME, config, Vec2::ZERO, bus.clone());
        Rig {
            clock,
            bus,
            combat,
            player,
        }
    }

    fn tick(r: &mut Rig, intent: PlayerIntent, ticks: usize) {
        r.player.set_intent(intent);
        for _ in 0..ticks {
            r.clock.advance(16.0);
            r.player.update(&mut r.combat, 16.0);
            r.combat.update(16.0);
            r.bus.flush();
        }
    }

    fn press(light: bool, heavy: bool) -> PlayerIntent {
        PlayerIntent {
            light,
            heavy,
            ..PlayerIntent::default()
        }
    }

    #[test]
    fn test_run_moves_and_faces() {
        let mut r = rig();
        let intent = PlayerIntent {
            movement: Vec2::new(-1.0, 0.0),
            ..PlayerIntent::default()
        };
        tick(&mut r, intent, 10);
        assert_eq!(r.player.state(), Some(PlayerState::Run));
        assert!(r.player.position().x < 0.0);
        assert!(!r.player.facing_right());
        tick(&mut r, PlayerIntent::default(), 2);
        assert_eq!(r.player.state(), Some(PlayerState::Idle));
    }

    #[test]
    fn test_light_chain_advances_on_repress() {
        let mut r = rig();
        tick(&mut r, press(true, false), 1);
        assert_eq!(r.player.current_attack(), Some("light_1"));
        tick(&mut r, PlayerIntent::default(), 4);
        tick(&mut r, press(true, false), 1);
        tick(&mut r, PlayerIntent::default(), 6);
        assert_eq!(r.player.current_attack(), Some("light_2"));
        assert!(r.combat.current_attack(ME).is_some_and(|(a, _)| a.id == "light_2"));

        tick(&mut r, PlayerIntent::default(), 40);
        assert_eq!(r.player.state(), Some(PlayerState::Idle));
        assert_eq!(r.player.current_attack(), None);
    }

    #[test]
    fn test_heavy_charges_until_release() {
        let mut r = rig();
        tick(&mut r, press(false, true), 1);
        tick(&mut r, press(false, true), 30);
        assert_eq!(r.player.state(), Some(PlayerState::Charge));
        assert!(r.player.charge_ms() >= 400.0);
        tick(&mut r, PlayerIntent::default(), 1);
        assert_eq!(r.player.state(), Some(PlayerState::Attack));
        assert_eq!(r.player.current_attack(), Some("heavy_1"));
        assert!(r.combat.is_attacking(ME));
    }

    #[test]
    fn test_block_is_held() {
        let mut r = rig();
        let guard = PlayerIntent {
            block: true,
            ..PlayerIntent::default()
        };
        tick(&mut r, guard, 3);
        assert_eq!(r.player.state(), Some(PlayerState::Block));
        assert!(r.combat.is_blocking(ME));
        tick(&mut r, PlayerIntent::default(), 2);
        assert_eq!(r.player.state(), Some(PlayerState::Idle));
        assert!(!r.combat.is_blocking(ME));
    }

    #[test]
    fn test_force_push_needs_pool() {
        let mut r = rig();
        let push = PlayerIntent {
            force_push: true,
            ..PlayerIntent::default()
        };
        tick(&mut r, push, 3);
        assert_ne!(r.player.state(), Some(PlayerState::Attack), "no pool, no push");

        r.combat.set_force_pool(ME, ForcePool::player());
        tick(&mut r, PlayerIntent::default(), 1);
        tick(&mut r, push, 1);
        assert_eq!(r.player.current_attack(), Some("force_push"));
        assert!(r.combat.force_pool(ME).is_some_and(|p| !p.is_full()));
    }

    #[test]
    fn test_enemy_hit_causes_hitstun() {
        let mut r = rig();
        r.combat.set_position(JEDI, Vec2::new(45.0, 0.0), false);
        tick(&mut r, PlayerIntent::default(), 1);
        assert!(r.combat.start_attack(JEDI, "jedi_slash_1"));
        tick(&mut r, PlayerIntent::default(), 9);
        assert_eq!(r.player.state(), Some(PlayerState::Hitstun));
        tick(&mut r, PlayerIntent::default(), 60);
        assert_eq!(r.player.state(), Some(PlayerState::Idle));
    }

    #[test]
    fn test_death_is_terminal() {
        let mut r = rig();
        r.combat.kill(ME);
        r.bus.flush();
        tick(&mut r, press(true, false), 3);
        assert_eq!(r.player.state(), Some(PlayerState::Dead));
        assert!(r.player.is_dead());
    }
}
