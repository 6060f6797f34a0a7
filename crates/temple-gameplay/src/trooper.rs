//! Clone trooper archetype: ranged stand-off, burst fire and squad roles.

use temple_common::Vec2;
use tracing::debug;

use crate::behavior::CoverFire;
use crate::enemy::{CombatCommand, EnemyBrain, EnemyCore};
use crate::squad::FormationRole;

const BURST_SHOTS: u32 = 3;
const BURST_INTERVAL_MS: f32 = 100.0;
const STANDOFF_DISTANCE: f32 = 220.0;
const STANDOFF_SLACK: f32 = 40.0;
const MELEE_DISTANCE: f32 = 60.0;
const TOO_CLOSE_DISTANCE: f32 = 100.0;
const RETREAT_HEALTH: f32 = 0.3;
const COVER_HEALTH: f32 = 0.6;
const REPOSITION_COOLDOWN_MS: f64 = 3000.0;
const STRAFE_SWITCH_MS: f32 = 1500.0;

/// Clone trooper brain.
#[derive(Debug, Clone)]
pub struct Trooper {
    role: Option<FormationRole>,
    burst_remaining: u32,
    burst_timer_ms: f32,
    strafe_side: f32,
    strafe_timer_ms: f32,
    cover: Option<CoverFire>,
}

impl Default for Trooper {
    fn default() -> Self {
        Self::new()
    }
}

impl Trooper {
    /// Creates a trooper with no role and no known cover.
    #[must_use]
    pub fn new() -> Self {
        Self {
            role: None,
            burst_remaining: 0,
            burst_timer_ms: 0.0,
            strafe_side: 1.0,
            strafe_timer_ms: 0.0,
            cover: None,
        }
    }

    /// Gives the trooper cover points to fall back to (builder pattern).
    #[must_use]
    pub fn with_cover(mut self, points: Vec<Vec2>) -> Self {
        self.cover = Some(CoverFire::new(points, 250.0));
        self
    }

    /// Squad role.
    #[must_use]
    pub fn role(&self) -> Option<FormationRole> {
        self.role
    }

    /// Shots left in the current burst.
    #[must_use]
    pub fn burst_remaining(&self) -> u32 {
        self.burst_remaining
    }

    /// Preferred distance to the target for the current role.
    #[must_use]
    pub fn standoff(&self) -> f32 {
        STANDOFF_DISTANCE * self.role.map_or(1.0, FormationRole::distance_multiplier)
    }

    fn can_reposition(core: &EnemyCore) -> bool {
        core.last_retreat_at
            .map_or(true, |at| core.now - at >= REPOSITION_COOLDOWN_MS)
    }
}

impl EnemyBrain for Trooper {
    fn name(&self) -> &'static str {
        "clone_trooper"
    }

    fn attack_ids(&self) -> &'static [&'static str] {
        &["blaster_shot", "suppressive_fire", "rifle_butt"]
    }

    fn select_attack(&mut self, core: &mut EnemyCore) -> Option<String> {
        if core.distance_to_target() < MELEE_DISTANCE && core.perception.is_ready("rifle_butt") {
            return Some("rifle_butt".to_owned());
        }
        if self.role == Some(FormationRole::Suppressor) && core.perception.is_ready("suppressive_fire") {
            return Some("suppressive_fire".to_owned());
        }
        self.burst_remaining = BURST_SHOTS - 1;
        self.burst_timer_ms = 0.0;
        core.extend_attack_lock(BURST_INTERVAL_MS * (BURST_SHOTS - 1) as f32 + 90.0);
        Some("blaster_shot".to_owned())
    }

    fn update_attack(&mut self, core: &mut EnemyCore, dt_ms: f32) {
        if self.burst_remaining == 0 {
            return;
        }
        self.burst_timer_ms += dt_ms;
        if self.burst_timer_ms >= BURST_INTERVAL_MS {
            self.burst_timer_ms -= BURST_INTERVAL_MS;
            self.burst_remaining -= 1;
            core.face_target();
            core.command(CombatCommand::StartAttack("blaster_shot".to_owned()));
        }
    }

    fn on_attack_finished(&mut self, _core: &mut EnemyCore) {
        self.burst_remaining = 0;
    }

    fn on_attack_rejected(&mut self, _core: &mut EnemyCore, _attack_id: &str) {
        self.burst_remaining = 0;
    }

    fn chase(&mut self, core: &mut EnemyCore, dt_ms: f32) {
        core.speed_multiplier = self.role.map_or(1.0, FormationRole::speed_multiplier);
        if core.run_behaviors(dt_ms) {
            return;
        }
        let Some(target) = core.perception.target_position else {
            core.stop();
            return;
        };
        if core.perception.health_fraction < COVER_HEALTH {
            if let Some(cover) = self.cover.as_ref().and_then(|c| c.best_cover(core.position(), target)) {
                if core.position().distance(cover) > 6.0 {
                    core.move_towards(cover, 1.0);
                } else {
                    core.stop();
                    core.face_target();
                }
                return;
            }
        }
        if let Some(slot) = core.formation_slot {
            if core.position().distance(slot) > 12.0 {
                core.move_towards(slot, 1.0);
                return;
            }
        }

        let distance = core.distance_to_target();
        let standoff = self.standoff();
        if distance > standoff + STANDOFF_SLACK {
            core.move_towards(target, 1.0);
        } else if distance < standoff - STANDOFF_SLACK {
            core.move_away_from(target, 0.8);
            core.face_target();
        } else {
            self.strafe_timer_ms += dt_ms;
            if self.strafe_timer_ms >= STRAFE_SWITCH_MS {
                self.strafe_timer_ms = 0.0;
                self.strafe_side = -self.strafe_side;
            }
            core.strafe(self.strafe_side, 0.5);
        }
    }

    fn think(&mut self, core: &mut EnemyCore, _dt_ms: f32) {
        if core.distance_to_target() < TOO_CLOSE_DISTANCE && Self::can_reposition(core) {
            core.wants_retreat = true;
        }
    }

    fn on_damaged(&mut self, core: &mut EnemyCore, damage: f32) {
        if core.perception.health_fraction < RETREAT_HEALTH && Self::can_reposition(core) {
            debug!("{} falling back after {:.0} damage", core.id, damage);
            core.wants_retreat = true;
        }
    }

    fn set_role(&mut self, role: Option<FormationRole>) {
        self.role = role;
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::combat_stats::CombatStats;
    use crate::enemy::tests::{spawn, step, world, World, FOE, PLAYER};
    use crate::enemy::{CombatState, Combatant, Enemy, EnemyConfig};
    use crate::events::{topics, EventBus, EventPayload};
    use crate::faction::Faction;
    use temple_common::{EntityId, SimRng};

    fn shots(bus: &EventBus) -> Rc<RefCell<Vec<String>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        bus.on(topics::ENEMY_ATTACK, 0, move |event| {
            if let EventPayload::Attack(a) = &event.payload {
                if a.entity == FOE {
                    sink.borrow_mut().push(a.attack_id.clone());
                }
            }
        });
        log
    }

    fn squad_trooper(target_at: Vec2, brain: Trooper) -> (World, Enemy<Trooper>) {
        let mut w = world();
        w.combat.register_entity(
            PLAYER,
            CombatStats::for_faction(Faction::Jedi).with_health(10_000.0),
            false,
            target_at,
            Vec2::new(32.0, 48.0),
        );
        let trooper = spawn(
            &mut w,
            brain,
            Faction::Imperial,
            EnemyConfig::trooper(),
            CombatStats::for_faction(Faction::Imperial),
            Vec2::ZERO,
        );
        (w, trooper)
    }

    fn step_until(w: &mut World, t: &mut Enemy<Trooper>, state: CombatState) {
        for _ in 0..200 {
            if t.state() == Some(state) {
                return;
            }
            step(w, t, 1);
        }
    }

    #[test]
    fn test_burst_fires_three_shots() {
        let (mut w, mut trooper) = squad_trooper(Vec2::new(200.0, 0.0), Trooper::new());
        let log = shots(&w.bus);
        step_until(&mut w, &mut trooper, CombatState::Attack);
        assert_eq!(trooper.state(), Some(CombatState::Attack));
        step(&mut w, &mut trooper, 25);
        assert_eq!(*log.borrow(), vec!["blaster_shot"; 3]);
        assert_ne!(trooper.state(), Some(CombatState::Attack));
        assert_eq!(trooper.brain().burst_remaining(), 0);
    }

    #[test]
    fn test_suppressor_lays_down_fire() {
        let (mut w, mut trooper) = squad_trooper(Vec2::new(250.0, 0.0), Trooper::new());
        trooper.set_role(Some(FormationRole::Suppressor));
        let log = shots(&w.bus);
        step_until(&mut w, &mut trooper, CombatState::Attack);
        step(&mut w, &mut trooper, 1);
        assert_eq!(log.borrow().first().map(String::as_str), Some("suppressive_fire"));
        assert!(w.combat.cooldown_remaining(FOE, "suppressive_fire") > 5000.0);
    }

    #[test]
    fn test_retreats_when_crowded_then_waits_to_reposition() {
        let (mut w, mut trooper) = squad_trooper(Vec2::new(50.0, 0.0), Trooper::new());
        step_until(&mut w, &mut trooper, CombatState::Retreat);
        assert_eq!(trooper.state(), Some(CombatState::Retreat));
        step(&mut w, &mut trooper, 1);
        assert!(trooper.core().body.velocity.x < 0.0);

        step_until(&mut w, &mut trooper, CombatState::Chase);
        w.combat.set_position(PLAYER, trooper.position() + Vec2::new(40.0, 0.0), false);
        step(&mut w, &mut trooper, 10);
        assert_ne!(trooper.state(), Some(CombatState::Retreat), "reposition cooldown");
    }

    #[test]
    fn test_retreat_below_health_threshold() {
        let mut brain = Trooper::new();
        let mut core = EnemyCore::new(
            EntityId::from_raw(4),
            Faction::Imperial,
            EnemyConfig::trooper(),
            Vec2::ZERO,
            SimRng::new(1),
            EventBus::new(),
        );
        core.now = 10_000.0;
        core.perception.health_fraction = 0.5;
        brain.on_damaged(&mut core, 5.0);
        assert!(!core.wants_retreat);

        core.perception.health_fraction = 0.2;
        core.last_retreat_at = Some(9_000.0);
        brain.on_damaged(&mut core, 5.0);
        assert!(!core.wants_retreat);

        core.last_retreat_at = Some(6_000.0);
        brain.on_damaged(&mut core, 5.0);
        assert!(core.wants_retreat);
    }

    #[test]
    fn test_role_changes_standoff() {
        let mut brain = Trooper::new();
        assert_eq!(brain.standoff(), 220.0);
        brain.set_role(Some(FormationRole::Suppressor));
        assert!(brain.standoff() > 300.0);
        brain.set_role(Some(FormationRole::Frontline));
        assert!(brain.standoff() < 220.0);
    }

    #[test]
    fn test_wounded_trooper_takes_cover() {
        let mut brain = Trooper::new().with_cover(vec![Vec2::new(-100.0, 0.0)]);
        let mut core = EnemyCore::new(
            EntityId::from_raw(4),
            Faction::Imperial,
            EnemyConfig::trooper(),
            Vec2::ZERO,
            SimRng::new(1),
            EventBus::new(),
        );
        core.perception.target_position = Some(Vec2::new(150.0, 0.0));
        core.perception.health_fraction = 0.4;
        brain.chase(&mut core, 16.0);
        assert!(core.body.velocity.x < 0.0);
    }
}
