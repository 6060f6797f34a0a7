//! Jedi defender archetype: three-hit combos, counters and a desperate
//! aggressive form.

use tracing::info;

use crate::block::BlockResult;
use crate::combat::AutoBlockProfile;
use crate::enemy::{EnemyBrain, EnemyCore};
use crate::events::{topics, EventPayload, GameEvent, StanceEvent};

const COMBO_CHAIN: [&str; 3] = ["jedi_slash_1", "jedi_slash_2", "jedi_slash_3"];
const COUNTER_WINDOW_MS: f64 = 300.0;
const AGGRESSIVE_HEALTH: f32 = 0.3;
const FORCE_PUSH_COST: f32 = 30.0;
const FORCE_PUSH_RANGE: f32 = 120.0;
const GUARD_REACTION_RANGE: f32 = 150.0;
const STRAFE_SWITCH_MS: f32 = 1200.0;

/// Jedi defender brain.
#[derive(Debug, Clone)]
pub struct Defender {
    combo: usize,
    last_block_at: Option<f64>,
    aggressive: bool,
    saw_attack: bool,
    strafe_side: f32,
    strafe_timer_ms: f32,
}

impl Default for Defender {
    fn default() -> Self {
        Self::new()
    }
}

impl Defender {
    /// Creates a defender in its balanced form.
    #[must_use]
    pub fn new() -> Self {
        Self {
            combo: 0,
            last_block_at: None,
            aggressive: false,
            saw_attack: false,
            strafe_side: 1.0,
            strafe_timer_ms: 0.0,
        }
    }

    /// Hits landed in the current combo string (0..3).
    #[must_use]
    pub fn combo(&self) -> usize {
        self.combo
    }

    /// Whether the desperate form is active.
    #[must_use]
    pub fn is_aggressive(&self) -> bool {
        self.aggressive
    }

    fn block_chance(&self) -> f32 {
        if self.aggressive {
            0.25
        } else {
            0.5
        }
    }
}

impl EnemyBrain for Defender {
    fn name(&self) -> &'static str {
        "jedi_defender"
    }

    fn attack_ids(&self) -> &'static [&'static str] {
        &[
            "jedi_slash_1",
            "jedi_slash_2",
            "jedi_slash_3",
            "jedi_counter",
            "jedi_force_push",
        ]
    }

    fn select_attack(&mut self, core: &mut EnemyCore) -> Option<String> {
        let countering = self
            .last_block_at
            .is_some_and(|at| core.now - at <= COUNTER_WINDOW_MS);
        if countering && core.perception.is_ready("jedi_counter") {
            self.last_block_at = None;
            return Some("jedi_counter".to_owned());
        }
        if core.perception.force_energy >= FORCE_PUSH_COST
            && core.perception.is_ready("jedi_force_push")
            && core.distance_to_target() <= FORCE_PUSH_RANGE
            && core.rng.chance(0.25)
        {
            return Some("jedi_force_push".to_owned());
        }
        let attack = COMBO_CHAIN[self.combo];
        self.combo = (self.combo + 1) % COMBO_CHAIN.len();
        Some(attack.to_owned())
    }

    fn on_attack_rejected(&mut self, _core: &mut EnemyCore, _attack_id: &str) {
        self.combo = 0;
    }

    fn chase(&mut self, core: &mut EnemyCore, dt_ms: f32) {
        if core.run_behaviors(dt_ms) {
            return;
        }
        let Some(target) = core.perception.target_position else {
            core.stop();
            return;
        };
        if core.distance_to_target() > core.config.attack_range * 0.9 || core.can_attack() {
            core.move_towards(target, 1.0);
            return;
        }
        self.strafe_timer_ms += dt_ms;
        if self.strafe_timer_ms >= STRAFE_SWITCH_MS {
            self.strafe_timer_ms = 0.0;
            self.strafe_side = -self.strafe_side;
        }
        core.strafe(self.strafe_side, 0.4);
    }

    fn think(&mut self, core: &mut EnemyCore, _dt_ms: f32) {
        if !self.aggressive && core.perception.health_fraction < AGGRESSIVE_HEALTH {
            self.aggressive = true;
            info!("{} switches to aggressive form", core.id);
            core.bus.emit(GameEvent::new(
                topics::ENEMY_STANCE_CHANGE,
                EventPayload::Stance(StanceEvent {
                    entity: core.id,
                    stance: "aggressive".to_owned(),
                }),
            ));
        }

        let swing_started = core.perception.target_attacking && !self.saw_attack;
        self.saw_attack = core.perception.target_attacking;
        core.wants_block = swing_started
            && !core.perception.is_attacking
            && core.distance_to_target() <= GUARD_REACTION_RANGE
            && core.rng.chance(self.block_chance());
    }

    fn on_damaged(&mut self, _core: &mut EnemyCore, _damage: f32) {
        self.combo = 0;
    }

    fn on_blocked(&mut self, core: &mut EnemyCore, _result: BlockResult) {
        self.last_block_at = Some(core.now);
    }

    fn auto_block(&self, core: &EnemyCore) -> Option<AutoBlockProfile> {
        if core.perception.is_attacking {
            return None;
        }
        let chance = if self.aggressive { 0.15 } else { 0.35 };
        Some(AutoBlockProfile {
            chance,
            effectiveness: 0.7,
        })
    }

    fn cooldown_scale(&self, _core: &EnemyCore) -> f32 {
        if self.aggressive {
            0.6
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::enemy::EnemyConfig;
    use crate::events::EventBus;
    use crate::faction::Faction;
    use temple_common::{EntityId, SimRng, Vec2};

    fn core() -> EnemyCore {
        let mut core = EnemyCore::new(
            EntityId::from_raw(8),
            Faction::Jedi,
            EnemyConfig::defender(),
            Vec2::ZERO,
            SimRng::new(3),
            EventBus::new(),
        );
        core.perception.target_position = Some(Vec2::new(50.0, 0.0));
        core.perception.health_fraction = 1.0;
        core
    }

    #[test]
    fn test_combo_cycles_and_resets() {
        let mut brain = Defender::new();
        let mut core = core();
        let picks: Vec<_> = (0..4).filter_map(|_| brain.select_attack(&mut core)).collect();
        assert_eq!(picks, ["jedi_slash_1", "jedi_slash_2", "jedi_slash_3", "jedi_slash_1"]);

        brain.on_attack_rejected(&mut core, "jedi_slash_2");
        assert_eq!(brain.combo(), 0);
        assert_eq!(brain.select_attack(&mut core).as_deref(), Some("jedi_slash_1"));
    }

    #[test]
    fn test_counter_only_right_after_block() {
        let mut brain = Defender::new();
        let mut core = core();
        core.now = 1000.0;
        brain.on_blocked(&mut core, BlockResult::Block);
        core.now = 1250.0;
        assert_eq!(brain.select_attack(&mut core).as_deref(), Some("jedi_counter"));

        brain.on_blocked(&mut core, BlockResult::Block);
        core.now = 1600.0;
        assert_eq!(brain.select_attack(&mut core).as_deref(), Some("jedi_slash_1"));
    }

    #[test]
    fn test_counter_on_cooldown_falls_back_to_combo() {
        let mut brain = Defender::new();
        let mut core = core();
        brain.on_blocked(&mut core, BlockResult::Parry);
        core.perception.cooldowns.insert("jedi_counter".to_owned(), 400.0);
        assert_eq!(brain.select_attack(&mut core).as_deref(), Some("jedi_slash_1"));
    }

    #[test]
    fn test_aggressive_form_once() {
        let mut brain = Defender::new();
        let mut core = core();
        let changes = Rc::new(Cell::new(0));
        let counter = Rc::clone(&changes);
        core.bus.on(topics::ENEMY_STANCE_CHANGE, 0, move |_| counter.set(counter.get() + 1));

        core.perception.health_fraction = 0.2;
        brain.think(&mut core, 16.0);
        brain.think(&mut core, 16.0);
        assert_eq!(changes.get(), 1);
        assert!(brain.is_aggressive());
        assert_eq!(brain.cooldown_scale(&core), 0.6);
        assert_eq!(brain.auto_block(&core).map(|p| p.chance), Some(0.15));
    }

    #[test]
    fn test_no_auto_block_mid_swing() {
        let brain = Defender::new();
        let mut core = core();
        assert_eq!(brain.auto_block(&core).map(|p| p.effectiveness), Some(0.7));
        core.perception.is_attacking = true;
        assert_eq!(brain.auto_block(&core), None);
    }

    #[test]
    fn test_block_intent_is_edge_triggered() {
        let mut brain = Defender::new();
        let mut core = core();
        core.perception.target_attacking = true;
        let mut raised = false;
        for seed in 0..32 {
            core.rng = SimRng::new(seed);
            brain.saw_attack = false;
            brain.think(&mut core, 16.0);
            raised |= core.wants_block;
        }
        assert!(raised);
        brain.think(&mut core, 16.0);
        assert!(!core.wants_block, "held swing does not re-trigger");
    }
}
