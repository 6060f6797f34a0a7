//! Boss duelist: three lightsaber forms gated by health, an enrage timer and
//! a one-time apprentice summon.
//!
//! Forms only ever move forward (ShiiCho → Ataru → Juyo). Each transition
//! locks the boss out of actions for a moment and announces itself on the bus;
//! entering Juyo calls in apprentices exactly once per fight.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::attack_data::get_attack_data;
use crate::block::BlockResult;
use crate::combat::AutoBlockProfile;
use crate::enemy::{CombatCommand, EnemyBrain, EnemyCore};
use crate::events::{
    topics, BossPhaseEvent, EventPayload, GameEvent, StanceEvent, SummonEvent,
};

const TRANSITION_LOCK_MS: f32 = 1500.0;
const ENRAGE_AFTER_MS: f64 = 60_000.0;
const ENRAGE_DAMAGE: f32 = 1.5;
const ENRAGE_SPEED: f32 = 1.3;
const ENRAGE_COOLDOWN: f32 = 0.5;
const DESPERATION_HEALTH: f32 = 0.2;
const SUMMON_COUNT: u32 = 2;
const GAP_CLOSER_REACH: f32 = 300.0;
const CHAIN_COOLDOWN_SCALE: f32 = 0.25;

// ============================================================================
// Forms
// ============================================================================

/// Lightsaber form, chosen by remaining health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BossForm {
    /// Opening form (≥ 66% health)
    ShiiCho,
    /// Acrobatic form (33 to 66% health)
    Ataru,
    /// Final form (< 33% health)
    Juyo,
}

impl BossForm {
    /// Form for a health fraction.
    #[must_use]
    pub fn for_health(fraction: f32) -> Self {
        if fraction >= 0.66 {
            Self::ShiiCho
        } else if fraction >= 0.33 {
            Self::Ataru
        } else {
            Self::Juyo
        }
    }

    /// Attacks available in this form.
    #[must_use]
    pub const fn attack_pool(self) -> &'static [&'static str] {
        match self {
            Self::ShiiCho => &["shii_cho_sweep", "shii_cho_combo", "boss_leap_strike", "boss_force_pull"],
            Self::Ataru => &[
                "ataru_flurry",
                "ataru_flip_strike",
                "boss_leap_strike",
                "boss_force_pull",
                "boss_force_wave",
            ],
            Self::Juyo => &["juyo_onslaught", "boss_leap_strike", "boss_force_pull", "boss_force_wave"],
        }
    }

    /// Movement speed multiplier.
    #[must_use]
    pub const fn speed_multiplier(self) -> f32 {
        match self {
            Self::ShiiCho => 1.0,
            Self::Ataru => 1.2,
            Self::Juyo => 1.35,
        }
    }

    /// Multiplier on the pause after a full combo string.
    #[must_use]
    pub const fn cooldown_scale(self) -> f32 {
        match self {
            Self::ShiiCho => 1.0,
            Self::Ataru => 0.8,
            Self::Juyo => 0.6,
        }
    }

    /// Chance to guard against a new swing.
    #[must_use]
    pub const fn block_chance(self) -> f32 {
        match self {
            Self::ShiiCho => 0.5,
            Self::Ataru => 0.3,
            Self::Juyo => 0.15,
        }
    }

    /// Attacks chained before a full pause.
    #[must_use]
    pub const fn combo_cap(self) -> u32 {
        match self {
            Self::ShiiCho => 2,
            Self::Ataru => 4,
            Self::Juyo => 5,
        }
    }

    /// Display name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ShiiCho => "shii_cho",
            Self::Ataru => "ataru",
            Self::Juyo => "juyo",
        }
    }
}

/// How a boss move is used tactically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveTrait {
    /// Closes distance
    GapCloser,
    /// Hits all around
    AreaOfEffect,
    /// Regular swing
    Standard,
}

/// Tactical tag of a boss move.
#[must_use]
pub fn move_trait(attack_id: &str) -> MoveTrait {
    match attack_id {
        "boss_leap_strike" | "boss_force_pull" => MoveTrait::GapCloser,
        "boss_force_wave" | "juyo_fury" => MoveTrait::AreaOfEffect,
        _ => MoveTrait::Standard,
    }
}

/// Selection weight for a move trait at a given distance band.
#[must_use]
pub fn distance_weight(kind: MoveTrait, distance: f32, melee_range: f32) -> f32 {
    if distance > melee_range * 1.5 {
        match kind {
            MoveTrait::GapCloser => 4.0,
            MoveTrait::AreaOfEffect | MoveTrait::Standard => 0.0,
        }
    } else if distance < melee_range * 0.6 {
        match kind {
            MoveTrait::AreaOfEffect => 3.0,
            MoveTrait::GapCloser => 0.2,
            MoveTrait::Standard => 1.5,
        }
    } else {
        match kind {
            MoveTrait::AreaOfEffect => 1.0,
            MoveTrait::GapCloser => 0.5,
            MoveTrait::Standard => 2.0,
        }
    }
}

// ============================================================================
// Brain
// ============================================================================

/// Boss brain.
#[derive(Debug, Clone)]
pub struct Boss {
    form: BossForm,
    melee_range: f32,
    combo: u32,
    summoned: bool,
    enraged: bool,
    fight_started_at: Option<f64>,
    saw_attack: bool,
}

impl Default for Boss {
    fn default() -> Self {
        Self::new()
    }
}

impl Boss {
    /// Creates the boss in its opening form.
    #[must_use]
    pub fn new() -> Self {
        Self {
            form: BossForm::ShiiCho,
            melee_range: 80.0,
            combo: 0,
            summoned: false,
            enraged: false,
            fight_started_at: None,
            saw_attack: false,
        }
    }

    /// Current form.
    #[must_use]
    pub fn form(&self) -> BossForm {
        self.form
    }

    /// Whether the enrage has fired.
    #[must_use]
    pub fn is_enraged(&self) -> bool {
        self.enraged
    }

    /// Whether apprentices were already called in.
    #[must_use]
    pub fn has_summoned(&self) -> bool {
        self.summoned
    }

    fn can_afford(core: &EnemyCore, attack_id: &str) -> bool {
        get_attack_data(attack_id)
            .is_some_and(|a| a.force_cost.map_or(true, |cost| cost <= core.perception.force_energy))
    }

    fn gap_closer_ready(&self, core: &EnemyCore) -> bool {
        self.form
            .attack_pool()
            .iter()
            .any(|a| move_trait(a) == MoveTrait::GapCloser && core.perception.is_ready(a) && Self::can_afford(core, a))
    }

    fn advance_form(&mut self, core: &mut EnemyCore) {
        let next = BossForm::for_health(core.perception.health_fraction);
        if next <= self.form {
            return;
        }
        let from = self.form;
        self.form = next;
        self.combo = 0;
        info!("{} shifts from {} to {}", core.id, from.name(), next.name());
        core.lock_actions(TRANSITION_LOCK_MS);
        core.command(CombatCommand::CancelAttack);
        core.bus.emit(GameEvent::new(
            topics::BOSS_PHASE_TRANSITION,
            EventPayload::BossPhase(BossPhaseEvent {
                boss: core.id,
                from,
                to: next,
            }),
        ));
        if next == BossForm::Juyo && !self.summoned {
            self.summoned = true;
            info!("{} summons {} apprentices", core.id, SUMMON_COUNT);
            core.bus.emit(GameEvent::new(
                topics::BOSS_SUMMON_APPRENTICES,
                EventPayload::Summon(SummonEvent {
                    boss: core.id,
                    count: SUMMON_COUNT,
                    position: core.position(),
                }),
            ));
        }
    }

    fn check_enrage(&mut self, core: &mut EnemyCore) {
        if self.enraged {
            return;
        }
        let Some(started) = self.fight_started_at else {
            return;
        };
        if core.now - started < ENRAGE_AFTER_MS {
            return;
        }
        self.enraged = true;
        info!("{} is enraged", core.id);
        core.command(CombatCommand::ScaleAttackPower(ENRAGE_DAMAGE));
        core.bus.emit(GameEvent::new(
            topics::BOSS_ENRAGED,
            EventPayload::Stance(StanceEvent {
                entity: core.id,
                stance: "enraged".to_owned(),
            }),
        ));
    }
}

impl EnemyBrain for Boss {
    fn name(&self) -> &'static str {
        "cin_drallig"
    }

    fn attack_ids(&self) -> &'static [&'static str] {
        &[
            "shii_cho_sweep",
            "shii_cho_combo",
            "ataru_flurry",
            "ataru_flip_strike",
            "juyo_onslaught",
            "juyo_fury",
            "boss_leap_strike",
            "boss_force_wave",
            "boss_force_pull",
        ]
    }

    fn select_attack(&mut self, core: &mut EnemyCore) -> Option<String> {
        if self.form == BossForm::Juyo
            && core.perception.health_fraction < DESPERATION_HEALTH
            && core.perception.is_ready("juyo_fury")
        {
            return Some("juyo_fury".to_owned());
        }

        let distance = core.distance_to_target();
        let candidates: Vec<&str> = self
            .form
            .attack_pool()
            .iter()
            .copied()
            .filter(|a| core.perception.is_ready(a) && Self::can_afford(core, a))
            .collect();
        let weights: Vec<f32> = candidates
            .iter()
            .map(|a| distance_weight(move_trait(a), distance, self.melee_range))
            .collect();
        let pick = candidates.get(core.rng.weighted_index(&weights)?)?;

        if *pick == "boss_leap_strike" {
            if let Some(target) = core.perception.target_position {
                let landing = target - core.direction_to_target() * (self.melee_range * 0.5);
                core.body.position = landing;
            }
        }
        Some((*pick).to_owned())
    }

    fn on_attack_finished(&mut self, _core: &mut EnemyCore) {
        self.combo += 1;
        if self.combo >= self.form.combo_cap() {
            self.combo = 0;
        }
    }

    fn on_attack_rejected(&mut self, _core: &mut EnemyCore, _attack_id: &str) {
        self.combo = 0;
    }

    fn think(&mut self, core: &mut EnemyCore, _dt_ms: f32) {
        if self.fight_started_at.is_none() && core.has_target() {
            self.fight_started_at = Some(core.now);
        }
        self.advance_form(core);
        self.check_enrage(core);

        let enrage_speed = if self.enraged { ENRAGE_SPEED } else { 1.0 };
        core.speed_multiplier = self.form.speed_multiplier() * enrage_speed;
        core.config.attack_range = if self.gap_closer_ready(core) {
            GAP_CLOSER_REACH
        } else {
            self.melee_range
        };

        let swing_started = core.perception.target_attacking && !self.saw_attack;
        self.saw_attack = core.perception.target_attacking;
        core.wants_block = swing_started
            && !core.perception.is_attacking
            && !core.is_locked()
            && core.distance_to_target() <= self.melee_range * 1.5
            && core.rng.chance(self.form.block_chance());
    }

    fn on_blocked(&mut self, _core: &mut EnemyCore, _result: BlockResult) {
        self.combo = 0;
    }

    fn auto_block(&self, core: &EnemyCore) -> Option<AutoBlockProfile> {
        if core.perception.is_attacking || core.is_locked() {
            return None;
        }
        Some(AutoBlockProfile {
            chance: self.form.block_chance(),
            effectiveness: 0.8,
        })
    }

    fn cooldown_scale(&self, _core: &EnemyCore) -> f32 {
        let enrage = if self.enraged { ENRAGE_COOLDOWN } else { 1.0 };
        let chaining = self.combo + 1 < self.form.combo_cap();
        let base = if chaining {
            CHAIN_COOLDOWN_SCALE
        } else {
            self.form.cooldown_scale()
        };
        base * enrage
    }

    fn on_death(&mut self, core: &mut EnemyCore) {
        info!("{} falls in {} form", core.id, self.form.name());
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::combat_stats::CombatStats;
    use crate::enemy::tests::{spawn, step, world, World, FOE, PLAYER};
    use crate::enemy::{Combatant, Enemy, EnemyConfig};
    use crate::events::EventBus;
    use crate::faction::Faction;
    use temple_common::{EntityId, SimRng, Vec2};

    fn arena(player_at: Vec2) -> (World, Enemy<Boss>) {
        let mut w = world();
        w.combat.register_entity(
            PLAYER,
            CombatStats::for_faction(Faction::Sith),
            true,
            player_at,
            Vec2::new(32.0, 48.0),
        );
        let boss = spawn(
            &mut w,
            Boss::new(),
            Faction::Boss,
            EnemyConfig::boss(),
            CombatStats::for_faction(Faction::Boss),
            Vec2::ZERO,
        );
        (w, boss)
    }

    fn record(bus: &EventBus, topic: &'static str) -> Rc<RefCell<Vec<EventPayload>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        bus.on(topic, 0, move |event| sink.borrow_mut().push(event.payload.clone()));
        log
    }

    #[test]
    fn test_form_thresholds() {
        assert_eq!(BossForm::for_health(1.0), BossForm::ShiiCho);
        assert_eq!(BossForm::for_health(0.66), BossForm::ShiiCho);
        assert_eq!(BossForm::for_health(0.633), BossForm::Ataru);
        assert_eq!(BossForm::for_health(0.33), BossForm::Ataru);
        assert_eq!(BossForm::for_health(0.3), BossForm::Juyo);
    }

    #[test]
    fn test_phase_transitions_and_single_summon() {
        let (mut w, mut boss) = arena(Vec2::new(5000.0, 0.0));
        let phases = record(&w.bus, topics::BOSS_PHASE_TRANSITION);
        let summons = record(&w.bus, topics::BOSS_SUMMON_APPRENTICES);
        step(&mut w, &mut boss, 2);
        assert_eq!(boss.brain().form(), BossForm::ShiiCho);

        w.combat.apply_damage(FOE, 1100.0, None);
        step(&mut w, &mut boss, 3);
        assert_eq!(boss.brain().form(), BossForm::Ataru);
        assert_eq!(phases.borrow().len(), 1);
        assert!(boss.core().is_locked());

        w.combat.apply_damage(FOE, 1000.0, None);
        step(&mut w, &mut boss, 3);
        assert_eq!(boss.brain().form(), BossForm::Juyo);
        step(&mut w, &mut boss, 30);

        assert_eq!(
            *phases.borrow(),
            vec![
                EventPayload::BossPhase(BossPhaseEvent {
                    boss: FOE,
                    from: BossForm::ShiiCho,
                    to: BossForm::Ataru,
                }),
                EventPayload::BossPhase(BossPhaseEvent {
                    boss: FOE,
                    from: BossForm::Ataru,
                    to: BossForm::Juyo,
                }),
            ]
        );
        assert_eq!(summons.borrow().len(), 1);
        assert!(boss.brain().has_summoned());
    }

    #[test]
    fn test_form_never_reverts() {
        let (mut w, mut boss) = arena(Vec2::new(5000.0, 0.0));
        w.combat.apply_damage(FOE, 1500.0, None);
        step(&mut w, &mut boss, 2);
        assert_eq!(boss.brain().form(), BossForm::Ataru);
        if let Some(stats) = w.combat.stats_mut(FOE) {
            stats.heal(3000.0);
        }
        step(&mut w, &mut boss, 2);
        assert_eq!(boss.brain().form(), BossForm::Ataru);
    }

    #[test]
    fn test_enrage_fires_once() {
        let (mut w, mut boss) = arena(Vec2::new(5000.0, 0.0));
        let enraged = record(&w.bus, topics::BOSS_ENRAGED);
        step(&mut w, &mut boss, 1);
        let base_power = w.combat.stats(FOE).map_or(0.0, |s| s.attack_power);

        w.clock.advance(60_000.0);
        step(&mut w, &mut boss, 5);
        w.clock.advance(60_000.0);
        step(&mut w, &mut boss, 5);

        assert!(boss.brain().is_enraged());
        assert_eq!(enraged.borrow().len(), 1);
        let power = w.combat.stats(FOE).map_or(0.0, |s| s.attack_power);
        assert!((power - base_power * 1.5).abs() < 1e-4);
        assert!((boss.core().speed_multiplier - 1.3).abs() < 1e-4);
    }

    fn core() -> EnemyCore {
        let mut core = EnemyCore::new(
            EntityId::from_raw(30),
            Faction::Boss,
            EnemyConfig::boss(),
            Vec2::ZERO,
            SimRng::new(11),
            EventBus::new(),
        );
        core.perception.target_position = Some(Vec2::new(30.0, 0.0));
        core.perception.health_fraction = 1.0;
        core
    }

    #[test]
    fn test_desperation_super_in_juyo() {
        let mut brain = Boss::new();
        let mut core = core();
        core.perception.health_fraction = 0.15;
        brain.think(&mut core, 16.0);
        assert_eq!(brain.form(), BossForm::Juyo);
        assert_eq!(brain.select_attack(&mut core).as_deref(), Some("juyo_fury"));

        core.perception.cooldowns.insert("juyo_fury".to_owned(), 9000.0);
        assert_ne!(brain.select_attack(&mut core).as_deref(), Some("juyo_fury"));
    }

    #[test]
    fn test_far_target_only_gap_closers() {
        let mut brain = Boss::new();
        let mut core = core();
        core.perception.target_position = Some(Vec2::new(250.0, 0.0));
        core.perception.force_energy = 100.0;
        for _ in 0..20 {
            core.body.position = Vec2::ZERO;
            let pick = brain.select_attack(&mut core);
            assert!(pick.as_deref().is_some_and(|p| move_trait(p) == MoveTrait::GapCloser));
        }
    }

    #[test]
    fn test_force_moves_need_energy() {
        let mut brain = Boss::new();
        let mut core = core();
        core.perception.target_position = Some(Vec2::new(250.0, 0.0));
        core.perception.force_energy = 0.0;
        core.perception.cooldowns.insert("boss_leap_strike".to_owned(), 5000.0);
        assert_eq!(brain.select_attack(&mut core), None);
        brain.think(&mut core, 16.0);
        assert_eq!(core.config.attack_range, 80.0);
    }

    #[test]
    fn test_combo_cap_controls_pause() {
        let mut brain = Boss::new();
        let core = core();
        assert_eq!(brain.cooldown_scale(&core), CHAIN_COOLDOWN_SCALE);
        let mut core = core;
        brain.on_attack_finished(&mut core);
        assert_eq!(brain.cooldown_scale(&core), 1.0);
        brain.on_attack_finished(&mut core);
        assert_eq!(brain.cooldown_scale(&core), CHAIN_COOLDOWN_SCALE);
    }
}
