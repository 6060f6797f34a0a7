//! Headless fight simulation.
//!
//! Owns the clock, bus, combat manager, player, AI combatants and squads and
//! advances them in a fixed order every tick:
//!
//! 1. advance the clock
//! 2. player update
//! 3. every AI combatant update (id order)
//! 4. squad coordination, formation slots pushed to members
//! 5. combat update: all hits of the tick resolved together
//! 6. bus flush
//! 7. dead members dropped from squads, summons spawned

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use temple_common::{EntityId, IdAllocator, SimClock, SimRng, SquadId, Vec2};
use tracing::{debug, info};

use crate::behavior::{BehaviorSet, Chase, Flee, Formation, Surround};
use crate::boss::Boss;
use crate::combat::{CombatConfig, CombatManager, CombatantView};
use crate::combat_stats::CombatStats;
use crate::defender::Defender;
use crate::enemy::{CombatState, Combatant, Enemy, EnemyBrain, EnemyConfig, EnemyCore};
use crate::events::{topics, EventBus, EventPayload, ListenerId, SummonEvent};
use crate::faction::Faction;
use crate::force::ForcePool;
use crate::player::{Player, PlayerConfig, PlayerIntent};
use crate::squad::{MemberStatus, SquadConfig, SquadCoordinator};
use crate::temple_guard::TempleGuard;
use crate::trooper::Trooper;

/// Simulation-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Seed for every random stream
    pub seed: u64,
    /// Combat tuning
    pub combat: CombatConfig,
    /// Squad tuning
    pub squad: SquadConfig,
    /// Player tuning
    pub player: PlayerConfig,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            seed: 42,
            combat: CombatConfig::default(),
            squad: SquadConfig::default(),
            player: PlayerConfig::default(),
        }
    }
}

/// AI archetypes the simulation can spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnemyKind {
    /// Allied clone trooper
    Trooper,
    /// Jedi defender
    Defender,
    /// Jedi apprentice called in by the boss
    Apprentice,
    /// Temple guard
    TempleGuard,
    /// Boss duelist
    Boss,
}

impl EnemyKind {
    /// Faction fielded by this archetype.
    #[must_use]
    pub const fn faction(self) -> Faction {
        match self {
            Self::Trooper => Faction::Imperial,
            Self::Defender | Self::Apprentice => Faction::Jedi,
            Self::TempleGuard => Faction::TempleGuard,
            Self::Boss => Faction::Boss,
        }
    }

    fn config(self) -> EnemyConfig {
        match self {
            Self::Trooper => EnemyConfig::trooper(),
            Self::Defender | Self::Apprentice => EnemyConfig::defender(),
            Self::TempleGuard => EnemyConfig::temple_guard(),
            Self::Boss => EnemyConfig::boss(),
        }
    }

    fn stats(self) -> CombatStats {
        let base = CombatStats::for_faction(self.faction());
        match self {
            Self::Apprentice => base.with_health(100.0),
            _ => base,
        }
    }

    fn force_pool(self) -> Option<ForcePool> {
        match self {
            Self::Defender => Some(ForcePool::new(60.0, 6.0, 1500.0)),
            Self::Boss => Some(ForcePool::boss()),
            Self::Trooper | Self::Apprentice | Self::TempleGuard => None,
        }
    }

    /// Default movement behaviours for the archetype.
    #[must_use]
    pub fn default_behaviors(self, id: EntityId) -> BehaviorSet {
        match self {
            Self::Trooper => BehaviorSet::new().with(Flee::new(0.15, 150.0)),
            Self::Defender => BehaviorSet::new().with(Chase::new(0.8)),
            Self::Apprentice => {
                let bearing = (id.raw() % 8) as f32 * std::f32::consts::FRAC_PI_4;
                BehaviorSet::new().with(Formation::default()).with(Surround::new(70.0, bearing))
            }
            Self::TempleGuard => BehaviorSet::new().with(Formation::default()),
            Self::Boss => BehaviorSet::new().with(Chase::new(1.0)),
        }
    }
}

/// Picks the closest living hostile to `from`.
#[must_use]
pub fn nearest_hostile(views: &[CombatantView], me: EntityId, faction: Faction, from: Vec2) -> Option<EntityId> {
    views
        .iter()
        .filter(|v| v.id != me && !v.dead && !faction.is_allied_with(v.faction))
        .min_by(|a, b| a.position.distance(from).total_cmp(&b.position.distance(from)))
        .map(|v| v.id)
}

/// Headless fight.
pub struct Simulation {
    settings: SimulationSettings,
    clock: SimClock,
    bus: EventBus,
    ids: IdAllocator,
    rng: SimRng,
    combat: CombatManager,
    player: Option<Player>,
    combatants: BTreeMap<EntityId, Box<dyn Combatant>>,
    squads: SquadCoordinator,
    summons: Rc<RefCell<Vec<SummonEvent>>>,
    summon_listener: ListenerId,
    ticks: u64,
}

impl Simulation {
    /// Creates an empty simulation.
    #[must_use]
    pub fn new(settings: SimulationSettings) -> Self {
        let clock = SimClock::new();
        let bus = EventBus::with_clock(clock.clone());
        let rng = SimRng::new(settings.seed);
        let combat = CombatManager::new(settings.combat.clone(), clock.clone(), bus.clone(), rng.derive(1));
        let squads = SquadCoordinator::new(settings.squad.clone(), clock.clone(), bus.clone());
        let summons = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&summons);
        let summon_listener = bus.on(topics::BOSS_SUMMON_APPRENTICES, 0, move |event| {
            if let EventPayload::Summon(summon) = &event.payload {
                sink.borrow_mut().push(summon.clone());
            }
        });
        Self {
            settings,
            clock,
            bus,
            ids: IdAllocator::new(),
            rng: rng.derive(2),
            combat,
            player: None,
            combatants: BTreeMap::new(),
            squads,
            summons,
            summon_listener,
            ticks: 0,
        }
    }

    /// Settings the simulation was created with.
    #[must_use]
    pub fn settings(&self) -> &SimulationSettings {
        &self.settings
    }

    /// Shared clock.
    #[must_use]
    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    /// Shared bus.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Combat manager.
    #[must_use]
    pub fn combat(&self) -> &CombatManager {
        &self.combat
    }

    /// Combat manager, mutably.
    pub fn combat_mut(&mut self) -> &mut CombatManager {
        &mut self.combat
    }

    /// Squad coordinator.
    #[must_use]
    pub fn squads(&self) -> &SquadCoordinator {
        &self.squads
    }

    /// The player, once spawned.
    #[must_use]
    pub fn player(&self) -> Option<&Player> {
        self.player.as_ref()
    }

    /// Ticks run so far.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// An AI combatant.
    #[must_use]
    pub fn combatant(&self, id: EntityId) -> Option<&dyn Combatant> {
        self.combatants.get(&id).map(|c| c.as_ref() as &dyn Combatant)
    }

    /// Every AI combatant in id order.
    pub fn combatants(&self) -> impl Iterator<Item = &dyn Combatant> {
        self.combatants.values().map(|c| c.as_ref() as &dyn Combatant)
    }

    /// Living AI combatants of a faction.
    #[must_use]
    pub fn living_count(&self, faction: Faction) -> usize {
        self.combatants
            .values()
            .filter(|c| c.faction() == faction && !c.is_dead())
            .count()
    }

    // ========================================================================
    // Spawning
    // ========================================================================

    /// Spawns the player. Replaces any previous player.
    pub fn spawn_player(&mut self, position: Vec2) -> EntityId {
        let id = self.ids.next_entity();
        let config = self.settings.player.clone();
        self.combat
            .register_entity(id, CombatStats::for_faction(Faction::Sith), true, position, config.size);
        self.combat.set_force_pool(id, ForcePool::player());
        if let Some(old) = self.player.take() {
            self.combat.unregister_entity(old.id());
        }
        self.player = Some(Player::new(id, config, position, self.bus.clone()));
        info!("Player {} spawned at ({:.0}, {:.0})", id, position.x, position.y);
        id
    }

    /// Spawns an AI combatant with its default behaviours.
    pub fn spawn_enemy(&mut self, kind: EnemyKind, position: Vec2) -> EntityId {
        let id = self.ids.next_entity();
        let behaviors = kind.default_behaviors(id);
        self.spawn_with(id, kind, position, behaviors, None)
    }

    /// Spawns an AI combatant with custom behaviours.
    pub fn spawn_enemy_with(&mut self, kind: EnemyKind, position: Vec2, behaviors: BehaviorSet) -> EntityId {
        let id = self.ids.next_entity();
        self.spawn_with(id, kind, position, behaviors, None)
    }

    /// Spawns a trooper that knows where cover is.
    pub fn spawn_trooper_with_cover(&mut self, position: Vec2, cover: Vec<Vec2>) -> EntityId {
        let id = self.ids.next_entity();
        let behaviors = EnemyKind::Trooper.default_behaviors(id);
        let brain = Trooper::new().with_cover(cover);
        self.insert(id, EnemyKind::Trooper, position, behaviors, brain)
    }

    /// Spawns a temple guard paired with `partner` and/or protecting `protectee`.
    pub fn spawn_guard(&mut self, position: Vec2, partner: Option<EntityId>, protectee: Option<EntityId>) -> EntityId {
        let id = self.ids.next_entity();
        self.spawn_with(id, EnemyKind::TempleGuard, position, BehaviorSet::new(), Some((partner, protectee)))
    }

    fn spawn_with(
        &mut self,
        id: EntityId,
        kind: EnemyKind,
        position: Vec2,
        behaviors: BehaviorSet,
        guard_duty: Option<(Option<EntityId>, Option<EntityId>)>,
    ) -> EntityId {
        match kind {
            EnemyKind::Trooper => self.insert(id, kind, position, behaviors, Trooper::new()),
            EnemyKind::Defender | EnemyKind::Apprentice => self.insert(id, kind, position, behaviors, Defender::new()),
            EnemyKind::TempleGuard => {
                let mut guard = TempleGuard::new();
                if let Some((partner, protectee)) = guard_duty {
                    if let Some(partner) = partner {
                        guard = guard.with_partner(partner);
                    }
                    if let Some(protectee) = protectee {
                        guard = guard.with_protectee(protectee);
                    }
                }
                self.insert(id, kind, position, behaviors, guard)
            }
            EnemyKind::Boss => self.insert(id, kind, position, behaviors, Boss::new()),
        }
    }

    fn insert<B: EnemyBrain + 'static>(
        &mut self,
        id: EntityId,
        kind: EnemyKind,
        position: Vec2,
        behaviors: BehaviorSet,
        brain: B,
    ) -> EntityId {
        let config = kind.config();
        self.combat
            .register_entity(id, kind.stats(), false, position, config.size);
        if let Some(pool) = kind.force_pool() {
            self.combat.set_force_pool(id, pool);
        }
        let core = EnemyCore::new(id, kind.faction(), config, position, self.rng.derive(id.raw()), self.bus.clone());
        let enemy = Enemy::new(core, brain, self.clock.clone()).with_behaviors(behaviors);
        debug!("Spawned {:?} {} at ({:.0}, {:.0})", kind, id, position.x, position.y);
        self.combatants.insert(id, Box::new(enemy));
        id
    }

    /// Groups existing combatants into a squad. Unknown ids are skipped.
    pub fn form_squad(&mut self, members: &[EntityId]) -> Option<SquadId> {
        let known: Vec<EntityId> = members
            .iter()
            .copied()
            .filter(|m| self.combatants.contains_key(m) && self.squads.squad_of(*m).is_none())
            .collect();
        if known.is_empty() {
            return None;
        }
        let id = self.squads.create_squad(&mut self.ids);
        if let Some(squad) = self.squads.squad_mut(id) {
            for member in known {
                squad.add_member(member);
            }
            squad.assign_roles();
        }
        self.push_roles();
        Some(id)
    }

    /// Replaces the player's input for the next tick.
    pub fn set_player_intent(&mut self, intent: PlayerIntent) {
        if let Some(player) = self.player.as_mut() {
            player.set_intent(intent);
        }
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Advances the fight by `dt_ms`.
    pub fn tick(&mut self, dt_ms: f32) {
        self.clock.advance(f64::from(dt_ms));
        self.ticks += 1;

        if let Some(player) = self.player.as_mut() {
            player.update(&mut self.combat, dt_ms);
        }

        self.retarget();
        for combatant in self.combatants.values_mut() {
            combatant.update(&mut self.combat, dt_ms);
        }

        self.coordinate_squads();
        self.combat.update(dt_ms);
        self.bus.flush();

        let fallen: Vec<EntityId> = self
            .combatants
            .values()
            .filter(|c| c.is_dead())
            .map(|c| c.id())
            .filter(|id| self.squads.squad_of(*id).is_some())
            .collect();
        for id in fallen {
            self.squads.remove_member(id);
        }
        self.push_roles();
        self.spawn_summons();
    }

    /// Runs whole ticks until `duration_ms` has elapsed.
    pub fn run(&mut self, duration_ms: f32, dt_ms: f32) {
        if dt_ms <= 0.0 {
            return;
        }
        let mut elapsed = 0.0;
        while elapsed < duration_ms {
            self.tick(dt_ms);
            elapsed += dt_ms;
        }
    }

    fn retarget(&mut self) {
        let views = self.combat.living();
        for combatant in self.combatants.values_mut() {
            if combatant.is_dead() {
                continue;
            }
            let valid = combatant
                .target()
                .and_then(|t| views.iter().find(|v| v.id == t))
                .is_some_and(|v| !combatant.faction().is_allied_with(v.faction));
            if !valid {
                let target = nearest_hostile(&views, combatant.id(), combatant.faction(), combatant.position());
                combatant.set_target(target);
            }
        }
    }

    fn coordinate_squads(&mut self) {
        let views = self.combat.living();
        for id in self.squads.ids() {
            let Some(squad) = self.squads.squad_mut(id) else {
                continue;
            };
            let anchor = squad
                .leader()
                .and_then(|l| views.iter().find(|v| v.id == l))
                .map(|v| (v.id, v.faction, v.position));
            let target = anchor.and_then(|(me, faction, at)| nearest_hostile(&views, me, faction, at));
            if squad.target() != target {
                squad.set_target(target);
            }
        }

        let combat = &self.combat;
        let lookup = |id: EntityId| {
            combat.view(id).map(|v| MemberStatus {
                position: v.position,
                health_fraction: v.health_fraction,
                alive: !v.dead,
            })
        };
        self.squads.update(lookup, &mut self.rng);

        let slots = self.squads.formation_targets();
        for combatant in self.combatants.values_mut() {
            let slot = slots.iter().find(|(m, _)| *m == combatant.id()).map(|(_, p)| *p);
            combatant.set_formation_slot(slot);
        }
    }

    fn push_roles(&mut self) {
        for combatant in self.combatants.values_mut() {
            let role = self
                .squads
                .squad_of(combatant.id())
                .and_then(|s| s.role(combatant.id()));
            combatant.set_role(role);
        }
    }

    fn spawn_summons(&mut self) {
        let summons: Vec<SummonEvent> = self.summons.borrow_mut().drain(..).collect();
        for summon in summons {
            info!("Boss {} calls {} apprentices", summon.boss, summon.count);
            for i in 0..summon.count {
                let side = if i % 2 == 0 { 1.0 } else { -1.0 };
                let offset = Vec2::new(side * (80.0 + 40.0 * (i / 2) as f32), 0.0);
                self.spawn_enemy(EnemyKind::Apprentice, summon.position + offset);
            }
        }
    }

    /// Active state of an AI combatant.
    #[must_use]
    pub fn state_of(&self, id: EntityId) -> Option<CombatState> {
        self.combatants.get(&id).and_then(|c| c.state())
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.bus.off_listener(self.summon_listener);
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("now_ms", &self.clock.now_ms())
            .field("ticks", &self.ticks)
            .field("player", &self.player)
            .field("combatants", &self.combatants.len())
            .field("squads", &self.squads.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health(sim: &Simulation, id: EntityId) -> f32 {
        sim.combat().stats(id).map_or(0.0, |s| s.health)
    }

    #[test]
    fn test_nearest_hostile_skips_allies_and_dead() {
        let view = |raw, faction, x: f32, dead| CombatantView {
            id: EntityId::from_raw(raw),
            faction,
            is_player: false,
            position: Vec2::new(x, 0.0),
            health_fraction: 1.0,
            is_attacking: false,
            is_blocking: false,
            dead,
        };
        let views = [
            view(1, Faction::Sith, 10.0, false),
            view(2, Faction::Imperial, 5.0, false),
            view(3, Faction::Jedi, 50.0, true),
            view(4, Faction::Jedi, 80.0, false),
        ];
        let me = EntityId::from_raw(2);
        assert_eq!(nearest_hostile(&views, me, Faction::Imperial, Vec2::ZERO), Some(EntityId::from_raw(4)));
        assert_eq!(nearest_hostile(&views[..3], me, Faction::Imperial, Vec2::ZERO), None);
    }

    #[test]
    fn test_same_seed_same_fight() {
        let fight = || {
            let mut sim = Simulation::new(SimulationSettings::default());
            let trooper = sim.spawn_enemy(EnemyKind::Trooper, Vec2::ZERO);
            let jedi = sim.spawn_enemy(EnemyKind::Defender, Vec2::new(200.0, 0.0));
            sim.run(4000.0, 16.0);
            (health(&sim, trooper), health(&sim, jedi))
        };
        let (a, b) = (fight(), fight());
        assert_eq!(a, b);
        assert!(a.0 < 80.0 || a.1 < 150.0, "they fought: {a:?}");
    }

    #[test]
    fn test_squad_members_receive_slots_and_roles() {
        let mut sim = Simulation::new(SimulationSettings::default());
        let troopers: Vec<EntityId> = (0..3)
            .map(|i| sim.spawn_enemy(EnemyKind::Trooper, Vec2::new(0.0, i as f32 * 40.0)))
            .collect();
        sim.spawn_enemy(EnemyKind::Defender, Vec2::new(300.0, 0.0));
        let squad = sim.form_squad(&troopers);
        assert!(squad.is_some());
        sim.tick(16.0);

        let squad = squad.and_then(|id| sim.squads().squad(id));
        assert!(squad.is_some_and(|s| s.target().is_some()));
        for member in &troopers {
            assert!(squad.is_some_and(|s| s.slot(*member).is_some()));
        }
    }

    #[test]
    fn test_dead_members_leave_squad() {
        let mut sim = Simulation::new(SimulationSettings::default());
        let guards: Vec<EntityId> = (0..3)
            .map(|i| sim.spawn_enemy(EnemyKind::TempleGuard, Vec2::new(i as f32 * 50.0, 0.0)))
            .collect();
        let squad = sim.form_squad(&guards);
        sim.combat_mut().kill(guards[0]);
        sim.tick(16.0);
        sim.tick(16.0);
        assert!(sim.combatant(guards[0]).is_some_and(|c| c.is_dead()));
        if let Some(s) = squad.and_then(|id| sim.squads().squad(id)) {
            assert!(!s.contains(guards[0]));
            assert_ne!(s.leader(), Some(guards[0]));
        }
    }

    #[test]
    fn test_boss_summons_apprentices_once() {
        let mut sim = Simulation::new(SimulationSettings::default());
        sim.spawn_player(Vec2::new(3000.0, 0.0));
        let boss = sim.spawn_enemy(EnemyKind::Boss, Vec2::ZERO);
        sim.tick(16.0);
        assert_eq!(sim.living_count(Faction::Jedi), 0);

        sim.combat_mut().apply_damage(boss, 2200.0, None);
        sim.run(200.0, 16.0);
        assert_eq!(sim.living_count(Faction::Jedi), 2);

        sim.combat_mut().apply_damage(boss, 100.0, None);
        sim.run(200.0, 16.0);
        assert_eq!(sim.living_count(Faction::Jedi), 2);
    }

    #[test]
    fn test_player_intent_reaches_player() {
        let mut sim = Simulation::new(SimulationSettings::default());
        sim.spawn_player(Vec2::ZERO);
        sim.set_player_intent(PlayerIntent {
            movement: Vec2::X,
            ..PlayerIntent::default()
        });
        sim.run(160.0, 16.0);
        assert!(sim.player().is_some_and(|p| p.position().x > 0.0));
    }
}
