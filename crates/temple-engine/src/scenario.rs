//! Fight scenarios and the scripted player.

use serde::{Deserialize, Serialize};
use temple_common::{EntityId, SquadId, TempleError, TempleResult, Vec2};
use temple_gameplay::{CombatManager, Combatant, EnemyKind, Faction, PlayerIntent, Simulation};
use tracing::{info, warn};

/// Which fight to stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    /// Vader and a trooper squad against Jedi defenders
    Skirmish,
    /// Temple guards holding a corridor, paired and protecting a Jedi
    GuardPost,
    /// Vader and troopers against the boss
    BossDuel,
}

/// Scenario roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Fight to stage
    pub kind: ScenarioKind,
    /// Spawn the player
    pub player: bool,
    /// Drive the player with the built-in script
    pub autopilot: bool,
    /// Clone troopers on Vader's side
    pub troopers: u32,
    /// Jedi defenders
    pub defenders: u32,
    /// Temple guards
    pub guards: u32,
    /// Cover points troopers may use
    pub cover: Vec<Vec2>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            kind: ScenarioKind::Skirmish,
            player: true,
            autopilot: true,
            troopers: 4,
            defenders: 3,
            guards: 0,
            cover: Vec::new(),
        }
    }
}

impl ScenarioConfig {
    const MAX_PER_SIDE: u32 = 32;

    /// Caps roster sizes. Returns the names of the fields that changed.
    pub fn validate(&mut self) -> Vec<&'static str> {
        let mut changed = Vec::new();
        for (name, count) in [
            ("scenario.troopers", &mut self.troopers),
            ("scenario.defenders", &mut self.defenders),
            ("scenario.guards", &mut self.guards),
        ] {
            if *count > Self::MAX_PER_SIDE {
                warn!("Config `{name}` = {count} too large, using {}", Self::MAX_PER_SIDE);
                *count = Self::MAX_PER_SIDE;
                changed.push(name);
            }
        }
        changed
    }
}

/// What was put on the field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    /// Player id
    pub player: Option<EntityId>,
    /// Vader's side (troopers)
    pub allies: Vec<EntityId>,
    /// Everyone hostile to Vader
    pub foes: Vec<EntityId>,
    /// Squads formed
    pub squads: Vec<SquadId>,
}

/// Populates `sim` according to `config`.
pub fn populate(sim: &mut Simulation, config: &ScenarioConfig) -> TempleResult<Roster> {
    let mut roster = Roster::default();
    if config.player {
        roster.player = Some(sim.spawn_player(Vec2::new(-350.0, 0.0)));
    }

    for i in 0..config.troopers {
        let at = Vec2::new(-260.0 - 30.0 * (i / 4) as f32, (i % 4) as f32 * 45.0 - 70.0);
        let id = if config.cover.is_empty() {
            sim.spawn_enemy(EnemyKind::Trooper, at)
        } else {
            sim.spawn_trooper_with_cover(at, config.cover.clone())
        };
        roster.allies.push(id);
    }
    if !roster.allies.is_empty() {
        roster.squads.extend(sim.form_squad(&roster.allies));
    }

    match config.kind {
        ScenarioKind::Skirmish => {
            for i in 0..config.defenders {
                let at = Vec2::new(250.0 + 40.0 * (i % 2) as f32, i as f32 * 60.0 - 60.0);
                roster.foes.push(sim.spawn_enemy(EnemyKind::Defender, at));
            }
            let guards: Vec<EntityId> = (0..config.guards)
                .map(|i| sim.spawn_enemy(EnemyKind::TempleGuard, Vec2::new(400.0, i as f32 * 60.0)))
                .collect();
            if !guards.is_empty() {
                roster.squads.extend(sim.form_squad(&guards));
            }
            roster.foes.extend(guards);
        }
        ScenarioKind::GuardPost => {
            let ward = sim.spawn_enemy(EnemyKind::Defender, Vec2::new(450.0, 0.0));
            roster.foes.push(ward);
            let mut previous: Option<EntityId> = None;
            for i in 0..config.guards.max(2) {
                let at = Vec2::new(300.0, i as f32 * 70.0 - 35.0);
                let id = if i == 0 {
                    sim.spawn_guard(at, None, Some(ward))
                } else {
                    sim.spawn_guard(at, previous, None)
                };
                previous = Some(id);
                roster.foes.push(id);
            }
        }
        ScenarioKind::BossDuel => {
            roster.foes.push(sim.spawn_enemy(EnemyKind::Boss, Vec2::new(300.0, 0.0)));
        }
    }

    if roster.foes.is_empty() {
        return Err(TempleError::Scenario(format!("{:?} has no opponents", config.kind)));
    }
    info!(
        "Scenario {:?}: {} allies, {} foes, {} squads",
        config.kind,
        roster.allies.len(),
        roster.foes.len(),
        roster.squads.len()
    );
    Ok(roster)
}

// ============================================================================
// Scripted player
// ============================================================================

const STRIKE_RANGE: f32 = 60.0;
const GUARD_RANGE: f32 = 90.0;
const PUSH_CROWD: usize = 3;
const PUSH_RANGE: f32 = 130.0;
const PUSH_COST: f32 = 25.0;

/// Simple scripted player: walks to the nearest foe, slashes, blocks swings
/// and pushes crowds away.
#[derive(Debug, Clone, Default)]
pub struct Autopilot {
    pressed_last_tick: bool,
}

impl Autopilot {
    /// Creates the script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Input for the coming tick.
    pub fn intent(&mut self, combat: &CombatManager, player: EntityId) -> PlayerIntent {
        let Some(me) = combat.view(player).filter(|v| !v.dead) else {
            return PlayerIntent::default();
        };
        let foes: Vec<_> = combat
            .living()
            .into_iter()
            .filter(|v| !Faction::Sith.is_allied_with(v.faction))
            .collect();
        let Some(nearest) = foes
            .iter()
            .min_by(|a, b| a.position.distance(me.position).total_cmp(&b.position.distance(me.position)))
        else {
            return PlayerIntent::default();
        };

        let offset = nearest.position - me.position;
        let distance = offset.length();
        let mut intent = PlayerIntent::default();

        if nearest.is_attacking && distance <= GUARD_RANGE && !me.is_attacking {
            intent.block = true;
            self.pressed_last_tick = false;
            return intent;
        }

        let crowd = foes
            .iter()
            .filter(|v| v.position.distance(me.position) <= PUSH_RANGE)
            .count();
        let energy = combat.force_pool(player).map_or(0.0, |p| p.energy);
        if crowd >= PUSH_CROWD && energy >= PUSH_COST && !self.pressed_last_tick {
            intent.force_push = true;
            self.pressed_last_tick = true;
            return intent;
        }

        if distance > STRIKE_RANGE {
            intent.movement = offset;
            self.pressed_last_tick = false;
        } else {
            intent.light = !self.pressed_last_tick;
            self.pressed_last_tick = intent.light;
        }
        intent
    }
}

/// End-of-fight summary.
#[derive(Debug, Clone, PartialEq)]
pub struct FightReport {
    /// Simulated time (ms)
    pub elapsed_ms: f64,
    /// Ticks run
    pub ticks: u64,
    /// Player still standing
    pub player_alive: bool,
    /// Living allies
    pub allies_alive: usize,
    /// Living foes
    pub foes_alive: usize,
}

impl FightReport {
    /// Snapshot of the roster's state.
    #[must_use]
    pub fn capture(sim: &Simulation, roster: &Roster) -> Self {
        let alive = |ids: &[EntityId]| ids.iter().filter(|id| sim.combat().is_alive(**id)).count();
        let foes_alive = alive(&roster.foes)
            + sim
                .combatants()
                .filter(|c| !c.is_dead() && !roster.foes.contains(&c.id()) && !Faction::Sith.is_allied_with(c.faction()))
                .count();
        Self {
            elapsed_ms: sim.clock().now_ms(),
            ticks: sim.ticks(),
            player_alive: roster.player.is_some_and(|p| sim.combat().is_alive(p)),
            allies_alive: alive(&roster.allies),
            foes_alive,
        }
    }

    /// Whether one side has been wiped out.
    #[must_use]
    pub fn is_decided(&self) -> bool {
        self.foes_alive == 0 || (!self.player_alive && self.allies_alive == 0)
    }
}
