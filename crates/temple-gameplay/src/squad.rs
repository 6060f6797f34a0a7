//! Squad coordination.
//!
//! A [`Squad`] groups enemies that fight together: it keeps a roster with a
//! leader, hands out [`FormationRole`]s, lays members out in one of six
//! formations around the current target and adapts that formation to the
//! squad's headcount and health. The [`SquadCoordinator`] owns every squad
//! and disbands the ones that can no longer operate.
//!
//! Squads hold member ids only. Member positions and health are read through
//! a lookup closure each update, so the squad never owns an entity.

use std::collections::{BTreeMap, BTreeSet};
use std::f32::consts::{FRAC_PI_3, FRAC_PI_4, TAU};

use serde::{Deserialize, Serialize};
use temple_common::{rotate, EntityId, IdAllocator, SimClock, SimRng, SquadId, Vec2};
use tracing::{debug, info};

use crate::events::{topics, EventBus, EventPayload, GameEvent, SquadEvent};

// ============================================================================
// Types
// ============================================================================

/// Geometric arrangement of a squad.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormationType {
    /// Row perpendicular to the threat
    #[default]
    Line,
    /// V with the leader at the point
    Wedge,
    /// Two flanks closing from either side
    Pincer,
    /// Ring around the target
    Surround,
    /// Tight ring around the squad
    Defensive,
    /// Staggered columns falling back
    Retreat,
}

/// Tactical state of a squad.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SquadState {
    /// No target
    #[default]
    Patrol,
    /// Target acquired
    Engage,
    /// Holding a tactical formation against the target
    Formation,
    /// Falling back
    Retreat,
    /// Undermanned, pulling together
    Regroup,
}

/// Job of a member inside its squad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormationRole {
    /// Squad leader
    Leader,
    /// Holds the front
    Frontline,
    /// Works the sides
    Flanker,
    /// Pins the target from range
    Suppressor,
}

impl FormationRole {
    /// Scale applied to a member's preferred engagement distance.
    #[must_use]
    pub const fn distance_multiplier(self) -> f32 {
        match self {
            Self::Leader => 1.0,
            Self::Frontline => 0.7,
            Self::Flanker => 0.9,
            Self::Suppressor => 1.4,
        }
    }

    /// Scale applied to a member's movement speed.
    #[must_use]
    pub const fn speed_multiplier(self) -> f32 {
        match self {
            Self::Leader => 1.0,
            Self::Frontline => 1.1,
            Self::Flanker => 1.3,
            Self::Suppressor => 0.8,
        }
    }
}

/// Squad tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SquadConfig {
    /// Living members required to stay operational
    pub min_members: usize,
    /// Roster cap
    pub max_members: usize,
    /// Minimum time between formation changes (ms)
    pub formation_cooldown_ms: f32,
    /// Distance between neighbouring slots (px)
    pub spacing: f32,
    /// Distance kept from the target by encircling formations (px)
    pub engage_radius: f32,
    /// Average health fraction below which an undermanned squad retreats
    pub retreat_health_fraction: f32,
    /// Per-update chance of a tactical formation switch
    pub switch_chance: f32,
}

impl Default for SquadConfig {
    fn default() -> Self {
        Self {
            min_members: 2,
            max_members: 8,
            formation_cooldown_ms: 3000.0,
            spacing: 60.0,
            engage_radius: 180.0,
            retreat_health_fraction: 0.3,
            switch_chance: 0.3,
        }
    }
}

/// What a squad needs to know about one member each update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemberStatus {
    /// Position
    pub position: Vec2,
    /// Health fraction (0..1)
    pub health_fraction: f32,
    /// Alive
    pub alive: bool,
}

// ============================================================================
// Layouts
// ============================================================================

fn axis(from: Vec2, to: Vec2) -> Vec2 {
    let dir = (to - from).normalize_or_zero();
    if dir == Vec2::ZERO {
        Vec2::X
    } else {
        dir
    }
}

fn perpendicular(dir: Vec2) -> Vec2 {
    Vec2::new(-dir.y, dir.x)
}

/// Row perpendicular to the anchor → target axis, centered on the anchor.
#[must_use]
pub fn line_formation(count: usize, anchor: Vec2, target: Vec2, spacing: f32) -> Vec<Vec2> {
    let side = perpendicular(axis(anchor, target));
    let mid = (count.saturating_sub(1)) as f32 / 2.0;
    (0..count)
        .map(|i| anchor + side * ((i as f32 - mid) * spacing))
        .collect()
}

/// Leader at the point, the rest alternating into a 45° V behind it.
#[must_use]
pub fn wedge_formation(count: usize, anchor: Vec2, target: Vec2, spacing: f32) -> Vec<Vec2> {
    let back = -axis(anchor, target);
    (0..count)
        .map(|i| {
            if i == 0 {
                return anchor;
            }
            let rank = ((i + 1) / 2) as f32;
            let angle = if i % 2 == 1 { FRAC_PI_4 } else { -FRAC_PI_4 };
            anchor + rotate(back, angle) * (spacing * rank)
        })
        .collect()
}

/// Even members on one flank, odd members on the other, each 60° off the
/// target → anchor axis.
#[must_use]
pub fn pincer_formation(count: usize, anchor: Vec2, target: Vec2, radius: f32, spacing: f32) -> Vec<Vec2> {
    let toward_squad = axis(target, anchor);
    (0..count)
        .map(|i| {
            let angle = if i % 2 == 0 { FRAC_PI_3 } else { -FRAC_PI_3 };
            let rank = (i / 2) as f32;
            target + rotate(toward_squad, angle) * (radius + rank * spacing)
        })
        .collect()
}

/// Even angular spread around the target, starting on the squad's side.
#[must_use]
pub fn surround_formation(count: usize, anchor: Vec2, target: Vec2, radius: f32) -> Vec<Vec2> {
    let start = axis(target, anchor);
    let step = TAU / count.max(1) as f32;
    (0..count)
        .map(|i| target + rotate(start, step * i as f32) * radius)
        .collect()
}

/// Tight ring around `center`.
#[must_use]
pub fn defensive_formation(count: usize, center: Vec2, spacing: f32) -> Vec<Vec2> {
    if count == 1 {
        return vec![center];
    }
    let radius = spacing * 0.75;
    let step = TAU / count.max(1) as f32;
    (0..count)
        .map(|i| center + rotate(Vec2::X, step * i as f32) * radius)
        .collect()
}

/// Three staggered columns stepping away from the threat.
#[must_use]
pub fn retreat_formation(count: usize, anchor: Vec2, threat: Vec2, spacing: f32) -> Vec<Vec2> {
    let away = axis(threat, anchor);
    let side = perpendicular(away);
    (0..count)
        .map(|i| {
            let row = (i / 3) as f32;
            let column = (i % 3) as f32 - 1.0;
            let stagger = if (i / 3) % 2 == 1 { 0.5 } else { 0.0 };
            anchor + away * (spacing * (2.0 + row)) + side * (spacing * (column + stagger))
        })
        .collect()
}

// ============================================================================
// Squad
// ============================================================================

/// A group of enemies fighting as a unit.
#[derive(Debug)]
pub struct Squad {
    id: SquadId,
    config: SquadConfig,
    clock: SimClock,
    bus: EventBus,
    members: Vec<EntityId>,
    roles: BTreeMap<EntityId, FormationRole>,
    leader: Option<EntityId>,
    target: Option<EntityId>,
    target_position: Option<Vec2>,
    formation: FormationType,
    state: SquadState,
    last_formation_change: Option<f64>,
    living: usize,
    fallen: BTreeSet<EntityId>,
    average_health: f32,
    anchor: Vec2,
    slots: BTreeMap<EntityId, Vec2>,
}

impl Squad {
    /// Creates an empty squad.
    #[must_use]
    pub fn new(id: SquadId, config: SquadConfig, clock: SimClock, bus: EventBus) -> Self {
        Self {
            id,
            config,
            clock,
            bus,
            members: Vec::new(),
            roles: BTreeMap::new(),
            leader: None,
            target: None,
            target_position: None,
            formation: FormationType::Line,
            state: SquadState::Patrol,
            last_formation_change: None,
            living: 0,
            fallen: BTreeSet::new(),
            average_health: 1.0,
            anchor: Vec2::ZERO,
            slots: BTreeMap::new(),
        }
    }

    /// Squad id.
    #[must_use]
    pub fn id(&self) -> SquadId {
        self.id
    }

    /// Tuning.
    #[must_use]
    pub fn config(&self) -> &SquadConfig {
        &self.config
    }

    /// Members in roster order.
    #[must_use]
    pub fn members(&self) -> &[EntityId] {
        &self.members
    }

    /// Whether `entity` is on the roster.
    #[must_use]
    pub fn contains(&self, entity: EntityId) -> bool {
        self.members.contains(&entity)
    }

    /// Current leader.
    #[must_use]
    pub fn leader(&self) -> Option<EntityId> {
        self.leader
    }

    /// Role of a member.
    #[must_use]
    pub fn role(&self, entity: EntityId) -> Option<FormationRole> {
        self.roles.get(&entity).copied()
    }

    /// Current target.
    #[must_use]
    pub fn target(&self) -> Option<EntityId> {
        self.target
    }

    /// Current formation.
    #[must_use]
    pub fn formation(&self) -> FormationType {
        self.formation
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SquadState {
        self.state
    }

    /// Living members seen at the last update.
    #[must_use]
    pub fn living_count(&self) -> usize {
        self.living
    }

    /// Average health fraction of living members at the last update.
    #[must_use]
    pub fn average_health(&self) -> f32 {
        self.average_health
    }

    /// Whether enough members are alive to fight as a squad.
    #[must_use]
    pub fn is_operational(&self) -> bool {
        self.living >= self.config.min_members
    }

    /// Formation slot assigned to a member.
    #[must_use]
    pub fn slot(&self, entity: EntityId) -> Option<Vec2> {
        self.slots.get(&entity).copied()
    }

    /// Every assigned slot.
    #[must_use]
    pub fn slots(&self) -> &BTreeMap<EntityId, Vec2> {
        &self.slots
    }

    /// Adds a member. The first member leads. Returns false when full or
    /// already present.
    pub fn add_member(&mut self, entity: EntityId) -> bool {
        if self.members.len() >= self.config.max_members || self.contains(entity) {
            return false;
        }
        self.members.push(entity);
        self.living += 1;
        if self.leader.is_none() {
            self.leader = Some(entity);
        }
        self.assign_roles();
        true
    }

    /// Removes a member, promoting the first remaining member if the leader
    /// left.
    pub fn remove_member(&mut self, entity: EntityId) -> bool {
        let Some(index) = self.members.iter().position(|m| *m == entity) else {
            return false;
        };
        self.members.remove(index);
        self.slots.remove(&entity);
        if !self.fallen.remove(&entity) {
            self.living = self.living.saturating_sub(1);
        }
        if self.leader == Some(entity) {
            self.leader = self.members.first().copied();
            debug!("Squad {:?}: new leader {:?}", self.id, self.leader);
        }
        self.assign_roles();
        true
    }

    /// Leader leads; everyone else cycles Flanker / Suppressor / Frontline.
    pub fn assign_roles(&mut self) {
        self.roles.clear();
        let mut index = 0;
        for member in &self.members {
            let role = if Some(*member) == self.leader {
                FormationRole::Leader
            } else {
                let role = match index % 3 {
                    0 => FormationRole::Flanker,
                    1 => FormationRole::Suppressor,
                    _ => FormationRole::Frontline,
                };
                index += 1;
                role
            };
            self.roles.insert(*member, role);
        }
    }

    /// Sets the squad's target. Acquiring a target while patrolling engages.
    pub fn set_target(&mut self, target: Option<EntityId>) {
        self.target = target;
        match (target, self.state) {
            (Some(_), SquadState::Patrol) => self.set_state(SquadState::Engage),
            (None, SquadState::Engage | SquadState::Formation) => {
                self.target_position = None;
                self.set_state(SquadState::Patrol);
            }
            _ => {}
        }
    }

    /// Changes formation. Ignored (returns false) inside the formation
    /// cooldown or when the formation is unchanged.
    pub fn set_formation(&mut self, formation: FormationType) -> bool {
        let now = self.clock.now_ms();
        if let Some(last) = self.last_formation_change {
            if now - last < f64::from(self.config.formation_cooldown_ms) {
                return false;
            }
        }
        if formation == self.formation {
            return false;
        }
        self.apply_formation(formation, now);
        true
    }

    fn apply_formation(&mut self, formation: FormationType, now: f64) {
        debug!("Squad {:?}: {:?} -> {:?}", self.id, self.formation, formation);
        self.formation = formation;
        self.last_formation_change = Some(now);
        self.layout();
        self.emit(topics::SQUAD_FORMATION_CHANGE);
    }

    /// Changes state, emitting `squad:state_change` when it differs.
    pub fn set_state(&mut self, state: SquadState) {
        if state == self.state {
            return;
        }
        debug!("Squad {:?}: {:?} -> {:?}", self.id, self.state, state);
        self.state = state;
        self.emit(topics::SQUAD_STATE_CHANGE);
    }

    fn emit(&self, topic: &str) {
        self.bus.emit(GameEvent::new(
            topic,
            EventPayload::Squad(SquadEvent {
                squad: self.id,
                state: self.state,
                formation: self.formation,
            }),
        ));
    }

    /// Refreshes the roster view, adapts the formation and recomputes slots.
    pub fn update(&mut self, lookup: impl Fn(EntityId) -> Option<MemberStatus>, rng: &mut SimRng) {
        let statuses: Vec<(EntityId, MemberStatus)> = self
            .members
            .iter()
            .filter_map(|m| lookup(*m).map(|s| (*m, s)))
            .filter(|(_, s)| s.alive)
            .collect();
        self.living = statuses.len();
        self.fallen = self
            .members
            .iter()
            .copied()
            .filter(|m| !statuses.iter().any(|(id, _)| id == m))
            .collect();
        self.average_health = if statuses.is_empty() {
            0.0
        } else {
            statuses.iter().map(|(_, s)| s.health_fraction).sum::<f32>() / statuses.len() as f32
        };
        self.anchor = self
            .leader
            .and_then(|l| statuses.iter().find(|(m, _)| *m == l))
            .map(|(_, s)| s.position)
            .unwrap_or_else(|| {
                let sum: Vec2 = statuses.iter().map(|(_, s)| s.position).sum();
                sum / statuses.len().max(1) as f32
            });

        if let Some(target) = self.target {
            match lookup(target) {
                Some(status) if status.alive => self.target_position = Some(status.position),
                _ => self.set_target(None),
            }
        }

        self.adapt_formation(rng);
        self.layout();
    }

    /// Reacts to headcount and health: undermanned and hurt squads retreat,
    /// undermanned squads close ranks, healthy engaged squads vary their
    /// formation.
    pub fn adapt_formation(&mut self, rng: &mut SimRng) {
        if self.state == SquadState::Retreat {
            return;
        }
        if self.living < self.config.min_members {
            if self.average_health < self.config.retreat_health_fraction {
                let now = self.clock.now_ms();
                if self.formation != FormationType::Retreat {
                    self.apply_formation(FormationType::Retreat, now);
                }
                self.set_state(SquadState::Retreat);
            } else {
                self.set_formation(FormationType::Defensive);
                self.set_state(SquadState::Regroup);
            }
            return;
        }
        if self.target_position.is_none() {
            return;
        }
        if !rng.chance(self.config.switch_chance) {
            return;
        }
        let next = if self.living >= 4 {
            FormationType::Pincer
        } else if rng.chance(0.5) {
            FormationType::Line
        } else {
            FormationType::Wedge
        };
        if self.set_formation(next) && self.state == SquadState::Engage {
            self.set_state(SquadState::Formation);
        }
    }

    fn layout(&mut self) {
        let standing: Vec<EntityId> = self
            .members
            .iter()
            .copied()
            .filter(|m| !self.fallen.contains(m))
            .collect();
        let count = standing.len();
        let threat = self
            .target_position
            .unwrap_or(self.anchor + Vec2::X * self.config.engage_radius);
        let spacing = self.config.spacing;
        let radius = self.config.engage_radius;
        let positions = match self.formation {
            FormationType::Line => line_formation(count, self.anchor, threat, spacing),
            FormationType::Wedge => wedge_formation(count, self.anchor, threat, spacing),
            FormationType::Pincer => pincer_formation(count, self.anchor, threat, radius, spacing),
            FormationType::Surround => surround_formation(count, self.anchor, threat, radius),
            FormationType::Defensive => defensive_formation(count, self.anchor, spacing),
            FormationType::Retreat => retreat_formation(count, self.anchor, threat, spacing),
        };
        self.slots = standing.into_iter().zip(positions).collect();
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Owns every squad.
#[derive(Debug)]
pub struct SquadCoordinator {
    config: SquadConfig,
    clock: SimClock,
    bus: EventBus,
    squads: BTreeMap<SquadId, Squad>,
}

impl SquadCoordinator {
    /// Creates an empty coordinator; new squads use `config`.
    #[must_use]
    pub fn new(config: SquadConfig, clock: SimClock, bus: EventBus) -> Self {
        Self {
            config,
            clock,
            bus,
            squads: BTreeMap::new(),
        }
    }

    /// Creates an empty squad.
    pub fn create_squad(&mut self, ids: &mut IdAllocator) -> SquadId {
        let id = ids.next_squad();
        self.squads.insert(
            id,
            Squad::new(id, self.config.clone(), self.clock.clone(), self.bus.clone()),
        );
        id
    }

    /// Squad by id.
    #[must_use]
    pub fn squad(&self, id: SquadId) -> Option<&Squad> {
        self.squads.get(&id)
    }

    /// Mutable squad by id.
    pub fn squad_mut(&mut self, id: SquadId) -> Option<&mut Squad> {
        self.squads.get_mut(&id)
    }

    /// Squad containing `entity`.
    #[must_use]
    pub fn squad_of(&self, entity: EntityId) -> Option<&Squad> {
        self.squads.values().find(|s| s.contains(entity))
    }

    /// Every squad id in order.
    #[must_use]
    pub fn ids(&self) -> Vec<SquadId> {
        self.squads.keys().copied().collect()
    }

    /// Number of squads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.squads.len()
    }

    /// Whether no squads exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.squads.is_empty()
    }

    /// Removes a squad.
    pub fn disband(&mut self, id: SquadId) -> Option<Squad> {
        self.squads.remove(&id)
    }

    /// Drops `entity` from whichever squad holds it.
    pub fn remove_member(&mut self, entity: EntityId) -> bool {
        self.squads
            .values_mut()
            .any(|squad| squad.remove_member(entity))
    }

    /// Points every squad at `target`.
    pub fn set_target(&mut self, target: Option<EntityId>) {
        for squad in self.squads.values_mut() {
            squad.set_target(target);
        }
    }

    /// Updates every squad, then disbands the non-operational ones that are
    /// not retreating. Returns the disbanded ids.
    pub fn update(
        &mut self,
        lookup: impl Fn(EntityId) -> Option<MemberStatus>,
        rng: &mut SimRng,
    ) -> Vec<SquadId> {
        for squad in self.squads.values_mut() {
            squad.update(&lookup, rng);
        }
        let disbanded: Vec<SquadId> = self
            .squads
            .values()
            .filter(|s| !s.is_operational() && s.state() != SquadState::Retreat)
            .map(Squad::id)
            .collect();
        for id in &disbanded {
            self.squads.remove(id);
            info!("Squad {:?} disbanded", id);
        }
        disbanded
    }

    /// Every member's formation slot.
    #[must_use]
    pub fn formation_targets(&self) -> Vec<(EntityId, Vec2)> {
        self.squads
            .values()
            .flat_map(|s| s.slots().iter().map(|(m, p)| (*m, *p)))
            .collect()
    }
}
