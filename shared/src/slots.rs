//! Slot and capacity accounting for instances and games
//!
//! Every game (and every instance, on its own side of the wire) tracks four
//! nested populations: `reserved ⊇ online ⊇ players ⊇ playing`. Each has a
//! joinable flag and a slot limit where a negative limit means unlimited.
//!
//! All queries here are pure. Occupant sets only change through
//! [`Slots::add`] and [`Slots::remove`], which callers invoke on confirmed
//! joins and quits.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Which population a queued player is meant to occupy
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    Online,
    Players,
    Playing,
}

/// One population tier: its members, whether it accepts joins, and its limit
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Population {
    pub members: HashSet<Uuid>,
    pub joinable: bool,
    pub max_slots: i32,
}

impl Population {
    pub fn new(joinable: bool, max_slots: i32) -> Self {
        Self {
            members: HashSet::new(),
            joinable,
            max_slots,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(true, -1)
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_slots < 0
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.members.contains(id)
    }

    /// Returns true if every candidate fits into this tier.
    ///
    /// Candidates that already occupy the tier take no additional slot.
    pub fn has_slots<'a, I>(&self, candidates: I) -> bool
    where
        I: IntoIterator<Item = &'a Uuid>,
    {
        if self.is_unlimited() {
            return true;
        }
        let incoming = candidates
            .into_iter()
            .filter(|id| !self.members.contains(id))
            .count();
        self.members.len() + incoming <= self.max_slots as usize
    }

    /// Finds the occupants that would have to leave so all `arrivals` fit.
    ///
    /// `priority` ranks current occupants; see [`find_kickable`].
    pub fn find_kickable<F>(
        &self,
        arrivals: &HashMap<Uuid, i32>,
        priority: F,
    ) -> Option<HashSet<Uuid>>
    where
        F: Fn(&Uuid) -> i32,
    {
        let occupants = self.members.iter().map(|id| (*id, priority(id)));
        find_kickable(occupants, self.max_slots, arrivals)
    }
}

/// Computes the minimal set of occupants to evict so every arrival fits.
///
/// Occupants are only evictable when their priority is strictly lower than
/// the lowest arriving priority, and they are taken lowest priority first.
/// Returns an empty set when nothing needs to be evicted and `None` when even
/// evicting every evictable occupant would not free enough slots.
pub fn find_kickable<I>(
    occupants: I,
    max_slots: i32,
    arrivals: &HashMap<Uuid, i32>,
) -> Option<HashSet<Uuid>>
where
    I: IntoIterator<Item = (Uuid, i32)>,
{
    if max_slots < 0 {
        return Some(HashSet::new());
    }

    let occupants: Vec<(Uuid, i32)> = occupants.into_iter().collect();
    let incoming = arrivals
        .keys()
        .filter(|id| !occupants.iter().any(|(occupant, _)| occupant == *id))
        .count();

    let needed = (occupants.len() + incoming) as i64 - max_slots as i64;
    if needed <= 0 {
        return Some(HashSet::new());
    }

    let threshold = *arrivals.values().min()?;
    let mut evictable: Vec<(Uuid, i32)> = occupants
        .into_iter()
        .filter(|(id, priority)| !arrivals.contains_key(id) && *priority < threshold)
        .collect();

    if (evictable.len() as i64) < needed {
        return None;
    }

    evictable.sort_by_key(|(id, priority)| (*priority, *id));
    Some(
        evictable
            .into_iter()
            .take(needed as usize)
            .map(|(id, _)| id)
            .collect(),
    )
}

/// The four nested population tiers of a game or instance
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Slots {
    pub reserved: Population,
    pub online: Population,
    pub players: Population,
    pub playing: Population,
}

impl Slots {
    /// Creates joinable tiers with the given limits; reservations share the
    /// online limit.
    pub fn new(max_online: i32, max_players: i32, max_playing: i32) -> Self {
        Self {
            reserved: Population::new(true, max_online),
            online: Population::new(true, max_online),
            players: Population::new(true, max_players),
            playing: Population::new(true, max_playing),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(-1, -1, -1)
    }

    pub fn tier(&self, queue_type: QueueType) -> &Population {
        match queue_type {
            QueueType::Online => &self.online,
            QueueType::Players => &self.players,
            QueueType::Playing => &self.playing,
        }
    }

    pub fn tier_mut(&mut self, queue_type: QueueType) -> &mut Population {
        match queue_type {
            QueueType::Online => &mut self.online,
            QueueType::Players => &mut self.players,
            QueueType::Playing => &mut self.playing,
        }
    }

    pub fn has_slots<'a, I>(&self, candidates: I, queue_type: QueueType) -> bool
    where
        I: IntoIterator<Item = &'a Uuid>,
    {
        self.tier(queue_type).has_slots(candidates)
    }

    pub fn is_joinable(&self, queue_type: QueueType) -> bool {
        self.tier(queue_type).joinable
    }

    pub fn set_joinable(&mut self, queue_type: QueueType, joinable: bool) {
        self.tier_mut(queue_type).joinable = joinable;
    }

    pub fn find_kickable<F>(
        &self,
        arrivals: &HashMap<Uuid, i32>,
        queue_type: QueueType,
        priority: F,
    ) -> Option<HashSet<Uuid>>
    where
        F: Fn(&Uuid) -> i32,
    {
        self.tier(queue_type).find_kickable(arrivals, priority)
    }

    /// Whether the candidates fit outright or after evicting lower-priority
    /// occupants. Never true for a non-joinable tier.
    pub fn admits<F>(
        &self,
        arrivals: &HashMap<Uuid, i32>,
        queue_type: QueueType,
        priority: F,
    ) -> bool
    where
        F: Fn(&Uuid) -> i32,
    {
        self.is_joinable(queue_type)
            && (self.has_slots(arrivals.keys(), queue_type)
                || self.find_kickable(arrivals, queue_type, priority).is_some())
    }

    /// Adds a member to `queue_type` and every tier enclosing it.
    pub fn add(&mut self, id: Uuid, queue_type: QueueType) {
        self.reserved.members.insert(id);
        self.online.members.insert(id);
        if matches!(queue_type, QueueType::Players | QueueType::Playing) {
            self.players.members.insert(id);
        }
        if queue_type == QueueType::Playing {
            self.playing.members.insert(id);
        }
    }

    /// Removes a member from every tier; returns whether it was present.
    pub fn remove(&mut self, id: &Uuid) -> bool {
        let present = self.reserved.members.remove(id);
        self.online.members.remove(id);
        self.players.members.remove(id);
        self.playing.members.remove(id);
        present
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.reserved.contains(id)
    }

    pub fn members(&self) -> impl Iterator<Item = &Uuid> {
        self.reserved.members.iter()
    }
}

impl Default for Slots {
    fn default() -> Self {
        Self::unlimited()
    }
}
