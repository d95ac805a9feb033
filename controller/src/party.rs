//! Party registry
//!
//! A party is a set of players routed together behind an owner. Every member
//! points back at the party through `Player::party_id`.
//!
//! Lock order: a party entry may be held while touching player entries,
//! never the other way around.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, info};
use shared::{Party, Player};
use std::sync::Arc;
use uuid::Uuid;

pub struct PartyManager {
    parties: DashMap<u64, Party>,
    players: Arc<DashMap<Uuid, Player>>,
}

impl PartyManager {
    pub fn new(players: Arc<DashMap<Uuid, Player>>) -> Self {
        Self {
            parties: DashMap::new(),
            players,
        }
    }

    pub fn get(&self, party_id: u64) -> Option<Party> {
        self.parties.get(&party_id).map(|party| party.value().clone())
    }

    pub fn len(&self) -> usize {
        self.parties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parties.is_empty()
    }

    /// Creates a party owned by `owner`, who must be a known player without
    /// a party.
    pub fn create(&self, owner: Uuid) -> Option<u64> {
        loop {
            let party_id = rand::random::<u64>();
            if let Entry::Vacant(slot) = self.parties.entry(party_id) {
                {
                    let mut player = self.players.get_mut(&owner)?;
                    if player.party_id.is_some() {
                        return None;
                    }
                    player.party_id = Some(party_id);
                }
                slot.insert(Party::new(party_id, owner));
                info!("Player {} created party {}", owner, party_id);
                return Some(party_id);
            }
        }
    }

    pub fn invite(&self, party_id: u64, player: Uuid) -> bool {
        if !self.players.contains_key(&player) {
            return false;
        }
        match self.parties.get_mut(&party_id) {
            Some(mut party) if !party.is_member(&player) => {
                party.invitations.insert(player);
                debug!("Player {} invited to party {}", player, party_id);
                true
            }
            _ => false,
        }
    }

    /// Joins through a pending invitation.
    pub fn accept_invitation(&self, party_id: u64, player: Uuid) -> bool {
        self.add_member(party_id, player, true)
    }

    /// Joins an open party, or an invitations-only party the player was
    /// invited to.
    pub fn join(&self, party_id: u64, player: Uuid) -> bool {
        self.add_member(party_id, player, false)
    }

    fn add_member(&self, party_id: u64, player: Uuid, require_invitation: bool) -> bool {
        let mut party = match self.parties.get_mut(&party_id) {
            Some(party) => party,
            None => return false,
        };
        if party.is_member(&player) {
            return false;
        }
        let invited = party.is_invited(&player);
        if (require_invitation || party.invitations_only) && !invited {
            return false;
        }

        match self.players.get_mut(&player) {
            Some(mut record) if record.party_id.is_none() => record.party_id = Some(party_id),
            _ => return false,
        }
        party.invitations.remove(&player);
        party.members.insert(player);
        info!("Player {} joined party {}", player, party_id);
        true
    }

    /// Removes a member. Removing the owner disbands the whole party.
    pub fn remove_player(&self, party_id: u64, player: Uuid) -> bool {
        let owner = match self.parties.get(&party_id) {
            Some(party) if party.is_member(&player) => party.owner,
            _ => return false,
        };
        if owner == player {
            return self.disband(party_id);
        }

        let removed = match self.parties.get_mut(&party_id) {
            Some(mut party) => party.members.remove(&player),
            None => false,
        };
        if removed {
            self.clear_pointer(&player, party_id);
            info!("Player {} left party {}", player, party_id);
        }
        removed
    }

    pub fn set_owner(&self, party_id: u64, player: Uuid) -> bool {
        match self.parties.get_mut(&party_id) {
            Some(mut party) if party.is_member(&player) => {
                party.owner = player;
                true
            }
            _ => false,
        }
    }

    pub fn set_invitations_only(&self, party_id: u64, invitations_only: bool) -> bool {
        match self.parties.get_mut(&party_id) {
            Some(mut party) => {
                party.invitations_only = invitations_only;
                true
            }
            None => false,
        }
    }

    /// Clears every member's party pointer and drops the party while holding
    /// its entry, so no join can slip in between.
    pub fn disband(&self, party_id: u64) -> bool {
        let entry = match self.parties.entry(party_id) {
            Entry::Occupied(entry) => entry,
            Entry::Vacant(_) => return false,
        };
        for member in &entry.get().members {
            self.clear_pointer(member, party_id);
        }
        entry.remove();
        info!("Party {} disbanded", party_id);
        true
    }

    fn clear_pointer(&self, player: &Uuid, party_id: u64) {
        if let Some(mut record) = self.players.get_mut(player) {
            if record.party_id == Some(party_id) {
                record.party_id = None;
            }
        }
    }

    /// Members other than `exclude` that are currently on an instance.
    pub fn online_members(&self, party_id: u64, exclude: &Uuid) -> Vec<Uuid> {
        let members: Vec<Uuid> = match self.parties.get(&party_id) {
            Some(party) => party.members.iter().copied().collect(),
            None => return Vec::new(),
        };
        members
            .into_iter()
            .filter(|member| member != exclude)
            .filter(|member| {
                self.players
                    .get(member)
                    .map(|player| player.instance_id.is_some())
                    .unwrap_or(false)
            })
            .collect()
    }

    /// The party `player` owns, if any.
    pub fn owned_by(&self, player: &Uuid) -> Option<u64> {
        let party_id = self.players.get(player)?.party_id?;
        let party = self.parties.get(&party_id)?;
        (party.owner == *player).then_some(party_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(count: usize) -> (PartyManager, Vec<Uuid>) {
        let players = Arc::new(DashMap::new());
        let ids: Vec<Uuid> = (0..count).map(|_| Uuid::new_v4()).collect();
        for (i, id) in ids.iter().enumerate() {
            players.insert(*id, Player::new(*id, &format!("player{}", i)));
        }
        (PartyManager::new(players), ids)
    }

    fn pointer(manager: &PartyManager, id: &Uuid) -> Option<u64> {
        manager.players.get(id).and_then(|player| player.party_id)
    }

    /// Every member points at the party and nobody else does.
    fn assert_party_invariant(manager: &PartyManager) {
        for entry in manager.players.iter() {
            match entry.party_id {
                Some(party_id) => {
                    let party = manager.get(party_id).expect("dangling party pointer");
                    assert!(party.is_member(entry.key()));
                }
                None => {
                    assert!(manager
                        .parties
                        .iter()
                        .all(|party| !party.is_member(entry.key())));
                }
            }
        }
    }

    #[test]
    fn test_disband_races_with_joins() {
        let (manager, ids) = setup(9);
        let (owner, joiners) = ids.split_first().unwrap();

        for _ in 0..50 {
            let party_id = manager.create(*owner).unwrap();
            std::thread::scope(|scope| {
                for joiner in joiners {
                    let manager = &manager;
                    scope.spawn(move || manager.join(party_id, *joiner));
                }
                scope.spawn(|| assert!(manager.disband(party_id)));
            });

            assert!(manager.is_empty());
            assert!(ids.iter().all(|id| pointer(&manager, id).is_none()));
            assert_party_invariant(&manager);
        }
    }

    #[test]
    fn test_create_party() {
        let (manager, ids) = setup(1);
        let party_id = manager.create(ids[0]).unwrap();

        assert_eq!(pointer(&manager, &ids[0]), Some(party_id));
        assert_eq!(manager.get(party_id).unwrap().owner, ids[0]);
        // Already in a party
        assert!(manager.create(ids[0]).is_none());
        // Unknown player
        assert!(manager.create(Uuid::new_v4()).is_none());
        assert_eq!(manager.len(), 1);
        assert_party_invariant(&manager);
    }

    #[test]
    fn test_invitation_flow() {
        let (manager, ids) = setup(3);
        let party_id = manager.create(ids[0]).unwrap();

        assert!(!manager.accept_invitation(party_id, ids[1]));
        assert!(!manager.join(party_id, ids[1]));
        assert!(manager.invite(party_id, ids[1]));
        assert!(manager.accept_invitation(party_id, ids[1]));
        assert!(!manager.invite(party_id, ids[1]));

        assert!(manager.set_invitations_only(party_id, false));
        assert!(manager.join(party_id, ids[2]));

        let party = manager.get(party_id).unwrap();
        assert_eq!(party.members.len(), 3);
        assert!(party.invitations.is_empty());
        assert_party_invariant(&manager);
    }

    #[test]
    fn test_set_owner_requires_member() {
        let (manager, ids) = setup(2);
        let party_id = manager.create(ids[0]).unwrap();

        assert!(!manager.set_owner(party_id, ids[1]));
        manager.invite(party_id, ids[1]);
        manager.accept_invitation(party_id, ids[1]);
        assert!(manager.set_owner(party_id, ids[1]));
        assert_eq!(manager.owned_by(&ids[1]), Some(party_id));
        assert_eq!(manager.owned_by(&ids[0]), None);
    }

    #[test]
    fn test_remove_member_and_owner() {
        let (manager, ids) = setup(3);
        let party_id = manager.create(ids[0]).unwrap();
        manager.set_invitations_only(party_id, false);
        manager.join(party_id, ids[1]);
        manager.join(party_id, ids[2]);

        assert!(manager.remove_player(party_id, ids[1]));
        assert_eq!(pointer(&manager, &ids[1]), None);
        assert!(!manager.remove_player(party_id, ids[1]));
        assert_party_invariant(&manager);

        // Removing the owner disbands
        assert!(manager.remove_player(party_id, ids[0]));
        assert!(manager.get(party_id).is_none());
        assert_eq!(pointer(&manager, &ids[2]), None);
        assert_party_invariant(&manager);
    }

    #[test]
    fn test_disband_clears_pointers() {
        let (manager, ids) = setup(4);
        let party_id = manager.create(ids[0]).unwrap();
        manager.set_invitations_only(party_id, false);
        for id in &ids[1..] {
            assert!(manager.join(party_id, *id));
        }

        assert!(manager.disband(party_id));
        assert!(!manager.disband(party_id));
        for id in &ids {
            assert_eq!(pointer(&manager, id), None);
        }
        assert!(manager.is_empty());
        assert_party_invariant(&manager);
    }

    #[test]
    fn test_online_members() {
        let (manager, ids) = setup(3);
        let party_id = manager.create(ids[0]).unwrap();
        manager.set_invitations_only(party_id, false);
        manager.join(party_id, ids[1]);
        manager.join(party_id, ids[2]);
        manager.players.get_mut(&ids[1]).unwrap().instance_id = Some("lobby-1".into());
        manager.players.get_mut(&ids[0]).unwrap().instance_id = Some("lobby-1".into());

        assert_eq!(manager.online_members(party_id, &ids[0]), vec![ids[1]]);
        assert!(manager.online_members(404, &ids[0]).is_empty());
    }
}
