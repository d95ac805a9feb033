//! Parties and friendships

use crate::current_timestamp;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// A player-formed group routed together
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Party {
    pub id: u64,
    pub owner: Uuid,
    pub members: HashSet<Uuid>,
    pub invitations: HashSet<Uuid>,
    pub invitations_only: bool,
    pub created_at: u64,
}

impl Party {
    /// The owner is always a member.
    pub fn new(id: u64, owner: Uuid) -> Self {
        Self {
            id,
            owner,
            members: HashSet::from([owner]),
            invitations: HashSet::new(),
            invitations_only: true,
            created_at: current_timestamp(),
        }
    }

    pub fn is_member(&self, id: &Uuid) -> bool {
        self.members.contains(id)
    }

    pub fn is_invited(&self, id: &Uuid) -> bool {
        self.invitations.contains(id)
    }
}

/// A friendship between exactly two network profiles
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub id: u64,
    pub profiles: [Uuid; 2],
    pub created_at: u64,
}

impl Relationship {
    pub fn new(id: u64, first: Uuid, second: Uuid) -> Self {
        Self {
            id,
            profiles: [first, second],
            created_at: current_timestamp(),
        }
    }

    pub fn contains(&self, profile: &Uuid) -> bool {
        self.profiles.contains(profile)
    }

    pub fn other(&self, profile: &Uuid) -> Option<Uuid> {
        match self.profiles {
            [a, b] if a == *profile => Some(b),
            [a, b] if b == *profile => Some(a),
            _ => None,
        }
    }
}

/// A pending friendship invitation
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FriendshipInvitation {
    pub requester: Uuid,
    pub invited: Uuid,
    pub created_at: u64,
}

impl FriendshipInvitation {
    pub fn new(requester: Uuid, invited: Uuid) -> Self {
        Self {
            requester,
            invited,
            created_at: current_timestamp(),
        }
    }
}

/// Key for invitations that ignores which side sent them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProfilePair(Uuid, Uuid);

impl ProfilePair {
    pub fn new(a: Uuid, b: Uuid) -> Self {
        if a <= b {
            Self(a, b)
        } else {
            Self(b, a)
        }
    }
}
