//! Friendships between network profiles
//!
//! Relationship records and per-profile id lists live in the data manager
//! behind three TTL caches. Pending invitations only live in their cache, so
//! an invitation that is not answered within the TTL simply expires.
//!
//! Accepting an invitation writes the record first and then appends its id to
//! each profile's list. The two list writes are independent: if one fails the
//! friendship is visible from one side only. That is logged, and readers
//! prune ids whose record is gone.

use crate::cache::TtlCache;
use crate::data::{
    read_object, write_object, DataError, DataKey, DataManager, TABLE_FRIEND_IDS,
    TABLE_RELATIONSHIPS,
};
use log::{debug, info, warn};
use shared::{FriendshipInvitation, ProfilePair, Relationship, ResponseCode};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FriendshipError {
    #[error("a profile cannot befriend itself")]
    SelfInvitation,
    #[error("{0} and {1} are already friends")]
    AlreadyFriends(Uuid, Uuid),
    #[error("an invitation between {0} and {1} is already pending")]
    AlreadyInvited(Uuid, Uuid),
    #[error("no invitation from {0} to {1}")]
    NoInvitation(Uuid, Uuid),
    #[error("relationship {0} does not exist")]
    UnknownRelationship(u64),
    #[error(transparent)]
    Data(#[from] DataError),
}

impl From<FriendshipError> for ResponseCode {
    fn from(e: FriendshipError) -> Self {
        match e {
            FriendshipError::SelfInvitation => ResponseCode::IllegalArgument,
            FriendshipError::AlreadyFriends(..) | FriendshipError::AlreadyInvited(..) => {
                ResponseCode::IllegalState
            }
            FriendshipError::NoInvitation(..) | FriendshipError::UnknownRelationship(_) => {
                ResponseCode::InvalidId
            }
            FriendshipError::Data(e) => e.into(),
        }
    }
}

pub struct FriendshipService {
    data: Arc<dyn DataManager>,
    friend_ids: TtlCache<Uuid, Vec<u64>>,
    relationships: TtlCache<u64, Relationship>,
    invitations: TtlCache<ProfilePair, FriendshipInvitation>,
}

impl FriendshipService {
    pub fn new(data: Arc<dyn DataManager>, ttl: Duration) -> Self {
        Self {
            data,
            friend_ids: TtlCache::new(ttl),
            relationships: TtlCache::new(ttl),
            invitations: TtlCache::new(ttl),
        }
    }

    fn ids_key(profile: &Uuid) -> DataKey {
        DataKey::new(TABLE_FRIEND_IDS, profile)
    }

    fn relationship_key(id: u64) -> DataKey {
        DataKey::new(TABLE_RELATIONSHIPS, id)
    }

    async fn load_ids(&self, profile: &Uuid) -> Result<Vec<u64>, DataError> {
        Ok(read_object::<Vec<u64>>(self.data.as_ref(), &Self::ids_key(profile))
            .await?
            .unwrap_or_default())
    }

    pub async fn get_friendship_ids(&self, profile: &Uuid) -> Result<Vec<u64>, FriendshipError> {
        if let Some(ids) = self.friend_ids.get(profile) {
            return Ok(ids);
        }
        let ids = self.load_ids(profile).await?;
        self.friend_ids.insert(*profile, ids.clone());
        Ok(ids)
    }

    pub async fn get_relationship(&self, id: u64) -> Result<Option<Relationship>, FriendshipError> {
        if let Some(relationship) = self.relationships.get(&id) {
            return Ok(Some(relationship));
        }
        let relationship: Option<Relationship> =
            read_object(self.data.as_ref(), &Self::relationship_key(id)).await?;
        if let Some(relationship) = &relationship {
            self.relationships.insert(id, relationship.clone());
        }
        Ok(relationship)
    }

    /// Resolves every relationship of `profile`, pruning ids whose record is
    /// missing or does not involve the profile.
    pub async fn get_friendships(&self, profile: &Uuid) -> Result<Vec<Relationship>, FriendshipError> {
        let ids = self.get_friendship_ids(profile).await?;
        let mut relationships = Vec::with_capacity(ids.len());
        let mut dangling = Vec::new();

        for id in &ids {
            match self.get_relationship(*id).await? {
                Some(relationship) if relationship.contains(profile) => {
                    relationships.push(relationship)
                }
                _ => dangling.push(*id),
            }
        }

        if !dangling.is_empty() {
            warn!(
                "Pruning {} dangling friendship ids of {}: {:?}",
                dangling.len(),
                profile,
                dangling
            );
            let repaired: Vec<u64> = ids.into_iter().filter(|id| !dangling.contains(id)).collect();
            match write_object(self.data.as_ref(), &Self::ids_key(profile), &repaired).await {
                Ok(()) => self.friend_ids.insert(*profile, repaired),
                Err(e) => warn!("Failed to repair friendship ids of {}: {}", profile, e),
            }
        }

        Ok(relationships)
    }

    pub async fn are_friends(&self, a: &Uuid, b: &Uuid) -> Result<bool, FriendshipError> {
        Ok(self
            .get_friendships(a)
            .await?
            .iter()
            .any(|relationship| relationship.other(a) == Some(*b)))
    }

    pub fn pending_invitation(&self, a: Uuid, b: Uuid) -> Option<FriendshipInvitation> {
        self.invitations.get(&ProfilePair::new(a, b))
    }

    pub async fn send_invitation(
        &self,
        requester: Uuid,
        invited: Uuid,
    ) -> Result<(), FriendshipError> {
        if requester == invited {
            return Err(FriendshipError::SelfInvitation);
        }
        if self.are_friends(&requester, &invited).await? {
            return Err(FriendshipError::AlreadyFriends(requester, invited));
        }
        let pair = ProfilePair::new(requester, invited);
        if self.invitations.contains_key(&pair) {
            return Err(FriendshipError::AlreadyInvited(requester, invited));
        }

        self.invitations
            .insert(pair, FriendshipInvitation::new(requester, invited));
        debug!("{} invited {} to be friends", requester, invited);
        Ok(())
    }

    /// Removes the invitation from `requester` to `invited` if there is one.
    /// Concurrent callers cannot both take the same invitation.
    fn take_invitation(&self, requester: Uuid, invited: Uuid) -> Option<FriendshipInvitation> {
        self.invitations
            .take_if(&ProfilePair::new(requester, invited), |invitation| {
                invitation.requester == requester && invitation.invited == invited
            })
    }

    pub fn deny_invitation(&self, requester: Uuid, invited: Uuid) -> bool {
        self.take_invitation(requester, invited).is_some()
    }

    async fn allocate_relationship_id(&self) -> Result<u64, FriendshipError> {
        loop {
            let id = rand::random::<u64>();
            if self.get_relationship(id).await?.is_none() {
                return Ok(id);
            }
        }
    }

    /// Adds `id` to the stored list of `profile` and drops the cached copy
    /// once the write went through.
    async fn append_id(&self, profile: &Uuid, id: u64) -> Result<(), DataError> {
        let mut ids = self.load_ids(profile).await?;
        if !ids.contains(&id) {
            ids.push(id);
        }
        write_object(self.data.as_ref(), &Self::ids_key(profile), &ids).await?;
        self.friend_ids.invalidate(profile);
        Ok(())
    }

    async fn drop_id(&self, profile: &Uuid, id: u64) -> Result<(), DataError> {
        let mut ids = self.load_ids(profile).await?;
        ids.retain(|existing| *existing != id);
        write_object(self.data.as_ref(), &Self::ids_key(profile), &ids).await?;
        self.friend_ids.invalidate(profile);
        Ok(())
    }

    pub async fn accept_invitation(
        &self,
        requester: Uuid,
        invited: Uuid,
    ) -> Result<Relationship, FriendshipError> {
        let invitation = self
            .take_invitation(requester, invited)
            .ok_or(FriendshipError::NoInvitation(requester, invited))?;

        let id = self.allocate_relationship_id().await?;
        let relationship = Relationship::new(id, invitation.requester, invitation.invited);
        if let Err(e) =
            write_object(self.data.as_ref(), &Self::relationship_key(id), &relationship).await
        {
            // Nothing references the record yet; give the invitation back
            self.invitations
                .insert(ProfilePair::new(requester, invited), invitation);
            return Err(e.into());
        }
        self.relationships.insert(id, relationship.clone());

        let first = self.append_id(&requester, id).await;
        let second = self.append_id(&invited, id).await;
        match (first, second) {
            (Ok(()), Ok(())) => {
                info!("{} and {} are now friends ({})", requester, invited, id);
                Ok(relationship)
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(
                    "Friendship {} between {} and {} is only partially stored: {}",
                    id, requester, invited, e
                );
                Err(e.into())
            }
        }
    }

    pub async fn remove_friendship(&self, relationship_id: u64) -> Result<(), FriendshipError> {
        let relationship = self
            .get_relationship(relationship_id)
            .await?
            .ok_or(FriendshipError::UnknownRelationship(relationship_id))?;

        for profile in &relationship.profiles {
            self.drop_id(profile, relationship_id).await?;
        }
        self.data
            .remove(&Self::relationship_key(relationship_id))
            .await?;
        self.relationships.invalidate(&relationship_id);
        debug!("Removed friendship {}", relationship_id);
        Ok(())
    }

    /// Whether the id list of `profile` is currently served from cache.
    pub fn has_cached_ids(&self, profile: &Uuid) -> bool {
        self.friend_ids.contains_key(profile)
    }
}
