//! Network profiles and their sub-profile graph
//!
//! A `Network` profile is the root identity of a player. `Sub` profiles hang
//! below exactly one parent under a name (for example a per-gamemode stats
//! profile). Links are stored on both ends; the child is always written
//! before the parent so a crash between the two writes leaves a child that
//! points at a parent which does not list it, which the next add repairs.

use crate::data::{read_object, write_object, DataError, DataKey, DataManager, TABLE_PROFILES};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use shared::ResponseCode;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Longest super-profile chain followed before giving up
const MAX_PROFILE_DEPTH: usize = 16;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ProfileType {
    Network,
    Sub,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SuperProfileRef {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Profile {
    pub id: Uuid,
    pub kind: ProfileType,
    pub super_profiles: Vec<SuperProfileRef>,
    /// name -> (sub-profile id -> active)
    pub sub_profiles: HashMap<String, HashMap<Uuid, bool>>,
}

impl Profile {
    pub fn new(id: Uuid, kind: ProfileType) -> Self {
        Self {
            id,
            kind,
            super_profiles: Vec::new(),
            sub_profiles: HashMap::new(),
        }
    }

    pub fn has_sub_profile(&self, name: &str, id: &Uuid) -> bool {
        self.sub_profiles
            .get(name)
            .map(|subs| subs.contains_key(id))
            .unwrap_or(false)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProfileError {
    #[error("profile {0} does not exist")]
    NotFound(Uuid),
    #[error("profile {0} already exists")]
    AlreadyExists(Uuid),
    #[error("network profile {0} cannot be a sub-profile")]
    NetworkAsSub(Uuid),
    #[error("profile {0} already has a super-profile")]
    AlreadyHasSuper(Uuid),
    #[error("profile chain starting at {0} is too deep")]
    TooDeep(Uuid),
    #[error(transparent)]
    Data(#[from] DataError),
}

impl From<ProfileError> for ResponseCode {
    fn from(e: ProfileError) -> Self {
        match e {
            ProfileError::NotFound(_) => ResponseCode::InvalidId,
            ProfileError::AlreadyExists(_) | ProfileError::AlreadyHasSuper(_) => {
                ResponseCode::IllegalState
            }
            ProfileError::NetworkAsSub(_) => ResponseCode::IllegalArgument,
            ProfileError::TooDeep(_) => ResponseCode::IllegalState,
            ProfileError::Data(e) => e.into(),
        }
    }
}

pub struct ProfileService {
    data: Arc<dyn DataManager>,
}

impl ProfileService {
    pub fn new(data: Arc<dyn DataManager>) -> Self {
        Self { data }
    }

    fn key(id: &Uuid) -> DataKey {
        DataKey::new(TABLE_PROFILES, id)
    }

    pub async fn get_profile(&self, id: &Uuid) -> Result<Option<Profile>, ProfileError> {
        Ok(read_object(self.data.as_ref(), &Self::key(id)).await?)
    }

    async fn load(&self, id: &Uuid) -> Result<Profile, ProfileError> {
        self.get_profile(id)
            .await?
            .ok_or(ProfileError::NotFound(*id))
    }

    async fn store(&self, profile: &Profile) -> Result<(), ProfileError> {
        Ok(write_object(self.data.as_ref(), &Self::key(&profile.id), profile).await?)
    }

    pub async fn create_profile(
        &self,
        id: Uuid,
        kind: ProfileType,
    ) -> Result<Profile, ProfileError> {
        if self.get_profile(&id).await?.is_some() {
            return Err(ProfileError::AlreadyExists(id));
        }
        let profile = Profile::new(id, kind);
        self.store(&profile).await?;
        debug!("Created {:?} profile {}", kind, id);
        Ok(profile)
    }

    /// Returns the network profile `id`, creating it if it does not exist.
    pub async fn ensure_network_profile(&self, id: Uuid) -> Result<Profile, ProfileError> {
        match self.get_profile(&id).await? {
            Some(profile) => Ok(profile),
            None => self.create_profile(id, ProfileType::Network).await,
        }
    }

    /// Links `child` below `parent` under `name`.
    ///
    /// Re-adding an existing link is a no-op that rewrites both ends.
    pub async fn add_sub_profile(
        &self,
        parent: &Uuid,
        name: &str,
        child: &Uuid,
    ) -> Result<(), ProfileError> {
        let mut parent_profile = self.load(parent).await?;
        let mut child_profile = self.load(child).await?;

        if child_profile.kind == ProfileType::Network {
            return Err(ProfileError::NetworkAsSub(*child));
        }
        let same_link = |r: &SuperProfileRef| r.id == *parent && r.name == name;
        if child_profile.super_profiles.iter().any(|r| !same_link(r)) {
            return Err(ProfileError::AlreadyHasSuper(*child));
        }

        child_profile.super_profiles = vec![SuperProfileRef {
            id: *parent,
            name: name.to_string(),
        }];
        self.store(&child_profile).await?;

        parent_profile
            .sub_profiles
            .entry(name.to_string())
            .or_default()
            .entry(*child)
            .or_insert(true);
        if let Err(e) = self.store(&parent_profile).await {
            warn!(
                "Sub-profile {} points at {} but the parent write failed: {}",
                child, parent, e
            );
            return Err(e);
        }
        Ok(())
    }

    /// Unlinks `child` from `parent`. Returns false if they were not linked.
    pub async fn remove_sub_profile(
        &self,
        parent: &Uuid,
        name: &str,
        child: &Uuid,
    ) -> Result<bool, ProfileError> {
        let mut parent_profile = self.load(parent).await?;
        let mut child_profile = self.load(child).await?;

        let before = child_profile.super_profiles.len();
        child_profile
            .super_profiles
            .retain(|r| !(r.id == *parent && r.name == name));
        let child_changed = child_profile.super_profiles.len() != before;
        if child_changed {
            self.store(&child_profile).await?;
        }

        let mut parent_changed = false;
        if let Some(subs) = parent_profile.sub_profiles.get_mut(name) {
            parent_changed = subs.remove(child).is_some();
            if subs.is_empty() {
                parent_profile.sub_profiles.remove(name);
            }
        }
        if parent_changed {
            self.store(&parent_profile).await?;
        }

        Ok(child_changed || parent_changed)
    }

    pub async fn set_sub_profile_active(
        &self,
        parent: &Uuid,
        name: &str,
        child: &Uuid,
        active: bool,
    ) -> Result<bool, ProfileError> {
        let mut parent_profile = self.load(parent).await?;
        match parent_profile
            .sub_profiles
            .get_mut(name)
            .and_then(|subs| subs.get_mut(child))
        {
            Some(flag) => *flag = active,
            None => return Ok(false),
        }
        self.store(&parent_profile).await?;
        Ok(true)
    }

    /// Follows super-profile references up to the owning network profile.
    pub async fn network_profile_of(&self, id: &Uuid) -> Result<Uuid, ProfileError> {
        let mut current = self.load(id).await?;
        for _ in 0..MAX_PROFILE_DEPTH {
            if current.kind == ProfileType::Network {
                return Ok(current.id);
            }
            let parent = match current.super_profiles.first() {
                Some(r) => r.id,
                None => return Err(ProfileError::NotFound(current.id)),
            };
            current = self.load(&parent).await?;
        }
        Err(ProfileError::TooDeep(*id))
    }
}
