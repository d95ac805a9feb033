//! Queue requests, their ranked parameters and the stage audit trail

use crate::slots::QueueType;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Why a queue request was started
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueRequestReason {
    NetworkJoin,
    PartyJoin,
    ServerKick,
    PluginInstance,
    PluginController,
    GameShutdown,
    GameQuit,
}

impl QueueRequestReason {
    /// Reasons under which a party owner drags online members along.
    pub fn allows_party_aggregation(&self) -> bool {
        matches!(
            self,
            QueueRequestReason::NetworkJoin
                | QueueRequestReason::ServerKick
                | QueueRequestReason::PartyJoin
        )
    }

    /// Reasons whose exhaustion leaves the player nowhere to go.
    pub fn disconnects_when_exhausted(&self) -> bool {
        matches!(
            self,
            QueueRequestReason::NetworkJoin | QueueRequestReason::ServerKick
        )
    }

    /// Plugin requests retry everything they were seeded with.
    pub fn ignores_seeded_exclusions(&self) -> bool {
        matches!(
            self,
            QueueRequestReason::PluginInstance | QueueRequestReason::PluginController
        )
    }
}

/// One alternative routing target
///
/// Game fields (`game_type`, `game_mode`, `game_map`) narrow a game search
/// that `instance_id`/`instance_type` may further constrain. Without game
/// fields, `instance_id` or `instance_type` select whole instances.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct QueueRequestParameter {
    pub game_id: Option<u64>,
    pub game_type: Option<String>,
    pub game_mode: Option<String>,
    pub game_map: Option<String>,
    pub instance_id: Option<String>,
    pub instance_type: Option<String>,
    pub queue_type: QueueType,
    pub party_skip: bool,
}

impl QueueRequestParameter {
    fn empty(queue_type: QueueType) -> Self {
        Self {
            game_id: None,
            game_type: None,
            game_mode: None,
            game_map: None,
            instance_id: None,
            instance_type: None,
            queue_type,
            party_skip: false,
        }
    }

    pub fn instance(instance_id: &str) -> Self {
        Self {
            instance_id: Some(instance_id.to_string()),
            ..Self::empty(QueueType::Online)
        }
    }

    pub fn instance_type(instance_type: &str) -> Self {
        Self {
            instance_type: Some(instance_type.to_string()),
            ..Self::empty(QueueType::Online)
        }
    }

    pub fn game(game_id: u64) -> Self {
        Self {
            game_id: Some(game_id),
            ..Self::empty(QueueType::Players)
        }
    }

    pub fn game_type(game_type: &str) -> Self {
        Self {
            game_type: Some(game_type.to_string()),
            ..Self::empty(QueueType::Players)
        }
    }

    pub fn with_mode(mut self, game_mode: &str) -> Self {
        self.game_mode = Some(game_mode.to_string());
        self
    }

    pub fn with_map(mut self, game_map: &str) -> Self {
        self.game_map = Some(game_map.to_string());
        self
    }

    pub fn on_instance(mut self, instance_id: &str) -> Self {
        self.instance_id = Some(instance_id.to_string());
        self
    }

    pub fn on_instance_type(mut self, instance_type: &str) -> Self {
        self.instance_type = Some(instance_type.to_string());
        self
    }

    pub fn with_queue_type(mut self, queue_type: QueueType) -> Self {
        self.queue_type = queue_type;
        self
    }

    pub fn with_party_skip(mut self, party_skip: bool) -> Self {
        self.party_skip = party_skip;
        self
    }

    /// True if this parameter resolves to games rather than whole instances.
    pub fn targets_game(&self) -> bool {
        self.game_id.is_some()
            || self.game_type.is_some()
            || self.game_mode.is_some()
            || self.game_map.is_some()
    }
}

/// Ranked routing preferences: index 0 is the highest priority tier and each
/// tier holds equally ranked alternatives.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct QueueRequestParameters {
    tiers: Vec<Vec<QueueRequestParameter>>,
}

impl QueueRequestParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(parameter: QueueRequestParameter) -> Self {
        Self::new().tier(vec![parameter])
    }

    pub fn tier(mut self, alternatives: Vec<QueueRequestParameter>) -> Self {
        if !alternatives.is_empty() {
            self.tiers.push(alternatives);
        }
        self
    }

    pub fn parameters(&self) -> &[Vec<QueueRequestParameter>] {
        &self.tiers
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

/// Terminal outcome of a single queue attempt
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueStageResult {
    UnknownId,
    NotJoinable,
    NoResponse,
    JoinDenied,
    ServerUnavailable,
    InvalidState,
}

/// What a stage excludes from later staging passes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueueTarget {
    Instance(String),
    Game(u64),
}

/// One recorded attempt and its outcome
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct QueueStage {
    pub result: QueueStageResult,
    pub message: Option<String>,
    pub queue_type: QueueType,
    pub instance_id: String,
    pub game_id: Option<u64>,
}

impl QueueStage {
    pub fn new(
        result: QueueStageResult,
        queue_type: QueueType,
        instance_id: &str,
        game_id: Option<u64>,
    ) -> Self {
        Self {
            result,
            message: None,
            queue_type,
            instance_id: instance_id.to_string(),
            game_id,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// A failed game attempt only excludes that game; a failed instance
    /// attempt excludes the whole instance.
    pub fn target(&self) -> QueueTarget {
        match self.game_id {
            Some(game_id) => QueueTarget::Game(game_id),
            None => QueueTarget::Instance(self.instance_id.clone()),
        }
    }
}

/// An in-flight routing request
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct QueueRequest {
    pub id: u64,
    pub reason: QueueRequestReason,
    pub reason_message: Option<String>,
    pub parameters: QueueRequestParameters,
    stages: Vec<QueueStage>,
    seeded: usize,
}

impl QueueRequest {
    pub fn new(reason: QueueRequestReason, parameters: QueueRequestParameters) -> Self {
        Self {
            id: rand::random(),
            reason,
            reason_message: None,
            parameters,
            stages: Vec::new(),
            seeded: 0,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.reason_message = Some(message.into());
        self
    }

    /// Records a stage that happened before this request started, such as
    /// the instance a player was kicked from.
    pub fn with_seeded_stage(mut self, stage: QueueStage) -> Self {
        self.stages.push(stage);
        self.seeded = self.stages.len();
        self
    }

    pub fn stages(&self) -> &[QueueStage] {
        &self.stages
    }

    pub fn add_stage(&mut self, stage: QueueStage) {
        self.stages.push(stage);
    }

    /// Targets that staging must skip. Grows monotonically as stages are added.
    pub fn excluded_targets(&self) -> HashSet<QueueTarget> {
        let considered = if self.reason.ignores_seeded_exclusions() {
            &self.stages[self.seeded..]
        } else {
            &self.stages[..]
        };
        considered.iter().map(QueueStage::target).collect()
    }
}
