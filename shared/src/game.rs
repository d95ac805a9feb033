//! Instance and game records reported by instances

use crate::slots::{QueueType, Slots};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Status of a game server process
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Instance {
    pub id: String,
    pub instance_type: String,
    pub joinable: bool,
    /// Lobby-like instances that never host games
    pub non_playable: bool,
    pub current_players: u32,
    /// Negative means unlimited
    pub max_players: i32,
}

impl Instance {
    pub fn new(id: &str, instance_type: &str, max_players: i32) -> Self {
        Self {
            id: id.to_string(),
            instance_type: instance_type.to_string(),
            joinable: true,
            non_playable: false,
            current_players: 0,
            max_players,
        }
    }

    pub fn non_playable(mut self) -> Self {
        self.non_playable = true;
        self
    }

    /// True if `incoming` more players fit under the player limit.
    pub fn has_slots(&self, incoming: usize) -> bool {
        self.max_players < 0 || self.current_players as usize + incoming <= self.max_players as usize
    }
}

/// A match or session hosted by exactly one instance
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Game {
    pub game_id: u64,
    pub instance_id: String,
    pub game_type: String,
    pub game_mode: String,
    pub game_map: String,
    pub slots: Slots,
    pub state: String,
    pub properties: HashMap<String, String>,
}

impl Game {
    pub fn new(game_id: u64, instance_id: &str, game_type: &str, slots: Slots) -> Self {
        Self {
            game_id,
            instance_id: instance_id.to_string(),
            game_type: game_type.to_string(),
            game_mode: String::new(),
            game_map: String::new(),
            slots,
            state: "WAITING".to_string(),
            properties: HashMap::new(),
        }
    }

    pub fn with_mode(mut self, game_mode: &str) -> Self {
        self.game_mode = game_mode.to_string();
        self
    }

    pub fn with_map(mut self, game_map: &str) -> Self {
        self.game_map = game_map.to_string();
        self
    }

    /// Matches the optional type/mode/map filters of a queue parameter.
    pub fn matches(
        &self,
        game_type: Option<&str>,
        game_mode: Option<&str>,
        game_map: Option<&str>,
    ) -> bool {
        game_type.map_or(true, |t| t == self.game_type)
            && game_mode.map_or(true, |m| m == self.game_mode)
            && game_map.map_or(true, |m| m == self.game_map)
    }

    pub fn add_player(&mut self, id: Uuid, queue_type: QueueType) {
        self.slots.add(id, queue_type);
    }

    pub fn remove_player(&mut self, id: &Uuid) -> bool {
        self.slots.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_slots() {
        let mut instance = Instance::new("lobby-1", "lobby", 50);
        assert!(instance.has_slots(50));
        instance.current_players = 50;
        assert!(!instance.has_slots(1));
        assert!(instance.has_slots(0));

        let unlimited = Instance::new("hub", "lobby", -1);
        assert!(unlimited.has_slots(10_000));
    }

    #[test]
    fn test_game_matching() {
        let game = Game::new(1, "arena-1", "duels", Slots::new(2, 2, 2))
            .with_mode("ranked")
            .with_map("castle");

        assert!(game.matches(None, None, None));
        assert!(game.matches(Some("duels"), Some("ranked"), None));
        assert!(game.matches(Some("duels"), None, Some("castle")));
        assert!(!game.matches(Some("skywars"), None, None));
        assert!(!game.matches(Some("duels"), Some("casual"), None));
    }

    #[test]
    fn test_game_players() {
        let mut game = Game::new(1, "arena-1", "duels", Slots::new(2, 2, 2));
        let id = Uuid::new_v4();

        game.add_player(id, QueueType::Playing);
        assert!(game.slots.playing.contains(&id));
        assert!(game.remove_player(&id));
        assert!(!game.remove_player(&id));
    }
}
