//! Player module
//!
//! Manages player entities and their state including:
//! - Identity, rights and membership
//! - Position and the last region the client loaded
//! - Appearance, worn equipment models and skills
//! - The one-shot binding to a connection session
//! - This tick's update flags and payloads

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{GameError, Result};
use crate::game::mob::{Chat, ForceMovement, Hitpoints, Mob, MobKind, MobUpdates, Position};
use crate::game::persistence::{PlayerData, SkillData};
use crate::game::sync::update_flags::UpdateFlag;
use crate::net::session::{Session, SessionState};
use crate::protocol::messages::OutgoingGamePacket;

/// Maximum player index value
///
/// 2047 is the player list terminator in update frames and is never handed out.
pub const MAX_PLAYER_INDEX: u16 = 2046;

/// Player rights/privilege levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum PlayerRights {
    /// Normal player
    #[default]
    Normal = 0,
    /// Player moderator
    Moderator = 1,
    /// Administrator
    Administrator = 2,
}

impl PlayerRights {
    /// Get the rights level value
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Moderator,
            2 => Self::Administrator,
            _ => Self::Normal,
        }
    }
}

/// Player appearance (for model rendering)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appearance {
    /// Gender (0 = male, 1 = female)
    pub gender: u8,
    /// Head (hair) model
    pub head: u16,
    /// Torso model
    pub torso: u16,
    /// Arms model
    pub arms: u16,
    /// Hands model
    pub hands: u16,
    /// Legs model
    pub legs: u16,
    /// Feet model
    pub feet: u16,
    /// Beard model (male only)
    pub beard: u16,
    /// Hair color
    pub hair_color: u8,
    /// Torso color
    pub torso_color: u8,
    /// Legs color
    pub legs_color: u8,
    /// Feet color
    pub feet_color: u8,
    /// Skin color
    pub skin_color: u8,
}

impl Default for Appearance {
    fn default() -> Self {
        Self::default_male()
    }
}

impl Appearance {
    /// Create default male appearance
    pub fn default_male() -> Self {
        Self {
            gender: 0,
            head: 0,
            torso: 18,
            arms: 26,
            hands: 33,
            legs: 36,
            feet: 42,
            beard: 10,
            hair_color: 0,
            torso_color: 0,
            legs_color: 0,
            feet_color: 0,
            skin_color: 0,
        }
    }

    /// Create default female appearance
    pub fn default_female() -> Self {
        Self {
            gender: 1,
            head: 45,
            torso: 56,
            arms: 61,
            hands: 67,
            legs: 70,
            feet: 79,
            beard: 0,
            hair_color: 0,
            torso_color: 0,
            legs_color: 0,
            feet_color: 0,
            skin_color: 0,
        }
    }

    /// Whether the player is female
    pub fn is_female(&self) -> bool {
        self.gender == 1
    }
}

/// Skill IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Skill {
    Attack = 0,
    Defence = 1,
    Strength = 2,
    Hitpoints = 3,
    Ranged = 4,
    Prayer = 5,
    Magic = 6,
    Cooking = 7,
    Woodcutting = 8,
    Fletching = 9,
    Fishing = 10,
    Firemaking = 11,
    Crafting = 12,
    Smithing = 13,
    Mining = 14,
    Herblore = 15,
    Agility = 16,
    Thieving = 17,
    Slayer = 18,
    Farming = 19,
    Runecrafting = 20,
}

impl Skill {
    /// Total number of skills
    pub const COUNT: usize = 21;
}

/// Experience needed for a level
pub fn experience_for_level(level: u8) -> u32 {
    let mut points = 0u32;
    for lvl in 1..level.min(99) as u32 {
        points += lvl + (300.0 * 2f64.powf(lvl as f64 / 7.0)) as u32;
    }
    points / 4
}

/// Level reached with the given experience
pub fn level_for_experience(experience: u32) -> u8 {
    let mut points = 0u32;
    for lvl in 1..99u32 {
        points += lvl + (300.0 * 2f64.powf(lvl as f64 / 7.0)) as u32;
        if points / 4 > experience {
            return lvl as u8;
        }
    }
    99
}

/// Player skills data
#[derive(Debug, Clone)]
pub struct Skills {
    /// Current levels (can be boosted/drained)
    pub levels: [u8; Skill::COUNT],
    /// Experience points
    pub experience: [u32; Skill::COUNT],
}

impl Default for Skills {
    fn default() -> Self {
        let mut levels = [1u8; Skill::COUNT];
        let mut experience = [0u32; Skill::COUNT];

        levels[Skill::Hitpoints as usize] = 10;
        experience[Skill::Hitpoints as usize] = experience_for_level(10);

        Self { levels, experience }
    }
}

impl Skills {
    /// Current level of a skill
    pub fn level(&self, skill: Skill) -> u8 {
        self.levels[skill as usize]
    }

    /// Set the current level of a skill
    pub fn set_level(&mut self, skill: Skill, level: u8) {
        self.levels[skill as usize] = level;
    }

    /// Level implied by experience, ignoring boosts and drains
    pub fn static_level(&self, skill: Skill) -> u8 {
        level_for_experience(self.experience[skill as usize])
    }

    /// Get the combat level
    pub fn combat_level(&self) -> u8 {
        let level = |skill| self.static_level(skill) as f64;
        let base = (level(Skill::Defence)
            + level(Skill::Hitpoints)
            + (level(Skill::Prayer) / 2.0).floor())
            * 0.25;
        let melee = (level(Skill::Attack) + level(Skill::Strength)) * 0.325;
        let range = (level(Skill::Ranged) * 1.5).floor() * 0.325;
        let mage = (level(Skill::Magic) * 1.5).floor() * 0.325;

        (base + melee.max(range).max(mage)).floor() as u8
    }
}

/// Worn equipment slots that show on the player model
pub const EQUIPMENT_SLOTS: usize = 12;

/// A player entity in the game
pub struct Player {
    /// Player index (1-2046)
    pub index: u16,
    /// Username (lowercase, underscores)
    pub username: String,
    /// Display name
    pub display_name: String,
    /// Whether the player is a member
    pub member: bool,
    /// Player rights
    rights: RwLock<PlayerRights>,
    /// Current position
    position: RwLock<Position>,
    /// Position the client last built its map around
    last_region: RwLock<Option<Position>>,
    /// Player appearance
    appearance: RwLock<Appearance>,
    /// Item ids worn per model slot, 0 for empty
    equipment: RwLock<[u16; EQUIPMENT_SLOTS]>,
    /// Player skills
    skills: RwLock<Skills>,
    /// Run energy (0-100)
    run_energy: RwLock<u8>,
    /// Bound connection, set once on login
    session: OnceCell<Arc<Session>>,
    /// This tick's flags and payloads
    updates: RwLock<MobUpdates>,
}

impl Player {
    /// Create a new player at the default spawn
    pub fn new(index: u16, username: impl Into<String>) -> Self {
        let username = username.into();
        let display_name = username.replace('_', " ");

        Self {
            index,
            username: username.to_lowercase().replace(' ', "_"),
            display_name,
            member: false,
            rights: RwLock::new(PlayerRights::Normal),
            position: RwLock::new(Position::SPAWN),
            last_region: RwLock::new(None),
            appearance: RwLock::new(Appearance::default_male()),
            equipment: RwLock::new([0; EQUIPMENT_SLOTS]),
            skills: RwLock::new(Skills::default()),
            run_energy: RwLock::new(100),
            session: OnceCell::new(),
            updates: RwLock::new(MobUpdates::new()),
        }
    }

    /// Create a player from persisted data
    pub fn from_player_data(index: u16, data: &PlayerData) -> Self {
        let mut skills = Skills::default();
        for skill in &data.skills {
            let id = skill.id as usize;
            if id < Skill::COUNT {
                skills.levels[id] = skill.level;
                skills.experience[id] = skill.experience;
            }
        }

        let mut player = Self::new(index, data.username.clone());
        player.display_name = data.display_name.clone();
        player.member = data.member;
        *player.rights.get_mut() = PlayerRights::from_u8(data.rights);
        *player.position.get_mut() = data.position;
        *player.appearance.get_mut() = data.appearance.clone();
        *player.skills.get_mut() = skills;
        *player.run_energy.get_mut() = data.run_energy.min(100);

        debug!(
            index = index,
            username = %data.username,
            position = %data.position,
            "Created player from persisted data"
        );
        player
    }

    /// Snapshot the player's account state for saving
    pub fn to_player_data(&self) -> PlayerData {
        let skills = self.skills.read();
        let skills = (0..Skill::COUNT)
            .map(|i| SkillData {
                id: i as u8,
                level: skills.levels[i],
                experience: skills.experience[i],
            })
            .collect();

        PlayerData {
            username: self.username.clone(),
            display_name: self.display_name.clone(),
            rights: self.rights().as_u8(),
            member: self.member,
            position: self.position(),
            appearance: self.appearance(),
            skills,
            run_energy: *self.run_energy.read(),
            last_saved: None,
        }
    }

    /// Bind the connection session
    ///
    /// A player can be bound exactly once; a second binding is rejected
    /// so two connections never control one character.
    pub fn set_session(&self, session: Arc<Session>) -> Result<()> {
        self.session
            .set(session)
            .map_err(|_| GameError::SessionAlreadyBound(self.index).into())
    }

    /// The bound session, if any
    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.get()
    }

    /// The bound session or `SessionNotBound`
    pub fn require_session(&self) -> Result<&Arc<Session>> {
        self.session
            .get()
            .ok_or_else(|| GameError::SessionNotBound(self.index).into())
    }

    /// Lifecycle state of the bound session
    pub fn state(&self) -> Option<SessionState> {
        self.session.get().map(|s| s.state())
    }

    /// Queue a message on the bound session
    pub fn queue(&self, packet: OutgoingGamePacket) -> Result<()> {
        self.require_session()?.queue(packet);
        Ok(())
    }

    /// Get the player's rights
    pub fn rights(&self) -> PlayerRights {
        *self.rights.read()
    }

    /// Set the player's rights
    pub fn set_rights(&self, rights: PlayerRights) {
        *self.rights.write() = rights;
    }

    /// Move to an adjacent or nearby tile
    pub fn set_position(&self, position: Position) {
        *self.position.write() = position;
    }

    /// Position the client last built its map around
    pub fn last_region(&self) -> Option<Position> {
        *self.last_region.read()
    }

    /// Record the position a region rebuild was sent for
    pub fn set_last_region(&self, position: Position) {
        *self.last_region.write() = Some(position);
    }

    /// Get the player's appearance
    pub fn appearance(&self) -> Appearance {
        self.appearance.read().clone()
    }

    /// Change the player's appearance
    pub fn set_appearance(&self, appearance: Appearance) {
        *self.appearance.write() = appearance;
        self.flag(UpdateFlag::Appearance);
    }

    /// Item ids worn per model slot
    pub fn equipment(&self) -> [u16; EQUIPMENT_SLOTS] {
        *self.equipment.read()
    }

    /// Wear an item in a model slot (0 to remove)
    pub fn set_equipment(&self, slot: usize, item: u16) {
        if slot < EQUIPMENT_SLOTS {
            self.equipment.write()[slot] = item;
            self.flag(UpdateFlag::Appearance);
        }
    }

    /// Read access to skills
    pub fn skills(&self) -> parking_lot::RwLockReadGuard<'_, Skills> {
        self.skills.read()
    }

    /// Set a skill's current level
    pub fn set_level(&self, skill: Skill, level: u8) {
        self.skills.write().set_level(skill, level);
    }

    /// Set a skill's experience
    pub fn set_experience(&self, skill: Skill, experience: u32) {
        self.skills.write().experience[skill as usize] = experience;
    }

    /// Get the combat level
    pub fn combat_level(&self) -> u8 {
        self.skills.read().combat_level()
    }

    /// Say something in public chat
    pub fn chat(&self, chat: Chat) {
        self.updates.write().chat(chat);
    }

    /// Start a forced movement
    pub fn force_movement(&self, movement: ForceMovement) {
        self.updates.write().force_movement(movement);
    }
}

impl Mob for Player {
    fn index(&self) -> u16 {
        self.index
    }

    fn kind(&self) -> MobKind {
        MobKind::Player
    }

    fn position(&self) -> Position {
        *self.position.read()
    }

    fn size(&self) -> u8 {
        1
    }

    fn hitpoints(&self) -> Hitpoints {
        let skills = self.skills.read();
        Hitpoints {
            current: skills.level(Skill::Hitpoints),
            max: skills.static_level(Skill::Hitpoints),
        }
    }

    fn updates(&self) -> &RwLock<MobUpdates> {
        &self.updates
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("index", &self.index)
            .field("username", &self.username)
            .field("position", &self.position())
            .field("state", &self.state())
            .field("rights", &self.rights())
            .finish()
    }
}

/// Player manager - handles player registration and indexing
pub struct PlayerManager {
    /// Map of player index to player
    players: DashMap<u16, Arc<Player>>,
    /// Map of username to player index
    username_to_index: DashMap<String, u16>,
    /// Next available player index
    next_index: AtomicU16,
    /// Maximum player count
    max_players: u16,
}

impl PlayerManager {
    /// Create a new player manager
    pub fn new(max_players: u16) -> Self {
        Self {
            players: DashMap::new(),
            username_to_index: DashMap::new(),
            next_index: AtomicU16::new(1), // Index 0 is reserved
            max_players: max_players.min(MAX_PLAYER_INDEX),
        }
    }

    /// Register a new player
    pub fn register(&self, username: &str) -> Result<Arc<Player>> {
        let index = self.reserve(username)?;
        Ok(self.insert(Player::new(index, username)))
    }

    /// Register a player from persisted data
    pub fn register_from_data(&self, data: &PlayerData) -> Result<Arc<Player>> {
        let index = self.reserve(&data.username)?;
        Ok(self.insert(Player::from_player_data(index, data)))
    }

    fn reserve(&self, username: &str) -> Result<u16> {
        let key = username.to_lowercase().replace(' ', "_");
        if self.username_to_index.contains_key(&key) {
            return Err(GameError::AlreadyRegistered(key).into());
        }
        self.allocate_index()
    }

    fn insert(&self, player: Player) -> Arc<Player> {
        let player = Arc::new(player);
        self.players.insert(player.index, player.clone());
        self.username_to_index
            .insert(player.username.clone(), player.index);

        info!(
            index = player.index,
            username = %player.username,
            "Player registered"
        );
        player
    }

    /// Unregister a player
    pub fn unregister(&self, index: u16) {
        if let Some((_, player)) = self.players.remove(&index) {
            self.username_to_index.remove(&player.username);
            info!(
                index = index,
                username = %player.username,
                "Player unregistered"
            );
        }
    }

    /// Get a player by index
    pub fn get(&self, index: u16) -> Option<Arc<Player>> {
        self.players.get(&index).map(|r| r.clone())
    }

    /// Get a player by username
    pub fn get_by_username(&self, username: &str) -> Option<Arc<Player>> {
        let key = username.to_lowercase().replace(' ', "_");
        self.username_to_index
            .get(&key)
            .and_then(|idx| self.get(*idx))
    }

    /// Get the player count
    pub fn count(&self) -> usize {
        self.players.len()
    }

    /// Check if the world is full
    pub fn is_full(&self) -> bool {
        self.count() >= self.max_players as usize
    }

    /// Allocate a player index
    fn allocate_index(&self) -> Result<u16> {
        for _ in 0..self.max_players {
            let index = self.next_index.fetch_add(1, Ordering::SeqCst);

            if index == 0 || index > self.max_players {
                self.next_index.store(1, Ordering::SeqCst);
                continue;
            }

            if !self.players.contains_key(&index) {
                return Ok(index);
            }
        }

        Err(GameError::WorldFull.into())
    }

    /// Every registered player, ordered by index
    pub fn all(&self) -> Vec<Arc<Player>> {
        let mut players: Vec<Arc<Player>> = self.players.iter().map(|r| r.clone()).collect();
        players.sort_by_key(|p| p.index);
        players
    }

    /// Iterate over all players
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Player),
    {
        for entry in self.players.iter() {
            f(&entry);
        }
    }
}

impl Default for PlayerManager {
    fn default() -> Self {
        Self::new(MAX_PLAYER_INDEX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session(id: u64) -> Arc<Session> {
        Arc::new(Session::new(id, "127.0.0.1:43594".parse().unwrap()))
    }

    #[test]
    fn test_experience_table() {
        assert_eq!(experience_for_level(1), 0);
        assert_eq!(experience_for_level(2), 83);
        assert_eq!(experience_for_level(10), 1154);
        assert_eq!(level_for_experience(0), 1);
        assert_eq!(level_for_experience(82), 1);
        assert_eq!(level_for_experience(83), 2);
        assert_eq!(level_for_experience(1154), 10);
        assert_eq!(level_for_experience(200_000_000), 99);
    }

    #[test]
    fn test_skills_default() {
        let skills = Skills::default();
        assert_eq!(skills.level(Skill::Attack), 1);
        assert_eq!(skills.level(Skill::Hitpoints), 10);
        assert_eq!(skills.static_level(Skill::Hitpoints), 10);
        assert_eq!(skills.combat_level(), 3);
    }

    #[test]
    fn test_player_creation() {
        let player = Player::new(1, "Test_Player");
        assert_eq!(player.index, 1);
        assert_eq!(player.username, "test_player");
        assert_eq!(player.display_name, "Test Player");
        assert_eq!(player.position(), Position::SPAWN);
        assert!(player.session().is_none());
    }

    #[test]
    fn test_hitpoints_track_drain() {
        let player = Player::new(1, "test");
        player.set_level(Skill::Hitpoints, 4);
        assert_eq!(player.hitpoints(), Hitpoints { current: 4, max: 10 });
    }

    #[test]
    fn test_session_binds_once() {
        let player = Player::new(3, "test");
        player.set_session(test_session(1)).unwrap();

        let err = player.set_session(test_session(2)).unwrap_err();
        assert_eq!(err.to_string(), "Game error: Session already bound to player 3");
        assert_eq!(player.session().map(|s| s.id), Some(1));
    }

    #[test]
    fn test_queue_requires_session() {
        let player = Player::new(4, "test");
        assert!(player.queue(crate::protocol::messages::build_logout()).is_err());
    }

    #[test]
    fn test_appearance_change_flags() {
        let player = Player::new(1, "test");
        player.set_appearance(Appearance::default_female());
        assert!(player.updates().read().flags.is_flagged(UpdateFlag::Appearance));
        assert!(player.appearance().is_female());
    }

    #[test]
    fn test_player_data_round_trip() {
        let player = Player::new(1, "Test");
        player.set_position(Position::new(3200, 3201, 0));
        player.set_level(Skill::Attack, 5);

        let data = player.to_player_data();
        let restored = Player::from_player_data(2, &data);
        assert_eq!(restored.position(), Position::new(3200, 3201, 0));
        assert_eq!(restored.skills().level(Skill::Attack), 5);
        assert_eq!(restored.username, "test");
    }

    #[test]
    fn test_player_manager() {
        let manager = PlayerManager::new(100);
        assert_eq!(manager.count(), 0);

        let player = manager.register("TestPlayer").unwrap();
        assert_eq!(player.index, 1);
        assert_eq!(manager.count(), 1);

        let found = manager.get_by_username("testplayer").unwrap();
        assert_eq!(found.index, 1);

        manager.unregister(1);
        assert_eq!(manager.count(), 0);
    }

    #[test]
    fn test_player_manager_duplicate() {
        let manager = PlayerManager::new(100);
        manager.register("TestPlayer").unwrap();
        assert!(manager.register("testplayer").is_err());
    }

    #[test]
    fn test_default_manager_never_allocates_terminator() {
        let manager = PlayerManager::default();
        manager.next_index.store(MAX_PLAYER_INDEX, Ordering::SeqCst);

        let last = manager.register("last").unwrap();
        assert_eq!(last.index, 2046);
        // 2047 is skipped and allocation wraps back to the start
        let wrapped = manager.register("wrapped").unwrap();
        assert_eq!(wrapped.index, 1);
        assert!(manager.get(2047).is_none());
    }

    #[test]
    fn test_player_manager_full() {
        let manager = PlayerManager::new(2);
        manager.register("a").unwrap();
        manager.register("b").unwrap();
        assert!(manager.is_full());
        assert!(matches!(
            manager.register("c"),
            Err(crate::error::RustscapeError::Game(GameError::WorldFull))
        ));
    }
}
