//! World module
//!
//! Owns the registries and drives the game tick. Each tick runs in a fixed
//! order:
//! 1. Admit players waiting in `LoginQueue`
//! 2. Synchronize: detect movement, cache update blocks, build frames
//! 3. Reset flags and payloads, release cached blocks
//! 4. Flush every session to its transport
//! 5. Log out players waiting in `LogoutQueue`
//!
//! A failure for one mob is logged and counted against it; the tick
//! carries on with everyone else.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::config::{ServerConfig, SyncConfig};
use crate::error::{GameError, ProtocolError, Result, RustscapeError};
use crate::game::event::EventBus;
use crate::game::lifecycle::LifecycleContext;
use crate::game::mob::{Mob, MobKind, Position};
use crate::game::npc::{Npc, NpcManager};
use crate::game::persistence::{PlayerData, SaveDispatcher};
use crate::game::player::{Player, PlayerManager};
use crate::game::sync::{BlockArena, MobFault, NpcSyncManager, PlayerSyncManager};
use crate::net::session::{Session, SessionState};
use crate::protocol::messages::OutgoingGamePacket;

/// Standard game tick rate in milliseconds
pub const TICK_RATE_MS: u64 = 600;

/// World settings
#[derive(Debug, Clone)]
pub struct WorldSettings {
    /// World ID (1-255)
    pub world_id: u8,
    /// World name
    pub name: String,
    /// Whether this is a members world
    pub members: bool,
    /// Tick rate in milliseconds
    pub tick_rate_ms: u64,
    /// Maximum players allowed
    pub max_players: u16,
    /// Maximum NPCs allowed
    pub max_npcs: u16,
    /// Synchronization settings
    pub sync: SyncConfig,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            world_id: 1,
            name: "Rustscape".to_string(),
            members: true,
            tick_rate_ms: TICK_RATE_MS,
            max_players: 2000,
            max_npcs: 8000,
            sync: SyncConfig::default(),
        }
    }
}

impl WorldSettings {
    /// Create new world settings with a specific ID
    pub fn new(world_id: u8) -> Self {
        Self {
            world_id,
            ..Default::default()
        }
    }

    /// Settings taken from the server configuration
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            world_id: config.world_id,
            name: config.server_name.clone(),
            members: config.members_world,
            tick_rate_ms: config.tick_rate_ms,
            max_players: config.max_players,
            max_npcs: config.max_npcs,
            sync: config.sync.clone(),
        }
    }

    /// Set the world name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set members-only flag
    pub fn with_members(mut self, members: bool) -> Self {
        self.members = members;
        self
    }
}

/// World state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldState {
    /// World is initializing
    Initializing,
    /// World is running normally
    Running,
    /// World has stopped
    Stopped,
}

impl WorldState {
    /// Check if the world is accepting new connections
    pub fn accepting_connections(&self) -> bool {
        matches!(self, WorldState::Running)
    }
}

/// What happened during one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tick number
    pub tick: u64,
    /// Players moved to `LoggedIn`
    pub logged_in: usize,
    /// Players moved to `LoggedOut` and removed
    pub logged_out: usize,
    /// Update frames queued (player and NPC)
    pub frames: usize,
    /// Messages handed to transports
    pub flushed: usize,
    /// Mob faults recorded
    pub faults: usize,
}

/// Game world - owns the registries and drives the tick
pub struct GameWorld {
    /// World settings
    pub settings: WorldSettings,
    /// Current world state
    state: RwLock<WorldState>,
    /// Current tick number
    tick: AtomicU64,
    /// Whether the world is running
    running: AtomicBool,
    /// Time the world started
    start_time: RwLock<Option<Instant>>,
    /// Player registry
    pub players: PlayerManager,
    /// NPC registry
    pub npcs: NpcManager,
    player_sync: PlayerSyncManager,
    npc_sync: NpcSyncManager,
    /// Blocks cached for the current tick
    arena: Mutex<BlockArena>,
    events: Arc<EventBus>,
    saves: SaveDispatcher,
    /// Faults per mob since startup
    faults: Mutex<HashMap<(MobKind, u16), u64>>,
    total_faults: AtomicU64,
}

impl GameWorld {
    /// Create a new game world
    pub fn new(settings: WorldSettings, events: Arc<EventBus>, saves: SaveDispatcher) -> Self {
        info!(
            world_id = settings.world_id,
            name = %settings.name,
            "Creating game world"
        );

        Self {
            players: PlayerManager::new(settings.max_players),
            npcs: NpcManager::new(settings.max_npcs),
            player_sync: PlayerSyncManager::with_config(settings.sync.clone()),
            npc_sync: NpcSyncManager::with_config(settings.sync.clone()),
            settings,
            state: RwLock::new(WorldState::Initializing),
            tick: AtomicU64::new(0),
            running: AtomicBool::new(false),
            start_time: RwLock::new(None),
            arena: Mutex::new(BlockArena::new()),
            events,
            saves,
            faults: Mutex::new(HashMap::new()),
            total_faults: AtomicU64::new(0),
        }
    }

    /// Get the current world state
    pub fn state(&self) -> WorldState {
        *self.state.read()
    }

    /// Set the world state
    pub fn set_state(&self, new_state: WorldState) {
        let mut state = self.state.write();
        let old_state = *state;
        *state = new_state;
        info!(
            old_state = ?old_state,
            new_state = ?new_state,
            "World state changed"
        );
    }

    /// Get the current tick number
    pub fn tick(&self) -> u64 {
        self.tick.load(Ordering::SeqCst)
    }

    /// Check if the world is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get the uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time
            .read()
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }

    /// Event bus shared with collaborators
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Faults recorded against one mob
    pub fn fault_count(&self, kind: MobKind, index: u16) -> u64 {
        self.faults.lock().get(&(kind, index)).copied().unwrap_or(0)
    }

    /// Faults recorded against every mob
    pub fn total_faults(&self) -> u64 {
        self.total_faults.load(Ordering::Relaxed)
    }

    /// Blocks still alive in the cache (zero between ticks)
    pub fn live_blocks(&self) -> usize {
        self.arena.lock().live_blocks()
    }

    /// Player indices in an observer's local player list
    pub fn local_players(&self, player_index: u16) -> Vec<u16> {
        self.player_sync.local_players(player_index)
    }

    /// NPC indices in an observer's local NPC list
    pub fn local_npcs(&self, player_index: u16) -> Vec<u16> {
        self.npc_sync.local_npcs(player_index)
    }

    /// Register a player for a new connection and queue them for login
    ///
    /// Loads from `data` when the player has been saved before.
    pub fn login(
        &self,
        username: &str,
        data: Option<&PlayerData>,
        session: Arc<Session>,
    ) -> Result<Arc<Player>> {
        let player = match data {
            Some(data) => self.players.register_from_data(data)?,
            None => self.players.register(username)?,
        };

        let bound = player
            .set_session(session.clone())
            .and_then(|()| session.enqueue_login());
        if let Err(e) = bound {
            self.players.unregister(player.index);
            return Err(e);
        }

        debug!(index = player.index, session_id = session.id, "Player queued for login");
        Ok(player)
    }

    /// Ask for a player to be logged out on the next tick
    pub fn request_logout(&self, index: u16) -> Result<()> {
        let player = self
            .players
            .get(index)
            .ok_or(GameError::PlayerNotFound(index))?;
        player.require_session()?.request_logout()
    }

    /// Deactivate a player outside the normal tick order
    ///
    /// Players not yet in `LogoutQueue` are sent a logout message instead.
    pub fn deactivate(&self, index: u16) -> Result<()> {
        let player = self
            .players
            .get(index)
            .ok_or(GameError::PlayerNotFound(index))?;
        player.on_inactive(&self.lifecycle())?;
        if player.state() == Some(SessionState::LoggedOut) {
            self.remove_player(&player);
        }
        Ok(())
    }

    /// Spawn an NPC and start synchronizing it
    pub fn spawn_npc(&self, id: u16, position: Position, size: u8, max_hitpoints: u8) -> Result<Arc<Npc>> {
        let npc = self.npcs.spawn(id, position, size, max_hitpoints)?;
        self.npc_sync.register_npc(&npc);
        Ok(npc)
    }

    /// Despawn an NPC
    pub fn despawn_npc(&self, index: u16) {
        self.npc_sync.unregister_npc(index, &mut self.arena.lock());
        self.npcs.despawn(index);
    }

    /// Run the game world tick loop until shutdown
    pub async fn run(&self, shutdown_rx: &mut broadcast::Receiver<()>) {
        info!(
            world_id = self.settings.world_id,
            tick_rate_ms = self.settings.tick_rate_ms,
            "Starting game world"
        );

        self.running.store(true, Ordering::SeqCst);
        *self.start_time.write() = Some(Instant::now());
        self.set_state(WorldState::Running);

        let mut tick_interval = interval(Duration::from_millis(self.settings.tick_rate_ms));
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    if !self.is_running() {
                        break;
                    }
                    let started = Instant::now();
                    let report = self.process_tick();
                    let elapsed = started.elapsed();
                    if elapsed > Duration::from_millis(self.settings.tick_rate_ms) {
                        warn!(
                            tick = report.tick,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "Tick overran its budget"
                        );
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        self.save_all();
        self.running.store(false, Ordering::SeqCst);
        self.set_state(WorldState::Stopped);

        info!(
            total_ticks = self.tick(),
            uptime_secs = self.uptime_secs(),
            "Game world stopped"
        );
    }

    /// Stop the run loop after the current tick
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Process a single game tick
    pub fn process_tick(&self) -> TickReport {
        let tick = self.tick.fetch_add(1, Ordering::SeqCst);
        let mut report = TickReport {
            tick,
            ..Default::default()
        };

        let all_players = self.players.all();
        let ctx = self.lifecycle();

        // 1. Admission
        for player in &all_players {
            if player.state() != Some(SessionState::LoginQueue) {
                continue;
            }
            match player.on_active(&ctx) {
                Ok(()) => {
                    self.player_sync.register(player);
                    self.npc_sync.register_observer(player.index);
                    report.logged_in += 1;
                }
                Err(e) => report.faults += self.fault(MobKind::Player, player.index, e),
            }
        }

        // 2. Synchronization
        let active: Vec<Arc<Player>> = all_players
            .iter()
            .filter(|p| p.state().is_some_and(SessionState::is_in_world))
            .cloned()
            .collect();
        let roster: BTreeMap<u16, Arc<Player>> =
            active.iter().map(|p| (p.index, p.clone())).collect();
        let npcs = self.npcs.all();
        let npc_roster: BTreeMap<u16, Arc<Npc>> = npcs.iter().map(|n| (n.index, n.clone())).collect();

        {
            let mut arena = self.arena.lock();

            let mut faults = self.player_sync.prepare(&active, &mut arena);
            faults.extend(self.npc_sync.prepare(&npcs, &mut arena));

            let player_frames = self.player_sync.build_frames(&roster, &arena);
            let npc_frames = self.npc_sync.build_frames(&roster, &npc_roster, &arena);
            for (index, frame) in player_frames.into_iter().chain(npc_frames) {
                match self.queue_frame(&roster, index, frame) {
                    Ok(()) => report.frames += 1,
                    Err(e) => faults.push(MobFault::new(MobKind::Player, index, e)),
                }
            }

            for fault in faults {
                report.faults += self.fault(fault.kind, fault.index, fault.error);
            }

            // 3. Reset
            for player in &active {
                player.reset_updates();
            }
            for npc in &npcs {
                npc.reset_updates();
            }
            self.player_sync.finish(&active, &mut arena);
            self.npc_sync.finish(&npcs, &mut arena);

            let swept = arena.sweep();
            if swept > 0 {
                warn!(tick = tick, swept = swept, "Freed unreferenced update blocks");
            }
        }

        // 4. Flush
        for player in &all_players {
            let Some(session) = player.session() else {
                continue;
            };
            match session.flush() {
                Ok(sent) => report.flushed += sent,
                Err(RustscapeError::Protocol(
                    e @ (ProtocolError::ChannelClosed(_) | ProtocolError::ChannelFull(_)),
                )) => {
                    debug!(index = player.index, error = %e, "Transport unusable, requesting logout");
                    if session.state() == SessionState::LoggedIn {
                        if let Err(e) = session.request_logout() {
                            report.faults += self.fault(MobKind::Player, player.index, e);
                        }
                    }
                }
                Err(e) => report.faults += self.fault(MobKind::Player, player.index, e),
            }
        }

        // 5. Logout
        for player in &all_players {
            if player.state() != Some(SessionState::LogoutQueue) {
                continue;
            }
            match player.on_inactive(&ctx) {
                Ok(()) => {
                    self.remove_player(player);
                    report.logged_out += 1;
                }
                Err(e) => report.faults += self.fault(MobKind::Player, player.index, e),
            }
        }

        if tick % 1000 == 0 {
            debug!(
                tick = tick,
                players = roster.len(),
                npcs = npcs.len(),
                "Game tick milestone"
            );
        }
        trace!(?report, "Tick complete");
        report
    }

    /// Queue a save for every player still online
    pub fn save_all(&self) {
        let mut queued = 0;
        self.players.for_each(|player| {
            if !player.state().is_some_and(SessionState::is_in_world) {
                return;
            }
            match self.saves.dispatch(player.to_player_data()) {
                Ok(()) => queued += 1,
                Err(e) => error!(username = %player.username, error = %e, "Failed to queue save"),
            }
        });
        info!(queued = queued, "Queued saves for online players");
    }

    fn lifecycle(&self) -> LifecycleContext<'_> {
        LifecycleContext {
            events: &self.events,
            saves: &self.saves,
            members_world: self.settings.members,
        }
    }

    fn queue_frame(
        &self,
        roster: &BTreeMap<u16, Arc<Player>>,
        index: u16,
        frame: Result<OutgoingGamePacket>,
    ) -> Result<()> {
        let player = roster.get(&index).ok_or(GameError::PlayerNotFound(index))?;
        player.queue(frame?)
    }

    fn remove_player(&self, player: &Player) {
        self.player_sync.unregister(player.index, &mut self.arena.lock());
        self.npc_sync.unregister_observer(player.index);
        self.players.unregister(player.index);
    }

    /// Record a mob fault; returns 1 for the report tally
    fn fault(&self, kind: MobKind, index: u16, error: RustscapeError) -> usize {
        let count = {
            let mut faults = self.faults.lock();
            let count = faults.entry((kind, index)).or_insert(0);
            *count += 1;
            *count
        };
        self.total_faults.fetch_add(1, Ordering::Relaxed);
        warn!(
            kind = ?kind,
            index = index,
            faults = count,
            error = %error,
            "Mob skipped this tick"
        );
        1
    }
}

impl std::fmt::Debug for GameWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameWorld")
            .field("settings", &self.settings)
            .field("state", &self.state())
            .field("tick", &self.tick())
            .field("running", &self.is_running())
            .field("players", &self.players.count())
            .field("npcs", &self.npcs.count())
            .field("uptime_secs", &self.uptime_secs())
            .finish()
    }
}
