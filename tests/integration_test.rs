//! Integration tests for entity synchronization
//!
//! These tests verify the end-to-end behavior of:
//! - Update block assembly and the shared block cache
//! - The login/logout lifecycle as driven by the world tick
//! - Observer frames as they reach a transport channel

use std::collections::HashSet;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use tokio::sync::mpsc;

use rustscape_sync::game::event::EventBus;
use rustscape_sync::game::lifecycle::{LifecycleContext, TAB_WIDGETS};
use rustscape_sync::game::mob::{Chat, Hit, HitType, Mob, MobRef, Position};
use rustscape_sync::game::persistence::{MemoryStore, PersistenceWorker, PlayerData, PlayerStore};
use rustscape_sync::game::player::{Player, Skill};
use rustscape_sync::game::sync::{
    assemble, AssemblyMode, BlockArena, BlockHandle, CachedBlockSlot, PlayerSyncManager,
    UpdateFlag,
};
use rustscape_sync::game::world::{GameWorld, WorldSettings};
use rustscape_sync::net::session::{Session, SessionState};
use rustscape_sync::protocol::messages::{build_assignment, build_tab_widget, OutgoingOpcode};

fn world() -> (GameWorld, PersistenceWorker<MemoryStore>) {
    let (saves, worker) = PersistenceWorker::new(MemoryStore::new());
    let world = GameWorld::new(WorldSettings::default(), Arc::new(EventBus::default()), saves);
    (world, worker)
}

fn connect(world: &GameWorld, name: &str, position: Position) -> (Arc<Player>, mpsc::Receiver<Vec<u8>>) {
    let (tx, rx) = mpsc::channel(256);
    let session = Arc::new(Session::with_channel(1, "127.0.0.1:0".parse().unwrap(), tx));
    let player = world.login(name, None, session).unwrap();
    player.set_position(position);
    (player, rx)
}

fn drain(rx: &mut mpsc::Receiver<Vec<u8>>) -> Vec<Vec<u8>> {
    let mut packets = Vec::new();
    while let Ok(packet) = rx.try_recv() {
        packets.push(packet);
    }
    packets
}

/// A mob with nothing flagged produces no block and leaves its slot empty
#[test]
fn test_quiescent_mob_produces_nothing() {
    let player = Player::new(1, "quiet");
    assert_eq!(
        assemble(MobRef::Player(&player), AssemblyMode::UpdateLocal).unwrap(),
        None
    );

    let manager = PlayerSyncManager::new();
    let mut arena = BlockArena::new();
    let player = Arc::new(player);
    // the first tick always rebuilds the region, so bind a session
    let session = Arc::new(Session::new(1, "127.0.0.1:0".parse().unwrap()));
    session.enqueue_login().unwrap();
    player.set_session(session).unwrap();
    manager.register(&player);

    assert!(manager.prepare(&[player.clone()], &mut arena).is_empty());
    assert_eq!(manager.cached_block(1), None);
    assert_eq!(arena.live_blocks(), 0);
}

/// The secondary hit block for (50, poison, 30 of 99) is bit-exact
#[test]
fn test_secondary_hit_bytes() {
    let player = Player::new(1, "tank");
    player.set_level(Skill::Hitpoints, 30);
    player.set_experience(Skill::Hitpoints, 13_034_431);
    player
        .updates()
        .write()
        .secondary_hit(Hit::new(50, HitType::Poison));

    let block = assemble(MobRef::Player(&player), AssemblyMode::UpdateLocal)
        .unwrap()
        .unwrap();
    // extended header 0x200 | 0x40, little endian
    assert_eq!(&block[..2], &[0x40, 0x02]);
    assert_eq!(&block[2..], &[50, 254, 30, 29]);
}

/// Chat flagged twice in a tick is encoded once, with the latest message
#[test]
fn test_chat_encoded_once() {
    let player = Player::new(1, "talker");
    player.chat(Chat::new(b"first".to_vec(), 0, 0));
    player.chat(Chat::new(b"second".to_vec(), 0, 0));

    let block = assemble(MobRef::Player(&player), AssemblyMode::UpdateLocal)
        .unwrap()
        .unwrap();
    let reversed: Vec<u8> = b"second".iter().rev().copied().collect();
    assert!(block.ends_with(&reversed));
    assert_eq!(block.len(), 1 + 2 + 1 + 1 + reversed.len());
}

/// Activation sends the assignment and the 13 tabs in order, then flags
/// the first tick's region and appearance
#[test]
fn test_login_sequence() {
    let events = EventBus::default();
    let (saves, _worker) = PersistenceWorker::new(MemoryStore::new());
    let ctx = LifecycleContext {
        events: &events,
        saves: &saves,
        members_world: true,
    };

    let player = Player::new(3, "newbie");
    let session = Arc::new(Session::new(9, "127.0.0.1:0".parse().unwrap()));
    session.enqueue_login().unwrap();
    player.set_session(session.clone()).unwrap();

    player.on_active(&ctx).unwrap();
    assert_eq!(session.state(), SessionState::LoggedIn);

    let updates = player.updates().read();
    assert!(updates.flags.is_flagged(UpdateFlag::Region));
    assert!(updates.flags.is_flagged(UpdateFlag::Appearance));
    drop(updates);

    let mut expected = vec![build_assignment(3, true)];
    expected.extend(TAB_WIDGETS.iter().map(|&(tab, widget)| build_tab_widget(tab, widget)));
    assert_eq!(session.pending(), expected);

    // a second activation is rejected and changes nothing
    assert!(player.on_active(&ctx).is_err());
    assert_eq!(session.pending_count(), 14);
    assert_eq!(events.dispatched(), 1);
}

/// A session can only ever be bound to one player
#[test]
fn test_session_bound_once() {
    let player = Player::new(1, "solo");
    let first = Arc::new(Session::new(1, "127.0.0.1:0".parse().unwrap()));
    let second = Arc::new(Session::new(2, "127.0.0.1:0".parse().unwrap()));
    player.set_session(first).unwrap();
    assert!(player.set_session(second).is_err());
    assert_eq!(player.session().unwrap().id, 1);
}

/// A block released at the end of one tick cannot be read in the next,
/// even after its arena slot is reused
#[test]
fn test_cross_tick_isolation() {
    let manager = PlayerSyncManager::new();
    let mut arena = BlockArena::new();
    let player = Arc::new(Player::new(1, "hitter"));
    let session = Arc::new(Session::new(1, "127.0.0.1:0".parse().unwrap()));
    session.enqueue_login().unwrap();
    player.set_session(session).unwrap();
    manager.register(&player);

    player.updates().write().primary_hit(Hit::new(1, HitType::Normal));
    manager.prepare(&[player.clone()], &mut arena);
    let first = manager.cached_block(1).unwrap();
    manager.finish(&[player.clone()], &mut arena);
    player.reset_updates();
    assert_eq!(arena.get(first), None);

    player.updates().write().primary_hit(Hit::new(2, HitType::Normal));
    manager.prepare(&[player.clone()], &mut arena);
    let second = manager.cached_block(1).unwrap();
    assert_ne!(first, second);
    assert_eq!(arena.get(first), None);
    assert!(arena.get(second).is_some());
}

/// Frames reach the transport framed as variable-short packets
#[test]
fn test_frame_reaches_transport() {
    let (world, _worker) = world();
    let (alice, mut alice_rx) = connect(&world, "alice", Position::new(3222, 3222, 0));
    let (bob, _bob_rx) = connect(&world, "bob", Position::new(3224, 3224, 0));

    let report = world.process_tick();
    assert_eq!(report.logged_in, 2);
    assert_eq!(report.faults, 0);
    assert_eq!(world.local_players(alice.index), vec![bob.index]);
    assert_eq!(world.local_players(bob.index), vec![alice.index]);

    let packets = drain(&mut alice_rx);
    let frame = packets
        .iter()
        .find(|p| p[0] == OutgoingOpcode::PlayerUpdate.as_u8())
        .unwrap();
    let length = u16::from_be_bytes([frame[1], frame[2]]) as usize;
    assert_eq!(length, frame.len() - 3);

    // bob's hit block trails alice's frame: mask 0x20
    bob.updates().write().primary_hit(Hit::new(4, HitType::Normal));
    world.process_tick();
    let packets = drain(&mut alice_rx);
    let frame = packets
        .iter()
        .find(|p| p[0] == OutgoingOpcode::PlayerUpdate.as_u8())
        .unwrap();
    assert!(frame.ends_with(&[0x20, 4, 1 + 128, 10u8.wrapping_neg(), 10]));
    assert_eq!(world.live_blocks(), 0);
}

/// Logging out saves the player and frees its index
#[tokio::test]
async fn test_logout_saves_player() {
    let store = Arc::new(MemoryStore::new());
    let (saves, worker) = PersistenceWorker::new(store.clone());
    let world = GameWorld::new(WorldSettings::default(), Arc::new(EventBus::default()), saves);
    let handle = worker.spawn();

    let (player, _rx) = connect(&world, "leaver", Position::new(3200, 3201, 0));
    world.process_tick();
    world.request_logout(player.index).unwrap();
    let report = world.process_tick();
    assert_eq!(report.logged_out, 1);
    assert_eq!(world.players.count(), 0);

    drop(world);
    assert_eq!(handle.await.unwrap(), 1);
    let saved = store.load("leaver").await.unwrap().unwrap();
    assert_eq!(saved.position, Position::new(3200, 3201, 0));
}

/// A saved player logs back in where they left off
#[test]
fn test_login_restores_saved_player() {
    let store = MemoryStore::new();
    let mut data = PlayerData::new("returner");
    data.position = Position::new(3093, 3493, 0);
    tokio_test::block_on(store.save(&data)).unwrap();

    let loaded = tokio_test::block_on(store.load("returner")).unwrap().unwrap();
    let (world, _worker) = world();
    let session = Arc::new(Session::new(1, "127.0.0.1:0".parse().unwrap()));
    let player = world.login("returner", Some(&loaded), session).unwrap();

    assert_eq!(player.position(), Position::new(3093, 3493, 0));
    assert_eq!(player.state(), Some(SessionState::LoginQueue));
    assert!(tokio_test::block_on(store.load("nobody")).unwrap().is_none());
}

#[derive(Debug, Clone)]
enum SlotOp {
    Clear(usize),
    Fresh(usize),
    Share { from: usize, to: usize },
}

fn slot_op() -> impl Strategy<Value = SlotOp> {
    prop_oneof![
        (0..4usize).prop_map(SlotOp::Clear),
        (0..4usize).prop_map(SlotOp::Fresh),
        (0..4usize, 0..4usize).prop_map(|(from, to)| SlotOp::Share { from, to }),
    ]
}

proptest! {
    /// Every live block's count equals the slots holding it, and clearing
    /// every slot leaves the arena empty
    #[test]
    fn test_refcount_balance(ops in prop::collection::vec(slot_op(), 0..64)) {
        let mut arena = BlockArena::new();
        let mut slots = [CachedBlockSlot::new(); 4];

        for op in ops {
            match op {
                SlotOp::Clear(i) => slots[i].set(&mut arena, None).unwrap(),
                SlotOp::Fresh(i) => {
                    let handle = arena.insert(bytes::Bytes::from_static(&[1, 2, 3]));
                    slots[i].set(&mut arena, Some(handle)).unwrap();
                }
                SlotOp::Share { from, to } => {
                    let handle = slots[from].get();
                    slots[to].set(&mut arena, handle).unwrap();
                }
            }

            let held: Vec<BlockHandle> = slots.iter().filter_map(|s| s.get()).collect();
            for handle in &held {
                let holders = held.iter().filter(|h| *h == handle).count() as u32;
                prop_assert_eq!(arena.ref_count(*handle), holders);
            }
            let distinct: HashSet<BlockHandle> = held.iter().copied().collect();
            prop_assert_eq!(arena.live_blocks(), distinct.len());
        }

        for slot in slots.iter_mut() {
            slot.set(&mut arena, None).unwrap();
        }
        prop_assert_eq!(arena.live_blocks(), 0);
    }
}
