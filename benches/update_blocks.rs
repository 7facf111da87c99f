//! Update block benchmarks
//!
//! Measures block assembly for a single busy player and a full world tick
//! where every player is visible to every other and carries a hit block.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use rustscape_sync::game::event::EventBus;
use rustscape_sync::game::mob::{Animation, Chat, Hit, HitType, Mob, MobRef, Position};
use rustscape_sync::game::persistence::{MemoryStore, PersistenceWorker};
use rustscape_sync::game::player::Player;
use rustscape_sync::game::sync::{assemble, AssemblyMode, UpdateFlag};
use rustscape_sync::game::world::{GameWorld, WorldSettings};
use rustscape_sync::net::session::Session;

fn busy_player() -> Player {
    let player = Player::new(1, "bencher");
    player.flag(UpdateFlag::Appearance);
    player.chat(Chat::new(b"buying gf".to_vec(), 0, 0));
    {
        let mut updates = player.updates().write();
        updates.animation(Animation::new(866, 0));
        updates.primary_hit(Hit::new(12, HitType::Normal));
        updates.secondary_hit(Hit::new(3, HitType::Poison));
    }
    player
}

fn bench_assemble(c: &mut Criterion) {
    let player = busy_player();
    let mut group = c.benchmark_group("assemble");

    group.bench_function("update_local", |b| {
        b.iter(|| assemble(black_box(MobRef::Player(&player)), AssemblyMode::UpdateLocal))
    });
    group.bench_function("add_local", |b| {
        b.iter(|| assemble(black_box(MobRef::Player(&player)), AssemblyMode::AddLocal))
    });

    group.finish();
}

fn bench_world_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("world_tick");

    for player_count in [10u16, 100, 250] {
        let (saves, _worker) = PersistenceWorker::new(MemoryStore::new());
        let world = GameWorld::new(WorldSettings::default(), Arc::new(EventBus::default()), saves);

        let mut players = Vec::with_capacity(player_count as usize);
        for i in 0..player_count {
            let session = Arc::new(Session::new(i as u64, "127.0.0.1:0".parse().unwrap()));
            let player = world.login(&format!("bot{}", i), None, session).unwrap();
            player.set_position(Position::new(3200 + i % 10, 3200 + i / 10 % 10, 0));
            players.push(player);
        }
        // admit everyone and fill the viewports
        world.process_tick();

        group.bench_with_input(
            BenchmarkId::new("hits", player_count),
            &player_count,
            |b, _| {
                b.iter(|| {
                    for player in &players {
                        player
                            .updates()
                            .write()
                            .primary_hit(Hit::new(1, HitType::Normal));
                    }
                    black_box(world.process_tick())
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_assemble, bench_world_tick);
criterion_main!(benches);
