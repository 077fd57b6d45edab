//! Performance benchmarks for the lockstep hot paths

use client::scheduler::{SchedulerConfig, StepScheduler};
use shared::transport::{Fragmenter, Reassembler};
use shared::world::encode_input;
use shared::{
    compare, DemoWorld, Input, RareAction, ServerMessage, Simulation, SnapshotEnvelope,
    StepLayout, StepPacket,
};
use std::time::{Duration, Instant};

fn full_step(tick: u64, layout: &StepLayout) -> StepPacket {
    let inputs = (0..layout.slots)
        .map(|slot| encode_input(slot % 2 == 0, slot % 3 == 0, slot % 5 == 0))
        .collect();
    let actions = (0..layout.max_actions)
        .map(|i| RareAction::Custom {
            opcode: 0x10,
            payload: i as u8,
        })
        .collect();
    StepPacket::new(tick, inputs, actions, layout).unwrap()
}

fn populated_world(players: u8) -> DemoWorld {
    let mut world = DemoWorld::new();
    let joins: Vec<RareAction> = (0..players).map(RareAction::PlayerJoin).collect();
    let inputs = vec![Input::NEUTRAL; players as usize];
    for chunk in joins.chunks(8) {
        world.apply_tick(&inputs, chunk);
    }
    world
}

/// Benchmarks step packet encoding and decoding
#[test]
fn benchmark_step_codec() {
    let layout = StepLayout::new(64, 8);
    let iterations = 100_000;
    let start = Instant::now();

    let mut total_bytes = 0;
    for tick in 0..iterations {
        let bytes = ServerMessage::SendStep(full_step(tick, &layout)).encode();
        total_bytes += bytes.len();
        let _ = ServerMessage::decode(&bytes, Some(&layout)).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Step codec: {} round trips ({} bytes) in {:?} ({:.2} μs/iter)",
        iterations,
        total_bytes,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 5 seconds
    assert!(duration.as_millis() < 5000);
}

/// Benchmarks deterministic simulation with many players
#[test]
fn benchmark_simulation_ticks() {
    let mut world = populated_world(32);
    let inputs: Vec<Input> = (0..32)
        .map(|slot| encode_input(slot % 2 == 0, slot % 2 == 1, slot % 7 == 0))
        .collect();

    let iterations = 2_000;
    let start = Instant::now();
    for _ in 0..iterations {
        world.apply_tick(&inputs, &[]);
    }

    let duration = start.elapsed();
    println!(
        "Simulation: 32 players × {} ticks in {:?} ({:.2} μs/tick)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 10_000);
}

/// Benchmarks scheduler admission and release under reordering
#[test]
fn benchmark_scheduler_throughput() {
    let layout = StepLayout::new(8, 4);
    let interval = Duration::from_millis(10);
    let mut scheduler = StepScheduler::new(SchedulerConfig::default(), interval);
    scheduler.reset_to(0);

    let iterations = 50_000u64;
    let start = Instant::now();
    let mut applied = 0u64;
    let mut tick = 1;
    while tick <= iterations {
        // Deliver in pairs, second first.
        if tick < iterations {
            scheduler.push(full_step(tick + 1, &layout));
        }
        scheduler.push(full_step(tick, &layout));
        tick += 2;
        applied += scheduler.advance(interval).len() as u64;
    }
    while scheduler.ready() > 0 {
        applied += scheduler.advance(interval).len() as u64;
    }

    let duration = start.elapsed();
    println!(
        "Scheduler: {} steps applied in {:?} ({:.2} μs/step)",
        applied,
        duration,
        duration.as_micros() as f64 / applied as f64
    );

    assert_eq!(applied, iterations);
    assert!(duration.as_millis() < 5000);
}

/// Benchmarks fragmentation and reassembly of a large snapshot
#[test]
fn benchmark_snapshot_fragmentation() {
    let state: Vec<u8> = (0..512 * 1024u32).map(|i| (i % 253) as u8).collect();
    let message = ServerMessage::SendSnapshot(SnapshotEnvelope::new(1, state)).encode();

    let mut fragmenter = Fragmenter::new(1200);
    let mut reassembler = Reassembler::new(1 << 20);

    let iterations = 20;
    let start = Instant::now();
    for _ in 0..iterations {
        let mut complete = None;
        for datagram in fragmenter.frame(&message).unwrap() {
            if let Some(bytes) = reassembler.accept(&datagram).unwrap() {
                complete = Some(bytes);
            }
        }
        assert_eq!(complete.as_deref(), Some(message.as_slice()));
    }

    let duration = start.elapsed();
    println!(
        "Fragmentation: {} × {} bytes in {:?} ({:.2} ms/snapshot)",
        iterations,
        message.len(),
        duration,
        duration.as_millis() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 5000);
}

/// Benchmarks snapshot serialization and desync captures
#[test]
fn benchmark_snapshot_and_capture() {
    let world = populated_world(64);
    let iterations = 1_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let bytes = world.serialize_state().unwrap();
        let mut restored = DemoWorld::new();
        restored.deserialize_state(&bytes).unwrap();
        compare(&world.capture_debug_state(), &restored.capture_debug_state()).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Snapshot + capture: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 5000);
}
