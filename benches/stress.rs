use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use ulid::Ulid;

use rota::{
    ConflictMode, Engine, EscalationKind, EscalationStep, NotifyHub, PolicyUpdate, Span,
    StaticDirectory,
};

const HOUR: i64 = 3_600_000; // 1 hour in ms

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

struct Team {
    id: Ulid,
    user: Ulid,
}

fn bench_engine() -> (Arc<Engine>, Arc<StaticDirectory>) {
    let dir = std::env::temp_dir().join(format!("rota_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let directory = Arc::new(StaticDirectory::new());
    let engine = Engine::new(
        dir.join("stress.wal"),
        Arc::new(NotifyHub::new()),
        directory.clone(),
    )
    .expect("engine init failed");
    (Arc::new(engine), directory)
}

fn seed_teams(directory: &StaticDirectory, n: usize) -> Vec<Team> {
    (0..n)
        .map(|i| {
            let id = Ulid::new();
            let user = Ulid::new();
            directory.add_team(id, &format!("team-{i}"));
            directory.add_user(user, &format!("user-{i}"));
            Team { id, user }
        })
        .collect()
}

async fn phase1_sequential(engine: &Engine, team: &Team) {
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let s = (i as i64) * HOUR;
        let t = Instant::now();
        engine
            .create_schedule(
                Ulid::new(),
                team.id,
                team.user,
                1,
                Span::new(s, s + HOUR),
                0,
                ConflictMode::Reject,
            )
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!(
        "  {n} schedules in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent(engine: &Arc<Engine>, teams: &[Team]) {
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();

    for team in teams {
        let engine = engine.clone();
        let team_id = team.id;
        let user = team.user;

        handles.push(tokio::spawn(async move {
            for j in 0..n_per_task {
                let s = (j as i64) * HOUR;
                engine
                    .create_schedule(
                        Ulid::new(),
                        team_id,
                        user,
                        1,
                        Span::new(s, s + HOUR),
                        0,
                        ConflictMode::Reject,
                    )
                    .await
                    .unwrap();
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = teams.len() * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {} tasks x {n_per_task} schedules = {total} total in {:.2}s = {ops:.0} ops/sec",
        teams.len(),
        elapsed.as_secs_f64()
    );
}

async fn phase3_resolve_under_load(engine: &Arc<Engine>, serviced: &Team, writers: &[Team]) {
    // Current coverage plus a one-step policy so the chain is non-trivial.
    let now = now_ms();
    engine
        .create_schedule(
            Ulid::new(),
            serviced.id,
            serviced.user,
            1,
            Span::new(now - HOUR, now + HOUR),
            0,
            ConflictMode::Resolve,
        )
        .await
        .unwrap();
    engine
        .create_policy_version(
            Ulid::new(),
            serviced.id,
            PolicyUpdate {
                name: Some("bench".into()),
                steps: Some(vec![EscalationStep {
                    order: 1,
                    timeout_minutes: 30,
                    kind: EscalationKind::User,
                    target_id: serviced.user,
                }]),
            },
        )
        .await
        .unwrap();
    engine
        .register_service(Ulid::new(), "bench-api", serviced.id)
        .await
        .unwrap();

    // Writer tasks: continuously add schedules on other teams.
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for (w, team) in writers.iter().enumerate() {
        let engine = engine.clone();
        let stop = stop.clone();
        let team_id = team.id;
        let user = team.user;
        writer_handles.push(tokio::spawn(async move {
            // Offset past the spans phase 2 already claimed on these teams.
            let base = (w as i64 + 1) * 100_000;
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) {
                let s = (base + i) * HOUR;
                let _ = engine
                    .create_schedule(
                        Ulid::new(),
                        team_id,
                        user,
                        1,
                        Span::new(s, s + HOUR),
                        0,
                        ConflictMode::Reject,
                    )
                    .await;
                i += 1;
            }
        }));
    }

    // Reader tasks: resolve the chain and measure latency.
    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();

    for _ in 0..n_readers {
        let engine = engine.clone();
        reader_handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                engine.resolve_responsibility("bench-api").await.unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("resolution query", &mut all_latencies);
}

async fn phase4_conflict_storm(engine: &Arc<Engine>, team: &Team) {
    let n_tasks = 50;
    let ops_per_task = 10;

    let landed = Arc::new(AtomicUsize::new(0));
    let squeezed = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for k in 0..n_tasks {
        let engine = engine.clone();
        let landed = landed.clone();
        let squeezed = squeezed.clone();
        let team_id = team.id;
        let user = team.user;

        handles.push(tokio::spawn(async move {
            for i in 0..ops_per_task {
                // Two-hour spans staggered by half hours: every submission
                // overlaps its neighbors and resolution has to repair.
                let s = ((k * ops_per_task + i) as i64) * HOUR / 2;
                match engine
                    .create_schedule(
                        Ulid::new(),
                        team_id,
                        user,
                        1,
                        Span::new(s, s + 2 * HOUR),
                        0,
                        ConflictMode::Resolve,
                    )
                    .await
                {
                    Ok(()) => {
                        landed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(_) => {
                        squeezed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let total = n_tasks * ops_per_task;
    println!(
        "  {total} overlapping submissions: {} landed, {} squeezed out in {:.2}s",
        landed.load(Ordering::Relaxed),
        squeezed.load(Ordering::Relaxed),
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    println!("=== rota stress benchmark ===\n");

    println!("[setup]");
    let (engine, directory) = bench_engine();
    let teams = seed_teams(&directory, 13);
    println!("  seeded {} teams", teams.len());

    println!("\n[phase 1] sequential write throughput");
    phase1_sequential(&engine, &teams[10]).await;

    println!("\n[phase 2] concurrent write throughput");
    phase2_concurrent(&engine, &teams[0..10]).await;

    println!("\n[phase 3] resolution latency under write load");
    phase3_resolve_under_load(&engine, &teams[11], &teams[0..5]).await;

    println!("\n[phase 4] conflict storm on one team");
    phase4_conflict_storm(&engine, &teams[12]).await;

    println!("\n=== benchmark complete ===");
}
