//! # Accel Dispatch Benchmarks
//!
//! Cost of getting a call to its implementation:
//!
//! | Group | Measures |
//! |-------|----------|
//! | dispatch | `noop` and `exec` typed vs. through the generic envelope |
//! | sessions | session open/release churn |
//! | registration | resource link/unlink against many sessions |
//! | remote | a round trip to an agent over a unix socket |

use std::sync::Arc;
use std::time::Duration;

use accel_core::backends::NoopPlugin;
use accel_core::ops::genop;
use accel_core::{
    Arg, BufferFile, OpImpl, OpType, Persistence, Plugin, PluginContext, PluginFlags, PluginInfo,
    ResourceType, Result, Runtime, RuntimeConfig,
};
use accel_remote::agent::unix_address;
use accel_remote::{Agent, AgentServer, RemotePlugin, SocketTransport};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;

/// Exec adding one to an i32.
struct Increment;

impl Plugin for Increment {
    fn info(&self) -> PluginInfo {
        PluginInfo::new("increment", "0.1.0", PluginFlags::CPU)
    }

    fn init(&self, ctx: &PluginContext<'_>) -> Result<()> {
        ctx.register_op(
            OpType::Exec,
            OpImpl::exec(|_, _, _, read, write| {
                let value = read[0].as_i32()?;
                write[0].fill_from(&(value + 1).to_ne_bytes())
            }),
        )
    }

    fn fini(&self) -> Result<()> {
        Ok(())
    }
}

fn runtime(dir: &tempfile::TempDir) -> Arc<Runtime> {
    let rt = Arc::new(Runtime::new(RuntimeConfig {
        rundir_base: dir.path().join("run"),
        ..RuntimeConfig::default()
    }));
    if let Err(e) = rt.bootstrap() {
        panic!("bootstrap: {e}");
    }
    rt
}

// ============================================================================
// Dispatch
// ============================================================================

fn bench_dispatch(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(&dir);
    rt.plugins().register(Arc::new(NoopPlugin::default())).unwrap();
    rt.plugins().register(Arc::new(Increment)).unwrap();
    let sess = rt.sessions().init(PluginFlags::NONE).unwrap();

    let mut group = c.benchmark_group("dispatch");

    group.bench_function("noop_typed", |b| {
        b.iter(|| black_box(rt.noop(&sess).is_ok()))
    });

    group.bench_function("noop_genop", |b| {
        let mut read = genop::pack_noop();
        b.iter(|| black_box(rt.genop(&sess, &mut read, &mut []).is_ok()))
    });

    group.bench_function("exec_typed", |b| {
        let mut read = vec![Arg::from_i32(41)];
        let mut write = vec![Arg::output(4)];
        b.iter(|| {
            rt.exec(&sess, "libbench.so", "inc", &mut read, &mut write)
                .unwrap();
            black_box(write[0].as_i32().unwrap())
        })
    });

    group.bench_function("exec_genop", |b| {
        let mut read = genop::pack_exec("libbench.so", "inc", &[Arg::from_i32(41)]);
        let mut write = vec![Arg::output(4)];
        b.iter(|| {
            rt.genop(&sess, &mut read, &mut write).unwrap();
            black_box(write[0].as_i32().unwrap())
        })
    });

    group.finish();
    rt.shutdown().unwrap();
}

// ============================================================================
// Sessions
// ============================================================================

fn bench_sessions(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(&dir);

    let mut group = c.benchmark_group("sessions");

    for batch in [1usize, 16, 256] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::new("init_release", batch), &batch, |b, &batch| {
            b.iter(|| {
                let held: Vec<_> = (0..batch)
                    .map(|_| rt.sessions().init(PluginFlags::NONE).unwrap())
                    .collect();
                for sess in &held {
                    rt.sessions().release(sess).unwrap();
                }
                black_box(held.len())
            })
        });
    }

    group.finish();
}

// ============================================================================
// Registration
// ============================================================================

fn bench_registration(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(&dir);
    let sessions: Vec<_> = (0..64)
        .map(|_| rt.sessions().init(PluginFlags::NONE).unwrap())
        .collect();
    let data = rt
        .resources()
        .from_buf(
            ResourceType::Data,
            BufferFile::new("bench.bin", vec![0; 4096]),
            Persistence::MemoryOnly,
        )
        .unwrap();

    let mut group = c.benchmark_group("registration");

    group.bench_function("link_unlink_random_session", |b| {
        let mut rng = rand::thread_rng();
        b.iter(|| {
            let sess = &sessions[rng.gen_range(0..sessions.len())];
            rt.sessions().register_resource(sess, &data).unwrap();
            rt.sessions().unregister_resource(sess, &data).unwrap();
        })
    });

    group.bench_function("release_resource_64_links", |b| {
        b.iter_batched(
            || {
                let res = rt
                    .resources()
                    .from_buf(
                        ResourceType::Data,
                        BufferFile::new("short.bin", vec![1; 64]),
                        Persistence::MemoryOnly,
                    )
                    .unwrap();
                for sess in &sessions {
                    rt.sessions().register_resource(sess, &res).unwrap();
                }
                res
            },
            |res| rt.release_resource(&res).unwrap(),
            criterion::BatchSize::SmallInput,
        )
    });

    group.finish();
}

// ============================================================================
// Remote
// ============================================================================

fn bench_remote(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();

    let peer = runtime(&dir);
    peer.plugins().register(Arc::new(NoopPlugin::default())).unwrap();
    peer.plugins().register(Arc::new(Increment)).unwrap();
    let server = AgentServer::start(
        Arc::new(Agent::new(peer)),
        &unix_address(dir.path().join("bench.sock")),
    )
    .unwrap();

    let local_dir = tempfile::tempdir().unwrap();
    let local = runtime(&local_dir);
    let transport = SocketTransport::new(server.address().to_string(), Duration::from_secs(5));
    local
        .plugins()
        .register(Arc::new(RemotePlugin::new(transport)))
        .unwrap();
    let sess = local.sessions().init(PluginFlags::REMOTE).unwrap();

    let mut group = c.benchmark_group("remote");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("exec_round_trip", |b| {
        let mut read = vec![Arg::from_i32(1)];
        let mut write = vec![Arg::output(4)];
        b.iter(|| {
            local
                .exec(&sess, "libbench.so", "inc", &mut read, &mut write)
                .unwrap();
            black_box(write[0].as_i32().unwrap())
        })
    });

    group.finish();
    local.sessions().release(&sess).unwrap();
    server.stop();
}

criterion_group!(
    benches,
    bench_dispatch,
    bench_sessions,
    bench_registration,
    bench_remote,
);

criterion_main!(benches);
