//! # Remote End-to-End
//!
//! A local runtime forwarding through [`RemotePlugin`] over a unix socket to
//! an [`AgentServer`] whose runtime runs the actual operations.
//!
//! ```text
//! local Runtime ─ RemotePlugin<SocketTransport> ─▶ unix socket ─▶ AgentServer ─ Agent ─ peer Runtime ─ PeerPlugin
//! ```

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use accel_core::ops::genop;
    use accel_core::{
        AccelError, Arg, BufferFile, OpImpl, OpType, Persistence, Plugin, PluginContext,
        PluginFlags, PluginInfo, ResourceType, Result, Runtime,
    };
    use accel_remote::agent::unix_address;
    use accel_remote::{Agent, AgentServer, RemotePlugin, SocketTransport};

    use crate::integration::runtime_in;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    /// Runs on the agent side.
    ///
    /// - exec: sums i32 inputs, fails with `NotFound` for symbol `missing`
    /// - exec-with-resource: bumps every byte of the first file, answers
    ///   with the dependency count
    /// - minmax: answers with the number of inputs
    struct PeerPlugin;

    impl Plugin for PeerPlugin {
        fn info(&self) -> PluginInfo {
            PluginInfo::new("peer", "0.1.0", PluginFlags::CPU)
        }

        fn init(&self, ctx: &PluginContext<'_>) -> Result<()> {
            ctx.register_ops(vec![
                (
                    OpType::Exec,
                    OpImpl::exec(|_, _, symbol, read, write| {
                        if symbol == "missing" {
                            return Err(AccelError::NotFound(symbol.to_string()));
                        }
                        let mut total = 0i32;
                        for arg in read.iter() {
                            total += arg.as_i32()?;
                        }
                        write[0].fill_from(&total.to_ne_bytes())
                    }),
                ),
                (
                    OpType::ExecWithResource,
                    OpImpl::exec_with_resource(|_, resource, _, _, write| {
                        let files = resource.files();
                        let data = files[0].data().map(|d| d.to_vec()).unwrap_or_default();
                        let bumped = data.iter().map(|b| b.wrapping_add(1)).collect();
                        resource.update_file(0, bumped)?;
                        write[0].fill_from(&(resource.deps().len() as u32).to_ne_bytes())
                    }),
                ),
                (
                    OpType::MinMax,
                    OpImpl::generic(|_, read, write| {
                        write[0].fill_from(&(read.len() as u32).to_ne_bytes())
                    }),
                ),
            ])
        }

        fn fini(&self) -> Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        local: Arc<Runtime>,
        server: AgentServer,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        fn agent(&self) -> &Arc<Agent> {
            self.server.agent()
        }
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();

        let peer = runtime_in(&dir.path().join("peer"));
        peer.plugins().register(Arc::new(PeerPlugin)).unwrap();
        let agent = Arc::new(Agent::new(peer));
        let server =
            AgentServer::start(agent, &unix_address(dir.path().join("agent.sock"))).unwrap();

        let local = runtime_in(&dir.path().join("local"));
        let transport = SocketTransport::new(server.address().to_string(), Duration::from_secs(5));
        local
            .plugins()
            .register(Arc::new(RemotePlugin::new(transport)))
            .unwrap();

        Fixture {
            local,
            server,
            _dir: dir,
        }
    }

    // =============================================================================
    // SESSIONS AND OPERATIONS
    // =============================================================================

    #[test]
    fn test_remote_session_lifecycle() {
        let fx = fixture();
        let sess = fx.local.sessions().init(PluginFlags::REMOTE).unwrap();
        assert_ne!(sess.remote_id(), 0);
        assert_eq!(fx.agent().session_count(), 1);

        fx.local
            .sessions()
            .update(&sess, PluginFlags::REMOTE | PluginFlags::GPU)
            .unwrap();

        fx.local.sessions().release(&sess).unwrap();
        assert_eq!(fx.agent().session_count(), 0);
    }

    #[test]
    fn test_remote_exec() {
        let fx = fixture();
        let sess = fx.local.sessions().init(PluginFlags::REMOTE).unwrap();

        let mut write = vec![Arg::output(4)];
        fx.local
            .exec(
                &sess,
                "libmytestlib.so",
                "mytestfunc",
                &mut [Arg::from_i32(30), Arg::from_i32(12)],
                &mut write,
            )
            .unwrap();
        assert_eq!(write[0].as_i32().unwrap(), 42);

        // Peer failures come back with their kind
        assert!(matches!(
            fx.local
                .exec(&sess, "libmytestlib.so", "missing", &mut [], &mut write),
            Err(AccelError::NotFound(_))
        ));

        fx.local.sessions().release(&sess).unwrap();
    }

    #[test]
    fn test_remote_generic_operation() {
        let fx = fixture();
        let sess = fx.local.sessions().init(PluginFlags::REMOTE).unwrap();

        let mut read = genop::pack(
            OpType::MinMax,
            &[Arg::from_u32(1), Arg::from_u32(2), Arg::from_u32(3)],
        );
        let mut write = vec![Arg::output(4)];
        fx.local.genop(&sess, &mut read, &mut write).unwrap();
        assert_eq!(write[0].as_u32().unwrap(), 3);

        // Nothing on the peer implements it
        let mut read = genop::pack(OpType::BlasSgemm, &[]);
        assert!(matches!(
            fx.local.genop(&sess, &mut read, &mut write),
            Err(AccelError::NotSupported(_))
        ));
    }

    // =============================================================================
    // RESOURCES
    // =============================================================================

    #[test]
    fn test_remote_resource_mirror_and_sync() {
        let fx = fixture();
        let sess = fx.local.sessions().init(PluginFlags::REMOTE).unwrap();
        let resources = fx.local.resources();

        let dep = resources
            .from_buf(
                ResourceType::Lib,
                BufferFile::new("libdep.so", vec![0x7f]),
                Persistence::MemoryOnly,
            )
            .unwrap();
        let model = resources
            .from_buf(
                ResourceType::Data,
                BufferFile::new("weights.bin", vec![1, 2, 3]),
                Persistence::MemoryOnly,
            )
            .unwrap();
        resources.aggregate(&model, &[dep.clone()]).unwrap();

        fx.local.sessions().register_resource(&sess, &model).unwrap();
        assert_ne!(model.remote_id(), 0);
        assert_ne!(dep.remote_id(), 0);
        assert_eq!(fx.agent().resource_count(), 2);

        let mut write = vec![Arg::output(4)];
        fx.local
            .exec_with_resource(&sess, &model, "bump", &mut [], &mut write)
            .unwrap();
        assert_eq!(write[0].as_u32().unwrap(), 1);

        // Local copy is stale until synced
        assert_eq!(&model.files()[0].data().unwrap()[..], &[1, 2, 3]);
        fx.local.sessions().sync_resource(&sess, &model).unwrap();
        assert_eq!(&model.files()[0].data().unwrap()[..], &[2, 3, 4]);

        fx.local.sessions().unregister_resource(&sess, &model).unwrap();
        assert_eq!(model.remote_id(), 0);
        assert_eq!(dep.remote_id(), 0);
        assert_eq!(fx.agent().resource_count(), 0);

        fx.local.sessions().release(&sess).unwrap();
        fx.local.release_resource(&model).unwrap();
        fx.local.release_resource(&dep).unwrap();
    }

    #[test]
    fn test_mirror_shared_between_sessions() {
        let fx = fixture();
        let first = fx.local.sessions().init(PluginFlags::REMOTE).unwrap();
        let second = fx.local.sessions().init(PluginFlags::REMOTE).unwrap();
        let data = fx
            .local
            .resources()
            .from_buf(
                ResourceType::Data,
                BufferFile::new("shared.bin", vec![9; 8]),
                Persistence::MemoryOnly,
            )
            .unwrap();

        fx.local.sessions().register_resource(&first, &data).unwrap();
        fx.local.sessions().register_resource(&second, &data).unwrap();
        assert_eq!(fx.agent().resource_count(), 1);

        // Releasing one session keeps the mirror for the other
        fx.local.sessions().release(&first).unwrap();
        assert_eq!(fx.agent().resource_count(), 1);
        assert_ne!(data.remote_id(), 0);

        fx.local.sessions().release(&second).unwrap();
        assert_eq!(fx.agent().resource_count(), 0);
        assert_eq!(fx.agent().session_count(), 0);
    }

    #[test]
    fn test_agent_gone() {
        let fx = fixture();
        let sess = fx.local.sessions().init(PluginFlags::REMOTE).unwrap();
        fx.server.stop();

        let mut write = vec![Arg::output(4)];
        assert!(matches!(
            fx.local
                .exec(&sess, "libmytestlib.so", "sum", &mut [], &mut write),
            Err(AccelError::ConnectionReset(_))
        ));
        assert!(matches!(
            fx.local.sessions().init(PluginFlags::REMOTE),
            Err(AccelError::ConnectionReset(_))
        ));
    }
}
