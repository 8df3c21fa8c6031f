//! # Generic Operation Round Trip
//!
//! The same call issued typed and through `genop` must reach the same
//! implementation with the same arguments, whichever side is generic.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use accel_core::backends::NoopPlugin;
    use accel_core::ops::genop;
    use accel_core::{
        AccelError, Arg, ArgList, OpImpl, OpType, Plugin, PluginContext, PluginFlags, PluginInfo,
        Result,
    };

    use crate::integration::runtime_in;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    /// Typed exec doubling an i32, tagged with `flags`.
    struct Doubler {
        name: &'static str,
        flags: PluginFlags,
        factor: i32,
    }

    impl Plugin for Doubler {
        fn info(&self) -> PluginInfo {
            PluginInfo::new(self.name, "1.0.0", self.flags)
        }

        fn init(&self, ctx: &PluginContext<'_>) -> Result<()> {
            let factor = self.factor;
            ctx.register_op(
                OpType::Exec,
                OpImpl::exec(move |_, library, symbol, read, write| {
                    if library != "libmytestlib.so" || symbol != "mytestfunc" {
                        return Err(AccelError::NotFound(format!("{library}:{symbol}")));
                    }
                    let value = read[0].as_i32()?;
                    write[0].fill_from(&(value * factor).to_ne_bytes())
                }),
            )
        }

        fn fini(&self) -> Result<()> {
            Ok(())
        }
    }

    /// Generic-only plugin unpacking exec itself.
    struct GenericDoubler;

    impl Plugin for GenericDoubler {
        fn info(&self) -> PluginInfo {
            PluginInfo::new("generic-doubler", "1.0.0", PluginFlags::GENERIC)
        }

        fn init(&self, ctx: &PluginContext<'_>) -> Result<()> {
            ctx.register_op(
                OpType::Exec,
                OpImpl::generic(|_, read, write| {
                    // [library, symbol, value]
                    if read.len() != 3 || read[1].as_str()? != "mytestfunc" {
                        return Err(AccelError::InvalidArgument("bad exec layout".into()));
                    }
                    let value = read[2].as_i32()?;
                    write[0].fill_from(&(value * 2).to_ne_bytes())
                }),
            )
        }

        fn fini(&self) -> Result<()> {
            Ok(())
        }
    }

    fn doubler() -> Arc<Doubler> {
        Arc::new(Doubler {
            name: "doubler",
            flags: PluginFlags::CPU,
            factor: 2,
        })
    }

    // =============================================================================
    // ROUND TRIP
    // =============================================================================

    #[test]
    fn test_typed_and_genop_exec_agree() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime_in(dir.path());
        rt.plugins().register(doubler()).unwrap();
        let sess = rt.sessions().init(PluginFlags::NONE).unwrap();

        let mut typed_out = vec![Arg::output(4)];
        rt.exec(
            &sess,
            "libmytestlib.so",
            "mytestfunc",
            &mut [Arg::from_i32(15)],
            &mut typed_out,
        )
        .unwrap();

        let mut read = genop::pack_exec("libmytestlib.so", "mytestfunc", &[Arg::from_i32(15)]);
        let mut generic_out = vec![Arg::output(4)];
        rt.genop(&sess, &mut read, &mut generic_out).unwrap();

        assert_eq!(typed_out[0].as_i32().unwrap(), 30);
        assert_eq!(typed_out, generic_out);
        rt.shutdown().unwrap();
    }

    #[test]
    fn test_typed_call_reaches_generic_implementation() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime_in(dir.path());
        rt.plugins().register(Arc::new(GenericDoubler)).unwrap();
        let sess = rt.sessions().init(PluginFlags::NONE).unwrap();

        let mut inputs = vec![Arg::from_i32(-8)];
        let mut out = vec![Arg::output(4)];
        rt.exec(&sess, "libmytestlib.so", "mytestfunc", &mut inputs, &mut out)
            .unwrap();
        assert_eq!(out[0].as_i32().unwrap(), -16);
        // Inputs come back to the caller untouched
        assert_eq!(inputs[0].as_i32().unwrap(), -8);
    }

    #[test]
    fn test_arg_list_builds_genop_reads() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime_in(dir.path());
        rt.plugins().register(doubler()).unwrap();
        let sess = rt.sessions().init(PluginFlags::NONE).unwrap();

        let mut read = ArgList::new();
        read.push_u32(OpType::Exec.as_u32())
            .push_str("libmytestlib.so")
            .push_str("mytestfunc")
            .push_i32(21);
        let mut write = ArgList::new();
        write.push_output(4);

        rt.genop(&sess, read.as_mut_slice(), write.as_mut_slice())
            .unwrap();
        assert_eq!(write.extract_i32(0).unwrap(), 42);
    }

    #[test]
    fn test_genop_envelope_errors() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime_in(dir.path());
        rt.plugins().register(doubler()).unwrap();
        let sess = rt.sessions().init(PluginFlags::NONE).unwrap();

        // Empty read
        assert!(matches!(
            rt.genop(&sess, &mut [], &mut []),
            Err(AccelError::InvalidArgument(_))
        ));
        // Short tag
        assert!(matches!(
            rt.genop(&sess, &mut [Arg::from_bytes(&[1])], &mut []),
            Err(AccelError::InvalidArgument(_))
        ));
        // Missing header
        assert!(matches!(
            rt.genop(&sess, &mut [Arg::op_type(OpType::Exec)], &mut []),
            Err(AccelError::InvalidArgument(_))
        ));
        // Nobody implements it
        assert!(matches!(
            rt.genop(&sess, &mut [Arg::op_type(OpType::BlasSgemm)], &mut []),
            Err(AccelError::NotSupported(_))
        ));
    }

    // =============================================================================
    // AFFINITY
    // =============================================================================

    #[test]
    fn test_hint_selects_tagged_plugin() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime_in(dir.path());
        rt.plugins().register(doubler()).unwrap();
        rt.plugins()
            .register(Arc::new(Doubler {
                name: "tripler",
                flags: PluginFlags::GPU,
                factor: 3,
            }))
            .unwrap();

        let run = |hint: PluginFlags| {
            let sess = rt.sessions().init(hint).unwrap();
            let mut out = vec![Arg::output(4)];
            rt.exec(
                &sess,
                "libmytestlib.so",
                "mytestfunc",
                &mut [Arg::from_i32(5)],
                &mut out,
            )
            .unwrap();
            rt.sessions().release(&sess).unwrap();
            out[0].as_i32().unwrap()
        };

        assert_eq!(run(PluginFlags::NONE), 10);
        assert_eq!(run(PluginFlags::CPU), 10);
        assert_eq!(run(PluginFlags::GPU), 15);
        // No candidate matches: first registered
        assert_eq!(run(PluginFlags::FPGA), 10);
    }

    #[test]
    fn test_hint_update_changes_selection() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime_in(dir.path());
        let noop = Arc::new(NoopPlugin::default());
        rt.plugins().register(doubler()).unwrap();
        rt.plugins().register(noop.clone()).unwrap();

        let sess = rt.sessions().init(PluginFlags::CPU).unwrap();
        let op = rt.resolve(&sess, OpType::Exec).unwrap();
        assert_eq!(op.owner().info().name, "doubler");

        rt.sessions().update(&sess, PluginFlags::DEBUG).unwrap();
        rt.noop(&sess).unwrap();
        assert_eq!(noop.calls(), 1);

        // The hint survives release
        rt.sessions().release(&sess).unwrap();
        assert_eq!(sess.hint(), PluginFlags::DEBUG);
        assert!(matches!(rt.noop(&sess), Err(AccelError::InvalidArgument(_))));
    }
}
