//! # Native Exec
//!
//! The exec plugin over the platform dynamic linker, loading the C fixtures
//! `build.rs` compiles into shared objects.
//!
//! | Object | Exports | Needs |
//! |--------|---------|-------|
//! | `libfixture_dep.so` | `fixture_sum`, `fixture_fail`, `fixture_scale` | nothing |
//! | `libfixture_main.so` | `mytestfunc` | `fixture_scale` |

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use accel_core::{
        AccelError, Arg, BufferFile, Persistence, PluginFlags, ResourceType, Runtime,
    };
    use accel_exec::{ExecConfig, ExecPlugin};

    use crate::integration::runtime_in;

    fn fixture(name: &str) -> PathBuf {
        PathBuf::from(env!("ACCEL_EXEC_FIXTURES")).join(format!("lib{name}.so"))
    }

    fn native_runtime(dir: &tempfile::TempDir) -> Arc<Runtime> {
        let rt = runtime_in(dir.path());
        rt.plugins()
            .register(Arc::new(ExecPlugin::new(ExecConfig::default())))
            .unwrap();
        rt
    }

    #[test]
    fn test_exec_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let rt = native_runtime(&dir);
        let sess = rt.sessions().init(PluginFlags::CPU).unwrap();
        let library = fixture("fixture_dep").display().to_string();

        let mut write = vec![Arg::output(4)];
        rt.exec(
            &sess,
            &library,
            "fixture_sum",
            &mut [Arg::from_i32(40), Arg::from_i32(2)],
            &mut write,
        )
        .unwrap();
        assert_eq!(write[0].as_i32().unwrap(), 42);

        assert!(matches!(
            rt.exec(&sess, &library, "fixture_fail", &mut [], &mut write),
            Err(AccelError::ExecFormat(_))
        ));
        assert!(matches!(
            rt.exec(&sess, &library, "no_such_symbol", &mut [], &mut write),
            Err(AccelError::InvalidArgument(_))
        ));
        rt.sessions().release(&sess).unwrap();
    }

    #[test]
    fn test_exec_with_resource_from_memory() {
        let dir = tempfile::tempdir().unwrap();
        let rt = native_runtime(&dir);
        let sess = rt.sessions().init(PluginFlags::NONE).unwrap();
        let resources = rt.resources();

        let dep = resources
            .from_path(ResourceType::Lib, fixture("fixture_dep"))
            .unwrap();
        let bytes = std::fs::read(fixture("fixture_main")).unwrap();
        let lib = resources
            .from_buf(
                ResourceType::Lib,
                BufferFile::new("libfixture_main.so", bytes),
                Persistence::MemoryOnly,
            )
            .unwrap();
        resources.aggregate(&lib, &[dep.clone()]).unwrap();
        rt.sessions().register_resource(&sess, &lib).unwrap();

        let mut write = vec![Arg::output(4)];
        rt.exec_with_resource(&sess, &lib, "mytestfunc", &mut [Arg::from_i32(14)], &mut write)
            .unwrap();
        assert_eq!(write[0].as_i32().unwrap(), 42);

        // Wrong output size is reported by the function itself
        let mut short = vec![Arg::output(2)];
        assert!(matches!(
            rt.exec_with_resource(&sess, &lib, "mytestfunc", &mut [Arg::from_i32(1)], &mut short),
            Err(AccelError::ExecFormat(_))
        ));

        rt.sessions().unregister_resource(&sess, &lib).unwrap();
        rt.release_resource(&lib).unwrap();
        rt.release_resource(&dep).unwrap();
        assert_eq!(resources.count(), 0);
    }

    #[test]
    fn test_exec_with_resource_persisted_copy() {
        let dir = tempfile::tempdir().unwrap();
        let rt = native_runtime(&dir);
        let sess = rt.sessions().init(PluginFlags::NONE).unwrap();
        let resources = rt.resources();

        // Both objects copied into the run directory and loaded from there
        let dep = resources
            .from_buf(
                ResourceType::Lib,
                BufferFile::new("libfixture_dep.so", std::fs::read(fixture("fixture_dep")).unwrap()),
                Persistence::Immediate,
            )
            .unwrap();
        let lib = resources
            .from_buf(
                ResourceType::Lib,
                BufferFile::new("libfixture_main.so", std::fs::read(fixture("fixture_main")).unwrap()),
                Persistence::Lazy,
            )
            .unwrap();
        resources.aggregate(&lib, &[dep.clone()]).unwrap();
        rt.sessions().register_resource(&sess, &lib).unwrap();
        assert_eq!(lib.paths().len(), 1);

        let mut write = vec![Arg::output(4)];
        rt.exec_with_resource(&sess, &lib, "mytestfunc", &mut [Arg::from_i32(-5)], &mut write)
            .unwrap();
        assert_eq!(write[0].as_i32().unwrap(), -15);
        rt.shutdown().unwrap();
    }
}
