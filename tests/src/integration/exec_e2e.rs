//! # Exec End-to-End
//!
//! The exec plugin driven through the runtime, with units whose symbols are
//! real `extern "C"` entry points called over the raw argument ABI.

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::ffi::c_int;
    use std::slice;
    use std::sync::Arc;

    use accel_core::arg::raw_args;
    use accel_core::ops::genop;
    use accel_core::{
        AccelError, Arg, BufferFile, Persistence, PluginFlags, RawArg, ResourceType, Result,
        Runtime,
    };
    use accel_exec::{
        CodeLoader, CodeUnit, ExecConfig, ExecEntry, ExecPlugin, UnitSource, Visibility,
    };
    use parking_lot::Mutex;

    use crate::integration::runtime_in;

    // =============================================================================
    // ENTRY POINTS
    // =============================================================================

    /// Sum every 4-byte input into the first output.
    unsafe extern "C" fn sum(
        read: *mut RawArg,
        nr_read: usize,
        write: *mut RawArg,
        nr_write: usize,
    ) -> c_int {
        if nr_write == 0 {
            return 1;
        }
        let read = slice::from_raw_parts(read, nr_read);
        let write = slice::from_raw_parts_mut(write, nr_write);
        let mut total = 0i32;
        for arg in read {
            if arg.size != 4 {
                return 2;
            }
            total += (arg.buf as *const i32).read_unaligned();
        }
        if write[0].size != 4 {
            return 3;
        }
        (write[0].buf as *mut i32).write_unaligned(total);
        0
    }

    /// Always fails.
    unsafe extern "C" fn broken(_: *mut RawArg, _: usize, _: *mut RawArg, _: usize) -> c_int {
        -1
    }

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    /// Unit resolving symbols from a fixed table.
    struct TableUnit {
        name: String,
        symbols: HashMap<&'static str, ExecEntry>,
    }

    impl CodeUnit for TableUnit {
        fn name(&self) -> &str {
            &self.name
        }

        fn call(&self, symbol: &str, read: &mut [Arg], write: &mut [Arg]) -> Result<()> {
            let entry: ExecEntry = *self.symbols.get(symbol).ok_or_else(|| {
                AccelError::InvalidArgument(format!("{}: no symbol {}", self.name, symbol))
            })?;
            let mut raw_read = raw_args(read)?;
            let mut raw_write = raw_args(write)?;
            let ret = unsafe {
                entry(
                    raw_read.as_mut_ptr(),
                    raw_read.len(),
                    raw_write.as_mut_ptr(),
                    raw_write.len(),
                )
            };
            if ret != 0 {
                return Err(AccelError::ExecFormat(format!(
                    "{}:{} returned {}",
                    self.name, symbol, ret
                )));
            }
            Ok(())
        }
    }

    /// Every unit exports `sum` and `broken`; opens are recorded in order.
    #[derive(Default)]
    struct TableLoader {
        opened: Mutex<Vec<(String, Visibility)>>,
    }

    impl CodeLoader for TableLoader {
        fn open(&self, source: UnitSource<'_>, visibility: Visibility) -> Result<Box<dyn CodeUnit>> {
            let name = match source {
                UnitSource::Path(path) => path.display().to_string(),
                UnitSource::Memory { name, .. } => name.to_string(),
            };
            self.opened.lock().push((name.clone(), visibility));
            let mut symbols: HashMap<&'static str, ExecEntry> = HashMap::new();
            symbols.insert("sum", sum);
            symbols.insert("broken", broken);
            Ok(Box::new(TableUnit { name, symbols }))
        }
    }

    fn exec_runtime(dir: &tempfile::TempDir) -> (Arc<Runtime>, Arc<TableLoader>) {
        let rt = runtime_in(dir.path());
        let loader = Arc::new(TableLoader::default());
        rt.plugins()
            .register(Arc::new(ExecPlugin::with_loader(
                ExecConfig::default(),
                loader.clone(),
            )))
            .unwrap();
        (rt, loader)
    }

    // =============================================================================
    // EXEC
    // =============================================================================

    #[test]
    fn test_exec_calls_entry_point() {
        let dir = tempfile::tempdir().unwrap();
        let (rt, loader) = exec_runtime(&dir);
        let sess = rt.sessions().init(PluginFlags::CPU).unwrap();

        let mut read = vec![Arg::from_i32(40), Arg::from_i32(2), Arg::from_i32(-5)];
        let mut write = vec![Arg::output(4)];
        rt.exec(&sess, "/opt/libsum.so", "sum", &mut read, &mut write)
            .unwrap();
        assert_eq!(write[0].as_i32().unwrap(), 37);

        // Same library again: opened once
        rt.exec(&sess, "/opt/libsum.so", "sum", &mut read[..1], &mut write)
            .unwrap();
        assert_eq!(write[0].as_i32().unwrap(), 40);
        assert_eq!(loader.opened.lock().len(), 1);

        rt.sessions().release(&sess).unwrap();
        rt.shutdown().unwrap();
    }

    #[test]
    fn test_exec_nonzero_return_is_exec_format() {
        let dir = tempfile::tempdir().unwrap();
        let (rt, _) = exec_runtime(&dir);
        let sess = rt.sessions().init(PluginFlags::NONE).unwrap();

        let mut write = vec![Arg::output(4)];
        assert!(matches!(
            rt.exec(&sess, "/opt/libsum.so", "broken", &mut [], &mut write),
            Err(AccelError::ExecFormat(_))
        ));
        // Wrong output size is the function's business too
        let mut short = vec![Arg::output(2)];
        assert!(matches!(
            rt.exec(&sess, "/opt/libsum.so", "sum", &mut [Arg::from_i32(1)], &mut short),
            Err(AccelError::ExecFormat(_))
        ));
        assert!(matches!(
            rt.exec(&sess, "/opt/libsum.so", "missing", &mut [], &mut write),
            Err(AccelError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_exec_through_genop() {
        let dir = tempfile::tempdir().unwrap();
        let (rt, _) = exec_runtime(&dir);
        let sess = rt.sessions().init(PluginFlags::NONE).unwrap();

        let mut read = genop::pack_exec(
            "/opt/libsum.so",
            "sum",
            &[Arg::from_i32(7), Arg::from_i32(8)],
        );
        let mut write = vec![Arg::output(4)];
        rt.genop(&sess, &mut read, &mut write).unwrap();
        assert_eq!(write[0].as_i32().unwrap(), 15);
    }

    #[test]
    fn test_native_loader_missing_library() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime_in(dir.path());
        rt.plugins()
            .register(Arc::new(ExecPlugin::new(ExecConfig::default())))
            .unwrap();
        let sess = rt.sessions().init(PluginFlags::NONE).unwrap();

        let missing = dir.path().join("libnothere.so");
        let mut write = vec![Arg::output(4)];
        assert!(matches!(
            rt.exec(
                &sess,
                &missing.display().to_string(),
                "mytestfunc",
                &mut [Arg::from_i32(1)],
                &mut write,
            ),
            Err(AccelError::InvalidArgument(_))
        ));
    }

    // =============================================================================
    // EXEC WITH RESOURCE
    // =============================================================================

    #[test]
    fn test_exec_with_lib_resource() {
        let dir = tempfile::tempdir().unwrap();
        let (rt, loader) = exec_runtime(&dir);
        let sess = rt.sessions().init(PluginFlags::NONE).unwrap();
        let resources = rt.resources();

        let dep = resources
            .from_buf(
                ResourceType::Lib,
                BufferFile::new("libhelper.so", vec![0x7f, b'E', b'L', b'F']),
                Persistence::MemoryOnly,
            )
            .unwrap();
        let lib = resources
            .from_bufs(
                ResourceType::Lib,
                vec![
                    BufferFile::new("libsum.so", vec![0x7f, b'E', b'L', b'F']),
                    BufferFile::new("libextra.so", vec![0x7f, b'E', b'L', b'F']),
                ],
                Persistence::MemoryOnly,
            )
            .unwrap();
        resources.aggregate(&lib, &[dep.clone()]).unwrap();
        rt.sessions().register_resource(&sess, &lib).unwrap();

        let mut write = vec![Arg::output(4)];
        rt.exec_with_resource(
            &sess,
            &lib,
            "sum",
            &mut [Arg::from_i32(20), Arg::from_i32(22)],
            &mut write,
        )
        .unwrap();
        assert_eq!(write[0].as_i32().unwrap(), 42);

        // Dependencies, then extra files, then the unit symbols come from
        let opened = loader.opened.lock().clone();
        assert_eq!(
            opened,
            vec![
                ("libhelper.so".to_string(), Visibility::Global),
                ("libextra.so".to_string(), Visibility::Global),
                ("libsum.so".to_string(), Visibility::Local),
            ]
        );

        rt.sessions().unregister_resource(&sess, &lib).unwrap();
        rt.release_resource(&lib).unwrap();
        rt.release_resource(&dep).unwrap();
        assert_eq!(resources.count(), 0);
    }
}
