//! # Concurrency
//!
//! Many threads racing registration, lookup-and-unlink and destroy on a
//! shared set of sessions and resources. Refcounts must end at zero, never
//! dip below it, and no link may be removed twice.

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use accel_core::session::MAX_SESSIONS;
    use accel_core::{
        AccelError, BufferFile, Id, Persistence, PluginFlags, Resource, ResourceType, Result,
        Runtime, Session,
    };
    use parking_lot::Mutex;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::integration::runtime_in;

    const THREADS: usize = 8;
    const ITERATIONS: usize = 2_000;

    fn buffers(rt: &Runtime, count: usize) -> Vec<Resource> {
        (0..count)
            .map(|i| {
                rt.resources()
                    .from_buf(
                        ResourceType::ALL[i % ResourceType::COUNT],
                        BufferFile::new(format!("blob{i}"), vec![i as u8; 16]),
                        Persistence::MemoryOnly,
                    )
                    .unwrap()
            })
            .collect()
    }

    fn sessions(rt: &Runtime, count: usize) -> Vec<Session> {
        (0..count)
            .map(|_| rt.sessions().init(PluginFlags::NONE).unwrap())
            .collect()
    }

    /// Unlink every session from `resource`, tolerating peers that got there first.
    fn unlink_all(rt: &Runtime, resource: &Resource) -> Result<usize> {
        let mut unlinked = 0;
        rt.registrations().foreach_session(resource, |res, sess| {
            match rt.sessions().unregister_resource(sess, res) {
                Ok(()) => {
                    unlinked += 1;
                    Ok(())
                }
                Err(AccelError::NotFound(_)) => Ok(()),
                Err(e) => Err(e),
            }
        })?;
        Ok(unlinked)
    }

    #[test]
    fn test_link_unlink_stress() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime_in(dir.path());
        let sessions = sessions(&rt, 4);
        let resources = buffers(&rt, 6);

        let linked = AtomicUsize::new(0);
        let unlinked = AtomicUsize::new(0);

        thread::scope(|scope| {
            for seed in 0..THREADS {
                let (rt, sessions, resources) = (&rt, &sessions, &resources);
                let (linked, unlinked) = (&linked, &unlinked);
                scope.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(seed as u64);
                    for _ in 0..ITERATIONS {
                        let sess = &sessions[rng.gen_range(0..sessions.len())];
                        let res = &resources[rng.gen_range(0..resources.len())];
                        match rng.gen_range(0..3) {
                            0 => match rt.sessions().register_resource(sess, res) {
                                Ok(()) => {
                                    linked.fetch_add(1, Ordering::Relaxed);
                                }
                                Err(AccelError::AlreadyExists(_)) => {}
                                Err(e) => panic!("register: {e}"),
                            },
                            1 => match rt.sessions().unregister_resource(sess, res) {
                                Ok(()) => {
                                    unlinked.fetch_add(1, Ordering::Relaxed);
                                }
                                Err(AccelError::NotFound(_)) => {}
                                Err(e) => panic!("unregister: {e}"),
                            },
                            _ => {
                                let n = unlink_all(rt, res).unwrap();
                                unlinked.fetch_add(n, Ordering::Relaxed);
                            }
                        }
                    }
                });
            }
        });

        let live = linked.load(Ordering::Relaxed) - unlinked.load(Ordering::Relaxed);
        assert_eq!(rt.registrations().len(), live);
        let refs: usize = resources.iter().map(Resource::refcount).sum();
        assert_eq!(refs, live);
        for res in &resources {
            assert_eq!(res.refcount(), rt.registrations().sessions_of(res).len());
        }

        for sess in &sessions {
            rt.sessions().release(sess).unwrap();
        }
        assert!(rt.registrations().is_empty());
        for res in &resources {
            assert_eq!(res.refcount(), 0);
            rt.resources().destroy(res).unwrap();
        }
        assert_eq!(rt.resources().count(), 0);
    }

    #[test]
    fn test_session_churn_keeps_ids_unique() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime_in(dir.path());
        let live: Mutex<HashSet<Id>> = Mutex::new(HashSet::new());

        thread::scope(|scope| {
            for _ in 0..THREADS {
                let (rt, live) = (&rt, &live);
                scope.spawn(move || {
                    for _ in 0..200 {
                        let held = sessions(rt, 4);
                        for sess in &held {
                            let fresh = live.lock().insert(sess.id());
                            assert!(fresh, "id {} handed out twice", sess.id());
                        }
                        for sess in &held {
                            live.lock().remove(&sess.id());
                            rt.sessions().release(sess).unwrap();
                        }
                    }
                });
            }
        });

        assert_eq!(rt.sessions().count(), 0);
        // Every id went back: the whole pool is available again
        let all = sessions(&rt, MAX_SESSIONS);
        let distinct: HashSet<Id> = all.iter().map(Session::id).collect();
        assert_eq!(distinct.len(), MAX_SESSIONS);
        assert!(matches!(
            rt.sessions().init(PluginFlags::NONE),
            Err(AccelError::TooManyUsers(_))
        ));
    }

    #[test]
    fn test_destroy_waits_for_registrations() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime_in(dir.path());
        let sessions = sessions(&rt, THREADS);
        let target = buffers(&rt, 1).remove(0);

        thread::scope(|scope| {
            for sess in &sessions {
                let (rt, target) = (&rt, &target);
                scope.spawn(move || {
                    for _ in 0..500 {
                        match rt.sessions().register_resource(sess, target) {
                            Ok(()) => rt.sessions().unregister_resource(sess, target).unwrap(),
                            // Destroyed under us
                            Err(AccelError::InvalidArgument(_)) => break,
                            Err(e) => panic!("register: {e}"),
                        }
                    }
                });
            }

            loop {
                match rt.resources().destroy(&target) {
                    Ok(()) => break,
                    Err(AccelError::Busy(_)) => thread::yield_now(),
                    Err(e) => panic!("destroy: {e}"),
                }
            }
        });

        assert!(!target.is_alive());
        assert_eq!(target.refcount(), 0);
        assert!(rt.registrations().is_empty());
    }
}
