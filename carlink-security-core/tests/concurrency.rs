//! Many host threads driving one module at once.

use std::sync::{Arc, Barrier};
use std::thread;

use carlink_security_core::{ModuleConfig, ModuleError, SecurityModule};

const THREADS: usize = 8;
const ROUNDS: usize = 100;

#[test]
fn test_concurrent_create_sign_release() {
    let module = Arc::new(SecurityModule::new());
    module.init("test").expect("init");
    let expected = {
        let handle = module.create_context("me.hufman", "test").expect("create");
        let response = module.sign(handle, &[0u8; 16]).expect("sign");
        module.release_context(handle).expect("release");
        response
    };

    let barrier = Arc::new(Barrier::new(THREADS));
    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let module = Arc::clone(&module);
            let barrier = Arc::clone(&barrier);
            let expected = expected.clone();
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..ROUNDS {
                    let handle = module.create_context("me.hufman", "test").expect("create");
                    assert_eq!(module.sign(handle, &[0u8; 16]).expect("sign"), expected);
                    module.release_context(handle).expect("release");
                    assert_eq!(
                        module.sign(handle, &[0u8; 16]),
                        Err(ModuleError::InvalidHandle { handle })
                    );
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker");
    }
    assert_eq!(module.live_contexts(), 0);
}

#[test]
fn test_signing_on_shared_handle_while_others_churn() {
    let module = Arc::new(
        SecurityModule::with_config(ModuleConfig { max_contexts: 4 }).expect("module"),
    );
    module.init("bmw").expect("init");
    let shared = module.create_context("me.hufman", "test").expect("create");
    let expected = module.sign(shared, b"challenge").expect("sign");

    let signers: Vec<_> = (0..THREADS / 2)
        .map(|_| {
            let module = Arc::clone(&module);
            let expected = expected.clone();
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    assert_eq!(module.sign(shared, b"challenge").expect("sign"), expected);
                }
            })
        })
        .collect();
    let churners: Vec<_> = (0..THREADS / 2)
        .map(|_| {
            let module = Arc::clone(&module);
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    match module.create_context("me.hufman", "other") {
                        Ok(handle) => module.release_context(handle).expect("release"),
                        Err(ModuleError::ResourceExhausted { capacity }) => {
                            assert_eq!(capacity, 4);
                        }
                        Err(err) => panic!("unexpected error: {err}"),
                    }
                }
            })
        })
        .collect();

    for worker in signers.into_iter().chain(churners) {
        worker.join().expect("worker");
    }
    assert_eq!(module.live_contexts(), 1);
}

#[test]
fn test_deinit_races_with_callers_without_aliasing() {
    let module = Arc::new(SecurityModule::new());
    module.init("mini").expect("init");

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let module = Arc::clone(&module);
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    let Ok(handle) = module.create_context("me.hufman", "test") else {
                        continue;
                    };
                    match module.sign(handle, b"challenge") {
                        Ok(response) => assert_eq!(response.len(), 64),
                        Err(err) => assert!(err.is_caller_misuse(), "{err}"),
                    }
                    let _ = module.release_context(handle);
                }
            })
        })
        .collect();

    for _ in 0..10 {
        module.deinit();
        module.init("mini").expect("re-init");
    }
    for worker in workers {
        worker.join().expect("worker");
    }
    module.deinit();
    assert_eq!(module.live_contexts(), 0);
}
