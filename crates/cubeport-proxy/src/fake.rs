//! Recording [`ProxyController`] for tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use cubeport_runtime::RuntimeError;

use crate::controller::{ProxyController, ProxyFuture};
use crate::error::ProxyError;

/// Counts bootstraps and reloads; reloads can be made to fail.
#[derive(Debug, Default)]
pub struct RecordingController {
    bootstraps: AtomicUsize,
    reloads: AtomicUsize,
    fail_reload: AtomicBool,
}

impl RecordingController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bootstraps(&self) -> usize {
        self.bootstraps.load(Ordering::SeqCst)
    }

    /// Successful reloads so far.
    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }

    pub fn set_fail_reload(&self, fail: bool) {
        self.fail_reload.store(fail, Ordering::SeqCst);
    }
}

impl ProxyController for RecordingController {
    fn bootstrap(&self) -> ProxyFuture<'_, ()> {
        Box::pin(async move {
            self.bootstraps.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn reload(&self) -> ProxyFuture<'_, ()> {
        Box::pin(async move {
            if self.fail_reload.load(Ordering::SeqCst) {
                return Err(ProxyError::Runtime(RuntimeError::Command {
                    operation: "reload",
                    target: "cubeport-proxy".to_string(),
                    output: "container cubeport-proxy is not running".to_string(),
                }));
            }
            self.reloads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}
