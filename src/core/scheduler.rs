// Copyright (c) 2026 PoultriScan Project
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/poultriscan/poultriscan-rs

//! Cooperative scheduling primitives
//!
//! Engines run as plain worker threads with an explicit stop token. The
//! token's sleep is sliced so a stop request is honoured within 100 ms even
//! in the middle of a long stabilization delay.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Largest uninterruptible sleep slice
const SLICE: Duration = Duration::from_millis(100);

/// Shared cancellation flag checked at every loop boundary and sleep slice
#[derive(Clone, Debug, Default)]
pub struct StopToken {
    stopped: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a cooperative stop; workers notice within one slice
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for `dur` in <=100 ms slices, re-checking the flag between
    /// slices. Returns `false` if the sleep was cut short by a stop.
    pub fn sleep(&self, dur: Duration) -> bool {
        let deadline = Instant::now() + dur;
        loop {
            if self.is_stopped() {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            thread::sleep(remaining.min(SLICE));
        }
    }
}

/// A spawned engine worker and its stop token
pub struct WorkerHandle {
    name: &'static str,
    token: StopToken,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn token(&self) -> &StopToken {
        &self.token
    }

    /// Flag the worker to stop; does not wait for it
    pub fn stop(&self) {
        self.token.stop();
    }

    /// Stop and wait for the worker thread to exit
    pub fn stop_and_join(mut self) {
        self.token.stop();
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("worker '{}' panicked", self.name);
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.thread
            .as_ref()
            .map(|t| t.is_finished())
            .unwrap_or(true)
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.token.stop();
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("worker '{}' panicked", self.name);
            }
        }
    }
}

/// Spawn a named engine worker carrying the given stop token
pub fn spawn_worker<F>(name: &'static str, token: StopToken, f: F) -> WorkerHandle
where
    F: FnOnce(StopToken) + Send + 'static,
{
    debug!("spawning worker '{name}'");
    let worker_token = token.clone();
    let thread = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || f(worker_token))
        .expect("worker thread spawn");
    WorkerHandle {
        name,
        token,
        thread: Some(thread),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_completes_when_not_stopped() {
        let token = StopToken::new();
        assert!(token.sleep(Duration::from_millis(5)));
    }

    #[test]
    fn test_sleep_breaks_within_a_slice() {
        let token = StopToken::new();
        let stopper = token.clone();
        let start = Instant::now();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            stopper.stop();
        });
        let completed = token.sleep(Duration::from_secs(10));
        t.join().unwrap();
        assert!(!completed);
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_worker_runs_and_joins() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let worker = spawn_worker("test", StopToken::new(), move |_token| {
            flag.store(true, Ordering::SeqCst);
        });
        worker.stop_and_join();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_stop_cancels_long_worker() {
        let token = StopToken::new();
        let worker = spawn_worker("long", token, |token| {
            // Would run for an hour if the stop were not honoured
            token.sleep(Duration::from_secs(3600));
        });
        let start = Instant::now();
        worker.stop_and_join();
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
