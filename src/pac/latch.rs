//! One-shot completion signal shared with an OS callback thread

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Single-use latch: one side blocks until any thread signals it
#[derive(Debug, Default)]
pub struct CompletionLatch {
    done: Mutex<bool>,
    cond: Condvar,
}

impl CompletionLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the latch complete and wake the waiter. Repeated calls are no-ops.
    pub fn signal(&self) {
        let mut done = self.done.lock();
        if !*done {
            *done = true;
            self.cond.notify_all();
        }
    }

    pub fn is_signaled(&self) -> bool {
        *self.done.lock()
    }

    /// Block until signalled
    pub fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.cond.wait(&mut done);
        }
    }

    /// Block until signalled or `timeout` elapses; returns whether it was signalled
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut done = self.done.lock();
        if !*done {
            self.cond.wait_while_for(&mut done, |done| !*done, timeout);
        }
        *done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_signal_from_other_thread() {
        let latch = Arc::new(CompletionLatch::new());
        let signaller = latch.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            signaller.signal();
        });

        latch.wait();
        assert!(latch.is_signaled());
        handle.join().unwrap();
    }

    #[test]
    fn test_signal_before_wait_does_not_block() {
        let latch = CompletionLatch::new();
        latch.signal();
        latch.signal();
        latch.wait();
        assert!(latch.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_wait_timeout_expires() {
        let latch = CompletionLatch::new();
        assert!(!latch.wait_timeout(Duration::from_millis(10)));
        assert!(!latch.is_signaled());
    }
}
