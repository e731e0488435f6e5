use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;

/// Cancellation flag checked at the top of every scheduled continuation
#[derive(Clone, Debug)]
pub struct Gate(Arc<AtomicBool>);

impl Gate {
    pub fn open() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A spawned unbounded loop paired with its gate
///
/// Stopping closes the gate first, so a continuation that is already running
/// sees it on its next check, then aborts the task so nothing further is
/// scheduled. Dropping the handle stops the task.
pub struct TaskHandle {
    gate: Gate,
    task: JoinHandle<()>,
}

impl TaskHandle {
    pub fn spawn<F, Fut>(f: F) -> Self
    where
        F: FnOnce(Gate) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let gate = Gate::open();
        let task = tokio::spawn(f(gate.clone()));
        Self { gate, task }
    }

    pub fn stop(&self) {
        self.gate.close();
        self.task.abort();
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_loop() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let handle = TaskHandle::spawn(|gate| async move {
            while gate.is_open() {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        handle.stop();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_task() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let handle = TaskHandle::spawn(|gate| async move {
            while gate.is_open() {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        tokio::time::sleep(Duration::from_millis(5)).await;
        drop(handle);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }
}
