use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// One dedicated OS thread driving a component between `start` and `stop`.
///
/// The closure receives the shared running flag and is expected to loop on
/// a short receive timeout, re-checking the flag after every timeout and
/// draining its input before returning.
pub struct WorkerThread {
    running: Arc<AtomicBool>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerThread {
    pub fn spawn<F>(name: &str, body: F) -> Self
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(flag))
            .expect("failed to spawn worker thread");
        Self {
            running,
            join: Some(join),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Flips the running flag and joins the thread.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.join.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        self.stop();
    }
}
