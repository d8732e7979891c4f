//! Per-job and global cancellation signal bus, per §4.4. The only other
//! legitimate process-wide singleton is the Ingestion Service's job-task
//! registry (see `service.rs`); both are owned by the daemon's `main` and
//! torn down explicitly, never stashed in a module-level static.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Notify;

struct ShutdownEvent {
    set: AtomicBool,
    notify: Notify,
}

impl ShutdownEvent {
    fn new() -> Self {
        ShutdownEvent {
            set: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    fn set_event(&self) {
        // Monotonic: once set, stays set for the life of the registration.
        if !self.set.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    fn is_set(&self) -> bool {
        self.set.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct ShutdownManager {
    events: Arc<DashMap<String, Arc<ShutdownEvent>>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        ShutdownManager {
            events: Arc::new(DashMap::new()),
        }
    }

    pub fn register_job(&self, job_id: &str) {
        self.events
            .entry(job_id.to_string())
            .or_insert_with(|| Arc::new(ShutdownEvent::new()));
    }

    /// `None` requests shutdown for every currently registered job.
    pub fn request_shutdown(&self, job_id: Option<&str>) {
        match job_id {
            Some(id) => {
                if let Some(event) = self.events.get(id) {
                    event.set_event();
                }
            }
            None => {
                for entry in self.events.iter() {
                    entry.value().set_event();
                }
            }
        }
    }

    pub fn unregister_job(&self, job_id: &str) {
        self.events.remove(job_id);
    }

    pub fn is_shutdown_requested(&self, job_id: &str) -> bool {
        self.events
            .get(job_id)
            .map(|e| e.is_set())
            .unwrap_or(false)
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_job_is_not_shutdown_requested() {
        let mgr = ShutdownManager::new();
        assert!(!mgr.is_shutdown_requested("job-1"));
    }

    #[test]
    fn request_shutdown_for_single_job_only_affects_that_job() {
        let mgr = ShutdownManager::new();
        mgr.register_job("job-1");
        mgr.register_job("job-2");
        mgr.request_shutdown(Some("job-1"));
        assert!(mgr.is_shutdown_requested("job-1"));
        assert!(!mgr.is_shutdown_requested("job-2"));
    }

    #[test]
    fn request_shutdown_none_affects_all_registered_jobs() {
        let mgr = ShutdownManager::new();
        mgr.register_job("job-1");
        mgr.register_job("job-2");
        mgr.request_shutdown(None);
        assert!(mgr.is_shutdown_requested("job-1"));
        assert!(mgr.is_shutdown_requested("job-2"));
    }

    #[test]
    fn unregister_job_clears_its_state() {
        let mgr = ShutdownManager::new();
        mgr.register_job("job-1");
        mgr.request_shutdown(Some("job-1"));
        mgr.unregister_job("job-1");
        assert!(!mgr.is_shutdown_requested("job-1"));
    }

    #[test]
    fn setting_is_monotonic() {
        let mgr = ShutdownManager::new();
        mgr.register_job("job-1");
        mgr.request_shutdown(Some("job-1"));
        mgr.request_shutdown(Some("job-1"));
        assert!(mgr.is_shutdown_requested("job-1"));
    }
}
