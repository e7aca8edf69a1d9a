use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::debug;

/// Returned when a key is already held by another run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("`{key}` is already running as `{holder}`")]
pub struct AlreadyRunning {
    pub key: String,
    /// Holder that owns the slot.
    pub holder: String,
}

/// Per-key mutual exclusion that rejects instead of waiting.
///
/// At most one holder owns a key at a time. The map lock is only taken for the duration of a
/// lookup, so acquiring never blocks on the guarded work itself.
#[derive(Debug, Default)]
pub struct SingleFlightGuard {
    running: Mutex<HashMap<String, String>>,
}

impl SingleFlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        // The map stays consistent even if a holder panicked while the lock was held.
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Marks `key` as held by `holder`, or reports the current holder.
    pub fn try_acquire(&self, key: &str, holder: &str) -> Result<(), AlreadyRunning> {
        let mut running = self.lock();
        if let Some(existing) = running.get(key) {
            return Err(AlreadyRunning {
                key: key.to_owned(),
                holder: existing.clone(),
            });
        }

        running.insert(key.to_owned(), holder.to_owned());
        debug!(key, holder, "single flight slot acquired");

        Ok(())
    }

    /// Frees `key`, returning its previous holder.
    pub fn release(&self, key: &str) -> Option<String> {
        let holder = self.lock().remove(key);
        if holder.is_some() {
            debug!(key, "single flight slot released");
        }
        holder
    }

    /// Frees `key` only if `holder` still owns it.
    pub fn release_if_held_by(&self, key: &str, holder: &str) -> bool {
        let mut running = self.lock();
        if running.get(key).is_some_and(|current| current == holder) {
            running.remove(key);
            debug!(key, holder, "single flight slot released");
            return true;
        }
        false
    }

    pub fn holder(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    pub fn is_running(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Returns `(key, holder)` pairs sorted by key.
    pub fn running(&self) -> Vec<(String, String)> {
        let mut running: Vec<_> = self
            .lock()
            .iter()
            .map(|(key, holder)| (key.clone(), holder.clone()))
            .collect();
        running.sort();
        running
    }

    /// Acquires `key` and returns a permit that releases it when dropped.
    pub fn try_acquire_permit(
        self: &Arc<Self>,
        key: &str,
        holder: &str,
    ) -> Result<FlightPermit, AlreadyRunning> {
        self.try_acquire(key, holder)?;

        Ok(FlightPermit {
            guard: self.clone(),
            key: key.to_owned(),
            holder: holder.to_owned(),
        })
    }
}

/// Ownership of a single-flight slot, released on drop.
///
/// Dropping happens on success, error, panic or cancellation of the task holding the permit.
#[derive(Debug)]
pub struct FlightPermit {
    guard: Arc<SingleFlightGuard>,
    key: String,
    holder: String,
}

impl FlightPermit {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        self.guard.release_if_held_by(&self.key, &self.holder);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_holder_is_rejected_until_release() {
        let guard = SingleFlightGuard::new();

        assert!(guard.try_acquire("K", "h1").is_ok());
        assert_eq!(
            guard.try_acquire("K", "h2"),
            Err(AlreadyRunning {
                key: "K".to_owned(),
                holder: "h1".to_owned()
            })
        );

        assert_eq!(guard.release("K"), Some("h1".to_owned()));
        assert!(guard.try_acquire("K", "h2").is_ok());
        assert_eq!(guard.holder("K").as_deref(), Some("h2"));
    }

    #[test]
    fn keys_are_independent() {
        let guard = SingleFlightGuard::new();
        assert!(guard.try_acquire("prod", "h1").is_ok());
        assert!(guard.try_acquire("staging", "h2").is_ok());
        assert_eq!(
            guard.running(),
            vec![
                ("prod".to_owned(), "h1".to_owned()),
                ("staging".to_owned(), "h2".to_owned())
            ]
        );
    }

    #[test]
    fn permit_releases_on_drop() {
        let guard = Arc::new(SingleFlightGuard::new());

        let permit = guard.try_acquire_permit("K", "h1").unwrap();
        assert_eq!(permit.holder(), "h1");
        assert!(guard.try_acquire_permit("K", "h2").is_err());

        drop(permit);
        assert!(!guard.is_running("K"));
        assert!(guard.try_acquire_permit("K", "h2").is_ok());
    }

    #[test]
    fn stale_permit_does_not_release_new_holder() {
        let guard = Arc::new(SingleFlightGuard::new());

        let stale = guard.try_acquire_permit("K", "h1").unwrap();
        guard.release("K");
        guard.try_acquire("K", "h2").unwrap();

        drop(stale);
        assert_eq!(guard.holder("K").as_deref(), Some("h2"));
    }

    #[tokio::test]
    async fn permit_is_released_when_task_panics() {
        let guard = Arc::new(SingleFlightGuard::new());
        let permit = guard.try_acquire_permit("K", "h1").unwrap();

        let handle = tokio::spawn(async move {
            let _permit = permit;
            panic!("load exploded");
        });

        assert!(handle.await.unwrap_err().is_panic());
        assert!(!guard.is_running("K"));
    }
}
