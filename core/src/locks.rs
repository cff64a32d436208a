//! Per-interface serialisation
//!
//! A transaction holds the lock of every interface it touches from before the
//! first `read_mac` until it is finalised, so two read-old/write-new sequences
//! on the same interface can never interleave.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::error::{SpoofError, SpoofResult};

type Registry = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Drop the slot for `interface` once nobody holds or waits on it
fn prune(registry: &Registry, interface: &str) {
    let mut locks = registry.lock().unwrap_or_else(PoisonError::into_inner);
    if locks
        .get(interface)
        .is_some_and(|slot| Arc::strong_count(slot) == 1)
    {
        locks.remove(interface);
    }
}

/// Held lock on one interface; released on drop
#[derive(Debug)]
pub struct InterfaceGuard {
    interface: String,
    guard: Option<OwnedMutexGuard<()>>,
    registry: Arc<Registry>,
}

impl InterfaceGuard {
    pub fn interface(&self) -> &str {
        &self.interface
    }
}

impl Drop for InterfaceGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        prune(&self.registry, &self.interface);
    }
}

#[derive(Debug, Default)]
pub struct InterfaceLocks {
    locks: Arc<Registry>,
    /// `None` waits forever
    timeout: Option<Duration>,
}

impl InterfaceLocks {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    fn slot(&self, interface: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(interface.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    pub async fn acquire(&self, interface: &str) -> SpoofResult<InterfaceGuard> {
        let slot = self.slot(interface);
        let guard = match self.timeout {
            Some(limit) => {
                let waited = tokio::time::timeout(limit, slot.lock_owned()).await;
                match waited {
                    Ok(guard) => guard,
                    Err(_) => {
                        warn!(interface, secs = limit.as_secs_f64(), "gave up waiting for interface lock");
                        prune(&self.locks, interface);
                        return Err(SpoofError::Contention {
                            interface: interface.to_string(),
                        });
                    }
                }
            }
            None => slot.lock_owned().await,
        };
        debug!(interface, "interface lock acquired");
        Ok(InterfaceGuard {
            interface: interface.to_string(),
            guard: Some(guard),
            registry: self.locks.clone(),
        })
    }

    /// Lock several interfaces in sorted order. On contention every lock
    /// already taken is released.
    pub async fn acquire_all<S: AsRef<str>>(&self, interfaces: &[S]) -> SpoofResult<Vec<InterfaceGuard>> {
        let mut names: Vec<&str> = interfaces.iter().map(AsRef::as_ref).collect();
        names.sort_unstable();
        names.dedup();

        let mut guards = Vec::with_capacity(names.len());
        for name in names {
            guards.push(self.acquire(name).await?);
        }
        Ok(guards)
    }

    pub fn is_locked(&self, interface: &str) -> bool {
        let locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .get(interface)
            .is_some_and(|slot| slot.try_lock().is_err())
    }

    /// Interfaces currently held or waited on
    pub fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_release_on_drop() {
        let locks = InterfaceLocks::new(Some(Duration::from_millis(50)));
        let guard = locks.acquire("eth0").await.unwrap();
        assert!(locks.is_locked("eth0"));
        assert!(!locks.is_locked("eth1"));
        drop(guard);
        assert!(!locks.is_locked("eth0"));
    }

    #[tokio::test]
    async fn test_released_slots_are_pruned() {
        let locks = InterfaceLocks::new(Some(Duration::from_millis(20)));
        for i in 0..100 {
            let _guard = locks.acquire(&format!("veth{}", i)).await.unwrap();
        }
        assert_eq!(locks.tracked(), 0);

        let held = locks.acquire("eth0").await.unwrap();
        assert!(locks.acquire("eth0").await.is_err());
        assert_eq!(locks.tracked(), 1);
        drop(held);
        assert_eq!(locks.tracked(), 0);
        assert!(!locks.is_locked("eth0"));
    }

    #[tokio::test]
    async fn test_waiter_keeps_slot_alive() {
        let locks = Arc::new(InterfaceLocks::new(None));
        let held = locks.acquire("eth0").await.unwrap();
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire("eth0").await.map(|g| g.interface().to_string()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);
        assert_eq!(waiter.await.unwrap().unwrap(), "eth0");
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn test_contention_after_timeout() {
        let locks = InterfaceLocks::new(Some(Duration::from_millis(20)));
        let _held = locks.acquire("eth0").await.unwrap();
        let err = locks.acquire("eth0").await.unwrap_err();
        assert!(matches!(err, SpoofError::Contention { interface } if interface == "eth0"));
    }

    #[tokio::test]
    async fn test_acquire_all_sorts_and_dedups() {
        let locks = InterfaceLocks::new(None);
        let guards = locks.acquire_all(&["wlan0", "eth0", "wlan0"]).await.unwrap();
        let names: Vec<&str> = guards.iter().map(|g| g.interface()).collect();
        assert_eq!(names, vec!["eth0", "wlan0"]);
    }

    #[tokio::test]
    async fn test_acquire_all_releases_on_contention() {
        let locks = InterfaceLocks::new(Some(Duration::from_millis(20)));
        let _held = locks.acquire("wlan0").await.unwrap();
        assert!(locks.acquire_all(&["eth0", "wlan0"]).await.is_err());
        assert!(!locks.is_locked("eth0"));
    }
}
