//! Per-app mutual exclusion

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::deploy::identity::AppId;

/// Held for the whole clone, build and replace sequence of one app
pub type AppGuard = OwnedMutexGuard<()>;

/// One lock per app configuration key. Ids that share a key (`my-app` and
/// `my_app`) share a checkout, so they share a lock too. Entries live as long
/// as the server, which is bounded by the number of configured apps.
#[derive(Debug, Default)]
pub struct AppLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AppLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the app's lock if nobody holds it
    pub async fn try_acquire(&self, app_id: &AppId) -> Option<AppGuard> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(app_id.env_key()).or_default().clone()
        };
        lock.try_lock_owned().ok()
    }

    /// Wait until every lock taken so far has been released once
    pub async fn wait_idle(&self) {
        let locks: Vec<Arc<Mutex<()>>> = self.locks.lock().await.values().cloned().collect();
        for lock in locks {
            drop(lock.lock().await);
        }
    }
}
