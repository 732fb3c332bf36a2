// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Latent action manager.
//!
//! Tracks every managed coroutine and drives it from the primary thread's
//! `pump()`. Each tick, per action: tear it down if its owner died or it was
//! canceled, resume it if its latent wait is satisfied, and retire it once
//! finished. Actions started during a tick join the next one.

use std::sync::{Arc, Mutex, OnceLock};

use crate::promise::Promise;

use super::LatentOwner;

/// Identifies a latent action within its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LatentActionInfo {
    pub uuid: u64,
}

impl LatentActionInfo {
    pub fn new(uuid: u64) -> Self {
        Self { uuid }
    }
}

pub(crate) struct PendingLatentCoroutine {
    owner: Arc<dyn LatentOwner>,
    uuid: u64,
    promise: Promise,
}

impl PendingLatentCoroutine {
    pub fn new(owner: Arc<dyn LatentOwner>, info: LatentActionInfo, promise: Promise) -> Self {
        Self {
            owner,
            uuid: info.uuid,
            promise,
        }
    }

    fn owned_by(&self, owner: &Arc<dyn LatentOwner>) -> bool {
        Arc::as_ptr(&self.owner) as *const () == Arc::as_ptr(owner) as *const ()
    }

    fn resume_if_ready(&self) {
        let ready = {
            let mut wait = self.promise.latent_wait();
            let due = wait.as_mut().is_some_and(|pending| pending.tick());
            if due {
                wait.take()
            } else {
                None
            }
        };
        if let Some(wait) = ready {
            wait.into_resumer().resume();
        }
    }
}

#[derive(Default)]
pub struct LatentActionManager {
    actions: Mutex<Vec<Arc<PendingLatentCoroutine>>>,
}

static MANAGER: OnceLock<LatentActionManager> = OnceLock::new();

pub(crate) fn manager() -> &'static LatentActionManager {
    MANAGER.get_or_init(LatentActionManager::default)
}

impl LatentActionManager {
    /// Actions not yet retired.
    pub fn action_count(&self) -> usize {
        self.actions.lock().unwrap().len()
    }

    /// Request cancellation of every action with `uuid`. The coroutine is
    /// torn down on the next tick. False if no such action is running.
    pub fn cancel_action(&self, uuid: u64) -> bool {
        let actions = self.actions.lock().unwrap();
        let mut found = false;
        for action in actions.iter().filter(|a| a.uuid == uuid) {
            action.promise.extras().cancellation().cancel();
            found = true;
        }
        found
    }

    pub(crate) fn contains(&self, owner: &Arc<dyn LatentOwner>, uuid: u64) -> bool {
        self.actions
            .lock()
            .unwrap()
            .iter()
            .any(|a| a.uuid == uuid && a.owned_by(owner) && !a.promise.extras().is_done())
    }

    pub(crate) fn add(&self, action: PendingLatentCoroutine) {
        self.actions.lock().unwrap().push(Arc::new(action));
    }

    pub(crate) fn tick(&self) {
        let snapshot = self.actions.lock().unwrap().clone();
        if snapshot.is_empty() {
            return;
        }

        let mut retired = Vec::new();
        for action in &snapshot {
            let teardown = if !action.owner.is_alive() {
                Some("owner is gone")
            } else if action.promise.extras().cancellation().is_canceled() {
                Some("canceled")
            } else {
                None
            };
            if let Some(reason) = teardown {
                tracing::debug!(uuid = action.uuid, coroutine = action.promise.id(), reason, "removing latent action");
                action.promise.teardown();
                retired.push(action.clone());
                continue;
            }

            action.resume_if_ready();
            if action.promise.extras().is_done() {
                tracing::trace!(uuid = action.uuid, "latent action finished");
                retired.push(action.clone());
            }
        }

        if !retired.is_empty() {
            self.actions
                .lock()
                .unwrap()
                .retain(|a| !retired.iter().any(|r| Arc::ptr_eq(a, r)));
        }
    }
}
