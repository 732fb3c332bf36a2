// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Managed ("latent") coroutines.
//!
//! A managed coroutine belongs to a host object and is driven from the
//! primary thread. It may still hop to workers with the thread-affinity
//! awaiters; while it is away, owner teardown is deferred and performed
//! when control comes back instead of resuming the body.

mod awaiters;
mod manager;
mod object;

use std::future::Future;
use std::sync::Arc;

use crate::coroutine::{Builder, Coroutine};
use crate::dispatch::is_primary_thread;
use crate::error::RuntimeError;

pub use awaiters::{next_tick, seconds, ticks, until, LatentAwaiter};
pub use manager::{LatentActionInfo, LatentActionManager};
pub use object::{LatentOwner, TrackedObject};

pub(crate) use awaiters::LatentWait;

use manager::PendingLatentCoroutine;

/// One manager tick. Called by `dispatch::pump` after the primary queue.
pub(crate) fn tick() {
    manager::manager().tick();
}

/// Latent actions not yet retired.
pub fn action_count() -> usize {
    manager::manager().action_count()
}

/// Cancel every running action with `uuid`. It is torn down on the next
/// tick.
pub fn cancel_action(uuid: u64) -> bool {
    manager::manager().cancel_action(uuid)
}

/// Start a managed coroutine owned by `owner`, on the primary thread.
///
/// The first segment runs before this returns. Fails with
/// `DuplicateAction` if `owner` already runs an action with the same uuid.
pub fn spawn<F>(
    owner: Arc<dyn LatentOwner>,
    info: LatentActionInfo,
    future: F,
) -> Result<Coroutine<()>, RuntimeError>
where
    F: Future<Output = ()> + Send + 'static,
{
    crate::verify!(
        is_primary_thread(),
        "latent coroutines must be started on the primary thread"
    );
    let manager = manager::manager();
    if manager.contains(&owner, info.uuid) {
        return Err(RuntimeError::DuplicateAction { uuid: info.uuid });
    }

    let coroutine = Builder::new()
        .name(format!("latent-{}", info.uuid))
        .build(future, Some(owner.clone()));
    manager.add(PendingLatentCoroutine::new(
        owner,
        info,
        coroutine.promise().clone(),
    ));
    tracing::debug!(uuid = info.uuid, coroutine = coroutine.id(), "latent action started");
    coroutine.promise().start();
    Ok(coroutine)
}
