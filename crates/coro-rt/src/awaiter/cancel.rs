// SPDX-License-Identifier: (MIT OR Apache-2.0)

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::promise::Promise;

/// Continues if the coroutine was not canceled; otherwise the frame is
/// destroyed right here and nothing after this point runs.
#[derive(Debug, Default)]
#[must_use = "futures do nothing unless awaited"]
pub struct FinishNowIfCanceled {
    _private: (),
}

pub fn finish_now_if_canceled() -> FinishNowIfCanceled {
    FinishNowIfCanceled::default()
}

impl Future for FinishNowIfCanceled {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let Some(promise) = Promise::current() else {
            crate::fatal!("finish_now_if_canceled() polled outside a coroutine");
        };
        if promise.should_finish_now() {
            promise.mark_finish_now();
            Poll::Pending
        } else {
            Poll::Ready(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coroutine;
    use crate::promise::{cancellation_guard, on_canceled, Outcome};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn passes_through_when_not_canceled() {
        let co = coroutine::spawn(async {
            finish_now_if_canceled().await;
            7
        });
        assert_eq!(co.take_result(), Some(7));
    }

    #[test]
    fn stops_a_canceled_body_and_runs_cleanup() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let c = cleanups.clone();
        let co = coroutine::spawn(async move {
            let _cleanup = on_canceled(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
            // Cancel ourselves; the hold keeps the first check passing.
            {
                let _hold = cancellation_guard();
                crate::promise::Promise::current().unwrap().request_cancel();
                finish_now_if_canceled().await;
            }
            finish_now_if_canceled().await;
            unreachable!("body continued after cancellation");
        });
        assert_eq!(co.outcome(), Some(Outcome::Canceled));
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }
}
