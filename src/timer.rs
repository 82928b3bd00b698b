use std::time::Duration;

use tokio::task::JoinHandle;

/// A cancellable one-shot timer. Drivers use
/// this for retry pacing (`rebootpwr_ctr`-style countdowns) and the
/// fixed pauses the press activation engine needs between hwstat writes.
pub struct Timer {
    handle: JoinHandle<()>,
}

impl Timer {
    /// Schedules `callback` to run after `duration` on the local task set.
    /// The timer is single-threaded: callbacks run on the same task
    /// executor driving the rest of the device's state machines, so they
    /// never race the reactor that invokes them.
    pub fn add<F>(duration: Duration, callback: F) -> Self
    where
        F: std::future::Future<Output = ()> + 'static,
    {
        let handle = tokio::task::spawn_local(async move {
            tokio::time::sleep(duration).await;
            callback.await;
        });
        Timer { handle }
    }

    /// Cancels the timer. A no-op if it has already fired.
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[tokio::test(flavor = "current_thread")]
    async fn fires_after_duration() {
        let local = tokio::task::LocalSet::new();
        let fired = Rc::new(RefCell::new(false));
        local
            .run_until(async {
                let fired2 = fired.clone();
                let _timer = Timer::add(Duration::from_millis(5), async move {
                    *fired2.borrow_mut() = true;
                });
                tokio::time::sleep(Duration::from_millis(30)).await;
            })
            .await;
        assert!(*fired.borrow());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn cancel_prevents_callback() {
        let local = tokio::task::LocalSet::new();
        let fired = Rc::new(RefCell::new(false));
        local
            .run_until(async {
                let fired2 = fired.clone();
                let timer = Timer::add(Duration::from_millis(20), async move {
                    *fired2.borrow_mut() = true;
                });
                timer.cancel();
                tokio::time::sleep(Duration::from_millis(40)).await;
            })
            .await;
        assert!(!*fired.borrow());
    }
}
