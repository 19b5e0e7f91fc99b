//! Cancellable background poll tasks.
//!
//! Stop is raced against the running tick, so a loop exits promptly even while a privileged
//! call is in flight. The bridge drops the session of a call abandoned that way.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Stop side handed to a poll loop.
pub struct StopSignal(watch::Receiver<bool>);

impl StopSignal {
    /// Resolves once stop was requested or the owning handle is gone. Cancel-safe.
    pub async fn stopped(&mut self) {
        while !*self.0.borrow_and_update() {
            if self.0.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.0.borrow()
    }
}

/// Owner of one background loop. Dropping it asks the loop to exit.
pub struct PollHandle {
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl PollHandle {
    pub fn spawn_with<F, Fut>(body: F) -> Self
    where
        F: FnOnce(StopSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop, rx) = watch::channel(false);
        let task = tokio::spawn(body(StopSignal(rx)));
        Self {
            stop,
            task: Some(task),
        }
    }

    /// Run `tick` every `period`, starting immediately. Ticks never overlap; stop interrupts
    /// the running one.
    pub fn every<F, Fut>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::spawn_with(move |mut stop| async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop.stopped() => break,
                    _ = interval.tick() => {
                        tokio::select! {
                            _ = stop.stopped() => break,
                            _ = tick() => {}
                        }
                    }
                }
            }
        })
    }

    /// Request stop and wait for the loop to finish.
    pub async fn stop(mut self) {
        let _ = self.stop.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        let _ = self.stop.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_interrupts_a_slow_tick() {
        let handle = PollHandle::every(Duration::from_millis(10), || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!handle.is_finished());
        tokio::time::timeout(Duration::from_millis(200), handle.stop())
            .await
            .expect("stopped mid-tick");
    }
}
