use std::time::Duration;

use tokio::sync::mpsc;

/// Last-event-wins debouncer: yields the latest value once no new value arrived for `window`.
pub struct Debouncer<T> {
    rx: mpsc::Receiver<T>,
    window: Duration,
}

impl<T> Debouncer<T> {
    pub fn new(rx: mpsc::Receiver<T>, window: Duration) -> Self { Self { rx, window } }

    /// Wait for the next quiet period. `None` once the sender side is gone and nothing is pending.
    pub async fn next(&mut self) -> Option<T> {
        let mut latest = self.rx.recv().await?;
        loop {
            match tokio::time::timeout(self.window, self.rx.recv()).await {
                Ok(Some(v)) => latest = v,
                // Closed or quiet: flush what we have.
                Ok(None) | Err(_) => return Some(latest),
            }
        }
    }
}
