use crate::error::{EmbeddingError, Result};
use std::time::Duration;
use tokio::sync::watch;

/// Owner side of a cancellation signal; held by whoever may shut work down.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Observer side, cloned into retry loops and poll loops.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

#[must_use]
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl CancelSignal {
    /// A signal that never fires.
    #[must_use]
    pub fn never() -> Self {
        cancel_pair().1
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(EmbeddingError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once cancellation is requested. A dropped handle never cancels.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Sleep that returns `Cancelled` as soon as the signal fires.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            () = tokio::time::sleep(duration) => Ok(()),
            () = self.cancelled() => Err(EmbeddingError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn cancel_interrupts_sleep() {
        let (handle, signal) = cancel_pair();
        let started = Instant::now();
        let sleeper = tokio::spawn(async move { signal.sleep(Duration::from_secs(30)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();
        let outcome = sleeper.await.expect("join");
        assert!(matches!(outcome, Err(EmbeddingError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn never_signal_lets_sleep_finish() {
        let signal = CancelSignal::never();
        assert!(signal.sleep(Duration::from_millis(5)).await.is_ok());
        assert!(!signal.is_cancelled());
        assert!(signal.check().is_ok());
    }
}
