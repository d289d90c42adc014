//! Shutdown signalling shared by the background tasks.

use tokio::sync::watch;

/// Receiving side of the shutdown signal handed to each component
pub type Shutdown = watch::Receiver<bool>;

/// Create a shutdown channel; send `true` to stop every subscriber
pub fn channel() -> (watch::Sender<bool>, Shutdown) {
    watch::channel(false)
}

/// Resolve once shutdown has been requested or the sender is gone
pub async fn signalled(shutdown: &mut Shutdown) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_signalled_after_send() {
        let (tx, mut rx) = channel();
        let waiter = tokio::spawn(async move { signalled(&mut rx).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        tx.send(true).unwrap();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_signalled_when_sender_dropped() {
        let (tx, mut rx) = channel();
        drop(tx);
        signalled(&mut rx).await;
    }
}
