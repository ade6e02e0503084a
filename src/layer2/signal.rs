// Worker control flags (shutdown, pause) that can be both polled and awaited

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct Flag {
    tx: Arc<watch::Sender<bool>>,
}

impl Flag {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, value: bool) {
        self.tx.send_replace(value);
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the flag holds `value`; immediately if it already does
    pub async fn wait_for(&self, value: bool) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|current| *current == value).await;
    }
}

impl Default for Flag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_for_resolves_on_set() {
        let flag = Flag::new();
        assert!(!flag.is_set());

        let waiter = {
            let flag = flag.clone();
            tokio::spawn(async move { flag.wait_for(true).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        flag.set(true);

        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(flag.is_set());

        // Already holds the value
        tokio::time::timeout(Duration::from_millis(50), flag.wait_for(true)).await.unwrap();
    }
}
