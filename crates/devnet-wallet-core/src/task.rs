use tokio::task::JoinHandle;

/// Aborts the wrapped task when dropped, tying a listener's life to its owner.
#[derive(Debug)]
pub struct AbortOnDrop(Option<JoinHandle<()>>);

impl AbortOnDrop {
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self(Some(handle))
    }

    pub fn is_finished(&self) -> bool {
        self.0.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Let the task run to completion on its own.
    pub fn detach(mut self) -> Option<JoinHandle<()>> {
        self.0.take()
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::oneshot;

    use super::*;

    #[tokio::test]
    async fn dropping_aborts_the_task() {
        let (tx, rx) = oneshot::channel::<()>();
        let task = AbortOnDrop::new(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            let _ = tx.send(());
        }));
        drop(task);
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn detached_task_keeps_running() {
        let (tx, rx) = oneshot::channel();
        let task = AbortOnDrop::new(tokio::spawn(async move {
            tokio::task::yield_now().await;
            let _ = tx.send(7u8);
        }));
        let handle = task.detach().expect("handle");
        assert_eq!(rx.await, Ok(7));
        handle.await.expect("join");
    }
}
