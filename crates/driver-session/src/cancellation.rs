use tokio_util::sync::CancellationToken;

/// Holds the token of the one operation allowed to run for a session.
#[derive(Debug, Default)]
pub struct CancellationCoordinator {
    current: Option<CancellationToken>,
}

impl CancellationCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the running operation, if any, and installs a fresh token.
    pub fn start(&mut self) -> CancellationToken {
        self.cancel();
        let token = CancellationToken::new();
        self.current = Some(token.clone());
        token
    }

    /// Cancels the running operation without starting another.
    pub fn cancel(&mut self) {
        if let Some(token) = self.current.take() {
            token.cancel();
        }
    }

    pub fn current(&self) -> Option<CancellationToken> {
        self.current.clone()
    }

    pub fn is_active(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_replaces_and_cancels_previous() {
        let mut coordinator = CancellationCoordinator::new();
        let first = coordinator.start();
        let second = coordinator.start();

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(coordinator.is_active());
    }

    #[test]
    fn cancel_leaves_no_current_token() {
        let mut coordinator = CancellationCoordinator::new();
        let token = coordinator.start();

        coordinator.cancel();

        assert!(token.is_cancelled());
        assert!(coordinator.current().is_none());
        assert!(!coordinator.is_active());
        coordinator.cancel();
    }

    #[tokio::test]
    async fn child_work_observes_cancel() {
        let mut coordinator = CancellationCoordinator::new();
        let token = coordinator.start();
        let worker = tokio::spawn(async move {
            token.cancelled().await;
            "stopped"
        });

        coordinator.cancel();

        assert_eq!(worker.await.unwrap(), "stopped");
    }
}
