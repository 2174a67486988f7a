//! Processing-state coordinator.
//!
//! Server side there are only two states: idle and processing. `done` is a
//! momentary push — the overlay shows its own confirmation and clears
//! itself; no timer lives here. Pushes are best-effort page evaluations,
//! silently skipped when no session is connected.

use std::sync::Arc;

use crate::browser::SessionManager;
use crate::overlay;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessingState {
    Idle,
    Processing,
}

pub struct ProcessingCoordinator {
    state: tokio::sync::Mutex<ProcessingState>,
    session: Arc<SessionManager>,
}

impl ProcessingCoordinator {
    pub fn new(session: Arc<SessionManager>) -> Arc<Self> {
        Arc::new(Self {
            state: tokio::sync::Mutex::new(ProcessingState::Idle),
            session,
        })
    }

    /// A send was consumed: the overlay shows `processing` while the agent
    /// acts on the batch.
    pub async fn begin_processing(&self) {
        let mut state = self.state.lock().await;
        self.session
            .evaluate_if_connected(&overlay::set_processing_script("processing"))
            .await;
        *state = ProcessingState::Processing;
    }

    /// The next tool call that is not itself a new send completes the
    /// cycle: push `done` and return to idle.
    pub async fn complete_if_processing(&self) {
        let mut state = self.state.lock().await;
        if *state == ProcessingState::Processing {
            self.session
                .evaluate_if_connected(&overlay::set_processing_script("done"))
                .await;
            *state = ProcessingState::Idle;
        }
    }

    pub async fn is_processing(&self) -> bool {
        *self.state.lock().await == ProcessingState::Processing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn transitions_follow_send_then_complete() {
        // No browser connected: pushes are silently skipped, transitions
        // still happen.
        let session = SessionManager::new(Config::default());
        let coordinator = ProcessingCoordinator::new(session);
        assert!(!coordinator.is_processing().await);

        coordinator.begin_processing().await;
        assert!(coordinator.is_processing().await);

        coordinator.complete_if_processing().await;
        assert!(!coordinator.is_processing().await);

        // Completing from idle is a no-op.
        coordinator.complete_if_processing().await;
        assert!(!coordinator.is_processing().await);
    }
}
