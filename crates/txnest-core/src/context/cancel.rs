use std::sync::Arc;

use futures::future::select_all;
use tokio::sync::watch;

pub(super) struct CancelNode {
    state: watch::Sender<bool>,
    parent: Option<Arc<CancelNode>>,
}

impl CancelNode {
    pub(super) fn new(parent: Option<Arc<Self>>) -> Self {
        let (state, _) = watch::channel(false);
        Self { state, parent }
    }

    fn ancestry(&self) -> impl Iterator<Item = &Self> {
        std::iter::successors(Some(self), |node| node.parent.as_deref())
    }

    pub(super) fn is_cancelled(&self) -> bool {
        self.ancestry().any(|node| *node.state.borrow())
    }

    pub(super) async fn cancelled(&self) {
        let waiters = self
            .ancestry()
            .map(|node| {
                let mut rx = node.state.subscribe();
                Box::pin(async move {
                    // A closed channel can never be cancelled.
                    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                        std::future::pending::<()>().await;
                    }
                })
            })
            .collect::<Vec<_>>();
        select_all(waiters).await;
    }
}

/// ## Summary
/// Cancels the context returned alongside it by [`super::Context::with_cancel`].
///
/// Dropping the handle does not cancel the context.
#[derive(Clone)]
pub struct CancelHandle {
    node: Arc<CancelNode>,
}

impl CancelHandle {
    pub(super) const fn new(node: Arc<CancelNode>) -> Self {
        Self { node }
    }

    pub fn cancel(&self) {
        if !self.node.state.send_replace(true) {
            tracing::debug!("Context cancelled");
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.node.is_cancelled()
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
