use crate::domain::ports::{TransitionHook, TransitionNotice};
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

/// Forwards every committed transition into an unbounded channel. A dropped
/// receiver is logged and otherwise ignored.
#[async_trait]
impl TransitionHook for UnboundedSender<TransitionNotice> {
    async fn on_transition(&self, notice: TransitionNotice) {
        if self.send(notice).is_err() {
            tracing::debug!("transition receiver dropped; notice discarded");
        }
    }
}
