use server_api::ApiContext;
use shared::protocol::ChangeEvent;
use tokio::sync::broadcast;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    pub(crate) changes: broadcast::Sender<ChangeEvent>,
}

impl AppState {
    /// Fans a committed change out to every open feed. No listeners is fine.
    pub(crate) fn publish(&self, event: ChangeEvent) {
        let receivers = self.changes.send(event).unwrap_or(0);
        tracing::debug!(receivers, "change event published");
    }
}
