use std::collections::HashMap;

use steward_core::routing::IntentLabel;
use steward_core::ActionParams;
use tokio::sync::RwLock;

/// A proposed mutation waiting for the user's yes/no. Keyed by
/// (org, session) so sessions never see each other's proposals.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingAction {
    pub capability: String,
    pub intent: IntentLabel,
    pub params: ActionParams,
}

#[async_trait::async_trait]
pub trait SessionMemory: Send + Sync {
    async fn pending_action(&self, org_id: &str, session_id: &str) -> Option<PendingAction>;
    async fn set_pending(&self, org_id: &str, session_id: &str, action: PendingAction);
    async fn clear_pending(&self, org_id: &str, session_id: &str);
}

#[derive(Default)]
pub struct InMemorySessionMemory {
    pending: RwLock<HashMap<(String, String), PendingAction>>,
}

fn key(org_id: &str, session_id: &str) -> (String, String) {
    (org_id.to_owned(), session_id.to_owned())
}

#[async_trait::async_trait]
impl SessionMemory for InMemorySessionMemory {
    async fn pending_action(&self, org_id: &str, session_id: &str) -> Option<PendingAction> {
        self.pending.read().await.get(&key(org_id, session_id)).cloned()
    }

    async fn set_pending(&self, org_id: &str, session_id: &str, action: PendingAction) {
        self.pending.write().await.insert(key(org_id, session_id), action);
    }

    async fn clear_pending(&self, org_id: &str, session_id: &str) {
        self.pending.write().await.remove(&key(org_id, session_id));
    }
}
