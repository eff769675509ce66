use crate::model::{NodeRecord, NodeStatus};
use crate::repo::{RecordStore, StoreError};
use panel_protocol::error_codes;
use sha2::{Digest, Sha256};

pub fn hash_token(raw_token: &str) -> Vec<u8> {
    Sha256::digest(raw_token.as_bytes()).to_vec()
}

pub fn extract_bearer(authorization: &str) -> Option<&str> {
    authorization.strip_prefix("Bearer ")
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("unknown node")]
    NodeNotFound,
    #[error("invalid token")]
    InvalidToken,
    #[error("node is in maintenance")]
    Maintenance,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl AuthError {
    /// Wire code sent back to the agent.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NodeNotFound => error_codes::NODE_NOT_FOUND,
            Self::InvalidToken => error_codes::INVALID_TOKEN,
            Self::Maintenance => error_codes::NODE_MAINTENANCE,
            Self::Store(_) => error_codes::INTERNAL_ERROR,
        }
    }
}

/// Checks a node's shared token.  Maintenance nodes are refused even with a
/// valid token.
pub async fn authenticate_node(
    store: &dyn RecordStore,
    node_id: &str,
    raw_token: &str,
) -> Result<NodeRecord, AuthError> {
    let node = store
        .get_node(node_id)
        .await?
        .ok_or(AuthError::NodeNotFound)?;
    if node.token_hash != hash_token(raw_token) {
        return Err(AuthError::InvalidToken);
    }
    if node.status == NodeStatus::Maintenance {
        return Err(AuthError::Maintenance);
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::memory::MemoryStore;

    #[tokio::test]
    async fn authenticate_node_distinguishes_failures() {
        let store = MemoryStore::new();
        store.add_node("n1", "t1", "good-token", NodeStatus::Offline);
        store.add_node("n2", "t1", "good-token", NodeStatus::Maintenance);

        let node = authenticate_node(&store, "n1", "good-token").await.unwrap();
        assert_eq!(node.tenant_id, "t1");

        let err = authenticate_node(&store, "n1", "bad").await.unwrap_err();
        assert_eq!(err.code(), error_codes::INVALID_TOKEN);
        let err = authenticate_node(&store, "nope", "good-token").await.unwrap_err();
        assert_eq!(err.code(), error_codes::NODE_NOT_FOUND);
        let err = authenticate_node(&store, "n2", "good-token").await.unwrap_err();
        assert_eq!(err.code(), error_codes::NODE_MAINTENANCE);
    }

    #[test]
    fn bearer_prefix_is_required() {
        assert_eq!(extract_bearer("Bearer abc"), Some("abc"));
        assert_eq!(extract_bearer("Basic abc"), None);
    }
}
