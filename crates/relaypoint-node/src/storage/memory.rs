//! In-memory storage backend
//!
//! Default storage implementation using in-memory hashmaps.
//! Suitable for development and single-instance deployments.
//! Data is lost on restart.
//!
//! The conditional completions take a single write lock for the whole
//! check-and-set, which is what makes racing completions yield exactly one
//! winner.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::info;

use super::{
    BlacklistedDevice, CrossApRecoveryResponse, CrossApSession, RecoveryRequest,
    RecoveryResponse, RecoveryStatus, StorageError, Store, User,
};

/// In-memory store implementation
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<String, User>>,
    recovery_requests: RwLock<HashMap<String, RecoveryRequest>>,
    recovery_responses: RwLock<HashMap<String, RecoveryResponse>>,
    cross_sessions: RwLock<HashMap<String, CrossApSession>>,
    cross_responses: RwLock<HashMap<String, CrossApRecoveryResponse>>,
    blacklist: RwLock<HashMap<String, BlacklistedDevice>>,
}

impl MemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    // =========================================================================
    // Users
    // =========================================================================

    async fn get_user(&self, username: &str) -> Result<Option<User>, StorageError> {
        let users = self.users.read().unwrap();
        Ok(users.get(username).cloned())
    }

    async fn put_user(&self, user: User) -> Result<(), StorageError> {
        let mut users = self.users.write().unwrap();
        users.insert(user.username.clone(), user);
        Ok(())
    }

    // =========================================================================
    // Same-AP Recovery
    // =========================================================================

    async fn create_recovery_request(
        &self,
        request: RecoveryRequest,
    ) -> Result<(), StorageError> {
        let mut requests = self.recovery_requests.write().unwrap();
        if requests.contains_key(&request.id) {
            return Err(StorageError::AlreadyExists(request.id));
        }
        info!(id = %request.id, username = %request.username, "Storing recovery request");
        requests.insert(request.id.clone(), request);
        Ok(())
    }

    async fn get_recovery_request(
        &self,
        id: &str,
    ) -> Result<Option<RecoveryRequest>, StorageError> {
        let requests = self.recovery_requests.read().unwrap();
        Ok(requests.get(id).cloned())
    }

    async fn complete_recovery_request(
        &self,
        id: &str,
        response: RecoveryResponse,
    ) -> Result<(), StorageError> {
        // One lock covers the status check and both writes; a racing
        // completion for the same id observes COMPLETED and conflicts.
        let mut requests = self.recovery_requests.write().unwrap();
        let request = requests
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;

        if request.status != RecoveryStatus::Pending {
            return Err(StorageError::Conflict(format!(
                "recovery request {} is {:?}",
                id, request.status
            )));
        }

        request.status = RecoveryStatus::Completed;
        let mut responses = self.recovery_responses.write().unwrap();
        responses.insert(id.to_string(), response);

        info!(id = %id, "Recovery request completed");
        Ok(())
    }

    async fn get_recovery_response(
        &self,
        id: &str,
    ) -> Result<Option<RecoveryResponse>, StorageError> {
        let responses = self.recovery_responses.read().unwrap();
        Ok(responses.get(id).cloned())
    }

    // =========================================================================
    // Cross-AP Recovery
    // =========================================================================

    async fn create_cross_session(&self, session: CrossApSession) -> Result<(), StorageError> {
        let mut sessions = self.cross_sessions.write().unwrap();
        if sessions.contains_key(&session.temp_user_id) {
            return Err(StorageError::AlreadyExists(session.temp_user_id));
        }
        info!(
            temp_user_id = %session.temp_user_id,
            destination = %session.destination_ap_id,
            "Storing cross-AP recovery session"
        );
        sessions.insert(session.temp_user_id.clone(), session);
        Ok(())
    }

    async fn get_cross_session(
        &self,
        temp_user_id: &str,
    ) -> Result<Option<CrossApSession>, StorageError> {
        let sessions = self.cross_sessions.read().unwrap();
        Ok(sessions.get(temp_user_id).cloned())
    }

    async fn complete_cross_session(
        &self,
        temp_user_id: &str,
        response: CrossApRecoveryResponse,
    ) -> Result<(), StorageError> {
        let mut sessions = self.cross_sessions.write().unwrap();
        let session = sessions
            .get_mut(temp_user_id)
            .ok_or_else(|| StorageError::NotFound(temp_user_id.to_string()))?;

        if session.status != RecoveryStatus::Pending {
            return Err(StorageError::Conflict(format!(
                "cross-AP session {} is {:?}",
                temp_user_id, session.status
            )));
        }

        session.status = RecoveryStatus::Completed;
        session.response_received = true;
        session.response_data = Some(response.encrypted_user_data.clone());
        session.updated_at = chrono::Utc::now();

        let mut responses = self.cross_responses.write().unwrap();
        responses.insert(temp_user_id.to_string(), response);

        info!(temp_user_id = %temp_user_id, "Cross-AP recovery session completed");
        Ok(())
    }

    async fn get_cross_response(
        &self,
        temp_user_id: &str,
    ) -> Result<Option<CrossApRecoveryResponse>, StorageError> {
        let responses = self.cross_responses.read().unwrap();
        Ok(responses.get(temp_user_id).cloned())
    }

    // =========================================================================
    // Blacklist
    // =========================================================================

    async fn is_blacklisted(&self, nickname: &str) -> Result<bool, StorageError> {
        let blacklist = self.blacklist.read().unwrap();
        Ok(blacklist.contains_key(nickname))
    }

    async fn add_blacklisted(&self, entry: BlacklistedDevice) -> Result<(), StorageError> {
        let mut blacklist = self.blacklist.write().unwrap();
        info!(nickname = %entry.nickname, reason = ?entry.reason, "Blacklisting device identity");
        blacklist.insert(entry.nickname.clone(), entry);
        Ok(())
    }
}
