use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use super::*;

/// Scripted rail for tests: approves everything unless told otherwise
#[derive(Default)]
pub struct StubRail {
    denied_users: Mutex<HashSet<Uuid>>,
    failing_users: Mutex<HashMap<Uuid, RailError>>,
    pub authorizations: AtomicUsize,
    pub transfers: AtomicUsize,
    pub cancelled: Mutex<Vec<String>>,
    pub requests: Mutex<Vec<AuthorizationRequest>>,
}

impl StubRail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny(&self, user_id: Uuid) {
        self.denied_users.lock().insert(user_id);
    }

    pub fn fail(&self, user_id: Uuid, error: RailError) {
        self.failing_users.lock().insert(user_id, error);
    }

    pub fn heal(&self, user_id: Uuid) {
        self.denied_users.lock().remove(&user_id);
        self.failing_users.lock().remove(&user_id);
    }

    pub fn transfer_count(&self) -> usize {
        self.transfers.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentRail for StubRail {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn create_transfer_authorization(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<TransferAuthorization, RailError> {
        self.authorizations.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        if let Some(error) = self.failing_users.lock().get(&request.user_id) {
            return Err(error.clone());
        }
        let denied = self.denied_users.lock().contains(&request.user_id);

        Ok(TransferAuthorization {
            authorization_id: format!("auth_{}", Uuid::new_v4().simple()),
            decision: if denied {
                AuthorizationDecision::Denied
            } else {
                AuthorizationDecision::Approved
            },
            reason_code: denied.then(|| "NSF".to_string()),
            access_token: request.access_token.clone(),
            account_id: request.account_id.clone(),
            amount: request.amount,
            direction: request.direction,
        })
    }

    async fn create_transfer(
        &self,
        authorization: &TransferAuthorization,
    ) -> Result<TransferReceipt, RailError> {
        authorization.ensure_approved()?;
        self.transfers.fetch_add(1, Ordering::SeqCst);
        Ok(TransferReceipt {
            transfer_id: format!("tr_{}", Uuid::new_v4().simple()),
            status: "pending".to_string(),
        })
    }

    async fn create_recurring_transfer(
        &self,
        _params: &RecurringTransferParams,
    ) -> Result<String, RailError> {
        Ok(format!("rt_{}", Uuid::new_v4().simple()))
    }

    async fn cancel_recurring_transfer(&self, recurring_transfer_id: &str) -> Result<bool, RailError> {
        self.cancelled.lock().push(recurring_transfer_id.to_string());
        Ok(true)
    }
}
