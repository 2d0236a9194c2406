// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The live, in-memory `Operation` record: mutable status behind a
//! reader-writer lock, a handle to the black-box party, and the
//! cancellation channel shared by its three cooperating tasks.

use crate::ids::{NodeId, OperationId, PartyIndex, SessionId};
use crate::store::opstore::{OperationKind, OperationRecord, OperationRequest, OperationResult, Status};
use crate::tss::Party;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex, RwLock};

struct MutableState {
    status: Status,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
    result: Option<OperationResult>,
}

/// A live operation: everything the three per-operation tasks (party driver,
/// outbound pump, watcher) share. Destroyed once it reaches a terminal
/// status and has been handed to the [`crate::store::OperationStore`].
pub struct Operation {
    pub operation_id: OperationId,
    pub kind: OperationKind,
    pub session_id: SessionId,
    pub participants: Vec<NodeId>,
    pub party_index_of: HashMap<NodeId, PartyIndex>,
    pub party: Arc<dyn Party>,
    pub request: OperationRequest,
    state: RwLock<MutableState>,
    cancel_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl Operation {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        operation_id: OperationId,
        kind: OperationKind,
        session_id: SessionId,
        participants: Vec<NodeId>,
        party_index_of: HashMap<NodeId, PartyIndex>,
        party: Arc<dyn Party>,
        request: OperationRequest,
        cancel_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            operation_id,
            kind,
            session_id,
            participants,
            party_index_of,
            party,
            request,
            state: RwLock::new(MutableState {
                status: Status::Pending,
                created_at: Utc::now(),
                completed_at: None,
                error: None,
                result: None,
            }),
            cancel_tx: Mutex::new(Some(cancel_tx)),
        }
    }

    pub fn party_index_for(&self, node_id: &NodeId) -> Option<PartyIndex> {
        self.party_index_of.get(node_id).copied()
    }

    pub async fn status(&self) -> Status {
        self.state.read().await.status
    }

    pub async fn created_at(&self) -> DateTime<Utc> {
        self.state.read().await.created_at
    }

    pub async fn mark_in_progress(&self) {
        let mut state = self.state.write().await;
        if state.status == Status::Pending {
            state.status = Status::InProgress;
        }
    }

    /// Status only ever advances Pending/InProgress -> a terminal state, never back.
    async fn transition_to_terminal(&self, status: Status, error: Option<String>, result: Option<OperationResult>) {
        let mut state = self.state.write().await;
        if matches!(state.status, Status::Completed | Status::Failed | Status::Canceled) {
            return;
        }
        state.status = status;
        state.completed_at = Some(Utc::now());
        state.error = error;
        state.result = result;
    }

    pub async fn complete(&self, result: OperationResult) {
        self.transition_to_terminal(Status::Completed, None, Some(result)).await;
    }

    pub async fn fail(&self, error: impl Into<String>) {
        self.transition_to_terminal(Status::Failed, Some(error.into()), None).await;
    }

    /// Marks the operation Canceled. Called by the watcher task once it
    /// observes the cancellation signal or the operation-level timeout.
    pub async fn mark_canceled(&self, reason: impl Into<String>) {
        self.transition_to_terminal(Status::Canceled, Some(reason.into()), None).await;
    }

    /// Requests cancellation: wakes the watcher task via its cancel channel.
    /// A no-op if the operation already has a cancel in flight or is terminal.
    pub async fn request_cancel(&self) {
        if let Some(tx) = self.cancel_tx.lock().await.take() {
            let _ = tx.send(());
        }
    }

    pub async fn is_terminal(&self) -> bool {
        matches!(
            self.state.read().await.status,
            Status::Completed | Status::Failed | Status::Canceled
        )
    }

    pub async fn to_record(&self) -> OperationRecord {
        let state = self.state.read().await;
        OperationRecord {
            operation_id: self.operation_id.clone(),
            kind: self.kind,
            session_id: self.session_id,
            participants: self.participants.clone(),
            status: state.status,
            created_at: state.created_at,
            completed_at: state.completed_at,
            error: state.error.clone(),
            request: self.request.clone(),
            result: state.result.clone(),
        }
    }
}
