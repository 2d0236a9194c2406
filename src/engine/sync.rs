// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! `operation_sync` payload: broadcast by the initiator so every other
//! participant can construct its mirror operation.

use crate::ids::{KeyId, NodeId, OperationId, SessionId};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "operation_type", rename_all = "snake_case")]
pub enum OperationSync {
    Keygen {
        operation_id: OperationId,
        session_id: SessionId,
        threshold: u16,
        parties: u16,
        participants: Vec<NodeId>,
    },
    Signing {
        operation_id: OperationId,
        session_id: SessionId,
        key_id: KeyId,
        message: Vec<u8>,
        participants: Vec<NodeId>,
    },
    Resharing {
        operation_id: OperationId,
        session_id: SessionId,
        key_id: KeyId,
        old_threshold: u16,
        new_threshold: u16,
        old_participants: Vec<NodeId>,
        new_participants: Vec<NodeId>,
    },
}

impl OperationSync {
    pub fn operation_id(&self) -> &OperationId {
        match self {
            OperationSync::Keygen { operation_id, .. }
            | OperationSync::Signing { operation_id, .. }
            | OperationSync::Resharing { operation_id, .. } => operation_id,
        }
    }

    pub fn session_id(&self) -> SessionId {
        match self {
            OperationSync::Keygen { session_id, .. }
            | OperationSync::Signing { session_id, .. }
            | OperationSync::Resharing { session_id, .. } => *session_id,
        }
    }

    /// The full set of NodeIDs this sync's mirror operation admits. A node
    /// only admits itself if it appears here.
    pub fn participants(&self) -> Vec<NodeId> {
        match self {
            OperationSync::Keygen { participants, .. } => participants.clone(),
            OperationSync::Signing { participants, .. } => participants.clone(),
            OperationSync::Resharing {
                old_participants,
                new_participants,
                ..
            } => {
                let mut all = old_participants.clone();
                for p in new_participants {
                    if !all.contains(p) {
                        all.push(p.clone());
                    }
                }
                all
            }
        }
    }
}
