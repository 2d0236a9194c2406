// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The operation engine: turns `start_keygen`/`start_signing`/`start_resharing`
//! calls and inbound wire messages into running [`tss::Party`] instances, and
//! terminal operations into persisted [`crate::store::opstore::OperationRecord`]s.
//!
//! Network and engine are wired as two peers exchanging trait objects
//! ([`MessageSender`] implemented by [`crate::routing::Router`], [`MessageHandler`]
//! implemented by [`OperationEngine`]) so neither owns the other strongly; see
//! [`handler`] for the inbound side of that contract.

pub mod handler;
pub mod operation;
pub mod sync;

use crate::addressbook::AddressBook;
use crate::codec::{Message, MessageType, PROTOCOL_TSS_PARTY};
use crate::crypto::encryption::{self, EncryptionContext, EncryptionLayer};
use crate::error::{Error, Result};
use crate::ids::{assign_party_indices, KeyId, NodeId, OperationId, PartyIndex, SessionId};
use crate::store::keystore::{KeyShareRecord, KeyStore};
use crate::store::opstore::{
    KeygenResult, OperationKind, OperationRecord, OperationRequest, OperationResult,
    ResharingResult, SigningResult,
};
use crate::store::opstore::OperationStore;
use crate::tss::{self, Party, PartyMessage};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use operation::Operation;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, warn};

/// What the engine needs from the network layer to emit outbound wire
/// messages. Implemented by [`crate::routing::Router`].
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, msg: &Message, targets: &[NodeId]);
}

/// What the network layer calls back into for every message that was
/// delivered to this node, whether direct or via gossip relay.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle_message(&self, msg: Message, received_from: NodeId);
}

/// The external signing-authorization collaborator: given a proposed signing
/// request, approves or rejects it before any [`tss::Party`] is started.
/// Invoked by every participant running a signing operation, initiator and
/// mirror alike. A rejection fails the operation with
/// [`Error::ValidationRejected`] before any party, tasks, or persisted record
/// are created.
#[async_trait]
pub trait SigningValidator: Send + Sync {
    async fn authorize(&self, key_id: &KeyId, message: &[u8], signers: &[NodeId]) -> Result<()>;
}

/// A [`SigningValidator`] that authorizes every request, standing in until a
/// real authorization service is wired in by the caller.
pub struct AllowAllValidator;

#[async_trait]
impl SigningValidator for AllowAllValidator {
    async fn authorize(&self, _key_id: &KeyId, _message: &[u8], _signers: &[NodeId]) -> Result<()> {
        Ok(())
    }
}

pub const KEYGEN_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const SIGNING_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const RESHARING_TIMEOUT: Duration = Duration::from_secs(15 * 60);

pub struct StartKeygen {
    pub operation_id: Option<OperationId>,
    pub threshold: u16,
    pub participants: Vec<NodeId>,
}

pub struct StartSigning {
    pub operation_id: Option<OperationId>,
    pub key_id: KeyId,
    pub message: Vec<u8>,
    pub signers: Vec<NodeId>,
}

pub struct StartResharing {
    pub operation_id: Option<OperationId>,
    pub key_id: KeyId,
    pub new_threshold: u16,
    pub new_participants: Vec<NodeId>,
}

/// The outcome of [`OperationEngine::register_operation`]'s atomic admission
/// check.
enum Registration {
    /// This call won admission; its party and pump tasks are now running.
    New(Arc<Operation>, oneshot::Receiver<()>),
    /// Another call already registered this `OperationId` first; this
    /// caller's party and channels were discarded unstarted.
    Existing(Arc<Operation>),
}

/// Owns every live [`Operation`] and drives it to completion. Reachable
/// concurrently from API callers (`start_*`) and the network's inbound path
/// (`handle_message`, via [`handler`]).
pub struct OperationEngine {
    self_id: NodeId,
    self_peer_id: String,
    storage_key: [u8; 32],
    operations: DashMap<OperationId, Arc<Operation>>,
    session_index: DashMap<SessionId, OperationId>,
    key_store: Arc<KeyStore>,
    op_store: Arc<OperationStore>,
    address_book: Arc<AddressBook>,
    encryption: Arc<EncryptionLayer>,
    keygen_timeout: Duration,
    signing_timeout: Duration,
    resharing_timeout: Duration,
    validator: Arc<dyn SigningValidator>,
    sender: RwLock<Option<Weak<dyn MessageSender>>>,
    self_weak: OnceLock<Weak<OperationEngine>>,
}

impl OperationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        self_id: NodeId,
        self_peer_id: String,
        storage_key: [u8; 32],
        key_store: Arc<KeyStore>,
        op_store: Arc<OperationStore>,
        address_book: Arc<AddressBook>,
        encryption: Arc<EncryptionLayer>,
    ) -> Arc<Self> {
        Self::with_timeouts(
            self_id,
            self_peer_id,
            storage_key,
            key_store,
            op_store,
            address_book,
            encryption,
            KEYGEN_TIMEOUT,
            SIGNING_TIMEOUT,
            RESHARING_TIMEOUT,
        )
    }

    /// As [`Self::new`], but with the per-operation watcher timeouts taken
    /// from a node's configuration instead of the built-in defaults. Signing
    /// requests are authorized by [`AllowAllValidator`]; use
    /// [`Self::with_validator`] to wire in a real one.
    #[allow(clippy::too_many_arguments)]
    pub fn with_timeouts(
        self_id: NodeId,
        self_peer_id: String,
        storage_key: [u8; 32],
        key_store: Arc<KeyStore>,
        op_store: Arc<OperationStore>,
        address_book: Arc<AddressBook>,
        encryption: Arc<EncryptionLayer>,
        keygen_timeout: Duration,
        signing_timeout: Duration,
        resharing_timeout: Duration,
    ) -> Arc<Self> {
        Self::with_validator(
            self_id,
            self_peer_id,
            storage_key,
            key_store,
            op_store,
            address_book,
            encryption,
            keygen_timeout,
            signing_timeout,
            resharing_timeout,
            Arc::new(AllowAllValidator),
        )
    }

    /// As [`Self::with_timeouts`], additionally wiring in the
    /// [`SigningValidator`] every signing request is authorized against.
    #[allow(clippy::too_many_arguments)]
    pub fn with_validator(
        self_id: NodeId,
        self_peer_id: String,
        storage_key: [u8; 32],
        key_store: Arc<KeyStore>,
        op_store: Arc<OperationStore>,
        address_book: Arc<AddressBook>,
        encryption: Arc<EncryptionLayer>,
        keygen_timeout: Duration,
        signing_timeout: Duration,
        resharing_timeout: Duration,
        validator: Arc<dyn SigningValidator>,
    ) -> Arc<Self> {
        let engine = Arc::new(Self {
            self_id,
            self_peer_id,
            storage_key,
            operations: DashMap::new(),
            session_index: DashMap::new(),
            key_store,
            op_store,
            address_book,
            encryption,
            keygen_timeout,
            signing_timeout,
            resharing_timeout,
            validator,
            sender: RwLock::new(None),
            self_weak: OnceLock::new(),
        });
        let _ = engine.self_weak.set(Arc::downgrade(&engine));
        engine
    }

    fn arc_self(&self) -> Arc<Self> {
        self.self_weak
            .get()
            .and_then(Weak::upgrade)
            .expect("engine dropped while an operation it owns is still running")
    }

    /// Wires the network-layer collaborator this engine sends through. Called
    /// once by `node` wiring, after both halves exist.
    pub fn set_sender(&self, sender: Weak<dyn MessageSender>) {
        *self.sender.write().unwrap() = Some(sender);
    }

    async fn sender(&self) -> Result<Arc<dyn MessageSender>> {
        self.sender
            .read()
            .unwrap()
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| Error::TransportError("network sender has been dropped".into()))
    }

    pub async fn get_operation(&self, operation_id: &OperationId) -> Result<OperationRecord> {
        if let Some(op) = self.operations.get(operation_id) {
            return Ok(op.to_record().await);
        }
        self.op_store
            .get(operation_id)
            .await?
            .ok_or_else(|| Error::not_found(operation_id))
    }

    pub async fn cancel_operation(&self, operation_id: &OperationId) -> Result<()> {
        let op = self
            .operations
            .get(operation_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| Error::not_found(operation_id))?;
        op.request_cancel().await;
        Ok(())
    }

    async fn existing_operation(&self, operation_id: &OperationId) -> Result<Option<OperationRecord>> {
        if let Some(op) = self.operations.get(operation_id) {
            return Ok(Some(op.to_record().await));
        }
        self.op_store.get(operation_id).await
    }

    // ---------------------------------------------------------------- keygen

    pub async fn start_keygen(&self, req: StartKeygen) -> Result<OperationRecord> {
        let operation_id = req.operation_id.unwrap_or_else(OperationId::generate);
        if let Some(existing) = self.existing_operation(&operation_id).await? {
            return Ok(existing);
        }

        let n = req.participants.len();
        if n == 0 || req.threshold as usize >= n {
            return Err(Error::invalid_argument("threshold must satisfy 0 <= t < n"));
        }
        let mut uniq = req.participants.clone();
        uniq.sort();
        uniq.dedup();
        if uniq.len() != n {
            return Err(Error::invalid_argument("participants must be unique"));
        }
        if !req.participants.contains(&self.self_id) {
            return Err(Error::invalid_argument("self must be a keygen participant"));
        }

        let session_id = SessionId::generate();
        self.run_keygen(operation_id, session_id, req.threshold, req.participants, true)
            .await
    }

    async fn run_keygen(
        &self,
        operation_id: OperationId,
        session_id: SessionId,
        threshold: u16,
        participants: Vec<NodeId>,
        broadcast: bool,
    ) -> Result<OperationRecord> {
        let assigned = assign_party_indices(participants.clone());
        let party_index_of: HashMap<NodeId, PartyIndex> = assigned.iter().cloned().collect();
        let self_index = *party_index_of
            .get(&self.self_id)
            .ok_or_else(|| Error::invalid_argument("self is not a keygen participant"))?;
        let all_indices: Vec<PartyIndex> = assigned.iter().map(|(_, idx)| *idx).collect();

        let (party, outbound_rx, end_rx) = tss::keygen::start(self_index, all_indices);
        let request = OperationRequest::Keygen {
            threshold,
            participants: participants.clone(),
        };
        let op = match self
            .register_operation(
                operation_id.clone(),
                OperationKind::Keygen,
                session_id,
                participants.clone(),
                party_index_of,
                party,
                outbound_rx,
                request,
            )
            .await
        {
            Registration::New(op, cancel_rx) => {
                self.spawn_keygen_watcher(op.clone(), end_rx, cancel_rx);
                if broadcast {
                    let sync = sync::OperationSync::Keygen {
                        operation_id: operation_id.clone(),
                        session_id,
                        threshold,
                        parties: participants.len() as u16,
                        participants: participants.clone(),
                    };
                    self.broadcast_sync(session_id, &sync, &participants).await;
                }
                op
            }
            Registration::Existing(op) => op,
        };

        Ok(op.to_record().await)
    }

    fn spawn_keygen_watcher(
        &self,
        op: Arc<Operation>,
        mut end_rx: tss::PartyEndReceiver<tss::keygen::KeygenOutput>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let engine = self.arc_self();
        let timeout = self.keygen_timeout;
        tokio::spawn(async move {
            tokio::select! {
                res = &mut end_rx => {
                    match res {
                        Ok(Ok(output)) => engine.finalize_keygen(&op, output).await,
                        Ok(Err(e)) => op.fail(e.to_string()).await,
                        Err(_) => op.fail("party end channel dropped").await,
                    }
                }
                _ = &mut cancel_rx => op.mark_canceled("operation canceled").await,
                _ = tokio::time::sleep(timeout) => op.mark_canceled("operation timed out").await,
            }
            engine.finalize_persist(&op).await;
        });
    }

    async fn finalize_keygen(&self, op: &Operation, output: tss::keygen::KeygenOutput) {
        let pub_bytes = &output.public_key_uncompressed;
        if pub_bytes.len() != 65 {
            op.fail("keygen produced a malformed public key").await;
            return;
        }
        let key_id = KeyId::from_uncompressed_pubkey(&pub_bytes[1..33], &pub_bytes[33..65]);
        let threshold = match &op.request {
            OperationRequest::Keygen { threshold, .. } => *threshold,
            _ => 0,
        };

        let encrypted = match seal_key_data(&self.storage_key, &output.secret_scalar) {
            Ok(bytes) => bytes,
            Err(e) => {
                op.fail(e.to_string()).await;
                return;
            }
        };
        let record = KeyShareRecord {
            moniker: self.self_id.as_str().to_string(),
            key_data: encrypted,
            threshold,
            participants: op.participants.clone(),
        };
        if let Err(e) = self.key_store.put(&key_id, &record).await {
            op.fail(format!("failed to persist key share: {}", e)).await;
            return;
        }

        op.complete(OperationResult::Keygen(KeygenResult {
            public_key_hex: hex::encode(pub_bytes),
            key_id,
        }))
        .await;
    }

    // --------------------------------------------------------------- signing

    pub async fn start_signing(&self, req: StartSigning) -> Result<OperationRecord> {
        let operation_id = req.operation_id.unwrap_or_else(OperationId::generate);
        if let Some(existing) = self.existing_operation(&operation_id).await? {
            return Ok(existing);
        }
        if req.message.is_empty() {
            return Err(Error::invalid_argument("signing message must be non-empty"));
        }
        let key_record = self
            .key_store
            .get(&req.key_id)
            .await?
            .ok_or_else(|| Error::invalid_argument(format!("unknown key_id {}", req.key_id)))?;
        for signer in &req.signers {
            if !key_record.participants.contains(signer) {
                return Err(Error::invalid_argument(format!(
                    "signer {} was not part of the original keygen",
                    signer
                )));
            }
        }
        if req.signers.len() < key_record.threshold as usize + 1 {
            return Err(Error::invalid_argument("signer set smaller than threshold + 1"));
        }
        if !req.signers.contains(&self.self_id) {
            return Err(Error::invalid_argument("self must be a signer"));
        }

        let session_id = SessionId::generate();
        self.run_signing(operation_id, session_id, req.key_id, req.message, req.signers, true)
            .await
    }

    async fn run_signing(
        &self,
        operation_id: OperationId,
        session_id: SessionId,
        key_id: KeyId,
        message: Vec<u8>,
        signers: Vec<NodeId>,
        broadcast: bool,
    ) -> Result<OperationRecord> {
        let key_record = self
            .key_store
            .get(&key_id)
            .await?
            .ok_or_else(|| Error::invalid_argument(format!("unknown key_id {}", key_id)))?;
        self.validator.authorize(&key_id, &message, &signers).await?;
        let secret_bytes = open_key_data(&self.storage_key, &key_record.key_data)?;
        let mut secret_arr = [0u8; 32];
        if secret_bytes.len() != 32 {
            return Err(Error::storage("stored key share has an unexpected length"));
        }
        secret_arr.copy_from_slice(&secret_bytes);

        let assigned = assign_party_indices(signers.clone());
        let party_index_of: HashMap<NodeId, PartyIndex> = assigned.iter().cloned().collect();
        let self_index = *party_index_of
            .get(&self.self_id)
            .ok_or_else(|| Error::invalid_argument("self is not a signer"))?;
        let all_indices: Vec<PartyIndex> = assigned.iter().map(|(_, idx)| *idx).collect();

        let (party, outbound_rx, end_rx) = tss::signing::start(self_index, all_indices, secret_arr, message.clone());
        let request = OperationRequest::Signing {
            key_id: key_id.clone(),
            message: message.clone(),
            signers: signers.clone(),
        };
        let op = match self
            .register_operation(
                operation_id.clone(),
                OperationKind::Signing,
                session_id,
                signers.clone(),
                party_index_of,
                party,
                outbound_rx,
                request,
            )
            .await
        {
            Registration::New(op, cancel_rx) => {
                self.spawn_signing_watcher(op.clone(), end_rx, cancel_rx);
                if broadcast {
                    let sync = sync::OperationSync::Signing {
                        operation_id: operation_id.clone(),
                        session_id,
                        key_id,
                        message,
                        participants: signers.clone(),
                    };
                    self.broadcast_sync(session_id, &sync, &signers).await;
                }
                op
            }
            Registration::Existing(op) => op,
        };

        Ok(op.to_record().await)
    }

    fn spawn_signing_watcher(
        &self,
        op: Arc<Operation>,
        mut end_rx: tss::PartyEndReceiver<tss::signing::SigningOutput>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let engine = self.arc_self();
        let timeout = self.signing_timeout;
        tokio::spawn(async move {
            tokio::select! {
                res = &mut end_rx => {
                    match res {
                        Ok(Ok(output)) => engine.finalize_signing(&op, output).await,
                        Ok(Err(e)) => op.fail(e.to_string()).await,
                        Err(_) => op.fail("party end channel dropped").await,
                    }
                }
                _ = &mut cancel_rx => op.mark_canceled("operation canceled").await,
                _ = tokio::time::sleep(timeout) => op.mark_canceled("operation timed out").await,
            }
            engine.finalize_persist(&op).await;
        });
    }

    async fn finalize_signing(&self, op: &Operation, output: tss::signing::SigningOutput) {
        op.complete(OperationResult::Signing(SigningResult {
            signature_hex: hex::encode(&output.signature_der_free),
            r_hex: hex::encode(output.r),
            s_hex: hex::encode(output.s),
        }))
        .await;
    }

    // ------------------------------------------------------------- resharing

    pub async fn start_resharing(&self, req: StartResharing) -> Result<OperationRecord> {
        let operation_id = req.operation_id.unwrap_or_else(OperationId::generate);
        if let Some(existing) = self.existing_operation(&operation_id).await? {
            return Ok(existing);
        }
        let n_new = req.new_participants.len();
        if n_new == 0 || req.new_threshold as usize >= n_new {
            return Err(Error::invalid_argument("new threshold must satisfy 0 <= t' < n'"));
        }
        let key_record = self
            .key_store
            .get(&req.key_id)
            .await?
            .ok_or_else(|| Error::invalid_argument(format!("unknown key_id {}", req.key_id)))?;
        if !key_record.participants.contains(&self.self_id) {
            return Err(Error::invalid_argument(
                "self must be part of the old committee to initiate resharing",
            ));
        }

        let session_id = SessionId::generate();
        self.run_resharing(
            operation_id,
            session_id,
            req.key_id,
            key_record.threshold,
            req.new_threshold,
            key_record.participants.clone(),
            req.new_participants,
            true,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_resharing(
        &self,
        operation_id: OperationId,
        session_id: SessionId,
        key_id: KeyId,
        old_threshold: u16,
        new_threshold: u16,
        old_participants: Vec<NodeId>,
        new_participants: Vec<NodeId>,
        broadcast: bool,
    ) -> Result<OperationRecord> {
        let in_old = old_participants.contains(&self.self_id);
        let in_new = new_participants.contains(&self.self_id);
        if !in_old && !in_new {
            return Err(Error::invalid_argument("self is in neither the old nor new committee"));
        }

        let known_secret = if in_old {
            let key_record = self
                .key_store
                .get(&key_id)
                .await?
                .ok_or_else(|| Error::invalid_argument(format!("unknown key_id {}", key_id)))?;
            let secret_bytes = open_key_data(&self.storage_key, &key_record.key_data)?;
            if secret_bytes.len() != 32 {
                return Err(Error::storage("stored key share has an unexpected length"));
            }
            let mut arr = [0u8; 32];
            arr.copy_from_slice(&secret_bytes);
            Some(arr)
        } else {
            None
        };

        let mut all_participants = old_participants.clone();
        for p in &new_participants {
            if !all_participants.contains(p) {
                all_participants.push(p.clone());
            }
        }
        let assigned = assign_party_indices(all_participants.clone());
        let party_index_of: HashMap<NodeId, PartyIndex> = assigned.iter().cloned().collect();
        let self_index = *party_index_of
            .get(&self.self_id)
            .ok_or_else(|| Error::invalid_argument("self is not part of the resharing committee"))?;

        let (party, outbound_rx, end_rx) = tss::resharing::start(self_index, in_new, known_secret);
        let request = OperationRequest::Resharing {
            key_id: key_id.clone(),
            old_threshold,
            new_threshold,
            old_participants: old_participants.clone(),
            new_participants: new_participants.clone(),
        };
        let op = match self
            .register_operation(
                operation_id.clone(),
                OperationKind::Resharing,
                session_id,
                all_participants.clone(),
                party_index_of,
                party,
                outbound_rx,
                request,
            )
            .await
        {
            Registration::New(op, cancel_rx) => {
                self.spawn_resharing_watcher(op.clone(), end_rx, cancel_rx);
                if broadcast {
                    let sync = sync::OperationSync::Resharing {
                        operation_id: operation_id.clone(),
                        session_id,
                        key_id,
                        old_threshold,
                        new_threshold,
                        old_participants,
                        new_participants,
                    };
                    self.broadcast_sync(session_id, &sync, &all_participants).await;
                }
                op
            }
            Registration::Existing(op) => op,
        };

        Ok(op.to_record().await)
    }

    fn spawn_resharing_watcher(
        &self,
        op: Arc<Operation>,
        mut end_rx: tss::PartyEndReceiver<tss::resharing::ResharingOutput>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let engine = self.arc_self();
        let timeout = self.resharing_timeout;
        tokio::spawn(async move {
            tokio::select! {
                res = &mut end_rx => {
                    match res {
                        Ok(Ok(output)) => engine.finalize_resharing(&op, output).await,
                        Ok(Err(e)) => op.fail(e.to_string()).await,
                        Err(_) => op.fail("party end channel dropped").await,
                    }
                }
                _ = &mut cancel_rx => op.mark_canceled("operation canceled").await,
                _ = tokio::time::sleep(timeout) => op.mark_canceled("operation timed out").await,
            }
            engine.finalize_persist(&op).await;
        });
    }

    async fn finalize_resharing(&self, op: &Operation, output: tss::resharing::ResharingOutput) {
        let (key_id, new_threshold, new_participants) = match &op.request {
            OperationRequest::Resharing {
                key_id,
                new_threshold,
                new_participants,
                ..
            } => (key_id.clone(), *new_threshold, new_participants.clone()),
            _ => {
                op.fail("resharing operation is missing its resharing request").await;
                return;
            }
        };

        if let Some(secret) = output.secret_scalar {
            let encrypted = match seal_key_data(&self.storage_key, &secret) {
                Ok(bytes) => bytes,
                Err(e) => {
                    op.fail(e.to_string()).await;
                    return;
                }
            };
            let record = KeyShareRecord {
                moniker: self.self_id.as_str().to_string(),
                key_data: encrypted,
                threshold: new_threshold,
                participants: new_participants.clone(),
            };
            if let Err(e) = self.key_store.put(&key_id, &record).await {
                op.fail(format!("failed to persist reshared key: {}", e)).await;
                return;
            }
        }

        op.complete(OperationResult::Resharing(ResharingResult {
            key_id,
            new_participants,
            new_threshold,
        }))
        .await;
    }

    // ------------------------------------------------------------- plumbing

    #[allow(clippy::too_many_arguments)]
    /// Atomically admits a freshly constructed operation, or discovers that
    /// another caller already won the race for this `OperationId`.
    ///
    /// The `tss::Party` and its channels are constructed by the caller
    /// *before* this is reached, so on its own a "does it already exist"
    /// check followed by a later `insert` leaves a window in which two
    /// concurrent `start_*`/mirrored-sync calls for the same `OperationId`
    /// both pass admission and both register an independent operation — the
    /// second `insert` would silently orphan the first's tasks and result.
    /// `DashMap::entry` closes that window: the occupied/vacant check and the
    /// insert happen under the same shard lock, with no `await` in between.
    async fn register_operation(
        &self,
        operation_id: OperationId,
        kind: OperationKind,
        session_id: SessionId,
        participants: Vec<NodeId>,
        party_index_of: HashMap<NodeId, PartyIndex>,
        party: Arc<dyn Party>,
        mut outbound_rx: tss::PartyOutboundReceiver,
        request: OperationRequest,
    ) -> Registration {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let op = Arc::new(Operation::new(
            operation_id.clone(),
            kind,
            session_id,
            participants,
            party_index_of,
            party.clone(),
            request,
            cancel_tx,
        ));

        let op = match self.operations.entry(operation_id.clone()) {
            Entry::Occupied(entry) => {
                // Lost the race: keep the winner, drop our party/channels/cancel_tx.
                return Registration::Existing(entry.get().clone());
            }
            Entry::Vacant(entry) => {
                entry.insert(op.clone());
                op
            }
        };
        self.session_index.insert(session_id, operation_id);
        op.mark_in_progress().await;

        {
            let party = party.clone();
            let op = op.clone();
            tokio::spawn(async move {
                if let Err(e) = party.start().await {
                    op.fail(format!("party start failed: {}", e)).await;
                }
            });
        }

        {
            let engine = self.arc_self();
            let op = op.clone();
            tokio::spawn(async move {
                while let Some(msg) = outbound_rx.recv().await {
                    engine.pump_outbound(&op, msg).await;
                }
            });
        }

        Registration::New(op, cancel_rx)
    }

    /// Fans a single party-protocol message out to the network: one unicast
    /// per recipient, per-recipient-encrypted unless the round is a broadcast.
    async fn pump_outbound(&self, op: &Operation, msg: PartyMessage) {
        let index_to_node: HashMap<PartyIndex, NodeId> =
            op.party_index_of.iter().map(|(n, i)| (*i, n.clone())).collect();
        let targets: Vec<NodeId> = if msg.is_broadcast {
            op.participants
                .iter()
                .filter(|n| **n != self.self_id)
                .cloned()
                .collect()
        } else {
            msg.to.iter().filter_map(|idx| index_to_node.get(idx).cloned()).collect()
        };
        if targets.is_empty() {
            return;
        }

        let kind = match op.kind {
            OperationKind::Keygen => MessageType::Keygen,
            OperationKind::Signing => MessageType::Signing,
            OperationKind::Resharing => MessageType::Resharing,
        };

        let sender = match self.sender().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "dropping outbound message: no network sender wired");
                return;
            }
        };

        for target in &targets {
            let ctx = EncryptionContext {
                payload: msg.bytes.clone(),
                is_broadcast: msg.is_broadcast,
                recipients: vec![target.clone()],
                session_id: op.session_id,
                counterparty: target.clone(),
            };
            let (payload, encrypted) = match self.encryption.encrypt(&ctx) {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, %target, "failed to encrypt outbound message");
                    continue;
                }
            };
            let mut envelope = Message::new(
                PROTOCOL_TSS_PARTY,
                op.session_id,
                kind,
                self.self_id.clone(),
                vec![target.clone()],
                msg.is_broadcast,
                payload,
                self.self_peer_id.clone(),
            );
            envelope.encrypted = encrypted;
            sender.send(&envelope, std::slice::from_ref(target)).await;
        }
    }

    async fn broadcast_sync(&self, session_id: SessionId, sync: &sync::OperationSync, participants: &[NodeId]) {
        let bytes = match serde_json::to_vec(sync) {
            Ok(b) => b,
            Err(e) => {
                error!(error = %e, "failed to encode operation_sync");
                return;
            }
        };
        let envelope = Message::new(
            PROTOCOL_TSS_PARTY,
            session_id,
            MessageType::OperationSync,
            self.self_id.clone(),
            participants.to_vec(),
            true,
            bytes::Bytes::from(bytes),
            self.self_peer_id.clone(),
        );
        let targets: Vec<NodeId> = participants.iter().filter(|n| **n != self.self_id).cloned().collect();
        match self.sender().await {
            Ok(sender) => sender.send(&envelope, &targets).await,
            Err(e) => warn!(error = %e, "failed to broadcast operation_sync: no network sender wired"),
        }
    }

    async fn finalize_persist(&self, op: &Operation) {
        if !op.is_terminal().await {
            return;
        }
        let record = op.to_record().await;
        if let Err(e) = self.op_store.put(&record).await {
            error!(error = %e, operation_id = %op.operation_id, "failed to persist completed operation");
        }
        self.operations.remove(&op.operation_id);
        self.session_index.remove(&op.session_id);
    }
}

fn seal_key_data(storage_key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    encryption::seal(storage_key, plaintext)
}

fn open_key_data(storage_key: &[u8; 32], sealed: &[u8]) -> Result<Vec<u8>> {
    encryption::open(storage_key, sealed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::NodeKeypair;
    use crate::crypto::peerstore::InMemoryPeerStore;
    use crate::store::memory::MemoryKv;

    /// A standalone single-node engine: no network sender is ever wired, so
    /// these tests only cover the single-participant (n=1) admission and
    /// authorization paths, not multi-party message exchange.
    fn test_engine(moniker: &str) -> Arc<OperationEngine> {
        let dir = tempfile::tempdir().unwrap();
        let self_id = NodeId::new(moniker);
        let keypair = NodeKeypair::generate();
        let peerstore = Arc::new(InMemoryPeerStore::new());
        let encryption = Arc::new(EncryptionLayer::new(keypair, peerstore, false, [7u8; 32]));
        let address_book = Arc::new(
            AddressBook::load_or_create(
                &dir.path().join("addresses.json"),
                &self_id,
                crate::addressbook::Mapping {
                    peer_id: "peer".to_string(),
                    moniker: moniker.to_string(),
                    timestamp: chrono::Utc::now(),
                },
            )
            .unwrap(),
        );
        let key_store = Arc::new(KeyStore::new(Arc::new(MemoryKv::new())));
        let op_store = Arc::new(OperationStore::new(Arc::new(MemoryKv::new())));
        OperationEngine::new(self_id, "peer".to_string(), [9u8; 32], key_store, op_store, address_book, encryption)
    }

    #[tokio::test]
    async fn single_party_keygen_completes_without_a_network_sender() {
        let engine = test_engine("solo");
        let record = engine
            .start_keygen(StartKeygen {
                operation_id: None,
                threshold: 0,
                participants: vec![NodeId::new("solo")],
            })
            .await
            .unwrap();
        assert_eq!(record.status, crate::store::opstore::Status::Completed);
    }

    #[tokio::test]
    async fn concurrent_start_keygen_for_the_same_operation_id_admits_exactly_one_operation() {
        let engine = test_engine("solo");
        let operation_id = OperationId::validate("race-op").unwrap();

        let (first, second) = tokio::join!(
            engine.start_keygen(StartKeygen {
                operation_id: Some(operation_id.clone()),
                threshold: 0,
                participants: vec![NodeId::new("solo")],
            }),
            engine.start_keygen(StartKeygen {
                operation_id: Some(operation_id.clone()),
                threshold: 0,
                participants: vec![NodeId::new("solo")],
            }),
        );

        let first = first.unwrap();
        let second = second.unwrap();
        // Both calls must resolve to the same underlying operation: same
        // creation time, same eventual key id once both settle.
        assert_eq!(first.operation_id, second.operation_id);
        assert_eq!(first.created_at, second.created_at);
    }

    struct RejectAllValidator;

    #[async_trait]
    impl SigningValidator for RejectAllValidator {
        async fn authorize(&self, _key_id: &KeyId, _message: &[u8], _signers: &[NodeId]) -> Result<()> {
            Err(Error::validation_rejected("signing authorization service denied this request"))
        }
    }

    #[tokio::test]
    async fn signing_fails_with_validation_rejected_when_the_validator_denies_it() {
        let dir = tempfile::tempdir().unwrap();
        let self_id = NodeId::new("solo");
        let keypair = NodeKeypair::generate();
        let peerstore = Arc::new(InMemoryPeerStore::new());
        let encryption = Arc::new(EncryptionLayer::new(keypair, peerstore, false, [7u8; 32]));
        let address_book = Arc::new(
            AddressBook::load_or_create(
                &dir.path().join("addresses.json"),
                &self_id,
                crate::addressbook::Mapping {
                    peer_id: "peer".to_string(),
                    moniker: "solo".to_string(),
                    timestamp: chrono::Utc::now(),
                },
            )
            .unwrap(),
        );
        let key_store = Arc::new(KeyStore::new(Arc::new(MemoryKv::new())));
        let op_store = Arc::new(OperationStore::new(Arc::new(MemoryKv::new())));
        let engine = OperationEngine::with_validator(
            self_id.clone(),
            "peer".to_string(),
            [9u8; 32],
            key_store.clone(),
            op_store,
            address_book,
            encryption,
            KEYGEN_TIMEOUT,
            SIGNING_TIMEOUT,
            RESHARING_TIMEOUT,
            Arc::new(RejectAllValidator),
        );

        let keygen = engine
            .start_keygen(StartKeygen {
                operation_id: None,
                threshold: 0,
                participants: vec![self_id.clone()],
            })
            .await
            .unwrap();
        let key_id = match &keygen.result {
            Some(OperationResult::Keygen(r)) => r.key_id.clone(),
            other => panic!("expected a keygen result, got {:?}", other),
        };

        let err = engine
            .start_signing(StartSigning {
                operation_id: None,
                key_id,
                message: b"do the thing".to_vec(),
                signers: vec![self_id],
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ValidationRejected(_)));
    }
}
