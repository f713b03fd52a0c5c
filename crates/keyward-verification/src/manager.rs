//! Verification manager
//!
//! Owns every session of one local device, keyed by transaction id. Inbound
//! transport messages are parsed, routed to their session, or turn into a new
//! incoming request. User actions are addressed by transaction id. Fired
//! timers are offered to each live session until one claims them.

use std::collections::HashMap;

use keyward_core::effects::{InboundMessage, MessageSource, TimeoutHandle};
use keyward_core::{DeviceId, KeywardConfig, RoomId, TransactionId, UserId};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channel::{IncomingMessage, VerificationChannel};
use crate::config::VerificationConfig;
use crate::effects::VerificationEffects;
use crate::error::{CancelCode, Result, VerificationError};
use crate::events::{event_channel, EventReceiver, EventSender};
use crate::messages::{RequestContent, VerificationMessage, SAS_V1};
use crate::method::Participant;
use crate::request::VerificationRequest;

const TRANSACTION_ID_BYTES: usize = 16;

/// Routes verification traffic for one local device
pub struct VerificationManager<E: VerificationEffects> {
    effects: E,
    local: Participant,
    config: VerificationConfig,
    requests: HashMap<TransactionId, VerificationRequest>,
    events: EventSender,
}

impl<E: VerificationEffects> std::fmt::Debug for VerificationManager<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationManager")
            .field("local", &self.local)
            .field("sessions", &self.requests.len())
            .finish_non_exhaustive()
    }
}

impl<E: VerificationEffects> VerificationManager<E> {
    /// Create a manager for `local`, returning the event queue the
    /// application listens on
    pub fn new(
        effects: E,
        local: Participant,
        config: VerificationConfig,
    ) -> Result<(Self, EventReceiver)> {
        config.validate()?;
        let (events, receiver) = event_channel();
        Ok((
            Self {
                effects,
                local,
                config,
                requests: HashMap::new(),
                events,
            },
            receiver,
        ))
    }

    /// Effect handlers
    pub fn effects(&self) -> &E {
        &self.effects
    }

    /// This device
    pub fn local(&self) -> &Participant {
        &self.local
    }

    /// Session `transaction_id`
    pub fn get(&self, transaction_id: &TransactionId) -> Option<&VerificationRequest> {
        self.requests.get(transaction_id)
    }

    /// All sessions, live and finished
    pub fn requests(&self) -> impl Iterator<Item = &VerificationRequest> {
        self.requests.values()
    }

    /// Forget finished sessions; returns how many were removed
    pub fn prune_finished(&mut self) -> usize {
        let before = self.requests.len();
        self.requests.retain(|_, request| !request.is_terminal());
        before - self.requests.len()
    }

    // =========================================================================
    // OUTGOING REQUESTS
    // =========================================================================

    /// Ask `device_id` of `user_id` to verify over to-device messages
    pub async fn request_verification(
        &mut self,
        user_id: UserId,
        device_id: DeviceId,
    ) -> Result<TransactionId> {
        if user_id == self.local.user_id && device_id == self.local.device_id {
            return Err(VerificationError::ProtocolViolation(
                "Cannot verify our own device".to_string(),
            ));
        }

        let bytes = self.effects.random_bytes(TRANSACTION_ID_BYTES).await;
        let transaction_id = TransactionId::new(hex::encode(bytes));
        if self.requests.contains_key(&transaction_id) {
            return Err(VerificationError::AlreadyInProgress);
        }

        let channel =
            VerificationChannel::to_device(user_id.clone(), device_id.clone(), transaction_id.clone());
        let mut request = VerificationRequest::outgoing(
            channel,
            self.local.clone(),
            user_id,
            Some(device_id),
            self.config.clone(),
            self.events.clone(),
        );
        let sent = request.send_request(&self.effects).await;
        self.requests.insert(transaction_id.clone(), request);
        sent.map(|()| transaction_id)
    }

    /// Ask `user_id` to verify inside `room_id`. The transaction id is the
    /// event id of the request message.
    pub async fn request_verification_in_room(
        &mut self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<TransactionId> {
        if user_id == self.local.user_id {
            return Err(VerificationError::ProtocolViolation(
                "Room verification needs another user".to_string(),
            ));
        }

        let channel = VerificationChannel::room(room_id, user_id.clone(), None);
        let mut request = VerificationRequest::outgoing(
            channel,
            self.local.clone(),
            user_id,
            None,
            self.config.clone(),
            self.events.clone(),
        );
        let sent = request.send_request(&self.effects).await;
        match request.transaction_id().cloned() {
            Some(transaction_id) => {
                self.requests.insert(transaction_id.clone(), request);
                sent.map(|()| transaction_id)
            }
            None => {
                sent?;
                Err(VerificationError::ProtocolViolation(
                    "Room request has no event id".to_string(),
                ))
            }
        }
    }

    // =========================================================================
    // USER ACTIONS
    // =========================================================================

    /// Accept an incoming request
    pub async fn accept_request(&mut self, transaction_id: &TransactionId) -> Result<()> {
        let request = self
            .requests
            .get_mut(transaction_id)
            .ok_or_else(|| VerificationError::UnknownTransaction(transaction_id.clone()))?;
        request.send_ready(&self.effects).await
    }

    /// Start SAS on a ready request
    pub async fn start_sas(&mut self, transaction_id: &TransactionId) -> Result<()> {
        let request = self
            .requests
            .get_mut(transaction_id)
            .ok_or_else(|| VerificationError::UnknownTransaction(transaction_id.clone()))?;
        request.start_verification(&self.effects, SAS_V1).await
    }

    /// The user confirmed the SAS
    pub async fn confirm(&mut self, transaction_id: &TransactionId) -> Result<()> {
        let request = self
            .requests
            .get_mut(transaction_id)
            .ok_or_else(|| VerificationError::UnknownTransaction(transaction_id.clone()))?;
        request.confirm(&self.effects).await
    }

    /// The user saw a different SAS
    pub async fn mismatch(&mut self, transaction_id: &TransactionId) -> Result<()> {
        let request = self
            .requests
            .get_mut(transaction_id)
            .ok_or_else(|| VerificationError::UnknownTransaction(transaction_id.clone()))?;
        request.mismatch(&self.effects).await
    }

    /// The user abandoned the session
    pub async fn cancel(&mut self, transaction_id: &TransactionId) -> Result<()> {
        let request = self
            .requests
            .get_mut(transaction_id)
            .ok_or_else(|| VerificationError::UnknownTransaction(transaction_id.clone()))?;
        request
            .cancel(&self.effects, CancelCode::User, "The user cancelled the verification")
            .await;
        Ok(())
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Handle one message from the transport
    pub async fn receive(&mut self, inbound: InboundMessage) {
        let incoming = match IncomingMessage::parse(&inbound) {
            Ok(Some(incoming)) => incoming,
            Ok(None) => return,
            Err(err) => {
                self.on_malformed(&inbound, err).await;
                return;
            }
        };

        if self.is_own_echo(&incoming) {
            debug!(transaction_id = %incoming.transaction_id, "Ignoring our own verification message");
            return;
        }

        if let Some(request) = self.requests.get_mut(&incoming.transaction_id) {
            request.receive(&self.effects, &incoming).await;
            return;
        }

        match &incoming.message {
            VerificationMessage::Request(content) => {
                self.on_new_request(&incoming, content).await;
            }
            message => {
                debug!(
                    transaction_id = %incoming.transaction_id,
                    event_type = message.event_type(),
                    "Dropping message for unknown transaction"
                );
            }
        }
    }

    async fn on_malformed(&mut self, inbound: &InboundMessage, err: VerificationError) {
        let room_echo = matches!(inbound.source, MessageSource::Room { .. })
            && inbound.sender == self.local.user_id;
        let request = IncomingMessage::transaction_id_of(inbound)
            .filter(|_| !room_echo)
            .and_then(|transaction_id| self.requests.get_mut(&transaction_id));
        let Some(request) = request else {
            warn!(
                sender = %inbound.sender,
                event_type = %inbound.event_type,
                error = %err,
                "Ignoring malformed verification message"
            );
            return;
        };
        request
            .receive_malformed(&self.effects, &inbound.sender, &inbound.event_type, err)
            .await;
    }

        fn is_own_echo(&self, incoming: &IncomingMessage) -> bool {
        if incoming.sender != self.local.user_id {
            return false;
        }
        match incoming.source {
            MessageSource::Room { .. } => true,
            MessageSource::ToDevice => {
                incoming.message.from_device() == Some(&self.local.device_id)
            }
        }
    }

    async fn on_new_request(&mut self, incoming: &IncomingMessage, content: &RequestContent) {
        let channel = match &incoming.source {
            MessageSource::ToDevice => VerificationChannel::to_device(
                incoming.sender.clone(),
                content.from_device.clone(),
                incoming.transaction_id.clone(),
            ),
            MessageSource::Room { room_id, .. } => {
                let addressed_to = incoming.content.get("to").and_then(Value::as_str);
                if addressed_to != Some(self.local.user_id.as_str()) {
                    debug!(
                        transaction_id = %incoming.transaction_id,
                        "Ignoring room request addressed to someone else"
                    );
                    return;
                }
                VerificationChannel::room(
                    room_id.clone(),
                    incoming.sender.clone(),
                    Some(incoming.transaction_id.clone()),
                )
            }
        };

        match VerificationRequest::from_request(
            &self.effects,
            channel,
            self.local.clone(),
            incoming.sender.clone(),
            content,
            self.config.clone(),
            self.events.clone(),
        )
        .await
        {
            Ok(request) => {
                self.requests.insert(incoming.transaction_id.clone(), request);
            }
            Err(err) => {
                warn!(
                    transaction_id = %incoming.transaction_id,
                    error = %err,
                    "Failed to register incoming verification request"
                );
            }
        }
    }

    /// Route a fired timer to the session that armed it
    pub async fn handle_timeout(&mut self, handle: TimeoutHandle) {
        for request in self.requests.values_mut() {
            if request.on_timeout(&self.effects, handle).await {
                return;
            }
        }
        debug!(%handle, "Timer fired for no live session");
    }

    /// Process inbound messages and fired timers until the inbound stream
    /// closes
    pub async fn run(
        &mut self,
        mut inbound: mpsc::UnboundedReceiver<InboundMessage>,
        mut timeouts: mpsc::UnboundedReceiver<TimeoutHandle>,
    ) {
        info!(user_id = %self.local.user_id, device_id = %self.local.device_id, "Verification manager running");
        loop {
            tokio::select! {
                message = inbound.recv() => match message {
                    Some(message) => self.receive(message).await,
                    None => break,
                },
                Some(handle) = timeouts.recv() => self.handle_timeout(handle).await,
            }
        }
        info!("Verification manager stopped");
    }
}
