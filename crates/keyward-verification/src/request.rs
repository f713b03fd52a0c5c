//! Verification request
//!
//! Negotiates a session with one peer device before any method runs:
//!
//! ```text
//! Unsent ──send_request──▶ Requested ──ready──▶ Ready ──start──▶ Started ──▶ Done
//!    └──────────────┴─────────────────┴────────────────┴──▶ Cancelled
//! ```
//!
//! Phases only move forward. Once `Done` or `Cancelled` the request ignores
//! everything. The request owns the active [`Verifier`] and the two timers:
//! the request timer covers negotiation, the step timer covers a running
//! verifier. Every inbound message from the peer restarts whichever is armed.

use keyward_core::effects::TimeoutHandle;
use keyward_core::{DeviceId, KeywardError, TransactionId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::channel::{IncomingMessage, VerificationChannel};
use crate::config::VerificationConfig;
use crate::effects::VerificationEffects;
use crate::error::{CancelCode, Cancellation, Result, TimeoutKind, VerificationError};
use crate::events::{EventSender, VerificationEvent};
use crate::glare::{self, GlareOutcome, StartRaceKey};
use crate::messages::{
    CancelContent, ReadyContent, RequestContent, StartContent, VerificationMessage, READY, START,
};
use crate::method::{self, Participant, Verifier, VerifierContext, VerifierOutput, VerifierStep};
use crate::sas::SasDisplay;

// =============================================================================
// PHASES
// =============================================================================

/// Negotiation phase of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Created locally, nothing sent yet
    Unsent,
    /// Request sent or received
    Requested,
    /// Both sides agreed on a method set
    Ready,
    /// A verifier is running
    Started,
    /// The verifier completed
    Done,
    /// Cancelled by either side
    Cancelled,
}

impl Phase {
    fn rank(self) -> u8 {
        match self {
            Phase::Unsent => 0,
            Phase::Requested => 1,
            Phase::Ready => 2,
            Phase::Started => 3,
            Phase::Done => 4,
            Phase::Cancelled => 5,
        }
    }

    /// Whether the request can no longer change
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Cancelled)
    }

    /// Allowed moves: one step forward, or to `Cancelled` from any
    /// non-terminal phase
    pub fn can_transition_to(self, next: Phase) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Phase::Cancelled || (next != Phase::Cancelled && next.rank() == self.rank() + 1)
    }
}

fn intersect(ours: &[String], theirs: &[String]) -> Vec<String> {
    ours.iter()
        .filter(|m| method::is_supported(m) && theirs.contains(m))
        .cloned()
        .collect()
}

// =============================================================================
// REQUEST
// =============================================================================

/// One verification session with a peer device
#[derive(Debug)]
pub struct VerificationRequest {
    channel: VerificationChannel,
    local: Participant,
    remote_user: UserId,
    remote_device: Option<DeviceId>,
    we_requested: bool,
    phase: Phase,
    config: VerificationConfig,

    their_methods: Vec<String>,
    common_methods: Vec<String>,
    chosen_method: Option<String>,
    verifier: Option<Verifier>,
    cancellation: Option<Cancellation>,

    request_timer: Option<TimeoutHandle>,
    step_timer: Option<TimeoutHandle>,
    events: EventSender,
}

impl VerificationRequest {
    fn new(
        channel: VerificationChannel,
        local: Participant,
        remote_user: UserId,
        remote_device: Option<DeviceId>,
        we_requested: bool,
        config: VerificationConfig,
        events: EventSender,
    ) -> Self {
        Self {
            channel,
            local,
            remote_user,
            remote_device,
            we_requested,
            phase: Phase::Unsent,
            config,
            their_methods: Vec::new(),
            common_methods: Vec::new(),
            chosen_method: None,
            verifier: None,
            cancellation: None,
            request_timer: None,
            step_timer: None,
            events,
        }
    }

    /// A request we will send. `remote_device` is required for to-device
    /// channels; in rooms it is learned from the peer's `ready`.
    pub fn outgoing(
        channel: VerificationChannel,
        local: Participant,
        remote_user: UserId,
        remote_device: Option<DeviceId>,
        config: VerificationConfig,
        events: EventSender,
    ) -> Self {
        Self::new(channel, local, remote_user, remote_device, true, config, events)
    }

    /// A request received from `sender`.
    ///
    /// The request enters `Requested`. If its timestamp is older than the
    /// request timeout, or too far in the future, it is cancelled right away
    /// with `m.timeout`.
    pub async fn from_request<E: VerificationEffects + ?Sized>(
        effects: &E,
        channel: VerificationChannel,
        local: Participant,
        sender: UserId,
        content: &RequestContent,
        config: VerificationConfig,
        events: EventSender,
    ) -> Result<Self> {
        let mut request = Self::new(
            channel,
            local,
            sender,
            Some(content.from_device.clone()),
            false,
            config,
            events,
        );
        request.their_methods = content.methods.clone();
        request.transition(Phase::Requested)?;
        info!(
            transaction_id = %request.txn_label(),
            sender = %request.remote_user,
            from_device = %content.from_device,
            "Received verification request"
        );

        let now = effects.physical_time_ms().await.map_err(KeywardError::from)?;
        let mut lifetime = request.config.request_timeout_ms;
        if let Some(timestamp) = content.timestamp {
            let age = now.saturating_sub(timestamp);
            if age >= request.config.request_timeout_ms {
                request
                    .cancel_with(
                        effects,
                        CancelCode::Timeout,
                        "The verification request is too old",
                        Some(TimeoutKind::Request),
                        true,
                    )
                    .await;
                return Ok(request);
            }
            if timestamp > now.saturating_add(request.config.max_clock_skew_ms) {
                request
                    .cancel_with(
                        effects,
                        CancelCode::Timeout,
                        "The verification request is from the future",
                        Some(TimeoutKind::Request),
                        true,
                    )
                    .await;
                return Ok(request);
            }
            lifetime -= age;
        }
        request.request_timer = Some(effects.schedule(lifetime).await);
        Ok(request)
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Transaction id, once assigned
    pub fn transaction_id(&self) -> Option<&TransactionId> {
        self.channel.transaction_id()
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether the request reached `Done` or `Cancelled`
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Whether we sent the request
    pub fn we_requested(&self) -> bool {
        self.we_requested
    }

    /// This device
    pub fn local(&self) -> &Participant {
        &self.local
    }

    /// Peer user
    pub fn remote_user(&self) -> &UserId {
        &self.remote_user
    }

    /// Peer device, once known
    pub fn remote_device(&self) -> Option<&DeviceId> {
        self.remote_device.as_ref()
    }

    /// Channel the session runs over
    pub fn channel(&self) -> &VerificationChannel {
        &self.channel
    }

    /// Methods we offer
    pub fn our_methods(&self) -> &[String] {
        &self.config.methods
    }

    /// Methods the peer offered
    pub fn their_methods(&self) -> &[String] {
        &self.their_methods
    }

    /// Methods both sides support
    pub fn common_methods(&self) -> &[String] {
        &self.common_methods
    }

    /// Method of the running or finished verifier
    pub fn chosen_method(&self) -> Option<&str> {
        self.chosen_method.as_deref()
    }

    /// The verifier, once started
    pub fn verifier(&self) -> Option<&Verifier> {
        self.verifier.as_ref()
    }

    /// The SAS, once both keys are exchanged
    pub fn sas(&self) -> Option<&SasDisplay> {
        self.verifier.as_ref()?.as_sas()?.sas()
    }

    /// Why the request was cancelled
    pub fn cancellation(&self) -> Option<&Cancellation> {
        self.cancellation.as_ref()
    }

    fn txn_label(&self) -> &str {
        self.channel
            .transaction_id()
            .map(TransactionId::as_str)
            .unwrap_or("<unassigned>")
    }

    // =========================================================================
    // NEGOTIATION
    // =========================================================================

    /// Send the request. Only valid once, from `Unsent`.
    pub async fn send_request<E: VerificationEffects + ?Sized>(&mut self, effects: &E) -> Result<()> {
        if !self.we_requested || self.phase != Phase::Unsent {
            return Err(VerificationError::AlreadyInProgress);
        }

        let timestamp = effects.physical_time_ms().await.map_err(KeywardError::from)?;
        let message = VerificationMessage::Request(RequestContent {
            from_device: self.local.device_id.clone(),
            methods: self.config.methods.clone(),
            timestamp: Some(timestamp),
        });
        self.send(effects, message).await?;
        self.transition(Phase::Requested)?;
        self.request_timer = Some(effects.schedule(self.config.request_timeout_ms).await);

        info!(
            transaction_id = %self.txn_label(),
            peer = %self.remote_user,
            "Sent verification request"
        );
        Ok(())
    }

    /// Accept a received request by sending `ready`.
    ///
    /// Cancels with `m.unknown_method` if the method sets do not intersect.
    pub async fn send_ready<E: VerificationEffects + ?Sized>(&mut self, effects: &E) -> Result<()> {
        if self.we_requested || self.phase != Phase::Requested {
            return Err(VerificationError::InvalidPhaseTransition {
                from: self.phase,
                to: Phase::Ready,
            });
        }

        let common = intersect(&self.config.methods, &self.their_methods);
        if common.is_empty() {
            self.cancel_with(
                effects,
                CancelCode::UnknownMethod,
                "No common verification method",
                None,
                true,
            )
            .await;
            return Err(VerificationError::NoCommonMethod);
        }
        self.common_methods = common;

        let message = VerificationMessage::Ready(ReadyContent {
            from_device: self.local.device_id.clone(),
            methods: self.config.methods.clone(),
        });
        self.send(effects, message).await?;
        self.transition(Phase::Ready)
    }

    /// Start `method`. Only valid in `Ready` and for an agreed method.
    pub async fn start_verification<E: VerificationEffects + ?Sized>(
        &mut self,
        effects: &E,
        method: &str,
    ) -> Result<()> {
        if self.phase != Phase::Ready {
            return Err(VerificationError::InvalidPhaseTransition {
                from: self.phase,
                to: Phase::Started,
            });
        }
        if !self.common_methods.iter().any(|m| m == method) {
            return Err(VerificationError::UnknownMethod(method.to_string()));
        }

        let context = self.verifier_context()?;
        let (verifier, start) = Verifier::start(method, context, &self.config.sas, &self.channel)?;
        self.send(effects, start).await?;

        debug!(transaction_id = %self.txn_label(), method, "Started verification");
        self.verifier = Some(verifier);
        self.chosen_method = Some(method.to_string());
        self.enter_started(effects).await
    }

    fn verifier_context(&self) -> Result<VerifierContext> {
        let transaction_id = self.channel.transaction_id().cloned().ok_or_else(|| {
            VerificationError::ProtocolViolation("Request has no transaction id".to_string())
        })?;
        let device_id = self.remote_device.clone().ok_or_else(|| {
            VerificationError::ProtocolViolation("Peer device is unknown".to_string())
        })?;
        Ok(VerifierContext {
            local: self.local.clone(),
            remote: Participant::new(self.remote_user.clone(), device_id),
            transaction_id,
        })
    }

    async fn enter_started<E: VerificationEffects + ?Sized>(&mut self, effects: &E) -> Result<()> {
        self.transition(Phase::Started)?;
        if let Some(timer) = self.request_timer.take() {
            effects.cancel(timer).await;
        }
        self.step_timer = Some(effects.schedule(self.config.step_timeout_ms).await);
        Ok(())
    }

    // =========================================================================
    // USER ACTIONS
    // =========================================================================

    /// The user confirmed that the SAS matches
    pub async fn confirm<E: VerificationEffects + ?Sized>(&mut self, effects: &E) -> Result<()> {
        let Some(verifier) = self.verifier.as_mut().filter(|_| self.phase == Phase::Started) else {
            return Err(VerificationError::InvalidState {
                operation: "confirm",
                state: format!("{:?}", self.phase),
            });
        };

        match verifier.confirm(effects).await {
            Ok(output) => {
                self.apply_output(effects, output).await;
                Ok(())
            }
            Err(err @ VerificationError::InvalidState { .. }) => Err(err),
            Err(err) => {
                self.fail(effects, err.clone()).await;
                Err(err)
            }
        }
    }

    /// The user reported that the SAS differs
    pub async fn mismatch<E: VerificationEffects + ?Sized>(&mut self, effects: &E) -> Result<()> {
        if self.phase != Phase::Started {
            return Err(VerificationError::InvalidState {
                operation: "mismatch",
                state: format!("{:?}", self.phase),
            });
        }
        self.cancel_with(
            effects,
            VerificationError::UserRejected.cancel_code(),
            "The short authentication strings did not match",
            None,
            true,
        )
        .await;
        Ok(())
    }

    /// Cancel the request. A no-op once terminal.
    pub async fn cancel<E: VerificationEffects + ?Sized>(
        &mut self,
        effects: &E,
        code: CancelCode,
        reason: impl Into<String>,
    ) {
        self.cancel_with(effects, code, reason, None, true).await;
    }

    /// Handle a fired timer. Returns whether the timer belonged to this request.
    pub async fn on_timeout<E: VerificationEffects + ?Sized>(
        &mut self,
        effects: &E,
        handle: TimeoutHandle,
    ) -> bool {
        let kind = if self.request_timer == Some(handle) {
            self.request_timer = None;
            TimeoutKind::Request
        } else if self.step_timer == Some(handle) {
            self.step_timer = None;
            TimeoutKind::Step
        } else {
            return false;
        };

        warn!(transaction_id = %self.txn_label(), timer = %kind, "Verification timed out");
        self.cancel_with(
            effects,
            VerificationError::Timeout(kind).cancel_code(),
            format!("The verification {kind} timer expired"),
            Some(kind),
            true,
        )
        .await;
        true
    }

    // =========================================================================
    // INBOUND MESSAGES
    // =========================================================================

    /// Process a message of this request's transaction
    pub async fn receive<E: VerificationEffects + ?Sized>(
        &mut self,
        effects: &E,
        incoming: &IncomingMessage,
    ) {
        let event_type = incoming.message.event_type();
        if self.phase.is_terminal() {
            debug!(transaction_id = %self.txn_label(), event_type, "Ignoring message for finished verification");
            return;
        }
        if incoming.sender != self.remote_user {
            warn!(
                transaction_id = %self.txn_label(),
                sender = %incoming.sender,
                event_type,
                "Ignoring verification message from unexpected sender"
            );
            return;
        }
        if let (Some(expected), Some(from_device)) =
            (&self.remote_device, incoming.message.from_device())
        {
            if expected != from_device {
                warn!(
                    transaction_id = %self.txn_label(),
                    from_device = %from_device,
                    event_type,
                    "Ignoring verification message from unexpected device"
                );
                return;
            }
        }

        self.reset_timers(effects).await;

        match &incoming.message {
            VerificationMessage::Request(_) => {
                debug!(transaction_id = %self.txn_label(), "Ignoring repeated request");
            }
            VerificationMessage::Ready(ready) => self.on_ready(effects, ready).await,
            VerificationMessage::Start(start) => {
                self.on_start(effects, start, incoming.content.clone()).await;
            }
            VerificationMessage::Cancel(cancel) => self.on_cancel(effects, cancel).await,
            message => self.forward_to_verifier(effects, message).await,
        }
    }

    /// Whether a message of this type is the one the session waits for next
    pub fn awaits(&self, event_type: &str) -> bool {
        match self.phase {
            Phase::Requested => self.we_requested && event_type == READY,
            Phase::Ready => event_type == START,
            Phase::Started => self.verifier.as_ref().is_some_and(|v| v.awaits(event_type)),
            Phase::Unsent | Phase::Done | Phase::Cancelled => false,
        }
    }

    /// Handle a message of this transaction whose body could not be parsed.
    ///
    /// Cancels with `m.invalid_message` when it stands in for the awaited
    /// message; anything else is ignored. Returns whether the session ended.
    pub async fn receive_malformed<E: VerificationEffects + ?Sized>(
        &mut self,
        effects: &E,
        sender: &UserId,
        event_type: &str,
        err: VerificationError,
    ) -> bool {
        if self.phase.is_terminal() || *sender != self.remote_user || !self.awaits(event_type) {
            debug!(
                transaction_id = %self.txn_label(),
                event_type,
                error = %err,
                "Ignoring malformed verification message"
            );
            return false;
        }
        self.fail(effects, err).await;
        true
    }

    async fn on_ready<E: VerificationEffects + ?Sized>(&mut self, effects: &E, ready: &ReadyContent) {
        if !self.we_requested || self.phase != Phase::Requested {
            warn!(transaction_id = %self.txn_label(), phase = ?self.phase, "Ignoring unexpected ready");
            return;
        }
        self.remote_device.get_or_insert_with(|| ready.from_device.clone());
        self.their_methods = ready.methods.clone();
        self.common_methods = intersect(&self.config.methods, &ready.methods);

        if self.common_methods.is_empty() {
            self.cancel_with(
                effects,
                CancelCode::UnknownMethod,
                "No common verification method",
                None,
                true,
            )
            .await;
            return;
        }
        if let Err(err) = self.transition(Phase::Ready) {
            self.fail(effects, err).await;
        }
    }

    async fn on_start<E: VerificationEffects + ?Sized>(
        &mut self,
        effects: &E,
        start: &StartContent,
        content: Value,
    ) {
        match self.phase {
            Phase::Ready => self.accept_start(effects, start, content).await,
            Phase::Started => {
                let Some(ours) = self.verifier.as_ref().filter(|v| v.is_unanswered_start()) else {
                    warn!(transaction_id = %self.txn_label(), "Ignoring start for a running verification");
                    return;
                };
                let our_key = StartRaceKey::new(
                    ours.method(),
                    self.local.user_id.clone(),
                    self.local.device_id.clone(),
                );
                let their_key = StartRaceKey::new(
                    start.method.clone(),
                    self.remote_user.clone(),
                    start.from_device.clone(),
                );
                match glare::resolve(&our_key, &their_key) {
                    GlareOutcome::OursWins => {
                        debug!(transaction_id = %self.txn_label(), "Start race won, ignoring peer start");
                    }
                    GlareOutcome::TheirsWins => {
                        debug!(transaction_id = %self.txn_label(), "Start race lost, accepting peer start");
                        if let Some(mut ours) = self.verifier.take() {
                            ours.cancel();
                        }
                        self.accept_start(effects, start, content).await;
                    }
                }
            }
            phase => {
                warn!(transaction_id = %self.txn_label(), phase = ?phase, "Ignoring unexpected start");
            }
        }
    }

    async fn accept_start<E: VerificationEffects + ?Sized>(
        &mut self,
        effects: &E,
        start: &StartContent,
        content: Value,
    ) {
        if !self.common_methods.iter().any(|m| *m == start.method) {
            self.cancel_with(
                effects,
                CancelCode::UnknownMethod,
                format!("Method {} was not agreed", start.method),
                None,
                true,
            )
            .await;
            return;
        }

        let accepted = match self.verifier_context() {
            Ok(context) => {
                Verifier::accept(effects, context, &self.config.sas, start, content).await
            }
            Err(err) => Err(err),
        };
        let (verifier, output) = match accepted {
            Ok(accepted) => accepted,
            Err(err) => return self.fail(effects, err).await,
        };

        self.verifier = Some(verifier);
        self.chosen_method = Some(start.method.clone());
        if self.phase == Phase::Ready {
            if let Err(err) = self.enter_started(effects).await {
                return self.fail(effects, err).await;
            }
        }
        self.apply_output(effects, output).await;
    }

    async fn on_cancel<E: VerificationEffects + ?Sized>(&mut self, effects: &E, cancel: &CancelContent) {
        info!(
            transaction_id = %self.txn_label(),
            code = %cancel.code,
            reason = %cancel.reason,
            "Peer cancelled verification"
        );
        self.finish_cancelled(
            effects,
            Cancellation {
                code: cancel.code.clone(),
                reason: cancel.reason.clone(),
                cancelled_by_us: false,
                timeout: None,
            },
        )
        .await;
    }

    async fn forward_to_verifier<E: VerificationEffects + ?Sized>(
        &mut self,
        effects: &E,
        message: &VerificationMessage,
    ) {
        let event_type = message.event_type();
        let Some(verifier) = self.verifier.as_mut().filter(|_| self.phase == Phase::Started) else {
            warn!(transaction_id = %self.txn_label(), phase = ?self.phase, event_type, "Ignoring message before start");
            return;
        };

        match verifier.process_message(effects, message).await {
            Ok(output) if output.step == VerifierStep::Ignored => {
                warn!(transaction_id = %self.txn_label(), event_type, "Ignoring out-of-order verification message");
            }
            Ok(output) => self.apply_output(effects, output).await,
            Err(err) => self.fail(effects, err).await,
        }
    }

    // =========================================================================
    // OUTPUT, CANCELLATION AND TIMERS
    // =========================================================================

    async fn apply_output<E: VerificationEffects + ?Sized>(&mut self, effects: &E, output: VerifierOutput) {
        for message in output.outgoing {
            if self.send(effects, message).await.is_err() {
                return;
            }
        }

        let transaction_id = self.channel.transaction_id().cloned();
        match output.step {
            VerifierStep::Continue | VerifierStep::Ignored => {}
            VerifierStep::ShowSas(sas) => {
                if let Some(transaction_id) = transaction_id {
                    self.events.emit(VerificationEvent::ShowSas { transaction_id, sas });
                }
            }
            VerifierStep::Verified { keys, done } => {
                info!(
                    transaction_id = %self.txn_label(),
                    keys = keys.len(),
                    "Peer keys verified"
                );
                if let (Some(transaction_id), Some(device_id)) =
                    (transaction_id, self.remote_device.clone())
                {
                    self.events.emit(VerificationEvent::KeysVerified {
                        transaction_id,
                        user_id: self.remote_user.clone(),
                        device_id,
                        keys,
                    });
                }
                if done {
                    self.complete(effects).await;
                }
            }
            VerifierStep::Completed => self.complete(effects).await,
            VerifierStep::Cancel { code, reason } => {
                self.cancel_with(effects, code, reason, None, true).await;
            }
        }
    }

    async fn complete<E: VerificationEffects + ?Sized>(&mut self, effects: &E) {
        self.stop_timers(effects).await;
        if self.transition(Phase::Done).is_ok() {
            info!(transaction_id = %self.txn_label(), "Verification done");
        }
    }

    async fn send<E: VerificationEffects + ?Sized>(
        &mut self,
        effects: &E,
        message: VerificationMessage,
    ) -> Result<Value> {
        match self.channel.send(effects, &message).await {
            Ok(content) => Ok(content),
            Err(err) => {
                warn!(
                    transaction_id = %self.txn_label(),
                    event_type = message.event_type(),
                    error = %err,
                    "Failed to send verification message"
                );
                let code = err.cancel_code();
                self.cancel_with(effects, code, err.to_string(), None, false).await;
                Err(err)
            }
        }
    }

    async fn fail<E: VerificationEffects + ?Sized>(&mut self, effects: &E, err: VerificationError) {
        warn!(transaction_id = %self.txn_label(), error = %err, "Verification failed");
        self.cancel_with(effects, err.cancel_code(), err.to_string(), None, true).await;
    }

    /// Cancel locally, telling the peer when `notify` is set and it knows
    /// about the session
    async fn cancel_with<E: VerificationEffects + ?Sized>(
        &mut self,
        effects: &E,
        code: CancelCode,
        reason: impl Into<String>,
        timeout: Option<TimeoutKind>,
        notify: bool,
    ) {
        if self.phase.is_terminal() {
            return;
        }
        let reason = reason.into();

        if notify && self.phase != Phase::Unsent {
            let message = VerificationMessage::Cancel(CancelContent {
                code: code.clone(),
                reason: reason.clone(),
            });
            if let Err(err) = self.channel.send(effects, &message).await {
                warn!(transaction_id = %self.txn_label(), error = %err, "Failed to send cancel");
            }
        }

        self.finish_cancelled(
            effects,
            Cancellation {
                code,
                reason,
                cancelled_by_us: true,
                timeout,
            },
        )
        .await;
    }

    async fn finish_cancelled<E: VerificationEffects + ?Sized>(
        &mut self,
        effects: &E,
        cancellation: Cancellation,
    ) {
        if let Some(verifier) = self.verifier.as_mut() {
            verifier.cancel();
        }
        self.stop_timers(effects).await;
        if self.transition(Phase::Cancelled).is_err() {
            return;
        }

        info!(
            transaction_id = %self.txn_label(),
            code = %cancellation.code,
            by_us = cancellation.cancelled_by_us,
            "Verification cancelled"
        );
        self.cancellation = Some(cancellation.clone());
        self.events.emit(VerificationEvent::Cancelled {
            transaction_id: self.channel.transaction_id().cloned(),
            cancellation,
        });
    }

    async fn reset_timers<E: VerificationEffects + ?Sized>(&mut self, effects: &E) {
        if let Some(timer) = self.request_timer.take() {
            effects.cancel(timer).await;
            self.request_timer = Some(effects.schedule(self.config.request_timeout_ms).await);
        }
        if let Some(timer) = self.step_timer.take() {
            effects.cancel(timer).await;
            self.step_timer = Some(effects.schedule(self.config.step_timeout_ms).await);
        }
    }

    async fn stop_timers<E: VerificationEffects + ?Sized>(&mut self, effects: &E) {
        for timer in [self.request_timer.take(), self.step_timer.take()].into_iter().flatten() {
            effects.cancel(timer).await;
        }
    }

    fn transition(&mut self, next: Phase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(VerificationError::InvalidPhaseTransition {
                from: self.phase,
                to: next,
            });
        }
        let from = self.phase;
        self.phase = next;
        debug!(transaction_id = %self.txn_label(), from = ?from, to = ?next, "Verification phase changed");
        self.events.emit(VerificationEvent::PhaseChanged {
            transaction_id: self.channel.transaction_id().cloned(),
            from,
            to: next,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Phase; 6] = [
        Phase::Unsent,
        Phase::Requested,
        Phase::Ready,
        Phase::Started,
        Phase::Done,
        Phase::Cancelled,
    ];

    #[test]
    fn phases_only_move_forward_one_step() {
        assert!(Phase::Unsent.can_transition_to(Phase::Requested));
        assert!(Phase::Requested.can_transition_to(Phase::Ready));
        assert!(Phase::Ready.can_transition_to(Phase::Started));
        assert!(Phase::Started.can_transition_to(Phase::Done));

        assert!(!Phase::Requested.can_transition_to(Phase::Started));
        assert!(!Phase::Ready.can_transition_to(Phase::Requested));
        assert!(!Phase::Unsent.can_transition_to(Phase::Done));
    }

    #[test]
    fn terminal_phases_are_final() {
        for next in ALL {
            assert!(!Phase::Done.can_transition_to(next));
            assert!(!Phase::Cancelled.can_transition_to(next));
        }
    }

    #[test]
    fn any_live_phase_can_cancel() {
        for phase in ALL.into_iter().filter(|p| !p.is_terminal()) {
            assert!(phase.can_transition_to(Phase::Cancelled));
        }
    }

    #[test]
    fn intersection_keeps_our_order_and_drops_unsupported() {
        let ours = vec!["m.sas.v1".to_string(), "m.qr_code.show.v1".to_string()];
        let theirs = vec!["m.qr_code.show.v1".to_string(), "m.sas.v1".to_string()];
        assert_eq!(intersect(&ours, &theirs), vec!["m.sas.v1".to_string()]);
        assert!(intersect(&ours, &[]).is_empty());
    }
}
