//! Two-party harness
//!
//! Each party is a manager running on its own test environment. Messages are
//! moved between the recording transports by hand, optionally dropped,
//! duplicated or reordered on the way.

#![allow(dead_code)]

use keyward_core::effects::{ChannelTarget, InboundMessage, MessageSource};
use keyward_core::{TransactionId, UserId};
use keyward_effects::VerificationEffectSystem;
use keyward_testkit::{init_tracing, RecordedMessage, TestDevice, TestEnvironment};
use keyward_verification::{
    EventReceiver, Participant, Phase, SasDisplay, VerificationConfig, VerificationEvent,
    VerificationManager, VerificationRequest,
};

pub const ALICE: &str = "@alice:example.org";
pub const BOB: &str = "@bob:example.org";
pub const ROOM: &str = "!verification:example.org";

/// What happens to a batch of messages in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Deliver,
    Drop,
    Duplicate,
    Reverse,
}

impl Fault {
    pub fn apply(self, mut messages: Vec<InboundMessage>) -> Vec<InboundMessage> {
        match self {
            Fault::Deliver => messages,
            Fault::Drop => Vec::new(),
            Fault::Duplicate => messages.iter().cloned().flat_map(|m| [m.clone(), m]).collect(),
            Fault::Reverse => {
                messages.reverse();
                messages
            }
        }
    }
}

/// One device with its manager, effects and event log
pub struct Party {
    pub device: TestDevice,
    pub env: TestEnvironment,
    pub manager: VerificationManager<VerificationEffectSystem>,
    events: EventReceiver,
    pub log: Vec<VerificationEvent>,
}

impl Party {
    pub fn new(device: TestDevice, known: &[&TestDevice], config: VerificationConfig) -> Self {
        let env = TestEnvironment::new(known);
        let local = Participant::new(device.user_id().clone(), device.device_id().clone());
        let (manager, events) = VerificationManager::new(env.effects.clone(), local, config)
            .expect("valid configuration");
        Self {
            device,
            env,
            manager,
            events,
            log: Vec::new(),
        }
    }

    pub fn user_id(&self) -> &UserId {
        self.device.user_id()
    }

    /// Move new events into the log and return them
    pub fn take_events(&mut self) -> Vec<VerificationEvent> {
        let mut fresh = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            fresh.push(event);
        }
        self.log.extend(fresh.iter().cloned());
        fresh
    }

    /// Messages sent since the last call, as the peer would receive them
    pub fn outbox(&self) -> Vec<InboundMessage> {
        self.env
            .transport
            .drain()
            .into_iter()
            .map(|recorded| inbound_from(self.user_id(), recorded))
            .collect()
    }

    pub fn request(&self, transaction_id: &TransactionId) -> &VerificationRequest {
        self.manager.get(transaction_id).expect("known transaction")
    }

    pub fn phase(&self, transaction_id: &TransactionId) -> Phase {
        self.request(transaction_id).phase()
    }

    pub fn sas(&self, transaction_id: &TransactionId) -> Option<SasDisplay> {
        self.request(transaction_id).sas().cloned()
    }

    /// The only session this party knows
    pub fn only_transaction(&self) -> TransactionId {
        let ids: Vec<_> = self
            .manager
            .requests()
            .filter_map(|r| r.transaction_id().cloned())
            .collect();
        assert_eq!(ids.len(), 1, "expected exactly one session");
        ids[0].clone()
    }

    /// Move the clock and hand fired timers to the manager
    pub async fn advance(&mut self, ms: u64) {
        for handle in self.env.clock.advance(ms) {
            self.manager.handle_timeout(handle).await;
        }
    }

    pub fn sent_types(&self) -> Vec<String> {
        self.env.transport.sent_types()
    }
}

pub fn inbound_from(sender: &UserId, recorded: RecordedMessage) -> InboundMessage {
    let RecordedMessage { message, event_id } = recorded;
    let source = match message.target {
        ChannelTarget::ToDevice { .. } => MessageSource::ToDevice,
        ChannelTarget::Room { room_id } => MessageSource::Room {
            room_id,
            event_id: event_id.unwrap_or_default(),
        },
    };
    InboundMessage {
        sender: sender.clone(),
        source,
        event_type: message.event_type,
        content: message.content,
    }
}

/// Alice and Bob, each knowing both devices
pub struct Session {
    pub alice: Party,
    pub bob: Party,
}

impl Session {
    pub fn new() -> Self {
        Self::with_config(VerificationConfig::default())
    }

    pub fn with_config(config: VerificationConfig) -> Self {
        Self::with_devices(
            TestDevice::new(ALICE, "ALICEDEVICE", 1),
            TestDevice::new(BOB, "BOBDEVICE", 2),
            config,
        )
    }

    pub fn with_devices(alice: TestDevice, bob: TestDevice, config: VerificationConfig) -> Self {
        init_tracing();
        let known = [&alice, &bob];
        Self {
            alice: Party::new(alice.clone(), &known, config.clone()),
            bob: Party::new(bob.clone(), &known, config),
        }
    }

    /// Deliver Alice's outbox to Bob; returns how many messages moved
    pub async fn to_bob(&mut self, fault: Fault) -> usize {
        let batch = fault.apply(self.alice.outbox());
        let count = batch.len();
        for message in batch {
            self.bob.manager.receive(message).await;
        }
        count
    }

    /// Deliver Bob's outbox to Alice
    pub async fn to_alice(&mut self, fault: Fault) -> usize {
        let batch = fault.apply(self.bob.outbox());
        let count = batch.len();
        for message in batch {
            self.alice.manager.receive(message).await;
        }
        count
    }

    /// Exchange messages until both outboxes stay empty
    pub async fn pump(&mut self) {
        self.pump_with(|| Fault::Deliver).await;
    }

    /// Like [`Session::pump`], choosing a fault for every batch
    pub async fn pump_with(&mut self, mut fault: impl FnMut() -> Fault) {
        for _ in 0..64 {
            let moved = self.to_bob(fault()).await + self.to_alice(fault()).await;
            if moved == 0 {
                break;
            }
        }
        self.alice.take_events();
        self.bob.take_events();
    }

    /// Request, accept and start SAS over to-device messages, stopping once
    /// both sides show the SAS. Returns the transaction id.
    pub async fn run_to_sas(&mut self) -> TransactionId {
        let txn = self
            .alice
            .manager
            .request_verification(self.bob.user_id().clone(), self.bob.device.device_id().clone())
            .await
            .expect("request sent");
        self.pump().await;
        self.bob.manager.accept_request(&txn).await.expect("ready sent");
        self.pump().await;
        self.alice.manager.start_sas(&txn).await.expect("start sent");
        self.pump().await;
        txn
    }

    /// Both users confirm and the exchange completes
    pub async fn confirm_both(&mut self, txn: &TransactionId) {
        self.alice.manager.confirm(txn).await.expect("alice confirms");
        self.bob.manager.confirm(txn).await.expect("bob confirms");
        self.pump().await;
    }
}

/// `(from, to)` of every phase change in `events`
pub fn phase_changes(events: &[VerificationEvent]) -> Vec<(Phase, Phase)> {
    events
        .iter()
        .filter_map(|event| match event {
            VerificationEvent::PhaseChanged { from, to, .. } => Some((*from, *to)),
            _ => None,
        })
        .collect()
}
