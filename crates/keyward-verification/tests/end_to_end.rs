//! Complete verifications between two managers

mod common;

use assert_matches::assert_matches;
use common::{phase_changes, Session, ROOM};
use keyward_core::effects::TrustStoreEffects;
use keyward_core::RoomId;
use keyward_testkit::TestDevice;
use keyward_verification::messages::{
    ACCEPT, CANCEL, DONE, KEY, MAC, READY, REQUEST, ROOM_MESSAGE, START,
};
use keyward_verification::{
    Phase, SasRole, VerificationConfig, VerificationEvent, Verifier,
};

#[tokio::test]
async fn to_device_verification_completes() {
    let mut session = Session::new();
    let txn = session.run_to_sas().await;

    assert_eq!(session.alice.phase(&txn), Phase::Started);
    assert_eq!(session.bob.phase(&txn), Phase::Started);
    let alice_sas = session.alice.sas(&txn).expect("alice shows SAS");
    assert_eq!(Some(alice_sas.clone()), session.bob.sas(&txn));
    assert!(session.alice.log.iter().any(
        |e| matches!(e, VerificationEvent::ShowSas { transaction_id, sas } if *transaction_id == txn && *sas == alice_sas)
    ));

    session.confirm_both(&txn).await;

    assert_eq!(session.alice.phase(&txn), Phase::Done);
    assert_eq!(session.bob.phase(&txn), Phase::Done);
    assert!(session
        .alice
        .env
        .trust
        .is_device_verified(session.bob.user_id(), session.bob.device.device_id()));
    assert!(session
        .bob
        .env
        .trust
        .is_device_verified(session.alice.user_id(), session.alice.device.device_id()));

    assert_eq!(
        session.alice.sent_types(),
        vec![REQUEST, START, KEY, MAC, DONE]
    );
    assert_eq!(session.bob.sent_types(), vec![READY, ACCEPT, KEY, MAC, DONE]);
}

#[tokio::test]
async fn phases_are_reported_in_order() {
    let mut session = Session::new();
    let txn = session.run_to_sas().await;
    session.confirm_both(&txn).await;

    let expected = vec![
        (Phase::Unsent, Phase::Requested),
        (Phase::Requested, Phase::Ready),
        (Phase::Ready, Phase::Started),
        (Phase::Started, Phase::Done),
    ];
    assert_eq!(phase_changes(&session.alice.log), expected);
    assert_eq!(phase_changes(&session.bob.log), expected);
}

#[tokio::test]
async fn keys_verified_event_names_the_peer() {
    let mut session = Session::new();
    let txn = session.run_to_sas().await;
    session.confirm_both(&txn).await;

    let verified = session
        .alice
        .log
        .iter()
        .find_map(|event| match event {
            VerificationEvent::KeysVerified {
                transaction_id,
                user_id,
                device_id,
                keys,
            } => Some((transaction_id.clone(), user_id.clone(), device_id.clone(), keys.clone())),
            _ => None,
        })
        .expect("keys verified");

    assert_eq!(verified.0, txn);
    assert_eq!(&verified.1, session.bob.user_id());
    assert_eq!(&verified.2, session.bob.device.device_id());
    assert_eq!(verified.3.len(), 1);
    assert_eq!(verified.3[0].key, session.bob.device.ed25519_key());
}

#[tokio::test]
async fn starter_and_acceptor_roles() {
    let mut session = Session::new();
    let txn = session.run_to_sas().await;

    let role = |verifier: Option<&Verifier>| verifier.and_then(Verifier::as_sas).map(|s| s.role());
    assert_eq!(role(session.alice.request(&txn).verifier()), Some(SasRole::Starter));
    assert_eq!(role(session.bob.request(&txn).verifier()), Some(SasRole::Acceptor));
}

#[tokio::test]
async fn master_keys_are_verified() {
    let alice = TestDevice::new(common::ALICE, "ALICEDEVICE", 1).with_master_key();
    let bob = TestDevice::new(common::BOB, "BOBDEVICE", 2).with_master_key();
    let mut session = Session::with_devices(alice, bob, VerificationConfig::default());
    let txn = session.run_to_sas().await;
    session.confirm_both(&txn).await;

    assert_eq!(session.alice.phase(&txn), Phase::Done);
    let keys = session
        .alice
        .env
        .effects
        .device_keys(session.bob.user_id(), session.bob.device.device_id())
        .await
        .unwrap();
    assert!(keys.is_some());

    let verified = session.alice.env.trust.verified_keys(session.bob.user_id(), session.bob.device.device_id());
    assert_eq!(verified.len(), 2);
    let master = session.bob.device.master_key().unwrap();
    assert!(verified.iter().any(|k| k.key == master));
}

#[tokio::test]
async fn master_key_can_be_left_out() {
    let alice = TestDevice::new(common::ALICE, "ALICEDEVICE", 1).with_master_key();
    let bob = TestDevice::new(common::BOB, "BOBDEVICE", 2).with_master_key();
    let mut config = VerificationConfig::default();
    config.sas.include_master_key = false;
    let mut session = Session::with_devices(alice, bob, config);
    let txn = session.run_to_sas().await;
    session.confirm_both(&txn).await;

    assert_eq!(session.bob.phase(&txn), Phase::Done);
    let verified = session.bob.env.trust.verified_keys(session.alice.user_id(), session.alice.device.device_id());
    assert_eq!(verified.len(), 1);
}

#[tokio::test]
async fn room_verification_completes() {
    let mut session = Session::new();
    let room = RoomId::new(ROOM);
    let txn = session
        .alice
        .manager
        .request_verification_in_room(room.clone(), session.bob.user_id().clone())
        .await
        .unwrap();
    assert!(txn.as_str().starts_with('$'));

    let request = session.alice.outbox();
    assert_eq!(request.len(), 1);
    assert_eq!(request[0].event_type, ROOM_MESSAGE);
    assert_eq!(request[0].content["msgtype"], REQUEST);
    assert_eq!(request[0].content["to"], common::BOB);
    for message in request {
        session.bob.manager.receive(message).await;
    }
    assert_eq!(session.bob.only_transaction(), txn);

    session.bob.manager.accept_request(&txn).await.unwrap();
    let ready = session.bob.outbox();
    assert_eq!(ready[0].content["m.relates_to"]["event_id"], txn.as_str());
    assert_eq!(ready[0].content["m.relates_to"]["rel_type"], "m.reference");
    assert!(ready[0].content.get("transaction_id").is_none());
    for message in ready {
        session.alice.manager.receive(message).await;
    }
    assert_eq!(
        session.alice.request(&txn).remote_device(),
        Some(session.bob.device.device_id())
    );

    session.alice.manager.start_sas(&txn).await.unwrap();
    session.pump().await;
    assert_eq!(session.alice.sas(&txn), session.bob.sas(&txn));
    session.confirm_both(&txn).await;

    assert_eq!(session.alice.phase(&txn), Phase::Done);
    assert_eq!(session.bob.phase(&txn), Phase::Done);
}

#[tokio::test]
async fn room_request_for_someone_else_is_ignored() {
    let mut session = Session::new();
    let carol = TestDevice::new("@carol:example.org", "CAROLDEVICE", 3);
    session
        .alice
        .manager
        .request_verification_in_room(RoomId::new(ROOM), carol.user_id().clone())
        .await
        .unwrap();
    session.pump().await;

    assert_eq!(session.bob.manager.requests().count(), 0);
}

#[tokio::test]
async fn user_mismatch_cancels_both_sides() {
    let mut session = Session::new();
    let txn = session.run_to_sas().await;

    session.bob.manager.mismatch(&txn).await.unwrap();
    session.pump().await;

    assert_eq!(session.bob.sent_types().last().map(String::as_str), Some(CANCEL));
    for party in [&session.alice, &session.bob] {
        let request = party.request(&txn);
        assert_eq!(request.phase(), Phase::Cancelled);
        assert_eq!(request.cancellation().unwrap().code.as_str(), "m.mismatched_sas");
    }
    assert!(session.bob.request(&txn).cancellation().unwrap().cancelled_by_us);
    assert!(!session.alice.request(&txn).cancellation().unwrap().cancelled_by_us);
    assert!(!session
        .alice
        .env
        .trust
        .is_device_verified(session.bob.user_id(), session.bob.device.device_id()));
}

#[tokio::test]
async fn user_cancel_before_start() {
    let mut session = Session::new();
    let txn = session
        .alice
        .manager
        .request_verification(session.bob.user_id().clone(), session.bob.device.device_id().clone())
        .await
        .unwrap();
    session.pump().await;

    session.bob.manager.cancel(&txn).await.unwrap();
    session.pump().await;

    assert_matches!(
        session.alice.log.last(),
        Some(VerificationEvent::Cancelled { cancellation, .. }) if cancellation.code.as_str() == "m.user"
    );
    assert_eq!(session.alice.phase(&txn), Phase::Cancelled);
}
