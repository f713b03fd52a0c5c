//! Both sides start at once

mod common;

use common::{Session, ALICE, BOB};
use keyward_core::TransactionId;
use keyward_testkit::TestDevice;
use keyward_verification::messages::{ACCEPT, START};
use keyward_verification::{Phase, SasRole, VerificationConfig, Verifier};
use proptest::prelude::*;

async fn ready_session(alice_device: &str, bob_device: &str) -> (Session, TransactionId) {
    let mut session = Session::with_devices(
        TestDevice::new(ALICE, alice_device, 1),
        TestDevice::new(BOB, bob_device, 2),
        VerificationConfig::default(),
    );
    let txn = session
        .alice
        .manager
        .request_verification(session.bob.user_id().clone(), session.bob.device.device_id().clone())
        .await
        .unwrap();
    session.pump().await;
    session.bob.manager.accept_request(&txn).await.unwrap();
    session.pump().await;
    (session, txn)
}

async fn race(session: &mut Session, txn: &TransactionId) {
    session.alice.manager.start_sas(txn).await.unwrap();
    session.bob.manager.start_sas(txn).await.unwrap();
    session.pump().await;
}

fn role(session: &Session, alice: bool, txn: &TransactionId) -> Option<SasRole> {
    let party = if alice { &session.alice } else { &session.bob };
    party
        .request(txn)
        .verifier()
        .and_then(Verifier::as_sas)
        .map(|sas| sas.role())
}

#[tokio::test]
async fn smaller_device_id_wins() {
    let (mut session, txn) = ready_session("ALICEDEVICE", "BOBDEVICE").await;
    race(&mut session, &txn).await;

    assert_eq!(role(&session, true, &txn), Some(SasRole::Starter));
    assert_eq!(role(&session, false, &txn), Some(SasRole::Acceptor));
    assert_eq!(session.alice.sas(&txn), session.bob.sas(&txn));
    assert!(session.alice.sas(&txn).is_some());

    // Only the loser accepts
    assert!(!session.alice.sent_types().iter().any(|t| t == ACCEPT));
    assert!(session.bob.sent_types().iter().any(|t| t == ACCEPT));
    assert_eq!(session.bob.sent_types().iter().filter(|t| *t == START).count(), 1);
}

#[tokio::test]
async fn requester_can_lose_the_race() {
    let (mut session, txn) = ready_session("ZEDDEVICE", "ABLEDEVICE").await;
    race(&mut session, &txn).await;

    assert_eq!(role(&session, true, &txn), Some(SasRole::Acceptor));
    assert_eq!(role(&session, false, &txn), Some(SasRole::Starter));

    session.confirm_both(&txn).await;
    assert_eq!(session.alice.phase(&txn), Phase::Done);
    assert_eq!(session.bob.phase(&txn), Phase::Done);
}

#[tokio::test]
async fn late_start_after_accept_is_ignored() {
    let (mut session, txn) = ready_session("ALICEDEVICE", "BOBDEVICE").await;
    session.alice.manager.start_sas(&txn).await.unwrap();
    session.pump().await;

    // Bob is already running Alice's verifier
    assert_eq!(role(&session, false, &txn), Some(SasRole::Acceptor));
    assert!(session.bob.manager.start_sas(&txn).await.is_err());
    assert_eq!(session.alice.phase(&txn), Phase::Started);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn both_sides_agree_on_the_winner(
        alice_device in "[A-Z]{4,10}",
        bob_device in "[A-Z]{4,10}",
    ) {
        prop_assume!(alice_device != bob_device);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (alice_role, bob_role, same_sas) = runtime.block_on(async {
            let (mut session, txn) = ready_session(&alice_device, &bob_device).await;
            race(&mut session, &txn).await;
            (
                role(&session, true, &txn),
                role(&session, false, &txn),
                session.alice.sas(&txn).is_some() && session.alice.sas(&txn) == session.bob.sas(&txn),
            )
        });

        let alice_wins = alice_device < bob_device;
        let (winner, loser) = if alice_wins { (alice_role, bob_role) } else { (bob_role, alice_role) };
        prop_assert_eq!(winner, Some(SasRole::Starter));
        prop_assert_eq!(loser, Some(SasRole::Acceptor));
        prop_assert!(same_sas);
    }
}
