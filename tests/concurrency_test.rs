mod helpers;

use chrono::Duration;
use custodian::audit::Provenance;
use custodian::categories::AcceptPayload;
use custodian::consent::ConsentStatus;
use custodian::errors::CustodianError;
use custodian::storage::{self, Role};
use custodian::sweeper;
use helpers::{ConsentBuilder, TestApp};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_create_one_pending_consent() {
    let app = TestApp::new().await;
    let requester = app.caller("r@example.com").await;
    let granter = app.caller("g@example.com").await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = app.service.clone();
        let requester = requester.clone();
        let request = ConsentBuilder::new("g@example.com").request();
        handles.push(tokio::spawn(async move {
            service
                .request_consent(&requester, request, &Provenance::default())
                .await
        }));
    }

    let mut created = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.expect("Task panicked") {
            Ok(_) => created += 1,
            Err(CustodianError::Conflict(_)) => conflicts += 1,
            Err(other) => panic!("Unexpected error: {other:?}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(conflicts, 7);

    let pending = storage::list_consents(
        app.connection(),
        Role::Granter,
        &granter.subject,
        Some(ConsentStatus::Pending),
    )
    .await
    .expect("List failed");
    assert_eq!(pending.len(), 1);

    // losers rolled back their REQUESTED records
    let logs = storage::list_audit_logs(app.connection(), None, 100)
        .await
        .expect("List failed");
    assert_eq!(logs.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_accept_and_decline_apply_once() {
    let app = TestApp::new().await;
    let requester = app.caller("r@example.com").await;
    let granter = app.caller("g@example.com").await;

    let consent = ConsentBuilder::new("g@example.com")
        .create(&app.service, &requester)
        .await;

    let accept = {
        let service = app.service.clone();
        let granter = granter.clone();
        let id = consent.id.clone();
        tokio::spawn(async move {
            service
                .accept(&granter, &id, &AcceptPayload::default(), &Provenance::default())
                .await
        })
    };
    let decline = {
        let service = app.service.clone();
        let granter = granter.clone();
        let id = consent.id.clone();
        tokio::spawn(async move {
            service
                .decline(&granter, &id, &Provenance::default())
                .await
        })
    };

    let results = [
        accept.await.expect("Task panicked"),
        decline.await.expect("Task panicked"),
    ];
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(CustodianError::Conflict(_)))));

    let count = storage::count_audit_logs_for_consent(app.connection(), &consent.id)
        .await
        .expect("Count failed");
    assert_eq!(count, 2, "REQUESTED plus exactly one decision");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sweeps_expire_once() {
    let app = TestApp::new().await;
    let requester = app.caller("r@example.com").await;
    let granter = app.caller("g@example.com").await;

    let consent = ConsentBuilder::new("g@example.com")
        .create_active(&app.service, &requester, &granter)
        .await;
    app.clock.advance(Duration::days(60));
    let now = app.now();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let db = app.connection().clone();
        handles.push(tokio::spawn(async move {
            sweeper::sweep_expired_consents(&db, now).await
        }));
    }

    let mut total = 0;
    for handle in handles {
        total += handle
            .await
            .expect("Task panicked")
            .expect("Sweep failed");
    }
    assert_eq!(total, 1);

    let stored = storage::get_consent(app.connection(), &consent.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ConsentStatus::Expired);

    let count = storage::count_audit_logs_for_consent(app.connection(), &consent.id)
        .await
        .unwrap();
    assert_eq!(count, 3, "REQUESTED, GRANTED, one EXPIRED");
}
