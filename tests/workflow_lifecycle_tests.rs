//! End-to-end lifecycle tests for the workflow runner: submission returns a
//! pending record immediately, reconciliation happens on worker tasks, and
//! every transition is persisted and broadcast in order.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use quartermaster::config::QuartermasterConfig;
use quartermaster::confluence::ConfluenceClient;
use quartermaster::events::{EventBus, RequestEventKind};
use quartermaster::provisioning::{AccessLevel, AccessRequest, SpaceRequest, WorkflowRunner};
use quartermaster::store::{RequestRecord, RequestStatus, RequestStore};
use quartermaster::vault::Credentials;

struct Harness {
    _dir: tempfile::TempDir,
    store: Arc<RequestStore>,
    bus: EventBus,
    runner: WorkflowRunner,
}

fn harness(server: &MockServer) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RequestStore::new(dir.path().join("requests.json")));
    let bus = EventBus::default();
    let credentials = Credentials {
        username: "svc-quartermaster".to_string(),
        password: "secret".to_string(),
    };
    let client = Arc::new(
        ConfluenceClient::new(&server.uri(), &credentials, Duration::from_secs(5)).unwrap(),
    );
    let mut settings = QuartermasterConfig::default().provisioning;
    settings.settle_max_attempts = 1;
    settings.settle_initial_delay_ms = 10;
    let runner = WorkflowRunner::new(store.clone(), bus.clone(), client, settings);
    Harness {
        _dir: dir,
        store,
        bus,
        runner,
    }
}

fn access_request() -> AccessRequest {
    AccessRequest {
        lan_id: "jdoe".to_string(),
        email: "jdoe@example.com".to_string(),
        domain: "r1-core".to_string(),
        manager: "boss".to_string(),
        requester: "boss".to_string(),
        full_name: "Jane Doe".to_string(),
        space_key: "ENG".to_string(),
        access: AccessLevel::Read,
    }
}

/// Mocks for a clean access grant: user exists and is licensed, groups
/// already exist, membership add succeeds.
async fn mock_clean_access_grant(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/rest/api/user"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "username": "jdoe", "userKey": "key-jdoe" })),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/api/group/confluence-users/member"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "results": [{ "username": "jdoe" }] })),
        )
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/api/admin/group"))
        .respond_with(ResponseTemplate::new(400).set_body_string("Group already exists"))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/api/group/ENG_read/member"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/api/admin/group/ENG_read/add-user"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

async fn wait_for_terminal(store: &RequestStore, id: u64) -> RequestRecord {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(record) = store.get(id).await.unwrap() {
                if record.status.is_terminal() {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("request never reached a terminal state")
}

#[tokio::test]
async fn access_request_walks_pending_processing_completed() {
    let server = MockServer::start().await;
    mock_clean_access_grant(&server).await;
    let h = harness(&server);
    let mut events = h.bus.subscribe();

    let record = h.runner.submit_access(&access_request()).await.unwrap();
    assert_eq!(record.id, 1);
    assert_eq!(record.status, RequestStatus::Pending);

    let terminal = wait_for_terminal(&h.store, record.id).await;
    assert_eq!(terminal.status, RequestStatus::Completed);
    let result = terminal.result.expect("completed record carries a result");
    assert_eq!(result["status"], "success");
    assert_eq!(result["username"], "jdoe");
    assert_eq!(result["access_granted"], "read");
    assert_eq!(result["group"], "ENG_read");

    // Observers saw creation, work start, and the terminal update in order.
    let created = events.recv().await.unwrap();
    assert_eq!(created.event, RequestEventKind::RequestCreated);
    assert_eq!(created.record.status, RequestStatus::Pending);
    let processing = events.recv().await.unwrap();
    assert_eq!(processing.event, RequestEventKind::RequestUpdated);
    assert_eq!(processing.record.status, RequestStatus::Processing);
    let completed = events.recv().await.unwrap();
    assert_eq!(completed.record.status, RequestStatus::Completed);
}

#[tokio::test]
async fn invalid_space_key_ends_blocked_with_comments() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/user"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "username": "admin", "userKey": "key-admin" })),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/api/group/confluence-users/member"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "results": [{ "username": "admin" }] })),
        )
        .mount(&server)
        .await;
    let h = harness(&server);

    let record = h
        .runner
        .submit_space_creation(&SpaceRequest {
            space_name: "Docs".to_string(),
            space_key: "do1".to_string(),
            space_admin: "admin".to_string(),
            description: String::new(),
        })
        .await
        .unwrap();

    let terminal = wait_for_terminal(&h.store, record.id).await;
    assert_eq!(terminal.status, RequestStatus::Blocked);
    assert!(terminal
        .comments
        .iter()
        .any(|c| c.contains("Key must be uppercase letters only")));
    let result = terminal.result.unwrap();
    assert_eq!(result["status"], "blocked");
}

#[tokio::test]
async fn provider_failure_surfaces_raw_error_on_the_record() {
    let server = MockServer::start().await;
    // User setup fails hard on the mandatory creation step.
    Mock::given(method("GET"))
        .and(path("/rest/api/user"))
        .respond_with(ResponseTemplate::new(404).set_body_string("No user found"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/api/admin/user"))
        .respond_with(ResponseTemplate::new(500).set_body_string("directory offline"))
        .mount(&server)
        .await;
    let h = harness(&server);

    let record = h.runner.submit_access(&access_request()).await.unwrap();
    let terminal = wait_for_terminal(&h.store, record.id).await;
    assert_eq!(terminal.status, RequestStatus::Failed);
    assert!(terminal.error.unwrap().contains("directory offline"));
}

#[tokio::test]
async fn concurrent_submissions_get_unique_increasing_ids() {
    let server = MockServer::start().await;
    mock_clean_access_grant(&server).await;
    let h = harness(&server);

    let mut handles = Vec::new();
    for _ in 0..10 {
        let runner = h.runner.clone();
        handles.push(tokio::spawn(async move {
            runner.submit_access(&access_request()).await.unwrap().id
        }));
    }
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }
    ids.sort_unstable();
    assert_eq!(ids, (1..=10).collect::<Vec<u64>>());
}

#[tokio::test]
async fn stats_always_sum_to_total() {
    let server = MockServer::start().await;
    mock_clean_access_grant(&server).await;
    let h = harness(&server);

    for _ in 0..4 {
        h.runner.submit_access(&access_request()).await.unwrap();
    }
    for id in 1..=4 {
        wait_for_terminal(&h.store, id).await;
    }

    let stats = h.store.stats().await.unwrap();
    assert_eq!(stats.total, 4);
    assert_eq!(
        stats.pending + stats.processing + stats.completed + stats.failed + stats.blocked,
        stats.total
    );
    assert_eq!(stats.completed, 4);
}

#[tokio::test]
async fn no_event_ever_leaves_a_terminal_state() {
    let server = MockServer::start().await;
    mock_clean_access_grant(&server).await;
    let h = harness(&server);
    let mut events = h.bus.subscribe();

    for _ in 0..3 {
        h.runner.submit_access(&access_request()).await.unwrap();
    }
    for id in 1..=3 {
        wait_for_terminal(&h.store, id).await;
    }

    // Replay everything observed and check the per-record status walk.
    let mut last_status: std::collections::HashMap<u64, RequestStatus> =
        std::collections::HashMap::new();
    while let Ok(event) = events.try_recv() {
        let previous = last_status.insert(event.record.id, event.record.status);
        if let Some(previous) = previous {
            assert!(
                !previous.is_terminal(),
                "record {} transitioned out of terminal {:?} to {:?}",
                event.record.id,
                previous,
                event.record.status
            );
            let forward = matches!(
                (previous, event.record.status),
                (RequestStatus::Pending, RequestStatus::Processing)
                    | (RequestStatus::Processing, RequestStatus::Completed)
                    | (RequestStatus::Processing, RequestStatus::Failed)
                    | (RequestStatus::Processing, RequestStatus::Blocked)
            );
            assert!(
                forward,
                "record {} made a non-forward transition {:?} -> {:?}",
                event.record.id, previous, event.record.status
            );
        }
    }
}
