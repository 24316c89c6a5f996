use async_trait::async_trait;
use retrospector::app::App;
use retrospector::config::Config;
use retrospector::error::{ErrorKind, Result, RetroError};
use retrospector::model::{Entity, Ioc, Value, ValueType};
use retrospector::repository::{MemoryRepository, Repository};
use retrospector::transport::{with_write_queue, BlobLocation, EntityTransport, MemoryBlobStore};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REGION: &str = "us-east-5";
const BUCKET: &str = "blue";
const KEY: &str = "my/entity-matched";

/// S3 event wrapped in an SNS notification wrapped in an SQS record
fn sqs_event(region: &str, bucket: &str, key: &str) -> String {
    sqs_event_for(region, bucket, &[key])
}

/// One SQS record per key, each carrying its own S3 event
fn sqs_event_for(region: &str, bucket: &str, keys: &[&str]) -> String {
    let records: Vec<serde_json::Value> = keys
        .iter()
        .map(|key| {
            let s3_event = json!({
                "Records": [{
                    "awsRegion": region,
                    "s3": {
                        "bucket": { "name": bucket },
                        "object": { "key": key }
                    }
                }]
            });
            let sns_entity = json!({ "Message": s3_event.to_string() });
            json!({ "body": sns_entity.to_string() })
        })
        .collect();
    json!({ "Records": records }).to_string()
}

fn seeded_transport() -> EntityTransport {
    let store = Arc::new(MemoryBlobStore::new());
    let transport = EntityTransport::new(store);

    with_write_queue(
        transport.store().as_ref(),
        BlobLocation::new(REGION, BUCKET, KEY),
        Default::default(),
        |queue| {
            queue.write(Entity::new(
                Value::domain("five"),
                "",
                "timeless",
                chrono::Utc::now().timestamp(),
            ))
        },
    )
    .unwrap();

    transport
}

fn app_for(server: &MockServer, repo: Arc<dyn Repository>, transport: EntityTransport) -> App {
    app_with_batch(server, repo, transport, 1)
}

fn app_with_batch(
    server: &MockServer,
    repo: Arc<dyn Repository>,
    transport: EntityTransport,
    match_batch_size: usize,
) -> App {
    let mut config = Config::default();
    config.notify.webhook_url = Some(format!("{}/slack", server.uri()));
    config.pipeline.match_batch_size = match_batch_size;
    App::new(repo, transport, &config).unwrap()
}

async fn repo_with_ioc(value: Value) -> Arc<MemoryRepository> {
    let repo = Arc::new(MemoryRepository::new());
    repo.put_iocs(&[Ioc::of(value)]).await.unwrap();
    repo
}

#[tokio::test]
async fn test_matched_entity_sends_one_alert() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/slack"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let repo = repo_with_ioc(Value::domain("five")).await;
    let app = app_for(&server, repo, seeded_transport());

    let detections = app
        .detector()
        .unwrap()
        .handle(&sqs_event(REGION, BUCKET, KEY))
        .await
        .unwrap();

    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].location, BlobLocation::new(REGION, BUCKET, KEY));
    assert_eq!(detections[0].scanned, 1);
    assert!(detections[0].notified());

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let text = body["text"].as_str().unwrap();
    assert!(text.contains("s3://blue/my/entity-matched"), "{}", text);
}

#[tokio::test]
async fn test_mismatched_by_data_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let repo = repo_with_ioc(Value::domain("six")).await;
    let app = app_for(&server, repo, seeded_transport());

    let detections = app
        .detector()
        .unwrap()
        .handle(&sqs_event(REGION, BUCKET, KEY))
        .await
        .unwrap();

    assert_eq!(detections.len(), 1);
    assert!(!detections[0].notified());
}

#[tokio::test]
async fn test_mismatched_by_type_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let repo = repo_with_ioc(Value::new("five", ValueType::IpAddr)).await;
    let app = app_for(&server, repo, seeded_transport());

    let detections = app
        .detector()
        .unwrap()
        .handle(&sqs_event(REGION, BUCKET, KEY))
        .await
        .unwrap();

    assert!(!detections[0].notified());
}

#[tokio::test]
async fn test_empty_blob_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let transport = EntityTransport::new(Arc::new(MemoryBlobStore::new()));
    transport
        .write_queue(BlobLocation::new(REGION, BUCKET, "empty"))
        .unwrap()
        .close()
        .unwrap();

    let repo = repo_with_ioc(Value::domain("five")).await;
    let app = app_for(&server, repo, transport);

    let detections = app
        .detector()
        .unwrap()
        .handle(&sqs_event(REGION, BUCKET, "empty"))
        .await
        .unwrap();

    assert_eq!(detections[0].scanned, 0);
    assert!(!detections[0].notified());
}

struct FailingRepository;

#[async_trait]
impl Repository for FailingRepository {
    async fn put_entities(&self, _entities: &[Entity]) -> Result<()> {
        Err(RetroError::Storage("table unavailable".to_string()))
    }

    async fn query_entities(&self, _values: &[Value]) -> Result<Vec<Entity>> {
        Err(RetroError::Storage("table unavailable".to_string()))
    }

    async fn put_iocs(&self, _iocs: &[Ioc]) -> Result<()> {
        Err(RetroError::Storage("table unavailable".to_string()))
    }

    async fn query_iocs(&self, _values: &[Value]) -> Result<Vec<Ioc>> {
        Err(RetroError::Storage("table unavailable".to_string()))
    }
}

#[tokio::test]
async fn test_repository_failure_aborts_without_alert() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let app = app_for(&server, Arc::new(FailingRepository), seeded_transport());

    let err = app
        .detector()
        .unwrap()
        .handle(&sqs_event(REGION, BUCKET, KEY))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Storage);
    assert!(err.is_retryable());
    assert_eq!(err.value("stage"), Some("matching"));
    assert_eq!(err.value("value"), Some("domain_name:five"));
}

#[tokio::test]
async fn test_webhook_error_status_is_notification_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/slack"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let repo = repo_with_ioc(Value::domain("five")).await;
    let app = app_for(&server, repo, seeded_transport());

    let err = app
        .detector()
        .unwrap()
        .handle(&sqs_event(REGION, BUCKET, KEY))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Notification);
    assert_eq!(err.value("stage"), Some("notifying"));
}

#[tokio::test]
async fn test_missing_blob_is_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let repo = repo_with_ioc(Value::domain("five")).await;
    let app = app_for(&server, repo, seeded_transport());

    let err = app
        .detector()
        .unwrap()
        .handle(&sqs_event(REGION, BUCKET, "my/never-written"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(
        err.value("location"),
        Some("us-east-5:blue/my/never-written")
    );
}

#[tokio::test]
async fn test_malformed_trigger_is_parse_error() {
    let server = MockServer::start().await;
    let repo = repo_with_ioc(Value::domain("five")).await;
    let app = app_for(&server, repo, seeded_transport());

    let err = app.detector().unwrap().handle("{not json").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_store_then_retro_scan() {
    let server = MockServer::start().await;
    let repo = Arc::new(MemoryRepository::new());
    let app = app_for(&server, repo.clone(), seeded_transport());

    let stored = app
        .entity_store()
        .handle(&sqs_event(REGION, BUCKET, KEY))
        .await
        .unwrap();
    assert_eq!(stored, 1);
    assert_eq!(repo.entity_count().unwrap(), 1);

    // an IOC published later still finds the stored entity
    let found = app
        .service
        .get_entities(&[Ioc::of(Value::domain("five"))])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].source, "timeless");
}

#[tokio::test]
async fn test_failed_location_suppresses_earlier_alerts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let repo = repo_with_ioc(Value::domain("five")).await;
    let app = app_for(&server, repo, seeded_transport());

    // the first blob matches, the second was never written
    let err = app
        .detector()
        .unwrap()
        .handle(&sqs_event_for(REGION, BUCKET, &[KEY, "my/never-written"]))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(
        err.value("location"),
        Some("us-east-5:blue/my/never-written")
    );
}

#[tokio::test]
async fn test_each_matching_location_gets_its_own_alert() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/slack"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let transport = seeded_transport();
    with_write_queue(
        transport.store().as_ref(),
        BlobLocation::new(REGION, BUCKET, "my/second"),
        Default::default(),
        |queue| queue.write(Entity::new(Value::domain("five"), "dns", "", 0)),
    )
    .unwrap();

    let repo = repo_with_ioc(Value::domain("five")).await;
    let app = app_for(&server, repo, transport);

    let detections = app
        .detector()
        .unwrap()
        .handle(&sqs_event_for(REGION, BUCKET, &[KEY, "my/second"]))
        .await
        .unwrap();

    assert_eq!(detections.len(), 2);
    assert!(detections.iter().all(|d| d.notified()));
}

/// Five entities, four of them hitting two distinct IOCs
async fn check_matches_coalesce(match_batch_size: usize) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/slack"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let transport = EntityTransport::new(Arc::new(MemoryBlobStore::new()));
    let location = BlobLocation::new(REGION, BUCKET, "my/many");
    with_write_queue(
        transport.store().as_ref(),
        location.clone(),
        Default::default(),
        |queue| {
            queue.write(Entity::new(Value::domain("five"), "proxy", "", 1))?;
            queue.write(Entity::new(Value::domain("benign.example"), "proxy", "", 2))?;
            queue.write(Entity::new(Value::domain("five"), "dns", "", 3))?;
            queue.write(Entity::new(Value::domain("seven"), "dns", "", 4))?;
            queue.write(Entity::new(Value::domain("five"), "fw", "", 5))
        },
    )
    .unwrap();

    let repo = Arc::new(MemoryRepository::new());
    repo.put_iocs(&[
        Ioc::new(Value::domain("five"), "feed-a", 1),
        Ioc::new(Value::domain("seven"), "feed-b", 1),
    ])
    .await
    .unwrap();
    let app = app_with_batch(&server, repo, transport, match_batch_size);

    let detection = app.detector().unwrap().detect(location).await.unwrap();
    assert_eq!(detection.scanned, 5);

    let alert = detection.alert.expect("alert should be sent");
    let values: Vec<&Value> = alert.matched_values().collect();
    assert_eq!(values, vec![&Value::domain("five"), &Value::domain("seven")]);
    assert_eq!(alert.matches[0].entity_labels, vec!["proxy", "dns", "fw"]);
    assert_eq!(alert.matches[0].ioc_sources, vec!["feed-a"]);

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["attachments"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_matches_coalesce_into_one_alert() {
    check_matches_coalesce(1).await;
}

#[tokio::test]
async fn test_matches_coalesce_with_batched_queries() {
    check_matches_coalesce(3).await;
}
