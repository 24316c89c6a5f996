use retrospector::model::{Entity, Ioc, Value, ValueType};
use retrospector::repository::{MemoryRepository, Repository, SqliteRepository};
use retrospector::service::RepositoryService;
use std::sync::Arc;
use tempfile::TempDir;

fn unique() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

async fn check_entity_correlation(svc: &RepositoryService) {
    let v1 = unique();
    let v2 = unique();
    let ts = now();

    let data = vec![
        Entity::new(Value::new(&v1, ValueType::DomainName), "blue", "", ts),
        Entity::new(Value::new(&v1, ValueType::IpAddr), "blue_ipaddr", "", ts + 1),
        Entity::new(Value::new(&v2, ValueType::DomainName), "orange1", "", ts),
        Entity::new(Value::new(&v2, ValueType::DomainName), "orange2", "", ts + 1),
    ];
    svc.put_entities(&data).await.unwrap();

    // one entity by one IOC
    let resp = svc
        .get_entities(&[Ioc::of(Value::new(&v1, ValueType::DomainName))])
        .await
        .unwrap();
    assert_eq!(resp, vec![data[0].clone()]);

    // two entities by one IOC
    let resp = svc
        .get_entities(&[Ioc::of(Value::new(&v2, ValueType::DomainName))])
        .await
        .unwrap();
    assert_eq!(resp.len(), 2);
    assert!(resp.contains(&data[2]));
    assert!(resp.contains(&data[3]));

    // same data, different type
    let resp = svc
        .get_entities(&[Ioc::of(Value::new(&v1, ValueType::IpAddr))])
        .await
        .unwrap();
    assert_eq!(resp, vec![data[1].clone()]);

    let resp = svc
        .get_entities(&[Ioc::of(Value::new(&v2, ValueType::Url))])
        .await
        .unwrap();
    assert!(resp.is_empty());
}

async fn check_ioc_correlation(svc: &RepositoryService) {
    let v1 = unique();
    let v2 = unique();
    let ts = now();

    let data = vec![
        Ioc::new(Value::new(&v1, ValueType::FileHashSha256), "blue", ts),
        Ioc::new(Value::new(&v1, ValueType::FileHashSha256), "orange", ts),
        Ioc::new(Value::new(&v2, ValueType::DomainName), "blue", ts + 1),
    ];
    svc.put_ioc_set(&data).await.unwrap();

    let resp = svc
        .get_ioc_set(&[Entity::of(Value::new(&v2, ValueType::DomainName))])
        .await
        .unwrap();
    assert_eq!(resp, vec![data[2].clone()]);

    let resp = svc
        .get_ioc_set(&[Entity::of(Value::new(&v1, ValueType::FileHashSha256))])
        .await
        .unwrap();
    assert_eq!(resp.len(), 2);
    assert!(resp.contains(&data[0]));
    assert!(resp.contains(&data[1]));

    // a batch mixing hits and misses only returns the hits
    let resp = svc
        .get_ioc_set(&[
            Entity::of(Value::new(&v2, ValueType::DomainName)),
            Entity::of(Value::new(unique(), ValueType::DomainName)),
            Entity::of(Value::new(&v1, ValueType::FileHashSha1)),
        ])
        .await
        .unwrap();
    assert_eq!(resp, vec![data[2].clone()]);
}

async fn check_empty_inputs(svc: &RepositoryService) {
    svc.put_entities(&[]).await.unwrap();
    svc.put_ioc_set(&[]).await.unwrap();
    assert!(svc.get_entities(&[]).await.unwrap().is_empty());
    assert!(svc.get_ioc_set(&[]).await.unwrap().is_empty());
}

async fn check_repeated_put(svc: &RepositoryService) {
    let ioc = Ioc::new(Value::domain(unique()), "feed", now());
    svc.put_ioc_set(&[ioc.clone()]).await.unwrap();
    svc.put_ioc_set(&[ioc.clone()]).await.unwrap();

    let resp = svc.get_ioc_set(&[Entity::of(ioc.value.clone())]).await.unwrap();
    assert_eq!(resp, vec![ioc]);
}

async fn check_all(repo: Arc<dyn Repository>) {
    let svc = RepositoryService::new(repo);
    check_entity_correlation(&svc).await;
    check_ioc_correlation(&svc).await;
    check_empty_inputs(&svc).await;
    check_repeated_put(&svc).await;
}

#[tokio::test]
async fn test_memory_repository_service() {
    check_all(Arc::new(MemoryRepository::new())).await;
}

#[tokio::test]
async fn test_sqlite_repository_service() {
    let temp_dir = TempDir::new().unwrap();
    let repo = SqliteRepository::open(&temp_dir.path().join("retrospector.db")).unwrap();
    check_all(Arc::new(repo)).await;
}

#[tokio::test]
async fn test_sqlite_repository_persists_across_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("retrospector.db");
    let ioc = Ioc::new(Value::sha256(unique()), "feed", now());

    {
        let repo = SqliteRepository::open(&db_path).unwrap();
        repo.put_iocs(&[ioc.clone()]).await.unwrap();
    }

    let repo = SqliteRepository::open(&db_path).unwrap();
    let found = repo.query_iocs(&[ioc.value.clone()]).await.unwrap();
    assert_eq!(found, vec![ioc]);

    let stats = repo.stats().unwrap();
    assert_eq!(stats.ioc_count, 1);
    assert_eq!(stats.entity_count, 0);
}
