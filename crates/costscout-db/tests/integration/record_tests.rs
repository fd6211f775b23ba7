use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use costscout_core::models::Record;
use costscout_core::traits::RecordStore;
use costscout_db::{CostDataRepository, Database};

use crate::integration::common::setup_test_db;

fn record(source: &str, item: &str, price: f64) -> Record {
    let mut record = Record::new(source, "fencing", item, price);
    record.subcategory = Some("wood".into());
    record.location = "Austin, TX".into();
    record.unit = "linear ft".into();
    record.source_url = format!("https://{source}.example.com/{item}");
    record.confidence = 0.9;
    record
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn create_and_read_back() {
    let (pool, _container) = setup_test_db().await;
    let repo = CostDataRepository::new(pool);

    let mut original = record("homeadvisor", "cedar-fence", 32.5);
    original.price_min = Some(25.0);
    original.price_max = Some(40.0);
    original.sample_size = Some(1200);
    original.tags = vec!["install".into(), "labor".into()];
    original.attributes = BTreeMap::from([("strategy".to_string(), "cards".to_string())]);

    let id = repo.create(&original).await.unwrap();
    assert!(!id.is_nil());

    let stored = repo.recent(Some("homeadvisor"), 10).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, id);
    let back = &stored[0].record;
    assert_eq!(back.item_name, "cedar-fence");
    assert_eq!(back.price_min, Some(25.0));
    assert_eq!(back.sample_size, Some(1200));
    assert_eq!(back.tags, original.tags);
    assert_eq!(back.attributes, original.attributes);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn recent_is_newest_first_and_filtered() {
    let (pool, _container) = setup_test_db().await;
    let repo = CostDataRepository::new(pool);

    let mut old = record("lowes", "old", 10.0);
    old.recorded_at = Utc::now() - Duration::days(2);
    repo.create(&old).await.unwrap();
    repo.create(&record("lowes", "new", 11.0)).await.unwrap();
    repo.create(&record("homedepot", "other", 12.0)).await.unwrap();

    let lowes = repo.recent(Some("lowes"), 10).await.unwrap();
    let names: Vec<_> = lowes.iter().map(|s| s.record.item_name.as_str()).collect();
    assert_eq!(names, vec!["new", "old"]);

    let all = repo.recent(None, 2).await.unwrap();
    assert_eq!(all.len(), 2);

    let counts = repo.count_by_source().await.unwrap();
    assert_eq!(counts["lowes"], 2);
    assert_eq!(counts["homedepot"], 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn non_positive_price_is_rejected_by_the_schema() {
    let (pool, _container) = setup_test_db().await;
    let repo = CostDataRepository::new(pool);

    let mut bad = record("lowes", "free", 1.0);
    bad.price = 0.0;
    let err = RecordStore::create(&repo, &bad).await.unwrap_err();
    assert!(matches!(err, costscout_core::AppError::DatabaseError(_)));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn health_check_and_repeat_migrations() {
    let (pool, _container) = setup_test_db().await;
    let db = Database::from_pool(pool);

    db.migrate().await.unwrap();
    db.records().health_check().await.unwrap();
}
