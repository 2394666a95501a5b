//! Integration tests for the query worker pool.

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use common::{FakeCloud, ScriptedLoader, StaticStore, binary_detector, detectors, engine};
use edgelens::config::InferenceProfile;
use edgelens::engine::{ImageQuery, QueryOutcome, WorkerPool};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_pool_answers_queries_then_shuts_down() {
    let configs = detectors(&[("det_door", binary_detector(0.8, InferenceProfile::Default))]);
    let engine = Arc::new(engine(
        &configs,
        Arc::new(StaticStore::default()),
        ScriptedLoader::new("YES", 0.95, 1.0),
        Arc::new(FakeCloud::default()),
    ));
    let pool = WorkerPool::start(engine, 2, 4);
    assert_eq!(pool.capacity(), 4);

    let (first, second) = tokio::join!(
        pool.submit(ImageQuery::new("det_door", b"img-1".as_slice())),
        pool.submit(ImageQuery::new("det_door", b"img-2".as_slice())),
    );
    for outcome in [first.unwrap(), second.unwrap()] {
        match outcome {
            QueryOutcome::Answered(response) => assert_eq!(response.label, "YES"),
            QueryOutcome::Accepted(accepted) => panic!("expected an answer, got {accepted:?}"),
        }
    }
    assert_eq!(pool.available(), 4);

    tokio::time::timeout(Duration::from_secs(2), pool.shutdown())
        .await
        .unwrap();
}
