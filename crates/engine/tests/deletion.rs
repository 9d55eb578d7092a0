//! Unlinking a watched file on the source propagates as a tombstone,
//! removing it from the target mirror.

mod common;

use std::fs;
use std::time::Duration;

#[tokio::test]
async fn deletion_removes_file_from_mirror() {
    let harness = common::Harness::start(false, false).await;
    let source_path = harness.source_dir.path().join("a.log");
    fs::write(&source_path, b"0123456789").unwrap();

    let target = harness.mirror_path("a.log");
    assert!(
        harness
            .wait_for(Duration::from_secs(2), || {
                fs::read(&target).ok().as_deref() == Some(b"0123456789".as_slice())
            })
            .await,
        "target never converged before deletion"
    );

    fs::remove_file(&source_path).unwrap();

    assert!(
        harness
            .wait_for(Duration::from_secs(2), || !target.exists())
            .await,
        "target file was never removed after source deletion"
    );

    harness.shutdown().await;
}
