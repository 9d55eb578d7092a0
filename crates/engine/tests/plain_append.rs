//! A file that only grows converges byte-for-byte, and a subsequent append
//! converges within a couple of seconds.

mod common;

use std::fs;
use std::io::Write;
use std::time::Duration;

#[tokio::test]
async fn plain_append_converges() {
    let harness = common::Harness::start(false, false).await;
    fs::write(harness.source_dir.path().join("a.log"), b"0123456789").unwrap();

    let target = harness.mirror_path("a.log");
    assert!(
        harness
            .wait_for(Duration::from_secs(2), || {
                fs::read(&target).ok().as_deref() == Some(b"0123456789".as_slice())
            })
            .await,
        "target file never converged to the initial content"
    );

    let mut file = fs::OpenOptions::new()
        .append(true)
        .open(harness.source_dir.path().join("a.log"))
        .unwrap();
    file.write_all(b"abc").unwrap();
    drop(file);

    assert!(
        harness
            .wait_for(Duration::from_secs(2), || {
                fs::read(&target).ok().as_deref() == Some(b"0123456789abc".as_slice())
            })
            .await,
        "target file never converged after the append"
    );

    harness.shutdown().await;
}
