//! Live log streaming tests

use std::sync::Arc;
use std::time::Duration;

use vantage::config::SshConfig;
use vantage::db;
use vantage::events::{deploy_log_topic, Notifier, NotifierMessage};
use vantage::hosts::HostOps;

use super::{seed_deployment, FakeRunner};

#[tokio::test]
async fn test_log_stream_broadcasts_and_stops() {
    let pool = db::init_database("sqlite::memory:").await.unwrap();
    let (_host, deployment) = seed_deployment(&pool).await;

    let runner = Arc::new(FakeRunner::new(Vec::new()));
    let notifier = Notifier::new();
    let mut rx = notifier.subscribe();
    let host_ops = HostOps::new(pool, runner.clone(), notifier, SshConfig::default());

    assert!(host_ops.start_log_stream(deployment.id).await.unwrap());
    // A second start while streaming is a no-op
    assert!(!host_ops.start_log_stream(deployment.id).await.unwrap());

    // Log lines arrive on the deployment topic
    let topic = deploy_log_topic(deployment.id);
    let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("no log line arrived")
        .unwrap();
    assert_eq!(first.topic, topic);
    assert!(matches!(first.message, NotifierMessage::LogMessage { .. }));

    // The stop signal ends the stream promptly
    assert!(host_ops.stop_log_stream(deployment.id));
    tokio::time::sleep(Duration::from_millis(100)).await;
    while rx.try_recv().is_ok() {}
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err(), "lines kept arriving after stop");

    // Stopping again reports nothing to stop
    assert!(!host_ops.stop_log_stream(deployment.id));

    // The slot is free for a new stream
    assert!(host_ops.start_log_stream(deployment.id).await.unwrap());
}

#[tokio::test]
async fn test_stream_command_targets_the_app() {
    let pool = db::init_database("sqlite::memory:").await.unwrap();
    let (_host, deployment) = seed_deployment(&pool).await;

    let runner = Arc::new(FakeRunner::new(Vec::new()));
    let host_ops = HostOps::new(pool, runner.clone(), Notifier::new(), SshConfig::default());

    host_ops.start_log_stream(deployment.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let commands = runner.commands();
    assert!(commands.iter().any(|c| c.contains("dokku logs") && c.contains("demo")));

    host_ops.stop_log_stream(deployment.id);
}
