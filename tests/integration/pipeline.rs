//! End-to-end pipeline tests against the scripted runner

use std::sync::Arc;
use std::time::Duration;

use vantage::config::{DeployConfig, SshConfig};
use vantage::db;
use vantage::deploy::{DeployPipeline, PipelineError};
use vantage::domain::{AttemptStatus, DeploymentStatus};
use vantage::events::{Notifier, NotifierMessage};

use super::{seed_deployment, FakeRunner, Rule};

fn success_rules() -> Vec<Rule> {
    vec![
        Rule {
            pattern: "apps:exists",
            exit_code: 0,
            output: "",
        },
        Rule {
            pattern: "git clone",
            exit_code: 0,
            output: "Cloning into 'repo'...",
        },
        Rule {
            pattern: "ssh-keygen -lf",
            exit_code: 0,
            output: "SHA256:abc123",
        },
        Rule {
            pattern: "ssh-keys:list",
            exit_code: 0,
            output: "SHA256:abc123 NAME=\"vantage-deploy\"",
        },
        Rule {
            pattern: "push dokku",
            exit_code: 0,
            output: "remote: Deploying demo...\nremote: =====> Application deployed",
        },
        Rule {
            pattern: "ps:report",
            exit_code: 0,
            output: "Status web 1: running",
        },
        Rule {
            pattern: "dokku url",
            exit_code: 0,
            output: "http://demo.203.0.113.9.nip.io",
        },
    ]
}

fn pipeline_with(
    pool: sqlx::SqlitePool,
    runner: Arc<FakeRunner>,
    notifier: Notifier,
) -> DeployPipeline {
    DeployPipeline::new(
        pool,
        runner,
        notifier,
        SshConfig::default(),
        DeployConfig::default(),
    )
}

#[tokio::test]
async fn test_pipeline_success_end_to_end() {
    let pool = db::init_database("sqlite::memory:").await.unwrap();
    let (_host, deployment) = seed_deployment(&pool).await;

    let runner = Arc::new(FakeRunner::new(success_rules()));
    let notifier = Notifier::new();
    let mut rx = notifier.subscribe();
    let pipeline = pipeline_with(pool.clone(), runner.clone(), notifier);

    let outcome = pipeline.run(deployment.id).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.attempt_number, 1);

    // The attempt record is terminal and carries the full log
    let attempt = db::get_attempt(&pool, outcome.attempt_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(attempt.status, AttemptStatus::Success);
    assert!(attempt.completed_at.is_some());
    assert!(attempt.log_text.contains("✓ Git push completed"));
    assert!(attempt.log_text.contains("Verifying deployment..."));
    assert!(attempt.log_text.contains("✓ App is running on Dokku"));
    // Every line carries the timestamp prefix
    assert!(attempt.log_text.lines().all(|l| l.starts_with('[')));

    // Deployment state moved forward and picked up the reported URL
    let deployment = db::get_deployment(&pool, deployment.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Deployed);
    assert_eq!(
        deployment.public_url.as_deref(),
        Some("http://demo.203.0.113.9.nip.io")
    );
    assert!(deployment.last_deployed_at.is_some());

    // Steps ran in order, and cleanup came last
    let check = runner.position_of("apps:exists").unwrap();
    let clone = runner.position_of("git clone").unwrap();
    let push = runner.position_of("push dokku").unwrap();
    let verify = runner.position_of("ps:report").unwrap();
    let cleanup = runner.position_of("rm -rf").unwrap();
    assert!(check < clone && clone < push && push < verify && verify < cleanup);
    assert_eq!(cleanup, runner.commands().len() - 1);

    // The final broadcast is the completion event
    let mut last_completed = None;
    while let Ok(msg) = rx.try_recv() {
        if let NotifierMessage::Completed { success, .. } = msg.message {
            last_completed = Some(success);
        }
    }
    assert_eq!(last_completed, Some(true));
}

#[tokio::test]
async fn test_rejected_push_fails_the_attempt() {
    let pool = db::init_database("sqlite::memory:").await.unwrap();
    let (_host, deployment) = seed_deployment(&pool).await;

    let mut rules = success_rules();
    rules.retain(|r| r.pattern != "push dokku" && r.pattern != "ps:report");
    rules.push(Rule {
        pattern: "push dokku",
        exit_code: 1,
        output: "! [remote rejected] main -> main (pre-receive hook declined)",
    });
    rules.push(Rule {
        pattern: "ps:report",
        exit_code: 0,
        output: "Status web 1: stopped",
    });

    let runner = Arc::new(FakeRunner::new(rules));
    let pipeline = pipeline_with(pool.clone(), runner.clone(), Notifier::new());

    let outcome = pipeline.run(deployment.id).await.unwrap();
    assert!(!outcome.success);
    assert!(outcome.error.is_some());

    let attempt = db::get_attempt(&pool, outcome.attempt_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(attempt.status, AttemptStatus::Failed);
    assert!(attempt.log_text.contains("[remote rejected]"));

    let deployment = db::get_deployment(&pool, deployment.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Failed);

    // Verification and cleanup still ran after the failed push
    assert!(runner.position_of("ps:report").is_some());
    assert!(runner.position_of("rm -rf").is_some());
}

#[tokio::test]
async fn test_verification_still_runs_after_failed_clone() {
    let pool = db::init_database("sqlite::memory:").await.unwrap();
    let (_host, deployment) = seed_deployment(&pool).await;

    let mut rules = success_rules();
    rules.retain(|r| r.pattern != "git clone" && r.pattern != "ps:report");
    // Both the branch clone and the fallback clone hit this
    rules.insert(
        0,
        Rule {
            pattern: "git clone",
            exit_code: 128,
            output: "fatal: repository 'https://github.com/org/demo.git/' not found",
        },
    );
    rules.push(Rule {
        pattern: "ps:report",
        exit_code: 0,
        output: "Status web 1: stopped",
    });

    let runner = Arc::new(FakeRunner::new(rules));
    let pipeline = pipeline_with(pool.clone(), runner.clone(), Notifier::new());

    let outcome = pipeline.run(deployment.id).await.unwrap();
    assert!(!outcome.success);

    // Verification is best-effort: it ran even though the clone failed,
    // and cleanup still came last
    let clone = runner.position_of("git clone").unwrap();
    let verify = runner.position_of("ps:report").unwrap();
    let cleanup = runner.position_of("rm -rf").unwrap();
    assert!(clone < verify && verify < cleanup);
    assert_eq!(cleanup, runner.commands().len() - 1);

    // The push was never attempted against a missing working copy
    assert!(runner.position_of("push dokku").is_none());

    let attempt = db::get_attempt(&pool, outcome.attempt_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(attempt.status, AttemptStatus::Failed);
    assert!(attempt.log_text.contains("clone failed"));
}

#[tokio::test]
async fn test_second_trigger_is_rejected_while_running() {
    let pool = db::init_database("sqlite::memory:").await.unwrap();
    let (_host, deployment) = seed_deployment(&pool).await;

    let runner =
        Arc::new(FakeRunner::new(success_rules()).with_delay(Duration::from_millis(50)));
    let pipeline = Arc::new(pipeline_with(pool.clone(), runner, Notifier::new()));

    let first = {
        let pipeline = pipeline.clone();
        let id = deployment.id;
        tokio::spawn(async move { pipeline.run(id).await })
    };

    // Give the first run time to take the lease
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = pipeline.run(deployment.id).await;
    assert!(matches!(second, Err(PipelineError::AttemptInProgress(_))));

    let outcome = first.await.unwrap().unwrap();
    assert!(outcome.success);

    // Only the first run produced an attempt
    let attempts = db::list_attempts(&pool, deployment.id).await.unwrap();
    assert_eq!(attempts.len(), 1);

    // The lease is free again
    let rerun = pipeline.run(deployment.id).await.unwrap();
    assert_eq!(rerun.attempt_number, 2);
}

#[tokio::test]
async fn test_lease_taken_before_handing_off_to_background() {
    let pool = db::init_database("sqlite::memory:").await.unwrap();
    let (_host, deployment) = seed_deployment(&pool).await;

    let runner =
        Arc::new(FakeRunner::new(success_rules()).with_delay(Duration::from_millis(50)));
    let pipeline = Arc::new(pipeline_with(pool.clone(), runner, Notifier::new()));

    // The HTTP handler's shape: take the lease first, then spawn.
    // A duplicate trigger must fail here, synchronously.
    let lease = pipeline.acquire_lease(deployment.id).unwrap();
    let duplicate = pipeline.acquire_lease(deployment.id);
    assert!(matches!(
        duplicate,
        Err(PipelineError::AttemptInProgress(_))
    ));

    let background = {
        let pipeline = pipeline.clone();
        let id = deployment.id;
        tokio::spawn(async move { pipeline.run_locked(id, lease).await })
    };
    let outcome = background.await.unwrap().unwrap();
    assert!(outcome.success);

    // The guard released the lease when the run finished
    assert!(pipeline.acquire_lease(deployment.id).is_ok());
}

#[tokio::test]
async fn test_created_app_when_missing() {
    let pool = db::init_database("sqlite::memory:").await.unwrap();
    let (_host, deployment) = seed_deployment(&pool).await;

    let mut rules = success_rules();
    rules.retain(|r| r.pattern != "apps:exists");
    rules.insert(
        0,
        Rule {
            pattern: "apps:exists",
            exit_code: 1,
            output: "App demo does not exist",
        },
    );
    rules.insert(
        1,
        Rule {
            pattern: "apps:create",
            exit_code: 0,
            output: "Creating demo...",
        },
    );

    let runner = Arc::new(FakeRunner::new(rules));
    let pipeline = pipeline_with(pool.clone(), runner.clone(), Notifier::new());

    let outcome = pipeline.run(deployment.id).await.unwrap();
    assert!(outcome.success);

    let create = runner.position_of("apps:create").unwrap();
    let clone = runner.position_of("git clone").unwrap();
    assert!(create < clone);
}
