//! Synchronizer tests against the scripted runner

use std::sync::Arc;

use vantage::config::SshConfig;
use vantage::db;
use vantage::domain::EnvVar;
use vantage::events::{deploy_log_topic, Notifier, NotifierMessage, TopicMessage};
use vantage::hosts::HostOps;
use vantage::sync::{DomainRequest, DomainSynchronizer, EnvVarSynchronizer};

use super::{seed_deployment, FakeRunner, Rule};

/// Drain everything currently on the broadcast channel
fn drain(rx: &mut tokio::sync::broadcast::Receiver<TopicMessage>) -> Vec<TopicMessage> {
    let mut messages = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        messages.push(msg);
    }
    messages
}

fn log_lines(messages: &[TopicMessage]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| match &m.message {
            NotifierMessage::LogMessage { message, .. } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_replace_domains_enables_ssl_and_reads_certificate_back() {
    let pool = db::init_database("sqlite::memory:").await.unwrap();
    let (_host, deployment) = seed_deployment(&pool).await;

    let runner = Arc::new(FakeRunner::new(vec![
        Rule {
            pattern: "plugin:list",
            exit_code: 0,
            output: "letsencrypt  0.20.4  enabled",
        },
        Rule {
            pattern: "letsencrypt:enable",
            exit_code: 0,
            output: "Certificate retrieved successfully",
        },
        Rule {
            pattern: "letsencrypt:list",
            exit_code: 0,
            output: "demo  2026-11-25 09:00:00  89d",
        },
    ]));
    let notifier = Notifier::new();
    let mut rx = notifier.subscribe();
    let sync = DomainSynchronizer::new(
        pool.clone(),
        runner.clone(),
        notifier,
        SshConfig::default(),
    );

    let requests = [DomainRequest {
        name: "app.example.com".into(),
        ssl: true,
    }];
    let domains = sync.replace_domains(deployment.id, &requests).await.unwrap();
    assert_eq!(domains.len(), 1);
    assert!(domains[0].configured);
    assert!(domains[0].ssl_enabled);

    // Enable first, then the certificate list read-back
    let add = runner.position_of("domains:add").unwrap();
    let enable = runner.position_of("letsencrypt:enable").unwrap();
    let list = runner.position_of("letsencrypt:list").unwrap();
    assert!(add < enable && enable < list);

    // Progress was broadcast on the deployment topic
    let messages = drain(&mut rx);
    assert!(messages
        .iter()
        .all(|m| m.topic == deploy_log_topic(deployment.id)));
    let lines = log_lines(&messages);
    assert!(lines.iter().any(|l| l.contains("Added domain app.example.com")));
    assert!(lines.iter().any(|l| l.contains("SSL certificate active")));
}

#[tokio::test]
async fn test_pending_certificate_is_not_marked_active() {
    let pool = db::init_database("sqlite::memory:").await.unwrap();
    let (_host, deployment) = seed_deployment(&pool).await;

    // Enable exits 0, but the certificate list does not carry the app
    let runner = Arc::new(FakeRunner::new(vec![
        Rule {
            pattern: "plugin:list",
            exit_code: 0,
            output: "letsencrypt  0.20.4  enabled",
        },
        Rule {
            pattern: "letsencrypt:list",
            exit_code: 0,
            output: "other-app  2026-10-01 09:00:00  40d",
        },
    ]));
    let sync = DomainSynchronizer::new(
        pool.clone(),
        runner,
        Notifier::new(),
        SshConfig::default(),
    );

    let requests = [DomainRequest {
        name: "app.example.com".into(),
        ssl: true,
    }];
    let domains = sync.replace_domains(deployment.id, &requests).await.unwrap();
    assert!(domains[0].configured);
    assert!(!domains[0].ssl_enabled);
}

#[tokio::test]
async fn test_failed_domain_add_leaves_local_set_and_broadcasts_error() {
    let pool = db::init_database("sqlite::memory:").await.unwrap();
    let (_host, deployment) = seed_deployment(&pool).await;

    let existing = vantage::domain::DomainConfig::new(deployment.id, "kept.example.com".into());
    db::create_domain(&pool, &existing).await.unwrap();

    let runner = Arc::new(FakeRunner::new(vec![Rule {
        pattern: "domains:add",
        exit_code: 1,
        output: "nginx: configuration test failed",
    }]));
    let notifier = Notifier::new();
    let mut rx = notifier.subscribe();
    let sync = DomainSynchronizer::new(
        pool.clone(),
        runner,
        notifier,
        SshConfig::default(),
    );

    let requests = [DomainRequest {
        name: "broken.example.com".into(),
        ssl: false,
    }];
    let result = sync.replace_domains(deployment.id, &requests).await;
    assert!(result.is_err());

    // The stored set was not replaced
    let domains = db::list_domains(&pool, deployment.id).await.unwrap();
    assert_eq!(domains.len(), 1);
    assert_eq!(domains[0].domain_name, "kept.example.com");

    let messages = drain(&mut rx);
    assert!(messages
        .iter()
        .any(|m| matches!(&m.message, NotifierMessage::Error { message, .. }
            if message.contains("domains:add"))));
}

#[tokio::test]
async fn test_remove_domain_detaches_remote_then_deletes_row() {
    let pool = db::init_database("sqlite::memory:").await.unwrap();
    let (_host, deployment) = seed_deployment(&pool).await;

    let domain = vantage::domain::DomainConfig::new(deployment.id, "old.example.com".into());
    db::create_domain(&pool, &domain).await.unwrap();

    let runner = Arc::new(FakeRunner::new(vec![]));
    let sync = DomainSynchronizer::new(
        pool.clone(),
        runner.clone(),
        Notifier::new(),
        SshConfig::default(),
    );

    sync.remove_domain(domain.id).await.unwrap();

    let index = runner.position_of("domains:remove").unwrap();
    assert!(runner.commands()[index].contains("'old.example.com'"));
    assert!(db::list_domains(&pool, deployment.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_env_sync_broadcasts_progress() {
    let pool = db::init_database("sqlite::memory:").await.unwrap();
    let (_host, deployment) = seed_deployment(&pool).await;

    for (key, value) in [("RAILS_ENV", "production"), ("SECRET_KEY_BASE", "abc123")] {
        let var = EnvVar {
            id: uuid::Uuid::new_v4(),
            deployment_id: deployment.id,
            key: key.into(),
            value: value.into(),
        };
        db::set_env_var(&pool, &var).await.unwrap();
    }

    let runner = Arc::new(FakeRunner::new(vec![Rule {
        pattern: "config:set",
        exit_code: 0,
        output: "Setting config vars\nRestarting app",
    }]));
    let notifier = Notifier::new();
    let mut rx = notifier.subscribe();
    let sync = EnvVarSynchronizer::new(
        pool.clone(),
        runner.clone(),
        notifier,
        SshConfig::default(),
    );

    sync.sync(deployment.id).await.unwrap();

    let command_index = runner.position_of("config:set").unwrap();
    let command = &runner.commands()[command_index];
    assert!(command.contains("RAILS_ENV='production'"));

    let lines = log_lines(&drain(&mut rx));
    assert!(lines.iter().any(|l| l.contains("Setting 2 environment variables")));
    assert!(lines.iter().any(|l| l.contains("✓ Environment variables configured")));
}

#[tokio::test]
async fn test_adhoc_command_runs_against_the_app_and_broadcasts() {
    let pool = db::init_database("sqlite::memory:").await.unwrap();
    let (_host, deployment) = seed_deployment(&pool).await;

    let runner = Arc::new(FakeRunner::new(vec![Rule {
        pattern: "ps:restart",
        exit_code: 0,
        output: "Restarting app demo\n=====> done",
    }]));
    let notifier = Notifier::new();
    let mut rx = notifier.subscribe();
    let host_ops = HostOps::new(
        pool.clone(),
        runner.clone(),
        notifier,
        SshConfig::default(),
    );

    let output = host_ops
        .run_command(deployment.id, "ps:restart")
        .await
        .unwrap();
    assert_eq!(output.exit_code, 0);

    let index = runner.position_of("ps:restart").unwrap();
    assert_eq!(runner.commands()[index], "dokku ps:restart 'demo'");

    let lines = log_lines(&drain(&mut rx));
    assert!(lines.iter().any(|l| l == "$ dokku ps:restart 'demo'"));
    assert!(lines.iter().any(|l| l.contains("Restarting app demo")));
}

#[tokio::test]
async fn test_adhoc_command_failure_broadcasts_error() {
    let pool = db::init_database("sqlite::memory:").await.unwrap();
    let (_host, deployment) = seed_deployment(&pool).await;

    let runner = Arc::new(FakeRunner::new(vec![Rule {
        pattern: "ps:stop",
        exit_code: 1,
        output: "App demo is not running",
    }]));
    let notifier = Notifier::new();
    let mut rx = notifier.subscribe();
    let host_ops = HostOps::new(pool.clone(), runner, notifier, SshConfig::default());

    let output = host_ops
        .run_command(deployment.id, "ps:stop")
        .await
        .unwrap();
    assert_eq!(output.exit_code, 1);

    let messages = drain(&mut rx);
    assert!(messages
        .iter()
        .any(|m| matches!(&m.message, NotifierMessage::Error { message, .. }
            if message.contains("exited 1"))));
}
