//! Integration tests
//!
//! Everything runs against an in-memory SQLite database and a scripted
//! remote runner, so no network or Dokku host is needed.

mod pipeline;
mod streaming;
mod sync;

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::sync::{mpsc, watch};

use vantage::db;
use vantage::domain::{Deployment, Host};
use vantage::ssh::{CommandOutput, HostConnection, RemoteRunner, SshError};

/// One scripted response: any command containing `pattern` gets this
/// exit code and output. First match wins; unmatched commands succeed
/// silently.
pub struct Rule {
    pub pattern: &'static str,
    pub exit_code: i32,
    pub output: &'static str,
}

/// Scripted stand-in for the SSH executor. Records every command it
/// was asked to run, in order.
pub struct FakeRunner {
    rules: Vec<Rule>,
    commands: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl FakeRunner {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules,
            commands: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Make every command take this long, for concurrency tests
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// Index of the first recorded command containing `pattern`
    pub fn position_of(&self, pattern: &str) -> Option<usize> {
        self.commands().iter().position(|c| c.contains(pattern))
    }
}

#[async_trait]
impl RemoteRunner for FakeRunner {
    async fn execute(
        &self,
        _conn: &HostConnection,
        command: &str,
        _timeout: Duration,
    ) -> Result<CommandOutput, SshError> {
        self.commands.lock().unwrap().push(command.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        for rule in &self.rules {
            if command.contains(rule.pattern) {
                return Ok(CommandOutput {
                    output: rule.output.to_string(),
                    exit_code: rule.exit_code,
                });
            }
        }
        Ok(CommandOutput {
            output: String::new(),
            exit_code: 0,
        })
    }

    async fn stream(
        &self,
        _conn: &HostConnection,
        command: &str,
        lines: mpsc::Sender<String>,
        stop: watch::Receiver<bool>,
    ) -> Result<(), SshError> {
        self.commands.lock().unwrap().push(command.to_string());

        let mut n = 0u32;
        loop {
            if *stop.borrow() {
                return Ok(());
            }
            n += 1;
            if lines.send(format!("app log line {}", n)).await.is_err() {
                return Ok(());
            }
            let mut stop = stop.clone();
            tokio::select! {
                _ = stop.changed() => {}
                _ = tokio::time::sleep(Duration::from_millis(10)) => {}
            }
        }
    }
}

/// Seed one connected host and one deployment pointing at it
pub async fn seed_deployment(pool: &SqlitePool) -> (Host, Deployment) {
    let mut host = Host::new("prod".into(), "203.0.113.9".into(), "root".into());
    host.password = Some("secret".into());
    db::create_host(pool, &host).await.unwrap();
    db::update_connection_result(
        pool,
        host.id,
        vantage::domain::ConnectionStatus::Connected,
        None,
    )
    .await
    .unwrap();

    let deployment = Deployment::new(
        host.id,
        "Demo".into(),
        "demo".into(),
        "https://github.com/org/demo.git".into(),
    );
    db::create_deployment(pool, &deployment).await.unwrap();

    let host = db::get_host(pool, host.id).await.unwrap().unwrap();
    (host, deployment)
}
