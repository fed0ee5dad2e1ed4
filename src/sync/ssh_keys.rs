//! SSH key synchronizer
//!
//! Registers the configured public keys with the host's Dokku key
//! store so git pushes authenticate. Idempotent by fingerprint: keys
//! already registered are skipped. The outcome lands on the host's
//! `keys_synced_at`/`key_sync_error` fields.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::SshConfig;
use crate::db;
use crate::events::{host_log_topic, Notifier, NotifierMessage};
use crate::ssh::{shell_escape, HostConnection, RemoteRunner};
use crate::sync::SyncError;

pub struct SshKeySynchronizer {
    pool: SqlitePool,
    runner: Arc<dyn RemoteRunner>,
    notifier: Notifier,
    ssh: SshConfig,
}

impl SshKeySynchronizer {
    pub fn new(
        pool: SqlitePool,
        runner: Arc<dyn RemoteRunner>,
        notifier: Notifier,
        ssh: SshConfig,
    ) -> Self {
        Self {
            pool,
            runner,
            notifier,
            ssh,
        }
    }

    /// Push local public keys (the `.pub` siblings of the configured
    /// private keys) into Dokku's key store on the host
    pub async fn sync(&self, host_id: Uuid) -> Result<usize, SyncError> {
        let host = db::get_host(&self.pool, host_id)
            .await?
            .ok_or(SyncError::HostNotFound(host_id))?;
        let conn = HostConnection::from_host(&host);
        let topic = host_log_topic(host_id);

        self.notifier
            .publish(&topic, NotifierMessage::log("Syncing SSH keys..."));

        match self.sync_keys(&conn, &host.key_paths).await {
            Ok(added) => {
                db::update_key_sync(&self.pool, host_id, None).await?;
                self.notifier.publish(
                    &topic,
                    NotifierMessage::log(format!("✓ SSH keys synced ({} added)", added)),
                );
                Ok(added)
            }
            Err(e) => {
                db::update_key_sync(&self.pool, host_id, Some(&e.to_string())).await?;
                self.notifier
                    .publish(&topic, NotifierMessage::error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn sync_keys(
        &self,
        conn: &HostConnection,
        key_paths: &[std::path::PathBuf],
    ) -> Result<usize, SyncError> {
        let registered = self
            .runner
            .execute(
                conn,
                "dokku ssh-keys:list 2>/dev/null",
                Duration::from_secs(self.ssh.command),
            )
            .await?;

        let mut added = 0;
        for (index, private_key) in key_paths.iter().enumerate() {
            let public_key = public_key_path(private_key);
            let Ok(contents) = std::fs::read_to_string(&public_key) else {
                tracing::warn!("public key not readable, skipping: {:?}", public_key);
                continue;
            };
            let contents = contents.trim();
            let Some(key_body) = key_material(contents) else {
                tracing::warn!("unrecognized public key format, skipping: {:?}", public_key);
                continue;
            };

            if registered.output.contains(key_body) {
                continue;
            }

            let name = format!("vantage-{}", index);
            let command = format!(
                "echo {} | dokku ssh-keys:add {}",
                shell_escape(contents),
                shell_escape(&name)
            );
            let output = self
                .runner
                .execute(conn, &command, Duration::from_secs(self.ssh.command))
                .await?;
            if !output.success() {
                return Err(SyncError::Remote(format!(
                    "ssh-keys:add exited {}: {}",
                    output.exit_code,
                    output.output.trim()
                )));
            }
            added += 1;
        }

        Ok(added)
    }
}

fn public_key_path(private_key: &Path) -> std::path::PathBuf {
    let mut path = private_key.as_os_str().to_owned();
    path.push(".pub");
    std::path::PathBuf::from(path)
}

/// The base64 key material, the part worth comparing: names and
/// comments differ between `ssh-keys:list` and the key file
fn key_material(public_key: &str) -> Option<&str> {
    public_key.split_whitespace().nth(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key_path() {
        assert_eq!(
            public_key_path(Path::new("/home/u/.ssh/id_ed25519")),
            Path::new("/home/u/.ssh/id_ed25519.pub")
        );
    }

    #[test]
    fn test_key_material_extraction() {
        assert_eq!(
            key_material("ssh-ed25519 AAAAC3NzaC1lZDI1NTE5 user@box"),
            Some("AAAAC3NzaC1lZDI1NTE5")
        );
        assert_eq!(key_material("garbage"), None);
    }
}
