//! HTTP health prober
//!
//! Probes each deployment's resolved URL on a fixed interval, persists
//! the result, and keeps a bounded history. A deployment that stays
//! non-healthy for two consecutive probes triggers exactly one
//! notification for that outage, derived from the stored history
//! rather than per-tick state.

use std::time::{Duration, Instant};

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::HealthConfig;
use crate::db;
use crate::domain::{Deployment, HealthCheckRecord, HealthStatus};
use crate::events::{deploy_log_topic, Notifier, NotifierMessage};

pub struct HealthProber {
    pool: SqlitePool,
    client: reqwest::Client,
    notifier: Notifier,
    config: HealthConfig,
}

impl HealthProber {
    pub fn new(
        pool: SqlitePool,
        notifier: Notifier,
        config: HealthConfig,
    ) -> Result<Self, reqwest::Error> {
        // Self-signed certificates are common on fresh Dokku hosts;
        // the probe cares about liveness, not trust
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .danger_accept_invalid_certs(true)
            .user_agent("Vantage-HealthMonitor/1.0")
            .build()?;

        Ok(Self {
            pool,
            client,
            notifier,
            config,
        })
    }

    /// Probe one URL and persist the result for the deployment
    pub async fn probe(
        &self,
        deployment_id: Uuid,
        url: &str,
    ) -> Result<HealthCheckRecord, sqlx::Error> {
        let started = Instant::now();
        let response = self.client.get(url).send().await;
        let elapsed_ms = started.elapsed().as_millis() as i64;

        let (status, response_code, response_body) = match response {
            Ok(resp) => {
                let code = resp.status().as_u16();
                let body = resp.text().await.ok().map(|b| truncate(&b, 500));
                (HealthStatus::from_response_code(code), Some(code), body)
            }
            Err(e) if e.is_timeout() => (HealthStatus::Timeout, None, None),
            Err(e) => (HealthStatus::Error, None, Some(truncate(&e.to_string(), 500))),
        };

        let record = HealthCheckRecord {
            id: Uuid::new_v4(),
            deployment_id,
            status,
            response_code,
            response_time_ms: Some(elapsed_ms),
            response_body,
            checked_at: Utc::now(),
        };
        db::record_check(&self.pool, &record).await?;

        let history = db::list_checks(&self.pool, deployment_id).await?;
        if should_notify(&history) {
            tracing::warn!(deployment = %deployment_id, url, "deployment is down");
            self.notifier.publish(
                &deploy_log_topic(deployment_id),
                NotifierMessage::error(format!(
                    "Health check failing: {} reported {} twice in a row",
                    url, status
                )),
            );
        }

        Ok(record)
    }

    /// Probe every deployment with a reachable host and a resolvable
    /// URL. Probes run concurrently; one failure never blocks the rest.
    pub async fn check_all(&self) -> Result<usize, sqlx::Error> {
        let hosts = db::list_hosts(&self.pool).await?;
        let mut targets = Vec::new();

        for host in hosts.iter().filter(|h| h.reachable()) {
            for deployment in db::list_deployments_for_host(&self.pool, host.id).await? {
                if let Some(url) = deployment.resolved_url(&host.ip) {
                    targets.push((deployment.id, url));
                }
            }
        }

        let probes = targets
            .iter()
            .map(|(id, url)| self.probe(*id, url));
        let results = futures::future::join_all(probes).await;

        let mut probed = 0;
        for result in results {
            match result {
                Ok(_) => probed += 1,
                Err(e) => tracing::warn!("health probe failed to persist: {}", e),
            }
        }
        Ok(probed)
    }

    /// Scheduler loop, spawned at startup
    pub async fn run_loop(self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.check_all().await {
                Ok(probed) => tracing::debug!(probed, "health tick complete"),
                Err(e) => tracing::warn!("health tick failed: {}", e),
            }
        }
    }

    /// Percentage of retained checks that were healthy
    pub async fn uptime_percentage(&self, deployment_id: Uuid) -> Result<Option<f64>, sqlx::Error> {
        let history = db::list_checks(&self.pool, deployment_id).await?;
        Ok(uptime_percentage(&history))
    }
}

/// Whether this probe is the transition into a sustained outage.
/// `history` is newest first. True exactly when the two newest records
/// are non-healthy and the one before (if any) was healthy, so a
/// five-tick outage notifies once.
pub fn should_notify(history: &[HealthCheckRecord]) -> bool {
    match history {
        [a, b, rest @ ..] if !a.status.is_healthy() && !b.status.is_healthy() => {
            rest.first().map_or(true, |c| c.status.is_healthy())
        }
        _ => false,
    }
}

/// Uptime over the retained window; None when there is no history
pub fn uptime_percentage(history: &[HealthCheckRecord]) -> Option<f64> {
    if history.is_empty() {
        return None;
    }
    let healthy = history.iter().filter(|r| r.status.is_healthy()).count();
    Some(healthy as f64 * 100.0 / history.len() as f64)
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn record(status: HealthStatus, minutes_ago: i64) -> HealthCheckRecord {
        HealthCheckRecord {
            id: Uuid::new_v4(),
            deployment_id: Uuid::new_v4(),
            status,
            response_code: None,
            response_time_ms: None,
            response_body: None,
            checked_at: Utc::now() - ChronoDuration::minutes(minutes_ago),
        }
    }

    fn history(statuses: &[HealthStatus]) -> Vec<HealthCheckRecord> {
        // Newest first, matching list_checks ordering
        statuses
            .iter()
            .enumerate()
            .map(|(i, s)| record(*s, i as i64 * 5))
            .collect()
    }

    #[test]
    fn test_sustained_outage_notifies_once() {
        use HealthStatus::{Healthy, Timeout, Unhealthy};

        // Tick by tick through a 5-tick outage: only the second failing
        // probe is the transition
        let ticks = [
            (vec![Unhealthy, Healthy, Healthy], false),
            (vec![Unhealthy, Unhealthy, Healthy, Healthy], true),
            (vec![Timeout, Unhealthy, Unhealthy, Healthy], false),
            (vec![Unhealthy, Timeout, Unhealthy, Unhealthy], false),
            (vec![Unhealthy, Unhealthy, Timeout, Unhealthy], false),
        ];
        let mut notifications = 0;
        for (statuses, expected) in ticks {
            let fired = should_notify(&history(&statuses));
            assert_eq!(fired, expected, "history {:?}", statuses);
            if fired {
                notifications += 1;
            }
        }
        assert_eq!(notifications, 1);
    }

    #[test]
    fn test_single_failure_does_not_notify() {
        use HealthStatus::{Healthy, Unhealthy};
        assert!(!should_notify(&history(&[Unhealthy])));
        assert!(!should_notify(&history(&[Unhealthy, Healthy])));
        assert!(!should_notify(&history(&[Healthy, Unhealthy, Unhealthy])));
    }

    #[test]
    fn test_outage_from_the_first_records_notifies() {
        use HealthStatus::Unhealthy;
        assert!(should_notify(&history(&[Unhealthy, Unhealthy])));
    }

    #[tokio::test]
    async fn test_prober_construction_applies_timeout() {
        let pool = crate::db::init_database("sqlite::memory:").await.unwrap();
        let config = HealthConfig::default();
        let prober = HealthProber::new(pool, Notifier::new(), config);
        assert!(prober.is_ok());
    }

    #[test]
    fn test_uptime_percentage() {
        use HealthStatus::{Healthy, Unhealthy};
        assert_eq!(uptime_percentage(&[]), None);
        let h = history(&[Healthy, Unhealthy, Healthy, Healthy]);
        assert_eq!(uptime_percentage(&h), Some(75.0));
    }
}
