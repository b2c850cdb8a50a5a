//! Periodic store maintenance.
//!
//! The purger is an optional long-running process that keeps the store
//! small and lets blocked hosts recover:
//! - deletes URLs whose extension has since been refused,
//! - erases stored documents of parsed URLs that yielded no ABC,
//! - deletes hosts disabled for DNS failures along with their URLs,
//! - re-enables hosts disabled for timeouts after a cooling-off period.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::store::Store;

/// Purger tunables.
#[derive(Debug, Clone)]
pub struct PurgerConfig {
    /// Seconds between maintenance passes.
    pub interval_seconds: u64,
    /// Hours a timeout-disabled host stays blocked.
    pub host_reenable_hours: u64,
}

impl Default for PurgerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 60,
            host_reenable_hours: 24,
        }
    }
}

impl From<&crate::config::ConfigFile> for PurgerConfig {
    fn from(config: &crate::config::ConfigFile) -> Self {
        Self {
            interval_seconds: config.purger.interval_seconds,
            host_reenable_hours: config.purger.host_reenable_hours,
        }
    }
}

/// What one maintenance pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeSummary {
    pub refused_urls_deleted: usize,
    pub documents_erased: usize,
    pub urls_deleted: usize,
    pub hosts_deleted: usize,
    pub hosts_reenabled: usize,
}

impl PurgeSummary {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// The maintenance process.
pub struct Purger {
    store: Arc<Store>,
    config: PurgerConfig,
}

impl Purger {
    pub fn new(store: Store, config: PurgerConfig) -> Self {
        Self {
            store: Arc::new(store),
            config,
        }
    }

    /// Runs maintenance passes until cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_s = self.config.interval_seconds,
            reenable_h = self.config.host_reenable_hours,
            "Purger started"
        );

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.interval_seconds.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    match self.run_once(Utc::now()) {
                        Ok(summary) if !summary.is_empty() => {
                            info!(
                                refused_urls = summary.refused_urls_deleted,
                                erased = summary.documents_erased,
                                urls_deleted = summary.urls_deleted,
                                hosts_deleted = summary.hosts_deleted,
                                hosts_reenabled = summary.hosts_reenabled,
                                "Purge pass complete"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "Purge pass failed"),
                    }
                }
            }
        }

        info!("Purger stopped");
    }

    /// One maintenance pass.
    pub fn run_once(&self, now: DateTime<Utc>) -> crate::store::Result<PurgeSummary> {
        let refused_urls_deleted = self.store.purge_refused_urls()?;
        let documents_erased = self.store.erase_parsed_documents()?;
        let (urls_deleted, hosts_deleted) = self.store.delete_dns_disabled()?;
        let cutoff = now - chrono::Duration::hours(self.config.host_reenable_hours as i64);
        let hosts_reenabled = self.store.reenable_timeout_hosts(cutoff)?;

        Ok(PurgeSummary {
            refused_urls_deleted,
            documents_erased,
            urls_deleted,
            hosts_deleted,
            hosts_reenabled,
        })
    }
}
