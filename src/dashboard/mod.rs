// src/dashboard/mod.rs

//! Read-only dashboard.
//!
//! A refresher task snapshots record summaries on its own timer and
//! publishes each snapshot through a `watch` channel. Listings are served
//! from the latest snapshot; log tails are read from the store on request.

mod server;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::Result;
use crate::models::RecordSummary;
use crate::pipeline::schedule::shutdown_requested;
use crate::storage::RecordStore;

pub use server::{router, serve};

/// Latest view of the store.
#[derive(Debug, Clone, Default)]
pub struct DashboardSnapshot {
    pub records: BTreeMap<String, RecordSummary>,
    /// `None` until the first successful refresh
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl DashboardSnapshot {
    /// Read every record summary from the store.
    pub async fn refresh(store: &dyn RecordStore) -> Result<Self> {
        let records = store
            .summarize_all()
            .await?
            .into_iter()
            .map(|r| (r.package.clone(), r))
            .collect();
        Ok(Self {
            records,
            refreshed_at: Some(Utc::now()),
        })
    }

    /// Record count per cause label.
    pub fn cause_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for record in self.records.values() {
            *counts.entry(record.cause.clone()).or_insert(0) += 1;
        }
        counts
    }
}

/// Receiver side of the snapshot channel.
pub type SnapshotReceiver = watch::Receiver<Arc<DashboardSnapshot>>;

/// Start refreshing snapshots every `period` until shutdown.
///
/// A failed refresh keeps the previously published snapshot.
pub fn spawn_refresher(
    store: Arc<dyn RecordStore>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> (SnapshotReceiver, JoinHandle<()>) {
    let (tx, rx) = watch::channel(Arc::new(DashboardSnapshot::default()));

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }
            match DashboardSnapshot::refresh(store.as_ref()).await {
                Ok(snapshot) => {
                    tx.send_replace(Arc::new(snapshot));
                }
                Err(e) => log::warn!("Dashboard refresh failed, keeping last snapshot: {e}"),
            }
        }
        log::debug!("Dashboard refresher stopped");
    });

    (rx, handle)
}
