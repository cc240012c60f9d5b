//! HTTP routes for the dashboard.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::dashboard::SnapshotReceiver;
use crate::error::Result;
use crate::models::{BuildRecord, RecordSummary};
use crate::pipeline::schedule::shutdown_requested;
use crate::storage::RecordStore;

#[derive(Clone)]
struct DashboardState {
    snapshots: SnapshotReceiver,
    store: Arc<dyn RecordStore>,
}

impl DashboardState {
    async fn lookup(&self, package: &str) -> std::result::Result<BuildRecord, StatusCode> {
        match self.store.find_by_key(package).await {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(StatusCode::NOT_FOUND),
            Err(e) => {
                log::warn!("Dashboard lookup of {package} failed: {e}");
                Err(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

async fn list_records(State(state): State<DashboardState>) -> Json<Vec<RecordSummary>> {
    let snapshot = state.snapshots.borrow().clone();
    Json(snapshot.records.values().cloned().collect())
}

async fn get_record(State(state): State<DashboardState>, Path(package): Path<String>) -> Response {
    match state.lookup(&package).await {
        Ok(record) => Json(record).into_response(),
        Err(status) => status.into_response(),
    }
}

async fn view_log(State(state): State<DashboardState>, Path(package): Path<String>) -> Response {
    match state.lookup(&package).await {
        Ok(record) => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            record.content,
        )
            .into_response(),
        Err(status) => status.into_response(),
    }
}

async fn cause_counts(State(state): State<DashboardState>) -> Json<BTreeMap<String, usize>> {
    let snapshot = state.snapshots.borrow().clone();
    Json(snapshot.cause_counts())
}

/// Listings come from `snapshots`; single records and logs from `store`.
pub fn router(snapshots: SnapshotReceiver, store: Arc<dyn RecordStore>) -> Router {
    Router::new()
        .route("/api/records", get(list_records))
        .route("/api/records/{package}", get(get_record))
        .route("/api/causes", get(cause_counts))
        .route("/logview/{package}", get(view_log))
        .with_state(DashboardState { snapshots, store })
}

/// Serve the dashboard until shutdown is requested.
pub async fn serve(
    listener: TcpListener,
    snapshots: SnapshotReceiver,
    store: Arc<dyn RecordStore>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    log::info!("Dashboard listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(snapshots, store))
        .with_graceful_shutdown(async move { shutdown_requested(&mut shutdown).await })
        .await?;
    log::info!("Dashboard stopped");
    Ok(())
}
