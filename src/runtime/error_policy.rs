//! # Error Policy
//!
//! Error handling and backoff logic for the controller watch loops.
//! This module handles reconciliation errors and watch stream errors.

use super::{resource_key, ControllerContext};
use crate::controller::backoff::BackoffState;
use crate::controller::client::Object;
use crate::controller::error::Error;
use crate::observability::metrics;
use kube_runtime::controller::{self, Action};
use kube_runtime::watcher;
use kube::ResourceExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument};

/// Handle reconciliation errors with exponential backoff
///
/// Backoff state is tracked per resource to avoid cross-resource interference.
/// Errors that retrying cannot fix wait for the next change to the resource.
pub fn handle_reconciliation_error<K: Object>(obj: Arc<K>, error: &Error, ctx: Arc<ControllerContext>) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace();
    let kind = ctx.kind.as_str();

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.kind = kind,
        resource.name = name.as_str(),
        resource.namespace = namespace.as_deref().unwrap_or_default(),
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {} {}: {}", kind, name, error);
    metrics::increment_reconciliation_errors(kind);

    let key = resource_key(namespace.as_deref(), &name);
    match next_retry(&ctx, &key, error) {
        Some((delay, error_count)) => {
            let next_trigger_time = chrono::Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            info!(
                "🔄 Retrying with exponential backoff: {:?} (error count: {}, trigger source: error-backoff)",
                delay, error_count
            );
            debug!("📅 Next retry scheduled: {}", next_trigger_time.to_rfc3339());
            metrics::increment_requeues("error-backoff");
            Action::requeue(delay)
        }
        None => {
            warn!("⏸️ Not retrying {}: waiting for the resource to change", name);
            metrics::increment_requeues("await-change");
            Action::await_change()
        }
    }
}

/// Advance the backoff for `key`, returning the delay and error count
///
/// Returns `None` for errors that requeueing cannot fix.
pub(crate) fn next_retry(ctx: &ControllerContext, key: &str, error: &Error) -> Option<(Duration, u32)> {
    if !error.is_retryable() {
        return None;
    }

    match ctx.backoff_states.lock() {
        Ok(mut states) => {
            let state = states.entry(key.to_string()).or_insert_with(|| {
                BackoffState::new(
                    ctx.config.backoff_start_duration(),
                    ctx.config.backoff_max_duration(),
                )
            });
            state.increment_error();
            Some((state.backoff.next_backoff(), state.error_count))
        }
        Err(e) => {
            warn!("Failed to lock backoff_states: {}, using default backoff", e);
            Some((error.requeue_delay(), 0))
        }
    }
}

/// Forget the failures recorded for `key` after a successful pass
pub(crate) fn reset_backoff(ctx: &ControllerContext, key: &str) {
    match ctx.backoff_states.lock() {
        Ok(mut states) => {
            if states.remove(key).is_some() {
                debug!("Reset backoff for {}", key);
            }
        }
        Err(e) => warn!("Failed to lock backoff_states: {}", e),
    }
}

/// Kinds of watch stream failure, each handled differently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorClass {
    /// 401: RBAC revoked or token expired
    Unauthorized,
    /// 410: resource version too old, the watch relists
    Expired,
    /// 429: API server storage reinitializing
    Throttled,
    /// 404: CRD missing or object deleted
    NotFound,
    Other,
}

/// Classify a watch error from its debug rendering
///
/// Not found is checked before unauthorized: a plain text 404 body
/// surfaces as a deserialization error mentioning `WatchFailed`.
pub fn classify_watch_error(error_string: &str) -> WatchErrorClass {
    let is_not_found = error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found");
    let is_401 = (error_string.contains("401") || error_string.contains("Unauthorized")) && !is_not_found;
    let is_410 = error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone");
    let is_429 = error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests");

    if is_401 {
        WatchErrorClass::Unauthorized
    } else if is_410 {
        WatchErrorClass::Expired
    } else if is_429 {
        WatchErrorClass::Throttled
    } else if is_not_found {
        WatchErrorClass::NotFound
    } else {
        WatchErrorClass::Other
    }
}

/// Handle an error item from a controller stream
///
/// Reconciler failures were already handled by the error policy. Watch
/// failures are classified and may pause the stream before it continues.
pub async fn handle_controller_error(
    kind: &str,
    err: &controller::Error<Error, watcher::Error>,
    backoff: &AtomicU64,
    max_backoff_ms: u64,
    watch_restart_delay: Duration,
) {
    if let controller::Error::ReconcilerFailed(e, reference) = err {
        debug!("{} reconcile of {} failed: {}", kind, reference, e);
        return;
    }
    handle_watch_stream_error(kind, &format!("{err:?}"), backoff, max_backoff_ms, watch_restart_delay).await;
}

/// Handle watch stream errors with appropriate classification and backoff
pub async fn handle_watch_stream_error(
    kind: &str,
    error_string: &str,
    backoff: &AtomicU64,
    max_backoff_ms: u64,
    watch_restart_delay: Duration,
) {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        resource.kind = kind,
        error = %error_string
    );
    react_to_watch_error(kind, error_string, backoff, max_backoff_ms, watch_restart_delay)
        .instrument(error_span)
        .await;
}

async fn react_to_watch_error(
    kind: &str,
    error_string: &str,
    backoff: &AtomicU64,
    max_backoff_ms: u64,
    watch_restart_delay: Duration,
) {
    match classify_watch_error(error_string) {
        WatchErrorClass::Unauthorized => {
            error!("❌ Watch authentication failed (401 Unauthorized) - RBAC may have been revoked or token expired");
            error!("🔍 SRE Diagnostics:");
            error!("   1. Verify the ClusterRole still exists:");
            error!("      kubectl get clusterrole riff-system-controller");
            error!("   2. Verify the ClusterRoleBinding still binds the ServiceAccount:");
            error!("      kubectl get clusterrolebinding riff-system-controller -o yaml");
            error!("   3. Verify RBAC permissions are still active:");
            error!(
                "      kubectl auth can-i list {}s --as=system:serviceaccount:riff-system:riff-system-controller --all-namespaces",
                kind.to_lowercase()
            );
            warn!(
                "⏳ Waiting {:?} before continuing the watch (RBAC may need time to propagate)...",
                watch_restart_delay
            );
            tokio::time::sleep(watch_restart_delay).await;
        }
        WatchErrorClass::Expired => {
            warn!("Watch resource version expired (410) - this is normal during pod restarts, watch will relist");
        }
        WatchErrorClass::Throttled => {
            let current_backoff = backoff.load(Ordering::Relaxed);
            warn!(
                "API server storage reinitializing (429), backing off for {}ms...",
                current_backoff
            );
            tokio::time::sleep(Duration::from_millis(current_backoff)).await;
            let new_backoff = std::cmp::min(current_backoff.saturating_mul(2), max_backoff_ms);
            backoff.store(new_backoff, Ordering::Relaxed);
        }
        WatchErrorClass::NotFound => {
            warn!(
                "{} watch hit not found (404) - the object was deleted or a CRD is missing. Error: {}",
                kind, error_string
            );
        }
        WatchErrorClass::Other => {
            error!("Controller stream error: {}", error_string);
            tokio::time::sleep(watch_restart_delay).await;
        }
    }
}
