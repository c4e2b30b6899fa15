/// Background task implementations
use crate::{
    activity::{record_best_effort, ActivityEvent, SYSTEM_ACTOR},
    context::AppContext,
    error::CmsResult,
    media::engine::ReconcileReport,
};
use chrono::{Duration, Utc};

/// Delete stored files that no content row owns
///
/// Files younger than the configured grace period are skipped, since an
/// in-flight ingest writes its bytes before inserting the row.
pub async fn sweep_orphan_blobs(ctx: &AppContext) -> CmsResult<u64> {
    let grace = Duration::hours(ctx.config.jobs.orphan_grace_hours);
    let removed = ctx.engine.sweep_orphans(grace).await?;

    if removed > 0 {
        tracing::info!("Removed {} orphaned blobs", removed);
        record_best_effort(
            ctx.activity_log.as_ref(),
            SYSTEM_ACTOR,
            None,
            ActivityEvent::OrphanBlobsSwept { removed },
        )
        .await;
    }

    Ok(removed)
}

/// Recompute reference counts from the media table
///
/// Only rows that have not changed within the grace period are touched.
pub async fn reconcile_reference_counts(ctx: &AppContext) -> CmsResult<ReconcileReport> {
    let settled_before = Utc::now() - Duration::hours(ctx.config.jobs.orphan_grace_hours);
    let report = ctx.engine.reconcile_references(settled_before).await?;

    if report.repaired > 0 || report.reclaimed > 0 {
        tracing::info!(
            repaired = report.repaired,
            reclaimed = report.reclaimed,
            "Reconciled reference counts"
        );
        record_best_effort(
            ctx.activity_log.as_ref(),
            SYSTEM_ACTOR,
            None,
            ActivityEvent::ReferenceCountsRepaired {
                repaired: report.repaired,
                reclaimed: report.reclaimed,
            },
        )
        .await;
    }

    Ok(report)
}

/// Health check - verify all systems are operational
pub async fn health_check(ctx: &AppContext) -> CmsResult<()> {
    // Check database connectivity
    sqlx::query("SELECT 1").fetch_one(&ctx.db).await?;

    // Blob root must exist and be listable
    tokio::fs::read_dir(ctx.blob_backend.base_path()).await?;

    Ok(())
}
