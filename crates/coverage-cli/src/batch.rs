//! Parallel reconcile batches
//!
//! Posts are independent, so requests are grouped per post and the groups are
//! spread over blocking workers, each holding its own engine connection.
//! Requests for one post stay in file order on one worker.

use std::collections::HashMap;

use anyhow::{Context, Result};
use coverage_core::{BatchReport, CallContext, CoverageConfig, ReconcileRequest};

use crate::open_engine;

/// Split requests into at most `workers` buckets without splitting a post
pub(crate) fn partition(requests: Vec<ReconcileRequest>, workers: usize) -> Vec<Vec<ReconcileRequest>> {
    let workers = workers.max(1);
    let mut buckets: Vec<Vec<ReconcileRequest>> = vec![Vec::new(); workers];
    let mut assigned: HashMap<String, usize> = HashMap::new();

    for request in requests {
        let next = assigned.len() % workers;
        let idx = *assigned.entry(request.post_id.clone()).or_insert(next);
        buckets[idx].push(request);
    }

    buckets.retain(|b| !b.is_empty());
    buckets
}

pub(crate) async fn reconcile_parallel(
    config: &CoverageConfig,
    ctx: &CallContext,
    requests: Vec<ReconcileRequest>,
    workers: usize,
) -> Result<BatchReport> {
    let buckets = partition(requests, workers);
    tracing::info!(workers = buckets.len(), "Dispatching reconcile batch");

    let handles: Vec<_> = buckets
        .into_iter()
        .map(|bucket| {
            let config = config.clone();
            let ctx = ctx.clone();
            tokio::task::spawn_blocking(move || -> Result<BatchReport> {
                let engine = open_engine(&config)?;
                Ok(engine.reconcile_batch(&ctx, &bucket))
            })
        })
        .collect();

    let mut report = BatchReport::default();
    for handle in handles {
        let partial = handle.await.context("Reconcile worker panicked")??;
        report.merge(partial);
    }
    Ok(report)
}
