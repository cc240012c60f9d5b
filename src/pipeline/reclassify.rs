// src/pipeline/reclassify.rs

//! Re-label stored records after the pattern set changed.
//!
//! Rules are applied as bulk content updates in reverse evaluation order, so
//! the highest-priority matching rule writes last. Records no rule matches
//! keep the cause they already have.

use std::collections::HashMap;

use crate::error::Result;
use crate::services::Classifier;
use crate::storage::RecordStore;

/// Outcome of a reclassification pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReclassifyReport {
    pub examined: usize,
    pub changed: usize,
}

/// Rewrite stored causes with the current rule set.
pub async fn run_reclassify(
    store: &dyn RecordStore,
    classifier: &Classifier,
) -> Result<ReclassifyReport> {
    let before: HashMap<String, String> = store
        .enumerate_all()
        .await?
        .into_iter()
        .map(|r| (r.package, r.cause))
        .collect();

    for rule in classifier.rules().iter().rev() {
        let updated = store
            .bulk_update_where_content_matches(&rule.matcher, &rule.cause)
            .await?;
        log::debug!("Rule '{}' touched {} records", rule.cause, updated);
    }

    store.flush().await?;

    let after = store.enumerate_all().await?;
    let changed = after
        .iter()
        .filter(|r| before.get(&r.package) != Some(&r.cause))
        .count();

    log::info!(
        "Reclassified {} records, {} changed cause",
        before.len(),
        changed
    );

    Ok(ReclassifyReport {
        examined: before.len(),
        changed,
    })
}
