//! Batched upload of records to a [`VectorIndex`].
//!
//! Identifiers are checked before anything is sent: one bad identifier
//! aborts the whole upload. After that, each batch succeeds or fails on
//! its own and batches already written stay written.

use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::ids::is_valid_identifier;
use crate::index::VectorIndex;
use crate::models::Record;

/// A batch the index rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure {
    /// 1-based batch number.
    pub batch: usize,
    pub records: usize,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadReport {
    pub uploaded: usize,
    pub batches: usize,
    pub failures: Vec<BatchFailure>,
}

impl UploadReport {
    /// Records in failed batches.
    pub fn failed_records(&self) -> usize {
        self.failures.iter().map(|f| f.records).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Reject any identifier that cannot be persisted.
pub fn validate_identifiers(records: &[Record]) -> Result<()> {
    match records.iter().find(|r| !is_valid_identifier(&r.id)) {
        Some(bad) => Err(PipelineError::InvalidIdentifier(bad.id.clone())),
        None => Ok(()),
    }
}

/// Upsert `records` in batches of `batch_size`.
pub async fn upload(
    index: &dyn VectorIndex,
    records: &[Record],
    batch_size: usize,
    namespace: Option<&str>,
) -> Result<UploadReport> {
    validate_identifiers(records)?;

    let batch_size = batch_size.max(1);
    let total_batches = records.len().div_ceil(batch_size);
    let mut report = UploadReport::default();

    for (i, batch) in records.chunks(batch_size).enumerate() {
        let batch_no = i + 1;
        report.batches += 1;

        match index.upsert(batch, namespace).await {
            Ok(n) => {
                report.uploaded += n;
                info!(batch = batch_no, total_batches, records = n, "uploaded batch");
            }
            Err(e) => {
                warn!(batch = batch_no, total_batches, error = %e, "upload batch failed");
                report.failures.push(BatchFailure {
                    batch: batch_no,
                    records: batch.len(),
                    error: format!("{:#}", e),
                });
            }
        }
    }

    Ok(report)
}
