//! New / Changed / Unchanged classification against the fingerprint store.

use std::sync::Arc;

use tracing::trace;

use lexcrawl_crawler::FetchResult;
use lexcrawl_shared::{Classification, Fingerprint, FingerprintRecord, Result};
use lexcrawl_storage::Storage;

/// Classification plus the record it was made against.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub classification: Classification,
    pub previous: Option<FingerprintRecord>,
}

/// Read-only view of the fingerprint store.
#[derive(Clone)]
pub struct ChangeDetector {
    storage: Arc<Storage>,
}

impl ChangeDetector {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Look the fetched document up by its doc id and compare fingerprints.
    pub async fn classify(&self, fetched: &FetchResult) -> Result<Detection> {
        let doc_id = fetched.target.doc_id();
        let previous = self.storage.get_fingerprint(&doc_id).await?;
        let classification = compare(previous.as_ref(), &fetched.fingerprint);
        trace!(%doc_id, ?classification, "classified");
        Ok(Detection {
            classification,
            previous,
        })
    }
}

/// Exact fingerprint match only.
pub fn compare(previous: Option<&FingerprintRecord>, current: &Fingerprint) -> Classification {
    match previous {
        None => Classification::New,
        Some(record) if record.fingerprint == *current => Classification::Unchanged,
        Some(_) => Classification::Changed,
    }
}
