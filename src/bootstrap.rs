//! Collection bootstrap.
//!
//! The reconciler never creates its collection. [`init_index`] creates an
//! empty one sized for the embedding provider; [`build_index`] throws the
//! existing collection and ledger away and indexes the whole corpus through
//! the same reconciler code path the incremental update uses.

use tracing::info;

use crate::embedding::EmbeddingProvider;
use crate::ledger::Ledger;
use crate::reconcile::{ReconcileError, Reconciler};
use crate::report::RunSummary;
use crate::store::VectorStore;

/// Create the collection if it does not exist. Returns its dimensionality.
///
/// Fails if the provider cannot embed, or if the collection already exists
/// with a different dimensionality.
pub async fn init_index(
    store: &dyn VectorStore,
    provider: &dyn EmbeddingProvider,
) -> Result<usize, ReconcileError> {
    let dims = provider.dims();
    if dims == 0 {
        return Err(ReconcileError::ProviderUnavailable(
            provider.model_name().to_string(),
        ));
    }

    if let Some(stored) = store.collection_dims().await.map_err(ReconcileError::Store)? {
        if stored != dims {
            return Err(ReconcileError::DimensionMismatch {
                model: provider.model_name().to_string(),
                provider: dims,
                collection: store.collection().to_string(),
                stored,
            });
        }
        info!(collection = store.collection(), dims, "collection already exists");
        return Ok(dims);
    }

    store
        .create_collection(dims)
        .await
        .map_err(ReconcileError::Store)?;
    info!(collection = store.collection(), dims, "created collection");
    Ok(dims)
}

/// Rebuild the index from scratch.
///
/// The corpus and provider are checked before anything is dropped, so a
/// misconfigured rebuild leaves the existing index alone.
pub async fn build_index(
    store: &dyn VectorStore,
    provider: &dyn EmbeddingProvider,
    reconciler: &Reconciler,
    corpus_root: &std::path::Path,
) -> Result<RunSummary, ReconcileError> {
    if !corpus_root.is_dir() {
        return Err(ReconcileError::CorpusMissing(corpus_root.to_path_buf()));
    }
    let dims = provider.dims();
    if dims == 0 {
        return Err(ReconcileError::ProviderUnavailable(
            provider.model_name().to_string(),
        ));
    }

    info!(collection = store.collection(), "dropping collection for rebuild");
    store.drop_collection().await.map_err(ReconcileError::Store)?;
    store
        .create_collection(dims)
        .await
        .map_err(ReconcileError::Store)?;

    Ledger::default()
        .save(reconciler.ledger_path())
        .map_err(ReconcileError::LedgerReset)?;

    reconciler.run().await
}
