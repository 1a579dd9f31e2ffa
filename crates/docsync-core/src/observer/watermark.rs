//! Watermark loading and forward-only advancement.

use docsync_proto::Timestamp;

use crate::error::Error;
use crate::store::WatermarkStore;

/// Load the persisted watermark, falling back to `default`.
pub async fn load_watermark<S>(store: &S, default: Timestamp) -> Result<Timestamp, Error>
where
    S: WatermarkStore + ?Sized,
{
    Ok(store.get().await?.unwrap_or(default))
}

/// Persist `candidate` if it is strictly newer than the stored watermark.
///
/// Returns whether the watermark moved. Duplicate and out-of-order values are
/// ignored. An empty store always accepts the candidate: the default
/// watermark only bounds the subscription filter. The read and the write are
/// separate store calls, so two observers sharing one stored watermark can
/// interleave.
pub async fn advance_watermark<S>(store: &S, candidate: Timestamp) -> Result<bool, Error>
where
    S: WatermarkStore + ?Sized,
{
    let current = store.get().await?;
    if let Some(current) = current {
        if candidate <= current {
            tracing::trace!(%candidate, %current, "watermark not advanced");
            return Ok(false);
        }
    }

    store.set(candidate).await?;
    tracing::trace!(%candidate, previous = ?current, "watermark advanced");
    Ok(true)
}
