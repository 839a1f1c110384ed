//! Errors raised by the collection loop itself (§7).
//!
//! Partial-source errors (one zone, one GPU method) never reach this type:
//! they are logged and the affected field is simply absent from the
//! snapshot, as described in `crate::attribution`. `TickError` exists only
//! for whole-source failures, which abort the tick and leave the previously
//! published snapshot current.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TickError {
    /// The resource informer's `refresh()` returned an error.
    #[error("resource informer refresh failed")]
    InformerUnavailable(#[source] anyhow::Error),

    /// The resource informer did not refresh within the configured per-source timeout.
    #[error("resource informer refresh timed out after {0:?}")]
    InformerTimeout(Duration),
}
