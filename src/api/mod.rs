pub mod client;
pub mod fetchers;
pub mod model;

use crate::error::AppResult;
use crate::model::{Entity, FilingRef};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeSet;

pub use client::EdgarClient;
pub use fetchers::{EdgarBackend, EdgarHandle};

/// Source of filings for a single entity.
///
/// Every call may fail independently; callers decide how far a failure spreads.
#[async_trait]
pub trait FilingBackend: Send + Sync + 'static {
    /// Per-entity state produced by [`FilingBackend::resolve`].
    type Handle: Send + Sync;

    fn name(&self) -> &str;

    /// Entity initialization. A failure here is fatal for that entity only.
    async fn resolve(&self, entity: &Entity) -> AppResult<Self::Handle>;

    /// Filings of the given forms filed in `year`. Implementations may return
    /// filings from adjacent years.
    async fn list_filings(
        &self,
        handle: &Self::Handle,
        form_types: &BTreeSet<String>,
        year: i32,
    ) -> AppResult<Vec<FilingRef>>;

    async fn fetch_body(&self, handle: &Self::Handle, filing: &FilingRef) -> AppResult<Bytes>;
}
