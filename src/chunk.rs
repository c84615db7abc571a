//! Materialize a full listing in bounded chunks when the caller does not
//! want to manage paging manually.

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::error::SqlReactiveError;

/// One paged call against a data-access method.
#[async_trait]
pub trait PagedSource<T>: Send + Sync {
    /// Fetch up to `limit` rows starting at `offset`.
    ///
    /// # Errors
    /// Returns `SqlReactiveError` if the underlying query fails.
    async fn fetch(&self, limit: u64, offset: u64) -> Result<Vec<T>, SqlReactiveError>;
}

#[async_trait]
impl<T, S> PagedSource<T> for &S
where
    T: Send + 'static,
    S: PagedSource<T> + ?Sized,
{
    async fn fetch(&self, limit: u64, offset: u64) -> Result<Vec<T>, SqlReactiveError> {
        (**self).fetch(limit, offset).await
    }
}

/// Adapter for closure-shaped sources.
pub struct FnPagedSource<F>(pub F);

#[async_trait]
impl<T, F> PagedSource<T> for FnPagedSource<F>
where
    T: Send,
    F: Fn(u64, u64) -> BoxFuture<'static, Result<Vec<T>, SqlReactiveError>> + Send + Sync,
{
    async fn fetch(&self, limit: u64, offset: u64) -> Result<Vec<T>, SqlReactiveError> {
        (self.0)(limit, offset).await
    }
}

/// Repeatedly invokes a paged query to collect the full result.
///
/// Chunks are requested from offset 0 upward; the first chunk shorter than
/// the chunk size, including an immediately empty one, ends the listing.
/// The first error stops further calls and propagates.
pub struct ChunkIterator<S> {
    source: S,
    chunk_size: u64,
}

impl<S> ChunkIterator<S> {
    #[must_use]
    pub fn new(source: S, chunk_size: u64) -> Self {
        Self { source, chunk_size }
    }

    /// Concatenate every chunk into one vector.
    ///
    /// # Errors
    /// Returns `SqlReactiveError::ConfigError` for a zero chunk size, or the
    /// first error raised by the source.
    pub async fn collect_all<T>(&self) -> Result<Vec<T>, SqlReactiveError>
    where
        S: PagedSource<T>,
    {
        if self.chunk_size == 0 {
            return Err(SqlReactiveError::ConfigError(
                "chunk size must be at least 1".into(),
            ));
        }
        let mut all = Vec::new();
        let mut offset = 0u64;
        loop {
            let chunk = self.source.fetch(self.chunk_size, offset).await?;
            let fetched = chunk.len() as u64;
            all.extend(chunk);
            if fetched < self.chunk_size {
                return Ok(all);
            }
            offset += fetched;
        }
    }
}
