//! # ActorClient Trait
//!
//! Common interface for domain-specific wrappers around a [`ResourceClient`]:
//! implement `inner` and `map_error`, get `fetch` and `count` for free.
use crate::{ActorEntity, FrameworkError, ResourceClient};
use async_trait::async_trait;

/// Trait for resource-specific clients to inherit the standard read operations.
///
/// # Example
///
/// ```rust
/// use cafe_actor::{ActorClient, ActorEntity, FrameworkError, ResourceClient};
/// use async_trait::async_trait;
///
/// #[derive(Clone, Debug)]
/// struct Table { number: u32 }
///
/// #[derive(Debug, thiserror::Error)]
/// #[error("table error: {0}")]
/// struct TableError(String);
///
/// impl ActorEntity for Table {
///     type Id = u32;
///     type Error = TableError;
///     fn id(&self) -> u32 { self.number }
/// }
///
/// struct TableClient { inner: ResourceClient<Table> }
///
/// #[async_trait]
/// impl ActorClient<Table> for TableClient {
///     type Error = TableError;
///
///     fn inner(&self) -> &ResourceClient<Table> { &self.inner }
///
///     fn map_error(e: FrameworkError) -> TableError { TableError(e.to_string()) }
/// }
///
/// async fn usage(client: TableClient) {
///     // fetch() and count() are provided automatically
///     let _ = client.fetch(4).await;
///     let _ = client.count().await;
/// }
/// ```
#[async_trait]
pub trait ActorClient<T: ActorEntity>: Send + Sync {
    /// The resource-specific error type.
    type Error: Send + Sync;

    /// Access the inner generic ResourceClient.
    fn inner(&self) -> &ResourceClient<T>;

    /// Map framework errors to the specific resource error type.
    fn map_error(e: FrameworkError) -> Self::Error;

    /// Fetch an entity by ID.
    #[tracing::instrument(skip(self))]
    async fn fetch(&self, id: T::Id) -> Result<Option<T>, Self::Error> {
        tracing::debug!("Sending request");
        self.inner().get(id).await.map_err(Self::map_error)
    }

    /// Number of entities held by the actor, expired ones included until swept.
    async fn count(&self) -> Result<usize, Self::Error> {
        self.inner().len().await.map_err(Self::map_error)
    }
}
