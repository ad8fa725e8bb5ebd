//! # Generic Client
//!
//! The handle side of a [`ResourceActor`](crate::ResourceActor).

use crate::entity::{ActorEntity, Applied};
use crate::error::FrameworkError;
use crate::message::{ResourceRequest, Response};
use tokio::sync::{mpsc, oneshot};

/// A type-safe client for interacting with a `ResourceActor`.
///
/// Holds only the sending half of the channel, so clones are cheap and can be
/// handed to every task that needs the store.
pub struct ResourceClient<T: ActorEntity> {
    sender: mpsc::Sender<ResourceRequest<T>>,
}

impl<T: ActorEntity> Clone for ResourceClient<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T: ActorEntity> ResourceClient<T> {
    pub fn new(sender: mpsc::Sender<ResourceRequest<T>>) -> Self {
        Self { sender }
    }

    /// Inserts `item`, or merges it into the entry with the same id.
    pub async fn put(&self, item: T) -> Result<Applied, FrameworkError> {
        self.call(|respond_to| ResourceRequest::Put { item, respond_to })
            .await
    }

    pub async fn get(&self, id: T::Id) -> Result<Option<T>, FrameworkError> {
        self.call(|respond_to| ResourceRequest::Get { id, respond_to })
            .await
    }

    pub async fn len(&self) -> Result<usize, FrameworkError> {
        self.call(|respond_to| ResourceRequest::Len { respond_to })
            .await
    }

    /// One round trip: send the request, await its oneshot reply.
    async fn call<R>(
        &self,
        request: impl FnOnce(Response<R>) -> ResourceRequest<T>,
    ) -> Result<R, FrameworkError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(request(respond_to))
            .await
            .map_err(|_| FrameworkError::ActorClosed)?;
        response.await.map_err(|_| FrameworkError::ActorDropped)?
    }
}
