//! # Generic Messages
//!
//! Message types exchanged between a `ResourceClient` and its `ResourceActor`.

use crate::entity::{ActorEntity, Applied};
use crate::error::FrameworkError;
use tokio::sync::oneshot;

/// Type alias for the one-shot response channel used by actors.
pub type Response<T> = oneshot::Sender<Result<T, FrameworkError>>;

/// Request sent to the actor.
///
/// The actor is a keyed store, so the vocabulary is small:
///
/// - **Put**: insert, or merge through [`ActorEntity::on_replace`].
/// - **Get**: read by key; expired entities read as absent.
/// - **Len**: number of entries held, expired ones included until swept.
#[derive(Debug)]
pub enum ResourceRequest<T: ActorEntity> {
    Put {
        item: T,
        respond_to: Response<Applied>,
    },
    Get {
        id: T::Id,
        respond_to: Response<Option<T>>,
    },
    Len {
        respond_to: Response<usize>,
    },
}
