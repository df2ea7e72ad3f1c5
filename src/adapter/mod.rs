//! Adapter module - operation discovery and dispatch.
//!
//! Provides:
//! - [`partition_operations`] - the static begin/plain/end naming matcher
//! - [`adapt`] / [`adapt_session`] - build an [`AdaptedHandle`] over a
//!   service or session object
//! - [`AdaptedHandle`] - the uniform awaitable operation surface
//!
//! # Example
//!
//! ```ignore
//! use trestle::adapter::{adapt_session, CallOutcome};
//! use trestle::service::CallPayload;
//!
//! let session = adapt_session(factory, &bridge);
//!
//! // Factory accessors hand back already-adapted services.
//! let query = session
//!     .invoke("getQueryService", CallPayload::new())
//!     .await?
//!     .into_adapted()
//!     .unwrap();
//!
//! let rows = query
//!     .invoke("findAllByQuery", CallPayload::positional(vec![hql.into()]))
//!     .await?;
//! ```

mod handle;
mod session;
mod triad;

pub use handle::{adapt, AdaptedHandle, CallOutcome, OperationFlavor};
pub use session::{adapt_session, FACTORY_PREFIX, FACTORY_SUFFIX};
pub use triad::{
    partition_operations, OperationPartition, OperationTriad, BEGIN_PREFIX, END_PREFIX,
};
