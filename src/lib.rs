//! # trestle
//!
//! Async adapters for callback-style RPC services.
//!
//! Connector stacks expose asynchronous operations as `begin_X` / `X` /
//! `end_X` triads completed through callback pairs. This crate folds each
//! triad into a single awaitable operation, leaves everything else as a
//! plain call, and drives session establishment over the adapted surface.
//!
//! ## Architecture
//!
//! - **Bridge** (completion routing): callbacks fired from foreign threads
//!   are resolved onto a dedicated routing task, exactly once per call
//! - **Adapters** (operation surface): triad partitioning, factory-aware
//!   session handles that pre-adapt the services they hand out
//! - **Client** (lifecycle): credential resolution, bounded-retry session
//!   establishment, callback endpoint management
//!
//! ## Example
//!
//! ```ignore
//! use trestle::{CallPayload, Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     // runtime: Arc<dyn ClientRuntime> over your connector stack
//!     let client = Client::new(runtime, ClientConfig::default());
//!     let session = client
//!         .create_session(Some("public"), Some("public"))
//!         .await
//!         .unwrap();
//!
//!     let query = session
//!         .invoke("getQueryService", CallPayload::new())
//!         .await
//!         .unwrap()
//!         .into_adapted()
//!         .unwrap();
//! }
//! ```

pub mod adapter;
pub mod bridge;
pub mod error;
pub mod runtime;
pub mod service;
pub mod testkit;

mod client;

pub use client::{
    Client, ClientConfig, SessionHandle, CONTEXT_AGENT, CONTEXT_ORIGIN, CONTEXT_SESSION,
    DEFAULT_AGENT, MAX_ACQUIRE_ATTEMPTS, PROPERTY_PASSWORD, PROPERTY_USERNAME, SESSION_FACTORY_ID,
};
pub use error::{RemoteError, Result, TrestleError};
pub use service::{CallPayload, Reply, ServiceObject, ServiceRef};
