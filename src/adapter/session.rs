//! Session-specific adaptation: factory accessors return adapted handles.
//!
//! A session object hands out other services through accessors named by
//! convention (`get...Service`). [`adapt_session`] runs the ordinary
//! adaptation pass and then retags each bridged factory accessor so its
//! proxy reply is adapted in turn; callers never touch a raw service
//! object obtained through a session.
//!
//! The `get...Service` match is a naming heuristic, not a declared
//! interface; services supplied from outside the wrapped library must
//! follow it to get factory treatment.

use std::sync::Arc;

use crate::bridge::BridgeHandle;
use crate::service::ServiceRef;

use super::handle::{build_table, AdaptedHandle, OperationKind};

/// Leading fragment of a factory-accessor name.
pub const FACTORY_PREFIX: &str = "get";

/// Trailing fragment of a factory-accessor name.
pub const FACTORY_SUFFIX: &str = "Service";

/// True if the operation name follows the factory-accessor convention.
pub(crate) fn is_factory_name(name: &str) -> bool {
    name.starts_with(FACTORY_PREFIX) && name.ends_with(FACTORY_SUFFIX)
}

/// Adapt a session object, composing adaptation over its factory accessors.
///
/// Performs the full operation-adaptation pass, then turns every bridged
/// `get...Service` entry into a factory: invoking it awaits the underlying
/// accessor and returns the resulting service already adapted. A
/// factory-named operation without a confirmed triad stays a plain
/// passthrough; there is no awaitable to compose over.
pub fn adapt_session(service: ServiceRef, bridge: &BridgeHandle) -> AdaptedHandle {
    let mut table = build_table(service.as_ref());

    for (name, kind) in table.iter_mut() {
        if !is_factory_name(name) {
            continue;
        }
        if let OperationKind::Bridged { begin } = kind {
            *kind = OperationKind::Factory {
                begin: std::mem::take(begin),
            };
        }
    }

    AdaptedHandle::from_parts(service, bridge.clone(), Arc::new(table))
}
