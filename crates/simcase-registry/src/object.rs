//! The unit of check-in and check-out.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use simcase_ident::ObjectId;
use tracing::warn;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// A registrable object: identity, payload and lifecycle bookkeeping.
///
/// Constructed unregistered; [`Registry::check_in`](crate::Registry::check_in)
/// moves it into a registry, which then owns the record. The payload is
/// shared: a holder that keeps its own `Arc` clone retains the data
/// however the registry disposes of the record.
pub struct RegObject {
    id: ObjectId,
    serial: u64,
    pub(crate) event_no: u64,
    pub(crate) watches: Vec<usize>,
    pub(crate) registered: bool,
    pub(crate) owned_by_registry: bool,
    payload: Option<Arc<dyn Any + Send + Sync>>,
}

impl RegObject {
    pub fn new(id: ObjectId) -> Self {
        Self {
            id,
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            event_no: 0,
            watches: Vec::new(),
            registered: false,
            owned_by_registry: false,
            payload: None,
        }
    }

    /// Attach a payload, taking a shared handle to it.
    pub fn with_payload(mut self, payload: Arc<dyn Any + Send + Sync>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Mark the record as owned by whichever registry it checks into:
    /// registry teardown disposes of it rather than the holder.
    pub fn owned(mut self) -> Self {
        self.owned_by_registry = true;
        self
    }

    pub fn ident(&self) -> &ObjectId {
        &self.id
    }

    pub fn ident_mut(&mut self) -> &mut ObjectId {
        &mut self.id
    }

    pub fn name(&self) -> &str {
        self.id.name()
    }

    pub fn class_name(&self) -> &str {
        &self.id.header_class
    }

    /// Process-unique identity, stable across check-in/check-out.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn event_no(&self) -> u64 {
        self.event_no
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn is_owned_by_registry(&self) -> bool {
        self.owned_by_registry
    }

    /// Watch handles in registration order.
    pub fn watches(&self) -> &[usize] {
        &self.watches
    }

    /// Borrow the payload as a concrete type.
    pub fn payload_as<T: Any>(&self) -> Option<&T> {
        self.payload.as_ref()?.downcast_ref::<T>()
    }

    /// Clone the shared payload handle.
    pub fn payload(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.payload.clone()
    }

    pub(crate) fn has_payload_of<T: Any>(&self) -> bool {
        self.payload
            .as_ref()
            .is_some_and(|p| p.downcast_ref::<T>().is_some())
    }
}

// hand-written: the payload is `dyn Any`, so only its presence can be
// shown
impl fmt::Debug for RegObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegObject")
            .field("name", &self.id.name())
            .field("class", &self.id.header_class)
            .field("serial", &self.serial)
            .field("event_no", &self.event_no)
            .field("registered", &self.registered)
            .field("owned_by_registry", &self.owned_by_registry)
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

impl Drop for RegObject {
    fn drop(&mut self) {
        // Registry teardown neutralizes both flags before dropping
        // records, so this only fires for a holder that lost track of
        // a checked-in record.
        if self.registered && !self.owned_by_registry {
            warn!(object = %self.id.name(), "object dropped while still registered");
        }
    }
}
