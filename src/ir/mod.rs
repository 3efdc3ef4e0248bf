//! The in-memory trace model shared by messages: clock classes, field
//! classes, event/stream/trace classes and their instances.
//!
//! Class objects are mutable until frozen. Instantiating a stream from a
//! trace class freezes the trace class and everything below it, after which
//! readers may share the tree freely without synchronization.

use crate::error::Error;
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};

pub mod clock;
pub mod event;
pub mod field;
pub mod stream;
pub mod trace;

pub use clock::ClockClass;
pub use event::{EventClass, LogLevel};
pub use field::{
    DisplayBase, Field, FieldClass, FieldPath, FieldPathItem, FieldPathScope, StructureMember,
    VariantOption,
};
pub use stream::{Packet, Stream, StreamClass};
pub use trace::{DestructionListenerId, EnvironmentEntry, Trace, TraceClass};

/// Monotonic freeze flag; mutators consult it and fail once set.
#[derive(Debug, Default)]
pub(crate) struct FreezeFlag(AtomicBool);

impl FreezeFlag {
    pub(crate) fn freeze(&self) {
        self.0.store(true, SeqCst);
    }

    pub(crate) fn is_frozen(&self) -> bool {
        self.0.load(SeqCst)
    }

    pub(crate) fn check_mutable(&self, what: &'static str) -> Result<(), Error> {
        if self.is_frozen() {
            Err(Error::Frozen(what))
        } else {
            Ok(())
        }
    }
}
