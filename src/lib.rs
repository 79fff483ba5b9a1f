//! The forwarding-and-copy core of a parallel, optionally concurrent,
//! evacuating garbage collector.
//!
//! This crate implements the mechanics of moving one live object from a
//! source region to a destination region while collector worker threads, and
//! possibly mutator threads, race on the object headers involved. It covers
//! three tightly coupled pieces:
//!
//! * [`util::header_word`]: the bit-level encoding of the single header word
//!   used to tag an object as forwarded, self-forwarded, or being copied.
//! * [`util::object_forwarding`]: the forwarding protocol proper, with atomic
//!   installation of a forwarding pointer, cooperative copying of the object
//!   body by multiple threads, fixup of the destination header, and reversal
//!   of forwarding during a backed-out collection cycle.
//! * [`util::object_scanner`]: a generic bitmap-windowed iterator over the
//!   reference-bearing slots of an object, independent of its concrete shape.
//!
//! Everything else a collector needs (allocation, marking, root scanning,
//! write barriers, object layout) is an external collaborator. The crate
//! consumes a small interface from those components (a destination address
//! and an exact object size per copy, slot bitmaps per shape) and exposes the
//! forward/copy/wait and get-next-slot operations they call back into.
//!
//! All cross-thread agreement is expressed as compare-exchange on a single
//! header word; there are no locks and no OS blocking primitives. See
//! [`util::copy_config::CopyConfig`] for the per-collector-instance
//! configuration (header width, section geometry, copier cap).

#[macro_use]
extern crate log;
#[macro_use]
extern crate static_assertions;

pub mod util;

pub use crate::util::address::Address;
pub use crate::util::address::ObjectReference;
pub use crate::util::copy_config::CopyConfig;
pub use crate::util::header_word::HeaderWord;
pub use crate::util::object_forwarding::CopyParticipant;
pub use crate::util::object_forwarding::ForwardedHeader;
pub use crate::util::object_forwarding::SectionToCopy;
pub use crate::util::object_scanner::IndexableSlotMap;
pub use crate::util::object_scanner::NoMoreSlots;
pub use crate::util::object_scanner::ObjectScanner;
pub use crate::util::object_scanner::SlotMap;
pub use crate::util::object_scanner::SlotMapProvider;
