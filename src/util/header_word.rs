//! Bit-level encoding of the header slot used by the forwarding protocol.
//!
//! The first word of every object (the header slot) is overloaded: it holds
//! normal object metadata (a class reference plus a low-order flags byte)
//! until the object is forwarded, a forwarding record afterwards, and
//! free-list linkage if the object is reclaimed. Which role is active is
//! determined by tag bits in the low byte. [`HeaderWord`] confines all of the
//! masking and bit arithmetic to one value type; no other component performs
//! raw bit manipulation on header values.
//!
//! Tag bits, unshifted in the low byte of the slot:
//!
//! * bit 0, [`SELF_FORWARDED_TAG`]: the object forwards to itself. This bit
//!   overloads the free-list hole tag; during backout the same encoding turns
//!   an abandoned destination into a hole pointing back at the original.
//! * bit 1, [`BEING_COPIED_HINT`]: set in a *source* forwarding record while
//!   the destination body copy may still be in progress. A clear bit lets
//!   readers skip the destination header entirely.
//! * bit 2, [`FORWARDED_TAG`]: a forwarding pointer has been installed.
//!
//! A *destination* header reuses the [`FORWARDED_TAG`] position as the
//! being-copied tag while its body is still being filled in. While that bit
//! is set the rest of the word encodes copy progress: a 4-bit count of
//! threads currently copying a section, and the number of bytes not yet
//! claimed in the bits at and above the configured section alignment.

use crate::util::copy_config::CopyConfig;
use crate::util::Address;

/// Set when an object forwards to itself (concurrent collection fallback).
/// Overloads the free-list hole tag.
pub const SELF_FORWARDED_TAG: usize = 1 << 0;
/// Set in a source forwarding record while the destination copy may still be
/// in progress.
pub const BEING_COPIED_HINT: usize = 1 << 1;
/// Set once a forwarding pointer has been installed in the source object.
pub const FORWARDED_TAG: usize = 1 << 2;
/// Removes all forwarding tags when extracting a pointer from a tagged slot.
pub const FORWARDED_TAG_MASK: usize = SELF_FORWARDED_TAG | BEING_COPIED_HINT | FORWARDED_TAG;

/// Destination-context reading of the [`FORWARDED_TAG`] bit position.
pub(crate) const BEING_COPIED_TAG: usize = FORWARDED_TAG;

pub(crate) const OUTSTANDING_COPIES_SHIFT: usize = 3;
pub(crate) const OUTSTANDING_COPIES_BITS: usize = 4;
pub(crate) const OUTSTANDING_COPIES_MASK: usize =
    ((1 << OUTSTANDING_COPIES_BITS) - 1) << OUTSTANDING_COPIES_SHIFT;

/// The largest copier count the progress encoding can represent. Collector
/// configurations cap outstanding copies at or below this.
pub const OUTSTANDING_COPIES_MAX: usize = (1 << OUTSTANDING_COPIES_BITS) - 1;

/// The smallest section alignment any configuration may use: the remaining
/// byte count shares the progress word with the tag bits and the copier
/// count, so it must be aligned above both fields.
pub const MIN_SECTION_ALIGNMENT: usize = 1 << (OUTSTANDING_COPIES_SHIFT + OUTSTANDING_COPIES_BITS);

const_assert!(MIN_SECTION_ALIGNMENT > FORWARDED_TAG_MASK | OUTSTANDING_COPIES_MASK);
const_assert!(OUTSTANDING_COPIES_MASK & FORWARDED_TAG_MASK == 0);

/// The value-domain image of one header slot.
///
/// A `HeaderWord` always holds the canonical (tag-bits-in-the-low-byte) form,
/// regardless of the physical slot width selected by the configuration.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct HeaderWord(usize);

impl HeaderWord {
    /// Wrap a raw slot value.
    pub const fn from_raw(raw: usize) -> HeaderWord {
        HeaderWord(raw)
    }

    /// The raw slot value.
    pub const fn raw(self) -> usize {
        self.0
    }

    /// True if any forwarding record (remote or self) has been installed.
    pub const fn is_forwarded(self) -> bool {
        self.0 & (FORWARDED_TAG | SELF_FORWARDED_TAG) != 0
    }

    /// True if a remote forwarding pointer has been installed.
    pub const fn is_strictly_forwarded(self) -> bool {
        self.0 & FORWARDED_TAG != 0
    }

    /// True if the object forwards to itself. Mutually exclusive with
    /// [`is_strictly_forwarded`](Self::is_strictly_forwarded).
    pub const fn is_self_forwarded(self) -> bool {
        self.0 & (FORWARDED_TAG | SELF_FORWARDED_TAG) == SELF_FORWARDED_TAG
    }

    /// True if the record hints that the destination body copy may still be
    /// in progress. Only meaningful alongside [`FORWARDED_TAG`].
    pub const fn has_being_copied_hint(self) -> bool {
        self.0 & BEING_COPIED_HINT != 0
    }

    /// The pointer value held in a tagged slot, with all tags removed.
    pub fn forwarded_address(self) -> Address {
        unsafe { Address::from_usize(self.0 & !FORWARDED_TAG_MASK) }
    }

    /// Compose a source forwarding record.
    pub fn forwarded(destination: Address, copy_in_progress_hint: bool) -> HeaderWord {
        debug_assert!(destination.is_aligned_to(FORWARDED_TAG_MASK + 1));
        let hint = if copy_in_progress_hint {
            BEING_COPIED_HINT
        } else {
            0
        };
        HeaderWord(destination.as_usize() | FORWARDED_TAG | hint)
    }

    /// This word with the self-forwarded tag set.
    pub const fn with_self_forwarded(self) -> HeaderWord {
        HeaderWord(self.0 | SELF_FORWARDED_TAG)
    }

    /// This word with the self-forwarded tag cleared.
    pub const fn without_self_forwarded(self) -> HeaderWord {
        HeaderWord(self.0 & !SELF_FORWARDED_TAG)
    }

    /// This word with the being-copied hint cleared.
    pub const fn without_being_copied_hint(self) -> HeaderWord {
        HeaderWord(self.0 & !BEING_COPIED_HINT)
    }

    /// Compose a free-list hole pointing back at `original`. Used only on the
    /// single-threaded backout path to reverse a forwarding record.
    pub fn hole(original: Address) -> HeaderWord {
        debug_assert!(original.is_aligned_to(FORWARDED_TAG_MASK + 1));
        HeaderWord(original.as_usize() | SELF_FORWARDED_TAG)
    }

    /// Compose a destination progress word. `remaining` must be a multiple of
    /// the configured section alignment.
    pub fn progress(remaining: usize, outstanding: usize) -> HeaderWord {
        debug_assert!(outstanding <= OUTSTANDING_COPIES_MAX);
        debug_assert!(remaining & (FORWARDED_TAG_MASK | OUTSTANDING_COPIES_MASK) == 0);
        HeaderWord(remaining | (outstanding << OUTSTANDING_COPIES_SHIFT) | BEING_COPIED_TAG)
    }

    /// True if this destination header still encodes copy progress.
    pub const fn is_being_copied(self) -> bool {
        self.0 & BEING_COPIED_TAG != 0
    }

    /// The number of threads currently copying a section of this object.
    /// Only valid while [`is_being_copied`](Self::is_being_copied).
    pub const fn outstanding_copies(self) -> usize {
        (self.0 & OUTSTANDING_COPIES_MASK) >> OUTSTANDING_COPIES_SHIFT
    }

    /// This progress word with a different copier count.
    pub fn with_outstanding_copies(self, outstanding: usize) -> HeaderWord {
        debug_assert!(self.is_being_copied());
        debug_assert!(outstanding <= OUTSTANDING_COPIES_MAX);
        HeaderWord(
            (self.0 & !OUTSTANDING_COPIES_MASK) | (outstanding << OUTSTANDING_COPIES_SHIFT),
        )
    }

    /// The number of bytes not yet claimed for copying. Only valid while
    /// [`is_being_copied`](Self::is_being_copied).
    pub fn remaining_to_copy(self, config: &CopyConfig) -> usize {
        self.0 & config.remaining_mask()
    }

    /// Swap the two halves of the word. On a big-endian 64-bit build with
    /// compressed references, a narrow header staged in a wide word lands in
    /// the high half; flipping restores the canonical form with the tag bits
    /// in the low byte. See [`CopyConfig::normalize_wide`].
    pub const fn flip(self) -> HeaderWord {
        if cfg!(target_pointer_width = "64") {
            HeaderWord(self.0.rotate_left(32))
        } else {
            self
        }
    }
}

impl std::fmt::Debug for HeaderWord {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "HeaderWord({:#x})", self.0)
    }
}
