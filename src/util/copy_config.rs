//! Per-collector-instance configuration for the forwarding and copy core.
//!
//! One `CopyConfig` is built when the collector is instantiated and handed by
//! reference to every [`ForwardedHeader`](crate::ForwardedHeader) and
//! [`ObjectScanner`](crate::ObjectScanner). Nothing in this crate consults
//! global state; mixed-width header configurations do not coexist within one
//! run, so the width choice is fixed here rather than carried per call.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::util::constants::{BYTES_IN_COMPRESSED_REFERENCE, BYTES_IN_PAGE, BYTES_IN_WORD};
use crate::util::header_word::{HeaderWord, MIN_SECTION_ALIGNMENT, OUTSTANDING_COPIES_MAX};
use crate::util::{Address, ObjectReference};

/// Immutable configuration shared by all forwarding and scanning operations
/// of one collector instance.
#[derive(Clone, Debug)]
pub struct CopyConfig {
    compress_references: bool,
    section_alignment: usize,
    min_section_size: usize,
    section_fraction_log2: u32,
    max_outstanding_copies: usize,
}

impl CopyConfig {
    /// A configuration with the default section geometry. `compress_references`
    /// selects 32-bit header slots and reference fields instead of native
    /// pointer width.
    pub fn new(compress_references: bool) -> CopyConfig {
        CopyConfig {
            compress_references,
            section_alignment: BYTES_IN_PAGE,
            min_section_size: BYTES_IN_PAGE,
            section_fraction_log2: 7,
            max_outstanding_copies: 4,
        }
    }

    /// Override the section sizing policy. `alignment` is the granule in
    /// which copy work is claimed, `min_section` the smallest claim, and
    /// `fraction_log2` the log2 of the fraction of the remainder a claim
    /// targets. The defaults are tuning values, not load-bearing constants.
    ///
    /// Panics if `alignment` is not a power of two at least
    /// [`MIN_SECTION_ALIGNMENT`], or if `min_section` is not a nonzero
    /// multiple of `alignment`.
    pub fn with_section_geometry(
        mut self,
        alignment: usize,
        min_section: usize,
        fraction_log2: u32,
    ) -> CopyConfig {
        assert!(
            alignment.is_power_of_two() && alignment >= MIN_SECTION_ALIGNMENT,
            "section alignment {} must be a power of two >= {}",
            alignment,
            MIN_SECTION_ALIGNMENT
        );
        assert!(
            min_section != 0 && min_section % alignment == 0,
            "minimum section size {} must be a nonzero multiple of the alignment {}",
            min_section,
            alignment
        );
        self.section_alignment = alignment;
        self.min_section_size = min_section;
        self.section_fraction_log2 = fraction_log2;
        self
    }

    /// Override the cap on threads concurrently copying one object.
    ///
    /// Panics unless `cap` is in `1..=`[`OUTSTANDING_COPIES_MAX`].
    pub fn with_outstanding_cap(mut self, cap: usize) -> CopyConfig {
        assert!(
            (1..=OUTSTANDING_COPIES_MAX).contains(&cap),
            "outstanding copies cap {} must be in 1..={}",
            cap,
            OUTSTANDING_COPIES_MAX
        );
        self.max_outstanding_copies = cap;
        self
    }

    /// Whether object references (and the header slot) are 32 bits wide.
    pub fn compress_references(&self) -> bool {
        self.compress_references
    }

    /// The granule in which copy work is claimed and accounted.
    pub fn section_alignment(&self) -> usize {
        self.section_alignment
    }

    /// The smallest section a thread will claim.
    pub fn min_section_size(&self) -> usize {
        self.min_section_size
    }

    /// log2 of the target fraction of the remainder per claim.
    pub fn section_fraction_log2(&self) -> u32 {
        self.section_fraction_log2
    }

    /// The cap on threads concurrently copying one object. Threads that
    /// cannot join because the cap is reached wait; they never fail.
    pub fn max_outstanding_copies(&self) -> usize {
        self.max_outstanding_copies
    }

    /// The size in bytes of one reference field, and of the header slot.
    pub fn reference_size(&self) -> usize {
        if self.compress_references {
            BYTES_IN_COMPRESSED_REFERENCE
        } else {
            BYTES_IN_WORD
        }
    }

    /// Mask extracting the remaining-bytes field from a progress word.
    pub fn remaining_mask(&self) -> usize {
        !(self.section_alignment - 1)
    }

    /// Atomically read a header slot at the configured width.
    pub fn read_slot(&self, slot: Address, order: Ordering) -> HeaderWord {
        let raw = if self.compress_references {
            unsafe { slot.atomic_load::<AtomicU32>(order) as usize }
        } else {
            unsafe { slot.atomic_load::<AtomicUsize>(order) }
        };
        HeaderWord::from_raw(raw)
    }

    /// Atomically write a header slot at the configured width.
    pub fn write_slot(&self, slot: Address, value: HeaderWord, order: Ordering) {
        if self.compress_references {
            debug_assert!(
                value.raw() <= u32::MAX as usize,
                "header value {:?} does not fit a compressed slot",
                value
            );
            unsafe { slot.atomic_store::<AtomicU32>(value.raw() as u32, order) }
        } else {
            unsafe { slot.atomic_store::<AtomicUsize>(value.raw(), order) }
        }
    }

    /// Compare-exchange on a header slot at the configured width. Returns the
    /// witnessed value on failure.
    pub fn cas_slot(
        &self,
        slot: Address,
        old: HeaderWord,
        new: HeaderWord,
    ) -> Result<HeaderWord, HeaderWord> {
        if self.compress_references {
            debug_assert!(new.raw() <= u32::MAX as usize);
            unsafe {
                slot.compare_exchange::<AtomicU32>(
                    old.raw() as u32,
                    new.raw() as u32,
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                )
            }
            .map(|raw| HeaderWord::from_raw(raw as usize))
            .map_err(|raw| HeaderWord::from_raw(raw as usize))
        } else {
            unsafe {
                slot.compare_exchange::<AtomicUsize>(
                    old.raw(),
                    new.raw(),
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                )
            }
            .map(HeaderWord::from_raw)
            .map_err(HeaderWord::from_raw)
        }
    }

    /// Plain (non-atomic) read of a reference field, as the scanner does when
    /// skipping null slots. The slot must be a valid reference field of a
    /// live object.
    pub fn read_reference(&self, slot: Address) -> ObjectReference {
        let raw = if self.compress_references {
            unsafe { slot.load::<u32>() as usize }
        } else {
            unsafe { slot.load::<usize>() }
        };
        ObjectReference::from_raw_address(unsafe { Address::from_usize(raw) })
    }

    /// Canonicalize a narrow header staged in a full machine word. On a
    /// big-endian 64-bit build with compressed references the two 32-bit
    /// halves arrive swapped; everywhere else this is the identity.
    pub fn normalize_wide(&self, word: HeaderWord) -> HeaderWord {
        if self.compress_references && cfg!(target_endian = "big") {
            word.flip()
        } else {
            word
        }
    }
}

impl Default for CopyConfig {
    fn default() -> Self {
        CopyConfig::new(false)
    }
}
