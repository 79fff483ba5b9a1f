//! Bitmap-windowed iteration over the reference slots of an object.
//!
//! An [`ObjectScanner`] walks the reference-bearing slots of one object
//! without knowing its concrete shape. Shape knowledge arrives as
//! [`SlotMap`] windows: a base address plus a bitmap in which bit *i* marks
//! the slot at `base + i * reference_size` as reference-bearing. Objects
//! wider than one word's worth of bits supply further windows through a
//! [`SlotMapProvider`]; single-window scanners say so up front and the
//! provider is never consulted.
//!
//! The hot loop is pure bit arithmetic: find the lowest set bit, clear it,
//! load the slot, skip nulls. Slot loads are plain (non-atomic) reads; the
//! scanner runs over objects the collector has exclusive or stable access
//! to.

use crate::util::constants::BITS_IN_WORD;
use crate::util::copy_config::CopyConfig;
use crate::util::Address;

/// The scanner is walking root slots rather than a heap object.
pub const SCAN_ROOTS: u32 = 1 << 0;
/// The scanner is walking a heap object during traversal.
pub const SCAN_HEAP: u32 = 1 << 1;
/// The scanned object is indexable (uniform-stride element region).
pub const INDEXABLE_OBJECT: u32 = 1 << 2;
/// The initial window is the only window; the provider is never called.
pub const NO_MORE_SLOTS: u32 = 1 << 3;

/// One window of slot-shape information.
///
/// `leaf_map` is an optional parallel bitmap: a set bit marks a slot whose
/// referent is known, without dereferencing it, to hold no references of its
/// own. Providers with no such knowledge leave it zero.
#[derive(Copy, Clone, Debug)]
pub struct SlotMap {
    pub base: Address,
    pub bitmap: usize,
    pub leaf_map: usize,
    pub has_more: bool,
}

impl SlotMap {
    /// A window with no leaf information.
    pub fn new(base: Address, bitmap: usize, has_more: bool) -> SlotMap {
        SlotMap {
            base,
            bitmap,
            leaf_map: 0,
            has_more,
        }
    }
}

/// Supplies successive [`SlotMap`] windows once the current one is
/// exhausted. Implemented per object shape.
pub trait SlotMapProvider {
    fn next_slot_map(&mut self) -> Option<SlotMap>;
}

/// Provider for single-window shapes. [`ObjectScanner`] never calls it; it
/// exists so leaf-optimized scanners need no provider of their own.
pub struct NoMoreSlots;

impl SlotMapProvider for NoMoreSlots {
    fn next_slot_map(&mut self) -> Option<SlotMap> {
        None
    }
}

/// Windows over the element region of an indexable object in which every
/// element is a reference. Yields full-bitmap windows of [`BITS_IN_WORD`]
/// slots and a partial final window.
pub struct IndexableSlotMap {
    next: Address,
    slots_left: usize,
    slot_size: usize,
}

impl IndexableSlotMap {
    /// Windows over `slot_count` contiguous reference slots starting at
    /// `elements`.
    pub fn new(elements: Address, slot_count: usize, config: &CopyConfig) -> IndexableSlotMap {
        IndexableSlotMap {
            next: elements,
            slots_left: slot_count,
            slot_size: config.reference_size(),
        }
    }
}

impl SlotMapProvider for IndexableSlotMap {
    fn next_slot_map(&mut self) -> Option<SlotMap> {
        if self.slots_left == 0 {
            return None;
        }
        let count = self.slots_left.min(BITS_IN_WORD);
        let bitmap = if count == BITS_IN_WORD {
            !0
        } else {
            (1 << count) - 1
        };
        let base = self.next;
        self.next += count * self.slot_size;
        self.slots_left -= count;
        Some(SlotMap::new(base, bitmap, self.slots_left != 0))
    }
}

/// Walks the non-null reference slots of one object, in address order, each
/// exactly once.
pub struct ObjectScanner<'a, P: SlotMapProvider> {
    config: &'a CopyConfig,
    flags: u32,
    base: Address,
    bitmap: usize,
    leaf_map: usize,
    has_more: bool,
    provider: P,
}

impl<'a> ObjectScanner<'a, NoMoreSlots> {
    /// A leaf-optimized scanner over a shape known to fit one window. The
    /// windowing hook is statically absent.
    pub fn single_window(
        base: Address,
        bitmap: usize,
        flags: u32,
        config: &'a CopyConfig,
    ) -> ObjectScanner<'a, NoMoreSlots> {
        ObjectScanner {
            config,
            flags: flags | NO_MORE_SLOTS,
            base,
            bitmap,
            leaf_map: 0,
            has_more: false,
            provider: NoMoreSlots,
        }
    }
}

impl<'a> ObjectScanner<'a, IndexableSlotMap> {
    /// A scanner over the element region of an indexable object in which
    /// every element is a reference.
    pub fn indexable(
        elements: Address,
        slot_count: usize,
        flags: u32,
        config: &'a CopyConfig,
    ) -> ObjectScanner<'a, IndexableSlotMap> {
        let mut provider = IndexableSlotMap::new(elements, slot_count, config);
        let first = provider
            .next_slot_map()
            .unwrap_or(SlotMap::new(elements, 0, false));
        ObjectScanner::new(first, flags | INDEXABLE_OBJECT, provider, config)
    }
}

impl<'a, P: SlotMapProvider> ObjectScanner<'a, P> {
    /// A scanner starting at `initial`, drawing further windows from
    /// `provider` as long as each window's `has_more` says one exists.
    pub fn new(
        initial: SlotMap,
        flags: u32,
        provider: P,
        config: &'a CopyConfig,
    ) -> ObjectScanner<'a, P> {
        let has_more = initial.has_more && flags & NO_MORE_SLOTS == 0;
        ObjectScanner {
            config,
            flags,
            base: initial.base,
            bitmap: initial.bitmap,
            leaf_map: initial.leaf_map,
            has_more,
            provider,
        }
    }

    pub fn is_heap_scan(&self) -> bool {
        self.flags & SCAN_HEAP != 0
    }

    pub fn is_root_scan(&self) -> bool {
        self.flags & SCAN_ROOTS != 0
    }

    pub fn is_indexable_object(&self) -> bool {
        self.flags & INDEXABLE_OBJECT != 0
    }

    /// True if no reference slot remains to be visited: the current bitmap
    /// is empty and no further window exists. For a freshly constructed
    /// scanner this identifies a leaf object.
    pub fn is_leaf_object(&self) -> bool {
        self.bitmap == 0 && !self.has_more
    }

    /// The address of the next non-null reference slot, or `None` once the
    /// object is exhausted.
    pub fn next_slot(&mut self) -> Option<Address> {
        self.next_slot_with_leaf_info().map(|(slot, _)| slot)
    }

    /// Like [`next_slot`](Self::next_slot), also reporting whether the
    /// window's leaf map marks the slot's referent as childless.
    pub fn next_slot_with_leaf_info(&mut self) -> Option<(Address, bool)> {
        loop {
            while self.bitmap != 0 {
                let index = self.bitmap.trailing_zeros() as usize;
                self.bitmap &= self.bitmap - 1;
                let slot = self.base + index * self.config.reference_size();
                if self.config.read_reference(slot).is_null() {
                    continue;
                }
                let leaf = self.leaf_map & (1 << index) != 0;
                return Some((slot, leaf));
            }
            if !self.has_more {
                return None;
            }
            match self.provider.next_slot_map() {
                Some(map) => {
                    self.base = map.base;
                    self.bitmap = map.bitmap;
                    self.leaf_map = map.leaf_map;
                    self.has_more = map.has_more;
                }
                None => {
                    self.has_more = false;
                    return None;
                }
            }
        }
    }
}
