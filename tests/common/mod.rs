#![allow(dead_code)]

use evac::{Address, ObjectReference};

/// A header value with the forwarding tag bits clear, as any real object's
/// flags/class word must have.
pub const ORIGINAL_HEADER: usize = 0xc0ffee00;

/// A word-aligned heap-object stand-in with the header slot in word 0 and a
/// recognizable per-word body pattern.
pub struct HeapObject {
    storage: Box<[usize]>,
}

impl HeapObject {
    pub fn new(words: usize, header: usize) -> HeapObject {
        assert!(words >= 1);
        let mut storage = vec![0usize; words].into_boxed_slice();
        storage[0] = header;
        HeapObject { storage }
    }

    /// An object whose body words carry a seed-derived pattern, so a missed
    /// or misplaced copy shows up as a mismatch.
    pub fn with_pattern(words: usize, header: usize, seed: usize) -> HeapObject {
        let mut object = HeapObject::new(words, header);
        for i in 1..words {
            object.storage[i] = seed.wrapping_mul(0x9e37_79b9).wrapping_add(i);
        }
        object
    }

    pub fn reference(&self) -> ObjectReference {
        ObjectReference::from_raw_address(Address::from_ptr(self.storage.as_ptr()))
    }

    pub fn size_in_bytes(&self) -> usize {
        std::mem::size_of_val(&*self.storage)
    }

    pub fn word_count(&self) -> usize {
        self.storage.len()
    }

    pub fn word(&self, index: usize) -> usize {
        unsafe {
            (self.reference().to_raw_address() + index * std::mem::size_of::<usize>())
                .load::<usize>()
        }
    }

    pub fn set_word(&mut self, index: usize, value: usize) {
        self.storage[index] = value;
    }
}
