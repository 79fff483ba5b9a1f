use crate::util::Address;

/// Raw byte copy between two non-overlapping regions. The caller owns both
/// ranges exclusively for the duration of the call; the copy protocol
/// guarantees this for claimed object sections.
///
/// # Safety
/// Both ranges must be valid for `len` bytes and must not overlap.
pub unsafe fn copy(src: Address, dst: Address, len: usize) {
    std::ptr::copy_nonoverlapping::<u8>(src.to_ptr(), dst.to_mut_ptr(), len);
}
