//! The forwarding and copy protocol.
//!
//! A [`ForwardedHeader`] is a transient, stack-scoped view of one object's
//! header slot, snapshotted at a single instant. Through it a collector
//! worker installs a forwarding pointer, copies the object body (alone or
//! cooperatively with other workers), restores the destination header once
//! the body is complete, and, on the backout path of a failed cycle,
//! reverses a forwarding record into a free-list hole.
//!
//! The destination object's header word is the sole coordination point for
//! cooperative copying: all cross-thread agreement is a compare-exchange on
//! that one word. A thread that cannot make progress always has a
//! well-defined alternative (follow the winner, or spin with backoff); no
//! operation here fails in the error-handling sense. Protocol violations by
//! the surrounding collector are debug assertions.

use std::cmp;
use std::sync::atomic::{fence, Ordering};

use crate::util::conversions::{raw_align_down, raw_align_up};
use crate::util::copy_config::CopyConfig;
use crate::util::header_word::HeaderWord;
use crate::util::{memory, Address, ObjectReference};

/// A byte range of the object one thread must copy: `offset` is relative to
/// the object base and identical in source and destination.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SectionToCopy {
    pub offset: usize,
    pub size: usize,
}

/// Tracks whether the owning thread is currently counted in a destination's
/// outstanding-copies field. One per thread per object being copied.
#[derive(Default)]
pub struct CopyParticipant {
    counted: bool,
}

impl CopyParticipant {
    pub fn new() -> CopyParticipant {
        CopyParticipant::default()
    }
}

/// One step of a header-word CAS retry loop: either install a new word and
/// yield the value, or finish without writing.
enum CasStep<T> {
    Replace(HeaderWord, T),
    Finish(T),
}

/// The single retry policy behind every racing header update. `step` maps the
/// currently witnessed word to the word to install; on CAS failure the loop
/// re-runs `step` against the witnessed value.
fn cas_loop<T>(
    config: &CopyConfig,
    slot: Address,
    mut step: impl FnMut(HeaderWord) -> CasStep<T>,
) -> T {
    let mut current = config.read_slot(slot, Ordering::Relaxed);
    loop {
        match step(current) {
            CasStep::Finish(value) => return value,
            CasStep::Replace(new, value) => match config.cas_slot(slot, current, new) {
                Ok(_) => return value,
                Err(witnessed) => current = witnessed,
            },
        }
    }
}

/// Busy-wait with a doubling backoff. Copy completion clears in microseconds
/// on the common path, so spinning beats any OS blocking primitive here.
struct SpinBackoff {
    spins: u32,
}

const MAX_SPINS: u32 = 1 << 12;

impl SpinBackoff {
    fn new() -> SpinBackoff {
        SpinBackoff { spins: 1 }
    }

    fn reset(&mut self) {
        self.spins = 1;
    }

    fn pause(&mut self) {
        for _ in 0..self.spins {
            std::hint::spin_loop();
        }
        self.spins = cmp::min(self.spins << 1, MAX_SPINS);
    }
}

/// A snapshot view of one object's header slot, driving the forwarding state
/// machine for that object:
///
/// `Normal → ForwardedRemote → CopyComplete`, or `Normal → SelfForwarded`
/// (terminal), or (backout only) `ForwardedRemote → ReverseForwarded`.
///
/// The snapshot is taken once at construction and never re-read implicitly;
/// operations that must observe the live header do so through explicit atomic
/// reads.
pub struct ForwardedHeader<'a> {
    object: ObjectReference,
    preserved: HeaderWord,
    config: &'a CopyConfig,
}

impl<'a> ForwardedHeader<'a> {
    /// Snapshot `object`'s header slot. The acquire load pairs with the
    /// release fences that order the destination's progress word and copied
    /// body ahead of the forwarding record and cleared hint a reader trusts.
    pub fn new(object: ObjectReference, config: &'a CopyConfig) -> ForwardedHeader<'a> {
        let preserved = config.read_slot(object.to_raw_address(), Ordering::Acquire);
        ForwardedHeader {
            object,
            preserved,
            config,
        }
    }

    /// The object this header was snapshotted from.
    pub fn object(&self) -> ObjectReference {
        self.object
    }

    /// The preserved header snapshot.
    pub fn preserved(&self) -> HeaderWord {
        self.preserved
    }

    fn header_slot(&self) -> Address {
        self.object.to_raw_address()
    }

    fn header_slot_of(object: ObjectReference) -> Address {
        object.to_raw_address()
    }

    /// True if the snapshot holds any forwarding record, remote or self.
    pub fn is_forwarded_pointer(&self) -> bool {
        self.preserved.is_forwarded()
    }

    /// True if the snapshot holds a remote forwarding pointer.
    pub fn is_strictly_forwarded_pointer(&self) -> bool {
        self.preserved.is_strictly_forwarded()
    }

    /// True if the snapshot shows the object forwarded to itself.
    pub fn is_self_forwarded_pointer(&self) -> bool {
        self.preserved.is_self_forwarded()
    }

    /// The remote destination recorded in the snapshot.
    pub fn forwarded_object(&self) -> ObjectReference {
        debug_assert!(
            self.is_strictly_forwarded_pointer(),
            "object {} is not forwarded ({:?})",
            self.object,
            self.preserved
        );
        ObjectReference::from_raw_address(self.preserved.forwarded_address())
    }

    /// Where the live copy of this object is: the remote destination for a
    /// forwarded object, the object's own address when self-forwarded.
    pub fn non_strict_forwarded_object(&self) -> ObjectReference {
        debug_assert!(self.is_forwarded_pointer());
        if self.preserved.is_self_forwarded() {
            self.object
        } else {
            self.forwarded_object()
        }
    }

    fn resolve(object: ObjectReference, word: HeaderWord) -> ObjectReference {
        debug_assert!(
            word.is_forwarded(),
            "forwarding race on {} lost to a non-forwarding write {:?}",
            object,
            word
        );
        if word.is_self_forwarded() {
            object
        } else {
            ObjectReference::from_raw_address(word.forwarded_address())
        }
    }

    /// Attempt to install a forwarding pointer to `destination` in the source
    /// header. Exactly one racing thread wins; every caller, winner or loser,
    /// gets the single winning destination back. Set `copy_in_progress_hint`
    /// when the destination body will be filled in cooperatively after this
    /// call; leave it clear for the single-shot copy path.
    ///
    /// The caller must not have observed the object as already forwarded.
    pub fn set_forwarded_object(
        &self,
        destination: ObjectReference,
        copy_in_progress_hint: bool,
    ) -> ObjectReference {
        debug_assert!(
            !self.is_forwarded_pointer(),
            "object {} was already forwarded when the forwarding attempt was made",
            self.object
        );
        let forwarded = HeaderWord::forwarded(destination.to_raw_address(), copy_in_progress_hint);
        let preserved = self.preserved;
        let object = self.object;
        let winner = cas_loop(self.config, self.header_slot(), |current| {
            if current != preserved {
                // another thread already installed a record; follow it
                CasStep::Finish(Self::resolve(object, current))
            } else {
                CasStep::Replace(forwarded, destination)
            }
        });
        if winner == destination {
            trace!("set_forwarded_object({}, {})", object, destination);
        }
        winner
    }

    /// Forward the object to itself. The concurrent-collection fallback when
    /// a remote copy cannot proceed; no destination copy exists afterwards.
    /// Returns where the live object is, which is the object itself unless a
    /// racing thread completed a remote forward first.
    pub fn set_self_forwarded_object(&self) -> ObjectReference {
        let preserved = self.preserved;
        let object = self.object;
        cas_loop(self.config, self.header_slot(), |current| {
            if current != preserved {
                CasStep::Finish(Self::resolve(object, current))
            } else {
                CasStep::Replace(current.with_self_forwarded(), object)
            }
        })
    }

    /// Clear a self-forwarded record, returning the object to normal. Backout
    /// only; runs after all workers have quiesced.
    pub fn restore_self_forwarded_pointer(&self) {
        debug_assert!(self.is_self_forwarded_pointer());
        self.config.write_slot(
            self.header_slot(),
            self.preserved.without_self_forwarded(),
            Ordering::Relaxed,
        );
    }

    /// Size of the header prefix that is never copied by sections; its final
    /// content is produced by fixup instead.
    fn reserved_prefix(&self) -> usize {
        self.config.reference_size()
    }

    /// The winner's initial chunk for a body of `remainder` bytes, and the
    /// remaining byte count to publish. The initial chunk absorbs the
    /// unaligned tail so the published count is always a whole number of
    /// section granules.
    fn initial_section(&self, remainder: usize) -> (usize, usize) {
        let config = self.config;
        let want = cmp::max(
            remainder >> config.section_fraction_log2(),
            config.min_section_size(),
        );
        if want >= remainder {
            (remainder, 0)
        } else {
            let remaining = raw_align_down(remainder - want, config.section_alignment());
            (remainder - remaining, remaining)
        }
    }

    /// Size of the next claim when `remaining` bytes are unclaimed.
    /// `remaining` is granule-aligned; so is the result, except that the last
    /// claim is clipped to exactly exhaust the count.
    fn claim_size(&self, remaining: usize) -> usize {
        let config = self.config;
        let want = raw_align_up(
            cmp::max(
                remaining >> config.section_fraction_log2(),
                config.min_section_size(),
            ),
            config.section_alignment(),
        );
        cmp::min(want, remaining)
    }

    /// Stage the copy-progress word in the destination header and return the
    /// initial section the staging thread must copy. Called with the exact
    /// total object size (header included), BEFORE [`set_forwarded_object`]:
    /// the destination is thread-private until the forwarding CAS publishes
    /// it, so a plain store plus a release fence is all the progress word
    /// needs. The initial section is excluded from the published remaining
    /// count, so it too must be copied before the CAS; a waiter that drains
    /// the claimable remainder is entitled to every earlier byte. A thread
    /// whose install then loses simply abandons its staged destination.
    ///
    /// [`set_forwarded_object`]: Self::set_forwarded_object
    pub fn copy_setup(&self, destination: ObjectReference, total_size: usize) -> SectionToCopy {
        let reserved = self.reserved_prefix();
        debug_assert!(
            total_size >= reserved,
            "object size {} is smaller than its header",
            total_size
        );
        let (initial, remaining) = self.initial_section(total_size - reserved);
        self.config.write_slot(
            Self::header_slot_of(destination),
            HeaderWord::progress(remaining, 0),
            Ordering::Relaxed,
        );
        // a helper that observes the forwarding pointer published by the
        // subsequent CAS must also observe this progress word
        fence(Ordering::Release);
        trace!(
            "copy_setup({}, {}): initial {} remaining {}",
            self.object,
            destination,
            initial,
            remaining
        );
        SectionToCopy {
            offset: reserved,
            size: initial,
        }
    }

    /// Copy one claimed byte range from source to destination. No
    /// synchronization: exclusive ownership of the range comes from the claim
    /// that produced it.
    pub fn copy_section(&self, destination: ObjectReference, offset: usize, size: usize) {
        debug_assert!(offset >= self.reserved_prefix());
        unsafe {
            memory::copy(
                self.object.to_raw_address() + offset,
                destination.to_raw_address() + offset,
                size,
            );
        }
    }

    /// Try to claim the next section of `destination`'s body to copy. Joins
    /// the outstanding-copies count on a thread's first claim (if below the
    /// configured cap) and leaves it once nothing remains. Returns `None`
    /// when no work could be claimed: either the copy is finished, about to
    /// finish, or the copier cap is reached; the caller waits, it never
    /// fails.
    pub fn win_object_section_to_copy(
        &self,
        destination: ObjectReference,
        total_size: usize,
        participant: &mut CopyParticipant,
    ) -> Option<SectionToCopy> {
        let config = self.config;
        let counted = participant.counted;
        let (section, counted_after) =
            cas_loop(config, Self::header_slot_of(destination), |current| {
                if !current.is_being_copied() {
                    // the copy was committed; a counted copier would have
                    // blocked that commit
                    debug_assert!(!counted);
                    return CasStep::Finish((None, false));
                }
                let remaining = current.remaining_to_copy(config);
                let outstanding = current.outstanding_copies();
                if remaining == 0 {
                    if counted {
                        // done helping; withdraw from the copier count
                        return CasStep::Replace(
                            current.with_outstanding_copies(outstanding - 1),
                            (None, false),
                        );
                    }
                    return CasStep::Finish((None, false));
                }
                if !counted && outstanding >= config.max_outstanding_copies() {
                    return CasStep::Finish((None, false));
                }
                let claim = self.claim_size(remaining);
                let section = SectionToCopy {
                    offset: total_size - remaining,
                    size: claim,
                };
                let outstanding = if counted { outstanding } else { outstanding + 1 };
                CasStep::Replace(
                    HeaderWord::progress(remaining - claim, outstanding),
                    (Some(section), true),
                )
            });
        participant.counted = counted_after;
        section
    }

    /// The winning thread's loop after [`copy_setup`](Self::copy_setup) and
    /// copying its initial section: claim and copy sections until none
    /// remain, then wait for helpers still writing their claimed sections.
    /// The winner must not fix up the destination while any helper is
    /// outstanding.
    pub fn copy_or_wait_winner(&self, destination: ObjectReference, total_size: usize) {
        let mut participant = CopyParticipant::new();
        let mut backoff = SpinBackoff::new();
        loop {
            if let Some(section) =
                self.win_object_section_to_copy(destination, total_size, &mut participant)
            {
                self.copy_section(destination, section.offset, section.size);
                backoff.reset();
                continue;
            }
            let word = self
                .config
                .read_slot(Self::header_slot_of(destination), Ordering::Acquire);
            debug_assert!(
                word.is_being_copied(),
                "destination {} header fixed up before the winner finished",
                destination
            );
            if word.remaining_to_copy(self.config) == 0 && word.outstanding_copies() == 0 {
                return;
            }
            backoff.pause();
        }
    }

    /// Wait until `destination` holds the object's complete content, helping
    /// to copy if sections are still claimable. For threads that found the
    /// object forwarded; the snapshot must be one that observed the
    /// forwarding record, since the fast path trusts its hint bit: a clear
    /// being-copied hint means copying finished before this header was
    /// constructed, and the destination header is never touched.
    pub fn copy_or_wait(&self, destination: ObjectReference, total_size: usize) {
        if !self.preserved.has_being_copied_hint() {
            return;
        }
        self.copy_or_wait_outline(destination, total_size);
    }

    fn copy_or_wait_outline(&self, destination: ObjectReference, total_size: usize) {
        let mut participant = CopyParticipant::new();
        let mut backoff = SpinBackoff::new();
        loop {
            if let Some(section) =
                self.win_object_section_to_copy(destination, total_size, &mut participant)
            {
                self.copy_section(destination, section.offset, section.size);
                backoff.reset();
                continue;
            }
            let word = self
                .config
                .read_slot(Self::header_slot_of(destination), Ordering::Acquire);
            if !word.is_being_copied() {
                // fixed up: the body is complete and published
                return;
            }
            if word.remaining_to_copy(self.config) == 0 && word.outstanding_copies() == 0 {
                // every byte is copied; only the winner's fixup is pending
                return;
            }
            backoff.pause();
        }
    }

    /// Restore the preserved non-progress header bits in the destination
    /// while leaving every progress bit untouched, so threads still polling
    /// the progress field are unaffected.
    pub fn commence_fixup(&self, destination: ObjectReference) {
        let config = self.config;
        let progress_mask = config.remaining_mask()
            | crate::util::header_word::OUTSTANDING_COPIES_MASK
            | crate::util::header_word::BEING_COPIED_TAG;
        let preserved = self.preserved;
        cas_loop(config, Self::header_slot_of(destination), |current| {
            debug_assert!(current.is_being_copied());
            let merged = HeaderWord::from_raw(
                (current.raw() & progress_mask) | (preserved.raw() & !progress_mask),
            );
            CasStep::Replace(merged, ())
        });
    }

    /// The final step: publish the destination's fully resolved header in a
    /// single atomic write, then clear the source record's being-copied hint.
    /// Callable only when no bytes remain and no copier is outstanding.
    pub fn commit_fixup(&self, destination: ObjectReference) {
        let config = self.config;
        let destination_slot = Self::header_slot_of(destination);
        #[cfg(debug_assertions)]
        {
            let word = config.read_slot(destination_slot, Ordering::Relaxed);
            debug_assert!(
                word.is_being_copied()
                    && word.remaining_to_copy(config) == 0
                    && word.outstanding_copies() == 0,
                "commit_fixup({}) with copy still in flight: {:?}",
                destination,
                word
            );
        }
        // every copied body byte must be visible before the header reads as
        // complete through the forwarding pointer
        fence(Ordering::Release);
        config.write_slot(destination_slot, self.preserved, Ordering::Release);

        // the hint is an optimization flag only; dropping it lets later
        // readers take the copy_or_wait fast path
        let source_slot = self.header_slot();
        let installed = config.read_slot(source_slot, Ordering::Relaxed);
        debug_assert!(installed.is_strictly_forwarded());
        if installed.has_being_copied_hint() {
            config.write_slot(
                source_slot,
                installed.without_being_copied_hint(),
                Ordering::Relaxed,
            );
        }
        trace!("commit_fixup({}, {})", self.object, destination);
    }

    /// Single-shot fixup for the non-concurrent copy path: the body was
    /// copied wholesale (header slot included, so the destination header
    /// currently holds the forwarding record); write the preserved original
    /// value over it.
    pub fn fixup_forwarded_object(&self, destination: ObjectReference) {
        self.config.write_slot(
            Self::header_slot_of(destination),
            self.preserved,
            Ordering::Relaxed,
        );
    }

    /// Turn this object's abandoned destination into a free-list hole whose
    /// "next" field points back at this object, keeping the heap walkable
    /// while a failed cycle is undone. Backout only: runs single-threaded
    /// after all workers have quiesced, so a plain store suffices.
    pub fn reverse_forward(&self) {
        debug_assert!(self.is_strictly_forwarded_pointer());
        let destination = self.forwarded_object();
        self.config.write_slot(
            Self::header_slot_of(destination),
            HeaderWord::hole(self.object.to_raw_address()),
            Ordering::Relaxed,
        );
        trace!("reverse_forward({} <- {})", self.object, destination);
    }

    /// True if the snapshot reads as a reverse-forwarded hole. Bit-wise this
    /// is the free-list hole tag that self-forwarding overloads; only the
    /// backout phase may interpret it this way.
    pub fn is_reverse_forwarded_pointer(&self) -> bool {
        self.preserved.is_self_forwarded()
    }

    /// The pre-move original this abandoned destination points back at.
    pub fn reverse_forwarded_pointer(&self) -> ObjectReference {
        debug_assert!(self.is_reverse_forwarded_pointer());
        ObjectReference::from_raw_address(self.preserved.forwarded_address())
    }
}
