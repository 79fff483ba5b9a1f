//! Multi-threaded exercises of the forwarding and cooperative-copy protocol.

mod common;

use common::{HeapObject, ORIGINAL_HEADER};
use evac::{CopyConfig, ForwardedHeader, ObjectReference};
use std::sync::atomic::Ordering;
use std::sync::Barrier;

#[test]
fn racing_installers_agree_on_one_destination() {
    let config = CopyConfig::default();
    for _ in 0..50 {
        let source = HeapObject::new(8, ORIGINAL_HEADER);
        let destinations: Vec<HeapObject> = (0..4).map(|_| HeapObject::new(8, 0)).collect();
        let barrier = Barrier::new(destinations.len());

        let winners: Vec<ObjectReference> = std::thread::scope(|s| {
            let handles: Vec<_> = destinations
                .iter()
                .map(|dest| {
                    let source_ref = source.reference();
                    let dest_ref = dest.reference();
                    let barrier = &barrier;
                    let config = &config;
                    s.spawn(move || {
                        // snapshot before the race begins
                        let header = ForwardedHeader::new(source_ref, config);
                        barrier.wait();
                        header.set_forwarded_object(dest_ref, false)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let winner = winners[0];
        assert!(winners.iter().all(|&w| w == winner));
        assert!(destinations.iter().any(|d| d.reference() == winner));
        let after = ForwardedHeader::new(source.reference(), &config);
        assert!(after.is_strictly_forwarded_pointer());
        assert_eq!(after.forwarded_object(), winner);
    }
}

#[test]
fn helpers_join_and_every_byte_arrives() {
    let config = CopyConfig::default()
        .with_section_geometry(128, 128, 5)
        .with_outstanding_cap(4);
    let words = 32 * 1024 / std::mem::size_of::<usize>();
    let source = HeapObject::with_pattern(words, ORIGINAL_HEADER, 7);
    let destination = HeapObject::new(words, 0);
    let total = source.size_in_bytes();
    let source_ref = source.reference();
    let dest_ref = destination.reference();

    std::thread::scope(|s| {
        let config = &config;
        s.spawn(move || {
            let header = ForwardedHeader::new(source_ref, config);
            let initial = header.copy_setup(dest_ref, total);
            header.copy_section(dest_ref, initial.offset, initial.size);
            let winner = header.set_forwarded_object(dest_ref, true);
            assert_eq!(winner, dest_ref);
            header.copy_or_wait_winner(dest_ref, total);
            header.commence_fixup(dest_ref);
            header.commit_fixup(dest_ref);
        });
        for _ in 0..3 {
            s.spawn(move || loop {
                let header = ForwardedHeader::new(source_ref, config);
                if header.is_strictly_forwarded_pointer() {
                    header.copy_or_wait(header.forwarded_object(), total);
                    return;
                }
                std::hint::spin_loop();
            });
        }
    });

    assert_eq!(destination.word(0), ORIGINAL_HEADER);
    for i in 1..words {
        assert_eq!(destination.word(i), source.word(i), "word {} differs", i);
    }
    let record = ForwardedHeader::new(source_ref, &config);
    assert!(record.is_strictly_forwarded_pointer());
    assert!(!record.preserved().has_being_copied_hint());
}

#[test]
fn waiter_returns_only_with_the_body_complete() {
    let config = CopyConfig::default().with_section_geometry(128, 128, 7);
    let words = 2048;
    let source = HeapObject::with_pattern(words, ORIGINAL_HEADER, 13);
    let destination = HeapObject::new(words, 0);
    let total = source.size_in_bytes();
    let source_ref = source.reference();
    let dest_ref = destination.reference();

    let winner_view = ForwardedHeader::new(source_ref, &config);
    let initial = winner_view.copy_setup(dest_ref, total);
    winner_view.copy_section(dest_ref, initial.offset, initial.size);
    winner_view.set_forwarded_object(dest_ref, true);

    // a thread arriving now helps copy everything that remains; the winner
    // has done nothing past the publish
    let waiter_view = ForwardedHeader::new(source_ref, &config);
    assert!(waiter_view.preserved().has_being_copied_hint());
    waiter_view.copy_or_wait(dest_ref, total);

    // the whole body, the winner's initial section included, is complete
    // even though fixup has not happened yet
    let initial_words = (initial.offset + initial.size) / std::mem::size_of::<usize>();
    for i in 1..initial_words {
        assert_eq!(destination.word(i), source.word(i), "initial word {} differs", i);
    }
    for i in initial_words..words {
        assert_eq!(destination.word(i), source.word(i), "word {} differs", i);
    }

    winner_view.copy_or_wait_winner(dest_ref, total);
    winner_view.commence_fixup(dest_ref);
    winner_view.commit_fixup(dest_ref);
    assert_eq!(destination.word(0), ORIGINAL_HEADER);
}

#[test]
fn saturated_copier_cap_is_never_exceeded() {
    let config = CopyConfig::default()
        .with_section_geometry(128, 128, 6)
        .with_outstanding_cap(2);
    let words = 64 * 1024 / std::mem::size_of::<usize>();
    let source = HeapObject::with_pattern(words, ORIGINAL_HEADER, 21);
    let destination = HeapObject::new(words, 0);
    let total = source.size_in_bytes();
    let source_ref = source.reference();
    let dest_ref = destination.reference();

    // more prospective copiers than the cap admits
    let max_seen = std::thread::scope(|s| {
        let config = &config;
        s.spawn(move || {
            let header = ForwardedHeader::new(source_ref, config);
            let initial = header.copy_setup(dest_ref, total);
            header.copy_section(dest_ref, initial.offset, initial.size);
            header.set_forwarded_object(dest_ref, true);
            header.copy_or_wait_winner(dest_ref, total);
            header.commence_fixup(dest_ref);
            header.commit_fixup(dest_ref);
        });
        for _ in 0..4 {
            s.spawn(move || loop {
                let header = ForwardedHeader::new(source_ref, config);
                if header.is_strictly_forwarded_pointer() {
                    header.copy_or_wait(header.forwarded_object(), total);
                    return;
                }
                std::hint::spin_loop();
            });
        }
        let monitor = s.spawn(move || {
            loop {
                let record = ForwardedHeader::new(source_ref, config);
                if record.is_strictly_forwarded_pointer() {
                    break;
                }
                std::hint::spin_loop();
            }
            // watch the destination progress word until the copy commits
            let mut max_seen = 0;
            loop {
                let word = config.read_slot(dest_ref.to_raw_address(), Ordering::Relaxed);
                if !word.is_being_copied() {
                    return max_seen;
                }
                max_seen = max_seen.max(word.outstanding_copies());
            }
        });
        monitor.join().unwrap()
    });

    assert!(
        max_seen <= config.max_outstanding_copies(),
        "observed {} concurrent copiers with a cap of {}",
        max_seen,
        config.max_outstanding_copies()
    );
    // saturated joiners waited rather than failing: every byte still arrived
    assert_eq!(destination.word(0), ORIGINAL_HEADER);
    for i in 1..words {
        assert_eq!(destination.word(i), source.word(i), "word {} differs", i);
    }
}

#[test]
fn self_and_remote_forwarding_race_to_one_outcome() {
    let config = CopyConfig::default();
    for _ in 0..50 {
        let source = HeapObject::new(8, ORIGINAL_HEADER);
        let destination = HeapObject::new(8, 0);
        let barrier = Barrier::new(2);

        let (a, b) = std::thread::scope(|s| {
            let config = &config;
            let barrier = &barrier;
            let source_ref = source.reference();
            let dest_ref = destination.reference();
            let selfer = s.spawn(move || {
                let header = ForwardedHeader::new(source_ref, config);
                barrier.wait();
                header.set_self_forwarded_object()
            });
            let remoter = s.spawn(move || {
                let header = ForwardedHeader::new(source_ref, config);
                barrier.wait();
                header.set_forwarded_object(dest_ref, false)
            });
            (selfer.join().unwrap(), remoter.join().unwrap())
        });

        assert_eq!(a, b);
        let after = ForwardedHeader::new(source.reference(), &config);
        assert!(after.is_self_forwarded_pointer() ^ after.is_strictly_forwarded_pointer());
        if after.is_self_forwarded_pointer() {
            assert_eq!(a, source.reference());
        } else {
            assert_eq!(a, destination.reference());
        }
    }
}
