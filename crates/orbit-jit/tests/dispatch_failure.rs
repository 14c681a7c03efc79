//! Translation failure handling: suppression, isolation, recovery.

mod common;

use common::{CountingBackend, FlatMemory, WordDecoder};
use orbit_jit::{BlockState, Dispatcher, DispatcherConfig, Resolution};

const BAD: u64 = 0x1000;
const GOOD: u64 = 0x2000;

fn setup(mem: &FlatMemory) -> Dispatcher<WordDecoder, CountingBackend> {
    // BAD contains an encoding the backend rejects; GOOD is translatable.
    mem.write_words(BAD, &[0x0000_00ff, 0]);
    mem.write_words(GOOD, &[0x0000_0501, 0]);
    Dispatcher::new(
        WordDecoder,
        CountingBackend::rejecting(),
        mem.len_bytes(),
        DispatcherConfig::default(),
    )
}

#[test]
fn failed_translations_are_not_retried() {
    let mem = FlatMemory::new(64 * 1024);
    let d = setup(&mem);

    assert!(matches!(
        d.resolve(&mem, BAD),
        Resolution::InterpretFallback
    ));
    assert_eq!(d.backend().compile_count(), 1);
    assert_eq!(d.cache().entry(BAD).state(), BlockState::Failed);

    // Every later hit interprets without paying for translation again.
    for _ in 0..3 {
        assert!(matches!(
            d.resolve(&mem, BAD),
            Resolution::InterpretFallback
        ));
    }
    assert_eq!(d.backend().compile_count(), 1);
}

#[test]
fn failure_does_not_poison_other_addresses() {
    let mem = FlatMemory::new(64 * 1024);
    let d = setup(&mem);

    assert!(matches!(
        d.resolve(&mem, BAD),
        Resolution::InterpretFallback
    ));
    assert!(matches!(d.resolve(&mem, GOOD), Resolution::Compiled(_)));
}

#[test]
fn invalidation_lifts_failure_suppression() {
    let mem = FlatMemory::new(64 * 1024);
    let d = setup(&mem);

    assert!(matches!(
        d.resolve(&mem, BAD),
        Resolution::InterpretFallback
    ));

    // The guest overwrites the offending instruction; only after explicit
    // invalidation is the address eligible for translation again.
    mem.write_words(BAD, &[0x0000_0301, 0]);
    d.invalidate_range(BAD, 8);
    assert!(matches!(d.resolve(&mem, BAD), Resolution::Compiled(_)));
    assert_eq!(d.backend().compile_count(), 2);
}

#[test]
fn out_of_bounds_addresses_are_fatal() {
    let mem = FlatMemory::new(4 * 1024);
    let d = Dispatcher::new(
        WordDecoder,
        CountingBackend::default(),
        mem.len_bytes(),
        DispatcherConfig::default(),
    );

    assert!(matches!(
        d.resolve(&mem, 1 << 32),
        Resolution::Fatal(_)
    ));

    // A fault does not mark the address Failed; correcting the situation
    // (here: an in-bounds address) still translates.
    mem.write_words(0x100, &[0x0000_0501, 0]);
    assert!(matches!(d.resolve(&mem, 0x100), Resolution::Compiled(_)));
}
