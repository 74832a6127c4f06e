#![no_main]
use afc_core::nvm::PersistedState;
use libfuzzer_sys::arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    stages: u8,
    cells: u8,
    image: &'a [u8],
}

fuzz_target!(|input: Input<'_>| {
    let stages = usize::from(input.stages % 40);
    let cells = usize::from(input.cells);
    // Decoding must never panic; an accepted image must survive a re-encode.
    if let Ok(state) = PersistedState::decode(input.image, stages, cells) {
        let again = PersistedState::decode(&state.encode(), stages, cells);
        assert_eq!(again.as_ref(), Ok(&state));
    }
});
