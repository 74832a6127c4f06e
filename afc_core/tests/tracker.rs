use afc_core::nvm::PersistedState;
use afc_core::params::{ChargeParams, StageParams};
use afc_core::tracker::{
    AdvanceSignals, StageTracker, attempt_to_inc_cpv_idx, find_highest_cpv_stage_idx,
};
use proptest::prelude::*;
use rstest::rstest;

fn stage(soc_cpct: u16, ref_start_mv: u16, ref_band_mv: u16) -> StageParams {
    StageParams {
        soc_cpct,
        max_ma: 10_000,
        min_ma: 1000,
        step_ma: 500,
        ref_start_mv,
        ref_band_mv,
        sad_limit_mv: 4250,
    }
}

fn params_with(stages: Vec<StageParams>) -> ChargeParams {
    ChargeParams {
        stages,
        ..ChargeParams::default()
    }
}

#[test]
fn all_cells_below_every_threshold_gives_stage_zero() {
    let p = ChargeParams::default();
    let cells = vec![Some(3600), Some(3650), Some(3700), Some(3620)];
    assert_eq!(find_highest_cpv_stage_idx(&p, &cells), 0);
}

// default thresholds: 4100, 4130, 4160
#[rstest]
#[case(&[4100, 4120, 4200, 4200], 0)]
#[case(&[4130, 4140, 4150, 4160], 1)]
#[case(&[4160, 4160, 4160, 4160], 2)]
#[case(&[4160, 4160, 4160, 4099], 0)]
fn highest_satisfied_stage(#[case] cells: &[u16], #[case] want: usize) {
    let p = ChargeParams::default();
    let cells: Vec<_> = cells.iter().copied().map(Some).collect();
    assert_eq!(find_highest_cpv_stage_idx(&p, &cells), want);
}

#[test]
fn stale_cells_are_ignored_by_the_scan() {
    let p = ChargeParams::default();
    let cells = vec![Some(4160), None, Some(4170), None];
    assert_eq!(find_highest_cpv_stage_idx(&p, &cells), 2);
}

#[rstest]
#[case(AdvanceSignals { corr_fired: true, ..AdvanceSignals::default() }, 1)]
#[case(AdvanceSignals { highest_satisfied: 2, ..AdvanceSignals::default() }, 1)]
#[case(AdvanceSignals { soc_stage: Some(1), ..AdvanceSignals::default() }, 1)]
#[case(AdvanceSignals { soc_stage: Some(0), ..AdvanceSignals::default() }, 0)]
#[case(AdvanceSignals { sad_reached: true, ..AdvanceSignals::default() }, 1)]
#[case(AdvanceSignals::default(), 0)]
fn advance_signals(#[case] s: AdvanceSignals, #[case] want: usize) {
    let p = ChargeParams::default();
    assert_eq!(attempt_to_inc_cpv_idx(&p, 0, &s), want);
}

#[test]
fn correction_fires_after_min_sampling_cycles() {
    let p = ChargeParams::default();
    let mut state = PersistedState::new(p.stage_count(), 4, 0);
    let mut t = StageTracker::new(4);
    t.start(&p, &mut state, 0, true);
    assert_eq!(state.ref_mv, vec![4100; 4]);

    let cells = vec![Some(4110), Some(4000), Some(4000), Some(4000)];
    assert!(t.cpv_track(&p, &mut state, &cells).is_empty());
    assert!(t.cpv_track(&p, &mut state, &cells).is_empty());
    assert_eq!(t.cpv_track(&p, &mut state, &cells), vec![0]);
    assert_eq!(state.corr_idx, vec![1, 0, 0, 0]);
    assert_eq!(state.highest_corr_idx[0], 1);
    // reference taken from the next stage's band: 4130 - 80 * 1 / 60
    assert_eq!(state.ref_mv[0], 4129);
    assert_eq!(state.ref_mv[1], 4100);
}

#[test]
fn dipping_below_reference_restarts_the_count() {
    let p = ChargeParams::default();
    let mut state = PersistedState::new(p.stage_count(), 1, 0);
    let mut t = StageTracker::new(1);
    t.start(&p, &mut state, 0, true);
    for v in [4110, 4110, 4100, 4110, 4110] {
        assert!(t.cpv_track(&p, &mut state, &[Some(v)]).is_empty());
    }
    assert_eq!(t.cpv_track(&p, &mut state, &[Some(4110)]), vec![0]);
}

#[test]
fn correction_index_is_clamped() {
    let mut p = ChargeParams::default();
    p.tracking.max_corr_idx = 2;
    p.tracking.min_sampling_cycles = 1;
    let mut state = PersistedState::new(p.stage_count(), 1, 0);
    let mut t = StageTracker::new(1);
    t.start(&p, &mut state, 0, true);
    for _ in 0..10 {
        t.cpv_track(&p, &mut state, &[Some(5000)]);
    }
    assert_eq!(state.corr_idx, vec![2]);
}

#[test]
fn terminal_stage_never_fires_corrections() {
    let mut p = ChargeParams::default();
    p.tracking.min_sampling_cycles = 1;
    let mut state = PersistedState::new(p.stage_count(), 2, 0);
    let mut t = StageTracker::new(2);
    t.start(&p, &mut state, p.terminal_idx(), true);
    for _ in 0..100 {
        assert!(t.cpv_track(&p, &mut state, &[Some(4190), Some(4250)]).is_empty());
    }
    assert_eq!(state.corr_idx, vec![0, 0]);
    assert_eq!(state.highest_corr_idx, vec![0; p.stage_count()]);
}

#[test]
fn stale_cell_keeps_reference_across_advance() {
    let p = ChargeParams::default();
    let mut state = PersistedState::new(p.stage_count(), 4, 0);
    let mut t = StageTracker::new(4);
    t.start(&p, &mut state, 0, true);
    let before = state.ref_mv[3];
    let cells = vec![Some(3800), Some(3800), Some(3800), None];
    let s = AdvanceSignals {
        soc_stage: Some(1),
        ..AdvanceSignals::default()
    };
    assert!(t.advance(&p, &mut state, &s, &cells));
    assert_eq!(state.ref_mv[3], before);
    assert_eq!(state.ref_mv[0], 4130);

    // next fresh reading re-derives it for the present stage
    t.cpv_track(&p, &mut state, &[Some(3800); 4]);
    assert_eq!(state.ref_mv[3], 4130);
}

prop_compose! {
    fn stage_table()(
        n in 1usize..8,
        socs in proptest::collection::btree_set(0u16..=10_000, 8),
        starts in proptest::collection::vec(3500u16..4300, 8),
        bands in proptest::collection::vec(0u16..200, 8),
    ) -> ChargeParams {
        let socs: Vec<u16> = socs.into_iter().collect();
        let stages = (0..n).map(|i| stage(socs[i], starts[i], bands[i])).collect();
        params_with(stages)
    }
}

proptest! {
    #[test]
    fn highest_stage_threshold_never_exceeds_min_cell(
        p in stage_table(),
        cells in proptest::collection::vec(proptest::option::of(3000u16..4500), 1..16),
    ) {
        let idx = find_highest_cpv_stage_idx(&p, &cells);
        prop_assert!(idx < p.stage_count());
        if let Some(min) = cells.iter().flatten().min() {
            if idx > 0 {
                prop_assert!(p.stages[idx].threshold_mv() <= *min);
            }
        } else {
            prop_assert_eq!(idx, 0);
        }
    }

    #[test]
    fn attempt_to_inc_is_monotonic_and_unit_step(
        p in stage_table(),
        present in 0usize..8,
        fired in any::<bool>(),
        highest in 0usize..8,
        soc in proptest::option::of(0usize..8),
        sad in any::<bool>(),
    ) {
        let present = present.min(p.terminal_idx());
        let s = AdvanceSignals { corr_fired: fired, highest_satisfied: highest, soc_stage: soc, sad_reached: sad };
        let next = attempt_to_inc_cpv_idx(&p, present, &s);
        prop_assert!(next >= present);
        prop_assert!(next - present <= 1);
        prop_assert!(next < p.stage_count());
    }

    #[test]
    fn correction_indices_never_decrease(
        seq in proptest::collection::vec(proptest::collection::vec(proptest::option::of(3900u16..4300), 4), 1..60),
    ) {
        let p = ChargeParams::default();
        let mut state = PersistedState::new(p.stage_count(), 4, 0);
        let mut t = StageTracker::new(4);
        t.start(&p, &mut state, 0, true);
        let mut prev = state.corr_idx.clone();
        let mut prev_stage = t.present();
        for cells in &seq {
            let fired = t.cpv_track(&p, &mut state, cells);
            let s = AdvanceSignals {
                corr_fired: !fired.is_empty(),
                highest_satisfied: find_highest_cpv_stage_idx(&p, cells),
                ..AdvanceSignals::default()
            };
            t.advance(&p, &mut state, &s, cells);
            for (a, b) in prev.iter().zip(&state.corr_idx) {
                prop_assert!(b >= a);
            }
            prop_assert!(t.present() >= prev_stage);
            prev.clone_from(&state.corr_idx);
            prev_stage = t.present();
        }
    }
}
