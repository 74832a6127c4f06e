use afc_core::aging::{close_session, flags_for_highest};
use afc_core::cycles::ChargeCycles;
use afc_core::eventlog::{RingLog, SocImbalanceEvent, top_cells};
use afc_core::imbalance::{ImbalanceVerdict, analyze_sums};
use afc_core::nvm::PersistedState;
use afc_core::params::{AgingCfg, ImbalanceCfg};
use afc_core::AgingFlags;
use afc_traits::EventLog;
use rstest::rstest;

#[test]
fn charge_cycle_reference_sequence() {
    let steps: [(u16, u16, u16); 9] = [
        (0, 0, 0),
        (1000, 1000, 0),
        (10_000, 0, 1),
        (10, 0, 1),
        (15, 5, 1),
        (10_000, 9990, 1),
        (100, 9990, 1),
        (200, 90, 2),
        (10_001, 90, 2),
    ];
    let mut c = ChargeCycles::default();
    for (i, (soc, accum, count)) in steps.into_iter().enumerate() {
        c.track(soc);
        assert_eq!((c.soc_accum_cpct, c.count), (accum, count), "step {i} soc={soc}");
    }
    // the invalid reading did not move the previous SOC
    assert_eq!(c.prev_soc_cpct, 200);
}

fn imbalance_cfg(sigma: u8, noise: u16) -> ImbalanceCfg {
    ImbalanceCfg {
        sigma_level: sigma,
        noise_floor_mv: noise,
        ..ImbalanceCfg::default()
    }
}

#[test]
fn only_the_low_outlier_is_flagged() {
    let sums = [3201, 3202, 3179, 3203, 3204, 3205, 3206, 3207, 3208, 3209];
    let v = analyze_sums(&imbalance_cfg(4, 8), &sums, 1);
    assert_eq!(v, ImbalanceVerdict::Flagged(vec![2]));
}

#[test]
fn high_outliers_are_not_flagged() {
    let sums = [3201, 3202, 3299, 3203, 3204, 3205, 3206, 3207, 3208, 3209];
    let v = analyze_sums(&imbalance_cfg(4, 8), &sums, 1);
    assert_eq!(v, ImbalanceVerdict::Flagged(vec![]));
}

#[test]
fn noise_floor_scales_with_sampling_time() {
    let sums = [3201, 3202, 3179, 3203, 3204, 3205, 3206, 3207, 3208, 3209];
    // 8 mV * 4 samples = 32 > 26
    let v = analyze_sums(&imbalance_cfg(4, 8), &sums, 4);
    assert_eq!(v, ImbalanceVerdict::Flagged(vec![]));
}

#[test]
fn zero_mad_is_invalid() {
    let sums = [3700; 12];
    assert_eq!(analyze_sums(&imbalance_cfg(4, 8), &sums, 5), ImbalanceVerdict::Invalid);
    // one outlier among equals still has MAD 0
    let mut sums = [3700; 12];
    sums[3] = 3000;
    assert_eq!(analyze_sums(&imbalance_cfg(4, 8), &sums, 5), ImbalanceVerdict::Invalid);
}

#[test]
fn top_five_ties_prefer_higher_indices() {
    let cells = vec![3700u16; 192];
    assert_eq!(top_cells(&cells), [191, 190, 189, 188, 187]);
}

#[rstest]
#[case(&[3700, 3900, 3800, 3900, 3600, 3650], [3, 1, 2, 0, 5])]
#[case(&[4000, 3000, 3000, 3000, 3000, 3000, 3000], [0, 6, 5, 4, 3])]
fn top_five_by_voltage(#[case] cells: &[u16], #[case] want: [u8; 5]) {
    assert_eq!(top_cells(cells), want);
}

#[test]
fn end_of_life_latches_at_limit() {
    let cfg = AgingCfg::default();
    let mut s = PersistedState::new(3, 4, 4100);
    s.total_mitigations = 390;
    s.highest_corr_idx = vec![9, 0, 0];
    assert!(!close_session(&cfg, &mut s));
    assert!(!s.end_of_life);

    s.highest_corr_idx = vec![1, 0, 0];
    assert!(close_session(&cfg, &mut s));
    assert_eq!(s.total_mitigations, 400);
    assert!(s.end_of_life);

    // stays latched, reported once
    assert!(!close_session(&cfg, &mut s));
    assert!(s.end_of_life);
}

#[test]
fn mitigation_total_saturates() {
    let cfg = AgingCfg::default();
    let mut s = PersistedState::new(32, 1, 4100);
    s.total_mitigations = u16::MAX - 10;
    s.highest_corr_idx = vec![60; 32];
    close_session(&cfg, &mut s);
    assert_eq!(s.total_mitigations, u16::MAX);
}

#[rstest]
#[case(7, AgingFlags::empty())]
#[case(11, AgingFlags::EARLY_WARNING)]
#[case(12, AgingFlags::EARLY_WARNING | AgingFlags::ABNORMAL)]
#[case(60, AgingFlags::EARLY_WARNING | AgingFlags::ABNORMAL | AgingFlags::EXTREME)]
fn aging_thresholds(#[case] highest: u8, #[case] want: AgingFlags) {
    assert_eq!(flags_for_highest(&AgingCfg::default(), highest), want);
}

#[test]
fn ring_log_keeps_newest_records() {
    let mut log = RingLog::default();
    for i in 0..2000u16 {
        let ev = SocImbalanceEvent { cycles: i, cell: 1 };
        log.append(&ev.to_bytes()).unwrap();
    }
    assert!(log.used() <= RingLog::DEFAULT_CAPACITY);
    assert_eq!(log.len(), RingLog::DEFAULT_CAPACITY / SocImbalanceEvent::LEN);
    let last = log.records().last().unwrap();
    // cycles 1999 = 0x07CF
    assert_eq!(last, [0xCF, 0x07, 1]);
}
