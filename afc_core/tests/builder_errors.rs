use afc_core::params::ChargeParams;
use afc_core::{ChargeSession, ConfigError, OcvCurve, params_from_toml};
use afc_traits::MemRegion;
use rstest::rstest;

const BASE: &str = r#"
[pack]
cells = 4
sensors = 2

[[stages]]
soc_pct = 0.0
max_ma = 10000
min_ma = 2000
step_ma = 500
ref_start_mv = 4000
ref_band_mv = 100
sad_limit_mv = 4150

[[stages]]
soc_pct = 80.0
max_ma = 5000
min_ma = 1000
step_ma = 250
ref_start_mv = 4100
ref_band_mv = 60
sad_limit_mv = 4200
"#;

fn build_err(params: ChargeParams, region: MemRegion) -> ConfigError {
    let err = ChargeSession::builder()
        .with_params(params)
        .with_region(region)
        .build()
        .err()
        .expect("build should fail");
    match err.downcast_ref::<ConfigError>() {
        Some(e) => e.clone(),
        None => panic!("expected ConfigError, got: {err:?}"),
    }
}

#[rstest]
fn min_above_max_is_rejected() {
    let mut p = ChargeParams::default();
    p.stages[1].min_ma = p.stages[1].max_ma + 1;
    assert_eq!(
        build_err(p, MemRegion::new(4096)),
        ConfigError::MinExceedsMax { stage: 1 }
    );
}

#[rstest]
fn non_increasing_soc_thresholds_are_rejected() {
    let mut p = ChargeParams::default();
    p.stages[2].soc_cpct = p.stages[1].soc_cpct;
    assert_eq!(
        build_err(p, MemRegion::new(4096)),
        ConfigError::SocNotIncreasing { stage: 2 }
    );
}

#[rstest]
fn undersized_region_is_rejected_before_any_io() {
    let p = ChargeParams::default();
    let mut region = MemRegion::new(8);
    region.as_bytes_mut().copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
    let err = build_err(p, region);
    assert!(matches!(err, ConfigError::RegionTooSmall { capacity: 8, .. }));
}

#[rstest]
#[case(0)]
#[case(193)]
fn cell_count_out_of_range(#[case] cells: usize) {
    let mut p = ChargeParams::default();
    p.pack = afc_core::params::PackLayout::even(cells, 1);
    assert_eq!(build_err(p, MemRegion::new(4096)), ConfigError::CellCount(cells));
}

#[test]
fn nan_coefficient_is_rejected() {
    let mut p = ChargeParams::default();
    p.coeffs.e = f32::NAN;
    assert_eq!(
        build_err(p, MemRegion::new(4096)),
        ConfigError::NonFiniteCoefficient("e")
    );
}

#[test]
fn single_point_ocv_curve_is_rejected() {
    assert!(matches!(
        OcvCurve::new(vec![0], vec![3300]),
        Err(ConfigError::OcvCurve(_))
    ));
    assert!(matches!(
        OcvCurve::new(vec![0, 5000, 5000], vec![3300, 3700, 3800]),
        Err(ConfigError::OcvCurve(_))
    ));
}

#[test]
fn toml_config_converts_to_core_units() {
    let p = params_from_toml(BASE).expect("valid config");
    assert_eq!(p.stage_count(), 2);
    assert_eq!(p.stages[1].soc_cpct, 8000);
    assert_eq!(p.stages[1].max_ma, 5000);
    assert_eq!(p.temp.max_dc, 570);
    assert_eq!(p.temp.ref_dc, 300);
    assert_eq!(p.pack.cell_sensor, vec![0, 0, 1, 1]);
    assert_eq!(p.completion.bands.len(), 5);
    assert_eq!(p.htd, afc_core::params::HtdCfg::default());
}

#[test]
fn invalid_toml_config_reports_validation_message() {
    let toml = BASE.replacen("min_ma = 2000", "min_ma = 20000", 1);
    let err = params_from_toml(&toml).expect_err("should reject");
    assert!(format!("{err}").contains("stages[0].min_ma must be <= max_ma"));
}
