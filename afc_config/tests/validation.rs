use afc_config::load_toml;
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

#[test]
fn minimal_config_parses_and_validates() {
    let cfg = load_toml(BASE).expect("parse TOML");
    cfg.validate().expect("valid config should pass");
    assert_eq!(cfg.stages.len(), 2);
    // Defaults fill every optional table
    assert_eq!(cfg.current.abs_max_ma, 331_600);
    assert_eq!(cfg.completion.len(), 5);
    assert!((cfg.temperature.ref_c - 30.0).abs() < f32::EPSILON);
    assert_eq!(cfg.nvm.capacity_bytes, 4096);
}

#[test]
fn missing_stages_is_a_parse_error() {
    let toml = "[pack]\ncells = 4\nsensors = 2\n";
    assert!(load_toml(toml).is_err());
}

#[rstest]
#[case("min_ma = 2000", "min_ma = 20000", "stages[0].min_ma must be <= max_ma")]
#[case("soc_pct = 80.0", "soc_pct = 0.0", "stages[1].soc_pct must be >")]
#[case("cells = 4", "cells = 0", "pack.cells must be in 1..=192")]
#[case("max_ma = 10000", "max_ma = 400000", "exceeds current.abs_max_ma")]
fn rejects_bad_stage_and_pack_values(
    #[case] from: &str,
    #[case] to: &str,
    #[case] needle: &str,
) {
    let toml = BASE.replacen(from, to, 1);
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    assert!(
        format!("{err}").contains(needle),
        "unexpected error: {err}"
    );
}

#[rstest]
#[case("[temperature]\nmax_c = 20.0\n", "min_c < ref_c < max_c")]
#[case("[temperature]\nderate_span_c = 0.0\n", "derate_span_c must be > 0.0")]
#[case("[tracking]\nmax_corr_idx = 0\n", "tracking.max_corr_idx must be >= 1")]
#[case(
    "[[htd.sets]]\nenter_c = 60.0\ntemp_columns_c = [60.0]\nratio_pct = [[50]]\n",
    "htd.sets[0].enter_c must be below"
)]
#[case(
    "[[htd.sets]]\nenter_c = 45.0\ntemp_columns_c = [45.0, 50.0]\nratio_pct = [[100, 50], [90]]\n",
    "htd.sets[0].ratio_pct[1] must have one entry per temperature column"
)]
#[case(
    "[[htd.sets]]\nselect_min_c = 30.0\nenter_c = 45.0\ntemp_columns_c = [45.0]\nratio_pct = [[80]]\n\n[[htd.sets]]\nselect_min_c = 20.0\nenter_c = 45.0\ntemp_columns_c = [45.0]\nratio_pct = [[70]]\n",
    "htd.sets must be ascending in select_min_c"
)]
#[case("[aging]\nearly_warning_corr_idx = 20\n", "early_warning <= abnormal <= extreme")]
#[case("[imbalance]\nmin_sampling_time = 0\n", "imbalance.min_sampling_time must be >= 1")]
#[case("[pack]\n", "")]
fn rejects_bad_tables(#[case] extra: &str, #[case] needle: &str) {
    // The last case re-declares [pack] and must fail to parse, not validate
    let toml = format!("{BASE}\n{extra}");
    match load_toml(&toml) {
        Ok(cfg) => {
            let err = cfg.validate().expect_err("should reject");
            assert!(
                format!("{err}").contains(needle),
                "unexpected error: {err}"
            );
        }
        Err(_) => assert!(needle.is_empty(), "unexpected parse failure"),
    }
}

#[test]
fn completion_accepts_tuples_and_tables() {
    // top-level keys must precede the first table header
    let tuples = format!("completion = [[-10.0, 90.0], [0.0, 97.0]]\n{BASE}");
    let cfg = load_toml(&tuples).expect("parse tuples");
    cfg.validate().expect("valid");
    assert_eq!(cfg.completion.len(), 2);
    assert!((cfg.completion[0].max_soc_pct - 90.0).abs() < f32::EPSILON);

    let tables = format!(
        "{BASE}\n[[completion]]\nmin_temp_c = -10.0\nmax_soc_pct = 90.0\n\n[[completion]]\nmin_temp_c = 0.0\nmax_soc_pct = 97.0\n"
    );
    let cfg = load_toml(&tables).expect("parse tables");
    cfg.validate().expect("valid");
    assert_eq!(cfg.completion.len(), 2);
    assert!((cfg.completion[1].min_temp_c - 0.0).abs() < f32::EPSILON);
}

#[test]
fn completion_bands_must_ascend() {
    let toml = format!("completion = [[0.0, 97.0], [-10.0, 90.0]]\n{BASE}");
    let cfg = load_toml(&toml).expect("parse");
    let err = cfg.validate().expect_err("descending bands");
    assert!(format!("{err}").contains("ascending in min_temp_c"));
}

#[test]
fn htd_sets_default_and_override() {
    let cfg = load_toml(BASE).expect("parse");
    assert_eq!(cfg.htd.sets.len(), 3);
    assert!(cfg.htd.sets[0].select_min_c.is_none());
    assert_eq!(cfg.htd.sets[2].ratio_pct.len(), 21);
    assert_eq!(cfg.htd.sets[2].ratio_pct[20], vec![40, 20, 10]);

    let toml = format!(
        "{BASE}\n[htd]\nsoc_step_pct = 50.0\n\n[[htd.sets]]\nenter_c = 44.0\ntemp_columns_c = [44.0, 50.0]\nratio_pct = [[90, 60], [70, 40]]\n\n[[htd.sets]]\nselect_min_c = 25.0\nenter_c = 42.0\ntemp_columns_c = [42.0]\nratio_pct = [[50]]\n"
    );
    let cfg = load_toml(&toml).expect("parse");
    cfg.validate().expect("valid");
    assert_eq!(cfg.htd.sets.len(), 2);
    assert_eq!(cfg.htd.sets[1].select_min_c, Some(25.0));
}

#[test]
fn key_after_last_stage_is_reported() {
    let toml = format!("{BASE}completion = [[-10.0, 90.0]]\n");
    let err = load_toml(&toml).expect_err("stray key inside [[stages]]");
    assert!(
        format!("{err}").contains("unknown field `completion`"),
        "unexpected error: {err}"
    );
}

#[test]
fn cell_sensor_mapping_is_checked() {
    let toml = BASE.replacen("sensors = 2", "sensors = 2\ncell_sensor = [0, 1, 1, 2]", 1);
    let cfg = load_toml(&toml).expect("parse");
    let err = cfg.validate().expect_err("sensor 2 does not exist");
    assert!(format!("{err}").contains("pack.cell_sensor[3]"));

    let toml = BASE.replacen("sensors = 2", "sensors = 2\ncell_sensor = [0, 1]", 1);
    let cfg = load_toml(&toml).expect("parse");
    assert!(cfg.validate().is_err());
}
