use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

const CONFIG: &str = r#"
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

const TRACE_HEADER: &str = "pack_current_ma,soc_cpct,capacity_mah,evse_present,evse_limit_ma,min_temp_dc,max_temp_dc,cells_mv,temps_dc";

fn write_config(dir: &tempfile::TempDir, toml: &str) -> PathBuf {
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn write_trace(dir: &tempfile::TempDir, rows: usize) -> PathBuf {
    let mut s = format!("{TRACE_HEADER}\n");
    for i in 0..rows {
        let mv = 3700 + i;
        let soc = 2000 + 10 * i;
        s.push_str(&format!(",{soc},50000,true,,250,250,{mv};{mv};{mv};{mv},250;250\n"));
    }
    let path = dir.path().join("trace.csv");
    fs::write(&path, s).unwrap();
    path
}

fn afc(cfg: &PathBuf) -> Command {
    let mut cmd = Command::cargo_bin("afc").unwrap();
    cmd.arg("--log-level").arg("error").arg("--config").arg(cfg);
    cmd
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["check"], 0, "config OK: 2 stages, 4 cells, 2 sensors", "stdout")]
#[case(&["replay"], 2, "required", "stderr")]
#[case(&["inspect-nvm"], 1, "no NVM image given", "stderr")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, CONFIG);
    let mut cmd = afc(&cfg);
    for a in args {
        cmd.arg(a);
    }
    let assert = cmd.assert().code(exit_code);
    match stream {
        "stdout" => {
            assert.stdout(predicate::str::contains(needle));
        }
        _ => {
            assert.stderr(predicate::str::contains(needle));
        }
    }
}

#[test]
fn invalid_config_exits_with_config_code() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, &CONFIG.replacen("min_ma = 2000", "min_ma = 20000", 1));
    afc(&cfg)
        .arg("check")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Configuration is invalid"))
        .stderr(predicate::str::contains("stages[0].min_ma must be <= max_ma"));
}

#[test]
fn malformed_toml_exits_with_config_code() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "[pack\ncells = 4");
    afc(&cfg)
        .arg("check")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("could not be parsed"));
}

#[test]
fn replay_prints_every_cycle_and_a_summary() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, CONFIG);
    let trace = write_trace(&dir, 5);
    afc(&cfg)
        .arg("replay")
        .arg("--trace")
        .arg(&trace)
        .assert()
        .success()
        .stdout(predicate::str::contains("cycle=    4"))
        .stdout(predicate::str::contains("replayed 5 cycles; stage 0"));
}

#[test]
fn replay_json_lines_are_valid() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, CONFIG);
    let trace = write_trace(&dir, 6);
    let out = afc(&cfg)
        .arg("--json")
        .arg("replay")
        .arg("--trace")
        .arg(&trace)
        .arg("--every")
        .arg("2")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8_lossy(&out);
    let lines: Vec<serde_json::Value> = stdout
        .lines()
        .map(|l| serde_json::from_str(l).expect("valid JSON line"))
        .collect();
    // cycles 0, 2, 4, the last cycle 5, then the summary
    assert_eq!(lines.len(), 5);
    for v in &lines[..4] {
        assert!(v.get("charge_current_ma").and_then(|x| x.as_u64()).is_some());
        assert!(v.get("error_flags").and_then(|x| x.as_u64()).is_some());
        assert!(v.get("complete").and_then(|x| x.as_bool()).is_some());
        assert!(v["aging"].get("end_of_life").is_some());
    }
    assert_eq!(lines[3]["cycle"], 5);
    assert_eq!(lines[4]["summary"]["cycles"], 6);
    assert!(lines[4]["summary"]["completed_at"].is_null());
}

#[test]
fn replay_persists_nvm_image_for_inspection() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, CONFIG);
    let trace = write_trace(&dir, 3);
    let nvm = dir.path().join("nvm.bin");

    afc(&cfg)
        .arg("replay")
        .arg("--trace")
        .arg(&trace)
        .arg("--nvm")
        .arg(&nvm)
        .assert()
        .success();
    assert!(nvm.exists());

    afc(&cfg)
        .arg("inspect-nvm")
        .arg("--nvm")
        .arg(&nvm)
        .assert()
        .success()
        .stdout(predicate::str::contains("charge cycles"))
        .stdout(predicate::str::contains("cell   3: corr_idx"));
}

#[test]
fn corrupt_nvm_image_exits_with_nvm_code() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, CONFIG);
    let nvm = dir.path().join("nvm.bin");
    fs::write(&nvm, [0x12u8; 40]).unwrap();
    let out = afc(&cfg)
        .arg("--json")
        .arg("inspect-nvm")
        .arg("--nvm")
        .arg(&nvm)
        .assert()
        .code(4)
        .get_output()
        .stdout
        .clone();
    let v: serde_json::Value =
        serde_json::from_str(String::from_utf8_lossy(&out).trim()).expect("valid JSON");
    assert_eq!(v["reason"], "Nvm");
}

#[test]
fn trace_with_wrong_headers_is_explained() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, CONFIG);
    let trace = dir.path().join("bad.csv");
    fs::write(&trace, "current,soc\n1,2\n").unwrap();
    afc(&cfg)
        .arg("replay")
        .arg("--trace")
        .arg(&trace)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid headers in trace CSV"));
}

#[test]
fn ocv_curve_is_checked() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, CONFIG);
    let ocv = dir.path().join("ocv.csv");
    fs::write(&ocv, "soc_cpct,ocv_mv\n0,3300\n5000,3700\n10000,4190\n").unwrap();
    afc(&cfg)
        .arg("--ocv")
        .arg(&ocv)
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("3 OCV points"));
}
