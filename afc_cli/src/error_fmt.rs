//! Human-readable error descriptions and structured JSON error formatting.

use afc_core::{ConfigError, NvmError};

/// Stable machine-readable name for the error's category.
pub fn error_reason_name(err: &eyre::Report) -> &'static str {
    if err.downcast_ref::<ConfigError>().is_some()
        || err.downcast_ref::<toml::de::Error>().is_some()
        || err.to_string().starts_with("invalid configuration")
    {
        return "Config";
    }
    if err.downcast_ref::<NvmError>().is_some() {
        return "Nvm";
    }
    "Error"
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(ce) = err.downcast_ref::<ConfigError>() {
        return match ce {
            ConfigError::RegionTooSmall { needed, capacity } => format!(
                "What happened: The NVM image needs {needed} bytes but the region holds {capacity}.\nLikely causes: Too many cells or stages for the configured region.\nHow to fix: Raise [nvm] capacity_bytes in the config."
            ),
            ConfigError::OcvCurve(msg) => format!(
                "What happened: The OCV curve was rejected ({msg}).\nLikely causes: Rows out of order, duplicate SOC points, or SOC above 10000.\nHow to fix: Fix the OCV CSV so soc_cpct strictly increases and stays within 0..=10000."
            ),
            other => format!(
                "What happened: Invalid parameter table ({other}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then run `afc check`."
            ),
        };
    }

    if let Some(ne) = err.downcast_ref::<NvmError>() {
        return match ne {
            NvmError::StageCountMismatch { .. } | NvmError::CellCountMismatch { .. } => format!(
                "What happened: The NVM image was written for a different pack ({ne}).\nLikely causes: The config's stages or cell count changed since the image was saved.\nHow to fix: Point --nvm at the matching image, or delete it to start from defaults."
            ),
            _ => format!(
                "What happened: The NVM image is unreadable ({ne}).\nLikely causes: Interrupted write, wrong file, or an image from another tool.\nHow to fix: Delete the image; the controller starts from safe defaults on the next run."
            ),
        };
    }

    if let Some(te) = err.downcast_ref::<toml::de::Error>() {
        return format!(
            "What happened: The config TOML could not be parsed.\nLikely causes: Syntax error, wrong value type, or missing [[stages]].\nHow to fix: Correct the file and run `afc check`. Parser said: {te}"
        );
    }

    // String-based heuristics for errors coming from file loading
    let msg = format!("{err:#}");
    let lower = msg.to_ascii_lowercase();

    if lower.contains("trace csv must have headers") {
        return "Invalid headers in trace CSV. Expected 'pack_current_ma,soc_cpct,capacity_mah,evse_present,evse_limit_ma,min_temp_dc,max_temp_dc,cells_mv,temps_dc'.".to_string();
    }

    if lower.contains("ocv csv must have headers") {
        return "Invalid headers in OCV CSV. Expected 'soc_cpct,ocv_mv'.".to_string();
    }

    if lower.contains("invalid configuration") {
        return format!(
            "What happened: Configuration is invalid.\nLikely causes: Out-of-range or inconsistent values.\nHow to fix: Edit the TOML config and try again. Details: {msg}"
        );
    }

    if lower.contains("read config") {
        return format!(
            "What happened: The config file could not be read.\nLikely causes: Wrong path or missing permissions.\nHow to fix: Pass --config <FILE>. Details: {msg}"
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes: 3 for configuration, 4 for NVM image errors, 1 otherwise.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match error_reason_name(err) {
        "Config" => 3,
        "Nvm" => 4,
        _ => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let reason = error_reason_name(err);
    let details = if let Some(ConfigError::RegionTooSmall { needed, capacity }) =
        err.downcast_ref::<ConfigError>()
    {
        Some(json!({ "needed": needed, "capacity": capacity }))
    } else if let Some(NvmError::CrcMismatch { stored, computed }) = err.downcast_ref::<NvmError>()
    {
        Some(json!({ "stored_crc": stored, "computed_crc": computed }))
    } else {
        None
    };

    let obj = if let Some(d) = details {
        json!({ "reason": reason, "details": d, "message": humanize(err) })
    } else {
        json!({ "reason": reason, "message": humanize(err) })
    };
    obj.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_errors_map_to_exit_codes() {
        let cfg = eyre::Report::new(ConfigError::TempLimits);
        assert_eq!(exit_code_for_error(&cfg), 3);
        let nvm = eyre::Report::new(NvmError::BadMagic(0x1234)).wrap_err("decode NVM image x");
        assert_eq!(exit_code_for_error(&nvm), 4);
        assert_eq!(exit_code_for_error(&eyre::eyre!("boom")), 1);
    }

    #[test]
    fn crc_details_in_json() {
        let err = eyre::Report::new(NvmError::CrcMismatch {
            stored: 1,
            computed: 2,
        });
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "Nvm");
        assert_eq!(v["details"]["computed_crc"], 2);
        assert!(v["message"].as_str().unwrap().contains("unreadable"));
    }
}
