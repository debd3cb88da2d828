//! Human-readable error descriptions and structured JSON error formatting.

use chem_core::error::{BuildError, ChemError};

/// Stable name for the JSON `reason` field.
pub fn error_reason_name(err: &eyre::Report) -> &'static str {
    if err.downcast_ref::<BuildError>().is_some() {
        return "BuildError";
    }
    match err.downcast_ref::<ChemError>() {
        Some(ChemError::InvalidId { .. }) => "InvalidId",
        Some(ChemError::InvalidData(_)) => "InvalidData",
        Some(ChemError::EmptyTank(_)) => "EmptyTank",
        Some(ChemError::EquipmentNotFound(_)) => "EquipmentNotFound",
        Some(ChemError::Transport(_) | ChemError::TransportFault(_)) => "Transport",
        Some(ChemError::Timeout) => "Timeout",
        Some(ChemError::Config(_)) => "Config",
        Some(ChemError::State(_)) => "State",
        Some(ChemError::Closed(_)) => "Closed",
        None => "Error",
    }
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingConfig => {
                "What happened: A controller was built without its config.\nLikely causes: No [[controllers]] entry matched.\nHow to fix: Check the controller id and the config file.".to_string()
            }
            BuildError::MissingTransport | BuildError::MissingChlorinators | BuildError::MissingPoolStatus => format!(
                "What happened: {be}.\nLikely causes: A device backend failed to initialize.\nHow to fix: Run `chemctl self-check` and check the logs."
            ),
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun `chemctl check`."
            ),
        };
    }

    if let Some(ce) = err.downcast_ref::<ChemError>() {
        return match ce {
            ChemError::EmptyTank(what) => format!(
                "What happened: Refused to dose because {what}.\nLikely causes: The tank level reached zero.\nHow to fix: Refill the tank and record the new level."
            ),
            ChemError::Timeout => "What happened: A device did not answer in time.\nLikely causes: Bus wiring, power, or an overloaded controller thread.\nHow to fix: Check device connections and rerun with --log-level=debug.".to_string(),
            ChemError::Transport(m) | ChemError::TransportFault(m) => format!(
                "What happened: Device communication failed ({m}).\nLikely causes: Relay board offline or a wrong binding.\nHow to fix: Run `chemctl self-check` to test every binding."
            ),
            ChemError::EquipmentNotFound(m) => format!(
                "What happened: Required equipment is missing ({m}).\nLikely causes: No pump or chlorinator model configured for this chemical.\nHow to fix: Add the pump or chlorinator settings to the config."
            ),
            ChemError::InvalidId { kind, id } => format!(
                "What happened: Unknown {kind} '{id}'.\nHow to fix: Use an id listed by `chemctl check`."
            ),
            other => format!(
                "What happened: {other}.\nHow to fix: Re-run with --log-level=debug for more detail."
            ),
        };
    }

    // Config loader errors arrive as plain reports.
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();
    if lower.contains("reading config") {
        let cause = err.root_cause();
        return format!(
            "What happened: Could not read the config file ({cause}).\nHow to fix: Pass --config with the path to a chemctl TOML file."
        );
    }
    if lower.contains("parsing config toml") || lower.contains("must be") || lower.contains("duplicate") {
        let cause = err.root_cause();
        return format!(
            "What happened: Configuration is invalid: {cause}\nHow to fix: Edit the TOML config and try again."
        );
    }

    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes per error class; everything else returns 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if err.downcast_ref::<BuildError>().is_some() {
        return 2;
    }
    match err.downcast_ref::<ChemError>() {
        Some(ChemError::InvalidId { .. } | ChemError::InvalidData(_) | ChemError::Config(_)) => 2,
        Some(ChemError::EmptyTank(_)) => 3,
        Some(ChemError::Timeout) => 4,
        Some(ChemError::Transport(_) | ChemError::TransportFault(_) | ChemError::EquipmentNotFound(_)) => 5,
        _ => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    serde_json::json!({ "reason": error_reason_name(err), "message": humanize(err) }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tank_has_its_own_exit_code() {
        let err = eyre::Report::new(ChemError::EmptyTank("ph tank is empty".into()));
        assert_eq!(exit_code_for_error(&err), 3);
        assert!(humanize(&err).contains("Refill"));
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "EmptyTank");
    }

    #[test]
    fn wrapped_errors_still_classify() {
        use eyre::WrapErr;
        let err = Err::<(), _>(ChemError::InvalidId {
            kind: "controller",
            id: "9".into(),
        })
        .wrap_err("manual dose")
        .unwrap_err();
        assert_eq!(exit_code_for_error(&err), 2);
    }

    #[test]
    fn unknown_errors_fall_back() {
        let err = eyre::eyre!("boom");
        assert_eq!(exit_code_for_error(&err), 1);
        assert!(humanize(&err).contains("Original: boom"));
    }
}
