//! Dosing status, dose methods and the reasons a dose or mix ends.

use serde::{Deserialize, Serialize};

/// Where a chemical sits in its monitoring → dosing → mixing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DosingStatus {
    /// Idle, evaluating demand each poll.
    #[default]
    Monitoring,
    /// A dose is active; the actuator may be latched.
    Dosing,
    /// Post-dose settling; actuator off.
    Mixing,
}

impl std::fmt::Display for DosingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DosingStatus::Monitoring => "monitoring",
            DosingStatus::Dosing => "dosing",
            DosingStatus::Mixing => "mixing",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DoseMethod {
    Auto,
    Manual,
    Calibration,
}

/// Why a dose (or mix) stopped. `Display` gives the operator-facing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    Disabled,
    Suspended,
    BodyOff,
    Freeze,
    NoFlow,
    SetpointReached,
    DailyLimit,
    EmptyTank,
    PhLockout,
    PhPriority,
    SuperChlor,
    ServiceMode,
    MixOverride,
    ManualOverride,
    Cancelled,
    Completed,
    TimeLimit,
    VolumeLimit,
    Closing,
    /// A dose ended on a path with no specific reason attached.
    Unknown,
}

impl CancelReason {
    /// Normal completions lead into a mix; every other reason returns the
    /// chemical straight to monitoring.
    pub fn is_completion(self) -> bool {
        matches!(
            self,
            CancelReason::Completed | CancelReason::TimeLimit | CancelReason::VolumeLimit
        )
    }
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CancelReason::Disabled => "disabled",
            CancelReason::Suspended => "suspended",
            CancelReason::BodyOff => "body off",
            CancelReason::Freeze => "freeze",
            CancelReason::NoFlow => "no flow",
            CancelReason::SetpointReached => "setpoint reached",
            CancelReason::DailyLimit => "daily limit",
            CancelReason::EmptyTank => "empty tank",
            CancelReason::PhLockout => "ph lockout",
            CancelReason::PhPriority => "ph priority",
            CancelReason::SuperChlor => "superchlor",
            CancelReason::ServiceMode => "service mode",
            CancelReason::MixOverride => "mix override",
            CancelReason::ManualOverride => "manual override",
            CancelReason::Cancelled => "cancelled",
            CancelReason::Completed => "completed",
            CancelReason::TimeLimit => "time limit",
            CancelReason::VolumeLimit => "volume limit",
            CancelReason::Closing => "closing",
            CancelReason::Unknown => "unknown cancel",
        })
    }
}
