//! Maps `Box<dyn Error>` from trait boundaries to typed `ChemError`.
//!
//! The traits in `chem_traits` return boxed errors so any transport can plug
//! in; this module turns them into `ChemError`, with a feature-gated path that
//! downcasts `chem_hardware::HwError` precisely.

use crate::error::ChemError;

/// Map a trait-boundary error to a typed `ChemError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> ChemError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<chem_hardware::error::HwError>() {
            return match hw {
                chem_hardware::error::HwError::Timeout => ChemError::Timeout,
                chem_hardware::error::HwError::UnknownBinding(b) => {
                    ChemError::EquipmentNotFound(format!("device binding '{b}'"))
                }
                other => ChemError::TransportFault(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("timeout") {
        ChemError::Timeout
    } else {
        ChemError::Transport(s)
    }
}
