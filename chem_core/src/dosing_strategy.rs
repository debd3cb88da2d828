//! Dose planning: turn a demand volume into a bounded (volume, time) plan.

use crate::config::DosingMethod;
use crate::util::{secs_for_volume, volume_for_secs};

/// Volume (mL, or lbs for chlorinator doses) and time (s) for one dose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DosePlan {
    pub volume: f64,
    pub time: f64,
}

impl DosePlan {
    /// Plan for pumping `volume_ml` at `rated_flow` mL/min.
    pub fn for_volume(volume_ml: f64, rated_flow: f64) -> Self {
        Self {
            volume: volume_ml,
            time: secs_for_volume(volume_ml, rated_flow),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.volume <= 0.0 && self.time <= 0.0
    }
}

/// Limits applied by the dosing method.
#[derive(Debug, Clone, Copy)]
pub struct DoseLimits {
    pub method: DosingMethod,
    pub max_time: f64,
    pub max_volume: f64,
    pub rated_flow: f64,
}

impl DoseLimits {
    /// Clamp a plan by the dosing method, recomputing the other side of the plan
    /// each time one side is clamped. `VolumeTime` applies the volume clamp first.
    pub fn apply(&self, plan: DosePlan) -> DosePlan {
        match self.method {
            DosingMethod::Time => self.clamp_time(plan),
            DosingMethod::Volume => self.clamp_volume(plan),
            DosingMethod::VolumeTime => self.clamp_time(self.clamp_volume(plan)),
        }
    }

    fn clamp_time(&self, plan: DosePlan) -> DosePlan {
        if plan.time > self.max_time {
            DosePlan {
                time: self.max_time,
                volume: volume_for_secs(self.max_time, self.rated_flow),
            }
        } else {
            plan
        }
    }

    fn clamp_volume(&self, plan: DosePlan) -> DosePlan {
        if plan.volume > self.max_volume {
            DosePlan {
                volume: self.max_volume,
                time: secs_for_volume(self.max_volume, self.rated_flow),
            }
        } else {
            plan
        }
    }
}
