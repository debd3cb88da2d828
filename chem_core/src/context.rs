//! Shared collaborators and the per-evaluation view a doser runs against.

use std::sync::Arc;
use std::time::Instant;

use chem_traits::{ChlorinatorControl, Clock, PoolStatus, Transport};

use crate::config::WaterCfg;

/// External collaborators shared by every doser of a controller.
#[derive(Clone)]
pub struct Services {
    pub transport: Arc<dyn Transport>,
    pub chlorinators: Arc<dyn ChlorinatorControl>,
    pub pool: Arc<dyn PoolStatus>,
    pub clock: Arc<dyn Clock + Send + Sync>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}

impl Services {
    pub fn new(
        transport: Arc<dyn Transport>,
        chlorinators: Arc<dyn ChlorinatorControl>,
        pool: Arc<dyn PoolStatus>,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        Self {
            transport,
            chlorinators,
            pool,
            clock,
        }
    }

    #[inline]
    pub fn now(&self) -> Instant {
        self.clock.now()
    }
}

/// Conditions a chemical is evaluated under, assembled by its controller.
#[derive(Debug, Clone, Copy)]
pub struct TickContext<'a> {
    pub services: &'a Services,
    pub now: Instant,
    pub body_on: bool,
    pub flow_detected: bool,
    pub freeze_active: bool,
    pub flowing_since: Option<Instant>,
    /// Sibling pH reading (ORP lockout).
    pub ph_level: Option<f64>,
    /// Sibling pH is dosing with priority (ORP chlorinator hold-off).
    pub ph_priority_dosing: bool,
    /// Gallons in the controller's body.
    pub gallons: Option<f64>,
    pub size_adj: f64,
    pub water: WaterCfg,
    /// Chlorinators to hold off while a priority dose runs.
    pub interlock_chlorinators: &'a [u8],
}

impl TickContext<'_> {
    pub fn transport(&self) -> &dyn Transport {
        &*self.services.transport
    }

    pub fn chlorinators(&self) -> &dyn ChlorinatorControl {
        &*self.services.chlorinators
    }
}
