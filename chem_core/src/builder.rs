//! Builder for `ChemController`.
//!
//! Collects the controller config and the external collaborators, validates
//! the combination once in `try_build()` and hands back a ready controller.

use std::sync::Arc;

use chem_traits::clock::{Clock, MonotonicClock};
use chem_traits::{ChlorinatorControl, PoolStatus, Transport};

use crate::config::{ChemicalKind, ControllerCfg, DosingMethod, KindCfg};
use crate::context::Services;
use crate::controller::ChemController;
use crate::error::{BuildError, Result};
use crate::state::PersistedChemical;
use crate::suspend::SuspendCounter;

#[derive(Default)]
pub struct ControllerBuilder {
    cfg: Option<ControllerCfg>,
    transport: Option<Arc<dyn Transport>>,
    chlorinators: Option<Arc<dyn ChlorinatorControl>>,
    pool: Option<Arc<dyn PoolStatus>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    suspend: Option<SuspendCounter>,
    restored: Vec<(ChemicalKind, PersistedChemical)>,
}

impl ControllerBuilder {
    pub fn with_config(mut self, cfg: ControllerCfg) -> Self {
        self.cfg = Some(cfg);
        self
    }

    pub fn with_transport(mut self, t: Arc<dyn Transport>) -> Self {
        self.transport = Some(t);
        self
    }

    pub fn with_chlorinators(mut self, c: Arc<dyn ChlorinatorControl>) -> Self {
        self.chlorinators = Some(c);
        self
    }

    pub fn with_pool_status(mut self, p: Arc<dyn PoolStatus>) -> Self {
        self.pool = Some(p);
        self
    }

    /// Use all collaborators from an existing bundle.
    pub fn with_services(mut self, s: Services) -> Self {
        self.transport = Some(s.transport);
        self.chlorinators = Some(s.chlorinators);
        self.pool = Some(s.pool);
        self.clock = Some(s.clock);
        self
    }

    /// Defaults to `MonotonicClock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Share a suspend counter with the caller (the collection uses this to
    /// observe service mode).
    pub fn with_suspend_counter(mut self, s: SuspendCounter) -> Self {
        self.suspend = Some(s);
        self
    }

    /// Runtime state saved before a restart.
    pub fn with_restored_state(mut self, saved: Vec<(ChemicalKind, PersistedChemical)>) -> Self {
        self.restored = saved;
        self
    }

    pub fn try_build(self) -> Result<ChemController> {
        let cfg = self
            .cfg
            .ok_or_else(|| eyre::Report::new(BuildError::MissingConfig))?;
        let transport = self
            .transport
            .ok_or_else(|| eyre::Report::new(BuildError::MissingTransport))?;
        let chlorinators = self
            .chlorinators
            .ok_or_else(|| eyre::Report::new(BuildError::MissingChlorinators))?;
        let pool = self
            .pool
            .ok_or_else(|| eyre::Report::new(BuildError::MissingPoolStatus))?;
        let clock: Arc<dyn Clock + Send + Sync> = match self.clock {
            Some(c) => c,
            None => Arc::new(MonotonicClock::new()),
        };

        validate(&cfg)?;

        let services = Services::new(transport, chlorinators, pool, clock);
        let mut ctl = ChemController::new(cfg, services, self.suspend.unwrap_or_default());
        if !self.restored.is_empty() {
            ctl.restore(&self.restored);
        }
        Ok(ctl)
    }
}

fn invalid(msg: &'static str) -> eyre::Report {
    eyre::Report::new(BuildError::InvalidConfig(msg))
}

/// Structural checks on an already-converted config.
fn validate(cfg: &ControllerCfg) -> Result<()> {
    if cfg.chemicals.is_empty() {
        return Err(invalid("controller needs at least one chemical"));
    }
    if cfg.poll_interval.is_zero() || cfg.tick_interval.is_zero() {
        return Err(invalid("poll and tick intervals must be > 0"));
    }
    let mut kinds: Vec<ChemicalKind> = cfg.chemicals.iter().map(|c| c.kind()).collect();
    kinds.sort_unstable();
    if kinds.windows(2).any(|w| w[0] == w[1]) {
        return Err(invalid("duplicate chemical on one controller"));
    }
    if kinds.contains(&ChemicalKind::Generic) && kinds.len() > 1 {
        return Err(invalid("a generic doser cannot share a controller"));
    }
    for c in &cfg.chemicals {
        if let Some(p) = &c.pump {
            if !(p.rated_flow.is_finite() && p.rated_flow > 0.0) {
                return Err(invalid("pump rated_flow must be > 0"));
            }
            if p.binding.trim().is_empty() {
                return Err(invalid("pump binding must not be empty"));
            }
        }
        if c.pump.is_some() && c.uses_chlorinator() {
            return Err(invalid("ORP doser cannot use both a pump and a chlorinator"));
        }
        if c.max_dosing_time == 0 && c.dosing_method != DosingMethod::Volume {
            return Err(invalid("max_dosing_time must be > 0"));
        }
        if let KindCfg::Generic(g) = &c.kind {
            if c.pump.is_none() {
                return Err(invalid("generic doser requires a relay pump"));
            }
            if g.dosing_volume < 0.0 {
                return Err(invalid("dosing_volume must be >= 0"));
            }
        }
    }
    Ok(())
}
