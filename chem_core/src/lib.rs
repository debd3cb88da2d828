#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Chemistry control engine (hardware-agnostic).
//!
//! All hardware interactions go through the `chem_traits` seams: relay and
//! sensor `Transport`, `ChlorinatorControl`, `PoolStatus` and `Clock`.
//!
//! ## Architecture
//!
//! - **Chemical dosers** (`doser`): per-chemical state machine
//!   monitoring → dosing → mixing, demand and dosing-method clamps
//! - **Actuators**: relay `DosingPump` behind a 3 s dead-man latch, and the
//!   `ChlorinatorBridge` duty cycle driven by the demand trend
//! - **Interlocks**: `FlowSensor`, `Tank` and the `AlarmEvaluator`
//! - **Controllers** (`controller`): one body, its flow sensor and dosers;
//!   `poll` evaluates, `tick` advances active doses and mixes
//! - **Runtime** (`runner`, `collection`): one worker thread per controller,
//!   operator commands over channels, observer events
//!
//! ## Units
//!
//! Volumes are millilitres, except chlorinator doses which are pounds of
//! chlorine. Times are seconds unless the type says otherwise.

pub mod alarms;
pub mod atomic;
pub mod builder;
pub mod chemistry;
pub mod chlorinator;
pub mod collection;
pub mod config;
pub mod context;
pub mod controller;
pub mod conversions;
pub mod demand;
pub mod dose;
pub mod doser;
pub mod dosing_strategy;
pub mod error;
pub mod flow;
pub mod hw_error;
pub mod mix;
pub mod mocks;
pub mod pump;
pub mod runner;
pub mod state;
pub mod status;
pub mod suspend;
pub mod tank;
pub mod util;

pub use alarms::{AlarmEvaluator, ChemAlarms, ChemWarnings, ControllerAlarms, ControllerWarnings};
pub use atomic::SavedState;
pub use builder::ControllerBuilder;
pub use chlorinator::{ChlorinatorBridge, percent_of_time};
pub use collection::{ControllerCollection, MixDuration, parse_amount, parse_chemical};
pub use config::{ChemicalCfg, ChemicalKind, ControllerCfg};
pub use context::Services;
pub use controller::ChemController;
pub use dose::DoseRecord;
pub use doser::ChemicalDoser;
pub use dosing_strategy::{DoseLimits, DosePlan};
pub use error::{BuildError, ChemError, Result};
pub use runner::ControllerHandle;
pub use state::{ChemicalSnapshot, ControllerSnapshot, EquipmentEvent, PersistedChemical};
pub use status::{CancelReason, DoseMethod, DosingStatus};
pub use suspend::{SuspendCounter, SuspendGuard};
