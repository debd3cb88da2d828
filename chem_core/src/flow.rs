//! Flow detection for a controller's body.
//!
//! With no sensor configured a running body counts as flow. Sensor read
//! failures report no flow and raise the sensor-fault flag until the next good
//! read.

use std::time::Instant;

use chem_traits::Transport;

use crate::config::{FlowSensorCfg, FlowSensorKind};
use crate::hw_error::map_hw_error;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FlowReading {
    pub flow_detected: bool,
    pub sensor_fault: bool,
    /// Raw numeric reading for rate/pressure sensors.
    pub value: Option<f64>,
}

#[derive(Debug)]
pub struct FlowSensor {
    cfg: FlowSensorCfg,
    last: FlowReading,
    /// When flow was last seen to start; drives the dosing start delay.
    flowing_since: Option<Instant>,
    consecutive_faults: u32,
}

impl FlowSensor {
    pub fn new(cfg: FlowSensorCfg) -> Self {
        Self {
            cfg,
            last: FlowReading::default(),
            flowing_since: None,
            consecutive_faults: 0,
        }
    }

    pub fn has_sensor(&self) -> bool {
        !matches!(self.cfg.kind, FlowSensorKind::None)
    }

    pub fn last(&self) -> FlowReading {
        self.last
    }

    pub fn flowing_since(&self) -> Option<Instant> {
        self.flowing_since
    }

    pub fn consecutive_faults(&self) -> u32 {
        self.consecutive_faults
    }

    /// Evaluate flow for this poll. Flow always requires the body to be on.
    pub fn check(&mut self, transport: &dyn Transport, body_on: bool, now: Instant) -> FlowReading {
        let reading = if !body_on {
            FlowReading::default()
        } else {
            self.read(transport)
        };

        if reading.sensor_fault {
            self.consecutive_faults = self.consecutive_faults.saturating_add(1);
        } else {
            self.consecutive_faults = 0;
        }

        match (reading.flow_detected, self.flowing_since) {
            (true, None) => self.flowing_since = Some(now),
            (false, Some(_)) => self.flowing_since = None,
            _ => {}
        }
        self.last = reading;
        reading
    }

    fn read(&self, transport: &dyn Transport) -> FlowReading {
        let threshold = match self.cfg.kind {
            FlowSensorKind::None => {
                return FlowReading {
                    flow_detected: true,
                    ..FlowReading::default()
                };
            }
            FlowSensorKind::Switch => None,
            FlowSensorKind::Rate { minimum } | FlowSensorKind::Pressure { minimum } => {
                Some(minimum)
            }
        };

        match transport.read_value(&self.cfg.binding) {
            Ok(v) => match threshold {
                None => FlowReading {
                    flow_detected: v.as_bool(),
                    sensor_fault: false,
                    value: None,
                },
                Some(min) => match v.as_f64() {
                    Some(x) => FlowReading {
                        flow_detected: x > min,
                        sensor_fault: false,
                        value: Some(x),
                    },
                    None => {
                        tracing::warn!(binding = %self.cfg.binding, value = ?v, "flow sensor returned a non-numeric value");
                        FlowReading {
                            flow_detected: false,
                            sensor_fault: true,
                            value: None,
                        }
                    }
                },
            },
            Err(e) => {
                let err = map_hw_error(&*e);
                tracing::warn!(binding = %self.cfg.binding, error = %err, "flow sensor read failed");
                FlowReading {
                    flow_detected: false,
                    sensor_fault: true,
                    value: None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::FakeTransport;
    use chem_traits::SensorValue;
    use rstest::rstest;

    fn sensor(kind: FlowSensorKind) -> FlowSensor {
        FlowSensor::new(FlowSensorCfg {
            kind,
            binding: "flow".into(),
        })
    }

    #[rstest]
    #[case(FlowSensorKind::Switch, SensorValue::Bool(true), true)]
    #[case(FlowSensorKind::Switch, SensorValue::Text("off".into()), false)]
    #[case(FlowSensorKind::Rate { minimum: 10.0 }, SensorValue::Number(12.0), true)]
    #[case(FlowSensorKind::Rate { minimum: 10.0 }, SensorValue::Number(10.0), false)]
    #[case(FlowSensorKind::Pressure { minimum: 5.0 }, SensorValue::Text("7.5".into()), true)]
    fn readings_against_thresholds(#[case] kind: FlowSensorKind, #[case] value: SensorValue, #[case] flowing: bool) {
        let t = FakeTransport::new();
        t.set_value("flow", value);
        let mut f = sensor(kind);
        let r = f.check(&t, true, Instant::now());
        assert_eq!(r.flow_detected, flowing);
        assert!(!r.sensor_fault);
    }

    #[test]
    fn no_sensor_follows_the_body() {
        let t = FakeTransport::new();
        let mut f = sensor(FlowSensorKind::None);
        assert!(f.check(&t, true, Instant::now()).flow_detected);
        assert!(!f.check(&t, false, Instant::now()).flow_detected);
        assert!(t.calls().is_empty());
    }

    #[test]
    fn read_failures_count_until_a_good_read() {
        let t = FakeTransport::new();
        let mut f = sensor(FlowSensorKind::Switch);
        let now = Instant::now();
        for n in 1..=3 {
            let r = f.check(&t, true, now);
            assert!(r.sensor_fault);
            assert!(!r.flow_detected);
            assert_eq!(f.consecutive_faults(), n);
        }
        t.set_value("flow", SensorValue::Bool(true));
        assert!(!f.check(&t, true, now).sensor_fault);
        assert_eq!(f.consecutive_faults(), 0);
        assert_eq!(f.flowing_since(), Some(now));
    }
}
