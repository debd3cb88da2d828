//! Water chemistry math: pH acid demand and the Langelier saturation index.

use serde::Serialize;

use crate::config::{AcidType, PhSupply, WaterCfg};
use crate::util::{ML_PER_OZ, round_to};

/// Acid (mL) needed to bring `level` down to `setpoint` in `gallons` of water.
///
/// Uses a borate- and alkalinity-corrected titration model calibrated for
/// 31.45% muriatic acid, scaled by the acid's dosing factor. Base supply has no
/// model and always yields zero.
pub fn ph_demand_ml(
    level: f64,
    setpoint: f64,
    gallons: f64,
    water: &WaterCfg,
    supply: PhSupply,
    acid: AcidType,
) -> f64 {
    if supply == PhSupply::Base || !level.is_finite() || gallons <= 0.0 {
        return 0.0;
    }
    let chg = setpoint - level;
    if chg >= 0.0 {
        return 0.0;
    }
    let mut delta = chg * gallons;
    let t = (level + setpoint) / 2.0;
    let adj = (192.1626 + -60.1221 * t + 6.0752 * t * t + -0.1943 * t * t * t)
        * (water.alkalinity + 13.91)
        / 114.6;
    let extra = (-5.476259 + 2.414292 * t + -0.355882 * t * t + 0.01755 * t * t * t)
        * water.borates
        * delta;
    delta *= adj;
    let factor = acid.dosing_factor();
    let oz = (delta / -240.15 * factor) + (extra / -240.15 * factor);
    round_to((oz * ML_PER_OZ).max(0.0), 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WaterBalance {
    #[default]
    Ok,
    Corrosive,
    Scaling,
}

impl WaterBalance {
    pub fn classify(si: f64) -> Self {
        if si < -0.3 {
            WaterBalance::Corrosive
        } else if si > 0.3 {
            WaterBalance::Scaling
        } else {
            WaterBalance::Ok
        }
    }
}

fn calcium_hardness_factor(ch: f64) -> f64 {
    const TABLE: &[(f64, f64)] = &[
        (25.0, 1.0),
        (50.0, 1.3),
        (75.0, 1.5),
        (100.0, 1.6),
        (125.0, 1.7),
        (150.0, 1.8),
        (200.0, 1.9),
        (250.0, 2.0),
        (300.0, 2.1),
        (400.0, 2.2),
    ];
    step_lookup(TABLE, ch, 2.5)
}

fn alkalinity_factor(ppm: f64) -> f64 {
    const TABLE: &[(f64, f64)] = &[
        (25.0, 1.4),
        (50.0, 1.7),
        (75.0, 1.9),
        (100.0, 2.0),
        (125.0, 2.1),
        (150.0, 2.2),
        (200.0, 2.3),
        (250.0, 2.4),
        (300.0, 2.5),
        (400.0, 2.6),
    ];
    step_lookup(TABLE, ppm, 2.9)
}

fn temperature_factor(temp_c: f64) -> f64 {
    const TABLE: &[(f64, f64)] = &[
        (0.0, 0.0),
        (2.8, 0.1),
        (7.8, 0.2),
        (11.7, 0.3),
        (15.6, 0.4),
        (18.9, 0.5),
        (24.4, 0.6),
        (28.9, 0.7),
        (34.4, 0.8),
    ];
    step_lookup(TABLE, temp_c, 0.9)
}

fn step_lookup(table: &[(f64, f64)], x: f64, above: f64) -> f64 {
    table
        .iter()
        .find(|(limit, _)| x <= *limit)
        .map_or(above, |(_, f)| *f)
}

/// Langelier saturation index, rounded to 3 decimals.
///
/// Alkalinity is corrected for cyanuric acid (CYA/3). The TDS factor is 12.2
/// when a salt chlorinator is in use, 12.1 otherwise.
pub fn saturation_index(ph: f64, temp_c: f64, water: &WaterCfg, salt_chlorinator: bool) -> Option<f64> {
    if !ph.is_finite() || !temp_c.is_finite() {
        return None;
    }
    let corrected_alk = water.alkalinity - water.cyanuric_acid / 3.0;
    let tds = if salt_chlorinator { 12.2 } else { 12.1 };
    let si = ph
        + calcium_hardness_factor(water.calcium_hardness)
        + alkalinity_factor(corrected_alk)
        + temperature_factor(temp_c)
        - tds;
    Some(round_to(si, 3))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn water() -> WaterCfg {
        WaterCfg {
            alkalinity: 80.0,
            calcium_hardness: 250.0,
            cyanuric_acid: 30.0,
            borates: 0.0,
        }
    }

    #[test]
    fn no_acid_at_or_below_setpoint() {
        let w = water();
        assert_eq!(ph_demand_ml(7.4, 7.5, 15_000.0, &w, PhSupply::Acid, AcidType::A31_45), 0.0);
        assert_eq!(ph_demand_ml(7.5, 7.5, 15_000.0, &w, PhSupply::Acid, AcidType::A31_45), 0.0);
    }

    #[test]
    fn acid_demand_grows_with_deviation_and_strength_factor() {
        let w = water();
        let small = ph_demand_ml(7.7, 7.5, 15_000.0, &w, PhSupply::Acid, AcidType::A31_45);
        let large = ph_demand_ml(8.0, 7.5, 15_000.0, &w, PhSupply::Acid, AcidType::A31_45);
        let weak = ph_demand_ml(8.0, 7.5, 15_000.0, &w, PhSupply::Acid, AcidType::A15_7);
        assert!(small > 0.0);
        assert!(large > small);
        assert!((weak / large - 2.0).abs() < 0.01);
    }

    #[test]
    fn base_supply_has_no_model() {
        assert_eq!(ph_demand_ml(8.2, 7.5, 15_000.0, &water(), PhSupply::Base, AcidType::A31_45), 0.0);
    }

    #[rstest]
    #[case(7.5, 27.0, WaterBalance::Ok)]
    #[case(6.8, 10.0, WaterBalance::Corrosive)]
    #[case(8.2, 30.0, WaterBalance::Scaling)]
    fn balance_classification(#[case] ph: f64, #[case] temp: f64, #[case] expect: WaterBalance) {
        let si = saturation_index(ph, temp, &water(), false).expect("si");
        assert_eq!(WaterBalance::classify(si), expect, "si = {si}");
    }
}
