//! Linear per-channel calibration.

use serde::{Deserialize, Serialize};

/// `y = gain * v + offset`, applied independently to every element of a block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    #[serde(default = "default_gain")]
    pub gain: f64,
    #[serde(default)]
    pub offset: f64,
}

fn default_gain() -> f64 {
    1.0
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            gain: default_gain(),
            offset: 0.0,
        }
    }
}

impl Calibration {
    pub fn apply(&self, value: f64) -> f64 {
        self.gain * value + self.offset
    }

    pub fn apply_batch(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|v| self.apply(*v)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_by_default() {
        let cal = Calibration::default();
        assert_eq!(cal.apply(3.5), 3.5);
    }

    #[test]
    fn applies_gain_and_offset() {
        let cal = Calibration {
            gain: 1.5,
            offset: -0.2,
        };
        let out = cal.apply_batch(&[-1.0, 0.0, 1.0]);
        assert!((out[0] - (-1.7)).abs() < 1e-9);
        assert!((out[1] - (-0.2)).abs() < 1e-9);
        assert!((out[2] - 1.3).abs() < 1e-9);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let cal = Calibration::default();
        assert!(cal.apply_batch(&[]).is_empty());
    }
}
