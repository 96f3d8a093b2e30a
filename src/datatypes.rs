use crate::error::CalibrationError;

/// Box constraints of the investigated parameters, in physical units
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Bounds {
    /// Builds a set of bounds, checking that both limits have the same size
    /// and that every lower limit is strictly below its upper limit.
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Result<Bounds, CalibrationError> {
        if lower.len() != upper.len() {
            return Err(CalibrationError::Config(format!(
                "Lower bounds have {} values but upper bounds have {}",
                lower.len(),
                upper.len()
            )));
        }
        for (i, (lo, up)) in std::iter::zip(&lower, &upper).enumerate() {
            if !(lo.is_finite() && up.is_finite()) || lo >= up {
                return Err(CalibrationError::Config(format!(
                    "Bounds of parameter {i} are invalid: lower={lo}, upper={up}"
                )));
            }
        }

        Ok(Bounds { lower, upper })
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    /// Maps raw parameters onto the unit hypercube
    pub fn normalize(&self, raw: &[f64]) -> Vec<f64> {
        raw.iter()
            .enumerate()
            .map(|(i, p)| (p - self.lower[i]) / (self.upper[i] - self.lower[i]))
            .collect()
    }

    /// Maps normalized parameters back to physical units
    pub fn denormalize(&self, normalized: &[f64]) -> Vec<f64> {
        normalized
            .iter()
            .enumerate()
            .map(|(i, p)| self.lower[i] + p * (self.upper[i] - self.lower[i]))
            .collect()
    }

    /// Width of the admissible interval of each parameter
    pub fn span(&self) -> Vec<f64> {
        std::iter::zip(&self.lower, &self.upper)
            .map(|(lo, up)| up - lo)
            .collect()
    }
}

/// Kinematic, static and weighted costs of one simulation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostTriple {
    pub kinematic_cost: f64,
    pub static_cost: f64,
    pub weighted_cost: f64,
}

/// One row of the evaluation log
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRecord {
    pub raw: Vec<f64>,
    pub costs: CostTriple,
}
