//! Least-squares line through `values` against x = 0, 1, 2, ...

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

impl LinearFit {
    pub fn fit(values: &[f64]) -> Result<Self, CoreError> {
        if values.is_empty() {
            return Err(CoreError::invalid_argument(
                "linear regression requires at least one value",
            ));
        }
        let n = values.len() as f64;
        let (mut sx, mut sy, mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for (i, &y) in values.iter().enumerate() {
            let x = i as f64;
            sx += x;
            sy += y;
            sxx += x * x;
            syy += y * y;
            sxy += x * y;
        }

        let ss_x = sxx - sx * sx / n;
        let co = sxy - sx * sy / n;
        // A single point has no slope.
        let slope = if ss_x == 0.0 { 0.0 } else { co / ss_x };
        let intercept = sy / n - slope * sx / n;

        let denom = (n * sxx - sx * sx) * (n * syy - sy * sy);
        let r_squared = if denom > 0.0 {
            let r = (n * sxy - sx * sy) / denom.sqrt();
            r * r
        } else {
            0.0
        };

        Ok(Self {
            slope,
            intercept,
            r_squared,
        })
    }
}
