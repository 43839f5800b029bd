use serde::{Deserialize, Serialize};

/// Population min/max per dimension, computed once per run and handed to
/// the normalization step as a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationStats {
    pub min: Vec<f64>,
    pub max: Vec<f64>,
}

impl NormalizationStats {
    pub fn from_rows<'a, I>(dimensions: usize, rows: I) -> Self
    where
        I: IntoIterator<Item = &'a [f64]>,
    {
        let mut min = vec![f64::INFINITY; dimensions];
        let mut max = vec![f64::NEG_INFINITY; dimensions];
        let mut seen = false;

        for row in rows {
            seen = true;
            for (d, value) in row.iter().enumerate().take(dimensions) {
                min[d] = min[d].min(*value);
                max[d] = max[d].max(*value);
            }
        }

        if !seen {
            min = vec![0.0; dimensions];
            max = vec![0.0; dimensions];
        }

        Self { min, max }
    }

    /// Min-max scales a raw row into [0, 1]. A flat dimension maps to 0.
    pub fn normalize(&self, raw: &[f64]) -> Vec<f64> {
        raw.iter()
            .enumerate()
            .map(|(d, value)| {
                let span = self.max[d] - self.min[d];
                if span > 0.0 && span.is_finite() {
                    ((value - self.min[d]) / span).clamp(0.0, 1.0)
                } else {
                    0.0
                }
            })
            .collect()
    }
}
