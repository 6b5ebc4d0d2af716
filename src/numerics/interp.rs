use crate::error::{SimResult, SimulationError};

/// Piecewise-linear interpolation on an increasing abscissa. Values outside
/// the tabulated range are clamped to the end points.
#[derive(Debug, Clone, PartialEq)]
pub struct Interpolator1D {
    x: Vec<f64>,
    y: Vec<f64>,
}

impl Interpolator1D {
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> SimResult<Self> {
        if x.is_empty() || x.len() != y.len() {
            return Err(SimulationError::config(
                "interpolation",
                format!("expected matching non-empty tables, got {} and {} points", x.len(), y.len()),
            ));
        }
        if x.windows(2).any(|w| w[1] <= w[0]) {
            return Err(SimulationError::config("interpolation", "abscissa must be strictly increasing"));
        }
        Ok(Self { x, y })
    }

    pub fn eval(&self, x: f64) -> f64 {
        let (k, w) = bracket(&self.x, x);
        match w {
            Some(w) => (1.0 - w) * self.y[k] + w * self.y[k + 1],
            None => self.y[k],
        }
    }
}

/// Index of the lower tabulation point and the weight of the upper one.
fn bracket(x: &[f64], v: f64) -> (usize, Option<f64>) {
    let n = x.len();
    if n == 1 || v <= x[0] {
        return (0, None);
    }
    if v >= x[n - 1] {
        return (n - 1, None);
    }
    let k = x.partition_point(|&xi| xi <= v) - 1;
    (k, Some((v - x[k]) / (x[k + 1] - x[k])))
}

/// Data tabulated in time and radius, `values[it][ir]`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeTable {
    times: Vec<f64>,
    radii: Vec<f64>,
    values: Vec<Vec<f64>>,
}

impl TimeTable {
    pub fn new(times: Vec<f64>, radii: Vec<f64>, values: Vec<Vec<f64>>) -> SimResult<Self> {
        if times.is_empty() || radii.is_empty() {
            return Err(SimulationError::config("prescribed data", "time and radius tables must be non-empty"));
        }
        if times.windows(2).any(|w| w[1] <= w[0]) || radii.windows(2).any(|w| w[1] <= w[0]) {
            return Err(SimulationError::config("prescribed data", "tabulation points must be strictly increasing"));
        }
        if values.len() != times.len() || values.iter().any(|row| row.len() != radii.len()) {
            return Err(SimulationError::config(
                "prescribed data",
                format!("expected {}x{} values", times.len(), radii.len()),
            ));
        }
        Ok(Self { times, radii, values })
    }

    /// Uniform in radius, varying in time.
    pub fn time_series(times: Vec<f64>, values: Vec<f64>) -> SimResult<Self> {
        Self::new(times, vec![0.0], values.into_iter().map(|v| vec![v]).collect())
    }

    pub fn constant(value: f64) -> Self {
        Self {
            times: vec![0.0],
            radii: vec![0.0],
            values: vec![vec![value]],
        }
    }

    pub fn eval(&self, t: f64, r: f64) -> f64 {
        let at = |it: usize| {
            let (k, w) = bracket(&self.radii, r);
            match w {
                Some(w) => (1.0 - w) * self.values[it][k] + w * self.values[it][k + 1],
                None => self.values[it][k],
            }
        };
        let (k, w) = bracket(&self.times, t);
        match w {
            Some(w) => (1.0 - w) * at(k) + w * at(k + 1),
            None => at(k),
        }
    }

    pub fn eval_profile(&self, t: f64, r: &[f64]) -> Vec<f64> {
        r.iter().map(|&ri| self.eval(t, ri)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bilinear_interpolation() {
        let table = TimeTable::new(
            vec![0.0, 1.0],
            vec![0.0, 1.0],
            vec![vec![0.0, 1.0], vec![2.0, 3.0]],
        )
        .unwrap();
        assert!((table.eval(0.5, 0.5) - 1.5).abs() < 1e-15);
        // Clamped outside the table.
        assert_eq!(table.eval(-1.0, 2.0), 1.0);
        assert_eq!(table.eval(5.0, 0.0), 2.0);
    }

    #[test]
    fn interpolator_rejects_unsorted_abscissa() {
        assert!(Interpolator1D::new(vec![0.0, 0.0], vec![1.0, 2.0]).is_err());
        let f = Interpolator1D::new(vec![0.0, 2.0], vec![1.0, 5.0]).unwrap();
        assert_eq!(f.eval(1.0), 3.0);
    }
}
