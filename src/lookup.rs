use anyhow::Result;
use serde::Serialize;

/// Table lookup with linear inter- and extrapolation.
///
/// Stores (x, y) pairs sorted ascending by x. [`LookupTable::val`] returns y
/// for any x: interpolated between the bracketing points inside the range,
/// extrapolated from the two nearest end points outside it.
#[derive(Debug, Clone, Serialize)]
pub struct LookupTable {
    points: Vec<(f64, f64)>,
}

impl LookupTable {
    /// Builds a table from unordered (x, y) pairs.
    pub fn new(pairs: impl IntoIterator<Item = (f64, f64)>) -> Result<Self> {
        let mut points: Vec<(f64, f64)> = pairs.into_iter().collect();
        anyhow::ensure!(!points.is_empty(), "lookup table has no points");
        points.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        Ok(Self { points })
    }

    /// A single-entry table returning `y` for every x.
    pub fn constant(y: f64) -> Self {
        Self {
            points: vec![(0.0, y)],
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Returns y for the given x.
    pub fn val(&self, x: f64) -> f64 {
        let pts = &self.points;
        if pts.len() == 1 {
            return pts[0].1;
        }
        // index of the first stored x not less than the query
        let idx = pts.partition_point(|p| p.0 < x);
        let (lo, hi) = if idx >= pts.len() {
            (pts.len() - 2, pts.len() - 1)
        } else if idx == 0 {
            (0, 1)
        } else {
            (idx - 1, idx)
        };
        let (x1, y1) = pts[lo];
        let (x2, y2) = pts[hi];
        y1 + (y2 - y1) / (x2 - x1) * (x - x1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_hits() {
        let t = LookupTable::new([(0.0, 1.0), (10.0, 3.0), (20.0, 2.0)]).unwrap();
        assert!((t.val(0.0) - 1.0).abs() < 1e-12);
        assert!((t.val(10.0) - 3.0).abs() < 1e-12);
        assert!((t.val(20.0) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_interpolation() {
        let t = LookupTable::new([(10.0, 3.0), (0.0, 1.0)]).unwrap();
        assert!((t.val(5.0) - 2.0).abs() < 1e-12);
        assert!((t.val(2.5) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_extrapolation() {
        let t = LookupTable::new([(0.0, 0.0), (1.0, 2.0)]).unwrap();
        assert!((t.val(2.0) - 4.0).abs() < 1e-12, "above the range");
        assert!((t.val(-1.0) + 2.0).abs() < 1e-12, "below the range");
    }

    #[test]
    fn test_single_point() {
        let t = LookupTable::constant(7.5);
        assert!((t.val(-100.0) - 7.5).abs() < 1e-12);
        assert!((t.val(100.0) - 7.5).abs() < 1e-12);
    }

    #[test]
    fn test_empty_rejected() {
        assert!(LookupTable::new([]).is_err());
    }
}
