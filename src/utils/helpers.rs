//! Utility functions for hclust and its tools.

use num_traits::ToPrimitive;

/// Position and value of the smallest element; the first wins ties.
pub fn arg_min<T: PartialOrd + Copy>(values: &[T]) -> (usize, T) {
    let mut best = (0, values[0]);
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v < best.1 {
            best = (i, v);
        }
    }
    best
}

/// Position and value of the largest element; the first wins ties.
pub fn arg_max<T: PartialOrd + Copy>(values: &[T]) -> (usize, T) {
    let mut best = (0, values[0]);
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > best.1 {
            best = (i, v);
        }
    }
    best
}

pub fn mean<T: ToPrimitive + Copy>(values: &[T]) -> f64 {
    values.iter().map(|v| v.to_f64().unwrap_or(0.0)).sum::<f64>() / values.len() as f64
}

/// Formats a duration the way the run logs print it: `1h 02' 03"`.
pub fn pretty_elapsed(seconds: u64) -> String {
    format!("{}h {:02}' {:02}\"", seconds / 3600, (seconds % 3600) / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    #[test]
    fn test_arg_extrema() {
        let values = [3.0f64, 1.0, 7.0, 2.0];
        assert_eq!(arg_min(&values), (1, 1.0));
        assert_eq!(arg_max(&values), (2, 7.0));
    }

    #[test]
    fn test_mean() {
        assert!(approx_eq!(f64, mean(&[1.0f64, 2.0, 3.0]), 2.0));
        assert!(approx_eq!(f64, mean(&[2usize, 4]), 3.0));
    }

    #[test]
    fn test_pretty_elapsed() {
        assert_eq!(pretty_elapsed(3723), "1h 02' 03\"");
        assert_eq!(pretty_elapsed(59), "0h 00' 59\"");
    }
}
