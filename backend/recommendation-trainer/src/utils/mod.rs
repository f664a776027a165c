// Utility functions for recommendation-trainer

use ndarray::{Array1, ArrayView1};
use std::cmp::Ordering;

/// Normalize a score to [0, 1] range. Degenerate ranges map to 0.
pub fn normalize_score(score: f64, min: f64, max: f64) -> f64 {
    if max - min < f64::EPSILON {
        0.0
    } else {
        ((score - min) / (max - min)).clamp(0.0, 1.0)
    }
}

/// Order item ids numerically when both are integers, lexically otherwise.
pub fn compare_item_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

/// Descending by score, then ascending by item id.
pub fn rank_order(a: (&str, f64), b: (&str, f64)) -> Ordering {
    b.1.total_cmp(&a.1).then_with(|| compare_item_ids(a.0, b.0))
}

/// L2-normalize a vector in place. Returns false when the vector cannot be normalized.
pub fn l2_normalize(vector: &mut Array1<f32>) -> bool {
    if vector.iter().any(|v| !v.is_finite()) {
        return false;
    }
    let norm = vector.dot(vector).sqrt();
    if norm <= f32::EPSILON {
        return false;
    }
    vector.mapv_inplace(|v| v / norm);
    true
}

/// Cosine similarity of two unit vectors, clipped to [-1, 1].
pub fn unit_cosine(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f32 {
    a.dot(&b).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_normalize_score() {
        assert!((normalize_score(5.0, 0.0, 10.0) - 0.5).abs() < 1e-9);
        assert!((normalize_score(10.0, 0.0, 10.0) - 1.0).abs() < 1e-9);
        assert_eq!(normalize_score(3.0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn test_compare_item_ids_is_numeric() {
        assert_eq!(compare_item_ids("9", "10"), Ordering::Less);
        assert_eq!(compare_item_ids("b", "a"), Ordering::Greater);
    }

    #[test]
    fn test_rank_order_breaks_ties_by_id() {
        let mut items = vec![("12", 1.0), ("3", 1.0), ("7", 2.0)];
        items.sort_by(|a, b| rank_order(*a, *b));
        assert_eq!(items, vec![("7", 2.0), ("3", 1.0), ("12", 1.0)]);
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = array![3.0_f32, 4.0];
        assert!(l2_normalize(&mut v));
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = array![0.0_f32, 0.0];
        assert!(!l2_normalize(&mut zero));
    }
}
