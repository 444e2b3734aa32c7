//! Pure statistical kernels shared by the score analytics layer.
//!
//! Everything here operates on plain f64 slices; monetary precision rules do
//! not apply to statistics. NaN outputs (empty input, zero variance) are
//! normalized to 0 so the query surface never serializes NaN.

/// Replace NaN/infinite results with 0.
pub fn normalize(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation; 0 for fewer than two values.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    normalize(var.sqrt())
}

/// Quantile with linear interpolation between closest ranks.
pub fn quantile(q: f64, values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let weight = pos - lower as f64;
        sorted[lower] * (1.0 - weight) + sorted[upper] * weight
    }
}

pub fn median(values: &[f64]) -> f64 {
    quantile(0.5, values)
}

/// Histogram bin edges: `bins` half-open intervals spanning `[min, max]`.
pub fn bin_edges(min: f64, max: f64, bins: usize) -> Vec<(f64, f64)> {
    if bins == 0 {
        return Vec::new();
    }
    let width = (max - min) / bins as f64;
    (0..bins)
        .map(|i| (min + width * i as f64, min + width * (i + 1) as f64))
        .collect()
}

/// Map a value to its bin index; values at the max boundary clamp into the
/// last bin so the top of the range is inclusive.
pub fn bin_index(value: f64, min: f64, max: f64, bins: usize) -> usize {
    if bins == 0 {
        return 0;
    }
    let width = (max - min) / bins as f64;
    if width <= 0.0 || !width.is_finite() {
        return 0;
    }
    let idx = ((value - min) / width).floor() as isize;
    idx.clamp(0, bins as isize - 1) as usize
}

/// Ranks with average-rank tie handling (1-based), as required for Spearman.
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        values[a]
            .partial_cmp(&values[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        // Tied values share the average of the ranks they span.
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg_rank;
        }
        i = j + 1;
    }
    ranks
}

/// Pearson correlation; 0 for zero-variance or undersized inputs.
pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return 0.0;
    }
    let mx = mean(&xs[..n]);
    let my = mean(&ys[..n]);
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for i in 0..n {
        let dx = xs[i] - mx;
        let dy = ys[i] - my;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return 0.0;
    }
    normalize(cov / (var_x.sqrt() * var_y.sqrt()))
}

/// Spearman rank correlation: Pearson over average-tie ranks.
pub fn spearman(pairs: &[(f64, f64)]) -> f64 {
    if pairs.len() < 2 {
        return 0.0;
    }
    let xs: Vec<f64> = pairs.iter().map(|(x, _)| *x).collect();
    let ys: Vec<f64> = pairs.iter().map(|(_, y)| *y).collect();
    pearson(&average_ranks(&xs), &average_ranks(&ys))
}

// ═══════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
        assert!(
            (actual - expected).abs() < epsilon,
            "expected {expected}, got {actual} (diff: {})",
            (actual - expected).abs()
        );
    }

    #[test]
    fn test_normalize_nan() {
        assert_eq!(normalize(f64::NAN), 0.0);
        assert_eq!(normalize(f64::INFINITY), 0.0);
        assert_eq!(normalize(1.5), 1.5);
    }

    #[test]
    fn test_mean_empty() {
        assert_eq!(mean(&[]), 0.0);
    }

    #[test]
    fn test_mean() {
        assert_approx(mean(&[1.0, 2.0, 3.0, 4.0]), 2.5, 1e-12);
    }

    #[test]
    fn test_std_dev() {
        assert_approx(std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]), 2.138, 0.001);
        assert_eq!(std_dev(&[5.0]), 0.0);
        assert_eq!(std_dev(&[]), 0.0);
    }

    #[test]
    fn test_median_odd_even() {
        assert_approx(median(&[3.0, 1.0, 2.0]), 2.0, 1e-12);
        assert_approx(median(&[4.0, 1.0, 2.0, 3.0]), 2.5, 1e-12);
    }

    #[test]
    fn test_quantile_bounds() {
        let values = [12.0, 34.0, 44.0, 99.0];
        assert_approx(quantile(0.0, &values), 12.0, 1e-12);
        assert_approx(quantile(1.0, &values), 99.0, 1e-12);
    }

    #[test]
    fn test_bin_edges_cover_range() {
        let edges = bin_edges(0.1, 0.9, 4);
        assert_eq!(edges.len(), 4);
        assert_approx(edges[0].0, 0.1, 1e-12);
        assert_approx(edges[0].1, 0.3, 1e-9);
        assert_approx(edges[3].1, 0.9, 1e-9);
    }

    #[test]
    fn test_bin_index_distribution_scenario() {
        // values {0.1, 0.2, 0.3, 0.9} into 4 bins over [0.1, 0.9]
        let mut counts = [0u64; 4];
        for v in [0.1, 0.2, 0.3, 0.9] {
            counts[bin_index(v, 0.1, 0.9, 4)] += 1;
        }
        assert_eq!(counts, [2, 1, 0, 1]);
    }

    #[test]
    fn test_bin_index_clamps_max_boundary() {
        assert_eq!(bin_index(0.9, 0.1, 0.9, 4), 3);
        assert_eq!(bin_index(1.5, 0.1, 0.9, 4), 3);
        assert_eq!(bin_index(-2.0, 0.1, 0.9, 4), 0);
    }

    #[test]
    fn test_bin_index_degenerate_range() {
        assert_eq!(bin_index(5.0, 5.0, 5.0, 4), 0);
    }

    #[test]
    fn test_average_ranks_no_ties() {
        assert_eq!(average_ranks(&[30.0, 10.0, 20.0]), vec![3.0, 1.0, 2.0]);
    }

    #[test]
    fn test_average_ranks_with_ties() {
        // 1.0 ties at ranks 1 and 2 -> 1.5 each
        assert_eq!(
            average_ranks(&[1.0, 2.0, 1.0, 3.0]),
            vec![1.5, 3.0, 1.5, 4.0]
        );
    }

    #[test]
    fn test_pearson_perfect_positive() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        let ys = [2.0, 4.0, 6.0, 8.0];
        assert_approx(pearson(&xs, &ys), 1.0, 1e-12);
    }

    #[test]
    fn test_pearson_perfect_negative() {
        let xs = [1.0, 2.0, 3.0];
        let ys = [3.0, 2.0, 1.0];
        assert_approx(pearson(&xs, &ys), -1.0, 1e-12);
    }

    #[test]
    fn test_pearson_zero_variance() {
        assert_eq!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn test_pearson_bounds() {
        let xs = [1.0, 5.0, 2.0, 8.0, 3.0];
        let ys = [2.0, 1.0, 9.0, 4.0, 7.0];
        let r = pearson(&xs, &ys);
        assert!((-1.0..=1.0).contains(&r));
    }

    #[test]
    fn test_spearman_monotonic_is_one() {
        // monotonic but non-linear: Spearman 1, Pearson < 1
        let pairs = [(1.0, 1.0), (2.0, 4.0), (3.0, 9.0), (4.0, 100.0)];
        assert_approx(spearman(&pairs), 1.0, 1e-12);
        assert!(pearson(&[1.0, 2.0, 3.0, 4.0], &[1.0, 4.0, 9.0, 100.0]) < 1.0);
    }

    #[test]
    fn test_spearman_with_ties_bounded() {
        let pairs = [(1.0, 2.0), (1.0, 3.0), (2.0, 2.0), (3.0, 1.0)];
        let rho = spearman(&pairs);
        assert!((-1.0..=1.0).contains(&rho));
    }

    #[test]
    fn test_spearman_zero_variance() {
        assert_eq!(spearman(&[(1.0, 5.0), (2.0, 5.0), (3.0, 5.0)]), 0.0);
    }

    #[test]
    fn test_spearman_empty() {
        assert_eq!(spearman(&[]), 0.0);
    }
}
