/// Picks the subscriber minimizing `sent_count / weight`, ties broken by
/// any subscriber with `sent_count == 0`.
/// Subscribers with weight 0 never receive traffic and are skipped.
pub fn pick_weighted(weights: &[u32], sent_counts: &[u64]) -> Option<usize> {
    debug_assert_eq!(weights.len(), sent_counts.len());
    if let Some(idx) = weights
        .iter()
        .zip(sent_counts.iter())
        .position(|(w, s)| *w > 0 && *s == 0)
    {
        return Some(idx);
    }
    weights
        .iter()
        .zip(sent_counts.iter())
        .enumerate()
        .filter(|(_, (w, _))| **w > 0)
        .min_by(|(_, (wa, sa)), (_, (wb, sb))| {
            let ratio_a = **sa as f64 / **wa as f64;
            let ratio_b = **sb as f64 / **wb as f64;
            ratio_a.partial_cmp(&ratio_b).unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(i, _)| i)
}

/// Re-normalizes raw weights (0-100 each) so they sum to exactly 100,
/// proportionally, with the last subscriber absorbing any rounding
/// remainder.
pub fn renormalize_weights(raw: &[u32]) -> Vec<u32> {
    let total: u64 = raw.iter().map(|w| *w as u64).sum();
    if total == 0 {
        return vec![0; raw.len()];
    }
    let mut out: Vec<u32> = raw.iter().map(|w| (*w as u64 * 100 / total) as u32).collect();
    let assigned: u32 = out.iter().sum();
    if let Some(last) = out.last_mut() {
        *last += 100u32.saturating_sub(assigned);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_distribution_converges_for_mixed_weights() {
        let weights = vec![20u32, 30, 50];
        let mut sent = vec![0u64; 3];
        for _ in 0..1000 {
            let idx = pick_weighted(&weights, &sent).unwrap();
            sent[idx] += 1;
        }
        assert!((sent[0] as i64 - 200).abs() <= 1);
        assert!((sent[1] as i64 - 300).abs() <= 1);
        assert!((sent[2] as i64 - 500).abs() <= 1);
    }

    #[test]
    fn zero_weight_subscribers_never_selected() {
        let weights = vec![0u32, 100];
        let mut sent = vec![0u64; 2];
        for _ in 0..50 {
            let idx = pick_weighted(&weights, &sent).unwrap();
            sent[idx] += 1;
        }
        assert_eq!(sent[0], 0);
        assert_eq!(sent[1], 50);
    }

    #[test]
    fn renormalize_sums_to_100_with_remainder_on_last() {
        let normalized = renormalize_weights(&[1, 1, 1]);
        assert_eq!(normalized.iter().sum::<u32>(), 100);
        assert_eq!(normalized[0], 33);
        assert_eq!(normalized[1], 33);
        assert_eq!(normalized[2], 34);
    }

    #[test]
    fn renormalize_all_zero_stays_zero() {
        assert_eq!(renormalize_weights(&[0, 0]), vec![0, 0]);
    }
}
