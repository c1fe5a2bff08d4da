//! Ranker weight normalization.

/// Clamps negatives to 0 and rescales to sum 1. A non-positive sum falls back
/// to `defaults` unchanged.
pub fn normalize_weights(weights: &[f32], defaults: &[f32]) -> Vec<f32> {
    let safe: Vec<f32> = weights.iter().map(|w| w.max(0.0)).collect();
    let total: f32 = safe.iter().sum();
    if total <= 0.0 {
        return defaults.to_vec();
    }
    if (total - 1.0).abs() > 1e-6 {
        tracing::debug!(total, "ranker weights auto-normalized");
    }
    safe.iter().map(|w| w / total).collect()
}
