pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn min(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}

pub fn max(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

/// Population standard deviation (divides by `n`, not `n - 1`).
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let avg = mean(values)?;

    let variance = values.iter().map(|value| (value - avg).powi(2)).sum::<f64>()
        / values.len() as f64;

    Some(variance.sqrt())
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
