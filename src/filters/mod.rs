pub mod savgol;

pub use savgol::savgol_filter;

/// Centered rolling mean that accepts partial windows.
///
/// The window for sample `i` spans `i - window / 2` to `i + (window - 1) / 2`, clipped to the
/// series. Non-finite values are skipped; a window without any finite value yields `NaN`.
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let n = values.len();

    (0..n)
        .map(|i| {
            let start = i.saturating_sub(window / 2);
            let end = (i + (window - 1) / 2).min(n.saturating_sub(1));

            let (sum, count) = values[start..=end]
                .iter()
                .filter(|v| v.is_finite())
                .fold((0_f64, 0_usize), |(s, c), v| (s + v, c + 1));

            match count {
                0 => f64::NAN,
                _ => sum / count as f64,
            }
        })
        .collect()
}
