//! Quality-control profiling. Read-only: nothing here modifies or excludes samples.

mod cv;
mod total_intensity;

pub use cv::{profile_cv, CvProfile, FeatureCv, SampleSelection};
pub use total_intensity::{profile_total_intensity, TotalIntensityProfile};

/// Median of finite values; NaN for none.
pub(crate) fn median(values: &[f64]) -> f64 {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return f64::NAN;
    }
    finite.sort_by(|a, b| a.total_cmp(b));
    let n = finite.len();
    if n % 2 == 0 {
        (finite[n / 2 - 1] + finite[n / 2]) / 2.0
    } else {
        finite[n / 2]
    }
}

/// Mean and sample standard deviation of finite values.
///
/// Returns `(mean, sd, n)`; `sd` is NaN when fewer than two values are finite.
pub(crate) fn mean_sd(values: &[f64]) -> (f64, f64, usize) {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let n = finite.len();
    if n == 0 {
        return (f64::NAN, f64::NAN, 0);
    }
    let mean = finite.iter().sum::<f64>() / n as f64;
    if n < 2 {
        return (mean, f64::NAN, n);
    }
    let var = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    (mean, var.sqrt(), n)
}
