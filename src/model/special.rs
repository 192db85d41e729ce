//! Polygamma functions for empirical Bayes variance moderation.
//!
//! `statrs` supplies digamma; trigamma, tetragamma and the inverse of
//! trigamma are computed here by upward recurrence into the asymptotic
//! region followed by the Bernoulli series.
//!
//! # References
//!
//! - Abramowitz & Stegun 6.4.11–6.4.12 (polygamma asymptotic expansions)
//! - Smyth (2004) appendix (Newton iteration for the trigamma inverse)

/// Below this argument the recurrence is applied before the series.
const ASYMPTOTIC_FROM: f64 = 10.0;

/// Trigamma ψ₁(x), the second derivative of ln Γ(x), for `x > 0`.
///
/// Returns NaN for non-positive or non-finite `x`.
#[must_use]
pub fn trigamma(x: f64) -> f64 {
    if !(x > 0.0) || !x.is_finite() {
        return f64::NAN;
    }
    let mut x = x;
    let mut acc = 0.0;
    while x < ASYMPTOTIC_FROM {
        acc += 1.0 / (x * x);
        x += 1.0;
    }
    let inv = 1.0 / x;
    let inv2 = inv * inv;
    // 1/x + 1/2x² + 1/6x³ - 1/30x⁵ + 1/42x⁷ - 1/30x⁹ + 5/66x¹¹
    let series = inv
        + 0.5 * inv2
        + inv * inv2
            * (1.0 / 6.0
                + inv2 * (-1.0 / 30.0 + inv2 * (1.0 / 42.0 + inv2 * (-1.0 / 30.0 + inv2 * 5.0 / 66.0))));
    acc + series
}

/// Tetragamma ψ₂(x), the third derivative of ln Γ(x), for `x > 0`.
///
/// Returns NaN for non-positive or non-finite `x`.
#[must_use]
pub fn tetragamma(x: f64) -> f64 {
    if !(x > 0.0) || !x.is_finite() {
        return f64::NAN;
    }
    let mut x = x;
    let mut acc = 0.0;
    while x < ASYMPTOTIC_FROM {
        acc -= 2.0 / (x * x * x);
        x += 1.0;
    }
    let inv = 1.0 / x;
    let inv2 = inv * inv;
    // -1/x² - 1/x³ - 1/2x⁴ + 1/6x⁶ - 1/6x⁸ + 3/10x¹⁰ - 5/6x¹²
    let series = -inv2
        - inv * inv2
        + inv2 * inv2
            * (-0.5 + inv2 * (1.0 / 6.0 + inv2 * (-1.0 / 6.0 + inv2 * (0.3 - inv2 * 5.0 / 6.0))));
    acc + series
}

/// Solve ψ₁(y) = x for `y` by Newton iteration.
///
/// Returns NaN for non-positive or non-finite `x`.
#[must_use]
pub fn trigamma_inverse(x: f64) -> f64 {
    if !(x > 0.0) || !x.is_finite() {
        return f64::NAN;
    }
    if x > 1e7 {
        return 1.0 / x.sqrt();
    }
    if x < 1e-6 {
        return 1.0 / x;
    }
    let mut y = 0.5 + 1.0 / x;
    for _ in 0..50 {
        let tri = trigamma(y);
        let dif = tri * (1.0 - tri / x) / tetragamma(y);
        y += dif;
        if -dif / y < 1e-8 {
            break;
        }
    }
    y
}
