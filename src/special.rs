//! Distribution functions used by the hypothesis tests.
//!
//! Thin wrappers over [`statrs`] distributions. Tail probabilities are taken
//! from the survival function directly rather than as `1 - cdf`, which keeps
//! small p-values accurate.
//!
//! Functions return `None` when the distribution parameters are invalid
//! (non-positive degrees of freedom, non-finite inputs).

use statrs::distribution::{ChiSquared, ContinuousCDF, FisherSnedecor, Normal, StudentsT};

/// Standard normal CDF Φ(z).
pub fn standard_normal_cdf(z: f64) -> f64 {
    Normal::standard().cdf(z)
}

/// Standard normal upper tail 1 − Φ(z).
pub fn standard_normal_sf(z: f64) -> f64 {
    Normal::standard().sf(z)
}

/// Standard normal quantile Φ⁻¹(p) for p in (0, 1).
pub fn inverse_normal_cdf(p: f64) -> f64 {
    Normal::standard().inverse_cdf(p)
}

/// Two-tailed p-value of a t statistic: 2 · P(T > |t|).
pub fn t_two_tailed(t: f64, df: f64) -> Option<f64> {
    if !t.is_finite() {
        return None;
    }
    let dist = StudentsT::new(0.0, 1.0, df).ok()?;
    Some((2.0 * dist.sf(t.abs())).clamp(0.0, 1.0))
}

/// Upper tail of the F distribution: P(F > f).
pub fn f_upper_tail(f: f64, df1: f64, df2: f64) -> Option<f64> {
    if f.is_nan() {
        return None;
    }
    if f.is_infinite() {
        return Some(0.0);
    }
    let dist = FisherSnedecor::new(df1, df2).ok()?;
    Some(dist.sf(f.max(0.0)).clamp(0.0, 1.0))
}

/// Upper tail of the chi-squared distribution: P(χ² > x).
pub fn chi_squared_upper_tail(x: f64, df: f64) -> Option<f64> {
    if x.is_nan() {
        return None;
    }
    let dist = ChiSquared::new(df).ok()?;
    Some(dist.sf(x.max(0.0)).clamp(0.0, 1.0))
}

/// Natural logarithm of the gamma function.
pub fn ln_gamma(x: f64) -> f64 {
    statrs::function::gamma::ln_gamma(x)
}

/// ln(n!) via ln Γ(n + 1).
pub fn ln_factorial(n: u64) -> f64 {
    if n <= 1 {
        return 0.0;
    }
    ln_gamma(n as f64 + 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_reference_values() {
        assert!((standard_normal_cdf(0.0) - 0.5).abs() < 1e-12);
        assert!((standard_normal_cdf(1.959964) - 0.975).abs() < 1e-6);
        assert!((standard_normal_sf(1.959964) - 0.025).abs() < 1e-6);
        assert!((inverse_normal_cdf(0.975) - 1.959964).abs() < 1e-5);
    }

    #[test]
    fn t_two_tailed_reference() {
        // t = 2.228, df = 10 is the 97.5% quantile
        let p = t_two_tailed(2.228139, 10.0).expect("valid df");
        assert!((p - 0.05).abs() < 1e-4, "p = {p}");
        assert!(t_two_tailed(1.0, 0.0).is_none());
        assert!(t_two_tailed(f64::NAN, 5.0).is_none());
    }

    #[test]
    fn f_and_chi_squared_reference() {
        // F(2, 12) critical value at 5%: 3.885
        let p = f_upper_tail(3.885294, 2.0, 12.0).expect("valid df");
        assert!((p - 0.05).abs() < 1e-4, "p = {p}");
        assert_eq!(f_upper_tail(f64::INFINITY, 2.0, 12.0), Some(0.0));

        // χ²(1) critical value at 5%: 3.841
        let p = chi_squared_upper_tail(3.841459, 1.0).expect("valid df");
        assert!((p - 0.05).abs() < 1e-4, "p = {p}");
        assert!(chi_squared_upper_tail(1.0, 0.0).is_none());
    }

    #[test]
    fn ln_factorial_small() {
        assert_eq!(ln_factorial(0), 0.0);
        assert_eq!(ln_factorial(1), 0.0);
        assert!((ln_factorial(5) - 120.0_f64.ln()).abs() < 1e-10);
    }
}
