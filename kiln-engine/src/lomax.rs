//! Online weighted fit of a two-parameter Lomax (Pareto-II) distribution.
//!
//! The annealing selector models the magnitude of per-step utility deltas
//! with a Lomax distribution, refitted from exponentially weighted raw
//! moments after every batch. `best(p)` integrates the inverse CDF over the
//! top-`p` quantile and anchors the aggregate score: it is the mean
//! contribution the best `p` fraction of candidates would make under the
//! current fit.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::lock;

#[derive(Debug)]
struct Moments {
    alpha: f64,
    m1: f64,
    m2: f64,
}

/// Concurrent Lomax estimator.
///
/// Moment updates run under one mutex; the fitted parameters are published
/// atomically so that `best`, `pdf` and `cdf` never block a batch worker.
#[derive(Debug)]
pub struct LomaxDist {
    moments: Mutex<Moments>,
    beta_bits: AtomicU64,
    sigma_bits: AtomicU64,
}

impl LomaxDist {
    pub fn new() -> Self {
        Self {
            moments: Mutex::new(Moments {
                alpha: 1.0,
                m1: 0.0,
                m2: 0.0,
            }),
            beta_bits: AtomicU64::new(1.0f64.to_bits()),
            sigma_bits: AtomicU64::new(1.0f64.to_bits()),
        }
    }

    /// Set the half-life of the exponential moment window. All subsequent
    /// `add_point` calls weight samples by `ln 2 / half_life`.
    pub fn set_half_life(&self, half_life: f64) {
        lock(&self.moments).alpha = std::f64::consts::LN_2 / half_life;
    }

    /// Seed the raw moments directly, e.g. from per-candidate statistics
    /// computed ahead of the run.
    pub fn set_moments(&self, m1: f64, m2: f64) {
        let mut moments = lock(&self.moments);
        moments.m1 = m1;
        moments.m2 = m2;
    }

    /// Current raw moments `(m1, m2)`.
    pub fn moments(&self) -> (f64, f64) {
        let moments = lock(&self.moments);
        (moments.m1, moments.m2)
    }

    /// Fold one weighted sample into the moment window.
    pub fn add_point(&self, val: f64, weight: f64) {
        let mut moments = lock(&self.moments);
        fold(&mut moments, val, weight);
    }

    /// Fold a whole batch of `(value, weight)` samples under a single lock
    /// acquisition.
    pub fn add_points(&self, samples: &[(f64, f64)]) {
        let mut moments = lock(&self.moments);
        for &(val, weight) in samples {
            fold(&mut moments, val, weight);
        }
    }

    /// Refit `(beta, sigma)` from the current moments.
    ///
    /// The fit is undefined when `m2 <= 2 * m1^2`; callers must seed the
    /// moments with enough variance before relying on the parameters.
    pub fn update_params(&self) {
        let moments = lock(&self.moments);
        let t = moments.m2 / (moments.m2 - 2.0 * moments.m1 * moments.m1);
        self.sigma_bits
            .store((moments.m1 * t).to_bits(), Ordering::Release);
        self.beta_bits.store((t + 1.0).to_bits(), Ordering::Release);
    }

    /// Last published `(beta, sigma)` pair.
    pub fn params(&self) -> (f64, f64) {
        (
            f64::from_bits(self.beta_bits.load(Ordering::Acquire)),
            f64::from_bits(self.sigma_bits.load(Ordering::Acquire)),
        )
    }

    pub fn mean(&self) -> f64 {
        lock(&self.moments).m1
    }

    pub fn var(&self) -> f64 {
        let moments = lock(&self.moments);
        moments.m2 - moments.m1 * moments.m1
    }

    pub fn pdf(&self, x: f64) -> f64 {
        let (beta, sigma) = self.params();
        beta / sigma * (1.0 + x / sigma).powf(-(beta + 1.0))
    }

    pub fn cdf(&self, x: f64) -> f64 {
        let (beta, sigma) = self.params();
        1.0 - (1.0 + x / sigma).powf(-beta)
    }

    /// Integral of the inverse CDF from `1 - p` to `1`: the summed
    /// contribution of the best `p` fraction of entries under the fit.
    pub fn best(&self, p: f64) -> f64 {
        let (beta, sigma) = self.params();
        let t = 1.0 - 1.0 / beta;
        sigma * (p.powf(t) / t - p)
    }
}

impl Default for LomaxDist {
    fn default() -> Self {
        Self::new()
    }
}

fn fold(moments: &mut Moments, val: f64, weight: f64) {
    let w = weight * moments.alpha;
    moments.m1 += (val - moments.m1) * w;
    moments.m2 += (val * val - moments.m2) * w;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    /// Reference closed-form method-of-moments solution for Lomax:
    /// `t = m2 / (m2 - 2 m1^2)`, `sigma = m1 t`, `beta = t + 1`.
    fn reference_fit(m1: f64, m2: f64) -> (f64, f64) {
        let t = m2 / (m2 - 2.0 * m1 * m1);
        (t + 1.0, m1 * t)
    }

    /// Exact raw moments of Lomax(beta, sigma), valid for beta > 2.
    fn lomax_moments(beta: f64, sigma: f64) -> (f64, f64) {
        let m1 = sigma / (beta - 1.0);
        let m2 = 2.0 * sigma * sigma / ((beta - 1.0) * (beta - 2.0));
        (m1, m2)
    }

    #[test]
    fn moments_round_trip() {
        let dist = LomaxDist::new();
        let (m1, m2) = lomax_moments(2.5, 4.0);
        dist.set_moments(m1, m2);
        dist.update_params();
        let (beta, sigma) = dist.params();
        let (ref_beta, ref_sigma) = reference_fit(m1, m2);
        assert!((beta - ref_beta).abs() / ref_beta < 1e-9);
        assert!((sigma - ref_sigma).abs() / ref_sigma < 1e-9);
        // And the reference itself must recover the generating parameters.
        assert!((beta - 2.5).abs() < 1e-9);
        assert!((sigma - 4.0).abs() < 1e-9);
    }

    #[test]
    fn half_life_weighting() {
        let dist = LomaxDist::new();
        dist.set_half_life(std::f64::consts::LN_2); // alpha = 1
        dist.add_point(10.0, 0.5);
        // m1 moved halfway from 0 to 10, m2 halfway from 0 to 100.
        let (m1, m2) = dist.moments();
        assert!((m1 - 5.0).abs() < 1e-12);
        assert!((m2 - 50.0).abs() < 1e-12);
    }

    #[test]
    fn converges_to_stationary_input() {
        // Alternate two point masses whose average moments match
        // Lomax(2.5, 4.0) exactly; the exponential window converges to
        // those moments, and the fit must recover the parameters.
        let (m1, m2) = lomax_moments(2.5, 4.0);
        let spread = (m2 - m1 * m1).sqrt();
        let (lo, hi) = (m1 - spread, m1 + spread);
        let dist = LomaxDist::new();
        dist.set_half_life(200.0);
        for _ in 0..20_000 {
            dist.add_point(lo, 0.5);
            dist.add_point(hi, 0.5);
        }
        dist.update_params();
        let (beta, sigma) = dist.params();
        assert!((beta - 2.5).abs() < 0.02, "beta = {beta}");
        assert!((sigma - 4.0).abs() < 0.05, "sigma = {sigma}");
    }

    #[test]
    fn fits_sampled_lomax() {
        // Inverse-CDF sampling of Lomax(2.5, 4.0); weights are chosen so
        // that the window reduces to the plain running mean, making the
        // moments the exact sample moments.
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let dist = LomaxDist::new();
        dist.set_half_life(std::f64::consts::LN_2); // alpha = 1
        for i in 0..500_000u64 {
            let u: f64 = rng.random();
            let x = 4.0 * ((1.0 - u).powf(-1.0 / 2.5) - 1.0);
            dist.add_point(x, 1.0 / (i + 1) as f64);
        }
        dist.update_params();
        let (beta, sigma) = dist.params();
        assert!((beta - 2.5).abs() / 2.5 < 0.05, "beta = {beta}");
        assert!((sigma - 4.0).abs() / 4.0 < 0.05, "sigma = {sigma}");
    }

    #[test]
    fn cdf_and_best_match_fit() {
        let dist = LomaxDist::new();
        let (m1, m2) = lomax_moments(3.0, 2.0);
        dist.set_moments(m1, m2);
        dist.update_params();
        assert!(dist.cdf(0.0).abs() < 1e-12);
        assert!((dist.cdf(1e9) - 1.0).abs() < 1e-6);
        // best(1) integrates the whole inverse CDF, i.e. the mean.
        assert!((dist.best(1.0) - m1).abs() < 1e-9);
        // best is monotone in p and best(p) >= p * mean.
        assert!(dist.best(0.5) > dist.best(0.1));
        assert!(dist.best(0.1) > 0.1 * m1);
    }
}
