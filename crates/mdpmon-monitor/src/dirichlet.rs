//! Dirichlet belief over the destination of one uncertain action.
//!
//! The distribution lives on the probability simplex over the model's
//! states (dimension `k` = number of states). Observing a transition into
//! destination `d` is the conjugate multinomial update `alpha[d] += 1`.
//!
//! The HPD region is computed per coordinate: the marginal of coordinate
//! `i` is `Beta(alpha_i, Σalpha - alpha_i)`, and its HPD interval at level
//! `p` is the shortest interval `[Q(t), Q(t + p)]` over the lower tail mass
//! `t ∈ [0, 1 - p]`. For a unimodal marginal that interval has equal
//! density at both ends, so `t` is the root of
//! `ln f(Q(t)) - ln f(Q(t + p))`, found by Illinois regula falsi over the
//! Newton-based quantile `inv_beta_reg`. Monotone marginals put the
//! interval against a boundary. Coordinates sharing a concentration value
//! share a marginal and are solved once.
//!
//! The *distance* of a posterior is the widest of these intervals; it
//! shrinks toward zero as samples accumulate.

use statrs::function::beta::inv_beta_reg;
use statrs::function::gamma::ln_gamma;

/// Bracket width on the tail mass at which the HPD search stops.
const TAIL_TOL: f64 = 1e-13;

/// Log-density gap treated as equal densities.
const GAP_TOL: f64 = 1e-12;

const MAX_ITERS: usize = 100;

/// Dirichlet distribution tagged with the action it describes.
#[derive(Debug, Clone, PartialEq)]
pub struct Dirichlet {
    action: String,
    alpha: Vec<f64>,
    /// Observations since the last convergence check.
    count: u64,
    /// Observations since construction.
    sample_size: u64,
    hpd_level: f64,
    /// Cached max HPD interval width at `hpd_level`.
    distance: f64,
}

impl Dirichlet {
    /// Build from concentration parameters. Every `alpha_i` must be
    /// positive; the model validates this for priors it hands out.
    pub fn new(action: impl Into<String>, alpha: Vec<f64>, hpd_level: f64) -> Self {
        debug_assert!(alpha.iter().all(|&a| a > 0.0));
        let mut d = Self {
            action: action.into(),
            alpha,
            count: 0,
            sample_size: 0,
            hpd_level,
            distance: 0.0,
        };
        d.refresh_distance();
        d
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn alpha(&self) -> &[f64] {
        &self.alpha
    }

    pub fn dimension(&self) -> usize {
        self.alpha.len()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sample_size(&self) -> u64 {
        self.sample_size
    }

    pub fn hpd_level(&self) -> f64 {
        self.hpd_level
    }

    /// Zero the convergence-check counter. `sample_size` is untouched.
    pub fn reset_count(&mut self) {
        self.count = 0;
    }

    /// Overwrite one concentration parameter. Out-of-range indices and
    /// non-positive values are ignored.
    pub fn set(&mut self, index: usize, alpha: f64) {
        if alpha > 0.0 && alpha.is_finite() {
            if let Some(a) = self.alpha.get_mut(index) {
                *a = alpha;
                self.refresh_distance();
            }
        }
    }

    /// Record one observed transition into `dst`. Returns `false` (and
    /// changes nothing) when `dst` is outside the simplex.
    pub fn update(&mut self, dst: usize) -> bool {
        match self.alpha.get_mut(dst) {
            Some(a) => {
                *a += 1.0;
                self.count += 1;
                self.sample_size += 1;
                self.refresh_distance();
                true
            }
            None => false,
        }
    }

    fn total(&self) -> f64 {
        self.alpha.iter().sum()
    }

    /// Posterior mean `alpha_i / Σalpha`.
    pub fn mean(&self) -> Vec<f64> {
        let total = self.total();
        self.alpha.iter().map(|a| a / total).collect()
    }

    /// Posterior mode `(alpha_i - 1) / (Σalpha - k)`, defined only when
    /// every `alpha_i > 1`.
    pub fn mode(&self) -> Option<Vec<f64>> {
        if self.alpha.iter().any(|&a| a <= 1.0) {
            return None;
        }
        let denom = self.total() - self.dimension() as f64;
        Some(self.alpha.iter().map(|a| (a - 1.0) / denom).collect())
    }

    /// Per-coordinate HPD intervals holding mass `p`.
    pub fn hpd_region(&self, p: f64) -> Vec<(f64, f64)> {
        let total = self.total();
        let mut solved: Vec<(f64, (f64, f64))> = Vec::new();
        self.alpha
            .iter()
            .map(|&a| {
                if let Some(&(_, interval)) = solved.iter().find(|(x, _)| *x == a) {
                    return interval;
                }
                let interval = shortest_interval(a, total - a, p);
                solved.push((a, interval));
                interval
            })
            .collect()
    }

    /// Widest HPD interval at the configured level.
    pub fn distance(&self) -> f64 {
        self.distance
    }

    /// Whether the distance has dropped below `tolerance`.
    pub fn converged(&self, tolerance: f64) -> bool {
        self.distance < tolerance
    }

    /// Log density at `x`. Points outside the open simplex (wrong length,
    /// a non-positive coordinate, or coordinates not summing to one) get
    /// negative infinity.
    pub fn log_pdf(&self, x: &[f64]) -> f64 {
        if x.len() != self.alpha.len()
            || x.iter().any(|&v| v <= 0.0)
            || (x.iter().sum::<f64>() - 1.0).abs() > 1e-9
        {
            return f64::NEG_INFINITY;
        }
        let norm = ln_gamma(self.total()) - self.alpha.iter().map(|&a| ln_gamma(a)).sum::<f64>();
        norm + self
            .alpha
            .iter()
            .zip(x)
            .map(|(a, v)| (a - 1.0) * v.ln())
            .sum::<f64>()
    }

    fn refresh_distance(&mut self) {
        self.distance = self
            .hpd_region(self.hpd_level)
            .iter()
            .map(|(lo, hi)| hi - lo)
            .fold(0.0, f64::max);
    }
}

/// Shortest interval of `Beta(a, b)` holding mass `p`.
fn shortest_interval(a: f64, b: f64, p: f64) -> (f64, f64) {
    // One-state simplex: the coordinate is 1 with certainty.
    if b <= 0.0 {
        return (1.0, 1.0);
    }
    if p >= 1.0 || !(a > 0.0 && a.is_finite() && b.is_finite()) {
        return (0.0, 1.0);
    }
    let q = |mass: f64| inv_beta_reg(a, b, mass.clamp(0.0, 1.0));
    if p <= 0.0 {
        let m = q(0.5);
        return (m, m);
    }

    let t = match (a > 1.0, b > 1.0) {
        (true, true) => equal_density_tail(a, b, p, &q),
        // Non-increasing density.
        (false, true) => 0.0,
        // Non-decreasing density.
        (true, false) => 1.0 - p,
        // U-shaped or flat: width is concave in `t`, so an end wins.
        (false, false) => {
            if q(p) <= 1.0 - q(1.0 - p) {
                0.0
            } else {
                1.0 - p
            }
        }
    };
    (q(t), q(t + p))
}

/// Lower tail mass `t` at which `Beta(a, b)`, with `a, b > 1`, has the
/// same density at `Q(t)` and `Q(t + p)`.
///
/// The log-density gap is `-inf` at `t = 0` and `+inf` at `t = 1 - p` and
/// crosses zero once. Bisection runs while an end of the bracket is still
/// infinite; after that the Illinois step takes over.
fn equal_density_tail(a: f64, b: f64, p: f64, q: &impl Fn(f64) -> f64) -> f64 {
    let ln_density = |x: f64| (a - 1.0) * x.ln() + (b - 1.0) * (1.0 - x).ln();
    let gap = |t: f64| ln_density(q(t)) - ln_density(q(t + p));

    let (mut t0, mut t1) = (0.0, 1.0 - p);
    let (mut g0, mut g1) = (f64::NEG_INFINITY, f64::INFINITY);
    // Which end was replaced last: -1 lower, 1 upper.
    let mut last = 0i8;
    for _ in 0..MAX_ITERS {
        let t = if g0.is_finite() && g1.is_finite() {
            (t0 * g1 - t1 * g0) / (g1 - g0)
        } else {
            0.5 * (t0 + t1)
        };
        let g = gap(t);
        if g.is_nan() || g.abs() < GAP_TOL {
            return t;
        }
        if g < 0.0 {
            t0 = t;
            g0 = g;
            if last < 0 {
                g1 /= 2.0;
            }
            last = -1;
        } else {
            t1 = t;
            g1 = g;
            if last > 0 {
                g0 /= 2.0;
            }
            last = 1;
        }
        if t1 - t0 < TAIL_TOL {
            break;
        }
    }
    0.5 * (t0 + t1)
}
