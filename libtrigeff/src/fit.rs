//! Sigmoid turn-on fits.
//!
//! The model is `p2 / (1 + exp(-p0 (x - p1)))`. It is fit to the points of an efficiency graph
//! by minimizing a chi-square with L-BFGS. Each residual is weighted by the asymmetric error on
//! the side of the curve. Internally the parameters are expressed in the coordinate
//! `t = (x - low) / (high - low)` of the fit range so that all three are of order one.
use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use serde::{Deserialize, Serialize};

use super::efficiency::EfficiencyGraph;
use super::error::FitError;

/// Free parameters of the sigmoid: midpoint, slope and plateau
const N_PARAMS: usize = 3;
/// Minimum number of points with errors needed to attempt a fit
pub const MIN_FIT_POINTS: usize = N_PARAMS;

const MAX_ITERS: u64 = 500;
const LBFGS_MEMORY: usize = 7;
const TOLERANCE_GRAD: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SigmoidParams {
    pub slope: f64,
    pub midpoint: f64,
    pub plateau: f64,
}

impl SigmoidParams {
    pub const DATA_START: Self = Self {
        slope: 0.03,
        midpoint: 180.0,
        plateau: 0.98,
    };
    pub const MC_START: Self = Self {
        slope: 0.05,
        midpoint: 190.0,
        plateau: 0.98,
    };

    pub fn eval(&self, x: f64) -> f64 {
        self.plateau * logistic(self.slope * (x - self.midpoint))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitRange {
    pub low: f64,
    pub high: f64,
}

impl FitRange {
    pub fn contains(&self, x: f64) -> bool {
        x >= self.low && x <= self.high
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitResult {
    pub params: SigmoidParams,
    pub range: FitRange,
    pub chi2: f64,
    pub ndf: usize,
    pub converged: bool,
}

/// Overflow-free 1 / (1 + exp(-z))
fn logistic(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

struct FitPoint {
    t: f64,
    y: f64,
    err_low: f64,
    err_high: f64,
}

impl FitPoint {
    fn error_towards(&self, model: f64) -> f64 {
        let (primary, other) = if model > self.y {
            (self.err_high, self.err_low)
        } else {
            (self.err_low, self.err_high)
        };
        if primary > 0.0 {
            primary
        } else {
            other
        }
    }
}

/// Chi-square of the sigmoid in range coordinates `[u0, u1, u2]`
struct SigmoidChi2 {
    points: Vec<FitPoint>,
}

impl SigmoidChi2 {
    fn model(u: &[f64], t: f64) -> (f64, f64) {
        let s = logistic(u[0] * (t - u[1]));
        (u[2] * s, s)
    }
}

impl CostFunction for SigmoidChi2 {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, u: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        Ok(self
            .points
            .iter()
            .map(|p| {
                let (f, _) = Self::model(u, p.t);
                ((p.y - f) / p.error_towards(f)).powi(2)
            })
            .sum())
    }
}

impl Gradient for SigmoidChi2 {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, u: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        let mut grad = vec![0.0; 3];
        for p in self.points.iter() {
            let (f, s) = Self::model(u, p.t);
            let sigma = p.error_towards(f);
            let pull = -2.0 * (p.y - f) / (sigma * sigma);
            let ds = s * (1.0 - s);
            grad[0] += pull * u[2] * ds * (p.t - u[1]);
            grad[1] += pull * (-u[2] * ds * u[0]);
            grad[2] += pull * s;
        }
        Ok(grad)
    }
}

fn to_range_coords(params: &SigmoidParams, range: &FitRange) -> Vec<f64> {
    let width = range.high - range.low;
    vec![
        params.slope * width,
        (params.midpoint - range.low) / width,
        params.plateau,
    ]
}

fn from_range_coords(u: &[f64], range: &FitRange) -> SigmoidParams {
    let width = range.high - range.low;
    SigmoidParams {
        slope: u[0] / width,
        midpoint: range.low + u[1] * width,
        plateau: u[2],
    }
}

/// Fit the sigmoid to the graph points whose x lies in `range`
pub fn fit_sigmoid(
    graph: &EfficiencyGraph,
    range: FitRange,
    start: SigmoidParams,
) -> Result<FitResult, FitError> {
    if !(range.low < range.high) {
        return Err(FitError::BadRange {
            low: range.low,
            high: range.high,
        });
    }
    let width = range.high - range.low;
    let points: Vec<FitPoint> = graph
        .points
        .iter()
        .filter(|p| range.contains(p.x) && (p.ey_low > 0.0 || p.ey_high > 0.0))
        .map(|p| FitPoint {
            t: (p.x - range.low) / width,
            y: p.y,
            err_low: p.ey_low,
            err_high: p.ey_high,
        })
        .collect();
    if points.len() < MIN_FIT_POINTS {
        return Err(FitError::NotEnoughPoints(points.len()));
    }
    let ndf = points.len() - N_PARAMS;

    let problem = SigmoidChi2 { points };
    let linesearch = MoreThuenteLineSearch::new();
    let solver = LBFGS::new(linesearch, LBFGS_MEMORY)
        .with_tolerance_grad(TOLERANCE_GRAD)
        .map_err(|e| FitError::Solver(e.to_string()))?;

    let res = Executor::new(problem, solver)
        .configure(|state| state.param(to_range_coords(&start, &range)).max_iters(MAX_ITERS))
        .run()
        .map_err(|e| FitError::Solver(e.to_string()))?;

    let state = res.state();
    let best = state
        .get_best_param()
        .ok_or_else(|| FitError::Solver(String::from("no best parameters found")))?;
    let converged = matches!(
        state.get_termination_status(),
        TerminationStatus::Terminated(TerminationReason::SolverConverged)
    );
    if !converged {
        log::warn!(
            "Sigmoid fit did not converge: {}",
            state.get_termination_status()
        );
    }

    Ok(FitResult {
        params: from_range_coords(best, &range),
        range,
        chi2: state.get_best_cost(),
        ndf,
        converged,
    })
}

/// Data fit over MC fit, zero where the MC fit vanishes
pub fn ratio_curve(data: &SigmoidParams, mc: &SigmoidParams, x: f64) -> f64 {
    let denom = mc.eval(x);
    if denom == 0.0 {
        0.0
    } else {
        data.eval(x) / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::efficiency::GraphPoint;
    use approx::assert_abs_diff_eq;

    fn sampled(truth: &SigmoidParams) -> EfficiencyGraph {
        let points = (1..40)
            .map(|i| {
                let x = 10.0 * i as f64;
                GraphPoint {
                    x,
                    ex_low: 5.0,
                    ex_high: 5.0,
                    y: truth.eval(x),
                    ey_low: 0.01,
                    ey_high: 0.01,
                }
            })
            .collect();
        EfficiencyGraph { points }
    }

    #[test]
    fn test_recovers_sigmoid() {
        let truth = SigmoidParams {
            slope: 0.04,
            midpoint: 160.0,
            plateau: 0.95,
        };
        let result = fit_sigmoid(
            &sampled(&truth),
            FitRange { low: 0.0, high: 400.0 },
            SigmoidParams::DATA_START,
        )
        .unwrap();
        assert_abs_diff_eq!(result.params.slope, truth.slope, epsilon = 2e-3);
        assert_abs_diff_eq!(result.params.midpoint, truth.midpoint, epsilon = 1.0);
        assert_abs_diff_eq!(result.params.plateau, truth.plateau, epsilon = 5e-3);
        assert!(result.chi2 < 1.0);
        assert_eq!(result.ndf, 36);
    }

    #[test]
    fn test_not_enough_points() {
        let truth = SigmoidParams::MC_START;
        let graph = sampled(&truth);
        assert!(matches!(
            fit_sigmoid(&graph, FitRange { low: 5.0, high: 25.0 }, truth),
            Err(FitError::NotEnoughPoints(2))
        ));
        assert!(matches!(
            fit_sigmoid(&graph, FitRange { low: 5.0, high: 5.0 }, truth),
            Err(FitError::BadRange { .. })
        ));
    }

    #[test]
    fn test_logistic_is_stable() {
        assert_eq!(logistic(-1000.0), 0.0);
        assert_eq!(logistic(1000.0), 1.0);
        assert_abs_diff_eq!(logistic(0.0), 0.5);
    }

    #[test]
    fn test_ratio_curve() {
        let data = SigmoidParams::DATA_START;
        let mc = SigmoidParams {
            plateau: 0.0,
            ..SigmoidParams::MC_START
        };
        assert_eq!(ratio_curve(&data, &mc, 200.0), 0.0);
        assert_abs_diff_eq!(ratio_curve(&data, &data, 200.0), 1.0);
    }
}
