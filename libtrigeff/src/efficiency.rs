//! Efficiencies and data/MC scale factors.
//!
//! Efficiencies are computed bin by bin from a passing and a reference histogram with
//! Clopper-Pearson intervals. Bins where both histograms are empty are patched to a
//! reference of one so that the efficiency is defined (0/1) instead of NaN. Under and overflow
//! are dropped before dividing.
use statrs::function::beta::inv_beta_reg;

use super::error::{EfficiencyError, HistogramError};
use super::histogram::{Hist1D, Hist2D};

/// One point with asymmetric errors
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphPoint {
    pub x: f64,
    pub ex_low: f64,
    pub ex_high: f64,
    pub y: f64,
    pub ey_low: f64,
    pub ey_high: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EfficiencyGraph {
    pub points: Vec<GraphPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointStatus {
    Measured,
    /// The MC efficiency was zero, the stored value and errors are zero by convention
    UndefinedRatio,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleFactorPoint {
    pub point: GraphPoint,
    pub status: PointStatus,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScaleFactorGraph {
    pub points: Vec<ScaleFactorPoint>,
}

impl ScaleFactorGraph {
    pub fn as_graph(&self) -> EfficiencyGraph {
        EfficiencyGraph {
            points: self.points.iter().map(|p| p.point).collect(),
        }
    }
}

/// Clopper-Pearson interval `(lower, upper)` for `passed` out of `total`. The bounds are the
/// `alpha / 2` and `1 - alpha / 2` quantiles of Beta(k, n - k + 1) and Beta(k + 1, n - k).
pub fn clopper_pearson(passed: f64, total: f64, level: f64) -> Result<(f64, f64), EfficiencyError> {
    if !(level > 0.0 && level < 1.0) {
        return Err(EfficiencyError::BadConfidenceLevel(level));
    }
    if !(passed.is_finite() && total.is_finite()) || passed < 0.0 || passed > total {
        return Err(EfficiencyError::BadCounts { passed, total });
    }
    let alpha = 0.5 * (1.0 - level);
    let lower = if passed <= 0.0 {
        0.0
    } else {
        inv_beta_reg(passed, total - passed + 1.0, alpha)
    };
    let upper = if passed >= total {
        1.0
    } else {
        inv_beta_reg(passed + 1.0, total - passed, 1.0 - alpha)
    };
    Ok((lower, upper))
}

/// The reference histogram with every (pass == 0, reference == 0) bin set to one
pub fn patch_empty_bins(pass: &Hist1D, reference: &Hist1D) -> Result<Hist1D, HistogramError> {
    if !pass.same_binning(reference) {
        return Err(HistogramError::BinningMismatch);
    }
    let mut patched = reference.clone();
    for bin in 1..=reference.nbins() {
        if pass.content(bin) == 0.0 && reference.content(bin) == 0.0 {
            patched.set_content(bin, 1.0);
        }
    }
    Ok(patched)
}

fn check_counts(bin: usize, pass: f64, reference: f64) -> Result<(), EfficiencyError> {
    if pass < 0.0 || reference < 0.0 {
        return Err(EfficiencyError::NegativeCount { bin });
    }
    // Tolerate rounding in sums of weights
    if pass > reference * (1.0 + 1e-12) {
        return Err(EfficiencyError::PassExceedsReference {
            bin,
            pass,
            reference,
        });
    }
    Ok(())
}

/// Efficiency per regular bin. Every bin yields a point.
pub fn efficiency(
    pass: &Hist1D,
    reference: &Hist1D,
    level: f64,
) -> Result<EfficiencyGraph, EfficiencyError> {
    let mut pass = pass.clone();
    let mut reference = patch_empty_bins(&pass, reference)?;
    pass.clear_flow();
    reference.clear_flow();

    let axis = pass.axis().clone();
    let mut points = Vec::with_capacity(axis.nbins());
    for bin in 1..=axis.nbins() {
        let k = pass.content(bin);
        let n = reference.content(bin);
        check_counts(bin, k, n)?;
        let k = k.min(n);
        let y = k / n;
        let (lower, upper) = clopper_pearson(k, n, level)?;
        points.push(GraphPoint {
            x: axis.center(bin),
            ex_low: 0.5 * axis.width(bin),
            ex_high: 0.5 * axis.width(bin),
            y,
            ey_low: (y - lower).max(0.0),
            ey_high: (upper - y).max(0.0),
        });
    }
    Ok(EfficiencyGraph { points })
}

/// Normalized distribution as a graph with symmetric errors
pub fn normalized_graph(hist: &Hist1D) -> EfficiencyGraph {
    let mut hist = hist.clone();
    hist.clear_flow();
    let norm = hist.normalized();
    let axis = norm.axis();
    let points = (1..=axis.nbins())
        .map(|bin| GraphPoint {
            x: axis.center(bin),
            ex_low: 0.5 * axis.width(bin),
            ex_high: 0.5 * axis.width(bin),
            y: norm.content(bin),
            ey_low: norm.error(bin),
            ey_high: norm.error(bin),
        })
        .collect();
    EfficiencyGraph { points }
}

/// Data efficiency over MC efficiency with relative errors added in quadrature per side.
///
/// A zero MC efficiency gives a zero scale factor with zero errors, flagged as
/// [`PointStatus::UndefinedRatio`].
pub fn scale_factors(
    data: &EfficiencyGraph,
    mc: &EfficiencyGraph,
) -> Result<ScaleFactorGraph, EfficiencyError> {
    if data.points.len() != mc.points.len() {
        return Err(EfficiencyError::PointMismatch {
            data: data.points.len(),
            mc: mc.points.len(),
        });
    }
    let mut points = Vec::with_capacity(data.points.len());
    for (d, m) in data.points.iter().zip(mc.points.iter()) {
        if (d.x - m.x).abs() > 1e-9 * d.x.abs().max(1.0) {
            return Err(EfficiencyError::PointMismatch {
                data: data.points.len(),
                mc: mc.points.len(),
            });
        }
        let mut point = GraphPoint {
            x: d.x,
            ex_low: d.ex_low,
            ex_high: d.ex_high,
            y: 0.0,
            ey_low: 0.0,
            ey_high: 0.0,
        };
        if m.y == 0.0 {
            points.push(ScaleFactorPoint {
                point,
                status: PointStatus::UndefinedRatio,
            });
            continue;
        }
        point.y = d.y / m.y;
        if d.y == 0.0 {
            // Relative errors are undefined, propagate the data upper error alone
            point.ey_high = d.ey_high / m.y;
        } else {
            point.ey_low = point.y * ((d.ey_low / d.y).powi(2) + (m.ey_high / m.y).powi(2)).sqrt();
            point.ey_high = point.y * ((d.ey_high / d.y).powi(2) + (m.ey_low / m.y).powi(2)).sqrt();
        }
        points.push(ScaleFactorPoint {
            point,
            status: PointStatus::Measured,
        });
    }
    Ok(ScaleFactorGraph { points })
}

/// 2D efficiency with its Clopper-Pearson errors stored as separate maps
#[derive(Debug, Clone, PartialEq)]
pub struct EfficiencyMap {
    pub value: Hist2D,
    pub err_up: Hist2D,
    pub err_down: Hist2D,
}

pub fn efficiency_2d(
    pass: &Hist2D,
    reference: &Hist2D,
    level: f64,
) -> Result<EfficiencyMap, EfficiencyError> {
    if !pass.same_binning(reference) {
        return Err(HistogramError::BinningMismatch.into());
    }
    let x_axis = pass.x_axis().clone();
    let y_axis = pass.y_axis().clone();
    let mut value = Hist2D::with_axes(x_axis.clone(), y_axis.clone());
    let mut err_up = value.clone();
    let mut err_down = value.clone();
    for bx in 1..=x_axis.nbins() {
        for by in 1..=y_axis.nbins() {
            let k = pass.content(bx, by);
            let mut n = reference.content(bx, by);
            if k == 0.0 && n == 0.0 {
                n = 1.0;
            }
            let flat = (bx - 1) * y_axis.nbins() + by;
            check_counts(flat, k, n)?;
            let k = k.min(n);
            let eff = k / n;
            let (lower, upper) = clopper_pearson(k, n, level)?;
            value.set_bin(bx, by, eff, 0.5 * (upper - lower));
            err_up.set_bin(bx, by, (upper - eff).max(0.0), 0.0);
            err_down.set_bin(bx, by, (eff - lower).max(0.0), 0.0);
        }
    }
    Ok(EfficiencyMap {
        value,
        err_up,
        err_down,
    })
}

/// 2D scale factor. `undefined` holds 1 in every bin where the MC efficiency is zero, the
/// 2D counterpart of [`PointStatus::UndefinedRatio`]; those bins have value and errors 0.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleFactorMap {
    pub value: Hist2D,
    pub err_up: Hist2D,
    pub err_down: Hist2D,
    pub undefined: Hist2D,
}

/// Ratio of two efficiency maps with the same quadrature rule as [`scale_factors`]
pub fn scale_factor_2d(
    data: &EfficiencyMap,
    mc: &EfficiencyMap,
) -> Result<ScaleFactorMap, EfficiencyError> {
    if !data.value.same_binning(&mc.value) {
        return Err(HistogramError::BinningMismatch.into());
    }
    let x_axis = data.value.x_axis().clone();
    let y_axis = data.value.y_axis().clone();
    let mut value = Hist2D::with_axes(x_axis.clone(), y_axis.clone());
    let mut err_up = value.clone();
    let mut err_down = value.clone();
    let mut undefined = value.clone();
    for bx in 1..=x_axis.nbins() {
        for by in 1..=y_axis.nbins() {
            let d = data.value.content(bx, by);
            let m = mc.value.content(bx, by);
            if m == 0.0 {
                undefined.set_bin(bx, by, 1.0, 0.0);
                continue;
            }
            let sf = d / m;
            let (up, down) = if d == 0.0 {
                (data.err_up.content(bx, by) / m, 0.0)
            } else {
                let up = sf
                    * ((data.err_up.content(bx, by) / d).powi(2)
                        + (mc.err_down.content(bx, by) / m).powi(2))
                    .sqrt();
                let down = sf
                    * ((data.err_down.content(bx, by) / d).powi(2)
                        + (mc.err_up.content(bx, by) / m).powi(2))
                    .sqrt();
                (up, down)
            };
            value.set_bin(bx, by, sf, 0.5 * (up + down));
            err_up.set_bin(bx, by, up, 0.0);
            err_down.set_bin(bx, by, down, 0.0);
        }
    }
    Ok(ScaleFactorMap {
        value,
        err_up,
        err_down,
        undefined,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::Binning;
    use approx::assert_relative_eq;
    use statrs::function::beta::beta_reg;

    fn hist(counts: &[f64]) -> Hist1D {
        let binning = Binning::Uniform {
            nbins: counts.len(),
            low: 0.0,
            high: counts.len() as f64,
        };
        let mut h = Hist1D::new(&binning).unwrap();
        for (i, c) in counts.iter().enumerate() {
            h.set_content(i + 1, *c);
        }
        h
    }

    #[test]
    fn test_zero_over_zero_is_defined() {
        let reference = hist(&[10.0, 0.0, 5.0]);
        let pass = hist(&[5.0, 0.0, 5.0]);
        let graph = efficiency(&pass, &reference, 0.683).unwrap();
        let values: Vec<f64> = graph.points.iter().map(|p| p.y).collect();
        assert_eq!(values, vec![0.5, 0.0, 1.0]);
        assert!(graph.points.iter().all(|p| p.ey_low.is_finite() && p.ey_high.is_finite()));
    }

    #[test]
    fn test_efficiency_bounds() {
        let reference = hist(&[100.0, 7.0, 1.0, 30.5]);
        let pass = hist(&[0.0, 3.0, 1.0, 12.25]);
        let graph = efficiency(&pass, &reference, 0.95).unwrap();
        for p in graph.points.iter() {
            assert!((0.0..=1.0).contains(&p.y));
            assert!(p.y - p.ey_low >= 0.0);
            assert!(p.y + p.ey_high <= 1.0 + 1e-12);
        }
        // Full efficiency has no upper error, zero efficiency no lower error
        assert_eq!(graph.points[2].ey_high, 0.0);
        assert_eq!(graph.points[0].ey_low, 0.0);
    }

    #[test]
    fn test_clopper_pearson_known_values() {
        // 0 out of 10 at 95%: upper = 1 - 0.025^(1/10)
        let (lower, upper) = clopper_pearson(0.0, 10.0, 0.95).unwrap();
        assert_eq!(lower, 0.0);
        assert_relative_eq!(upper, 1.0 - 0.025f64.powf(0.1), epsilon = 1e-9);
        let (lower, upper) = clopper_pearson(5.0, 10.0, 0.95).unwrap();
        assert_relative_eq!(lower, 0.187_086, epsilon = 1e-6);
        assert_relative_eq!(upper, 0.812_914, epsilon = 1e-6);
        assert_relative_eq!(lower + upper, 1.0, epsilon = 1e-9);
        assert!(clopper_pearson(1.0, 2.0, 1.0).is_err());
        assert!(clopper_pearson(3.0, 2.0, 0.95).is_err());
    }

    #[test]
    fn test_clopper_pearson_near_plateau() {
        // 99 out of 100 at 95%: the upper quantile of Beta(100, 1) is 0.975^(1/100)
        let (lower, upper) = clopper_pearson(99.0, 100.0, 0.95).unwrap();
        assert_relative_eq!(upper, 0.975f64.powf(0.01), epsilon = 1e-9);
        assert_relative_eq!(1.0 - upper, 2.531_460_329_773_8e-4, epsilon = 1e-9);
        assert_relative_eq!(beta_reg(99.0, 2.0, lower), 0.025, epsilon = 1e-9);

        let (lower, upper) = clopper_pearson(12.25, 30.5, 0.683).unwrap();
        let alpha = 0.5 * (1.0 - 0.683);
        assert_relative_eq!(beta_reg(12.25, 19.25, lower), alpha, epsilon = 1e-9);
        assert_relative_eq!(beta_reg(13.25, 18.25, upper), 1.0 - alpha, epsilon = 1e-9);
    }

    #[test]
    fn test_pass_exceeds_reference() {
        let reference = hist(&[1.0, 2.0]);
        let pass = hist(&[1.0, 3.0]);
        assert!(matches!(
            efficiency(&pass, &reference, 0.95),
            Err(EfficiencyError::PassExceedsReference { bin: 2, .. })
        ));
    }

    #[test]
    fn test_binning_mismatch() {
        let reference = hist(&[1.0, 2.0]);
        let pass = hist(&[1.0, 2.0, 3.0]);
        assert!(matches!(
            efficiency(&pass, &reference, 0.95),
            Err(EfficiencyError::HistogramError(HistogramError::BinningMismatch))
        ));
    }

    #[test]
    fn test_self_scale_factor_is_one() {
        let reference = hist(&[10.0, 4.0, 0.0, 25.0]);
        let eff = efficiency(&reference, &reference, 0.95).unwrap();
        let sf = scale_factors(&eff, &eff).unwrap();
        for (bin, p) in (1..).zip(sf.points.iter()) {
            if reference.content(bin) == 0.0 {
                assert_eq!(p.status, PointStatus::UndefinedRatio);
                continue;
            }
            assert_eq!(p.point.y, 1.0);
            assert_eq!(p.status, PointStatus::Measured);
        }
    }

    #[test]
    fn test_undefined_ratio() {
        let reference = hist(&[10.0, 10.0]);
        let data = efficiency(&hist(&[5.0, 2.0]), &reference, 0.95).unwrap();
        let mc = efficiency(&hist(&[0.0, 4.0]), &reference, 0.95).unwrap();
        let sf = scale_factors(&data, &mc).unwrap();
        assert_eq!(sf.points[0].status, PointStatus::UndefinedRatio);
        assert_eq!(sf.points[0].point.y, 0.0);
        assert_eq!(sf.points[0].point.ey_high, 0.0);
        assert_relative_eq!(sf.points[1].point.y, 0.5);
        let expected = 0.5
            * ((data.points[1].ey_high / 0.2).powi(2) + (mc.points[1].ey_low / 0.4).powi(2)).sqrt();
        assert_relative_eq!(sf.points[1].point.ey_high, expected);
    }

    #[test]
    fn test_efficiency_map() {
        let bins = Binning::Uniform { nbins: 2, low: 0.0, high: 2.0 };
        let mut reference = Hist2D::new(&bins, &bins).unwrap();
        let mut pass = Hist2D::new(&bins, &bins).unwrap();
        reference.fill_weighted(0.5, 0.5, 4.0);
        pass.fill_weighted(0.5, 0.5, 2.0);
        let map = efficiency_2d(&pass, &reference, 0.95).unwrap();
        assert_eq!(map.value.content(1, 1), 0.5);
        // Empty bins are defined
        assert_eq!(map.value.content(2, 2), 0.0);
        let sf = scale_factor_2d(&map, &map).unwrap();
        assert_eq!(sf.value.content(1, 1), 1.0);
        assert_eq!(sf.undefined.content(1, 1), 0.0);
        // Zero MC efficiency is flagged, not mistaken for a measured zero
        assert_eq!(sf.value.content(2, 2), 0.0);
        assert_eq!(sf.undefined.content(2, 2), 1.0);
    }

    #[test]
    fn test_scale_factor_map_zero_data() {
        let bins = Binning::Uniform { nbins: 1, low: 0.0, high: 1.0 };
        let mut reference = Hist2D::new(&bins, &bins).unwrap();
        reference.fill_weighted(0.5, 0.5, 10.0);
        let mut mc_pass = Hist2D::new(&bins, &bins).unwrap();
        mc_pass.fill_weighted(0.5, 0.5, 5.0);
        let data_pass = Hist2D::new(&bins, &bins).unwrap();
        let data = efficiency_2d(&data_pass, &reference, 0.95).unwrap();
        let mc = efficiency_2d(&mc_pass, &reference, 0.95).unwrap();
        let sf = scale_factor_2d(&data, &mc).unwrap();
        assert_eq!(sf.value.content(1, 1), 0.0);
        assert_eq!(sf.undefined.content(1, 1), 0.0);
        assert_relative_eq!(sf.err_up.content(1, 1), data.err_up.content(1, 1) / 0.5, epsilon = 1e-12);
        assert_eq!(sf.err_down.content(1, 1), 0.0);
    }
}
