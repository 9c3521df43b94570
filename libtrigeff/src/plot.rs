//! SVG figures of efficiencies, scale factors and distributions
use plotters::coord::types::RangedCoordf64;
use plotters::prelude::*;
use std::error::Error;
use std::path::Path;

use super::efficiency::{EfficiencyGraph, PointStatus, ScaleFactorGraph};
use super::error::PlotError;
use super::fit::{ratio_curve, FitResult};
use super::histogram::Hist2D;

const WIDTH: u32 = 900;
const CURVE_POINTS: usize = 200;

/// Data and MC colors
const DATA_COLOR: RGBColor = BLACK;
const MC_COLOR: RGBColor = RED;

fn x_bounds(graphs: &[&EfficiencyGraph]) -> Option<(f64, f64)> {
    let low = graphs
        .iter()
        .flat_map(|g| g.points.iter().map(|p| p.x - p.ex_low))
        .fold(f64::INFINITY, f64::min);
    let high = graphs
        .iter()
        .flat_map(|g| g.points.iter().map(|p| p.x + p.ex_high))
        .fold(f64::NEG_INFINITY, f64::max);
    if low.is_finite() && high.is_finite() && low < high {
        Some((low, high))
    } else {
        None
    }
}

fn y_max(graphs: &[&EfficiencyGraph]) -> f64 {
    graphs
        .iter()
        .flat_map(|g| g.points.iter().map(|p| p.y + p.ey_high))
        .filter(|y| y.is_finite())
        .fold(0.0, f64::max)
}

/// Markers with asymmetric error bars
fn draw_graph(
    chart: &mut ChartContext<'_, SVGBackend<'_>, Cartesian2d<RangedCoordf64, RangedCoordf64>>,
    graph: &EfficiencyGraph,
    color: RGBColor,
    label: &str,
) -> Result<(), Box<dyn Error>> {
    for p in graph.points.iter() {
        chart.draw_series(std::iter::once(PathElement::new(
            vec![(p.x, p.y - p.ey_low), (p.x, p.y + p.ey_high)],
            color,
        )))?;
        chart.draw_series(std::iter::once(PathElement::new(
            vec![(p.x - p.ex_low, p.y), (p.x + p.ex_high, p.y)],
            color,
        )))?;
    }
    chart
        .draw_series(graph.points.iter().map(|p| Circle::new((p.x, p.y), 3, color.filled())))?
        .label(label)
        .legend(move |(x, y)| Circle::new((x + 10, y), 3, color.filled()));
    Ok(())
}

fn curve(fit: &FitResult, f: impl Fn(f64) -> f64) -> Vec<(f64, f64)> {
    let step = (fit.range.high - fit.range.low) / (CURVE_POINTS - 1) as f64;
    (0..CURVE_POINTS)
        .map(|i| {
            let x = fit.range.low + step * i as f64;
            (x, f(x))
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn draw_efficiency(
    path: &Path,
    (x_min, x_max): (f64, f64),
    title: &str,
    x_label: &str,
    data: &EfficiencyGraph,
    mc: &EfficiencyGraph,
    sf: &ScaleFactorGraph,
    fits: Option<(&FitResult, &FitResult)>,
) -> Result<(), Box<dyn Error>> {
    let root = SVGBackend::new(path, (WIDTH, 900)).into_drawing_area();
    root.fill(&WHITE)?;
    let (upper, lower) = root.split_vertically(600);

    let mut chart = ChartBuilder::on(&upper)
        .caption(title, ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(60)
        .build_cartesian_2d(x_min..x_max, 0.0..1.2)?;
    chart.configure_mesh().y_desc("Efficiency").draw()?;

    draw_graph(&mut chart, data, DATA_COLOR, "Data")?;
    draw_graph(&mut chart, mc, MC_COLOR, "MC")?;
    if let Some((data_fit, mc_fit)) = fits {
        chart
            .draw_series(LineSeries::new(curve(data_fit, |x| data_fit.params.eval(x)), &BLUE))?
            .label("Data fit")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));
        chart
            .draw_series(LineSeries::new(curve(mc_fit, |x| mc_fit.params.eval(x)), &MAGENTA))?
            .label("MC fit")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], MAGENTA));
    }
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .position(SeriesLabelPosition::LowerRight)
        .draw()?;

    let measured = EfficiencyGraph {
        points: sf
            .points
            .iter()
            .filter(|p| p.status == PointStatus::Measured)
            .map(|p| p.point)
            .collect(),
    };
    let sf_max = y_max(&[&measured]).max(1.5).min(5.0);
    let mut ratio = ChartBuilder::on(&lower)
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_min..x_max, 0.0..sf_max)?;
    ratio
        .configure_mesh()
        .x_desc(x_label)
        .y_desc("Data/MC")
        .draw()?;
    ratio.draw_series(std::iter::once(PathElement::new(
        vec![(x_min, 1.0), (x_max, 1.0)],
        BLACK.mix(0.3),
    )))?;
    draw_graph(&mut ratio, &measured, DATA_COLOR, "SF")?;
    if let Some((data_fit, mc_fit)) = fits {
        ratio.draw_series(LineSeries::new(
            curve(data_fit, |x| ratio_curve(&data_fit.params, &mc_fit.params, x)),
            &BLUE,
        ))?;
    }

    root.present()?;
    Ok(())
}

/// Efficiencies of data and MC with optional sigmoid fits, over a scale factor panel
pub fn plot_efficiency(
    path: &Path,
    title: &str,
    x_label: &str,
    data: &EfficiencyGraph,
    mc: &EfficiencyGraph,
    sf: &ScaleFactorGraph,
    fits: Option<(&FitResult, &FitResult)>,
) -> Result<(), PlotError> {
    let bounds = x_bounds(&[data, mc]).ok_or_else(|| PlotError::NothingToDraw(title.to_string()))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    draw_efficiency(path, bounds, title, x_label, data, mc, sf, fits)
        .map_err(|e| PlotError::Drawing(e.to_string()))
}

fn draw_distributions(
    path: &Path,
    (x_min, x_max): (f64, f64),
    title: &str,
    x_label: &str,
    data: &EfficiencyGraph,
    mc: &EfficiencyGraph,
) -> Result<(), Box<dyn Error>> {
    let top = y_max(&[data, mc]).max(1e-6) * 1.2;
    let root = SVGBackend::new(path, (WIDTH, 600)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_min..x_max, 0.0..top)?;
    chart
        .configure_mesh()
        .x_desc(x_label)
        .y_desc("Normalized to unity")
        .draw()?;
    for p in mc.points.iter() {
        chart.draw_series(std::iter::once(Rectangle::new(
            [(p.x - p.ex_low, 0.0), (p.x + p.ex_high, p.y)],
            MC_COLOR.mix(0.3).filled(),
        )))?;
    }
    draw_graph(&mut chart, data, DATA_COLOR, "Data")?;
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

/// Normalized data (markers) over normalized MC (filled bins)
pub fn plot_distributions(
    path: &Path,
    title: &str,
    x_label: &str,
    data: &EfficiencyGraph,
    mc: &EfficiencyGraph,
) -> Result<(), PlotError> {
    let bounds = x_bounds(&[data, mc]).ok_or_else(|| PlotError::NothingToDraw(title.to_string()))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    draw_distributions(path, bounds, title, x_label, data, mc).map_err(|e| PlotError::Drawing(e.to_string()))
}

/// White to blue to red with increasing value
fn heat_color(frac: f64) -> RGBColor {
    let f = frac.clamp(0.0, 1.0);
    if f < 0.5 {
        let t = f / 0.5;
        RGBColor((255.0 * (1.0 - t)) as u8, (255.0 * (1.0 - t)) as u8, 255)
    } else {
        let t = (f - 0.5) / 0.5;
        RGBColor((255.0 * t) as u8, 0, (255.0 * (1.0 - t)) as u8)
    }
}

fn draw_map(
    path: &Path,
    title: &str,
    x_label: &str,
    y_label: &str,
    map: &Hist2D,
    top: f64,
) -> Result<(), Box<dyn Error>> {
    let x_axis = map.x_axis();
    let y_axis = map.y_axis();
    let (x_min, x_max) = (x_axis.low_edge(1), x_axis.up_edge(x_axis.nbins()));
    let (y_min, y_max) = (y_axis.low_edge(1), y_axis.up_edge(y_axis.nbins()));

    let root = SVGBackend::new(path, (WIDTH, 800)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(format!("{title} (max {top:.3})"), ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;
    chart.configure_mesh().x_desc(x_label).y_desc(y_label).draw()?;
    for bx in 1..=x_axis.nbins() {
        for by in 1..=y_axis.nbins() {
            let value = map.content(bx, by);
            if value <= 0.0 {
                continue;
            }
            chart.draw_series(std::iter::once(Rectangle::new(
                [
                    (x_axis.low_edge(bx), y_axis.low_edge(by)),
                    (x_axis.up_edge(bx), y_axis.up_edge(by)),
                ],
                heat_color(value / top).filled(),
            )))?;
        }
    }
    root.present()?;
    Ok(())
}

/// A 2D efficiency or scale factor map as colored cells
pub fn plot_map(
    path: &Path,
    title: &str,
    x_label: &str,
    y_label: &str,
    map: &Hist2D,
) -> Result<(), PlotError> {
    let mut top: f64 = 0.0;
    for bx in 1..=map.x_axis().nbins() {
        for by in 1..=map.y_axis().nbins() {
            top = top.max(map.content(bx, by));
        }
    }
    if top <= 0.0 {
        return Err(PlotError::NothingToDraw(title.to_string()));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    draw_map(path, title, x_label, y_label, map, top).map_err(|e| PlotError::Drawing(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::efficiency::{efficiency, scale_factors};
    use crate::histogram::{Binning, Hist1D};

    fn graphs() -> (EfficiencyGraph, EfficiencyGraph) {
        let binning = Binning::Uniform { nbins: 4, low: 0.0, high: 4.0 };
        let mut reference = Hist1D::new(&binning).unwrap();
        let mut pass = Hist1D::new(&binning).unwrap();
        for bin in 1..=4 {
            reference.set_content(bin, 10.0);
            pass.set_content(bin, 2.0 * bin as f64);
        }
        let data = efficiency(&pass, &reference, 0.95).unwrap();
        let mc = efficiency(&pass, &reference, 0.95).unwrap();
        (data, mc)
    }

    #[test]
    fn test_efficiency_plot_written() {
        let dir = tempfile::tempdir().unwrap();
        let (data, mc) = graphs();
        let sf = scale_factors(&data, &mc).unwrap();
        let path = dir.path().join("plots/eff.svg");
        plot_efficiency(&path, "test", "x", &data, &mc, &sf, None).unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.starts_with("<svg"));
    }

    #[test]
    fn test_empty_graph_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let empty = EfficiencyGraph::default();
        assert!(matches!(
            plot_distributions(&dir.path().join("d.svg"), "empty", "x", &empty, &empty),
            Err(PlotError::NothingToDraw(_))
        ));
    }

    #[test]
    fn test_heat_color_ends() {
        assert_eq!(heat_color(0.0), RGBColor(255, 255, 255));
        assert_eq!(heat_color(1.0), RGBColor(255, 0, 0));
    }
}
