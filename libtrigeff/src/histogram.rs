//! Fixed-binning weighted histograms.
//!
//! Bins are numbered as in the usual HEP convention: bin 0 is the underflow, bins `1..=nbins`
//! are the regular bins and bin `nbins + 1` is the overflow. Each bin stores the sum of
//! weights and the sum of squared weights.
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::error::HistogramError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Binning {
    Uniform { nbins: usize, low: f64, high: f64 },
    Edges(Vec<f64>),
}

impl Binning {
    pub fn validate(&self) -> Result<(), HistogramError> {
        match self {
            Self::Uniform { nbins, low, high } => {
                if *nbins == 0 {
                    return Err(HistogramError::ZeroBins);
                }
                if !(low < high) {
                    return Err(HistogramError::BadRange {
                        low: *low,
                        high: *high,
                    });
                }
                Ok(())
            }
            Self::Edges(edges) => Axis::from_edges(edges.clone()).map(|_| ()),
        }
    }

    pub fn edges(&self) -> Vec<f64> {
        match self {
            Self::Uniform { nbins, low, high } => {
                let width = (high - low) / *nbins as f64;
                (0..=*nbins).map(|i| low + width * i as f64).collect()
            }
            Self::Edges(edges) => edges.clone(),
        }
    }
}

/// Bin edges of one dimension
#[derive(Debug, Clone, PartialEq)]
pub struct Axis {
    edges: Vec<f64>,
}

impl Axis {
    pub fn new(binning: &Binning) -> Result<Self, HistogramError> {
        binning.validate()?;
        Self::from_edges(binning.edges())
    }

    pub fn from_edges(edges: Vec<f64>) -> Result<Self, HistogramError> {
        if edges.len() < 2 {
            return Err(HistogramError::TooFewEdges(edges.len()));
        }
        if edges.windows(2).any(|w| !(w[0] < w[1])) {
            return Err(HistogramError::UnsortedEdges);
        }
        Ok(Self { edges })
    }

    pub fn nbins(&self) -> usize {
        self.edges.len() - 1
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Bin containing x, with under/overflow. NaN is None.
    pub fn find_bin(&self, x: f64) -> Option<usize> {
        if x.is_nan() {
            return None;
        }
        let n = self.nbins();
        if x < self.edges[0] {
            return Some(0);
        }
        if x >= self.edges[n] {
            return Some(n + 1);
        }
        // First edge strictly greater than x
        let upper = self.edges.partition_point(|e| *e <= x);
        Some(upper)
    }

    pub fn low_edge(&self, bin: usize) -> f64 {
        self.edges[bin - 1]
    }

    pub fn up_edge(&self, bin: usize) -> f64 {
        self.edges[bin]
    }

    pub fn center(&self, bin: usize) -> f64 {
        0.5 * (self.low_edge(bin) + self.up_edge(bin))
    }

    pub fn width(&self, bin: usize) -> f64 {
        self.up_edge(bin) - self.low_edge(bin)
    }

    pub fn same_as(&self, other: &Axis) -> bool {
        self.edges == other.edges
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hist1D {
    axis: Axis,
    sumw: Vec<f64>,
    sumw2: Vec<f64>,
}

impl Hist1D {
    pub fn new(binning: &Binning) -> Result<Self, HistogramError> {
        Ok(Self::with_axis(Axis::new(binning)?))
    }

    pub fn with_axis(axis: Axis) -> Self {
        let n = axis.nbins() + 2;
        Self {
            axis,
            sumw: vec![0.0; n],
            sumw2: vec![0.0; n],
        }
    }

    /// Build from stored contents (including under/overflow)
    pub fn from_parts(axis: Axis, sumw: Vec<f64>, sumw2: Vec<f64>) -> Result<Self, HistogramError> {
        let expected = axis.nbins() + 2;
        for found in [sumw.len(), sumw2.len()] {
            if found != expected {
                return Err(HistogramError::BadStorage { expected, found });
            }
        }
        Ok(Self { axis, sumw, sumw2 })
    }

    pub fn fill(&mut self, x: f64) {
        self.fill_weighted(x, 1.0)
    }

    pub fn fill_weighted(&mut self, x: f64, w: f64) {
        if let Some(bin) = self.axis.find_bin(x) {
            self.sumw[bin] += w;
            self.sumw2[bin] += w * w;
        }
    }

    pub fn axis(&self) -> &Axis {
        &self.axis
    }

    pub fn nbins(&self) -> usize {
        self.axis.nbins()
    }

    pub fn content(&self, bin: usize) -> f64 {
        self.sumw[bin]
    }

    /// Statistical error of the bin, sqrt(sum of squared weights)
    pub fn error(&self, bin: usize) -> f64 {
        self.sumw2[bin].sqrt()
    }

    pub fn sumw2(&self, bin: usize) -> f64 {
        self.sumw2[bin]
    }

    /// Set a bin to a count with Poisson variance
    pub fn set_content(&mut self, bin: usize, value: f64) {
        self.sumw[bin] = value;
        self.sumw2[bin] = value.abs();
    }

    pub fn contents(&self) -> &[f64] {
        &self.sumw
    }

    pub fn variances(&self) -> &[f64] {
        &self.sumw2
    }

    /// Sum over the regular bins
    pub fn integral(&self) -> f64 {
        self.sumw[1..=self.nbins()].iter().sum()
    }

    pub fn clear_flow(&mut self) {
        let n = self.nbins();
        for bin in [0, n + 1] {
            self.sumw[bin] = 0.0;
            self.sumw2[bin] = 0.0;
        }
    }

    pub fn same_binning(&self, other: &Hist1D) -> bool {
        self.axis.same_as(&other.axis)
    }

    pub fn add(&mut self, other: &Hist1D) -> Result<(), HistogramError> {
        if !self.same_binning(other) {
            return Err(HistogramError::BinningMismatch);
        }
        for (a, b) in self.sumw.iter_mut().zip(other.sumw.iter()) {
            *a += b;
        }
        for (a, b) in self.sumw2.iter_mut().zip(other.sumw2.iter()) {
            *a += b;
        }
        Ok(())
    }

    pub fn scale(&mut self, factor: f64) {
        for v in self.sumw.iter_mut() {
            *v *= factor;
        }
        for v in self.sumw2.iter_mut() {
            *v *= factor * factor;
        }
    }

    /// Copy scaled to unit integral. An empty histogram is returned unchanged with a warning.
    pub fn normalized(&self) -> Hist1D {
        let mut norm = self.clone();
        let integral = self.integral();
        if integral == 0.0 {
            log::warn!("Cannot normalize a histogram with zero integral; leaving it unchanged");
        } else {
            norm.scale(1.0 / integral);
        }
        norm
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hist2D {
    x_axis: Axis,
    y_axis: Axis,
    sumw: Array2<f64>,
    sumw2: Array2<f64>,
}

impl Hist2D {
    pub fn new(x_binning: &Binning, y_binning: &Binning) -> Result<Self, HistogramError> {
        Ok(Self::with_axes(Axis::new(x_binning)?, Axis::new(y_binning)?))
    }

    pub fn with_axes(x_axis: Axis, y_axis: Axis) -> Self {
        let shape = (x_axis.nbins() + 2, y_axis.nbins() + 2);
        Self {
            x_axis,
            y_axis,
            sumw: Array2::zeros(shape),
            sumw2: Array2::zeros(shape),
        }
    }

    pub fn from_parts(
        x_axis: Axis,
        y_axis: Axis,
        sumw: Array2<f64>,
        sumw2: Array2<f64>,
    ) -> Result<Self, HistogramError> {
        let shape = (x_axis.nbins() + 2, y_axis.nbins() + 2);
        for found in [sumw.dim(), sumw2.dim()] {
            if found != shape {
                return Err(HistogramError::BadStorage {
                    expected: shape.0 * shape.1,
                    found: found.0 * found.1,
                });
            }
        }
        Ok(Self {
            x_axis,
            y_axis,
            sumw,
            sumw2,
        })
    }

    pub fn fill_weighted(&mut self, x: f64, y: f64, w: f64) {
        if let (Some(bx), Some(by)) = (self.x_axis.find_bin(x), self.y_axis.find_bin(y)) {
            self.sumw[[bx, by]] += w;
            self.sumw2[[bx, by]] += w * w;
        }
    }

    pub fn x_axis(&self) -> &Axis {
        &self.x_axis
    }

    pub fn y_axis(&self) -> &Axis {
        &self.y_axis
    }

    pub fn content(&self, bx: usize, by: usize) -> f64 {
        self.sumw[[bx, by]]
    }

    pub fn error(&self, bx: usize, by: usize) -> f64 {
        self.sumw2[[bx, by]].sqrt()
    }

    /// Set a bin value and its error
    pub fn set_bin(&mut self, bx: usize, by: usize, value: f64, error: f64) {
        self.sumw[[bx, by]] = value;
        self.sumw2[[bx, by]] = error * error;
    }

    pub fn contents(&self) -> &Array2<f64> {
        &self.sumw
    }

    pub fn variances(&self) -> &Array2<f64> {
        &self.sumw2
    }

    pub fn integral(&self) -> f64 {
        let nx = self.x_axis.nbins();
        let ny = self.y_axis.nbins();
        self.sumw
            .slice(ndarray::s![1..=nx, 1..=ny])
            .iter()
            .sum()
    }

    pub fn same_binning(&self, other: &Hist2D) -> bool {
        self.x_axis.same_as(&other.x_axis) && self.y_axis.same_as(&other.y_axis)
    }

    pub fn add(&mut self, other: &Hist2D) -> Result<(), HistogramError> {
        if !self.same_binning(other) {
            return Err(HistogramError::BinningMismatch);
        }
        self.sumw += &other.sumw;
        self.sumw2 += &other.sumw2;
        Ok(())
    }
}
