//! Binary persistence of histograms, graphs and fit results.
//!
//! A file is a little-endian stream:
//!
//! ```text
//! magic "TEHF" | version u16 | created (unix seconds) i64 | object count u32
//! repeated: name length u16 | name (UTF-8) | type tag u8 | payload
//! ```
//!
//! Payloads by tag:
//!
//! - `1` Hist1D: edge count u32, edges f64, then (nbins + 2) sums of weights and (nbins + 2)
//!   sums of squared weights, flow bins included
//! - `2` Hist2D: x edges, y edges (each as for Hist1D), then the (nx + 2) * (ny + 2) sums of
//!   weights and sums of squared weights in row-major (x, y) order
//! - `3` efficiency graph: point count u32, then x, ex_low, ex_high, y, ey_low, ey_high per point
//! - `4` scale factor graph: as `3` with a trailing status byte per point (0 measured,
//!   1 undefined ratio)
//! - `5` sigmoid fit: slope, midpoint, plateau, range low, range high, chi2 as f64, ndf u32,
//!   converged u8
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use ndarray::Array2;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::Path;

use super::efficiency::{
    EfficiencyGraph, GraphPoint, PointStatus, ScaleFactorGraph, ScaleFactorPoint,
};
use super::error::HistFileError;
use super::fit::{FitRange, FitResult, SigmoidParams};
use super::histogram::{Axis, Hist1D, Hist2D};

const MAGIC: &[u8; 4] = b"TEHF";
/// This is the version of the output format
const FORMAT_VERSION: u16 = 1;

const TAG_HIST1D: u8 = 1;
const TAG_HIST2D: u8 = 2;
const TAG_GRAPH: u8 = 3;
const TAG_SCALE_FACTORS: u8 = 4;
const TAG_SIGMOID: u8 = 5;

const STATUS_MEASURED: u8 = 0;
const STATUS_UNDEFINED_RATIO: u8 = 1;

/// Bytes of one graph point
const POINT_SIZE: u64 = 6 * 8;

/// The whole file in memory, so that counts can be checked against what is left
type Source = Cursor<Vec<u8>>;

#[derive(Debug, Clone, PartialEq)]
pub enum StoredObject {
    Hist1D(Hist1D),
    Hist2D(Hist2D),
    Graph(EfficiencyGraph),
    ScaleFactors(ScaleFactorGraph),
    Sigmoid(FitResult),
}

impl StoredObject {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Hist1D(_) => "Hist1D",
            Self::Hist2D(_) => "Hist2D",
            Self::Graph(_) => "Graph",
            Self::ScaleFactors(_) => "ScaleFactors",
            Self::Sigmoid(_) => "Sigmoid",
        }
    }
}

/// An in-memory collection of named objects, read from or written to one file.
/// Objects are kept sorted by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistFile {
    created: i64,
    objects: BTreeMap<String, StoredObject>,
}

impl HistFile {
    pub fn new() -> Self {
        Self {
            created: time::OffsetDateTime::now_utc().unix_timestamp(),
            objects: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, name: &str, object: StoredObject) {
        self.objects.insert(name.to_string(), object);
    }

    pub fn get(&self, name: &str) -> Result<&StoredObject, HistFileError> {
        self.objects
            .get(name)
            .ok_or_else(|| HistFileError::MissingObject(name.to_string()))
    }

    pub fn get_hist1d(&self, name: &str) -> Result<&Hist1D, HistFileError> {
        match self.get(name)? {
            StoredObject::Hist1D(h) => Ok(h),
            _ => Err(HistFileError::WrongType {
                name: name.to_string(),
                expected: "Hist1D",
            }),
        }
    }

    pub fn get_hist2d(&self, name: &str) -> Result<&Hist2D, HistFileError> {
        match self.get(name)? {
            StoredObject::Hist2D(h) => Ok(h),
            _ => Err(HistFileError::WrongType {
                name: name.to_string(),
                expected: "Hist2D",
            }),
        }
    }

    pub fn get_graph(&self, name: &str) -> Result<&EfficiencyGraph, HistFileError> {
        match self.get(name)? {
            StoredObject::Graph(g) => Ok(g),
            _ => Err(HistFileError::WrongType {
                name: name.to_string(),
                expected: "Graph",
            }),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.objects.contains_key(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.objects.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &StoredObject)> {
        self.objects.iter()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Creation time in unix seconds
    pub fn created(&self) -> i64 {
        self.created
    }

    /// Write the file, creating parent directories as needed
    pub fn write(&self, path: &Path) -> Result<(), HistFileError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(MAGIC)?;
        writer.write_u16::<LittleEndian>(FORMAT_VERSION)?;
        writer.write_i64::<LittleEndian>(self.created)?;
        writer.write_u32::<LittleEndian>(self.objects.len() as u32)?;
        for (name, object) in self.objects.iter() {
            let len = u16::try_from(name.len())
                .map_err(|_| HistFileError::NameTooLong(name.clone()))?;
            writer.write_u16::<LittleEndian>(len)?;
            writer.write_all(name.as_bytes())?;
            write_object(&mut writer, object)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self, HistFileError> {
        if !path.exists() {
            return Err(HistFileError::BadFilePath(path.to_path_buf()));
        }
        let mut reader: Source = Cursor::new(std::fs::read(path)?);
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(HistFileError::BadMagic);
        }
        let version = reader.read_u16::<LittleEndian>()?;
        if version != FORMAT_VERSION {
            return Err(HistFileError::UnsupportedVersion(version));
        }
        let created = reader.read_i64::<LittleEndian>()?;
        let count = reader.read_u32::<LittleEndian>()?;
        let mut objects = BTreeMap::new();
        for _ in 0..count {
            let len = reader.read_u16::<LittleEndian>()? as usize;
            let mut name = vec![0u8; len];
            reader.read_exact(&mut name)?;
            let name = String::from_utf8(name)?;
            let object = read_object(&mut reader)?;
            objects.insert(name, object);
        }
        Ok(Self { created, objects })
    }
}

fn write_f64s<W: Write>(writer: &mut W, values: &[f64]) -> Result<(), HistFileError> {
    for v in values {
        writer.write_f64::<LittleEndian>(*v)?;
    }
    Ok(())
}

/// Check that `count` items of `item_size` bytes can still be read
fn check_count(reader: &Source, count: u64, item_size: u64) -> Result<usize, HistFileError> {
    let remaining = (reader.get_ref().len() as u64).saturating_sub(reader.position());
    match count.checked_mul(item_size) {
        Some(needed) if needed <= remaining => Ok(count as usize),
        _ => Err(HistFileError::CountTooLarge { count, remaining }),
    }
}

/// Read `n` values. Callers with a count taken from the file go through [`check_count`] first.
fn read_f64s(reader: &mut Source, n: usize) -> Result<Vec<f64>, HistFileError> {
    let mut values = vec![0.0; n];
    reader.read_f64_into::<LittleEndian>(&mut values)?;
    Ok(values)
}

fn write_axis<W: Write>(writer: &mut W, axis: &Axis) -> Result<(), HistFileError> {
    writer.write_u32::<LittleEndian>(axis.edges().len() as u32)?;
    write_f64s(writer, axis.edges())
}

fn read_axis(reader: &mut Source) -> Result<Axis, HistFileError> {
    let count = reader.read_u32::<LittleEndian>()?;
    let n = check_count(reader, count as u64, 8)?;
    Ok(Axis::from_edges(read_f64s(reader, n)?)?)
}

fn write_point<W: Write>(writer: &mut W, p: &GraphPoint) -> Result<(), HistFileError> {
    write_f64s(writer, &[p.x, p.ex_low, p.ex_high, p.y, p.ey_low, p.ey_high])
}

fn read_point(reader: &mut Source) -> Result<GraphPoint, HistFileError> {
    let v = read_f64s(reader, 6)?;
    Ok(GraphPoint {
        x: v[0],
        ex_low: v[1],
        ex_high: v[2],
        y: v[3],
        ey_low: v[4],
        ey_high: v[5],
    })
}

fn write_object<W: Write>(writer: &mut W, object: &StoredObject) -> Result<(), HistFileError> {
    match object {
        StoredObject::Hist1D(h) => {
            writer.write_u8(TAG_HIST1D)?;
            write_axis(writer, h.axis())?;
            write_f64s(writer, h.contents())?;
            write_f64s(writer, h.variances())?;
        }
        StoredObject::Hist2D(h) => {
            writer.write_u8(TAG_HIST2D)?;
            write_axis(writer, h.x_axis())?;
            write_axis(writer, h.y_axis())?;
            for v in h.contents().iter() {
                writer.write_f64::<LittleEndian>(*v)?;
            }
            for v in h.variances().iter() {
                writer.write_f64::<LittleEndian>(*v)?;
            }
        }
        StoredObject::Graph(g) => {
            writer.write_u8(TAG_GRAPH)?;
            writer.write_u32::<LittleEndian>(g.points.len() as u32)?;
            for p in g.points.iter() {
                write_point(writer, p)?;
            }
        }
        StoredObject::ScaleFactors(g) => {
            writer.write_u8(TAG_SCALE_FACTORS)?;
            writer.write_u32::<LittleEndian>(g.points.len() as u32)?;
            for p in g.points.iter() {
                write_point(writer, &p.point)?;
                writer.write_u8(match p.status {
                    PointStatus::Measured => STATUS_MEASURED,
                    PointStatus::UndefinedRatio => STATUS_UNDEFINED_RATIO,
                })?;
            }
        }
        StoredObject::Sigmoid(fit) => {
            writer.write_u8(TAG_SIGMOID)?;
            write_f64s(
                writer,
                &[
                    fit.params.slope,
                    fit.params.midpoint,
                    fit.params.plateau,
                    fit.range.low,
                    fit.range.high,
                    fit.chi2,
                ],
            )?;
            writer.write_u32::<LittleEndian>(fit.ndf as u32)?;
            writer.write_u8(fit.converged as u8)?;
        }
    }
    Ok(())
}

fn read_object(reader: &mut Source) -> Result<StoredObject, HistFileError> {
    let tag = reader.read_u8()?;
    match tag {
        TAG_HIST1D => {
            let axis = read_axis(reader)?;
            let n = check_count(reader, 2 * (axis.nbins() as u64 + 2), 8)? / 2;
            let sumw = read_f64s(reader, n)?;
            let sumw2 = read_f64s(reader, n)?;
            Ok(StoredObject::Hist1D(Hist1D::from_parts(axis, sumw, sumw2)?))
        }
        TAG_HIST2D => {
            let x_axis = read_axis(reader)?;
            let y_axis = read_axis(reader)?;
            let shape = (x_axis.nbins() + 2, y_axis.nbins() + 2);
            let n = (shape.0 as u64).saturating_mul(shape.1 as u64);
            let n = check_count(reader, n.saturating_mul(2), 8)? / 2;
            let sumw = Array2::from_shape_vec(shape, read_f64s(reader, n)?)?;
            let sumw2 = Array2::from_shape_vec(shape, read_f64s(reader, n)?)?;
            Ok(StoredObject::Hist2D(Hist2D::from_parts(
                x_axis, y_axis, sumw, sumw2,
            )?))
        }
        TAG_GRAPH => {
            let n = reader.read_u32::<LittleEndian>()?;
            check_count(reader, n as u64, POINT_SIZE)?;
            let points = (0..n)
                .map(|_| read_point(reader))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(StoredObject::Graph(EfficiencyGraph { points }))
        }
        TAG_SCALE_FACTORS => {
            let count = reader.read_u32::<LittleEndian>()?;
            let n = check_count(reader, count as u64, POINT_SIZE + 1)?;
            let mut points = Vec::with_capacity(n);
            for _ in 0..n {
                let point = read_point(reader)?;
                let status = match reader.read_u8()? {
                    STATUS_MEASURED => PointStatus::Measured,
                    STATUS_UNDEFINED_RATIO => PointStatus::UndefinedRatio,
                    other => return Err(HistFileError::UnknownStatus(other)),
                };
                points.push(ScaleFactorPoint { point, status });
            }
            Ok(StoredObject::ScaleFactors(ScaleFactorGraph { points }))
        }
        TAG_SIGMOID => {
            let v = read_f64s(reader, 6)?;
            let ndf = reader.read_u32::<LittleEndian>()? as usize;
            let converged = reader.read_u8()? != 0;
            Ok(StoredObject::Sigmoid(FitResult {
                params: SigmoidParams {
                    slope: v[0],
                    midpoint: v[1],
                    plateau: v[2],
                },
                range: FitRange {
                    low: v[3],
                    high: v[4],
                },
                chi2: v[5],
                ndf,
                converged,
            }))
        }
        other => Err(HistFileError::UnknownTag(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::Binning;

    fn sample_file() -> HistFile {
        let mut file = HistFile::new();
        let mut h1 = Hist1D::new(&Binning::Edges(vec![0.0, 1.0, 5.0])).unwrap();
        h1.fill_weighted(0.5, 2.0);
        h1.fill(10.0);
        file.insert("Ref1D_mutau_dau1_pt", StoredObject::Hist1D(h1));

        let bins = Binning::Uniform { nbins: 3, low: 0.0, high: 3.0 };
        let mut h2 = Hist2D::new(&bins, &Binning::Uniform { nbins: 2, low: 0.0, high: 1.0 }).unwrap();
        h2.fill_weighted(2.5, 0.2, 1.5);
        file.insert("Ref2D_mutau_a_VS_b", StoredObject::Hist2D(h2));

        let point = GraphPoint { x: 1.0, ex_low: 0.5, ex_high: 0.5, y: 0.3, ey_low: 0.1, ey_high: 0.2 };
        file.insert("EffData1D", StoredObject::Graph(EfficiencyGraph { points: vec![point] }));
        file.insert(
            "SF1D",
            StoredObject::ScaleFactors(ScaleFactorGraph {
                points: vec![ScaleFactorPoint { point, status: PointStatus::UndefinedRatio }],
            }),
        );
        file.insert(
            "SigmoidFuncData",
            StoredObject::Sigmoid(FitResult {
                params: SigmoidParams::DATA_START,
                range: FitRange { low: 0.0, high: 400.0 },
                chi2: 3.5,
                ndf: 12,
                converged: true,
            }),
        );
        file
    }

    #[test]
    fn test_write_then_read_preserves_objects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("hist_MET_1.hist");
        let file = sample_file();
        file.write(&path).unwrap();
        let back = HistFile::read(&path).unwrap();
        assert_eq!(back, file);
        assert_eq!(back.get_hist1d("Ref1D_mutau_dau1_pt").unwrap().content(3), 1.0);
        assert!(matches!(
            back.get_graph("SF1D"),
            Err(HistFileError::WrongType { .. })
        ));
        assert!(matches!(
            back.get("missing"),
            Err(HistFileError::MissingObject(_))
        ));
    }

    /// Header and a single object named `a` with the given tag, without payload
    fn object_header(tag: u8) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.write_u16::<LittleEndian>(FORMAT_VERSION).unwrap();
        bytes.write_i64::<LittleEndian>(0).unwrap();
        bytes.write_u32::<LittleEndian>(1).unwrap();
        bytes.write_u16::<LittleEndian>(1).unwrap();
        bytes.push(b'a');
        bytes.push(tag);
        bytes
    }

    #[test]
    fn test_corrupt_counts_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.hist");
        for tag in [TAG_HIST1D, TAG_GRAPH, TAG_SCALE_FACTORS] {
            let mut bytes = object_header(tag);
            bytes.write_u32::<LittleEndian>(u32::MAX).unwrap();
            std::fs::write(&path, &bytes).unwrap();
            assert!(matches!(
                HistFile::read(&path),
                Err(HistFileError::CountTooLarge { count, remaining: 0 }) if count == u32::MAX as u64
            ));
        }

        // Two plausible axes whose product exceeds the file
        let mut bytes = object_header(TAG_HIST2D);
        for _ in 0..2 {
            bytes.write_u32::<LittleEndian>(3).unwrap();
            for edge in [0.0, 1.0, 2.0] {
                bytes.write_f64::<LittleEndian>(edge).unwrap();
            }
        }
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            HistFile::read(&path),
            Err(HistFileError::CountTooLarge { .. })
        ));
    }

    #[test]
    fn test_unknown_status_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.hist");
        let mut bytes = object_header(TAG_SCALE_FACTORS);
        bytes.write_u32::<LittleEndian>(1).unwrap();
        for v in [1.0, 0.5, 0.5, 1.0, 0.1, 0.1] {
            bytes.write_f64::<LittleEndian>(v).unwrap();
        }
        bytes.push(7);
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(HistFile::read(&path), Err(HistFileError::UnknownStatus(7))));

        let n = bytes.len();
        bytes[n - 1] = STATUS_UNDEFINED_RATIO;
        std::fs::write(&path, &bytes).unwrap();
        let file = HistFile::read(&path).unwrap();
        match file.get("a").unwrap() {
            StoredObject::ScaleFactors(sf) => assert_eq!(sf.points[0].status, PointStatus::UndefinedRatio),
            other => panic!("expected scale factors, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.hist");
        std::fs::write(&path, b"ROOT....").unwrap();
        assert!(matches!(HistFile::read(&path), Err(HistFileError::BadMagic)));

        let good = dir.path().join("good.hist");
        sample_file().write(&good).unwrap();
        let bytes = std::fs::read(&good).unwrap();
        let truncated = dir.path().join("truncated.hist");
        std::fs::write(&truncated, &bytes[..bytes.len() - 10]).unwrap();
        assert!(matches!(HistFile::read(&truncated), Err(HistFileError::IOError(_))));

        let mut wrong_version = bytes.clone();
        wrong_version[4] = 99;
        std::fs::write(&truncated, &wrong_version).unwrap();
        assert!(matches!(
            HistFile::read(&truncated),
            Err(HistFileError::UnsupportedVersion(99))
        ));
    }
}
