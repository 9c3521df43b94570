use std::path::PathBuf;
use thiserror::Error;

use super::dataset::{Channel, Year};
use super::worker_status::WorkerStatus;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Found invalid channel keyword: {0}")]
    InvalidChannel(String),
    #[error("Found invalid year keyword: {0}; expected one of 2016, 2016APV, 2017, 2018")]
    InvalidYear(String),
}

#[derive(Debug, Error)]
pub enum TriggerMapError {
    #[error("TriggerMap failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("TriggerMap failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("TriggerMap has no table for year {0}")]
    UnknownYear(Year),
    #[error("Trigger {trigger} has no bit mapping for year {year}")]
    UnknownTrigger { trigger: String, year: Year },
    #[error("Trigger {trigger} uses bit {bit}, but the triggerbit field only has 64 bits")]
    BitOutOfRange { trigger: String, bit: u32 },
    #[error("Trigger {0} has an empty list of bits or sub-triggers")]
    EmptyDefinition(String),
}

#[derive(Debug, Error)]
pub enum CombinationError {
    #[error("A trigger combination needs at least one trigger")]
    Empty,
    #[error("Cannot enumerate combinations of {0} triggers; at most {max} are supported", max=super::combination::MAX_TRIGGERS)]
    TooManyTriggers(usize),
    #[error("Trigger {0} in a combination is not one of the configured triggers")]
    UnknownTrigger(String),
    #[error("Combination {combination} is not allowed in channel {channel}")]
    NotInChannel { combination: String, channel: Channel },
    #[error("Combination {0} appears more than once")]
    Duplicate(String),
}

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("Selection failed due to TriggerMap error: {0}")]
    MapError(#[from] TriggerMapError),
    #[error("Event is missing the field {0} required by the selection")]
    MissingField(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum HistogramError {
    #[error("Binning needs at least 2 edges, found {0}")]
    TooFewEdges(usize),
    #[error("Bin edges must be strictly increasing")]
    UnsortedEdges,
    #[error("Binning range is invalid -- low: {low} high: {high}")]
    BadRange { low: f64, high: f64 },
    #[error("Binning needs at least one bin")]
    ZeroBins,
    #[error("Histograms have mismatched binning")]
    BinningMismatch,
    #[error("Histogram storage does not match its binning -- expected {expected} cells, found {found}")]
    BadStorage { expected: usize, found: usize },
}

#[derive(Debug, Error)]
pub enum HistFileError {
    #[error("HistFile failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Could not open HistFile because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("File is not a trigeff histogram file (bad magic)")]
    BadMagic,
    #[error("HistFile format version {0} is not supported")]
    UnsupportedVersion(u16),
    #[error("HistFile contains an object with unknown type tag {0}")]
    UnknownTag(u8),
    #[error("HistFile contains a scale factor point with unknown status {0}")]
    UnknownStatus(u8),
    #[error("HistFile declares {count} items but only {remaining} bytes are left")]
    CountTooLarge { count: u64, remaining: u64 },
    #[error("HistFile contains an object name which is not valid UTF-8: {0}")]
    BadName(#[from] std::string::FromUtf8Error),
    #[error("Object name {0} is too long to be stored")]
    NameTooLong(String),
    #[error("HistFile has no object named {0}")]
    MissingObject(String),
    #[error("Object {name} is not a {expected}")]
    WrongType { name: String, expected: &'static str },
    #[error("HistFile contains a bad histogram: {0}")]
    HistogramError(#[from] HistogramError),
    #[error("HistFile contains a 2D histogram with a bad shape: {0}")]
    ShapeError(#[from] ndarray::ShapeError),
}

#[derive(Debug, Error)]
pub enum NtupleError {
    #[error("Could not open ntuple because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Ntuple failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Ntuple has no header line")]
    EmptyFile,
    #[error("Ntuple is missing the required column {0}")]
    MissingColumn(String),
    #[error("Ntuple line {line} has {found} values but the header has {expected} columns")]
    BadLine {
        line: usize,
        found: usize,
        expected: usize,
    },
    #[error("Ntuple line {line} has an invalid value {value:?} in column {column}")]
    BadValue {
        line: usize,
        column: String,
        value: String,
    },
}

#[derive(Debug, Error)]
pub enum EfficiencyError {
    #[error("Efficiency failed due to histogram error: {0}")]
    HistogramError(#[from] HistogramError),
    #[error("Bin {bin} has more passing ({pass}) than reference ({reference}) events")]
    PassExceedsReference { bin: usize, pass: f64, reference: f64 },
    #[error("Bin {bin} has a negative count")]
    NegativeCount { bin: usize },
    #[error("Confidence level {0} must lie in (0, 1)")]
    BadConfidenceLevel(f64),
    #[error("No confidence interval exists for {passed} passing out of {total}")]
    BadCounts { passed: f64, total: f64 },
    #[error("Data and MC graphs have different points -- data: {data} MC: {mc}")]
    PointMismatch { data: usize, mc: usize },
}

#[derive(Debug, Error)]
pub enum FitError {
    #[error("Sigmoid fit needs at least {min} points with nonzero error in range, found {0}", min=super::fit::MIN_FIT_POINTS)]
    NotEnoughPoints(usize),
    #[error("Sigmoid fit range is invalid -- low: {low} high: {high}")]
    BadRange { low: f64, high: f64 },
    #[error("Sigmoid fit failed in the minimizer: {0}")]
    Solver(String),
}

#[derive(Debug, Error)]
pub enum PlotError {
    #[error("Plot failed while drawing: {0}")]
    Drawing(String),
    #[error("Plot failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Plot {0} has nothing to draw")]
    NothingToDraw(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config failed due to TriggerMap error: {0}")]
    MapError(#[from] TriggerMapError),
    #[error("Config has an invalid binning: {0}")]
    BinningError(#[from] HistogramError),
    #[error("Config requested {0} threads; at least one is required")]
    InvalidThreads(i32),
    #[error("Config requested a confidence level of {0}; it must lie in (0, 1)")]
    InvalidConfidenceLevel(f64),
    #[error("Variable {0} has no binning")]
    MissingBinning(String),
    #[error("Variable {0} is not one of the configured variables")]
    UnknownVariable(String),
    #[error("Trigger {0} is not one of the configured triggers")]
    UnknownTrigger(String),
    #[error("Cuts on trigger {trigger} use variable {variable}, which has no column in the configured variables")]
    UnknownCutVariable { trigger: String, variable: String },
    #[error("Cuts on trigger {0} list no thresholds")]
    EmptyCut(String),
    #[error("cuts_ignored lists variable {0} against itself")]
    SelfIgnoredCut(String),
    #[error("Config has no data samples or no MC samples")]
    NoSamples,
    #[error("Config has no sample named {0}")]
    UnknownSample(String),
    #[error("Did not find any input files for sample {0}")]
    NoMatchingFiles(String),
}

#[derive(Debug, Error)]
pub enum JobWriterError {
    #[error("JobWriter failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("JobWriter failed due to configuration error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("JobWriter failed due to combination error: {0}")]
    CombinationError(#[from] CombinationError),
    #[error("JobWriter was given nothing to queue for job {0}")]
    EmptyQueue(String),
}

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("Aggregate failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Aggregate failed due to HistFile error: {0}")]
    HistFileError(#[from] HistFileError),
    #[error("Aggregate failed due to histogram error: {0}")]
    HistogramError(#[from] HistogramError),
    #[error("Aggregate directory {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("File {0:?} does not follow the result naming scheme")]
    UnmatchedFile(PathBuf),
    #[error("File name {0:?} matches the result naming scheme in more than one way")]
    AmbiguousMatch(PathBuf),
    #[error("Object {name} in {file:?} has an unexpected type")]
    UnexpectedObject { name: String, file: PathBuf },
    #[error("Graph {0} has no points")]
    EmptyGraph(String),
    #[error("Object {0} appears in more than one result file")]
    DuplicateObject(String),
}

#[derive(Debug, Error)]
pub enum UnionError {
    #[error("Union weights failed due to HistFile error: {0}")]
    HistFileError(#[from] HistFileError),
    #[error("Union weights failed due to combination error: {0}")]
    CombinationError(#[from] CombinationError),
    #[error("Union weights failed due to aggregate error: {0}")]
    AggregateError(#[from] AggregateError),
    #[error("Union weights failed due to ntuple error: {0}")]
    NtupleError(#[from] NtupleError),
    #[error("Union weights failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Efficiency table for {0} has mismatched bin edges and values")]
    BadTable(String),
    #[error("No efficiency table was loaded for combination {0}")]
    MissingCombination(String),
    #[error("No discriminating variable was configured for combination {0}")]
    MissingVariable(String),
    #[error("Value {value} of variable {variable} lies outside the efficiency binning")]
    OutOfRange { variable: String, value: f64 },
    #[error("Event has no value for variable {0}")]
    MissingField(String),
    #[error("MC union efficiency is zero; the event weight is undefined")]
    ZeroMcEfficiency,
}

#[derive(Debug, Error)]
pub enum EffSfError {
    #[error("Efficiency step failed due to HistFile error: {0}")]
    HistFileError(#[from] HistFileError),
    #[error("Efficiency step failed due to efficiency error: {0}")]
    EfficiencyError(#[from] EfficiencyError),
    #[error("Efficiency step failed due to histogram error: {0}")]
    HistogramError(#[from] HistogramError),
    #[error("Efficiency step failed due to plot error: {0}")]
    PlotError(#[from] PlotError),
    #[error("Efficiency step failed due to configuration error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Efficiency step failed due to combination error: {0}")]
    CombinationError(#[from] CombinationError),
    #[error("Efficiency step failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Data and MC histogram keys differ -- only in data: {only_data:?} only in MC: {only_mc:?}")]
    KeyMismatch {
        only_data: Vec<String>,
        only_mc: Vec<String>,
    },
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to TriggerMap error: {0}")]
    MapError(#[from] TriggerMapError),
    #[error("Processor failed due to combination error: {0}")]
    CombinationError(#[from] CombinationError),
    #[error("Processor failed due to selection error: {0}")]
    SelectionError(#[from] SelectionError),
    #[error("Processor failed due to histogram error: {0}")]
    HistogramError(#[from] HistogramError),
    #[error("Processor failed due to HistFile error: {0}")]
    HistFileError(#[from] HistFileError),
    #[error("Processor failed due to Ntuple error: {0}")]
    NtupleError(#[from] NtupleError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
    #[error("Processor failed due to IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Processor found no histogram files to sum for {0}")]
    NothingToSum(String),
}
