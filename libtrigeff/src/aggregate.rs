//! Merge the per-combination result files of each channel into one file per channel.
//!
//! Graphs become histograms so that downstream consumers can look efficiencies up by bin.
//! Objects are renamed `{name}_VAR_{variable}_TRG_{combination}_CUT_{cut}`.
use std::path::{Path, PathBuf};

use super::config::Config;
use super::dataset::Channel;
use super::eff_sf::RESULT_OBJECTS;
use super::efficiency::EfficiencyGraph;
use super::error::AggregateError;
use super::hist_file::{HistFile, StoredObject};
use super::histogram::{Axis, Hist1D};
use super::naming::{aggregated_name, CUTS_MARKER, HIST_EXTENSION, TRG_MARKER};

/// Convert a graph to a histogram. Bin edges sit halfway between neighbouring points and are
/// extrapolated by half a spacing at both ends. The bin error is the sum of both y errors.
pub fn graph_to_hist(name: &str, graph: &EfficiencyGraph) -> Result<Hist1D, AggregateError> {
    let points = &graph.points;
    let edges: Vec<f64> = match points.len() {
        0 => return Err(AggregateError::EmptyGraph(name.to_string())),
        1 => vec![points[0].x - points[0].ex_low, points[0].x + points[0].ex_high],
        n => {
            let mut edges = Vec::with_capacity(n + 1);
            edges.push(points[0].x - 0.5 * (points[1].x - points[0].x));
            for pair in points.windows(2) {
                edges.push(0.5 * (pair[0].x + pair[1].x));
            }
            edges.push(points[n - 1].x + 0.5 * (points[n - 1].x - points[n - 2].x));
            edges
        }
    };
    let axis = Axis::from_edges(edges)?;

    let mut sumw = vec![0.0; points.len() + 2];
    let mut sumw2 = vec![0.0; points.len() + 2];
    for (idx, p) in points.iter().enumerate() {
        sumw[idx + 1] = p.y;
        sumw2[idx + 1] = (p.ey_low + p.ey_high).powi(2);
    }
    Ok(Hist1D::from_parts(axis, sumw, sumw2)?)
}

/// The (variable, combination, cut) of a result file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultName {
    pub variable: String,
    pub combination: String,
    pub cut: String,
}

/// Match `{prefix}{data}_{mc}_{channel}_{var}_TRG_{comb}_CUTS_{cut}{subtag}.hist`
pub fn parse_result_name(
    path: &Path,
    config: &Config,
    channel: Channel,
) -> Result<ResultName, AggregateError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| AggregateError::UnmatchedFile(path.to_path_buf()))?;
    let head = format!(
        "{}{}_{}_{}_",
        config.sf_prefix,
        config.data_name(),
        config.mc_name(),
        channel
    );
    let tail = format!("{}.{}", config.subtag, HIST_EXTENSION);
    let body = file_name
        .strip_prefix(&head)
        .and_then(|rest| rest.strip_suffix(&tail))
        .ok_or_else(|| AggregateError::UnmatchedFile(path.to_path_buf()))?;

    if body.matches(TRG_MARKER).count() != 1 || body.matches(CUTS_MARKER).count() != 1 {
        return Err(if body.contains(TRG_MARKER) && body.contains(CUTS_MARKER) {
            AggregateError::AmbiguousMatch(path.to_path_buf())
        } else {
            AggregateError::UnmatchedFile(path.to_path_buf())
        });
    }
    let (variable, rest) = body
        .split_once(TRG_MARKER)
        .ok_or_else(|| AggregateError::UnmatchedFile(path.to_path_buf()))?;
    let (combination, cut) = rest
        .split_once(CUTS_MARKER)
        .ok_or_else(|| AggregateError::UnmatchedFile(path.to_path_buf()))?;
    if variable.is_empty() || combination.is_empty() || cut.is_empty() {
        return Err(AggregateError::UnmatchedFile(path.to_path_buf()));
    }
    Ok(ResultName {
        variable: variable.to_string(),
        combination: combination.to_string(),
        cut: cut.to_string(),
    })
}

/// Every `.hist` file below `dir`, sorted
fn collect_result_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), AggregateError> {
    for item in dir.read_dir()? {
        let path = item?.path();
        if path.is_dir() {
            collect_result_files(&path, files)?;
        } else if path.extension().is_some_and(|e| e == HIST_EXTENSION) {
            files.push(path);
        }
    }
    Ok(())
}

/// Merge the results of one channel
pub fn aggregate_channel(config: &Config, channel: Channel, channel_dir: &Path) -> Result<HistFile, AggregateError> {
    let mut files = Vec::new();
    collect_result_files(channel_dir, &mut files)?;
    files.sort();

    let mut merged = HistFile::new();
    for path in files.iter() {
        let result = parse_result_name(path, config, channel)?;
        let file = HistFile::read(path)?;
        for (name, object) in file.iter() {
            if !RESULT_OBJECTS.contains(&name.as_str()) {
                return Err(AggregateError::UnexpectedObject {
                    name: name.clone(),
                    file: path.clone(),
                });
            }
            let new_name = aggregated_name(name, &result.variable, &result.combination, &result.cut);
            if merged.contains(&new_name) {
                return Err(AggregateError::DuplicateObject(new_name));
            }
            let converted = match object {
                StoredObject::Graph(graph) => StoredObject::Hist1D(graph_to_hist(&new_name, graph)?),
                StoredObject::ScaleFactors(sf) => {
                    StoredObject::Hist1D(graph_to_hist(&new_name, &sf.as_graph())?)
                }
                other => other.clone(),
            };
            merged.insert(&new_name, converted);
        }
    }
    log::info!(
        "Aggregated {} objects from {} files for channel {}",
        merged.len(),
        files.len(),
        channel
    );
    Ok(merged)
}

/// Path of the aggregated file of a channel
pub fn aggregated_path(config: &Config, channel: Channel) -> PathBuf {
    config.get_aggregate_directory().join(format!(
        "{}{}{}.{}",
        config.sf_prefix, channel, config.subtag, HIST_EXTENSION
    ))
}

/// Aggregate every configured channel. Channels without results are skipped with a warning.
pub fn aggregate(config: &Config) -> Result<Vec<PathBuf>, AggregateError> {
    let results_dir = config.get_results_directory();
    if !results_dir.exists() {
        return Err(AggregateError::BadFilePath(results_dir));
    }
    let mut written = Vec::new();
    for channel in config.channels.iter() {
        let channel_dir = results_dir.join(channel.as_str());
        if !channel_dir.exists() {
            log::warn!("No results for channel {channel}, skipping");
            continue;
        }
        let merged = aggregate_channel(config, *channel, &channel_dir)?;
        let output = aggregated_path(config, *channel);
        merged.write(&output)?;
        written.push(output);
    }
    Ok(written)
}
