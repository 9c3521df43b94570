use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

use super::config::Config;
use super::dataset::{Sample, SampleKind};
use super::error::{ConfigError, ProcessorError};
use super::hist_file::{HistFile, StoredObject};
use super::naming::{counts_output, file_number, histo_output, summed_output, HIST_EXTENSION};
use super::ntuple::{Event, NtupleFile};
use super::producer::{CountsProducer, HistogramProducer, ProductionMode};
use super::trigger_map::TriggerMap;
use super::worker_status::{BarColor, WorkerStatus};

/// One input file of a sample
#[derive(Debug, Clone)]
pub struct FileJob {
    pub sample: Sample,
    pub path: PathBuf,
}

impl FileJob {
    /// Label shown on progress bars, e.g. `TT/output_3.txt`
    pub fn label(&self) -> String {
        let file = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        format!("{}/{}", self.sample.name, file)
    }
}

/// Stream every event of the ntuple into `fill`, reporting progress by bytes read
fn stream_events<F>(
    ntuple: &mut NtupleFile,
    tx: &Sender<WorkerStatus>,
    task: &str,
    worker_id: &usize,
    color: BarColor,
    mut fill: F,
) -> Result<u64, ProcessorError>
where
    F: FnMut(&Event) -> Result<(), ProcessorError>,
{
    let total_data_size = ntuple.get_size_bytes();
    let flush_frac: f32 = 0.01;
    let flush_val = (total_data_size as f64 * flush_frac as f64) as u64;
    let mut last_flush = 0;
    let mut n_events = 0;

    tx.send(WorkerStatus::new(0.0, task, *worker_id, color.clone()))?;
    while let Some(event) = ntuple.get_next_event()? {
        fill(&event)?;
        n_events += 1;
        let read = ntuple.get_bytes_read();
        if read - last_flush > flush_val {
            last_flush = read;
            tx.send(WorkerStatus::new(
                read as f32 / total_data_size as f32,
                task,
                *worker_id,
                color.clone(),
            ))?;
        }
    }
    tx.send(WorkerStatus::new(1.0, task, *worker_id, BarColor::GREEN))?;
    Ok(n_events)
}

/// Fill the histograms (or counts) of a single input file and write them.
/// Returns the path of the written output.
pub fn process_file(
    config: &Config,
    map: &TriggerMap,
    job: &FileJob,
    mode: ProductionMode,
    tx: &Sender<WorkerStatus>,
    worker_id: &usize,
) -> Result<PathBuf, ProcessorError> {
    let mut ntuple = NtupleFile::new(&job.path)?;
    log::info!(
        "Processing {} with size {}",
        job.label(),
        human_bytes::human_bytes(ntuple.get_size_bytes() as f64)
    );
    let task = job.label();
    let number = file_number(&job.path);
    let histo_dir = config.get_histo_directory();

    let output = match mode {
        ProductionMode::Histograms => {
            let mut producer = HistogramProducer::new(config, map, job.sample.kind)?;
            let n_events = stream_events(&mut ntuple, tx, &task, worker_id, BarColor::CYAN, |evt| {
                producer.fill(evt)
            })?;
            let output = histo_output(
                &histo_dir,
                &config.histo_prefix,
                &job.sample.name,
                &number,
                &config.subtag,
            );
            let file = producer.finish();
            file.write(&output)?;
            log::info!("Wrote {} histograms from {} events to {}", file.len(), n_events, output.display());
            output
        }
        ProductionMode::Counts => {
            let mut producer = CountsProducer::new(config, map, job.sample.kind)?;
            let n_events = stream_events(&mut ntuple, tx, &task, worker_id, BarColor::MAGENTA, |evt| {
                producer.fill(evt)
            })?;
            let output = counts_output(
                &histo_dir,
                &config.counts_prefix,
                &job.sample.name,
                &number,
                &config.subtag,
            );
            producer.write_csv(&output)?;
            log::info!("Wrote counts from {} events to {}", n_events, output.display());
            output
        }
    };
    Ok(output)
}

/// Find the input file of a sample by path or by file name, as passed by batch jobs
pub fn find_file_job(config: &Config, sample_name: &str, file: &Path) -> Result<FileJob, ConfigError> {
    let sample = config.find_sample(sample_name)?;
    if file.is_absolute() && file.exists() {
        return Ok(FileJob {
            sample,
            path: file.to_path_buf(),
        });
    }
    let found = config
        .get_sample_files(&sample)?
        .into_iter()
        .find(|p| p.file_name() == file.file_name() || p.ends_with(file));
    match found {
        Some(path) => Ok(FileJob { sample, path }),
        None => Err(ConfigError::BadFilePath(file.to_path_buf())),
    }
}

/// Every input file of every sample
pub fn collect_jobs(config: &Config) -> Result<Vec<FileJob>, ConfigError> {
    let mut jobs = Vec::new();
    for sample in config.samples() {
        for path in config.get_sample_files(&sample)? {
            jobs.push(FileJob {
                sample: sample.clone(),
                path,
            });
        }
    }
    Ok(jobs)
}

/// Process a subset of files
pub fn process_subset(
    config: Config,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
    subset: Vec<FileJob>,
    mode: ProductionMode,
) -> Result<(), ProcessorError> {
    let map = config.load_trigger_map()?;
    for job in subset {
        log::info!("Worker {} starting {}...", worker_id, job.label());
        process_file(&config, &map, &job, mode, &tx, &worker_id)?;
        log::info!("Worker {} finished {}.", worker_id, job.label());
    }
    Ok(())
}

/// Divide the files in to a set of subsets (per thread/worker)
pub fn create_subsets(config: &Config, jobs: Vec<FileJob>) -> Vec<Vec<FileJob>> {
    let mut subsets: Vec<Vec<FileJob>> = vec![Vec::new(); config.n_threads.max(1) as usize];
    let n_subsets = subsets.len();

    for (idx, job) in jobs.into_iter().enumerate() {
        subsets[idx % n_subsets].push(job)
    }

    subsets
}

/// Sum histogram files key by key. Objects other than histograms are skipped.
pub fn hadd_files(inputs: &[PathBuf], output: &Path) -> Result<HistFile, ProcessorError> {
    let mut summed = HistFile::new();
    for input in inputs {
        let file = HistFile::read(input)?;
        for (name, object) in file.iter() {
            match (summed.contains(name), object) {
                (false, StoredObject::Hist1D(_)) | (false, StoredObject::Hist2D(_)) => {
                    summed.insert(name, object.clone());
                }
                (true, StoredObject::Hist1D(h)) => {
                    let mut acc = summed.get_hist1d(name)?.clone();
                    acc.add(h)?;
                    summed.insert(name, StoredObject::Hist1D(acc));
                }
                (true, StoredObject::Hist2D(h)) => {
                    let mut acc = summed.get_hist2d(name)?.clone();
                    acc.add(h)?;
                    summed.insert(name, StoredObject::Hist2D(acc));
                }
                (_, other) => {
                    log::warn!(
                        "Skipping {} {} of {} while summing",
                        other.type_name(),
                        name,
                        input.display()
                    );
                }
            }
        }
    }
    summed.write(output)?;
    Ok(summed)
}

/// Sum the per-file histograms of every sample of one kind into `{prefix}{name}_Sum{subtag}.hist`
pub fn hadd(config: &Config, kind: SampleKind) -> Result<PathBuf, ProcessorError> {
    let histo_dir = config.get_histo_directory();
    let suffix = format!("{}.{}", config.subtag, HIST_EXTENSION);
    let mut inputs: Vec<PathBuf> = Vec::new();
    for sample in config.samples().into_iter().filter(|s| s.kind == kind) {
        let dir = histo_dir.join(&sample.name);
        if !dir.exists() {
            log::warn!("No histogram directory for sample {}", sample.name);
            continue;
        }
        let stem = format!("{}{}", config.histo_prefix, sample.name);
        for item in dir.read_dir()? {
            let path = item?.path();
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if name.starts_with(&stem) && name.ends_with(&suffix) {
                inputs.push(path);
            }
        }
    }

    let name = config.summed_name(kind);
    if inputs.is_empty() {
        return Err(ProcessorError::NothingToSum(name));
    }
    inputs.sort();
    let output = summed_output(&histo_dir, &config.histo_prefix, &name, &config.subtag);
    log::info!("Summing {} files into {}", inputs.len(), output.display());
    hadd_files(&inputs, &output)?;
    Ok(output)
}
