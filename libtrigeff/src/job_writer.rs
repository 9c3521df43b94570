//! Writing of HTCondor job files.
//!
//! Every job is a shell script wrapping one `trigeff` invocation plus a submit file queueing the
//! script once per item (input file or trigger combination). Jobs are only written here;
//! submitting them is left to the user.
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::config::Config;
use super::dataset::Sample;
use super::error::JobWriterError;
use super::producer::ProductionMode;

const T3_INCLUDE: &str = "include : /opt/exp_soft/cms/t3/t3queue |";

/// The batch system the submit files are written for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Machine {
    #[default]
    Llrt3condor,
    Lxplus,
}

/// Batch settings of a Config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    pub machine: Machine,
    /// T3 queue on llrt3condor, job flavour on lxplus
    pub queue: String,
    /// Where the `jobs/` tree is written
    pub local_dir: PathBuf,
    /// Directory the jobs `cd` into before running
    pub work_dir: PathBuf,
    pub executable: String,
    pub proxy: String,
    pub setup_lines: Vec<String>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            machine: Machine::Llrt3condor,
            queue: String::from("short"),
            local_dir: PathBuf::from("."),
            work_dir: PathBuf::from("None"),
            executable: String::from("trigeff"),
            proxy: String::from("~/.t3/proxy.cert"),
            setup_lines: vec![String::from("source /cvmfs/cms.cern.ch/cmsset_default.sh")],
        }
    }
}

/// Locations of the files belonging to one job
#[derive(Debug, Clone, PartialEq)]
pub struct JobPaths {
    pub shell: PathBuf,
    pub submit: PathBuf,
    pub outputs: PathBuf,
}

/// `{local}/jobs/{tag}/submission/job_{name}.sh|.condor` and `{local}/jobs/{tag}/outputs/{name}`
pub fn define_output(local_dir: &Path, tag: &str, name: &str) -> JobPaths {
    let base = local_dir.join("jobs").join(tag);
    let submission = base.join("submission");
    JobPaths {
        shell: submission.join(format!("job_{name}.sh")),
        submit: submission.join(format!("job_{name}.condor")),
        outputs: base.join("outputs").join(name),
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), std::io::Error> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o700);
    std::fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), std::io::Error> {
    Ok(())
}

/// Single-quote `word` for bash. A leading `~/` stays outside the quotes so it still expands.
pub fn shell_quote(word: &str) -> String {
    let (home, rest) = match word.strip_prefix("~/") {
        Some(rest) => ("~/", rest),
        None => ("", word),
    };
    format!("{home}'{}'", rest.replace('\'', "'\\''"))
}

/// Write the shell wrapper around `command`. The queued item reaches the command as `${1}`.
pub fn write_shell_script(
    path: &Path,
    batch: &BatchConfig,
    command: &str,
    name: &str,
) -> Result<(), JobWriterError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "#!/bin/bash")?;
    writeln!(out, "export X509_USER_PROXY={}", shell_quote(&batch.proxy))?;
    writeln!(out, "export EXTRA_CLING_ARGS=-O2")?;
    for line in batch.setup_lines.iter() {
        writeln!(out, "{line}")?;
    }
    writeln!(
        out,
        "cd {}",
        shell_quote(&batch.work_dir.display().to_string())
    )?;
    writeln!(out, "{command}")?;
    writeln!(out, "echo \"Process {name} done.\"")?;
    out.flush()?;
    drop(out);
    make_executable(path)?;
    Ok(())
}

/// Write the submit file queueing the script once per item
pub fn write_submit_file(
    paths: &JobPaths,
    batch: &BatchConfig,
    queue_var: &str,
    items: &[String],
) -> Result<(), JobWriterError> {
    if items.is_empty() {
        return Err(JobWriterError::EmptyQueue(paths.submit.display().to_string()));
    }
    if let Some(parent) = paths.submit.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::create_dir_all(&paths.outputs)?;

    let log_stem = paths.outputs.join("Cluster$(Cluster)_Process$(Process)");
    let mut out = BufWriter::new(File::create(&paths.submit)?);
    writeln!(out, "Universe = vanilla")?;
    writeln!(out, "Executable = {}", paths.shell.display())?;
    writeln!(out, "Arguments = $({queue_var})")?;
    writeln!(out, "input = /dev/null")?;
    writeln!(out, "output = {}.o", log_stem.display())?;
    writeln!(out, "error  = {}.e", log_stem.display())?;
    writeln!(out, "getenv = true")?;
    match batch.machine {
        Machine::Llrt3condor => {
            writeln!(out, "T3Queue = {}", batch.queue)?;
            writeln!(out, "WNTag=el7")?;
            writeln!(out, "+SingularityCmd = \"\"")?;
            writeln!(out, "{T3_INCLUDE}")?;
        }
        Machine::Lxplus => {
            writeln!(out, "+JobFlavour = \"{}\"", batch.queue)?;
        }
    }
    writeln!(out)?;
    writeln!(out, "queue {queue_var} from (")?;
    for item in items.iter() {
        writeln!(out, "  {item}")?;
    }
    writeln!(out, ")")?;
    out.flush()?;
    Ok(())
}

fn sample_job(
    config: &Config,
    config_path: &Path,
    sample: &Sample,
    mode: ProductionMode,
) -> Result<JobPaths, JobWriterError> {
    let files: Vec<String> = config
        .get_sample_files(sample)?
        .iter()
        .map(|f| f.display().to_string())
        .collect();
    let (subcommand, job_name) = match mode {
        ProductionMode::Histograms => ("histos", sample.name.clone()),
        ProductionMode::Counts => ("counts", format!("{}_counts", sample.name)),
    };
    let command = format!(
        "{} -p {} {} --sample {} --file \"${{1}}\"",
        config.batch.executable,
        shell_quote(&config_path.display().to_string()),
        subcommand,
        sample.name
    );
    let paths = define_output(&config.batch.local_dir, &config.tag, &job_name);
    write_shell_script(&paths.shell, &config.batch, &command, &job_name)?;
    write_submit_file(&paths, &config.batch, "filename", &files)?;
    log::info!(
        "Wrote job for sample {} ({} files) to {}",
        sample.name,
        files.len(),
        paths.submit.display()
    );
    Ok(paths)
}

/// One job per sample, queueing every input file of the sample
pub fn write_histogram_jobs(
    config: &Config,
    config_path: &Path,
    mode: ProductionMode,
) -> Result<Vec<JobPaths>, JobWriterError> {
    config
        .samples()
        .iter()
        .map(|sample| sample_job(config, config_path, sample, mode))
        .collect()
}

/// One job queueing every trigger combination of the efficiency step
pub fn write_eff_jobs(config: &Config, config_path: &Path) -> Result<JobPaths, JobWriterError> {
    let combinations: Vec<String> = config
        .all_combinations()?
        .iter()
        .map(|c| c.join(&config.intersection_str))
        .collect();
    let name = "EffAndSF";
    let command = format!(
        "{} -p {} eff --combination \"${{1}}\"",
        config.batch.executable,
        shell_quote(&config_path.display().to_string())
    );
    let paths = define_output(&config.batch.local_dir, &config.tag, name);
    write_shell_script(&paths.shell, &config.batch, &command, name)?;
    write_submit_file(&paths, &config.batch, "triggercomb", &combinations)?;
    log::info!(
        "Wrote efficiency job ({} combinations) to {}",
        combinations.len(),
        paths.submit.display()
    );
    Ok(paths)
}
