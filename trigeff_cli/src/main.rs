use clap::{Arg, ArgAction, ArgMatches, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::collections::HashMap;
use std::error::Error;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use libtrigeff::aggregate::aggregate;
use libtrigeff::config::Config;
use libtrigeff::dataset::{Channel, SampleKind, Year};
use libtrigeff::eff_sf::run_eff_sf;
use libtrigeff::job_writer::{write_eff_jobs, write_histogram_jobs};
use libtrigeff::process::{collect_jobs, create_subsets, find_file_job, hadd, process_subset, FileJob};
use libtrigeff::producer::ProductionMode;
use libtrigeff::union::UnionWeightCalculator;
use libtrigeff::worker_status::WorkerStatus;

const LOG_FILE: &str = "trigeff.log";

type CliResult = Result<(), Box<dyn Error>>;

fn make_template_config(path: &Path) -> CliResult {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config)?;
    let mut file = File::create(path)?;
    file.write_all(yaml_str.as_bytes())?;
    Ok(())
}

fn comma_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn build_cli() -> Command {
    let sample_file_args = [
        Arg::new("sample")
            .long("sample")
            .required(true)
            .help("Name of the sample the file belongs to"),
        Arg::new("file")
            .long("file")
            .required(true)
            .help("Input ntuple, by path or by file name"),
    ];
    Command::new("trigeff")
        .about("Trigger efficiencies and scale factors from flat ntuples")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .subcommand(Command::new("combinations").about("List the trigger combinations of every channel"))
        .subcommand(
            Command::new("submit")
                .about("Write the HTCondor jobs filling histograms, one per sample")
                .arg(
                    Arg::new("counts")
                        .long("counts")
                        .action(ArgAction::SetTrue)
                        .help("Write jobs producing event counts instead of histograms"),
                ),
        )
        .subcommand(Command::new("submit-eff").about("Write the HTCondor job of the efficiency step"))
        .subcommand(
            Command::new("histos")
                .about("Fill the histograms of a single input file")
                .args(sample_file_args.clone()),
        )
        .subcommand(
            Command::new("counts")
                .about("Count the events of a single input file")
                .args(sample_file_args),
        )
        .subcommand(
            Command::new("run")
                .about("Process every input file locally with n_threads workers")
                .arg(
                    Arg::new("counts")
                        .long("counts")
                        .action(ArgAction::SetTrue)
                        .help("Produce event counts instead of histograms"),
                ),
        )
        .subcommand(Command::new("hadd").about("Sum the per-file histograms of data and of MC"))
        .subcommand(
            Command::new("eff")
                .about("Efficiencies, scale factors and fits of one trigger combination")
                .arg(
                    Arg::new("combination")
                        .long("combination")
                        .required(true)
                        .help("Combination name, e.g. IsoMu24_PLUS_METNoMu120"),
                )
                .arg(
                    Arg::new("no-plots")
                        .long("no-plots")
                        .action(ArgAction::SetTrue)
                        .help("Skip drawing the plots"),
                ),
        )
        .subcommand(Command::new("aggregate").about("Merge the results of each channel into one file"))
        .subcommand(
            Command::new("union")
                .about("Per-event weights for the OR of several triggers")
                .arg(Arg::new("channel").long("channel").required(true))
                .arg(
                    Arg::new("triggers")
                        .long("triggers")
                        .required(true)
                        .help("Comma separated list of triggers"),
                )
                .arg(Arg::new("input").long("input").required(true).help("Input ntuple"))
                .arg(Arg::new("output").long("output").required(true).help("Output csv file")),
        )
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .global(true)
                .help("Path to the configuration file"),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Log debug messages"),
        )
        .arg(Arg::new("year").long("year").global(true).help("Override the data-taking year"))
        .arg(Arg::new("tag").long("tag").global(true).help("Override the output tag"))
        .arg(Arg::new("subtag").long("subtag").global(true).help("Override the output subtag"))
        .arg(
            Arg::new("channels")
                .long("channels")
                .global(true)
                .help("Override the channels, comma separated"),
        )
        .arg(
            Arg::new("variables")
                .long("variables")
                .global(true)
                .help("Override the variables, comma separated"),
        )
        .arg(Arg::new("input-path").long("input-path").global(true).help("Override the input directory"))
        .arg(
            Arg::new("output-path")
                .long("output-path")
                .global(true)
                .help("Override the output directory"),
        )
}

/// Terminal logger plus a log file, routed through the progress bar manager
fn init_logging(pb_manager: &MultiProgress, level: simplelog::LevelFilter) {
    let term = simplelog::TermLogger::new(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );
    let result = match File::create(LOG_FILE) {
        Ok(file) => {
            let loggers: Vec<Box<dyn simplelog::SharedLogger>> = vec![
                term,
                simplelog::WriteLogger::new(level, simplelog::Config::default(), file),
            ];
            LogWrapper::new(pb_manager.clone(), simplelog::CombinedLogger::new(loggers)).try_init()
        }
        Err(e) => {
            eprintln!("Could not create log file {LOG_FILE}: {e}");
            LogWrapper::new(pb_manager.clone(), term).try_init()
        }
    };
    if let Err(e) = result {
        eprintln!("Could not create logging/progress: {e}");
    }
}

fn apply_overrides(config: &mut Config, matches: &ArgMatches) -> CliResult {
    if let Some(year) = matches.get_one::<String>("year") {
        config.year = Year::from_str(year)?;
    }
    if let Some(tag) = matches.get_one::<String>("tag") {
        config.tag = tag.clone();
    }
    if let Some(subtag) = matches.get_one::<String>("subtag") {
        config.subtag = subtag.clone();
    }
    if let Some(channels) = matches.get_one::<String>("channels") {
        config.channels = comma_list(channels)
            .iter()
            .map(|c| Channel::from_str(c))
            .collect::<Result<Vec<Channel>, _>>()?;
    }
    if let Some(variables) = matches.get_one::<String>("variables") {
        config.variables = comma_list(variables);
    }
    if let Some(input) = matches.get_one::<String>("input-path") {
        config.input_path = PathBuf::from(input);
    }
    if let Some(output) = matches.get_one::<String>("output-path") {
        config.output_path = PathBuf::from(output);
    }
    Ok(())
}

fn bar_style(color: &str) -> ProgressStyle {
    let template = format!("{{prefix:>10}} [{{bar:40.{color}/blue}}] {{percent:>3}}% {{msg}}");
    match ProgressStyle::with_template(&template) {
        Ok(style) => style.progress_chars("=> "),
        Err(_) => ProgressStyle::default_bar(),
    }
}

/// Spawn one worker per non-empty subset and follow their progress until all are done
fn run_workers(config: &Config, subsets: Vec<Vec<FileJob>>, mode: ProductionMode, pb_manager: &MultiProgress) -> CliResult {
    let (tx, rx) = std::sync::mpsc::channel::<WorkerStatus>();
    let mut handles = Vec::new();
    let mut bars: HashMap<usize, ProgressBar> = HashMap::new();

    for (idx, subset) in subsets.into_iter().enumerate() {
        if subset.is_empty() {
            continue;
        }
        let conf = config.clone();
        let worker_tx = tx.clone();
        let bar = pb_manager.add(ProgressBar::new(100));
        bar.set_style(bar_style("cyan"));
        bar.set_prefix(format!("Worker {idx}"));
        bars.insert(idx, bar);
        log::info!("Starting worker {} with {} files", idx, subset.len());
        handles.push((
            idx,
            std::thread::spawn(move || process_subset(conf, worker_tx, idx, subset, mode)),
        ));
    }
    drop(tx);

    let mut n_failed = 0;
    loop {
        std::thread::sleep(std::time::Duration::from_millis(200));
        for status in rx.try_iter() {
            if let Some(bar) = bars.get(&status.worker_id) {
                bar.set_style(bar_style(status.color.as_str()));
                bar.set_message(status.task.clone());
                bar.set_position((status.progress * 100.0) as u64);
            }
        }

        let (finished, running): (Vec<_>, Vec<_>) = handles.into_iter().partition(|(_, h)| h.is_finished());
        handles = running;
        for (idx, handle) in finished {
            match handle.join() {
                Ok(Ok(())) => log::info!("Worker {idx} finished"),
                Ok(Err(e)) => {
                    log::error!("Worker {idx} failed with error: {e}");
                    n_failed += 1;
                }
                Err(_) => {
                    log::error!("Failed to join worker {idx}");
                    n_failed += 1;
                }
            }
            if let Some(bar) = bars.get(&idx) {
                bar.finish();
            }
        }
        if handles.is_empty() {
            break;
        }
    }

    if n_failed > 0 {
        return Err(format!("{n_failed} worker(s) failed").into());
    }
    Ok(())
}

fn run_single_file(config: &Config, matches: &ArgMatches, mode: ProductionMode, pb_manager: &MultiProgress) -> CliResult {
    let sample = matches
        .get_one::<String>("sample")
        .ok_or("A sample name is required")?;
    let file = matches.get_one::<String>("file").ok_or("A file is required")?;
    let job = find_file_job(config, sample, Path::new(file))?;
    run_workers(config, vec![vec![job]], mode, pb_manager)
}

fn run_union(config: &Config, matches: &ArgMatches) -> CliResult {
    let channel = Channel::from_str(matches.get_one::<String>("channel").ok_or("A channel is required")?)?;
    let triggers = comma_list(matches.get_one::<String>("triggers").ok_or("Triggers are required")?);
    let input = PathBuf::from(matches.get_one::<String>("input").ok_or("An input is required")?);
    let output = PathBuf::from(matches.get_one::<String>("output").ok_or("An output is required")?);
    log::info!("Computing union weights of {} in channel {}", triggers.join(", "), channel);
    let calculator = UnionWeightCalculator::new(config, channel, &triggers)?;
    let n_weighted = calculator.process_ntuple(&input, &output)?;
    log::info!("Wrote {} weights to {}", n_weighted, output.display());
    Ok(())
}

fn dispatch(config: &Config, config_path: &Path, matches: &ArgMatches, pb_manager: &MultiProgress) -> CliResult {
    let counts_mode = |m: &ArgMatches| {
        if m.get_flag("counts") {
            ProductionMode::Counts
        } else {
            ProductionMode::Histograms
        }
    };

    match matches.subcommand() {
        Some(("combinations", _)) => {
            for channel in config.channels.iter() {
                let combinations = config.combinations(*channel)?;
                log::info!("Channel {} has {} combinations:", channel, combinations.len());
                for comb in combinations.iter() {
                    log::info!("  {}", comb.join(&config.intersection_str));
                }
            }
        }
        Some(("submit", sub)) => {
            let jobs = write_histogram_jobs(config, config_path, counts_mode(sub))?;
            log::info!("Wrote {} jobs. Submit them with condor_submit.", jobs.len());
        }
        Some(("submit-eff", _)) => {
            let job = write_eff_jobs(config, config_path)?;
            log::info!("Wrote {}. Submit it with condor_submit.", job.submit.display());
        }
        Some(("histos", sub)) => run_single_file(config, sub, ProductionMode::Histograms, pb_manager)?,
        Some(("counts", sub)) => run_single_file(config, sub, ProductionMode::Counts, pb_manager)?,
        Some(("run", sub)) => {
            let jobs = collect_jobs(config)?;
            log::info!("Found {} input files", jobs.len());
            let subsets = create_subsets(config, jobs);
            run_workers(config, subsets, counts_mode(sub), pb_manager)?;
        }
        Some(("hadd", _)) => {
            for kind in [SampleKind::Data, SampleKind::Mc] {
                let output = hadd(config, kind)?;
                log::info!("Summed {} histograms into {}", kind, output.display());
            }
        }
        Some(("eff", sub)) => {
            let combination = sub
                .get_one::<String>("combination")
                .ok_or("A combination is required")?;
            let summary = run_eff_sf(config, combination, !sub.get_flag("no-plots"))?;
            for channel in summary.skipped.iter() {
                log::warn!("Combination {combination} skipped in channel {channel}");
            }
            log::info!("Wrote {} files for {}", summary.written.len(), combination);
        }
        Some(("aggregate", _)) => {
            for path in aggregate(config)? {
                log::info!("Wrote {}", path.display());
            }
        }
        Some(("union", sub)) => run_union(config, sub)?,
        _ => return Err("Unrecognized command".into()),
    }
    Ok(())
}

fn main() {
    // Create a cli
    let matches = build_cli().get_matches();

    // Initialize feedback
    let level = if matches.get_flag("debug") {
        simplelog::LevelFilter::Debug
    } else {
        simplelog::LevelFilter::Info
    };
    let pb_manager = MultiProgress::new();
    init_logging(&pb_manager, level);

    // Parse the cli
    let config_path = match matches.get_one::<String>("path") {
        Some(p) => PathBuf::from(p),
        None => {
            log::error!("A configuration path is required (-p/--path)");
            return;
        }
    };

    if let Some(("new", _)) = matches.subcommand() {
        log::info!("Making a template config at {}...", config_path.to_string_lossy());
        match make_template_config(&config_path) {
            Ok(()) => log::info!("Done."),
            Err(e) => log::error!("Could not write template config: {e}"),
        }
        return;
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let mut config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    if let Err(e) = apply_overrides(&mut config, &matches) {
        log::error!("{e}");
        return;
    }
    if let Err(e) = config.validate() {
        log::error!("{e}");
        return;
    }
    log::info!("Config successfully loaded.");
    log::info!("Year: {}", config.year);
    log::info!("Input Path: {}", config.input_path.to_string_lossy());
    log::info!("Output Path: {}", config.get_histo_directory().to_string_lossy());
    log::debug!("Channels: {:?}", config.channels);
    log::debug!("Variables: {:?}", config.variables);
    log::debug!("Triggers: {:?}", config.triggers);

    match dispatch(&config, &config_path, &matches, &pb_manager) {
        Ok(()) => log::info!("Done."),
        Err(e) => log::error!("Failed with error: {e}"),
    }
}
