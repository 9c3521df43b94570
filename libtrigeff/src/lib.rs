//! # trigeff
//!
//! trigeff is a trigger-efficiency toolkit for collider analyses, written in Rust. It takes flat
//! ntuples of reconstructed events (one row per event, carrying a `triggerbit` mask), fills
//! reference and passing histograms for every combination of the configured triggers, and turns
//! them into data and MC efficiencies, data/MC scale factors and sigmoid turn-on fits.
//!
//! ## Installation
//!
//! The only method of install is from source.
//!
//! ### Rust
//!
//! If you have not used Rust before, you will most likely need to install the Rust tool
//! chain. See the [Rust docs](https://www.rust-lang.org/tools/install) for installation
//! instructions.
//!
//! ### Building & Install
//!
//! To build and install the CLI use `cargo install --path ./trigeff_cli` from the top level of
//! the repository. The `trigeff` binary is installed to your cargo install location (typically
//! `~/.cargo/bin/`).
//!
//! ## Workflow
//!
//! Every step is a subcommand of `trigeff`, all of them reading the same configuration file:
//!
//! 1. `combinations`: list the trigger combinations evaluated per channel
//! 2. `submit` or `run`: fill histograms per input file, on HTCondor or with local workers
//! 3. `hadd`: sum the per-file histograms of all data samples and of all MC samples
//! 4. `submit-eff` or `eff`: efficiencies, scale factors, fits and plots per combination
//! 5. `aggregate`: merge the results of each channel into one file
//! 6. `union`: per-event weights for the OR of several triggers
//!
//! `trigeff` only writes the HTCondor files. Submitting and monitoring jobs is up to the user.
//!
//! ## Configuration
//!
//! `trigeff new -p config.yml` writes a template. An abridged configuration:
//!
//! ```yml
//! year: '2018'
//! channels: [etau, mutau, tautau]
//! variables: [metnomu_et, dau1_pt]
//! triggers: [IsoMu24, Ele32, METNoMu120]
//! exclusive:
//!   general: [METNoMu120]
//!   channels:
//!     mutau: [IsoMu24]
//!     etau: [Ele32]
//! binning:
//!   metnomu_et: {nbins: 20, low: 0.0, high: 450.0}
//!   dau1_pt: [20.0, 30.0, 40.0, 60.0, 100.0, 350.0]
//! cuts:
//!   METNoMu120:
//!     metnomu_et: {op: '>', thresholds: [120.0, 180.0]}
//! cuts_ignored: {}
//! fit_ranges:
//!   metnomu_et: {low: 0.0, high: 450.0}
//! pairs_2d: {}
//! discriminators: {}
//! data:
//!   MET: [MET2018A, MET2018B]
//! mc:
//!   TT: [TT_fullyHad, TT_semiLep]
//! input_path: /data/skims
//! output_path: /data/trigeff
//! trigger_map_path: null
//! tag: Tag
//! subtag: ''
//! confidence_level: 0.95
//! n_threads: 4
//! ```
//!
//! Triggers listed under a channel in `exclusive` only appear in the combinations of that
//! channel. Cut variants are named after the cut, e.g. `metnomu_etG120`; the variant without a
//! cut is `NoCut`. If `trigger_map_path` is `null`, the bundled trigger bit table is used.
//!
//! ### Trigger Table Format
//!
//! The trigger table is YAML keyed by year, then by trigger name. Each trigger gives the bit (or
//! list of alternative bits) of the `triggerbit` mask for MC and data:
//!
//! ```yml
//! '2018':
//!   IsoMu24: {mc: 0, data: 0}
//!   IsoTau180: {mc: [4, 7], data: [4, 7]}
//!   IsoDoubleTauCustom:
//!     custom:
//!       - {name: IsoDoubleTau, mc: 12, data: [13, 14, 15], runs: {first: 0, last: 317509}}
//!       - {name: IsoDoubleTauHPS, mc: 12, data: 12, runs: {first: 317509, last: 4294967295}}
//! ```
//!
//! Run ranges are half-open and only restrict data.
//!
//! ## Input
//!
//! Each sample folder under `input_path` holds text ntuples named `output_N.*`. The first line is
//! a header naming the columns, separated by commas or whitespace. The columns `pairType`,
//! `triggerbit` and `RunNumber` are required, `weight` is optional (defaults to 1) and every
//! configured variable must be present.
//!
//! ## Output
//!
//! Histograms and results are written in a small binary format (`.hist`):
//!
//! ```text
//! {output_path}/{tag}
//! |---- {sample}/hist_{sample}_{N}{subtag}.hist       per input file
//! |---- hist_Data_{samples}_Sum{subtag}.hist           summed data
//! |---- hist_MC_{samples}_Sum{subtag}.hist             summed MC
//! |---- results/{channel}/{variable}/trigSF_*.hist|.svg
//! |---- aggregated/trigSF_{channel}{subtag}.hist
//! ```
//!
//! A log file `trigeff.log` is written next to where `trigeff` is invoked.
pub mod aggregate;
pub mod combination;
pub mod config;
pub mod dataset;
pub mod eff_sf;
pub mod efficiency;
pub mod error;
pub mod fit;
pub mod hist_file;
pub mod histogram;
pub mod job_writer;
pub mod naming;
pub mod ntuple;
pub mod plot;
pub mod process;
pub mod producer;
pub mod selection;
pub mod trigger_map;
pub mod union;
pub mod worker_status;
