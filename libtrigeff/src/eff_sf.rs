//! The efficiency step: one trigger combination at a time, compare the summed data and MC
//! histograms and write efficiencies, scale factors, fits and plots.
use std::collections::BTreeSet;
use std::path::PathBuf;

use super::combination::{is_combination_in_channel, TriggerCombination};
use super::config::Config;
use super::dataset::{Channel, SampleKind};
use super::efficiency::{
    efficiency, efficiency_2d, normalized_graph, scale_factor_2d, scale_factors, EfficiencyGraph,
};
use super::error::{EffSfError, PlotError};
use super::fit::{fit_sigmoid, FitResult};
use super::hist_file::{HistFile, StoredObject};
use super::naming::{
    pair_name, ref_key, result_output, summed_output, trig_key, HistKind, ResultId, HIST_EXTENSION,
};
use super::plot::{plot_distributions, plot_efficiency, plot_map};
use super::selection::{cut_variants, CutVariant};

pub const EFF_DATA_1D: &str = "EffData1D";
pub const EFF_MC_1D: &str = "EffMC1D";
pub const SF_1D: &str = "SF1D";
pub const NORM_DATA_1D: &str = "NormData1D";
pub const NORM_MC_1D: &str = "NormMC1D";
pub const SIGMOID_DATA: &str = "SigmoidFuncData";
pub const SIGMOID_MC: &str = "SigmoidFuncMC";
pub const EFF_DATA_2D: &str = "EffData2D";
pub const EFF_MC_2D: &str = "EffMC2D";
pub const SF_2D: &str = "SF2D";
pub const SF_2D_ERR_UP: &str = "SF2D_ErrUp";
pub const SF_2D_ERR_DOWN: &str = "SF2D_ErrDown";
pub const SF_2D_UNDEFINED: &str = "SF2D_Undefined";

/// Every object name a result file may hold
pub const RESULT_OBJECTS: [&str; 13] = [
    EFF_DATA_1D,
    EFF_MC_1D,
    SF_1D,
    NORM_DATA_1D,
    NORM_MC_1D,
    SIGMOID_DATA,
    SIGMOID_MC,
    EFF_DATA_2D,
    EFF_MC_2D,
    SF_2D,
    SF_2D_ERR_UP,
    SF_2D_ERR_DOWN,
    SF_2D_UNDEFINED,
];

const PLOT_EXTENSION: &str = "svg";
const DIST_PREFIX: &str = "dist_";

/// What the efficiency step produced
#[derive(Debug, Default)]
pub struct EffSfSummary {
    pub written: Vec<PathBuf>,
    /// Channels where the combination never fired in MC
    pub skipped: Vec<Channel>,
}

/// The summed data and MC files must hold exactly the same keys
fn check_keys(data: &HistFile, mc: &HistFile) -> Result<(), EffSfError> {
    let data_keys: BTreeSet<&String> = data.keys().collect();
    let mc_keys: BTreeSet<&String> = mc.keys().collect();
    if data_keys == mc_keys {
        return Ok(());
    }
    Err(EffSfError::KeyMismatch {
        only_data: data_keys.difference(&mc_keys).map(|k| k.to_string()).collect(),
        only_mc: mc_keys.difference(&data_keys).map(|k| k.to_string()).collect(),
    })
}

fn try_fit(
    config: &Config,
    variable: &str,
    graph: &EfficiencyGraph,
    kind: SampleKind,
) -> Option<FitResult> {
    let range = config.fit_ranges.get(variable)?;
    match fit_sigmoid(graph, *range, config.fit_start(kind)) {
        Ok(fit) => Some(fit),
        Err(e) => {
            log::warn!("Skipping {kind} sigmoid fit of {variable}: {e}");
            None
        }
    }
}

struct Step<'a> {
    config: &'a Config,
    data: &'a HistFile,
    mc: &'a HistFile,
    data_name: String,
    mc_name: String,
    comb_name: String,
    make_plots: bool,
    summary: EffSfSummary,
}

impl Step<'_> {
    fn id<'b>(&'b self, channel: Channel, variable: &'b str, cut: &'b str) -> ResultId<'b> {
        ResultId {
            data: &self.data_name,
            mc: &self.mc_name,
            channel,
            variable,
            combination: &self.comb_name,
            cut,
        }
    }

    fn output(&self, id: &ResultId, ext: &str) -> PathBuf {
        result_output(
            &self.config.get_results_directory(),
            &self.config.sf_prefix,
            id,
            &self.config.subtag,
            ext,
        )
    }

    fn run_1d(&mut self, channel: Channel, variable: &str, variant: &CutVariant) -> Result<(), EffSfError> {
        let level = self.config.confidence_level;
        let ref_name = ref_key(HistKind::Ref1D, channel, variable);
        let trig_name = trig_key(HistKind::Trig1D, channel, variable, &self.comb_name, &variant.name);
        let ref_data = self.data.get_hist1d(&ref_name)?;
        let ref_mc = self.mc.get_hist1d(&ref_name)?;
        let eff_data = efficiency(self.data.get_hist1d(&trig_name)?, ref_data, level)?;
        let eff_mc = efficiency(self.mc.get_hist1d(&trig_name)?, ref_mc, level)?;
        let sf = scale_factors(&eff_data, &eff_mc)?;
        let norm_data = normalized_graph(ref_data);
        let norm_mc = normalized_graph(ref_mc);
        let fit_data = try_fit(self.config, variable, &eff_data, SampleKind::Data);
        let fit_mc = try_fit(self.config, variable, &eff_mc, SampleKind::Mc);

        let id = self.id(channel, variable, &variant.name);
        let hist_path = self.output(&id, HIST_EXTENSION);
        let plot_path = self.output(&id, PLOT_EXTENSION);
        let dist_path = result_output(
            &self.config.get_results_directory(),
            DIST_PREFIX,
            &id,
            &self.config.subtag,
            PLOT_EXTENSION,
        );

        if self.make_plots {
            let title = format!("{} {} {}", channel, self.comb_name, variant.name);
            let fits = match (&fit_data, &fit_mc) {
                (Some(d), Some(m)) => Some((d, m)),
                _ => None,
            };
            plot_efficiency(&plot_path, &title, variable, &eff_data, &eff_mc, &sf, fits)?;
            self.summary.written.push(plot_path);
            if variant.cut.is_none() {
                plot_distributions(&dist_path, &format!("{channel} {variable}"), variable, &norm_data, &norm_mc)?;
                self.summary.written.push(dist_path);
            }
        }

        let mut file = HistFile::new();
        file.insert(EFF_DATA_1D, StoredObject::Graph(eff_data));
        file.insert(EFF_MC_1D, StoredObject::Graph(eff_mc));
        file.insert(SF_1D, StoredObject::ScaleFactors(sf));
        file.insert(NORM_DATA_1D, StoredObject::Graph(norm_data));
        file.insert(NORM_MC_1D, StoredObject::Graph(norm_mc));
        if let Some(fit) = fit_data {
            file.insert(SIGMOID_DATA, StoredObject::Sigmoid(fit));
        }
        if let Some(fit) = fit_mc {
            file.insert(SIGMOID_MC, StoredObject::Sigmoid(fit));
        }
        file.write(&hist_path)?;
        self.summary.written.push(hist_path);
        Ok(())
    }

    fn run_2d(&mut self, channel: Channel, var1: &str, var2: &str, variant: &CutVariant) -> Result<(), EffSfError> {
        let level = self.config.confidence_level;
        let pair = pair_name(var1, var2);
        let ref_name = ref_key(HistKind::Ref2D, channel, &pair);
        let trig_name = trig_key(HistKind::Trig2D, channel, &pair, &self.comb_name, &variant.name);
        let eff_data = efficiency_2d(
            self.data.get_hist2d(&trig_name)?,
            self.data.get_hist2d(&ref_name)?,
            level,
        )?;
        let eff_mc = efficiency_2d(
            self.mc.get_hist2d(&trig_name)?,
            self.mc.get_hist2d(&ref_name)?,
            level,
        )?;
        let sf = scale_factor_2d(&eff_data, &eff_mc)?;

        let id = self.id(channel, &pair, &variant.name);
        let hist_path = self.output(&id, HIST_EXTENSION);
        if self.make_plots {
            let plot_path = self.output(&id, PLOT_EXTENSION);
            let title = format!("SF {} {} {}", channel, self.comb_name, variant.name);
            match plot_map(&plot_path, &title, var1, var2, &sf.value) {
                Ok(()) => self.summary.written.push(plot_path),
                Err(PlotError::NothingToDraw(t)) => {
                    log::warn!("Scale factor map {t} is empty, not plotted")
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut file = HistFile::new();
        file.insert(EFF_DATA_2D, StoredObject::Hist2D(eff_data.value));
        file.insert(EFF_MC_2D, StoredObject::Hist2D(eff_mc.value));
        file.insert(SF_2D, StoredObject::Hist2D(sf.value));
        file.insert(SF_2D_ERR_UP, StoredObject::Hist2D(sf.err_up));
        file.insert(SF_2D_ERR_DOWN, StoredObject::Hist2D(sf.err_down));
        file.insert(SF_2D_UNDEFINED, StoredObject::Hist2D(sf.undefined));
        file.write(&hist_path)?;
        self.summary.written.push(hist_path);
        Ok(())
    }
}

/// Did any MC event of the channel pass the combination. Under and overflow count, so events
/// outside the binning of every variable still make the combination fire.
fn fires_in_mc(
    config: &Config,
    mc: &HistFile,
    channel: Channel,
    comb_name: &str,
) -> Result<bool, EffSfError> {
    for variable in config.variables.iter() {
        let key = trig_key(HistKind::Trig1D, channel, variable, comb_name, &config.nocut_dummy);
        let total: f64 = mc.get_hist1d(&key)?.contents().iter().sum();
        if total != 0.0 {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Path of the summed histogram file of one sample kind
pub fn summed_path(config: &Config, kind: SampleKind) -> PathBuf {
    summed_output(
        &config.get_histo_directory(),
        &config.histo_prefix,
        &config.summed_name(kind),
        &config.subtag,
    )
}

/// Compute and write every result of one trigger combination
pub fn run_eff_sf(config: &Config, combination_name: &str, make_plots: bool) -> Result<EffSfSummary, EffSfError> {
    let combination = TriggerCombination::parse(combination_name, &config.intersection_str)?;
    let comb_name = combination.join(&config.intersection_str);

    let data = HistFile::read(&summed_path(config, SampleKind::Data))?;
    let mc = HistFile::read(&summed_path(config, SampleKind::Mc))?;
    check_keys(&data, &mc)?;

    let mut step = Step {
        config,
        data: &data,
        mc: &mc,
        data_name: config.data_name(),
        mc_name: config.mc_name(),
        comb_name,
        make_plots,
        summary: EffSfSummary::default(),
    };

    let variants = cut_variants(&combination, &config.cuts, &config.nocut_dummy);
    let mut pairs: Vec<(String, String)> = Vec::new();
    for trigger in combination.triggers() {
        for pair in config.pairs_2d.get(trigger).into_iter().flatten() {
            if !pairs.contains(pair) {
                pairs.push(pair.clone());
            }
        }
    }

    for channel in config.channels.iter() {
        if !is_combination_in_channel(*channel, &combination, &config.triggers, &config.exclusive) {
            continue;
        }
        if !fires_in_mc(config, &mc, *channel, &step.comb_name)? {
            log::warn!(
                "Combination {} never fires in MC for channel {}, skipping",
                step.comb_name,
                channel
            );
            step.summary.skipped.push(*channel);
            continue;
        }

        log::info!("Computing efficiencies of {} in channel {}", step.comb_name, channel);
        for variable in config.variables.iter() {
            for variant in variants.iter() {
                step.run_1d(*channel, variable, variant)?;
            }
        }
        for (var1, var2) in pairs.iter() {
            for variant in variants.iter() {
                step.run_2d(*channel, var1, var2, variant)?;
            }
        }
    }

    log::info!(
        "Wrote {} result files for combination {}",
        step.summary.written.len(),
        step.comb_name
    );
    Ok(step.summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::{Binning, Hist1D};

    fn hist(values: &[f64]) -> Hist1D {
        let mut h = Hist1D::new(&Binning::Uniform { nbins: 2, low: 0.0, high: 2.0 }).unwrap();
        for v in values {
            h.fill(*v);
        }
        h
    }

    #[test]
    fn test_key_mismatch_lists_keys() {
        let mut data = HistFile::new();
        data.insert("common", StoredObject::Hist1D(hist(&[0.5])));
        data.insert("data_only", StoredObject::Hist1D(hist(&[0.5])));
        let mut mc = HistFile::new();
        mc.insert("common", StoredObject::Hist1D(hist(&[0.5])));
        mc.insert("mc_only", StoredObject::Hist1D(hist(&[0.5])));
        match check_keys(&data, &mc) {
            Err(EffSfError::KeyMismatch { only_data, only_mc }) => {
                assert_eq!(only_data, vec![String::from("data_only")]);
                assert_eq!(only_mc, vec![String::from("mc_only")]);
            }
            other => panic!("expected a key mismatch, got {other:?}"),
        }
        assert!(check_keys(&data, &data).is_ok());
    }

    #[test]
    fn test_fires_in_mc_counts_flow_bins() {
        let mut config = Config::default();
        config.variables = vec![String::from("metnomu_et"), String::from("dau1_pt")];
        let key = |var: &str| trig_key(HistKind::Trig1D, Channel::MuTau, var, "IsoMu24", "NoCut");
        let mut mc = HistFile::new();
        mc.insert(&key("metnomu_et"), StoredObject::Hist1D(hist(&[])));
        mc.insert(&key("dau1_pt"), StoredObject::Hist1D(hist(&[])));
        assert!(!fires_in_mc(&config, &mc, Channel::MuTau, "IsoMu24").unwrap());

        // Only an overflow entry, in the second variable
        mc.insert(&key("dau1_pt"), StoredObject::Hist1D(hist(&[5.0])));
        assert_eq!(mc.get_hist1d(&key("dau1_pt")).unwrap().integral(), 0.0);
        assert!(fires_in_mc(&config, &mc, Channel::MuTau, "IsoMu24").unwrap());
    }

    #[test]
    fn test_bad_combination_name() {
        let config = Config::default();
        assert!(matches!(
            run_eff_sf(&config, "", false),
            Err(EffSfError::CombinationError(_))
        ));
    }
}
