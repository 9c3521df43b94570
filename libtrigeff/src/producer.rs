//! Filling of reference and passing histograms from events.
//!
//! The producer builds its whole plan (every channel, combination, cut variant and variable)
//! up front, so that every histogram exists in the output even if no event reached it. Data
//! and MC outputs therefore always carry the same keys.
use std::io::Write;
use std::path::Path;

use super::combination::TriggerCombination;
use super::config::Config;
use super::dataset::{Channel, SampleKind};
use super::error::{ConfigError, ProcessorError, SelectionError};
use super::hist_file::{HistFile, StoredObject};
use super::histogram::{Hist1D, Hist2D};
use super::naming::{pair_name, ref_key, trig_key, HistKind};
use super::ntuple::Event;
use super::selection::{cut_variants, CutVariant, Selector};
use super::trigger_map::TriggerMap;

/// What a production job writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductionMode {
    Histograms,
    Counts,
}

struct VariantPlan {
    variant: CutVariant,
    hists1d: Vec<Hist1D>,
    /// (index into the channel pairs, histogram)
    hists2d: Vec<(usize, Hist2D)>,
}

struct CombinationPlan {
    combination: TriggerCombination,
    name: String,
    variants: Vec<VariantPlan>,
}

struct ChannelPlan {
    channel: Channel,
    refs1d: Vec<Hist1D>,
    refs2d: Vec<Hist2D>,
    combinations: Vec<CombinationPlan>,
}

/// HistogramProducer fills the histograms of one input file
pub struct HistogramProducer<'a> {
    config: &'a Config,
    selector: Selector<'a>,
    /// Distinct 2D variable pairs, as indices into `config.variables`
    pairs: Vec<(usize, usize)>,
    plans: Vec<ChannelPlan>,
    n_events: u64,
}

fn variable_index(config: &Config, variable: &str) -> Result<usize, ConfigError> {
    config
        .variables
        .iter()
        .position(|v| v == variable)
        .ok_or_else(|| ConfigError::UnknownVariable(variable.to_string()))
}

fn new_hist1d(config: &Config, variable: &str) -> Result<Hist1D, ProcessorError> {
    let binning = config
        .binning
        .get(variable)
        .ok_or_else(|| ConfigError::MissingBinning(variable.to_string()))?;
    Ok(Hist1D::new(binning)?)
}

fn new_hist2d(config: &Config, var1: &str, var2: &str) -> Result<Hist2D, ProcessorError> {
    let b1 = config
        .binning
        .get(var1)
        .ok_or_else(|| ConfigError::MissingBinning(var1.to_string()))?;
    let b2 = config
        .binning
        .get(var2)
        .ok_or_else(|| ConfigError::MissingBinning(var2.to_string()))?;
    Ok(Hist2D::new(b1, b2)?)
}

/// Values of every configured variable for one event
fn event_values(config: &Config, event: &Event) -> Result<Vec<f64>, SelectionError> {
    config
        .variables
        .iter()
        .map(|v| {
            event
                .get(v)
                .ok_or_else(|| SelectionError::MissingField(v.clone()))
        })
        .collect()
}

impl<'a> HistogramProducer<'a> {
    pub fn new(config: &'a Config, map: &'a TriggerMap, kind: SampleKind) -> Result<Self, ProcessorError> {
        let mut pairs: Vec<(usize, usize)> = Vec::new();
        for (v1, v2) in config.pairs_2d.values().flatten() {
            let pair = (variable_index(config, v1)?, variable_index(config, v2)?);
            if !pairs.contains(&pair) {
                pairs.push(pair);
            }
        }

        let mut plans = Vec::with_capacity(config.channels.len());
        for channel in config.channels.iter() {
            let mut combinations = Vec::new();
            for combination in config.combinations(*channel)? {
                // Pairs requested by any trigger of the combination
                let mut comb_pairs: Vec<usize> = Vec::new();
                for trigger in combination.triggers() {
                    for (v1, v2) in config.pairs_2d.get(trigger).into_iter().flatten() {
                        let pair = (variable_index(config, v1)?, variable_index(config, v2)?);
                        if let Some(idx) = pairs.iter().position(|p| *p == pair) {
                            if !comb_pairs.contains(&idx) {
                                comb_pairs.push(idx);
                            }
                        }
                    }
                }

                let mut variants = Vec::new();
                for variant in cut_variants(&combination, &config.cuts, &config.nocut_dummy) {
                    let hists1d = config
                        .variables
                        .iter()
                        .map(|v| new_hist1d(config, v))
                        .collect::<Result<Vec<_>, _>>()?;
                    let hists2d = comb_pairs
                        .iter()
                        .map(|idx| {
                            let (i1, i2) = pairs[*idx];
                            Ok((*idx, new_hist2d(config, &config.variables[i1], &config.variables[i2])?))
                        })
                        .collect::<Result<Vec<_>, ProcessorError>>()?;
                    variants.push(VariantPlan {
                        variant,
                        hists1d,
                        hists2d,
                    });
                }
                combinations.push(CombinationPlan {
                    name: combination.join(&config.intersection_str),
                    combination,
                    variants,
                });
            }

            let refs1d = config
                .variables
                .iter()
                .map(|v| new_hist1d(config, v))
                .collect::<Result<Vec<_>, _>>()?;
            let refs2d = pairs
                .iter()
                .map(|(i1, i2)| new_hist2d(config, &config.variables[*i1], &config.variables[*i2]))
                .collect::<Result<Vec<_>, _>>()?;
            plans.push(ChannelPlan {
                channel: *channel,
                refs1d,
                refs2d,
                combinations,
            });
        }

        Ok(Self {
            config,
            selector: Selector::new(map, config.year, kind),
            pairs,
            plans,
            n_events: 0,
        })
    }

    /// Fill one event into every histogram it belongs to
    pub fn fill(&mut self, event: &Event) -> Result<(), ProcessorError> {
        self.n_events += 1;
        let config = self.config;
        if !self.plans.iter().any(|p| p.channel.accepts(event.pair_type)) {
            return Ok(());
        }
        let values = event_values(config, event)?;
        for plan in self.plans.iter_mut() {
            if !plan.channel.accepts(event.pair_type) {
                continue;
            }

            for (hist, x) in plan.refs1d.iter_mut().zip(values.iter()) {
                hist.fill_weighted(*x, event.weight);
            }
            for (hist, (i1, i2)) in plan.refs2d.iter_mut().zip(self.pairs.iter()) {
                hist.fill_weighted(values[*i1], values[*i2], event.weight);
            }

            for comb in plan.combinations.iter_mut() {
                if !self.selector.passes_combination(event, &comb.combination)? {
                    continue;
                }
                for vp in comb.variants.iter_mut() {
                    for ((hist, var), x) in vp
                        .hists1d
                        .iter_mut()
                        .zip(config.variables.iter())
                        .zip(values.iter())
                    {
                        if vp.variant.passes(event, var, &config.cuts_ignored)? {
                            hist.fill_weighted(*x, event.weight);
                        }
                    }
                    for (idx, hist) in vp.hists2d.iter_mut() {
                        let (i1, i2) = self.pairs[*idx];
                        let v1 = &config.variables[i1];
                        let v2 = &config.variables[i2];
                        // A cut exempted by either axis is not applied
                        if vp.variant.passes(event, v1, &config.cuts_ignored)?
                            || vp.variant.passes(event, v2, &config.cuts_ignored)?
                        {
                            hist.fill_weighted(values[i1], values[i2], event.weight);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn get_n_events(&self) -> u64 {
        self.n_events
    }

    /// Collect the histograms under their keys
    pub fn finish(self) -> HistFile {
        let mut file = HistFile::new();
        let variables = &self.config.variables;
        let pair_names: Vec<String> = self
            .pairs
            .iter()
            .map(|(i1, i2)| pair_name(&variables[*i1], &variables[*i2]))
            .collect();
        for plan in self.plans.into_iter() {
            for (hist, var) in plan.refs1d.into_iter().zip(variables.iter()) {
                file.insert(
                    &ref_key(HistKind::Ref1D, plan.channel, var),
                    StoredObject::Hist1D(hist),
                );
            }
            for (hist, pair) in plan.refs2d.into_iter().zip(pair_names.iter()) {
                file.insert(
                    &ref_key(HistKind::Ref2D, plan.channel, pair),
                    StoredObject::Hist2D(hist),
                );
            }
            for comb in plan.combinations.into_iter() {
                for vp in comb.variants.into_iter() {
                    for (hist, var) in vp.hists1d.into_iter().zip(variables.iter()) {
                        file.insert(
                            &trig_key(HistKind::Trig1D, plan.channel, var, &comb.name, &vp.variant.name),
                            StoredObject::Hist1D(hist),
                        );
                    }
                    for (idx, hist) in vp.hists2d.into_iter() {
                        file.insert(
                            &trig_key(
                                HistKind::Trig2D,
                                plan.channel,
                                &pair_names[idx],
                                &comb.name,
                                &vp.variant.name,
                            ),
                            StoredObject::Hist2D(hist),
                        );
                    }
                }
            }
        }
        file
    }
}

struct ChannelCounts {
    channel: Channel,
    reference: f64,
    /// (combination name, combination, passing sum of weights)
    passing: Vec<(String, TriggerCombination, f64)>,
}

/// CountsProducer sums event weights per channel and combination, without binning
pub struct CountsProducer<'a> {
    selector: Selector<'a>,
    counts: Vec<ChannelCounts>,
}

impl<'a> CountsProducer<'a> {
    pub fn new(config: &'a Config, map: &'a TriggerMap, kind: SampleKind) -> Result<Self, ProcessorError> {
        let mut counts = Vec::with_capacity(config.channels.len());
        for channel in config.channels.iter() {
            let passing = config
                .combinations(*channel)?
                .into_iter()
                .map(|c| (c.join(&config.intersection_str), c, 0.0))
                .collect();
            counts.push(ChannelCounts {
                channel: *channel,
                reference: 0.0,
                passing,
            });
        }
        Ok(Self {
            selector: Selector::new(map, config.year, kind),
            counts,
        })
    }

    pub fn fill(&mut self, event: &Event) -> Result<(), ProcessorError> {
        for chn in self.counts.iter_mut() {
            if !chn.channel.accepts(event.pair_type) {
                continue;
            }
            chn.reference += event.weight;
            for (_, comb, sum) in chn.passing.iter_mut() {
                if self.selector.passes_combination(event, comb)? {
                    *sum += event.weight;
                }
            }
        }
        Ok(())
    }

    /// Write the table as CSV: channel,combination,reference,passing,fraction
    pub fn write_csv(&self, path: &Path) -> Result<(), ProcessorError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(path)?;
        writeln!(file, "channel,combination,reference,passing,fraction")?;
        for chn in self.counts.iter() {
            for (name, _, sum) in chn.passing.iter() {
                let fraction = if chn.reference > 0.0 {
                    sum / chn.reference
                } else {
                    0.0
                };
                writeln!(
                    file,
                    "{},{},{},{},{:.6}",
                    chn.channel, name, chn.reference, sum, fraction
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combination::Exclusivity;
    use crate::histogram::Binning;
    use crate::selection::{CutOp, CutSpec};
    use std::collections::BTreeMap;

    pub(crate) fn small_config() -> Config {
        let mut config = Config::default();
        config.channels = vec![Channel::MuTau];
        config.variables = vec![String::from("metnomu_et"), String::from("mhtnomu_et")];
        config.triggers = vec![String::from("IsoMu24"), String::from("METNoMu120")];
        config.exclusive = Exclusivity::default();
        config.binning.clear();
        for v in config.variables.iter() {
            config
                .binning
                .insert(v.clone(), Binning::Uniform { nbins: 4, low: 0.0, high: 400.0 });
        }
        let mut met = BTreeMap::new();
        met.insert(
            String::from("metnomu_et"),
            CutSpec { op: CutOp::Greater, thresholds: vec![120.0] },
        );
        config.cuts.clear();
        config.cuts.insert(String::from("METNoMu120"), met);
        config.cuts_ignored.clear();
        config.fit_ranges.clear();
        config.pairs_2d.clear();
        config.pairs_2d.insert(
            String::from("METNoMu120"),
            vec![(String::from("metnomu_et"), String::from("mhtnomu_et"))],
        );
        config
    }

    fn event(pair_type: i64, triggerbit: u64, met: f64, mht: f64) -> Event {
        Event::from_pairs(pair_type, triggerbit, 1, &[("metnomu_et", met), ("mhtnomu_et", mht)])
    }

    #[test]
    fn test_keys_exist_without_events() {
        let config = small_config();
        let map = TriggerMap::new(None).unwrap();
        let producer = HistogramProducer::new(&config, &map, SampleKind::Mc).unwrap();
        let file = producer.finish();
        assert!(file.contains("Ref1D_mutau_metnomu_et"));
        assert!(file.contains("Ref2D_mutau_metnomu_et_VS_mhtnomu_et"));
        assert!(file.contains("Trig1D_mutau_mhtnomu_et_TRG_IsoMu24_CUTS_NoCut"));
        assert!(file.contains("Trig1D_mutau_metnomu_et_TRG_IsoMu24_PLUS_METNoMu120_CUTS_metnomu_etG120"));
        assert!(file.contains(
            "Trig2D_mutau_metnomu_et_VS_mhtnomu_et_TRG_METNoMu120_CUTS_NoCut"
        ));
        // No 2D pairs for combinations without METNoMu120
        assert!(!file.contains("Trig2D_mutau_metnomu_et_VS_mhtnomu_et_TRG_IsoMu24_CUTS_NoCut"));
        // No cut variants for combinations without METNoMu120
        assert!(!file.contains("Trig1D_mutau_metnomu_et_TRG_IsoMu24_CUTS_metnomu_etG120"));
    }

    #[test]
    fn test_fill_reference_and_passing() {
        let config = small_config();
        let map = TriggerMap::new(None).unwrap();
        let mut producer = HistogramProducer::new(&config, &map, SampleKind::Mc).unwrap();
        let met_bit = 1u64 << 40;
        producer.fill(&event(0, met_bit, 150.0, 50.0)).unwrap();
        producer.fill(&event(0, met_bit, 50.0, 50.0)).unwrap();
        producer.fill(&event(0, 1, 250.0, 50.0)).unwrap();
        // Wrong channel
        producer.fill(&event(1, met_bit, 150.0, 50.0)).unwrap();
        assert_eq!(producer.get_n_events(), 4);

        let file = producer.finish();
        let reference = file.get_hist1d("Ref1D_mutau_metnomu_et").unwrap();
        assert_eq!(reference.integral(), 3.0);
        let pass = file
            .get_hist1d("Trig1D_mutau_metnomu_et_TRG_METNoMu120_CUTS_NoCut")
            .unwrap();
        assert_eq!(pass.integral(), 2.0);
        // The cut is on the filled variable itself, so it is not applied
        let cut_same = file
            .get_hist1d("Trig1D_mutau_metnomu_et_TRG_METNoMu120_CUTS_metnomu_etG120")
            .unwrap();
        assert_eq!(cut_same.integral(), 2.0);
        let cut_other = file
            .get_hist1d("Trig1D_mutau_mhtnomu_et_TRG_METNoMu120_CUTS_metnomu_etG120")
            .unwrap();
        assert_eq!(cut_other.integral(), 1.0);
        let both = file
            .get_hist1d("Trig1D_mutau_metnomu_et_TRG_IsoMu24_PLUS_METNoMu120_CUTS_NoCut")
            .unwrap();
        assert_eq!(both.integral(), 0.0);
        let pass2d = file
            .get_hist2d("Trig2D_mutau_metnomu_et_VS_mhtnomu_et_TRG_METNoMu120_CUTS_metnomu_etG120")
            .unwrap();
        assert_eq!(pass2d.integral(), 2.0);
    }

    #[test]
    fn test_missing_variable_is_an_error() {
        let config = small_config();
        let map = TriggerMap::new(None).unwrap();
        let mut producer = HistogramProducer::new(&config, &map, SampleKind::Data).unwrap();
        let evt = Event::from_pairs(0, 0, 1, &[("metnomu_et", 1.0)]);
        assert!(matches!(
            producer.fill(&evt),
            Err(ProcessorError::SelectionError(SelectionError::MissingField(_)))
        ));
    }

    #[test]
    fn test_counts_table() {
        let config = small_config();
        let map = TriggerMap::new(None).unwrap();
        let mut counts = CountsProducer::new(&config, &map, SampleKind::Mc).unwrap();
        counts.fill(&event(0, 1 << 40, 150.0, 50.0)).unwrap();
        counts.fill(&event(0, 1, 150.0, 50.0)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counts.csv");
        counts.write_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("mutau,METNoMu120,2,1,0.500000"));
        assert!(text.contains("mutau,IsoMu24_PLUS_METNoMu120,2,0,0.000000"));
    }
}
