//! Event weights for the OR of several triggers.
//!
//! The efficiency of a union is obtained from the efficiencies of all intersections by
//! inclusion-exclusion:
//!
//! ```text
//! P(A or B or C) = P(A) + P(B) + P(C) - P(AB) - P(AC) - P(BC) + P(ABC)
//! ```
//!
//! Each intersection efficiency is read, for data and MC, from the aggregated file of the channel
//! in the bin of its discriminating variable. The event weight is the ratio of the data union
//! efficiency to the MC union efficiency.
use std::io::Write;
use std::path::Path;

use super::aggregate::aggregated_path;
use super::combination::{generate_combinations, Exclusivity, TriggerCombination};
use super::config::Config;
use super::dataset::Channel;
use super::eff_sf::{EFF_DATA_1D, EFF_MC_1D};
use super::error::UnionError;
use super::hist_file::HistFile;
use super::histogram::Hist1D;
use super::naming::aggregated_name;
use super::ntuple::{Event, NtupleFile};

/// Inclusion-exclusion sum: `+` for odd-size intersections, `-` for even-size ones.
/// Each term is (number of triggers in the intersection, efficiency).
pub fn union_efficiency(terms: &[(usize, f64)]) -> f64 {
    terms
        .iter()
        .map(|(size, eff)| if size % 2 == 1 { *eff } else { -*eff })
        .sum()
}

struct Term {
    combination: TriggerCombination,
    variable: String,
    data: Hist1D,
    mc: Hist1D,
}

/// Efficiency in the bin holding `value`. Values outside the regular bins are an error.
fn lookup(hist: &Hist1D, variable: &str, value: f64) -> Result<f64, UnionError> {
    let out_of_range = || UnionError::OutOfRange {
        variable: variable.to_string(),
        value,
    };
    match hist.axis().find_bin(value) {
        Some(bin) if bin >= 1 && bin <= hist.nbins() => Ok(hist.content(bin)),
        _ => Err(out_of_range()),
    }
}

/// Holds the efficiency tables of every intersection of a set of triggers in one channel
pub struct UnionWeightCalculator {
    channel: Channel,
    terms: Vec<Term>,
}

impl UnionWeightCalculator {
    /// Load the tables from the aggregated file of the channel
    pub fn new(config: &Config, channel: Channel, triggers: &[String]) -> Result<Self, UnionError> {
        let file = HistFile::read(&aggregated_path(config, channel))?;
        Self::from_file(config, channel, triggers, &file)
    }

    pub fn from_file(
        config: &Config,
        channel: Channel,
        triggers: &[String],
        file: &HistFile,
    ) -> Result<Self, UnionError> {
        let discriminators = config.discriminators.get(&channel);
        let mut terms = Vec::new();
        for combination in generate_combinations(channel, triggers, &Exclusivity::default())? {
            let name = combination.join(&config.intersection_str);
            let variable = discriminators
                .and_then(|d| d.get(&name))
                .ok_or_else(|| UnionError::MissingVariable(name.clone()))?
                .clone();
            let table = |prefix: &str| -> Result<Hist1D, UnionError> {
                let key = aggregated_name(prefix, &variable, &name, &config.nocut_dummy);
                if !file.contains(&key) {
                    return Err(UnionError::MissingCombination(name.clone()));
                }
                Ok(file.get_hist1d(&key)?.clone())
            };
            let data = table(EFF_DATA_1D)?;
            let mc = table(EFF_MC_1D)?;
            if !data.same_binning(&mc) {
                return Err(UnionError::BadTable(name));
            }
            terms.push(Term {
                combination,
                variable,
                data,
                mc,
            });
        }
        Ok(Self { channel, terms })
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Data and MC union efficiencies of an event
    pub fn union_efficiencies(&self, event: &Event) -> Result<(f64, f64), UnionError> {
        let mut data_terms = Vec::with_capacity(self.terms.len());
        let mut mc_terms = Vec::with_capacity(self.terms.len());
        for term in self.terms.iter() {
            let value = event
                .get(&term.variable)
                .ok_or_else(|| UnionError::MissingField(term.variable.clone()))?;
            let size = term.combination.len();
            data_terms.push((size, lookup(&term.data, &term.variable, value)?));
            mc_terms.push((size, lookup(&term.mc, &term.variable, value)?));
        }
        Ok((union_efficiency(&data_terms), union_efficiency(&mc_terms)))
    }

    /// Data over MC union efficiency
    pub fn weight(&self, event: &Event) -> Result<f64, UnionError> {
        let (data, mc) = self.union_efficiencies(event)?;
        if mc == 0.0 {
            return Err(UnionError::ZeroMcEfficiency);
        }
        Ok(data / mc)
    }

    /// Write `entry,weight` for every event of the channel in the ntuple. Returns the number of
    /// weighted events.
    pub fn process_ntuple(&self, input: &Path, output: &Path) -> Result<u64, UnionError> {
        let mut ntuple = NtupleFile::new(input)?;
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::io::BufWriter::new(std::fs::File::create(output)?);
        writeln!(out, "entry,weight")?;
        let mut entry: u64 = 0;
        let mut n_weighted: u64 = 0;
        while let Some(event) = ntuple.get_next_event()? {
            if self.channel.accepts(event.pair_type) {
                writeln!(out, "{},{}", entry, self.weight(&event)?)?;
                n_weighted += 1;
            }
            entry += 1;
        }
        out.flush()?;
        log::info!(
            "Weighted {} of {} events of {} in channel {}",
            n_weighted,
            entry,
            input.display(),
            self.channel
        );
        Ok(n_weighted)
    }
}
