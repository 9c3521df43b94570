//! Event selection: channel, trigger combinations and offline cuts.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::combination::TriggerCombination;
use super::dataset::{Channel, SampleKind, Year};
use super::error::SelectionError;
use super::ntuple::Event;
use super::trigger_map::{TriggerDef, TriggerMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CutOp {
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = "<")]
    Less,
    #[serde(rename = ">=")]
    GreaterEq,
    #[serde(rename = "<=")]
    LessEq,
    #[serde(rename = "==")]
    Equal,
}

impl CutOp {
    pub fn apply(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Greater => value > threshold,
            Self::Less => value < threshold,
            Self::GreaterEq => value >= threshold,
            Self::LessEq => value <= threshold,
            Self::Equal => value == threshold,
        }
    }

    /// Tag used when the cut is written into a name
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Greater => "G",
            Self::Less => "L",
            Self::GreaterEq => "GEQ",
            Self::LessEq => "LEQ",
            Self::Equal => "EQ",
        }
    }
}

/// A cut on one variable; each threshold defines its own variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CutSpec {
    pub op: CutOp,
    pub thresholds: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cut {
    pub variable: String,
    pub op: CutOp,
    pub threshold: f64,
}

impl Cut {
    /// e.g. `metnomu_etG120`, `dau1_ptGEQ40p5`
    pub fn name(&self) -> String {
        let thr = format!("{}", self.threshold).replace('.', "p").replace('-', "m");
        format!("{}{}{}", self.variable, self.op.tag(), thr)
    }
}

/// An offline selection applied on top of a trigger combination.
/// The variant without cuts carries the no-cut dummy name.
#[derive(Debug, Clone, PartialEq)]
pub struct CutVariant {
    pub name: String,
    pub cut: Option<Cut>,
}

impl CutVariant {
    /// Apply the cut to an event filled in `variable`. Cuts on the filled variable, or on
    /// variables it ignores, always pass.
    pub fn passes(
        &self,
        event: &Event,
        variable: &str,
        cuts_ignored: &BTreeMap<String, Vec<String>>,
    ) -> Result<bool, SelectionError> {
        let cut = match &self.cut {
            Some(c) => c,
            None => return Ok(true),
        };
        if cut.variable == variable {
            return Ok(true);
        }
        if let Some(ignored) = cuts_ignored.get(variable) {
            if ignored.contains(&cut.variable) {
                return Ok(true);
            }
        }
        let value = event
            .get(&cut.variable)
            .ok_or_else(|| SelectionError::MissingField(cut.variable.clone()))?;
        Ok(cut.op.apply(value, cut.threshold))
    }
}

/// The no-cut variant followed by one variant per (variable, threshold) of each trigger in the
/// combination
pub fn cut_variants(
    combination: &TriggerCombination,
    cuts: &BTreeMap<String, BTreeMap<String, CutSpec>>,
    nocut_dummy: &str,
) -> Vec<CutVariant> {
    let mut variants = vec![CutVariant {
        name: nocut_dummy.to_string(),
        cut: None,
    }];
    for trigger in combination.triggers() {
        let Some(var_cuts) = cuts.get(trigger) else {
            continue;
        };
        for (variable, spec) in var_cuts.iter() {
            for threshold in spec.thresholds.iter() {
                let cut = Cut {
                    variable: variable.clone(),
                    op: spec.op,
                    threshold: *threshold,
                };
                let name = cut.name();
                if variants.iter().all(|v| v.name != name) {
                    variants.push(CutVariant { name, cut: Some(cut) });
                }
            }
        }
    }
    variants
}

/// Selector evaluates trigger decisions for one year and sample kind.
#[derive(Debug)]
pub struct Selector<'a> {
    map: &'a TriggerMap,
    year: Year,
    kind: SampleKind,
}

impl<'a> Selector<'a> {
    pub fn new(map: &'a TriggerMap, year: Year, kind: SampleKind) -> Self {
        Self { map, year, kind }
    }

    /// AND over the requested triggers. Every trigger is looked up before any is evaluated so
    /// that an unknown trigger is always reported.
    pub fn passes(&self, event: &Event, triggers: &[String]) -> Result<bool, SelectionError> {
        let defs = triggers
            .iter()
            .map(|t| self.map.lookup(self.year, t))
            .collect::<Result<Vec<&TriggerDef>, _>>()?;
        Ok(defs
            .iter()
            .all(|def| def.fires(self.kind, event.triggerbit, event.run)))
    }

    pub fn passes_combination(
        &self,
        event: &Event,
        combination: &TriggerCombination,
    ) -> Result<bool, SelectionError> {
        self.passes(event, combination.triggers())
    }

    /// OR over the requested triggers
    pub fn passes_any(&self, event: &Event, triggers: &[String]) -> Result<bool, SelectionError> {
        let defs = triggers
            .iter()
            .map(|t| self.map.lookup(self.year, t))
            .collect::<Result<Vec<&TriggerDef>, _>>()?;
        Ok(defs
            .iter()
            .any(|def| def.fires(self.kind, event.triggerbit, event.run)))
    }
}

/// Does the event belong to the channel
pub fn in_channel(channel: Channel, event: &Event) -> bool {
    channel.accepts(event.pair_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(triggerbit: u64, run: u32, met: f64, mht: f64) -> Event {
        Event::from_pairs(0, triggerbit, run, &[("metnomu_et", met), ("mhtnomu_et", mht)])
    }

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_and_over_triggers() {
        let map = TriggerMap::new(None).unwrap();
        let selector = Selector::new(&map, Year::Y2018, SampleKind::Mc);
        let both = (1u64 << 0) | (1u64 << 40);
        let evt = event(both, 1, 150.0, 120.0);
        assert!(selector
            .passes(&evt, &strings(&["IsoMu24", "METNoMu120"]))
            .unwrap());
        let only_mu = event(1, 1, 150.0, 120.0);
        assert!(!selector
            .passes(&only_mu, &strings(&["IsoMu24", "METNoMu120"]))
            .unwrap());
        assert!(selector
            .passes_any(&only_mu, &strings(&["IsoMu24", "METNoMu120"]))
            .unwrap());
    }

    #[test]
    fn test_unknown_trigger_fails() {
        let map = TriggerMap::new(None).unwrap();
        let selector = Selector::new(&map, Year::Y2017, SampleKind::Data);
        let evt = event(0, 300000, 0.0, 0.0);
        // The first trigger already fails, the unknown one must still be reported
        assert!(selector
            .passes(&evt, &strings(&["IsoMu27", "IsoMu24"]))
            .is_err());
    }

    #[test]
    fn test_data_and_mc_bits_differ() {
        let map = TriggerMap::new(None).unwrap();
        let comb = TriggerCombination::new(["EleIsoTauCustom"]).unwrap();
        let evt = event(1 << 11, 316000, 0.0, 0.0);
        let data = Selector::new(&map, Year::Y2018, SampleKind::Data);
        let mc = Selector::new(&map, Year::Y2018, SampleKind::Mc);
        assert!(data.passes_combination(&evt, &comb).unwrap());
        assert!(!mc.passes_combination(&evt, &comb).unwrap());
    }

    #[test]
    fn test_cut_variants_and_names() {
        let mut met = BTreeMap::new();
        met.insert(
            String::from("metnomu_et"),
            CutSpec { op: CutOp::Greater, thresholds: vec![120.0, 180.5] },
        );
        let mut cuts = BTreeMap::new();
        cuts.insert(String::from("METNoMu120"), met);

        let comb = TriggerCombination::new(["IsoMu24", "METNoMu120"]).unwrap();
        let variants = cut_variants(&comb, &cuts, "NoCut");
        let names: Vec<&str> = variants.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["NoCut", "metnomu_etG120", "metnomu_etG180p5"]);

        let plain = TriggerCombination::new(["IsoMu24"]).unwrap();
        assert_eq!(cut_variants(&plain, &cuts, "NoCut").len(), 1);
    }

    #[test]
    fn test_cuts_ignored() {
        let cut = CutVariant {
            name: String::from("metnomu_etG120"),
            cut: Some(Cut {
                variable: String::from("metnomu_et"),
                op: CutOp::Greater,
                threshold: 120.0,
            }),
        };
        let mut ignored = BTreeMap::new();
        ignored.insert(String::from("mhtnomu_et"), vec![String::from("metnomu_et")]);

        let low_met = event(0, 1, 50.0, 200.0);
        // Filling the cut variable itself
        assert!(cut.passes(&low_met, "metnomu_et", &ignored).unwrap());
        // Filling a variable which ignores the cut
        assert!(cut.passes(&low_met, "mhtnomu_et", &ignored).unwrap());
        // Filling an unrelated variable
        assert!(!cut.passes(&low_met, "dau1_pt", &ignored).unwrap());
        let high_met = event(0, 1, 150.0, 200.0);
        assert!(cut.passes(&high_met, "dau1_pt", &ignored).unwrap());
    }

    #[test]
    fn test_channel_selection() {
        let evt = event(0, 1, 0.0, 0.0);
        assert!(in_channel(Channel::MuTau, &evt));
        assert!(in_channel(Channel::All, &evt));
        assert!(!in_channel(Channel::TauTau, &evt));
    }
}
