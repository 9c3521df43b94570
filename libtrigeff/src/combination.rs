//! Enumeration of trigger combinations.
//!
//! A combination is the logical AND of a set of triggers. Which triggers may be combined
//! depends on the channel: a trigger listed as exclusive to one channel cannot appear in
//! combinations evaluated for any other channel, while triggers in the `general` list are
//! usable everywhere.
use bit_set::BitSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

use super::dataset::Channel;
use super::error::CombinationError;

/// Largest trigger list we enumerate the power set of
pub const MAX_TRIGGERS: usize = 20;

/// A lexically sorted, duplicate-free set of trigger names
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TriggerCombination(Vec<String>);

impl TriggerCombination {
    pub fn new<I, S>(triggers: I) -> Result<Self, CombinationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = triggers.into_iter().map(|t| t.into()).collect();
        names.sort();
        names.dedup();
        if names.is_empty() {
            return Err(CombinationError::Empty);
        }
        Ok(Self(names))
    }

    pub fn triggers(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, trigger: &str) -> bool {
        self.0.iter().any(|t| t == trigger)
    }

    /// Name of the combination, e.g. `IsoMu24_PLUS_METNoMu120`
    pub fn join(&self, sep: &str) -> String {
        self.0.join(sep)
    }

    /// Inverse of [`TriggerCombination::join`]
    pub fn parse(name: &str, sep: &str) -> Result<Self, CombinationError> {
        Self::new(name.split(sep).filter(|s| !s.is_empty()))
    }
}

impl Display for TriggerCombination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({})", self.0.join(", "))
    }
}

/// Which triggers are reserved for which channel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Exclusivity {
    /// Triggers usable in every channel
    #[serde(default)]
    pub general: BTreeSet<String>,
    /// Triggers usable only in the keyed channel
    #[serde(default)]
    pub channels: BTreeMap<Channel, BTreeSet<String>>,
}

impl Exclusivity {
    /// Union of the exclusive lists of every other channel
    pub fn forbidden_for(&self, channel: Channel) -> BTreeSet<&str> {
        self.channels
            .iter()
            .filter(|(chn, _)| **chn != channel)
            .flat_map(|(_, triggers)| triggers.iter().map(|t| t.as_str()))
            .filter(|t| !self.exclusive_to(channel).contains(t))
            .collect()
    }

    fn exclusive_to(&self, channel: Channel) -> BTreeSet<&str> {
        self.channels
            .get(&channel)
            .map(|ts| ts.iter().map(|t| t.as_str()).collect())
            .unwrap_or_default()
    }
}

/// Every non-empty subset of `triggers` allowed in `channel`, ordered by size and then lexically.
pub fn generate_combinations(
    channel: Channel,
    triggers: &[String],
    exclusivity: &Exclusivity,
) -> Result<Vec<TriggerCombination>, CombinationError> {
    let universe: Vec<&str> = triggers
        .iter()
        .map(|t| t.as_str())
        .collect::<BTreeSet<&str>>()
        .into_iter()
        .collect();
    if universe.len() > MAX_TRIGGERS {
        return Err(CombinationError::TooManyTriggers(universe.len()));
    }

    let forbidden_names = exclusivity.forbidden_for(channel);
    let forbidden: BitSet = universe
        .iter()
        .enumerate()
        .filter(|(_, t)| forbidden_names.contains(*t))
        .map(|(i, _)| i)
        .collect();

    let mut combinations: Vec<TriggerCombination> = Vec::new();
    for mask in 1u64..(1u64 << universe.len()) {
        let members: BitSet = (0..universe.len()).filter(|i| mask >> i & 1 == 1).collect();
        if !members.is_disjoint(&forbidden) {
            continue;
        }
        combinations.push(TriggerCombination::new(
            members.iter().map(|i| universe[i]),
        )?);
    }

    combinations.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
    Ok(combinations)
}

/// Is every trigger of the combination configured and allowed in the channel
pub fn is_combination_in_channel(
    channel: Channel,
    combination: &TriggerCombination,
    triggers: &[String],
    exclusivity: &Exclusivity,
) -> bool {
    let forbidden = exclusivity.forbidden_for(channel);
    combination
        .triggers()
        .iter()
        .all(|t| triggers.contains(t) && !forbidden.contains(t.as_str()))
}

/// Check a user-supplied list of combinations for a channel
pub fn validate_combinations(
    channel: Channel,
    combinations: &[TriggerCombination],
    triggers: &[String],
    exclusivity: &Exclusivity,
    sep: &str,
) -> Result<(), CombinationError> {
    let mut seen: BTreeSet<&TriggerCombination> = BTreeSet::new();
    for comb in combinations {
        if let Some(t) = comb.triggers().iter().find(|t| !triggers.contains(t)) {
            return Err(CombinationError::UnknownTrigger(t.clone()));
        }
        if !is_combination_in_channel(channel, comb, triggers, exclusivity) {
            return Err(CombinationError::NotInChannel {
                combination: comb.join(sep),
                channel,
            });
        }
        if !seen.insert(comb) {
            return Err(CombinationError::Duplicate(comb.join(sep)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn exclusivity() -> Exclusivity {
        let mut excl = Exclusivity::default();
        excl.general = ["METNoMu120", "IsoTau180"].iter().map(|s| s.to_string()).collect();
        excl.channels
            .insert(Channel::MuTau, ["IsoMu24"].iter().map(|s| s.to_string()).collect());
        excl.channels
            .insert(Channel::ETau, ["Ele32"].iter().map(|s| s.to_string()).collect());
        excl
    }

    #[test]
    fn test_combinations_respect_exclusivity() {
        let triggers = names(&["IsoMu24", "Ele32", "METNoMu120", "IsoTau180"]);
        let excl = exclusivity();
        let combs = generate_combinations(Channel::MuTau, &triggers, &excl).unwrap();
        // 3 allowed triggers -> 7 subsets
        assert_eq!(combs.len(), 7);
        for comb in combs.iter() {
            assert!(!comb.contains("Ele32"));
            assert!(is_combination_in_channel(Channel::MuTau, comb, &triggers, &excl));
        }
        let etau = generate_combinations(Channel::ETau, &triggers, &excl).unwrap();
        assert!(etau.iter().all(|c| !c.contains("IsoMu24")));
    }

    #[test]
    fn test_combination_order() {
        let triggers = names(&["METNoMu120", "IsoTau180", "IsoMu24"]);
        let combs = generate_combinations(Channel::MuTau, &triggers, &exclusivity()).unwrap();
        let joined: Vec<String> = combs.iter().map(|c| c.join("_PLUS_")).collect();
        assert_eq!(
            joined,
            vec![
                "IsoMu24",
                "IsoTau180",
                "METNoMu120",
                "IsoMu24_PLUS_IsoTau180",
                "IsoMu24_PLUS_METNoMu120",
                "IsoTau180_PLUS_METNoMu120",
                "IsoMu24_PLUS_IsoTau180_PLUS_METNoMu120",
            ]
        );
    }

    #[test]
    fn test_join_and_parse() {
        let comb = TriggerCombination::new(["METNoMu120", "IsoMu24", "IsoMu24"]).unwrap();
        assert_eq!(comb.len(), 2);
        let name = comb.join("_PLUS_");
        assert_eq!(name, "IsoMu24_PLUS_METNoMu120");
        assert_eq!(TriggerCombination::parse(&name, "_PLUS_").unwrap(), comb);
        assert!(TriggerCombination::parse("", "_PLUS_").is_err());
    }

    #[test]
    fn test_validate_combinations() {
        let triggers = names(&["IsoMu24", "Ele32", "METNoMu120"]);
        let excl = exclusivity();
        let good = vec![TriggerCombination::new(["IsoMu24", "METNoMu120"]).unwrap()];
        assert!(validate_combinations(Channel::MuTau, &good, &triggers, &excl, "_PLUS_").is_ok());
        let bad = vec![TriggerCombination::new(["Ele32"]).unwrap()];
        assert!(matches!(
            validate_combinations(Channel::MuTau, &bad, &triggers, &excl, "_PLUS_"),
            Err(CombinationError::NotInChannel { .. })
        ));
        let dup = vec![good[0].clone(), good[0].clone()];
        assert!(matches!(
            validate_combinations(Channel::MuTau, &dup, &triggers, &excl, "_PLUS_"),
            Err(CombinationError::Duplicate(_))
        ));
    }
}
