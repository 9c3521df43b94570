//! Static table of trigger bit positions in the `triggerbit` field.
//!
//! Each year maps trigger names to a [`TriggerDef`]. A plain definition gives the bit (or the
//! alternative bits) for data and for simulation. A composite definition is a list of named
//! sub-triggers, each of which may only apply to a range of data runs; the composite fires if
//! any applicable sub-trigger fires.
use bitvec::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::dataset::{SampleKind, Year};
use super::error::TriggerMapError;

/// Width of the `triggerbit` field
pub const TRIGGER_BITS: u32 = 64;

/// Load the bundled trigger table for windows
#[cfg(target_family = "windows")]
fn load_default_map() -> String {
    String::from(include_str!("data\\trigger_map.yml"))
}

/// Load the bundled trigger table for macos and linux
#[cfg(target_family = "unix")]
fn load_default_map() -> String {
    String::from(include_str!("data/trigger_map.yml"))
}

/// One bit, or a set of alternative bits of which any may fire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TriggerBits {
    Single(u32),
    AnyOf(Vec<u32>),
}

impl TriggerBits {
    pub fn positions(&self) -> &[u32] {
        match self {
            Self::Single(bit) => std::slice::from_ref(bit),
            Self::AnyOf(bits) => bits,
        }
    }

    /// OR over the bit positions
    pub fn fires(&self, triggerbit: u64) -> bool {
        let bits = triggerbit.view_bits::<Lsb0>();
        self.positions()
            .iter()
            .any(|pos| bits.get(*pos as usize).map(|b| *b).unwrap_or(false))
    }
}

/// Half-open run interval `[first, last)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRange {
    pub first: u32,
    pub last: u32,
}

impl RunRange {
    pub fn contains(&self, run: u32) -> bool {
        run >= self.first && run < self.last
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubTrigger {
    pub name: String,
    pub mc: TriggerBits,
    pub data: TriggerBits,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runs: Option<RunRange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TriggerDef {
    Plain { mc: TriggerBits, data: TriggerBits },
    Composite { custom: Vec<SubTrigger> },
}

impl TriggerDef {
    /// Evaluate the trigger for one event. Run ranges only restrict data.
    pub fn fires(&self, kind: SampleKind, triggerbit: u64, run: u32) -> bool {
        match self {
            Self::Plain { mc, data } => match kind {
                SampleKind::Mc => mc.fires(triggerbit),
                SampleKind::Data => data.fires(triggerbit),
            },
            Self::Composite { custom } => custom.iter().any(|sub| match kind {
                SampleKind::Mc => sub.mc.fires(triggerbit),
                SampleKind::Data => {
                    sub.runs.map(|r| r.contains(run)).unwrap_or(true) && sub.data.fires(triggerbit)
                }
            }),
        }
    }

    fn all_bits(&self) -> Vec<&TriggerBits> {
        match self {
            Self::Plain { mc, data } => vec![mc, data],
            Self::Composite { custom } => custom.iter().flat_map(|s| [&s.mc, &s.data]).collect(),
        }
    }

    fn validate(&self, name: &str) -> Result<(), TriggerMapError> {
        if let Self::Composite { custom } = self {
            if custom.is_empty() {
                return Err(TriggerMapError::EmptyDefinition(name.to_string()));
            }
        }
        for bits in self.all_bits() {
            if bits.positions().is_empty() {
                return Err(TriggerMapError::EmptyDefinition(name.to_string()));
            }
            if let Some(bit) = bits.positions().iter().find(|b| **b >= TRIGGER_BITS) {
                return Err(TriggerMapError::BitOutOfRange {
                    trigger: name.to_string(),
                    bit: *bit,
                });
            }
        }
        Ok(())
    }
}

/// TriggerMap holds the trigger definitions of every year.
///
/// If no path is given the table bundled with the library is used. Tables are never
/// modified after loading.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerMap {
    years: BTreeMap<Year, BTreeMap<String, TriggerDef>>,
}

impl TriggerMap {
    pub fn new(path: Option<&Path>) -> Result<Self, TriggerMapError> {
        let mut contents = String::new();
        if let Some(p) = path {
            let mut file = File::open(p)?;
            file.read_to_string(&mut contents)?;
        } else {
            contents = load_default_map();
        }
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, TriggerMapError> {
        let map: Self = serde_yaml::from_str(contents)?;
        for triggers in map.years.values() {
            for (name, def) in triggers.iter() {
                def.validate(name)?;
            }
        }
        Ok(map)
    }

    fn table(&self, year: Year) -> Result<&BTreeMap<String, TriggerDef>, TriggerMapError> {
        self.years
            .get(&year)
            .or_else(|| self.years.get(&year.table_year()))
            .ok_or(TriggerMapError::UnknownYear(year))
    }

    /// Get the definition of a trigger for a year
    pub fn lookup(&self, year: Year, trigger: &str) -> Result<&TriggerDef, TriggerMapError> {
        self.table(year)?
            .get(trigger)
            .ok_or_else(|| TriggerMapError::UnknownTrigger {
                trigger: trigger.to_string(),
                year,
            })
    }

    pub fn contains(&self, year: Year, trigger: &str) -> bool {
        self.lookup(year, trigger).is_ok()
    }

    /// All trigger names known for a year, sorted
    pub fn trigger_names(&self, year: Year) -> Result<Vec<&str>, TriggerMapError> {
        Ok(self.table(year)?.keys().map(|k| k.as_str()).collect())
    }
}
