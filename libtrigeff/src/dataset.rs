use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

use super::error::DatasetError;

/// Data-taking period. 2016APV shares the 2016 trigger table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Year {
    #[serde(rename = "2016")]
    Y2016,
    #[serde(rename = "2016APV")]
    Y2016APV,
    #[serde(rename = "2017")]
    Y2017,
    #[serde(rename = "2018")]
    Y2018,
}

impl Year {
    /// The year whose trigger table applies to this one
    pub fn table_year(&self) -> Self {
        match self {
            Self::Y2016APV => Self::Y2016,
            other => *other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Y2016 => "2016",
            Self::Y2016APV => "2016APV",
            Self::Y2017 => "2017",
            Self::Y2018 => "2018",
        }
    }
}

impl Display for Year {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Year {
    type Err = DatasetError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "2016" => Ok(Self::Y2016),
            "2016APV" => Ok(Self::Y2016APV),
            "2017" => Ok(Self::Y2017),
            "2018" => Ok(Self::Y2018),
            _ => Err(DatasetError::InvalidYear(s.to_string())),
        }
    }
}

/// Final state of the selected lepton pair, identified by the `pairType` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    MuTau,
    ETau,
    TauTau,
    MuMu,
    EE,
    EMu,
    /// Any of the three tau channels
    All,
}

impl Channel {
    pub const ALL_PAIRS: [Channel; 6] = [
        Channel::MuTau,
        Channel::ETau,
        Channel::TauTau,
        Channel::MuMu,
        Channel::EE,
        Channel::EMu,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MuTau => "mutau",
            Self::ETau => "etau",
            Self::TauTau => "tautau",
            Self::MuMu => "mumu",
            Self::EE => "ee",
            Self::EMu => "emu",
            Self::All => "all",
        }
    }

    /// Does an event with this `pairType` belong to the channel
    pub fn accepts(&self, pair_type: i64) -> bool {
        match self {
            Self::MuTau => pair_type == 0,
            Self::ETau => pair_type == 1,
            Self::TauTau => pair_type == 2,
            Self::MuMu => pair_type == 3,
            Self::EE => pair_type == 4,
            Self::EMu => pair_type == 5,
            Self::All => pair_type < 3,
        }
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Channel {
    type Err = DatasetError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mutau" => Ok(Self::MuTau),
            "etau" => Ok(Self::ETau),
            "tautau" => Ok(Self::TauTau),
            "mumu" => Ok(Self::MuMu),
            "ee" => Ok(Self::EE),
            "emu" => Ok(Self::EMu),
            "all" => Ok(Self::All),
            _ => Err(DatasetError::InvalidChannel(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleKind {
    Data,
    Mc,
}

impl Display for SampleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Data => write!(f, "data"),
            Self::Mc => write!(f, "mc"),
        }
    }
}

/// A named input sample: a set of folders, each holding `output_N.*` ntuples
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub kind: SampleKind,
    pub folders: Vec<String>,
}
