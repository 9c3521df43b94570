//! Deterministic names of histograms and output files.
//!
//! Histogram keys inside a file:
//!
//! ```text
//! Ref1D_{channel}_{variable}
//! Trig1D_{channel}_{variable}_TRG_{combination}_CUTS_{cut}
//! Ref2D_{channel}_{var1}_VS_{var2}
//! Trig2D_{channel}_{var1}_VS_{var2}_TRG_{combination}_CUTS_{cut}
//! ```
//!
//! Variables may contain underscores, channels may not.
use std::path::{Path, PathBuf};

use super::dataset::Channel;

pub const TRG_MARKER: &str = "_TRG_";
pub const CUTS_MARKER: &str = "_CUTS_";
pub const VS_MARKER: &str = "_VS_";

pub const HIST_EXTENSION: &str = "hist";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistKind {
    Ref1D,
    Trig1D,
    Ref2D,
    Trig2D,
}

impl HistKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Ref1D => "Ref1D",
            Self::Trig1D => "Trig1D",
            Self::Ref2D => "Ref2D",
            Self::Trig2D => "Trig2D",
        }
    }
}

pub fn pair_name(var1: &str, var2: &str) -> String {
    format!("{var1}{VS_MARKER}{var2}")
}

pub fn ref_key(kind: HistKind, channel: Channel, variable: &str) -> String {
    format!("{}_{}_{}", kind.prefix(), channel, variable)
}

pub fn trig_key(kind: HistKind, channel: Channel, variable: &str, comb: &str, cut: &str) -> String {
    format!(
        "{}_{}_{}{TRG_MARKER}{}{CUTS_MARKER}{}",
        kind.prefix(),
        channel,
        variable,
        comb,
        cut
    )
}

/// The pieces of a passing-histogram key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrigKey {
    pub kind: HistKind,
    pub channel: String,
    pub variable: String,
    pub combination: String,
    pub cut: String,
}

/// Split a `Trig1D`/`Trig2D` key. Reference keys give None.
pub fn parse_trig_key(key: &str) -> Option<TrigKey> {
    let (prefix, rest) = key.split_once('_')?;
    let kind = match prefix {
        "Trig1D" => HistKind::Trig1D,
        "Trig2D" => HistKind::Trig2D,
        _ => return None,
    };
    let (channel, rest) = rest.split_once('_')?;
    let (variable, rest) = rest.split_once(TRG_MARKER)?;
    let (combination, cut) = rest.split_once(CUTS_MARKER)?;
    if variable.is_empty() || combination.is_empty() || cut.is_empty() {
        return None;
    }
    Some(TrigKey {
        kind,
        channel: channel.to_string(),
        variable: variable.to_string(),
        combination: combination.to_string(),
        cut: cut.to_string(),
    })
}

/// The `_N` suffix of an `output_N.*` input file, empty if the name carries no number
pub fn file_number(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    match stem.rsplit_once('_') {
        Some((_, n)) if !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()) => format!("_{n}"),
        _ => String::new(),
    }
}

/// `{histo_dir}/{sample}/{prefix}{sample}{_N}{subtag}.hist`
pub fn histo_output(histo_dir: &Path, prefix: &str, sample: &str, number: &str, subtag: &str) -> PathBuf {
    histo_dir
        .join(sample)
        .join(format!("{prefix}{sample}{number}{subtag}.{HIST_EXTENSION}"))
}

/// `{histo_dir}/{prefix}{name}_Sum{subtag}.hist`
pub fn summed_output(histo_dir: &Path, prefix: &str, name: &str, subtag: &str) -> PathBuf {
    histo_dir.join(format!("{prefix}{name}_Sum{subtag}.{HIST_EXTENSION}"))
}

/// `{prefix}{sample}{_N}{subtag}.csv` next to the histogram outputs
pub fn counts_output(histo_dir: &Path, prefix: &str, sample: &str, number: &str, subtag: &str) -> PathBuf {
    histo_dir
        .join(sample)
        .join(format!("{prefix}{sample}{number}{subtag}.csv"))
}

/// Everything identifying one efficiency result
#[derive(Debug, Clone, Copy)]
pub struct ResultId<'a> {
    pub data: &'a str,
    pub mc: &'a str,
    pub channel: Channel,
    pub variable: &'a str,
    pub combination: &'a str,
    pub cut: &'a str,
}

/// `{results}/{channel}/{variable}/{prefix}{data}_{mc}_{channel}_{variable}_TRG_{comb}_CUTS_{cut}{subtag}.{ext}`
pub fn result_output(results_dir: &Path, prefix: &str, id: &ResultId, subtag: &str, ext: &str) -> PathBuf {
    results_dir
        .join(id.channel.as_str())
        .join(id.variable)
        .join(format!(
            "{prefix}{}_{}_{}_{}{TRG_MARKER}{}{CUTS_MARKER}{}{subtag}.{ext}",
            id.data, id.mc, id.channel, id.variable, id.combination, id.cut
        ))
}

/// Name of an object once merged into a per-channel file
pub fn aggregated_name(name: &str, variable: &str, combination: &str, cut: &str) -> String {
    format!("{name}_VAR_{variable}_TRG_{combination}_CUT_{cut}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trig_key_round_trip() {
        let key = trig_key(
            HistKind::Trig1D,
            Channel::MuTau,
            "metnomu_et",
            "IsoMu24_PLUS_METNoMu120",
            "metnomu_etG120",
        );
        assert_eq!(
            key,
            "Trig1D_mutau_metnomu_et_TRG_IsoMu24_PLUS_METNoMu120_CUTS_metnomu_etG120"
        );
        let parsed = parse_trig_key(&key).unwrap();
        assert_eq!(parsed.kind, HistKind::Trig1D);
        assert_eq!(parsed.channel, "mutau");
        assert_eq!(parsed.variable, "metnomu_et");
        assert_eq!(parsed.combination, "IsoMu24_PLUS_METNoMu120");
        assert_eq!(parsed.cut, "metnomu_etG120");
        assert!(parse_trig_key(&ref_key(HistKind::Ref1D, Channel::MuTau, "dau1_pt")).is_none());
    }

    #[test]
    fn test_file_names() {
        assert_eq!(file_number(Path::new("/in/MET2018A/output_12.txt")), "_12");
        assert_eq!(file_number(Path::new("/in/MET2018A/output.txt")), "");
        let out = histo_output(Path::new("/out/Tag"), "hist_", "TT", "_3", "_v2");
        assert_eq!(out, PathBuf::from("/out/Tag/TT/hist_TT_3_v2.hist"));
        let sum = summed_output(Path::new("/out/Tag"), "hist_", "Data_MET", "");
        assert_eq!(sum, PathBuf::from("/out/Tag/hist_Data_MET_Sum.hist"));
    }

    #[test]
    fn test_result_output() {
        let id = ResultId {
            data: "Data_MET",
            mc: "MC_TT",
            channel: Channel::ETau,
            variable: "dau1_pt",
            combination: "Ele32",
            cut: "NoCut",
        };
        assert_eq!(
            result_output(Path::new("/r"), "trigSF_", &id, "", "hist"),
            PathBuf::from("/r/etau/dau1_pt/trigSF_Data_MET_MC_TT_etau_dau1_pt_TRG_Ele32_CUTS_NoCut.hist")
        );
    }
}
