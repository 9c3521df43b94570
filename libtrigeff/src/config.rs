use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use super::combination::{generate_combinations, Exclusivity, TriggerCombination};
use super::dataset::{Channel, Sample, SampleKind, Year};
use super::error::{CombinationError, ConfigError};
use super::fit::{FitRange, SigmoidParams};
use super::histogram::Binning;
use super::job_writer::BatchConfig;
use super::selection::{CutOp, CutSpec};
use super::trigger_map::TriggerMap;

/// Prefix of every input ntuple file name
pub const INPUT_FILE_STEM: &str = "output_";

/// Structure representing the application configuration. Contains the analysis choices
/// (year, channels, variables, triggers, cuts), the sample layout and the batch settings.
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub year: Year,
    pub channels: Vec<Channel>,
    pub variables: Vec<String>,
    pub triggers: Vec<String>,
    pub exclusive: Exclusivity,
    pub binning: BTreeMap<String, Binning>,
    /// trigger -> variable -> cut
    pub cuts: BTreeMap<String, BTreeMap<String, CutSpec>>,
    /// variable -> variables whose cuts are skipped when filling it
    pub cuts_ignored: BTreeMap<String, Vec<String>>,
    pub fit_ranges: BTreeMap<String, FitRange>,
    pub fit_start_data: SigmoidParams,
    pub fit_start_mc: SigmoidParams,
    /// trigger -> variable pairs filled in 2D
    pub pairs_2d: BTreeMap<String, Vec<(String, String)>>,
    /// channel -> combination name -> variable binning its efficiency in the union weights
    pub discriminators: BTreeMap<Channel, BTreeMap<String, String>>,
    /// data sample name -> input folders
    pub data: BTreeMap<String, Vec<String>>,
    /// MC sample name -> input folders
    pub mc: BTreeMap<String, Vec<String>>,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub trigger_map_path: Option<PathBuf>,
    pub tag: String,
    pub subtag: String,
    pub histo_prefix: String,
    pub counts_prefix: String,
    pub sf_prefix: String,
    pub intersection_str: String,
    pub nocut_dummy: String,
    pub confidence_level: f64,
    pub n_threads: i32,
    pub batch: BatchConfig,
}

impl Default for Config {
    /// Generate a template Config for the 2018 tau channels. Paths are placeholders
    fn default() -> Self {
        let strings = |list: &[&str]| -> Vec<String> { list.iter().map(|s| s.to_string()).collect() };

        let mut exclusive = Exclusivity {
            general: ["METNoMu120", "IsoTau180", "VBFTauCustom"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            channels: BTreeMap::new(),
        };
        exclusive.channels.insert(
            Channel::ETau,
            ["Ele32", "EleIsoTauCustom"].iter().map(|s| s.to_string()).collect(),
        );
        exclusive.channels.insert(
            Channel::MuTau,
            ["IsoMu24", "IsoMuIsoTauCustom"].iter().map(|s| s.to_string()).collect(),
        );
        exclusive.channels.insert(
            Channel::TauTau,
            ["IsoDoubleTauCustom"].iter().map(|s| s.to_string()).collect(),
        );

        let mut binning = BTreeMap::new();
        binning.insert(
            String::from("metnomu_et"),
            Binning::Uniform { nbins: 20, low: 0.0, high: 450.0 },
        );
        binning.insert(
            String::from("mhtnomu_et"),
            Binning::Uniform { nbins: 20, low: 0.0, high: 450.0 },
        );
        binning.insert(
            String::from("dau1_pt"),
            Binning::Edges(vec![20.0, 30.0, 40.0, 50.0, 60.0, 80.0, 100.0, 150.0, 200.0, 350.0]),
        );
        binning.insert(
            String::from("dau2_pt"),
            Binning::Edges(vec![20.0, 30.0, 40.0, 50.0, 60.0, 80.0, 100.0, 150.0, 200.0, 350.0]),
        );

        let mut met_cuts = BTreeMap::new();
        met_cuts.insert(
            String::from("metnomu_et"),
            CutSpec { op: CutOp::Greater, thresholds: vec![120.0, 180.0] },
        );
        met_cuts.insert(
            String::from("mhtnomu_et"),
            CutSpec { op: CutOp::Greater, thresholds: vec![100.0] },
        );
        let mut cuts = BTreeMap::new();
        cuts.insert(String::from("METNoMu120"), met_cuts);

        let mut cuts_ignored = BTreeMap::new();
        cuts_ignored.insert(String::from("metnomu_et"), strings(&["mhtnomu_et"]));
        cuts_ignored.insert(String::from("mhtnomu_et"), strings(&["metnomu_et"]));

        let mut fit_ranges = BTreeMap::new();
        fit_ranges.insert(String::from("metnomu_et"), FitRange { low: 0.0, high: 450.0 });

        let mut pairs_2d = BTreeMap::new();
        pairs_2d.insert(
            String::from("METNoMu120"),
            vec![(String::from("metnomu_et"), String::from("mhtnomu_et"))],
        );

        let mut data = BTreeMap::new();
        data.insert(String::from("MET"), strings(&["MET2018A", "MET2018B", "MET2018C", "MET2018D"]));
        let mut mc = BTreeMap::new();
        mc.insert(
            String::from("TT"),
            strings(&["TT_fullyHad", "TT_fullyLep", "TT_semiLep"]),
        );

        Self {
            year: Year::Y2018,
            channels: vec![Channel::ETau, Channel::MuTau, Channel::TauTau],
            variables: strings(&["metnomu_et", "mhtnomu_et", "dau1_pt", "dau2_pt"]),
            triggers: strings(&[
                "IsoMu24",
                "Ele32",
                "METNoMu120",
                "IsoTau180",
                "IsoDoubleTauCustom",
                "IsoMuIsoTauCustom",
                "EleIsoTauCustom",
                "VBFTauCustom",
            ]),
            exclusive,
            binning,
            cuts,
            cuts_ignored,
            fit_ranges,
            fit_start_data: SigmoidParams::DATA_START,
            fit_start_mc: SigmoidParams::MC_START,
            pairs_2d,
            discriminators: BTreeMap::new(),
            data,
            mc,
            input_path: PathBuf::from("None"),
            output_path: PathBuf::from("None"),
            trigger_map_path: None,
            tag: String::from("Tag"),
            subtag: String::from(""),
            histo_prefix: String::from("hist_"),
            counts_prefix: String::from("counts_"),
            sf_prefix: String::from("trigSF_"),
            intersection_str: String::from("_PLUS_"),
            nocut_dummy: String::from("NoCut"),
            confidence_level: 0.95,
            n_threads: 1,
            batch: BatchConfig::default(),
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Check the internal consistency of the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.is_n_threads_valid() {
            return Err(ConfigError::InvalidThreads(self.n_threads));
        }
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(ConfigError::InvalidConfidenceLevel(self.confidence_level));
        }
        for var in self.variables.iter() {
            match self.binning.get(var) {
                Some(b) => b.validate()?,
                None => return Err(ConfigError::MissingBinning(var.clone())),
            }
        }
        for (trigger, var_cuts) in self.cuts.iter() {
            if !self.triggers.contains(trigger) {
                return Err(ConfigError::UnknownTrigger(trigger.clone()));
            }
            for (var, cut) in var_cuts.iter() {
                if !self.variables.contains(var) {
                    return Err(ConfigError::UnknownCutVariable {
                        trigger: trigger.clone(),
                        variable: var.clone(),
                    });
                }
                if cut.thresholds.is_empty() {
                    return Err(ConfigError::EmptyCut(trigger.clone()));
                }
            }
        }
        for (var, ignored) in self.cuts_ignored.iter() {
            if ignored.contains(var) {
                return Err(ConfigError::SelfIgnoredCut(var.clone()));
            }
        }
        for var in self.fit_ranges.keys() {
            if !self.variables.contains(var) {
                return Err(ConfigError::UnknownVariable(var.clone()));
            }
        }
        for (trigger, pairs) in self.pairs_2d.iter() {
            if !self.triggers.contains(trigger) {
                return Err(ConfigError::UnknownTrigger(trigger.clone()));
            }
            for (v1, v2) in pairs.iter() {
                for v in [v1, v2] {
                    if !self.variables.contains(v) {
                        return Err(ConfigError::UnknownVariable(v.clone()));
                    }
                }
            }
        }
        for var in self.discriminators.values().flat_map(|m| m.values()) {
            if !self.variables.contains(var) {
                return Err(ConfigError::UnknownVariable(var.clone()));
            }
        }
        if self.data.is_empty() || self.mc.is_empty() {
            return Err(ConfigError::NoSamples);
        }
        Ok(())
    }

    /// Load the trigger table, falling back to the bundled one
    pub fn load_trigger_map(&self) -> Result<TriggerMap, ConfigError> {
        let map = TriggerMap::new(self.trigger_map_path.as_deref())?;
        for trigger in self.triggers.iter() {
            map.lookup(self.year, trigger)?;
        }
        Ok(map)
    }

    /// All samples, data first
    pub fn samples(&self) -> Vec<Sample> {
        let data = self.data.iter().map(|(name, folders)| Sample {
            name: name.clone(),
            kind: SampleKind::Data,
            folders: folders.clone(),
        });
        let mc = self.mc.iter().map(|(name, folders)| Sample {
            name: name.clone(),
            kind: SampleKind::Mc,
            folders: folders.clone(),
        });
        data.chain(mc).collect()
    }

    pub fn find_sample(&self, name: &str) -> Result<Sample, ConfigError> {
        self.samples()
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ConfigError::UnknownSample(name.to_string()))
    }

    /// Get all of the `output_N.*` input files of a sample, sorted
    pub fn get_sample_files(&self, sample: &Sample) -> Result<Vec<PathBuf>, ConfigError> {
        let mut file_list: Vec<PathBuf> = Vec::new();
        for folder in sample.folders.iter() {
            let dir = self.input_path.join(folder);
            if !dir.exists() {
                return Err(ConfigError::BadFilePath(dir));
            }
            for item in dir.read_dir()? {
                let item_path = item?.path();
                let is_input = item_path
                    .file_name()
                    .map(|n| n.to_string_lossy().starts_with(INPUT_FILE_STEM))
                    .unwrap_or(false);
                if is_input && item_path.is_file() {
                    file_list.push(item_path);
                }
            }
        }

        if file_list.is_empty() {
            return Err(ConfigError::NoMatchingFiles(sample.name.clone()));
        }
        file_list.sort();
        Ok(file_list)
    }

    /// Directory holding the per-file and summed histogram files
    pub fn get_histo_directory(&self) -> PathBuf {
        self.output_path.join(&self.tag)
    }

    /// Directory holding efficiency and scale factor results
    pub fn get_results_directory(&self) -> PathBuf {
        self.get_histo_directory().join("results")
    }

    /// Directory holding the per-channel aggregated results
    pub fn get_aggregate_directory(&self) -> PathBuf {
        self.get_histo_directory().join("aggregated")
    }

    /// Name under which all data samples are summed
    pub fn data_name(&self) -> String {
        let keys: Vec<&str> = self.data.keys().map(|k| k.as_str()).collect();
        format!("Data_{}", keys.join("_"))
    }

    /// Name under which all MC samples are summed
    pub fn mc_name(&self) -> String {
        let keys: Vec<&str> = self.mc.keys().map(|k| k.as_str()).collect();
        format!("MC_{}", keys.join("_"))
    }

    pub fn summed_name(&self, kind: SampleKind) -> String {
        match kind {
            SampleKind::Data => self.data_name(),
            SampleKind::Mc => self.mc_name(),
        }
    }

    pub fn fit_start(&self, kind: SampleKind) -> SigmoidParams {
        match kind {
            SampleKind::Data => self.fit_start_data,
            SampleKind::Mc => self.fit_start_mc,
        }
    }

    /// Trigger combinations evaluated in a channel
    pub fn combinations(&self, channel: Channel) -> Result<Vec<TriggerCombination>, CombinationError> {
        generate_combinations(channel, &self.triggers, &self.exclusive)
    }

    /// Union of the combinations of every configured channel
    pub fn all_combinations(&self) -> Result<BTreeSet<TriggerCombination>, CombinationError> {
        let mut all = BTreeSet::new();
        for chn in self.channels.iter() {
            all.extend(self.combinations(*chn)?);
        }
        Ok(all)
    }

    pub fn is_n_threads_valid(&self) -> bool {
        self.n_threads >= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.load_trigger_map().is_ok());
        assert_eq!(config.data_name(), "Data_MET");
        assert_eq!(config.mc_name(), "MC_TT");
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.triggers, config.triggers);
        assert_eq!(back.binning, config.binning);
        assert_eq!(back.exclusive, config.exclusive);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();
        config.n_threads = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidThreads(0))));

        let mut config = Config::default();
        config.variables.push(String::from("HT20"));
        assert!(matches!(config.validate(), Err(ConfigError::MissingBinning(_))));

        let mut config = Config::default();
        config
            .cuts_ignored
            .insert(String::from("dau1_pt"), vec![String::from("dau1_pt")]);
        assert!(matches!(config.validate(), Err(ConfigError::SelfIgnoredCut(_))));

        let mut config = Config::default();
        config.pairs_2d.insert(
            String::from("IsoMu24"),
            vec![(String::from("dau1_pt"), String::from("HT20"))],
        );
        assert!(matches!(config.validate(), Err(ConfigError::UnknownVariable(_))));
    }

    #[test]
    fn test_sample_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.input_path = dir.path().to_path_buf();
        config.data.clear();
        config.data.insert(String::from("MET"), vec![String::from("MET2018A")]);
        let folder = dir.path().join("MET2018A");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("output_2.txt"), "").unwrap();
        std::fs::write(folder.join("output_1.txt"), "").unwrap();
        std::fs::write(folder.join("goodfiles.txt"), "").unwrap();

        let sample = config.find_sample("MET").unwrap();
        let files = config.get_sample_files(&sample).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("output_1.txt"));

        let mc = config.find_sample("TT").unwrap();
        assert!(matches!(
            config.get_sample_files(&mc),
            Err(ConfigError::BadFilePath(_))
        ));
    }

    #[test]
    fn test_combinations_per_channel() {
        let config = Config::default();
        let mutau = config.combinations(Channel::MuTau).unwrap();
        assert!(mutau.iter().all(|c| !c.contains("Ele32")));
        let all = config.all_combinations().unwrap();
        assert!(all.len() >= mutau.len());
    }
}
