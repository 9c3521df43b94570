use std::collections::BTreeMap;
use std::path::Path;
use std::sync::mpsc;

use approx::assert_relative_eq;
use libtrigeff::aggregate::{aggregate, aggregated_path};
use libtrigeff::combination::Exclusivity;
use libtrigeff::config::Config;
use libtrigeff::dataset::{Channel, SampleKind};
use libtrigeff::eff_sf::{run_eff_sf, summed_path, EFF_DATA_1D, EFF_MC_1D};
use libtrigeff::hist_file::HistFile;
use libtrigeff::histogram::Binning;
use libtrigeff::naming::aggregated_name;
use libtrigeff::process::{collect_jobs, create_subsets, hadd, process_subset};
use libtrigeff::producer::ProductionMode;
use libtrigeff::selection::{CutOp, CutSpec};
use libtrigeff::union::UnionWeightCalculator;

const ISO_MU: u64 = 1;
const MET: u64 = 1 << 40;

const HEADER: &str = "pairType,triggerbit,RunNumber,metnomu_et";

fn row(triggerbit: u64, met: f64) -> String {
    format!("0,{triggerbit},320000,{met}")
}

fn write_ntuple(path: &Path, rows: &[String]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut text = String::from(HEADER);
    for r in rows {
        text.push('\n');
        text.push_str(r);
    }
    text.push('\n');
    std::fs::write(path, text).unwrap();
}

fn strings(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn workflow_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.channels = vec![Channel::MuTau];
    config.variables = strings(&["metnomu_et"]);
    config.triggers = strings(&["IsoMu24", "METNoMu120"]);
    config.exclusive = Exclusivity::default();
    config.binning = BTreeMap::from([(
        String::from("metnomu_et"),
        Binning::Uniform { nbins: 4, low: 0.0, high: 400.0 },
    )]);
    config.cuts = BTreeMap::from([(
        String::from("METNoMu120"),
        BTreeMap::from([(
            String::from("metnomu_et"),
            CutSpec { op: CutOp::Greater, thresholds: vec![120.0] },
        )]),
    )]);
    config.cuts_ignored.clear();
    config.fit_ranges.clear();
    config.pairs_2d.clear();
    config.discriminators = BTreeMap::from([(
        Channel::MuTau,
        BTreeMap::from([
            (String::from("IsoMu24"), String::from("metnomu_et")),
            (String::from("METNoMu120"), String::from("metnomu_et")),
            (String::from("IsoMu24_PLUS_METNoMu120"), String::from("metnomu_et")),
        ]),
    )]);
    config.data = BTreeMap::from([(String::from("MET"), strings(&["MET2018A"]))]);
    config.mc = BTreeMap::from([(String::from("TT"), strings(&["TT_semiLep"]))]);
    config.input_path = root.join("input");
    config.output_path = root.join("output");
    config.n_threads = 2;
    config
}

fn write_inputs(config: &Config) {
    let mc_rows = vec![
        row(ISO_MU, 50.0),
        row(ISO_MU | MET, 150.0),
        row(MET, 250.0),
        row(MET, 350.0),
    ];
    let mut data_rows = mc_rows.clone();
    data_rows.push(row(0, 350.0));
    for file in ["output_0.txt", "output_1.txt"] {
        write_ntuple(&config.input_path.join("MET2018A").join(file), &data_rows);
    }
    write_ntuple(&config.input_path.join("TT_semiLep").join("output_0.txt"), &mc_rows);
}

#[test]
fn test_full_workflow() {
    let dir = tempfile::tempdir().unwrap();
    let config = workflow_config(dir.path());
    config.validate().unwrap();
    write_inputs(&config);

    // Fill
    let jobs = collect_jobs(&config).unwrap();
    assert_eq!(jobs.len(), 3);
    let (tx, rx) = mpsc::channel();
    for (idx, subset) in create_subsets(&config, jobs).into_iter().enumerate() {
        process_subset(config.clone(), tx.clone(), idx, subset, ProductionMode::Histograms).unwrap();
    }
    assert!(rx.try_iter().any(|s| s.progress == 1.0));

    // Sum
    let data_sum = hadd(&config, SampleKind::Data).unwrap();
    let mc_sum = hadd(&config, SampleKind::Mc).unwrap();
    assert_eq!(data_sum, summed_path(&config, SampleKind::Data));
    assert_eq!(mc_sum, summed_path(&config, SampleKind::Mc));

    // Efficiencies
    for comb in config.all_combinations().unwrap() {
        let name = comb.join(&config.intersection_str);
        let make_plots = name == "METNoMu120";
        let summary = run_eff_sf(&config, &name, make_plots).unwrap();
        assert!(summary.skipped.is_empty());
        assert!(summary.written.iter().all(|p| p.exists()));
        if make_plots {
            assert!(summary
                .written
                .iter()
                .any(|p| p.extension().is_some_and(|e| e == "svg")));
        }
    }

    // Aggregate
    let written = aggregate(&config).unwrap();
    assert_eq!(written, vec![aggregated_path(&config, Channel::MuTau)]);
    let merged = HistFile::read(&written[0]).unwrap();
    let eff_data = merged
        .get_hist1d(&aggregated_name(EFF_DATA_1D, "metnomu_et", "METNoMu120", "NoCut"))
        .unwrap();
    assert_relative_eq!(eff_data.content(4), 0.5, epsilon = 1e-12);
    let eff_mc = merged
        .get_hist1d(&aggregated_name(EFF_MC_1D, "metnomu_et", "METNoMu120", "NoCut"))
        .unwrap();
    assert_relative_eq!(eff_mc.content(4), 1.0, epsilon = 1e-12);
    assert!(merged.contains(&aggregated_name(
        EFF_DATA_1D,
        "metnomu_et",
        "METNoMu120",
        "metnomu_etG120"
    )));

    // Union weights
    let triggers = strings(&["IsoMu24", "METNoMu120"]);
    let calculator = UnionWeightCalculator::new(&config, Channel::MuTau, &triggers).unwrap();
    let input = dir.path().join("to_weight.txt");
    let mut rows = vec![row(0, 50.0), row(0, 350.0)];
    rows.push(String::from("1,0,320000,350"));
    write_ntuple(&input, &rows);
    let output = dir.path().join("weights.csv");
    assert_eq!(calculator.process_ntuple(&input, &output).unwrap(), 2);

    let text = std::fs::read_to_string(&output).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "entry,weight");
    let weights: Vec<f64> = lines[1..]
        .iter()
        .map(|l| l.split(',').nth(1).unwrap().parse().unwrap())
        .collect();
    assert_relative_eq!(weights[0], 1.0, epsilon = 1e-12);
    assert_relative_eq!(weights[1], 0.5, epsilon = 1e-12);
}

#[test]
fn test_counts_workflow() {
    let dir = tempfile::tempdir().unwrap();
    let config = workflow_config(dir.path());
    write_inputs(&config);

    let jobs = collect_jobs(&config).unwrap();
    let (tx, _rx) = mpsc::channel();
    for (idx, subset) in create_subsets(&config, jobs).into_iter().enumerate() {
        process_subset(config.clone(), tx.clone(), idx, subset, ProductionMode::Counts).unwrap();
    }

    let counts = config
        .get_histo_directory()
        .join("TT")
        .join("counts_TT_0.csv");
    let text = std::fs::read_to_string(counts).unwrap();
    assert!(text.starts_with("channel,combination,reference,passing,fraction"));
    assert!(text.contains("mutau,METNoMu120,4,3,0.750000"));
}
