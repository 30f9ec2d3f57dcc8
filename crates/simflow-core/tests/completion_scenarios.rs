//! # Completion Scenarios
//!
//! End-to-end pipeline bookkeeping on a disk registry: generation feeds
//! reconstruction, reconstruction feeds an analysis-only stage.

use simflow_core::{
    CompletionEvaluator, ConsumptionTracker, DatasetRegistry, FileType, ProjectConfig,
    RedbRegistry, SimflowError, Target,
};
use std::path::PathBuf;

const PIPELINE: &str = r#"
    name = "nue"
    top_dir = "/scratch/nue"

    [[stages]]
    name = "gen"
    fcl = "gen.fcl"
    n_jobs = 3
    events_per_job = 100
    input = { type = "none", location = "none" }
    output = { type = "larsoft", location = "/scratch/nue/gen" }

    [[stages]]
    name = "reco"
    fcl = "reco.fcl"
    n_jobs = 3
    events_per_job = -1
    input = { type = "dataset", location = "gen", n_files = 2 }
    output = { type = "larsoft", location = "/scratch/nue/reco" }

    [[stages]]
    name = "ana"
    fcl = "ana.fcl"
    n_jobs = 1
    events_per_job = 300
    input = { type = "dataset", location = "reco" }
    output = { type = "gallery", location = "/scratch/nue/ana", anaonly = true }
"#;

fn open() -> (tempfile::TempDir, ProjectConfig, RedbRegistry) {
    let dir = tempfile::tempdir().expect("tempdir");
    let project = ProjectConfig::from_toml_str(PIPELINE).expect("project");
    let mut registry = RedbRegistry::open(dir.path().join("nue.redb")).expect("open");
    for stage in project.stages() {
        registry
            .create_dataset(stage.output_dataset(), project.input_dataset(stage))
            .expect("create dataset");
    }
    (dir, project, registry)
}

fn produce(registry: &mut RedbRegistry, dataset: &str, file_type: FileType, nevents: &[u64]) {
    for (i, n) in nevents.iter().enumerate() {
        registry
            .declare_file(
                dataset,
                &PathBuf::from(format!("/scratch/nue/{dataset}/{}_{i}.root", file_type.code())),
                file_type,
                Some(*n),
            )
            .expect("declare");
    }
}

#[test]
fn generation_reaches_target() {
    let (_dir, project, mut registry) = open();
    let gen_stage = project.stage("gen").expect("gen");

    let before = CompletionEvaluator::new(&project, &registry)
        .makeup_job_count(gen_stage)
        .expect("makeup");
    assert_eq!(before, 3);

    produce(&mut registry, "gen", FileType::Primary, &[100, 100]);
    let partial = CompletionEvaluator::new(&project, &registry)
        .makeup_job_count(gen_stage)
        .expect("makeup");
    assert_eq!(partial, 2);

    produce(&mut registry, "gen", FileType::Primary, &[100]);
    let done = CompletionEvaluator::new(&project, &registry)
        .makeup_job_count(gen_stage)
        .expect("makeup");
    assert!(done <= 0);
}

#[test]
fn unbounded_stage_follows_outstanding_input() {
    let (_dir, project, mut registry) = open();
    produce(&mut registry, "gen", FileType::Primary, &[100, 100, 100, 100, 100]);
    let reco = project.stage("reco").expect("reco");

    // Nothing produced yet: the whole stage is resubmitted.
    let fresh = CompletionEvaluator::new(&project, &registry)
        .makeup_job_count(reco)
        .expect("makeup");
    assert_eq!(fresh, 3);

    {
        let mut tracker = ConsumptionTracker::new(&project, &mut registry);
        let claimed = tracker.claim_files(reco, 2).expect("claim");
        tracker.confirm_consumed(reco, &claimed).expect("confirm");
    }
    produce(&mut registry, "reco", FileType::Primary, &[200]);

    // Three of five gen files are outstanding, two per job.
    let evaluator = CompletionEvaluator::new(&project, &registry);
    assert_eq!(evaluator.makeup_job_count(reco).expect("makeup"), 2);

    let report = evaluator.report(reco).expect("report");
    assert_eq!(report.output.target, Target::Unbounded);
    let consumption = report.consumption.expect("reco has a parent");
    assert_eq!(consumption.consumed, 2);
    assert_eq!(consumption.unyielded, 3);
}

#[test]
fn failed_job_claims_are_recovered() {
    let (_dir, project, mut registry) = open();
    produce(&mut registry, "gen", FileType::Primary, &[100, 100, 100]);
    let reco = project.stage("reco").expect("reco");

    let mut tracker = ConsumptionTracker::new(&project, &mut registry);
    let first = tracker.claim_files(reco, 2).expect("claim");
    assert_eq!(first.len(), 2);

    // The job dies without confirming.
    assert_eq!(tracker.reset_yielded(reco).expect("reset"), 2);
    let again = tracker.claim_files(reco, 2).expect("claim");
    assert_eq!(
        again.iter().map(|f| f.id).collect::<Vec<_>>(),
        first.iter().map(|f| f.id).collect::<Vec<_>>()
    );
}

#[test]
fn analysis_only_stage_counts_analysis_files() {
    let (_dir, project, mut registry) = open();
    let ana = project.stage("ana").expect("ana");

    produce(&mut registry, "ana", FileType::Primary, &[1000]);
    let evaluator = CompletionEvaluator::new(&project, &registry);
    assert_eq!(evaluator.makeup_job_count(ana).expect("makeup"), 1);

    produce(&mut registry, "ana", FileType::Analysis, &[150, 150]);
    let evaluator = CompletionEvaluator::new(&project, &registry);
    assert!(evaluator.makeup_job_count(ana).expect("makeup") <= 0);

    let report = evaluator.report(ana).expect("report");
    assert_eq!(report.analysis.target, Target::Events(300));
    assert_eq!(report.output.target, Target::Events(0));
    assert_eq!(report.analysis.produced.events, Some(300));
}

#[test]
fn fewer_events_than_files_is_rejected() {
    let (_dir, project, mut registry) = open();
    let gen_stage = project.stage("gen").expect("gen");
    produce(&mut registry, "gen", FileType::Primary, &[1, 0, 0, 0]);

    let result = CompletionEvaluator::new(&project, &registry).makeup_job_count(gen_stage);
    assert!(matches!(result, Err(SimflowError::DataIntegrity { .. })));
}

#[test]
fn dropping_upstream_clears_downstream_view() {
    let (_dir, project, mut registry) = open();
    produce(&mut registry, "gen", FileType::Primary, &[100, 100]);
    let reco = project.stage("reco").expect("reco");

    ConsumptionTracker::new(&project, &mut registry)
        .claim_files(reco, 2)
        .expect("claim");
    assert_eq!(registry.drop_dataset("gen").expect("drop"), 2);

    let counts = ConsumptionTracker::new(&project, &mut registry)
        .counts("reco")
        .expect("counts");
    assert_eq!(counts.total(), 0);
}
