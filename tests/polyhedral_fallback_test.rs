use fdgen::report::PassEvent;
use fdgen::solver::codegen::{
    PolyhedralScheduler, ProcessScheduler, ScheduleRequest, ScheduleResponse, SchedulerError,
};
use fdgen::solver::model::model_by_id;
use fdgen::solver::{BuildArtifact, Pipeline, PipelineConfig};

/// Answers every request with the body's statements minus the last one.
struct DropsLastStatement;

impl PolyhedralScheduler for DropsLastStatement {
    fn name(&self) -> &str {
        "drops-last"
    }

    fn transform(&self, request: &ScheduleRequest) -> Result<ScheduleResponse, SchedulerError> {
        let mut statements = request.statements.clone();
        statements.pop();
        Ok(ScheduleResponse {
            levels: request.levels.clone(),
            statements,
        })
    }
}

struct AlwaysFails;

impl PolyhedralScheduler for AlwaysFails {
    fn name(&self) -> &str {
        "always-fails"
    }

    fn transform(&self, _: &ScheduleRequest) -> Result<ScheduleResponse, SchedulerError> {
        Err(SchedulerError::Protocol("no schedule".to_string()))
    }
}

fn polyhedral_config() -> PipelineConfig {
    PipelineConfig {
        use_polyhedral_transform: true,
        ..PipelineConfig::default()
    }
}

fn build(pipeline: &Pipeline, id: &str) -> BuildArtifact {
    let definition = model_by_id(id).unwrap();
    let model = definition
        .build_with_cache(pipeline.stencil_cache(), pipeline.config())
        .unwrap();
    pipeline.run(&model).unwrap()
}

fn baseline(id: &str) -> BuildArtifact {
    let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
    build(&pipeline, id)
}

fn polyhedral_event(artifact: &BuildArtifact) -> &fdgen::solver::codegen::PolyhedralReport {
    match artifact.report.event("polyhedral") {
        Some(PassEvent::Polyhedral(timed)) => &timed.detail,
        other => panic!("expected a polyhedral event, got {other:?}"),
    }
}

#[test]
fn changed_statement_set_keeps_original_bodies() {
    let pipeline = Pipeline::new(polyhedral_config())
        .unwrap()
        .with_scheduler(Box::new(DropsLastStatement));
    let artifact = build(&pipeline, "heat2d");
    let reference = baseline("heat2d");

    assert_eq!(artifact.nest.bodies, reference.nest.bodies);
    assert_eq!(artifact.source.to_c(), reference.source.to_c());

    let report = polyhedral_event(&artifact);
    assert_eq!(report.rejected.len(), artifact.nest.bodies.len());
    assert!(report.transformed.is_empty());
    assert!(report.rejected[0].reason.contains("statement count changed"));
}

#[test]
fn failing_scheduler_degrades_to_untransformed_build() {
    let pipeline = Pipeline::new(polyhedral_config())
        .unwrap()
        .with_scheduler(Box::new(AlwaysFails));
    let artifact = build(&pipeline, "elastic2d");
    assert_eq!(artifact.nest.bodies, baseline("elastic2d").nest.bodies);
    let report = polyhedral_event(&artifact);
    assert_eq!(report.scheduler, "always-fails");
    assert!(report.rejected.iter().all(|r| r.reason.contains("no schedule")));
}

#[test]
fn missing_scheduler_program_is_not_fatal() {
    let scheduler = ProcessScheduler::from_command_line("fdgen-no-such-scheduler --isl").unwrap();
    let pipeline = Pipeline::new(polyhedral_config())
        .unwrap()
        .with_scheduler(Box::new(scheduler));
    let artifact = build(&pipeline, "wave1d");
    let report = polyhedral_event(&artifact);
    assert_eq!(report.scheduler, "fdgen-no-such-scheduler");
    assert!(!report.rejected.is_empty());
    assert!(artifact.source.to_c().contains("void fd_kernel("));
}

#[test]
fn requested_transform_without_scheduler_is_skipped() {
    let pipeline = Pipeline::new(polyhedral_config()).unwrap();
    let artifact = build(&pipeline, "wave2d");
    assert!(matches!(
        artifact.report.event("polyhedral"),
        Some(PassEvent::Skipped(_))
    ));
    assert_eq!(artifact.nest.bodies, baseline("wave2d").nest.bodies);
}

#[test]
fn disabled_transform_never_calls_the_scheduler() {
    let config = PipelineConfig::default();
    assert!(!config.use_polyhedral_transform);
    let pipeline = Pipeline::new(config)
        .unwrap()
        .with_scheduler(Box::new(DropsLastStatement));
    let artifact = build(&pipeline, "wave1d");
    assert!(!artifact.report.ran("polyhedral"));
    assert_eq!(artifact.nest.bodies, baseline("wave1d").nest.bodies);
}
