use std::rc::Rc;
use std::time::Instant;

use crate::report::{
    BuildReport, EmitSummary, FinalizeSummary, NestSummary, PassEvent, Timed,
};
use crate::solver::codegen::{
    self, fission, parallel, polyhedral, KernelSource, PolyhedralScheduler, RectangularTiler,
};
use crate::solver::config::PipelineConfig;
use crate::solver::error::GenResult;
use crate::solver::ir::{KernelManifest, LoopNest};
use crate::solver::model::EquationModel;
use crate::solver::stencil::StencilCache;

/// Everything one pipeline run produces.
#[derive(Debug, Clone)]
pub struct BuildArtifact {
    pub nest: LoopNest,
    pub source: KernelSource,
    pub manifest: KernelManifest,
    pub report: BuildReport,
}

/// Equation model to kernel: finalize, build the loop nest, fission, polyhedral scheduling,
/// parallel annotation, emission.
pub struct Pipeline {
    config: PipelineConfig,
    scheduler: Option<Box<dyn PolyhedralScheduler>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler.as_ref().map(|s| s.name()))
            .finish()
    }
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> GenResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            scheduler: None,
        })
    }

    pub fn with_scheduler(mut self, scheduler: Box<dyn PolyhedralScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Uses the in-process [`RectangularTiler`] with the configured tile sizes.
    pub fn with_builtin_tiler(self) -> Self {
        let tiler = RectangularTiler::new(self.config.tile_sizes.clone());
        self.with_scheduler(Box::new(tiler))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn scheduler_name(&self) -> Option<&str> {
        self.scheduler.as_deref().map(|s| s.name())
    }

    /// Fresh cache with the limits of this configuration, for building models.
    pub fn stencil_cache(&self) -> Rc<StencilCache> {
        StencilCache::shared(self.config.stencil_limits())
    }

    /// Finalizes `model` and builds the unoptimized loop nest.
    pub fn lower(&self, model: &EquationModel, report: &mut BuildReport) -> GenResult<LoopNest> {
        let start = Instant::now();
        let finalized = model.finalize()?;
        model.cache().freeze();
        report.record(PassEvent::Finalize(Timed::new(
            start.elapsed(),
            FinalizeSummary::from_model(&finalized),
        )));

        let start = Instant::now();
        let mut nest = codegen::build(&finalized, self.config.time_steps)?;
        nest.name = self.config.kernel_name.clone();
        nest.thread_hint = self.config.thread_hint;
        report.record(PassEvent::Build(Timed::new(
            start.elapsed(),
            NestSummary::from_nest(&nest),
        )));
        Ok(nest)
    }

    /// Runs the structural passes in order. None of them can fail the build: a rejected
    /// schedule keeps the original body and is only recorded.
    pub fn optimize(&self, nest: &mut LoopNest, report: &mut BuildReport) {
        if self.config.enable_fission {
            let start = Instant::now();
            let fissioned = fission::apply(nest);
            report.record(PassEvent::Fission(Timed::new(start.elapsed(), fissioned)));
        } else {
            report.skip("fission", "disabled by configuration");
        }

        match (&self.scheduler, self.config.use_polyhedral_transform) {
            (Some(scheduler), true) => {
                let start = Instant::now();
                let scheduled = polyhedral::apply(nest, scheduler.as_ref());
                report.record(PassEvent::Polyhedral(Timed::new(start.elapsed(), scheduled)));
            }
            (None, true) => {
                log::info!("polyhedral transform requested but no scheduler is configured");
                report.skip("polyhedral", "no scheduler configured");
            }
            (_, false) => report.skip("polyhedral", "disabled by configuration"),
        }

        let start = Instant::now();
        let marked = parallel::annotate(nest, self.config.thread_hint);
        report.record(PassEvent::Parallel(Timed::new(start.elapsed(), marked)));
    }

    pub fn run(&self, model: &EquationModel) -> GenResult<BuildArtifact> {
        let started = Instant::now();
        let mut report = BuildReport::new(self.config.kernel_name.clone());

        let mut nest = self.lower(model, &mut report)?;
        self.optimize(&mut nest, &mut report);

        let start = Instant::now();
        let (source, manifest) = codegen::emit(&nest)?;
        report.record(PassEvent::Emit(Timed::new(
            start.elapsed(),
            EmitSummary {
                source_bytes: source.to_c().len(),
                parameters: nest.params.clone(),
            },
        )));

        report.stencil_cache = model.cache().stats();
        report.total_wall_time_ms = started.elapsed().as_secs_f32() * 1000.0;
        log::info!(
            "built kernel '{}': {} bodies, {} statements, {} parallel levels in {:.2} ms",
            nest.name,
            nest.bodies.len(),
            nest.statement_count(),
            nest.bodies
                .iter()
                .flat_map(|b| &b.levels)
                .filter(|l| l.is_parallel())
                .count(),
            report.total_wall_time_ms
        );

        Ok(BuildArtifact {
            nest,
            source,
            manifest,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::ir::BodyKind;
    use crate::solver::model::model_by_id;

    fn wave2d(config: &PipelineConfig) -> EquationModel {
        let definition = model_by_id("wave2d").unwrap();
        definition.build(config).unwrap()
    }

    #[test]
    fn default_run_fissions_and_skips_scheduling() {
        let config = PipelineConfig {
            kernel_name: "wave".to_string(),
            ..PipelineConfig::default()
        };
        let pipeline = Pipeline::new(config.clone()).unwrap();
        let artifact = pipeline.run(&wave2d(&config)).unwrap();

        assert_eq!(artifact.nest.name, "wave");
        assert_eq!(artifact.source.name(), "wave");
        assert!(artifact
            .nest
            .bodies
            .iter()
            .all(|b| !matches!(b.kind, BodyKind::Combined { .. })));
        assert!(artifact.report.ran("fission"));
        assert!(!artifact.report.ran("polyhedral"));
        assert!(artifact.report.ran("emit"));
        assert!(artifact.report.stencil_cache.entries > 0);
    }

    #[test]
    fn disabled_fission_keeps_the_combined_body() {
        let config = PipelineConfig {
            enable_fission: false,
            ..PipelineConfig::default()
        };
        let artifact = Pipeline::new(config.clone())
            .unwrap()
            .run(&wave2d(&config))
            .unwrap();
        assert_eq!(artifact.nest.bodies.len(), 1);
        assert_eq!(artifact.nest.bodies[0].name, "u_combined");
        assert!(!artifact.report.ran("fission"));
    }

    #[test]
    fn builtin_tiler_runs_when_requested() {
        let config = PipelineConfig {
            use_polyhedral_transform: true,
            tile_sizes: vec![16],
            thread_hint: Some(4),
            ..PipelineConfig::default()
        };
        let pipeline = Pipeline::new(config.clone()).unwrap().with_builtin_tiler();
        assert_eq!(pipeline.scheduler_name(), Some("rectangular-tiler"));
        let artifact = pipeline.run(&wave2d(&config)).unwrap();
        assert!(artifact.report.ran("polyhedral"));
        assert!(artifact.source.to_c().contains("i0_t += 16"));
        assert!(artifact
            .source
            .to_c()
            .contains("#pragma omp parallel for num_threads(4)"));
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let config = PipelineConfig {
            time_steps: 0,
            ..PipelineConfig::default()
        };
        let err = Pipeline::new(config).unwrap_err();
        assert_eq!(err.kind(), "InvalidConfig");
    }
}
