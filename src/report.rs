use std::time::Duration;

use indexmap::IndexMap;
use serde::Serialize;

use crate::solver::codegen::{FissionReport, ParallelReport, PolyhedralReport};
use crate::solver::ir::{AxisHalo, LoopNest};
use crate::solver::model::FinalizedModel;
use crate::solver::stencil::CacheStats;

pub const REPORT_FORMAT_VERSION: u32 = 1;

/// JSON record of one pipeline run, written next to the kernel with `--report`.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub format_version: u32,
    pub kernel: String,
    pub model: Option<String>,
    pub events: Vec<PassEvent>,
    pub stencil_cache: CacheStats,
    pub total_wall_time_ms: f32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum PassEvent {
    Finalize(Timed<FinalizeSummary>),
    Build(Timed<NestSummary>),
    Fission(Timed<FissionReport>),
    Polyhedral(Timed<PolyhedralReport>),
    Parallel(Timed<ParallelReport>),
    Emit(Timed<EmitSummary>),
    Skipped(SkippedPass),
}

impl PassEvent {
    pub fn name(&self) -> &str {
        match self {
            PassEvent::Finalize(_) => "finalize",
            PassEvent::Build(_) => "build",
            PassEvent::Fission(_) => "fission",
            PassEvent::Polyhedral(_) => "polyhedral",
            PassEvent::Parallel(_) => "parallel",
            PassEvent::Emit(_) => "emit",
            PassEvent::Skipped(skipped) => &skipped.pass,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Timed<T> {
    pub wall_time_ms: f32,
    #[serde(flatten)]
    pub detail: T,
}

impl<T> Timed<T> {
    pub fn new(elapsed: Duration, detail: T) -> Self {
        Self {
            wall_time_ms: elapsed.as_secs_f32() * 1000.0,
            detail,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalizeSummary {
    pub fields: usize,
    pub equations: usize,
    pub boundary_regions: usize,
    pub stencil_kinds: Vec<String>,
    pub halos: IndexMap<String, Vec<AxisHalo>>,
}

impl FinalizeSummary {
    pub fn from_model(model: &FinalizedModel) -> Self {
        Self {
            fields: model.fields().len(),
            equations: model.equations().len(),
            boundary_regions: model.boundaries().len(),
            stencil_kinds: model
                .stencil_kinds()
                .into_iter()
                .map(str::to_string)
                .collect(),
            halos: model
                .halos()
                .iter()
                .map(|(name, faces)| (name.to_string(), faces.to_vec()))
                .collect(),
        }
    }
}

/// Statement count per body, in execution order.
#[derive(Debug, Clone, Serialize)]
pub struct NestSummary {
    pub statements: usize,
    pub bodies: IndexMap<String, usize>,
}

impl NestSummary {
    pub fn from_nest(nest: &LoopNest) -> Self {
        Self {
            statements: nest.statement_count(),
            bodies: nest
                .bodies
                .iter()
                .map(|body| (body.name.clone(), body.statements.len()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmitSummary {
    pub source_bytes: usize,
    pub parameters: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedPass {
    pub pass: String,
    pub reason: String,
}

impl BuildReport {
    pub fn new(kernel: impl Into<String>) -> Self {
        Self {
            format_version: REPORT_FORMAT_VERSION,
            kernel: kernel.into(),
            model: None,
            events: Vec::new(),
            stencil_cache: CacheStats::default(),
            total_wall_time_ms: 0.0,
        }
    }

    pub fn record(&mut self, event: PassEvent) {
        if let PassEvent::Skipped(skipped) = &event {
            log::debug!("{} skipped: {}", skipped.pass, skipped.reason);
        }
        self.events.push(event);
    }

    pub fn skip(&mut self, pass: &str, reason: impl Into<String>) {
        self.record(PassEvent::Skipped(SkippedPass {
            pass: pass.to_string(),
            reason: reason.into(),
        }));
    }

    pub fn event(&self, name: &str) -> Option<&PassEvent> {
        self.events.iter().find(|event| event.name() == name)
    }

    pub fn ran(&self, name: &str) -> bool {
        self.event(name)
            .is_some_and(|event| !matches!(event, PassEvent::Skipped(_)))
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
