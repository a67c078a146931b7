use std::collections::BTreeSet;
use std::io::Write;
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::deps::{analyze_body, Dependence};
use crate::solver::error::{GenError, GenResult};
use crate::solver::ir::{IndexBox, LevelRole, LoopBody, LoopLevel, LoopNest, Statement};

/// Everything a scheduler needs to rewrite one body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub body: String,
    pub domain: IndexBox,
    pub levels: Vec<LoopLevel>,
    pub statements: Vec<Statement>,
    pub dependences: Vec<Dependence>,
}

impl ScheduleRequest {
    pub fn for_body(body: &LoopBody) -> Self {
        Self {
            body: body.name.clone(),
            domain: body.domain(),
            levels: body.levels.clone(),
            statements: body.statements.clone(),
            dependences: analyze_body(body),
        }
    }
}

/// Proposed replacement for a body's loop levels and statement order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleResponse {
    pub levels: Vec<LoopLevel>,
    pub statements: Vec<Statement>,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("cannot start scheduler '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("scheduler i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("scheduler protocol error: {0}")]
    Protocol(String),
    #[error("scheduler rejected the request (status {status:?}): {stderr}")]
    Rejected { status: Option<i32>, stderr: String },
}

/// External loop transformer. Implementations may reorder, tile or otherwise reshape a body as
/// long as the result passes [`check_integrity`].
pub trait PolyhedralScheduler {
    fn name(&self) -> &str;

    fn transform(&self, request: &ScheduleRequest) -> Result<ScheduleResponse, SchedulerError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedTransform {
    pub body: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PolyhedralReport {
    pub scheduler: String,
    pub transformed: Vec<String>,
    pub unchanged: Vec<String>,
    pub rejected: Vec<RejectedTransform>,
}

/// Runs `scheduler` on every body and keeps each result that passes the integrity check.
///
/// A failing scheduler or a rejected result leaves that body untouched; the build continues.
pub fn apply(nest: &mut LoopNest, scheduler: &dyn PolyhedralScheduler) -> PolyhedralReport {
    let mut report = PolyhedralReport {
        scheduler: scheduler.name().to_string(),
        ..PolyhedralReport::default()
    };

    for body in &mut nest.bodies {
        let request = ScheduleRequest::for_body(body);
        let outcome = scheduler
            .transform(&request)
            .map_err(|err| GenError::TransformIntegrityError {
                body: body.name.clone(),
                detail: format!("scheduler '{}' failed: {err}", scheduler.name()),
            })
            .and_then(|response| {
                check_integrity(body, &response)?;
                Ok(response)
            });

        match outcome {
            Ok(response) => {
                if response.levels == body.levels && response.statements == body.statements {
                    report.unchanged.push(body.name.clone());
                } else {
                    log::debug!("polyhedral: '{}' rescheduled", body.name);
                    body.levels = response.levels;
                    body.statements = response.statements;
                    report.transformed.push(body.name.clone());
                }
            }
            Err(err) => {
                log::warn!("{err}; keeping the original body");
                report.rejected.push(RejectedTransform {
                    body: body.name.clone(),
                    reason: err.to_string(),
                });
            }
        }
    }
    report
}

/// Accepts a rescheduled body only if it runs exactly the original statements over exactly the
/// original iteration domain.
///
/// Each axis must be covered either by one `Full` level with the original bounds and unit step,
/// or by a `Tile` level followed (not necessarily immediately) by a `Point` level of the same
/// size and bounds.
pub fn check_integrity(original: &LoopBody, response: &ScheduleResponse) -> GenResult<()> {
    let reject = |detail: String| {
        Err(GenError::TransformIntegrityError {
            body: original.name.clone(),
            detail,
        })
    };

    if response.statements.len() != original.statements.len() {
        return reject(format!(
            "statement count changed from {} to {}",
            original.statements.len(),
            response.statements.len()
        ));
    }
    let mut remaining: Vec<&Statement> = original.statements.iter().collect();
    for statement in &response.statements {
        match remaining.iter().position(|s| *s == statement) {
            Some(index) => {
                remaining.swap_remove(index);
            }
            None => {
                return reject(format!(
                    "statement {} is not part of the original body",
                    statement.id
                ))
            }
        }
    }

    let domain = original.domain();
    let rank = domain.rank();
    if let Some(level) = response.levels.iter().find(|l| l.axis >= rank) {
        return reject(format!("level over axis {} exceeds rank {rank}", level.axis));
    }

    for axis in 0..rank {
        let (lo, hi) = domain.range(axis);
        let spans = |level: &LoopLevel| level.start == lo && level.end == hi;
        let levels: Vec<&LoopLevel> = response
            .levels
            .iter()
            .filter(|l| l.axis == axis)
            .collect();
        let covered = match levels.as_slice() {
            [full] => full.role == LevelRole::Full && full.step == 1 && spans(full),
            [tile, point] => match (tile.role, point.role) {
                (LevelRole::Tile { size: a }, LevelRole::Point { size: b }) => {
                    a == b && a > 0 && spans(tile) && spans(point)
                }
                _ => false,
            },
            _ => false,
        };
        if !covered {
            return reject(format!(
                "axis {axis} is not covered exactly once over {lo}..{hi}"
            ));
        }
    }
    Ok(())
}

/// Built-in scheduler: strip-mines every dependence-free axis longer than its tile size and
/// hoists the tile loops outermost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RectangularTiler {
    tile_sizes: Vec<usize>,
}

impl RectangularTiler {
    pub const DEFAULT_TILE: usize = 32;

    /// Per-axis sizes; the last entry repeats and an empty list means [`Self::DEFAULT_TILE`].
    pub fn new(tile_sizes: Vec<usize>) -> Self {
        Self { tile_sizes }
    }

    pub fn tile_size(&self, axis: usize) -> usize {
        self.tile_sizes
            .get(axis)
            .or_else(|| self.tile_sizes.last())
            .copied()
            .filter(|&size| size > 0)
            .unwrap_or(Self::DEFAULT_TILE)
    }
}

impl Default for RectangularTiler {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl PolyhedralScheduler for RectangularTiler {
    fn name(&self) -> &str {
        "rectangular-tiler"
    }

    fn transform(&self, request: &ScheduleRequest) -> Result<ScheduleResponse, SchedulerError> {
        let carried: BTreeSet<usize> = request
            .dependences
            .iter()
            .flat_map(|d| {
                d.distance
                    .iter()
                    .enumerate()
                    .filter(|&(_, &component)| component != 0)
                    .map(|(axis, _)| axis)
            })
            .collect();

        let mut tiles = Vec::new();
        let mut inner = Vec::new();
        for level in &request.levels {
            let size = self.tile_size(level.axis);
            let extent = level.end.saturating_sub(level.start);
            let free = !carried.contains(&level.axis);
            if level.role == LevelRole::Full && free && extent > size {
                tiles.push(LoopLevel {
                    role: LevelRole::Tile { size },
                    ..level.clone()
                });
                inner.push(LoopLevel {
                    role: LevelRole::Point { size },
                    ..level.clone()
                });
            } else {
                inner.push(level.clone());
            }
        }
        tiles.extend(inner);

        Ok(ScheduleResponse {
            levels: tiles,
            statements: request.statements.clone(),
        })
    }
}

/// Scheduler running as a child process: one JSON [`ScheduleRequest`] on stdin, one JSON
/// [`ScheduleResponse`] expected on stdout, non-zero exit means rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessScheduler {
    program: String,
    args: Vec<String>,
}

impl ProcessScheduler {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Whitespace-separated command line; `None` when empty.
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }
}

impl PolyhedralScheduler for ProcessScheduler {
    fn name(&self) -> &str {
        &self.program
    }

    fn transform(&self, request: &ScheduleRequest) -> Result<ScheduleResponse, SchedulerError> {
        let payload =
            serde_json::to_vec(request).map_err(|err| SchedulerError::Protocol(err.to_string()))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SchedulerError::Spawn {
                command: self.program.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload)?;
        }
        let output = child.wait_with_output()?;

        if !output.status.success() {
            return Err(SchedulerError::Rejected {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        serde_json::from_slice(&output.stdout)
            .map_err(|err| SchedulerError::Protocol(format!("invalid response: {err}")))
    }
}
