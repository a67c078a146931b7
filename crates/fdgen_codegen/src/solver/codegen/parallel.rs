use serde::Serialize;

use super::deps::analyze_body;
use crate::solver::ir::{LoopNest, ParallelHint};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BodyParallelism {
    pub body: String,
    /// Array axes whose loops were marked parallel.
    pub parallel_axes: Vec<usize>,
    /// Axes left sequential because a dependence is carried along them.
    pub carried_axes: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParallelReport {
    pub thread_hint: Option<usize>,
    pub bodies: Vec<BodyParallelism>,
}

impl ParallelReport {
    pub fn parallel_level_count(&self) -> usize {
        self.bodies.iter().map(|b| b.parallel_axes.len()).sum()
    }
}

/// Marks every spatial loop level that carries no dependence as parallel.
///
/// The decision depends only on the body's dependences; `thread_hint` is recorded on the marked
/// levels and nowhere else. The time loop is not part of any body and is never marked.
pub fn annotate(nest: &mut LoopNest, thread_hint: Option<usize>) -> ParallelReport {
    let mut report = ParallelReport {
        thread_hint,
        bodies: Vec::with_capacity(nest.bodies.len()),
    };
    for body in &mut nest.bodies {
        let dependences = analyze_body(body);
        let rank = body.rank();
        let (carried, free): (Vec<usize>, Vec<usize>) =
            (0..rank).partition(|&axis| dependences.iter().any(|d| d.carried_on(axis)));

        for level in &mut body.levels {
            level.parallel = free
                .contains(&level.axis)
                .then_some(ParallelHint {
                    threads: thread_hint,
                });
        }
        log::debug!(
            "parallel: '{}' free axes {:?}, carried {:?}",
            body.name,
            free,
            carried
        );
        report.bodies.push(BodyParallelism {
            body: body.name.clone(),
            parallel_axes: free,
            carried_axes: carried,
        });
    }
    report
}
