//! Reference interpreter for loop nests, used to compare transformed nests against the nest the
//! builder produced. It executes the IR directly, so it checks pass semantics without a C
//! toolchain. Levels marked parallel run their iterations on the rayon pool, each against a
//! private write log, which only gives the sequential result when the marking is legal.

#![allow(dead_code)]

use std::collections::HashMap;

use fdgen::solver::ir::{
    FieldLayout, FieldSnapshot, KernelExpr, KernelManifest, LevelRole, LoopBody, LoopLevel,
    LoopNest, Statement, TimeLevel,
};
use fdgen::solver::stencil::exact_to_f64;
use rayon::prelude::*;

type Cell = (usize, usize, usize);

#[derive(Debug, Default, Clone)]
struct WriteLog {
    values: HashMap<Cell, f64>,
    order: Vec<Cell>,
}

impl WriteLog {
    fn write(&mut self, cell: Cell, value: f64) {
        if self.values.insert(cell, value).is_none() {
            self.order.push(cell);
        }
    }

    fn merge(&mut self, other: WriteLog) {
        for cell in other.order {
            if let Some(value) = other.values.get(&cell) {
                self.write(cell, *value);
            }
        }
    }
}

struct State {
    layouts: Vec<FieldLayout>,
    slots: Vec<Vec<Vec<f64>>>,
}

impl State {
    fn field_index(&self, name: &str) -> usize {
        self.layouts
            .iter()
            .position(|l| l.name == name)
            .unwrap_or_else(|| panic!("nest has no field '{name}'"))
    }
}

struct Frame<'a> {
    state: &'a State,
    params: &'a HashMap<String, f64>,
    step: usize,
    logs: Vec<&'a WriteLog>,
}

impl Frame<'_> {
    fn read(&self, cell: Cell) -> f64 {
        for log in self.logs.iter().rev() {
            if let Some(value) = log.values.get(&cell) {
                return *value;
            }
        }
        self.state.slots[cell.0][cell.1][cell.2]
    }
}

/// Runs `nest` for its configured number of steps and returns the final state of every field.
///
/// Fields without a snapshot start at zero; `params` must bind every kernel parameter.
pub fn run_nest(
    nest: &LoopNest,
    params: &[(&str, f64)],
    snapshots: Vec<FieldSnapshot>,
) -> HashMap<String, FieldSnapshot> {
    let manifest = KernelManifest::from_nest(nest);
    let params: HashMap<String, f64> = params
        .iter()
        .map(|(name, value)| (name.to_string(), *value))
        .collect();
    for name in &nest.params {
        assert!(params.contains_key(name), "parameter '{name}' is unbound");
    }

    let mut by_name: HashMap<String, FieldSnapshot> = snapshots
        .into_iter()
        .map(|s| (s.field.clone(), s))
        .collect();
    let mut state = State {
        layouts: nest.fields.clone(),
        slots: Vec::with_capacity(nest.fields.len()),
    };
    for layout in &nest.fields {
        let snapshot = by_name
            .remove(&layout.name)
            .unwrap_or_else(|| FieldSnapshot::zeros(layout.name.clone(), layout.extents.clone()));
        state
            .slots
            .push(snapshot.into_slots(&manifest).expect("snapshot matches manifest"));
    }

    for step in 0..nest.time_steps {
        for body in &nest.bodies {
            let log = {
                let frame = Frame {
                    state: &state,
                    params: &params,
                    step,
                    logs: Vec::new(),
                };
                let mut log = WriteLog::default();
                let mut point = vec![0usize; body.rank()];
                let mut tiles = vec![0usize; body.rank()];
                run_levels(&frame, body, 0, &mut point, &mut tiles, &mut log, false);
                log
            };
            for cell in log.order {
                state.slots[cell.0][cell.1][cell.2] = log.values[&cell];
            }
        }
    }

    manifest
        .fields
        .iter()
        .zip(&state.slots)
        .map(|(entry, slots)| {
            let snapshot = FieldSnapshot::from_final_slot(entry, slots).expect("final slot");
            (entry.name.clone(), snapshot)
        })
        .collect()
}

fn level_values(level: &LoopLevel, tiles: &[usize]) -> Vec<usize> {
    match level.role {
        LevelRole::Full => (level.start..level.end).step_by(level.step).collect(),
        LevelRole::Tile { size } => (level.start..level.end).step_by(size).collect(),
        LevelRole::Point { size } => {
            let origin = tiles[level.axis];
            (origin..(origin + size).min(level.end))
                .step_by(level.step)
                .collect()
        }
    }
}

fn run_levels(
    frame: &Frame<'_>,
    body: &LoopBody,
    depth: usize,
    point: &mut Vec<usize>,
    tiles: &mut Vec<usize>,
    log: &mut WriteLog,
    in_parallel: bool,
) {
    let Some(level) = body.levels.get(depth) else {
        for statement in &body.statements {
            execute(frame, statement, point, log);
        }
        return;
    };

    let values = level_values(level, tiles);
    let assign = |point: &mut Vec<usize>, tiles: &mut Vec<usize>, value: usize| match level.role {
        LevelRole::Tile { .. } => tiles[level.axis] = value,
        _ => point[level.axis] = value,
    };

    if level.is_parallel() && !in_parallel {
        let parent: &WriteLog = log;
        let (base_point, base_tiles) = (point.clone(), tiles.clone());
        let logs: Vec<WriteLog> = values
            .par_iter()
            .map(|&value| {
                let mut logs = frame.logs.clone();
                logs.push(parent);
                let child = Frame {
                    state: frame.state,
                    params: frame.params,
                    step: frame.step,
                    logs,
                };
                let mut point = base_point.clone();
                let mut tiles = base_tiles.clone();
                assign(&mut point, &mut tiles, value);
                let mut own = WriteLog::default();
                run_levels(&child, body, depth + 1, &mut point, &mut tiles, &mut own, true);
                own
            })
            .collect();
        for own in logs {
            log.merge(own);
        }
    } else {
        for value in values {
            assign(point, tiles, value);
            run_levels(frame, body, depth + 1, point, tiles, log, in_parallel);
        }
    }
}

fn execute(frame: &Frame<'_>, statement: &Statement, point: &[usize], log: &mut WriteLog) {
    if let Some(guard) = &statement.guard {
        if !guard.contains(point) {
            return;
        }
    }
    let mut logs = frame.logs.clone();
    logs.push(&*log);
    let view = Frame {
        state: frame.state,
        params: frame.params,
        step: frame.step,
        logs,
    };
    let value = eval(&view, &statement.value, point);
    let target = &statement.target;
    let target = cell(frame, &target.field, target.level, &target.offsets, point);
    log.write(target, value);
}

fn cell(
    frame: &Frame<'_>,
    field: &str,
    level: TimeLevel,
    offsets: &[i64],
    point: &[usize],
) -> Cell {
    let index = frame.state.field_index(field);
    let layout = &frame.state.layouts[index];
    let shifted: Vec<usize> = point
        .iter()
        .zip(offsets)
        .enumerate()
        .map(|(axis, (&i, &o))| {
            let j = i as i64 + o;
            assert!(
                j >= 0 && (j as usize) < layout.extents[axis],
                "{field} read out of bounds at axis {axis}: {j}"
            );
            j as usize
        })
        .collect();
    (index, layout.slot(level, frame.step), layout.flat_index(&shifted))
}

fn eval(frame: &Frame<'_>, expr: &KernelExpr, point: &[usize]) -> f64 {
    match expr {
        KernelExpr::Float(value) => *value,
        KernelExpr::Rational(value) => exact_to_f64(value),
        KernelExpr::Param(name) => frame.params[name],
        KernelExpr::Read(access) => {
            frame.read(cell(frame, &access.field, access.level, &access.offsets, point))
        }
        KernelExpr::Neg(inner) => -eval(frame, inner, point),
        KernelExpr::Binary { op, lhs, rhs } => {
            op.apply(eval(frame, lhs, point), eval(frame, rhs, point))
        }
    }
}

/// Snapshot with every value zero except `(index, value)` pairs.
pub fn impulse(field: &str, shape: Vec<usize>, cells: &[(Vec<usize>, f64)]) -> FieldSnapshot {
    let mut snapshot = FieldSnapshot::zeros(field, shape.clone());
    for (point, value) in cells {
        let flat = point
            .iter()
            .zip(&shape)
            .fold(0, |acc, (&i, &extent)| acc * extent + i);
        snapshot.data[flat] = *value;
    }
    snapshot
}

/// Deterministic pseudo-random field contents.
pub fn seeded(field: &str, shape: Vec<usize>, seed: u64) -> FieldSnapshot {
    let len: usize = shape.iter().product();
    let mut x = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    let data = (0..len)
        .map(|_| {
            x = x
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((x >> 33) as f64 / (1u64 << 31) as f64) - 0.5
        })
        .collect();
    FieldSnapshot::new(field, shape, data)
}

pub fn assert_states_close(
    expected: &HashMap<String, FieldSnapshot>,
    actual: &HashMap<String, FieldSnapshot>,
) {
    assert_eq!(expected.len(), actual.len());
    for (name, want) in expected {
        let got = &actual[name];
        assert_eq!(want.shape, got.shape, "shape of {name}");
        for (i, (a, b)) in want.data.iter().zip(&got.data).enumerate() {
            assert!(
                approx::relative_eq!(*a, *b, epsilon = 1e-12, max_relative = 1e-12),
                "{name}[{i}]: expected {a}, got {b}"
            );
        }
    }
}
