use serde::{Deserialize, Serialize};

use crate::solver::ir::{IndexBox, LoopBody, StatementId, TimeLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependenceKind {
    /// Read after write.
    Flow,
    /// Write after read.
    Anti,
    /// Write after write.
    Output,
}

/// Ordering constraint between two statement instances of one body.
///
/// `distance[axis]` is sink iteration minus source iteration, indexed by array axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependence {
    pub kind: DependenceKind,
    pub source: StatementId,
    pub sink: StatementId,
    pub field: String,
    pub level: TimeLevel,
    pub distance: Vec<i64>,
}

impl Dependence {
    pub fn is_loop_carried(&self) -> bool {
        self.distance.iter().any(|&d| d != 0)
    }

    pub fn carried_on(&self, axis: usize) -> bool {
        self.distance.get(axis).is_some_and(|&d| d != 0)
    }
}

/// Realizable dependences between the statements of `body`.
///
/// A statement reading the array another (or the same) statement writes, at offset `o`, touches
/// the element written `o` iterations away. The pair only counts when some read iteration lands
/// on an iteration that executes the write.
pub fn analyze_body(body: &LoopBody) -> Vec<Dependence> {
    let axis_order = loop_axis_order(body);
    let mut out = Vec::new();

    for (writer_pos, writer) in body.statements.iter().enumerate() {
        let written = &writer.target;
        let writer_domain = body.statement_domain(writer);

        for (reader_pos, reader) in body.statements.iter().enumerate() {
            let reader_domain = body.statement_domain(reader);
            let mut seen: Vec<&[i64]> = Vec::new();
            for read in reader.value.reads() {
                if read.field != written.field || read.level != written.level {
                    continue;
                }
                if seen.contains(&read.offsets.as_slice()) {
                    continue;
                }
                seen.push(&read.offsets);

                if !shifted_overlaps(&reader_domain, &read.offsets, &writer_domain) {
                    continue;
                }

                let offset = &read.offsets;
                let dependence = match lex_sign(offset, &axis_order) {
                    // Same iteration: statement order decides.
                    std::cmp::Ordering::Equal => {
                        if reader_pos == writer_pos {
                            continue;
                        }
                        let kind = if writer_pos < reader_pos {
                            DependenceKind::Flow
                        } else {
                            DependenceKind::Anti
                        };
                        let (source, sink) = if kind == DependenceKind::Flow {
                            (writer.id, reader.id)
                        } else {
                            (reader.id, writer.id)
                        };
                        Dependence {
                            kind,
                            source,
                            sink,
                            field: written.field.clone(),
                            level: written.level,
                            distance: vec![0; offset.len()],
                        }
                    }
                    // The writing iteration runs first.
                    std::cmp::Ordering::Less => Dependence {
                        kind: DependenceKind::Flow,
                        source: writer.id,
                        sink: reader.id,
                        field: written.field.clone(),
                        level: written.level,
                        distance: offset.iter().map(|o| -o).collect(),
                    },
                    std::cmp::Ordering::Greater => Dependence {
                        kind: DependenceKind::Anti,
                        source: reader.id,
                        sink: writer.id,
                        field: written.field.clone(),
                        level: written.level,
                        distance: offset.clone(),
                    },
                };
                out.push(dependence);
            }
        }

        for other in body.statements.iter().skip(writer_pos + 1) {
            if other.target.field == written.field
                && other.target.level == written.level
                && body.statement_domain(other).intersects(&writer_domain)
            {
                out.push(Dependence {
                    kind: DependenceKind::Output,
                    source: writer.id,
                    sink: other.id,
                    field: written.field.clone(),
                    level: written.level,
                    distance: vec![0; written.offsets.len()],
                });
            }
        }
    }

    out
}

/// Axes in the order their outermost loop level appears.
fn loop_axis_order(body: &LoopBody) -> Vec<usize> {
    let mut order = Vec::new();
    for level in &body.levels {
        if !order.contains(&level.axis) {
            order.push(level.axis);
        }
    }
    order
}

fn lex_sign(offset: &[i64], axis_order: &[usize]) -> std::cmp::Ordering {
    axis_order
        .iter()
        .filter_map(|&axis| offset.get(axis))
        .map(|&o| o.cmp(&0))
        .find(|ordering| ordering.is_ne())
        .unwrap_or(std::cmp::Ordering::Equal)
}

fn shifted_overlaps(reader: &IndexBox, offset: &[i64], writer: &IndexBox) -> bool {
    if reader.is_empty() || writer.is_empty() {
        return false;
    }
    (0..reader.rank()).all(|axis| {
        let o = offset.get(axis).copied().unwrap_or(0);
        let lo = reader.lower[axis] as i64 + o;
        let hi = reader.upper[axis] as i64 + o;
        lo < writer.upper[axis] as i64 && (writer.lower[axis] as i64) < hi
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::ir::{
        ArrayAccess, BinaryOp, BodyKind, KernelExpr, LoopLevel, Statement, StatementOrigin,
    };

    fn statement(
        id: usize,
        field: &str,
        guard: Option<IndexBox>,
        reads: &[(&str, TimeLevel, i64)],
    ) -> Statement {
        let mut value = KernelExpr::Float(0.0);
        for (name, level, offset) in reads {
            value = KernelExpr::binary(
                BinaryOp::Add,
                value,
                KernelExpr::Read(ArrayAccess::new(*name, *level, vec![*offset])),
            );
        }
        Statement {
            id: StatementId(id),
            origin: StatementOrigin::Interior {
                field: field.to_string(),
            },
            target: ArrayAccess::new(field, TimeLevel::Next, vec![0]),
            value,
            guard,
        }
    }

    fn body(statements: Vec<Statement>) -> LoopBody {
        LoopBody {
            name: "b".to_string(),
            kind: BodyKind::Combined {
                field: "u".to_string(),
            },
            levels: vec![LoopLevel::full(0, 0, 10)],
            statements,
        }
    }

    #[test]
    fn reads_of_current_level_carry_nothing() {
        let b = body(vec![statement(
            0,
            "u",
            None,
            &[("u", TimeLevel::Current, -1), ("u", TimeLevel::Current, 1)],
        )]);
        assert!(analyze_body(&b).is_empty());
    }

    #[test]
    fn backward_read_of_next_level_is_a_flow_dependence() {
        let b = body(vec![statement(0, "u", None, &[("u", TimeLevel::Next, -1)])]);
        let deps = analyze_body(&b);
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].kind, DependenceKind::Flow);
        assert_eq!(deps[0].distance, vec![1]);
        assert!(deps[0].carried_on(0));
    }

    #[test]
    fn forward_read_is_an_anti_dependence() {
        let b = body(vec![statement(0, "u", None, &[("u", TimeLevel::Next, 2)])]);
        let deps = analyze_body(&b);
        assert_eq!(deps[0].kind, DependenceKind::Anti);
        assert_eq!(deps[0].distance, vec![2]);
    }

    #[test]
    fn disjoint_guards_make_a_dependence_unrealizable() {
        // Ghost cell 0 mirrors interior cell 1; the upper ghost reads far past every writer.
        let guard = |lo, hi| Some(IndexBox::from_ranges(&[(lo, hi)]));
        let interior = statement(0, "u", guard(1, 9), &[]);
        let near = statement(1, "u", guard(0, 1), &[("u", TimeLevel::Next, 1)]);
        let far = statement(2, "u", guard(9, 10), &[("u", TimeLevel::Next, 20)]);
        let deps = analyze_body(&body(vec![interior, near, far]));
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].source, StatementId(1));
        assert_eq!(deps[0].sink, StatementId(0));
        assert_eq!(deps[0].kind, DependenceKind::Anti);
    }

    #[test]
    fn same_iteration_order_decides_flow_or_anti() {
        let first = statement(0, "a", None, &[]);
        let second = statement(1, "b", None, &[("a", TimeLevel::Next, 0)]);
        let deps = analyze_body(&body(vec![first, second]));
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].kind, DependenceKind::Flow);
        assert!(!deps[0].is_loop_carried());
    }

    #[test]
    fn overlapping_writers_are_output_dependent() {
        let a = statement(0, "u", Some(IndexBox::from_ranges(&[(0, 5)])), &[]);
        let b2 = statement(1, "u", Some(IndexBox::from_ranges(&[(4, 10)])), &[]);
        let deps = analyze_body(&body(vec![a, b2]));
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].kind, DependenceKind::Output);
    }
}
