use crate::solver::error::{GenError, GenResult};
use crate::solver::ir::{
    ArrayAccess, BodyKind, FieldLayout, IndexBox, KernelExpr, LoopBody, LoopLevel, LoopNest,
    Statement, StatementId, StatementOrigin,
};
use crate::solver::model::{
    align_offsets, AlignedRead, Expr, ExprNode, FinalizedBoundary, FinalizedModel, GridField,
    TimeLevel,
};

/// Lowers a finalized model to a loop nest.
///
/// One body per update equation, in equation order. A field whose boundary work can share the
/// interior sweep gets a single guarded `Combined` body; otherwise its boundary regions become
/// separate bodies. Those go right after the field's interior body when a later sweep reads the
/// field's next level inside one of them, and after all equation bodies, in declaration order,
/// when nothing does.
pub fn build(model: &FinalizedModel, time_steps: usize) -> GenResult<LoopNest> {
    if time_steps == 0 {
        return Err(GenError::IncompleteNest {
            nest: "fd_kernel".to_string(),
            detail: "time_steps must be at least 1".to_string(),
        });
    }

    let fields: Vec<FieldLayout> = model
        .fields()
        .iter()
        .map(|field| FieldLayout {
            name: field.name().to_string(),
            extents: field.extents().to_vec(),
            halo: model
                .halos()
                .get(field.name())
                .map(<[_]>::to_vec)
                .unwrap_or_default(),
            staggered: field.staggering().to_vec(),
            time_levels: model.time_levels(field.name()),
            precision: field.precision(),
            role: field.role(),
        })
        .collect();

    let mut next_id = 0usize;
    let mut fresh_id = || {
        let id = StatementId(next_id);
        next_id += 1;
        id
    };

    let mut interiors = Vec::with_capacity(model.equations().len());
    for equation in model.equations() {
        let target = &equation.target;
        let context = format!("equation for '{}'", target.name());
        let domain = model.interior(target);
        let value = lower_expr(&equation.rhs, target, &context)?;
        check_bounds(&fields, &domain, &value, &context)?;
        interiors.push(Statement {
            id: fresh_id(),
            origin: StatementOrigin::Interior {
                field: target.name().to_string(),
            },
            target: next_target(target),
            value,
            guard: None,
        });
    }

    let mut boundaries = Vec::with_capacity(model.boundaries().len());
    for boundary in model.boundaries() {
        let context = format!("boundary '{}' of '{}'", boundary.region, boundary.field.name());
        let value = lower_expr(&boundary.expr, &boundary.field, &context)?;
        check_bounds(&fields, &boundary.domain, &value, &context)?;
        boundaries.push(Statement {
            id: fresh_id(),
            origin: StatementOrigin::Boundary {
                field: boundary.field.name().to_string(),
                region: boundary.region.clone(),
            },
            target: next_target(&boundary.field),
            value,
            guard: None,
        });
    }

    let mut bodies = Vec::new();
    let mut combined: Vec<&GridField> = Vec::new();
    let mut placed = vec![false; boundaries.len()];
    for (position, (equation, interior)) in model.equations().iter().zip(&interiors).enumerate() {
        let target = &equation.target;
        let owned: Vec<(usize, &FinalizedBoundary, &Statement)> = model
            .boundaries()
            .iter()
            .zip(&boundaries)
            .enumerate()
            .filter(|(_, (b, _))| b.field == *target)
            .map(|(index, (b, s))| (index, b, s))
            .collect();
        let interior_box = model.interior(target);

        if owned.is_empty() || !can_combine(model, target) {
            bodies.push(LoopBody {
                name: format!("{}_interior", target.name()),
                kind: BodyKind::Interior {
                    field: target.name().to_string(),
                },
                levels: full_levels(&interior_box),
                statements: vec![interior.clone()],
            });
            if owned.is_empty() || !ghosts_read_later(model, position) {
                continue;
            }
            for (index, boundary, statement) in owned {
                if let Some(read) = next_read_of_later_field(model, boundary, position) {
                    return Err(GenError::IncompleteNest {
                        nest: "fd_kernel".to_string(),
                        detail: format!(
                            "boundary '{}' of '{}' must run before later equations but reads the \
                             next level of '{}'",
                            boundary.region,
                            target.name(),
                            read.field.name()
                        ),
                    });
                }
                bodies.push(boundary_body(boundary, statement.clone()));
                placed[index] = true;
            }
            continue;
        }

        let mut domain = interior_box.clone();
        let mut statements = vec![Statement {
            guard: Some(interior_box),
            ..interior.clone()
        }];
        for (_, boundary, statement) in owned {
            domain = domain.bounding(&boundary.domain);
            statements.push(Statement {
                guard: Some(boundary.domain.clone()),
                ..statement.clone()
            });
        }
        bodies.push(LoopBody {
            name: format!("{}_combined", target.name()),
            kind: BodyKind::Combined {
                field: target.name().to_string(),
            },
            levels: full_levels(&domain),
            statements,
        });
        combined.push(target);
    }

    for ((boundary, statement), placed) in model.boundaries().iter().zip(boundaries).zip(placed) {
        if placed || combined.iter().any(|field| **field == boundary.field) {
            continue;
        }
        bodies.push(boundary_body(boundary, statement));
    }

    let nest = LoopNest {
        name: "fd_kernel".to_string(),
        time_steps,
        fields,
        params: model.params().to_vec(),
        bodies,
        thread_hint: None,
    };
    log::debug!(
        "built loop nest: {} bodies, {} statements ({} combined)",
        nest.bodies.len(),
        nest.statement_count(),
        combined.len()
    );
    Ok(nest)
}

/// A field's boundary work may share the interior sweep only when no statement can observe a
/// half-written next level of that field: its boundaries read no next level at all, and no
/// other statement reads its next level.
fn can_combine(model: &FinalizedModel, field: &GridField) -> bool {
    let own_boundaries_read_next = model
        .boundaries_of(field)
        .any(FinalizedBoundary::reads_next_level);
    if own_boundaries_read_next {
        return false;
    }
    let next_of_field = |r: &AlignedRead| r.field == *field && r.level == TimeLevel::Next;
    let read_by_equation = model
        .equations()
        .iter()
        .flat_map(|e| e.reads.iter())
        .any(|r| next_of_field(r));
    let read_by_other_boundary = model
        .boundaries()
        .iter()
        .filter(|b| b.field != *field)
        .flat_map(|b| b.reads.iter())
        .any(|r| next_of_field(r));
    !(read_by_equation || read_by_other_boundary)
}

/// Whether a later equation, or a boundary of another field, reads the next level of the field
/// updated at `position` inside one of its boundary boxes.
fn ghosts_read_later(model: &FinalizedModel, position: usize) -> bool {
    let field = &model.equations()[position].target;
    let boxes: Vec<&IndexBox> = model.boundaries_of(field).map(|b| &b.domain).collect();
    let hits = |domain: &IndexBox, reads: &[AlignedRead]| {
        reads
            .iter()
            .filter(|r| r.field == *field && r.level == TimeLevel::Next)
            .any(|r| boxes.iter().any(|b| reaches(domain, &r.offsets, b)))
    };

    let by_equation = model.equations()[position + 1..]
        .iter()
        .any(|e| hits(&model.interior(&e.target), &e.reads));
    let by_boundary = model
        .boundaries()
        .iter()
        .filter(|b| b.field != *field)
        .any(|b| hits(&b.domain, &b.reads));
    by_equation || by_boundary
}

fn next_read_of_later_field<'m>(
    model: &FinalizedModel,
    boundary: &'m FinalizedBoundary,
    position: usize,
) -> Option<&'m AlignedRead> {
    boundary.reads.iter().find(|r| {
        r.level == TimeLevel::Next
            && model
                .equations()
                .iter()
                .position(|e| e.target == r.field)
                .is_some_and(|other| other > position)
    })
}

/// Whether `domain` shifted by `offsets` overlaps `target`.
fn reaches(domain: &IndexBox, offsets: &[i64], target: &IndexBox) -> bool {
    if domain.is_empty() || target.is_empty() {
        return false;
    }
    (0..domain.rank()).all(|axis| {
        let o = offsets.get(axis).copied().unwrap_or(0);
        let (lo, hi) = domain.range(axis);
        let (target_lo, target_hi) = target.range(axis);
        lo as i64 + o < target_hi as i64 && (target_lo as i64) < hi as i64 + o
    })
}

fn boundary_body(boundary: &FinalizedBoundary, statement: Statement) -> LoopBody {
    LoopBody {
        name: format!("{}_{}", boundary.field.name(), boundary.region),
        kind: BodyKind::Boundary {
            field: boundary.field.name().to_string(),
            region: boundary.region.clone(),
        },
        levels: full_levels(&boundary.domain),
        statements: vec![statement],
    }
}

fn next_target(field: &GridField) -> ArrayAccess {
    ArrayAccess::new(field.name(), TimeLevel::Next, vec![0; field.rank()])
}

fn full_levels(domain: &IndexBox) -> Vec<LoopLevel> {
    (0..domain.rank())
        .map(|axis| {
            let (start, end) = domain.range(axis);
            LoopLevel::full(axis, start, end)
        })
        .collect()
}

/// Replaces derivative nodes by their stencil expansion and aligns every access to the array
/// grid of `target`.
fn lower_expr(expr: &Expr, target: &GridField, context: &str) -> GenResult<KernelExpr> {
    Ok(match expr.node() {
        ExprNode::Float(value) => KernelExpr::Float(*value),
        ExprNode::Rational(value) => KernelExpr::Rational(value.clone()),
        ExprNode::Param(name) => KernelExpr::Param(name.clone()),
        ExprNode::Access(access) => KernelExpr::Read(ArrayAccess::new(
            access.field.name(),
            access.level,
            align_offsets(target, access, context)?,
        )),
        ExprNode::Neg(inner) => KernelExpr::Neg(Box::new(lower_expr(inner, target, context)?)),
        ExprNode::Binary(op, lhs, rhs) => KernelExpr::binary(
            *op,
            lower_expr(lhs, target, context)?,
            lower_expr(rhs, target, context)?,
        ),
        ExprNode::Derivative(term) => lower_expr(&term.expansion, target, context)?,
    })
}

/// Every read of `value`, taken from any point of `domain`, must stay inside the read field.
fn check_bounds(
    fields: &[FieldLayout],
    domain: &IndexBox,
    value: &KernelExpr,
    context: &str,
) -> GenResult<()> {
    if domain.is_empty() {
        return Ok(());
    }
    for read in value.reads() {
        let Some(layout) = fields.iter().find(|f| f.name == read.field) else {
            return Err(GenError::UndeclaredField {
                field: read.field.clone(),
                context: context.to_string(),
            });
        };
        for (axis, (&offset, &extent)) in read.offsets.iter().zip(&layout.extents).enumerate() {
            let (lo, hi) = domain.range(axis);
            let first = lo as i64 + offset;
            let last = hi as i64 - 1 + offset;
            if first < 0 || last >= extent as i64 {
                return Err(GenError::AccessOutOfBounds {
                    field: read.field.clone(),
                    context: context.to_string(),
                    axis,
                    offset,
                    extent,
                });
            }
        }
    }
    Ok(())
}
