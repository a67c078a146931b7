use std::collections::BTreeSet;

use super::c_ast::{
    BinaryOp as CBinaryOp, Block, Expr, ForStep, Function, Item, Module, Param, Stmt, Type,
};
use super::KernelSource;
use crate::solver::config::is_c_identifier;
use crate::solver::error::{GenError, GenResult};
use crate::solver::ir::{
    ArrayAccess, BinaryOp, FieldLayout, FieldRole, KernelExpr, KernelManifest, LevelRole,
    LoopBody, LoopLevel, LoopNest, Precision, Statement, TimeLevel,
};
use crate::solver::stencil::exact_to_f64;

const MIN_MACRO: &str = "FD_MIN";

/// Renders a loop nest as one C99 function with OpenMP pragmas, plus its buffer manifest.
///
/// Field `f` is passed as one pointer to `time_levels * prod(extents)` elements, slots stored
/// back to back; scalar parameters follow as `const double` in name order.
pub fn emit(nest: &LoopNest) -> GenResult<(KernelSource, KernelManifest)> {
    validate(nest)?;

    let mut module = Module::new();
    module.push(Item::Comment(header(nest)));
    module.push(Item::Include("stddef.h".to_string()));
    module.push(Item::Include("math.h".to_string()));
    module.push(Item::define(
        MIN_MACRO,
        vec!["a".to_string(), "b".to_string()],
        "((a) < (b) ? (a) : (b))",
    ));
    module.extend(nest.fields.iter().map(index_macro));

    let used = used_levels(nest);
    let mut step = Block::default();
    for layout in &nest.fields {
        if layout.time_levels <= 1 {
            continue;
        }
        for level in [TimeLevel::Previous, TimeLevel::Current, TimeLevel::Next] {
            if used.contains(&(layout.name.as_str(), level)) {
                step.push(Stmt::decl(
                    Type::constant(Type::Long),
                    slot_var(&layout.name, level),
                    Some(slot_expr(layout.time_levels, level)),
                ));
            }
        }
    }
    for body in &nest.bodies {
        step.push(Stmt::Comment(format!(
            "{} ({}, {} statement{})",
            body.name,
            body.kind.as_str(),
            body.statements.len(),
            if body.statements.len() == 1 { "" } else { "s" }
        )));
        step.stmts.extend(emit_body(nest, body));
    }

    let mut function_body = Block::default();
    function_body.push(Stmt::for_range(
        "t",
        Expr::lit_int(0),
        Expr::from(nest.time_steps),
        ForStep::Increment,
        step,
    ));

    let mut params: Vec<Param> = nest
        .fields
        .iter()
        .map(|layout| {
            let element = scalar_type(layout.precision);
            let ty = if layout.role == FieldRole::ReadOnly {
                Type::restrict_ptr(Type::constant(element))
            } else {
                Type::restrict_ptr(element)
            };
            Param::new(layout.name.clone(), ty)
        })
        .collect();
    params.extend(
        nest.params
            .iter()
            .map(|name| Param::new(name.clone(), Type::constant(Type::Double))),
    );
    module.push(Item::Function(Function::new(
        nest.name.clone(),
        params,
        Type::Void,
        function_body,
    )));

    let manifest = KernelManifest::from_nest(nest);
    log::debug!(
        "emitted kernel '{}': {} bodies, {} fields, {} parameters",
        nest.name,
        nest.bodies.len(),
        nest.fields.len(),
        nest.params.len()
    );
    Ok((KernelSource::new(nest.name.clone(), module), manifest))
}

fn incomplete(nest: &LoopNest, detail: String) -> GenError {
    GenError::IncompleteNest {
        nest: nest.name.clone(),
        detail,
    }
}

/// Everything the renderer relies on: a callable name, non-empty bodies whose levels define an
/// index variable for every axis, and no reference to an undeclared field or parameter.
fn validate(nest: &LoopNest) -> GenResult<()> {
    if !is_c_identifier(&nest.name) {
        return Err(incomplete(
            nest,
            format!("'{}' is not a valid C function name", nest.name),
        ));
    }
    if nest.bodies.is_empty() {
        return Err(incomplete(nest, "no loop bodies".to_string()));
    }

    for body in &nest.bodies {
        if body.statements.is_empty() {
            return Err(incomplete(nest, format!("body '{}' has no statements", body.name)));
        }
        if body.levels.is_empty() {
            return Err(incomplete(nest, format!("body '{}' has no loop levels", body.name)));
        }
        for (position, level) in body.levels.iter().enumerate() {
            if let LevelRole::Point { .. } = level.role {
                let has_tile = body.levels[..position]
                    .iter()
                    .any(|l| l.axis == level.axis && matches!(l.role, LevelRole::Tile { .. }));
                if !has_tile {
                    return Err(incomplete(
                        nest,
                        format!(
                            "body '{}' has a point loop on axis {} without its tile loop",
                            body.name, level.axis
                        ),
                    ));
                }
            }
            if level.step == 0 {
                return Err(incomplete(
                    nest,
                    format!("body '{}' has a zero step on axis {}", body.name, level.axis),
                ));
            }
        }
        let indexed: BTreeSet<usize> = body
            .levels
            .iter()
            .filter(|l| matches!(l.role, LevelRole::Full | LevelRole::Point { .. }))
            .map(|l| l.axis)
            .collect();

        for statement in &body.statements {
            let mut accesses = vec![&statement.target];
            accesses.extend(statement.value.reads());
            for access in accesses {
                let Some(layout) = nest.field(&access.field) else {
                    return Err(incomplete(
                        nest,
                        format!(
                            "statement {} in '{}' references unknown field '{}'",
                            statement.id, body.name, access.field
                        ),
                    ));
                };
                if access.offsets.len() != layout.rank() {
                    return Err(incomplete(
                        nest,
                        format!(
                            "statement {} indexes '{}' with {} offsets, rank is {}",
                            statement.id,
                            access.field,
                            access.offsets.len(),
                            layout.rank()
                        ),
                    ));
                }
                if (0..layout.rank()).any(|axis| !indexed.contains(&axis)) {
                    return Err(incomplete(
                        nest,
                        format!(
                            "body '{}' does not iterate every axis of '{}'",
                            body.name, access.field
                        ),
                    ));
                }
            }
            if let Some(param) = statement
                .value
                .params()
                .into_iter()
                .find(|p| !nest.params.iter().any(|known| known.as_str() == *p))
            {
                return Err(incomplete(
                    nest,
                    format!("statement {} uses undeclared parameter '{param}'", statement.id),
                ));
            }
        }
    }
    Ok(())
}

fn header(nest: &LoopNest) -> String {
    let mut lines = vec![format!(
        "{}: generated by fdgen, do not edit. {} time step{}.",
        nest.name,
        nest.time_steps,
        if nest.time_steps == 1 { "" } else { "s" }
    )];
    for layout in &nest.fields {
        lines.push(format!(
            "{}: {} slot(s) of {:?} {}, final slot {}",
            layout.name,
            layout.time_levels,
            layout.extents,
            layout.precision.c_type(),
            layout.final_slot(nest.time_steps)
        ));
    }
    lines.join("\n")
}

fn scalar_type(precision: Precision) -> Type {
    match precision {
        Precision::F32 => Type::Float,
        Precision::F64 => Type::Double,
    }
}

fn macro_name(field: &str) -> String {
    format!("AT_{field}")
}

/// `#define AT_u(s, i0, i1) u[((size_t)(s) * 10 + (size_t)(i0)) * 6 + (size_t)(i1)]`
fn index_macro(layout: &FieldLayout) -> Item {
    let mut params = vec!["s".to_string()];
    let mut index = "(size_t)(s)".to_string();
    for (axis, extent) in layout.extents.iter().enumerate() {
        params.push(format!("i{axis}"));
        index = if axis == 0 {
            format!("{index} * {extent} + (size_t)(i{axis})")
        } else {
            format!("({index}) * {extent} + (size_t)(i{axis})")
        };
    }
    Item::define(
        macro_name(&layout.name),
        params,
        format!("{}[{}]", layout.name, index),
    )
}

fn used_levels(nest: &LoopNest) -> BTreeSet<(&str, TimeLevel)> {
    let mut used = BTreeSet::new();
    for statement in nest.statements() {
        used.insert((statement.target.field.as_str(), statement.target.level));
        for read in statement.value.reads() {
            used.insert((read.field.as_str(), read.level));
        }
    }
    used
}

fn slot_var(field: &str, level: TimeLevel) -> String {
    let suffix = match level {
        TimeLevel::Previous => "prev",
        TimeLevel::Current => "cur",
        TimeLevel::Next => "next",
    };
    format!("s_{field}_{suffix}")
}

/// Slot of `level` at step `t`, as `(t + offset) mod levels` with a non-negative left operand.
fn slot_expr(levels: usize, level: TimeLevel) -> Expr {
    let levels = levels as i64;
    let shift = level.offset().rem_euclid(levels);
    Expr::ident("t").offset_by(shift).rem(Expr::lit_int(levels))
}

fn slot_of(nest: &LoopNest, access: &ArrayAccess) -> Expr {
    match nest.field(&access.field) {
        Some(layout) if layout.time_levels > 1 => {
            Expr::ident(slot_var(&access.field, access.level))
        }
        _ => Expr::lit_int(0),
    }
}

fn access_expr(nest: &LoopNest, access: &ArrayAccess) -> Expr {
    let mut args = vec![slot_of(nest, access)];
    args.extend(
        access
            .offsets
            .iter()
            .enumerate()
            .map(|(axis, &offset)| Expr::ident(format!("i{axis}")).offset_by(offset)),
    );
    Expr::call_named(macro_name(&access.field), args)
}

fn lower_value(nest: &LoopNest, expr: &KernelExpr) -> Expr {
    match expr {
        KernelExpr::Float(value) => Expr::lit_f64(*value),
        KernelExpr::Rational(value) => Expr::lit_f64(exact_to_f64(value)),
        KernelExpr::Param(name) => Expr::ident(name.clone()),
        KernelExpr::Read(access) => access_expr(nest, access),
        KernelExpr::Neg(inner) => -lower_value(nest, inner),
        KernelExpr::Binary { op, lhs, rhs } => {
            let op = match op {
                BinaryOp::Add => CBinaryOp::Add,
                BinaryOp::Sub => CBinaryOp::Sub,
                BinaryOp::Mul => CBinaryOp::Mul,
                BinaryOp::Div => CBinaryOp::Div,
            };
            Expr::binary(lower_value(nest, lhs), op, lower_value(nest, rhs))
        }
    }
}

fn emit_statement(nest: &LoopNest, body: &LoopBody, statement: &Statement) -> Stmt {
    let mut value = lower_value(nest, &statement.value);
    if nest
        .field(&statement.target.field)
        .is_some_and(|layout| layout.precision == Precision::F32)
    {
        value = Expr::cast(Type::Float, value);
    }
    let assign = Stmt::assign(access_expr(nest, &statement.target), value);

    let Some(guard) = &statement.guard else {
        return assign;
    };
    let domain = body.domain();
    let mut cond: Option<Expr> = None;
    for axis in 0..guard.rank() {
        let (lo, hi) = guard.range(axis);
        let (domain_lo, domain_hi) = if axis < domain.rank() {
            domain.range(axis)
        } else {
            (0, usize::MAX)
        };
        let var = Expr::ident(format!("i{axis}"));
        let mut terms = Vec::new();
        if lo > domain_lo {
            terms.push(var.clone().ge(Expr::from(lo)));
        }
        if hi < domain_hi {
            terms.push(var.lt(Expr::from(hi)));
        }
        for term in terms {
            cond = Some(match cond {
                Some(acc) => acc.and(term),
                None => term,
            });
        }
    }
    match cond {
        Some(cond) => Stmt::If {
            cond,
            then_block: Block::new(vec![assign]),
        },
        None => assign,
    }
}

fn emit_body(nest: &LoopNest, body: &LoopBody) -> Vec<Stmt> {
    let outer_parallel = body.levels.iter().position(LoopLevel::is_parallel);
    let inner_parallel = body.levels.iter().rposition(LoopLevel::is_parallel);
    let innermost = body.levels.len() - 1;

    let mut inner = Block::new(
        body.statements
            .iter()
            .map(|statement| emit_statement(nest, body, statement))
            .collect(),
    );

    for (position, level) in body.levels.iter().enumerate().rev() {
        let axis = level.axis;
        let (var, init, end, step) = match level.role {
            LevelRole::Full => (
                format!("i{axis}"),
                Expr::from(level.start),
                Expr::from(level.end),
                level.step,
            ),
            LevelRole::Tile { size } => (
                format!("i{axis}_t"),
                Expr::from(level.start),
                Expr::from(level.end),
                size,
            ),
            LevelRole::Point { size } => {
                let tile = Expr::ident(format!("i{axis}_t"));
                (
                    format!("i{axis}"),
                    tile.clone(),
                    Expr::call_named(
                        MIN_MACRO,
                        vec![tile + Expr::from(size), Expr::from(level.end)],
                    ),
                    level.step,
                )
            }
        };
        let step = if step == 1 {
            ForStep::Increment
        } else {
            ForStep::AddAssign(Expr::from(step))
        };

        let mut stmts = Vec::new();
        if Some(position) == outer_parallel {
            let threads = level
                .parallel
                .and_then(|hint| hint.threads)
                .map(|n| format!(" num_threads({n})"))
                .unwrap_or_default();
            stmts.push(Stmt::Pragma(format!("omp parallel for{threads}")));
        } else if Some(position) == inner_parallel && position == innermost {
            stmts.push(Stmt::Pragma("omp simd".to_string()));
        }
        stmts.push(Stmt::for_range(var, init, end, step, inner));
        inner = Block::new(stmts);
    }
    inner.stmts
}
