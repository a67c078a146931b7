use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::rc::Rc;

use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};

use super::field::{GridField, TimeLevel};
use crate::solver::stencil::{exact_int, Exact, StencilCoefficients};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }

    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Add | BinaryOp::Sub => 1,
            BinaryOp::Mul | BinaryOp::Div => 2,
        }
    }

    pub fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Sub => lhs - rhs,
            BinaryOp::Mul => lhs * rhs,
            BinaryOp::Div => lhs / rhs,
        }
    }
}

/// Read of a field at a time level, offset (in grid units, possibly half-integer) from the
/// logical position being updated.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldAccess {
    pub field: GridField,
    pub level: TimeLevel,
    pub offsets: Vec<Exact>,
}

#[derive(Debug, Clone)]
pub struct DerivativeTerm {
    pub operand: Expr,
    pub axis: usize,
    pub order: u32,
    pub accuracy: u32,
    pub stencil: Rc<StencilCoefficients>,
    pub spacing: f64,
    /// `sum_j w_j * operand(x + s_j) / h^order`
    pub expansion: Expr,
}

#[derive(Debug)]
pub enum ExprNode {
    Float(f64),
    Rational(Exact),
    Param(String),
    Access(FieldAccess),
    Neg(Expr),
    Binary(BinaryOp, Expr, Expr),
    Derivative(DerivativeTerm),
}

/// Immutable expression DAG node. Cloning shares the node.
#[derive(Debug, Clone)]
pub struct Expr(Rc<ExprNode>);

impl Expr {
    fn new(node: ExprNode) -> Self {
        Self(Rc::new(node))
    }

    pub fn float(value: f64) -> Self {
        Self::new(ExprNode::Float(value))
    }

    pub fn rational(value: Exact) -> Self {
        Self::new(ExprNode::Rational(value))
    }

    pub fn int(value: i64) -> Self {
        Self::rational(exact_int(value))
    }

    /// Named scalar kernel argument (e.g. `dt`).
    pub fn param(name: impl Into<String>) -> Self {
        Self::new(ExprNode::Param(name.into()))
    }

    pub fn access(field: &GridField, level: TimeLevel, offsets: Vec<Exact>) -> Self {
        Self::new(ExprNode::Access(FieldAccess {
            field: field.clone(),
            level,
            offsets,
        }))
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Self::new(ExprNode::Binary(op, lhs, rhs))
    }

    pub(crate) fn derivative(term: DerivativeTerm) -> Self {
        Self::new(ExprNode::Derivative(term))
    }

    pub fn node(&self) -> &ExprNode {
        &self.0
    }

    pub fn ptr_eq(&self, other: &Expr) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    /// Same expression evaluated `delta` grid units further along `axis`.
    ///
    /// Shifts are memoized per node, so sub-expressions shared in `self` stay shared in the
    /// result.
    pub fn shifted(&self, axis: usize, delta: &Exact) -> Expr {
        if delta.is_zero() {
            return self.clone();
        }
        let mut memo = HashMap::new();
        self.shift_with(axis, delta, &mut memo)
    }

    fn shift_with(&self, axis: usize, delta: &Exact, memo: &mut HashMap<usize, Expr>) -> Expr {
        if let Some(done) = memo.get(&self.id()) {
            return done.clone();
        }
        let shifted = match self.node() {
            ExprNode::Float(_) | ExprNode::Rational(_) | ExprNode::Param(_) => self.clone(),
            ExprNode::Access(access) => {
                let mut offsets = access.offsets.clone();
                if let Some(offset) = offsets.get_mut(axis) {
                    let moved = &*offset + delta;
                    *offset = moved;
                }
                Expr::access(&access.field, access.level, offsets)
            }
            ExprNode::Neg(inner) => Expr::new(ExprNode::Neg(inner.shift_with(axis, delta, memo))),
            ExprNode::Binary(op, lhs, rhs) => Expr::binary(
                *op,
                lhs.shift_with(axis, delta, memo),
                rhs.shift_with(axis, delta, memo),
            ),
            ExprNode::Derivative(term) => Expr::derivative(DerivativeTerm {
                operand: term.operand.shift_with(axis, delta, memo),
                expansion: term.expansion.shift_with(axis, delta, memo),
                ..term.clone()
            }),
        };
        memo.insert(self.id(), shifted.clone());
        shifted
    }

    fn walk(&self, seen: &mut HashSet<usize>, visit: &mut impl FnMut(&Expr)) {
        if !seen.insert(self.id()) {
            return;
        }
        visit(self);
        match self.node() {
            ExprNode::Neg(inner) => inner.walk(seen, visit),
            ExprNode::Binary(_, lhs, rhs) => {
                lhs.walk(seen, visit);
                rhs.walk(seen, visit);
            }
            // The operand itself is never read; only its shifted copies in the expansion are.
            ExprNode::Derivative(term) => term.expansion.walk(seen, visit),
            _ => {}
        }
    }

    /// Every distinct field access the expression evaluates.
    pub fn accesses(&self) -> Vec<FieldAccess> {
        let mut out: Vec<FieldAccess> = Vec::new();
        self.walk(&mut HashSet::new(), &mut |expr| {
            if let ExprNode::Access(access) = expr.node() {
                if !out.contains(access) {
                    out.push(access.clone());
                }
            }
        });
        out
    }

    pub fn params(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.walk(&mut HashSet::new(), &mut |expr| {
            if let ExprNode::Param(name) = expr.node() {
                out.insert(name.clone());
            }
        });
        out
    }

    /// Outermost derivative terms, in evaluation order.
    pub fn derivatives(&self) -> Vec<DerivativeTerm> {
        fn collect(expr: &Expr, seen: &mut HashSet<usize>, out: &mut Vec<DerivativeTerm>) {
            if !seen.insert(expr.id()) {
                return;
            }
            match expr.node() {
                ExprNode::Derivative(term) => out.push(term.clone()),
                ExprNode::Neg(inner) => collect(inner, seen, out),
                ExprNode::Binary(_, lhs, rhs) => {
                    collect(lhs, seen, out);
                    collect(rhs, seen, out);
                }
                _ => {}
            }
        }
        let mut out = Vec::new();
        collect(self, &mut HashSet::new(), &mut out);
        out
    }

    /// Number of distinct nodes reachable through derivative expansions.
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.walk(&mut HashSet::new(), &mut |_| count += 1);
        count
    }

    fn fmt_prec(&self, f: &mut fmt::Formatter<'_>, parent: u8) -> fmt::Result {
        match self.node() {
            ExprNode::Float(value) => write!(f, "{value:?}"),
            ExprNode::Rational(value) if value.is_integer() => write!(f, "{value}"),
            ExprNode::Rational(value) => write!(f, "({value})"),
            ExprNode::Param(name) => f.write_str(name),
            ExprNode::Access(access) => {
                write!(f, "{}.{}", access.field.name(), access.level.as_str())?;
                if access.offsets.iter().any(|o| !o.is_zero()) {
                    write!(f, "[")?;
                    for (axis, offset) in access.offsets.iter().enumerate() {
                        if axis > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{offset}")?;
                    }
                    write!(f, "]")?;
                }
                Ok(())
            }
            ExprNode::Neg(inner) => {
                write!(f, "-")?;
                inner.fmt_prec(f, 3)
            }
            ExprNode::Binary(op, lhs, rhs) => {
                let prec = op.precedence();
                if prec < parent {
                    write!(f, "(")?;
                }
                lhs.fmt_prec(f, prec)?;
                write!(f, " {} ", op.symbol())?;
                rhs.fmt_prec(f, prec + 1)?;
                if prec < parent {
                    write!(f, ")")?;
                }
                Ok(())
            }
            ExprNode::Derivative(term) => {
                let tag = if term.stencil.kind() == crate::solver::stencil::StencilKind::Staggered
                {
                    "Ds"
                } else {
                    "D"
                };
                write!(f, "{tag}{}_{}(", term.order, term.axis)?;
                term.operand.fmt_prec(f, 0)?;
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_prec(f, 0)
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::float(value)
    }
}

impl From<&Expr> for Expr {
    fn from(value: &Expr) -> Self {
        value.clone()
    }
}

impl From<Exact> for Expr {
    fn from(value: Exact) -> Self {
        Expr::rational(value)
    }
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<R: Into<Expr>> $trait<R> for Expr {
            type Output = Expr;

            fn $method(self, rhs: R) -> Expr {
                Expr::binary($op, self, rhs.into())
            }
        }

        impl<R: Into<Expr>> $trait<R> for &Expr {
            type Output = Expr;

            fn $method(self, rhs: R) -> Expr {
                Expr::binary($op, self.clone(), rhs.into())
            }
        }

        impl $trait<Expr> for f64 {
            type Output = Expr;

            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary($op, Expr::float(self), rhs)
            }
        }

        impl $trait<&Expr> for f64 {
            type Output = Expr;

            fn $method(self, rhs: &Expr) -> Expr {
                Expr::binary($op, Expr::float(self), rhs.clone())
            }
        }
    };
}

impl_binary_op!(Add, add, BinaryOp::Add);
impl_binary_op!(Sub, sub, BinaryOp::Sub);
impl_binary_op!(Mul, mul, BinaryOp::Mul);
impl_binary_op!(Div, div, BinaryOp::Div);

impl Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::new(ExprNode::Neg(self))
    }
}

impl Neg for &Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::new(ExprNode::Neg(self.clone()))
    }
}

/// Builds `sum_j w_j * operand(x + s_j) / spacing^order`, skipping zero weights.
pub(crate) fn expand_stencil(
    operand: &Expr,
    axis: usize,
    stencil: &StencilCoefficients,
    spacing: Option<f64>,
) -> Expr {
    let mut sum: Option<Expr> = None;
    for point in stencil.points() {
        if point.weight.is_zero() {
            continue;
        }
        let shifted = operand.shifted(axis, &point.offset);
        let term = if point.weight.is_one() {
            shifted
        } else {
            Expr::rational(point.weight.clone()) * shifted
        };
        sum = Some(match sum {
            Some(acc) => acc + term,
            None => term,
        });
    }
    let sum = sum.unwrap_or_else(|| Expr::float(0.0));
    match spacing {
        Some(h) => sum / Expr::float(h.powi(stencil.derivative_order() as i32)),
        None => sum,
    }
}
