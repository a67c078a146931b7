use serde::Serialize;

use super::expr::{Expr, ExprNode};
use super::field::GridField;
use crate::solver::error::{GenError, GenResult};
use crate::solver::ir::{FieldSnapshot, IndexBox};
use crate::solver::stencil::exact_to_f64;

/// Parameter name bound to the simulated time when a solution is evaluated.
pub const TIME_PARAM: &str = "t";

/// Simulated time, for use inside an analytic solution.
pub fn time() -> Expr {
    Expr::param(TIME_PARAM)
}

/// Physical coordinate along `axis`, bound to `x{axis}` when a solution is evaluated.
///
/// Array element `i` of a field sits at `(i + shift) * h`, where `shift` is 1/2 on staggered
/// axes and `h` is the field's spacing.
pub fn coordinate(axis: usize) -> Expr {
    Expr::param(format!("x{axis}"))
}

/// Exact solution of one field, kept beside the model to check kernel output against.
#[derive(Debug, Clone)]
pub struct AnalyticSolution {
    field: GridField,
    expr: Expr,
}

/// Pointwise difference between a computed field and its analytic solution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SolutionError {
    pub max_abs: f64,
    pub rms: f64,
    pub points: usize,
}

impl AnalyticSolution {
    /// Only closed-form expressions are accepted: constants, parameters, coordinates and time.
    pub(crate) fn new(field: &GridField, expr: Expr) -> GenResult<Self> {
        if let Some(access) = expr.accesses().first() {
            return Err(GenError::InvalidSolution {
                field: field.name().to_string(),
                detail: format!("reads field '{}'", access.field.name()),
            });
        }
        if !expr.derivatives().is_empty() {
            return Err(GenError::InvalidSolution {
                field: field.name().to_string(),
                detail: "contains a derivative".to_string(),
            });
        }
        Ok(Self {
            field: field.clone(),
            expr,
        })
    }

    pub fn field(&self) -> &GridField {
        &self.field
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Value at array index `point` and time `time`; `params` binds every other parameter.
    pub fn value_at(&self, point: &[usize], time: f64, params: &[(&str, f64)]) -> GenResult<f64> {
        let positions: Vec<f64> = point
            .iter()
            .enumerate()
            .map(|(axis, &i)| {
                let shift = exact_to_f64(&self.field.stagger_shift(axis));
                (i as f64 + shift) * self.field.spacing()[axis]
            })
            .collect();
        let bind = |name: &str| -> Option<f64> {
            if name == TIME_PARAM {
                return Some(time);
            }
            if let Some(axis) = name.strip_prefix('x').and_then(|a| a.parse::<usize>().ok()) {
                return positions.get(axis).copied();
            }
            params.iter().find(|(p, _)| *p == name).map(|(_, v)| *v)
        };
        evaluate(&self.expr, &bind).map_err(|name| GenError::InvalidSolution {
            field: self.field.name().to_string(),
            detail: format!("parameter '{name}' is unbound"),
        })
    }

    /// The solution sampled at every array element, halo cells included.
    pub fn snapshot(&self, time: f64, params: &[(&str, f64)]) -> GenResult<FieldSnapshot> {
        let extents = self.field.extents().to_vec();
        let all = IndexBox::from_ranges(&extents.iter().map(|&e| (0, e)).collect::<Vec<_>>());
        let data = all
            .points()
            .iter()
            .map(|point| self.value_at(point, time, params))
            .collect::<GenResult<Vec<f64>>>()?;
        Ok(FieldSnapshot::new(self.field.name(), extents, data))
    }

    /// Error of `snapshot` against the solution over the cells of `region`.
    pub fn error(
        &self,
        snapshot: &FieldSnapshot,
        region: &IndexBox,
        time: f64,
        params: &[(&str, f64)],
    ) -> GenResult<SolutionError> {
        if snapshot.shape != self.field.extents()
            || snapshot.data.len() != snapshot.shape.iter().product::<usize>()
        {
            return Err(GenError::Snapshot {
                field: snapshot.field.clone(),
                detail: format!(
                    "{} values of shape {:?} do not cover extents {:?}",
                    snapshot.data.len(),
                    snapshot.shape,
                    self.field.extents()
                ),
            });
        }

        let mut max_abs = 0.0f64;
        let mut squares = 0.0;
        let points = region.points();
        for point in &points {
            let flat = point
                .iter()
                .zip(&snapshot.shape)
                .fold(0, |acc, (&i, &extent)| acc * extent + i);
            let diff = (snapshot.data[flat] - self.value_at(point, time, params)?).abs();
            max_abs = max_abs.max(diff);
            squares += diff * diff;
        }
        let rms = if points.is_empty() {
            0.0
        } else {
            (squares / points.len() as f64).sqrt()
        };
        log::debug!(
            "'{}' against its analytic solution at t={time}: max {max_abs:e}, rms {rms:e}",
            self.field.name()
        );
        Ok(SolutionError {
            max_abs,
            rms,
            points: points.len(),
        })
    }
}

/// Numeric value of a closed-form expression. Fails with the first unbound parameter.
fn evaluate(expr: &Expr, bind: &impl Fn(&str) -> Option<f64>) -> Result<f64, String> {
    Ok(match expr.node() {
        ExprNode::Float(value) => *value,
        ExprNode::Rational(value) => exact_to_f64(value),
        ExprNode::Param(name) => bind(name.as_str()).ok_or_else(|| name.clone())?,
        ExprNode::Neg(inner) => -evaluate(inner, bind)?,
        ExprNode::Binary(op, lhs, rhs) => op.apply(evaluate(lhs, bind)?, evaluate(rhs, bind)?),
        ExprNode::Access(access) => return Err(access.field.name().to_string()),
        ExprNode::Derivative(term) => evaluate(&term.expansion, bind)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::model::field::FieldSpec;

    fn field(staggered: bool) -> GridField {
        let mut spec = FieldSpec::new("u", vec![6, 4], vec![0.5, 2.0]);
        if staggered {
            spec = spec.staggered_on(0);
        }
        GridField::new(0, spec)
    }

    #[test]
    fn coordinates_follow_spacing_and_staggering() {
        let plane = coordinate(0) + 10.0 * coordinate(1);
        let x = AnalyticSolution::new(&field(false), plane).unwrap();
        assert_eq!(x.value_at(&[3, 1], 0.0, &[]).unwrap(), 21.5);

        let shifted = AnalyticSolution::new(&field(true), coordinate(0)).unwrap();
        assert_eq!(shifted.value_at(&[3, 1], 0.0, &[]).unwrap(), 1.75);
    }

    #[test]
    fn time_and_parameters_are_bound() {
        let solution =
            AnalyticSolution::new(&field(false), Expr::param("c") * time() - Expr::int(1))
                .unwrap();
        assert_eq!(solution.value_at(&[0, 0], 4.0, &[("c", 0.5)]).unwrap(), 1.0);

        let err = solution.value_at(&[0, 0], 4.0, &[]).unwrap_err();
        assert!(matches!(
            err,
            GenError::InvalidSolution { ref detail, .. } if detail.contains("'c'")
        ));
    }

    #[test]
    fn solutions_may_not_read_fields() {
        let u = field(false);
        let err = AnalyticSolution::new(&u, u.current()).unwrap_err();
        assert_eq!(err.kind(), "InvalidSolution");
    }

    #[test]
    fn error_covers_only_the_region() {
        let solution = AnalyticSolution::new(&field(false), Expr::float(1.0)).unwrap();
        let mut snapshot = solution.snapshot(0.0, &[]).unwrap();
        assert!(snapshot.data.iter().all(|&v| v == 1.0));

        // Off by 3 in one interior cell, and garbage in a halo corner.
        snapshot.data[2 * 4 + 1] = 4.0;
        snapshot.data[0] = 100.0;
        let interior = IndexBox::from_ranges(&[(1, 5), (1, 3)]);
        let error = solution.error(&snapshot, &interior, 0.0, &[]).unwrap();
        assert_eq!(error.points, 8);
        assert_eq!(error.max_abs, 3.0);
        assert_eq!(error.rms, (9.0f64 / 8.0).sqrt());

        let wrong = FieldSnapshot::zeros("u", vec![6, 5]);
        assert!(matches!(
            solution.error(&wrong, &interior, 0.0, &[]),
            Err(GenError::Snapshot { .. })
        ));
    }
}
