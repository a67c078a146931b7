mod boundary;
mod expr;
mod field;
mod halo;
mod solution;

use std::collections::BTreeSet;
use std::rc::Rc;

use indexmap::IndexMap;

pub use boundary::{
    AxisSpan, BoundaryCondition, FreeSurface, FreeSurfaceKind, Parity, Region, Side,
};
pub use expr::{BinaryOp, DerivativeTerm, Expr, ExprNode, FieldAccess};
pub use field::{FieldRole, FieldSpec, GridField, Precision, TimeLevel};
pub use halo::{align_offsets, compute_halos, AlignedRead, HaloSpec};
pub use solution::{coordinate, time, AnalyticSolution, SolutionError, TIME_PARAM};

use crate::solver::error::{GenError, GenResult};
use crate::solver::ir::{FieldSnapshot, IndexBox};
use crate::solver::scheme::TimeScheme;
use crate::solver::stencil::{StencilCache, StencilKey, StencilKind};

/// Update rule giving the next time level of `target`.
#[derive(Debug, Clone)]
pub struct Equation {
    target: GridField,
    rhs: Expr,
    scheme: Option<TimeScheme>,
}

impl Equation {
    pub fn target(&self) -> &GridField {
        &self.target
    }

    pub fn rhs(&self) -> &Expr {
        &self.rhs
    }

    /// Scheme used when the equation came from [`EquationModel::add_time_update`].
    pub fn scheme(&self) -> Option<TimeScheme> {
        self.scheme
    }
}

#[derive(Debug, Clone)]
enum BoundaryEntry {
    Explicit(BoundaryCondition),
    FreeSurface(GridField, FreeSurface),
}

/// Symbolic description of one time step: fields, update equations and boundary overrides.
///
/// Derivative stencils come from the injected [`StencilCache`], so several models can share
/// derivations without any process-wide state.
#[derive(Debug)]
pub struct EquationModel {
    cache: Rc<StencilCache>,
    fields: Vec<GridField>,
    equations: Vec<Equation>,
    boundaries: Vec<BoundaryEntry>,
    solutions: Vec<AnalyticSolution>,
}

impl EquationModel {
    pub fn new(cache: Rc<StencilCache>) -> Self {
        Self {
            cache,
            fields: Vec::new(),
            equations: Vec::new(),
            boundaries: Vec::new(),
            solutions: Vec::new(),
        }
    }

    pub fn cache(&self) -> &Rc<StencilCache> {
        &self.cache
    }

    pub fn fields(&self) -> &[GridField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&GridField> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub fn equations(&self) -> &[Equation] {
        &self.equations
    }

    /// Explicitly added boundary conditions; free surfaces are expanded during finalization.
    pub fn boundaries(&self) -> impl Iterator<Item = &BoundaryCondition> {
        self.boundaries.iter().filter_map(|entry| match entry {
            BoundaryEntry::Explicit(bc) => Some(bc),
            BoundaryEntry::FreeSurface(..) => None,
        })
    }

    pub fn add_field(
        &mut self,
        name: &str,
        rank: usize,
        extents: &[usize],
        spacing: &[f64],
    ) -> GenResult<GridField> {
        if extents.len() != rank {
            return Err(GenError::RankMismatch {
                field: name.to_string(),
                rank,
                what: "extents",
                found: extents.len(),
            });
        }
        self.add_field_spec(FieldSpec::new(name, extents.to_vec(), spacing.to_vec()))
    }

    pub fn add_field_spec(&mut self, spec: FieldSpec) -> GenResult<GridField> {
        let rank = spec.rank();
        if rank == 0 {
            return Err(GenError::InvalidConfig(format!(
                "field '{}' must have at least one axis",
                spec.name
            )));
        }
        if spec.spacing.len() != rank {
            return Err(GenError::RankMismatch {
                field: spec.name.clone(),
                rank,
                what: "spacing",
                found: spec.spacing.len(),
            });
        }
        if spec.staggered.len() != rank {
            return Err(GenError::RankMismatch {
                field: spec.name.clone(),
                rank,
                what: "staggering",
                found: spec.staggered.len(),
            });
        }
        if spec.extents.iter().any(|&e| e == 0) {
            return Err(GenError::InvalidConfig(format!(
                "field '{}' has an empty axis",
                spec.name
            )));
        }
        if spec.spacing.iter().any(|h| !h.is_finite() || *h <= 0.0) {
            return Err(GenError::InvalidConfig(format!(
                "field '{}' needs positive finite spacing",
                spec.name
            )));
        }
        if self.field(&spec.name).is_some() {
            return Err(GenError::DuplicateField { field: spec.name });
        }

        let field = GridField::new(self.fields.len(), spec);
        log::debug!("declared field {:?}", field);
        self.fields.push(field.clone());
        Ok(field)
    }

    pub fn add_equation(&mut self, target: &GridField, rhs: Expr) -> GenResult<Equation> {
        self.push_equation(target, rhs, None)
    }

    /// Equation built from a time-stepping scheme and a spatial rate `r`, with `dt` a kernel
    /// parameter.
    pub fn add_time_update(
        &mut self,
        target: &GridField,
        scheme: TimeScheme,
        rate: Expr,
    ) -> GenResult<Equation> {
        let dt = Expr::param("dt");
        let rhs = match scheme {
            TimeScheme::ForwardEuler => target.current() + &dt * rate,
            TimeScheme::Leapfrog => {
                2.0 * target.current() - target.previous() + &dt * &dt * rate
            }
        };
        self.push_equation(target, rhs, Some(scheme))
    }

    fn push_equation(
        &mut self,
        target: &GridField,
        rhs: Expr,
        scheme: Option<TimeScheme>,
    ) -> GenResult<Equation> {
        self.ensure_declared(target, "equation target")?;
        if target.is_read_only() {
            return Err(GenError::InvalidTimeLevel {
                field: target.name().to_string(),
                context: "equation target".to_string(),
                level: TimeLevel::Next.as_str(),
            });
        }
        if self.equations.iter().any(|e| e.target == *target) {
            return Err(GenError::DuplicateEquation {
                field: target.name().to_string(),
            });
        }

        let equation = Equation {
            target: target.clone(),
            rhs,
            scheme,
        };
        log::debug!("equation {} <- {}", target.name(), equation.rhs);
        self.equations.push(equation.clone());
        Ok(equation)
    }

    pub fn add_boundary(
        &mut self,
        field: &GridField,
        region: Region,
        expr: Expr,
    ) -> GenResult<BoundaryCondition> {
        self.ensure_declared(field, region.name())?;
        if region.rank() != field.rank() {
            return Err(GenError::RankMismatch {
                field: field.name().to_string(),
                rank: field.rank(),
                what: "region",
                found: region.rank(),
            });
        }
        let condition = BoundaryCondition::new(field.clone(), region, expr);
        self.boundaries
            .push(BoundaryEntry::Explicit(condition.clone()));
        Ok(condition)
    }

    /// Free-surface ghost layers on one face; one boundary condition per ghost layer is
    /// created once the halo width is known.
    pub fn add_free_surface(&mut self, field: &GridField, surface: FreeSurface) -> GenResult<()> {
        self.ensure_declared(field, "free surface")?;
        if surface.axis >= field.rank() {
            return Err(GenError::AxisOutOfRange {
                context: format!("free surface of '{}'", field.name()),
                axis: surface.axis,
                rank: field.rank(),
            });
        }
        self.boundaries
            .push(BoundaryEntry::FreeSurface(field.clone(), surface));
        Ok(())
    }

    /// Attaches the exact solution of `field`, replacing any earlier one.
    ///
    /// `expr` is closed-form: built from constants, parameters, [`coordinate`] and [`time`].
    /// It never reaches the kernel; it is only evaluated against computed snapshots.
    pub fn set_analytic_solution(&mut self, field: &GridField, expr: Expr) -> GenResult<()> {
        self.ensure_declared(field, "analytic solution")?;
        let solution = AnalyticSolution::new(field, expr)?;
        self.solutions.retain(|s| s.field() != field);
        self.solutions.push(solution);
        Ok(())
    }

    pub fn analytic_solution(&self, field: &GridField) -> Option<&AnalyticSolution> {
        self.solutions.iter().find(|s| s.field() == field)
    }

    /// Centered derivative of `operand` along `axis`.
    pub fn derivative(
        &self,
        operand: &Expr,
        axis: usize,
        order: u32,
        accuracy: u32,
    ) -> GenResult<Expr> {
        self.build_derivative(operand, StencilKey::centered(order, accuracy), axis)
    }

    /// Derivative from half-integer offsets, evaluated half a cell away from the operand's grid.
    pub fn staggered_derivative(
        &self,
        operand: &Expr,
        axis: usize,
        order: u32,
        accuracy: u32,
    ) -> GenResult<Expr> {
        self.build_derivative(operand, StencilKey::staggered(order, accuracy), axis)
    }

    /// Sum of second derivatives along every axis of the operand's fields.
    pub fn laplacian(&self, operand: &Expr, accuracy: u32) -> GenResult<Expr> {
        let rank = operand
            .accesses()
            .iter()
            .map(|a| a.field.rank())
            .max()
            .unwrap_or(0);
        let mut sum: Option<Expr> = None;
        for axis in 0..rank {
            let term = self.derivative(operand, axis, 2, accuracy)?;
            sum = Some(match sum {
                Some(acc) => acc + term,
                None => term,
            });
        }
        Ok(sum.unwrap_or_else(|| Expr::float(0.0)))
    }

    fn build_derivative(&self, operand: &Expr, key: StencilKey, axis: usize) -> GenResult<Expr> {
        let context = format!(
            "{} derivative of order {}",
            key.kind.as_str(),
            key.derivative_order
        );

        let mut spacing: Option<f64> = None;
        for access in operand.accesses() {
            let field = &access.field;
            if axis >= field.rank() {
                return Err(GenError::AxisOutOfRange {
                    context: format!("{context} of '{}'", field.name()),
                    axis,
                    rank: field.rank(),
                });
            }
            let h = field.spacing()[axis];
            match spacing {
                Some(first) if first != h => {
                    return Err(GenError::SpacingMismatch {
                        axis,
                        first,
                        second: h,
                    })
                }
                _ => spacing = Some(h),
            }
        }

        let stencil = self.cache.get(key)?;
        let expansion = expr::expand_stencil(operand, axis, &stencil, spacing);
        Ok(Expr::derivative(DerivativeTerm {
            operand: operand.clone(),
            axis,
            order: key.derivative_order,
            accuracy: key.accuracy_order,
            spacing: spacing.unwrap_or(1.0),
            stencil,
            expansion,
        }))
    }

    fn ensure_declared(&self, field: &GridField, context: &str) -> GenResult<()> {
        if self.fields.iter().any(|f| f == field) {
            Ok(())
        } else {
            Err(GenError::UndeclaredField {
                field: field.name().to_string(),
                context: context.to_string(),
            })
        }
    }

    fn equation_position(&self, field: &GridField) -> Option<usize> {
        self.equations.iter().position(|e| e.target == *field)
    }

    /// Validates the model and resolves everything that depends on halo widths.
    pub fn finalize(&self) -> GenResult<FinalizedModel> {
        for field in &self.fields {
            if !field.is_read_only() && self.equation_position(field).is_none() {
                return Err(GenError::MissingEquation {
                    field: field.name().to_string(),
                });
            }
        }

        let mut equations = Vec::with_capacity(self.equations.len());
        for (position, equation) in self.equations.iter().enumerate() {
            let context = format!("equation for '{}'", equation.target.name());
            let reads = self.check_reads(&equation.target, &equation.rhs, &context, |field| {
                self.equation_position(field)
                    .is_some_and(|other| other < position)
            })?;
            equations.push(FinalizedEquation {
                target: equation.target.clone(),
                rhs: equation.rhs.clone(),
                scheme: equation.scheme,
                reads,
            });
        }

        let halos = compute_halos(
            &self.fields,
            equations
                .iter()
                .map(|e| (&e.target, e.reads.as_slice())),
        )?;

        let mut conditions = Vec::new();
        for entry in &self.boundaries {
            match entry {
                BoundaryEntry::Explicit(bc) => conditions.push(bc.clone()),
                BoundaryEntry::FreeSurface(field, surface) => {
                    let faces = halos.get(field.name()).unwrap_or_default();
                    conditions.extend(surface.expand(field, faces));
                }
            }
        }

        let mut boundaries: Vec<FinalizedBoundary> = Vec::with_capacity(conditions.len());
        for condition in conditions {
            let field = condition.field();
            let Some(owner) = self.equation_position(field) else {
                return Err(GenError::BoundaryWithoutEquation {
                    field: field.name().to_string(),
                    region: condition.label().to_string(),
                });
            };
            let faces = halos.get(field.name()).unwrap_or_default();
            let domain = condition.region().resolve(field, faces)?;
            if let Some(previous) = boundaries
                .iter()
                .find(|b| b.field == *field && b.domain.intersects(&domain))
            {
                return Err(GenError::ConflictingBoundary {
                    field: field.name().to_string(),
                    first: previous.region.clone(),
                    second: condition.label().to_string(),
                });
            }

            let context = format!("boundary '{}' of '{}'", condition.label(), field.name());
            let reads = self.check_reads(field, condition.expr(), &context, |other| {
                other == field
                    || self
                        .equation_position(other)
                        .is_some_and(|position| position < owner)
            })?;
            boundaries.push(FinalizedBoundary {
                field: field.clone(),
                region: condition.label().to_string(),
                domain,
                expr: condition.expr().clone(),
                reads,
            });
        }

        let reads_previous = |field: &GridField| {
            equations
                .iter()
                .flat_map(|e| e.reads.iter())
                .chain(boundaries.iter().flat_map(|b| b.reads.iter()))
                .any(|r| r.field == *field && r.level == TimeLevel::Previous)
        };
        let time_levels = self
            .fields
            .iter()
            .map(|field| {
                let levels = if field.is_read_only() {
                    1
                } else if reads_previous(field) {
                    3
                } else {
                    2
                };
                (field.name().to_string(), levels)
            })
            .collect();

        let params: BTreeSet<String> = equations
            .iter()
            .map(|e| &e.rhs)
            .chain(boundaries.iter().map(|b| &b.expr))
            .flat_map(|expr| expr.params())
            .collect();

        log::debug!(
            "finalized model: {} fields, {} equations, {} boundary regions",
            self.fields.len(),
            equations.len(),
            boundaries.len()
        );

        Ok(FinalizedModel {
            fields: self.fields.clone(),
            equations,
            boundaries,
            halos,
            time_levels,
            params: params.into_iter().collect(),
            solutions: self.solutions.clone(),
        })
    }

    fn check_reads(
        &self,
        target: &GridField,
        expr: &Expr,
        context: &str,
        next_available: impl Fn(&GridField) -> bool,
    ) -> GenResult<Vec<AlignedRead>> {
        let mut reads: Vec<AlignedRead> = Vec::new();
        for access in expr.accesses() {
            self.ensure_declared(&access.field, context)?;

            let legal = match access.level {
                TimeLevel::Current => true,
                _ if access.field.is_read_only() => false,
                TimeLevel::Previous => true,
                TimeLevel::Next => next_available(&access.field),
            };
            if !legal {
                return Err(GenError::InvalidTimeLevel {
                    field: access.field.name().to_string(),
                    context: context.to_string(),
                    level: access.level.as_str(),
                });
            }

            let read = AlignedRead {
                offsets: align_offsets(target, &access, context)?,
                field: access.field,
                level: access.level,
            };
            if !reads.contains(&read) {
                reads.push(read);
            }
        }
        Ok(reads)
    }
}

#[derive(Debug, Clone)]
pub struct FinalizedEquation {
    pub target: GridField,
    pub rhs: Expr,
    pub scheme: Option<TimeScheme>,
    pub reads: Vec<AlignedRead>,
}

#[derive(Debug, Clone)]
pub struct FinalizedBoundary {
    pub field: GridField,
    pub region: String,
    /// Resolved index box on the field's array.
    pub domain: IndexBox,
    pub expr: Expr,
    pub reads: Vec<AlignedRead>,
}

impl FinalizedBoundary {
    pub fn reads_next_level(&self) -> bool {
        self.reads.iter().any(|r| r.level == TimeLevel::Next)
    }
}

/// Validated model with resolved boundary regions and halos; input to the loop-nest builder.
#[derive(Debug, Clone)]
pub struct FinalizedModel {
    fields: Vec<GridField>,
    equations: Vec<FinalizedEquation>,
    boundaries: Vec<FinalizedBoundary>,
    halos: HaloSpec,
    time_levels: IndexMap<String, usize>,
    params: Vec<String>,
    solutions: Vec<AnalyticSolution>,
}

impl FinalizedModel {
    pub fn fields(&self) -> &[GridField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&GridField> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub fn equations(&self) -> &[FinalizedEquation] {
        &self.equations
    }

    pub fn boundaries(&self) -> &[FinalizedBoundary] {
        &self.boundaries
    }

    pub fn boundaries_of<'a>(
        &'a self,
        field: &'a GridField,
    ) -> impl Iterator<Item = &'a FinalizedBoundary> + 'a {
        self.boundaries.iter().filter(move |b| b.field == *field)
    }

    pub fn halos(&self) -> &HaloSpec {
        &self.halos
    }

    pub fn time_levels(&self, field: &str) -> usize {
        self.time_levels.get(field).copied().unwrap_or(1)
    }

    /// Scalar parameters referenced anywhere, sorted by name.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Interior index box of an updated field.
    pub fn interior(&self, field: &GridField) -> IndexBox {
        let faces = self.halos.get(field.name()).unwrap_or_default();
        IndexBox {
            lower: faces.iter().map(|h| h.lower).collect(),
            upper: field
                .extents()
                .iter()
                .zip(faces)
                .map(|(extent, h)| extent - h.upper)
                .collect(),
        }
    }

    pub fn analytic_solutions(&self) -> &[AnalyticSolution] {
        &self.solutions
    }

    /// Error of a computed snapshot over the interior of its field, against the field's
    /// analytic solution at `time`. `None` when the field has no solution attached.
    pub fn solution_error(
        &self,
        snapshot: &FieldSnapshot,
        time: f64,
        params: &[(&str, f64)],
    ) -> GenResult<Option<SolutionError>> {
        let Some(solution) = self
            .solutions
            .iter()
            .find(|s| s.field().name() == snapshot.field)
        else {
            return Ok(None);
        };
        let interior = self.interior(solution.field());
        solution
            .error(snapshot, &interior, time, params)
            .map(Some)
    }

    /// Derivative stencil kinds in use, for reporting.
    pub fn stencil_kinds(&self) -> BTreeSet<&'static str> {
        self.equations
            .iter()
            .flat_map(|e| e.rhs.derivatives())
            .map(|term| match term.stencil.kind() {
                StencilKind::Centered => "centered",
                StencilKind::Staggered => "staggered",
            })
            .collect()
    }
}
