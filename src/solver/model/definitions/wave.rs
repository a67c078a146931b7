use std::rc::Rc;

use crate::solver::config::PipelineConfig;
use crate::solver::error::GenResult;
use crate::solver::model::{EquationModel, Expr, FieldSpec, Region, Side};
use crate::solver::scheme::TimeScheme;
use crate::solver::stencil::StencilCache;

pub const WAVE1D_EXTENT: usize = 128;
pub const WAVE2D_EXTENT: usize = 96;

/// `u_tt = c2 * u_xx` with `u = 0` held in both halos.
pub fn wave1d_model(cache: Rc<StencilCache>, config: &PipelineConfig) -> GenResult<EquationModel> {
    let mut model = EquationModel::new(cache);
    let u = model.add_field_spec(
        FieldSpec::new("u", vec![WAVE1D_EXTENT], vec![0.01]).with_precision(config.precision),
    )?;

    let u_xx = model.derivative(&u.current(), 0, 2, config.accuracy_order)?;
    model.add_time_update(&u, TimeScheme::Leapfrog, Expr::param("c2") * u_xx)?;

    for side in [Side::Lower, Side::Upper] {
        model.add_boundary(&u, Region::face(0, side, 1), Expr::float(0.0))?;
    }
    Ok(model)
}

/// `u_tt = vel^2 * lap(u)` over a heterogeneous velocity medium.
pub fn wave2d_model(cache: Rc<StencilCache>, config: &PipelineConfig) -> GenResult<EquationModel> {
    let extents = vec![WAVE2D_EXTENT; 2];
    let spacing = vec![0.01; 2];

    let mut model = EquationModel::new(cache);
    let u = model.add_field_spec(
        FieldSpec::new("u", extents.clone(), spacing.clone()).with_precision(config.precision),
    )?;
    let vel = model.add_field_spec(
        FieldSpec::new("vel", extents, spacing)
            .with_precision(config.precision)
            .read_only(),
    )?;

    let lap = model.laplacian(&u.current(), config.accuracy_order)?;
    let rate = vel.current() * vel.current() * lap;
    model.add_time_update(&u, TimeScheme::Leapfrog, rate)?;

    for axis in 0..2 {
        for side in [Side::Lower, Side::Upper] {
            model.add_boundary(&u, Region::face(axis, side, 2), Expr::float(0.0))?;
        }
    }
    Ok(model)
}
