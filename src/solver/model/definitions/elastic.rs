use std::rc::Rc;

use crate::solver::config::PipelineConfig;
use crate::solver::error::GenResult;
use crate::solver::model::{
    EquationModel, Expr, FieldSpec, FreeSurface, GridField, Parity, Region, Side,
};
use crate::solver::scheme::TimeScheme;
use crate::solver::stencil::StencilCache;

pub const ELASTIC2D_EXTENT: usize = 80;
pub const ELASTIC2D_SPACING: f64 = 5.0;

/// Velocity-stress elastic wave propagation on a standard staggered grid.
///
/// Grid positions (axis 0 = x, axis 1 = z, z pointing down from the surface):
///
/// | field         | x     | z     |
/// |---------------|-------|-------|
/// | `txx`, `tzz`  | i     | j     |
/// | `vx`          | i+1/2 | j     |
/// | `vz`          | i     | j+1/2 |
/// | `txz`         | i+1/2 | j+1/2 |
///
/// Media are supplied already averaged onto the grid of the quantity they scale: buoyancy `bx`
/// and `bz` on the velocity grids, `lam` and `mu` on the normal-stress grid, `mu_xz` on the
/// shear-stress grid. Velocities are updated first so the stresses see `Next` velocities.
/// The top face (`z` lower) is a free surface: `tzz` and `txz` are imaged by odd mirroring, with
/// `tzz` held at zero on the surface row, and the velocity ghosts above it are zero. The side
/// faces clamp the velocities to zero.
pub fn elastic2d_model(
    cache: Rc<StencilCache>,
    config: &PipelineConfig,
) -> GenResult<EquationModel> {
    let a = config.accuracy_order;
    let mut model = EquationModel::new(cache);

    let spec = |name: &str, staggered: &[usize]| {
        let mut spec = FieldSpec::new(
            name,
            vec![ELASTIC2D_EXTENT; 2],
            vec![ELASTIC2D_SPACING; 2],
        )
        .with_precision(config.precision);
        for &axis in staggered {
            spec = spec.staggered_on(axis);
        }
        spec
    };

    let vx = model.add_field_spec(spec("vx", &[0]))?;
    let vz = model.add_field_spec(spec("vz", &[1]))?;
    let txx = model.add_field_spec(spec("txx", &[]))?;
    let tzz = model.add_field_spec(spec("tzz", &[]))?;
    let txz = model.add_field_spec(spec("txz", &[0, 1]))?;

    let bx = model.add_field_spec(spec("bx", &[0]).read_only())?;
    let bz = model.add_field_spec(spec("bz", &[1]).read_only())?;
    let lam = model.add_field_spec(spec("lam", &[]).read_only())?;
    let mu = model.add_field_spec(spec("mu", &[]).read_only())?;
    let mu_xz = model.add_field_spec(spec("mu_xz", &[0, 1]).read_only())?;

    let d = |field: &GridField, next: bool, axis: usize| -> GenResult<Expr> {
        let operand = if next { field.next() } else { field.current() };
        model.staggered_derivative(&operand, axis, 1, a)
    };

    let vx_rate = bx.current() * (d(&txx, false, 0)? + d(&txz, false, 1)?);
    let vz_rate = bz.current() * (d(&txz, false, 0)? + d(&tzz, false, 1)?);

    let dvx_dx = d(&vx, true, 0)?;
    let dvz_dz = d(&vz, true, 1)?;
    let p_modulus = lam.current() + 2.0 * mu.current();
    let txx_rate = &p_modulus * &dvx_dx + lam.current() * &dvz_dz;
    let tzz_rate = lam.current() * &dvx_dx + &p_modulus * &dvz_dz;
    let txz_rate = mu_xz.current() * (d(&vx, true, 1)? + d(&vz, true, 0)?);

    model.add_time_update(&vx, TimeScheme::ForwardEuler, vx_rate)?;
    model.add_time_update(&vz, TimeScheme::ForwardEuler, vz_rate)?;
    model.add_time_update(&txx, TimeScheme::ForwardEuler, txx_rate)?;
    model.add_time_update(&tzz, TimeScheme::ForwardEuler, tzz_rate)?;
    model.add_time_update(&txz, TimeScheme::ForwardEuler, txz_rate)?;

    for velocity in [&vx, &vz] {
        for side in [Side::Lower, Side::Upper] {
            model.add_boundary(velocity, Region::face(0, side, 2), Expr::float(0.0))?;
        }
        model.add_free_surface(velocity, FreeSurface::zero(1, Side::Lower))?;
    }
    for stress in [&tzz, &txz] {
        model.add_free_surface(stress, FreeSurface::mirror(1, Side::Lower, Parity::Odd))?;
    }
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::ir::AxisHalo;
    use crate::solver::model::FinalizedModel;
    use crate::solver::stencil::StencilLimits;

    fn finalized(accuracy_order: u32) -> FinalizedModel {
        let config = PipelineConfig {
            accuracy_order,
            ..PipelineConfig::default()
        };
        let cache = StencilCache::shared(StencilLimits::default());
        elastic2d_model(cache, &config).unwrap().finalize().unwrap()
    }

    #[test]
    fn staggered_reads_align_to_integer_offsets() {
        let model = finalized(2);
        let vx = &model.equations()[0];
        let txx_offsets: Vec<&[i64]> = vx
            .reads
            .iter()
            .filter(|r| r.field.name() == "txx")
            .map(|r| r.offsets.as_slice())
            .collect();
        assert_eq!(txx_offsets, vec![&[0, 0][..], &[1, 0][..]]);
        assert_eq!(
            model.halos().get("vx"),
            Some(&[AxisHalo::new(1, 1), AxisHalo::new(1, 1)][..])
        );
    }

    fn surface_regions<'m>(model: &'m FinalizedModel, field: &str) -> Vec<&'m str> {
        model
            .boundaries()
            .iter()
            .filter(|b| b.field.name() == field && b.region.starts_with("fs_"))
            .map(|b| b.region.as_str())
            .collect()
    }

    #[test]
    fn free_surface_layers_follow_halo_depth() {
        let model = finalized(4);
        for velocity in ["vx", "vz"] {
            assert_eq!(
                surface_regions(&model, velocity),
                vec!["fs_x1_lower_1", "fs_x1_lower_2"]
            );
        }
        assert_eq!(
            surface_regions(&model, "tzz"),
            vec!["fs_x1_lower_0", "fs_x1_lower_1", "fs_x1_lower_2"]
        );
        assert_eq!(
            surface_regions(&model, "txz"),
            vec!["fs_x1_lower_1", "fs_x1_lower_2"]
        );
        for field in ["bx", "bz", "lam", "mu", "mu_xz"] {
            assert_eq!(model.time_levels(field), 1);
        }
        assert_eq!(model.time_levels("txz"), 2);
    }
}
