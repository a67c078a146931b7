use std::rc::Rc;

use crate::solver::config::PipelineConfig;
use crate::solver::error::GenResult;
use crate::solver::model::{EquationModel, Expr, FieldSpec, FreeSurface, Parity, Region, Side};
use crate::solver::scheme::TimeScheme;
use crate::solver::stencil::StencilCache;

pub const HEAT2D_EXTENT: usize = 64;

/// `T_t = alpha * lap(T)`: fixed temperature on the x0 faces, insulated (even mirror) x1 faces.
pub fn heat2d_model(cache: Rc<StencilCache>, config: &PipelineConfig) -> GenResult<EquationModel> {
    let mut model = EquationModel::new(cache);
    let temperature = model.add_field_spec(
        FieldSpec::new("T", vec![HEAT2D_EXTENT; 2], vec![0.5; 2]).with_precision(config.precision),
    )?;

    let lap = model.laplacian(&temperature.current(), config.accuracy_order)?;
    model.add_time_update(
        &temperature,
        TimeScheme::ForwardEuler,
        Expr::param("alpha") * lap,
    )?;

    model.add_boundary(
        &temperature,
        Region::face(0, Side::Lower, 2),
        Expr::param("t_hot"),
    )?;
    model.add_boundary(
        &temperature,
        Region::face(0, Side::Upper, 2),
        Expr::param("t_cold"),
    )?;
    for side in [Side::Lower, Side::Upper] {
        model.add_free_surface(&temperature, FreeSurface::mirror(1, side, Parity::Even))?;
    }
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::stencil::StencilLimits;

    #[test]
    fn insulated_faces_expand_per_ghost_layer() {
        let config = PipelineConfig {
            accuracy_order: 4,
            ..PipelineConfig::default()
        };
        let cache = StencilCache::shared(StencilLimits::default());
        let finalized = heat2d_model(cache, &config).unwrap().finalize().unwrap();
        let regions: Vec<&str> = finalized
            .boundaries()
            .iter()
            .map(|b| b.region.as_str())
            .collect();
        assert_eq!(
            regions,
            vec![
                "x0_lower",
                "x0_upper",
                "fs_x1_lower_1",
                "fs_x1_lower_2",
                "fs_x1_upper_1",
                "fs_x1_upper_2"
            ]
        );
        assert_eq!(finalized.time_levels("T"), 2);
        assert!(finalized.boundaries()[2].reads_next_level());
    }
}
