use fdgen::solver::ir::AxisHalo;
use fdgen::solver::model::{
    model_by_id, AxisSpan, EquationModel, Expr, FieldSpec, Region, Side,
};
use fdgen::solver::stencil::{StencilCache, StencilLimits};
use fdgen::solver::{GenError, PipelineConfig};

fn model() -> EquationModel {
    EquationModel::new(StencilCache::shared(StencilLimits::default()))
}

fn diffusion(extent: usize, accuracy: u32) -> EquationModel {
    let mut model = model();
    let u = model.add_field("u", 1, &[extent], &[1.0]).unwrap();
    let u_xx = model.derivative(&u.current(), 0, 2, accuracy).unwrap();
    model.add_equation(&u, u.current() + u_xx).unwrap();
    model
}

#[test]
fn halo_is_the_widest_stencil_offset() {
    for (accuracy, width) in [(2, 1), (4, 2), (6, 3), (8, 4)] {
        let finalized = diffusion(32, accuracy).finalize().unwrap();
        assert_eq!(finalized.halos().get("u"), Some(&[AxisHalo::symmetric(width)][..]));
    }
}

#[test]
fn extent_must_exceed_twice_the_halo() {
    for (extent, accuracy) in [(2, 2), (1, 2), (4, 4), (3, 4)] {
        match diffusion(extent, accuracy).finalize() {
            Err(GenError::HaloExceedsExtent {
                field,
                axis,
                halo,
                extent: found,
            }) => {
                assert_eq!(field, "u");
                assert_eq!(axis, 0);
                assert_eq!(halo, accuracy as usize / 2);
                assert_eq!(found, extent);
            }
            other => panic!("extent {extent}, accuracy {accuracy}: {other:?}"),
        }
    }
    assert!(diffusion(3, 2).finalize().is_ok());
    assert!(diffusion(5, 4).finalize().is_ok());
}

#[test]
fn overlapping_regions_on_one_field_conflict() {
    let mut model = diffusion(10, 2);
    let u = model.field("u").unwrap().clone();
    model
        .add_boundary(&u, Region::face(0, Side::Lower, 1), Expr::float(0.0))
        .unwrap();
    model
        .add_boundary(
            &u,
            Region::new("inlet", vec![AxisSpan::Range { start: 0, end: 2 }]),
            Expr::float(1.0),
        )
        .unwrap();
    match model.finalize() {
        Err(GenError::ConflictingBoundary {
            field,
            first,
            second,
        }) => {
            assert_eq!(field, "u");
            assert_eq!(first, "x0_lower");
            assert_eq!(second, "inlet");
        }
        other => panic!("expected a conflict, got {other:?}"),
    }
}

#[test]
fn regions_on_different_fields_may_overlap() {
    let mut model = model();
    let a = model.add_field("a", 1, &[10], &[1.0]).unwrap();
    let b = model.add_field("b", 1, &[10], &[1.0]).unwrap();
    let a_xx = model.derivative(&a.current(), 0, 2, 2).unwrap();
    let b_xx = model.derivative(&b.current(), 0, 2, 2).unwrap();
    model.add_equation(&a, a.current() + a_xx).unwrap();
    model.add_equation(&b, b.current() + b_xx).unwrap();
    for field in [&a, &b] {
        model
            .add_boundary(field, Region::face(0, Side::Lower, 1), Expr::float(0.0))
            .unwrap();
    }
    assert_eq!(model.finalize().unwrap().boundaries().len(), 2);
}

#[test]
fn free_surface_layers_are_pairwise_disjoint() {
    let config = PipelineConfig {
        accuracy_order: 6,
        ..PipelineConfig::default()
    };
    for id in ["heat2d", "elastic2d"] {
        let finalized = model_by_id(id)
            .unwrap()
            .build(&config)
            .unwrap()
            .finalize()
            .unwrap();
        let boundaries = finalized.boundaries();
        for (i, first) in boundaries.iter().enumerate() {
            for second in &boundaries[i + 1..] {
                if first.field == second.field {
                    assert!(
                        !first.domain.intersects(&second.domain),
                        "{id}: {} overlaps {}",
                        first.region,
                        second.region
                    );
                }
            }
        }
        assert!(boundaries.iter().any(|b| b.region == "fs_x1_lower_3"));
    }
}

#[test]
fn region_outside_the_field_is_rejected() {
    let mut model = diffusion(10, 2);
    let u = model.field("u").unwrap().clone();
    model
        .add_boundary(
            &u,
            Region::new("beyond", vec![AxisSpan::Range { start: 8, end: 12 }]),
            Expr::float(0.0),
        )
        .unwrap();
    assert!(matches!(
        model.finalize(),
        Err(GenError::RegionOutOfBounds { axis: 0, .. })
    ));
}

#[test]
fn half_cell_read_without_staggered_target_is_misaligned() {
    let mut model = model();
    let vx = model
        .add_field_spec(FieldSpec::new("vx", vec![12], vec![1.0]).staggered_on(0))
        .unwrap();
    let p = model.add_field("p", 1, &[12], &[1.0]).unwrap();
    model.add_equation(&vx, vx.current() + p.current()).unwrap();
    model.add_equation(&p, p.current() + vx.current()).unwrap();
    assert!(matches!(
        model.finalize(),
        Err(GenError::MisalignedAccess { axis: 0, .. })
    ));
}

#[test]
fn next_level_of_a_later_equation_is_unavailable() {
    let mut model = model();
    let a = model.add_field("a", 1, &[8], &[1.0]).unwrap();
    let b = model.add_field("b", 1, &[8], &[1.0]).unwrap();
    model.add_equation(&a, b.next()).unwrap();
    model.add_equation(&b, b.current()).unwrap();
    let err = model.finalize().unwrap_err();
    assert_eq!(err.kind(), "InvalidTimeLevel");
    assert!(!err.is_recoverable());
}

#[test]
fn spacing_mismatch_is_caught_when_the_derivative_is_built() {
    let mut model = model();
    let a = model.add_field("a", 1, &[8], &[1.0]).unwrap();
    let b = model.add_field("b", 1, &[8], &[0.5]).unwrap();
    let err = model.derivative(&(a.current() + b.current()), 0, 1, 2).unwrap_err();
    assert!(matches!(err, GenError::SpacingMismatch { axis: 0, .. }));
}

#[test]
fn unsupported_orders_surface_from_the_model() {
    let mut model = model();
    let u = model.add_field("u", 1, &[8], &[1.0]).unwrap();
    for (order, accuracy) in [(0, 2), (2, 3), (5, 2)] {
        let err = model
            .derivative(&u.current(), 0, order, accuracy)
            .unwrap_err();
        assert_eq!(err.kind(), "UnsupportedOrder", "d={order} a={accuracy}");
    }
}
