mod common;

use fdgen::report::BuildReport;
use fdgen::solver::ir::FieldSnapshot;
use fdgen::solver::model::{coordinate, time, EquationModel, Expr, Region, Side, TimeLevel};
use fdgen::solver::{GenResult, Pipeline, PipelineConfig};

fn diffusion_1d(pipeline: &Pipeline) -> GenResult<EquationModel> {
    let mut model = EquationModel::new(pipeline.stencil_cache());
    let u = model.add_field("u", 1, &[10], &[1.0])?;
    let u_xx = model.derivative(&u.current(), 0, 2, 2)?;
    model.add_equation(&u, u.current() + u_xx)?;
    Ok(model)
}

#[test]
fn one_step_of_second_difference_update() {
    let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
    let model = diffusion_1d(&pipeline).unwrap();
    let artifact = pipeline.run(&model).unwrap();

    let start = vec![0.0, 0.0, 0.0, 0.0, 0.0, 5.0, 0.0, 0.0, 0.0, 0.0];
    let snapshot = FieldSnapshot::new("u", vec![10], start.clone());
    snapshot.validate(&artifact.manifest).unwrap();

    let state = common::run_nest(&artifact.nest, &[], vec![snapshot]);
    let u = &state["u"];
    assert_eq!(
        u.data,
        vec![0.0, 0.0, 0.0, 0.0, 5.0, -5.0, 5.0, 0.0, 0.0, 0.0]
    );
    assert_eq!(u.data[0], start[0]);
    assert_eq!(u.data[9], start[9]);

    let entry = artifact.manifest.field("u").unwrap();
    assert_eq!(entry.time_levels, 2);
    assert_eq!(entry.final_slot, 1);
}

#[test]
fn emitted_source_matches_the_update() {
    let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
    let artifact = pipeline.run(&diffusion_1d(&pipeline).unwrap()).unwrap();
    let text = artifact.source.to_c();

    assert!(text.contains("void fd_kernel(double *restrict u)"));
    assert!(text.contains("#define AT_u(s, i0) u[(size_t)(s) * 10 + (size_t)(i0)]"));
    assert!(text.contains("for (long i0 = 1; i0 < 9; i0++) {"));
    assert!(text.contains(
        "AT_u(s_u_next, i0) = AT_u(s_u_cur, i0) + AT_u(s_u_cur, i0 - 1) + -2.0 * AT_u(s_u_cur, i0) + AT_u(s_u_cur, i0 + 1);"
    ));
    assert!(text.contains("#pragma omp parallel for\n"));
}

#[test]
fn several_steps_rotate_buffers() {
    let config = PipelineConfig {
        time_steps: 3,
        ..PipelineConfig::default()
    };
    let pipeline = Pipeline::new(config).unwrap();
    let artifact = pipeline.run(&diffusion_1d(&pipeline).unwrap()).unwrap();
    assert_eq!(artifact.manifest.field("u").unwrap().final_slot, 1);

    let snapshot = common::impulse("u", vec![10], &[(vec![5], 1.0)]);
    let state = common::run_nest(&artifact.nest, &[], vec![snapshot]);
    // (1 + D2)^3 = [1, -1, 1]^3 convolved with a unit impulse.
    assert_eq!(
        state["u"].data,
        vec![0.0, 0.0, 1.0, -3.0, 6.0, -7.0, 6.0, -3.0, 1.0, 0.0]
    );
}

/// `u_t = u_xx` with ghosts extrapolated quadratically, so `x^2 + 2t` is reproduced exactly.
fn heat_with_quadratic_solution(pipeline: &Pipeline) -> GenResult<EquationModel> {
    let mut model = EquationModel::new(pipeline.stencil_cache());
    let u = model.add_field("u", 1, &[10], &[0.5])?;
    let u_xx = model.derivative(&u.current(), 0, 2, 2)?;
    model.add_equation(&u, u.current() + Expr::param("dt") * u_xx)?;
    for (side, sign) in [(Side::Lower, 1), (Side::Upper, -1)] {
        let at = |k: i64| u.at_offset(TimeLevel::Next, &[sign * k]);
        let extrapolated = 3.0 * at(1) - 3.0 * at(2) + at(3);
        model.add_boundary(&u, Region::face(0, side, 1), extrapolated)?;
    }
    model.set_analytic_solution(&u, coordinate(0) * coordinate(0) + 2.0 * time())?;
    Ok(model)
}

#[test]
fn quadratic_heat_solution_is_reproduced() {
    let config = PipelineConfig {
        time_steps: 3,
        ..PipelineConfig::default()
    };
    let pipeline = Pipeline::new(config).unwrap();
    let model = heat_with_quadratic_solution(&pipeline).unwrap();
    let u = model.field("u").unwrap().clone();
    let start = model
        .analytic_solution(&u)
        .unwrap()
        .snapshot(0.0, &[])
        .unwrap();
    assert_eq!(start.data[3], 2.25);

    let artifact = pipeline.run(&model).unwrap();
    let state = common::run_nest(&artifact.nest, &[("dt", 0.25)], vec![start]);
    let finalized = model.finalize().unwrap();

    let error = finalized
        .solution_error(&state["u"], 0.75, &[])
        .unwrap()
        .unwrap();
    assert_eq!(error.points, 8);
    assert!(error.max_abs < 1e-12, "{error:?}");

    let stale = finalized
        .solution_error(&state["u"], 0.5, &[])
        .unwrap()
        .unwrap();
    approx::assert_relative_eq!(stale.max_abs, 0.5, epsilon = 1e-12);
    approx::assert_relative_eq!(stale.rms, 0.5, epsilon = 1e-12);
}

#[test]
fn analytic_solution_stays_out_of_the_kernel() {
    let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
    let model = heat_with_quadratic_solution(&pipeline).unwrap();
    let mut report = BuildReport::new("fd_kernel");
    let nest = pipeline.lower(&model, &mut report).unwrap();
    assert_eq!(nest.params, vec!["dt".to_string()]);

    let u = model.field("u").unwrap().clone();
    let mut other = diffusion_1d(&pipeline).unwrap();
    assert!(other.set_analytic_solution(&u, u.next()).is_err());
    let finalized = other.finalize().unwrap();
    let zeros = FieldSnapshot::zeros("u", vec![10]);
    assert_eq!(finalized.solution_error(&zeros, 0.0, &[]).unwrap(), None);
}
