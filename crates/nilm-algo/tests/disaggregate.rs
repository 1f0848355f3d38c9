//! End-to-end training + inference scenarios on synthetic appliances.

use nilm_algo::{disaggregate, ApplianceModelTrainer, DisaggregationSolver};
use nilm_core::{ApplianceModels, DisaggConfig};

/// Square wave: `period_half` samples at 0 W then `period_half` samples at
/// `high` W, repeating.
fn square_wave(len: usize, period_half: usize, high: f64) -> Vec<f64> {
    (0..len)
        .map(|t| {
            if (t / period_half) % 2 == 0 {
                0.0
            } else {
                high
            }
        })
        .collect()
}

fn config_for_window(window_length: usize) -> DisaggConfig {
    DisaggConfig {
        num_states: 2,
        window_length,
        ..Default::default()
    }
}

/// Two trained square-wave appliances plus their aggregate over one window.
fn two_appliance_setup(window_length: usize) -> (ApplianceModels, DisaggConfig, Vec<f64>) {
    let config = config_for_window(window_length);
    let trainer = ApplianceModelTrainer::new(config.clone());

    let trace_a = square_wave(200, 2, 100.0);
    let trace_b = square_wave(200, 2, 50.0);
    let models = trainer
        .train_collection(&[("washer", &trace_a), ("heater", &trace_b)])
        .unwrap();

    let mains: Vec<f64> = square_wave(window_length, 2, 100.0)
        .iter()
        .zip(square_wave(window_length, 2, 50.0))
        .map(|(a, b)| a + b)
        .collect();

    (models, config, mains)
}

#[test]
fn recovers_two_square_wave_appliances() {
    let (models, config, mains) = two_appliance_setup(40);
    let solver = DisaggregationSolver::new(&models, &config);
    let solution = solver.solve_window(&mains).unwrap();

    assert_eq!(solution.rounds_solved, 3);
    assert_eq!(solution.fallback_rounds, 0);

    let truth_a = square_wave(40, 2, 100.0);
    let truth_b = square_wave(40, 2, 50.0);
    let pred_a = solution.prediction("washer").unwrap();
    let pred_b = solution.prediction("heater").unwrap();

    for t in 0..40 {
        assert!(
            (pred_a[t] - truth_a[t]).abs() < 10.0,
            "washer t={t}: predicted {} vs true {}",
            pred_a[t],
            truth_a[t]
        );
        assert!(
            (pred_b[t] - truth_b[t]).abs() < 10.0,
            "heater t={t}: predicted {} vs true {}",
            pred_b[t],
            truth_b[t]
        );
    }
}

#[test]
fn outputs_are_nonnegative_and_finite() {
    let (models, config, mains) = two_appliance_setup(40);
    let solution = DisaggregationSolver::new(&models, &config)
        .solve_window(&mains)
        .unwrap();

    for trace in &solution.predictions {
        assert_eq!(trace.len(), mains.len());
        for &p in trace {
            assert!(p.is_finite());
            assert!(p >= 0.0);
        }
    }
}

#[test]
fn residual_does_not_grow_across_rounds() {
    let (models, config, mains) = two_appliance_setup(40);
    let solution = DisaggregationSolver::new(&models, &config)
        .solve_window(&mains)
        .unwrap();

    assert_eq!(solution.residual_norms.len(), config.rounds);
    let first = solution.residual_norms[0];
    let last = *solution.residual_norms.last().unwrap();
    assert!(
        last <= first * 1.05 + 1e-6,
        "residual grew across rounds: first {first}, last {last}"
    );
}

#[test]
fn solving_twice_is_deterministic_within_tolerance() {
    let (models, config, mains) = two_appliance_setup(40);
    let solver = DisaggregationSolver::new(&models, &config);

    let a = solver.solve_window(&mains).unwrap();
    let b = solver.solve_window(&mains).unwrap();

    for (ta, tb) in a.predictions.iter().zip(b.predictions.iter()) {
        for (x, y) in ta.iter().zip(tb.iter()) {
            assert!((x - y).abs() < 1e-6, "non-deterministic: {x} vs {y}");
        }
    }
}

#[test]
fn energy_budgets_are_respected() {
    let (models, config, mains) = two_appliance_setup(40);
    let solution = DisaggregationSolver::new(&models, &config)
        .solve_window(&mains)
        .unwrap();

    for model in models.iter() {
        let total: f64 = solution.prediction(&model.name).unwrap().iter().sum();
        assert!(
            total <= model.energy_budget * (1.0 + 1e-4) + 1.0,
            "appliance '{}': predicted energy {total} exceeds budget {}",
            model.name,
            model.energy_budget
        );
    }
}

#[test]
fn tight_budget_still_yields_feasible_solution() {
    let config = config_for_window(40);
    let trainer = ApplianceModelTrainer::new(config.clone());
    let trace = square_wave(200, 2, 100.0);
    let mut model = trainer.train("washer", &trace).unwrap();

    // Budget far below the appliance's true consumption over the window
    model.energy_budget = 500.0;
    let mut models = ApplianceModels::new();
    models.push(model).unwrap();

    let mains = square_wave(40, 2, 100.0);
    let solution = DisaggregationSolver::new(&models, &config)
        .solve_window(&mains)
        .unwrap();

    let total: f64 = solution.prediction("washer").unwrap().iter().sum();
    assert!(
        total <= 500.0 * (1.0 + 1e-4) + 1.0,
        "predicted energy {total} exceeds the tightened budget"
    );
    for &p in solution.prediction("washer").unwrap() {
        assert!(p.is_finite() && p >= 0.0);
    }
}

#[test]
fn single_sample_window_solves() {
    let config = config_for_window(1);
    let trainer = ApplianceModelTrainer::new(config.clone());
    let trace = square_wave(200, 2, 100.0);
    let models = trainer.train_collection(&[("washer", &trace)]).unwrap();

    let solution = DisaggregationSolver::new(&models, &config)
        .solve_window(&[100.0])
        .unwrap();

    assert_eq!(solution.window_len(), 1);
    let p = solution.prediction("washer").unwrap()[0];
    assert!(p.is_finite() && p >= 0.0);
}

#[test]
fn empty_window_is_rejected() {
    let (models, config, _) = two_appliance_setup(40);
    let err = DisaggregationSolver::new(&models, &config)
        .solve_window(&[])
        .unwrap_err();
    assert!(err.to_string().contains("empty"));
}

#[test]
fn state_count_mismatch_is_rejected() {
    let (models, _, mains) = two_appliance_setup(40);
    let config = DisaggConfig {
        num_states: 3,
        window_length: 40,
        ..Default::default()
    };
    let err = DisaggregationSolver::new(&models, &config)
        .solve_window(&mains)
        .unwrap_err();
    assert!(err.to_string().contains("states"));
}

#[test]
fn long_trace_is_chunked_in_order() {
    let (models, config, _) = two_appliance_setup(40);

    // 100 samples with window 40 -> chunks of 40, 40, 20
    let mains: Vec<f64> = square_wave(100, 2, 100.0)
        .iter()
        .zip(square_wave(100, 2, 50.0))
        .map(|(a, b)| a + b)
        .collect();

    let solutions = disaggregate(&models, &mains, &config).unwrap();
    assert_eq!(solutions.len(), 3);
    assert_eq!(solutions[0].window_len(), 40);
    assert_eq!(solutions[1].window_len(), 40);
    assert_eq!(solutions[2].window_len(), 20);
    for solution in &solutions {
        assert_eq!(solution.appliances, vec!["washer", "heater"]);
    }
}

#[test]
fn solution_roundtrips_through_json() {
    let (models, config, mains) = two_appliance_setup(40);
    let solution = DisaggregationSolver::new(&models, &config)
        .solve_window(&mains)
        .unwrap();

    let json = serde_json::to_string(&solution).unwrap();
    let back: nilm_algo::DisaggregationSolution = serde_json::from_str(&json).unwrap();
    assert_eq!(back.appliances, solution.appliances);
    assert_eq!(back.window_len(), solution.window_len());
}
