//! Property tests
//!
//! Invariants of the network, filters and engine over generated input.

use lamco_motion_predictor::features::{FeatureLayout, FeaturePolicy, FeatureSet};
use lamco_motion_predictor::filter::{
    ChatterSuppressor, LatencyFilter, OneEuroFilter, ScalarFilter, SmootherKind,
};
use lamco_motion_predictor::network::Network;
use lamco_motion_predictor::{Emission, Engine, EngineConfig, NullSink, Sample};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;

fn finite_coord() -> impl Strategy<Value = f64> {
    -10_000.0..10_000.0f64
}

/// Ordinary screen coordinates mixed with values near the edge of `f64`
fn any_finite_coord() -> impl Strategy<Value = f64> {
    prop_oneof![
        3 => finite_coord(),
        1 => -8e307..8e307f64,
        1 => prop::sample::select(vec![f64::MAX, -f64::MAX, 1e308, -1e308, 0.0]),
    ]
}

proptest! {
    #[test]
    fn prop_forward_is_finite(
        seed in any::<u64>(),
        hidden in 1usize..24,
        inputs in prop::collection::vec(-1_000.0..1_000.0f64, 10),
    ) {
        let net = Network::with_seed(&[10, hidden, 2], seed).unwrap();
        let out = net.forward(&inputs).unwrap();
        prop_assert_eq!(out.len(), 2);
        prop_assert!(out.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn prop_training_steps_are_clamped(
        seed in any::<u64>(),
        inputs in prop::collection::vec(-100.0..100.0f64, 4),
        targets in prop::collection::vec(-1e6..1e6f64, 2),
    ) {
        let mut net = Network::with_seed(&[4, 5, 2], seed).unwrap();
        let before = net.export_weights();
        net.train(&inputs, &targets, 10.0).unwrap();
        for (a, b) in before.iter().zip(net.export_weights()) {
            prop_assert!((a - b).abs() <= 0.1 + 1e-12);
        }
    }

    #[test]
    fn prop_feature_size_matches_layout(
        absolute in any::<bool>(),
        time in any::<bool>(),
        history in 3usize..12,
        xs in prop::collection::vec(finite_coord(), 12),
    ) {
        let policy = FeaturePolicy {
            features: FeatureSet::from_flags(absolute, time),
            ..FeaturePolicy::default()
        };
        let layout = FeatureLayout::for_policy(&policy, history);
        let slice: Vec<Sample> = xs[..history]
            .iter()
            .enumerate()
            .map(|(i, x)| Sample::new((*x, -*x), i as f64 * 8.0))
            .collect();
        prop_assert_eq!(layout.features(&slice).unwrap().len(), layout.size());
    }

    #[test]
    fn prop_chatter_never_overshoots(
        strength in 0.1..50.0f64,
        factor in 0.0..1.0f64,
        target in (finite_coord(), finite_coord()),
    ) {
        let mut chatter = ChatterSuppressor::new(strength, factor);
        chatter.filter((0.0, 0.0));
        let distance = target.0.hypot(target.1);
        let mut previous = 0.0f64;
        for _ in 0..50 {
            let out = chatter.filter(target);
            let travelled = out.0.hypot(out.1);
            let tolerance = 1e-9 * (1.0 + distance);
            prop_assert!(travelled <= distance + tolerance);
            prop_assert!(travelled + tolerance >= previous);
            previous = travelled;
        }
    }

    #[test]
    fn prop_smoothers_idempotent_on_constant_input(
        value in finite_coord(),
        dts in prop::collection::vec(0.0..50.0f64, 1..40),
    ) {
        let mut one_euro = OneEuroFilter::new(1.0, 0.01, 1.0);
        let mut latency = LatencyFilter::new(2.0);
        let mut t = 0.0;
        for dt in dts {
            t += dt;
            prop_assert_eq!(one_euro.filter(value, t), value);
            prop_assert_eq!(latency.filter(value, t), value);
        }
    }

    #[test]
    fn prop_engine_output_always_finite(
        seed in any::<u64>(),
        points in prop::collection::vec((finite_coord(), finite_coord(), 0.1..40.0f64), 1..40),
        target_offset in 0.0..100.0f64,
    ) {
        let mut config = EngineConfig::default();
        config.network.seed = Some(seed);
        let engine = Engine::new(config, NullSink).unwrap();

        let mut t = 0.0;
        for (x, y, dt) in points {
            t += dt;
            engine.consume_sample((x, y), t).unwrap();
            let p = engine.predict(t + target_offset);
            prop_assert!(p.sample.is_finite());
        }
        prop_assert!(engine.predict_sequence(5).iter().all(|s| s.is_finite()));
    }

    #[test]
    fn prop_emissions_finite_for_any_finite_input(
        seed in any::<u64>(),
        smoother in prop::sample::select(vec![SmootherKind::Off, SmootherKind::OneEuro, SmootherKind::LatencyBudget]),
        points in prop::collection::vec((any_finite_coord(), any_finite_coord(), 0.1..40.0f64), 1..40),
    ) {
        let emitted = Arc::new(Mutex::new(Vec::<Emission>::new()));
        let log = Arc::clone(&emitted);

        let mut config = EngineConfig::default();
        config.network.seed = Some(seed);
        config.filters.smoother = smoother;
        let engine = Engine::new(config, move |e: Emission| log.lock().push(e)).unwrap();

        let mut t = 0.0;
        for (x, y, dt) in points {
            t += dt;
            prop_assert!(engine.consume_sample((x, y), t).is_ok());
            prop_assert!(engine.predict(t + 8.0).sample.is_finite());
        }

        for e in emitted.lock().iter() {
            prop_assert!(e.position.0.is_finite() && e.position.1.is_finite(), "{:?}", e);
            prop_assert!(e.timestamp.is_finite());
        }
        prop_assert!(engine.predict_sequence(5).iter().all(|s| s.is_finite()));
    }
}
