mod common;

use common::{abc_machine, data, harness};
use evolvd::domain::entity::EntityMetrics;
use evolvd::domain::evolution::next_level;
use evolvd::domain::machine::StateMachineDefinition;
use evolvd::error::EvolutionError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal_macros::dec;
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

#[tokio::test]
async fn test_threshold_met_transitions() {
    let h = harness().await;
    let id = h.engine.create_entity("abc", EntityMetrics::default()).await.unwrap();

    let outcome = h
        .engine
        .submit_event(id, "tick", data(json!({"x": 5})), 0)
        .await
        .unwrap();

    assert!(outcome.transitioned);
    assert_eq!(outcome.new_state.as_deref(), Some("B"));
}

#[tokio::test]
async fn test_unmet_condition_leaves_state_untouched() {
    let h = harness().await;
    let id = h.engine.create_entity("abc", EntityMetrics::default()).await.unwrap();
    h.engine
        .submit_event(id, "tick", data(json!({"x": 5})), 0)
        .await
        .unwrap();

    let outcome = h
        .engine
        .submit_event(id, "tick", data(json!({"x": 5})), 0)
        .await
        .unwrap();

    assert!(!outcome.transitioned);
    assert!(outcome.new_state.is_none());
    let entity = h.engine.get_entity(id).await.unwrap();
    assert_eq!(entity.current_state, "B");
    assert_eq!(entity.evolution_count, 1);
}

#[tokio::test]
async fn test_dangling_transition_target_is_rejected() {
    let h = harness().await;
    let def: StateMachineDefinition = serde_json::from_value(json!({
        "id": "ab",
        "name": "AB",
        "states": ["A", "B"],
        "transitions": {"A": ["D"]},
        "initial_state": "A"
    }))
    .unwrap();

    assert!(matches!(
        h.engine.register_machine(def).await,
        Err(EvolutionError::ValidationError(_))
    ));
    assert!(h.engine.get_machine("ab").is_err());
}

#[tokio::test]
async fn test_terminal_state_absorbs_events() {
    let h = harness().await;
    let id = h.engine.create_entity("abc", EntityMetrics::default()).await.unwrap();
    h.engine
        .submit_event(id, "tick", data(json!({"x": 5})), 0)
        .await
        .unwrap();
    h.engine
        .submit_event(id, "tick", data(json!({"y": true})), 0)
        .await
        .unwrap();

    let outcome = h
        .engine
        .submit_event(id, "tick", data(json!({"x": 50, "y": 1})), 5)
        .await
        .unwrap();
    assert!(!outcome.transitioned);

    let entity = h.engine.get_entity(id).await.unwrap();
    assert_eq!(entity.current_state, "C");
    assert_eq!(entity.evolution_count, 2);
    assert_eq!(
        entity.metrics.dimensions.iter().cloned().collect::<Vec<_>>(),
        vec!["spatial".to_string(), "temporal".to_string()]
    );
}

#[tokio::test]
async fn test_concurrent_submits_commit_exactly_once() {
    let h = harness().await;
    let engine = Arc::new(h.engine);
    let id = engine.create_entity("abc", EntityMetrics::default()).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..32 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine
                .submit_event(id, "tick", data(json!({"x": 5})), 0)
                .await
        }));
    }

    let mut committed = 0;
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        if outcome.transitioned {
            committed += 1;
        }
    }

    assert_eq!(committed, 1);
    let entity = engine.get_entity(id).await.unwrap();
    assert_eq!(entity.evolution_count, 1);
    assert_eq!(entity.version, 1);
    let history = engine.get_history(id, 100).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].cycle_number, 1);
}

#[tokio::test]
async fn test_two_concurrent_submits_record_cycle_one() {
    let h = harness().await;
    let engine = Arc::new(h.engine);
    let id = engine.create_entity("abc", EntityMetrics::default()).await.unwrap();

    let first = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.submit_event(id, "tick", data(json!({"x": 6})), 0).await })
    };
    let second = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.submit_event(id, "tick", data(json!({"x": 7})), 0).await })
    };
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    let history = engine.get_history(id, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].cycle_number, 1);
    assert_eq!(engine.get_entity(id).await.unwrap().evolution_count, 1);
}

#[tokio::test]
async fn test_random_event_walk_follows_declared_edges() {
    let h = harness().await;
    let machine = abc_machine();
    let mut rng = StdRng::seed_from_u64(7);

    for _ in 0..20 {
        let id = h.engine.create_entity("abc", EntityMetrics::default()).await.unwrap();
        let mut path = vec!["A".to_string()];
        let mut previous_count = 0;

        for _ in 0..10 {
            let mut event = serde_json::Map::new();
            if rng.gen_bool(0.5) {
                event.insert("x".into(), json!(rng.gen_range(0..10)));
            }
            if rng.gen_bool(0.3) {
                event.insert("y".into(), json!("seen"));
            }
            let outcome = h.engine.submit_event(id, "walk", event, 0).await.unwrap();
            let entity = h.engine.get_entity(id).await.unwrap();

            let expected = previous_count + u64::from(outcome.transitioned);
            assert_eq!(entity.evolution_count, expected);
            previous_count = entity.evolution_count;

            if outcome.transitioned {
                let from = path.last().unwrap().clone();
                assert!(machine.has_edge(&from, &entity.current_state));
                path.push(entity.current_state.clone());
            }
        }

        let history = h.engine.get_history(id, 100).await.unwrap();
        assert_eq!(history.len() as u64, previous_count);
        assert!(reachable(&machine).contains(path.last().unwrap()));
    }
}

fn reachable(machine: &StateMachineDefinition) -> HashSet<String> {
    let mut seen = HashSet::from([machine.initial_state.clone()]);
    let mut queue = VecDeque::from([machine.initial_state.clone()]);
    while let Some(state) = queue.pop_front() {
        for next in machine.candidates(&state) {
            if seen.insert(next.clone()) {
                queue.push_back(next.clone());
            }
        }
    }
    seen
}

#[tokio::test]
async fn test_same_events_reproduce_same_levels() {
    let mut trajectories = Vec::new();
    for _ in 0..2 {
        let h = harness().await;
        let id = h.engine.create_entity("abc", EntityMetrics::default()).await.unwrap();
        h.engine
            .submit_event(id, "tick", data(json!({"x": 9})), 0)
            .await
            .unwrap();
        h.engine
            .submit_event(id, "tick", data(json!({"y": 1})), 0)
            .await
            .unwrap();
        let history = h.engine.get_history(id, 10).await.unwrap();
        trajectories.push(
            history
                .iter()
                .map(|r| r.metrics_after.level)
                .collect::<Vec<_>>(),
        );
    }
    assert_eq!(trajectories[0], trajectories[1]);
    assert_eq!(trajectories[0], vec![dec!(3.06), dec!(1.5)]);

    for count in 0..12 {
        assert_eq!(
            next_level(dec!(2.5), dec!(1.1), count).unwrap(),
            next_level(dec!(2.5), dec!(1.1), count).unwrap()
        );
    }
}

#[tokio::test]
async fn test_history_records_are_unchanged_by_later_writes() {
    let h = harness().await;
    let watched = h.engine.create_entity("abc", EntityMetrics::default()).await.unwrap();
    let other = h.engine.create_entity("abc", EntityMetrics::default()).await.unwrap();
    h.engine
        .submit_event(watched, "tick", data(json!({"x": 5})), 0)
        .await
        .unwrap();
    let before = serde_json::to_vec(&h.engine.get_history(watched, 10).await.unwrap()).unwrap();

    h.engine
        .submit_event(other, "tick", data(json!({"x": 5})), 0)
        .await
        .unwrap();
    h.engine
        .submit_event(other, "tick", data(json!({"y": 5})), 0)
        .await
        .unwrap();
    let _ = h
        .engine
        .submit_event(other, "tick", data(json!({"x": "bad"})), 0)
        .await;

    let after = serde_json::to_vec(&h.engine.get_history(watched, 10).await.unwrap()).unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_history_limit_and_order() {
    let h = harness().await;
    let id = h.engine.create_entity("abc", EntityMetrics::default()).await.unwrap();
    h.engine
        .submit_event(id, "first", data(json!({"x": 5})), 0)
        .await
        .unwrap();
    h.engine
        .submit_event(id, "second", data(json!({"y": 5})), 0)
        .await
        .unwrap();

    let latest = h.engine.get_history(id, 1).await.unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].trigger_event, "second");
    assert_eq!(latest[0].from_state, "B");
    assert_eq!(latest[0].to_state.as_deref(), Some("C"));
}
