use super::*;

fn decay_constant(target: f32, max_time_secs: f32) -> f32 {
    -(1.0 - target).ln() / max_time_secs
}

#[test]
fn test_value_starts_at_initial() {
    let decay = decay_constant(0.9, 240.0);
    let v = decayed_value(0.7, 0.9, decay, 0.0);
    assert!((v - 0.7).abs() < f32::EPSILON);
}

#[test]
fn test_value_after_one_tick_is_strictly_between_initial_and_target() {
    // Prewarm defaults: target 0.9, max time 240s, first tick at 100ms
    let decay = decay_constant(0.9, 240.0);
    let v = decayed_value(0.7, 0.9, decay, 0.1);
    assert!(v > 0.7);
    assert!(v < 0.9);
}

#[test]
fn test_value_reaches_target_at_max_time() {
    let decay = decay_constant(0.9, 240.0);
    let v = decayed_value(0.0, 0.9, decay, 240.0);
    assert!((v - 0.9).abs() < 1e-4);
}

#[test]
fn test_value_never_exceeds_target() {
    let decay = decay_constant(0.9, 240.0);
    for elapsed in [0.0, 1.0, 100.0, 240.0, 1000.0, 1_000_000.0] {
        assert!(decayed_value(0.7, 0.9, decay, elapsed) <= 0.9);
    }
}

#[test]
fn test_value_is_monotonic() {
    let decay = decay_constant(0.9, 240.0);
    let mut last = 0.0;
    for step in 1..1000 {
        let v = decayed_value(0.0, 0.9, decay, step as f32 * 0.5);
        assert!(v >= last);
        last = v;
    }
}

#[tokio::test]
async fn test_simulate_emits_increasing_values_capped_at_target() {
    let mut values = Vec::new();
    simulate(
        0.5,
        0.9,
        Duration::from_millis(300),
        CancellationToken::new(),
        |v| values.push(v),
    )
    .await;

    assert!(!values.is_empty());
    for pair in values.windows(2) {
        assert!(pair[1] > pair[0], "values must be strictly increasing");
    }
    assert!(values.iter().all(|v| *v <= 0.9));
    assert!((values.last().unwrap() - 0.9).abs() < 1e-4);
}

#[tokio::test]
async fn test_simulate_stops_on_cancel() {
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut values = Vec::new();
    simulate(
        0.0,
        0.9,
        Duration::from_secs(240),
        cancel,
        |v| values.push(v),
    )
    .await;

    assert!(values.is_empty());
}

#[tokio::test]
async fn test_simulate_no_op_when_already_at_target() {
    let mut values = Vec::new();
    simulate(
        0.9,
        0.9,
        Duration::from_secs(1),
        CancellationToken::new(),
        |v| values.push(v),
    )
    .await;

    assert!(values.is_empty());
}
