use nova::{PinningStrategy, SchedulerConfig, SchedulerError, start_sync_with};

#[test]
fn test_config_json_round_trip() {
    let config = SchedulerConfig::new(6)
        .with_stack_size(128 * 1024)
        .with_spin_count(500)
        .with_pinning(PinningStrategy::AvoidSMT);

    let json = serde_json::to_string(&config).unwrap();
    let parsed: SchedulerConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn test_partial_json_uses_defaults() {
    let parsed: SchedulerConfig =
        serde_json::from_str(r#"{ "thread_count": 3, "pinning": "Linear" }"#).unwrap();

    let defaults = SchedulerConfig::default();
    assert_eq!(parsed.thread_count, 3);
    assert_eq!(parsed.pinning, PinningStrategy::Linear);
    assert_eq!(parsed.stack_size, defaults.stack_size);
    assert_eq!(parsed.initial_pool_size, defaults.initial_pool_size);
    assert_eq!(parsed.spin_count, defaults.spin_count);
}

#[test]
fn test_pinning_strategy_names() {
    assert_eq!(
        serde_json::to_string(&PinningStrategy::None).unwrap(),
        "\"None\""
    );
    assert_eq!(
        serde_json::from_str::<PinningStrategy>("\"AvoidSMT\"").unwrap(),
        PinningStrategy::AvoidSMT
    );
    assert!(serde_json::from_str::<PinningStrategy>("\"Random\"").is_err());
}

#[test]
fn test_deserialized_config_is_validated_on_start() {
    let config: SchedulerConfig =
        serde_json::from_str(r#"{ "thread_count": 2, "stack_size": 512 }"#).unwrap();
    let result = start_sync_with(config, || ());
    assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
}

#[test]
fn test_pinned_scheduler_runs() {
    let config = SchedulerConfig::new(2).with_pinning(PinningStrategy::Linear);
    let value = start_sync_with(config, || nova::thread_count().unwrap()).unwrap();
    assert_eq!(value, 2);
}
