#![allow(dead_code)]

use event_delivery::resilience::RetryConfig;
use proptest::prelude::*;
use std::time::Duration;

/// Strategy for generating dotted topic names
pub fn topic_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,15}(\\.[a-z][a-z0-9_]{0,15}){0,3}"
}

/// Strategy for generating correlation ids, including hostile characters
pub fn correlation_id_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_./: -]{1,64}"
}

/// Strategy for generating valid retry configurations
pub fn retry_config_strategy() -> impl Strategy<Value = RetryConfig> {
    (1u32..10, 1u64..500, 1u64..20, 0.0f64..=1.0).prop_map(
        |(max_attempts, base_ms, max_factor, jitter_factor)| RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(base_ms * max_factor),
            jitter_factor,
        },
    )
}

/// Strategy for generating small JSON payloads
pub fn payload_strategy() -> impl Strategy<Value = serde_json::Value> {
    prop_oneof![
        Just(serde_json::json!({})),
        Just(serde_json::json!({"order_id": 42})),
        Just(serde_json::json!({"user": {"id": 7, "email": "a@example.com"}})),
        Just(serde_json::json!([1, 2, 3])),
        Just(serde_json::json!("plain string")),
        Just(serde_json::Value::Null),
    ]
}
