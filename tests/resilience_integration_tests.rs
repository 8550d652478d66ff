/*!
 * Integration tests for Bulwark: config file -> breaker -> cache -> metrics
 */

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

use bulwark::cache::{CacheService, MemoryStore, GET_KEY, SET_KEY};
use bulwark::error::BulwarkError;
use bulwark::{load_config, CircuitBreaker, CircuitBreakerOverrides, CircuitState, PrometheusSink};

const CONFIG: &str = r#"
[logging]
level = "debug"

[breaker]
failure_threshold = 3
timeout_ms = 1000
reset_timeout_ms = 2000
success_threshold = 2

[breaker.keys."db:query:User"]
failure_threshold = 1

[cache]
key_prefix = "app"
default_ttl_secs = 60
"#;

fn write_config(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bulwark.toml");
    std::fs::write(&path, contents).unwrap();
    (dir, path)
}

#[tokio::test(start_paused = true)]
async fn test_configured_breaker_full_cycle() {
    let (_dir, path) = write_config(CONFIG);
    let config = load_config(&path).unwrap();

    let sink = Arc::new(PrometheusSink::new().unwrap());
    let breaker = config.breaker.build_breaker(sink.clone());
    let key = "db:query:User";
    let overrides = config.breaker.overrides_for(key);

    // failure_threshold = 1 for this key: one failure opens
    let err = breaker
        .execute_with(key, &overrides, || async { Err::<(), _>("connection reset") })
        .await
        .unwrap_err();
    assert_eq!(err.into_operation(), Some("connection reset"));
    assert_eq!(breaker.state(key), CircuitState::Open);

    let calls = AtomicUsize::new(0);
    let rejected = breaker
        .execute_with(key, &overrides, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(())
        })
        .await
        .unwrap_err();
    assert!(rejected.is_open());
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    tokio::time::advance(Duration::from_millis(2000)).await;

    // success_threshold = 2: first probe leaves the circuit half-open
    breaker
        .execute_with(key, &overrides, || async { Ok::<_, String>(()) })
        .await
        .unwrap();
    assert_eq!(breaker.state(key), CircuitState::HalfOpen);

    breaker
        .execute_with(key, &overrides, || async { Ok::<_, String>(()) })
        .await
        .unwrap();
    assert_eq!(breaker.state(key), CircuitState::Closed);

    let text = sink.metrics_text().unwrap();
    assert!(text.contains("circuit_breaker_opens_total"));
    assert!(text.contains("circuit_breaker_rejections_total"));
    assert!(text.contains(r#"to="half_open""#));
}

#[tokio::test]
async fn test_keys_are_isolated() {
    let breaker = CircuitBreaker::new_default();
    let overrides = CircuitBreakerOverrides::default().with_failure_threshold(1);

    breaker
        .execute_with("payments", &overrides, || async { Err::<(), _>("down") })
        .await
        .unwrap_err();

    let results = futures::future::join_all((0..10).map(|i| {
        let breaker = breaker.clone();
        async move {
            breaker
                .execute(&format!("inventory:{}", i), || async { Ok::<_, String>(i) })
                .await
        }
    }))
    .await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(breaker.state("payments"), CircuitState::Open);
    assert_eq!(breaker.active_keys().len(), 11);
    assert!(breaker
        .snapshot()
        .iter()
        .filter(|s| s.key != "payments")
        .all(|s| s.state == CircuitState::Closed));
}

#[tokio::test]
async fn test_cache_service_from_config() {
    let (_dir, path) = write_config(CONFIG);
    let config = load_config(&path).unwrap();
    let breaker = CircuitBreaker::new(config.breaker.defaults());
    let cache = CacheService::new(MemoryStore::new(), breaker, &config);

    cache.set("user:1", &vec!["a", "b"], None).await.unwrap();
    let hit: Option<Vec<String>> = cache.get("user:1").await;
    assert_eq!(hit, Some(vec!["a".to_string(), "b".to_string()]));

    assert_eq!(cache.store().len(), 1);
    assert_eq!(cache.breaker().state(GET_KEY), CircuitState::Closed);
    assert_eq!(cache.breaker().state(SET_KEY), CircuitState::Closed);
}

#[test]
fn test_invalid_config_file_reports_every_problem() {
    let (_dir, path) = write_config(
        r#"
        [breaker]
        success_threshold = 0

        [breaker.keys."cache:get"]
        timeout_ms = 0

        [cache]
        default_ttl_secs = 0
        "#,
    );

    let err = load_config(&path).unwrap_err();
    let message = err.to_string();
    assert!(matches!(err, BulwarkError::ConfigInvalid(ref errors) if errors.len() == 3));
    assert!(message.contains("breaker.success_threshold"));
    assert!(message.contains("breaker.keys.\"cache:get\".timeout_ms"));
    assert!(message.contains("cache.default_ttl_secs"));
}
