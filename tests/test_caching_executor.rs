//! Integration tests for memoized execution of text transforms

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use text_mesh::config::CacheConfig;
use text_mesh::text::{self, TransformOutput};
use text_mesh::{
    CacheSwitch, CachingExecutor, MemoryStore, RedisStore, SharedStore, TextOptions, TieredCache,
};

fn executor_with(shared: Option<Arc<dyn SharedStore>>, switch: CacheSwitch) -> CachingExecutor<TransformOutput> {
    CachingExecutor::from_config(
        &["clean", "tokenize", "normalize"],
        &CacheConfig::default(),
        shared,
        switch,
        2,
        None,
    )
}

#[tokio::test]
async fn test_clean_scenario_hits_l1_on_second_call() {
    let executor = executor_with(None, CacheSwitch::default());
    let options = TextOptions::new().with("remove_extra_whitespace", true);

    let first = executor
        .execute("clean", "  Hello   World  ", &options, text::clean_output)
        .await;
    let second = executor
        .execute("clean", "  Hello   World  ", &options, text::clean_output)
        .await;

    assert_eq!(first, second);
    assert_eq!(
        first,
        TransformOutput::Cleaned {
            text: "Hello World".to_string(),
            operations: vec![
                "removed_extra_whitespace".to_string(),
                "removed_urls".to_string(),
                "removed_emails".to_string(),
            ],
        }
    );

    let stats = executor.stats()["clean"];
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.l1_hits, 1);
    assert_eq!(stats.l2_hits, 0);

    // Other operations are untouched
    assert_eq!(executor.stats()["tokenize"].lookups(), 0);
}

#[tokio::test]
async fn test_compute_runs_once_for_identical_inputs() {
    let executor: CachingExecutor<String> = CachingExecutor::new(CacheSwitch::default(), 2)
        .with_cache(TieredCache::new("upper", 200, CacheSwitch::default()));
    let calls = AtomicUsize::new(0);
    let compute = |text: &str, _: &TextOptions| {
        calls.fetch_add(1, Ordering::SeqCst);
        text.to_uppercase()
    };

    let a = TextOptions::new().with("a", 1).with("b", 2);
    let b = TextOptions::new().with("b", 2).with("a", 1);
    let first = executor.execute("upper", "text", &a, compute).await;
    let second = executor.execute("upper", "text", &b, compute).await;

    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unreachable_l2_still_returns_computed_value() {
    let store = RedisStore::connect("redis://127.0.0.1:1/0", Duration::from_millis(200)).unwrap();
    let executor = executor_with(Some(Arc::new(store)), CacheSwitch::default());
    let options = TextOptions::new();

    let direct = text::tokenize_output("Hello, World!", &options);
    let cached = executor
        .execute("tokenize", "Hello, World!", &options, text::tokenize_output)
        .await;
    let again = executor
        .execute("tokenize", "Hello, World!", &options, text::tokenize_output)
        .await;

    assert_eq!(cached, direct);
    assert_eq!(again, direct);

    let stats = executor.stats()["tokenize"];
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.l1_hits, 1);
    assert!(stats.l2_errors >= 1);
}

#[tokio::test]
async fn test_shared_tier_serves_second_instance() {
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    let options = TextOptions::new().with("lowercase", true);

    let first = executor_with(Some(store.clone()), CacheSwitch::default());
    first
        .execute("normalize", "Some   TEXT", &options, text::normalize_output)
        .await;

    let calls = AtomicUsize::new(0);
    let second = executor_with(Some(store), CacheSwitch::default());
    let value = second
        .execute("normalize", "Some   TEXT", &options, |t: &str, o: &TextOptions| {
            calls.fetch_add(1, Ordering::SeqCst);
            text::normalize_output(t, o)
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        value,
        TransformOutput::Normalized {
            text: "some text".to_string(),
            operations: vec![
                "converted_to_lowercase".to_string(),
                "standardized_whitespace".to_string(),
            ],
        }
    );
    assert_eq!(second.stats()["normalize"].l2_hits, 1);
}

#[tokio::test]
async fn test_disabled_cache_bypasses_both_tiers() {
    let store = Arc::new(MemoryStore::new());
    let switch = CacheSwitch::new(false);
    let executor = executor_with(Some(store.clone()), switch);

    for _ in 0..3 {
        executor
            .execute("clean", "  a  ", &TextOptions::new(), text::clean_output)
            .await;
    }

    assert!(store.is_empty());
    assert_eq!(executor.stats()["clean"].lookups(), 0);
    assert!(executor.cache("clean").unwrap().is_empty());
}

#[tokio::test]
async fn test_offloaded_matches_inline() {
    let executor = executor_with(None, CacheSwitch::default());
    let long_text = "Word, ".repeat(2_000);
    let options = TextOptions::new();

    let offloaded = executor
        .execute_offloaded("tokenize", &long_text, &options, text::tokenize_output)
        .await
        .unwrap();
    assert_eq!(offloaded, text::tokenize_output(&long_text, &options));

    // Second call is a cache hit on the async side
    let inline = executor
        .execute("tokenize", &long_text, &options, text::tokenize_output)
        .await;
    assert_eq!(inline, offloaded);
    assert_eq!(executor.stats()["tokenize"].l1_hits, 1);
}
