//! Integration tests for the adaptive strategy selector and profile store

use crate::support::{test_config, FixedOutcome};
use kumo_crawl::executor::{ExecutorSet, FetchOptions, Method};
use kumo_crawl::{AdaptiveSelector, ProfileStore};
use std::sync::Arc;
use url::Url;

fn executors(outcomes: &[Arc<FixedOutcome>]) -> ExecutorSet {
    let mut set = ExecutorSet::new();
    for outcome in outcomes {
        set.insert(outcome.clone());
    }
    set
}

#[tokio::test]
async fn test_learning_converges_on_working_method() {
    let static_http = Arc::new(FixedOutcome::new(Method::Static, false));
    let dynamic = Arc::new(FixedOutcome::new(Method::Dynamic, false));
    let stealth = Arc::new(FixedOutcome::new(Method::Stealth, true));
    let store = Arc::new(ProfileStore::new());
    let selector = AdaptiveSelector::new(
        executors(&[static_http.clone(), dynamic.clone(), stealth.clone()]),
        store.clone(),
    );

    let config = test_config(100, 3, 1);
    let options = FetchOptions::from_config(&config);
    for i in 0..50 {
        let url = Url::parse(&format!("https://guarded.example/page/{}", i)).unwrap();
        let outcome = selector
            .fetch_with_strategy(&url, &config, &options)
            .await
            .expect("stealth always works");
        assert_eq!(outcome.method, Method::Stealth);
    }

    let profile = store.get("guarded.example").await.expect("profile exists");
    assert!(profile.success_rate(Method::Stealth) > 0.9);
    assert!(profile.success_rate(Method::Static) < 0.5);

    let ranked = AdaptiveSelector::rank_methods(
        &profile,
        &config,
        &[Method::Static, Method::Dynamic, Method::Stealth],
    );
    assert_eq!(ranked[0], Method::Stealth);

    // Cheaper methods were only tried until stealth took the lead
    assert_eq!(static_http.calls(), 1);
    assert_eq!(dynamic.calls(), 1);
    assert_eq!(stealth.calls(), 50);
}

#[tokio::test]
async fn test_forced_method_has_no_fallback() {
    let static_http = Arc::new(FixedOutcome::new(Method::Static, true));
    let stealth = Arc::new(FixedOutcome::new(Method::Stealth, false));
    let selector = AdaptiveSelector::new(
        executors(&[static_http.clone(), stealth.clone()]),
        Arc::new(ProfileStore::new()),
    );

    let mut config = test_config(100, 3, 1);
    config.force_method = Some(Method::Stealth);
    let url = Url::parse("https://forced.example/").unwrap();
    let result = selector
        .fetch_with_strategy(&url, &config, &FetchOptions::from_config(&config))
        .await;

    assert!(result.is_err());
    assert_eq!(static_http.calls(), 0);
    assert_eq!(stealth.calls(), 1);
}

#[tokio::test]
async fn test_profiles_survive_export_and_import() {
    let stealth = Arc::new(FixedOutcome::new(Method::Stealth, true));
    let store = Arc::new(ProfileStore::new());
    let selector = AdaptiveSelector::new(executors(&[stealth]), store.clone());

    let config = test_config(100, 3, 1);
    let url = Url::parse("https://export.example/").unwrap();
    selector
        .fetch_with_strategy(&url, &config, &FetchOptions::from_config(&config))
        .await
        .unwrap();

    let exported = store.export_profiles().await.unwrap();
    let restored = ProfileStore::new();
    assert_eq!(restored.import_profiles(&exported).await.unwrap(), 1);

    let stats = restored.stats(Some("export.example")).await;
    assert_eq!(stats.domains, 1);
    assert_eq!(stats.total_attempts, 1);
    let rates = restored.success_rates().await;
    assert!(rates["export.example"][&Method::Stealth] > 0.9);

    assert!(restored.clear_profile("export.example"));
    assert!(restored.get("export.example").await.is_none());
}

#[tokio::test]
async fn test_profiles_persist_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("profiles.json");

    let store = ProfileStore::new();
    store
        .update("disk.example", |profile| {
            profile.record_attempt(Method::Dynamic, true, None, Default::default())
        })
        .await;
    store.save_to(&path).await.unwrap();

    let loaded = ProfileStore::new();
    assert_eq!(loaded.load_from(&path).await.unwrap(), 1);
    let profile = loaded.get("disk.example").await.unwrap();
    assert_eq!(profile.attempts(Method::Dynamic), 1);
}
