//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and test
//! the full crawl cycle end-to-end.

use crate::support::{html_page, mount_page, test_config, user_agent, SyntheticSite};
use kumo_crawl::crawler::SessionEvent;
use kumo_crawl::executor::{ExecutorSet, Method};
use kumo_crawl::{Crawler, CrawlerBuilder, KumoError, SessionStatus};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn http_crawler() -> Crawler {
    CrawlerBuilder::new(user_agent())
        .build()
        .expect("Failed to build crawler")
}

#[tokio::test]
async fn test_three_page_scenario() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_page(
        &server,
        "/",
        html_page(
            "Home",
            &[
                format!("{}/about", base),
                format!("{}/products", base),
                format!("{}/contact", base),
            ],
        ),
        None,
    )
    .await;
    for route in ["/about", "/products", "/contact"] {
        mount_page(&server, route, html_page(route, &[format!("{}/deeper", base)]), None).await;
    }

    let crawler = http_crawler();
    let id = crawler
        .start_crawl(&format!("{}/", base), test_config(3, 1, 1))
        .await
        .expect("Failed to start crawl");
    assert_eq!(crawler.status(id).await.unwrap().status, SessionStatus::Pending);
    let mut events = crawler.subscribe(id).unwrap();

    let session = crawler.wait(id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.stats.processed_urls, 3);
    assert_eq!(session.stats.processed_urls, session.stats.total_urls);
    assert_eq!(session.stats.failed_urls, 0);
    assert!(session.stats.end_time.is_some());

    let content = crawler.content(id, 1, 10).await.unwrap();
    assert_eq!(content.total, 3);
    assert!(content.items.iter().any(|c| c.title.as_deref() == Some("Home")));

    let mut transitions = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::StatusChanged { to, .. } = event {
            transitions.push(to);
        }
    }
    assert_eq!(transitions, vec![SessionStatus::Running, SessionStatus::Completed]);
}

#[tokio::test]
async fn test_no_duplicate_fetches() {
    let server = MockServer::start().await;
    let base = server.uri();

    // Every page links to every other page, in several spellings
    let links = vec![
        format!("{}/", base),
        format!("{}/a", base),
        format!("{}/a/", base),
        format!("{}/b#section", base),
        format!("{}/b?utm_source=newsletter", base),
        format!("{}/c", base),
    ];
    for route in ["/", "/a", "/b", "/c"] {
        mount_page(&server, route, html_page(route, &links), Some(1)).await;
    }

    let crawler = http_crawler();
    let id = crawler
        .start_crawl(&base, test_config(50, 3, 4))
        .await
        .unwrap();
    let session = crawler.wait(id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.stats.processed_urls, 4);
    assert_eq!(session.stats.total_urls, 4);
    server.verify().await;
}

#[tokio::test]
async fn test_depth_bound() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_page(&server, "/", html_page("root", &[format!("{}/one", base)]), Some(1)).await;
    mount_page(&server, "/one", html_page("one", &[format!("{}/two", base)]), Some(1)).await;
    mount_page(&server, "/two", html_page("two", &[format!("{}/three", base)]), Some(1)).await;
    mount_page(&server, "/three", html_page("three", &[]), Some(0)).await;

    let crawler = http_crawler();
    let id = crawler
        .start_crawl(&base, test_config(100, 2, 2))
        .await
        .unwrap();
    let session = crawler.wait(id).await.unwrap();

    assert_eq!(session.stats.processed_urls, 3);
    server.verify().await;
}

#[tokio::test]
async fn test_page_bound() {
    let server = MockServer::start().await;
    let base = server.uri();

    let links: Vec<String> = (0..10).map(|i| format!("{}/item/{}", base, i)).collect();
    mount_page(&server, "/", html_page("Catalog", &links), None).await;
    for i in 0..10 {
        mount_page(&server, &format!("/item/{}", i), html_page("Item", &[]), None).await;
    }

    let crawler = http_crawler();
    let id = crawler
        .start_crawl(&base, test_config(4, 2, 2))
        .await
        .unwrap();
    let session = crawler.wait(id).await.unwrap();

    assert_eq!(session.stats.total_urls, 4);
    assert_eq!(session.stats.processed_urls, 4);
    assert_eq!(crawler.content(id, 1, 100).await.unwrap().total, 4);
}

#[tokio::test]
async fn test_robots_disallowed_links_are_skipped() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private"))
        .mount(&server)
        .await;
    mount_page(
        &server,
        "/",
        html_page("Home", &[format!("{}/public", base), format!("{}/private", base)]),
        None,
    )
    .await;
    mount_page(&server, "/public", html_page("Public", &[]), Some(1)).await;
    mount_page(&server, "/private", html_page("Private", &[]), Some(0)).await;

    let crawler = http_crawler();
    let id = crawler.start_crawl(&base, test_config(10, 2, 1)).await.unwrap();
    let session = crawler.wait(id).await.unwrap();

    assert_eq!(session.stats.processed_urls, 2);
    assert_eq!(session.stats.skipped_urls, 1);
    assert_eq!(session.stats.failed_urls, 0);
    server.verify().await;
}

#[tokio::test]
async fn test_unreachable_start_url_fails_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let crawler = http_crawler();
    let id = crawler
        .start_crawl(&server.uri(), test_config(10, 2, 1))
        .await
        .unwrap();
    let session = crawler.wait(id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.stats.failed_urls, 1);
    assert_eq!(session.failures[0].kind, "all_methods_failed");
    assert!(session.error.is_some());
}

#[tokio::test]
async fn test_failed_pages_do_not_stop_the_crawl() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_page(
        &server,
        "/",
        html_page("Home", &[format!("{}/ok", base), format!("{}/broken", base)]),
        None,
    )
    .await;
    mount_page(&server, "/ok", html_page("Fine", &[]), None).await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let crawler = http_crawler();
    let id = crawler.start_crawl(&base, test_config(10, 2, 2)).await.unwrap();
    let session = crawler.wait(id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.stats.processed_urls, 2);
    assert_eq!(session.stats.failed_urls, 1);
    assert!(session.failures[0].url.ends_with("/broken"));
}

#[tokio::test]
async fn test_invalid_config_never_starts() {
    let crawler = http_crawler();

    let result = crawler.start_crawl("ftp://example.com", test_config(10, 2, 1)).await;
    assert!(matches!(result, Err(KumoError::InvalidConfig(_))));

    let mut config = test_config(10, 2, 1);
    config.include_patterns = vec!["(unclosed".to_string()];
    let result = crawler.start_crawl("https://example.com", config).await;
    assert!(matches!(result, Err(KumoError::InvalidConfig(_))));

    assert!(crawler.session_ids().is_empty());
}

#[tokio::test]
async fn test_include_and_exclude_patterns() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_page(
        &server,
        "/",
        html_page(
            "Home",
            &[
                format!("{}/blog/first", base),
                format!("{}/blog/drafts/secret", base),
                format!("{}/shop", base),
            ],
        ),
        None,
    )
    .await;
    mount_page(&server, "/blog/first", html_page("First", &[]), Some(1)).await;
    mount_page(&server, "/blog/drafts/secret", html_page("Draft", &[]), Some(0)).await;
    mount_page(&server, "/shop", html_page("Shop", &[]), Some(0)).await;

    let mut config = test_config(10, 2, 1);
    config.include_patterns = vec!["/blog/".to_string()];
    config.exclude_patterns = vec!["/drafts/".to_string()];

    let crawler = http_crawler();
    let id = crawler.start_crawl(&base, config).await.unwrap();
    let session = crawler.wait(id).await.unwrap();

    assert_eq!(session.stats.processed_urls, 2);
    server.verify().await;
}

fn synthetic_crawler(site: Arc<SyntheticSite>) -> Crawler {
    let mut executors = ExecutorSet::new();
    executors.insert(site);
    CrawlerBuilder::new(user_agent())
        .executors(executors)
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pause_resume_fidelity() {
    let site = Arc::new(SyntheticSite::new(Method::Static, Duration::from_millis(20)));
    let crawler = synthetic_crawler(site.clone());

    let mut config = test_config(40, 10, 3);
    config.respect_robots = false;
    let id = crawler
        .start_crawl("https://synthetic.test/p0", config)
        .await
        .unwrap();

    while crawler.get_progress(id).unwrap().processed_urls < 5 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    crawler.pause(id).await.unwrap();

    // In-flight pages finish, then nothing moves while paused
    tokio::time::sleep(Duration::from_millis(150)).await;
    let paused = crawler.get_progress(id).unwrap();
    assert_eq!(paused.status, SessionStatus::Paused);
    tokio::time::sleep(Duration::from_millis(150)).await;
    let still_paused = crawler.get_progress(id).unwrap();
    assert_eq!(paused.processed_urls, still_paused.processed_urls);
    assert_eq!(paused.total_urls, still_paused.total_urls);
    assert_eq!(paused.pending_urls, still_paused.pending_urls);
    assert!(paused.processed_urls < 40);

    crawler.resume(id).await.unwrap();
    let session = crawler.wait(id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.stats.total_urls, 40);
    assert_eq!(session.stats.processed_urls, 40);
    let fetches = site.fetches();
    assert_eq!(fetches.len(), 40);
    assert!(fetches.values().all(|&n| n == 1), "a URL was fetched twice");
}

#[tokio::test]
async fn test_pause_before_first_page_holds_until_resume() {
    let site = Arc::new(SyntheticSite::new(Method::Static, Duration::ZERO));
    let crawler = synthetic_crawler(site.clone());

    let mut config = test_config(20, 10, 2);
    config.respect_robots = false;
    let id = crawler
        .start_crawl("https://synthetic.test/p0", config)
        .await
        .unwrap();
    // The driver task has not been polled yet on this runtime
    crawler.pause(id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    let paused = crawler.get_progress(id).unwrap();
    assert_eq!(paused.status, SessionStatus::Paused);
    assert_eq!(paused.processed_urls, 0);
    assert!(site.fetches().is_empty());

    crawler.resume(id).await.unwrap();
    let session = crawler.wait(id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.stats.processed_urls, 20);
    assert!(session.stats.start_time.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_lets_in_flight_pages_finish() {
    let site = Arc::new(SyntheticSite::new(Method::Static, Duration::from_millis(30)));
    let crawler = synthetic_crawler(site.clone());

    let mut config = test_config(500, 20, 2);
    config.respect_robots = false;
    let id = crawler
        .start_crawl("https://synthetic.test/p0", config)
        .await
        .unwrap();

    while crawler.get_progress(id).unwrap().processed_urls < 3 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    crawler.stop(id).unwrap();
    let session = crawler.wait(id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert!(session.stats.processed_urls < 500);
    let fetched: usize = site.fetches().values().sum();
    assert_eq!(fetched as u64, session.stats.processed_urls);
}

#[tokio::test]
async fn test_delete_session_removes_data() {
    let site = Arc::new(SyntheticSite::new(Method::Static, Duration::ZERO));
    let crawler = synthetic_crawler(site);

    let mut config = test_config(5, 3, 1);
    config.respect_robots = false;
    let id = crawler
        .start_crawl("https://synthetic.test/p0", config)
        .await
        .unwrap();
    crawler.wait(id).await.unwrap();
    assert_eq!(crawler.content(id, 1, 10).await.unwrap().total, 5);

    crawler.delete_session(id).await.unwrap();
    assert!(matches!(crawler.status(id).await, Err(KumoError::SessionNotFound(_))));
    assert!(crawler.content(id, 1, 10).await.is_err());
    assert!(matches!(
        crawler.delete_session(id).await,
        Err(KumoError::SessionNotFound(_))
    ));
}
