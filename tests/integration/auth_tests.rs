//! Integration tests for authenticated crawls

use crate::support::{html_page, mount_page, test_config, user_agent, LoginPageBrowser};
use kumo_crawl::config::{AuthConfig, AuthType};
use kumo_crawl::{CrawlerBuilder, SessionStatus};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn form_auth(login_url: &str) -> AuthConfig {
    AuthConfig {
        auth_type: AuthType::Form,
        username: Some("ada".to_string()),
        password: Some("secret".to_string()),
        login_url: Some(login_url.to_string()),
        ..AuthConfig::default()
    }
}

#[tokio::test]
async fn test_missing_username_field_fails_authenticated_fetches() {
    let server = MockServer::start().await;
    mount_page(&server, "/", html_page("Members", &[]), Some(0)).await;

    // The login page has a password box but nothing that looks like a username field
    let browser = Arc::new(LoginPageBrowser::with_visible(&["input[type='password']"]));
    let crawler = CrawlerBuilder::new(user_agent())
        .browser_driver(browser.clone())
        .auth_timings(Duration::ZERO, Duration::from_millis(10))
        .build()
        .unwrap();

    let mut config = test_config(10, 2, 1);
    config.authentication = form_auth(&format!("{}/login", server.uri()));
    let id = crawler.start_crawl(&server.uri(), config).await.unwrap();
    let session = crawler.wait(id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.stats.failed_urls, 1);
    let failure = &session.failures[0];
    assert_eq!(failure.kind, "authentication");
    assert!(failure.reason.contains("Username field not found"), "{}", failure.reason);

    // The login context was closed on the error path
    assert_eq!(browser.opened.load(Ordering::SeqCst), 1);
    assert_eq!(browser.closed.load(Ordering::SeqCst), 1);
    server.verify().await;
}

#[tokio::test]
async fn test_bearer_token_is_sent_with_every_page() {
    let server = MockServer::start().await;
    let base = server.uri();

    for (route, links) in [("/", vec![format!("{}/inside", base)]), ("/inside", vec![])] {
        Mock::given(method("GET"))
            .and(path(route))
            .and(header("authorization", "Bearer letmein"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(html_page(route, &links), "text/html"))
            .expect(1)
            .mount(&server)
            .await;
    }

    let crawler = CrawlerBuilder::new(user_agent()).build().unwrap();
    let mut config = test_config(10, 2, 1);
    config.authentication = AuthConfig {
        auth_type: AuthType::Bearer,
        token: Some("letmein".to_string()),
        ..AuthConfig::default()
    };
    let id = crawler.start_crawl(&base, config).await.unwrap();
    let session = crawler.wait(id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.stats.processed_urls, 2);
    server.verify().await;
}

#[tokio::test]
async fn test_authentication_dry_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/account"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let browser = Arc::new(LoginPageBrowser::with_visible(&[
        "input[name='username']",
        "input[type='password']",
        "button[type='submit']",
    ]));
    let crawler = CrawlerBuilder::new(user_agent())
        .browser_driver(browser.clone())
        .auth_timings(Duration::ZERO, Duration::from_millis(10))
        .build()
        .unwrap();

    let auth = form_auth(&format!("{}/login", server.uri()));
    let report = crawler
        .test_authentication(&auth, &format!("{}/account", server.uri()))
        .await
        .unwrap();

    assert!(report.success, "{:?}", report.error);
    assert_eq!(report.target_status, Some(200));
    assert_eq!(browser.closed.load(Ordering::SeqCst), 1);
    assert!(crawler.session_ids().is_empty());
}

#[tokio::test]
async fn test_changed_token_is_used_by_the_next_crawl() {
    let server = MockServer::start().await;
    for token in ["first", "second"] {
        Mock::given(method("GET"))
            .and(path("/"))
            .and(header("authorization", format!("Bearer {}", token).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_raw(html_page(token, &[]), "text/html"))
            .expect(1)
            .mount(&server)
            .await;
    }

    let crawler = CrawlerBuilder::new(user_agent()).build().unwrap();
    for token in ["first", "second"] {
        let mut config = test_config(5, 1, 1);
        config.authentication = AuthConfig {
            auth_type: AuthType::Bearer,
            token: Some(token.to_string()),
            ..AuthConfig::default()
        };
        let id = crawler.start_crawl(&server.uri(), config).await.unwrap();
        let session = crawler.wait(id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Completed, "{:?}", session.failures);
        assert_eq!(session.stats.processed_urls, 1);
    }
    server.verify().await;
}

#[tokio::test]
async fn test_expired_login_is_replaced_before_the_next_crawl() {
    let server = MockServer::start().await;
    mount_page(&server, "/", html_page("Members", &[]), Some(1)).await;

    let crawler = CrawlerBuilder::new(user_agent()).build().unwrap();
    let mut config = test_config(5, 1, 1);
    config.authentication = AuthConfig {
        auth_type: AuthType::Bearer,
        token: Some("letmein".to_string()),
        ..AuthConfig::default()
    };
    let first = crawler.start_crawl(&server.uri(), config.clone()).await.unwrap();
    assert_eq!(crawler.wait(first).await.unwrap().status, SessionStatus::Completed);
    server.verify().await;

    // The site now rejects the stored login once, then accepts a fresh one
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    // The crawl fetch plus the final check below
    mount_page(&server, "/", html_page("Members", &[]), Some(2)).await;

    let second = crawler.start_crawl(&server.uri(), config).await.unwrap();
    let session = crawler.wait(second).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed, "{:?}", session.failures);
    assert_eq!(session.stats.processed_urls, 1);
    assert!(crawler.validate_auth(&server.uri()).await.unwrap());
    server.verify().await;
}
