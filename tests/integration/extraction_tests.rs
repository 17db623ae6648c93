//! Integration tests for content and structured-data extraction during a crawl

use crate::support::{html_page, mount_page, test_config, user_agent};
use chrono::Utc;
use kumo_crawl::executor::Method;
use kumo_crawl::extract::filter_by_quality;
use kumo_crawl::{CrawlerBuilder, StructuredDataItem};
use std::collections::BTreeMap;
use wiremock::MockServer;

const PRODUCT_PAGE: &str = r#"<html><head>
<title>Trail Shoe | Outdoor Shop</title>
<meta name="description" content="Lightweight trail running shoe">
<script type="application/ld+json">
{"@context": "https://schema.org", "@type": "Product", "name": "Trail Shoe",
 "description": "Lightweight trail running shoe", "image": "https://cdn.example/shoe.jpg",
 "sku": "TS-100",
 "offers": {"@type": "Offer", "price": "89.90", "priceCurrency": "EUR",
            "availability": "https://schema.org/InStock"}}
</script>
</head><body>
<main><h1>Trail Shoe</h1><p>Grip on wet rock and a cushioned ride for long days in the hills.</p></main>
</body></html>"#;

#[tokio::test]
async fn test_structured_items_respect_quality_threshold() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_page(&server, "/", html_page("Shop", &[format!("{}/shoe", base)]), None).await;
    mount_page(&server, "/shoe", PRODUCT_PAGE.to_string(), None).await;

    let crawler = CrawlerBuilder::new(user_agent()).build().unwrap();
    let mut config = test_config(10, 2, 1);
    config.extraction.enable_structured_data = true;
    config.extraction.data_types = vec!["product".to_string(), "generic".to_string()];
    config.extraction.quality_threshold = 0.8;

    let id = crawler.start_crawl(&base, config).await.unwrap();
    let session = crawler.wait(id).await.unwrap();
    assert_eq!(session.stats.processed_urls, 2);

    let items = crawler.structured_data(id, None, None).await.unwrap();
    assert!(!items.is_empty());
    assert!(items.iter().all(|item| item.quality_score >= 0.8));
    // Counted before the filter
    assert!(session.stats.extracted_items >= items.len() as u64);

    let products = crawler.structured_data(id, Some("product"), None).await.unwrap();
    assert_eq!(products.len(), 1);
    let product = &products[0];
    assert!(product.url.ends_with("/shoe"));
    assert_eq!(product.fields["name"], "Trail Shoe");
    assert_eq!(product.fields["price"], "89.90");
    assert_eq!(product.extraction_method, Method::Static);

    let content = crawler.content(id, 1, 10).await.unwrap();
    let shoe = content
        .items
        .iter()
        .find(|c| c.url.ends_with("/shoe"))
        .expect("product page stored");
    assert_eq!(shoe.title.as_deref(), Some("Trail Shoe | Outdoor Shop"));
    assert_eq!(shoe.json_ld.len(), 1);
}

fn item(schema: &str, quality: f64) -> StructuredDataItem {
    StructuredDataItem {
        url: "https://example.com/".to_string(),
        schema: schema.to_string(),
        fields: BTreeMap::new(),
        quality_score: quality,
        extraction_method: Method::Static,
        extracted_at: Utc::now(),
    }
}

#[test]
fn test_quality_filter_is_idempotent() {
    let items = vec![
        item("product", 0.95),
        item("article", 0.49),
        item("generic", 0.5),
        item("contact", 0.2),
    ];

    for threshold in [0.0, 0.3, 0.5, 0.9, 1.0] {
        let once = filter_by_quality(items.clone(), threshold);
        let twice = filter_by_quality(once.clone(), threshold);
        assert_eq!(once, twice);
        assert!(once.iter().all(|i| i.quality_score >= threshold));
    }
    assert_eq!(filter_by_quality(items, 0.5).len(), 2);
}
