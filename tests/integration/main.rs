//! Integration tests for Kumo-Crawl

mod auth_tests;
mod crawl_tests;
mod extraction_tests;
mod learning_tests;
mod support;
