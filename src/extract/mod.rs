//! Content and structured-data extraction
//!
//! [`ContentExtractor`] turns a fetched page into [`ExtractedContent`]: title,
//! description, headings, links, classified images, typed content chunks, and
//! quality/completeness scores. [`StructuredExtractor`] then applies named
//! schemas to that content.

mod content;
mod structured;

pub use content::ContentExtractor;
pub use structured::{filter_by_quality, StructuredDataItem, StructuredExtractor, SCHEMA_NAMES};

use crate::executor::Method;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heading {
    pub level: u8,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub text: String,
    pub href: String,
    /// Same host as the page, or a subdomain of it
    pub internal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Logo,
    Product,
    Content,
    Avatar,
    Icon,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub src: String,
    pub alt: Option<String>,
    #[serde(rename = "type")]
    pub kind: ImageKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Article,
    Product,
    Listing,
    Table,
    Navigation,
    Footer,
    Sidebar,
    Unknown,
}

/// A typed block of page content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentChunk {
    #[serde(rename = "type")]
    pub kind: ChunkKind,
    /// Short CSS path of the source element
    pub selector: String,
    pub text: String,
    pub confidence: f64,
}

/// Everything extracted from one page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedContent {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub headings: Vec<Heading>,
    pub links: Vec<Link>,
    pub images: Vec<Image>,
    pub chunks: Vec<ContentChunk>,
    /// Visible text of the page, whitespace collapsed
    pub text: String,
    pub word_count: usize,
    /// 0 to 100
    pub quality_score: f64,
    /// Fraction of expected fields present, 0 to 1
    pub completeness_score: f64,
    pub method: Method,
    /// `<meta>` name/property pairs, keys lowercased
    pub metadata: BTreeMap<String, String>,
    /// Parsed JSON-LD objects (or the payload of a JSON page)
    pub json_ld: Vec<serde_json::Value>,
    pub extracted_at: DateTime<Utc>,
}

impl ExtractedContent {
    /// Links pointing into the crawled domain
    pub fn internal_links(&self) -> impl Iterator<Item = &Link> {
        self.links.iter().filter(|l| l.internal)
    }
}
