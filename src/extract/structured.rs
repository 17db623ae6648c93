//! Schema-driven structured-data extraction
//!
//! Each schema lists candidate fields, and each field a prioritized list of
//! rules. The first rule that yields a value wins and contributes its
//! confidence. A schema produces an item only when its required fields (and
//! at least one of its `any_of` fields, if any) were found.

use super::ExtractedContent;
use crate::executor::Method;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Names accepted in `extraction.data-types`
pub const SCHEMA_NAMES: &[&str] = &["product", "article", "contact", "event", "job", "generic"];

const JSON_LD_CONFIDENCE: f64 = 0.95;
const META_CONFIDENCE: f64 = 0.85;
const PAGE_FIELD_CONFIDENCE: f64 = 0.7;
const PATTERN_CONFIDENCE: f64 = 0.6;

/// Weight of mean field confidence in the item score; the rest is field coverage
const CONFIDENCE_WEIGHT: f64 = 0.6;

const ARTICLE_TYPES: &[&str] = &["Article", "NewsArticle", "BlogPosting", "TechArticle", "Report"];
const CONTACT_TYPES: &[&str] = &[
    "Organization",
    "LocalBusiness",
    "Corporation",
    "Person",
    "ContactPoint",
];
const EVENT_TYPES: &[&str] = &["Event", "MusicEvent", "SportsEvent", "BusinessEvent", "EducationEvent"];

/// One structured record extracted from a page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredDataItem {
    pub url: String,
    pub schema: String,
    pub fields: BTreeMap<String, Value>,
    /// 0 to 1
    pub quality_score: f64,
    pub extraction_method: Method,
    pub extracted_at: DateTime<Utc>,
}

/// Keeps items scoring at least `threshold`
pub fn filter_by_quality(items: Vec<StructuredDataItem>, threshold: f64) -> Vec<StructuredDataItem> {
    items
        .into_iter()
        .filter(|item| item.quality_score >= threshold)
        .collect()
}

enum Rule {
    /// Dotted path into a JSON-LD object of one of `types` (any type when empty)
    JsonLd {
        types: &'static [&'static str],
        path: &'static str,
    },
    /// First present `<meta>` key
    Meta(&'static [&'static str]),
    /// First capture group (or whole match) in the page text
    Pattern(Regex),
    Title,
    Description,
    FirstHeading,
    FirstImage,
}

impl Rule {
    fn confidence(&self) -> f64 {
        match self {
            Rule::JsonLd { .. } => JSON_LD_CONFIDENCE,
            Rule::Meta(_) => META_CONFIDENCE,
            Rule::Pattern(_) => PATTERN_CONFIDENCE,
            Rule::Title | Rule::Description | Rule::FirstHeading | Rule::FirstImage => {
                PAGE_FIELD_CONFIDENCE
            }
        }
    }

    fn apply(&self, content: &ExtractedContent) -> Option<Value> {
        let value = match self {
            Rule::JsonLd { types, path } => content
                .json_ld
                .iter()
                .filter(|obj| types.is_empty() || has_type(obj, types))
                .find_map(|obj| lookup(obj, path)),
            Rule::Meta(keys) => keys
                .iter()
                .find_map(|k| content.metadata.get(*k))
                .map(|v| Value::String(v.clone())),
            Rule::Pattern(re) => re.captures(&content.text).and_then(|caps| {
                caps.get(1)
                    .or_else(|| caps.get(0))
                    .map(|m| Value::String(m.as_str().trim().to_string()))
            }),
            Rule::Title => content.title.clone().map(Value::String),
            Rule::Description => content.description.clone().map(Value::String),
            Rule::FirstHeading => content.headings.first().map(|h| Value::String(h.text.clone())),
            Rule::FirstImage => content.images.first().map(|i| Value::String(i.src.clone())),
        };
        value.filter(|v| !is_blank(v))
    }
}

struct Field {
    name: &'static str,
    rules: Vec<Rule>,
}

struct Schema {
    name: &'static str,
    fields: Vec<Field>,
    required: &'static [&'static str],
    any_of: &'static [&'static str],
}

fn field(name: &'static str, rules: Vec<Option<Rule>>) -> Field {
    Field {
        name,
        rules: rules.into_iter().flatten().collect(),
    }
}

fn ld(types: &'static [&'static str], path: &'static str) -> Option<Rule> {
    Some(Rule::JsonLd { types, path })
}

fn meta(keys: &'static [&'static str]) -> Option<Rule> {
    Some(Rule::Meta(keys))
}

fn pattern(re: &str) -> Option<Rule> {
    match Regex::new(re) {
        Ok(re) => Some(Rule::Pattern(re)),
        Err(e) => {
            tracing::warn!("Skipping invalid extraction pattern {}: {}", re, e);
            None
        }
    }
}

fn has_type(obj: &Value, types: &[&str]) -> bool {
    let matches = |t: &str| {
        let t = t.rsplit('/').next().unwrap_or(t);
        types.iter().any(|wanted| wanted.eq_ignore_ascii_case(t))
    };
    match obj.get("@type") {
        Some(Value::String(t)) => matches(t),
        Some(Value::Array(ts)) => ts.iter().filter_map(Value::as_str).any(matches),
        _ => false,
    }
}

/// Follows a dotted path, stepping into the first element of arrays along the way
fn lookup(obj: &Value, path: &str) -> Option<Value> {
    let mut current = obj;
    for key in path.split('.') {
        if let Value::Array(items) = current {
            current = items.first()?;
        }
        current = current.get(key)?;
    }
    Some(current.clone())
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn builtin_schemas() -> Vec<Schema> {
    const PRODUCT: &[&str] = &["Product", "IndividualProduct", "ProductModel"];
    const JOB: &[&str] = &["JobPosting"];

    vec![
        Schema {
            name: "product",
            fields: vec![
                field(
                    "name",
                    vec![ld(PRODUCT, "name"), meta(&["product:name", "og:title"]), Some(Rule::FirstHeading)],
                ),
                field(
                    "price",
                    vec![
                        ld(PRODUCT, "offers.price"),
                        ld(PRODUCT, "offers.lowPrice"),
                        meta(&["product:price:amount", "og:price:amount"]),
                        pattern(r"[$€£]\s?(\d{1,3}(?:[,.]\d{3})*(?:[.,]\d{2})?)"),
                    ],
                ),
                field(
                    "currency",
                    vec![
                        ld(PRODUCT, "offers.priceCurrency"),
                        meta(&["product:price:currency", "og:price:currency"]),
                        pattern(r"([$€£])\s?\d"),
                    ],
                ),
                field("description", vec![ld(PRODUCT, "description"), Some(Rule::Description)]),
                field("image", vec![ld(PRODUCT, "image"), meta(&["og:image"])]),
                field(
                    "sku",
                    vec![ld(PRODUCT, "sku"), pattern(r"(?i)\bsku[:#\s]+([a-z0-9-]{3,})")],
                ),
                field(
                    "availability",
                    vec![
                        ld(PRODUCT, "offers.availability"),
                        meta(&["product:availability", "og:availability"]),
                        pattern(r"(?i)\b(in stock|out of stock|pre-?order)\b"),
                    ],
                ),
            ],
            required: &["name", "price"],
            any_of: &[],
        },
        Schema {
            name: "article",
            fields: vec![
                field(
                    "headline",
                    vec![ld(ARTICLE_TYPES, "headline"), meta(&["og:title"]), Some(Rule::Title)],
                ),
                field(
                    "published",
                    vec![
                        ld(ARTICLE_TYPES, "datePublished"),
                        meta(&["article:published_time", "datepublished", "date"]),
                        pattern(r"\b(\d{4}-\d{2}-\d{2})\b"),
                    ],
                ),
                field(
                    "author",
                    vec![
                        ld(ARTICLE_TYPES, "author.name"),
                        ld(ARTICLE_TYPES, "author"),
                        meta(&["author", "article:author"]),
                        pattern(r"\b[Bb]y\s+([A-Z][\w.]*(?:\s+[A-Z][\w.]*){0,2})"),
                    ],
                ),
                field("description", vec![ld(ARTICLE_TYPES, "description"), Some(Rule::Description)]),
                field("image", vec![ld(ARTICLE_TYPES, "image"), meta(&["og:image"])]),
            ],
            required: &["headline", "published"],
            any_of: &[],
        },
        Schema {
            name: "contact",
            fields: vec![
                field(
                    "email",
                    vec![
                        ld(CONTACT_TYPES, "email"),
                        pattern(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}"),
                    ],
                ),
                field(
                    "phone",
                    vec![
                        ld(CONTACT_TYPES, "telephone"),
                        pattern(r"(?:tel|phone|call)[:.]?\s*(\+?\d[\d\s().-]{6,}\d)"),
                        pattern(r"(\+\d{1,3}[\s.-]?\(?\d{1,4}\)?(?:[\s.-]?\d{2,4}){2,3})"),
                    ],
                ),
                field("address", vec![ld(CONTACT_TYPES, "address")]),
                field("name", vec![ld(CONTACT_TYPES, "name"), meta(&["og:site_name"])]),
            ],
            required: &[],
            any_of: &["email", "phone"],
        },
        Schema {
            name: "event",
            fields: vec![
                field("name", vec![ld(EVENT_TYPES, "name"), meta(&["og:title"]), Some(Rule::FirstHeading)]),
                field(
                    "start_date",
                    vec![ld(EVENT_TYPES, "startDate"), meta(&["event:start_time", "startdate"])],
                ),
                field(
                    "location",
                    vec![ld(EVENT_TYPES, "location.name"), ld(EVENT_TYPES, "location")],
                ),
                field("description", vec![ld(EVENT_TYPES, "description"), Some(Rule::Description)]),
            ],
            required: &["name", "start_date"],
            any_of: &[],
        },
        Schema {
            name: "job",
            fields: vec![
                field("title", vec![ld(JOB, "title"), Some(Rule::FirstHeading)]),
                field(
                    "company",
                    vec![
                        ld(JOB, "hiringOrganization.name"),
                        pattern(r"(?i)\b(?:company|employer):\s*(\S+(?:\s\S+){0,3})"),
                    ],
                ),
                field(
                    "location",
                    vec![ld(JOB, "jobLocation.address.addressLocality"), ld(JOB, "jobLocation")],
                ),
                field(
                    "salary",
                    vec![
                        ld(JOB, "baseSalary.value.value"),
                        ld(JOB, "baseSalary"),
                        pattern(r"(?i)salary:?\s*([$€£]?\s?\d[\d,.]*\s?k?(?:\s?-\s?[$€£]?\s?\d[\d,.]*\s?k?)?)"),
                    ],
                ),
                field(
                    "employment_type",
                    vec![
                        ld(JOB, "employmentType"),
                        pattern(r"(?i)\b(full[- ]time|part[- ]time|contract|internship|temporary)\b"),
                    ],
                ),
                field("date_posted", vec![ld(JOB, "datePosted")]),
            ],
            required: &["title", "company"],
            any_of: &[],
        },
        Schema {
            name: "generic",
            fields: vec![
                field("title", vec![Some(Rule::Title), meta(&["og:title"])]),
                field("description", vec![Some(Rule::Description), meta(&["og:description"])]),
                field("heading", vec![Some(Rule::FirstHeading)]),
                field("image", vec![meta(&["og:image"]), Some(Rule::FirstImage)]),
                field("keywords", vec![meta(&["keywords"])]),
            ],
            required: &["title"],
            any_of: &[],
        },
    ]
}

/// Applies the built-in schemas to extracted content
pub struct StructuredExtractor {
    schemas: Vec<Schema>,
}

impl Default for StructuredExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StructuredExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructuredExtractor")
            .field("schemas", &self.schemas.iter().map(|s| s.name).collect::<Vec<_>>())
            .finish()
    }
}

impl StructuredExtractor {
    pub fn new() -> Self {
        Self {
            schemas: builtin_schemas(),
        }
    }

    /// Runs the named schemas (all of them when `data_types` is empty)
    ///
    /// Items are returned unfiltered; see [`filter_by_quality`].
    pub fn extract(&self, content: &ExtractedContent, data_types: &[String]) -> Vec<StructuredDataItem> {
        self.schemas
            .iter()
            .filter(|s| data_types.is_empty() || data_types.iter().any(|t| t == s.name))
            .filter_map(|schema| self.apply_schema(schema, content))
            .collect()
    }

    fn apply_schema(&self, schema: &Schema, content: &ExtractedContent) -> Option<StructuredDataItem> {
        let mut fields = BTreeMap::new();
        let mut confidences = Vec::new();

        for field in &schema.fields {
            let found = field
                .rules
                .iter()
                .find_map(|rule| rule.apply(content).map(|v| (v, rule.confidence())));
            if let Some((value, confidence)) = found {
                fields.insert(field.name.to_string(), value);
                confidences.push(confidence);
            }
        }

        if !schema.required.iter().all(|name| fields.contains_key(*name)) {
            return None;
        }
        if !schema.any_of.is_empty() && !schema.any_of.iter().any(|name| fields.contains_key(*name)) {
            return None;
        }

        let mean_confidence = confidences.iter().sum::<f64>() / confidences.len() as f64;
        let coverage = fields.len() as f64 / schema.fields.len() as f64;
        let quality_score = (CONFIDENCE_WEIGHT * mean_confidence + (1.0 - CONFIDENCE_WEIGHT) * coverage)
            .clamp(0.0, 1.0);

        tracing::trace!(
            "Schema {} matched {} fields on {} (quality {:.2})",
            schema.name,
            fields.len(),
            content.url,
            quality_score
        );

        Some(StructuredDataItem {
            url: content.url.clone(),
            schema: schema.name.to_string(),
            fields,
            quality_score,
            extraction_method: content.method,
            extracted_at: Utc::now(),
        })
    }
}
