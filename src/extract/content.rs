//! Page content extraction and quality scoring

use super::{ChunkKind, ContentChunk, ExtractedContent, Heading, Image, ImageKind, Link};
use crate::executor::{PageKind, RawPage};
use crate::url::{extract_domain, is_same_domain, resolve_link};
use crate::Result;
use chrono::Utc;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use url::Url;

/// Candidate content blocks: selector, chunk type, base confidence
const CHUNK_RULES: &[(&str, ChunkKind, f64)] = &[
    ("article, [role='article']", ChunkKind::Article, 0.9),
    ("main, [role='main']", ChunkKind::Article, 0.7),
    (
        "[itemtype*='Product'], .product, #product",
        ChunkKind::Product,
        0.85,
    ),
    ("table", ChunkKind::Table, 0.8),
    ("ul, ol", ChunkKind::Listing, 0.5),
    ("nav, [role='navigation']", ChunkKind::Navigation, 0.9),
    ("footer, [role='contentinfo']", ChunkKind::Footer, 0.9),
    ("aside, .sidebar, #sidebar", ChunkKind::Sidebar, 0.8),
];

/// A list needs this many items to count as a listing
const MIN_LISTING_ITEMS: usize = 3;

/// Images at or below this size (px) are icons
const ICON_MAX_SIZE: u32 = 32;

/// Word count that earns the full length component of the quality score
const FULL_LENGTH_WORDS: usize = 300;

/// Fields checked by the completeness score
const EXPECTED_FIELDS: usize = 6;

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Visible text under an element, skipping scripts and styles
fn element_text(element: ElementRef<'_>) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for node in element.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .map(|e| matches!(e.name(), "script" | "style" | "noscript" | "template"))
                .unwrap_or(false)
        });
        if !hidden {
            parts.push(text);
        }
    }
    collapse_whitespace(&parts.join(" "))
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Short CSS path for an element: `tag#id` or `tag.first-class`
fn css_path(element: ElementRef<'_>) -> String {
    let el = element.value();
    if let Some(id) = el.id() {
        return format!("{}#{}", el.name(), id);
    }
    match el.classes().next() {
        Some(class) => format!("{}.{}", el.name(), class),
        None => el.name().to_string(),
    }
}

/// Lowercased id, class, alt and src of an element, for keyword heuristics
fn element_hints(element: ElementRef<'_>) -> String {
    let el = element.value();
    let mut hints = String::new();
    for attr in ["id", "class", "alt", "src", "itemprop"] {
        if let Some(value) = el.attr(attr) {
            hints.push_str(&value.to_lowercase());
            hints.push(' ');
        }
    }
    hints
}

fn ancestor_hints(element: ElementRef<'_>) -> String {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .take(6)
        .map(|a| format!("{} {}", a.value().name(), element_hints(a)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn classify_image(element: ElementRef<'_>) -> ImageKind {
    let hints = element_hints(element);
    let context = ancestor_hints(element);
    let size = |attr: &str| {
        element
            .value()
            .attr(attr)
            .and_then(|v| v.trim_end_matches("px").parse::<u32>().ok())
    };
    let (width, height) = (size("width"), size("height"));

    if hints.contains("logo") || context.contains("logo") {
        ImageKind::Logo
    } else if hints.contains("avatar") || hints.contains("gravatar") || hints.contains("profile") {
        ImageKind::Avatar
    } else if hints.contains("icon")
        || hints.contains(".ico")
        || matches!((width, height), (Some(w), Some(h)) if w <= ICON_MAX_SIZE && h <= ICON_MAX_SIZE)
    {
        ImageKind::Icon
    } else if hints.contains("product") || context.contains("product") {
        ImageKind::Product
    } else if context.contains("article")
        || context.contains("main")
        || context.contains("figure")
        || width.map(|w| w >= 200).unwrap_or(false)
    {
        ImageKind::Content
    } else {
        ImageKind::Unknown
    }
}

/// Turns fetched pages into [`ExtractedContent`]
#[derive(Debug, Clone, Default)]
pub struct ContentExtractor;

impl ContentExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, page: &RawPage) -> Result<ExtractedContent> {
        let mut content = match page.kind {
            PageKind::Html => self.extract_html(&page.final_url, &page.html),
            PageKind::Json => self.extract_json(&page.final_url, &page.html)?,
        };
        content.method = page.method;
        score(&mut content);
        Ok(content)
    }

    fn extract_html(&self, base: &Url, html: &str) -> ExtractedContent {
        let document = Html::parse_document(html);
        let page_domain = extract_domain(base).unwrap_or_default();

        let mut metadata = BTreeMap::new();
        if let Some(meta) = selector("meta[content]") {
            for element in document.select(&meta) {
                let el = element.value();
                let key = el.attr("name").or_else(|| el.attr("property"));
                if let (Some(key), Some(value)) = (key, el.attr("content")) {
                    metadata
                        .entry(key.to_lowercase())
                        .or_insert_with(|| value.trim().to_string());
                }
            }
        }

        let mut json_ld = Vec::new();
        if let Some(ld) = selector("script[type='application/ld+json']") {
            for element in document.select(&ld) {
                let raw: String = element.text().collect();
                match serde_json::from_str::<Value>(raw.trim()) {
                    Ok(value) => flatten_json_ld(value, &mut json_ld),
                    Err(e) => tracing::debug!("Ignoring malformed JSON-LD on {}: {}", base, e),
                }
            }
        }

        let title = selector("title")
            .and_then(|s| document.select(&s).next())
            .map(element_text)
            .filter(|t| !t.is_empty())
            .or_else(|| metadata.get("og:title").cloned());

        let description = metadata
            .get("description")
            .or_else(|| metadata.get("og:description"))
            .cloned()
            .filter(|d| !d.is_empty());

        let mut headings = Vec::new();
        if let Some(h) = selector("h1, h2, h3, h4, h5, h6") {
            for element in document.select(&h) {
                let level = element.value().name()[1..].parse::<u8>().unwrap_or(1);
                let text = element_text(element);
                if !text.is_empty() {
                    headings.push(Heading { level, text });
                }
            }
        }

        let mut links = Vec::new();
        let mut seen_links = HashSet::new();
        if let Some(a) = selector("a[href]") {
            for element in document.select(&a) {
                if element.value().attr("download").is_some() {
                    continue;
                }
                let Some(target) = element
                    .value()
                    .attr("href")
                    .and_then(|href| resolve_link(base, href))
                else {
                    continue;
                };
                if !seen_links.insert(target.to_string()) {
                    continue;
                }
                let internal = extract_domain(&target)
                    .map(|d| is_same_domain(&page_domain, &d))
                    .unwrap_or(false);
                links.push(Link {
                    text: element_text(element),
                    href: target.to_string(),
                    internal,
                });
            }
        }

        let mut images = Vec::new();
        if let Some(img) = selector("img[src]") {
            for element in document.select(&img) {
                let Some(src) = element
                    .value()
                    .attr("src")
                    .and_then(|s| base.join(s.trim()).ok())
                else {
                    continue;
                };
                images.push(Image {
                    src: src.to_string(),
                    alt: element
                        .value()
                        .attr("alt")
                        .map(|a| a.trim().to_string())
                        .filter(|a| !a.is_empty()),
                    kind: classify_image(element),
                });
            }
        }

        let chunks = extract_chunks(&document);

        let text = selector("body")
            .and_then(|s| document.select(&s).next())
            .map(element_text)
            .unwrap_or_default();

        ExtractedContent {
            url: base.to_string(),
            title,
            description,
            headings,
            links,
            images,
            chunks,
            word_count: word_count(&text),
            text,
            quality_score: 0.0,
            completeness_score: 0.0,
            method: crate::executor::Method::Static,
            metadata,
            json_ld,
            extracted_at: Utc::now(),
        }
    }

    fn extract_json(&self, base: &Url, body: &str) -> Result<ExtractedContent> {
        let payload: Value = serde_json::from_str(body)?;
        let page_domain = extract_domain(base).unwrap_or_default();

        let title = find_text(&payload, &["title", "name", "headline"]);
        let description = find_text(&payload, &["description", "excerpt", "summary"]);

        let mut texts = Vec::new();
        let mut links = Vec::new();
        let mut seen_links = HashSet::new();
        collect_leaves(&payload, &mut |leaf| {
            if let Ok(url) = Url::parse(leaf) {
                if matches!(url.scheme(), "http" | "https") {
                    if seen_links.insert(url.to_string()) {
                        let internal = extract_domain(&url)
                            .map(|d| is_same_domain(&page_domain, &d))
                            .unwrap_or(false);
                        links.push(Link {
                            text: String::new(),
                            href: url.to_string(),
                            internal,
                        });
                    }
                    return;
                }
            }
            texts.push(strip_markup(leaf));
        });

        let text = collapse_whitespace(&texts.join(" "));
        let chunks = if text.is_empty() {
            Vec::new()
        } else {
            vec![ContentChunk {
                kind: ChunkKind::Unknown,
                selector: "$".to_string(),
                text: text.clone(),
                confidence: 0.6,
            }]
        };

        let mut json_ld = Vec::new();
        flatten_json_ld(payload, &mut json_ld);

        Ok(ExtractedContent {
            url: base.to_string(),
            title,
            description,
            headings: Vec::new(),
            links,
            images: Vec::new(),
            chunks,
            word_count: word_count(&text),
            text,
            quality_score: 0.0,
            completeness_score: 0.0,
            method: crate::executor::Method::Api,
            metadata: BTreeMap::new(),
            json_ld,
            extracted_at: Utc::now(),
        })
    }
}

fn extract_chunks(document: &Html) -> Vec<ContentChunk> {
    let mut chunks = Vec::new();
    let mut seen_text = HashSet::new();

    for (css, kind, base_confidence) in CHUNK_RULES {
        let Some(sel) = selector(css) else {
            continue;
        };
        for element in document.select(&sel) {
            let text = element_text(element);
            if text.is_empty() {
                continue;
            }

            let mut confidence = *base_confidence;
            if *kind == ChunkKind::Listing {
                let items = element
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|c| c.value().name() == "li")
                    .count();
                // Lists inside navigation and footers belong to those chunks
                let boxed = element.ancestors().filter_map(ElementRef::wrap).any(|a| {
                    matches!(a.value().name(), "nav" | "footer" | "aside")
                });
                if items < MIN_LISTING_ITEMS || boxed {
                    continue;
                }
                if items >= 5 {
                    confidence += 0.1;
                }
            }

            let words = word_count(&text);
            confidence += (words as f64 / 1000.0).min(0.1);
            if words < 5 && *kind != ChunkKind::Navigation {
                confidence -= 0.2;
            }

            if !seen_text.insert(text.clone()) {
                continue;
            }
            chunks.push(ContentChunk {
                kind: *kind,
                selector: css_path(element),
                text,
                confidence: confidence.clamp(0.0, 1.0),
            });
        }
    }

    if chunks.is_empty() {
        if let Some(body) = selector("body").and_then(|s| document.select(&s).next()) {
            let text = element_text(body);
            if !text.is_empty() {
                chunks.push(ContentChunk {
                    kind: ChunkKind::Unknown,
                    selector: "body".to_string(),
                    text,
                    confidence: 0.3,
                });
            }
        }
    }

    chunks
}

/// Fills in quality (0 to 100) and completeness (0 to 1) scores
fn score(content: &mut ExtractedContent) {
    let length = (content.word_count as f64 / FULL_LENGTH_WORDS as f64).min(1.0) * 40.0;
    let headings = (content.headings.len().min(5) as f64 / 5.0) * 15.0;
    let typed_chunks = content
        .chunks
        .iter()
        .filter(|c| c.kind != ChunkKind::Unknown)
        .count();
    let structure = (typed_chunks.min(3) as f64 / 3.0) * 15.0;
    let links = if content.links.is_empty() { 0.0 } else { 5.0 };
    let images = if content.images.is_empty() { 0.0 } else { 5.0 };
    let title = if content.title.is_some() { 8.0 } else { 0.0 };
    let description = if content.description.is_some() { 7.0 } else { 0.0 };
    let structured = if content.json_ld.is_empty() { 0.0 } else { 5.0 };

    content.quality_score =
        (length + headings + structure + links + images + title + description + structured)
            .clamp(0.0, 100.0);

    let present = [
        content.title.is_some(),
        content.description.is_some(),
        !content.headings.is_empty(),
        content.word_count >= 50,
        !content.links.is_empty(),
        !content.images.is_empty(),
    ]
    .iter()
    .filter(|p| **p)
    .count();
    content.completeness_score = present as f64 / EXPECTED_FIELDS as f64;
}

/// Pushes JSON-LD objects, unwrapping arrays and `@graph` containers
fn flatten_json_ld(value: Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => items.into_iter().for_each(|v| flatten_json_ld(v, out)),
        Value::Object(mut map) => {
            if let Some(graph) = map.remove("@graph") {
                flatten_json_ld(graph, out);
                if map.keys().all(|k| k.starts_with('@')) {
                    return;
                }
            }
            out.push(Value::Object(map));
        }
        _ => {}
    }
}

/// First string found under one of `keys`, searching breadth-first
///
/// WordPress-style `{"rendered": "..."}` wrappers are unwrapped.
fn find_text(value: &Value, keys: &[&str]) -> Option<String> {
    let mut queue = std::collections::VecDeque::from([value]);
    while let Some(current) = queue.pop_front() {
        match current {
            Value::Object(map) => {
                for key in keys {
                    let found = match map.get(*key) {
                        Some(Value::String(s)) => Some(s.as_str()),
                        Some(Value::Object(inner)) => inner.get("rendered").and_then(Value::as_str),
                        _ => None,
                    };
                    if let Some(text) = found.map(strip_markup).filter(|t| !t.is_empty()) {
                        return Some(text);
                    }
                }
                queue.extend(map.values());
            }
            Value::Array(items) => queue.extend(items.iter()),
            _ => {}
        }
    }
    None
}

fn collect_leaves<'a>(value: &'a Value, f: &mut impl FnMut(&'a str)) {
    match value {
        Value::String(s) if !s.trim().is_empty() => f(s),
        Value::Array(items) => items.iter().for_each(|v| collect_leaves(v, f)),
        Value::Object(map) => map.values().for_each(|v| collect_leaves(v, f)),
        _ => {}
    }
}

/// Plain text of a string that may carry HTML markup
fn strip_markup(text: &str) -> String {
    if !text.contains('<') {
        return collapse_whitespace(text);
    }
    let fragment = Html::parse_fragment(text);
    collapse_whitespace(&fragment.root_element().text().collect::<Vec<_>>().join(" "))
}
