//! URL frontier of one crawl session
//!
//! The frontier owns both the queue and the visited-set. Admission is a single
//! check-and-mark on the visited-set, so a URL is queued (and fetched) at most
//! once per session no matter how many pages link to it.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use url::Url;

/// A URL waiting to be fetched
#[derive(Debug, Clone)]
pub struct UrlTask {
    /// Normalized URL
    pub url: Url,

    /// Link distance from the start URL
    pub depth: u32,

    /// Page the URL was discovered on
    pub parent: Option<Url>,

    /// Admission order, used to keep the queue FIFO within a depth
    seq: u64,
}

// Shallower tasks first, then admission order (BinaryHeap pops the greatest)
impl Ord for UrlTask {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .depth
            .cmp(&self.depth)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for UrlTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for UrlTask {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for UrlTask {}

/// Result of offering a URL to the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Queued,
    /// Already admitted earlier in this session
    Duplicate,
    /// Beyond the configured maximum depth
    TooDeep,
    /// The page budget is used up
    Full,
}

/// Breadth-first queue plus visited-set
#[derive(Debug)]
pub struct Frontier {
    queue: BinaryHeap<UrlTask>,
    visited: HashSet<String>,
    max_pages: usize,
    max_depth: u32,
    next_seq: u64,
}

impl Frontier {
    pub fn new(max_pages: u32, max_depth: u32) -> Self {
        Self {
            queue: BinaryHeap::new(),
            visited: HashSet::new(),
            max_pages: max_pages as usize,
            max_depth,
            next_seq: 0,
        }
    }

    /// Admits a normalized URL unless it was seen, is too deep, or the budget is spent
    ///
    /// # Arguments
    ///
    /// * `url` - Normalized URL, the visited-set key
    /// * `depth` - Link distance from the start URL
    /// * `parent` - Page the link was found on
    ///
    /// # Returns
    ///
    /// The [`Admission`] outcome; only `Admission::Queued` adds a task.
    pub fn offer(&mut self, url: Url, depth: u32, parent: Option<Url>) -> Admission {
        if depth > self.max_depth {
            return Admission::TooDeep;
        }
        if self.visited.contains(url.as_str()) {
            return Admission::Duplicate;
        }
        if self.visited.len() >= self.max_pages {
            return Admission::Full;
        }

        self.visited.insert(url.to_string());
        tracing::trace!("Queued {} at depth {}", url, depth);
        self.queue.push(UrlTask {
            url,
            depth,
            parent,
            seq: self.next_seq,
        });
        self.next_seq += 1;
        Admission::Queued
    }

    pub fn pop(&mut self) -> Option<UrlTask> {
        self.queue.pop()
    }

    /// Number of URLs admitted so far (queued, in flight, or done)
    pub fn admitted(&self) -> usize {
        self.visited.len()
    }

    pub fn has_seen(&self, url: &Url) -> bool {
        self.visited.contains(url.as_str())
    }

    /// Number of URLs still waiting
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.visited.len() >= self.max_pages
    }
}
