//! Stylesheet hot-reload handshake.
//!
//! When a declared stylesheet changes on disk the session asks the live
//! instance to reload its styles and waits for two kinds of proof per sheet:
//!
//! 1. *requested*: the instance fetched the sheet again. Serving it removes
//!    the sheet's wait marker and appends a hidden rule whose background image
//!    is a fresh *apply* marker URL.
//! 2. *applied*: the instance rendered that rule and fetched the apply marker.
//!
//! The bootstrap page carries one hidden `<div>` per sheet with the marker's
//! class, so a rendered rule always has an element to apply to.
//!
//! Both outstanding sets live behind one lock; the resource server thread
//! mutates them while the session thread polls.

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::sync::atomic::{AtomicU64, Ordering};

pub const WAIT_MARKER_PREFIX: &str = "weft__wait_stylesheet_";

/// 1x1 transparent PNG served for apply markers.
pub const PLACEHOLDER_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f, 0x15, 0xc4,
    0x89, 0x00, 0x00, 0x00, 0x0a, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae,
    0x42, 0x60, 0x82,
];

/// Marker class for a stylesheet path: slashes become underscores and a
/// trailing `.css` (any case) is dropped.
pub fn wait_request_name(path: &str) -> String {
    let mut name = path.replace('/', "_");
    let stem = name.len().checked_sub(4).filter(|at| {
        name.get(*at..)
            .is_some_and(|ext| ext.eq_ignore_ascii_case(".css"))
    });
    if let Some(at) = stem {
        name.truncate(at);
    }
    format!("{WAIT_MARKER_PREFIX}{name}")
}

#[derive(Debug, Default)]
struct Outstanding {
    requested: FxHashSet<String>,
    applying: FxHashSet<String>,
}

#[derive(Debug)]
pub struct StyleWait {
    resources: Vec<String>,
    module_base: String,
    next_request: AtomicU64,
    outstanding: Mutex<Outstanding>,
}

impl StyleWait {
    pub fn new(resources: Vec<String>, module_base: impl Into<String>) -> Self {
        Self {
            resources,
            module_base: module_base.into(),
            next_request: AtomicU64::new(0),
            outstanding: Mutex::new(Outstanding::default()),
        }
    }

    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    /// `<link>` declarations for the bootstrap page.
    pub fn link_declarations(&self) -> Vec<String> {
        self.resources
            .iter()
            .map(|r| format!("<link rel='stylesheet' type='text/css' href='{r}'/>"))
            .collect()
    }

    /// Hidden marker elements for the bootstrap page.
    pub fn wait_declarations(&self) -> String {
        self.resources
            .iter()
            .map(|r| format!("<div class='{}'></div>\n", wait_request_name(r)))
            .collect()
    }

    /// Forget any previous handshake.
    pub fn reset(&self) {
        let mut outstanding = self.outstanding.lock();
        outstanding.requested.clear();
        outstanding.applying.clear();
    }

    /// Expect every declared sheet to be fetched again.
    pub fn request_all(&self) {
        let mut outstanding = self.outstanding.lock();
        outstanding
            .requested
            .extend(self.resources.iter().map(|r| wait_request_name(r)));
    }

    /// Consume an apply marker. `true` when `path` was one we handed out.
    pub fn take_apply(&self, path: &str) -> bool {
        self.outstanding.lock().applying.remove(path)
    }

    /// Append the apply rule to a declared stylesheet being served and move
    /// its marker from requested to applying. Other content passes through.
    pub fn rewrite(&self, path: &str, content: Vec<u8>) -> Vec<u8> {
        if !path.to_ascii_lowercase().ends_with(".css") || !self.resources.iter().any(|r| r == path)
        {
            return content;
        }

        let request_name = wait_request_name(path);
        let id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let apply_name = format!("{request_name}_{id}.png");

        let mut css = String::from_utf8_lossy(&content).into_owned();
        css.push_str(&format!(
            "\n.{request_name}{{visibility: hidden; background-image: url('{}{apply_name}'); }}\n",
            self.module_base
        ));

        let mut outstanding = self.outstanding.lock();
        outstanding.applying.insert(apply_name);
        outstanding.requested.remove(&request_name);
        css.into_bytes()
    }

    pub fn is_settled(&self) -> bool {
        let outstanding = self.outstanding.lock();
        outstanding.requested.is_empty() && outstanding.applying.is_empty()
    }

    /// Number of (requested, applying) markers still outstanding.
    pub fn outstanding(&self) -> (usize, usize) {
        let outstanding = self.outstanding.lock();
        (outstanding.requested.len(), outstanding.applying.len())
    }
}
