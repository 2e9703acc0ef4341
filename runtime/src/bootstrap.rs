//! The page a live instance is started from.

use crate::{module::ModuleDescriptor, styles::StyleWait};
use std::io;

pub const START_HTML: &str = "__start.html";

const TEMPLATE: &str = include_str!("bootstrap.html");
const DEFAULT_DOCTYPE: &str = "<!doctype html>";
const STRICT_DOCTYPES: [&str; 2] = [
    "<!doctype html>",
    "<!doctype html PUBLIC \"-//W3C//DTD HTML 4.01//EN\">",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bootstrap {
    pub html: String,
    /// The page renders in standards mode.
    pub strict_mode: bool,
}

/// The first `<!doctype ...>` tag of a page, verbatim, or an empty string
/// when the page has none.
pub fn sniff_doc_type(page: &str) -> &str {
    let lower = page.to_ascii_lowercase();
    let Some(start) = lower.find("<!doctype") else {
        return "";
    };
    match page[start..].find('>') {
        Some(end) => &page[start..=start + end],
        None => "",
    }
}

fn is_strict(doc_type: &str) -> bool {
    STRICT_DOCTYPES
        .iter()
        .any(|strict| strict.eq_ignore_ascii_case(doc_type))
}

/// Doctype of the module's host page. `None` when the module has no page.
fn module_doc_type(module: &dyn ModuleDescriptor) -> io::Result<Option<String>> {
    let Some(path) = module.host_page() else {
        return Ok(None);
    };
    let Some(bytes) = module.resource(path)? else {
        return Ok(None);
    };
    let page = String::from_utf8_lossy(&bytes);
    Ok(Some(sniff_doc_type(&page).to_string()))
}

fn declarations(module: &dyn ModuleDescriptor, styles: &StyleWait) -> String {
    let mut lines = styles.link_declarations();
    lines.extend(
        module
            .script_resources()
            .iter()
            .map(|s| format!("<script type='text/javascript' src='{s}'></script>")),
    );
    lines.join("\n")
}

/// Fill the bootstrap template for `module` served under `module_base`.
pub fn render(
    module: &dyn ModuleDescriptor,
    module_base: &str,
    user_agent: &str,
    styles: &StyleWait,
) -> io::Result<Bootstrap> {
    let (prefix, strict_mode) = match module_doc_type(module)? {
        // no page at all renders in standards mode
        None => (Some(DEFAULT_DOCTYPE.to_string()), true),
        Some(doc_type) if doc_type.is_empty() => (None, false),
        Some(doc_type) => {
            let strict = is_strict(&doc_type);
            (Some(doc_type), strict)
        },
    };

    let mut html = TEMPLATE
        .replace("%DECLARATIONS%", &declarations(module, styles))
        .replace("%MODULE_ID%", module.id())
        .replace("%MODULE_NAME%", module.name())
        .replace("%MODULE_BASE%", module_base)
        .replace("%RUNTIME_VERSION%", module.runtime_version())
        .replace("%LOCALE%", module.default_locale())
        .replace("%USER_AGENT%", user_agent)
        .replace("%CSS_WAIT_DECLARATIONS%", &styles.wait_declarations());
    if let Some(prefix) = prefix {
        html.insert(0, '\n');
        html.insert_str(0, &prefix);
    }

    Ok(Bootstrap { html, strict_mode })
}
