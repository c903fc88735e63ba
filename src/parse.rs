//! Page parsing contract and the bundled wiki-text format.
//!
//! The index only consumes two things from page content: outgoing link
//! references and tags. [`PageFormat::parse`] reduces a page to a
//! [`ParseTree`] carrying exactly those. The bundled [`WikiFormat`]
//! recognises `[[Target]]` / `[[Target|text]]` links and `@tag` tokens;
//! other formats can be plugged in through the storage layout.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Result;
use crate::model::LinkRel;

/// A link reference extracted from page content, not yet resolved
/// against the page tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRef {
    /// The textual reference as written, cleaned of decoration.
    pub href: String,
    pub rel: LinkRel,
}

/// The digest of a parsed page: outgoing links and tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseTree {
    pub links: Vec<LinkRef>,
    pub tags: Vec<String>,
}

/// A page content parser.
pub trait PageFormat: Send + Sync {
    /// Parse page text into its link/tag digest.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Parse`] when the content is malformed
    /// beyond recovery. The indexer treats that page as empty and keeps
    /// going.
    fn parse(&self, text: &str) -> Result<ParseTree>;
}

static LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[([^\[\]|]+)(?:\|[^\[\]]*)?\]\]").expect("static regex"));

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[\s(])@([\w][\w-]*)").expect("static regex"));

/// The default wiki-text page format.
///
/// Link syntax: `[[Name]]` resolves relative to the source page's
/// namespace, `[[:Name]]` resolves from the root, `[[+Name]]` resolves
/// below the source page. An optional `|text` part is display-only and
/// ignored here.
#[derive(Debug, Default, Clone, Copy)]
pub struct WikiFormat;

impl PageFormat for WikiFormat {
    fn parse(&self, text: &str) -> Result<ParseTree> {
        let mut tree = ParseTree::default();

        for cap in LINK_RE.captures_iter(text) {
            let raw = cap[1].trim();
            if raw.is_empty() || is_external(raw) {
                continue;
            }
            let (href, rel) = match raw.strip_prefix(':') {
                Some(stripped) => (stripped.trim().to_string(), LinkRel::Absolute),
                None => (raw.to_string(), LinkRel::Relative),
            };
            if !href.is_empty() {
                tree.links.push(LinkRef { href, rel });
            }
        }

        for cap in TAG_RE.captures_iter(text) {
            let tag = cap[1].to_string();
            if !tree.tags.contains(&tag) {
                tree.tags.push(tag);
            }
        }

        Ok(tree)
    }
}

/// URLs and interwiki references are not page links.
fn is_external(href: &str) -> bool {
    href.contains("://") || href.starts_with("mailto:") || href.starts_with("file:")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> ParseTree {
        WikiFormat.parse(text).unwrap()
    }

    #[test]
    fn test_extracts_links() {
        let tree = parse("see [[Foo:Bar]] and [[Baz|the baz page]]");
        assert_eq!(tree.links.len(), 2);
        assert_eq!(tree.links[0].href, "Foo:Bar");
        assert_eq!(tree.links[0].rel, LinkRel::Relative);
        assert_eq!(tree.links[1].href, "Baz");
    }

    #[test]
    fn test_absolute_and_subpage_links() {
        let tree = parse("[[:Top:Sub]] [[+Child]]");
        assert_eq!(tree.links[0].href, "Top:Sub");
        assert_eq!(tree.links[0].rel, LinkRel::Absolute);
        assert_eq!(tree.links[1].href, "+Child");
        assert_eq!(tree.links[1].rel, LinkRel::Relative);
    }

    #[test]
    fn test_ignores_external_links() {
        let tree = parse("[[https://example.com]] [[mailto:a@b.c]] [[Real]]");
        assert_eq!(tree.links.len(), 1);
        assert_eq!(tree.links[0].href, "Real");
    }

    #[test]
    fn test_extracts_tags() {
        let tree = parse("@todo some text @todo (@urgent) not-a@tag");
        assert_eq!(tree.tags, vec!["todo".to_string(), "urgent".to_string()]);
    }

    #[test]
    fn test_empty_page() {
        let tree = parse("");
        assert!(tree.links.is_empty());
        assert!(tree.tags.is_empty());
    }
}
