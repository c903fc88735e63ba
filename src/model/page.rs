//! Page names.
//!
//! Pages are addressed by colon-delimited names like `"Projects:2026:Todo"`.
//! The empty name addresses the root of the notebook tree. Names are
//! normalised on construction: surrounding whitespace is trimmed per part
//! and empty parts are dropped, so `"::A : B::"` becomes `"A:B"`.

use std::fmt;

/// A page address in the notebook tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageName(String);

impl PageName {
    /// The root of the tree.
    #[must_use]
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Build a name from user input, normalising separators.
    #[must_use]
    pub fn new(name: &str) -> Self {
        let cleaned: Vec<&str> = name
            .split(':')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();
        Self(cleaned.join(":"))
    }

    /// The full colon-delimited name; empty for the root.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The name parts from top to bottom; empty for the root.
    pub fn parts(&self) -> impl Iterator<Item = &str> {
        self.0.split(':').filter(|part| !part.is_empty())
    }

    /// The final path component; empty for the root.
    #[must_use]
    pub fn basename(&self) -> &str {
        self.0.rsplit(':').next().unwrap_or("")
    }

    /// The parent name; the root is its own parent.
    #[must_use]
    pub fn parent(&self) -> Self {
        match self.0.rfind(':') {
            Some(idx) => Self(self.0[..idx].to_string()),
            None => Self::root(),
        }
    }

    /// Child of this page with the given basename.
    #[must_use]
    pub fn child(&self, basename: &str) -> Self {
        if self.is_root() {
            Self::new(basename)
        } else {
            Self::new(&format!("{}:{basename}", self.0))
        }
    }

    /// True if `other` is a strict descendant of `self`.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        if self.is_root() {
            !other.is_root()
        } else {
            other.0.len() > self.0.len()
                && other.0.starts_with(&self.0)
                && other.0.as_bytes()[self.0.len()] == b':'
        }
    }

    /// Strict ancestors from just below the root down to the parent.
    /// Empty for the root and for top-level pages.
    #[must_use]
    pub fn ancestors_top_down(&self) -> Vec<Self> {
        let mut result = Vec::new();
        let mut name = String::new();
        let parts: Vec<&str> = self.parts().collect();
        if parts.len() < 2 {
            return result;
        }
        for part in &parts[..parts.len() - 1] {
            if !name.is_empty() {
                name.push(':');
            }
            name.push_str(part);
            result.push(Self(name.clone()));
        }
        result
    }
}

impl fmt::Display for PageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str(":")
        } else {
            f.write_str(&self.0)
        }
    }
}

impl From<&str> for PageName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Locale-free natural-order sort key for a basename.
///
/// Lowercases and zero-pads digit runs so `"Page 9"` sorts before
/// `"Page 10"`. Stored in the `sortkey` column so ordering is a plain
/// string comparison in SQL.
#[must_use]
pub fn natural_sort_key(basename: &str) -> String {
    let mut key = String::with_capacity(basename.len());
    let mut digits = String::new();
    for ch in basename.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
        } else {
            if !digits.is_empty() {
                key.push_str(&format!("{:0>10}", digits.trim_start_matches('0')));
                digits.clear();
            }
            key.extend(ch.to_lowercase());
        }
    }
    if !digits.is_empty() {
        key.push_str(&format!("{:0>10}", digits.trim_start_matches('0')));
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_normalisation() {
        assert_eq!(PageName::new("A:B").as_str(), "A:B");
        assert_eq!(PageName::new("::A : B::").as_str(), "A:B");
        assert_eq!(PageName::new("").as_str(), "");
        assert!(PageName::new(" : ").is_root());
    }

    #[test]
    fn test_parent_child() {
        let name = PageName::new("A:B:C");
        assert_eq!(name.basename(), "C");
        assert_eq!(name.parent().as_str(), "A:B");
        assert_eq!(name.parent().parent().as_str(), "A");
        assert!(name.parent().parent().parent().is_root());
        assert_eq!(PageName::root().child("X").as_str(), "X");
        assert_eq!(PageName::new("A").child("X").as_str(), "A:X");
    }

    #[test]
    fn test_ancestry() {
        let a = PageName::new("A");
        let abc = PageName::new("A:B:C");
        let ab2 = PageName::new("A:B2");
        assert!(a.is_ancestor_of(&abc));
        assert!(!a.is_ancestor_of(&a));
        assert!(!abc.is_ancestor_of(&a));
        assert!(!PageName::new("A:B").is_ancestor_of(&ab2));
        assert!(PageName::root().is_ancestor_of(&a));
        assert!(!PageName::root().is_ancestor_of(&PageName::root()));
    }

    #[test]
    fn test_ancestors_top_down() {
        let name = PageName::new("A:B:C");
        let ancestors: Vec<String> = name
            .ancestors_top_down()
            .iter()
            .map(|p| p.as_str().to_string())
            .collect();
        assert_eq!(ancestors, vec!["A", "A:B"]);
        assert!(PageName::new("A").ancestors_top_down().is_empty());
        assert!(PageName::root().ancestors_top_down().is_empty());
    }

    #[test]
    fn test_natural_sort_key() {
        assert!(natural_sort_key("Page 9") < natural_sort_key("Page 10"));
        assert!(natural_sort_key("apple") < natural_sort_key("Banana"));
        assert_eq!(natural_sort_key("Foo007"), natural_sort_key("Foo7"));
    }
}
