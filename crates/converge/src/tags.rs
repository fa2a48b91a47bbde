//! Tag names and tag filters

use crate::error::{Result, TransactionError};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

static TAG_NAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\A[[:alnum:]_][[:alnum:]_:.\-]*\z").ok());

/// Whether `tag` is usable as a tag (after lowercasing)
pub fn is_valid_tag(tag: &str) -> bool {
    TAG_NAME.as_ref().is_some_and(|pattern| pattern.is_match(tag))
}

/// Lowercase and validate one tag
pub fn normalize_tag(tag: &str) -> Result<String> {
    let tag = tag.trim().to_lowercase();
    if is_valid_tag(&tag) {
        Ok(tag)
    } else {
        Err(TransactionError::InvalidTag(tag))
    }
}

/// Split comma separated tag lists and normalize every entry
///
/// `["web,db", "Cache"]` becomes `["web", "db", "cache"]`.
pub fn split_tags<I, S>(tags: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = Vec::new();
    for entry in tags {
        for tag in entry.as_ref().split(',').filter(|t| !t.trim().is_empty()) {
            let tag = normalize_tag(tag)?;
            if !out.contains(&tag) {
                out.push(tag);
            }
        }
    }
    Ok(out)
}

/// Tags a resource receives without asking: its type and, when usable, its title
pub fn automatic_tags(type_name: &str, title: &str) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    for part in type_name.split("::") {
        tags.insert(part.to_lowercase());
    }
    tags.insert(type_name.to_lowercase());
    let title = title.to_lowercase();
    if is_valid_tag(&title) {
        tags.insert(title);
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_tags() {
        assert!(is_valid_tag("web"));
        assert!(is_valid_tag("apache::mod"));
        assert!(is_valid_tag("v1.2-beta"));
        assert!(!is_valid_tag(""));
        assert!(!is_valid_tag("has space"));
        assert!(!is_valid_tag("-leading"));
    }

    #[test]
    fn test_normalize_lowercases() {
        assert_eq!(normalize_tag(" Web ").unwrap(), "web");
        assert!(normalize_tag("not valid").is_err());
    }

    #[test]
    fn test_split_tags() {
        let tags = split_tags(["web,db", "Cache", "web"]).unwrap();
        assert_eq!(tags, vec!["web", "db", "cache"]);
    }

    #[test]
    fn test_split_tags_rejects_invalid() {
        assert!(split_tags(["ok,no way"]).is_err());
    }

    #[test]
    fn test_automatic_tags() {
        let tags = automatic_tags("foo::bar", "Main");
        assert!(tags.contains("foo"));
        assert!(tags.contains("bar"));
        assert!(tags.contains("foo::bar"));
        assert!(tags.contains("main"));

        let tags = automatic_tags("file", "/etc/hosts");
        assert!(!tags.contains("/etc/hosts"));
    }
}
