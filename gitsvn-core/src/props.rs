//! Path property pipeline
//!
//! Derives per-path SVN properties from the special dotfiles found while
//! walking trees (`.gitignore`, `.gitattributes`). Parsed results are cached
//! by blob id, so reuse across revisions is natural and invalidation is
//! never needed.

use serde::{Deserialize, Serialize};

/// SVN standard property names
pub mod names {
    /// Executable flag
    pub const EXECUTABLE: &str = "svn:executable";

    /// Special file (symlink)
    pub const SPECIAL: &str = "svn:special";

    /// MIME type
    pub const MIME_TYPE: &str = "svn:mime-type";

    /// Ignore patterns
    pub const IGNORE: &str = "svn:ignore";

    /// End-of-line style
    pub const EOL_STYLE: &str = "svn:eol-style";

    /// Needs lock
    pub const NEEDS_LOCK: &str = "svn:needs-lock";

    /// Auto-props applied by clients on add
    pub const AUTO_PROPS: &str = "svn:auto-props";

    /// Externals definitions
    pub const EXTERNALS: &str = "svn:externals";

    /// Value for flag-like properties
    pub const FLAG_VALUE: &str = "*";

    /// Entry pseudo-properties sent with report entries
    pub const ENTRY_COMMITTED_REV: &str = "svn:entry:committed-rev";
    pub const ENTRY_COMMITTED_DATE: &str = "svn:entry:committed-date";
    pub const ENTRY_LAST_AUTHOR: &str = "svn:entry:last-author";
    pub const ENTRY_UUID: &str = "svn:entry:uuid";
}

/// One name-pattern rule contributing file properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrRule {
    pub pattern: String,
    pub props: Vec<(String, String)>,
}

/// Parsed content of one property dotfile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropSource {
    /// Ignore patterns applying to the directory holding the dotfile
    Ignore(Vec<String>),
    /// Attribute rules applying to files below the dotfile's directory
    Attributes(Vec<AttrRule>),
}

/// Dotfiles recognised by the pipeline.
pub fn is_property_file(file_name: &str) -> bool {
    file_name == ".gitignore" || file_name == ".gitattributes"
}

/// Parse one recognised dotfile; unknown names produce nothing.
pub fn parse_property_file(file_name: &str, content: &str) -> Vec<PropSource> {
    match file_name {
        ".gitignore" => {
            let patterns = parse_ignore(content);
            if patterns.is_empty() {
                Vec::new()
            } else {
                vec![PropSource::Ignore(patterns)]
            }
        }
        ".gitattributes" => {
            let rules = parse_attributes(content);
            if rules.is_empty() {
                Vec::new()
            } else {
                vec![PropSource::Attributes(rules)]
            }
        }
        _ => Vec::new(),
    }
}

/// Local (non-recursive) ignore patterns.
fn parse_ignore(content: &str) -> Vec<String> {
    let mut patterns = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        // Patterns containing a slash anchor below this directory; only the
        // directly-contained form maps onto svn:ignore.
        let pattern = line.trim_start_matches('/');
        if pattern.contains('/') {
            continue;
        }
        patterns.push(pattern.to_string());
    }
    patterns
}

/// Attribute lines: `pattern attr attr=value ...`.
fn parse_attributes(content: &str) -> Vec<AttrRule> {
    let mut rules = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let Some(pattern) = parts.next() else { continue };
        let mut props = Vec::new();
        for attr in parts {
            match attr.split_once('=') {
                Some(("eol", "lf")) => {
                    props.push((names::EOL_STYLE.to_string(), "LF".to_string()))
                }
                Some(("eol", "crlf")) => {
                    props.push((names::EOL_STYLE.to_string(), "CRLF".to_string()))
                }
                Some(("mime-type", value)) => {
                    props.push((names::MIME_TYPE.to_string(), value.to_string()))
                }
                None if attr == "text" => {
                    props.push((names::EOL_STYLE.to_string(), "native".to_string()))
                }
                None if attr == "binary" || attr == "-text" => {
                    props.push((
                        names::MIME_TYPE.to_string(),
                        "application/octet-stream".to_string(),
                    ))
                }
                None if attr == "lockable" => {
                    props.push((names::NEEDS_LOCK.to_string(), names::FLAG_VALUE.to_string()))
                }
                _ => {}
            }
        }
        if !props.is_empty() {
            rules.push(AttrRule {
                pattern: pattern.to_string(),
                props,
            });
        }
    }
    rules
}

/// Shell-style name match supporting `*` and `?`.
pub fn match_pattern(pattern: &str, name: &str) -> bool {
    fn matches(p: &[u8], n: &[u8]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                matches(&p[1..], n) || (!n.is_empty() && matches(p, &n[1..]))
            }
            (Some(b'?'), Some(_)) => matches(&p[1..], &n[1..]),
            (Some(a), Some(b)) if a == b => matches(&p[1..], &n[1..]),
            _ => false,
        }
    }
    matches(pattern.as_bytes(), name.as_bytes())
}

/// File properties contributed by attribute rules along a directory chain,
/// ordered root-first; later matches override earlier ones.
pub fn file_props_from_chain(
    chain: &[std::sync::Arc<Vec<PropSource>>],
    file_name: &str,
) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::new();
    for sources in chain {
        for source in sources.iter() {
            if let PropSource::Attributes(rules) = source {
                for rule in rules {
                    if match_pattern(&rule.pattern, file_name) {
                        for (name, value) in &rule.props {
                            out.retain(|(n, _)| n != name);
                            out.push((name.clone(), value.clone()));
                        }
                    }
                }
            }
        }
    }
    out
}

/// Directory properties from the directory's own dotfiles.
pub fn dir_props_from_sources(sources: &[PropSource]) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut ignores = Vec::new();
    let mut auto_props = Vec::new();
    for source in sources {
        match source {
            PropSource::Ignore(patterns) => ignores.extend(patterns.iter().cloned()),
            PropSource::Attributes(rules) => {
                for rule in rules {
                    let values: Vec<String> = rule
                        .props
                        .iter()
                        .map(|(n, v)| format!("{n}={v}"))
                        .collect();
                    auto_props.push(format!("{} = {}", rule.pattern, values.join(";")));
                }
            }
        }
    }
    if !ignores.is_empty() {
        out.push((names::IGNORE.to_string(), ignores.join("\n") + "\n"));
    }
    if !auto_props.is_empty() {
        out.push((names::AUTO_PROPS.to_string(), auto_props.join("\n") + "\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_parse_ignore_skips_comments_and_nested() {
        let sources = parse_property_file(".gitignore", "# c\n*.o\nbuild/\nsub/dir\n");
        assert_eq!(
            sources,
            vec![PropSource::Ignore(vec!["*.o".to_string(), "build".to_string()])]
        );
    }

    #[test]
    fn test_parse_attributes() {
        let sources =
            parse_property_file(".gitattributes", "*.txt eol=lf\n*.bin binary lockable\n");
        let PropSource::Attributes(rules) = &sources[0] else {
            panic!("expected attributes");
        };
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].props, vec![(names::EOL_STYLE.to_string(), "LF".to_string())]);
        assert_eq!(
            rules[1].props,
            vec![
                (names::MIME_TYPE.to_string(), "application/octet-stream".to_string()),
                (names::NEEDS_LOCK.to_string(), "*".to_string()),
            ]
        );
    }

    #[test]
    fn test_unknown_file_produces_nothing() {
        assert!(parse_property_file("README", "*.o\n").is_empty());
    }

    #[test]
    fn test_match_pattern() {
        assert!(match_pattern("*.txt", "a.txt"));
        assert!(match_pattern("a?c", "abc"));
        assert!(match_pattern("*", ""));
        assert!(!match_pattern("*.txt", "a.txt.bak"));
    }

    #[test]
    fn test_chain_override_nearest_wins() {
        let root = Arc::new(vec![PropSource::Attributes(vec![AttrRule {
            pattern: "*.txt".to_string(),
            props: vec![(names::EOL_STYLE.to_string(), "native".to_string())],
        }])]);
        let sub = Arc::new(vec![PropSource::Attributes(vec![AttrRule {
            pattern: "*.txt".to_string(),
            props: vec![(names::EOL_STYLE.to_string(), "LF".to_string())],
        }])]);
        let props = file_props_from_chain(&[root, sub], "note.txt");
        assert_eq!(props, vec![(names::EOL_STYLE.to_string(), "LF".to_string())]);
    }

    #[test]
    fn test_dir_props() {
        let sources = vec![
            PropSource::Ignore(vec!["*.o".to_string()]),
            PropSource::Attributes(vec![AttrRule {
                pattern: "*.txt".to_string(),
                props: vec![(names::EOL_STYLE.to_string(), "LF".to_string())],
            }]),
        ];
        let props = dir_props_from_sources(&sources);
        assert_eq!(props[0], (names::IGNORE.to_string(), "*.o\n".to_string()));
        assert_eq!(
            props[1],
            (
                names::AUTO_PROPS.to_string(),
                "*.txt = svn:eol-style=LF\n".to_string()
            )
        );
    }
}
