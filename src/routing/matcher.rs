//! Path pattern matching.
//!
//! # Responsibilities
//! - Compile upstream path patterns into segments
//! - Match request paths and capture wildcard values
//! - Rank patterns by specificity and detect overlapping patterns
//! - Render downstream path templates from captures
//!
//! # Design Decisions
//! - Paths are compared segment by segment; repeated and trailing `/` are ignored
//! - Path matching is case-sensitive
//! - No regex to guarantee O(n) matching

use std::cmp::Ordering;

use thiserror::Error;

/// Error raised while compiling a pattern or template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("pattern `{0}` must start with '/'")]
    MissingLeadingSlash(String),

    #[error("catch-all must be the last segment in `{0}`")]
    CatchAllNotLast(String),

    #[error("empty placeholder name in `{0}`")]
    EmptyPlaceholder(String),

    #[error("placeholder `{name}` appears twice in `{pattern}`")]
    DuplicatePlaceholder { pattern: String, name: String },

    #[error("unterminated placeholder in `{0}`")]
    Unterminated(String),
}

/// One compiled segment of an upstream pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Must equal the request segment exactly.
    Literal(String),
    /// Matches exactly one segment (`*` or `{name}`).
    Param(String),
    /// Matches zero or more trailing segments (`{*name}`).
    CatchAll(String),
}

impl Segment {
    fn is_wildcard(&self) -> bool {
        !matches!(self, Segment::Literal(_))
    }
}

/// Values captured by wildcard segments, in pattern order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captures(Vec<(String, String)>);

impl Captures {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Specificity rank of a pattern. Smaller is more specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Specificity {
    /// Number of wildcard segments (a catch-all counts as one).
    pub wildcards: usize,
    /// Byte length of the leading literal segments, slashes included.
    pub literal_prefix: usize,
}

impl Ord for Specificity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.wildcards
            .cmp(&other.wildcards)
            .then_with(|| other.literal_prefix.cmp(&self.literal_prefix))
    }
}

impl PartialOrd for Specificity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Split a request path into its non-empty segments.
pub fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Normalize a request path: collapse repeated slashes, drop a trailing slash.
pub fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len() + 1);
    for segment in split_path(path) {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}

/// A compiled upstream path pattern.
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Compile a pattern such as `/users/{id}`, `/users/*` or `/files/{*path}`.
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        if !raw.starts_with('/') {
            return Err(PatternError::MissingLeadingSlash(raw.to_string()));
        }

        let parts: Vec<&str> = split_path(raw).collect();
        let mut segments = Vec::with_capacity(parts.len());
        let mut anonymous = 0usize;

        for (i, part) in parts.iter().enumerate() {
            let segment = if *part == "*" {
                let name = anonymous.to_string();
                anonymous += 1;
                Segment::Param(name)
            } else if let Some(inner) = part.strip_prefix('{') {
                let inner = inner
                    .strip_suffix('}')
                    .ok_or_else(|| PatternError::Unterminated(raw.to_string()))?;
                if let Some(name) = inner.strip_prefix('*') {
                    if i + 1 != parts.len() {
                        return Err(PatternError::CatchAllNotLast(raw.to_string()));
                    }
                    if name.is_empty() {
                        return Err(PatternError::EmptyPlaceholder(raw.to_string()));
                    }
                    Segment::CatchAll(name.to_string())
                } else {
                    if inner.is_empty() {
                        return Err(PatternError::EmptyPlaceholder(raw.to_string()));
                    }
                    Segment::Param(inner.to_string())
                }
            } else {
                Segment::Literal(part.to_string())
            };

            if let Some(name) = segment_name(&segment) {
                if segments.iter().any(|s| segment_name(s) == Some(name)) {
                    return Err(PatternError::DuplicatePlaceholder {
                        pattern: raw.to_string(),
                        name: name.to_string(),
                    });
                }
            }
            segments.push(segment);
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Names of all placeholders this pattern captures.
    pub fn capture_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(segment_name)
    }

    /// Match a request path, returning the captured wildcard values.
    pub fn matches(&self, path: &str) -> Option<Captures> {
        let parts: Vec<&str> = split_path(path).collect();
        let mut captures = Vec::new();
        let mut idx = 0;

        for segment in &self.segments {
            match segment {
                Segment::Literal(lit) => {
                    if parts.get(idx) != Some(&lit.as_str()) {
                        return None;
                    }
                    idx += 1;
                }
                Segment::Param(name) => {
                    let value = parts.get(idx)?;
                    captures.push((name.clone(), (*value).to_string()));
                    idx += 1;
                }
                Segment::CatchAll(name) => {
                    captures.push((name.clone(), parts[idx.min(parts.len())..].join("/")));
                    return Some(Captures(captures));
                }
            }
        }

        (idx == parts.len()).then_some(Captures(captures))
    }

    pub fn specificity(&self) -> Specificity {
        let wildcards = self.segments.iter().filter(|s| s.is_wildcard()).count();
        let literal_prefix = self
            .segments
            .iter()
            .map_while(|s| match s {
                Segment::Literal(lit) => Some(lit.len() + 1),
                _ => None,
            })
            .sum();
        Specificity {
            wildcards,
            literal_prefix,
        }
    }

    /// True if at least one path matches both patterns.
    pub fn overlaps(&self, other: &PathPattern) -> bool {
        segments_overlap(&self.segments, &other.segments)
    }
}

fn segment_name(segment: &Segment) -> Option<&str> {
    match segment {
        Segment::Literal(_) => None,
        Segment::Param(name) | Segment::CatchAll(name) => Some(name),
    }
}

fn segments_overlap(a: &[Segment], b: &[Segment]) -> bool {
    match (a.first(), b.first()) {
        (None, None) => true,
        (Some(Segment::CatchAll(_)), _) | (_, Some(Segment::CatchAll(_))) => true,
        (None, Some(_)) | (Some(_), None) => false,
        (Some(x), Some(y)) => {
            let compatible = match (x, y) {
                (Segment::Literal(l), Segment::Literal(r)) => l == r,
                _ => true,
            };
            compatible && segments_overlap(&a[1..], &b[1..])
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplatePart {
    Literal(String),
    Placeholder(String),
}

/// A downstream path template such as `/api/users/{id}`.
#[derive(Debug, Clone)]
pub struct PathTemplate {
    raw: String,
    parts: Vec<TemplatePart>,
}

impl PathTemplate {
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        if !raw.starts_with('/') {
            return Err(PatternError::MissingLeadingSlash(raw.to_string()));
        }

        let mut parts = Vec::new();
        let mut rest = raw;
        while let Some(start) = rest.find('{') {
            if start > 0 {
                parts.push(TemplatePart::Literal(rest[..start].to_string()));
            }
            let end = rest[start..]
                .find('}')
                .ok_or_else(|| PatternError::Unterminated(raw.to_string()))?;
            let name = rest[start + 1..start + end].trim_start_matches('*');
            if name.is_empty() {
                return Err(PatternError::EmptyPlaceholder(raw.to_string()));
            }
            parts.push(TemplatePart::Placeholder(name.to_string()));
            rest = &rest[start + end + 1..];
        }
        if !rest.is_empty() {
            parts.push(TemplatePart::Literal(rest.to_string()));
        }

        Ok(Self {
            raw: raw.to_string(),
            parts,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|p| match p {
            TemplatePart::Placeholder(name) => Some(name.as_str()),
            TemplatePart::Literal(_) => None,
        })
    }

    /// Substitute captures into the template. Unknown placeholders render empty.
    pub fn render(&self, captures: &Captures) -> String {
        let mut out = String::with_capacity(self.raw.len());
        for part in &self.parts {
            match part {
                TemplatePart::Literal(lit) => out.push_str(lit),
                TemplatePart::Placeholder(name) => {
                    out.push_str(captures.get(name).unwrap_or_default())
                }
            }
        }

        // An empty catch-all leaves `//` or a dangling slash behind.
        let trailing = out.len() > 1 && out.ends_with('/') && self.raw.ends_with('/');
        let mut rendered = normalize_path(&out);
        if trailing && rendered != "/" {
            rendered.push('/');
        }
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_and_param_matching() {
        let pattern = PathPattern::parse("/users/{id}").unwrap();

        let caps = pattern.matches("/users/42").unwrap();
        assert_eq!(caps.get("id"), Some("42"));

        assert!(pattern.matches("/users").is_none());
        assert!(pattern.matches("/users/42/posts").is_none());
        assert!(pattern.matches("/Users/42").is_none()); // Case sensitive
    }

    #[test]
    fn test_anonymous_wildcards_are_positional() {
        let pattern = PathPattern::parse("/users/*/posts/*").unwrap();
        let caps = pattern.matches("/users/7/posts/9").unwrap();
        assert_eq!(caps.get("0"), Some("7"));
        assert_eq!(caps.get("1"), Some("9"));
    }

    #[test]
    fn test_catch_all() {
        let pattern = PathPattern::parse("/static/{*rest}").unwrap();
        assert_eq!(
            pattern.matches("/static/css/site.css").unwrap().get("rest"),
            Some("css/site.css")
        );
        assert_eq!(pattern.matches("/static").unwrap().get("rest"), Some(""));
        assert!(pattern.matches("/other").is_none());
    }

    #[test]
    fn test_trailing_and_repeated_slashes_ignored() {
        let pattern = PathPattern::parse("/api/values").unwrap();
        assert!(pattern.matches("/api/values/").is_some());
        assert!(pattern.matches("//api//values").is_some());
        assert_eq!(normalize_path("//api//values/"), "/api/values");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn test_root_pattern() {
        let pattern = PathPattern::parse("/").unwrap();
        assert!(pattern.matches("/").is_some());
        assert!(pattern.matches("/x").is_none());
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            PathPattern::parse("users").unwrap_err(),
            PatternError::MissingLeadingSlash("users".into())
        );
        assert!(matches!(
            PathPattern::parse("/{*rest}/tail"),
            Err(PatternError::CatchAllNotLast(_))
        ));
        assert!(matches!(
            PathPattern::parse("/{}"),
            Err(PatternError::EmptyPlaceholder(_))
        ));
        assert!(matches!(
            PathPattern::parse("/{id}/{id}"),
            Err(PatternError::DuplicatePlaceholder { .. })
        ));
        assert!(matches!(
            PathPattern::parse("/{id"),
            Err(PatternError::Unterminated(_))
        ));
    }

    #[test]
    fn test_specificity_ordering() {
        let exact = PathPattern::parse("/users/me").unwrap().specificity();
        let param = PathPattern::parse("/users/{id}").unwrap().specificity();
        let catch_all = PathPattern::parse("/{*rest}").unwrap().specificity();
        let deep = PathPattern::parse("/a/b/{x}").unwrap().specificity();
        let shallow = PathPattern::parse("/a/{x}/c").unwrap().specificity();

        assert!(exact < param);
        assert!(param < catch_all);
        assert!(deep < shallow); // Longer literal prefix wins
    }

    #[test]
    fn test_overlap_detection() {
        let p = |s: &str| PathPattern::parse(s).unwrap();

        assert!(p("/users/{id}").overlaps(&p("/users/*")));
        assert!(p("/users/{id}").overlaps(&p("/users/me")));
        assert!(p("/a/{x}").overlaps(&p("/{y}/b")));
        assert!(p("/{*all}").overlaps(&p("/anything/at/all")));
        assert!(!p("/users/{id}").overlaps(&p("/orders/{id}")));
        assert!(!p("/a/{x}").overlaps(&p("/a/{x}/c")));
    }

    #[test]
    fn test_template_render() {
        let pattern = PathPattern::parse("/users/{id}/files/{*path}").unwrap();
        let caps = pattern.matches("/users/5/files/a/b.txt").unwrap();

        let template = PathTemplate::parse("/api/v1/users/{id}/{path}").unwrap();
        assert_eq!(template.render(&caps), "/api/v1/users/5/a/b.txt");
        assert_eq!(
            template.placeholders().collect::<Vec<_>>(),
            vec!["id", "path"]
        );

        let star = PathTemplate::parse("/files/{*path}").unwrap();
        assert_eq!(star.render(&caps), "/files/a/b.txt");
    }

    #[test]
    fn test_template_with_empty_catch_all() {
        let pattern = PathPattern::parse("/static/{*rest}").unwrap();
        let caps = pattern.matches("/static").unwrap();

        let template = PathTemplate::parse("/assets/{rest}").unwrap();
        assert_eq!(template.render(&caps), "/assets");

        let root = PathTemplate::parse("/{rest}").unwrap();
        assert_eq!(root.render(&caps), "/");
    }
}
