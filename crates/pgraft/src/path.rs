//! Relation paths and the allowed-relations expression.
//!
//! A [`RelationPath`] names a chain of relations from the literal root
//! (e.g. `children.pets`). A [`RelationExpression`] is the caller-supplied
//! allow-list, written in dot/bracket notation:
//!
//! - `pets` — one relation
//! - `[pets, children]` — two sibling relations
//! - `children.[pets, movies]` — nested relations under `children`
//!
//! An expression covers a path when the path is equal to, or a prefix of,
//! one of the paths the expression spells out. Allowing `children.pets`
//! therefore also allows `children`.

use crate::error::{GraftError, GraftResult};
use std::iter::Peekable;
use std::str::Chars;

/// A dot-separated chain of relation names, rooted at the literal root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RelationPath {
    segments: Vec<String>,
}

impl RelationPath {
    /// The empty path (the literal root itself).
    pub fn root() -> Self {
        Self::default()
    }

    /// Extend this path with one more relation name.
    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self { segments }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// True if `self` is a prefix of `other` (or equal to it).
    pub fn is_prefix_of(&self, other: &RelationPath) -> bool {
        other.segments.len() >= self.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }
}

impl std::fmt::Display for RelationPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

/// A parsed allowed-relations expression.
///
/// Internally the expression is flattened into the full paths it spells out;
/// coverage checks then reduce to prefix tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationExpression {
    paths: Vec<RelationPath>,
}

impl RelationExpression {
    /// Parse a dot/bracket expression such as `[pets, children.movies]`.
    ///
    /// Whitespace is insignificant. An empty list `[]` parses and covers no
    /// relation at all; an empty string is an error.
    pub fn parse(input: &str) -> GraftResult<Self> {
        let mut parser = Parser {
            chars: input.chars().peekable(),
        };
        let mut paths = Vec::new();

        parser.skip_ws();
        if parser.chars.peek().is_none() {
            return Err(GraftError::expression("empty expression"));
        }
        if parser.chars.peek() == Some(&'[') {
            parser.parse_list(&RelationPath::root(), &mut paths)?;
        } else {
            parser.parse_item(&RelationPath::root(), &mut paths)?;
        }
        parser.skip_ws();
        if let Some(c) = parser.chars.next() {
            return Err(GraftError::expression(format!(
                "unexpected character '{c}' after expression"
            )));
        }

        Ok(Self { paths })
    }

    /// The full paths the expression enumerates.
    pub fn paths(&self) -> &[RelationPath] {
        &self.paths
    }

    /// True if the expression permits the given present path.
    ///
    /// The root path is always covered. A non-root path is covered when it is
    /// equal to, or a proper prefix of, one of the expression's paths.
    pub fn covers(&self, path: &RelationPath) -> bool {
        path.is_root() || self.paths.iter().any(|allowed| path.is_prefix_of(allowed))
    }
}

struct Parser<'a> {
    chars: Peekable<Chars<'a>>,
}

impl Parser<'_> {
    fn skip_ws(&mut self) {
        while matches!(self.chars.peek(), Some(c) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    /// `[` item (`,` item)* `]`, every item extending `prefix`.
    fn parse_list(
        &mut self,
        prefix: &RelationPath,
        out: &mut Vec<RelationPath>,
    ) -> GraftResult<()> {
        self.chars.next(); // opening '['
        self.skip_ws();
        if self.chars.peek() == Some(&']') {
            self.chars.next();
            return Ok(());
        }
        loop {
            self.parse_item(prefix, out)?;
            self.skip_ws();
            match self.chars.next() {
                Some(',') => self.skip_ws(),
                Some(']') => return Ok(()),
                Some(c) => {
                    return Err(GraftError::expression(format!(
                        "expected ',' or ']', got '{c}'"
                    )));
                }
                None => return Err(GraftError::expression("unclosed '['")),
            }
        }
    }

    /// name (`.` name)* optionally ending in `.` `[` list `]`.
    fn parse_item(
        &mut self,
        prefix: &RelationPath,
        out: &mut Vec<RelationPath>,
    ) -> GraftResult<()> {
        let mut path = prefix.child(&self.parse_name()?);
        loop {
            self.skip_ws();
            if self.chars.peek() != Some(&'.') {
                break;
            }
            self.chars.next();
            self.skip_ws();
            if self.chars.peek() == Some(&'[') {
                // A nested list terminates the item: `a.[b, c]`.
                return self.parse_list(&path, out);
            }
            path = path.child(&self.parse_name()?);
        }
        out.push(path);
        Ok(())
    }

    fn parse_name(&mut self) -> GraftResult<String> {
        let mut name = String::new();
        while let Some(&c) = self.chars.peek() {
            if name.is_empty() {
                if c == '_' || c.is_ascii_alphabetic() {
                    name.push(c);
                    self.chars.next();
                } else {
                    return Err(GraftError::expression(format!(
                        "invalid relation name start character: '{c}'"
                    )));
                }
            } else if c == '_' || c.is_ascii_alphanumeric() {
                name.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        if name.is_empty() {
            return Err(GraftError::expression("expected a relation name"));
        }
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> RelationPath {
        let mut p = RelationPath::root();
        for seg in s.split('.').filter(|s| !s.is_empty()) {
            p = p.child(seg);
        }
        p
    }

    #[test]
    fn parse_single_name() {
        let expr = RelationExpression::parse("pets").unwrap();
        assert_eq!(expr.paths(), &[path("pets")]);
    }

    #[test]
    fn parse_dotted_chain() {
        let expr = RelationExpression::parse("children.pets").unwrap();
        assert_eq!(expr.paths(), &[path("children.pets")]);
    }

    #[test]
    fn parse_bracket_list() {
        let expr = RelationExpression::parse("[pets, children]").unwrap();
        assert_eq!(expr.paths(), &[path("pets"), path("children")]);
    }

    #[test]
    fn parse_nested_list() {
        let expr = RelationExpression::parse("children.[pets, movies.actors]").unwrap();
        assert_eq!(
            expr.paths(),
            &[path("children.pets"), path("children.movies.actors")]
        );
    }

    #[test]
    fn parse_ignores_whitespace() {
        let a = RelationExpression::parse("[ pets , children.movies ]").unwrap();
        let b = RelationExpression::parse("[pets,children.movies]").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn parse_empty_list_covers_nothing() {
        let expr = RelationExpression::parse("[]").unwrap();
        assert!(expr.covers(&RelationPath::root()));
        assert!(!expr.covers(&path("pets")));
    }

    #[test]
    fn parse_rejects_empty_string() {
        assert!(RelationExpression::parse("").is_err());
        assert!(RelationExpression::parse("   ").is_err());
    }

    #[test]
    fn parse_rejects_unclosed_bracket() {
        assert!(RelationExpression::parse("[pets, children").is_err());
    }

    #[test]
    fn parse_rejects_trailing_garbage() {
        assert!(RelationExpression::parse("[pets] x").is_err());
    }

    #[test]
    fn parse_rejects_wildcard() {
        assert!(RelationExpression::parse("*").is_err());
        assert!(RelationExpression::parse("a.*").is_err());
    }

    #[test]
    fn covers_prefix_of_allowed_path() {
        let expr = RelationExpression::parse("[rel1.rel3, rel2]").unwrap();
        assert!(expr.covers(&path("rel1")));
        assert!(expr.covers(&path("rel1.rel3")));
        assert!(expr.covers(&path("rel2")));
        assert!(!expr.covers(&path("rel3")));
        assert!(!expr.covers(&path("rel1.rel3.rel4")));
    }

    #[test]
    fn covers_does_not_extend_past_allowed() {
        // Allowing [rel1, rel2] does not allow rel1.rel3.
        let expr = RelationExpression::parse("[rel1, rel2]").unwrap();
        assert!(expr.covers(&path("rel1")));
        assert!(!expr.covers(&path("rel1.rel3")));
    }
}
