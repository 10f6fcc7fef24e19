//! Marker grammar for graph literals.
//!
//! Three markers may appear inside a literal node:
//!
//! - `"#id": "name"` declares a symbolic id for the node.
//! - `"#ref": "name"` makes the whole node stand for the node declared with
//!   that id elsewhere in the literal.
//! - `"#dbRef": key` makes the node stand for an already-persisted row.
//!
//! Additionally, a string property of the form `#ref{name.column}` is a
//! property-level reference, replaced at insert time with the referenced
//! node's column value. When such a pattern appears embedded in a longer
//! string (or more than once), each occurrence is replaced with the value
//! rendered as text.

use crate::error::{GraftError, GraftResult};
use crate::value::Value;
use serde_json::Value as JsonValue;
use std::sync::OnceLock;

pub(crate) const ID_KEY: &str = "#id";
pub(crate) const REF_KEY: &str = "#ref";
pub(crate) const DB_REF_KEY: &str = "#dbRef";

/// A property-level reference: `#ref{target.column}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropRef {
    /// The symbolic id of the referenced node.
    pub target: String,
    /// The referenced column on that node.
    pub column: String,
}

impl PropRef {
    /// The literal marker text this reference was written as.
    pub fn token(&self) -> String {
        format!("#ref{{{}.{}}}", self.target, self.column)
    }
}

/// A string containing one or more embedded property references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefTemplate {
    /// The original string, markers included.
    pub text: String,
    /// The distinct references embedded in the string.
    pub refs: Vec<PropRef>,
}

/// Classification of a string property value.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RefParse {
    /// The whole string is exactly one reference.
    Whole(PropRef),
    /// The string embeds references amid other text.
    Template(RefTemplate),
    /// No reference markers; a plain text value.
    Plain,
}

fn prop_ref_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"#ref\{([^{}.]+)\.([^{}]+)\}").expect("invalid built-in #ref regex")
    })
}

/// Classify a string property value.
///
/// Strings containing `#ref{` that do not match the marker pattern are left
/// as plain text.
pub(crate) fn parse_ref_string(s: &str) -> RefParse {
    let re = prop_ref_re();
    let mut refs: Vec<PropRef> = Vec::new();
    let mut whole: Option<PropRef> = None;
    let mut count = 0usize;

    for caps in re.captures_iter(s) {
        count += 1;
        let m = caps.get(0).expect("match 0 always present");
        let r = PropRef {
            target: caps[1].to_string(),
            column: caps[2].to_string(),
        };
        if m.start() == 0 && m.end() == s.len() {
            whole = Some(r.clone());
        }
        if !refs.contains(&r) {
            refs.push(r);
        }
    }

    match (count, whole) {
        (0, _) => RefParse::Plain,
        (1, Some(r)) => RefParse::Whole(r),
        _ => RefParse::Template(RefTemplate {
            text: s.to_string(),
            refs,
        }),
    }
}

/// The node-level markers split off from a literal object.
#[derive(Debug)]
pub(crate) struct NodeTags<'a> {
    pub sid: Option<String>,
    pub node_ref: Option<String>,
    pub db_ref: Option<Value>,
    /// All non-marker properties, in literal order.
    pub rest: Vec<(&'a String, &'a JsonValue)>,
}

/// Split marker keys off a literal object, validating marker shapes.
pub(crate) fn split_tags(obj: &serde_json::Map<String, JsonValue>) -> GraftResult<NodeTags<'_>> {
    let mut tags = NodeTags {
        sid: None,
        node_ref: None,
        db_ref: None,
        rest: Vec::new(),
    };

    for (key, value) in obj {
        match key.as_str() {
            ID_KEY => match value.as_str() {
                Some(s) if !s.is_empty() => tags.sid = Some(s.to_string()),
                _ => {
                    return Err(GraftError::resolution(
                        "'#id' must be a non-empty string",
                    ));
                }
            },
            REF_KEY => match value.as_str() {
                Some(s) if !s.is_empty() => tags.node_ref = Some(s.to_string()),
                _ => {
                    return Err(GraftError::resolution(
                        "'#ref' must be a non-empty string",
                    ));
                }
            },
            DB_REF_KEY => match value {
                JsonValue::Number(n) if n.as_i64().is_some() => {
                    tags.db_ref = Some(Value::Int(n.as_i64().expect("checked above")));
                }
                JsonValue::String(s) if !s.is_empty() => {
                    tags.db_ref = Some(Value::Text(s.clone()));
                }
                _ => {
                    return Err(GraftError::resolution(
                        "'#dbRef' must be an integer or a string key",
                    ));
                }
            },
            _ => tags.rest.push((key, value)),
        }
    }

    if tags.node_ref.is_some() && tags.sid.is_some() {
        return Err(GraftError::resolution(
            "a node cannot carry both '#id' and '#ref'",
        ));
    }
    if tags.node_ref.is_some() && tags.db_ref.is_some() {
        return Err(GraftError::resolution(
            "a node cannot carry both '#ref' and '#dbRef'",
        ));
    }

    Ok(tags)
}
