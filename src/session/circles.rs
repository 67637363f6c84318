//! Circle authorization for circle-scoped queries

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use url::form_urlencoded;

/// Query parameter carrying the requested circle ids as a JSON array
pub const CIRCLES_PARAM: &str = "circles";

/// Circle identifier as issued by the content backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CircleId {
    Number(i64),
    Text(String),
}

impl CircleId {
    /// Comparison key; `1` and `"1"` name the same circle
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CircleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircleId::Number(n) => write!(f, "{}", n),
            CircleId::Text(s) => f.write_str(s),
        }
    }
}

/// A circle the user belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Circle {
    pub name: String,
    pub id: CircleId,
}

/// Compares requested circle ids against the circles of a session
#[derive(Debug, Clone, Default)]
pub struct CircleAuthorizationFilter {
    authorized: HashSet<String>,
}

impl CircleAuthorizationFilter {
    pub fn new(circles: &[Circle]) -> Self {
        Self {
            authorized: circles.iter().map(|c| c.id.key()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.authorized.is_empty()
    }

    pub fn is_authorized(&self, requested: &Value) -> bool {
        let key = match requested {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            _ => return false,
        };
        self.authorized.contains(&key)
    }

    /// Narrow a requested `circles` value to the authorized subset
    ///
    /// Returns `None` when every requested id is authorized. A value that is
    /// not a JSON array narrows to the empty list.
    pub fn narrow(&self, requested: &str) -> Option<Vec<Value>> {
        let requested: Vec<Value> = match serde_json::from_str(requested) {
            Ok(Value::Array(items)) => items,
            _ => return Some(Vec::new()),
        };

        let valid: Vec<Value> = requested
            .iter()
            .filter(|id| self.is_authorized(id))
            .cloned()
            .collect();

        if valid.len() == requested.len() {
            None
        } else {
            Some(valid)
        }
    }
}

/// First `circles` parameter of a raw query string
pub fn requested_circles(query: Option<&str>) -> Option<String> {
    let query = query?;
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == CIRCLES_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// Rewrite `query` with `circles` set to `valid`, keeping every other parameter
pub fn rewrite_circles_query(query: &str, valid: &[Value]) -> String {
    let circles = Value::Array(valid.to_vec()).to_string();
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    let mut replaced = false;

    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        if key == CIRCLES_PARAM {
            if !replaced {
                serializer.append_pair(CIRCLES_PARAM, &circles);
                replaced = true;
            }
        } else {
            serializer.append_pair(&key, &value);
        }
    }

    if !replaced {
        serializer.append_pair(CIRCLES_PARAM, &circles);
    }

    serializer.finish()
}
