//! Core types shared across the sync layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identifier of the thing a stream is scoped to (project, attempt, process...).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(Arc<str>);

impl TargetId {
    pub fn new(id: impl AsRef<str>) -> Self {
        TargetId(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TargetId({})", self.0)
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetId {
    fn from(s: &str) -> Self {
        TargetId::new(s)
    }
}

impl From<String> for TargetId {
    fn from(s: String) -> Self {
        TargetId(Arc::from(s))
    }
}

/// Monotonic epoch counter.
///
/// Every session, connection attempt and timer is tagged with the generation
/// that created it. Work tagged with an older generation is a no-op.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(pub u64);

impl Generation {
    pub fn next(self) -> Self {
        Generation(self.0 + 1)
    }
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Gen({})", self.0)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of a push endpoint: a path plus query parameters.
///
/// `query` holds raw values; they are percent-encoded when the endpoint
/// is rendered. `path` is used as given.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl Endpoint {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
        }
    }

    /// Expand a template such as `/streams/tasks/{target}`.
    ///
    /// The target is percent-encoded into the path. A template without
    /// the placeholder gets it as a `target` query parameter instead.
    pub fn from_template(template: &str, target: &TargetId) -> Self {
        if template.contains("{target}") {
            let segment = urlencoding::encode(target.as_str());
            Self::new(template.replace("{target}", &segment))
        } else {
            Self::new(template).with_param("target", target.as_str())
        }
    }

    /// Add a query parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Look up a query parameter.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Endpoint({})", self)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)?;
        for (i, (k, v)) in self.query.iter().enumerate() {
            let sep = if i == 0 && !self.path.contains('?') { '?' } else { '&' };
            write!(f, "{}{}={}", sep, urlencoding::encode(k), urlencoding::encode(v))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_template() {
        let target = TargetId::new("proj-1");
        let ep = Endpoint::from_template("/streams/tasks/{target}", &target);
        assert_eq!(ep.to_string(), "/streams/tasks/proj-1");

        let ep = Endpoint::from_template("/streams/feed", &target).with_param("scope", "all");
        assert_eq!(ep.to_string(), "/streams/feed?target=proj-1&scope=all");
        assert_eq!(ep.param("scope"), Some("all"));
    }

    #[test]
    fn test_endpoint_existing_query() {
        let ep = Endpoint::new("/ws?x=1").with_param("scope", "mine");
        assert_eq!(ep.to_string(), "/ws?x=1&scope=mine");
    }

    #[test]
    fn test_endpoint_encodes_reserved_characters() {
        let target = TargetId::new("team a/b");
        let ep = Endpoint::from_template("/streams/logs/{target}", &target);
        assert_eq!(ep.path, "/streams/logs/team%20a%2Fb");

        let ep = Endpoint::from_template("/streams/feed", &TargetId::new("x&y"))
            .with_param("scope", "a=b?c d");
        assert_eq!(ep.to_string(), "/streams/feed?target=x%26y&scope=a%3Db%3Fc%20d");
        assert_eq!(ep.param("scope"), Some("a=b?c d"));
    }

    #[test]
    fn test_target_id_serializes_as_string() {
        let id = TargetId::new("proj-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"proj-1\"");
        let back: TargetId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_generation_next() {
        let g = Generation::default();
        assert_eq!(g.next(), Generation(1));
        assert!(g.next() > g);
    }
}
