use std::collections::HashMap;
use std::fmt;

use super::error::StorageError;

const FORBIDDEN_KEY_CHARS: &[char] = &['/', '.', '#', '$', '[', ']'];

/// Returns true if `key` can be used as a single path segment.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key
            .chars()
            .any(|c| c.is_control() || FORBIDDEN_KEY_CHARS.contains(&c))
}

/// Location of a node in the hierarchical store, e.g. `/boards/Sales/tasks`.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DbPath(Vec<String>);

impl DbPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn parse(input: &str) -> Result<Self, StorageError> {
        let mut segments = Vec::new();
        for key in input.split('/').filter(|s| !s.is_empty()) {
            if !is_valid_key(key) {
                return Err(StorageError::InvalidKey(key.to_string()));
            }
            segments.push(key.to_string());
        }
        Ok(Self(segments))
    }

    /// Callers validate user supplied keys with [`is_valid_key`] first.
    pub fn child(&self, key: &str) -> DbPath {
        debug_assert!(is_valid_key(key), "invalid path key '{}'", key);
        let mut segments = self.0.clone();
        segments.push(key.to_string());
        Self(segments)
    }

    /// The root is its own parent.
    pub fn parent(&self) -> DbPath {
        let mut segments = self.0.clone();
        segments.pop();
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn truncate(&self, depth: usize) -> DbPath {
        Self(self.0.iter().take(depth).cloned().collect())
    }
}

impl fmt::Display for DbPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        for key in self.0.iter() {
            write!(f, "/{}", key)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Wildcard(String),
}

/// A path with `{name}` wildcard segments, e.g. `/boards/{board}/tasks/{task}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathPattern(Vec<Segment>);

impl PathPattern {
    pub fn parse(input: &str) -> Result<Self, StorageError> {
        let mut segments = Vec::new();
        for raw in input.split('/').filter(|s| !s.is_empty()) {
            let segment = match raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) if !name.is_empty() => Segment::Wildcard(name.to_string()),
                Some(_) => return Err(StorageError::InvalidKey(raw.to_string())),
                None if is_valid_key(raw) => Segment::Literal(raw.to_string()),
                None => return Err(StorageError::InvalidKey(raw.to_string())),
            };
            segments.push(segment);
        }
        Ok(Self(segments))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Matches a path of exactly the pattern's depth, returning the wildcard values.
    pub fn matches(&self, path: &DbPath) -> Option<HashMap<String, String>> {
        if path.len() != self.len() {
            return None;
        }
        let mut params = HashMap::new();
        for (segment, key) in self.0.iter().zip(path.segments()) {
            match segment {
                Segment::Literal(literal) if literal == key => {}
                Segment::Literal(_) => return None,
                Segment::Wildcard(name) => {
                    params.insert(name.clone(), key.clone());
                }
            }
        }
        Some(params)
    }

    /// True if `path` could be an ancestor of (or equal to) a matching path.
    pub fn matches_prefix(&self, path: &DbPath) -> bool {
        path.len() <= self.len()
            && self
                .0
                .iter()
                .zip(path.segments())
                .all(|(segment, key)| match segment {
                    Segment::Literal(literal) => literal == key,
                    Segment::Wildcard(_) => true,
                })
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in self.0.iter() {
            match segment {
                Segment::Literal(literal) => write!(f, "/{}", literal)?,
                Segment::Wildcard(name) => write!(f, "/{{{}}}", name)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_navigation() {
        let path = DbPath::parse("/boards/Sales/tasks/").unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path.to_string(), "/boards/Sales/tasks");
        assert_eq!(path.segments().last().map(String::as_str), Some("tasks"));

        let counter = path.parent().child("num_tasks");
        assert_eq!(counter.to_string(), "/boards/Sales/num_tasks");
        assert_eq!(DbPath::root().parent(), DbPath::root());
        assert_eq!(DbPath::root().to_string(), "/");
        assert_eq!(path.truncate(1).to_string(), "/boards");
    }

    #[test]
    fn test_invalid_keys() {
        assert!(is_valid_key("R&D"));
        assert!(is_valid_key("-MzX1a_b"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("a.b"));
        assert!(!is_valid_key("a$"));
        assert!(!is_valid_key("[0]"));
        assert!(matches!(
            DbPath::parse("/boards/a#b"),
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_pattern_matching() {
        let pattern = PathPattern::parse("/boards/{board}/tasks/{task}").unwrap();
        assert_eq!(pattern.to_string(), "/boards/{board}/tasks/{task}");

        let params = pattern
            .matches(&DbPath::parse("/boards/R&D/tasks/abc").unwrap())
            .unwrap();
        assert_eq!(params["board"], "R&D");
        assert_eq!(params["task"], "abc");

        assert!(pattern
            .matches(&DbPath::parse("/boards/R&D/num_tasks").unwrap())
            .is_none());
        assert!(pattern
            .matches(&DbPath::parse("/boards/R&D/tasks/abc/title").unwrap())
            .is_none());

        assert!(pattern.matches_prefix(&DbPath::parse("/boards/Sales").unwrap()));
        assert!(pattern.matches_prefix(&DbPath::root()));
        assert!(!pattern.matches_prefix(&DbPath::parse("/users").unwrap()));
        assert!(!pattern.matches_prefix(&DbPath::parse("/boards/Sales/num_tasks").unwrap()));
    }
}
