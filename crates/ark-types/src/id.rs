use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Every resource identifier starts with this prefix. The repository root is
/// the prefix itself.
pub const ID_PREFIX: &str = "info:ark/";

/// Segment names claimed by the persistence layout and never usable in ids.
const RESERVED_SEGMENTS: [&str; 2] = [".ark", "container.nt"];

/// Hierarchical, URI-shaped resource identifier.
///
/// A resource's parent identifier is always a strict prefix of its own:
/// `info:ark/a/b` is contained by `info:ark/a`, which is contained by the
/// repository root `info:ark/`. Identifiers are immutable once assigned.
///
/// Segments may not be empty, may not contain `/`, may not be `.` or `..`,
/// may not contain `~` (reserved for sidecar file names), and may not
/// collide with the reserved names of the persistence layout.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// The repository root identifier.
    pub fn root() -> Self {
        Self(ID_PREFIX.to_string())
    }

    /// Parse and validate a full identifier string.
    ///
    /// `info:ark` and `info:ark/` both normalize to the root. Trailing
    /// slashes are trimmed.
    pub fn parse(input: impl AsRef<str>) -> Result<Self, TypeError> {
        let raw = input.as_ref();
        let rest = match raw.strip_prefix(ID_PREFIX) {
            Some(rest) => rest,
            None if raw == ID_PREFIX.trim_end_matches('/') => "",
            None => {
                return Err(TypeError::InvalidId {
                    id: raw.to_string(),
                    reason: format!("must start with '{ID_PREFIX}'"),
                })
            }
        };

        let rest = rest.trim_end_matches('/');
        if rest.is_empty() {
            return Ok(Self::root());
        }

        for segment in rest.split('/') {
            validate_segment(raw, segment)?;
        }

        Ok(Self(format!("{ID_PREFIX}{rest}")))
    }

    /// Append a single child segment, validating it.
    pub fn resolve(&self, segment: &str) -> Result<Self, TypeError> {
        validate_segment(segment, segment)?;
        if self.is_root() {
            Ok(Self(format!("{ID_PREFIX}{segment}")))
        } else {
            Ok(Self(format!("{}/{segment}", self.0)))
        }
    }

    /// The containing identifier, or `None` for the root.
    pub fn parent(&self) -> Option<ResourceId> {
        if self.is_root() {
            return None;
        }
        match self.0[ID_PREFIX.len()..].rfind('/') {
            Some(idx) => Some(Self(self.0[..ID_PREFIX.len() + idx].to_string())),
            None => Some(Self::root()),
        }
    }

    pub fn is_root(&self) -> bool {
        self.0 == ID_PREFIX
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments below the root, in order. Empty for the root itself.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0[ID_PREFIX.len()..].split('/').filter(|s| !s.is_empty())
    }

    /// `true` when `self` equals `ancestor` or lies anywhere beneath it.
    ///
    /// Prefix-aware at segment boundaries: `info:ark/ab` does not start
    /// with `info:ark/a`.
    pub fn starts_with(&self, ancestor: &ResourceId) -> bool {
        if ancestor.is_root() {
            return true;
        }
        self.0 == ancestor.0
            || (self.0.len() > ancestor.0.len()
                && self.0.starts_with(&ancestor.0)
                && self.0.as_bytes()[ancestor.0.len()] == b'/')
    }

    /// The path of `self` below `ancestor`, or `None` if `self` is not
    /// contained by it. Returns `""` when the two are equal.
    pub fn relative_to(&self, ancestor: &ResourceId) -> Option<&str> {
        if !self.starts_with(ancestor) {
            return None;
        }
        if self.0 == ancestor.0 {
            return Some("");
        }
        let skip = if ancestor.is_root() {
            ancestor.0.len()
        } else {
            ancestor.0.len() + 1
        };
        Some(&self.0[skip..])
    }
}

fn validate_segment(id: &str, segment: &str) -> Result<(), TypeError> {
    let reject = |reason: String| {
        Err(TypeError::InvalidId {
            id: id.to_string(),
            reason,
        })
    };
    if segment.is_empty() {
        return reject("empty path segment".to_string());
    }
    if segment.contains('/') {
        return reject(format!("segment '{segment}' contains '/'"));
    }
    if segment == "." || segment == ".." {
        return reject(format!("relative path segment '{segment}'"));
    }
    if segment.contains('~') {
        return reject(format!("segment '{segment}' contains reserved character '~'"));
    }
    if RESERVED_SEGMENTS.contains(&segment) {
        return reject(format!("segment '{segment}' is reserved"));
    }
    Ok(())
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ResourceId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn root_is_prefix() {
        let root = ResourceId::root();
        assert!(root.is_root());
        assert_eq!(root.as_str(), "info:ark/");
        assert!(root.parent().is_none());
    }

    #[test]
    fn parse_normalizes_root_spellings() {
        assert!(ResourceId::parse("info:ark").unwrap().is_root());
        assert!(ResourceId::parse("info:ark/").unwrap().is_root());
    }

    #[test]
    fn parse_trims_trailing_slash() {
        let id = ResourceId::parse("info:ark/a/b/").unwrap();
        assert_eq!(id.as_str(), "info:ark/a/b");
    }

    #[test]
    fn parse_rejects_foreign_prefix() {
        let err = ResourceId::parse("http://example.org/a").unwrap_err();
        assert!(matches!(err, TypeError::InvalidId { .. }));
    }

    #[test]
    fn parse_rejects_empty_segment() {
        let err = ResourceId::parse("info:ark/a//b").unwrap_err();
        assert!(matches!(err, TypeError::InvalidId { .. }));
    }

    #[test]
    fn parse_rejects_reserved_segments() {
        for bad in ["info:ark/.ark", "info:ark/a/container.nt", "info:ark/a/.."] {
            assert!(ResourceId::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn parse_rejects_tilde() {
        assert!(ResourceId::parse("info:ark/bin~desc.nt").is_err());
    }

    #[test]
    fn resolve_and_parent_are_inverse() {
        let a = ResourceId::root().resolve("a").unwrap();
        let b = a.resolve("b").unwrap();
        assert_eq!(b.as_str(), "info:ark/a/b");
        assert_eq!(b.parent().unwrap(), a);
        assert_eq!(a.parent().unwrap(), ResourceId::root());
    }

    #[test]
    fn resolve_takes_exactly_one_segment() {
        let a = ResourceId::root().resolve("a").unwrap();
        for bad in ["b/c", "b/..", "/b", "b/"] {
            let err = a.resolve(bad).unwrap_err();
            assert!(matches!(err, TypeError::InvalidId { .. }), "{bad} should be rejected");
        }
        // Whatever resolve mints, parse reads back.
        let ok = a.resolve("b").unwrap();
        assert_eq!(ResourceId::parse(ok.to_string()).unwrap(), ok);
    }

    #[test]
    fn starts_with_respects_segment_boundaries() {
        let a = ResourceId::parse("info:ark/a").unwrap();
        let ab = ResourceId::parse("info:ark/ab").unwrap();
        let a_b = ResourceId::parse("info:ark/a/b").unwrap();

        assert!(a_b.starts_with(&a));
        assert!(a.starts_with(&a));
        assert!(!ab.starts_with(&a));
        assert!(a.starts_with(&ResourceId::root()));
    }

    #[test]
    fn relative_to_drops_ancestor_prefix() {
        let group = ResourceId::parse("info:ark/group").unwrap();
        let member = ResourceId::parse("info:ark/group/x/y").unwrap();

        assert_eq!(member.relative_to(&group), Some("x/y"));
        assert_eq!(group.relative_to(&group), Some(""));
        assert_eq!(member.relative_to(&ResourceId::root()), Some("group/x/y"));

        let other = ResourceId::parse("info:ark/other").unwrap();
        assert_eq!(member.relative_to(&other), None);
    }

    #[test]
    fn segments_iterates_path() {
        let id = ResourceId::parse("info:ark/a/b/c").unwrap();
        let segs: Vec<_> = id.segments().collect();
        assert_eq!(segs, vec!["a", "b", "c"]);
        assert_eq!(ResourceId::root().segments().count(), 0);
    }

    #[test]
    fn serde_is_transparent() {
        let id = ResourceId::parse("info:ark/a/b").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"info:ark/a/b\"");
        let back: ResourceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    proptest! {
        #[test]
        fn display_parse_roundtrip(segs in prop::collection::vec("[a-z][a-z0-9_-]{0,8}", 1..5)) {
            let mut id = ResourceId::root();
            for seg in &segs {
                id = id.resolve(seg).unwrap();
            }
            let parsed = ResourceId::parse(id.to_string()).unwrap();
            prop_assert_eq!(parsed, id);
        }

        #[test]
        fn parent_chain_terminates_at_root(segs in prop::collection::vec("[a-z]{1,6}", 0..6)) {
            let mut id = ResourceId::root();
            for seg in &segs {
                id = id.resolve(seg).unwrap();
            }
            let mut hops = 0;
            let mut cur = id;
            while let Some(parent) = cur.parent() {
                cur = parent;
                hops += 1;
            }
            prop_assert!(cur.is_root());
            prop_assert_eq!(hops, segs.len());
        }
    }
}
