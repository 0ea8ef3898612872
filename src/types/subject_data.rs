//! Immutable subject data snapshots.
//!
//! A [`SubjectData`] holds one [`Segment`] per stored context set. Every transform
//! takes `&self` and returns a new snapshot; nothing is edited in place, so a
//! reader holding an `Arc<SubjectData>` always sees a consistent past state.
//!
//! Each snapshot carries a write counter. A transform that changes an entry bumps
//! the counter and stamps it onto that entry (a permission, an option, the default
//! value or the parent list). When equally specific segments both hold a value for
//! the same entry, the later stamp wins. Writes to other entries of a segment do not
//! move its stamps. Transforms that change nothing return an equal snapshot.

use std::collections::BTreeMap;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use super::context::ContextSet;
use super::permission_value::Weight;
use super::subject::SubjectIdentity;

/// Everything stored for one subject under one context set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Segment {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    permissions: BTreeMap<String, Weight>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    options: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    default_value: Weight,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    parents: Vec<SubjectIdentity>,
    #[serde(default, skip_serializing_if = "Stamps::is_empty")]
    written: Stamps,
}

/// Write counter value of the last change to each entry of a segment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
struct Stamps {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    permissions: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    options: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "is_unstamped")]
    default_value: u64,
    #[serde(default, skip_serializing_if = "is_unstamped")]
    parents: u64,
}

impl Stamps {
    fn is_empty(&self) -> bool {
        self.permissions.is_empty()
            && self.options.is_empty()
            && self.default_value == 0
            && self.parents == 0
    }

    fn highest(&self) -> u64 {
        self.permissions
            .values()
            .chain(self.options.values())
            .copied()
            .chain([self.default_value, self.parents])
            .max()
            .unwrap_or(0)
    }
}

fn is_zero(weight: &Weight) -> bool {
    *weight == 0
}

fn is_unstamped(sequence: &u64) -> bool {
    *sequence == 0
}

impl Segment {
    /// Weight stored for `key`, `0` when absent.
    pub fn permission(&self, key: &str) -> Weight {
        self.permissions.get(key).copied().unwrap_or(0)
    }

    pub fn permissions(&self) -> &BTreeMap<String, Weight> {
        &self.permissions
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    pub fn default_value(&self) -> Weight {
        self.default_value
    }

    /// Parents in priority order, highest first.
    pub fn parents(&self) -> &[SubjectIdentity] {
        &self.parents
    }

    /// Write counter value of the last change to permission `key`, `0` when absent.
    pub fn permission_sequence(&self, key: &str) -> u64 {
        self.written.permissions.get(key).copied().unwrap_or(0)
    }

    pub fn option_sequence(&self, key: &str) -> u64 {
        self.written.options.get(key).copied().unwrap_or(0)
    }

    pub fn default_sequence(&self) -> u64 {
        self.written.default_value
    }

    pub fn parents_sequence(&self) -> u64 {
        self.written.parents
    }

    fn is_empty(&self) -> bool {
        self.permissions.is_empty()
            && self.options.is_empty()
            && self.default_value == 0
            && self.parents.is_empty()
    }

    fn stamp_parents(&mut self, sequence: u64) {
        self.written.parents = if self.parents.is_empty() { 0 } else { sequence };
    }
}

/// Immutable record of one subject's raw permissions, options, defaults and parents.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(from = "SubjectDataRecord", into = "SubjectDataRecord")]
pub struct SubjectData {
    segments: BTreeMap<ContextSet, Segment>,
    write_sequence: u64,
}

impl SubjectData {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segment(&self, contexts: &ContextSet) -> Option<&Segment> {
        self.segments.get(contexts)
    }

    pub fn segments(&self) -> impl Iterator<Item = (&ContextSet, &Segment)> {
        self.segments.iter()
    }

    /// Every context set that has data stored.
    pub fn active_contexts(&self) -> impl Iterator<Item = &ContextSet> {
        self.segments.keys()
    }

    pub fn permissions(&self, contexts: &ContextSet) -> Option<&BTreeMap<String, Weight>> {
        self.segment(contexts).map(Segment::permissions)
    }

    pub fn options(&self, contexts: &ContextSet) -> Option<&BTreeMap<String, String>> {
        self.segment(contexts).map(Segment::options)
    }

    pub fn default_value(&self, contexts: &ContextSet) -> Weight {
        self.segment(contexts).map_or(0, Segment::default_value)
    }

    pub fn parents(&self, contexts: &ContextSet) -> &[SubjectIdentity] {
        self.segment(contexts).map(Segment::parents).unwrap_or(&[])
    }

    /// Segments whose context set applies under `active`, most specific first.
    /// Equally specific segments are ordered by the most recent change to their parents.
    pub fn applicable_segments(&self, active: &ContextSet) -> Vec<(&ContextSet, &Segment)> {
        self.segments
            .iter()
            .filter(|(contexts, _)| contexts.applies_under(active))
            .sorted_by(|(a_ctx, a_seg), (b_ctx, b_seg)| {
                b_ctx
                    .specificity()
                    .cmp(&a_ctx.specificity())
                    .then_with(|| b_seg.parents_sequence().cmp(&a_seg.parents_sequence()))
            })
            .collect()
    }

    /// Nonzero weight of `key` under `active`, taken from the most specific applicable
    /// segment that holds one. Ties go to the most recently written entry.
    pub fn effective_permission(&self, active: &ContextSet, key: &str) -> Option<Weight> {
        self.most_specific(active, |segment| {
            segment
                .permissions
                .get(key)
                .map(|weight| (*weight, segment.permission_sequence(key)))
        })
    }

    /// Value of option `key` under `active`, chosen like [`Self::effective_permission`].
    pub fn effective_option(&self, active: &ContextSet, key: &str) -> Option<&str> {
        self.most_specific(active, |segment| {
            segment
                .option(key)
                .map(|value| (value, segment.option_sequence(key)))
        })
    }

    /// Nonzero default value under `active`, chosen like [`Self::effective_permission`].
    pub fn effective_default(&self, active: &ContextSet) -> Option<Weight> {
        self.most_specific(active, |segment| {
            (segment.default_value != 0).then_some((segment.default_value, segment.default_sequence()))
        })
    }

    fn most_specific<'a, T>(
        &'a self,
        active: &ContextSet,
        entry: impl Fn(&'a Segment) -> Option<(T, u64)>,
    ) -> Option<T> {
        self.segments
            .iter()
            .filter(|(contexts, _)| contexts.applies_under(active))
            .filter_map(|(contexts, segment)| {
                entry(segment).map(|(value, sequence)| ((contexts.specificity(), sequence), value))
            })
            .max_by_key(|(rank, _)| *rank)
            .map(|(_, value)| value)
    }

    /// Set `key` to `weight` under `contexts`. A weight of `0` removes the entry.
    pub fn set_permission(&self, contexts: &ContextSet, key: &str, weight: Weight) -> Self {
        self.edit(contexts, |segment, sequence| {
            if weight == 0 {
                segment.written.permissions.remove(key);
                segment.permissions.remove(key).is_some()
            } else if segment.permissions.insert(key.to_string(), weight) != Some(weight) {
                segment.written.permissions.insert(key.to_string(), sequence);
                true
            } else {
                false
            }
        })
    }

    pub fn clear_permissions(&self, contexts: &ContextSet) -> Self {
        self.edit(contexts, |segment, _| {
            let changed = !segment.permissions.is_empty();
            segment.permissions.clear();
            segment.written.permissions.clear();
            changed
        })
    }

    pub fn set_default_value(&self, contexts: &ContextSet, weight: Weight) -> Self {
        self.edit(contexts, |segment, sequence| {
            if std::mem::replace(&mut segment.default_value, weight) == weight {
                return false;
            }
            segment.written.default_value = if weight == 0 { 0 } else { sequence };
            true
        })
    }

    /// Set or, with `None`, remove an option under `contexts`.
    pub fn set_option(&self, contexts: &ContextSet, key: &str, value: Option<&str>) -> Self {
        self.edit(contexts, |segment, sequence| match value {
            Some(value) => {
                if segment.options.insert(key.to_string(), value.to_string()).as_deref()
                    == Some(value)
                {
                    return false;
                }
                segment.written.options.insert(key.to_string(), sequence);
                true
            }
            None => {
                segment.written.options.remove(key);
                segment.options.remove(key).is_some()
            }
        })
    }

    pub fn clear_options(&self, contexts: &ContextSet) -> Self {
        self.edit(contexts, |segment, _| {
            let changed = !segment.options.is_empty();
            segment.options.clear();
            segment.written.options.clear();
            changed
        })
    }

    /// Append `parent` as the lowest-priority parent under `contexts`.
    /// Adding a parent that is already present changes nothing.
    pub fn add_parent(&self, contexts: &ContextSet, parent: &SubjectIdentity) -> Self {
        self.edit(contexts, |segment, sequence| {
            if segment.parents.contains(parent) {
                return false;
            }
            segment.parents.push(parent.clone());
            segment.stamp_parents(sequence);
            true
        })
    }

    /// Remove `parent`, keeping the relative order of the remaining parents.
    pub fn remove_parent(&self, contexts: &ContextSet, parent: &SubjectIdentity) -> Self {
        self.edit(contexts, |segment, sequence| {
            let before = segment.parents.len();
            segment.parents.retain(|p| p != parent);
            if segment.parents.len() == before {
                return false;
            }
            segment.stamp_parents(sequence);
            true
        })
    }

    /// Replace the parent list under `contexts`, dropping repeated entries.
    pub fn set_parents(&self, contexts: &ContextSet, parents: &[SubjectIdentity]) -> Self {
        let parents: Vec<SubjectIdentity> = parents.iter().unique().cloned().collect();
        self.edit(contexts, |segment, sequence| {
            if segment.parents == parents {
                return false;
            }
            segment.parents = parents;
            segment.stamp_parents(sequence);
            true
        })
    }

    pub fn clear_parents(&self, contexts: &ContextSet) -> Self {
        self.set_parents(contexts, &[])
    }

    /// Runs `f` on a copy of the segment under `contexts`, passing the stamp for
    /// entries it changes. `f` returns whether anything changed.
    fn edit<F>(&self, contexts: &ContextSet, f: F) -> Self
    where
        F: FnOnce(&mut Segment, u64) -> bool,
    {
        let mut segment = self.segments.get(contexts).cloned().unwrap_or_default();
        let sequence = self.write_sequence + 1;
        if !f(&mut segment, sequence) {
            return self.clone();
        }

        let mut next = self.clone();
        next.write_sequence = sequence;
        if segment.is_empty() {
            next.segments.remove(contexts);
        } else {
            next.segments.insert(contexts.clone(), segment);
        }
        next
    }
}

/// Serialized form: context sets are not string keys, so segments are written as a list.
#[derive(Serialize, Deserialize)]
struct SubjectDataRecord {
    #[serde(default)]
    segments: Vec<SegmentRecord>,
    #[serde(default)]
    write_sequence: u64,
}

#[derive(Serialize, Deserialize)]
struct SegmentRecord {
    contexts: ContextSet,
    #[serde(flatten)]
    segment: Segment,
}

impl From<SubjectData> for SubjectDataRecord {
    fn from(value: SubjectData) -> Self {
        SubjectDataRecord {
            segments: value
                .segments
                .into_iter()
                .map(|(contexts, segment)| SegmentRecord { contexts, segment })
                .collect(),
            write_sequence: value.write_sequence,
        }
    }
}

impl From<SubjectDataRecord> for SubjectData {
    fn from(value: SubjectDataRecord) -> Self {
        let segments: BTreeMap<ContextSet, Segment> = value
            .segments
            .into_iter()
            .filter(|record| !record.segment.is_empty())
            .map(|record| (record.contexts, record.segment))
            .collect();
        let highest = segments
            .values()
            .map(|segment| segment.written.highest())
            .max()
            .unwrap_or(0);
        SubjectData {
            segments,
            write_sequence: value.write_sequence.max(highest),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    fn ctx(s: &str) -> ContextSet {
        s.parse().unwrap()
    }

    fn subject(s: &str) -> SubjectIdentity {
        s.parse().unwrap()
    }

    #[test]
    fn test_set_permission_returns_new_snapshot() {
        let original = SubjectData::empty();
        let updated = original.set_permission(&ctx("world=nether"), "build", 1);

        assert!(original.is_empty());
        assert_eq!(
            updated.permissions(&ctx("world=nether")).unwrap().get("build"),
            Some(&1)
        );
        assert!(updated.permissions(&ContextSet::global()).is_none());
    }

    #[test]
    fn test_zero_weight_removes_entry() {
        let data = SubjectData::empty()
            .set_permission(&ContextSet::global(), "build", 1)
            .set_permission(&ContextSet::global(), "chat", -1)
            .set_permission(&ContextSet::global(), "build", 0);

        let perms = data.permissions(&ContextSet::global()).unwrap();
        assert!(!perms.contains_key("build"));
        assert_eq!(perms.get("chat"), Some(&-1));
    }

    #[test]
    fn test_unset_is_idempotent() {
        let base = SubjectData::empty().set_permission(&ContextSet::global(), "build", 3);
        let once = base.set_permission(&ContextSet::global(), "build", 0);
        let twice = once.set_permission(&ContextSet::global(), "build", 0);
        assert_eq!(once, twice);
        assert!(once.is_empty());
    }

    #[test]
    fn test_no_op_transform_keeps_content() {
        let data = SubjectData::empty().set_option(&ContextSet::global(), "prefix", Some("[A]"));
        assert_eq!(
            data,
            data.set_option(&ContextSet::global(), "prefix", Some("[A]"))
        );
        assert_eq!(data, data.remove_parent(&ContextSet::global(), &subject("group:x")));
    }

    #[test]
    fn test_empty_segments_are_dropped() {
        let contexts = ctx("server=lobby");
        let data = SubjectData::empty()
            .set_default_value(&contexts, -1)
            .set_default_value(&contexts, 0);
        assert!(data.segment(&contexts).is_none());
        assert_eq!(data.active_contexts().count(), 0);
    }

    #[test]
    fn test_parent_order_is_preserved() {
        let global = ContextSet::global();
        let data = SubjectData::empty()
            .add_parent(&global, &subject("group:a"))
            .add_parent(&global, &subject("group:b"))
            .add_parent(&global, &subject("group:c"))
            .add_parent(&global, &subject("group:a"))
            .remove_parent(&global, &subject("group:b"));

        assert_eq!(
            data.parents(&global),
            &[subject("group:a"), subject("group:c")]
        );
    }

    #[test]
    fn test_set_parents_dedups_in_order() {
        let global = ContextSet::global();
        let data = SubjectData::empty().set_parents(
            &global,
            &[subject("group:b"), subject("group:a"), subject("group:b")],
        );
        assert_eq!(data.parents(&global), &[subject("group:b"), subject("group:a")]);
        assert!(data.clear_parents(&global).is_empty());
    }

    #[test]
    fn test_options_set_and_remove() {
        let contexts = ctx("world=nether");
        let data = SubjectData::empty()
            .set_option(&contexts, "prefix", Some("[N]"))
            .set_option(&contexts, "suffix", Some("!"))
            .set_option(&contexts, "suffix", None);

        let options = data.options(&contexts).unwrap();
        assert_eq!(options.get("prefix").map(String::as_str), Some("[N]"));
        assert!(!options.contains_key("suffix"));
        assert!(data.clear_options(&contexts).is_empty());
    }

    #[test]
    fn test_clear_permissions_only_touches_one_segment() {
        let data = SubjectData::empty()
            .set_permission(&ContextSet::global(), "a", 1)
            .set_permission(&ctx("world=nether"), "b", 1)
            .clear_permissions(&ctx("world=nether"));
        assert!(data.segment(&ctx("world=nether")).is_none());
        assert_eq!(data.permissions(&ContextSet::global()).unwrap().len(), 1);
    }

    #[parameterized(
        global_only = { "", vec![""] },
        nether = { "world=nether", vec!["world=nether", ""] },
        nether_lobby = { "world=nether,server=lobby", vec!["server=lobby,world=nether", "world=nether", "server=lobby", ""] },
        overworld = { "world=overworld", vec![""] },
    )]
    fn test_applicable_segments_order(active: &str, expected: Vec<&str>) {
        let data = SubjectData::empty()
            .add_parent(&ContextSet::global(), &subject("group:g"))
            .add_parent(&ctx("world=nether"), &subject("group:n"))
            .add_parent(&ctx("server=lobby"), &subject("group:l"))
            .add_parent(&ctx("server=lobby,world=nether"), &subject("group:nl"))
            .add_parent(&ctx("world=nether"), &subject("group:n2"))
            .set_permission(&ctx("server=lobby"), "p", 1);

        let ordered: Vec<ContextSet> = data
            .applicable_segments(&ctx(active))
            .into_iter()
            .map(|(contexts, _)| contexts.clone())
            .collect();
        let expected: Vec<ContextSet> = expected.into_iter().map(ctx).collect();
        assert_eq!(ordered, expected);
    }

    #[test]
    fn test_serde_roundtrip_preserves_segments() {
        let data = SubjectData::empty()
            .set_permission(&ctx("world=nether"), "build", 1)
            .set_option(&ContextSet::global(), "prefix", Some("[VIP]"))
            .add_parent(&ContextSet::global(), &subject("group:default"))
            .set_default_value(&ctx("world=nether"), -1);

        let json = serde_json::to_string(&data).unwrap();
        let back: SubjectData = serde_json::from_str(&json).unwrap();
        assert_eq!(data, back);
    }

    #[test]
    fn test_serialized_shape() {
        let data = SubjectData::empty().set_permission(&ctx("world=nether"), "build", 1);
        insta::assert_json_snapshot!(data, @r#"
        {
          "segments": [
            {
              "contexts": [
                {
                  "key": "world",
                  "value": "nether"
                }
              ],
              "permissions": {
                "build": 1
              },
              "written": {
                "permissions": {
                  "build": 1
                }
              }
            }
          ],
          "write_sequence": 1
        }
        "#);
    }

    #[test]
    fn test_deserialize_without_sequences() {
        let data: SubjectData = serde_json::from_value(serde_json::json!({
            "segments": [
                {"contexts": [], "parents": [{"type": "group", "identifier": "default"}]}
            ]
        }))
        .unwrap();
        assert_eq!(data.parents(&ContextSet::global()), &[subject("group:default")]);
    }

    #[test]
    fn test_unrelated_write_keeps_tie_break() {
        let lobby = ctx("server=lobby");
        let nether = ctx("world=nether");
        let active = ctx("server=lobby,world=nether");
        let data = SubjectData::empty()
            .set_permission(&lobby, "fly", 1)
            .set_permission(&nether, "fly", -1);
        assert_eq!(data.effective_permission(&active, "fly"), Some(-1));

        let data = data
            .set_permission(&lobby, "chat", 1)
            .set_option(&lobby, "prefix", Some("[L]"))
            .set_default_value(&lobby, 2);
        assert_eq!(data.effective_permission(&active, "fly"), Some(-1));

        let data = data.set_permission(&lobby, "fly", 3);
        assert_eq!(data.effective_permission(&active, "fly"), Some(3));
    }

    #[test]
    fn test_effective_values_prefer_specificity_over_recency() {
        let data = SubjectData::empty()
            .set_option(&ctx("world=nether"), "prefix", Some("[N]"))
            .set_default_value(&ctx("world=nether"), -1)
            .set_option(&ContextSet::global(), "prefix", Some("[G]"))
            .set_default_value(&ContextSet::global(), 1);

        let nether = ctx("world=nether");
        assert_eq!(data.effective_option(&nether, "prefix"), Some("[N]"));
        assert_eq!(data.effective_default(&nether), Some(-1));
        assert_eq!(data.effective_option(&ContextSet::global(), "prefix"), Some("[G]"));
        assert_eq!(data.effective_permission(&nether, "build"), None);
    }

    #[test]
    fn test_unset_entry_drops_its_stamp() {
        let lobby = ctx("server=lobby");
        let data = SubjectData::empty()
            .set_permission(&lobby, "fly", 1)
            .set_permission(&lobby, "chat", 1)
            .set_permission(&lobby, "fly", 0);

        let segment = data.segment(&lobby).unwrap();
        assert_eq!(segment.permission_sequence("fly"), 0);
        assert_eq!(segment.permission_sequence("chat"), 2);
        assert_eq!(data, serde_json::from_str(&serde_json::to_string(&data).unwrap()).unwrap());
    }
}
