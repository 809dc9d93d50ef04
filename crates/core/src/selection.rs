//! Pure functions over the tag selection set.
//!
//! None of these touch displayed results; callers pass the returned list to the
//! controller's `apply_filter`.

use rustc_hash::FxHashSet;

use crate::{Field, FieldGroup, FieldValue, Tag};

fn contains(tags: &[Tag], key: &str, value: &str) -> bool {
    tags.iter().any(|t| t.key == key && t.value == value)
}

/// Check or uncheck one `(field, value)` pair. Idempotent in both directions.
pub fn toggle_tag(tags: &[Tag], field: &Field, value: &FieldValue, checked: bool) -> Vec<Tag> {
    let present = contains(tags, &field.name, &value.value);
    let mut out = tags.to_vec();
    if checked && !present {
        out.push(Tag::new(&field.name, &value.value));
    } else if !checked && present {
        out.retain(|t| !(t.key == field.name && t.value == value.value));
    }
    out
}

/// Swap every entry for `field` with `entries`, at the position the field first occupied.
fn replace_field(tags: &[Tag], field: &str, entries: Vec<Tag>) -> Vec<Tag> {
    let at = tags.iter().position(|t| t.key == field);
    let mut out: Vec<Tag> = Vec::with_capacity(tags.len() + entries.len());
    let mut pending = Some(entries);
    for (i, t) in tags.iter().enumerate() {
        if Some(i) == at {
            if let Some(e) = pending.take() { out.extend(e); }
        }
        if t.key != field {
            out.push(t.clone());
        }
    }
    if let Some(e) = pending { out.extend(e); }
    out
}

/// "Only": the field keeps this single value; other fields are untouched.
pub fn select_only(tags: &[Tag], field: &Field, value: &FieldValue) -> Vec<Tag> {
    replace_field(tags, &field.name, vec![Tag::new(&field.name, &value.value)])
}

/// "All": the field gets every known value in metadata order; other fields are untouched.
pub fn select_all(tags: &[Tag], field: &Field) -> Vec<Tag> {
    let entries = field.values.iter().map(|v| Tag::new(&field.name, &v.value)).collect();
    replace_field(tags, &field.name, entries)
}

/// Initial selection once field metadata is known: every value of every field.
pub fn default_selection(groups: &[FieldGroup]) -> Vec<Tag> {
    let mut out = Vec::new();
    for field in groups.iter().flat_map(|g| g.fields.iter()) {
        for v in &field.values {
            out.push(Tag::new(&field.name, &v.value));
        }
    }
    normalize_selection(&out)
}

/// Drop repeated `(key, value)` pairs, keeping the first occurrence.
pub fn normalize_selection(tags: &[Tag]) -> Vec<Tag> {
    let mut seen: FxHashSet<(&str, &str)> = FxHashSet::default();
    tags.iter().filter(|t| seen.insert((t.key.as_str(), t.value.as_str()))).cloned().collect()
}

/// Fields whose name contains `term`, case-insensitively. Groups left empty are dropped.
pub fn search_fields(groups: &[FieldGroup], term: &str) -> Vec<FieldGroup> {
    let needle = term.trim().to_uppercase();
    groups
        .iter()
        .filter_map(|g| {
            let fields: Vec<Field> =
                g.fields.iter().filter(|f| f.name.to_uppercase().contains(&needle)).cloned().collect();
            if fields.is_empty() { None } else { Some(FieldGroup { name: g.name.clone(), fields }) }
        })
        .collect()
}

/// Values of a field containing `term`, case-insensitively.
pub fn search_values<'a>(field: &'a Field, term: &str) -> Vec<&'a FieldValue> {
    let needle = term.trim().to_lowercase();
    field.values.iter().filter(|v| v.value.to_lowercase().contains(&needle)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, values: &[&str]) -> Field {
        Field {
            name: name.into(),
            count: values.len() as u64,
            values: values.iter().map(|v| FieldValue { value: v.to_string(), count: 1 }).collect(),
        }
    }

    fn fv(v: &str) -> FieldValue { FieldValue { value: v.into(), count: 1 } }

    #[test]
    fn toggle_on_twice_equals_once() {
        let region = field("region", &["us-east-1", "us-west-2"]);
        let once = toggle_tag(&[], &region, &fv("us-east-1"), true);
        let twice = toggle_tag(&once, &region, &fv("us-east-1"), true);
        assert_eq!(once, twice);
        assert_eq!(once, vec![Tag::new("region", "us-east-1")]);
    }

    #[test]
    fn toggle_off_absent_is_noop_and_removes_only_the_pair() {
        let region = field("region", &["a", "b"]);
        let tags = vec![Tag::new("region", "a"), Tag::new("type", "a"), Tag::new("region", "b")];
        assert_eq!(toggle_tag(&tags, &region, &fv("zzz"), false), tags);
        let off = toggle_tag(&tags, &region, &fv("a"), false);
        assert_eq!(off, vec![Tag::new("type", "a"), Tag::new("region", "b")]);
    }

    #[test]
    fn toggle_off_removes_every_duplicate() {
        let region = field("region", &["a"]);
        let tags = vec![Tag::new("region", "a"), Tag::new("region", "a")];
        assert!(toggle_tag(&tags, &region, &fv("a"), false).is_empty());
    }

    #[test]
    fn select_only_replaces_field_in_place() {
        let region = field("region", &["a", "b", "c"]);
        let tags = vec![Tag::new("type", "s3"), Tag::new("region", "a"), Tag::new("env", "prod"), Tag::new("region", "b")];
        let out = select_only(&tags, &region, &fv("c"));
        assert_eq!(out, vec![Tag::new("type", "s3"), Tag::new("region", "c"), Tag::new("env", "prod")]);
    }

    #[test]
    fn select_all_restores_every_value() {
        let region = field("region", &["a", "b", "c"]);
        let tags = vec![Tag::new("region", "b")];
        let out = select_all(&tags, &region);
        assert_eq!(out, vec![Tag::new("region", "a"), Tag::new("region", "b"), Tag::new("region", "c")]);
        // A field with no prior selection is appended.
        let out = select_all(&[Tag::new("type", "s3")], &region);
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], Tag::new("type", "s3"));
    }

    #[test]
    fn default_selection_covers_all_fields() {
        let groups = vec![
            FieldGroup { name: "core".into(), fields: vec![field("region", &["a", "b"]), field("type", &["s3"])] },
            FieldGroup { name: "tags".into(), fields: vec![field("team", &["infra"])] },
        ];
        let sel = default_selection(&groups);
        assert_eq!(sel.len(), 4);
        assert_eq!(sel[3], Tag::new("team", "infra"));
    }

    #[test]
    fn search_is_case_insensitive() {
        let groups = vec![FieldGroup { name: "core".into(), fields: vec![field("Region", &["us-EAST-1"]), field("type", &[])] }];
        let hits = search_fields(&groups, "reg");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].fields.len(), 1);
        assert!(search_fields(&groups, "nomatch").is_empty());
        assert_eq!(search_values(&groups[0].fields[0], "east").len(), 1);
    }
}
