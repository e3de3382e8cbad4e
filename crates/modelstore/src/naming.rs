//! Convention-based conversion between column names and record keys
//!
//! `LAST_NAME` ↔ `lastName`, `DEPT_ID` ↔ `deptID`. The segment `ID` keeps
//! its capitals in both directions. Entity-specific overrides live in
//! [`crate::EntityMetadata`] and are consulted before these functions.

/// Segment that is never title-cased.
const ID_SEGMENT: &str = "ID";

/// Convert a column name to a record key.
///
/// The name is split on `_`; the first segment is lowercased and each
/// following segment is title-cased, except `ID` which is kept verbatim.
/// A single segment that already carries lowercase letters is treated as
/// a key-style name and only has its first character lowercased.
pub fn convert_column_name_to_key(name: &str) -> String {
    let segments: Vec<&str> = name.split('_').filter(|s| !s.is_empty()).collect();

    if segments.len() == 1 {
        let only = segments[0];
        if only == ID_SEGMENT {
            return ID_SEGMENT.to_string();
        }
        if only.chars().any(|c| c.is_lowercase()) {
            return lowercase_first(only);
        }
    }

    let mut key = String::with_capacity(name.len());
    for (i, segment) in segments.iter().enumerate() {
        if *segment == ID_SEGMENT {
            key.push_str(ID_SEGMENT);
        } else if i == 0 {
            key.push_str(&segment.to_lowercase());
        } else {
            key.push_str(&title_case(segment));
        }
    }
    key
}

/// Convert a record key to a column name.
///
/// An underscore is inserted in front of each internal uppercase run and
/// the result is uppercased: `lastName` → `LAST_NAME`, `deptID` →
/// `DEPT_ID`, `IDCode` → `ID_CODE`. An `ID` at either end of a longer run
/// is its own segment, so `fooIDX` → `FOO_ID_X` and `fooXID` → `FOO_X_ID`.
pub fn convert_key_to_column_name(key: &str) -> String {
    if key == ID_SEGMENT {
        return ID_SEGMENT.to_string();
    }

    let chars: Vec<char> = key.chars().collect();
    let mut column = String::with_capacity(key.len() + 4);
    let mut i = 0;
    while i < chars.len() {
        if !chars[i].is_uppercase() {
            column.extend(chars[i].to_uppercase());
            i += 1;
            continue;
        }

        let mut end = i;
        while end < chars.len() && chars[end].is_uppercase() {
            end += 1;
        }
        // The last capital of a run that continues in lowercase opens a word
        let word_start = chars.get(end).is_some_and(|c| c.is_lowercase()) && end - i > 1;
        let acronym_end = if word_start { end - 1 } else { end };

        if i > 0 && !column.ends_with('_') {
            column.push('_');
        }
        let acronym: String = chars[i..acronym_end].iter().flat_map(|c| c.to_uppercase()).collect();
        column.push_str(&split_id_segments(&acronym));
        if word_start {
            column.push('_');
        }
        i = acronym_end;
        if word_start {
            column.extend(chars[i].to_uppercase());
            i += 1;
        }
    }
    column
}

fn split_id_segments(run: &str) -> String {
    let mut rest = run;
    let mut parts = Vec::with_capacity(3);
    if rest.len() > ID_SEGMENT.len() && rest.starts_with(ID_SEGMENT) {
        parts.push(ID_SEGMENT);
        rest = &rest[ID_SEGMENT.len()..];
    }
    let trailing = rest.len() > ID_SEGMENT.len() && rest.ends_with(ID_SEGMENT);
    if trailing {
        rest = &rest[..rest.len() - ID_SEGMENT.len()];
    }
    parts.push(rest);
    if trailing {
        parts.push(ID_SEGMENT);
    }
    parts.join("_")
}

fn title_case(segment: &str) -> String {
    let lower = segment.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn lowercase_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}
