use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use tracing::warn;

use crate::constants::{
    section_name, ENTRY_SEPARATOR, ESCAPE_CHAR, ESCAPE_TABLE, KEY_VALUE_SEPARATOR,
    PERSISTENT_SUFFIX, SECTION_CLOSE, SECTION_OPEN, VERSION_KEY, VOLATILE_SUFFIX,
};

pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ESCAPE_TABLE.iter().find(|(reserved, _)| *reserved == ch) {
            Some((_, tag)) => {
                out.push(ESCAPE_CHAR);
                out.push(*tag);
            }
            None => out.push(ch),
        }
    }
    out
}

/// Unknown tags decode to the tag itself; a trailing lone escape is kept as-is.
pub fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != ESCAPE_CHAR {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some(tag) => {
                let reserved = ESCAPE_TABLE
                    .iter()
                    .find(|(_, known)| *known == tag)
                    .map(|(reserved, _)| *reserved);
                out.push(reserved.unwrap_or(tag));
            }
            None => out.push(ESCAPE_CHAR),
        }
    }
    out
}

fn split_unescaped(value: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (idx, ch) in value.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if ch == ESCAPE_CHAR {
            escaped = true;
        } else if ch == separator {
            parts.push(&value[start..idx]);
            start = idx + ch.len_utf8();
        }
    }
    parts.push(&value[start..]);
    parts
}

fn split_once_unescaped(value: &str, separator: char) -> Option<(&str, &str)> {
    let mut escaped = false;
    for (idx, ch) in value.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if ch == ESCAPE_CHAR {
            escaped = true;
        } else if ch == separator {
            return Some((&value[..idx], &value[idx + ch.len_utf8()..]));
        }
    }
    None
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SaveRecord {
    entries: BTreeMap<String, String>,
}

impl SaveRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// `$version` is reserved for the format version and is refused here.
    pub fn set(&mut self, key: impl Into<String>, value: impl Display) -> bool {
        let key = key.into();
        if key == VERSION_KEY {
            warn!(key = %key, "save key is reserved; value dropped");
            return false;
        }
        self.entries.insert(key, value.to_string());
        true
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Parses the stored value; an unparsable value reads as absent.
    pub fn get<T: FromStr>(&self, key: &str) -> Option<T> {
        self.entries.get(key).and_then(|raw| raw.parse::<T>().ok())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

impl FromIterator<(String, String)> for SaveRecord {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

pub fn encode_record(record: &SaveRecord) -> String {
    let mut out = String::new();
    for (key, value) in record.iter() {
        out.push_str(&escape(key));
        out.push(KEY_VALUE_SEPARATOR);
        out.push_str(&escape(value));
        out.push(ENTRY_SEPARATOR);
    }
    out
}

pub fn decode_record(encoded: &str) -> SaveRecord {
    let mut record = SaveRecord::new();
    for entry in split_unescaped(encoded, ENTRY_SEPARATOR) {
        if entry.is_empty() {
            continue;
        }
        match split_once_unescaped(entry, KEY_VALUE_SEPARATOR) {
            Some((key, value)) => {
                record.entries.insert(unescape(key), unescape(value));
            }
            None => warn!(entry, "skipping save entry without key separator"),
        }
    }
    record
}

pub fn embed_section(host_blob: &str, section: &str, payload: &str) -> String {
    let mut out = String::with_capacity(host_blob.len() + section.len() + payload.len() + 2);
    out.push_str(host_blob);
    out.push_str(section);
    out.push(SECTION_OPEN);
    out.push_str(payload);
    out.push(SECTION_CLOSE);
    out
}

/// Byte offsets of the first `section`: (start, payload start, payload end, end).
fn find_section(host_blob: &str, section: &str) -> Option<(usize, usize, usize, usize)> {
    let needle = format!("{section}{SECTION_OPEN}");
    let start = host_blob.find(&needle)?;
    let payload_start = start + needle.len();
    match host_blob[payload_start..].find(SECTION_CLOSE) {
        Some(offset) => {
            let payload_end = payload_start + offset;
            Some((start, payload_start, payload_end, payload_end + SECTION_CLOSE.len_utf8()))
        }
        None => Some((start, payload_start, host_blob.len(), host_blob.len())),
    }
}

/// Returns the payload of the first `section`, reading to the end of the blob
/// when the close marker is missing.
pub fn extract_section(host_blob: &str, section: &str) -> Option<String> {
    let (_, payload_start, payload_end, _) = find_section(host_blob, section)?;
    Some(host_blob[payload_start..payload_end].to_string())
}

pub fn remove_section(host_blob: &str, section: &str) -> String {
    let mut out = host_blob.to_string();
    while let Some((start, _, _, end)) = find_section(&out, section) {
        out.replace_range(start..end, "");
    }
    out
}

pub fn replace_section(host_blob: &str, section: &str, payload: &str) -> String {
    embed_section(&remove_section(host_blob, section), section, payload)
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CharacterSaveData {
    /// Cleared when the player dies.
    pub volatile: SaveRecord,
    /// Cleared only on an explicit wipe.
    pub persistent: SaveRecord,
    /// Format version the data was written with, when loaded from a blob.
    pub stored_version: Option<String>,
}

impl CharacterSaveData {
    pub fn on_death(&mut self) {
        self.volatile.clear();
    }

    pub fn wipe(&mut self) {
        self.volatile.clear();
        self.persistent.clear();
    }

    pub fn embed(&self, host_blob: &str, character: &str, format_version: &str) -> String {
        let blob = replace_section(
            host_blob,
            &section_name(character, VOLATILE_SUFFIX),
            &encode_versioned(&self.volatile, format_version),
        );
        replace_section(
            &blob,
            &section_name(character, PERSISTENT_SUFFIX),
            &encode_versioned(&self.persistent, format_version),
        )
    }

    /// Missing sections load as empty records.
    pub fn extract(host_blob: &str, character: &str) -> Self {
        let mut data = Self::default();
        for (suffix, is_volatile) in [(VOLATILE_SUFFIX, true), (PERSISTENT_SUFFIX, false)] {
            let Some(payload) = extract_section(host_blob, &section_name(character, suffix)) else {
                continue;
            };
            let mut record = decode_record(&payload);
            if let Some(version) = record.remove(VERSION_KEY) {
                if data
                    .stored_version
                    .as_ref()
                    .is_some_and(|existing| *existing != version)
                {
                    warn!(
                        character,
                        "volatile and persistent save sections disagree on format version"
                    );
                }
                data.stored_version.get_or_insert(version);
            }
            if is_volatile {
                data.volatile = record;
            } else {
                data.persistent = record;
            }
        }
        data
    }
}

fn encode_versioned(record: &SaveRecord, format_version: &str) -> String {
    let mut versioned = record.clone();
    versioned
        .entries
        .insert(VERSION_KEY.to_string(), format_version.to_string());
    encode_record(&versioned)
}

pub fn discard_volatile_section(host_blob: &str, character: &str) -> String {
    remove_section(host_blob, &section_name(character, VOLATILE_SUFFIX))
}

pub fn wipe_sections(host_blob: &str, character: &str) -> String {
    let blob = discard_volatile_section(host_blob, character);
    remove_section(&blob, &section_name(character, PERSISTENT_SUFFIX))
}
