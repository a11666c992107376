pub const ESCAPE_CHAR: char = '\\';
pub const SECTION_OPEN: char = '<';
pub const SECTION_CLOSE: char = '>';
pub const KEY_VALUE_SEPARATOR: char = ':';
pub const ENTRY_SEPARATOR: char = ',';

/// Reserved character and the tag that follows `ESCAPE_CHAR` in its escaped form.
pub const ESCAPE_TABLE: [(char, char); 5] = [
    (ESCAPE_CHAR, 'e'),
    (SECTION_OPEN, 'o'),
    (SECTION_CLOSE, 'c'),
    (KEY_VALUE_SEPARATOR, 'k'),
    (ENTRY_SEPARATOR, 's'),
];

pub const SECTION_PREFIX: &str = "chr.";
pub const VOLATILE_SUFFIX: &str = ".volatile";
pub const PERSISTENT_SUFFIX: &str = ".persistent";
pub const VERSION_KEY: &str = "$version";

pub const SELECTION_VERSION_TAG: &str = "V2";

pub const MAX_SLOTS: usize = 32;
pub const DEFAULT_SLOT_COUNT: usize = 4;

/// Upper bound on transitions a hook may queue on its own character in one request.
pub const MAX_DEFERRED_CHAIN: usize = 64;

pub const DEFAULT_BUILTIN_CHARACTERS: [&str; 3] = ["Survivor", "Monk", "Hunter"];
pub const DEFAULT_FORMAT_VERSION: &str = "1";

pub const SAVE_DIR_ENV: &str = "CHARACTER_SAVE_DIR";

pub fn section_name(character: &str, suffix: &str) -> String {
    format!("{SECTION_PREFIX}{character}{suffix}")
}

pub fn normalize_slot_count(value: Option<i64>) -> usize {
    value
        .unwrap_or(DEFAULT_SLOT_COUNT as i64)
        .clamp(1, MAX_SLOTS as i64) as usize
}
