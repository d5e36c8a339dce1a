//! Immutable title-id to display-name lookup table.
//!
//! Built once from a static record slice on first use; there is no
//! mutable global state and no way to add entries at runtime. Unknown
//! ids resolve to a `<N/A>` placeholder for display code that wants a
//! string either way.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::install::TitleId;

/// Display placeholder for ids missing from the table.
pub const NAME_PLACEHOLDER: &str = "<N/A>";

/// One known title record.
#[derive(Debug, Clone, Copy)]
struct TitleRecord {
    title_id: u64,
    name: &'static str,
}

/// Known system and distribution titles. First occurrence of an id wins.
static TITLE_RECORDS: &[TitleRecord] = &[
    TitleRecord {
        title_id: 0x0004_0138_0000_0002,
        name: "Native Firmware",
    },
    TitleRecord {
        title_id: 0x0004_0138_2000_0002,
        name: "Native Firmware (new model)",
    },
    TitleRecord {
        title_id: 0x0004_0010_0002_1000,
        name: "System Settings",
    },
    TitleRecord {
        title_id: 0x0004_0010_0002_0000,
        name: "System Settings (JPN)",
    },
    TitleRecord {
        title_id: 0x0004_0010_0002_1400,
        name: "Camera",
    },
    TitleRecord {
        title_id: 0x0004_0010_0002_1D00,
        name: "Health and Safety Information",
    },
    TitleRecord {
        title_id: 0x0004_0030_0000_8F02,
        name: "Home Menu",
    },
    TitleRecord {
        title_id: 0x0004_0030_0000_9802,
        name: "Friends List",
    },
];

static TITLE_MAP: LazyLock<HashMap<u64, &'static str>> = LazyLock::new(|| {
    let mut map = HashMap::with_capacity(TITLE_RECORDS.len());
    for record in TITLE_RECORDS {
        map.entry(record.title_id).or_insert(record.name);
    }
    map
});

/// Looks up the display name for a title id.
#[must_use]
pub fn lookup(title_id: TitleId) -> Option<&'static str> {
    TITLE_MAP.get(&title_id.0).copied()
}

/// Like [`lookup`], but substitutes the `<N/A>` placeholder for unknown
/// ids.
#[must_use]
pub fn name_or_placeholder(title_id: TitleId) -> &'static str {
    lookup(title_id).unwrap_or(NAME_PLACEHOLDER)
}
