use std::sync::LazyLock;

use regex::bytes::Regex;

pub const STRUCTURE_MARKER: &[u8] = b"-- Table structure for table";
pub const DATA_MARKER: &[u8] = b"-- Dumping data for table";
pub const BOUNDARY_MARKER: &[u8] = b"-- --------------------------------------------------------";
pub const INSERT_PREFIX: &[u8] = b"INSERT INTO";

const COMMENT_OPENER: &[u8] = b"--";
const VERSIONED_COMMENT_OPENER: &[u8] = b"/*!";

// `INSERT INTO ... VALUES` up to the keyword, then whatever follows on the same line.
static INSERT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s-u)^(INSERT INTO\b.*?\bVALUES\b)[ \t]*(.*)$").unwrap());
static TUPLE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[ \t]*\(").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Structure,
    Data,
    Boundary,
    Noise,
    Content,
}

#[derive(Debug, Clone, Copy)]
enum Match {
    Prefix,
    Anywhere,
}

/// Marker lines, checked in order before generic comment filtering.
const MARKERS: &[(&[u8], Match, LineKind)] = &[
    (STRUCTURE_MARKER, Match::Prefix, LineKind::Structure),
    (DATA_MARKER, Match::Prefix, LineKind::Data),
    (BOUNDARY_MARKER, Match::Anywhere, LineKind::Boundary),
];

pub fn classify(line: &[u8]) -> LineKind {
    for (marker, how, kind) in MARKERS {
        let hit = match how {
            Match::Prefix => line.starts_with(marker),
            Match::Anywhere => contains(line, marker),
        };
        if hit {
            return *kind;
        }
    }

    if line.iter().all(u8::is_ascii_whitespace)
        || line.starts_with(VERSIONED_COMMENT_OPENER)
        || line.starts_with(COMMENT_OPENER)
    {
        return LineKind::Noise;
    }

    LineKind::Content
}

pub fn is_insert_start(line: &[u8]) -> bool {
    line.starts_with(INSERT_PREFIX)
}

/// A row line: first non-blank byte opens a value tuple.
pub fn is_value_tuple(line: &[u8]) -> bool {
    TUPLE_RE.is_match(line)
}

/// Split an insert line into its reusable template and any rows that follow
/// `VALUES` on the same line. Lines without a `VALUES` keyword are kept whole.
pub fn split_insert(line: &[u8]) -> (&[u8], Option<&[u8]>) {
    let Some(caps) = INSERT_RE.captures(line) else {
        return (line, None);
    };
    let template = caps.get(1).map_or(line, |m| m.as_bytes());
    let rest = caps
        .get(2)
        .map(|m| m.as_bytes())
        .filter(|r| !r.iter().all(u8::is_ascii_whitespace));
    (template, rest)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}
