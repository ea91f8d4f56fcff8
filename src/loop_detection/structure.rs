//! Recognition of structured markdown output.
//!
//! Tables, lists, headings, quotes and dividers legitimately repeat the same
//! few characters (`|`, `-`, `#`). Fragments carrying them reset analysis
//! rather than being fed to the periodicity check.

use lazy_regex::lazy_regex;

/// Fence marker opening or closing a code block
pub const CODE_FENCE: &str = "```";

static RE_TABLE_ROW: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"(?m)^\s*\|.*\|");
static RE_UNORDERED_LIST: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"(?m)^\s*[*+\-]\s+\S");
static RE_ORDERED_LIST: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"(?m)^\s*\d{1,9}[.)]\s+\S");
static RE_HEADING: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"(?m)^\s{0,3}#{1,6}(\s|$)");
static RE_BLOCKQUOTE: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"(?m)^\s*>\s");
static RE_DIVIDER: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"(?m)^\s*(-{3,}|={3,}|\*{3,}|_{3,})\s*$");

/// Kind of markdown structure found in a fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureKind {
    TableRow,
    UnorderedList,
    OrderedList,
    Heading,
    Blockquote,
    Divider,
}

impl StructureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StructureKind::TableRow => "table_row",
            StructureKind::UnorderedList => "unordered_list",
            StructureKind::OrderedList => "ordered_list",
            StructureKind::Heading => "heading",
            StructureKind::Blockquote => "blockquote",
            StructureKind::Divider => "divider",
        }
    }
}

/// Classify a fragment, returning the first structure it contains
///
/// Dividers are tested before list items so that `---` is not reported as a
/// bullet.
pub fn detect_structure(fragment: &str) -> Option<StructureKind> {
    let checks: [(&regex::Regex, StructureKind); 6] = [
        (&*RE_TABLE_ROW, StructureKind::TableRow),
        (&*RE_DIVIDER, StructureKind::Divider),
        (&*RE_UNORDERED_LIST, StructureKind::UnorderedList),
        (&*RE_ORDERED_LIST, StructureKind::OrderedList),
        (&*RE_HEADING, StructureKind::Heading),
        (&*RE_BLOCKQUOTE, StructureKind::Blockquote),
    ];

    checks
        .into_iter()
        .find(|(re, _)| re.is_match(fragment))
        .map(|(_, kind)| kind)
}

/// Number of code fence markers in a fragment
pub fn count_fences(fragment: &str) -> usize {
    fragment.matches(CODE_FENCE).count()
}
