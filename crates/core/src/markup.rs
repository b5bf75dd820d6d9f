//! XML-like tool markup helpers.
//!
//! The model invokes tools with flat, non-nested markup:
//!
//! ```text
//! <read_file>
//! <path>src/main.rs</path>
//! </read_file>
//! ```
//!
//! These helpers locate open tags, whole blocks, and `<key>value</key>`
//! fields. Values are taken verbatim between the first matching open and
//! close tags (multi-line allowed, nothing is re-quoted), then trimmed and
//! entity-unescaped.

use indexmap::IndexMap;

/// A complete `<name>…</name>` block inside a larger text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagBlock {
    pub name: String,
    /// Byte offset of `<name>`
    pub start: usize,
    /// Byte offset just past `<name>`
    pub inner_start: usize,
    /// Byte offset of `</name>`
    pub inner_end: usize,
    /// Byte offset just past `</name>`
    pub end: usize,
}

/// The close marker for a tag name.
pub fn close_tag(name: &str) -> String {
    format!("</{name}>")
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Parse `<ident>` at byte offset `pos`. Returns the name and the offset
/// just past `>`.
fn open_tag_at(text: &str, pos: usize) -> Option<(&str, usize)> {
    let rest = text.get(pos..)?.strip_prefix('<')?;
    let mut chars = rest.char_indices();
    let (_, first) = chars.next()?;
    if !is_ident_start(first) {
        return None;
    }
    for (idx, c) in chars {
        if c == '>' {
            return Some((&rest[..idx], pos + 1 + idx + 1));
        }
        if !is_ident_char(c) {
            return None;
        }
    }
    None
}

/// Find the earliest `<name>` at or after `from` whose name satisfies
/// `accept`. Returns `(start, end_of_open_tag, name)`.
pub fn find_open_tag<'a>(
    text: &'a str,
    from: usize,
    accept: impl Fn(&str) -> bool,
) -> Option<(usize, usize, &'a str)> {
    let haystack = text.get(from..)?;
    haystack.match_indices('<').find_map(|(rel, _)| {
        let start = from + rel;
        open_tag_at(text, start)
            .filter(|(name, _)| accept(name))
            .map(|(name, end)| (start, end, name))
    })
}

/// All complete, non-overlapping blocks whose tag satisfies `accept`, in
/// order of appearance. An open tag with no matching close is skipped.
pub fn find_blocks(text: &str, accept: impl Fn(&str) -> bool) -> Vec<TagBlock> {
    let mut blocks = Vec::new();
    let mut cursor = 0;
    while let Some((start, inner_start, name)) = find_open_tag(text, cursor, &accept) {
        let close = close_tag(name);
        match text[inner_start..].find(&close) {
            Some(rel) => {
                let inner_end = inner_start + rel;
                let end = inner_end + close.len();
                blocks.push(TagBlock {
                    name: name.to_string(),
                    start,
                    inner_start,
                    inner_end,
                    end,
                });
                cursor = end;
            }
            None => cursor = inner_start,
        }
    }
    blocks
}

/// Extract ordered `<key>value</key>` pairs from the inside of a block.
///
/// When `fields` is non-empty only those keys are recognised, so markup
/// inside a value (HTML in file content, say) is not mistaken for a field.
/// The first occurrence of a key wins.
pub fn extract_fields(inner: &str, fields: &[String]) -> IndexMap<String, String> {
    let mut out = IndexMap::new();
    for block in find_blocks(inner, |name| accepts_field(fields, name)) {
        let value = unescape(inner[block.inner_start..block.inner_end].trim());
        out.entry(block.name).or_insert(value);
    }
    out
}

/// Rebuild `inner`, replacing the raw text of each field value for which
/// `replace` returns `Some`. Everything else is kept byte-for-byte.
pub fn rewrite_fields(
    inner: &str,
    fields: &[String],
    mut replace: impl FnMut(&str, &str) -> Option<String>,
) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut last = 0;
    for block in find_blocks(inner, |name| accepts_field(fields, name)) {
        let raw = &inner[block.inner_start..block.inner_end];
        if let Some(new_value) = replace(&block.name, raw) {
            out.push_str(&inner[last..block.inner_start]);
            out.push_str(&new_value);
            last = block.inner_end;
        }
    }
    out.push_str(&inner[last..]);
    out
}

fn accepts_field(fields: &[String], name: &str) -> bool {
    fields.is_empty() || fields.iter().any(|f| f == name)
}

/// Escape text for inclusion in markup.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

/// Reverse [`escape`]. `&amp;` is decoded last so `&amp;lt;` stays `&lt;`.
pub fn unescape(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
