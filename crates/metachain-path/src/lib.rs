//! Addressing grammar for hierarchical metadata stores.
//!
//! A compound key reaches into nested stores and sequences in one call:
//!
//! ```text
//! Key  := Name ( '.' Key | Index Tail? )?
//! Tail := '.' Key | Index Tail?
//! Index := '[' Digits ']'
//! ```
//!
//! Resolution is hop-by-hop. A keyed store asks [`split_name`] for the
//! leading name and hands whatever follows to the container found under it;
//! an indexed store asks [`split_index`] for the leading `[n]`. The
//! remainder is returned unparsed and tagged with the grammar position it
//! starts in, so each container only ever parses its own hop.
//!
//! # Literal brackets
//!
//! A `[` opens an index only when a `]` closes it, the characters between
//! are all ASCII digits, and the `]` is followed by end of key, `.`, or
//! another `[`. Anything else is part of the name, so `"weird[x]"` and
//! `"a[1]b"` are ordinary names.
//!
//! # Escapes
//!
//! A backslash makes the next `.`, `[` or `\` literal: `"a\.b"` names the
//! single key `a.b`.

pub mod error;

use std::borrow::Cow;

pub use error::{PathError, Result};

/// The unparsed remainder of a compound key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rest<'a> {
    /// Continues with a name (the text after a `.`).
    Member(&'a str),
    /// Continues with an index (the text starting at a `[`).
    Index(&'a str),
}

impl<'a> Rest<'a> {
    /// The raw remainder text.
    pub fn as_str(&self) -> &'a str {
        match self {
            Rest::Member(s) | Rest::Index(s) => s,
        }
    }
}

/// The leading name of a key plus whatever follows it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameHop<'a> {
    pub head: Cow<'a, str>,
    pub rest: Option<Rest<'a>>,
}

impl NameHop<'_> {
    /// `true` when the key is a single name with nothing after it.
    pub fn is_leaf(&self) -> bool {
        self.rest.is_none()
    }
}

/// The leading index of a key plus whatever follows it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexHop<'a> {
    pub index: usize,
    pub rest: Option<Rest<'a>>,
}

/// Byte offset of the closing `]` if an index opens at `at`.
fn index_close(key: &str, at: usize) -> Option<usize> {
    let bytes = key.as_bytes();
    if bytes.get(at) != Some(&b'[') {
        return None;
    }
    let close = at + 1 + key[at + 1..].find(']')?;
    let digits = &key[at + 1..close];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match bytes.get(close + 1) {
        None | Some(b'.') | Some(b'[') => Some(close),
        _ => None,
    }
}

/// Classify the text following a name or an index.
fn rest_after(key: &str, at: usize) -> Option<Rest<'_>> {
    match key.as_bytes().get(at) {
        None => None,
        Some(b'.') => Some(Rest::Member(&key[at + 1..])),
        Some(_) => Some(Rest::Index(&key[at..])),
    }
}

/// Split the leading name off `key`.
///
/// Never fails: a key with no recognized separator is a single name.
///
/// ```
/// use metachain_path::{split_name, Rest};
///
/// let hop = split_name("Axes[1].name");
/// assert_eq!(hop.head, "Axes");
/// assert_eq!(hop.rest, Some(Rest::Index("[1].name")));
///
/// assert!(split_name("weird[x]").is_leaf());
/// ```
pub fn split_name(key: &str) -> NameHop<'_> {
    let bytes = key.as_bytes();
    let mut escaped: Option<String> = None;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if matches!(bytes.get(i + 1), Some(b'.' | b'[' | b'\\')) => {
                let buf = escaped.get_or_insert_with(|| key[..i].to_string());
                buf.push(bytes[i + 1] as char);
                i += 2;
                continue;
            }
            b'.' => {
                return finish(key, i, escaped);
            }
            b'[' if index_close(key, i).is_some() => {
                return finish(key, i, escaped);
            }
            _ => {}
        }
        // Copy the whole UTF-8 character when building an unescaped head.
        let width = key[i..].chars().next().map_or(1, char::len_utf8);
        if let Some(buf) = escaped.as_mut() {
            buf.push_str(&key[i..i + width]);
        }
        i += width;
    }
    NameHop {
        head: escaped.map_or(Cow::Borrowed(key), Cow::Owned),
        rest: None,
    }
}

fn finish(key: &str, at: usize, escaped: Option<String>) -> NameHop<'_> {
    NameHop {
        head: escaped.map_or(Cow::Borrowed(&key[..at]), Cow::Owned),
        rest: rest_after(key, at),
    }
}

/// Split the leading `[n]` off `key`.
///
/// ```
/// use metachain_path::{split_index, Rest};
///
/// let hop = split_index("[1].name").unwrap();
/// assert_eq!(hop.index, 1);
/// assert_eq!(hop.rest, Some(Rest::Member("name")));
/// ```
pub fn split_index(key: &str) -> Result<IndexHop<'_>> {
    let close = index_close(key, 0).ok_or_else(|| PathError::ExpectedIndex {
        key: key.to_string(),
    })?;
    let digits = &key[1..close];
    let index = digits.parse::<usize>().map_err(|_| PathError::MalformedIndex {
        key: key.to_string(),
        segment: digits.to_string(),
    })?;
    Ok(IndexHop {
        index,
        rest: rest_after(key, close + 1),
    })
}

/// Escape a literal name so that [`split_name`] returns it whole.
pub fn escape_name(name: &str) -> Cow<'_, str> {
    if !name.contains(['.', '[', '\\']) {
        return Cow::Borrowed(name);
    }
    let mut out = String::with_capacity(name.len() + 4);
    for ch in name.chars() {
        if matches!(ch, '.' | '[' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    Cow::Owned(out)
}
