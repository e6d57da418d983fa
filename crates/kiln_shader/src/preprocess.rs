//! `#include` expansion.
//!
//! A single left-to-right scan over the source text:
//!
//! - ordinary text is copied verbatim
//! - `//` and `/* */` comments are copied too, but directives inside them are
//!   not interpreted
//! - `#include "name"` at the start of a line is replaced by the processed
//!   text of the named file, followed by a `#line` marker that restores the
//!   numbering of the including file
//!
//! Output always starts with `#line 1 <sourceId>`. Included text carries its
//! own marker, so diagnostics can be mapped back to the right file and line.

use std::fmt::Write as _;
use std::sync::Arc;
use xxhash_rust::xxh32::Xxh32;

use kiln_core::errors::ShaderError;

/// Resolves an include. Receives the quoted name and the line of the
/// directive and returns the fully processed text of the included file.
pub(crate) type IncludeResolver<'a> =
    dyn FnMut(&str, u32) -> std::result::Result<Arc<str>, ShaderError> + 'a;

const DIRECTIVE: &[u8] = b"include";

/// Expands every include of `text`. `file` is only used for error messages.
pub(crate) fn expand_includes(
    text: &str,
    file: &str,
    source_id: usize,
    resolve: &mut IncludeResolver<'_>,
) -> std::result::Result<String, ShaderError> {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len() + 32);
    let _ = writeln!(out, "#line 1 {source_id}");

    let parse_error = |line: u32, message: &str| ShaderError::Parse {
        file: file.to_string(),
        line,
        message: message.to_string(),
    };

    let mut i = 0;
    let mut line: u32 = 1;
    let mut line_begin = 0;
    let mut run_start = 0;
    let mut at_line_start = true;

    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                i += 1;
                line += 1;
                line_begin = i;
                at_line_start = true;
            }
            b' ' | b'\t' | b'\r' => i += 1,
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                i = find_line_end(bytes, i);
                at_line_start = false;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let opened_at = line;
                i += 2;
                loop {
                    match bytes.get(i) {
                        None => return Err(parse_error(opened_at, "unterminated block comment")),
                        Some(b'*') if bytes.get(i + 1) == Some(&b'/') => {
                            i += 2;
                            break;
                        }
                        Some(b'\n') => {
                            line += 1;
                            i += 1;
                        }
                        Some(_) => i += 1,
                    }
                }
                at_line_start = false;
            }
            b'#' if at_line_start => {
                let Some(after) = match_directive(bytes, i + 1) else {
                    at_line_start = false;
                    i += 1;
                    continue;
                };

                let name = parse_include_name(bytes, after)
                    .map_err(|message| parse_error(line, message))?;
                let included = resolve(&text[name.clone()], line)?;

                out.push_str(&text[run_start..line_begin]);
                out.push_str(&included);
                if !included.ends_with('\n') {
                    out.push('\n');
                }
                let _ = writeln!(out, "#line {} {source_id}", line + 1);

                let end = find_line_end(bytes, name.end);
                i = (end + 1).min(bytes.len());
                if end < bytes.len() {
                    line += 1;
                }
                line_begin = i;
                run_start = i;
                at_line_start = true;
            }
            _ => {
                at_line_start = false;
                i += 1;
            }
        }
    }

    out.push_str(&text[run_start..]);
    Ok(out)
}

/// xxh32 of expanded text, hashing `#line` markers without their source id.
pub(crate) fn content_checksum(text: &str) -> u32 {
    let mut hasher = Xxh32::new(0);
    for line in text.split_inclusive('\n') {
        match marker_line_number(line) {
            Some(number) => {
                hasher.update(b"#line ");
                hasher.update(number.as_bytes());
                hasher.update(b"\n");
            }
            None => hasher.update(line.as_bytes()),
        }
    }
    hasher.digest()
}

/// Line number of a `#line <line> <sourceId>` marker.
fn marker_line_number(line: &str) -> Option<&str> {
    let (number, id) = line.strip_prefix("#line ")?.trim_end().split_once(' ')?;
    (!id.is_empty() && id.bytes().all(|b| b.is_ascii_digit())).then_some(number)
}

fn find_line_end(bytes: &[u8], from: usize) -> usize {
    bytes[from..]
        .iter()
        .position(|b| *b == b'\n')
        .map_or(bytes.len(), |offset| from + offset)
}

/// Position after `include` if the directive at `from` is an include.
fn match_directive(bytes: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while matches!(bytes.get(i), Some(b' ' | b'\t')) {
        i += 1;
    }
    let end = i + DIRECTIVE.len();
    if bytes.get(i..end)? != DIRECTIVE {
        return None;
    }
    match bytes.get(end) {
        Some(b) if b.is_ascii_alphanumeric() || *b == b'_' => None,
        _ => Some(end),
    }
}

/// Byte range of the quoted file name following an include directive.
fn parse_include_name(
    bytes: &[u8],
    from: usize,
) -> std::result::Result<std::ops::Range<usize>, &'static str> {
    let mut i = from;
    while matches!(bytes.get(i), Some(b' ' | b'\t')) {
        i += 1;
    }
    if bytes.get(i) != Some(&b'"') {
        return Err("expected a quoted file name after #include");
    }
    let start = i + 1;
    let close = bytes[start..]
        .iter()
        .position(|b| matches!(b, b'"' | b'\n'))
        .map(|offset| start + offset);
    match close {
        Some(end) if bytes[end] == b'"' => {
            if end == start {
                Err("empty file name in #include")
            } else {
                Ok(start..end)
            }
        }
        _ => Err("unterminated #include directive"),
    }
}
