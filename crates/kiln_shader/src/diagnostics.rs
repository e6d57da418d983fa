//! Rewrites driver diagnostics from `#line` source ids back to file names.
//!
//! Drivers report locations as `<sourceId>:<line>` or `<sourceId>(<line>)`.
//! Both forms are recognised anywhere in the log as long as the id starts a
//! token; ids the table does not know are left untouched.

/// Replaces every recognised source id in `log` with the name `lookup`
/// returns for it.
pub fn remap_source_ids<'a>(log: &str, lookup: impl Fn(usize) -> Option<&'a str>) -> String {
    let bytes = log.as_bytes();
    let mut out = String::with_capacity(log.len());
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        let starts_token = i == 0 || !is_word_byte(bytes[i - 1]);
        if !(starts_token && bytes[i].is_ascii_digit()) {
            i += 1;
            continue;
        }

        let digits_end = scan_digits(bytes, i);
        if is_location_suffix(bytes, digits_end)
            && let Some(name) = log[i..digits_end].parse::<usize>().ok().and_then(&lookup)
        {
            out.push_str(&log[copied..i]);
            out.push_str(name);
            copied = digits_end;
        }
        i = digits_end;
    }

    out.push_str(&log[copied..]);
    out
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.')
}

fn scan_digits(bytes: &[u8], from: usize) -> usize {
    bytes[from..]
        .iter()
        .position(|b| !b.is_ascii_digit())
        .map_or(bytes.len(), |offset| from + offset)
}

/// `:<digits>` or `(<digits>)` at `at`.
fn is_location_suffix(bytes: &[u8], at: usize) -> bool {
    match bytes.get(at) {
        Some(b':') => bytes.get(at + 1).is_some_and(u8::is_ascii_digit),
        Some(b'(') => {
            let end = scan_digits(bytes, at + 1);
            end > at + 1 && bytes.get(end) == Some(&b')')
        }
        _ => false,
    }
}
