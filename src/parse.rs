//! Parsing of raw response header lines delivered by the transfer engine.
//!
//! The engine hands us one line at a time in a borrowed buffer that is only
//! valid for the duration of the callback, so parsing copies out at most the
//! two resulting strings and never reads past the supplied length.

/// Parse a single header line into a `(name, value)` pair.
///
/// Trailing CR/LF and whitespace are trimmed from the right. The line is
/// split at the first `:`; the name is taken verbatim and the value has any
/// leading whitespace skipped, preserving internal whitespace. Lines that
/// are empty after trimming or contain no `:` yield `None`.
pub(crate) fn parse_header_line(line: &[u8]) -> Option<(String, String)> {
    let mut line = line;

    while let Some((byte, left)) = line.split_last() {
        if byte.is_ascii_whitespace() {
            line = left;
        } else {
            break;
        }
    }

    if line.is_empty() {
        return None;
    }

    let split_index = line.iter().position(|&byte| byte == b':')?;
    let name = &line[..split_index];
    let mut value = &line[split_index + 1..];

    while let Some((byte, right)) = value.split_first() {
        if byte.is_ascii_whitespace() {
            value = right;
        } else {
            break;
        }
    }

    Some((
        String::from_utf8_lossy(name).into_owned(),
        String::from_utf8_lossy(value).into_owned(),
    ))
}

/// Recognize a status line and extract the status code.
///
/// The engine delivers the status line through the same callback as header
/// lines, so this is used to tell the two apart. A new status line also
/// marks the start of a new intermediate message (e.g. a redirect or a `100
/// Continue`), whose accumulated headers must be discarded.
pub(crate) fn parse_status_line(line: &[u8]) -> Option<u16> {
    if !line.starts_with(b"HTTP/") {
        return None;
    }

    let mut parts = line.split(u8::is_ascii_whitespace);

    // Skip the version token, then take the first non-empty field.
    parts.next()?;

    let code = parts.find(|part| !part.is_empty())?;

    if code.len() != 3 {
        return None;
    }

    std::str::from_utf8(code).ok()?.parse().ok()
}
