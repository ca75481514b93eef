//! Minimal `multipart/*` body splitter for tile responses.

use bytes::Bytes;

use crate::error::{RasterError, RasterResult};

/// One part of a multipart body.
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Part {
    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Media type of the part, without parameters.
    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
            .map(|v| v.split(';').next().unwrap_or(v).trim())
    }
}

/// Boundary parameter of a multipart `Content-Type` header.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("boundary") {
            let value = value.trim().trim_matches('"');
            (!value.is_empty()).then(|| value.to_string())
        } else {
            None
        }
    })
}

/// Boundary taken from a leading `--boundary` line.
fn sniff_boundary(body: &[u8]) -> Option<String> {
    let line_end = find(body, b"\r\n", 0).or_else(|| find(body, b"\n", 0))?;
    let line = body[..line_end].strip_prefix(b"--")?;
    let boundary = std::str::from_utf8(line).ok()?.trim();
    (!boundary.is_empty()).then(|| boundary.to_string())
}

/// Split a multipart body into its parts.
///
/// The boundary comes from the `Content-Type` header if it carries one,
/// otherwise from the first line of the body.
pub fn parse(content_type: Option<&str>, body: &Bytes) -> RasterResult<Vec<Part>> {
    let boundary = content_type
        .and_then(boundary_from_content_type)
        .or_else(|| sniff_boundary(body))
        .ok_or_else(|| RasterError::Protocol("cannot find multipart boundary".to_string()))?;
    let delimiter = format!("--{}", boundary).into_bytes();

    let mut parts = Vec::new();
    let mut pos = find(body, &delimiter, 0)
        .ok_or_else(|| RasterError::Protocol("multipart boundary not found in body".to_string()))?;

    loop {
        pos += delimiter.len();
        if body[pos..].starts_with(b"--") {
            break;
        }
        pos = skip_line_break(body, pos);

        let header_end = find(body, b"\r\n\r\n", pos)
            .map(|i| (i, i + 4))
            .or_else(|| find(body, b"\n\n", pos).map(|i| (i, i + 2)))
            .ok_or_else(|| RasterError::Protocol("truncated multipart headers".to_string()))?;
        let headers = parse_headers(&body[pos..header_end.0]);

        let next = find(body, &delimiter, header_end.1)
            .ok_or_else(|| RasterError::Protocol("unterminated multipart part".to_string()))?;
        let mut end = next;
        if end >= header_end.1 + 2 && &body[end - 2..end] == b"\r\n" {
            end -= 2;
        } else if end > header_end.1 && body[end - 1] == b'\n' {
            end -= 1;
        }
        parts.push(Part {
            headers,
            body: body.slice(header_end.1..end),
        });
        pos = next;
    }

    Ok(parts)
}

fn parse_headers(block: &[u8]) -> Vec<(String, String)> {
    String::from_utf8_lossy(block)
        .lines()
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

fn skip_line_break(body: &[u8], pos: usize) -> usize {
    if body[pos..].starts_with(b"\r\n") {
        pos + 2
    } else if body[pos..].starts_with(b"\n") {
        pos + 1
    } else {
        pos
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}
