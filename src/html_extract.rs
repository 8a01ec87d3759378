//! Component B: a tolerant, single-pass HTML link extractor.
//!
//! This is deliberately **not** a full HTML5 tree builder — per the spec, a lexer that scans for
//! tag-open tokens and attribute values is sufficient, faster, and more deterministic. It never
//! executes attribute content and produces best-effort output for malformed markup; the only
//! hard failure is input that isn't valid UTF-8.
//!
//! The one-pass design matters: the extractor reports the exact byte offset and length of every
//! discovered attribute *value*, so [`crate::materializer`] can splice a rewritten URL into the
//! original bytes without re-serializing the document.

use std::str::Utf8Error;

/// A discovered URL plus the byte span of the attribute value it came from, so that the
/// Materializer can splice a replacement in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSpan {
    /// Byte offset of the URL text within the original buffer.
    pub start: usize,
    /// Byte length of the URL text.
    pub len: usize,
    /// The raw, unescaped-at-the-lexer-level URL text (attribute values are not HTML-entity
    /// decoded; few real sites escape entities inside `href`/`src`, and per spec the extractor
    /// must not invoke a validating parser).
    pub raw: String,
    /// The attribute this URL was read from, for provenance in error messages.
    pub source_attr: &'static str,
}

impl LinkSpan {
    fn new(start: usize, raw: &str, source_attr: &'static str) -> Self {
        Self {
            start,
            len: raw.len(),
            raw: raw.to_string(),
            source_attr,
        }
    }
}

/// Extract every discoverable link from an HTML document.
///
/// Fails only if `html` is not valid UTF-8. Malformed tag soup never produces an error: it is
/// parsed best-effort and anything unrecognized is simply skipped.
pub fn extract(html: &[u8]) -> Result<Vec<LinkSpan>, Utf8Error> {
    let text = std::str::from_utf8(html)?;
    Ok(extract_str(text))
}

/// Classify a response as HTML per the fetch contract: a `Content-Type` containing `text/html`
/// (case-insensitive), or an absent `Content-Type` whose body starts with `<!doctype` or `<html`.
pub fn is_html(content_type: &str, body: &[u8]) -> bool {
    let media_type = content_type.split(';').next().unwrap_or("").trim();
    if !media_type.is_empty() {
        return media_type.eq_ignore_ascii_case("text/html");
    }
    let start = body.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(body.len());
    let sniffed = &body[start..];
    sniffed.len() >= 5
        && (sniffed[..5].eq_ignore_ascii_case(b"<html") || sniffed.get(..9).is_some_and(|s| s.eq_ignore_ascii_case(b"<!doctype")))
}

fn extract_str(html: &str) -> Vec<LinkSpan> {
    let bytes = html.as_bytes();
    let mut links = Vec::new();
    let mut i = 0usize;
    let len = bytes.len();

    while i < len {
        let Some(lt) = html[i..].find('<') else {
            break;
        };
        let tag_start = i + lt;

        if html[tag_start..].starts_with("<!--") {
            i = match html[tag_start + 4..].find("-->") {
                Some(end) => tag_start + 4 + end + 3,
                None => len,
            };
            continue;
        }

        // Doctype / closing tags / processing instructions: skip to the next `>`.
        let after_lt = tag_start + 1;
        let next_char = html[after_lt..].chars().next();
        if matches!(next_char, Some('!') | Some('/') | Some('?')) {
            i = match html[after_lt..].find('>') {
                Some(end) => after_lt + end + 1,
                None => len,
            };
            continue;
        }

        // Must be followed by an ASCII letter to be a real tag-open token.
        if !matches!(next_char, Some(c) if c.is_ascii_alphabetic()) {
            i = after_lt;
            continue;
        }

        let Some(tag) = parse_tag(html, after_lt) else {
            i = after_lt;
            continue;
        };

        emit_links_for_tag(&tag, &mut links);

        i = tag.tag_end;

        // `<script>`/`<style>` content is opaque text, never scanned for links or further tags.
        if tag.name == "script" || tag.name == "style" {
            let closing = format!("</{}", tag.name);
            i = match find_case_insensitive(html, &closing, i) {
                Some(pos) => match html[pos..].find('>') {
                    Some(end) => pos + end + 1,
                    None => len,
                },
                None => len,
            };
        }
    }

    links
}

struct ParsedTag {
    name: String,
    attrs: Vec<ParsedAttr>,
    /// Byte offset of the character immediately after the tag's closing `>`.
    tag_end: usize,
}

struct ParsedAttr {
    name: String,
    /// `None` for a valueless boolean attribute.
    value: Option<(usize, String)>,
}

/// Parse one tag starting at `name_start` (the byte right after `<`). Returns `None` if the `<`
/// turns out not to open a well-formed-enough tag (unterminated).
fn parse_tag(html: &str, name_start: usize) -> Option<ParsedTag> {
    let bytes = html.as_bytes();
    let len = bytes.len();

    let mut i = name_start;
    while i < len && is_name_char(bytes[i]) {
        i += 1;
    }
    if i == name_start {
        return None;
    }
    let name = html[name_start..i].to_ascii_lowercase();

    let mut attrs = Vec::new();

    loop {
        i = skip_whitespace(html, i);
        if i >= len {
            return None;
        }
        if bytes[i] == b'>' {
            return Some(ParsedTag {
                name,
                attrs,
                tag_end: i + 1,
            });
        }
        if bytes[i] == b'/' {
            // Self-closing slash; look for the following `>`.
            i += 1;
            continue;
        }
        if !is_attr_name_start(bytes[i]) {
            // Something we don't understand (e.g. a stray `<` inside unquoted content);
            // bail out of this tag rather than looping forever.
            return None;
        }

        let attr_name_start = i;
        while i < len && is_attr_name_char(bytes[i]) {
            i += 1;
        }
        let attr_name = html[attr_name_start..i].to_ascii_lowercase();

        let after_name = skip_whitespace(html, i);
        if after_name < len && bytes[after_name] == b'=' {
            let value_lead = skip_whitespace(html, after_name + 1);
            if value_lead >= len {
                return None;
            }
            let (value_start, value_end, next) = match bytes[value_lead] {
                quote @ (b'\'' | b'"') => {
                    let content_start = value_lead + 1;
                    match html[content_start..].find(quote as char) {
                        Some(rel_end) => (
                            content_start,
                            content_start + rel_end,
                            content_start + rel_end + 1,
                        ),
                        None => return None,
                    }
                }
                _ => {
                    let mut end = value_lead;
                    while end < len && !is_whitespace(bytes[end]) && bytes[end] != b'>' {
                        end += 1;
                    }
                    (value_lead, end, end)
                }
            };
            attrs.push(ParsedAttr {
                name: attr_name,
                value: Some((value_start, html[value_start..value_end].to_string())),
            });
            i = next;
        } else {
            attrs.push(ParsedAttr {
                name: attr_name,
                value: None,
            });
            i = after_name;
        }
    }
}

fn is_name_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b':'
}

fn is_attr_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'-' || b == b':' || b == b'@' || b == b'%'
}

fn is_attr_name_char(b: u8) -> bool {
    is_attr_name_start(b) || b.is_ascii_digit() || b == b'.'
}

fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0c)
}

fn skip_whitespace(html: &str, mut i: usize) -> usize {
    let bytes = html.as_bytes();
    while i < bytes.len() && is_whitespace(bytes[i]) {
        i += 1;
    }
    i
}

fn find_case_insensitive(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let haystack_lower = haystack[from..].to_ascii_lowercase();
    haystack_lower
        .find(&needle.to_ascii_lowercase())
        .map(|pos| from + pos)
}

fn attr<'a>(tag: &'a ParsedTag, name: &str) -> Option<&'a ParsedAttr> {
    tag.attrs.iter().find(|a| a.name == name)
}

/// Apply the fixed discovery table from §4.B to one parsed tag.
fn emit_links_for_tag(tag: &ParsedTag, out: &mut Vec<LinkSpan>) {
    let href_elements = ["a", "area", "link"];
    let src_elements = ["img", "script", "iframe", "source", "audio", "video", "track"];
    let srcset_elements = ["img", "source"];

    if href_elements.contains(&tag.name.as_str()) {
        emit_simple(tag, "href", out);
    }
    if src_elements.contains(&tag.name.as_str()) {
        emit_simple(tag, "src", out);
    }
    if srcset_elements.contains(&tag.name.as_str()) {
        emit_srcset(tag, out);
    }
    if tag.name == "form" {
        emit_simple(tag, "action", out);
    }
    if tag.name == "object" {
        emit_simple(tag, "data", out);
    }
    if tag.name == "meta" {
        emit_meta_refresh(tag, out);
    }
}

fn emit_simple(tag: &ParsedTag, attr_name: &'static str, out: &mut Vec<LinkSpan>) {
    if let Some(ParsedAttr {
        value: Some((start, raw)),
        ..
    }) = attr(tag, attr_name)
    {
        if !raw.is_empty() {
            out.push(LinkSpan::new(*start, raw, attr_name));
        }
    }
}

/// `srcset` is a comma-separated list of `<url> [descriptor]` entries; each URL is its own span.
fn emit_srcset(tag: &ParsedTag, out: &mut Vec<LinkSpan>) {
    let Some(ParsedAttr {
        value: Some((start, raw)),
        ..
    }) = attr(tag, "srcset")
    else {
        return;
    };

    let mut cursor = 0usize;
    for candidate in raw.split(',') {
        let candidate_offset = cursor;
        cursor += candidate.len() + 1; // +1 for the comma we split on.

        let trimmed_lead = candidate.len() - candidate.trim_start().len();
        let url_part = candidate.trim_start().split_whitespace().next();
        if let Some(url) = url_part {
            if !url.is_empty() {
                out.push(LinkSpan::new(start + candidate_offset + trimmed_lead, url, "srcset"));
            }
        }
    }
}

/// `<meta http-equiv="refresh" content="5;url=/foo">` — only the URL portion of `content` is a
/// span, not the whole attribute value.
fn emit_meta_refresh(tag: &ParsedTag, out: &mut Vec<LinkSpan>) {
    let is_refresh = attr(tag, "http-equiv")
        .and_then(|a| a.value.as_ref())
        .map(|(_, v)| v.eq_ignore_ascii_case("refresh"))
        .unwrap_or(false);
    if !is_refresh {
        return;
    }
    let Some(ParsedAttr {
        value: Some((start, raw)),
        ..
    }) = attr(tag, "content")
    else {
        return;
    };

    let lower = raw.to_ascii_lowercase();
    let Some(url_kw) = lower.find("url") else {
        return;
    };
    let after_kw = url_kw + 3;
    let rest = &raw[after_kw..];
    let Some(eq_rel) = rest.find('=') else {
        return;
    };
    let mut value_start = after_kw + eq_rel + 1;
    // Skip whitespace and a single matching quote wrapping the URL, mirroring the attribute
    // value parser above but within the nested `content` string.
    while value_start < raw.len() && is_whitespace(raw.as_bytes()[value_start]) {
        value_start += 1;
    }
    let quoted = raw.as_bytes().get(value_start).copied();
    let (value_start, value_end) = match quoted {
        Some(q @ (b'\'' | b'"')) => {
            let inner_start = value_start + 1;
            match raw[inner_start..].find(q as char) {
                Some(rel_end) => (inner_start, inner_start + rel_end),
                None => (inner_start, raw.len()),
            }
        }
        _ => {
            let mut end = value_start;
            while end < raw.len() && raw.as_bytes()[end] != b';' {
                end += 1;
            }
            (value_start, end)
        }
    };
    if value_end > value_start {
        out.push(LinkSpan::new(
            start + value_start,
            &raw[value_start..value_end],
            "content",
        ));
    }
}
