//! Content-type sniffing, charset-aware text decoding, and title extraction.

use encoding_rs::Encoding;

const CHARSET_SNIFF_BYTES: usize = 8192;

/// True for `text/html` and `application/xhtml+xml`, with or without parameters.
pub fn is_html_content_type(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|value| {
        let lower = value.to_ascii_lowercase();
        lower.contains("text/html") || lower.contains("application/xhtml+xml")
    })
}

/// Decodes a response body. The label comes from a byte-order mark, then the
/// `Content-Type` charset, then `<meta charset>`; lossy UTF-8 otherwise.
pub fn decode_text(body: &[u8], content_type: Option<&str>) -> String {
    if let Some((encoding, bom_len)) = Encoding::for_bom(body) {
        let (decoded, _) = encoding.decode_without_bom_handling(&body[bom_len..]);
        return decoded.into_owned();
    }

    let content_type = content_type.unwrap_or_default();
    if let Some(encoding) = detect_encoding(body, content_type) {
        let (decoded, _) = encoding.decode_without_bom_handling(body);
        return decoded.into_owned();
    }

    String::from_utf8_lossy(body).into_owned()
}

/// Unknown labels are skipped so a bogus header still lets `<meta>` decide.
fn detect_encoding(body: &[u8], content_type: &str) -> Option<&'static Encoding> {
    let known = |label: String| Encoding::for_label(label.as_bytes());
    charset_from_content_type(content_type)
        .and_then(known)
        .or_else(|| {
            is_html_content_type(Some(content_type))
                .then(|| charset_from_html_prefix(body))
                .flatten()
                .and_then(known)
        })
}

fn charset_from_content_type(content_type: &str) -> Option<String> {
    for part in content_type.split(';').skip(1) {
        let Some((name, value)) = part.split_once('=') else {
            continue;
        };
        if !name.trim().eq_ignore_ascii_case("charset") {
            continue;
        }

        let label = value.trim().trim_matches('"').trim_matches('\'');
        if !label.is_empty() {
            return Some(label.to_owned());
        }
    }

    None
}

fn charset_from_html_prefix(body: &[u8]) -> Option<String> {
    let prefix_len = body.len().min(CHARSET_SNIFF_BYTES);
    let prefix = String::from_utf8_lossy(&body[..prefix_len]);
    let lower = prefix.to_ascii_lowercase();
    let mut search_start = 0_usize;

    while let Some(relative) = lower[search_start..].find("charset=") {
        let charset_start = search_start + relative + "charset=".len();
        if let Some(label) = parse_charset_label(&prefix[charset_start..]) {
            return Some(label);
        }
        search_start = charset_start;
    }

    None
}

fn parse_charset_label(input: &str) -> Option<String> {
    let trimmed = input.trim_start();
    let first = trimmed.chars().next()?;

    let label = if first == '"' || first == '\'' {
        let rest = &trimmed[first.len_utf8()..];
        let end = rest.find(first)?;
        rest[..end].trim()
    } else {
        let end = trimmed
            .find(|ch: char| ch.is_whitespace() || matches!(ch, '"' | '\'' | ';' | '>' | '/'))
            .unwrap_or(trimmed.len());
        trimmed[..end].trim()
    };

    if label.is_empty() {
        None
    } else {
        Some(label.to_owned())
    }
}

/// Text of the first `<title>` element with whitespace collapsed.
pub fn extract_title(document: &str) -> Option<String> {
    let lower = document.to_ascii_lowercase();
    let mut from = 0_usize;
    let open_end = loop {
        let start = from + lower[from..].find("<title")?;
        let after = start + "<title".len();
        let next = lower[after..].chars().next()?;
        if next == '>' || next.is_ascii_whitespace() {
            break after + lower[after..].find('>')? + 1;
        }
        from = after;
    };
    let close = open_end + lower[open_end..].find("</title")?;

    let title = document[open_end..close]
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if title.is_empty() { None } else { Some(title) }
}

#[cfg(test)]
mod tests {
    use super::decode_text;
    use super::extract_title;
    use super::is_html_content_type;

    #[test]
    fn recognises_html_content_types() {
        assert!(is_html_content_type(Some("text/html; charset=utf-8")));
        assert!(is_html_content_type(Some("Application/XHTML+XML")));
        assert!(!is_html_content_type(Some("image/png")));
        assert!(!is_html_content_type(None));
    }

    #[test]
    fn decodes_using_content_type_charset() {
        let body = [0x63, 0x61, 0x66, 0xE9];
        assert_eq!(decode_text(&body, Some("text/plain; charset=ISO-8859-1")), "café");
    }

    #[test]
    fn header_charset_beats_stale_meta_charset() {
        let body = "<meta charset=\"windows-1252\"><p>é".as_bytes();
        assert_eq!(
            decode_text(body, Some("text/html; charset=utf-8")),
            "<meta charset=\"windows-1252\"><p>é"
        );
    }

    #[test]
    fn meta_charset_applies_without_header_charset() {
        let mut body = b"<meta charset=\"windows-1252\"><p>".to_vec();
        body.push(0xE9);
        assert_eq!(
            decode_text(&body, Some("text/html")),
            "<meta charset=\"windows-1252\"><p>é"
        );
    }

    #[test]
    fn byte_order_mark_beats_every_label() {
        let mut body = vec![0xEF, 0xBB, 0xBF];
        body.extend_from_slice("<p>é".as_bytes());
        assert_eq!(decode_text(&body, Some("text/html; charset=windows-1252")), "<p>é");
    }

    #[test]
    fn unknown_header_charset_defers_to_meta() {
        let mut body = b"<meta charset=windows-1252><p>".to_vec();
        body.push(0xE9);
        assert_eq!(
            decode_text(&body, Some("text/html; charset=bogus")),
            "<meta charset=windows-1252><p>é"
        );
    }

    #[test]
    fn unknown_charset_falls_back_to_utf8() {
        assert_eq!(decode_text(b"plain", Some("text/html; charset=bogus")), "plain");
    }

    #[test]
    fn extracts_and_collapses_title() {
        let html = "<html><head><TITLE lang=\"en\">\n  Hello\n   World </TITLE></head></html>";
        assert_eq!(extract_title(html), Some("Hello World".to_owned()));
    }

    #[test]
    fn ignores_lookalike_tags_and_empty_titles() {
        assert_eq!(extract_title("<titlebar>x</titlebar>"), None);
        assert_eq!(extract_title("<title>   </title>"), None);
        assert_eq!(extract_title("<p>no title</p>"), None);
    }
}
