//! Notification decoding for the door opener
//! This module turns raw NUS notification payloads into logical text lines.

/// A decoded notification payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// UTF-8 text split into lines, in arrival order
    Lines(Vec<String>),
    /// Payload that is not (non-empty) UTF-8, rendered for diagnostics
    Raw(String),
}

/// Decodes one notification payload.
///
/// Text is split on every line break; empty segments are dropped, so a
/// payload made only of line breaks yields no lines at all.
pub fn decode_notification(payload: &[u8]) -> Notification {
    match std::str::from_utf8(payload) {
        Ok(text) if !text.is_empty() => Notification::Lines(
            text.split(is_line_break)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
        ),
        _ => Notification::Raw(render_raw(payload)),
    }
}

/// Renders bytes as `<len bytes: 0x...>`.
pub fn render_raw(payload: &[u8]) -> String {
    let hex: String = payload.iter().map(|b| format!("{:02x}", b)).collect();
    format!("<{} bytes: 0x{}>", payload.len(), hex)
}

fn is_line_break(c: char) -> bool {
    matches!(
        c,
        '\n' | '\r' | '\u{0B}' | '\u{0C}' | '\u{85}' | '\u{2028}' | '\u{2029}'
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_multi_line_payload() {
        assert_eq!(
            decode_notification(b"STATE:LOCKED\nOK\n"),
            Notification::Lines(vec!["STATE:LOCKED".to_string(), "OK".to_string()])
        );
    }

    #[test]
    fn handles_crlf_and_missing_terminator() {
        assert_eq!(
            decode_notification(b"A\r\nB"),
            Notification::Lines(vec!["A".to_string(), "B".to_string()])
        );
    }

    #[test]
    fn only_line_breaks_yields_nothing() {
        assert_eq!(decode_notification(b"\n\r\n"), Notification::Lines(vec![]));
    }

    #[test]
    fn invalid_utf8_degrades_to_raw() {
        assert_eq!(
            decode_notification(&[0xff, 0x00, 0x12]),
            Notification::Raw("<3 bytes: 0xff0012>".to_string())
        );
    }

    #[test]
    fn empty_payload_is_raw() {
        assert_eq!(decode_notification(&[]), Notification::Raw("<0 bytes: 0x>".to_string()));
    }
}
