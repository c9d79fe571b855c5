//! `text/event-stream` message formatting.

use std::fmt::Write;

/// Formats one event.
///
/// `retry:` and `id:` lines are written when non zero, `event:` when given. The message
/// is split into `data:` lines at `\n`, `\r` and `\r\n`; the event ends with a blank
/// line. Without a message only the field lines are produced.
pub fn format_event(message: Option<&str>, event: Option<&str>, id: u32, reconnect: u32) -> String {
    let len = message.map_or(0, str::len) + event.map_or(0, str::len) + 42;
    let mut out = String::with_capacity(len);

    if reconnect != 0 {
        let _ = writeln!(out, "retry: {reconnect}");
    }
    if id != 0 {
        let _ = writeln!(out, "id: {id}");
    }
    if let Some(event) = event {
        let _ = writeln!(out, "event: {event}");
    }

    let Some(message) = message else {
        return out;
    };

    if !message.contains(['\n', '\r']) {
        let _ = write!(out, "data: {message}\n\n");
        return out;
    }

    let mut rest = message;
    while !rest.is_empty() {
        let Some(end) = rest.find(['\n', '\r']) else {
            let _ = writeln!(out, "data: {rest}");
            break;
        };
        let _ = writeln!(out, "data: {}", &rest[..end]);
        let skip = if rest[end..].starts_with("\r\n") { 2 } else { 1 };
        rest = &rest[end + skip..];
    }
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn single_line_with_all_fields() {
        assert_eq!(
            format_event(Some("hello"), Some("greet"), 7, 1000),
            "retry: 1000\nid: 7\nevent: greet\ndata: hello\n\n"
        );
    }

    #[test]
    fn mixed_line_endings_become_data_lines() {
        let expected = indoc! {"
            data: a
            data: b
            data: c
            data: d

        "};
        assert_eq!(format_event(Some("a\r\nb\nc\rd"), None, 0, 0), expected);
    }

    #[test]
    fn trailing_newline_adds_no_empty_data_line() {
        assert_eq!(format_event(Some("a\n"), None, 0, 0), "data: a\n\n");
    }

    #[test]
    fn fields_only() {
        assert_eq!(format_event(None, Some("tick"), 3, 0), "id: 3\nevent: tick\n");
    }
}
