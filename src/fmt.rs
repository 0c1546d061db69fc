// Helpers for dispatch functions that render printf-style templates
//
// The core knows nothing about format languages. These helpers cover
// the literal text between specifiers so that per-type emitters built
// on top of the dispatch contract stay small.

use crate::output::OutputBuffer;

/// Append literal text to the output buffer.
pub fn append_literal(output: &mut OutputBuffer, text: &str) {
    let dst = output.reserve(text.len());
    dst.copy_from_slice(text.as_bytes());
    output.commit(text.len());
}

/// Append a single `%`.
pub fn append_percent(output: &mut OutputBuffer) {
    let dst = output.reserve(1);
    dst[0] = b'%';
    output.commit(1);
}

/// Copy literal text up to the next format specifier, collapsing `%%`
/// into a literal percent sign.
///
/// Returns the remainder of the format string positioned on the
/// specifier character, or `None` when the whole string was literal and
/// has been copied out.
pub fn next_specifier<'a>(output: &mut OutputBuffer, mut format: &'a str) -> Option<&'a str> {
    loop {
        match format.find('%') {
            None => {
                append_literal(output, format);
                return None;
            }
            Some(pos) => {
                append_literal(output, &format[..pos]);
                format = &format[pos + 1..];
                if !format.starts_with('%') {
                    return Some(format);
                }
                append_percent(output);
                format = &format[1..];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::testing::CaptureWriter;
    use std::sync::{Arc, Mutex};

    fn capture_buffer() -> (OutputBuffer, Arc<Mutex<Vec<u8>>>) {
        let (writer, data) = CaptureWriter::new();
        let buffer = OutputBuffer::new(Box::new(writer), 4096, 0).unwrap();
        (buffer, data)
    }

    fn flushed(mut buffer: OutputBuffer, data: &Arc<Mutex<Vec<u8>>>) -> Vec<u8> {
        buffer.flush();
        data.lock().unwrap().clone()
    }

    #[test]
    fn test_append_literal() {
        let (mut buffer, data) = capture_buffer();
        append_literal(&mut buffer, "plain text");
        assert_eq!(flushed(buffer, &data), b"plain text");
    }

    #[test]
    fn test_literal_only_format() {
        let (mut buffer, data) = capture_buffer();
        assert_eq!(next_specifier(&mut buffer, "no specifiers here"), None);
        assert_eq!(flushed(buffer, &data), b"no specifiers here");
    }

    #[test]
    fn test_stops_at_specifier() {
        let (mut buffer, data) = capture_buffer();
        let rest = next_specifier(&mut buffer, "value=%d more").unwrap();
        assert_eq!(rest, "d more");
        assert_eq!(flushed(buffer, &data), b"value=");
    }

    #[test]
    fn test_double_percent_is_literal() {
        let (mut buffer, data) = capture_buffer();
        assert_eq!(next_specifier(&mut buffer, "100%% done"), None);
        assert_eq!(flushed(buffer, &data), b"100% done");
    }

    #[test]
    fn test_escape_before_specifier() {
        let (mut buffer, data) = capture_buffer();
        let rest = next_specifier(&mut buffer, "%%=%s").unwrap();
        assert_eq!(rest, "s");
        assert_eq!(flushed(buffer, &data), b"%=");
    }

    #[test]
    fn test_trailing_percent_yields_empty_specifier() {
        let (mut buffer, data) = capture_buffer();
        let rest = next_specifier(&mut buffer, "oops%").unwrap();
        assert_eq!(rest, "");
        assert_eq!(flushed(buffer, &data), b"oops");
    }
}
