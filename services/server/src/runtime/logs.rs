//! Container log bodies.
//!
//! A container without a TTY multiplexes stdout and stderr into frames: an
//! 8-byte header `[stream, 0, 0, 0, len (u32 big-endian)]` then `len` bytes of
//! output. A container with a TTY sends its output raw.

const HEADER_LEN: usize = 8;

/// Decode a log body to text, stripping frame headers when present.
///
/// Invalid UTF-8 is replaced. A truncated trailing frame keeps what arrived.
pub fn decode_log_stream(body: &[u8]) -> String {
    if !is_frame_header(body) {
        return String::from_utf8_lossy(body).into_owned();
    }

    let mut out = Vec::with_capacity(body.len());
    let mut rest = body;
    while !rest.is_empty() {
        if !is_frame_header(rest) {
            out.extend_from_slice(rest);
            break;
        }
        let len = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let payload = &rest[HEADER_LEN..];
        let take = len.min(payload.len());
        out.extend_from_slice(&payload[..take]);
        rest = &payload[take..];
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn is_frame_header(bytes: &[u8]) -> bool {
    bytes.len() >= HEADER_LEN && bytes[0] <= 2 && bytes[1..4] == [0, 0, 0]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(stream: u8, text: &str) -> Vec<u8> {
        let mut out = vec![stream, 0, 0, 0];
        out.extend_from_slice(&(text.len() as u32).to_be_bytes());
        out.extend_from_slice(text.as_bytes());
        out
    }

    #[test]
    fn test_multiplexed_frames_interleave() {
        let mut body = frame(1, "2024-05-01T10:00:00Z listening\n");
        body.extend(frame(2, "2024-05-01T10:00:01Z warn: slow\n"));
        body.extend(frame(1, "2024-05-01T10:00:02Z ready\n"));

        assert_eq!(
            decode_log_stream(&body),
            "2024-05-01T10:00:00Z listening\n2024-05-01T10:00:01Z warn: slow\n2024-05-01T10:00:02Z ready\n"
        );
    }

    #[test]
    fn test_tty_output_passes_through() {
        assert_eq!(decode_log_stream(b"plain tty output\n"), "plain tty output\n");
        assert_eq!(decode_log_stream(b""), "");
    }

    #[test]
    fn test_truncated_frame_keeps_partial_payload() {
        let mut body = frame(1, "complete\n");
        let mut partial = frame(2, "cut off here");
        partial.truncate(HEADER_LEN + 3);
        body.extend(partial);

        assert_eq!(decode_log_stream(&body), "complete\ncut");
    }

    #[test]
    fn test_invalid_utf8_replaced() {
        let mut body = vec![1, 0, 0, 0, 0, 0, 0, 3];
        body.extend_from_slice(&[b'o', 0xff, b'k']);
        assert_eq!(decode_log_stream(&body), "o\u{fffd}k");
    }
}
