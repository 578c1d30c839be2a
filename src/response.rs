//! Static HTTP response generator.
//!
//! Every request gets the same `200 OK` page; only the embedded timestamp
//! changes between responses.

use bytes::BytesMut;
use chrono::Local;

/// Timestamp layout, e.g. `2026-10-15 09:30:12.512345`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

const STATUS_LINE: &[u8] = b"HTTP/1.1 200 OK\r\n";

const HEADERS: &[u8] = b"Content-Type: text/html; charset=utf-8\r\nConnection: close\r\n\r\n";

const BODY_HEAD: &str = "<!DOCTYPE html>\r\n\
<html>\r\n\
<head><title>MTCP Test</title></head>\r\n\
<body>\r\n\
<h1>MTCP Backend Server</h1>\r\n\
<p>This response was delivered over an MTCP aggregated connection!</p>\r\n\
<p>Current time: ";

const BODY_TAIL: &str = "</p>\r\n\
</body>\r\n\
</html>\r\n";

/// Current local time in [`TIMESTAMP_FORMAT`].
pub fn timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Build the response for the current moment.
pub fn build() -> BytesMut {
    render(&timestamp())
}

/// Build the response with `now` embedded in the body.
pub fn render(now: &str) -> BytesMut {
    let mut response = BytesMut::with_capacity(
        STATUS_LINE.len() + HEADERS.len() + BODY_HEAD.len() + now.len() + BODY_TAIL.len(),
    );
    response.extend_from_slice(STATUS_LINE);
    response.extend_from_slice(HEADERS);
    response.extend_from_slice(BODY_HEAD.as_bytes());
    response.extend_from_slice(now.as_bytes());
    response.extend_from_slice(BODY_TAIL.as_bytes());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    #[test]
    fn test_status_and_headers() {
        let response = render("2026-10-15 09:30:12.512345");
        let text = std::str::from_utf8(&response).unwrap();

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        let (head, body) = text.split_once("\r\n\r\n").unwrap();
        assert_eq!(
            head,
            "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nConnection: close"
        );
        assert!(body.starts_with("<!DOCTYPE html>"));
        assert!(body.contains("<title>MTCP Test</title>"));
        assert!(body.contains("<h1>MTCP Backend Server</h1>"));
    }

    #[test]
    fn test_timestamp_embedded() {
        let response = render("2026-10-15 09:30:12.512345");
        let text = std::str::from_utf8(&response).unwrap();
        assert!(text.contains("<p>Current time: 2026-10-15 09:30:12.512345</p>"));
    }

    #[test]
    fn test_timestamp_format() {
        let now = timestamp();
        assert_eq!(now.len(), "2026-10-15 09:30:12.512345".len());
        assert!(NaiveDateTime::parse_from_str(&now, TIMESTAMP_FORMAT).is_ok());
    }

    #[test]
    fn test_timestamps_increase() {
        let first = timestamp();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = timestamp();
        assert!(second > first, "{second} should sort after {first}");
    }

    #[test]
    fn test_build_is_complete() {
        let response = build();
        let text = std::str::from_utf8(&response).unwrap();
        assert!(text.ends_with("</html>\r\n"));
    }
}
