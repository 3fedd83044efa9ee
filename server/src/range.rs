//! Resolution of the byte span a download response covers, from the
//! upstream `Content-Range` header, the client's `Range` header, or the
//! plain content length. The full object size keys the cipher; the span
//! positions it.

/// Inclusive byte span of the object being delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSpan {
    /// Full plaintext size of the object (the `N` in `bytes a-b/N`).
    pub full_size: u64,
    pub start: u64,
    pub end: u64,
    /// Whether the response must be delivered as `206 Partial Content`.
    pub partial: bool,
}

impl ByteSpan {
    /// Number of bytes the span delivers. The inclusive `end` cannot
    /// express an empty object, so a zero-size object is its own case.
    pub fn len(&self) -> u64 {
        if self.full_size == 0 {
            0
        } else {
            self.end - self.start + 1
        }
    }
}

/// Determines the span from response and request metadata.
///
/// Precedence: a parseable upstream `Content-Range` wins; otherwise the
/// client's `Range: bytes=a-[b]` is honored (marking the response
/// partial); otherwise the whole object. An unparseable `Content-Range`
/// degrades to the full object sized by `Content-Length`. Returns `None`
/// when no full size can be determined at all, in which case the body
/// cannot be positioned for decryption.
pub fn resolve_span(
    content_range: Option<&str>,
    request_range: Option<&str>,
    content_length: Option<u64>,
    upstream_partial: bool,
) -> Option<ByteSpan> {
    let mut full_size = content_length;
    let mut start = 0u64;
    let mut end = None;
    let mut partial = upstream_partial;

    if let Some(value) = content_range {
        // Content-Range: bytes 0-999/1000
        if let Some((range_part, size_part)) = value.split_once('/') {
            if size_part != "*" {
                if let Ok(size) = size_part.trim().parse() {
                    full_size = Some(size);
                }
            }
            let spec = range_part.strip_prefix("bytes ").unwrap_or(range_part);
            if let Some((from, to)) = spec.split_once('-') {
                if let Ok(from) = from.trim().parse() {
                    start = from;
                }
                end = to.trim().parse().ok();
            }
        }
    } else if let Some(value) = request_range {
        // Range: bytes=0-999
        if let Some(spec) = value.strip_prefix("bytes=") {
            if let Some((from, to)) = spec.split_once('-') {
                if let Ok(from) = from.trim().parse() {
                    start = from;
                    partial = true;
                }
                if !to.is_empty() {
                    end = to.trim().parse().ok();
                }
            }
        }
    }

    let full_size = full_size?;
    let mut end = end.unwrap_or_else(|| full_size.saturating_sub(1));
    if end < start {
        // A nonsensical range degrades to the full object.
        start = 0;
        end = full_size.saturating_sub(1);
    }
    Some(ByteSpan {
        full_size,
        start,
        end,
        partial,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_range_drives_everything() {
        let span = resolve_span(Some("bytes 100-199/1000"), None, Some(100), true).unwrap();
        assert_eq!(
            span,
            ByteSpan {
                full_size: 1000,
                start: 100,
                end: 199,
                partial: true,
            },
        );
        assert_eq!(span.len(), 100);
    }

    #[test]
    fn content_range_with_unknown_size_uses_content_length() {
        let span = resolve_span(Some("bytes 0-9/*"), None, Some(500), true).unwrap();
        assert_eq!(span.full_size, 500);
        assert_eq!(span.start, 0);
        assert_eq!(span.end, 9);
    }

    #[test]
    fn unparseable_content_range_degrades_to_full_object() {
        let span = resolve_span(Some("garbage"), None, Some(1000), false).unwrap();
        assert_eq!(
            span,
            ByteSpan {
                full_size: 1000,
                start: 0,
                end: 999,
                partial: false,
            },
        );
    }

    #[test]
    fn client_range_marks_partial() {
        let span = resolve_span(None, Some("bytes=10-19"), Some(100), false).unwrap();
        assert_eq!(
            span,
            ByteSpan {
                full_size: 100,
                start: 10,
                end: 19,
                partial: true,
            },
        );
    }

    #[test]
    fn open_ended_client_range_extends_to_end() {
        let span = resolve_span(None, Some("bytes=50-"), Some(100), false).unwrap();
        assert_eq!(span.start, 50);
        assert_eq!(span.end, 99);
        assert!(span.partial);
    }

    #[test]
    fn first_byte_range_is_preserved() {
        let span = resolve_span(Some("bytes 0-0/100"), None, Some(1), true).unwrap();
        assert_eq!(span.start, 0);
        assert_eq!(span.end, 0);
        assert_eq!(span.len(), 1);
    }

    #[test]
    fn inverted_range_degrades_to_full_object() {
        let span = resolve_span(Some("bytes 100-50/1000"), None, Some(51), true).unwrap();
        assert_eq!(span.start, 0);
        assert_eq!(span.end, 999);
        assert_eq!(span.full_size, 1000);
    }

    #[test]
    fn no_metadata_means_full_object() {
        let span = resolve_span(None, None, Some(42), false).unwrap();
        assert_eq!(
            span,
            ByteSpan {
                full_size: 42,
                start: 0,
                end: 41,
                partial: false,
            },
        );
    }

    #[test]
    fn zero_size_object_has_empty_span() {
        let span = resolve_span(None, None, Some(0), false).unwrap();
        assert_eq!(span.full_size, 0);
        assert_eq!(span.len(), 0);
    }

    #[test]
    fn unknown_size_is_unresolvable() {
        assert_eq!(resolve_span(None, None, None, false), None);
        assert_eq!(resolve_span(Some("bytes 0-9/*"), None, None, true), None);
    }
}
