//! Byte-range arithmetic for chunked downloads

/// An inclusive byte range `[start, end]`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte offset
    pub start: u64,
    /// Last byte offset (inclusive)
    pub end: u64,
}

#[allow(clippy::len_without_is_empty)]
impl ByteRange {
    /// Range covering `len` bytes from `start` (`len` must be non-zero)
    pub fn with_len(start: u64, len: u64) -> Self {
        debug_assert!(len > 0);
        Self {
            start,
            end: start + len - 1,
        }
    }

    /// Number of bytes covered
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Restrict the range to an object of `total` bytes; None if it starts past the end
    pub fn clamp(&self, total: u64) -> Option<Self> {
        if self.start >= total {
            return None;
        }
        Some(Self {
            start: self.start,
            end: self.end.min(total - 1),
        })
    }

    /// Value for the `x-ms-range` / `Range` request header
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// Split `[offset, total)` into consecutive ranges of at most `range_size` bytes
pub fn split_ranges(offset: u64, total: u64, range_size: u64) -> Vec<ByteRange> {
    let mut ranges = Vec::new();
    if range_size == 0 {
        return ranges;
    }
    let mut start = offset;
    while start < total {
        let len = range_size.min(total - start);
        ranges.push(ByteRange::with_len(start, len));
        start += len;
    }
    ranges
}

/// Parsed `Content-Range` header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ContentRange {
    /// `bytes start-end/total`
    Satisfied {
        /// Range actually returned
        range: ByteRange,
        /// Size of the whole object
        total: u64,
    },
    /// `bytes */total`, sent with 416
    Unsatisfied {
        /// Size of the whole object
        total: u64,
    },
}

/// Parse a `Content-Range` value such as `bytes 0-1023/4096` or `bytes */0`
pub(crate) fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (span, total) = rest.split_once('/')?;
    let total: u64 = total.trim().parse().ok()?;
    let span = span.trim();
    if span == "*" {
        return Some(ContentRange::Unsatisfied { total });
    }
    let (start, end) = span.split_once('-')?;
    let start: u64 = start.parse().ok()?;
    let end: u64 = end.parse().ok()?;
    if end < start || end >= total {
        return None;
    }
    Some(ContentRange::Satisfied {
        range: ByteRange { start, end },
        total,
    })
}
