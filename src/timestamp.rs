//! Sidecar timestamp handling.
//!
//! Containers stamp every member with a modification time, which leaks when
//! and often where (through the local timezone) a document was produced.
//! Cleaned containers carry the oldest value each format can represent:
//!
//! | Format | Representation | Canonical value |
//! |--------|----------------|-----------------|
//! | ZIP | MS-DOS date + time words | 1980-01-01 00:00:00 |
//! | TAR | Unix seconds | 0 (1970-01-01 00:00:00) |

use std::fmt;

use chrono::DateTime;

/// Canonical TAR modification time.
pub const TAR_CANONICAL_MTIME: u64 = 0;

/// An MS-DOS date/time pair as stored in ZIP headers.
///
/// ```rust
/// use metastrip::timestamp::DosDateTime;
///
/// let ts = DosDateTime::CANONICAL;
/// assert!(ts.is_canonical());
/// assert_eq!(ts.to_string(), "1980-01-01 00:00:00");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DosDateTime {
    date: u16,
    time: u16,
}

impl DosDateTime {
    /// 1980-01-01 00:00:00, as early as a ZIP timestamp can be.
    pub const CANONICAL: DosDateTime = DosDateTime {
        date: (1 << 5) | 1,
        time: 0,
    };

    /// Wraps the raw date and time words from a ZIP header.
    #[inline]
    pub const fn from_raw(date: u16, time: u16) -> Self {
        Self { date, time }
    }

    /// Returns the raw `(date, time)` words.
    #[inline]
    pub const fn raw(&self) -> (u16, u16) {
        (self.date, self.time)
    }

    /// Returns true if this is the canonical minimum timestamp.
    ///
    /// Some writers encode a zero date; that is treated as canonical too,
    /// since it carries no information.
    pub fn is_canonical(&self) -> bool {
        *self == Self::CANONICAL || (self.date == 0 && self.time == 0)
    }

    /// Year (1980-2107).
    pub fn year(&self) -> u16 {
        1980 + (self.date >> 9)
    }

    /// Month (1-12 for valid values).
    pub fn month(&self) -> u16 {
        (self.date >> 5) & 0x0f
    }

    /// Day of month (1-31 for valid values).
    pub fn day(&self) -> u16 {
        self.date & 0x1f
    }

    /// Hour (0-23).
    pub fn hour(&self) -> u16 {
        self.time >> 11
    }

    /// Minute (0-59).
    pub fn minute(&self) -> u16 {
        (self.time >> 5) & 0x3f
    }

    /// Second, with two-second resolution.
    pub fn second(&self) -> u16 {
        (self.time & 0x1f) * 2
    }
}

impl fmt::Display for DosDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year(),
            self.month(),
            self.day(),
            self.hour(),
            self.minute(),
            self.second()
        )
    }
}

/// Formats a Unix modification time the way sidecar metadata is reported.
///
/// ```rust
/// use metastrip::timestamp::format_unix;
///
/// assert_eq!(format_unix(86_400), "1970-01-02 00:00:00");
/// ```
pub fn format_unix(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::from_timestamp(s, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| secs.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_fields() {
        let ts = DosDateTime::CANONICAL;
        assert_eq!(ts.year(), 1980);
        assert_eq!(ts.month(), 1);
        assert_eq!(ts.day(), 1);
        assert_eq!((ts.hour(), ts.minute(), ts.second()), (0, 0, 0));
    }

    #[test]
    fn test_decode_real_timestamp() {
        // 2018-03-20 21:59:24
        let date = ((2018 - 1980) << 9) | (3 << 5) | 20;
        let time = (21 << 11) | (59 << 5) | 12;
        let ts = DosDateTime::from_raw(date, time);
        assert!(!ts.is_canonical());
        assert_eq!(ts.to_string(), "2018-03-20 21:59:24");
    }

    #[test]
    fn test_zero_date_is_canonical() {
        assert!(DosDateTime::from_raw(0, 0).is_canonical());
    }

    #[test]
    fn test_format_unix_epoch() {
        assert_eq!(format_unix(TAR_CANONICAL_MTIME), "1970-01-01 00:00:00");
    }

    #[test]
    fn test_format_unix_out_of_range_falls_back_to_number() {
        assert_eq!(format_unix(u64::MAX), u64::MAX.to_string());
    }
}
