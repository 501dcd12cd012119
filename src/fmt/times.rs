//! Local-time rendering for format directives
//!
//! Two shapes are supported: a fixed ctime-like string, and single-letter
//! strftime subfields. The non-POSIX letters (`@`, `+`, `k`, `l`, `S`) are
//! rendered by hand; the rest go through chrono. The nanosecond fields keep
//! the historical ten-digit form (nine digits plus a trailing zero) for
//! output compatibility with the reference tools.

use crate::walk::{FileStat, TimeSpec};
use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};

/// Which stat timestamp a test or directive refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeField {
    /// st_atime
    Accessed,
    /// st_ctime
    Changed,
    /// st_mtime
    Modified,
}

impl TimeField {
    /// Pull this field out of a stat result.
    pub fn of(self, st: &FileStat) -> TimeSpec {
        match self {
            TimeField::Accessed => st.atime(),
            TimeField::Changed => st.ctime(),
            TimeField::Modified => st.mtime(),
        }
    }
}

const DAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Convert a timestamp to local time. `None` when out of range.
pub fn local_datetime(ts: TimeSpec) -> Option<DateTime<Local>> {
    let nsec = ts.nsec.clamp(0, 999_999_999) as u32;
    Local.timestamp_opt(ts.sec, nsec).single()
}

/// Render a ctime-style string with a nanosecond fraction, e.g.
/// `Mon Jan  2 15:04:05.0000000000 2006`.
pub fn ctime_like(ts: TimeSpec) -> Option<String> {
    let dt = local_datetime(ts)?;
    Some(format!(
        "{} {} {:2} {:02}:{:02}:{:02}.{:09}0 {:4}",
        DAYS[dt.weekday().num_days_from_sunday() as usize],
        MONTHS[dt.month0() as usize],
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
        ts.nsec.clamp(0, 999_999_999),
        dt.year(),
    ))
}

/// The strftime letters accepted in `%{A,C,T}X` directives.
pub fn is_strftime_letter(c: char) -> bool {
    matches!(
        c,
        '@' | 'H'
            | 'I'
            | 'k'
            | 'l'
            | 'M'
            | 'p'
            | 'r'
            | 'S'
            | 'T'
            | '+'
            | 'X'
            | 'Z'
            | 'a'
            | 'A'
            | 'b'
            | 'B'
            | 'c'
            | 'd'
            | 'D'
            | 'h'
            | 'j'
            | 'm'
            | 'U'
            | 'w'
            | 'W'
            | 'x'
            | 'y'
            | 'Y'
    )
}

/// Render one strftime subfield.
pub fn strftime_char(ts: TimeSpec, letter: char) -> Option<String> {
    let dt = local_datetime(ts)?;
    let nsec = ts.nsec.clamp(0, 999_999_999);

    let rendered = match letter {
        // Non-POSIX strftime() features
        '@' => format!("{}.{:09}0", ts.sec, nsec),
        'k' => format!("{:2}", dt.hour()),
        'l' => format!("{:2}", (dt.hour() + 11) % 12 + 1),
        'S' => format!("{:02}.{:09}0", dt.second(), nsec),
        '+' => format!(
            "{:4}-{:02}-{:02}+{:02}:{:02}:{:02}.{:09}0",
            dt.year(),
            dt.month(),
            dt.day(),
            dt.hour(),
            dt.minute(),
            dt.second(),
            nsec,
        ),

        // POSIX strftime() features
        _ => dt.format(&format!("%{letter}")).to_string(),
    };

    Some(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(sec: i64) -> TimeSpec {
        TimeSpec { sec, nsec: 0 }
    }

    #[test]
    fn test_epoch_directive() {
        let t = TimeSpec {
            sec: 1234567890,
            nsec: 987654321,
        };
        assert_eq!(strftime_char(t, '@').unwrap(), "1234567890.9876543210");
    }

    #[test]
    fn test_seconds_with_fraction() {
        let rendered = strftime_char(ts(61), 'S').unwrap();
        assert_eq!(rendered, "01.0000000000");
    }

    #[test]
    fn test_ctime_shape() {
        let rendered = ctime_like(ts(0)).unwrap();
        // "Day Mon dd hh:mm:ss.NNNNNNNNN0 yyyy"
        assert_eq!(rendered.len(), 35);
        assert!(DAYS.contains(&&rendered[0..3]));
        assert!(MONTHS.contains(&&rendered[4..7]));
        assert!(rendered.ends_with("1970") || rendered.ends_with("1969"));
    }

    #[test]
    fn test_twelve_hour_clock() {
        for hour in 0..24 {
            let rendered = strftime_char(ts(hour * 3600), 'l').unwrap();
            let value: u32 = rendered.trim().parse().unwrap();
            assert!((1..=12).contains(&value));
        }
    }
}
