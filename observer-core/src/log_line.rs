use std::sync::LazyLock;
use std::time::SystemTime;

use chrono::NaiveDateTime;
use regex::Regex;
use serde::Serialize;

/// Severity keywords, matched case-insensitively in this order; first match wins.
///
/// `Fail`, `Fehler` and `Fatal` come after the level names, so a line holding
/// both "warn" and "fail" resolves to `Warn`.
pub const SEVERITY_TABLE: [(&str, Severity); 9] = [
    ("trace", Severity::Trace),
    ("debug", Severity::Debug),
    ("info", Severity::Info),
    ("warn", Severity::Warn),
    ("error", Severity::Error),
    ("crit", Severity::Crit),
    ("fail", Severity::Fail),
    ("fehler", Severity::Fehler),
    ("fatal", Severity::Fatal),
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum Severity {
    Trace,
    #[default]
    Debug,
    Info,
    Warn,
    Error,
    Crit,
    Fail,
    Fehler,
    Fatal,
}

impl Severity {
    pub fn level(self) -> Level {
        match self {
            Self::Trace => Level::Trace,
            Self::Debug => Level::Debug,
            Self::Info => Level::Info,
            Self::Warn | Self::Fail => Level::Warn,
            Self::Error | Self::Fehler => Level::Error,
            Self::Crit | Self::Fatal => Level::Critical,
        }
    }
}

/// Coarse level a presentation colours by
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "TRACE"),
            Self::Debug => write!(f, "DEBUG"),
            Self::Info => write!(f, "INFO"),
            Self::Warn => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRIT"),
        }
    }
}

pub fn detect_severity(text: &str) -> Option<Severity> {
    let lower = text.to_lowercase();
    SEVERITY_TABLE
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, severity)| *severity)
}

struct TimestampFormat {
    pattern: Regex,
    format: &'static str,
}

static TIMESTAMP_FORMATS: LazyLock<[TimestampFormat; 2]> = LazyLock::new(|| {
    [
        // 2018-01-04T05:52:34.123
        TimestampFormat {
            pattern: Regex::new(r"\d{4}-[01]\d-[0-3]\dT[0-2]\d:[0-5]\d:[0-5]\d(\.\d+)?")
                .expect("valid timestamp pattern"),
            format: "%Y-%m-%dT%H:%M:%S%.f",
        },
        // 29.08.2022 12:58:35.345
        TimestampFormat {
            pattern: Regex::new(r"[0-3]\d\.[01]\d\.\d{4}\s[0-2]\d:[0-5]\d:[0-5]\d(\.\d+)?")
                .expect("valid timestamp pattern"),
            format: "%d.%m.%Y %H:%M:%S%.f",
        },
    ]
});

/// Find the first recognised timestamp and return it with the line minus the match.
///
/// A match that does not parse as a date (e.g. month 19) leaves the text alone.
pub fn extract_timestamp(text: &str) -> Option<(NaiveDateTime, String)> {
    for ts in TIMESTAMP_FORMATS.iter() {
        let Some(found) = ts.pattern.find(text) else {
            continue;
        };

        let normalized: String = found
            .as_str()
            .chars()
            .map(|c| if c.is_whitespace() { ' ' } else { c })
            .collect();

        if let Ok(parsed) = NaiveDateTime::parse_from_str(&normalized, ts.format) {
            let mut rest = String::with_capacity(text.len() - found.len());
            rest.push_str(&text[..found.start()]);
            rest.push_str(&text[found.end()..]);
            return Some((parsed, rest.trim_start().to_string()));
        }
    }

    None
}

/// One tailed line, classified
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LogLine {
    pub at: SystemTime,
    pub timestamp: Option<NaiveDateTime>,
    pub text: String,
    /// First keyword hit, `None` when the line has no severity keyword
    pub matched: Option<Severity>,
}

impl LogLine {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let matched = detect_severity(&raw);

        let (timestamp, text) = match extract_timestamp(&raw) {
            Some((ts, rest)) => (Some(ts), rest),
            None => (None, raw),
        };

        Self {
            at: SystemTime::now(),
            timestamp,
            text,
            matched,
        }
    }

    /// Severity tag, `Debug` when nothing matched
    pub fn severity(&self) -> Severity {
        self.matched.unwrap_or_default()
    }

    pub fn level(&self) -> Level {
        self.severity().level()
    }
}
