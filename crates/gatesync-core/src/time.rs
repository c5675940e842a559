use crate::error::{CoreError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// End of the last successfully covered incremental window.
///
/// `Never` orders before every instant, so a fresh node's first incremental
/// window starts at the beginning of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Watermark {
    #[default]
    Never,
    At(OffsetDateTime),
}

impl Watermark {
    pub fn instant(&self) -> Option<OffsetDateTime> {
        match self {
            Watermark::Never => None,
            Watermark::At(at) => Some(*at),
        }
    }

    pub fn is_never(&self) -> bool {
        matches!(self, Watermark::Never)
    }

    /// Moves the watermark forward to `to`. Returns false and leaves the
    /// watermark untouched when `to` is not strictly ahead.
    pub fn advance(&mut self, to: OffsetDateTime) -> bool {
        let next = Watermark::At(to);
        if next > *self {
            *self = next;
            true
        } else {
            false
        }
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Watermark::Never => f.write_str("never"),
            Watermark::At(at) => {
                let formatted = at.format(&Rfc3339).map_err(|_| fmt::Error)?;
                f.write_str(&formatted)
            }
        }
    }
}

impl Serialize for Watermark {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Watermark::Never => serializer.serialize_none(),
            Watermark::At(at) => {
                let formatted = at.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
                serializer.serialize_some(&formatted)
            }
        }
    }
}

impl<'de> Deserialize<'de> for Watermark {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(Watermark::Never),
            Some(s) => parse_instant(&s)
                .map(Watermark::At)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// Half-open modification window `[from, to)` covered by one incremental cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefreshWindow {
    pub from: Watermark,
    #[serde(with = "time::serde::rfc3339")]
    pub to: OffsetDateTime,
}

impl RefreshWindow {
    pub fn new(from: Watermark, to: OffsetDateTime) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, instant: OffsetDateTime) -> bool {
        let after_start = match self.from {
            Watermark::Never => true,
            Watermark::At(from) => instant >= from,
        };
        after_start && instant < self.to
    }
}

impl fmt::Display for RefreshWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let to = self.to.format(&Rfc3339).map_err(|_| fmt::Error)?;
        write!(f, "[{}, {to})", self.from)
    }
}

pub fn parse_instant(s: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(s, &Rfc3339)
        .map_err(|e| CoreError::invalid_date_time(format!("Failed to parse '{s}': {e}")))
}

pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}
