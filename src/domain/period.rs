use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A calendar month. Persisted as `YYYY-MM-01`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn succ(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn minus_months(&self, months: u32) -> Self {
        let index = self.year * 12 + self.month as i32 - 1 - months as i32;
        Self {
            year: index.div_euclid(12),
            month: index.rem_euclid(12) as u32 + 1,
        }
    }

    /// `YYYY-MM`, the form Eurostat and Census use in queries.
    pub fn to_dashed(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }

    /// `YYYYMM`, the form Comtrade uses.
    pub fn to_compact(&self) -> String {
        format!("{:04}{:02}", self.year, self.month)
    }

    /// Every month from `self` to `end`, both inclusive. Empty when `self > end`.
    pub fn months_through(self, end: Period) -> impl Iterator<Item = Period> {
        let mut next = Some(self).filter(|p| *p <= end);
        std::iter::from_fn(move || {
            let current = next?;
            let following = current.succ();
            next = (following <= end).then_some(following);
            Some(current)
        })
    }

    /// Splits `[self, end]` into calendar-year slices.
    pub fn year_chunks(self, end: Period) -> Vec<FetchRange> {
        let mut chunks = Vec::new();
        let mut start = self;
        while start <= end {
            let year_end = Period {
                year: start.year,
                month: 12,
            };
            let chunk_end = year_end.min(end);
            chunks.push(FetchRange::new(start, chunk_end));
            start = chunk_end.succ();
        }
        chunks
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = String;

    /// Accepts `YYYY-MM`, `YYYY-MM-DD`, `YYYYMM` and `YYYYMmm`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if !s.is_ascii() {
            return Err(format!("unrecognised period '{}'", s));
        }
        let (year, month) = match s.len() {
            6 if s.bytes().all(|b| b.is_ascii_digit()) => (&s[..4], &s[4..]),
            7 if s.as_bytes()[4] == b'-' => (&s[..4], &s[5..]),
            7 if s.as_bytes()[4] == b'M' => (&s[..4], &s[5..]),
            10 if s.as_bytes()[4] == b'-' && s.as_bytes()[7] == b'-' => (&s[..4], &s[5..7]),
            _ => return Err(format!("unrecognised period '{}'", s)),
        };
        let year: i32 = year
            .parse()
            .map_err(|_| format!("invalid year in period '{}'", s))?;
        let month: u32 = month
            .parse()
            .map_err(|_| format!("invalid month in period '{}'", s))?;
        Period::new(year, month).ok_or_else(|| format!("month out of range in period '{}'", s))
    }
}

impl Serialize for Period {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:04}-{:02}-01", self.year, self.month))
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Inclusive month range requested from a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRange {
    pub start: Period,
    pub end: Period,
}

impl FetchRange {
    pub fn new(start: Period, end: Period) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    pub fn contains(&self, period: Period) -> bool {
        self.start <= period && period <= self.end
    }

    pub fn months(&self) -> impl Iterator<Item = Period> {
        self.start.months_through(self.end)
    }
}

impl fmt::Display for FetchRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Period {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_all_provider_formats() {
        assert_eq!(p("2024-03"), Period::new(2024, 3).unwrap());
        assert_eq!(p("202403"), Period::new(2024, 3).unwrap());
        assert_eq!(p("2024M03"), Period::new(2024, 3).unwrap());
        assert_eq!(p("2024-03-01"), Period::new(2024, 3).unwrap());
        assert!("2024-13".parse::<Period>().is_err());
        assert!("March 2024".parse::<Period>().is_err());
    }

    #[test]
    fn test_succ_and_minus_months_cross_years() {
        assert_eq!(p("2024-12").succ(), p("2025-01"));
        assert_eq!(p("2025-02").minus_months(2), p("2024-12"));
        assert_eq!(p("2025-01").minus_months(13), p("2023-12"));
        assert_eq!(p("2025-01").minus_months(0), p("2025-01"));
    }

    #[test]
    fn test_months_through() {
        let months: Vec<_> = p("2024-11").months_through(p("2025-02")).collect();
        assert_eq!(months.len(), 4);
        assert_eq!(months[3], p("2025-02"));
        assert_eq!(p("2025-03").months_through(p("2025-02")).count(), 0);
    }

    #[test]
    fn test_year_chunks() {
        let chunks = p("2023-11").year_chunks(p("2025-02"));
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], FetchRange::new(p("2023-11"), p("2023-12")));
        assert_eq!(chunks[1], FetchRange::new(p("2024-01"), p("2024-12")));
        assert_eq!(chunks[2], FetchRange::new(p("2025-01"), p("2025-02")));
        assert!(p("2025-03").year_chunks(p("2025-02")).is_empty());
    }

    #[test]
    fn test_serialized_form_fixes_day_of_month() {
        let json = serde_json::to_string(&p("2024-07")).unwrap();
        assert_eq!(json, "\"2024-07-01\"");
        let back: Period = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p("2024-07"));
    }
}
