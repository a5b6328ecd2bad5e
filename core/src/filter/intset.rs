//! Status-code range sets, e.g. `200, 200-300` or `200:300-400`.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A range of int values, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntRange {
    pub start: i32,
    pub end: i32,
}

impl IntRange {
    pub fn new(start: i32, end: i32) -> Self {
        IntRange { start, end }
    }

    pub fn contains(&self, value: i32) -> bool {
        value >= self.start && value <= self.end
    }
}

/// A union of closed integer ranges. An empty set contains every value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntSet {
    ranges: Vec<IntRange>,
}

impl IntSet {
    pub fn new(ranges: Vec<IntRange>) -> Self {
        IntSet { ranges }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn contains(&self, value: i32) -> bool {
        if self.ranges.is_empty() {
            return true;
        }
        self.ranges.iter().any(|r| r.contains(value))
    }
}

impl FromStr for IntSet {
    type Err = anyhow::Error;

    /// Parses items separated by `,` or `:`; each item is a number or a
    /// `start-end` range. Reversed bounds are swapped.
    fn from_str(s: &str) -> Result<Self> {
        let mut ranges = Vec::new();
        for item in s.split([',', ':']) {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            let numbers: Vec<&str> = item.split('-').collect();
            if numbers.len() > 2 {
                bail!("illegal range str: {}", item);
            }
            let mut start: i32 = numbers[0].trim().parse()?;
            let mut end = start;
            if numbers.len() == 2 {
                end = numbers[1].trim().parse()?;
            }
            if start > end {
                std::mem::swap(&mut start, &mut end);
            }
            ranges.push(IntRange::new(start, end));
        }
        Ok(IntSet { ranges })
    }
}

impl fmt::Display for IntSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, r) in self.ranges.iter().enumerate() {
            if index > 0 {
                write!(f, ",")?;
            }
            if r.start == r.end {
                write!(f, "{}", r.start)?;
            } else {
                write!(f, "{}-{}", r.start, r.end)?;
            }
        }
        Ok(())
    }
}

impl Serialize for IntSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for IntSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_range_and_union() {
        let set: IntSet = "200, 400-499".parse().unwrap();
        assert!(set.contains(200));
        assert!(set.contains(404));
        assert!(set.contains(499));
        assert!(!set.contains(199));
        assert!(!set.contains(302));
        assert!(!set.contains(500));
    }

    #[test]
    fn colon_also_separates() {
        let set: IntSet = "200:300-400".parse().unwrap();
        assert!(set.contains(200));
        assert!(set.contains(350));
        assert!(!set.contains(250));
    }

    #[test]
    fn reversed_bounds_are_swapped() {
        let set: IntSet = "300-200".parse().unwrap();
        assert!(set.contains(250));
    }

    #[test]
    fn empty_set_contains_everything() {
        let set = IntSet::default();
        assert!(set.contains(1));
        assert!(set.contains(599));
    }

    #[test]
    fn round_trips_display() {
        let set: IntSet = "200,400-499".parse().unwrap();
        assert_eq!(set.to_string(), "200,400-499");
    }

    #[test]
    fn rejects_malformed() {
        assert!("1-2-3".parse::<IntSet>().is_err());
        assert!("abc".parse::<IntSet>().is_err());
    }
}
