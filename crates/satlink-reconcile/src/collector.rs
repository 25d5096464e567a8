//! Collector routing.
//!
//! Scan artifacts are fanned in to a few regional collectors. The collector
//! for an artifact is picked by the global number of the node it describes,
//! using disjoint inclusive ranges with a fallback for everything else.

use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One inclusive number range served by a collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorRange {
    pub first: u32,
    pub last: u32,
    pub collector: Ipv4Addr,
}

impl CollectorRange {
    pub fn contains(&self, number: u32) -> bool {
        (self.first..=self.last).contains(&number)
    }
}

/// Deterministic node-number to collector mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorMap {
    ranges: Vec<CollectorRange>,
    fallback: Ipv4Addr,
}

impl Default for CollectorMap {
    /// Relays to the first collector, sensing members to the second,
    /// constellation members to the third.
    fn default() -> Self {
        Self {
            ranges: vec![
                CollectorRange {
                    first: 1,
                    last: 8,
                    collector: Ipv4Addr::new(10, 0, 203, 2),
                },
                CollectorRange {
                    first: 9,
                    last: 20,
                    collector: Ipv4Addr::new(10, 0, 201, 2),
                },
            ],
            fallback: Ipv4Addr::new(10, 0, 202, 2),
        }
    }
}

impl CollectorMap {
    /// Build a map, rejecting empty or overlapping ranges.
    pub fn new(mut ranges: Vec<CollectorRange>, fallback: Ipv4Addr) -> Result<Self> {
        ranges.sort_by_key(|r| r.first);
        for range in &ranges {
            if range.first > range.last {
                return Err(Error::Config(format!(
                    "collector range {}-{} is empty",
                    range.first, range.last
                )));
            }
        }
        for pair in ranges.windows(2) {
            if pair[1].first <= pair[0].last {
                return Err(Error::Config(format!(
                    "collector ranges {}-{} and {}-{} overlap",
                    pair[0].first, pair[0].last, pair[1].first, pair[1].last
                )));
            }
        }
        Ok(Self { ranges, fallback })
    }

    /// Collector for a node number.
    pub fn route(&self, number: u32) -> Ipv4Addr {
        self.ranges
            .iter()
            .find(|r| r.contains(number))
            .map(|r| r.collector)
            .unwrap_or(self.fallback)
    }

    pub fn ranges(&self) -> &[CollectorRange] {
        &self.ranges
    }

    pub fn fallback(&self) -> Ipv4Addr {
        self.fallback
    }
}

/// Parses `1-8=10.0.203.2,9-20=10.0.201.2,*=10.0.202.2`.
///
/// The `*` entry sets the fallback and is required.
impl FromStr for CollectorMap {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut ranges = Vec::new();
        let mut fallback = None;

        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (range, addr) = entry
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("collector entry {entry:?} lacks '='")))?;
            let collector: Ipv4Addr = addr
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("collector address {addr:?}: {e}")))?;

            let range = range.trim();
            if range == "*" {
                fallback = Some(collector);
                continue;
            }
            let (first, last) = match range.split_once('-') {
                Some((a, b)) => (parse_number(a)?, parse_number(b)?),
                None => {
                    let n = parse_number(range)?;
                    (n, n)
                }
            };
            ranges.push(CollectorRange {
                first,
                last,
                collector,
            });
        }

        let fallback =
            fallback.ok_or_else(|| Error::Config("collector map needs a '*' fallback".into()))?;
        Self::new(ranges, fallback)
    }
}

fn parse_number(s: &str) -> Result<u32> {
    s.trim()
        .parse()
        .map_err(|e| Error::Config(format!("collector range bound {s:?}: {e}")))
}
