// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! What to report and how.

use std::fmt;
use std::str::FromStr;

/// Backtrace depth kept when `--maxframes` is not given.
pub const DEFAULT_TRACE_MAX: usize = 6;

/// The reports printed when `--reports` is not given, in order.
pub const DEFAULT_REPORTS: &str =
    "header,jit,gc,sample,alloc,call,metadata,exception,monitor,thread,domain,context,heapshot,counters";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportKind {
    Header,
    Thread,
    Domain,
    Context,
    Gc,
    Jit,
    Alloc,
    Call,
    Metadata,
    Exception,
    Monitor,
    Heapshot,
    Sample,
    Counters,
    /// No longer produced; selecting it prints a notice.
    Coverage,
    Stats,
}

impl ReportKind {
    const ALL: [(&'static str, ReportKind); 16] = [
        ("header", ReportKind::Header),
        ("thread", ReportKind::Thread),
        ("domain", ReportKind::Domain),
        ("context", ReportKind::Context),
        ("gc", ReportKind::Gc),
        ("jit", ReportKind::Jit),
        ("alloc", ReportKind::Alloc),
        ("call", ReportKind::Call),
        ("metadata", ReportKind::Metadata),
        ("exception", ReportKind::Exception),
        ("monitor", ReportKind::Monitor),
        ("heapshot", ReportKind::Heapshot),
        ("sample", ReportKind::Sample),
        ("counters", ReportKind::Counters),
        ("coverage", ReportKind::Coverage),
        ("stats", ReportKind::Stats),
    ];

    pub fn name(self) -> &'static str {
        Self::ALL
            .iter()
            .find(|(_, kind)| *kind == self)
            .map_or("", |(name, _)| name)
    }
}

impl FromStr for ReportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, kind)| *kind)
            .ok_or_else(|| format!("unknown report '{s}'"))
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parses a comma separated report list. Empty items are skipped.
pub fn parse_reports(list: &str) -> Result<Vec<ReportKind>, String> {
    list.split(',')
        .filter(|item| !item.is_empty())
        .map(str::parse)
        .collect()
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MethodSort {
    #[default]
    Total,
    SelfTime,
    Calls,
}

impl FromStr for MethodSort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "total" => Ok(MethodSort::Total),
            "self" => Ok(MethodSort::SelfTime),
            "calls" => Ok(MethodSort::Calls),
            _ => Err(format!("unknown method sort mode '{s}'")),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AllocSort {
    #[default]
    Bytes,
    Count,
}

impl FromStr for AllocSort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bytes" => Ok(AllocSort::Bytes),
            "count" => Ok(AllocSort::Count),
            _ => Err(format!("unknown allocation sort mode '{s}'")),
        }
    }
}

/// Layout of the verbose counters report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CountersSort {
    #[default]
    Time,
    Category,
}

impl FromStr for CountersSort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "time" => Ok(CountersSort::Time),
            "category" => Ok(CountersSort::Category),
            _ => Err(format!("unknown counters sort mode '{s}'")),
        }
    }
}

/// Objects to look for while decoding: allocations of at least `min_size` bytes and/or whose
/// class name contains `name`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FindSpec {
    pub min_size: u64,
    pub name: Option<String>,
}

impl FindSpec {
    /// Adds one `S:minimum_size` or `T:partial_name` item.
    pub fn add(&mut self, spec: &str) -> Result<(), String> {
        if let Some(size) = spec.strip_prefix("S:") {
            self.min_size = leading_decimal(size);
            Ok(())
        } else if let Some(name) = spec.strip_prefix("T:") {
            self.name = Some(name.to_owned());
            Ok(())
        } else {
            Err(format!("invalid find spec '{spec}'"))
        }
    }

    pub fn matches(&self, size: u64, class_name: &str) -> bool {
        let name_matches = || {
            self.name
                .as_deref()
                .is_some_and(|name| class_name.contains(name))
        };
        if self.min_size != 0 {
            size >= self.min_size && (self.name.is_none() || name_matches())
        } else {
            name_matches()
        }
    }
}

/// `FROM-TO` in seconds since the first buffer of the stream.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeRange {
    pub from_secs: f64,
    pub to_secs: f64,
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (from, to) = s
            .split_once('-')
            .ok_or_else(|| format!("invalid time range '{s}'"))?;
        let parse = |v: &str| -> Result<f64, String> {
            v.trim()
                .parse::<f64>()
                .map_err(|e| format!("invalid time '{v}': {e}"))
        };
        let range = TimeRange {
            from_secs: parse(from)?,
            to_secs: parse(to)?,
        };
        if range.from_secs > range.to_secs {
            return Err(format!("time range '{s}' ends before it starts"));
        }
        Ok(range)
    }
}

/// Parses an unsigned integer the way `strtoul(s, _, 0)` does: `0x` prefix for hexadecimal,
/// leading `0` for octal.
pub fn parse_c_ulong(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else if s.len() > 1 && s.starts_with('0') {
        u64::from_str_radix(&s[1..], 8).ok()
    } else {
        s.parse().ok()
    }
}

/// Value of the leading decimal digits of `s`, zero when there are none.
pub fn leading_decimal(s: &str) -> u64 {
    s.trim_start()
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0u64, |acc, digit| {
            acc.wrapping_mul(10).wrapping_add(u64::from(digit - b'0'))
        })
}

/// Parses a `--track` list of object addresses.
pub fn parse_objects(list: &str) -> Result<Vec<u64>, String> {
    list.split(',')
        .filter(|item| !item.is_empty())
        .map(|item| parse_c_ulong(item).ok_or_else(|| format!("invalid object address '{item}'")))
        .collect()
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReportOptions {
    pub reports: Vec<ReportKind>,
    /// Collect backtraces and heap graphs, and show them.
    pub traces: bool,
    pub trace_max: usize,
    pub method_sort: MethodSort,
    pub alloc_sort: AllocSort,
    pub counters_sort: CountersSort,
    pub track: Vec<u64>,
    pub find: Option<FindSpec>,
    pub thread: Option<u64>,
    pub time: Option<TimeRange>,
    pub verbose: u8,
    pub debug: u8,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            reports: parse_reports(DEFAULT_REPORTS).unwrap_or_default(),
            traces: false,
            trace_max: DEFAULT_TRACE_MAX,
            method_sort: MethodSort::default(),
            alloc_sort: AllocSort::default(),
            counters_sort: CountersSort::default(),
            track: Vec::new(),
            find: None,
            thread: None,
            time: None,
            verbose: 0,
            debug: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_reports() {
        let reports = ReportOptions::default().reports;
        assert_eq!(reports.len(), 14);
        assert_eq!(reports[0], ReportKind::Header);
        assert_eq!(reports[13], ReportKind::Counters);
    }

    #[test]
    fn report_lists() {
        assert_eq!(
            parse_reports("gc,,alloc,").unwrap(),
            vec![ReportKind::Gc, ReportKind::Alloc]
        );
        assert!(parse_reports("gc,bogus").is_err());
        assert_eq!(ReportKind::Heapshot.to_string(), "heapshot");
    }

    #[test]
    fn c_integers() {
        assert_eq!(parse_c_ulong("0x7f00"), Some(0x7f00));
        assert_eq!(parse_c_ulong("010"), Some(8));
        assert_eq!(parse_c_ulong("0"), Some(0));
        assert_eq!(parse_c_ulong("1234"), Some(1234));
        assert_eq!(parse_c_ulong("zz"), None);
        assert_eq!(parse_objects("0x10,,32").unwrap(), vec![16, 32]);
        assert_eq!(leading_decimal("64k"), 64);
        assert_eq!(leading_decimal("k"), 0);
    }

    proptest::proptest! {
        #[test]
        fn c_integers_in_every_base(value in proptest::prelude::any::<u64>()) {
            proptest::prop_assert_eq!(parse_c_ulong(&value.to_string()), Some(value));
            proptest::prop_assert_eq!(parse_c_ulong(&format!("{value:#x}")), Some(value));
            proptest::prop_assert_eq!(parse_c_ulong(&format!("0{value:o}")), Some(value));
        }
    }

    #[test]
    fn time_ranges() {
        let range: TimeRange = "1.5-3".parse().unwrap();
        assert_eq!(range.from_secs, 1.5);
        assert_eq!(range.to_secs, 3.0);
        assert!("3-1".parse::<TimeRange>().is_err());
        assert!("3".parse::<TimeRange>().is_err());
    }

    #[test]
    fn find_specs() {
        let mut spec = FindSpec::default();
        spec.add("T:Foo").unwrap();
        assert!(spec.matches(1, "My.Foo"));
        assert!(!spec.matches(1000, "Bar"));
        spec.add("S:100").unwrap();
        assert!(spec.matches(100, "Foo"));
        assert!(!spec.matches(99, "Foo"));
        assert!(spec.add("X:1").is_err());
    }
}
