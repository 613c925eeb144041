// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Statistical samples and their attribution to managed methods and unmanaged symbols.

use crate::tables::Tables;
use indexmap::IndexMap;

/// Distance past the start of the closest symbol still attributed to it.
const SYMBOL_SLACK: u64 = 4096;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnmanagedSymbol {
    pub addr: u64,
    pub size: u64,
    pub name: String,
}

#[derive(Debug, Default)]
pub struct Samples {
    /// (sample type, instruction pointer)
    hits: Vec<(u64, u64)>,
    symbols: Vec<UnmanagedSymbol>,
    binaries: Vec<UnmanagedSymbol>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Target {
    Method(u64),
    Symbol(usize),
    Binary(usize),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleRow {
    pub hits: u64,
    pub name: String,
    /// Binary containing an unmanaged symbol.
    pub binary: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleSummary {
    pub sample_type: u64,
    pub total: u64,
    pub unmanaged_hits: u64,
    pub unresolved_hits: u64,
    /// Managed and unmanaged rows interleaved by decreasing hits.
    pub rows: Vec<SampleRow>,
}

impl SampleSummary {
    pub fn managed_hits(&self) -> u64 {
        self.total - self.unmanaged_hits
    }

    pub fn percent(&self, hits: u64) -> f64 {
        hits as f64 * 100.0 / self.total as f64
    }
}

impl Samples {
    pub fn add_hit(&mut self, sample_type: u64, ip: u64) {
        self.hits.push((sample_type, ip));
    }

    pub fn add_symbol(&mut self, addr: u64, size: u64, name: String) {
        self.symbols.push(UnmanagedSymbol { addr, size, name });
    }

    pub fn add_binary(&mut self, addr: u64, size: u64, name: String) {
        self.binaries.push(UnmanagedSymbol { addr, size, name });
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Symbol at `ip`, or the closest one below it if `ip` is less than a page past its start.
    /// `symbols` must be sorted by address.
    fn lookup_symbol(symbols: &[UnmanagedSymbol], ip: u64) -> Option<usize> {
        let above = symbols.partition_point(|s| s.addr <= ip);
        let index = above.checked_sub(1)?;
        let symbol = &symbols[index];
        (symbol.addr == ip || ip - symbol.addr < SYMBOL_SLACK).then_some(index)
    }

    fn lookup_binary(&self, ip: u64) -> Option<usize> {
        self.binaries
            .iter()
            .position(|b| ip >= b.addr && ip < b.addr.wrapping_add(b.size))
    }

    /// Attributes every sample. `None` when there are no samples.
    pub fn summarize(&mut self, tables: &Tables) -> Option<SampleSummary> {
        let &(sample_type, _) = self.hits.first()?;
        self.symbols.sort_by_key(|s| s.addr);

        let mut counts: IndexMap<Target, u64> = IndexMap::new();
        let mut unmanaged_hits = 0;
        let mut unresolved_hits = 0;
        for &(_, ip) in &self.hits {
            if let Some(method) = tables.method_by_ip(ip) {
                *counts.entry(Target::Method(method.method)).or_default() += 1;
                continue;
            }
            let target = match Self::lookup_symbol(&self.symbols, ip) {
                Some(index) => Some(Target::Symbol(index)),
                None => {
                    unresolved_hits += 1;
                    self.lookup_binary(ip).map(Target::Binary)
                }
            };
            if let Some(target) = target {
                *counts.entry(target).or_default() += 1;
            }
            unmanaged_hits += 1;
        }

        let mut managed = Vec::new();
        let mut unmanaged = Vec::new();
        for (target, hits) in counts {
            match target {
                Target::Method(method) => managed.push(SampleRow {
                    hits,
                    name: tables.method_name(method),
                    binary: None,
                }),
                Target::Symbol(index) => {
                    unmanaged.push(self.unmanaged_row(&self.symbols[index], None, hits))
                }
                Target::Binary(index) => {
                    unmanaged.push(self.unmanaged_row(&self.binaries[index], Some(index), hits))
                }
            }
        }
        managed.sort_by(|a, b| b.hits.cmp(&a.hits));
        unmanaged.sort_by(|a, b| b.hits.cmp(&a.hits));

        let mut rows = Vec::with_capacity(managed.len() + unmanaged.len());
        let mut managed = managed.into_iter().peekable();
        let mut unmanaged = unmanaged.into_iter().peekable();
        loop {
            let take_unmanaged = match (managed.peek(), unmanaged.peek()) {
                (Some(m), Some(u)) => u.hits > m.hits,
                (Some(_), None) => false,
                (None, Some(_)) => true,
                (None, None) => break,
            };
            let row = if take_unmanaged {
                unmanaged.next()
            } else {
                managed.next()
            };
            rows.extend(row);
        }

        Some(SampleSummary {
            sample_type,
            total: self.hits.len() as u64,
            unmanaged_hits,
            unresolved_hits,
            rows,
        })
    }

    fn unmanaged_row(&self, sym: &UnmanagedSymbol, itself: Option<usize>, hits: u64) -> SampleRow {
        let binary = self
            .lookup_binary(sym.addr)
            .filter(|&parent| Some(parent) != itself)
            .map(|parent| self.binaries[parent].name.clone());
        SampleRow {
            hits,
            name: sym.name.clone(),
            binary,
        }
    }
}
