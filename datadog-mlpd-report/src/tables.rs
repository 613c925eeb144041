// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Metadata resolved while decoding: classes, vtables, methods, images, assemblies and the
//! interned backtraces that reference methods.

use indexmap::{IndexMap, IndexSet};
use std::fmt;

/// A runtime address, printed the way C's `%p` prints it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Ptr(pub u64);

impl fmt::Display for Ptr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            f.pad("(nil)")
        } else {
            f.pad(&format!("0x{:x}", self.0))
        }
    }
}

/// Index into [`Backtraces`].
pub type BacktraceId = usize;

/// Distinct backtraces seen so far, each a list of method pointers, outermost frame first.
#[derive(Debug, Default)]
pub struct Backtraces {
    set: IndexSet<Vec<u64>>,
}

impl Backtraces {
    pub fn intern(&mut self, frames: Vec<u64>) -> BacktraceId {
        self.set.insert_full(frames).0
    }

    pub fn get(&self, id: BacktraceId) -> &[u64] {
        self.set.get_index(id).map_or(&[], Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

/// Accumulated values per backtrace, e.g. allocated bytes per allocation site.
#[derive(Clone, Debug, Default)]
pub struct Traces {
    counts: IndexMap<BacktraceId, u64>,
}

impl Traces {
    pub fn add(&mut self, bt: BacktraceId, value: u64) {
        let count = self.counts.entry(bt).or_default();
        *count = count.wrapping_add(value);
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn count(&self, bt: BacktraceId) -> u64 {
        self.counts.get(&bt).copied().unwrap_or(0)
    }

    /// Backtraces by decreasing value.
    pub fn sorted(&self) -> Vec<(BacktraceId, u64)> {
        let mut sorted: Vec<_> = self.counts.iter().map(|(&bt, &n)| (bt, n)).collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1));
        sorted
    }
}

#[derive(Clone, Debug)]
pub struct ClassDesc {
    pub klass: u64,
    pub name: String,
    pub allocs: u64,
    pub alloc_size: u64,
    pub traces: Traces,
}

impl ClassDesc {
    fn new(klass: u64, name: String) -> Self {
        Self {
            klass,
            name,
            allocs: 0,
            alloc_size: 0,
            traces: Traces::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct MethodDesc {
    pub method: u64,
    pub name: String,
    pub code: u64,
    pub len: u64,
    /// Compiled outside of the time window: kept for names but not counted as JIT work.
    pub ignore_jit: bool,
    pub calls: u64,
    pub self_time: u64,
    pub callee_time: u64,
    pub traces: Traces,
}

impl MethodDesc {
    fn new(method: u64, name: String) -> Self {
        Self {
            method,
            name,
            code: 0,
            len: 0,
            ignore_jit: false,
            calls: 0,
            self_time: 0,
            callee_time: 0,
            traces: Traces::default(),
        }
    }

    pub fn total_time(&self) -> u64 {
        self.self_time.wrapping_add(self.callee_time)
    }

    pub fn contains_ip(&self, ip: u64) -> bool {
        ip >= self.code && ip < self.code.wrapping_add(self.len)
    }
}

#[derive(Debug, Default)]
pub struct Tables {
    pub classes: IndexMap<u64, ClassDesc>,
    /// vtable -> class
    pub vtables: IndexMap<u64, u64>,
    pub methods: IndexMap<u64, MethodDesc>,
    pub images: Vec<(u64, String)>,
    pub assemblies: Vec<(u64, String)>,
    pub backtraces: Backtraces,
}

impl Tables {
    /// Records a class load. A class that was referenced before it was loaded gets its name.
    pub fn add_class(&mut self, klass: u64, name: &str) -> &mut ClassDesc {
        let class = self
            .classes
            .entry(klass)
            .or_insert_with(|| ClassDesc::new(klass, String::new()));
        name.clone_into(&mut class.name);
        class
    }

    /// The class at `klass`, created with a placeholder name if it was never loaded.
    pub fn class(&mut self, klass: u64) -> &mut ClassDesc {
        self.classes
            .entry(klass)
            .or_insert_with(|| ClassDesc::new(klass, format!("unresolved class {}", Ptr(klass))))
    }

    pub fn add_vtable(&mut self, vtable: u64, klass: u64) {
        if self.vtables.contains_key(&vtable) {
            return;
        }
        self.class(klass);
        self.vtables.insert(vtable, klass);
    }

    /// Class pointer of `vtable`; unknown vtables map to the null class.
    pub fn vtable_class(&mut self, vtable: u64) -> u64 {
        if let Some(&klass) = self.vtables.get(&vtable) {
            return klass;
        }
        self.add_vtable(vtable, 0);
        0
    }

    pub fn add_method(&mut self, method: u64, name: &str, code: u64, len: u64) -> &mut MethodDesc {
        let desc = self
            .methods
            .entry(method)
            .or_insert_with(|| MethodDesc::new(method, String::new()));
        name.clone_into(&mut desc.name);
        desc.code = code;
        desc.len = len;
        desc
    }

    /// The method at `method`, created with a placeholder name if it was never compiled.
    pub fn method(&mut self, method: u64) -> &mut MethodDesc {
        self.methods
            .entry(method)
            .or_insert_with(|| MethodDesc::new(method, format!("unknown method {}", Ptr(method))))
    }

    pub fn method_name(&self, method: u64) -> String {
        match self.methods.get(&method) {
            Some(desc) => desc.name.clone(),
            None => format!("unknown method {}", Ptr(method)),
        }
    }

    pub fn method_by_ip(&self, ip: u64) -> Option<&MethodDesc> {
        self.methods.values().find(|m| m.contains_ip(ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointers_print_like_c() {
        assert_eq!(Ptr(0).to_string(), "(nil)");
        assert_eq!(Ptr(0x7f00).to_string(), "0x7f00");
        assert_eq!(format!("{:>8}", Ptr(0x10)), "    0x10");
    }

    #[test]
    fn classes_resolve_late() {
        let mut tables = Tables::default();
        assert_eq!(tables.class(0x1000).name, "unresolved class 0x1000");
        tables.class(0x1000).allocs += 1;
        tables.add_class(0x1000, "System.String");
        let class = &tables.classes[&0x1000];
        assert_eq!(class.name, "System.String");
        assert_eq!(class.allocs, 1);
        assert_eq!(tables.classes.len(), 1);
    }

    #[test]
    fn vtables_point_at_classes() {
        let mut tables = Tables::default();
        tables.add_class(0x10, "Foo");
        tables.add_vtable(0x2000, 0x10);
        tables.add_vtable(0x2000, 0x20);
        assert_eq!(tables.vtable_class(0x2000), 0x10);
        assert_eq!(tables.vtable_class(0x3000), 0);
        assert_eq!(tables.classes[&0].name, "unresolved class (nil)");
    }

    #[test]
    fn methods_by_ip() {
        let mut tables = Tables::default();
        tables.add_method(0x100, "A", 0x5000, 0x40);
        tables.method(0x200);
        assert_eq!(tables.method_by_ip(0x5010).map(|m| m.method), Some(0x100));
        assert!(tables.method_by_ip(0x5040).is_none());
        assert_eq!(tables.method_name(0x200), "unknown method 0x200");
        assert_eq!(tables.method_name(0x300), "unknown method 0x300");
    }

    #[test]
    fn traces_sort_by_value() {
        let mut backtraces = Backtraces::default();
        let a = backtraces.intern(vec![1, 2]);
        let b = backtraces.intern(vec![3]);
        assert_eq!(backtraces.intern(vec![1, 2]), a);
        assert_eq!(backtraces.get(b), &[3]);

        let mut traces = Traces::default();
        traces.add(a, 5);
        traces.add(b, 7);
        traces.add(a, 1);
        assert_eq!(traces.sorted(), vec![(b, 7), (a, 6)]);
        assert_eq!(traces.count(a), 6);
    }
}
