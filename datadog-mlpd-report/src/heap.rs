// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Heap shots: per-class histograms of the objects walked between a heap start and a heap
//! end event, plus the object graph when backtraces are collected.

use indexmap::IndexMap;
use libdd_mlpd_protocol::wire::legacy_root;
use std::collections::{HashSet, VecDeque};

#[derive(Clone, Debug, Default)]
pub struct HeapClass {
    pub klass: u64,
    pub count: u64,
    pub total_size: u64,
    /// Referencing class -> number of references from its objects.
    pub rev_refs: IndexMap<u64, u64>,
    pub root_references: u64,
    pub pinned_references: u64,
}

#[derive(Clone, Debug)]
struct HeapObject {
    klass: u64,
    refs: Vec<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapRoot {
    pub obj: u64,
    pub root_type: u64,
    pub extra: u64,
}

/// Problems found in the object graph of a heap shot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeapShotCheck {
    pub missing_roots: Vec<HeapRoot>,
    pub missing_refs: Vec<u64>,
    /// Objects no root reaches, with their class.
    pub unmarked: Vec<(u64, u64)>,
    pub object_count: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectError {
    Duplicate,
    /// A continuation record for an object that was never walked.
    Missing,
}

#[derive(Clone, Debug, Default)]
pub struct HeapShot {
    pub timestamp: u64,
    pub classes: IndexMap<u64, HeapClass>,
    pub roots: Vec<HeapRoot>,
    objects: IndexMap<u64, HeapObject>,
}

impl HeapShot {
    pub fn new(timestamp: u64) -> Self {
        Self {
            timestamp,
            ..Default::default()
        }
    }

    pub fn object_count(&self) -> u64 {
        self.classes.values().map(|c| c.count).sum()
    }

    pub fn total_size(&self) -> u64 {
        self.classes
            .values()
            .fold(0u64, |total, c| total.wrapping_add(c.total_size))
    }

    pub fn tracked_objects(&self) -> usize {
        self.objects.len()
    }

    /// Adds a walked object. Objects with a zero size continue the reference list of an
    /// object already walked. The object graph is only kept when `keep_graph` is set.
    pub fn add_object(
        &mut self,
        obj: u64,
        klass: u64,
        size: u64,
        refs: &[u64],
        keep_graph: bool,
    ) -> Result<(), ObjectError> {
        if size != 0 {
            let class = self.classes.entry(klass).or_insert_with(|| HeapClass {
                klass,
                ..Default::default()
            });
            class.count += 1;
            class.total_size = class.total_size.wrapping_add(size);
            if keep_graph {
                if self.objects.contains_key(&obj) {
                    return Err(ObjectError::Duplicate);
                }
                self.objects.insert(
                    obj,
                    HeapObject {
                        klass,
                        refs: refs.to_vec(),
                    },
                );
            }
        } else if keep_graph {
            let object = self.objects.get_mut(&obj).ok_or(ObjectError::Missing)?;
            object.refs.extend_from_slice(refs);
        }
        Ok(())
    }

    /// Counts, per class, the references its objects receive from each other class.
    pub fn resolve_reverse_refs(&mut self) {
        let mut edges = Vec::new();
        for object in self.objects.values() {
            for target in &object.refs {
                if let Some(to) = self.objects.get(target) {
                    edges.push((object.klass, to.klass));
                }
            }
        }
        for (from, to) in edges {
            if let Some(class) = self.classes.get_mut(&to) {
                *class.rev_refs.entry(from).or_default() += 1;
            }
        }
    }

    /// Counts root references per class. With `check`, also walks the graph from the roots
    /// and reports what cannot be found or reached.
    pub fn mark_roots(&mut self, check: bool) -> Option<HeapShotCheck> {
        for root in &self.roots {
            let Some(object) = self.objects.get(&root.obj) else {
                continue;
            };
            if let Some(class) = self.classes.get_mut(&object.klass) {
                if root.root_type & legacy_root::PINNING != 0 {
                    class.pinned_references += 1;
                }
                class.root_references += 1;
            }
        }
        if !check {
            return None;
        }

        let mut report = HeapShotCheck {
            object_count: self.objects.len(),
            ..Default::default()
        };
        let mut marked = HashSet::new();
        let mut pending = VecDeque::new();
        for root in &self.roots {
            if !self.objects.contains_key(&root.obj) {
                report.missing_roots.push(*root);
                continue;
            }
            if marked.insert(root.obj) {
                pending.push_back(root.obj);
            }
        }
        while let Some(obj) = pending.pop_front() {
            let Some(object) = self.objects.get(&obj) else {
                continue;
            };
            for &target in &object.refs {
                if !self.objects.contains_key(&target) {
                    report.missing_refs.push(target);
                } else if marked.insert(target) {
                    pending.push_back(target);
                }
            }
        }
        report.unmarked = self
            .objects
            .iter()
            .filter(|(obj, _)| !marked.contains(*obj))
            .map(|(&obj, object)| (obj, object.klass))
            .collect();
        Some(report)
    }

    /// Drops the object graph once the shot is complete; only the histograms are reported.
    pub fn free_objects(&mut self) {
        self.objects = IndexMap::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const X: u64 = 0x100;
    const Y: u64 = 0x200;

    fn shot() -> HeapShot {
        let mut hs = HeapShot::new(10);
        hs.add_object(0x1000, X, 16, &[0x2000], true).unwrap();
        hs.add_object(0x1010, X, 16, &[0x2000], true).unwrap();
        hs.add_object(0x2000, Y, 100, &[], true).unwrap();
        hs.add_object(0x3000, Y, 8, &[0x9999], true).unwrap();
        hs
    }

    #[test]
    fn histogram() {
        let mut hs = HeapShot::new(0);
        hs.add_object(0x1000, X, 16, &[], false).unwrap();
        hs.add_object(0x1010, X, 32, &[], false).unwrap();
        hs.add_object(0x1000, X, 0, &[0x1010], false).unwrap();
        assert_eq!(hs.classes[&X].count, 2);
        assert_eq!(hs.classes[&X].total_size, 48);
        assert_eq!(hs.tracked_objects(), 0);
        assert_eq!(hs.object_count(), 2);
        assert_eq!(hs.total_size(), 48);
    }

    #[test]
    fn continuation_and_duplicates() {
        let mut hs = shot();
        assert_eq!(
            hs.add_object(0x2000, Y, 100, &[], true),
            Err(ObjectError::Duplicate)
        );
        assert_eq!(
            hs.add_object(0x4000, Y, 0, &[0x1000], true),
            Err(ObjectError::Missing)
        );
        hs.add_object(0x2000, Y, 0, &[0x1000], true).unwrap();
        hs.resolve_reverse_refs();
        assert_eq!(hs.classes[&Y].rev_refs[&X], 2);
        assert_eq!(hs.classes[&X].rev_refs[&Y], 1);
    }

    #[test]
    fn roots_and_marking() {
        let mut hs = shot();
        hs.roots = vec![
            HeapRoot {
                obj: 0x1000,
                root_type: legacy_root::MISC | legacy_root::PINNING,
                extra: 0,
            },
            HeapRoot {
                obj: 0x5000,
                root_type: legacy_root::STACK,
                extra: X,
            },
        ];
        let check = hs.mark_roots(true).unwrap();
        assert_eq!(hs.classes[&X].root_references, 1);
        assert_eq!(hs.classes[&X].pinned_references, 1);
        assert_eq!(check.missing_roots.len(), 1);
        assert_eq!(check.missing_roots[0].obj, 0x5000);
        assert!(check.missing_refs.is_empty());
        assert_eq!(check.unmarked, vec![(0x1010, X), (0x3000, Y)]);
        assert_eq!(check.object_count, 4);

        hs.free_objects();
        assert_eq!(hs.tracked_objects(), 0);
        assert_eq!(hs.object_count(), 4);
    }

    #[test]
    fn check_is_optional() {
        let mut hs = shot();
        assert!(hs.mark_roots(false).is_none());
    }
}
