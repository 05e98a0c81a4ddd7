//-
// Copyright (c) 2026, Jason Lingle
//
// This file is part of Crysms.
//
// Crysms is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Crysms is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Crysms. If not, see <http://www.gnu.org/licenses/>.

//! The structural integrity checker.
//!
//! This walks the free list and the whole record forest straight from the
//! file, bypassing the cache, and counts how often each index is reached.
//! A healthy file reaches every index other than the header exactly once,
//! with every stored `prev` and `parent` matching the path it was reached
//! by.

use std::collections::BTreeMap;
use std::fmt;

use log::info;

use super::entry::EntryKind;
use super::LockedStorage;
use crate::support::error::Error;

#[derive(Clone, Debug, Default)]
pub struct IntegrityReport {
    /// The number of entries in the file, including the header.
    pub entry_count: u32,
    /// Indices not reachable from anywhere.
    pub unvisited: Vec<u32>,
    /// Indices reached a second time. The walk does not continue past them.
    pub visited_twice: Vec<u32>,
    /// Descriptions of pointers which disagree with the walk.
    pub bad_pointers: Vec<String>,
    /// How many entries of each kind were found.
    pub counts: BTreeMap<EntryKind, u32>,
}

impl IntegrityReport {
    pub fn all_visited(&self) -> bool {
        self.unvisited.is_empty()
    }

    pub fn no_duplicates(&self) -> bool {
        self.visited_twice.is_empty()
    }

    pub fn pointers_consistent(&self) -> bool {
        self.bad_pointers.is_empty()
    }

    pub fn is_ok(&self) -> bool {
        self.all_visited() && self.no_duplicates() && self.pointers_consistent()
    }

    pub fn count(&self, kind: EntryKind) -> u32 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }
}

impl fmt::Display for IntegrityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "entries: {}", self.entry_count)?;
        for (kind, count) in &self.counts {
            writeln!(f, "{:?}: {}", kind, count)?;
        }
        if !self.all_visited() {
            writeln!(f, "unreachable: {:?}", self.unvisited)?;
        }
        if !self.no_duplicates() {
            writeln!(f, "reachable more than once: {:?}", self.visited_twice)?;
        }
        for bad in &self.bad_pointers {
            writeln!(f, "bad pointer: {}", bad)?;
        }
        Ok(())
    }
}

impl LockedStorage<'_> {
    /// Walk the whole file and report on its structural integrity.
    ///
    /// Fails only if an entry cannot be read at all, e.g. because it does
    /// not authenticate.
    pub fn check_integrity(&mut self) -> Result<IntegrityReport, Error> {
        let entry_count = self.entry_count();
        let mut report = IntegrityReport {
            entry_count,
            ..IntegrityReport::default()
        };
        let mut visits = vec![0u8; entry_count as usize];

        let header = self.header();
        self.walk(
            EntryKind::Empty,
            header.index_empty,
            0,
            &mut visits,
            &mut report,
        )?;
        self.walk(
            EntryKind::Conversation,
            header.index_conversations,
            0,
            &mut visits,
            &mut report,
        )?;

        report.unvisited = (1..entry_count)
            .filter(|&ix| 0 == visits[ix as usize])
            .collect();

        info!(
            "{} Integrity check: {} entries, {} unreachable, {} reached \
             twice, {} bad pointers",
            self.log_prefix(),
            entry_count,
            report.unvisited.len(),
            report.visited_twice.len(),
            report.bad_pointers.len()
        );
        Ok(report)
    }

    fn walk(
        &mut self,
        kind: EntryKind,
        head: u32,
        parent: u32,
        visits: &mut [u8],
        report: &mut IntegrityReport,
    ) -> Result<(), Error> {
        let mut expected_prev = 0;
        let mut index = head;
        while 0 != index {
            if index as usize >= visits.len() {
                report.bad_pointers.push(format!(
                    "{:?} list under {} reaches {}, beyond the end of the file",
                    kind, parent, index
                ));
                break;
            }

            let seen = &mut visits[index as usize];
            *seen = seen.saturating_add(1);
            if *seen > 1 {
                report.visited_twice.push(index);
                break;
            }

            let entry = self.read_entry(kind, index)?;
            let links = entry.links();
            if EntryKind::Empty != kind && links.prev != expected_prev {
                report.bad_pointers.push(format!(
                    "{:?} {} has prev {}, expected {}",
                    kind, index, links.prev, expected_prev
                ));
            }
            if kind.parent_kind().is_some() && links.parent != parent {
                report.bad_pointers.push(format!(
                    "{:?} {} has parent {}, expected {}",
                    kind, index, links.parent, parent
                ));
            }
            *report.counts.entry(kind).or_insert(0) += 1;

            for &child in kind.child_kinds() {
                self.walk(
                    child,
                    entry.child_head(child),
                    index,
                    visits,
                    report,
                )?;
            }

            expected_prev = index;
            index = links.next;
        }

        Ok(())
    }
}
