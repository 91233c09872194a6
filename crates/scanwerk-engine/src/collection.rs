// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The ordered, renumberable page list.
//
// Rows are kept sorted by page number. Every structural change re-checks the
// selection by identity, copies the pages into the shared `PageTable` the
// worker resolves requests against, and fires exactly one change
// notification.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::{Page, PageId, PageRef, Selection};
use tracing::{debug, info, instrument, warn};

use crate::process::free_space_mib;

/// Pages by identity, readable from the worker thread.
pub type PageTable = Arc<RwLock<HashMap<PageId, Page>>>;

/// One entry in the collection.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRow {
    /// User-visible page number.
    pub number: u32,
    pub page: Page,
}

/// How many pages fit along a numbering sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagesPossible {
    Count(u32),
    Infinite,
}

#[derive(Debug, Clone, Default)]
struct Snapshot {
    rows: Vec<PageRow>,
    selection: Vec<PageId>,
}

type ChangeObserver = Box<dyn FnMut(&[PageRow])>;

/// Ordered page list with selection, single-level undo/redo and a clipboard.
pub struct PageCollection {
    rows: Vec<PageRow>,
    selection: Vec<PageId>,
    table: PageTable,
    undo_buffer: Option<Snapshot>,
    redo_buffer: Option<Snapshot>,
    clipboard: Vec<Page>,
    changes: u64,
    suppressed: bool,
    observer: Option<ChangeObserver>,
    /// Directory whose filesystem `take_snapshot` watches, and the warning
    /// level in MiB.
    space_watch: Option<(PathBuf, u64)>,
}

impl Default for PageCollection {
    fn default() -> Self {
        Self::new(PageTable::default())
    }
}

impl PageCollection {
    pub fn new(table: PageTable) -> Self {
        Self {
            rows: Vec::new(),
            selection: Vec::new(),
            table,
            undo_buffer: None,
            redo_buffer: None,
            clipboard: Vec::new(),
            changes: 0,
            suppressed: false,
            observer: None,
            space_watch: None,
        }
    }

    /// Warn from [`Self::take_snapshot`] when `dir` has less than
    /// `warning_mib` free.
    pub fn with_free_space_check(mut self, dir: impl Into<PathBuf>, warning_mib: u64) -> Self {
        self.space_watch = Some((dir.into(), warning_mib));
        self
    }

    /// Called with the rows after every structural change.
    pub fn on_change(&mut self, observer: impl FnMut(&[PageRow]) + 'static) {
        self.observer = Some(Box::new(observer));
    }

    // -- Access ---------------------------------------------------------------

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[PageRow] {
        &self.rows
    }

    pub fn table(&self) -> PageTable {
        Arc::clone(&self.table)
    }

    /// Number of change notifications fired so far.
    pub fn changes(&self) -> u64 {
        self.changes
    }

    pub fn index_of(&self, id: PageId) -> Option<usize> {
        self.rows.iter().position(|row| row.page.id == id)
    }

    pub fn get(&self, id: PageId) -> Option<&Page> {
        self.rows.iter().find(|row| row.page.id == id).map(|row| &row.page)
    }

    pub fn number_of(&self, id: PageId) -> Option<u32> {
        self.rows.iter().find(|row| row.page.id == id).map(|row| row.number)
    }

    /// Index of the row numbered `number`.
    pub fn index_for_page(&self, number: u32) -> Option<usize> {
        self.rows.binary_search_by_key(&number, |row| row.number).ok()
    }

    pub fn page_ids(&self) -> Vec<PageId> {
        self.rows.iter().map(|row| row.page.id).collect()
    }

    fn find_page_by_ref(&self, id: PageId) -> Result<usize> {
        self.index_of(id).ok_or_else(|| {
            warn!(page = %id, "requested page does not exist");
            ScanwerkError::PageNotFound(id)
        })
    }

    // -- Selection ------------------------------------------------------------

    /// Selected identities, in page order.
    pub fn selected_ids(&self) -> Vec<PageId> {
        self.selected_indices()
            .into_iter()
            .map(|i| self.rows[i].page.id)
            .collect()
    }

    pub fn selected_indices(&self) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| self.selection.contains(&row.page.id))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn select(&mut self, indices: &[usize]) {
        self.selection = indices
            .iter()
            .filter_map(|&i| self.rows.get(i))
            .map(|row| row.page.id)
            .collect();
    }

    pub fn select_ids(&mut self, ids: &[PageId]) {
        self.selection = ids.to_vec();
        self.revalidate_selection();
    }

    pub fn select_all(&mut self) {
        self.selection = self.page_ids();
    }

    fn revalidate_selection(&mut self) {
        let present: HashSet<PageId> = self.rows.iter().map(|row| row.page.id).collect();
        self.selection.retain(|id| present.contains(id));
    }

    // -- Structural changes ---------------------------------------------------

    /// Run `mutate` with notifications held back, then sort, re-check the
    /// selection and notify once.
    fn structural<R>(&mut self, mutate: impl FnOnce(&mut Self) -> R) -> R {
        let outer = std::mem::replace(&mut self.suppressed, true);
        let result = mutate(self);
        self.suppressed = outer;
        self.rows.sort_by_key(|row| row.number);
        self.revalidate_selection();
        if !outer {
            self.notify();
        }
        result
    }

    fn notify(&mut self) {
        self.sync_table();
        self.changes += 1;
        if let Some(observer) = self.observer.as_mut() {
            observer(&self.rows);
        }
    }

    fn sync_table(&self) {
        let mut table = self.table.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        table.clear();
        table.extend(self.rows.iter().map(|row| (row.page.id, row.page.clone())));
    }

    fn ensure_unique(&self, id: PageId, except: Option<usize>) -> Result<()> {
        match self.index_of(id) {
            Some(i) if Some(i) != except => Err(ScanwerkError::InvalidRequest(format!(
                "page {id} is already in the collection"
            ))),
            _ => Ok(()),
        }
    }

    /// Place `page` according to `placement` and return its new index.
    #[instrument(skip(self, page), fields(page = %page.id))]
    pub fn add_page(&mut self, placement: PageRef, page: Page) -> Result<usize> {
        let id = page.id;
        match placement {
            PageRef::Append => {
                self.ensure_unique(id, None)?;
                let last = self.rows.last().map_or(0, |row| row.number);
                let number = (self.rows.len() as u32 + 1).max(last + 1);
                self.structural(|this| {
                    this.rows.push(PageRow { number, page });
                    this.selection = vec![id];
                });
                info!(number, "added page");
            }
            PageRef::Replace(old) => {
                let i = self.find_page_by_ref(old)?;
                self.ensure_unique(id, Some(i))?;
                self.structural(|this| {
                    this.rows[i].page = page;
                    if old != id
                        && let Some(slot) = this.selection.iter_mut().find(|s| **s == old)
                    {
                        *slot = id;
                    }
                });
                info!(old = %old, "replaced page");
            }
            PageRef::InsertAfter(after) => {
                let i = self.find_page_by_ref(after)?;
                self.ensure_unique(id, None)?;
                let number = self.rows[i].number + 1;
                self.structural(|this| {
                    this.rows.insert(i + 1, PageRow { number, page });
                    this.bump_tail(i + 2);
                    this.selection = vec![id];
                });
                info!(number, after = %after, "inserted page");
            }
        }
        self.index_of(id).ok_or(ScanwerkError::PageNotFound(id))
    }

    /// Raise numbers from `start` on so they stay strictly ascending.
    fn bump_tail(&mut self, start: usize) {
        for i in start.max(1)..self.rows.len() {
            let prev = self.rows[i - 1].number;
            if self.rows[i].number <= prev {
                debug!(from = self.rows[i].number, to = prev + 1, "renumbering page");
                self.rows[i].number = prev + 1;
            }
        }
    }

    /// Remove the selected pages and select the page nearest the first one
    /// removed. Returns the removed pages.
    #[instrument(skip(self))]
    pub fn delete_selection(&mut self) -> Vec<Page> {
        let indices = self.selected_indices();
        let Some(&first) = indices.first() else {
            return Vec::new();
        };
        let removed = self.structural(|this| {
            let doomed: HashSet<PageId> = this.selection.iter().copied().collect();
            let (gone, kept): (Vec<PageRow>, Vec<PageRow>) =
                this.rows.drain(..).partition(|row| doomed.contains(&row.page.id));
            this.rows = kept;
            this.selection = match this.rows.len() {
                0 => Vec::new(),
                len => vec![this.rows[first.min(len - 1)].page.id],
            };
            gone.into_iter().map(|row| row.page).collect::<Vec<_>>()
        });
        info!(count = removed.len(), "deleted pages");
        removed
    }

    /// Flag the given pages as exported.
    pub fn mark_saved(&mut self, ids: &[PageId]) {
        self.structural(|this| {
            for row in this.rows.iter_mut().filter(|row| ids.contains(&row.page.id)) {
                row.page.saved = true;
            }
        });
    }

    /// Replace the whole collection, e.g. from a saved session.
    pub fn replace_rows(&mut self, rows: Vec<PageRow>) {
        self.structural(|this| {
            this.rows = rows;
            this.selection.clear();
        });
    }

    // -- Clipboard ------------------------------------------------------------

    /// Copy the selected pages to the clipboard; returns how many.
    pub fn copy_selection(&mut self) -> usize {
        self.clipboard = self
            .selected_indices()
            .into_iter()
            .map(|i| self.rows[i].page.clone())
            .collect();
        info!(count = self.clipboard.len(), "copied pages");
        self.clipboard.len()
    }

    pub fn cut_selection(&mut self) -> usize {
        let count = self.copy_selection();
        self.delete_selection();
        count
    }

    pub fn clipboard(&self) -> &[Page] {
        &self.clipboard
    }

    /// Insert copies of the clipboard pages with fresh identities, after
    /// `after` or at the end, and select them.
    #[instrument(skip(self))]
    pub fn paste_selection(&mut self, after: Option<PageId>) -> Result<Vec<PageId>> {
        if self.clipboard.is_empty() {
            return Ok(Vec::new());
        }
        let dest = match after {
            Some(id) => self.find_page_by_ref(id)? + 1,
            None => self.rows.len(),
        };
        let start = if dest == 0 { 1 } else { self.rows[dest - 1].number + 1 };
        let pasted: Vec<PageRow> = self
            .clipboard
            .iter()
            .zip(start..)
            .map(|(page, number)| {
                let mut page = page.clone();
                page.id = PageId::new();
                PageRow { number, page }
            })
            .collect();
        let ids: Vec<PageId> = pasted.iter().map(|row| row.page.id).collect();

        self.structural(|this| {
            this.rows.splice(dest..dest, pasted);
            this.bump_tail(dest + ids.len());
            this.selection = ids.clone();
        });
        info!(count = ids.len(), position = dest, "pasted pages");
        Ok(ids)
    }

    // -- Numbering ------------------------------------------------------------

    /// Reassign page numbers.
    ///
    /// With a `start`, the chosen rows are numbered `start`, `start + step`,
    /// ... in their current order. Without one, numbers are only raised
    /// where needed to keep them strictly ascending.
    #[instrument(skip(self))]
    pub fn renumber(&mut self, start: Option<u32>, step: Option<i32>, selection: Selection) -> Result<()> {
        let Some(start) = start else {
            self.structural(|this| this.bump_tail(1));
            return Ok(());
        };
        let step = step.unwrap_or(1);
        if !self.valid_renumber(start, step, selection) {
            return Err(ScanwerkError::InvalidRequest(format!(
                "renumbering from {start} in steps of {step} would duplicate or drop below page 1"
            )));
        }
        let targets = match selection {
            Selection::All => (0..self.rows.len()).collect::<Vec<_>>(),
            Selection::Selected => self.selected_indices(),
        };
        self.structural(|this| {
            let mut number = start as i64;
            for i in targets {
                debug!(from = this.rows[i].number, to = number, "renumbering page");
                this.rows[i].number = number as u32;
                number += step as i64;
            }
        });
        Ok(())
    }

    /// Whether `renumber(start, step, selection)` would leave every number
    /// positive and unique.
    pub fn valid_renumber(&self, start: u32, step: i32, selection: Selection) -> bool {
        if step == 0 || start < 1 {
            return false;
        }
        let (start, step) = (start as i64, step as i64);
        match selection {
            Selection::All => {
                step > 0 || start + (self.rows.len() as i64 - 1) * step > 0
            }
            Selection::Selected => {
                let selected = self.selected_indices();
                let unselected: HashSet<i64> = self
                    .rows
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !selected.contains(i))
                    .map(|(_, row)| row.number as i64)
                    .collect();
                (0..selected.len() as i64)
                    .map(|i| start + step * i)
                    .all(|n| n > 0 && !unselected.contains(&n))
            }
        }
    }

    /// How many new pages could be numbered `start`, `start + step`, ...
    /// before hitting an existing page or dropping below 1.
    pub fn pages_possible(&self, start: u32, step: i32) -> PagesPossible {
        let (start_i, step_i) = (start as i64, step as i64);
        let Some(last) = self.rows.last() else {
            if step < 0 {
                let count = (start_i + (-step_i) - 1) / -step_i;
                return PagesPossible::Count(count as u32);
            }
            return PagesPossible::Infinite;
        };
        if step == 0 {
            return match self.index_for_page(start) {
                Some(_) => PagesPossible::Count(0),
                None => PagesPossible::Infinite,
            };
        }
        let max = last.number as i64;
        if step > 0 && max < start_i {
            return PagesPossible::Infinite;
        }

        let mut num: i64 = 0;
        loop {
            let candidate = start_i + num * step_i;
            if step > 0 && candidate > max {
                return PagesPossible::Infinite;
            }
            if step < 0 && candidate < 1 {
                return PagesPossible::Count(num as u32);
            }
            if self.index_for_page(candidate as u32).is_some() {
                return PagesPossible::Count(num as u32);
            }
            num += 1;
        }
    }

    // -- Undo -----------------------------------------------------------------

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            rows: self.rows.clone(),
            selection: self.selection.clone(),
        }
    }

    /// Store the current state for [`Self::undo`].
    ///
    /// Returns the free space in MiB when the session filesystem is below
    /// the configured warning level.
    pub fn take_snapshot(&mut self) -> Option<u64> {
        self.undo_buffer = Some(self.snapshot());
        debug!(rows = self.rows.len(), "undo snapshot taken");

        let (dir, warning_mib) = self.space_watch.as_ref()?;
        let free = free_space_mib(dir)?;
        if free < *warning_mib {
            warn!(free_mib = free, warning_mib, dir = %dir.display(), "session directory is low on space");
            return Some(free);
        }
        None
    }

    pub fn can_undo(&self) -> bool {
        self.undo_buffer.is_some()
    }

    pub fn can_redo(&self) -> bool {
        self.redo_buffer.is_some()
    }

    /// Swap back to the last snapshot. Returns false when there is none.
    pub fn undo(&mut self) -> bool {
        let Some(previous) = self.undo_buffer.take() else {
            return false;
        };
        self.redo_buffer = Some(self.snapshot());
        self.restore(previous);
        info!("undo");
        true
    }

    /// Reverse the last [`Self::undo`].
    pub fn redo(&mut self) -> bool {
        let Some(next) = self.redo_buffer.take() else {
            return false;
        };
        self.undo_buffer = Some(self.snapshot());
        self.restore(next);
        info!("redo");
        true
    }

    fn restore(&mut self, snapshot: Snapshot) {
        self.structural(|this| {
            this.rows = snapshot.rows;
            this.selection = snapshot.selection;
        });
    }
}
