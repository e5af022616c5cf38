use crate::frame::{FrameState, FrameTable};
use kernel_addrs::FrameNumber;

/// One rank's free list, threaded through the frame descriptors.
///
/// Push and pop work on the front, so the most recently freed block is
/// reused first. Every frame on the list is a [`FrameState::Free`] head of
/// the list's rank.
#[derive(Debug)]
pub(crate) struct FreeList {
    head: Option<FrameNumber>,
    len: usize,
}

impl FreeList {
    pub(crate) const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    #[inline]
    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    /// Push `frame` onto the front.
    pub(crate) fn push(&mut self, table: &mut FrameTable<'_>, frame: FrameNumber) {
        debug_assert_eq!(table.get(frame).state, FrameState::Free);
        if let Some(old) = self.head {
            table.get_mut(old).prev = Some(frame);
        }
        {
            let info = table.get_mut(frame);
            info.prev = None;
            info.next = self.head;
        }
        self.head = Some(frame);
        self.len += 1;
    }

    /// Pop the most recently pushed frame.
    pub(crate) fn pop(&mut self, table: &mut FrameTable<'_>) -> Option<FrameNumber> {
        let frame = self.head?;
        self.unlink(table, frame);
        Some(frame)
    }

    /// Remove `frame` from anywhere in the list.
    pub(crate) fn unlink(&mut self, table: &mut FrameTable<'_>, frame: FrameNumber) {
        let (prev, next) = {
            let info = table.get(frame);
            debug_assert_eq!(info.state, FrameState::Free);
            (info.prev, info.next)
        };
        match prev {
            Some(p) => table.get_mut(p).next = next,
            None => {
                debug_assert_eq!(self.head, Some(frame));
                self.head = next;
            }
        }
        if let Some(n) = next {
            table.get_mut(n).prev = prev;
        }
        {
            let info = table.get_mut(frame);
            info.prev = None;
            info.next = None;
        }
        self.len -= 1;
    }

    /// Walk the list front to back.
    pub(crate) fn iter<'a, 't>(&self, table: &'a FrameTable<'t>) -> Iter<'a, 't> {
        Iter {
            table,
            cur: self.head,
        }
    }
}

pub(crate) struct Iter<'a, 't> {
    table: &'a FrameTable<'t>,
    cur: Option<FrameNumber>,
}

impl Iterator for Iter<'_, '_> {
    type Item = FrameNumber;

    fn next(&mut self) -> Option<FrameNumber> {
        let frame = self.cur?;
        self.cur = self.table.get(frame).next;
        Some(frame)
    }
}
