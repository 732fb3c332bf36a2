// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Owned waiter list shared by the event and the semaphore.
//!
//! Singly linked, FIFO. Removing a node hands its resumer back to the
//! caller, who invokes it only after releasing the primitive's lock.

use crate::promise::Resumer;

struct Node {
    id: u64,
    resumer: Resumer,
    next: Option<Box<Node>>,
}

#[derive(Default)]
pub(crate) struct WaiterList {
    head: Option<Box<Node>>,
    len: usize,
}

impl WaiterList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn push_back(&mut self, id: u64, resumer: Resumer) {
        let mut cursor = &mut self.head;
        while let Some(node) = cursor {
            cursor = &mut node.next;
        }
        *cursor = Some(Box::new(Node {
            id,
            resumer,
            next: None,
        }));
        self.len += 1;
    }

    pub fn pop_front(&mut self) -> Option<Resumer> {
        let mut node = self.head.take()?;
        self.head = node.next.take();
        self.len -= 1;
        Some(node.resumer)
    }

    /// Unlink the node registered under `id`.
    pub fn remove(&mut self, id: u64) -> Option<Resumer> {
        let mut found = None;
        let mut rest = self.head.take();
        let mut reversed: Option<Box<Node>> = None;
        while let Some(mut node) = rest {
            rest = node.next.take();
            if found.is_none() && node.id == id {
                found = Some(node.resumer);
                continue;
            }
            node.next = reversed;
            reversed = Some(node);
        }
        while let Some(mut node) = reversed {
            reversed = node.next.take();
            node.next = self.head.take();
            self.head = Some(node);
        }
        if found.is_some() {
            self.len -= 1;
        }
        found
    }

    /// Take every waiter, leaving the list empty.
    pub fn take_all(&mut self) -> WaiterList {
        std::mem::take(self)
    }
}

impl Iterator for WaiterList {
    type Item = Resumer;

    fn next(&mut self) -> Option<Resumer> {
        self.pop_front()
    }
}

impl Drop for WaiterList {
    fn drop(&mut self) {
        // Unlink iteratively so long lists cannot overflow the stack.
        let mut rest = self.head.take();
        while let Some(mut node) = rest {
            rest = node.next.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promise::Promise;

    fn resumer() -> (Promise, Resumer) {
        let promise = Promise::new(Box::pin(async {}), None, None);
        let resumer = promise.resumer();
        (promise, resumer)
    }

    #[test]
    fn pops_in_registration_order() {
        let mut list = WaiterList::new();
        let (a, ra) = resumer();
        let (b, rb) = resumer();
        list.push_back(1, ra);
        list.push_back(2, rb);
        assert_eq!(list.len(), 2);
        assert_eq!(list.pop_front().unwrap().coroutine_id(), a.id());
        assert_eq!(list.pop_front().unwrap().coroutine_id(), b.id());
        assert!(list.pop_front().is_none());
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn remove_unlinks_only_the_matching_node() {
        let mut list = WaiterList::new();
        let waiters: Vec<_> = (0..4).map(|_| resumer()).collect();
        let ids: Vec<u64> = waiters.iter().map(|(p, _)| p.id()).collect();
        for (i, (_, r)) in waiters.into_iter().enumerate() {
            list.push_back(i as u64, r);
        }
        assert_eq!(list.remove(2).unwrap().coroutine_id(), ids[2]);
        assert!(list.remove(2).is_none());
        assert_eq!(list.len(), 3);
        let order: Vec<u64> = list.take_all().map(|r| r.coroutine_id()).collect();
        assert_eq!(order, vec![ids[0], ids[1], ids[3]]);
        assert_eq!(list.len(), 0);
    }
}
