// Arena-backed ordered list with stable handles.
//
// Entries live in one contiguous vector and are linked by index. Removed
// slots go on a free list and are reused by the next insertion, so a
// handle stays valid until its entry is removed. Used for the optimizer's
// candidate queue and the block cache's recency order.

/// Stable reference to an entry of an `OrderedPool`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u32);

impl Handle {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

const NIL: u32 = u32::MAX;

#[derive(Debug, Clone)]
struct Node<T> {
    value: Option<T>,
    prev: u32,
    next: u32,
}

/// Doubly linked list over an arena, with O(1) push, remove and
/// move-to-back by handle.
#[derive(Debug, Clone)]
pub struct OrderedPool<T> {
    nodes: Vec<Node<T>>,
    free: Vec<u32>,
    head: u32,
    tail: u32,
    len: usize,
    capacity: usize,
}

impl<T> OrderedPool<T> {
    /// A pool that holds at most `capacity` live entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity.min(1 << 16)),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            len: 0,
            capacity,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append `value`, or hand it back if the pool is full.
    pub fn push_back(&mut self, value: T) -> Result<Handle, T> {
        if self.is_full() {
            return Err(value);
        }
        let node = Node {
            value: Some(value),
            prev: self.tail,
            next: NIL,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.nodes[idx as usize] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as u32
            }
        };
        match self.tail {
            NIL => self.head = idx,
            t => self.nodes[t as usize].next = idx,
        }
        self.tail = idx;
        self.len += 1;
        Ok(Handle(idx))
    }

    fn unlink(&mut self, idx: u32) {
        let (prev, next) = {
            let n = &self.nodes[idx as usize];
            (n.prev, n.next)
        };
        match prev {
            NIL => self.head = next,
            p => self.nodes[p as usize].next = next,
        }
        match next {
            NIL => self.tail = prev,
            n => self.nodes[n as usize].prev = prev,
        }
    }

    /// Remove an entry, returning its value and recycling the slot.
    pub fn remove(&mut self, h: Handle) -> Option<T> {
        let value = self.nodes.get_mut(h.index())?.value.take()?;
        self.unlink(h.0);
        self.free.push(h.0);
        self.len -= 1;
        Some(value)
    }

    /// Move a live entry to the back of the order.
    pub fn move_to_back(&mut self, h: Handle) {
        if self.tail == h.0 || self.get(h).is_none() {
            return;
        }
        self.unlink(h.0);
        let node = &mut self.nodes[h.index()];
        node.prev = self.tail;
        node.next = NIL;
        match self.tail {
            NIL => self.head = h.0,
            t => self.nodes[t as usize].next = h.0,
        }
        self.tail = h.0;
    }

    pub fn pop_front(&mut self) -> Option<T> {
        self.front().and_then(|h| self.remove(h))
    }

    pub fn pop_back(&mut self) -> Option<T> {
        self.back().and_then(|h| self.remove(h))
    }

    #[inline]
    pub fn front(&self) -> Option<Handle> {
        (self.head != NIL).then_some(Handle(self.head))
    }

    #[inline]
    pub fn back(&self) -> Option<Handle> {
        (self.tail != NIL).then_some(Handle(self.tail))
    }

    #[inline]
    pub fn next(&self, h: Handle) -> Option<Handle> {
        let n = self.nodes.get(h.index())?.next;
        (n != NIL).then_some(Handle(n))
    }

    #[inline]
    pub fn prev(&self, h: Handle) -> Option<Handle> {
        let p = self.nodes.get(h.index())?.prev;
        (p != NIL).then_some(Handle(p))
    }

    #[inline]
    pub fn get(&self, h: Handle) -> Option<&T> {
        self.nodes.get(h.index())?.value.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, h: Handle) -> Option<&mut T> {
        self.nodes.get_mut(h.index())?.value.as_mut()
    }

    /// Drop every entry, keeping the arena allocation.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.head = NIL;
        self.tail = NIL;
        self.len = 0;
    }

    /// Handles front to back.
    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        std::iter::successors(self.front(), move |&h| self.next(h))
    }

    /// Values front to back.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.handles().filter_map(move |h| self.get(h))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_in_order() {
        let mut p = OrderedPool::with_capacity(4);
        for i in 0..4 {
            p.push_back(i).unwrap();
        }
        assert!(p.is_full());
        assert_eq!(p.push_back(9), Err(9));
        assert_eq!(p.iter().copied().collect::<Vec<_>>(), [0, 1, 2, 3]);
        assert_eq!(p.pop_front(), Some(0));
        assert_eq!(p.pop_back(), Some(3));
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn slots_are_recycled() {
        let mut p = OrderedPool::with_capacity(2);
        let a = p.push_back('a').unwrap();
        p.push_back('b').unwrap();
        p.remove(a);
        let c = p.push_back('c').unwrap();
        assert_eq!(c, a);
        assert_eq!(p.iter().copied().collect::<String>(), "bc");
        assert_eq!(p.remove(a), Some('c'));
        assert_eq!(p.remove(a), None);
    }

    #[test]
    fn move_to_back_reorders() {
        let mut p = OrderedPool::with_capacity(8);
        let hs: Vec<_> = (0..4).map(|i| p.push_back(i).unwrap()).collect();
        p.move_to_back(hs[0]);
        p.move_to_back(hs[2]);
        p.move_to_back(hs[2]);
        assert_eq!(p.iter().copied().collect::<Vec<_>>(), [1, 3, 0, 2]);
        assert_eq!(p.front(), Some(hs[1]));
        assert_eq!(p.prev(hs[0]), Some(hs[3]));
        assert_eq!(p.next(hs[2]), None);
    }

    #[test]
    fn clear_resets() {
        let mut p = OrderedPool::with_capacity(3);
        p.push_back(1).unwrap();
        p.clear();
        assert!(p.is_empty());
        assert_eq!(p.front(), None);
        assert_eq!(p.push_back(5).map(|h| h.index()), Ok(0));
    }
}
