/// Link value meaning "no neighbour".
pub const NIL: u32 = u32::MAX;

/// One entry plus its recency links.
pub struct Node<K, V> {
    pub key: K,
    pub value: V,
    pub prev: u32,
    pub next: u32,
}

impl<K, V> Node<K, V> {
    pub fn new(key: K, value: V) -> Self {
        Self {
            key,
            value,
            prev: NIL,
            next: NIL,
        }
    }
}

/// Fixed-size slab of nodes threaded into a recency list.
///
/// Links are slot indices, so the list needs no raw pointers. Vacated slots
/// go back on `free_list` and are reused before the slab would grow.
/// `head` is the most recently used node and `tail` the least.
pub struct Arena<K, V> {
    slots: Vec<Option<Node<K, V>>>,
    free_list: Vec<u32>,
    pub head: u32,
    pub tail: u32,
    len: usize,
}

impl<K, V> Arena<K, V> {
    /// Slab with room for exactly `capacity` nodes.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(capacity).collect(),
            // popped from the back, so low slots are handed out first
            free_list: (0..capacity as u32).rev().collect(),
            head: NIL,
            tail: NIL,
            len: 0,
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
    pub fn get(&self, index: u32) -> Option<&Node<K, V>> {
        self.slots.get(index as usize).and_then(|s| s.as_ref())
    }

    #[inline]
    pub fn get_mut(&mut self, index: u32) -> Option<&mut Node<K, V>> {
        self.slots.get_mut(index as usize).and_then(|s| s.as_mut())
    }

    fn set_prev(&mut self, index: u32, prev: u32) {
        if let Some(node) = self.get_mut(index) {
            node.prev = prev;
        }
    }

    fn set_next(&mut self, index: u32, next: u32) {
        if let Some(node) = self.get_mut(index) {
            node.next = next;
        }
    }

    /// Store `node` in a free slot as the most recent entry.
    /// `None` means every slot is occupied.
    pub fn push_head(&mut self, node: Node<K, V>) -> Option<u32> {
        let index = self.free_list.pop()?;
        self.slots[index as usize] = Some(node);
        self.link_front(index);
        self.len += 1;
        Some(index)
    }

    /// Splice an already-stored, detached node in front of the current head.
    fn link_front(&mut self, index: u32) {
        let old_head = std::mem::replace(&mut self.head, index);
        if let Some(node) = self.get_mut(index) {
            node.prev = NIL;
            node.next = old_head;
        }
        match old_head {
            NIL => self.tail = index,
            head => self.set_prev(head, index),
        }
    }

    /// Detach the node at `index` from its neighbours without freeing the slot.
    fn unlink(&mut self, index: u32) -> Option<()> {
        let node = self.get(index)?;
        let (prev, next) = (node.prev, node.next);

        if prev != NIL {
            self.set_next(prev, next);
        } else {
            self.head = next;
        }

        if next != NIL {
            self.set_prev(next, prev);
        } else {
            self.tail = prev;
        }
        Some(())
    }

    /// Remove a node from the list and return it. The slot is reclaimed.
    pub fn remove(&mut self, index: u32) -> Option<Node<K, V>> {
        self.unlink(index)?;
        let node = self.slots[index as usize].take()?;
        self.free_list.push(index);
        self.len -= 1;
        Some(node)
    }

    /// Mark the node at `index` as most recently used.
    pub fn move_to_head(&mut self, index: u32) {
        if self.head != index && self.unlink(index).is_some() {
            self.link_front(index);
        }
    }

    /// Evict the least recently used node along with the slot it occupied.
    pub fn pop_tail(&mut self) -> Option<(u32, Node<K, V>)> {
        let index = self.tail;
        self.remove(index).map(|node| (index, node))
    }

    /// Keys from most to least recently used.
    pub fn keys_by_recency(&self) -> Vec<&K> {
        let mut keys = Vec::with_capacity(self.len);
        let mut cursor = self.head;
        while let Some(node) = self.get(cursor) {
            keys.push(&node.key);
            cursor = node.next;
        }
        keys
    }
}
