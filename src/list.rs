//! Singly linked lists threaded through [`Pool`] slots.
//!
//! Nodes store the handle of their successor; a list is just the handle
//! of its head. Callers hold the pool (and whatever lock protects it) for
//! the duration of every operation.

use crate::pool::{Handle, Pool};

/// A pool-resident node that links to the next node of the same type.
pub trait Linked: Sized {
    fn next(&self) -> Option<Handle<Self>>;
    fn set_next(&mut self, next: Option<Handle<Self>>);
}

/// Link `node` in front of `head`.
pub fn push_front<T: Linked>(pool: &mut Pool<T>, head: &mut Option<Handle<T>>, node: Handle<T>) {
    if let Some(value) = pool.get_mut(node) {
        value.set_next(*head);
        *head = Some(node);
    }
}

/// First node, starting at `head`, that satisfies `pred`.
pub fn find<T, P>(pool: &Pool<T>, head: Option<Handle<T>>, mut pred: P) -> Option<Handle<T>>
where
    T: Linked,
    P: FnMut(&T) -> bool,
{
    let mut curr = head;
    while let Some(handle) = curr {
        let value = pool.get(handle)?;
        if pred(value) {
            return Some(handle);
        }
        curr = value.next();
    }
    None
}

/// Unlink the first node that satisfies `pred`. The node stays allocated.
pub fn remove_first<T, P>(
    pool: &mut Pool<T>,
    head: &mut Option<Handle<T>>,
    mut pred: P,
) -> Option<Handle<T>>
where
    T: Linked,
    P: FnMut(&T) -> bool,
{
    let mut prev: Option<Handle<T>> = None;
    let mut curr = *head;

    while let Some(handle) = curr {
        let value = pool.get(handle)?;
        let next = value.next();

        if pred(value) {
            match prev.and_then(|p| pool.get_mut(p)) {
                Some(prev_value) => prev_value.set_next(next),
                None => *head = next,
            }
            if let Some(removed) = pool.get_mut(handle) {
                removed.set_next(None);
            }
            return Some(handle);
        }

        prev = Some(handle);
        curr = next;
    }

    None
}

/// Visit every node from `head` to the tail.
pub fn for_each<T, F>(pool: &Pool<T>, head: Option<Handle<T>>, mut func: F)
where
    T: Linked,
    F: FnMut(&T),
{
    let mut curr = head;
    while let Some(value) = curr.and_then(|h| pool.get(h)) {
        func(value);
        curr = value.next();
    }
}

/// Free every node of the list back to the pool. Returns the number freed.
pub fn drain<T: Linked>(pool: &mut Pool<T>, head: &mut Option<Handle<T>>) -> usize {
    let mut freed = 0;
    let mut curr = head.take();
    while let Some(handle) = curr {
        match pool.free(handle) {
            Ok(value) => {
                curr = value.next();
                freed += 1;
            }
            Err(_) => break,
        }
    }
    freed
}

pub fn len<T: Linked>(pool: &Pool<T>, head: Option<Handle<T>>) -> usize {
    let mut count = 0;
    for_each(pool, head, |_| count += 1);
    count
}
