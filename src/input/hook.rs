//! Observer hooks
//!
//! Ordered registry of callbacks. A callback is identified by its `Rc`,
//! which stands in for the `(function, user data)` pair: registering the
//! same `Rc` twice adds it twice, unregistering removes the first match.

use std::cell::RefCell;
use std::rc::Rc;

pub struct Hook<A: ?Sized, E: ?Sized> {
    entries: RefCell<Vec<Rc<dyn Fn(&A, &E)>>>,
}

fn same_callback<A: ?Sized, E: ?Sized>(a: &Rc<dyn Fn(&A, &E)>, b: &Rc<dyn Fn(&A, &E)>) -> bool {
    // Compare data pointers only; vtable pointers are not unique
    Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
}

impl<A: ?Sized, E: ?Sized> Hook<A, E> {
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
        }
    }

    pub fn add(&self, cb: Rc<dyn Fn(&A, &E)>) {
        self.entries.borrow_mut().push(cb);
    }

    /// Remove the first entry registered with the same `Rc`
    pub fn remove(&self, cb: &Rc<dyn Fn(&A, &E)>) -> bool {
        let mut entries = self.entries.borrow_mut();
        match entries.iter().position(|e| same_callback(e, cb)) {
            Some(pos) => {
                entries.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Call every entry in registration order.
    ///
    /// Runs over a snapshot: callbacks may register or unregister
    /// entries; changes take effect on the next call.
    pub fn call(&self, arg: &A, event: &E) {
        let snapshot: Vec<_> = self.entries.borrow().clone();
        for cb in snapshot {
            cb(arg, event);
        }
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

impl<A: ?Sized, E: ?Sized> Default for Hook<A, E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    type Cb = Rc<dyn Fn(&(), &u32)>;

    #[test]
    fn test_call_order() {
        let hook: Hook<(), u32> = Hook::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = log.clone();
        hook.add(Rc::new(move |_, v| l.borrow_mut().push(("a", *v))));
        let l = log.clone();
        hook.add(Rc::new(move |_, v| l.borrow_mut().push(("b", *v))));

        hook.call(&(), &7);
        assert_eq!(*log.borrow(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn test_register_unregister_restores() {
        let hook: Hook<(), u32> = Hook::new();
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let keep: Cb = Rc::new(move |_, _| c.set(c.get() + 1));
        let c = count.clone();
        let temp: Cb = Rc::new(move |_, _| c.set(c.get() + 10));

        hook.add(keep.clone());
        hook.add(temp.clone());
        assert!(hook.remove(&temp));
        assert_eq!(hook.len(), 1);
        assert!(!hook.remove(&temp));

        hook.call(&(), &0);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_multiset_removal() {
        let hook: Hook<(), u32> = Hook::new();
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let cb: Cb = Rc::new(move |_, _| c.set(c.get() + 1));
        hook.add(cb.clone());
        hook.add(cb.clone());
        hook.remove(&cb);
        hook.call(&(), &0);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_unregister_during_call() {
        let hook: Rc<Hook<(), u32>> = Rc::new(Hook::new());
        let slot: Rc<RefCell<Option<Cb>>> = Rc::new(RefCell::new(None));
        let h = hook.clone();
        let s = slot.clone();
        let cb: Cb = Rc::new(move |_, _| {
            if let Some(me) = s.borrow().as_ref() {
                h.remove(me);
            }
        });
        *slot.borrow_mut() = Some(cb.clone());
        hook.add(cb);
        hook.call(&(), &0);
        assert!(hook.is_empty());
        slot.borrow_mut().take();
    }
}
