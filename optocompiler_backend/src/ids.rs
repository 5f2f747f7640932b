//! Compact identifier allocation for Steps and Programs.
//!
//! IDs double as array names in the generated sketch (`step12`), so they are kept small and
//! dense: [`IdAllocator::allocate`] always hands out the smallest free ID, and
//! [`IdAllocator::free`] re-sequences the survivors so that no gaps remain after a deletion.
//!
//! The allocator never owns the entities it numbers. It keeps [`Weak`] references, which lets
//! it renumber live entities in place and silently forget entities that were dropped elsewhere.
//! Every renumbering is reported as a [`Renumbering`] so that owners can rewrite the IDs they
//! store in cross references (Program → Step, Well → Program).

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::error::{Error, Result};

/// Largest ID handed out for Steps and Programs.
pub const ID_CEILING: u32 = u16::MAX as u32;

/// An entity carrying an allocator-issued ID.
pub trait Counted {
    fn id(&self) -> u32;
    fn set_id(&mut self, id: u32);
}

/// Mapping from old to new IDs produced by a re-sequencing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Renumbering {
    map: IndexMap<u32, u32>,
}

impl Renumbering {
    /// New ID of an entity which was known as `old`. `None` if it did not survive.
    pub fn get(&self, old: u32) -> Option<u32> {
        self.map.get(&old).copied()
    }

    /// Whether every surviving entity kept its ID.
    pub fn is_identity(&self) -> bool {
        self.map.iter().all(|(old, new)| old == new)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.map.iter().map(|(&old, &new)| (old, new))
    }
}

impl FromIterator<(u32, u32)> for Renumbering {
    fn from_iter<I: IntoIterator<Item = (u32, u32)>>(iter: I) -> Self {
        Self {
            map: iter.into_iter().collect(),
        }
    }
}

pub struct IdAllocator<T> {
    floor: u32,
    ceiling: u32,
    used: Vec<u32>,
    instances: Vec<Weak<RefCell<T>>>,
}

impl<T: Counted> IdAllocator<T> {
    /// Creates an allocator issuing IDs within `floor..=ceiling`.
    pub fn new(floor: u32, ceiling: u32) -> Self {
        Self {
            floor,
            ceiling,
            used: Vec::new(),
            instances: Vec::new(),
        }
    }

    /// Allocator holding a single sentinel entity under ID 0. Further allocations fail.
    pub fn sentinel(instance: &Rc<RefCell<T>>) -> Self {
        instance.borrow_mut().set_id(0);
        Self {
            floor: 0,
            ceiling: 0,
            used: vec![0],
            instances: vec![Rc::downgrade(instance)],
        }
    }

    pub fn floor(&self) -> u32 {
        self.floor
    }

    /// IDs currently in use, ascending.
    pub fn used(&self) -> &[u32] {
        &self.used
    }

    /// The ID the next call to [`IdAllocator::allocate`] would return.
    ///
    /// This is the first gap in the in-use list, or one past its maximum.
    pub fn next_id(&self) -> Result<u32> {
        let gap = self
            .used
            .iter()
            .zip(self.floor..)
            .find(|(used, expected)| **used != *expected)
            .map(|(_, expected)| expected);
        let candidate = match gap {
            Some(id) => Some(id),
            None => match self.used.last() {
                None => Some(self.floor),
                Some(&last) => last.checked_add(1),
            },
        };
        match candidate {
            Some(id) if id <= self.ceiling => Ok(id),
            _ => Err(Error::AllocatorExhausted {
                floor: self.floor,
                ceiling: self.ceiling,
            }),
        }
    }

    /// Issues the smallest free ID to `instance`, writes it into the instance and starts
    /// tracking it.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::{cell::RefCell, rc::Rc};
    /// use optocompiler_backend::ids::*;
    /// use optocompiler_backend::step::Step;
    ///
    /// let mut ids = IdAllocator::new(1, ID_CEILING);
    /// let a = Rc::new(RefCell::new(Step::default()));
    /// let b = Rc::new(RefCell::new(Step::default()));
    /// assert_eq!(ids.allocate(&a).unwrap(), 1);
    /// assert_eq!(ids.allocate(&b).unwrap(), 2);
    /// assert_eq!(b.borrow().id(), 2);
    /// ```
    pub fn allocate(&mut self, instance: &Rc<RefCell<T>>) -> Result<u32> {
        let id = self.next_id()?;
        let pos = self.used.partition_point(|&used| used < id);
        self.used.insert(pos, id);
        instance.borrow_mut().set_id(id);
        self.instances.push(Rc::downgrade(instance));
        Ok(id)
    }

    /// Drops `id` from the in-use set without touching the remaining IDs. The gap is reused by
    /// the next allocation. Returns whether the ID was in use.
    pub fn release(&mut self, id: u32) -> bool {
        let Ok(pos) = self.used.binary_search(&id) else {
            return false;
        };
        self.used.remove(pos);
        self.instances.retain(|weak| match weak.upgrade() {
            Some(instance) => instance.try_borrow().map_or(true, |i| i.id() != id),
            None => false,
        });
        true
    }

    /// Releases `id` and re-sequences all survivors.
    pub fn free(&mut self, id: u32) -> Renumbering {
        self.release(id);
        self.resequence()
    }

    /// Renumbers every live instance to `floor, floor + 1, ...` in the order of their current
    /// IDs and forgets dropped instances.
    pub fn resequence(&mut self) -> Renumbering {
        let mut live: Vec<Rc<RefCell<T>>> =
            self.instances.iter().filter_map(Weak::upgrade).collect();
        live.sort_by_key(|instance| instance.borrow().id());

        let mut renumbering = Renumbering::default();
        self.used.clear();
        for (instance, new) in live.iter().zip(self.floor..) {
            let old = instance.borrow().id();
            instance.borrow_mut().set_id(new);
            renumbering.map.insert(old, new);
            self.used.push(new);
        }
        self.instances = live.iter().map(Rc::downgrade).collect();
        renumbering
    }

    /// Live instance currently holding `id`.
    pub fn lookup(&self, id: u32) -> Option<Rc<RefCell<T>>> {
        self.instances
            .iter()
            .filter_map(Weak::upgrade)
            .find(|instance| instance.try_borrow().map_or(false, |i| i.id() == id))
    }

    /// Number of IDs in use.
    pub fn len(&self) -> usize {
        self.used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::error::Error;
    use crate::ids::*;

    #[derive(Default)]
    struct Dummy {
        id: u32,
    }

    impl Counted for Dummy {
        fn id(&self) -> u32 {
            self.id
        }
        fn set_id(&mut self, id: u32) {
            self.id = id;
        }
    }

    fn spawn(ids: &mut IdAllocator<Dummy>, n: usize) -> Vec<Rc<RefCell<Dummy>>> {
        (0..n)
            .map(|_| {
                let d = Rc::new(RefCell::new(Dummy::default()));
                ids.allocate(&d).unwrap();
                d
            })
            .collect()
    }

    #[test]
    fn sequential_allocation() {
        let mut ids = IdAllocator::new(1, ID_CEILING);
        let items = spawn(&mut ids, 5);
        let got: Vec<u32> = items.iter().map(|d| d.borrow().id).collect();
        assert_eq!(got, vec![1, 2, 3, 4, 5]);
        assert_eq!(ids.used(), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn release_reuses_gap() {
        let mut ids = IdAllocator::new(1, ID_CEILING);
        let _items = spawn(&mut ids, 5);
        assert!(ids.release(3));
        assert!(!ids.release(3));
        let d = Rc::new(RefCell::new(Dummy::default()));
        assert_eq!(ids.allocate(&d).unwrap(), 3);
        assert_eq!(ids.used(), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn free_resequences() {
        let mut ids = IdAllocator::new(1, ID_CEILING);
        let mut items = spawn(&mut ids, 5);
        let gone = items.remove(2);
        let gone_id = gone.borrow().id;
        drop(gone);
        let renumbering = ids.free(gone_id);

        let got: Vec<u32> = items.iter().map(|d| d.borrow().id).collect();
        assert_eq!(got, vec![1, 2, 3, 4]);
        assert_eq!(renumbering.get(4), Some(3));
        assert_eq!(renumbering.get(5), Some(4));
        assert_eq!(renumbering.get(3), None);
        assert!(!renumbering.is_identity());

        let d = Rc::new(RefCell::new(Dummy::default()));
        assert_eq!(ids.allocate(&d).unwrap(), 5);
    }

    #[test]
    fn dropped_instances_are_forgotten() {
        let mut ids = IdAllocator::new(1, ID_CEILING);
        let mut items = spawn(&mut ids, 3);
        items.remove(0);
        let renumbering = ids.resequence();
        assert_eq!(ids.used(), &[1, 2]);
        assert_eq!(renumbering.get(2), Some(1));
        assert!(ids.lookup(3).is_none());
        assert_eq!(ids.lookup(2).unwrap().borrow().id, 2);
    }

    #[test]
    fn sentinel_holds_one() {
        let null = Rc::new(RefCell::new(Dummy { id: 9 }));
        let mut ids = IdAllocator::sentinel(&null);
        assert_eq!(null.borrow().id, 0);
        assert_eq!(ids.lookup(0).unwrap().borrow().id, 0);
        let extra = Rc::new(RefCell::new(Dummy::default()));
        assert!(matches!(
            ids.allocate(&extra),
            Err(Error::AllocatorExhausted { floor: 0, ceiling: 0 })
        ));
    }

    #[test]
    fn ceiling_is_enforced() {
        let mut ids = IdAllocator::new(1, 2);
        let _items = spawn(&mut ids, 2);
        assert!(ids.next_id().is_err());
    }
}
