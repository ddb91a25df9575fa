//! Latest-value store for the buffers of one channel.
//!
//! Each index holds the most recent [`Samples`] received for it. The element
//! type of an index is fixed by its first write (or by [`BufferRegistry::declare`])
//! and stays fixed until [`BufferRegistry::reset`].

use std::ops::{Deref, Index};

use guibridge_frame::{ElementType, Samples};

use crate::error::{LinkError, Result};

/// Buffer indices must be below this bound.
pub const MAX_BUFFER_INDEX: u32 = 1024;

static ABSENT: Option<Samples> = None;
static EMPTY: BufferRegistry = BufferRegistry::new();

/// How a successful write was stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Stored,
    /// The value exceeded the declared capacity and was cut to `to` elements.
    Trimmed { from: usize, to: usize },
}

#[derive(Debug, Clone, Default)]
struct Slot {
    value: Option<Samples>,
    element: Option<ElementType>,
    capacity: Option<usize>,
    generation: u64,
}

/// Per-channel buffer store.
#[derive(Debug, Clone, Default)]
pub struct BufferRegistry {
    slots: Vec<Slot>,
}

impl BufferRegistry {
    pub const fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// A registry with nothing in it.
    pub fn empty() -> &'static BufferRegistry {
        &EMPTY
    }

    /// Fix the element type and maximum length of `index` ahead of any data.
    ///
    /// A stored value of a different type is rejected; a stored value longer
    /// than `capacity` is trimmed.
    pub fn declare(
        &mut self,
        index: u32,
        element: ElementType,
        capacity: Option<usize>,
    ) -> Result<()> {
        let slot = self.slot_mut(index)?;
        if let Some(expected) = slot.element {
            if expected != element && slot.value.is_some() {
                return Err(LinkError::TypeMismatch {
                    index,
                    expected,
                    got: element,
                });
            }
        }
        slot.element = Some(element);
        slot.capacity = capacity;
        if let (Some(value), Some(cap)) = (slot.value.as_mut(), capacity) {
            if value.len() > cap {
                value.truncate(cap);
                slot.generation += 1;
            }
        }
        Ok(())
    }

    /// Store `samples` as the latest value of `index`.
    ///
    /// The value is replaced in one assignment. On a type mismatch the
    /// previous value is left untouched.
    pub fn write(&mut self, index: u32, mut samples: Samples) -> Result<WriteOutcome> {
        let slot = self.slot_mut(index)?;
        let got = samples.element_type();
        match slot.element {
            Some(expected) if expected != got => {
                return Err(LinkError::TypeMismatch {
                    index,
                    expected,
                    got,
                });
            }
            Some(_) => {}
            None => slot.element = Some(got),
        }

        let mut outcome = WriteOutcome::Stored;
        if let Some(cap) = slot.capacity {
            if samples.len() > cap {
                outcome = WriteOutcome::Trimmed {
                    from: samples.len(),
                    to: cap,
                };
                samples.truncate(cap);
            }
        }

        slot.value = Some(samples);
        slot.generation += 1;
        Ok(outcome)
    }

    /// Forget the value, type and capacity of `index`.
    ///
    /// The generation keeps counting so readers notice the change.
    pub fn reset(&mut self, index: u32) {
        if let Some(slot) = self.slots.get_mut(index as usize) {
            let generation = slot.generation + 1;
            *slot = Slot {
                generation,
                ..Slot::default()
            };
        }
    }

    /// Most recent value of `index`, or `None` if nothing has been stored.
    pub fn read_latest(&self, index: u32) -> Option<&Samples> {
        self.slots.get(index as usize)?.value.as_ref()
    }

    /// Element type currently bound to `index`.
    pub fn element_type(&self, index: u32) -> Option<ElementType> {
        self.slots.get(index as usize)?.element
    }

    /// Declared capacity of `index`.
    pub fn capacity(&self, index: u32) -> Option<usize> {
        self.slots.get(index as usize)?.capacity
    }

    /// Number of writes, trims and resets `index` has seen.
    pub fn generation(&self, index: u32) -> u64 {
        self.slots
            .get(index as usize)
            .map_or(0, |slot| slot.generation)
    }

    /// One past the highest index ever touched.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Stored values in index order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Samples)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.value.as_ref().map(|value| (i as u32, value)))
    }

    /// Read-only view over every index.
    pub fn peek_all(&self) -> BuffersView<&BufferRegistry> {
        BuffersView::new(self)
    }

    fn slot_mut(&mut self, index: u32) -> Result<&mut Slot> {
        if index >= MAX_BUFFER_INDEX {
            return Err(LinkError::IndexOutOfRange {
                index,
                max: MAX_BUFFER_INDEX - 1,
            });
        }
        let i = index as usize;
        if self.slots.len() <= i {
            self.slots.resize_with(i + 1, Slot::default);
        }
        Ok(&mut self.slots[i])
    }
}

impl Index<usize> for BufferRegistry {
    type Output = Option<Samples>;

    /// `None` for indices that hold no value, including out-of-range ones.
    fn index(&self, index: usize) -> &Option<Samples> {
        self.slots.get(index).map_or(&ABSENT, |slot| &slot.value)
    }
}

/// Indexable snapshot of a [`BufferRegistry`].
///
/// `view[i]` is `&Option<Samples>`; [`BuffersView::scalar`] gives the first
/// element of a buffer as `f64`, or NaN when there is none.
#[derive(Debug)]
pub struct BuffersView<R> {
    registry: R,
}

impl<R: Deref<Target = BufferRegistry>> BuffersView<R> {
    pub fn new(registry: R) -> Self {
        Self { registry }
    }

    pub fn get(&self, index: usize) -> Option<&Samples> {
        self.registry[index].as_ref()
    }

    /// First element of buffer `index`, NaN when absent or empty.
    pub fn scalar(&self, index: usize) -> f64 {
        self.get(index)
            .and_then(|samples| samples.get(0))
            .unwrap_or(f64::NAN)
    }

    pub fn generation(&self, index: usize) -> u64 {
        u32::try_from(index).map_or(0, |i| self.registry.generation(i))
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &Samples)> + '_ {
        self.registry.iter()
    }
}

impl<R: Deref<Target = BufferRegistry>> Index<usize> for BuffersView<R> {
    type Output = Option<Samples>;

    fn index(&self, index: usize) -> &Option<Samples> {
        &self.registry[index]
    }
}
