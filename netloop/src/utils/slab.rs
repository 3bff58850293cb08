/// Stable handle to a value stored in a [`Slab`].
///
/// A token pairs a slot index with the generation the slot had when the
/// value was inserted. Once the value is removed the slot's generation is
/// bumped, so an old token no longer resolves even if the index is reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct Token {
    index: u32,
    generation: u32,
}

impl Token {
    /// Packs the token into the 64-bit user data word of an epoll event.
    pub(crate) fn to_u64(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    /// Rebuilds a token from an epoll user data word.
    pub(crate) fn from_u64(raw: u64) -> Self {
        Self {
            index: raw as u32,
            generation: (raw >> 32) as u32,
        }
    }
}

enum Entry<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32 },
}

/// A generational slab allocator.
///
/// A `Slab` stores values in a contiguous vector and hands out [`Token`]s
/// that stay cheap to copy around. Freed slots are reused, but every reuse
/// moves the slot to a new generation: a token kept past the removal of its
/// value resolves to `None` instead of aliasing the new occupant.
///
/// The reactor uses this to put channel identities into kernel event
/// records without handing the kernel (or a worker) an owning pointer.
pub(crate) struct Slab<T> {
    /// Storage for items, occupied or vacant.
    entries: Vec<Entry<T>>,
    /// Stack of free indices that can be reused.
    free: Vec<u32>,
    /// Number of occupied slots.
    len: usize,
}

impl<T> Slab<T> {
    /// Creates an empty `Slab` with room for `capacity` values.
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Inserts a value and returns its token.
    pub(crate) fn insert(&mut self, value: T) -> Token {
        self.len += 1;

        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            let generation = match entry {
                Entry::Vacant { generation } => *generation,
                Entry::Occupied { .. } => unreachable!("free list points at an occupied slot"),
            };

            *entry = Entry::Occupied { generation, value };
            return Token { index, generation };
        }

        let index = self.entries.len() as u32;
        self.entries.push(Entry::Occupied {
            generation: 0,
            value,
        });

        Token {
            index,
            generation: 0,
        }
    }

    /// Removes and returns the value behind `token`.
    ///
    /// Returns `None` if the token is stale or was never issued.
    pub(crate) fn remove(&mut self, token: Token) -> Option<T> {
        let entry = self.entries.get_mut(token.index as usize)?;

        let generation = match entry {
            Entry::Occupied { generation, .. } if *generation == token.generation => *generation,
            _ => return None,
        };

        let next = Entry::Vacant {
            generation: generation.wrapping_add(1),
        };

        match std::mem::replace(entry, next) {
            Entry::Occupied { value, .. } => {
                self.free.push(token.index);
                self.len -= 1;

                Some(value)
            }
            Entry::Vacant { .. } => unreachable!("slot checked as occupied above"),
        }
    }

    #[cfg(test)]
    pub(crate) fn get(&self, token: Token) -> Option<&T> {
        match self.entries.get(token.index as usize)? {
            Entry::Occupied { generation, value } if *generation == token.generation => Some(value),
            _ => None,
        }
    }

    pub(crate) fn get_mut(&mut self, token: Token) -> Option<&mut T> {
        match self.entries.get_mut(token.index as usize)? {
            Entry::Occupied { generation, value } if *generation == token.generation => Some(value),
            _ => None,
        }
    }

    /// Number of live values.
    pub(crate) fn len(&self) -> usize {
        self.len
    }
}
