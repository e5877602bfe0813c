//! Core identifiers, bit-level layouts, and signatures.
//!
//! This module defines the fundamental types shared across every subsystem of
//! the engine: entity handles, fragment/archetype/chunk identifiers, and the
//! bitset [`Signature`] that gives an archetype its identity.
//!
//! ## Entity representation
//!
//! Entities are encoded as a packed 64-bit integer:
//!
//! ```text
//! | generation | index |
//! ```
//!
//! - **Index** identifies the slot in the entity index.
//! - **Generation** increments when a slot is reused, so stale handles are
//!   detectable.
//!
//! The bit widths are compile-time constants validated with static assertions.
//!
//! ## Signatures
//!
//! The set of fragment and tag types an entity possesses is represented as a
//! fixed-size array of `u64` words. Signature equality is the sole criterion
//! for archetype membership; two entities with equal signatures always live in
//! the same archetype.
//!
//! ## Access declaration
//!
//! [`AccessSets`] captures which fragment types a query reads and writes.
//! Conflict detection between access sets drives processor scheduling: two
//! processors whose declared sets conflict are never run concurrently.

/// Bit-width type used for compile-time layout calculations.
pub type Bits = u8;

/// Packed 64-bit entity identifier.
pub type EntityId = u64;
/// Slot index within the entity index.
pub type IndexId = u32;
/// Generation counter used to detect stale entities.
pub type GenerationId = u32;

/// Unique identifier for a fragment or tag type.
pub type FragmentId = u16;
/// Unique identifier for an archetype.
pub type ArchetypeId = u16;
/// Chunk index within an archetype.
pub type ChunkId = u16;
/// Row index within a chunk.
pub type RowId = u32;

/// Total number of bits in an [`EntityId`].
pub const ENTITY_BITS: Bits = 64;
/// Number of bits reserved for the slot index.
pub const INDEX_BITS: Bits = 32;
/// Number of bits reserved for the generation counter.
pub const GENERATION_BITS: Bits = ENTITY_BITS - INDEX_BITS;

const _: [(); 1] = [(); (INDEX_BITS > 0) as usize];
const _: [(); 1] = [(); (INDEX_BITS < ENTITY_BITS) as usize];
const _: [(); 1] = [(); (INDEX_BITS + GENERATION_BITS == ENTITY_BITS) as usize];

const fn mask(bits: Bits) -> EntityId {
    if bits == 0 { 0 } else { ((1 as EntityId) << bits) - 1 }
}

/// Mask selecting the index portion of an [`EntityId`].
pub const INDEX_MASK: EntityId = mask(INDEX_BITS);
/// Maximum number of entity slots.
pub const INDEX_CAP: IndexId = INDEX_MASK as IndexId;

/// Maximum number of registered fragment types.
pub const FRAGMENT_CAP: usize = 1024;
/// Number of `u64` words required to represent a full signature.
pub const SIGNATURE_WORDS: usize = (FRAGMENT_CAP + 63) / 64;

/// Generational handle identifying one logical entity record.
///
/// Handles are owned exclusively by the entity manager; a handle whose
/// generation no longer matches its slot is stale, and every operation on it
/// degrades to a no-op rather than a failure.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Entity(pub EntityId);

#[inline]
const fn make_id(index: IndexId, generation: GenerationId) -> EntityId {
    ((generation as EntityId) << INDEX_BITS) | (index as EntityId)
}

#[inline]
pub(crate) fn make_entity(index: IndexId, generation: GenerationId) -> Entity {
    debug_assert!((index as EntityId) <= INDEX_MASK);
    Entity(make_id(index, generation))
}

impl Entity {
    /// Returns the slot index encoded in this handle.
    #[inline]
    pub fn index(self) -> IndexId {
        (self.0 & INDEX_MASK) as IndexId
    }

    /// Returns the generation encoded in this handle.
    #[inline]
    pub fn generation(self) -> GenerationId {
        (self.0 >> INDEX_BITS) as GenerationId
    }
}

/// Location of a live entity: archetype, chunk, and row.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntityLocation {
    /// Archetype the entity currently belongs to.
    pub archetype: ArchetypeId,
    /// Chunk within the archetype.
    pub chunk: ChunkId,
    /// Row within the chunk.
    pub row: RowId,
}

/// Bitset representing a set of fragment and tag types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature {
    /// Packed fragment bitset.
    pub words: [u64; SIGNATURE_WORDS],
}

impl Default for Signature {
    fn default() -> Self {
        Self { words: [0u64; SIGNATURE_WORDS] }
    }
}

impl Signature {
    /// Sets the bit corresponding to `fragment_id`.
    #[inline]
    pub fn set(&mut self, fragment_id: FragmentId) {
        let word = (fragment_id as usize) / 64;
        let bit = (fragment_id as usize) % 64;
        self.words[word] |= 1u64 << bit;
    }

    /// Clears the bit corresponding to `fragment_id`.
    #[inline]
    pub fn clear(&mut self, fragment_id: FragmentId) {
        let word = (fragment_id as usize) / 64;
        let bit = (fragment_id as usize) % 64;
        self.words[word] &= !(1u64 << bit);
    }

    /// Returns `true` if `fragment_id` is present in this signature.
    #[inline]
    pub fn has(&self, fragment_id: FragmentId) -> bool {
        let word = (fragment_id as usize) / 64;
        let bit = (fragment_id as usize) % 64;
        (self.words[word] >> bit) & 1 == 1
    }

    /// Returns `true` if no bits are set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&word| word == 0)
    }

    /// Returns `true` if all fragments in `other` are present in `self`.
    #[inline]
    pub fn contains_all(&self, other: &Signature) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(a, b)| (a & b) == *b)
    }

    /// Returns `true` if `self` and `other` share no fragments.
    #[inline]
    pub fn is_disjoint(&self, other: &Signature) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(a, b)| (a & b) == 0)
    }

    /// Iterates over all fragment ids set in this signature, in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = FragmentId> + '_ {
        iter_bits(&self.words)
    }
}

/// Builds a signature from a list of fragment ids.
pub fn build_signature(fragment_ids: &[FragmentId]) -> Signature {
    let mut signature = Signature::default();
    for &fragment_id in fragment_ids {
        signature.set(fragment_id);
    }
    signature
}

/// Iterates over fragment ids set in a raw signature word array.
#[inline]
pub fn iter_bits(words: &[u64; SIGNATURE_WORDS]) -> impl Iterator<Item = FragmentId> + '_ {
    words.iter().enumerate().flat_map(|(word_index, &word)| {
        let base = word_index * 64;
        let mut bits = word;
        std::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            let tz = bits.trailing_zeros() as usize;
            bits &= bits - 1;
            Some((base + tz) as FragmentId)
        })
    })
}

/// Declares the fragment access set of a query or processor.
#[derive(Clone, Debug, Default)]
pub struct AccessSets {
    /// Fragments read.
    pub read: Signature,
    /// Fragments written.
    pub write: Signature,
}

impl AccessSets {
    /// Returns `true` if this access set conflicts with another.
    ///
    /// Conflicts: (W ∩ W), (W ∩ R), or (R ∩ W).
    #[inline]
    pub fn conflicts_with(&self, other: &AccessSets) -> bool {
        for ((a_write, a_read), (b_write, b_read)) in self
            .write
            .words
            .iter()
            .zip(self.read.words.iter())
            .zip(other.write.words.iter().zip(other.read.words.iter()))
        {
            if (a_write & b_write) != 0 || (a_write & b_read) != 0 || (a_read & b_write) != 0 {
                return true;
            }
        }
        false
    }
}
