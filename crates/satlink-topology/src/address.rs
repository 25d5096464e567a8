//! Point-to-point link address allocation.
//!
//! Every link gets a /30 segment carved out of a per-domain partition. The
//! partition is addressed in two levels: a segment (third octet step) holding
//! [`SUBNETS_PER_SEGMENT`] subnets, and an offset inside the segment spaced by
//! [`SUBNET_STRIDE`]. For slot `s`:
//!
//! ```text
//! segment = s / 64
//! offset  = (s % 64) * 4 + 1
//! a       = base + segment * 256 + offset
//! b       = a + 1
//! ```
//!
//! The slot comes from an [`AllocationScheme`]. Allocations are memoized for
//! the life of the process and never regenerated: interfaces that were
//! configured in an earlier cycle keep their addresses.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{PoisonError, RwLock};

use crate::error::AddressError;

/// Subnets per third-octet segment.
pub const SUBNETS_PER_SEGMENT: u64 = 64;

/// Address distance between consecutive /30 subnets.
pub const SUBNET_STRIDE: u64 = 4;

/// Prefix length of every link subnet.
pub const LINK_PREFIX_LEN: u8 = 30;

/// How a node pair is turned into a slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AllocationScheme {
    /// Injective pairing.
    ///
    /// Unordered keys use the triangular index `(hi-1)(hi-2)/2 + (lo-1)`;
    /// ordered keys use row-major `(first-1) * ceiling + (second-1)`.
    #[default]
    Pairing,
    /// Legacy `first * second` product.
    ///
    /// Not injective: `(2, 6)` and `(3, 4)` share slot 12. Kept only for
    /// deployments whose interfaces already carry these addresses. Collisions
    /// are detected and reported as [`AddressError::Collision`].
    Product,
}

/// Allocation key for a node pair (1-based ordinals).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PairKey {
    pub first: u32,
    pub second: u32,
}

impl PairKey {
    /// Key that preserves argument order (directed/bipartite relations).
    pub const fn ordered(first: u32, second: u32) -> Self {
        Self { first, second }
    }

    /// Key that ignores argument order (symmetric peer mesh).
    pub fn unordered(a: u32, b: u32) -> Self {
        Self {
            first: a.min(b),
            second: a.max(b),
        }
    }
}

impl std::fmt::Display for PairKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.first, self.second)
    }
}

/// The two host addresses of one /30 link segment.
///
/// `a` belongs to the key's first node, `b` to its second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LinkAddrs {
    pub subnet: Ipv4Addr,
    pub a: Ipv4Addr,
    pub b: Ipv4Addr,
}

impl LinkAddrs {
    /// `a` in CIDR notation, e.g. `10.0.16.5/30`.
    pub fn a_cidr(&self) -> String {
        format!("{}/{}", self.a, LINK_PREFIX_LEN)
    }

    /// `b` in CIDR notation.
    pub fn b_cidr(&self) -> String {
        format!("{}/{}", self.b, LINK_PREFIX_LEN)
    }
}

/// A contiguous partition of link subnets.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AddressSpace {
    /// First address of the partition (start of segment 0).
    pub base: Ipv4Addr,
    /// First address past the partition.
    pub limit: Ipv4Addr,
    pub scheme: AllocationScheme,
    /// Highest ordinal accepted on either side of a pair.
    pub node_ceiling: u32,
}

impl AddressSpace {
    pub fn new(base: Ipv4Addr, limit: Ipv4Addr, node_ceiling: u32) -> Self {
        Self {
            base,
            limit,
            scheme: AllocationScheme::default(),
            node_ceiling,
        }
    }

    pub fn with_scheme(mut self, scheme: AllocationScheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Number of /30 subnets in the partition.
    pub fn capacity(&self) -> u64 {
        let span = u32::from(self.limit).saturating_sub(u32::from(self.base));
        u64::from(span) / SUBNET_STRIDE
    }

    /// Slot index for a key under this space's scheme.
    pub fn slot(&self, key: PairKey, symmetric: bool) -> Result<u64, AddressError> {
        let ceiling = self.node_ceiling;
        if key.first == 0 || key.second == 0 || key.second > ceiling {
            return Err(AddressError::OutOfRange { pair: key, ceiling });
        }
        if symmetric && key.first == key.second {
            return Err(AddressError::SelfPair(key));
        }

        let first = u64::from(key.first);
        let second = u64::from(key.second);
        let slot = match self.scheme {
            AllocationScheme::Pairing if symmetric => {
                // Unordered keys are normalized so first < second
                (second - 1) * (second - 2) / 2 + (first - 1)
            }
            AllocationScheme::Pairing => (first - 1) * u64::from(ceiling) + (second - 1),
            AllocationScheme::Product => first * second,
        };

        let capacity = self.capacity();
        if slot >= capacity {
            return Err(AddressError::Exhausted {
                pair: key,
                slot,
                capacity,
            });
        }
        Ok(slot)
    }

    /// Addresses for a slot (assumed within capacity).
    pub fn locate(&self, slot: u64) -> LinkAddrs {
        let segment = slot / SUBNETS_PER_SEGMENT;
        let offset = (slot % SUBNETS_PER_SEGMENT) * SUBNET_STRIDE + 1;
        let a = u64::from(u32::from(self.base)) + segment * 256 + offset;
        // Capacity bounds slot, so the sum stays inside the partition
        let a = a as u32;
        LinkAddrs {
            subnet: Ipv4Addr::from(a - 1),
            a: Ipv4Addr::from(a),
            b: Ipv4Addr::from(a + 1),
        }
    }
}

#[derive(Debug, Default)]
struct AllocState {
    by_pair: HashMap<PairKey, LinkAddrs>,
    by_subnet: HashMap<Ipv4Addr, PairKey>,
}

/// Memoizing, collision-checked allocator.
///
/// Safe to share across tasks: lookups take a read lock, misses re-check and
/// insert under the write lock.
#[derive(Debug)]
pub struct AddressAllocator {
    space: AddressSpace,
    symmetric: bool,
    state: RwLock<AllocState>,
}

impl AddressAllocator {
    /// Create an allocator over `space`. `symmetric` selects unordered keys.
    pub fn new(space: AddressSpace, symmetric: bool) -> Self {
        Self {
            space,
            symmetric,
            state: RwLock::new(AllocState::default()),
        }
    }

    pub fn space(&self) -> &AddressSpace {
        &self.space
    }

    pub fn is_symmetric(&self) -> bool {
        self.symmetric
    }

    /// Key used for the pair `(a, b)`.
    pub fn key(&self, a: u32, b: u32) -> PairKey {
        if self.symmetric {
            PairKey::unordered(a, b)
        } else {
            PairKey::ordered(a, b)
        }
    }

    /// Addresses for the pair `(a, b)` of 1-based ordinals.
    ///
    /// Deterministic and memoized. Fails if the pair is invalid, falls outside
    /// the partition, or would reuse a subnet already held by another pair.
    pub fn allocate(&self, a: u32, b: u32) -> Result<LinkAddrs, AddressError> {
        let key = self.key(a, b);

        if let Some(addrs) = self.lookup_key(&key) {
            return Ok(addrs);
        }

        let slot = self.space.slot(key, self.symmetric)?;
        let addrs = self.space.locate(slot);

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = state.by_pair.get(&key) {
            return Ok(*existing);
        }
        if let Some(&existing) = state.by_subnet.get(&addrs.subnet) {
            return Err(AddressError::Collision {
                pair: key,
                existing,
                subnet: addrs.subnet,
            });
        }
        state.by_pair.insert(key, addrs);
        state.by_subnet.insert(addrs.subnet, key);
        Ok(addrs)
    }

    /// Previously allocated addresses for `(a, b)`, if any.
    pub fn lookup(&self, a: u32, b: u32) -> Option<LinkAddrs> {
        self.lookup_key(&self.key(a, b))
    }

    /// Number of live allocations.
    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_pair
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup_key(&self, key: &PairKey) -> Option<LinkAddrs> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_pair
            .get(key)
            .copied()
    }
}
