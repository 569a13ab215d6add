//! Attached-region records and the per-session interval index.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::backend::StoreHandle;
use crate::error::{Error, Result};

/// One attachment of a backing store into a managed address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// First address covered by the region.
    pub base: u64,
    /// First address past the region.
    pub end: u64,
    /// Backing store of the attachment.
    pub store: StoreHandle,
    /// Offset of the region within its backing store.
    pub offset: u64,
}

impl Region {
    /// Whether `addr` falls inside the region.
    #[must_use]
    pub const fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.end
    }

    /// Region length in bytes.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end - self.base
    }

    /// Whether the region covers no byte.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end == self.base
    }
}

/// Interval index over the regions of one session, ordered by base.
///
/// The lock is held only around lookup, insert and remove; it never spans
/// a forwarded backend call.
#[derive(Debug, Default)]
pub struct RegionMap {
    inner: Mutex<BTreeMap<u64, Region>>,
}

impl RegionMap {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `region`, rejecting any overlap with an existing entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegionOverlap`] when `region` intersects a recorded
    /// region. The index never holds overlapping ranges.
    pub fn insert(&self, region: Region) -> Result<()> {
        let mut map = self.inner.lock().expect("region index poisoned");

        // The only candidates are the nearest region at or below base and
        // the nearest one above it.
        let below = map.range(..=region.base).next_back().map(|(_, r)| *r);
        let above = map
            .range(region.base + 1..)
            .next()
            .map(|(_, r)| *r);
        let overlaps = |other: &Region| other.base < region.end && region.base < other.end;
        if below.as_ref().is_some_and(overlaps) || above.as_ref().is_some_and(overlaps) {
            return Err(Error::RegionOverlap {
                base: region.base,
                end: region.end,
            });
        }
        map.insert(region.base, region);
        Ok(())
    }

    /// Returns the unique region containing `addr`, if any.
    #[must_use]
    pub fn find_by_address(&self, addr: u64) -> Option<Region> {
        let map = self.inner.lock().expect("region index poisoned");
        map.range(..=addr)
            .next_back()
            .map(|(_, region)| *region)
            .filter(|region| region.contains(addr))
    }

    /// Removes and returns the region starting exactly at `base`.
    pub fn remove_by_base(&self, base: u64) -> Option<Region> {
        let mut map = self.inner.lock().expect("region index poisoned");
        map.remove(&base)
    }

    /// Number of recorded regions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("region index poisoned").len()
    }

    /// Whether no region is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::{Region, RegionMap};
    use crate::backend::StoreHandle;
    use crate::error::Error;
    use proptest::prelude::*;

    fn region(base: u64, size: u64) -> Region {
        Region {
            base,
            end: base + size,
            store: StoreHandle(0),
            offset: 0,
        }
    }

    #[test]
    fn lookup_returns_the_covering_region_or_none() {
        let map = RegionMap::new();
        map.insert(region(0x1000, 0x100)).expect("disjoint");
        map.insert(region(0x3000, 0x10)).expect("disjoint");

        assert_eq!(map.find_by_address(0x1000), Some(region(0x1000, 0x100)));
        assert_eq!(map.find_by_address(0x10FF), Some(region(0x1000, 0x100)));
        assert_eq!(map.find_by_address(0x1100), None);
        assert_eq!(map.find_by_address(0x0FFF), None);
        assert_eq!(map.find_by_address(0x3008), Some(region(0x3000, 0x10)));
    }

    #[test]
    fn overlapping_insert_is_rejected() {
        let map = RegionMap::new();
        map.insert(region(0x1000, 0x100)).expect("disjoint");

        for (base, size) in [
            (0x1000, 0x100), // identical
            (0x0F80, 0x100), // straddles the start
            (0x1080, 0x100), // straddles the end
            (0x1040, 0x10),  // inside
            (0x0800, 0x1000), // encloses
        ] {
            assert_eq!(
                map.insert(region(base, size)),
                Err(Error::RegionOverlap {
                    base,
                    end: base + size,
                }),
                "[{base:#x}, +{size:#x}) must be rejected"
            );
        }
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn adjacent_regions_do_not_overlap() {
        let map = RegionMap::new();
        map.insert(region(0x1000, 0x100)).expect("disjoint");
        map.insert(region(0x1100, 0x100)).expect("adjacent above");
        map.insert(region(0x0F00, 0x100)).expect("adjacent below");
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn remove_by_base_forgets_the_region() {
        let map = RegionMap::new();
        map.insert(region(0x1000, 0x100)).expect("disjoint");
        assert_eq!(map.remove_by_base(0x1000), Some(region(0x1000, 0x100)));
        assert_eq!(map.find_by_address(0x1000), None);
        assert_eq!(map.remove_by_base(0x1000), None);
    }

    proptest! {
        #[test]
        fn index_never_holds_overlapping_ranges(
            ranges in proptest::collection::vec((0u64..0x10000, 1u64..0x400), 0..32),
            probe in 0u64..0x10400,
        ) {
            let map = RegionMap::new();
            let mut accepted: Vec<Region> = Vec::new();
            for (base, size) in ranges {
                if map.insert(region(base, size)).is_ok() {
                    accepted.push(region(base, size));
                }
            }
            // Accepted regions are pairwise disjoint.
            for (i, a) in accepted.iter().enumerate() {
                for b in &accepted[i + 1..] {
                    prop_assert!(a.end <= b.base || b.end <= a.base);
                }
            }
            // Lookup agrees with a linear scan.
            let expected = accepted.iter().find(|r| r.contains(probe)).copied();
            prop_assert_eq!(map.find_by_address(probe), expected);
        }
    }
}
