//! Datum identifiers and the `locate` shard function (spec §3).

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// Signed 64-bit datum identifier, globally unique across all servers.
pub type DatumId = i64;

/// Reserved null id. No datum ever exists under this id.
pub const NULL_ID: DatumId = 0;

/// `locate(id) = id mod S`: the one server that owns `id`'s record.
///
/// `servers` must be positive; the caller (almost always a worker routing a
/// request, or a server deciding whether an id is local) is expected to
/// know the cluster size statically.
pub fn locate(id: DatumId, servers: u32) -> u32 {
    debug_assert!(servers > 0, "server count must be positive");
    (id.rem_euclid(servers as i64)) as u32
}

/// Lock-free id allocator: each server hands out ids from the arithmetic
/// progression `rank, rank + S, rank + 2S, ...`, so allocation never
/// collides with another server's ids and never needs cross-server
/// coordination.
#[derive(Debug)]
pub struct IdAllocator {
    rank: i64,
    servers: i64,
    next: AtomicI64,
}

impl IdAllocator {
    /// Create an allocator for `rank` out of `servers` total servers.
    /// The first id handed out is `rank` itself unless that collides with
    /// `NULL_ID`, in which case allocation starts one stride further on.
    pub fn new(rank: u32, servers: u32) -> Self {
        let rank = rank as i64;
        let servers = servers as i64;
        let first = if rank == NULL_ID { rank + servers } else { rank };
        IdAllocator {
            rank,
            servers,
            next: AtomicI64::new(first),
        }
    }

    /// Allocate the next id in this server's progression.
    pub fn next(&self) -> DatumId {
        self.next.fetch_add(self.servers, Ordering::Relaxed)
    }

    /// The rank this allocator was constructed for.
    pub fn rank(&self) -> i64 {
        self.rank
    }
}

/// Routing metadata for a process: this rank, and the total server count
/// used to compute `locate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub rank: u32,
    pub servers: u32,
}

impl Topology {
    pub fn new(rank: u32, servers: u32) -> Self {
        Topology { rank, servers }
    }

    pub fn owner_of(&self, id: DatumId) -> u32 {
        locate(id, self.servers)
    }

    pub fn is_local(&self, id: DatumId) -> bool {
        self.owner_of(id) == self.rank
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locate_is_deterministic_mod() {
        assert_eq!(locate(10, 4), 2);
        assert_eq!(locate(0, 4), 0);
        assert_eq!(locate(-1, 4), 3); // rem_euclid stays non-negative
    }

    #[test]
    fn allocator_never_collides_across_ranks() {
        let a = IdAllocator::new(0, 3);
        let b = IdAllocator::new(1, 3);
        let c = IdAllocator::new(2, 3);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            assert!(seen.insert(a.next()));
            assert!(seen.insert(b.next()));
            assert!(seen.insert(c.next()));
        }
        for id in &seen {
            let owner = if *id % 3 == 0 {
                0
            } else if *id % 3 == 1 {
                1
            } else {
                2
            };
            assert_eq!(locate(*id, 3), owner);
        }
    }

    #[test]
    fn allocator_skips_null_id_on_rank_zero() {
        let a = IdAllocator::new(0, 5);
        assert_ne!(a.next(), NULL_ID);
    }
}
