/// Hash used to place node ids and keys on the ring.
pub type HashFn = fn(&[u8]) -> u32;

/// Consistent hash ring mapping keys to node ids.
///
/// Every node owns the arc of the ring that ends at its own hash, so adding or removing a node
/// only moves the keys of one arc.
#[derive(Debug, Clone)]
pub struct HashRing {
    hash_fn: HashFn,
    // Sorted by hash.
    points: Vec<(u32, String)>,
}

impl HashRing {
    /// Builds a ring using CRC-32 (IEEE).
    pub fn new<I, S>(nodes: I) -> HashRing
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        HashRing::with_hasher(crc32fast::hash, nodes)
    }

    /// Builds a ring with a custom hash. Empty node ids are ignored.
    pub fn with_hasher<I, S>(hash_fn: HashFn, nodes: I) -> HashRing
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut points: Vec<(u32, String)> = nodes
            .into_iter()
            .map(Into::into)
            .filter(|node| !node.is_empty())
            .map(|node| (hash_fn(node.as_bytes()), node))
            .collect();
        points.sort();

        HashRing { hash_fn, points }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns the node owning `key`: the first node whose hash is greater than or equal to the
    /// key's hash, wrapping around to the first node.
    pub fn pick_node(&self, key: &str) -> Option<&str> {
        if self.points.is_empty() {
            return None;
        }

        let hash = (self.hash_fn)(key.as_bytes());
        let index = self.points.partition_point(|(point, _)| *point < hash);
        let (_, node) = &self.points[index % self.points.len()];

        Some(node.as_str())
    }
}
