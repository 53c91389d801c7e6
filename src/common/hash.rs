//! Hashing utilities for ringkv
//!
//! - BLAKE3 folded to 64 bits for key placement
//! - HRW (Highest Random Weight) weights for rendezvous placement

/// First 8 bytes (little endian) of BLAKE3(data)
pub fn hash64(data: &[u8]) -> u64 {
    let hash = blake3::hash(data);
    let mut head = [0u8; 8];
    head.copy_from_slice(&hash.as_bytes()[0..8]);
    u64::from_le_bytes(head)
}

/// Slot of a key among `slots` buckets (`hash(key) mod slots`)
///
/// `slots` must be non-zero.
pub fn slot_for(key: &str, slots: usize) -> usize {
    (hash64(key.as_bytes()) % slots as u64) as usize
}

/// HRW weight of a (key, node) pair
pub fn hrw_weight(key: &str, node: u64) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(key.as_bytes());
    hasher.update(&node.to_le_bytes());
    let hash = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&hash.as_bytes()[0..8]);
    u64::from_le_bytes(head)
}

/// Nodes sorted by HRW weight for `key` (heaviest first, ties by id)
pub fn hrw_order(key: &str, nodes: &[u64]) -> Vec<u64> {
    let mut weights: Vec<(u64, u64)> = nodes.iter().map(|&n| (n, hrw_weight(key, n))).collect();
    weights.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    weights.into_iter().map(|(node, _)| node).collect()
}
