use q13_core::Bit;

/// Picks `bits[i]` for every shared index not consumed by error sampling.
/// Indices past the end of `bits` are skipped.
pub fn sift(bits: &[Bit], shared_indices: &[usize], sampled: &[usize]) -> Vec<Bit> {
    shared_indices
        .iter()
        .filter(|i| !sampled.contains(i))
        .filter_map(|&i| bits.get(i).copied())
        .collect()
}

pub fn keys_match(a: &[Bit], b: &[Bit]) -> bool {
    a.len() == b.len() && mismatch_count(a, b) == 0
}

/// Differing positions over the common prefix, plus the length difference.
pub fn mismatch_count(a: &[Bit], b: &[Bit]) -> usize {
    let diff = a.iter().zip(b).filter(|(x, y)| x != y).count();
    diff + a.len().abs_diff(b.len())
}
