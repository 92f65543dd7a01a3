/// Count occurrences of every byte value
pub fn byte_histogram(data: &[u8]) -> [u64; 256] {
    let mut counts = [0u64; 256];
    for &byte in data {
        counts[byte as usize] += 1;
    }
    counts
}

/// Calculate Shannon entropy of a byte slice
///
/// Returns value between 0.0 (no entropy) and 8.0 (maximum entropy)
pub fn calculate_entropy(data: &[u8]) -> f64 {
    entropy_from_histogram(&byte_histogram(data), data.len())
}

/// Shannon entropy from a precomputed histogram over `total` bytes
pub fn entropy_from_histogram(counts: &[u64; 256], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }

    let len = total as f64;
    counts
        .iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Round to a fixed number of decimals so JSON output stays stable
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
