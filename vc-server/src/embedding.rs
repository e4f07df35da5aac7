//! Deterministic fallback embedder for [`vc_scheduler::CosineFallbackIndex`].
//!
//! The real embedding backends (OpenCLIP, a text encoder) are external
//! collaborators per spec §1's Non-goals; this is the "deterministic
//! in-process fallback using cosine similarity over a dense float32
//! matrix" spec §4.8 asks for when no such backend is configured. It
//! hashes character trigrams into a fixed-width vector (a minimal
//! feature-hashing scheme, not a learned embedding) so that semantically
//! unrelated strings are nearly orthogonal and near-duplicate strings
//! score highly, which is all the in-process fallback needs to satisfy.

const FALLBACK_DIM: usize = 64;

pub fn hashing_embed(text: &str) -> Vec<f32> {
    let mut vec = vec![0f32; FALLBACK_DIM];
    let normalized = text.to_ascii_lowercase();
    let chars: Vec<char> = normalized.chars().collect();
    if chars.is_empty() {
        return vec;
    }
    let window = chars.len().min(3);
    for gram in chars.windows(window.max(1)) {
        let mut hash: u64 = 1469598103934665603;
        for c in gram {
            hash ^= *c as u64;
            hash = hash.wrapping_mul(1099511628211);
        }
        let bucket = (hash as usize) % FALLBACK_DIM;
        vec[bucket] += 1.0;
    }
    let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vec {
            *v /= norm;
        }
    }
    vec
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_strings_are_identical_vectors() {
        assert_eq!(hashing_embed("the matrix 1999"), hashing_embed("the matrix 1999"));
    }

    #[test]
    fn embedding_is_unit_normalized() {
        let vec = hashing_embed("inception");
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn empty_input_is_zero_vector() {
        assert!(hashing_embed("").iter().all(|v| *v == 0.0));
    }
}
