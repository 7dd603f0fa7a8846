//! Fixed default embedding function for the semantic memory store.
//!
//! A feature-hashed bag-of-words vector: each token is hashed into one
//! of [`EMBEDDING_DIM`] buckets with a sign drawn from a second seeded
//! hash, then the vector is L2-normalized. FNV-1a is used because the
//! hash must be stable across processes and releases — embeddings are
//! persisted and compared against freshly computed query vectors.
//!
//! This is deliberately not a learned model (out of scope); it gives
//! deterministic, lexical nearest-neighbor behavior: identical texts
//! embed identically and texts sharing vocabulary land close.

use crate::topics::tokenize;

/// Dimensionality of every embedding vector.
pub const EMBEDDING_DIM: usize = 256;

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;
const SIGN_SEED: u64 = 0x9e3779b97f4a7c15;

fn fnv1a(bytes: &[u8], seed: u64) -> u64 {
    let mut hash = FNV_OFFSET ^ seed;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Embed `text` into a unit-length vector of [`EMBEDDING_DIM`] floats.
/// Empty or stop-word-free-of-tokens input yields the zero vector.
pub fn embed(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; EMBEDDING_DIM];

    for token in tokenize(text) {
        let bytes = token.as_bytes();
        let bucket = (fnv1a(bytes, 0) % EMBEDDING_DIM as u64) as usize;
        let sign = if fnv1a(bytes, SIGN_SEED) & 1 == 0 {
            1.0
        } else {
            -1.0
        };
        vector[bucket] += sign;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

/// Cosine distance between two embeddings: 0 = identical direction,
/// 1 = orthogonal, 2 = opposite. Mismatched or zero vectors report the
/// maximum distance rather than erroring.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 2.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 2.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

/// Serialize an embedding to little-endian bytes for blob storage.
pub fn to_bytes(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Deserialize an embedding from little-endian bytes.
/// Truncates any trailing partial float.
pub fn from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let a = embed("persistent conversational memory");
        let b = embed("persistent conversational memory");
        assert_eq!(a, b);
    }

    #[test]
    fn test_dimension() {
        assert_eq!(embed("anything at all").len(), EMBEDDING_DIM);
        assert_eq!(embed("").len(), EMBEDDING_DIM);
    }

    #[test]
    fn test_unit_length() {
        let v = embed("the interaction graph stores conversations");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "norm was {norm}");
    }

    #[test]
    fn test_empty_is_zero_vector() {
        let v = embed("");
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_identical_text_zero_distance() {
        let a = embed("favorite color is blue");
        let b = embed("favorite color is blue");
        assert!(cosine_distance(&a, &b) < 1e-6);
    }

    #[test]
    fn test_shared_vocabulary_is_closer() {
        let query = embed("user prefers dark mode themes");
        let near = embed("the user prefers dark themes");
        let far = embed("quarterly revenue exceeded projections");
        assert!(cosine_distance(&query, &near) < cosine_distance(&query, &far));
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(embed("Dark Mode"), embed("dark mode"));
    }

    #[test]
    fn test_zero_vector_max_distance() {
        let z = embed("");
        let v = embed("something");
        assert_eq!(cosine_distance(&z, &v), 2.0);
    }

    #[test]
    fn test_bytes_roundtrip() {
        let v = embed("roundtrip through blob storage");
        let back = from_bytes(&to_bytes(&v));
        assert_eq!(v, back);
    }
}
