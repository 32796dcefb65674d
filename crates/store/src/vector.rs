//! Vector similarity utilities.
//!
//! Pure-Rust cosine math used by the in-memory store, plus the text literal
//! pgvector accepts for `$n::vector` casts.

/// Cosine similarity in f64; `None` for mismatched, empty or zero vectors.
fn similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let (dot, aa, bb) = a.iter().zip(b).fold((0.0f64, 0.0f64, 0.0f64), |(d, x2, y2), (&x, &y)| {
        let (x, y) = (f64::from(x), f64::from(y));
        (d + x * y, x2 + x * x, y2 + y * y)
    });

    let denom = (aa * bb).sqrt();
    (denom >= 1e-10).then(|| dot / denom)
}

/// Cosine similarity in [-1, 1]; 0.0 when undefined.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    similarity(a, b).unwrap_or(0.0) as f32
}

/// Cosine distance as pgvector's `<=>` computes it: `1 - similarity`.
///
/// Undefined comparisons score like orthogonal vectors (1.0).
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    1.0 - similarity(a, b).unwrap_or(0.0)
}

/// Render an embedding as a pgvector literal, e.g. `[0.1,0.2,0.3]`.
pub fn to_pgvector_literal(embedding: &[f32]) -> String {
    let parts: Vec<String> = embedding.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(","))
}
