
use crate::{RagError, Result};

/// Cosine similarity of two vectors, in `[-1, 1]`.
///
/// Returns 0 when either vector has zero magnitude.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(RagError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let (dot, norm_a, norm_b) = a.iter().zip(b).fold(
        (0.0_f64, 0.0_f64, 0.0_f64),
        |(dot, norm_a, norm_b), (&x, &y)| {
            let (x, y) = (f64::from(x), f64::from(y));
            (
                x.mul_add(y, dot),
                x.mul_add(x, norm_a),
                y.mul_add(y, norm_b),
            )
        },
    );

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    Ok(similarity.clamp(-1.0, 1.0) as f32)
}

/// Cosine distance (`1 - similarity`), the metric the vector store ranks by
#[inline]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Result<f32> {
    Ok(1.0 - cosine_similarity(a, b)?)
}
