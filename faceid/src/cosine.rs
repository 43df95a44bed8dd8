/// `1 - cos(a, b)` between two embeddings, in `[0, 2]`.
///
/// Sums are accumulated in f64. Embeddings of different length, or with
/// a zero norm, are as far apart as possible (2.0).
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 2.0;
    }

    let (dot, aa, bb) = a.iter().zip(b).fold((0.0f64, 0.0f64, 0.0f64), |(dot, aa, bb), (&x, &y)| {
        let (x, y) = (f64::from(x), f64::from(y));
        (dot + x * y, aa + x * x, bb + y * y)
    });
    if aa == 0.0 || bb == 0.0 {
        return 2.0;
    }

    let cos = (dot / (aa.sqrt() * bb.sqrt())).clamp(-1.0, 1.0);
    (1.0 - cos) as f32
}

/// Element-wise arithmetic mean of equally sized vectors.
///
/// Returns `None` if `vectors` is empty or the lengths disagree.
pub fn mean_vector(vectors: &[&[f32]]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let dim = first.len();
    if vectors.iter().any(|v| v.len() != dim) {
        return None;
    }

    let mut sum = vec![0.0f64; dim];
    for v in vectors {
        for (acc, &x) in sum.iter_mut().zip(v.iter()) {
            *acc += x as f64;
        }
    }
    let n = vectors.len() as f64;
    Some(sum.into_iter().map(|s| (s / n) as f32).collect())
}

/// Checks that an embedding can take part in cosine comparisons:
/// non-empty, finite, and with a non-zero norm.
pub(crate) fn check_embedding(emb: &[f32]) -> Result<(), &'static str> {
    if emb.is_empty() {
        return Err("embedding is empty");
    }
    if emb.iter().any(|x| !x.is_finite()) {
        return Err("embedding contains non-finite values");
    }
    if emb.iter().all(|&x| x == 0.0) {
        return Err("embedding has zero norm");
    }
    Ok(())
}
