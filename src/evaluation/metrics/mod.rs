// Similarity arithmetic behind the evaluation scores, kept free of any model


/// Norms of zero are replaced with this so zero vectors score 0 instead of NaN
const NORM_FLOOR: f32 = 1e-12;

fn safe_norm(v: &[f32]) -> f32 {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 { NORM_FLOOR } else { norm }
}

#[inline]
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot / (safe_norm(a) * safe_norm(b))
}

/// `rows.len() × cols.len()` matrix of pairwise cosine similarities
#[inline]
pub fn cosine_matrix(rows: &[Vec<f32>], cols: &[Vec<f32>]) -> Vec<Vec<f32>> {
    rows.iter()
        .map(|row| cols.iter().map(|col| cosine(row, col)).collect())
        .collect()
}

#[inline]
pub fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

/// Best score in each row
#[inline]
pub fn row_maxima(matrix: &[Vec<f32>]) -> Vec<f32> {
    matrix
        .iter()
        .filter(|row| !row.is_empty())
        .map(|row| row.iter().copied().fold(f32::NEG_INFINITY, f32::max))
        .collect()
}

/// Best score in each column
#[inline]
pub fn column_maxima(matrix: &[Vec<f32>]) -> Vec<f32> {
    let columns = matrix.first().map_or(0, Vec::len);
    (0..columns)
        .map(|c| {
            matrix
                .iter()
                .filter_map(|row| row.get(c).copied())
                .fold(f32::NEG_INFINITY, f32::max)
        })
        .collect()
}

/// Harmonic mean of precision and recall; 0 when both are 0
#[inline]
pub fn f1(precision: f32, recall: f32) -> f32 {
    let sum = precision + recall;
    if sum == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / sum
    }
}
