//! Alignment-quality diagnostics.
//!
//! Recomputes the pairwise cosine distance matrix between MIDI and audio
//! spectrogram frames and derives summary scores from the stored alignment
//! path. The summaries fill the score columns of the alignment report.

use anyhow::{bail, Result};
use ndarray::Array2;

/// Summary scores for one aligned MIDI/audio pair.
#[derive(Clone, Copy, Debug)]
pub struct AlignmentScores {
    /// Raw score reported by the alignment stage.
    pub raw: f64,
    /// Mean cosine distance along the warped path.
    pub mean_path_distance: f64,
    /// Raw score normalized by path length.
    pub length_normalized: f64,
    /// Mean path distance relative to the mean distance of the submatrix
    /// the path spans; below 1.0 means better than chance in that region.
    pub region_normalized: f64,
}

impl AlignmentScores {
    /// Score columns in report order.
    pub fn as_fields(&self) -> [f64; 4] {
        [
            self.raw,
            self.mean_path_distance,
            self.length_normalized,
            self.region_normalized,
        ]
    }
}

/// Full pairwise cosine distance between the rows of two spectrograms.
///
/// Rows are expected to be L2-normalized already (the post-processing
/// contract), but the norms are still computed so zero rows degrade to
/// distance 1.0 instead of NaN.
pub fn cosine_distance_matrix(midi_gram: &Array2<f32>, audio_gram: &Array2<f32>) -> Result<Array2<f32>> {
    if midi_gram.shape()[1] != audio_gram.shape()[1] {
        bail!(
            "spectrogram bin counts differ: {} vs {}",
            midi_gram.shape()[1],
            audio_gram.shape()[1]
        );
    }

    let n = midi_gram.shape()[0];
    let m = audio_gram.shape()[0];
    let bins = midi_gram.shape()[1];

    let row_norm = |gram: &Array2<f32>, i: usize| -> f32 {
        (0..bins).map(|b| gram[(i, b)] * gram[(i, b)]).sum::<f32>().sqrt()
    };
    let midi_norms: Vec<f32> = (0..n).map(|i| row_norm(midi_gram, i)).collect();
    let audio_norms: Vec<f32> = (0..m).map(|j| row_norm(audio_gram, j)).collect();

    let mut distances = Array2::<f32>::zeros((n, m));
    for i in 0..n {
        for j in 0..m {
            let denom = midi_norms[i] * audio_norms[j];
            let d = if denom > 1e-10 {
                let dot: f32 = (0..bins).map(|b| midi_gram[(i, b)] * audio_gram[(j, b)]).sum();
                1.0 - dot / denom
            } else {
                1.0
            };
            distances[(i, j)] = d;
        }
    }
    Ok(distances)
}

/// Derive summary scores from a distance matrix, the stored alignment path
/// and the raw score.
///
/// The original scoring collaborator is treated as an external contract
/// `(similarity_matrix, p, q, raw_score) -> summary_scores`; see DESIGN.md
/// for the concrete summaries chosen here.
pub fn get_scores(
    distance_matrix: &Array2<f32>,
    p: &[i64],
    q: &[i64],
    raw_score: f64,
) -> Result<AlignmentScores> {
    if p.len() != q.len() {
        bail!("alignment path lengths differ: {} vs {}", p.len(), q.len());
    }
    if p.is_empty() {
        bail!("empty alignment path");
    }

    let (n, m) = (distance_matrix.shape()[0], distance_matrix.shape()[1]);
    let mut path_sum = 0.0f64;
    let (mut p_min, mut p_max, mut q_min, mut q_max) = (usize::MAX, 0usize, usize::MAX, 0usize);

    for (&pi, &qi) in p.iter().zip(q) {
        if pi < 0 || qi < 0 || pi as usize >= n || qi as usize >= m {
            bail!("alignment path index ({pi}, {qi}) out of bounds for {n}x{m} matrix");
        }
        let (pi, qi) = (pi as usize, qi as usize);
        path_sum += distance_matrix[(pi, qi)] as f64;
        p_min = p_min.min(pi);
        p_max = p_max.max(pi);
        q_min = q_min.min(qi);
        q_max = q_max.max(qi);
    }
    let mean_path_distance = path_sum / p.len() as f64;

    // Mean distance over the rectangle the path spans
    let mut region_sum = 0.0f64;
    let mut region_count = 0usize;
    for i in p_min..=p_max {
        for j in q_min..=q_max {
            region_sum += distance_matrix[(i, j)] as f64;
            region_count += 1;
        }
    }
    let region_mean = region_sum / region_count as f64;
    let region_normalized = if region_mean > 0.0 {
        mean_path_distance / region_mean
    } else {
        1.0
    };

    Ok(AlignmentScores {
        raw: raw_score,
        mean_path_distance,
        length_normalized: raw_score / p.len() as f64,
        region_normalized,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_identical_rows_zero_distance() {
        let gram = array![[1.0f32, 0.0], [0.0, 1.0]];
        let distances = cosine_distance_matrix(&gram, &gram).unwrap();
        assert_relative_eq!(distances[(0, 0)], 0.0, epsilon = 1e-6);
        assert_relative_eq!(distances[(1, 1)], 0.0, epsilon = 1e-6);
        // Orthogonal rows are at distance 1
        assert_relative_eq!(distances[(0, 1)], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_zero_row_degrades_to_one() {
        let a = array![[0.0f32, 0.0]];
        let b = array![[1.0f32, 0.0]];
        let distances = cosine_distance_matrix(&a, &b).unwrap();
        assert_relative_eq!(distances[(0, 0)], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_bin_mismatch_is_error() {
        let a = Array2::<f32>::zeros((2, 48));
        let b = Array2::<f32>::zeros((2, 12));
        assert!(cosine_distance_matrix(&a, &b).is_err());
    }

    #[test]
    fn test_get_scores_hand_checked() {
        let distances = array![[0.0f32, 1.0], [1.0, 0.0]];
        let scores = get_scores(&distances, &[0, 1], &[0, 1], 0.5).unwrap();

        assert_relative_eq!(scores.raw, 0.5);
        // Diagonal path over a matrix with zero diagonal
        assert_relative_eq!(scores.mean_path_distance, 0.0);
        assert_relative_eq!(scores.length_normalized, 0.25);
        // Region mean is 0.5, path mean 0.0
        assert_relative_eq!(scores.region_normalized, 0.0);
    }

    #[test]
    fn test_get_scores_out_of_bounds() {
        let distances = array![[0.0f32, 1.0], [1.0, 0.0]];
        assert!(get_scores(&distances, &[0, 2], &[0, 1], 0.5).is_err());
        assert!(get_scores(&distances, &[0, -1], &[0, 1], 0.5).is_err());
        assert!(get_scores(&distances, &[], &[], 0.5).is_err());
    }

    #[test]
    fn test_get_scores_path_length_mismatch() {
        let distances = array![[0.0f32]];
        assert!(get_scores(&distances, &[0, 0], &[0], 0.5).is_err());
    }
}
