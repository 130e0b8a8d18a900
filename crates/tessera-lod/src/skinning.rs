//! Bone weight merging for collapsed vertices
//!
//! Both operations are pure: they take weights by value and return new weights.

use tessera_core::BoneWeights;

/// Fold the absorbed vertex's influences into the retained vertex's slots
///
/// A bone already present in a non-empty slot is averaged with the incoming weight.
/// Other bones take the first empty slot; when all four slots are used the influence
/// is dropped.
pub fn merge_bone_weights(retained: BoneWeights, absorbed: BoneWeights) -> BoneWeights {
    let mut merged = retained;

    for (&bone, &weight) in absorbed.indices.iter().zip(absorbed.weights.iter()) {
        if weight == 0.0 {
            continue;
        }
        let matching = (0..BoneWeights::SLOTS)
            .find(|&slot| merged.weights[slot] != 0.0 && merged.indices[slot] == bone);
        if let Some(slot) = matching {
            merged.weights[slot] = (merged.weights[slot] + weight) * 0.5;
        } else if let Some(slot) = (0..BoneWeights::SLOTS).find(|&slot| merged.weights[slot] == 0.0) {
            merged.indices[slot] = bone;
            merged.weights[slot] = weight;
        }
    }

    merged
}

/// Scale weights to unit Euclidean length; all-zero weights are returned unchanged
pub fn normalize_bone_weights(weights: BoneWeights) -> BoneWeights {
    let norm = weights.weights.iter().map(|w| w * w).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return weights;
    }
    BoneWeights {
        indices: weights.indices,
        weights: weights.weights.map(|w| w / norm),
    }
}

/// Skin data of a vertex that absorbs another during an edge collapse
pub fn collapse_skin(retained: Option<BoneWeights>, absorbed: Option<BoneWeights>) -> Option<BoneWeights> {
    match (retained, absorbed) {
        (Some(r), Some(a)) => Some(normalize_bone_weights(merge_bone_weights(r, a))),
        (Some(only), None) | (None, Some(only)) => Some(only),
        (None, None) => None,
    }
}
