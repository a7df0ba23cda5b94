use crate::types::{BestCandidate, RecognitionResult};

/// Picks the most confident detection that actually names a plate.
///
/// Ties keep the first detection seen. Nothing at or below zero confidence
/// ever beats the empty default.
pub fn select_best(result: &RecognitionResult) -> BestCandidate {
    let mut best = BestCandidate::default();
    for detection in &result.results {
        let plate = match detection.plate.as_deref() {
            Some(plate) if !plate.is_empty() => plate,
            _ => continue,
        };
        if detection.confidence > best.confidence {
            best = BestCandidate {
                plate: plate.to_string(),
                confidence: detection.confidence,
            };
        }
    }
    best
}
