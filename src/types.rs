use serde::{Serialize, Serializer};
use serde_json::Value;

/// One plate reading reported by the recognizer.
///
/// `plate` and `confidence` are read leniently for selection; the entry
/// itself is kept as reported and is what gets relayed to the caller, so
/// `results` always mirrors `raw.results`.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub plate: Option<String>,
    pub confidence: f64,
    pub entry: Value,
}

impl Detection {
    pub fn from_entry(entry: Value) -> Detection {
        Detection {
            plate: entry
                .get("plate")
                .and_then(Value::as_str)
                .map(str::to_string),
            confidence: entry.get("confidence").map(confidence_of).unwrap_or(0.0),
            entry,
        }
    }

    #[cfg(test)]
    pub fn new(plate: &str, confidence: f64) -> Detection {
        Detection::from_entry(serde_json::json!({
            "plate": plate,
            "confidence": confidence,
        }))
    }
}

impl Serialize for Detection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.entry.serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    pub results: Vec<Detection>,
    pub raw: Value,
}

impl RecognitionResult {
    /// Builds a result from the tool's parsed output. A missing or
    /// non-array `results` yields no detections; every array entry is
    /// kept, however odd its shape.
    pub fn from_raw(raw: Value) -> RecognitionResult {
        let results = match raw.get("results") {
            Some(Value::Array(entries)) => entries.iter().cloned().map(Detection::from_entry).collect(),
            _ => vec![],
        };
        RecognitionResult { results, raw }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BestCandidate {
    pub plate: String,
    pub confidence: f64,
}

/// Body of a successful `POST /read-plate`.
#[derive(Debug, Serialize)]
pub struct PlateReading {
    pub results: Vec<Detection>,
    pub plate: String,
    pub confidence: f64,
    pub region: String,
    pub raw: Value,
}

/// Absent, non-numeric and non-finite values all count as zero.
pub fn confidence_of(value: &Value) -> f64 {
    let confidence = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    confidence.filter(|c| c.is_finite()).unwrap_or(0.0)
}
