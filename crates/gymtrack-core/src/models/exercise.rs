use serde::{Deserialize, Serialize};

/// An entry of the exercise catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exercise {
    #[serde(deserialize_with = "super::string_or_number")]
    pub id: String,
    pub name: String,
    pub series: u32,
    pub repetitions: u32,
    pub group: String,
    /// Demo animation file name, served under `/exercise/demo/`
    #[serde(default)]
    pub demo: String,
    /// Thumbnail file name, served under `/exercise/thumb/`
    #[serde(default)]
    pub thumb: String,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Exercise {
    pub fn summary(&self) -> String {
        format!("{} series x {} repetitions", self.series, self.repetitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exercise() {
        let json = r#"{"id": 3, "name": "Remada curvada", "series": 3, "repetitions": 12,
            "group": "costas", "demo": "remada.gif", "thumb": "remada.png",
            "created_at": "2024-01-01 10:00:00", "updated_at": "2024-01-01 10:00:00"}"#;
        let exercise: Exercise = serde_json::from_str(json).expect("parse exercise");
        assert_eq!(exercise.id, "3");
        assert_eq!(exercise.summary(), "3 series x 12 repetitions");
    }
}
