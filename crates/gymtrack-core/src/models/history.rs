use serde::{Deserialize, Serialize};

/// One logged exercise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(deserialize_with = "super::string_or_number")]
    pub id: String,
    pub name: String,
    pub group: String,
    /// Time of day the exercise was logged, `HH:MM`
    pub hour: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// History entries grouped under a day title, as returned by `GET /history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryByDay {
    pub title: String,
    #[serde(default)]
    pub data: Vec<HistoryEntry>,
}

impl HistoryByDay {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
