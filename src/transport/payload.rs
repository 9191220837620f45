use serde::{Deserialize, Serialize};

use crate::{IncidentKind, IncidentReport};

/// JSON body of `POST /api/proctor/report`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentPayload {
    pub student_id: u64,
    pub cheat_type: IncidentKind,
    pub description: String,
    pub confidence_score: f32,
    /// `null` when evidence capture failed or is disabled.
    pub snapshot_url: Option<String>,
}

impl From<&IncidentReport> for IncidentPayload {
    fn from(report: &IncidentReport) -> Self {
        Self {
            student_id: report.subject_id.get(),
            cheat_type: report.kind,
            description: report.description.clone(),
            confidence_score: report.confidence,
            snapshot_url: report
                .snapshot_locator
                .as_ref()
                .map(|locator| locator.url().to_string()),
        }
    }
}
