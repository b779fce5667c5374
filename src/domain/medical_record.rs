use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Optional clinical fields captured when an appointment is completed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MedicalData {
    pub diagnosis: Option<String>,
    pub prescription: Option<String>,
    pub medical_history: Option<String>,
    pub medications: Option<String>,
    pub allergies: Option<String>,
    pub vital_signs: Option<serde_json::Value>,
    pub treatment_plan: Option<String>,
    pub lab_results: Option<serde_json::Value>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicalRecord {
    pub id: u64,
    pub patient_id: u64,
    pub doctor_id: u64,
    pub appointment_id: u64,
    #[serde(flatten)]
    pub data: MedicalData,
    pub created_at: DateTime<Utc>,
}
