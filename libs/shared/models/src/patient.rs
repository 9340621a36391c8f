use serde::{Deserialize, Serialize};

/// Read-only snapshot of the patient as supplied by the messaging layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientProfile {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
}

impl PatientProfile {
    pub fn new(name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone: phone.into(),
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}
