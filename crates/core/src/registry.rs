//! Local student accounts and the active-session profile, stored as one JSON
//! document. Passwords are kept as given; this is not an auth system.

use crate::persona::SessionRecord;
use crate::store::{StoreError, read_json, write_json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use uuid::Uuid;

const DEFAULT_GRADE_LEVEL: &str = "Grade 10";
const DEFAULT_LANGUAGE: &str = "English";

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("an account for {0} already exists")]
    EmailTaken(String),
    #[error("no account for {0}")]
    NotFound(String),
    #[error("invalid recovery code")]
    InvalidCode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    pub id: String,
    pub full_name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub parent_email: String,
    pub grade_level: String,
    #[serde(default)]
    pub avatar_seed: String,
    pub joined_at: String,
    #[serde(default)]
    pub preferred_language: String,
    #[serde(default)]
    pub exam_history: Vec<Value>,
    #[serde(default)]
    pub session_history: Vec<SessionRecord>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryDocument {
    #[serde(default)]
    students: Vec<StudentProfile>,
    #[serde(default)]
    active_session: Option<StudentProfile>,
}

pub struct AccountRegistry {
    path: PathBuf,
}

impl AccountRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<RegistryDocument, RegistryError> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }

    fn save(&self, document: &RegistryDocument) -> Result<(), RegistryError> {
        Ok(write_json(&self.path, document)?)
    }

    pub fn students(&self) -> Result<Vec<StudentProfile>, RegistryError> {
        Ok(self.load()?.students)
    }

    pub fn register(
        &self,
        full_name: &str,
        email: &str,
        password: Option<&str>,
        parent_email: Option<&str>,
        grade_level: Option<&str>,
    ) -> Result<StudentProfile, RegistryError> {
        let mut document = self.load()?;
        if document.students.iter().any(|s| s.email == email) {
            return Err(RegistryError::EmailTaken(email.to_string()));
        }

        let now = chrono::Utc::now();
        let student = StudentProfile {
            id: format!("stud_{}", now.timestamp_millis()),
            full_name: full_name.to_string(),
            email: email.to_string(),
            password: password.map(str::to_string),
            parent_email: parent_email.unwrap_or_default().to_string(),
            grade_level: grade_level.unwrap_or(DEFAULT_GRADE_LEVEL).to_string(),
            avatar_seed: Uuid::new_v4().simple().to_string()[..6].to_string(),
            joined_at: now.to_rfc3339(),
            preferred_language: DEFAULT_LANGUAGE.to_string(),
            exam_history: Vec::new(),
            session_history: Vec::new(),
        };
        document.students.push(student.clone());
        self.save(&document)?;
        tracing::info!("Registered student {}", student.id);
        Ok(student)
    }

    pub fn login(&self, email: &str, password: Option<&str>) -> Result<StudentProfile, RegistryError> {
        self.load()?
            .students
            .into_iter()
            .find(|s| s.email == email && s.password.as_deref() == password)
            .ok_or(RegistryError::InvalidCredentials)
    }

    /// Issues a six-digit recovery code. Delivering it is the caller's job.
    pub fn initiate_password_recovery(&self, email: &str) -> String {
        tracing::debug!("Password recovery requested for {}", email);
        let bytes = *Uuid::new_v4().as_bytes();
        let random = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        (100_000 + random % 900_000).to_string()
    }

    pub fn reset_password(
        &self,
        email: &str,
        recovery_code: &str,
        expected_code: &str,
        new_password: &str,
    ) -> Result<(), RegistryError> {
        if recovery_code != expected_code {
            return Err(RegistryError::InvalidCode);
        }
        let mut document = self.load()?;
        let student = document
            .students
            .iter_mut()
            .find(|s| s.email == email)
            .ok_or_else(|| RegistryError::NotFound(email.to_string()))?;
        student.password = Some(new_password.to_string());
        self.save(&document)
    }

    /// Stores `profile` as the signed-in student, or signs out with `None`.
    pub fn set_active_session(&self, profile: Option<&StudentProfile>) -> Result<(), RegistryError> {
        let mut document = self.load()?;
        document.active_session = profile.cloned();
        self.save(&document)
    }

    pub fn get_active_session(&self) -> Result<Option<StudentProfile>, RegistryError> {
        Ok(self.load()?.active_session)
    }
}
