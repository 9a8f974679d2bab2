//! Subjects a student can pick, with the voice and avatar face for each.
//! Backed by a JSON file; the built-in list is served until one is saved.

use crate::store::{StoreError, read_json, write_json};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("unknown subject: {0}")]
    UnknownSubject(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceService {
    #[default]
    Gemini,
    Speechify,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterInfo {
    pub id: String,
    pub title: String,
    pub description: String,
    pub textbook_body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_hours: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectConfig {
    pub id: String,
    pub board: String,
    pub class_level: String,
    pub title: String,
    pub face_id: String,
    pub voice_id: String,
    #[serde(default)]
    pub voice_service: VoiceService,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speechify_voice_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_custom_avatar: Option<bool>,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub theme_color: String,
    #[serde(default)]
    pub accent_color: String,
    #[serde(default)]
    pub chapters: Vec<ChapterInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub boards: Vec<String>,
    pub classes: Vec<String>,
}

pub struct SubjectCatalog {
    path: PathBuf,
}

impl SubjectCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get_subjects(&self) -> Result<Vec<SubjectConfig>, CatalogError> {
        Ok(read_json(&self.path)?.unwrap_or_else(default_subjects))
    }

    pub fn save_subjects(&self, subjects: &[SubjectConfig]) -> Result<(), CatalogError> {
        write_json(&self.path, subjects)?;
        tracing::info!("Saved {} subjects to {}", subjects.len(), self.path.display());
        Ok(())
    }

    pub fn find(&self, id: &str) -> Result<SubjectConfig, CatalogError> {
        self.get_subjects()?
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| CatalogError::UnknownSubject(id.to_string()))
    }

    pub fn global_config(&self) -> GlobalConfig {
        GlobalConfig {
            boards: vec!["CBSE".into(), "ICSE".into()],
            classes: (9..=12).map(|grade| format!("Grade {grade}")).collect(),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn subject(
    id: &str,
    board: &str,
    class_level: &str,
    title: &str,
    face_suffix: u8,
    voice_id: &str,
    speechify_voice_id: &str,
    icon: &str,
    color: &str,
    chapter: (&str, &str, &str),
) -> SubjectConfig {
    let (from, to) = match color {
        "blue" => ("blue-600", "indigo-700"),
        "emerald" => ("emerald-600", "teal-700"),
        "amber" => ("amber-600", "orange-700"),
        _ => ("rose-600", "pink-700"),
    };
    SubjectConfig {
        id: id.into(),
        board: board.into(),
        class_level: class_level.into(),
        title: title.into(),
        face_id: format!("550e8400-e29b-41d4-a716-44665544000{face_suffix}"),
        voice_id: voice_id.into(),
        voice_service: VoiceService::Gemini,
        speechify_voice_id: Some(speechify_voice_id.into()),
        is_custom_avatar: None,
        icon: icon.into(),
        theme_color: format!("from-{from} to-{to}"),
        accent_color: format!("text-{color}-400"),
        chapters: vec![ChapterInfo {
            id: chapter.0.into(),
            title: chapter.1.into(),
            description: chapter.2.into(),
            textbook_body: "...".into(),
            estimated_hours: None,
        }],
    }
}

pub fn default_subjects() -> Vec<SubjectConfig> {
    vec![
        subject(
            "math_10_cbse", "CBSE", "Grade 10", "Mathematics", 0, "Kore", "henry",
            "fa-infinity", "blue", ("m1", "Polynomials", "Algebraic foundations."),
        ),
        subject(
            "sci_10_cbse", "CBSE", "Grade 10", "Science", 1, "Zephyr", "kristy",
            "fa-flask", "emerald", ("s1", "Chemical Reactions", "Matter transformations."),
        ),
        subject(
            "hist_10_cbse", "CBSE", "Grade 10", "History", 2, "Charon", "joe",
            "fa-landmark", "amber", ("h1", "World War I", "Global conflicts."),
        ),
        subject(
            "lit_9_icse", "ICSE", "Grade 9", "Literature", 3, "Puck", "olivia",
            "fa-book-open", "rose", ("l1", "The Merchant of Venice", "Shakespearean drama."),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_serves_defaults() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let catalog = SubjectCatalog::new(dir.path().join("subjects.json"));

        let subjects = catalog.get_subjects()?;

        let voices: Vec<_> = subjects.iter().map(|s| s.voice_id.as_str()).collect();
        assert_eq!(voices, ["Kore", "Zephyr", "Charon", "Puck"]);
        assert_eq!(subjects[0].face_id, "550e8400-e29b-41d4-a716-446655440000");
        assert_eq!(subjects[3].theme_color, "from-rose-600 to-pink-700");
        Ok(())
    }

    #[test]
    fn saved_subjects_replace_defaults() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let catalog = SubjectCatalog::new(dir.path().join("cms").join("subjects.json"));
        let mut physics = default_subjects().remove(1);
        physics.id = "phy_11_cbse".into();
        physics.title = "Physics".into();

        catalog.save_subjects(std::slice::from_ref(&physics))?;

        assert_eq!(catalog.get_subjects()?, vec![physics.clone()]);
        assert_eq!(catalog.find("phy_11_cbse")?, physics);
        assert!(matches!(
            catalog.find("math_10_cbse"),
            Err(CatalogError::UnknownSubject(_))
        ));
        Ok(())
    }

    #[test]
    fn reads_camel_case_documents() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("subjects.json");
        std::fs::write(
            &path,
            r#"[{"id":"x","board":"ICSE","classLevel":"Grade 11","title":"Biology",
                "faceId":"f","voiceId":"","voiceService":"speechify","isCustomAvatar":true}]"#,
        )?;

        let subjects = SubjectCatalog::new(&path).get_subjects()?;

        assert_eq!(subjects[0].voice_service, VoiceService::Speechify);
        assert_eq!(subjects[0].is_custom_avatar, Some(true));
        assert!(subjects[0].chapters.is_empty());
        Ok(())
    }

    #[test]
    fn malformed_file_is_an_error() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("subjects.json");
        std::fs::write(&path, "{not json")?;

        assert!(matches!(
            SubjectCatalog::new(&path).get_subjects(),
            Err(CatalogError::Store(StoreError::Json { .. }))
        ));
        Ok(())
    }

    #[test]
    fn global_config_lists_boards_and_grades() {
        let config = SubjectCatalog::new("unused.json").global_config();
        assert_eq!(config.boards, ["CBSE", "ICSE"]);
        assert_eq!(config.classes, ["Grade 9", "Grade 10", "Grade 11", "Grade 12"]);
    }
}
