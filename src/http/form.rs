//! Multipart review form parsing.
//!
//! Text fields are collected into a JSON map and deserialized into
//! [`ReviewFields`]; an optional `request` field holding a JSON object
//! overrides individual form fields. File fields are streamed chunk by chunk
//! into the upload directory and removed again when the form is dropped.

use std::{
    path::{Path, PathBuf},
    str::FromStr,
};

use axum::{
    extract::Multipart,
    http::{HeaderMap, header::AUTHORIZATION},
};
use serde::Deserialize;
use serde_json::{Map, Value};
use serde_with::{DisplayFromStr, PickFirst, serde_as};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::base::{
    config::Config,
    text::sanitize_name,
    types::{Attachment, AttachmentSource, HistoryEntry, Language, ReviewOptions, ReviewRequest, Upstream},
};

use super::error::ApiError;

// Flag.

/// Boolean form flag accepting `true/false`, `1/0`, `yes/no` and `on/off`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Flag(pub bool);

impl FromStr for Flag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Flag(true)),
            "false" | "0" | "no" | "off" | "" => Ok(Flag(false)),
            other => Err(format!("invalid flag `{other}`")),
        }
    }
}

// Fields.

/// Text fields of a review form.
#[serde_as]
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReviewFields {
    pub api_url: Option<String>,
    pub model: Option<String>,
    pub aux_model: Option<String>,
    pub system_prompt: String,
    pub requirements: String,
    pub specs: String,
    pub dialog: String,
    /// JSON array, either inline or as a JSON-encoded string.
    pub history: Option<Value>,
    pub progress_id: Option<String>,
    pub search_query: Option<String>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub enable_search: Option<Flag>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub search_top_n: Option<usize>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub direct_review: Option<Flag>,
    pub language: Option<String>,
}

impl ReviewFields {
    pub fn from_map(map: Map<String, Value>) -> Result<Self, ApiError> {
        serde_json::from_value(Value::Object(map)).map_err(|e| ApiError::BadRequest(format!("invalid form fields: {e}")))
    }

    pub fn language(&self) -> Result<Language, ApiError> {
        match self.language.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
            None => Ok(Language::default()),
            Some(lang) => lang.parse().map_err(|_| ApiError::BadRequest(r#"Invalid language parameter. Must be "zh" or "en"."#.to_string())),
        }
    }

    /// Prior turns; malformed history is ignored.
    pub fn history(&self) -> Vec<HistoryEntry> {
        let parsed = match &self.history {
            None | Some(Value::Null) => return Vec::new(),
            Some(Value::String(s)) if s.trim().is_empty() => return Vec::new(),
            Some(Value::String(s)) => serde_json::from_str::<Vec<HistoryEntry>>(s),
            Some(other) => serde_json::from_value::<Vec<HistoryEntry>>(other.clone()),
        };

        parsed.unwrap_or_else(|err| {
            warn!("Ignoring malformed history: {err}");
            Vec::new()
        })
    }

    /// Endpoint, model and forwarded credentials.
    pub fn upstream(&self, config: &Config, headers: &HeaderMap) -> Result<Upstream, ApiError> {
        let api_url = self.api_url.as_deref().map(str::trim).filter(|u| !u.is_empty()).unwrap_or(&config.openrouter_base);

        let Some(model) = self.model.as_deref().map(str::trim).filter(|m| !m.is_empty()) else {
            return Err(ApiError::BadRequest("apiUrl and model are required".to_string()));
        };

        let auth_header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()).map(str::to_string);

        Ok(Upstream {
            api_url: api_url.to_string(),
            model: model.to_string(),
            auth_header,
        })
    }

    pub fn progress_id(&self) -> Option<String> {
        self.progress_id.as_deref().map(str::trim).filter(|p| !p.is_empty()).map(str::to_string)
    }
}

// Uploads.

/// Upload files removed when dropped.
#[derive(Debug, Default)]
pub struct TempUploads {
    paths: Vec<PathBuf>,
}

impl Drop for TempUploads {
    fn drop(&mut self) {
        for path in &self.paths {
            match std::fs::remove_file(path) {
                Ok(()) => debug!("Removed upload `{}`", path.display()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => warn!("Failed to remove upload `{}`: {err}", path.display()),
            }
        }
    }
}

// Form.

/// A parsed review form; uploaded files live as long as the form.
#[derive(Debug)]
pub struct ReviewForm {
    pub fields: ReviewFields,
    pub files: Vec<Attachment>,
    _uploads: TempUploads,
}

impl ReviewForm {
    pub async fn parse(mut multipart: Multipart, upload_dir: &Path) -> Result<Self, ApiError> {
        let mut uploads = TempUploads::default();
        let mut files = Vec::new();
        let mut text = Map::new();
        let mut overrides = Map::new();

        tokio::fs::create_dir_all(upload_dir).await.map_err(|e| ApiError::internal("failed to prepare upload directory", e))?;

        while let Some(mut field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();

            let Some(file_name) = field.file_name().map(str::to_string) else {
                let value = field.text().await?;

                if name == "request" {
                    overrides = parse_overrides(&value)?;
                } else if !value.trim().is_empty() {
                    text.insert(name, Value::String(value));
                }

                continue;
            };

            let declared = field.content_type().map(str::to_string).filter(|m| m != "application/octet-stream");
            let ext = Path::new(&file_name)
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| format!(".{}", sanitize_name(e, 16)))
                .unwrap_or_default();
            let path = upload_dir.join(format!("{}{ext}", uuid::Uuid::new_v4()));

            // Registered first so a partial write is still cleaned up.
            uploads.paths.push(path.clone());

            let mut file = tokio::fs::File::create(&path).await.map_err(|e| ApiError::internal("failed to store upload", e))?;

            while let Some(chunk) = field.chunk().await? {
                file.write_all(&chunk).await.map_err(|e| ApiError::internal("failed to store upload", e))?;
            }

            file.flush().await.map_err(|e| ApiError::internal("failed to store upload", e))?;

            let mime = declared.or_else(|| mime_guess::from_path(&file_name).first().map(|m| m.to_string()));

            files.push(Attachment {
                name: file_name,
                mime,
                source: AttachmentSource::Path(path),
            });
        }

        for (key, value) in overrides {
            if !value.is_null() {
                text.insert(key, value);
            }
        }

        Ok(Self {
            fields: ReviewFields::from_map(text)?,
            files,
            _uploads: uploads,
        })
    }

    /// The review request described by the form.
    pub fn review_request(&self) -> Result<ReviewRequest, ApiError> {
        let fields = &self.fields;

        Ok(ReviewRequest {
            files: self.files.clone(),
            system_prompt: fields.system_prompt.clone(),
            extra_systems: Vec::new(),
            requirements: fields.requirements.clone(),
            specs: fields.specs.clone(),
            dialog: fields.dialog.clone(),
            history: fields.history(),
            language: fields.language()?,
            options: ReviewOptions {
                progress_id: fields.progress_id(),
                enable_search: fields.enable_search.unwrap_or_default().0,
                search_top_n: fields.search_top_n,
                search_query: fields.search_query.clone(),
                search_model: None,
            },
        })
    }
}

fn parse_overrides(raw: &str) -> Result<Map<String, Value>, ApiError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(ApiError::BadRequest("request field must be a JSON object".to_string())),
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::config::ConfigInner;
    use serde_json::json;

    fn fields(value: Value) -> ReviewFields {
        let Value::Object(map) = value else { unreachable!() };
        ReviewFields::from_map(map).unwrap()
    }

    #[test]
    fn test_flag_parsing() {
        assert_eq!("On".parse::<Flag>().unwrap(), Flag(true));
        assert_eq!("0".parse::<Flag>().unwrap(), Flag(false));
        assert!("maybe".parse::<Flag>().is_err());
    }

    #[test]
    fn test_fields_from_strings_and_native_values() {
        let from_form = fields(json!({ "enableSearch": "true", "searchTopN": "3", "directReview": "1" }));
        let from_json = fields(json!({ "enableSearch": true, "searchTopN": 3, "directReview": false }));

        assert_eq!(from_form.enable_search, Some(Flag(true)));
        assert_eq!(from_form.search_top_n, Some(3));
        assert_eq!(from_form.direct_review, Some(Flag(true)));
        assert_eq!(from_json.enable_search, Some(Flag(true)));
        assert_eq!(from_json.direct_review, Some(Flag(false)));
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let Value::Object(map) = json!({ "searchTopN": "many" }) else { unreachable!() };

        assert!(matches!(ReviewFields::from_map(map), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_language() {
        assert_eq!(fields(json!({})).language().unwrap(), Language::Zh);
        assert_eq!(fields(json!({ "language": "en" })).language().unwrap(), Language::En);

        let err = fields(json!({ "language": "de" })).language().unwrap_err();
        assert_eq!(err.to_string(), r#"Invalid language parameter. Must be "zh" or "en"."#);
    }

    #[test]
    fn test_history_forms() {
        let encoded = fields(json!({ "history": r#"[{"role":"assistant","content":"old"}]"# }));
        let inline = fields(json!({ "history": [{ "modelMarkdown": "old", "dialog": "new" }] }));
        let broken = fields(json!({ "history": "{not json" }));

        assert_eq!(encoded.history().len(), 1);
        assert_eq!(inline.history().len(), 1);
        assert!(broken.history().is_empty());
    }

    #[test]
    fn test_upstream() {
        let config = Config::from(ConfigInner::default());
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer sk".parse().unwrap());

        let upstream = fields(json!({ "model": "m" })).upstream(&config, &headers).unwrap();
        assert_eq!(upstream.api_url, config.openrouter_base);
        assert_eq!(upstream.auth_header.as_deref(), Some("Bearer sk"));

        let err = fields(json!({ "apiUrl": "https://x" })).upstream(&config, &headers).unwrap_err();
        assert_eq!(err.to_string(), "apiUrl and model are required");
    }

    #[test]
    fn test_parse_overrides() {
        assert_eq!(parse_overrides(r#"{"model":"x"}"#).unwrap()["model"], "x");
        assert!(parse_overrides("").unwrap().is_empty());
        assert!(parse_overrides("[1]").is_err());
    }

    #[test]
    fn test_temp_uploads_are_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.png");
        std::fs::write(&path, "x").unwrap();

        drop(TempUploads {
            paths: vec![path.clone(), dir.path().join("never-written")],
        });

        assert!(!path.exists());
    }
}
