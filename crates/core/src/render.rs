//! Template rendering for catalog messages.
//!
//! Templates reference values as `{{scope.name}}`: `member.*` and `user.*`
//! come from the recipient/sender settings (whichever is which category),
//! `org.name` from the recipient's organisation, and content fields by their
//! camelCase name.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::client::{ClientCategory, ClientSettings};
use crate::dispatch::DispatchContent;

/// Regex pattern matching `{{placeholder}}` tokens, capturing the name.
pub const PLACEHOLDER_PATTERN: &str = r"\{\{\s*([a-zA-Z][a-zA-Z0-9_.]*)\s*\}\}";

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PLACEHOLDER_PATTERN).expect("valid regex"));

/// Display format for appointment times.
const APPOINTMENT_TIME_FORMAT: &str = "%a, %b %-d at %-I:%M %p UTC";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Template values missing: {}", missing.join(", "))]
pub struct RenderError {
    pub missing: Vec<String>,
}

/// Values available to a template.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    values: BTreeMap<String, String>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client's fields under `member.` or `user.` depending on its
    /// category. The first client added with an org name also provides
    /// `org.name`.
    pub fn with_client(mut self, settings: &ClientSettings) -> Self {
        let scope = match settings.client_category {
            ClientCategory::Member => "member",
            ClientCategory::User => "user",
        };
        self.insert_opt(&format!("{scope}.firstName"), settings.first_name.as_deref());
        self.insert_opt(&format!("{scope}.lastName"), settings.last_name.as_deref());
        self.insert_opt(&format!("{scope}.honorific"), settings.honorific.as_deref());
        self.insert_opt(&format!("{scope}.phone"), settings.phone.as_deref());
        if !self.values.contains_key("org.name") {
            self.insert_opt("org.name", settings.org_name.as_deref());
        }
        self
    }

    /// Add the dispatch's content fields.
    pub fn with_content(mut self, content: &DispatchContent) -> Self {
        self.insert_opt("content", content.content.as_deref());
        self.insert_opt("scheduleLink", content.schedule_link.as_deref());
        self.insert_opt("path", content.path.as_deref());
        self.insert_opt("assessmentName", content.assessment_name.as_deref());
        self.insert_opt("assessmentScore", content.assessment_score.as_deref());
        self.insert_opt(
            "journalImageDownloadLink",
            content.journal_image_download_link.as_deref(),
        );
        self.insert_opt(
            "journalAudioDownloadLink",
            content.journal_audio_download_link.as_deref(),
        );
        if let Some(at) = content.appointment_time {
            self.insert(
                "appointmentTime",
                at.format(APPOINTMENT_TIME_FORMAT).to_string(),
            );
        }
        self
    }

    pub fn with_value(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.values.insert(name.to_string(), value.into());
    }

    fn insert_opt(&mut self, name: &str, value: Option<&str>) {
        if let Some(v) = value {
            self.insert(name, v);
        }
    }

    /// Substitute every placeholder in `template`.
    ///
    /// Fails with every unresolved name when any placeholder has no value.
    pub fn render(&self, template: &str) -> Result<String, RenderError> {
        let mut missing: Vec<String> = Vec::new();
        let rendered = PLACEHOLDER_RE.replace_all(template, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match self.values.get(name) {
                Some(value) => value.clone(),
                None => {
                    if !missing.iter().any(|m| m == name) {
                        missing.push(name.to_string());
                    }
                    String::new()
                }
            }
        });

        if missing.is_empty() {
            Ok(rendered.into_owned())
        } else {
            Err(RenderError { missing })
        }
    }
}

/// De-duplicated placeholder names used by `template`, in order of appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER_RE.captures_iter(template) {
        let name = caps[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}
