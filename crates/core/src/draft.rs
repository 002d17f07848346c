//! Editable drafts and the form binder.
//!
//! A draft is created empty (create mode) or bound from a loaded resource (edit
//! mode, remembering the source id). Numeric text is sanitized by dropping
//! non-digit characters instead of rejecting input. Dates are kept as instants and
//! only formatted when rendered or sent.

#![forbid(unsafe_code)]

use std::fmt;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde_json::Value;
use smallvec::SmallVec;

use crate::resource::Resource;
use crate::ResourceId;

/// Loosely-typed field map sent on create/update. Only fields the user set are present.
pub type Payload = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftMode {
    Create,
    Edit(ResourceId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Local validation failure. Shown inline next to the fields; never sent anywhere.
#[derive(Debug, Clone, Default, PartialEq, Eq, thiserror::Error)]
#[error("invalid draft: {}", summarize(.errors))]
pub struct ValidationErrors {
    pub errors: SmallVec<[FieldError; 4]>,
}

fn summarize(errors: &[FieldError]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ")
}

impl ValidationErrors {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = SmallVec::new();
        errors.push(FieldError::new(field, message));
        Self { errors }
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    pub fn is_empty(&self) -> bool { self.errors.is_empty() }

    pub fn for_field(&self, field: &str) -> Option<&FieldError> {
        self.errors.iter().find(|e| e.field == field)
    }

    fn into_result(self) -> Result<(), Self> {
        if self.errors.is_empty() { Ok(()) } else { Err(self) }
    }
}

/// Editable projection of a resource's mutable fields.
pub trait Draft: Clone + fmt::Debug + Default + PartialEq + Send + Sync + 'static {
    /// Id of the resource this draft was bound from; `None` in create mode.
    fn source_id(&self) -> Option<&ResourceId>;

    fn mode(&self) -> DraftMode {
        match self.source_id() {
            Some(id) => DraftMode::Edit(id.clone()),
            None => DraftMode::Create,
        }
    }

    /// Set a field from user text. Accepts wire (camelCase) and snake_case names.
    fn set(&mut self, field: &str, value: &str) -> Result<(), ValidationErrors>;

    fn validate(&self) -> Result<(), ValidationErrors>;

    fn to_payload(&self) -> Payload;
}

/// Bind a draft: all-default for create, prefilled from `resource` for edit.
pub fn to_draft<R: Resource>(resource: Option<&R>) -> R::Draft {
    resource.map(R::bind).unwrap_or_default()
}

/// Keep ASCII digits only.
pub fn digits_only(input: &str) -> String {
    input.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn parse_instant(field: &str, value: &str) -> Result<Option<DateTime<Utc>>, ValidationErrors> {
    let v = value.trim();
    if v.is_empty() {
        return Ok(None);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(v) {
        return Ok(Some(dt.with_timezone(&Utc)));
    }
    match NaiveDate::parse_from_str(v, "%Y-%m-%d") {
        Ok(d) => Ok(d.and_hms_opt(0, 0, 0).map(|n| n.and_utc())),
        Err(_) => Err(ValidationErrors::single(field, "expected YYYY-MM-DD or RFC 3339")),
    }
}

fn instant_value(dt: &DateTime<Utc>) -> Value {
    Value::String(dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn unknown_field(field: &str) -> ValidationErrors {
    ValidationErrors::single(field, "unknown field")
}

// ---------------- Advertisement ----------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvertisementDraft {
    pub source: Option<ResourceId>,
    pub titre: String,
    pub description: String,
    pub code_promo: String,
    /// Digits only.
    pub prix: String,
    pub date_debut: Option<DateTime<Utc>>,
    pub date_fin: Option<DateTime<Utc>>,
}

impl Draft for AdvertisementDraft {
    fn source_id(&self) -> Option<&ResourceId> { self.source.as_ref() }

    fn set(&mut self, field: &str, value: &str) -> Result<(), ValidationErrors> {
        match field {
            "titre" => self.titre = value.to_string(),
            "description" => self.description = value.to_string(),
            "codePromo" | "code_promo" => self.code_promo = value.trim().to_string(),
            "prix" => self.prix = digits_only(value),
            "dateDebut" | "date_debut" => self.date_debut = parse_instant("dateDebut", value)?,
            "dateFin" | "date_fin" => self.date_fin = parse_instant("dateFin", value)?,
            other => return Err(unknown_field(other)),
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errs = ValidationErrors::default();
        if self.titre.trim().is_empty() {
            errs.push("titre", "required");
        }
        if !self.prix.is_empty() && self.prix.parse::<u64>().is_err() {
            errs.push("prix", "must be a whole number");
        }
        if let (Some(start), Some(end)) = (self.date_debut, self.date_fin) {
            if end < start {
                errs.push("dateFin", "must not precede dateDebut");
            }
        }
        errs.into_result()
    }

    fn to_payload(&self) -> Payload {
        let mut p = Payload::new();
        p.insert("titre".into(), Value::String(self.titre.trim().to_string()));
        if !self.description.trim().is_empty() {
            p.insert("description".into(), Value::String(self.description.trim().to_string()));
        }
        if !self.code_promo.is_empty() {
            p.insert("codePromo".into(), Value::String(self.code_promo.clone()));
        }
        if let Ok(prix) = self.prix.parse::<u64>() {
            p.insert("prix".into(), Value::from(prix));
        }
        if let Some(d) = &self.date_debut {
            p.insert("dateDebut".into(), instant_value(d));
        }
        if let Some(d) = &self.date_fin {
            p.insert("dateFin".into(), instant_value(d));
        }
        p
    }
}

// ---------------- Review ----------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewDraft {
    pub source: Option<ResourceId>,
    pub annonce_id: String,
    /// Digits only.
    pub note: String,
    pub commentaire: String,
}

impl Draft for ReviewDraft {
    fn source_id(&self) -> Option<&ResourceId> { self.source.as_ref() }

    fn set(&mut self, field: &str, value: &str) -> Result<(), ValidationErrors> {
        match field {
            "annonceId" | "annonce_id" | "annonce" => self.annonce_id = value.trim().to_string(),
            "note" => self.note = digits_only(value),
            "commentaire" => self.commentaire = value.to_string(),
            other => return Err(unknown_field(other)),
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errs = ValidationErrors::default();
        match self.note.parse::<u8>() {
            Ok(n) if (1..=5).contains(&n) => {}
            _ => errs.push("note", "must be between 1 and 5"),
        }
        if self.commentaire.trim().is_empty() {
            errs.push("commentaire", "required");
        }
        errs.into_result()
    }

    fn to_payload(&self) -> Payload {
        let mut p = Payload::new();
        if let Ok(n) = self.note.parse::<u8>() {
            p.insert("note".into(), Value::from(n));
        }
        p.insert("commentaire".into(), Value::String(self.commentaire.trim().to_string()));
        if !self.annonce_id.is_empty() {
            p.insert("annonceId".into(), Value::String(self.annonce_id.clone()));
        }
        p
    }
}
