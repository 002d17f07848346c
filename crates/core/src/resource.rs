//! Resource model and ingestion.
//!
//! Payloads from the service are decoded through private record types that
//! accept every shape the service is known to send (ids as strings or numbers,
//! owners as a raw id or a nested object). They are normalized here, once, so the
//! rest of the crate only ever sees a single [`OwnerId`].

#![forbid(unsafe_code)]

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::draft::{digits_only, AdvertisementDraft, Draft, ReviewDraft};
use crate::{OwnerId, ResourceId};

/// A server-owned entity manipulated through list/get/create/update/delete.
pub trait Resource:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    type Draft: Draft;

    /// Short kind name used in logs and metrics.
    const KIND: &'static str;
    /// Collection path segment on the remote service.
    const ENDPOINT: &'static str;

    /// `None` until the service accepted a create.
    fn id(&self) -> Option<&ResourceId>;
    fn owner_id(&self) -> Option<&OwnerId>;
    fn validity(&self) -> Validity { Validity::default() }
    /// One-line label for listings.
    fn label(&self) -> String;
    /// Edit-mode projection of the mutable fields.
    fn bind(&self) -> Self::Draft;
}

/// Optional validity window of a time-bounded resource. Bounds are inclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validity {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl Validity {
    pub fn is_bounded(&self) -> bool { self.start.is_some() || self.end.is_some() }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| at >= s) && self.end.map_or(true, |e| at <= e)
    }
}

// ---------------- Ingestion helpers ----------------

#[derive(Deserialize)]
#[serde(untagged)]
enum LooseScalar {
    Text(String),
    Int(i64),
    Float(f64),
}

impl LooseScalar {
    fn into_text(self) -> String {
        match self {
            LooseScalar::Text(s) => s,
            LooseScalar::Int(n) => n.to_string(),
            LooseScalar::Float(f) if f.fract() == 0.0 => format!("{}", f as i64),
            LooseScalar::Float(f) => f.to_string(),
        }
    }
}

/// Star rating: fractions truncate, text keeps its leading number, anything
/// outside 1..=5 is 0.
fn rating(n: f64) -> u8 {
    let whole = n.trunc();
    if (1.0..=5.0).contains(&whole) { whole as u8 } else { 0 }
}

impl LooseScalar {
    fn into_rating(self) -> u8 {
        match self {
            LooseScalar::Int(n) => rating(n as f64),
            LooseScalar::Float(f) => rating(f),
            LooseScalar::Text(t) => {
                let t = t.trim().replace(',', ".");
                let lead: String = t.chars().take_while(|c| c.is_ascii_digit() || *c == '.').collect();
                match lead.parse::<f64>() {
                    Ok(f) => rating(f),
                    Err(_) => digits_only(&t).parse::<f64>().map_or(0, rating),
                }
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OwnerRef {
    Raw(LooseScalar),
    Nested {
        #[serde(alias = "_id")]
        id: LooseScalar,
    },
}

impl From<OwnerRef> for OwnerId {
    fn from(v: OwnerRef) -> Self {
        match v {
            OwnerRef::Raw(id) | OwnerRef::Nested { id } => OwnerId::new(id.into_text()),
        }
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

fn id_of(v: Option<LooseScalar>) -> Option<ResourceId> {
    non_empty(v.map(LooseScalar::into_text)).map(ResourceId::new)
}

// ---------------- Advertisement ----------------

/// A promotional listing published by a partner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "AdvertisementRecord")]
pub struct Advertisement {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<ResourceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<OwnerId>,
    pub titre: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_promo: Option<String>,
    /// Price as sent by the service; may carry a currency suffix.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_debut: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_fin: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdvertisementRecord {
    #[serde(default, alias = "_id")]
    id: Option<LooseScalar>,
    #[serde(default, alias = "owner", alias = "proprietaire")]
    owner_id: Option<OwnerRef>,
    #[serde(default)]
    titre: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    code_promo: Option<String>,
    #[serde(default)]
    prix: Option<LooseScalar>,
    #[serde(default)]
    date_debut: Option<DateTime<Utc>>,
    #[serde(default)]
    date_fin: Option<DateTime<Utc>>,
}

impl From<AdvertisementRecord> for Advertisement {
    fn from(r: AdvertisementRecord) -> Self {
        Self {
            id: id_of(r.id),
            owner_id: r.owner_id.map(OwnerId::from),
            titre: r.titre.unwrap_or_default(),
            description: r.description.unwrap_or_default(),
            code_promo: non_empty(r.code_promo),
            prix: non_empty(r.prix.map(LooseScalar::into_text)),
            date_debut: r.date_debut,
            date_fin: r.date_fin,
        }
    }
}

impl Resource for Advertisement {
    type Draft = AdvertisementDraft;
    const KIND: &'static str = "advertisement";
    const ENDPOINT: &'static str = "annonces";

    fn id(&self) -> Option<&ResourceId> { self.id.as_ref() }
    fn owner_id(&self) -> Option<&OwnerId> { self.owner_id.as_ref() }

    fn validity(&self) -> Validity {
        Validity { start: self.date_debut, end: self.date_fin }
    }

    fn label(&self) -> String {
        match &self.code_promo {
            Some(code) => format!("{} [{}]", self.titre, code),
            None => self.titre.clone(),
        }
    }

    fn bind(&self) -> AdvertisementDraft {
        AdvertisementDraft {
            source: self.id.clone(),
            titre: self.titre.clone(),
            description: self.description.clone(),
            code_promo: self.code_promo.clone().unwrap_or_default(),
            prix: self.prix.as_deref().map(digits_only).unwrap_or_default(),
            date_debut: self.date_debut,
            date_fin: self.date_fin,
        }
    }
}

// ---------------- Review ----------------

/// A member's rating of an advertisement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "ReviewRecord")]
pub struct Review {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<ResourceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<OwnerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annonce_id: Option<ResourceId>,
    /// 1..=5; 0 when the service sent nothing usable.
    pub note: u8,
    pub commentaire: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewRecord {
    #[serde(default, alias = "_id")]
    id: Option<LooseScalar>,
    #[serde(default, alias = "owner", alias = "auteur")]
    owner_id: Option<OwnerRef>,
    #[serde(default, alias = "annonce")]
    annonce_id: Option<OwnerRef>,
    #[serde(default)]
    note: Option<LooseScalar>,
    #[serde(default)]
    commentaire: Option<String>,
}

impl From<ReviewRecord> for Review {
    fn from(r: ReviewRecord) -> Self {
        let note = r.note.map_or(0, LooseScalar::into_rating);
        Self {
            id: id_of(r.id),
            owner_id: r.owner_id.map(OwnerId::from),
            // same id-or-object shape as owners
            annonce_id: r.annonce_id.map(|a| ResourceId::new(OwnerId::from(a).as_str())),
            note,
            commentaire: r.commentaire.unwrap_or_default(),
        }
    }
}

impl Resource for Review {
    type Draft = ReviewDraft;
    const KIND: &'static str = "review";
    const ENDPOINT: &'static str = "avis";

    fn id(&self) -> Option<&ResourceId> { self.id.as_ref() }
    fn owner_id(&self) -> Option<&OwnerId> { self.owner_id.as_ref() }

    fn label(&self) -> String {
        format!("{}/5 {}", self.note, self.commentaire)
    }

    fn bind(&self) -> ReviewDraft {
        ReviewDraft {
            source: self.id.clone(),
            annonce_id: self.annonce_id.as_ref().map(|a| a.to_string()).unwrap_or_default(),
            note: if self.note == 0 { String::new() } else { self.note.to_string() },
            commentaire: self.commentaire.clone(),
        }
    }
}
