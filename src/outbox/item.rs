//! Posting payloads and queued outbox items.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Posting fields as collected from the share form. Any of them may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostingDraft {
  pub user_id: Option<u64>,
  pub title: Option<String>,
  pub description: Option<String>,
  pub quantity: Option<String>,
  pub latitude: Option<f64>,
  pub longitude: Option<f64>,
  pub available_until: Option<String>,
}

/// A validated posting, in the shape `POST /api/food-postings` expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodPosting {
  pub user_id: u64,
  pub title: String,
  pub description: String,
  /// Free text, e.g. "3 loaves"
  pub quantity: String,
  pub latitude: f64,
  pub longitude: f64,
  /// ISO-8601 deadline, passed through as entered
  pub available_until: String,
}

impl PostingDraft {
  /// Check every required field and produce a complete posting.
  pub fn validate(self) -> Result<FoodPosting, ValidationError> {
    let user_id = self.user_id.ok_or_else(|| ValidationError::missing("user_id"))?;
    if user_id == 0 {
      return Err(ValidationError::invalid("user_id", "must be a registered user"));
    }

    let title = required_text("title", self.title)?;
    let description = required_text("description", self.description)?;
    let quantity = required_text("quantity", self.quantity)?;

    let latitude = coordinate("latitude", self.latitude, 90.0)?;
    let longitude = coordinate("longitude", self.longitude, 180.0)?;

    let available_until = required_text("available_until", self.available_until)?;
    if parse_deadline(&available_until).is_none() {
      return Err(ValidationError::invalid(
        "available_until",
        format!("'{}' is not an ISO-8601 timestamp", available_until),
      ));
    }

    Ok(FoodPosting {
      user_id,
      title,
      description,
      quantity,
      latitude,
      longitude,
      available_until,
    })
  }
}

fn required_text(field: &'static str, value: Option<String>) -> Result<String, ValidationError> {
  match value {
    Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
    _ => Err(ValidationError::missing(field)),
  }
}

fn coordinate(field: &'static str, value: Option<f64>, bound: f64) -> Result<f64, ValidationError> {
  let v = value.ok_or_else(|| ValidationError::missing(field))?;
  if !v.is_finite() || v.abs() > bound {
    return Err(ValidationError::invalid(
      field,
      format!("{} is outside [-{}, {}]", v, bound, bound),
    ));
  }
  Ok(v)
}

/// Parse a deadline as entered by a browser `datetime-local` field or as a
/// full RFC 3339 timestamp.
pub fn parse_deadline(s: &str) -> Option<NaiveDateTime> {
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Some(dt.naive_utc());
  }
  ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
    .iter()
    .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

/// A posting waiting in the outbox.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxItem {
  /// Insertion sequence; strictly increasing and never reused
  pub id: i64,
  /// Client-generated identifier sent with every delivery attempt
  pub client_id: Uuid,
  pub posting: FoodPosting,
  pub enqueued_at: DateTime<Utc>,
}

/// Wire body for one delivery attempt.
#[derive(Debug, Serialize)]
pub struct PostingPayload<'a> {
  #[serde(flatten)]
  pub posting: &'a FoodPosting,
  pub client_id: Uuid,
}

impl OutboxItem {
  pub fn payload(&self) -> PostingPayload<'_> {
    PostingPayload {
      posting: &self.posting,
      client_id: self.client_id,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  pub(crate) fn draft(title: &str) -> PostingDraft {
    PostingDraft {
      user_id: Some(7),
      title: Some(title.to_string()),
      description: Some("Fresh from this morning".to_string()),
      quantity: Some("3 loaves".to_string()),
      latitude: Some(6.5244),
      longitude: Some(3.3792),
      available_until: Some("2026-10-20T18:00".to_string()),
    }
  }

  #[test]
  fn test_complete_draft_validates() {
    let posting = draft("  Bread ").validate().unwrap();
    assert_eq!(posting.title, "Bread");
    assert_eq!(posting.user_id, 7);
  }

  #[test]
  fn test_each_missing_field_is_named() {
    let cases: [(&str, fn(&mut PostingDraft)); 7] = [
      ("user_id", |d| d.user_id = None),
      ("title", |d| d.title = None),
      ("description", |d| d.description = Some("   ".to_string())),
      ("quantity", |d| d.quantity = None),
      ("latitude", |d| d.latitude = None),
      ("longitude", |d| d.longitude = None),
      ("available_until", |d| d.available_until = None),
    ];

    for (field, strip) in cases {
      let mut d = draft("Rice");
      strip(&mut d);
      assert_eq!(d.validate().unwrap_err().field, field);
    }
  }

  #[test]
  fn test_out_of_range_coordinates_rejected() {
    let mut d = draft("Rice");
    d.latitude = Some(91.0);
    assert_eq!(d.validate().unwrap_err().field, "latitude");

    let mut d = draft("Rice");
    d.longitude = Some(f64::NAN);
    assert_eq!(d.validate().unwrap_err().field, "longitude");
  }

  #[test]
  fn test_deadline_formats() {
    assert!(parse_deadline("2026-10-20T18:00").is_some());
    assert!(parse_deadline("2026-10-20T18:00:30").is_some());
    assert!(parse_deadline("2026-10-20T18:00:00+01:00").is_some());
    assert!(parse_deadline("tomorrow").is_none());

    let mut d = draft("Rice");
    d.available_until = Some("tomorrow".to_string());
    assert_eq!(d.validate().unwrap_err().field, "available_until");
  }

  #[test]
  fn test_payload_flattens_posting_with_client_id() {
    let item = OutboxItem {
      id: 1,
      client_id: Uuid::nil(),
      posting: draft("Bread").validate().unwrap(),
      enqueued_at: Utc::now(),
    };

    let json = serde_json::to_value(item.payload()).unwrap();
    assert_eq!(json["title"], "Bread");
    assert_eq!(json["quantity"], "3 loaves");
    assert_eq!(json["available_until"], "2026-10-20T18:00");
    assert_eq!(json["client_id"], Uuid::nil().to_string());
  }
}

#[cfg(test)]
pub(crate) use tests::draft;
