//! Waitlist and signup submissions from the landing page.
//!
//! Forms may repeat `city[]`, `from[]` and `to[]`; values at the same index
//! are zipped into one trip. Two surfaces share the same validation: classic
//! form posts answer with a redirect carrying a status flag, JSON posts
//! answer with a status code.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use axum::{
    Form, Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use chrono::Utc;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{error, info};

use lumo_types::api::IntakeResponse;
use lumo_types::models::{IntakeEntry, IntakeSource, Role, TripEntry};

use crate::error::ApiError;
use crate::state::{AppState, run_db};

/// Field values keyed by name with any `[]` suffix removed.
type FormFields = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IntakeError {
    #[error("missing required fields")]
    MissingFields,
    #[error("invalid email")]
    InvalidEmail,
    #[error("invalid role")]
    InvalidRole,
    #[error("server error")]
    Server,
}

impl IntakeError {
    /// Query flag appended to the form redirect.
    pub fn flag(&self) -> &'static str {
        match self {
            Self::MissingFields => "missing_fields",
            Self::InvalidEmail => "invalid_email",
            Self::InvalidRole => "invalid_role",
            Self::Server => "server",
        }
    }
}

/// Zip parallel `city`/`from`/`to` arrays. `city` decides the length; rows
/// whose city is blank are dropped and missing `from`/`to` values are absent.
pub fn zip_trips(cities: &[String], froms: &[String], tos: &[String]) -> Vec<TripEntry> {
    let optional = |values: &[String], i: usize| {
        values
            .get(i)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    cities
        .iter()
        .enumerate()
        .filter_map(|(i, city)| {
            let city = city.trim();
            if city.is_empty() {
                return None;
            }
            Some(TripEntry {
                city: city.to_string(),
                from: optional(froms, i),
                to: optional(tos, i),
            })
        })
        .collect()
}

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles")
});

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Validate submitted fields and build the entry to append.
pub fn build_entry(source: IntakeSource, mut fields: FormFields) -> Result<IntakeEntry, IntakeError> {
    let cities = fields.remove("city").unwrap_or_default();
    let froms = fields.remove("from").unwrap_or_default();
    let tos = fields.remove("to").unwrap_or_default();
    let trips = zip_trips(&cities, &froms, &tos);

    let first = |fields: &FormFields, key: &str| {
        fields
            .get(key)
            .and_then(|v| v.first())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let name = first(&fields, "name");
    let email = first(&fields, "email");
    let role = first(&fields, "role");
    let (Some(_), Some(email)) = (name, email) else {
        return Err(IntakeError::MissingFields);
    };
    if source == IntakeSource::Signup && role.is_none() {
        return Err(IntakeError::MissingFields);
    }
    if !is_valid_email(&email) {
        return Err(IntakeError::InvalidEmail);
    }

    let mut data = Map::new();
    for (key, values) in fields {
        let mut values: Vec<String> = values.into_iter().map(|v| v.trim().to_string()).collect();
        let value = if values.len() == 1 {
            Value::String(values.remove(0))
        } else {
            Value::Array(values.into_iter().map(Value::String).collect())
        };
        data.insert(key, value);
    }
    data.insert("email".into(), Value::String(email));

    if source == IntakeSource::Signup {
        let role: Role = role
            .as_deref()
            .unwrap_or_default()
            .parse()
            .map_err(|_| IntakeError::InvalidRole)?;
        data.insert("role".into(), Value::String(role.as_str().into()));
    }

    Ok(IntakeEntry {
        source,
        fields: data,
        trips,
        created_at: Utc::now(),
    })
}

fn collect_pairs(pairs: Vec<(String, String)>) -> FormFields {
    let mut fields = FormFields::new();
    for (key, value) in pairs {
        let key = key.strip_suffix("[]").unwrap_or(&key).to_string();
        fields.entry(key).or_default().push(value);
    }
    fields
}

fn collect_json(body: Map<String, Value>) -> Result<FormFields, ApiError> {
    let mut fields = FormFields::new();
    for (key, value) in body {
        let key = key.strip_suffix("[]").unwrap_or(&key).to_string();
        let values = match value {
            Value::String(s) => vec![s],
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s),
                    _ => Err(ApiError::BadRequest(format!("{} must hold strings", key))),
                })
                .collect::<Result<_, _>>()?,
            _ => {
                return Err(ApiError::BadRequest(format!(
                    "{} must be a string or string array",
                    key
                )));
            }
        };
        fields.entry(key).or_default().extend(values);
    }
    Ok(fields)
}

async fn append(state: &AppState, entry: IntakeEntry) -> Result<String, ApiError> {
    let source = entry.source;
    let id = run_db(state, move |db| db.append_intake(&entry)).await?;
    info!("Intake {} entry {}", source.collection(), id);
    Ok(id)
}

async fn submit_form(state: &AppState, source: IntakeSource, pairs: Vec<(String, String)>) -> Redirect {
    let outcome = match build_entry(source, collect_pairs(pairs)) {
        Ok(entry) => append(state, entry).await.map_err(|e| {
            error!("Failed to store {} entry: {}", source.collection(), e);
            IntakeError::Server
        }),
        Err(e) => Err(e),
    };

    let flag = match outcome {
        Ok(_) => "success=1".to_string(),
        Err(e) => format!("error={}", e.flag()),
    };
    let sep = if state.intake_redirect.contains('?') { '&' } else { '?' };
    Redirect::to(&format!("{}{}{}", state.intake_redirect, sep, flag))
}

async fn submit_json(
    state: &AppState,
    source: IntakeSource,
    body: Map<String, Value>,
) -> Result<Response, ApiError> {
    let entry = build_entry(source, collect_json(body)?)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let id = append(state, entry).await?;
    Ok((StatusCode::CREATED, Json(IntakeResponse { id })).into_response())
}

/// POST /waitlist
pub async fn waitlist_form(
    State(state): State<AppState>,
    Form(pairs): Form<Vec<(String, String)>>,
) -> Redirect {
    submit_form(&state, IntakeSource::Waitlist, pairs).await
}

/// POST /signup
pub async fn signup_form(
    State(state): State<AppState>,
    Form(pairs): Form<Vec<(String, String)>>,
) -> Redirect {
    submit_form(&state, IntakeSource::Signup, pairs).await
}

/// POST /api/waitlist
pub async fn waitlist_json(
    State(state): State<AppState>,
    body: Result<Json<Map<String, Value>>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    submit_json(&state, IntakeSource::Waitlist, body).await
}

/// POST /api/signup
pub async fn signup_json(
    State(state): State<AppState>,
    body: Result<Json<Map<String, Value>>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    submit_json(&state, IntakeSource::Signup, body).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn fields(pairs: &[(&str, &str)]) -> FormFields {
        collect_pairs(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn trips_with_blank_city_are_dropped() {
        let trips = zip_trips(
            &strings(&["Paris", "", ""]),
            &strings(&["2024-01-01", "2024-02-01", ""]),
            &[],
        );
        assert_eq!(
            trips,
            vec![TripEntry {
                city: "Paris".into(),
                from: Some("2024-01-01".into()),
                to: None,
            }]
        );
    }

    #[test]
    fn trips_tolerate_short_from_and_to() {
        let trips = zip_trips(
            &strings(&["Paris", " Lyon "]),
            &strings(&["2024-01-01"]),
            &strings(&["", "2024-03-01"]),
        );
        assert_eq!(trips.len(), 2);
        assert_eq!(trips[1].city, "Lyon");
        assert_eq!(trips[1].from, None);
        assert_eq!(trips[1].to.as_deref(), Some("2024-03-01"));
    }

    #[test]
    fn email_pattern() {
        for ok in ["a@b.co", "first.last@mail.example.com", "x+tag@d.io", "a@.b.c", "a@b..c"] {
            assert!(is_valid_email(ok), "{ok}");
        }
        for bad in ["", "ab.co", "a@b", "a@.co", "a@b.", "@b.co", "a b@c.de", "a@b@c.de"] {
            assert!(!is_valid_email(bad), "{bad}");
        }
    }

    #[test]
    fn waitlist_requires_name_and_email() {
        let err = build_entry(IntakeSource::Waitlist, fields(&[("email", "a@b.co")])).unwrap_err();
        assert_eq!(err, IntakeError::MissingFields);

        let err = build_entry(
            IntakeSource::Waitlist,
            fields(&[("name", "Ana"), ("email", "nope")]),
        )
        .unwrap_err();
        assert_eq!(err, IntakeError::InvalidEmail);
    }

    #[test]
    fn signup_checks_role() {
        let base = [("name", "Ana"), ("email", "a@b.co")];
        let err = build_entry(IntakeSource::Signup, fields(&base)).unwrap_err();
        assert_eq!(err, IntakeError::MissingFields);

        let mut with_role = base.to_vec();
        with_role.push(("role", "agency"));
        let err = build_entry(IntakeSource::Signup, fields(&with_role)).unwrap_err();
        assert_eq!(err, IntakeError::InvalidRole);

        with_role.pop();
        with_role.push(("role", " Brand "));
        let entry = build_entry(IntakeSource::Signup, fields(&with_role)).unwrap();
        assert_eq!(entry.fields["role"], "brand");
    }

    #[test]
    fn entry_keeps_scalars_and_zips_trips() {
        let entry = build_entry(
            IntakeSource::Waitlist,
            fields(&[
                ("name", " Ana "),
                ("email", "a@b.co"),
                ("instagram", "@ana"),
                ("city[]", "Paris"),
                ("from[]", "2024-01-01"),
                ("city[]", ""),
                ("from[]", "2024-02-01"),
                ("interests[]", "food"),
                ("interests[]", "travel"),
            ]),
        )
        .unwrap();

        assert_eq!(entry.source, IntakeSource::Waitlist);
        assert_eq!(entry.fields["name"], "Ana");
        assert_eq!(entry.fields["instagram"], "@ana");
        assert_eq!(entry.fields["interests"], serde_json::json!(["food", "travel"]));
        assert!(!entry.fields.contains_key("city"));
        assert_eq!(entry.trips.len(), 1);
        assert_eq!(entry.trips[0].city, "Paris");
    }

    #[test]
    fn json_rejects_non_string_values() {
        let body: Map<String, Value> =
            serde_json::from_value(serde_json::json!({ "name": "Ana", "age": 3 })).unwrap();
        assert!(collect_json(body).is_err());

        let body: Map<String, Value> = serde_json::from_value(
            serde_json::json!({ "name": "Ana", "city[]": ["Paris", "Rome"] }),
        )
        .unwrap();
        let fields = collect_json(body).unwrap();
        assert_eq!(fields["city"], vec!["Paris", "Rome"]);
    }
}
