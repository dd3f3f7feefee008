//! SQLite-backed sighting record store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{self, DbPool};
use crate::error::{ApiError, ApiResult, FieldError};

const MAX_NAME_LEN: usize = 200;

/// A recorded observation, owned by exactly one user.
#[derive(Debug, Clone, Serialize)]
pub struct Sighting {
    pub id: String,
    pub species: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scientific_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Owning user id. Assigned server-side, never from the request body.
    pub owner: String,
}

/// Creation request body. Note there is no owner field here — the owner
/// comes from the verified bearer token, which is what prevents identity
/// spoofing via the body.
#[derive(Debug, Default, Deserialize)]
pub struct NewSighting {
    #[serde(default)]
    pub species: String,
    #[serde(default)]
    pub scientific_name: Option<String>,
    /// RFC 3339 observation time; defaults to "now" when omitted.
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

pub struct SightingStore {
    pool: DbPool,
}

impl SightingStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Validate and insert a new sighting for `owner`.
    pub fn create(&self, owner: &str, new: &NewSighting) -> ApiResult<Sighting> {
        let mut fields = Vec::new();

        let species = new.species.trim();
        if species.is_empty() {
            fields.push(FieldError {
                field: "species",
                message: "species common name is required".into(),
            });
        } else if species.chars().count() > MAX_NAME_LEN {
            fields.push(FieldError {
                field: "species",
                message: format!("species name is limited to {MAX_NAME_LEN} characters"),
            });
        }

        let scientific_name = new
            .scientific_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if scientific_name.is_some_and(|s| s.chars().count() > MAX_NAME_LEN) {
            fields.push(FieldError {
                field: "scientific_name",
                message: format!("scientific name is limited to {MAX_NAME_LEN} characters"),
            });
        }

        let timestamp = match new.timestamp.as_deref().map(str::trim) {
            None | Some("") => Utc::now(),
            Some(raw) => match DateTime::parse_from_rfc3339(raw) {
                Ok(parsed) => parsed.with_timezone(&Utc),
                Err(_) => {
                    fields.push(FieldError {
                        field: "timestamp",
                        message: "timestamp must be RFC 3339, e.g. 2025-03-01T08:00:00Z".into(),
                    });
                    Utc::now()
                }
            },
        };

        // Checked independently so a 422 carries every bad field at once.
        if new.latitude.is_some_and(|lat| !(-90.0..=90.0).contains(&lat)) {
            fields.push(FieldError {
                field: "latitude",
                message: "latitude must be between -90 and 90".into(),
            });
        }
        if new.longitude.is_some_and(|lon| !(-180.0..=180.0).contains(&lon)) {
            fields.push(FieldError {
                field: "longitude",
                message: "longitude must be between -180 and 180".into(),
            });
        }
        if new.latitude.is_some() != new.longitude.is_some() {
            fields.push(FieldError {
                field: "latitude",
                message: "latitude and longitude must be provided together".into(),
            });
        }

        if !fields.is_empty() {
            return Err(ApiError::Validation(fields));
        }

        let sighting = Sighting {
            id: uuid::Uuid::new_v4().to_string(),
            species: species.to_owned(),
            scientific_name: scientific_name.map(ToOwned::to_owned),
            timestamp,
            latitude: new.latitude,
            longitude: new.longitude,
            notes: new.notes.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(ToOwned::to_owned),
            owner: owner.to_owned(),
        };

        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO sightings (id, species, scientific_name, timestamp, latitude, longitude, notes, user_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                sighting.id,
                sighting.species,
                sighting.scientific_name,
                db::format_ts(sighting.timestamp),
                sighting.latitude,
                sighting.longitude,
                sighting.notes,
                sighting.owner,
            ],
        )?;
        Ok(sighting)
    }

    /// All sightings owned by `owner`, newest observation first.
    pub fn list(&self, owner: &str) -> ApiResult<Vec<Sighting>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, species, scientific_name, timestamp, latitude, longitude, notes, user_id
             FROM sightings WHERE user_id = ?1
             ORDER BY timestamp DESC, id DESC",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![owner], SightingRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(SightingRow::into_sighting).collect()
    }

    /// Fetch one sighting, enforcing ownership.
    pub fn get(&self, owner: &str, id: &str) -> ApiResult<Sighting> {
        let sighting = self.find(id)?.ok_or(ApiError::NotFound("sighting"))?;
        authorize_owner(owner, sighting)
    }

    /// Delete one sighting, enforcing ownership. A repeat delete reports
    /// not-found rather than failing loudly.
    pub fn delete(&self, owner: &str, id: &str) -> ApiResult<()> {
        let sighting = self.find(id)?.ok_or(ApiError::NotFound("sighting"))?;
        let sighting = authorize_owner(owner, sighting)?;

        let conn = self.pool.get()?;
        conn.execute(
            "DELETE FROM sightings WHERE id = ?1",
            rusqlite::params![sighting.id],
        )?;
        Ok(())
    }

    /// Lookup by id alone, no ownership filter. Callers must run the
    /// result through `authorize_owner` before exposing it.
    fn find(&self, id: &str) -> ApiResult<Option<Sighting>> {
        let conn = self.pool.get()?;
        let row = conn.query_row(
            "SELECT id, species, scientific_name, timestamp, latitude, longitude, notes, user_id
             FROM sightings WHERE id = ?1",
            rusqlite::params![id],
            SightingRow::from_row,
        );
        match row {
            Ok(raw) => Ok(Some(raw.into_sighting()?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Row-ownership check. Runs on every request; never cache the outcome
/// across requests. The mismatch is distinguished here (and logged) but
/// renders externally like a missing record.
fn authorize_owner(owner: &str, sighting: Sighting) -> ApiResult<Sighting> {
    if sighting.owner != owner {
        tracing::info!(
            sighting_id = %sighting.id,
            requester = %owner,
            "ownership mismatch reported as not-found"
        );
        return Err(ApiError::OwnershipDenied);
    }
    Ok(sighting)
}

struct SightingRow {
    id: String,
    species: String,
    scientific_name: Option<String>,
    timestamp: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    notes: Option<String>,
    owner: String,
}

impl SightingRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(SightingRow {
            id: row.get(0)?,
            species: row.get(1)?,
            scientific_name: row.get(2)?,
            timestamp: row.get(3)?,
            latitude: row.get(4)?,
            longitude: row.get(5)?,
            notes: row.get(6)?,
            owner: row.get(7)?,
        })
    }

    fn into_sighting(self) -> ApiResult<Sighting> {
        Ok(Sighting {
            id: self.id,
            species: self.species,
            scientific_name: self.scientific_name,
            timestamp: db::parse_ts(&self.timestamp)?,
            latitude: self.latitude,
            longitude: self.longitude,
            notes: self.notes,
            owner: self.owner,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{NewUser, UserStore};
    use crate::config::PasswordPolicy;
    use crate::db::open_pool;
    use tempfile::TempDir;

    fn test_env() -> (SightingStore, UserStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(&dir.path().join("test.db")).unwrap();
        (
            SightingStore::new(pool.clone()),
            UserStore::new(pool, PasswordPolicy::default()),
            dir,
        )
    }

    fn owner(users: &UserStore, name: &str) -> String {
        users
            .register(&NewUser {
                username: name.into(),
                email: format!("{name}@wesleyan.edu"),
                password: "Crimson#2024".into(),
                orcid_id: None,
            })
            .unwrap()
            .id
    }

    fn cardinal_payload() -> NewSighting {
        NewSighting {
            species: "Northern Cardinal".into(),
            scientific_name: Some("Cardinalis cardinalis".into()),
            timestamp: Some("2025-03-01T08:00:00Z".into()),
            latitude: Some(41.5556),
            longitude: Some(-72.6558),
            notes: Some("Singing near Foss Hill".into()),
            ..Default::default()
        }
    }

    #[test]
    fn create_then_get_roundtrips_the_payload() {
        let (sightings, users, _dir) = test_env();
        let alice = owner(&users, "alice");

        let created = sightings.create(&alice, &cardinal_payload()).unwrap();
        let fetched = sightings.get(&alice, &created.id).unwrap();

        assert_eq!(fetched.species, "Northern Cardinal");
        assert_eq!(fetched.scientific_name.as_deref(), Some("Cardinalis cardinalis"));
        assert_eq!(fetched.timestamp.to_rfc3339(), "2025-03-01T08:00:00+00:00");
        assert_eq!(fetched.latitude, Some(41.5556));
        assert_eq!(fetched.longitude, Some(-72.6558));
        assert_eq!(fetched.owner, alice);
    }

    #[test]
    fn owner_comes_from_identity_not_payload() {
        let (sightings, users, _dir) = test_env();
        let alice = owner(&users, "alice");

        // NewSighting has no owner field at all; whatever extra JSON a
        // client sends cannot reach the owner column.
        let created = sightings.create(&alice, &cardinal_payload()).unwrap();
        assert_eq!(created.owner, alice);
    }

    #[test]
    fn list_is_owner_scoped_and_newest_first() {
        let (sightings, users, _dir) = test_env();
        let alice = owner(&users, "alice");
        let bob = owner(&users, "bob");

        for (species, ts) in [
            ("American Robin", "2025-03-01T07:00:00Z"),
            ("Blue Jay", "2025-03-02T09:30:00Z"),
            ("Mourning Dove", "2025-03-01T18:15:00Z"),
        ] {
            sightings
                .create(
                    &alice,
                    &NewSighting {
                        species: species.into(),
                        timestamp: Some(ts.into()),
                        ..Default::default()
                    },
                )
                .unwrap();
        }

        let listed = sightings.list(&alice).unwrap();
        let names: Vec<&str> = listed.iter().map(|s| s.species.as_str()).collect();
        assert_eq!(names, ["Blue Jay", "Mourning Dove", "American Robin"]);

        // A freshly registered user sees nothing.
        assert!(sightings.list(&bob).unwrap().is_empty());
    }

    #[test]
    fn cross_owner_access_looks_like_not_found() {
        let (sightings, users, _dir) = test_env();
        let alice = owner(&users, "alice");
        let bob = owner(&users, "bob");

        let created = sightings.create(&alice, &cardinal_payload()).unwrap();

        assert!(matches!(
            sightings.get(&bob, &created.id),
            Err(ApiError::OwnershipDenied)
        ));
        assert!(matches!(
            sightings.delete(&bob, &created.id),
            Err(ApiError::OwnershipDenied)
        ));
        // The record is untouched for its owner.
        assert!(sightings.get(&alice, &created.id).is_ok());
    }

    #[test]
    fn delete_is_idempotent_in_failure() {
        let (sightings, users, _dir) = test_env();
        let alice = owner(&users, "alice");
        let created = sightings.create(&alice, &cardinal_payload()).unwrap();

        sightings.delete(&alice, &created.id).unwrap();
        assert!(matches!(
            sightings.delete(&alice, &created.id),
            Err(ApiError::NotFound("sighting"))
        ));
        assert!(matches!(
            sightings.get(&alice, &created.id),
            Err(ApiError::NotFound("sighting"))
        ));
    }

    #[test]
    fn blank_species_is_rejected() {
        let (sightings, users, _dir) = test_env();
        let alice = owner(&users, "alice");
        let err = sightings
            .create(
                &alice,
                &NewSighting {
                    species: "   ".into(),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn unparseable_timestamp_is_rejected() {
        let (sightings, users, _dir) = test_env();
        let alice = owner(&users, "alice");
        let err = sightings
            .create(
                &alice,
                &NewSighting {
                    species: "Northern Cardinal".into(),
                    timestamp: Some("yesterday at dawn".into()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        match err {
            ApiError::Validation(fields) => {
                assert!(fields.iter().any(|f| f.field == "timestamp"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn missing_timestamp_defaults_to_now() {
        let (sightings, users, _dir) = test_env();
        let alice = owner(&users, "alice");
        let before = Utc::now();
        let created = sightings
            .create(
                &alice,
                &NewSighting {
                    species: "Carolina Wren".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(created.timestamp >= before);
    }

    #[test]
    fn out_of_range_or_unpaired_coordinates_are_rejected() {
        let (sightings, users, _dir) = test_env();
        let alice = owner(&users, "alice");

        for (lat, lon) in [
            (Some(91.0), Some(0.0)),
            (Some(0.0), Some(-181.0)),
            (Some(41.5), None),
            (None, Some(-72.6)),
        ] {
            let err = sightings
                .create(
                    &alice,
                    &NewSighting {
                        species: "Song Sparrow".into(),
                        latitude: lat,
                        longitude: lon,
                        ..Default::default()
                    },
                )
                .unwrap_err();
            assert!(matches!(err, ApiError::Validation(_)), "{lat:?}/{lon:?}");
        }
    }

    #[test]
    fn coordinate_errors_are_reported_completely() {
        let (sightings, users, _dir) = test_env();
        let alice = owner(&users, "alice");

        // Both halves out of range: both fields appear in the detail.
        let err = sightings
            .create(
                &alice,
                &NewSighting {
                    species: "Song Sparrow".into(),
                    latitude: Some(91.0),
                    longitude: Some(-181.0),
                    ..Default::default()
                },
            )
            .unwrap_err();
        match err {
            ApiError::Validation(fields) => {
                assert!(fields.iter().any(|f| f.field == "latitude"));
                assert!(fields.iter().any(|f| f.field == "longitude"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }

        // Out of range and unpaired: both the range and the pairing
        // complaints are present.
        let err = sightings
            .create(
                &alice,
                &NewSighting {
                    species: "Song Sparrow".into(),
                    latitude: Some(91.0),
                    ..Default::default()
                },
            )
            .unwrap_err();
        match err {
            ApiError::Validation(fields) => {
                assert_eq!(fields.iter().filter(|f| f.field == "latitude").count(), 2);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}
