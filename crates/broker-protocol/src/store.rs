//! Repositories for reference data: roles, institutions, users, schemas,
//! and relationships.
//!
//! Plain `rusqlite` over the pooled connection the caller hands in. Every
//! uniqueness rule lives in the schema; constraint violations are mapped to
//! domain errors here.

use crate::ProtocolError;
use broker_types::{
    DataSchema, Institution, InstitutionStatus, Relationship, RelationshipStatus, RequestSignature,
    Role, SignerRole, User,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use uuid::Uuid;

/// Parses an RFC 3339 timestamp column.
pub(crate) fn ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Serializes a timestamp for storage. Seconds precision, UTC `Z` suffix —
/// the same normalization used in signed transaction payloads.
pub(crate) fn ts_string(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

// ---------------------------------------------------------------------------
// Roles

pub fn create_role(conn: &Connection, name: &str) -> Result<Role, ProtocolError> {
    if name.trim().is_empty() {
        return Err(ProtocolError::Validation("role name cannot be empty".into()));
    }
    let role = Role {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
    };
    conn.execute(
        "INSERT INTO roles (id, name) VALUES (?1, ?2)",
        params![role.id, role.name],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            ProtocolError::Validation(format!("role '{}' already exists", name))
        } else {
            ProtocolError::Db(e)
        }
    })?;
    Ok(role)
}

pub fn get_role(conn: &Connection, id: &str) -> Result<Role, ProtocolError> {
    conn.query_row(
        "SELECT id, name FROM roles WHERE id = ?1",
        [id],
        |row| {
            Ok(Role {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        },
    )
    .optional()?
    .ok_or(ProtocolError::NotFound("role"))
}

// ---------------------------------------------------------------------------
// Institutions

/// Input for institution creation (administrator operation).
#[derive(Debug, Clone)]
pub struct NewInstitution {
    pub name: String,
    pub role_id: String,
    /// Hex-encoded Ed25519 verifying key.
    pub public_key: String,
    pub client_id: String,
    pub api_endpoint: String,
}

fn row_to_institution(row: &Row<'_>) -> rusqlite::Result<Institution> {
    let status_raw: String = row.get(6)?;
    Ok(Institution {
        id: row.get(0)?,
        name: row.get(1)?,
        role_id: row.get(2)?,
        public_key: row.get(3)?,
        client_id: row.get(4)?,
        api_endpoint: row.get(5)?,
        status: InstitutionStatus::parse(&status_raw).unwrap_or(InstitutionStatus::Suspended),
        created_at: ts_column(row, 7)?,
    })
}

const INSTITUTION_COLS: &str =
    "id, name, role_id, public_key, client_id, api_endpoint, status, created_at";

pub fn create_institution(
    conn: &Connection,
    input: &NewInstitution,
    now: DateTime<Utc>,
) -> Result<Institution, ProtocolError> {
    // Reject unusable keys up front; a typo here would lock the institution
    // out of every M2M call.
    broker_crypto::parse_verifying_key_hex(&input.public_key)?;
    get_role(conn, &input.role_id)?;

    let institution = Institution {
        id: Uuid::new_v4().to_string(),
        name: input.name.clone(),
        role_id: input.role_id.clone(),
        public_key: input.public_key.clone(),
        client_id: input.client_id.clone(),
        api_endpoint: input.api_endpoint.clone(),
        status: InstitutionStatus::Pending,
        created_at: now,
    };

    conn.execute(
        "INSERT INTO institutions (id, name, role_id, public_key, client_id, api_endpoint, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            institution.id,
            institution.name,
            institution.role_id,
            institution.public_key,
            institution.client_id,
            institution.api_endpoint,
            institution.status.as_str(),
            ts_string(now),
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            ProtocolError::Validation(format!("client id '{}' already registered", input.client_id))
        } else {
            ProtocolError::Db(e)
        }
    })?;

    Ok(institution)
}

pub fn get_institution(conn: &Connection, id: &str) -> Result<Institution, ProtocolError> {
    conn.query_row(
        &format!("SELECT {INSTITUTION_COLS} FROM institutions WHERE id = ?1"),
        [id],
        row_to_institution,
    )
    .optional()?
    .ok_or(ProtocolError::NotFound("institution"))
}

/// Resolves an institution from its M2M client identifier.
pub fn find_institution_by_client_id(
    conn: &Connection,
    client_id: &str,
) -> Result<Option<Institution>, ProtocolError> {
    Ok(conn
        .query_row(
            &format!("SELECT {INSTITUTION_COLS} FROM institutions WHERE client_id = ?1"),
            [client_id],
            row_to_institution,
        )
        .optional()?)
}

/// Key rotation. The old key stops verifying immediately.
pub fn rotate_institution_key(
    conn: &Connection,
    id: &str,
    new_public_key: &str,
) -> Result<(), ProtocolError> {
    broker_crypto::parse_verifying_key_hex(new_public_key)?;
    let changed = conn.execute(
        "UPDATE institutions SET public_key = ?2 WHERE id = ?1",
        params![id, new_public_key],
    )?;
    if changed == 0 {
        return Err(ProtocolError::NotFound("institution"));
    }
    Ok(())
}

pub fn set_institution_status(
    conn: &Connection,
    id: &str,
    status: InstitutionStatus,
) -> Result<(), ProtocolError> {
    let changed = conn.execute(
        "UPDATE institutions SET status = ?2 WHERE id = ?1",
        params![id, status.as_str()],
    )?;
    if changed == 0 {
        return Err(ProtocolError::NotFound("institution"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Users (data owners)

/// Input for user registration.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub external_id: String,
    pub federated_subject: Option<String>,
    /// Hex-encoded Ed25519 verifying key of the registered device.
    pub device_public_key: String,
    pub push_token: Option<String>,
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        external_id: row.get(1)?,
        federated_subject: row.get(2)?,
        device_public_key: row.get(3)?,
        push_token: row.get(4)?,
    })
}

const USER_COLS: &str = "id, external_id, federated_subject, device_public_key, push_token";

pub fn get_user(conn: &Connection, id: &str) -> Result<User, ProtocolError> {
    conn.query_row(
        &format!("SELECT {USER_COLS} FROM users WHERE id = ?1"),
        [id],
        row_to_user,
    )
    .optional()?
    .ok_or(ProtocolError::NotFound("data owner"))
}

pub fn find_user_by_external_id(
    conn: &Connection,
    external_id: &str,
) -> Result<Option<User>, ProtocolError> {
    Ok(conn
        .query_row(
            &format!("SELECT {USER_COLS} FROM users WHERE external_id = ?1"),
            [external_id],
            row_to_user,
        )
        .optional()?)
}

/// Resolves a user from a federated-identity exchange, creating the row on
/// first contact. The identity provider is the source of truth for the
/// external id and subject; the device key is registered alongside.
pub fn resolve_federated_user(
    conn: &Connection,
    input: &NewUser,
    now: DateTime<Utc>,
) -> Result<User, ProtocolError> {
    broker_crypto::parse_verifying_key_hex(&input.device_public_key)?;

    if let Some(existing) = find_user_by_external_id(conn, &input.external_id)? {
        // Re-registration updates the device key (device replacement) and
        // refreshes the push handle.
        conn.execute(
            "UPDATE users SET device_public_key = ?2, push_token = ?3 WHERE id = ?1",
            params![existing.id, input.device_public_key, input.push_token],
        )?;
        return Ok(User {
            device_public_key: input.device_public_key.clone(),
            push_token: input.push_token.clone(),
            ..existing
        });
    }

    let user = User {
        id: Uuid::new_v4().to_string(),
        external_id: input.external_id.clone(),
        federated_subject: input.federated_subject.clone(),
        device_public_key: input.device_public_key.clone(),
        push_token: input.push_token.clone(),
    };
    conn.execute(
        "INSERT INTO users (id, external_id, federated_subject, device_public_key, push_token, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            user.id,
            user.external_id,
            user.federated_subject,
            user.device_public_key,
            user.push_token,
            ts_string(now),
        ],
    )?;
    Ok(user)
}

// ---------------------------------------------------------------------------
// Data schemas

pub fn create_schema(
    conn: &Connection,
    schema_urn: &str,
    description: &str,
    parameters: &serde_json::Value,
) -> Result<DataSchema, ProtocolError> {
    if schema_urn.trim().is_empty() {
        return Err(ProtocolError::Validation("schema URN cannot be empty".into()));
    }
    let schema = DataSchema {
        id: Uuid::new_v4().to_string(),
        schema_urn: schema_urn.to_string(),
        description: description.to_string(),
        parameters: parameters.clone(),
    };
    conn.execute(
        "INSERT INTO data_schemas (id, schema_urn, description, parameters_json)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            schema.id,
            schema.schema_urn,
            schema.description,
            schema.parameters.to_string(),
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            ProtocolError::Validation(format!("schema '{}' already exists", schema_urn))
        } else {
            ProtocolError::Db(e)
        }
    })?;
    Ok(schema)
}

pub fn get_schema(conn: &Connection, id: &str) -> Result<DataSchema, ProtocolError> {
    conn.query_row(
        "SELECT id, schema_urn, description, parameters_json FROM data_schemas WHERE id = ?1",
        [id],
        |row| {
            let params_raw: String = row.get(3)?;
            Ok(DataSchema {
                id: row.get(0)?,
                schema_urn: row.get(1)?,
                description: row.get(2)?,
                parameters: serde_json::from_str(&params_raw)
                    .unwrap_or(serde_json::Value::Object(Default::default())),
            })
        },
    )
    .optional()?
    .ok_or(ProtocolError::NotFound("schema"))
}

/// Descriptive metadata is the only mutable part of a schema.
pub fn update_schema_description(
    conn: &Connection,
    id: &str,
    description: &str,
) -> Result<(), ProtocolError> {
    let changed = conn.execute(
        "UPDATE data_schemas SET description = ?2 WHERE id = ?1",
        params![id, description],
    )?;
    if changed == 0 {
        return Err(ProtocolError::NotFound("schema"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Relationships

fn row_to_relationship(row: &Row<'_>) -> rusqlite::Result<Relationship> {
    let status_raw: String = row.get(4)?;
    Ok(Relationship {
        id: row.get(0)?,
        requester_role_id: row.get(1)?,
        provider_role_id: row.get(2)?,
        schema_id: row.get(3)?,
        status: RelationshipStatus::parse(&status_raw).unwrap_or(RelationshipStatus::Revoked),
    })
}

const RELATIONSHIP_COLS: &str = "id, requester_role_id, provider_role_id, schema_id, status";

pub fn create_relationship(
    conn: &Connection,
    requester_role_id: &str,
    provider_role_id: &str,
    schema_id: &str,
    now: DateTime<Utc>,
) -> Result<Relationship, ProtocolError> {
    get_role(conn, requester_role_id)?;
    get_role(conn, provider_role_id)?;
    get_schema(conn, schema_id)?;

    let relationship = Relationship {
        id: Uuid::new_v4().to_string(),
        requester_role_id: requester_role_id.to_string(),
        provider_role_id: provider_role_id.to_string(),
        schema_id: schema_id.to_string(),
        status: RelationshipStatus::Pending,
    };
    conn.execute(
        "INSERT INTO relationships (id, requester_role_id, provider_role_id, schema_id, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            relationship.id,
            relationship.requester_role_id,
            relationship.provider_role_id,
            relationship.schema_id,
            relationship.status.as_str(),
            ts_string(now),
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            ProtocolError::Validation(
                "a relationship for this role/role/schema triple already exists".into(),
            )
        } else {
            ProtocolError::Db(e)
        }
    })?;
    Ok(relationship)
}

pub fn get_relationship(conn: &Connection, id: &str) -> Result<Relationship, ProtocolError> {
    conn.query_row(
        &format!("SELECT {RELATIONSHIP_COLS} FROM relationships WHERE id = ?1"),
        [id],
        row_to_relationship,
    )
    .optional()?
    .ok_or(ProtocolError::NotFound("relationship"))
}

pub fn list_relationships(conn: &Connection) -> Result<Vec<Relationship>, ProtocolError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RELATIONSHIP_COLS} FROM relationships ORDER BY created_at"
    ))?;
    let rows = stmt.query_map([], row_to_relationship)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// The relationship authorization check: the unique ACTIVE rule for this
/// exact (requester role, provider role, schema) triple, if any.
pub fn find_active_relationship(
    conn: &Connection,
    requester_role_id: &str,
    provider_role_id: &str,
    schema_id: &str,
) -> Result<Option<Relationship>, ProtocolError> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {RELATIONSHIP_COLS} FROM relationships
                 WHERE requester_role_id = ?1 AND provider_role_id = ?2
                   AND schema_id = ?3 AND status = 'ACTIVE'"
            ),
            params![requester_role_id, provider_role_id, schema_id],
            row_to_relationship,
        )
        .optional()?)
}

pub fn set_relationship_status(
    conn: &Connection,
    id: &str,
    status: RelationshipStatus,
) -> Result<(), ProtocolError> {
    let changed = conn.execute(
        "UPDATE relationships SET status = ?2 WHERE id = ?1",
        params![id, status.as_str()],
    )?;
    if changed == 0 {
        return Err(ProtocolError::NotFound("relationship"));
    }
    Ok(())
}

/// Deletes a relationship.
///
/// Refused while any data request references it through `relationship_id`,
/// unless the caller explicitly accepts orphaning those audit records with
/// `force`.
pub fn delete_relationship(
    conn: &Connection,
    id: &str,
    force: bool,
) -> Result<(), ProtocolError> {
    if !force {
        let referenced: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM data_requests WHERE relationship_id = ?1)",
            [id],
            |row| row.get(0),
        )?;
        if referenced {
            return Err(ProtocolError::RelationshipInUse);
        }
    }

    let changed = conn.execute("DELETE FROM relationships WHERE id = ?1", [id])?;
    if changed == 0 {
        return Err(ProtocolError::NotFound("relationship"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Signature log

pub(crate) fn append_signature(
    conn: &Connection,
    request_id: &str,
    role: SignerRole,
    signature: &str,
    now: DateTime<Utc>,
) -> Result<(), ProtocolError> {
    conn.execute(
        "INSERT INTO request_signatures (request_id, signer_role, signature, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![request_id, role.as_str(), signature, ts_string(now)],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            ProtocolError::Validation(format!(
                "a {} signature is already recorded for this request",
                role.as_str()
            ))
        } else {
            ProtocolError::Db(e)
        }
    })?;
    Ok(())
}

pub(crate) fn get_signature(
    conn: &Connection,
    request_id: &str,
    role: SignerRole,
) -> Result<Option<String>, ProtocolError> {
    Ok(conn
        .query_row(
            "SELECT signature FROM request_signatures WHERE request_id = ?1 AND signer_role = ?2",
            params![request_id, role.as_str()],
            |row| row.get(0),
        )
        .optional()?)
}

/// The full append-only signature log of a request, oldest first.
pub fn get_signatures(
    conn: &Connection,
    request_id: &str,
) -> Result<Vec<RequestSignature>, ProtocolError> {
    let mut stmt = conn.prepare(
        "SELECT request_id, signer_role, signature, created_at
         FROM request_signatures WHERE request_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map([request_id], |row| {
        let role_raw: String = row.get(1)?;
        Ok(RequestSignature {
            request_id: row.get(0)?,
            signer_role: SignerRole::parse(&role_raw).unwrap_or(SignerRole::Platform),
            signature: row.get(2)?,
            created_at: ts_column(row, 3)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}
