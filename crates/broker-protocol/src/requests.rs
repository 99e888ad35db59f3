//! Data-request persistence and the guarded-transition primitive.
//!
//! Every status change goes through a compare-and-swap `UPDATE ... WHERE id
//! = ? AND status = ?`. Zero rows changed means another caller moved the
//! request first; the current status is re-read and reported, never
//! clobbered.

use crate::machine::is_valid_transition;
use crate::store::{ts_column, ts_string};
use crate::ProtocolError;
use broker_types::{DataRequest, RequestStatus};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

fn row_to_request(row: &Row<'_>) -> rusqlite::Result<DataRequest> {
    let status_raw: String = row.get(6)?;
    let fields_raw: String = row.get(8)?;
    Ok(DataRequest {
        id: row.get(0)?,
        requester_id: row.get(1)?,
        provider_id: row.get(2)?,
        data_owner_id: row.get(3)?,
        schema_id: row.get(4)?,
        relationship_id: row.get(5)?,
        status: RequestStatus::parse(&status_raw).unwrap_or(RequestStatus::Failed),
        consent_token_jti: row.get(7)?,
        requested_fields: serde_json::from_str(&fields_raw).unwrap_or_default(),
        expires_at: ts_column(row, 9)?,
        failure_reason: row.get(10)?,
        data_hash: row.get(11)?,
        created_at: ts_column(row, 12)?,
        updated_at: ts_column(row, 13)?,
    })
}

const REQUEST_COLS: &str = "id, requester_id, provider_id, data_owner_id, schema_id, \
     relationship_id, status, consent_token_jti, requested_fields_json, expires_at, \
     failure_reason, data_hash, created_at, updated_at";

pub(crate) fn insert_request(
    conn: &Connection,
    request: &DataRequest,
) -> Result<(), ProtocolError> {
    conn.execute(
        "INSERT INTO data_requests
             (id, requester_id, provider_id, data_owner_id, schema_id, relationship_id,
              status, consent_token_jti, requested_fields_json, expires_at,
              failure_reason, data_hash, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            request.id,
            request.requester_id,
            request.provider_id,
            request.data_owner_id,
            request.schema_id,
            request.relationship_id,
            request.status.as_str(),
            request.consent_token_jti,
            serde_json::to_string(&request.requested_fields)
                .unwrap_or_else(|_| "[]".to_string()),
            ts_string(request.expires_at),
            request.failure_reason,
            request.data_hash,
            ts_string(request.created_at),
            ts_string(request.updated_at),
        ],
    )?;
    Ok(())
}

/// Loads a request by id.
pub fn get_request(conn: &Connection, id: &str) -> Result<DataRequest, ProtocolError> {
    conn.query_row(
        &format!("SELECT {REQUEST_COLS} FROM data_requests WHERE id = ?1"),
        [id],
        row_to_request,
    )
    .optional()?
    .ok_or(ProtocolError::NotFound("data request"))
}

/// The guarded-transition primitive.
///
/// Validates the edge against the transition table, then compare-and-swaps
/// the status. If the row no longer holds `from`, the current status is
/// re-read and returned inside [`ProtocolError::InvalidTransition`] — this
/// closes the race where two callers each believe the request is still in
/// the prior state.
pub(crate) fn cas_status(
    conn: &Connection,
    id: &str,
    from: RequestStatus,
    to: RequestStatus,
    failure_reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), ProtocolError> {
    if !is_valid_transition(from, to) {
        return Err(ProtocolError::InvalidTransition { current: from });
    }

    let changed = conn.execute(
        "UPDATE data_requests
         SET status = ?3, updated_at = ?4,
             failure_reason = COALESCE(?5, failure_reason)
         WHERE id = ?1 AND status = ?2",
        params![id, from.as_str(), to.as_str(), ts_string(now), failure_reason],
    )?;

    if changed == 0 {
        let current = get_request(conn, id)?.status;
        return Err(ProtocolError::InvalidTransition { current });
    }

    tracing::info!(
        request_id = id,
        from = from.as_str(),
        to = to.as_str(),
        "data request transitioned"
    );
    Ok(())
}

/// Lazy expiry: moves a due request to EXPIRED before any other guard runs.
///
/// Returns the request with its effective status. A concurrent transition
/// losing the race here is fine — the re-read picks up whichever write won.
pub fn expire_if_due(
    conn: &Connection,
    request: DataRequest,
    now: DateTime<Utc>,
) -> Result<DataRequest, ProtocolError> {
    if request.status.is_terminal() || now <= request.expires_at {
        return Ok(request);
    }

    match cas_status(
        conn,
        &request.id,
        request.status,
        RequestStatus::Expired,
        Some("expiry deadline passed"),
        now,
    ) {
        Ok(()) => {}
        // Someone else transitioned first; the re-read below reflects it.
        Err(ProtocolError::InvalidTransition { .. }) => {}
        Err(e) => return Err(e),
    }

    get_request(conn, &request.id)
}

/// Atomically records the consent-token identifier and approves the request.
///
/// The UNIQUE constraint on `consent_token_jti` makes the replay check and
/// the write a single atomic step: a second submission of the same token —
/// even against a different request — hits the constraint and maps to
/// [`ProtocolError::TokenAlreadyUsed`].
pub(crate) fn approve_with_jti(
    conn: &Connection,
    id: &str,
    jti: &str,
    now: DateTime<Utc>,
) -> Result<(), ProtocolError> {
    let result = conn.execute(
        "UPDATE data_requests
         SET status = 'APPROVED', consent_token_jti = ?2, updated_at = ?3
         WHERE id = ?1 AND status = 'AWAITING_CONSENT' AND consent_token_jti IS NULL",
        params![id, jti, ts_string(now)],
    );

    match result {
        Ok(0) => {
            let current = get_request(conn, id)?.status;
            Err(ProtocolError::InvalidTransition { current })
        }
        Ok(_) => {
            tracing::info!(request_id = id, "consent recorded, request approved");
            Ok(())
        }
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            Err(ProtocolError::TokenAlreadyUsed)
        }
        Err(e) => Err(ProtocolError::Db(e)),
    }
}

/// Records a delivery: provider signature verified by the caller, content
/// hash persisted, VERIFIED -> DELIVERED.
pub(crate) fn deliver_with_hash(
    conn: &Connection,
    id: &str,
    data_hash: &str,
    now: DateTime<Utc>,
) -> Result<(), ProtocolError> {
    let changed = conn.execute(
        "UPDATE data_requests
         SET status = 'DELIVERED', data_hash = ?2, updated_at = ?3
         WHERE id = ?1 AND status = 'VERIFIED' AND data_hash IS NULL",
        params![id, data_hash, ts_string(now)],
    )?;
    if changed == 0 {
        let current = get_request(conn, id)?.status;
        return Err(ProtocolError::InvalidTransition { current });
    }
    tracing::info!(request_id = id, "delivery recorded");
    Ok(())
}

/// Moves a request to FAILED from whatever non-terminal state it is in,
/// recording the reason for audit. Idempotent against terminal states.
pub fn fail_request(
    conn: &Connection,
    id: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<(), ProtocolError> {
    let changed = conn.execute(
        "UPDATE data_requests
         SET status = 'FAILED', failure_reason = ?2, updated_at = ?3
         WHERE id = ?1
           AND status NOT IN ('COMPLETED', 'DENIED', 'FAILED', 'EXPIRED')",
        params![id, reason, ts_string(now)],
    )?;
    if changed > 0 {
        tracing::warn!(request_id = id, reason, "data request failed");
    }
    Ok(())
}

/// Periodic sweep: expires every overdue non-terminal request.
///
/// Strictly an optimization — lazy checks on access already guarantee the
/// observable semantics; this just keeps the table tidy between accesses.
pub fn sweep_expired(conn: &Connection, now: DateTime<Utc>) -> Result<usize, ProtocolError> {
    let changed = conn.execute(
        "UPDATE data_requests
         SET status = 'EXPIRED', failure_reason = 'expiry deadline passed', updated_at = ?1
         WHERE expires_at < ?1
           AND status NOT IN ('COMPLETED', 'DENIED', 'FAILED', 'EXPIRED')",
        params![ts_string(now)],
    )?;
    Ok(changed)
}
