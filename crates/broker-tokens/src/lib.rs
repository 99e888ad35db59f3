//! Signed claim-sets for the trustbroker protocol.
//!
//! Three credentials share one wire format:
//! `base64url(canonical-JSON claims) + "." + base64url(ed25519 signature)`.
//!
//! - **Consent tokens**: signed by the data owner's registered device key,
//!   proving the owner approves one specific request. Carry a mandatory
//!   `jti` consumed exactly once (replay protection lives in the store, not
//!   here).
//! - **Owner assertions**: same format, used for denial, where no `jti`
//!   consumption is needed.
//! - **Access tokens**: minted by the broker on approval, presented by the
//!   requester directly to the provider, introspected back through the
//!   broker. Short absolute expiry and an explicit audience equal to the
//!   provider's id.

mod access;
mod claims;
mod consent;

pub use access::{issue_access_token, introspect_access_token, AccessTokenParams};
pub use claims::{decode_and_verify, encode, Claims, TokenError};
pub use consent::{verify_consent_token, verify_owner_assertion, ConsentToken};
