//! Validated identifier types shared by every routing component
//!
//! Values are validated once at the boundary (configuration, request
//! context construction) so the routing core never has to re-check them.

use nutype::nutype;
use std::fmt;

/// Name of a special region that every provider and rule treats as "anywhere"
pub const GLOBAL_REGION: &str = "global";

/// Upstream provider name (openai, anthropic, bedrock, ...)
#[nutype(
    sanitize(trim, lowercase),
    validate(not_empty, len_char_max = 100, regex = r"^[a-z0-9][a-z0-9._-]*$"),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Serialize,
        Deserialize,
        AsRef,
        Display
    )
)]
pub struct ProviderName(String);

/// Model identifier as requested by the client
///
/// Limited to 200 characters, matching the longest model identifiers seen
/// across providers with room to spare.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 200),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        AsRef,
        Display
    )
)]
pub struct ModelName(String);

/// Tenant (team) identifier, the unit of concurrency budgeting
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 200),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        AsRef,
        Display
    )
)]
pub struct TenantId(String);

/// End-user identifier within a tenant
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 200),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        AsRef,
        Display
    )
)]
pub struct UserId(String);

/// Routing rule identifier
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 128),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        AsRef,
        Display
    )
)]
pub struct RuleId(String);

/// Data-residency region (eu-west, us-east, ...)
#[nutype(
    sanitize(trim, lowercase),
    validate(not_empty, len_char_max = 64),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        AsRef,
        Display
    )
)]
pub struct Region(String);

impl Region {
    /// Whether this is the catch-all region that bypasses residency filtering
    pub fn is_global(&self) -> bool {
        self.as_ref() == GLOBAL_REGION
    }
}

/// API key presented by the client (secured)
#[nutype(
    validate(not_empty),
    derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, AsRef)
)]
pub struct ApiKey(String);

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKey(***)")
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "***")
    }
}
