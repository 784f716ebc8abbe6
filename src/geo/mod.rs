//! Geographic routing and data-residency enforcement
//!
//! Client addresses are classified into regions by an ordered list of CIDR
//! rules; candidate providers are then filtered down to those certified for
//! the resolved region.

pub mod cidr;
pub mod router;

pub use cidr::{parse_client_ip, Cidr, CidrParseError};
pub use router::{
    GeoConfig, GeoConfigError, GeoRouter, GeoRoutingDecision, GeoRule, ProviderRegion,
};
