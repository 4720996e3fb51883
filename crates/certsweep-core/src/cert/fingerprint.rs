//! Certificate identity for duplicate suppression.

use serde::{Deserialize, Serialize};

/// The 5-tuple deciding whether two uploads are the same certificate.
///
/// Serial numbers compare as canonical decimal strings, validity
/// bounds as Unix seconds (the wire carries nothing finer that the
/// fleet relies on), issuer and common name as exact byte strings. An
/// absent common name is the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CertFingerprint {
    /// Issuer string.
    pub issuer: String,
    /// Canonical decimal serial.
    pub serial_number: String,
    /// Start of validity, Unix seconds.
    pub not_before: i64,
    /// End of validity, Unix seconds.
    pub not_after: i64,
    /// Subject common name, empty when absent.
    pub common_name: String,
}
