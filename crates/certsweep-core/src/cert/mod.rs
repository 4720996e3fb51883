//! Certificate field extraction.
//!
//! The fleet only needs a handful of X.509 fields: enough to identify
//! a certificate for duplicate suppression and to decide whether any
//! of its names falls under the configured domain suffix. Everything
//! else in the certificate is carried opaquely inside the `ct_entry`
//! blob.
//!
//! Certificates without an Extended Key Usage extension are rejected:
//! EKU has been mandatory for server certificates since 2020, and CT
//! logs contain OCSP responder certificates (often with malformed
//! extension structures) that the fleet must not ingest.

mod filter;
mod fingerprint;


use chrono::{DateTime, Utc};
use thiserror::Error;
use x509_parser::prelude::{FromDer, GeneralName, ParsedExtension, X509Certificate};

pub use filter::SuffixFilter;
pub use fingerprint::CertFingerprint;

/// The extracted fields of one certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertSummary {
    /// Issuer, by preference: organization, else common name, else the
    /// full distinguished name.
    pub issuer: String,

    /// Serial number as a canonical decimal string.
    pub serial_number: String,

    /// Start of validity, second resolution.
    pub not_before: DateTime<Utc>,

    /// End of validity, second resolution.
    pub not_after: DateTime<Utc>,

    /// Subject common name, when present.
    pub common_name: Option<String>,

    /// Union of subject CN and SAN DNS names, in certificate order.
    pub names: Vec<String>,
}

/// Errors produced while extracting certificate fields.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CertError {
    /// The DER could not be parsed as an X.509 certificate.
    #[error("certificate DER parse failed: {0}")]
    Der(String),

    /// The certificate has no Extended Key Usage extension.
    #[error("certificate has no extended key usage extension")]
    MissingExtendedKeyUsage,

    /// A validity bound does not map to a representable instant.
    #[error("certificate validity out of range")]
    InvalidValidity,
}

impl CertSummary {
    /// Extracts the summary fields from certificate DER.
    ///
    /// # Errors
    ///
    /// Returns [`CertError`] for unparseable DER, missing EKU, or an
    /// out-of-range validity period.
    pub fn parse(der: &[u8]) -> Result<Self, CertError> {
        let (_, cert) =
            X509Certificate::from_der(der).map_err(|err| CertError::Der(err.to_string()))?;

        let has_eku = cert
            .extensions()
            .iter()
            .any(|ext| matches!(ext.parsed_extension(), ParsedExtension::ExtendedKeyUsage(_)));
        if !has_eku {
            return Err(CertError::MissingExtendedKeyUsage);
        }

        let not_before = DateTime::from_timestamp(cert.validity().not_before.timestamp(), 0)
            .ok_or(CertError::InvalidValidity)?;
        let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
            .ok_or(CertError::InvalidValidity)?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|attr| attr.as_str().ok())
            .map(str::to_string);

        let mut names: Vec<String> = common_name.iter().cloned().collect();
        for ext in cert.extensions() {
            if let ParsedExtension::SubjectAlternativeName(san) = ext.parsed_extension() {
                for general_name in &san.general_names {
                    if let GeneralName::DNSName(dns) = general_name {
                        names.push((*dns).to_string());
                    }
                }
            }
        }

        Ok(Self {
            issuer: preferred_name_string(&cert),
            serial_number: cert.tbs_certificate.serial.to_str_radix(10),
            not_before,
            not_after,
            common_name,
            names,
        })
    }

    /// The 5-tuple identity used for duplicate suppression.
    #[must_use]
    pub fn fingerprint(&self) -> CertFingerprint {
        CertFingerprint {
            issuer: self.issuer.clone(),
            serial_number: self.serial_number.clone(),
            not_before: self.not_before.timestamp(),
            not_after: self.not_after.timestamp(),
            common_name: self.common_name.clone().unwrap_or_default(),
        }
    }
}

/// Issuer display preference: O, else CN, else the full DN.
fn preferred_name_string(cert: &X509Certificate<'_>) -> String {
    let issuer = cert.issuer();
    if let Some(org) = issuer
        .iter_organization()
        .next()
        .and_then(|attr| attr.as_str().ok())
    {
        return org.to_string();
    }
    if let Some(cn) = issuer
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
    {
        return cn.to_string();
    }
    issuer.to_string()
}
