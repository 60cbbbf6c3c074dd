use core::fmt::{self, Debug};

use asn1::ParseError;
use chrono::{DateTime, Utc};

use crate::{AuthorizationListKind, AuthorizationTag, LOG_TARGET};

/// Errors surfaced to callers of an [AttestationStatement](crate::AttestationStatement).
///
/// Structural errors ([Error::ExtensionMissing], [Error::Decode]) and semantic verification failures
/// ([Error::ChallengeMismatch], [Error::CertificateVerification]) are kept apart, since callers
/// usually reject a request on the latter but alert on the former.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The attestation certificate carries no key attestation extension.
    #[error("key attestation extension is missing from the attestation certificate")]
    ExtensionMissing,
    /// A certificate or the attestation extension payload could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// The supplied challenge differs from the attested one.
    #[error("attestation challenge does not match")]
    ChallengeMismatch,
    /// The certificate chain did not verify against the trusted roots.
    #[error(transparent)]
    CertificateVerification(#[from] CertificateVerificationError),
    /// A statement needs at least the attestation certificate.
    #[error("certificate chain is empty")]
    EmptyChain,
}

impl Error {
    /// Consume given error `e` with `self` and generate a native log entry with error details.
    pub fn log_error(self, e: impl Debug) -> Self {
        log::error!(target: LOG_TARGET, "[{:?}] error: {:?}", self, e);
        self
    }

    /// Consume given error `e` with `self` and generate a native log entry with error details.
    pub fn log_debug(self, e: impl Debug) -> Self {
        log::debug!(target: LOG_TARGET, "[{:?}] error: {:?}", self, e);
        self
    }
}

/// A malformed or schema-violating encoding, together with where it was found.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to decode {location}: {kind}")]
pub struct DecodeError {
    pub location: DecodeLocation,
    pub kind: DecodeErrorKind,
}

impl DecodeError {
    pub fn new(location: DecodeLocation, kind: DecodeErrorKind) -> Self {
        Self { location, kind }
    }

    pub(crate) fn malformed(location: DecodeLocation, error: ParseError) -> Self {
        Self::new(location, DecodeErrorKind::Malformed(error.to_string()))
    }

    /// The authorization tag the error was raised for, if any.
    pub fn tag(&self) -> Option<AuthorizationTag> {
        match self.location {
            DecodeLocation::AuthorizationList { tag, .. } => tag,
            _ => None,
        }
    }
}

/// Where in the input a [DecodeError] was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeLocation {
    /// A certificate of the chain, by position (leaf first).
    Certificate { index: usize },
    /// The extension payload as a whole, before any field could be read.
    Extension,
    /// A positional field of the key description.
    KeyDescription { field: &'static str },
    /// An authorization list; `tag` is `None` if the list itself is malformed.
    AuthorizationList { list: AuthorizationListKind, tag: Option<AuthorizationTag> },
    /// A positional field of the root of trust.
    RootOfTrust { list: AuthorizationListKind, field: &'static str },
    /// The nested attestation application id structure.
    AttestationApplicationId,
}

impl fmt::Display for DecodeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Certificate { index } => write!(f, "certificate {}", index),
            Self::Extension => write!(f, "key attestation extension"),
            Self::KeyDescription { field } => write!(f, "key description field `{}`", field),
            Self::AuthorizationList { list, tag: None } => write!(f, "{} authorization list", list),
            Self::AuthorizationList { list, tag: Some(tag) } => {
                write!(f, "{} authorization list tag {}", list, tag)
            }
            Self::RootOfTrust { list, field } => {
                write!(f, "{} root of trust field `{}`", list, field)
            }
            Self::AttestationApplicationId => write!(f, "attestation application id"),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// The DER encoding is invalid or does not have the expected shape.
    #[error("{0}")]
    Malformed(String),
    /// A well-formed element carries a different type than the field requires.
    #[error("unexpected element shape")]
    UnexpectedShape,
    /// An integer does not map to any known value of the field's enumeration.
    #[error("unknown enumeration value {0}")]
    UnknownEnumValue(i64),
    /// An integer does not fit the field's range.
    #[error("integer {0} out of range")]
    IntegerOutOfRange(i64),
    /// Milliseconds since epoch that do not denote a representable instant.
    #[error("invalid timestamp {0}")]
    InvalidTimestamp(i64),
}

/// Failure of [ChainVerifier::verify](crate::ChainVerifier::verify), naming the offending certificate.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub struct CertificateVerificationError {
    pub certificate: Option<CertificatePosition>,
    pub reason: VerificationFailure,
}

impl CertificateVerificationError {
    pub fn new(certificate: Option<CertificatePosition>, reason: VerificationFailure) -> Self {
        Self { certificate, reason }
    }

    pub fn at(certificate: CertificatePosition, reason: VerificationFailure) -> Self {
        Self::new(Some(certificate), reason)
    }

    /// Consume given error `e` with `self` and generate a native log entry with error details.
    pub fn log_debug(self, e: impl Debug) -> Self {
        log::debug!(target: LOG_TARGET, "[{:?}] error: {:?}", self, e);
        self
    }
}

impl fmt::Display for CertificateVerificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "certificate chain verification failed: {}", self.reason)?;
        if let Some(certificate) = self.certificate {
            write!(f, " ({})", certificate)?;
        }
        Ok(())
    }
}

/// Identifies a certificate taking part in a chain verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificatePosition {
    /// Index into the statement's chain, leaf first.
    Chain(usize),
    /// Index into the supplied trusted roots.
    Root(usize),
}

impl fmt::Display for CertificatePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chain(index) => write!(f, "chain certificate {}", index),
            Self::Root(index) => write!(f, "root certificate {}", index),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationFailure {
    /// No trusted roots were supplied.
    #[error("no trusted root certificates")]
    NoTrustedRoots,
    /// The chain to verify is empty.
    #[error("certificate chain is empty")]
    EmptyChain,
    /// The certificate chain is too long.
    #[error("chain has {length} certificates, at most {max} are accepted")]
    ChainTooLong { length: usize, max: usize },
    /// The encoded certificate exceeds the configured size.
    #[error("certificate has {length} bytes, at most {max} are accepted")]
    CertificateTooLarge { length: usize, max: usize },
    /// No path leads from the leaf to one of the trusted roots.
    #[error("unable to find a trusted root for the issuer")]
    UntrustedRoot,
    /// An issuing certificate is not marked as certificate authority.
    #[error("issuer is not a certificate authority")]
    NotCertificateAuthority,
    /// The leaf is marked as certificate authority.
    #[error("certificate authority used as end entity")]
    CaUsedAsEndEntity,
    /// The key usage of an issuing certificate lacks `keyCertSign`.
    #[error("issuer key usage does not allow signing certificates")]
    KeyCertSignNotAllowed,
    /// A basic constraints path length is exceeded by the certificate authorities below it.
    #[error("path length constraint exceeded")]
    PathLengthExceeded,
    /// A certificate carries a critical extension that is not understood.
    #[error("unsupported critical extension")]
    UnsupportedCriticalExtension,
    /// Specified signature algorithms do not match.
    ///
    /// The signature field in the sequence
    /// [tbsCertificate](https://www.rfc-editor.org/rfc/rfc5280#section-4.1.2.3)
    /// MUST contain the same algorithm identifier as the signatureAlgorithm
    /// field in the sequence
    /// [Certificate](https://www.rfc-editor.org/rfc/rfc5280#section-4.1.1.2).
    #[error("signature algorithm differs from the one in the signed payload")]
    SignatureAlgorithmMismatch,
    /// Signature Algorithm is not supported
    #[error("unsupported signature algorithm")]
    UnsupportedSignatureAlgorithm,
    /// Signature is invalid
    #[error("invalid signature")]
    InvalidSignature,
    /// The reference time lies before the certificate's validity window.
    #[error("certificate is not valid before {not_before}")]
    NotYetValid { not_before: DateTime<Utc> },
    /// The reference time lies after the certificate's validity window.
    #[error("certificate expired at {not_after}")]
    Expired { not_after: DateTime<Utc> },
    /// The certificate's serial number is listed as revoked.
    #[error("certificate with serial number {serial_number} is revoked")]
    Revoked { serial_number: String },
    /// Any other path validation error, by its debug representation.
    #[error("path validation failed: {0}")]
    Rejected(String),
}
