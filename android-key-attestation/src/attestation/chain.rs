use std::{collections::BTreeSet, time::Duration};

use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use webpki::types::{CertificateDer, SignatureVerificationAlgorithm, TrustAnchor, UnixTime};

use super::error::{CertificatePosition, CertificateVerificationError, VerificationFailure};
use crate::{Certificate, ConfigError, VerificationConfig, LOG_TARGET};

/// Signature algorithms found in attestation chains. ECDSA over P-521 is not supported by webpki.
static SUPPORTED_SIG_ALGS: &[&dyn SignatureVerificationAlgorithm] = &[
    webpki::ring::ECDSA_P256_SHA256,
    webpki::ring::ECDSA_P256_SHA384,
    webpki::ring::ECDSA_P384_SHA256,
    webpki::ring::ECDSA_P384_SHA384,
    webpki::ring::RSA_PKCS1_2048_8192_SHA256,
    webpki::ring::RSA_PKCS1_2048_8192_SHA384,
    webpki::ring::RSA_PKCS1_2048_8192_SHA512,
    webpki::ring::RSA_PKCS1_3072_8192_SHA384,
];

/// Verifies that a certificate chain builds up to one of the trusted roots at a given time.
pub trait ChainVerifier {
    /// Verifies `chain` (leaf first) against `roots` at `time`.
    fn verify(
        &self,
        chain: &[Certificate],
        roots: &[Certificate],
        time: DateTime<Utc>,
    ) -> Result<(), CertificateVerificationError>;
}

impl<F> ChainVerifier for F
where
    F: Fn(&[Certificate], &[Certificate], DateTime<Utc>) -> Result<(), CertificateVerificationError>,
{
    fn verify(
        &self,
        chain: &[Certificate],
        roots: &[Certificate],
        time: DateTime<Utc>,
    ) -> Result<(), CertificateVerificationError> {
        self(chain, roots, time)
    }
}

/// The default [ChainVerifier].
///
/// Path building, signatures, basic constraints, critical extensions and validity are left to
/// [webpki]. Size limits, revocation and the issuers' key usage are checked beforehand.
#[derive(Debug, Clone, Default)]
pub struct X509ChainVerifier {
    config: VerificationConfig,
    revoked: BTreeSet<BigInt>,
}

impl X509ChainVerifier {
    pub fn new(config: VerificationConfig) -> Result<Self, ConfigError> {
        let revoked = config.revoked_serials()?.into_iter().collect();
        Ok(Self { config, revoked })
    }

    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    fn check_limits(
        &self,
        index: usize,
        certificate: &Certificate,
    ) -> Result<(), CertificateVerificationError> {
        let position = CertificatePosition::Chain(index);
        let length = certificate.der().len();
        if length > self.config.max_certificate_length {
            return Err(CertificateVerificationError::at(
                position,
                VerificationFailure::CertificateTooLarge {
                    length,
                    max: self.config.max_certificate_length,
                },
            ));
        }
        if self.revoked.contains(&certificate.serial_number_value()) {
            return Err(CertificateVerificationError::at(
                position,
                VerificationFailure::Revoked { serial_number: certificate.serial_number_hex() },
            ));
        }
        Ok(())
    }
}

impl ChainVerifier for X509ChainVerifier {
    fn verify(
        &self,
        chain: &[Certificate],
        roots: &[Certificate],
        time: DateTime<Utc>,
    ) -> Result<(), CertificateVerificationError> {
        if roots.is_empty() {
            return Err(CertificateVerificationError::new(
                None,
                VerificationFailure::NoTrustedRoots,
            ));
        }
        let Some((leaf, intermediates)) = chain.split_first() else {
            return Err(CertificateVerificationError::new(None, VerificationFailure::EmptyChain));
        };
        if chain.len() > self.config.max_chain_length {
            return Err(CertificateVerificationError::new(
                None,
                VerificationFailure::ChainTooLong {
                    length: chain.len(),
                    max: self.config.max_chain_length,
                },
            ));
        }
        for (index, certificate) in chain.iter().enumerate() {
            self.check_limits(index, certificate)?;
        }
        // webpki ignores the key usage extension
        for (index, issuer) in chain.iter().enumerate().skip(1) {
            if !issuer.may_sign_certificates() {
                return Err(CertificateVerificationError::at(
                    CertificatePosition::Chain(index),
                    VerificationFailure::KeyCertSignNotAllowed,
                ));
            }
        }

        let root_ders: Vec<CertificateDer<'_>> =
            roots.iter().map(|root| CertificateDer::from(root.der())).collect();
        let anchors = root_ders
            .iter()
            .enumerate()
            .map(|(index, der)| {
                webpki::anchor_from_trusted_cert(der).map_err(|e| {
                    CertificateVerificationError::at(
                        CertificatePosition::Root(index),
                        VerificationFailure::Rejected(format!("{:?}", e)),
                    )
                })
            })
            .collect::<Result<Vec<TrustAnchor<'_>>, _>>()?;

        let leaf_der = CertificateDer::from(leaf.der());
        let end_entity = webpki::EndEntityCert::try_from(&leaf_der).map_err(|e| {
            let error = verification_error(e, chain, time);
            CertificateVerificationError::at(CertificatePosition::Chain(0), error.reason)
        })?;
        let intermediate_ders: Vec<CertificateDer<'_>> = intermediates
            .iter()
            .map(|certificate| CertificateDer::from(certificate.der()))
            .collect();

        let Ok(seconds) = u64::try_from(time.timestamp()) else {
            return Err(validity_failure(chain, time).unwrap_or_else(|| {
                CertificateVerificationError::new(
                    None,
                    VerificationFailure::Rejected("time before unix epoch".into()),
                )
            }));
        };

        // attestation leaves carry no extended key usage, which satisfies any required usage
        end_entity
            .verify_for_usage(
                SUPPORTED_SIG_ALGS,
                &anchors,
                &intermediate_ders,
                UnixTime::since_unix_epoch(Duration::from_secs(seconds)),
                webpki::KeyUsage::server_auth(),
                None,
                None,
            )
            .map_err(|e| {
                log::debug!(target: LOG_TARGET, "path validation failed: {:?}", e);
                verification_error(e, chain, time)
            })?;

        log::debug!(
            target: LOG_TARGET,
            "chain of {} certificates verified against {} roots",
            chain.len(),
            roots.len()
        );
        Ok(())
    }
}

/// Maps a webpki error onto a [VerificationFailure], locating the certificate where webpki
/// does not tell.
fn verification_error(
    error: webpki::Error,
    chain: &[Certificate],
    time: DateTime<Utc>,
) -> CertificateVerificationError {
    use webpki::Error;

    let reason = match error {
        Error::CertExpired { .. } | Error::CertNotValidYet { .. } => {
            if let Some(located) = validity_failure(chain, time) {
                return located;
            }
            VerificationFailure::Rejected(format!("{:?}", error))
        }
        Error::UnknownIssuer => VerificationFailure::UntrustedRoot,
        Error::InvalidSignatureForPublicKey => VerificationFailure::InvalidSignature,
        Error::SignatureAlgorithmMismatch => VerificationFailure::SignatureAlgorithmMismatch,
        Error::UnsupportedSignatureAlgorithm
        | Error::UnsupportedSignatureAlgorithmForPublicKey => {
            VerificationFailure::UnsupportedSignatureAlgorithm
        }
        Error::PathLenConstraintViolated => VerificationFailure::PathLengthExceeded,
        Error::UnsupportedCriticalExtension => VerificationFailure::UnsupportedCriticalExtension,
        Error::CaUsedAsEndEntity => {
            return CertificateVerificationError::at(
                CertificatePosition::Chain(0),
                VerificationFailure::CaUsedAsEndEntity,
            )
        }
        Error::EndEntityUsedAsCa => VerificationFailure::NotCertificateAuthority,
        other => VerificationFailure::Rejected(format!("{:?}", other)),
    };
    CertificateVerificationError::new(None, reason)
}

/// The first certificate of the chain, leaf first, that is not valid at `time`.
fn validity_failure(
    chain: &[Certificate],
    time: DateTime<Utc>,
) -> Option<CertificateVerificationError> {
    let (index, certificate) =
        chain.iter().enumerate().find(|(_, certificate)| !certificate.is_valid_at(time))?;
    let reason = if time < certificate.not_before() {
        VerificationFailure::NotYetValid { not_before: certificate.not_before() }
    } else {
        VerificationFailure::Expired { not_after: certificate.not_after() }
    };
    Some(CertificateVerificationError::at(CertificatePosition::Chain(index), reason))
}
