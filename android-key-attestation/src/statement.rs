use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};
use subtle::{Choice, ConstantTimeEq};

use crate::{
    decode_key_description, extract_attestation, AuthorizationList, Certificate, ChainVerifier,
    Error, KeyDescription, SecurityLevel, X509ChainVerifier, LOG_TARGET,
};

/// A key attestation: the attestation certificate followed by its issuers.
///
/// The [KeyDescription] is decoded on first access and cached, a decode failure is cached as well.
#[derive(Debug)]
pub struct AttestationStatement {
    certificates: Vec<Certificate>,
    key_description: OnceCell<Result<KeyDescription, Error>>,
}

impl AttestationStatement {
    /// Creates a statement from a chain ordered leaf first.
    pub fn new(certificates: Vec<Certificate>) -> Result<Self, Error> {
        if certificates.is_empty() {
            return Err(Error::EmptyChain);
        }
        Ok(Self { certificates, key_description: OnceCell::new() })
    }

    /// Decodes a DER encoded chain ordered leaf first.
    pub fn from_der<I, C>(chain: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = C>,
        C: Into<Vec<u8>>,
    {
        let certificates = chain
            .into_iter()
            .enumerate()
            .map(|(index, der)| Certificate::decode(der.into(), index))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(certificates)
    }

    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    /// The leaf certificate carrying the attestation extension. Does not decode the extension.
    pub fn attestation_certificate(&self) -> &Certificate {
        // non-empty by construction
        &self.certificates[0]
    }

    pub fn key_description(&self) -> Result<&KeyDescription, Error> {
        self.key_description
            .get_or_init(|| self.decode())
            .as_ref()
            .map_err(Clone::clone)
    }

    fn decode(&self) -> Result<KeyDescription, Error> {
        log::debug!(target: LOG_TARGET, "decoding key description");
        let payload = extract_attestation(self.attestation_certificate()).map_err(|e| {
            e.log_debug("attestation certificate has no key attestation extension")
        })?;
        decode_key_description(payload)
            .map_err(|e| Error::from(e).log_error("malformed key attestation extension"))
    }

    pub fn attestation_version(&self) -> Result<i64, Error> {
        Ok(self.key_description()?.attestation_version)
    }

    pub fn attestation_security_level(&self) -> Result<SecurityLevel, Error> {
        Ok(self.key_description()?.attestation_security_level)
    }

    pub fn keymaster_version(&self) -> Result<i64, Error> {
        Ok(self.key_description()?.keymaster_version)
    }

    pub fn keymaster_security_level(&self) -> Result<SecurityLevel, Error> {
        Ok(self.key_description()?.keymaster_security_level)
    }

    pub fn attestation_challenge(&self) -> Result<&[u8], Error> {
        Ok(&self.key_description()?.attestation_challenge)
    }

    pub fn unique_id(&self) -> Result<&[u8], Error> {
        Ok(&self.key_description()?.unique_id)
    }

    pub fn software_enforced(&self) -> Result<&AuthorizationList, Error> {
        Ok(&self.key_description()?.software_enforced)
    }

    pub fn tee_enforced(&self) -> Result<&AuthorizationList, Error> {
        Ok(&self.key_description()?.tee_enforced)
    }

    /// Compares `challenge` with the attested challenge in constant time.
    ///
    /// # Errors
    ///
    /// [Error::ChallengeMismatch] if the challenges differ in length or content.
    pub fn verify_challenge(&self, challenge: &[u8]) -> Result<bool, Error> {
        let attested = self.attestation_challenge()?;
        if bool::from(constant_time_eq(challenge, attested)) {
            Ok(true)
        } else {
            Err(Error::ChallengeMismatch.log_debug("challenge differs from the attested one"))
        }
    }

    /// Verifies the chain against `roots` at `time` with the default [X509ChainVerifier].
    ///
    /// An empty `roots` slice always fails, no implicit trust store is consulted.
    pub fn verify_certificate_chain(
        &self,
        roots: &[Certificate],
        time: DateTime<Utc>,
    ) -> Result<bool, Error> {
        self.verify_certificate_chain_with(&X509ChainVerifier::default(), roots, time)
    }

    pub fn verify_certificate_chain_with<V: ChainVerifier + ?Sized>(
        &self,
        verifier: &V,
        roots: &[Certificate],
        time: DateTime<Utc>,
    ) -> Result<bool, Error> {
        verifier
            .verify(&self.certificates, roots, time)
            .map_err(|e| Error::from(e.log_debug("certificate chain rejected")))?;
        Ok(true)
    }
}

/// Compares the digests of both inputs, so neither the position of the first difference
/// nor a length difference short-circuits the comparison.
fn constant_time_eq(a: &[u8], b: &[u8]) -> Choice {
    let a_digest = Sha256::digest(a);
    let b_digest = Sha256::digest(b);
    a_digest[..].ct_eq(&b_digest[..]) & (a.len() as u64).ct_eq(&(b.len() as u64))
}
