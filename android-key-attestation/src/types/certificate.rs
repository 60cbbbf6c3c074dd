use asn1::{oid, BitString, ObjectIdentifier, ParseError};
use chrono::{DateTime, Utc};
use num_bigint::BigInt;

use crate::attestation::{
    asn,
    error::{DecodeError, DecodeErrorKind, DecodeLocation},
};

/// The OID of the X.509 basic constraints extension.
pub const BASIC_CONSTRAINTS_OID: ObjectIdentifier = oid!(2, 5, 29, 19);
pub const KEY_USAGE_OID: ObjectIdentifier = oid!(2, 5, 29, 15);

/// An owned, decoded [X.509 v3 certificate](https://www.rfc-editor.org/rfc/rfc5280#section-4.1).
///
/// Names are kept as raw DER, they are only ever compared byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8>,
    tbs_der: Vec<u8>,
    version: u64,
    serial_number: Vec<u8>,
    signature_algorithm: AlgorithmIdentifier,
    tbs_signature_algorithm: AlgorithmIdentifier,
    issuer: Vec<u8>,
    subject: Vec<u8>,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    subject_public_key_info: SubjectPublicKeyInfo,
    extensions: Vec<Extension>,
    basic_constraints: Option<BasicConstraints>,
    key_usage: Option<KeyUsage>,
    signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlgorithmIdentifier {
    pub algorithm: ObjectIdentifier,
    /// Full DER encoding of the parameters, if any.
    pub parameters: Option<Vec<u8>>,
}

impl<'a> From<&asn::AlgorithmIdentifier<'a>> for AlgorithmIdentifier {
    fn from(value: &asn::AlgorithmIdentifier<'a>) -> Self {
        Self {
            algorithm: value.algorithm.clone(),
            parameters: value.parameters.as_ref().map(|p| p.full_data().to_vec()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectPublicKeyInfo {
    pub algorithm: AlgorithmIdentifier,
    /// Content of the subjectPublicKey BIT STRING.
    pub public_key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub oid: ObjectIdentifier,
    pub critical: bool,
    /// DER encoded extension value, without the wrapping OCTET STRING.
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicConstraints {
    pub ca: bool,
    pub path_len_constraint: Option<u64>,
}

/// The asserted bits of the [key usage](https://www.rfc-editor.org/rfc/rfc5280#section-4.2.1.3)
/// extension that matter for chain building.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyUsage {
    pub digital_signature: bool,
    pub key_cert_sign: bool,
    pub crl_sign: bool,
}

impl KeyUsage {
    fn parse(value: &[u8]) -> Result<Self, ParseError> {
        let bits = asn1::parse_single::<BitString>(value)?;
        Ok(Self {
            digital_signature: bits.has_bit_set(0),
            key_cert_sign: bits.has_bit_set(5),
            crl_sign: bits.has_bit_set(6),
        })
    }
}

impl Certificate {
    /// Decodes a DER encoded certificate.
    pub fn from_der(der: Vec<u8>) -> Result<Self, DecodeError> {
        Self::decode(der, 0)
    }

    /// Decodes the certificate at `index` of a chain, which is reported on failure.
    pub(crate) fn decode(der: Vec<u8>, index: usize) -> Result<Self, DecodeError> {
        let location = DecodeLocation::Certificate { index };
        let malformed = |e: ParseError| DecodeError::malformed(location, e);

        let certificate = asn1::parse_single::<asn::Certificate>(&der).map_err(malformed)?;
        let tbs = certificate.tbs_certificate.parse::<asn::TBSCertificate>().map_err(malformed)?;

        let invalid_time = || {
            DecodeError::new(
                location,
                DecodeErrorKind::Malformed("validity time out of range".into()),
            )
        };
        let not_before = tbs.validity.not_before.to_date_time().ok_or_else(invalid_time)?;
        let not_after = tbs.validity.not_after.to_date_time().ok_or_else(invalid_time)?;

        let extensions: Vec<Extension> = tbs
            .extensions
            .map(|extensions| {
                extensions
                    .map(|e| Extension {
                        oid: e.extn_id,
                        critical: e.critical,
                        value: e.extn_value.to_vec(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let basic_constraints = extensions
            .iter()
            .find(|e| e.oid == BASIC_CONSTRAINTS_OID)
            .map(|e| asn1::parse_single::<asn::BasicConstraints>(&e.value))
            .transpose()
            .map_err(malformed)?
            .map(|c| BasicConstraints { ca: c.ca, path_len_constraint: c.path_len_constraint });
        let key_usage = extensions
            .iter()
            .find(|e| e.oid == KEY_USAGE_OID)
            .map(|e| KeyUsage::parse(&e.value))
            .transpose()
            .map_err(malformed)?;

        Ok(Self {
            tbs_der: certificate.tbs_certificate.full_data().to_vec(),
            version: tbs.version,
            serial_number: tbs.serial_number.as_bytes().to_vec(),
            signature_algorithm: (&certificate.signature_algorithm).into(),
            tbs_signature_algorithm: (&tbs.signature).into(),
            issuer: tbs.issuer.full_data().to_vec(),
            subject: tbs.subject.full_data().to_vec(),
            not_before,
            not_after,
            subject_public_key_info: SubjectPublicKeyInfo {
                algorithm: (&tbs.subject_public_key_info.algorithm).into(),
                public_key: tbs.subject_public_key_info.subject_public_key.as_bytes().to_vec(),
            },
            extensions,
            basic_constraints,
            key_usage,
            signature: certificate.signature_value.as_bytes().to_vec(),
            der,
        })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// The signed part of the certificate.
    pub fn tbs_der(&self) -> &[u8] {
        &self.tbs_der
    }

    /// The zero based version field, `2` for v3 certificates.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Big-endian two's complement serial number as encoded.
    pub fn serial_number(&self) -> &[u8] {
        &self.serial_number
    }

    /// The serial number as signed integer.
    pub fn serial_number_value(&self) -> BigInt {
        BigInt::from_signed_bytes_be(&self.serial_number)
    }

    /// Lowercase hex of the signed serial number, `-` prefixed if negative.
    pub fn serial_number_hex(&self) -> String {
        self.serial_number_value().to_str_radix(16)
    }

    /// The outer signature algorithm.
    pub fn signature_algorithm(&self) -> &AlgorithmIdentifier {
        &self.signature_algorithm
    }

    /// The signature algorithm repeated inside the signed payload.
    pub fn tbs_signature_algorithm(&self) -> &AlgorithmIdentifier {
        &self.tbs_signature_algorithm
    }

    pub fn issuer_der(&self) -> &[u8] {
        &self.issuer
    }

    pub fn subject_der(&self) -> &[u8] {
        &self.subject
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    pub fn subject_public_key_info(&self) -> &SubjectPublicKeyInfo {
        &self.subject_public_key_info
    }

    pub fn extensions(&self) -> &[Extension] {
        &self.extensions
    }

    /// Returns the first extension with the given `oid`.
    pub fn extension(&self, oid: &ObjectIdentifier) -> Option<&Extension> {
        self.extensions.iter().find(|e| &e.oid == oid)
    }

    pub fn basic_constraints(&self) -> Option<BasicConstraints> {
        self.basic_constraints
    }

    /// Whether the basic constraints mark this certificate as certificate authority.
    pub fn is_ca(&self) -> bool {
        self.basic_constraints.map_or(false, |c| c.ca)
    }

    pub fn key_usage(&self) -> Option<KeyUsage> {
        self.key_usage
    }

    /// Whether the key usage, if present, allows signing certificates.
    pub fn may_sign_certificates(&self) -> bool {
        self.key_usage.map_or(true, |usage| usage.key_cert_sign)
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Whether `time` lies within the inclusive validity window.
    pub fn is_valid_at(&self, time: DateTime<Utc>) -> bool {
        self.not_before <= time && time <= self.not_after
    }
}
