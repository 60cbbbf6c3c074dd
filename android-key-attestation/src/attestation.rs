pub mod asn;
mod authorization;
pub mod chain;
pub mod error;

use asn1::{oid, Enumerated, ObjectIdentifier, ParseError, Parser, Sequence};

use crate::{
    AttestationApplicationId, AttestationPackageInfo, AuthorizationListKind, Certificate,
    KeyDescription, SecurityLevel, LOG_TARGET,
};
use authorization::decode_authorization_list;
use error::{DecodeError, DecodeErrorKind, DecodeLocation, Error};

/// The OID of the Attestation Extension to a X.509 certificate.
/// [See docs](https://source.android.com/docs/security/keystore/attestation#tbscertificate-sequence)
pub const KEY_ATTESTATION_OID: ObjectIdentifier = oid!(1, 3, 6, 1, 4, 1, 11129, 2, 1, 17);

/// Returns the payload of the attestation extension of `certificate`.
///
/// If the extension occurs more than once, the first occurrence is used.
pub fn extract_attestation(certificate: &Certificate) -> Result<&[u8], Error> {
    certificate
        .extension(&KEY_ATTESTATION_OID)
        .map(|extension| extension.value.as_slice())
        .ok_or(Error::ExtensionMissing)
}

/// Decodes the DER encoded [KeyDescription](https://source.android.com/docs/security/features/keystore/attestation#schema)
/// found in the attestation extension.
///
/// The positional header is shared by all attestation versions, the two authorization lists
/// are decoded by tag, so no version specific handling is needed.
pub fn decode_key_description(payload: &[u8]) -> Result<KeyDescription, DecodeError> {
    let sequence = asn1::parse_single::<Sequence>(payload)
        .map_err(|e| DecodeError::malformed(DecodeLocation::Extension, e))?;

    sequence.parse(|parser| {
        let attestation_version = read_field::<i64>(parser, "attestationVersion")?;
        let attestation_security_level = read_security_level(parser, "attestationSecurityLevel")?;
        let keymaster_version = read_field::<i64>(parser, "keymasterVersion")?;
        let keymaster_security_level = read_security_level(parser, "keymasterSecurityLevel")?;
        let attestation_challenge = read_field::<&[u8]>(parser, "attestationChallenge")?.to_vec();
        let unique_id = read_field::<&[u8]>(parser, "uniqueId")?.to_vec();
        let software_enforced = decode_authorization_list(
            read_field::<Sequence>(parser, "softwareEnforced")?,
            AuthorizationListKind::SoftwareEnforced,
        )?;
        let tee_enforced = decode_authorization_list(
            read_field::<Sequence>(parser, "teeEnforced")?,
            AuthorizationListKind::TeeEnforced,
        )?;

        log::debug!(
            target: LOG_TARGET,
            "decoded key description version {} ({:?})",
            attestation_version,
            attestation_security_level
        );

        Ok(KeyDescription {
            attestation_version,
            attestation_security_level,
            keymaster_version,
            keymaster_security_level,
            attestation_challenge,
            unique_id,
            software_enforced,
            tee_enforced,
        })
    })
}

/// Reads the attestation version without decoding the rest of the payload.
pub fn peek_attestation_version(payload: &[u8]) -> Result<i64, DecodeError> {
    let sequence = asn1::parse_single::<Sequence>(payload)
        .map_err(|e| DecodeError::malformed(DecodeLocation::Extension, e))?;
    sequence.parse(|parser| {
        let version = read_field::<i64>(parser, "attestationVersion")?;
        // skip the remaining fields
        while !parser.is_empty() {
            parser.read_element::<asn1::Tlv>()?;
        }
        Ok(version)
    })
}

fn read_field<'a, T: asn1::Asn1Readable<'a>>(
    parser: &mut Parser<'a>,
    field: &'static str,
) -> Result<T, DecodeError> {
    parser
        .read_element::<T>()
        .map_err(|e| DecodeError::malformed(DecodeLocation::KeyDescription { field }, e))
}

fn read_security_level(
    parser: &mut Parser<'_>,
    field: &'static str,
) -> Result<SecurityLevel, DecodeError> {
    let value = read_field::<Enumerated>(parser, field)?.value();
    SecurityLevel::try_from(i64::from(value)).map_err(|value| {
        DecodeError::new(
            DecodeLocation::KeyDescription { field },
            DecodeErrorKind::UnknownEnumValue(value),
        )
    })
}

/// Decodes the DER encoded `AttestationApplicationId` stored under tag 709.
pub(crate) fn decode_attestation_application_id(
    data: &[u8],
) -> Result<AttestationApplicationId, DecodeError> {
    let application_id = asn1::parse_single::<asn::AttestationApplicationId>(data)
        .map_err(|e| DecodeError::malformed(DecodeLocation::AttestationApplicationId, e))?;

    Ok(AttestationApplicationId {
        package_infos: application_id
            .package_infos
            .map(|info| AttestationPackageInfo {
                package_name: String::from_utf8_lossy(info.package_name).into_owned(),
                version: info.version,
            })
            .collect(),
        signature_digests: application_id
            .signature_digests
            .map(|digest| digest.to_vec())
            .collect(),
    })
}

/// Parser errors raised outside of a known field, trailing data for instance.
impl From<ParseError> for DecodeError {
    fn from(error: ParseError) -> Self {
        DecodeError::malformed(DecodeLocation::Extension, error)
    }
}
