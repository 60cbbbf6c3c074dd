use std::collections::{BTreeMap, BTreeSet};

use asn1::{ParseError, Sequence, SequenceOf, SetOf, SimpleAsn1Readable, Tag, Tlv};
use chrono::{DateTime, Utc};

use super::error::{DecodeError, DecodeErrorKind, DecodeLocation};
use crate::{
    AuthorizationList, AuthorizationListKind, AuthorizationTag, RootOfTrust, VerifiedBootState,
    LOG_TARGET,
};

const SET_TAG: Tag = <SetOf<'static, i64> as SimpleAsn1Readable<'static>>::TAG;
const SEQUENCE_TAG: Tag = <SequenceOf<'static, i64> as SimpleAsn1Readable<'static>>::TAG;

/// Decodes an [AuthorizationList] from its sequence of explicitly tagged elements.
///
/// Elements may appear in any order. Unknown tags are skipped, and of repeated tags only the
/// first occurrence is decoded. A known tag that is not explicitly tagged is rejected.
pub(crate) fn decode_authorization_list(
    sequence: Sequence<'_>,
    list: AuthorizationListKind,
) -> Result<AuthorizationList, DecodeError> {
    let (entries, misencoded) = sequence
        .parse(|parser| {
            let mut entries = BTreeMap::new();
            let mut misencoded = None;
            while !parser.is_empty() {
                let element = parser.read_element::<Tlv>()?;
                match AuthorizationTag::from_asn1(element.tag()) {
                    Some(tag) if element.tag() != tag.explicit_tag() => {
                        misencoded.get_or_insert(tag);
                    }
                    Some(tag) if entries.contains_key(&tag) => {
                        log::debug!(
                            target: LOG_TARGET,
                            "ignoring repeated tag {} in {} authorization list",
                            tag,
                            list
                        );
                    }
                    Some(tag) => {
                        entries.insert(tag, element.data());
                    }
                    None => {
                        log::debug!(
                            target: LOG_TARGET,
                            "ignoring unknown tag {:?} in {} authorization list",
                            element.tag(),
                            list
                        );
                    }
                }
            }
            Ok::<_, ParseError>((entries, misencoded))
        })
        .map_err(|e| {
            DecodeError::malformed(DecodeLocation::AuthorizationList { list, tag: None }, e)
        })?;
    if let Some(tag) = misencoded {
        return Err(DecodeError::new(
            DecodeLocation::AuthorizationList { list, tag: Some(tag) },
            DecodeErrorKind::UnexpectedShape,
        ));
    }

    let fields = Fields { list, entries };

    Ok(AuthorizationList {
        purpose: fields.set_of(AuthorizationTag::Purpose)?,
        algorithm: fields.enumerated(AuthorizationTag::Algorithm)?,
        key_size: fields.unsigned(AuthorizationTag::KeySize)?,
        digest: fields.set_of(AuthorizationTag::Digest)?,
        padding: fields.set_of(AuthorizationTag::Padding)?,
        ec_curve: fields.enumerated(AuthorizationTag::EcCurve)?,
        rsa_public_exponent: fields.element::<u64>(AuthorizationTag::RsaPublicExponent)?,
        mgf_digest: fields.set_of(AuthorizationTag::MgfDigest)?,
        rollback_resistance: fields.present(AuthorizationTag::RollbackResistance),
        early_boot_only: fields.present(AuthorizationTag::EarlyBootOnly),
        active_date_time: fields.timestamp(AuthorizationTag::ActiveDateTime)?,
        origination_expire_date_time: fields
            .timestamp(AuthorizationTag::OriginationExpireDateTime)?,
        usage_expire_date_time: fields.timestamp(AuthorizationTag::UsageExpireDateTime)?,
        usage_count_limit: fields.unsigned(AuthorizationTag::UsageCountLimit)?,
        no_auth_required: fields.present(AuthorizationTag::NoAuthRequired),
        user_auth_type: fields.unsigned(AuthorizationTag::UserAuthType)?,
        auth_timeout: fields.unsigned(AuthorizationTag::AuthTimeout)?,
        allow_while_on_body: fields.present(AuthorizationTag::AllowWhileOnBody),
        trusted_user_presence_required: fields
            .present(AuthorizationTag::TrustedUserPresenceRequired),
        trusted_confirmation_required: fields
            .present(AuthorizationTag::TrustedConfirmationRequired),
        unlocked_device_required: fields.present(AuthorizationTag::UnlockedDeviceRequired),
        all_applications: fields.present(AuthorizationTag::AllApplications),
        application_id: fields.bytes(AuthorizationTag::ApplicationId)?,
        creation_date_time: fields.timestamp(AuthorizationTag::CreationDateTime)?,
        origin: fields.enumerated(AuthorizationTag::Origin)?,
        root_of_trust: fields.root_of_trust()?,
        os_version: fields.unsigned(AuthorizationTag::OsVersion)?,
        os_patch_level: fields.unsigned(AuthorizationTag::OsPatchLevel)?,
        attestation_application_id: fields.bytes(AuthorizationTag::AttestationApplicationId)?,
        attestation_id_brand: fields.bytes(AuthorizationTag::AttestationIdBrand)?,
        attestation_id_device: fields.bytes(AuthorizationTag::AttestationIdDevice)?,
        attestation_id_product: fields.bytes(AuthorizationTag::AttestationIdProduct)?,
        attestation_id_serial: fields.bytes(AuthorizationTag::AttestationIdSerial)?,
        attestation_id_imei: fields.bytes(AuthorizationTag::AttestationIdImei)?,
        attestation_id_meid: fields.bytes(AuthorizationTag::AttestationIdMeid)?,
        attestation_id_manufacturer: fields
            .bytes(AuthorizationTag::AttestationIdManufacturer)?,
        attestation_id_model: fields.bytes(AuthorizationTag::AttestationIdModel)?,
        vendor_patch_level: fields.unsigned(AuthorizationTag::VendorPatchLevel)?,
        boot_patch_level: fields.unsigned(AuthorizationTag::BootPatchLevel)?,
        device_unique_attestation: fields.present(AuthorizationTag::DeviceUniqueAttestation),
    })
}

/// The content of each known tag of one authorization list.
struct Fields<'a> {
    list: AuthorizationListKind,
    entries: BTreeMap<AuthorizationTag, &'a [u8]>,
}

impl<'a> Fields<'a> {
    fn error(&self, tag: AuthorizationTag, kind: DecodeErrorKind) -> DecodeError {
        DecodeError::new(
            DecodeLocation::AuthorizationList { list: self.list, tag: Some(tag) },
            kind,
        )
    }

    fn malformed(&self, tag: AuthorizationTag, error: ParseError) -> DecodeError {
        self.error(tag, DecodeErrorKind::Malformed(error.to_string()))
    }

    /// Whether the tag is present. Its content is not inspected.
    fn present(&self, tag: AuthorizationTag) -> bool {
        self.entries.contains_key(&tag)
    }

    /// The single element wrapped by the explicit tag, if present.
    fn tlv(&self, tag: AuthorizationTag) -> Result<Option<Tlv<'a>>, DecodeError> {
        self.entries
            .get(&tag)
            .copied()
            .map(|data| asn1::parse_single::<Tlv<'a>>(data).map_err(|e| self.malformed(tag, e)))
            .transpose()
    }

    fn element<T: SimpleAsn1Readable<'a>>(
        &self,
        tag: AuthorizationTag,
    ) -> Result<Option<T>, DecodeError> {
        match self.tlv(tag)? {
            Some(tlv) if tlv.tag() != T::TAG => {
                Err(self.error(tag, DecodeErrorKind::UnexpectedShape))
            }
            Some(tlv) => tlv.parse::<T>().map(Some).map_err(|e| self.malformed(tag, e)),
            None => Ok(None),
        }
    }

    fn unsigned(&self, tag: AuthorizationTag) -> Result<Option<u32>, DecodeError> {
        self.element::<i64>(tag)?
            .map(|value| {
                u32::try_from(value)
                    .map_err(|_| self.error(tag, DecodeErrorKind::IntegerOutOfRange(value)))
            })
            .transpose()
    }

    fn bytes(&self, tag: AuthorizationTag) -> Result<Option<Vec<u8>>, DecodeError> {
        Ok(self.element::<&'a [u8]>(tag)?.map(|bytes| bytes.to_vec()))
    }

    /// Milliseconds since the epoch.
    fn timestamp(&self, tag: AuthorizationTag) -> Result<Option<DateTime<Utc>>, DecodeError> {
        self.element::<i64>(tag)?
            .map(|millis| {
                DateTime::<Utc>::from_timestamp_millis(millis)
                    .ok_or_else(|| self.error(tag, DecodeErrorKind::InvalidTimestamp(millis)))
            })
            .transpose()
    }

    fn enumerated<E: TryFrom<i64, Error = i64>>(
        &self,
        tag: AuthorizationTag,
    ) -> Result<Option<E>, DecodeError> {
        self.element::<i64>(tag)?
            .map(|value| self.to_enum(tag, value))
            .transpose()
    }

    /// A SET OF INTEGER, also accepted as SEQUENCE OF INTEGER.
    fn set_of<E: TryFrom<i64, Error = i64> + Ord>(
        &self,
        tag: AuthorizationTag,
    ) -> Result<Option<BTreeSet<E>>, DecodeError> {
        let Some(tlv) = self.tlv(tag)? else {
            return Ok(None);
        };
        if tlv.tag() != SET_TAG && tlv.tag() != SEQUENCE_TAG {
            return Err(self.error(tag, DecodeErrorKind::UnexpectedShape));
        }
        let values = asn1::parse(tlv.data(), |parser| {
            let mut values = Vec::new();
            while !parser.is_empty() {
                values.push(parser.read_element::<i64>()?);
            }
            Ok::<_, ParseError>(values)
        })
        .map_err(|e| self.malformed(tag, e))?;

        values
            .into_iter()
            .map(|value| self.to_enum(tag, value))
            .collect::<Result<BTreeSet<E>, _>>()
            .map(Some)
    }

    fn to_enum<E: TryFrom<i64, Error = i64>>(
        &self,
        tag: AuthorizationTag,
        value: i64,
    ) -> Result<E, DecodeError> {
        E::try_from(value).map_err(|value| self.error(tag, DecodeErrorKind::UnknownEnumValue(value)))
    }

    fn root_of_trust(&self) -> Result<Option<RootOfTrust>, DecodeError> {
        self.element::<Sequence<'a>>(AuthorizationTag::RootOfTrust)?
            .map(|sequence| decode_root_of_trust(sequence, self.list))
            .transpose()
    }
}

/// Decodes the positional `RootOfTrust` sequence; the boot hash is absent before version 3.
fn decode_root_of_trust(
    sequence: Sequence<'_>,
    list: AuthorizationListKind,
) -> Result<RootOfTrust, DecodeError> {
    let location = |field| DecodeLocation::RootOfTrust { list, field };
    let malformed = |field| move |e: ParseError| DecodeError::malformed(location(field), e);

    sequence.parse(|parser| {
        let verified_boot_key =
            parser.read_element::<&[u8]>().map_err(malformed("verifiedBootKey"))?.to_vec();
        let device_locked = parser.read_element::<bool>().map_err(malformed("deviceLocked"))?;
        let state = parser
            .read_element::<asn1::Enumerated>()
            .map_err(malformed("verifiedBootState"))?
            .value();
        let verified_boot_state = VerifiedBootState::try_from(i64::from(state)).map_err(|value| {
            DecodeError::new(
                location("verifiedBootState"),
                DecodeErrorKind::UnknownEnumValue(value),
            )
        })?;
        let verified_boot_hash = if parser.is_empty() {
            None
        } else {
            Some(parser.read_element::<&[u8]>().map_err(malformed("verifiedBootHash"))?.to_vec())
        };
        if !parser.is_empty() {
            return Err(DecodeError::new(
                location("verifiedBootHash"),
                DecodeErrorKind::UnexpectedShape,
            ));
        }

        Ok(RootOfTrust { verified_boot_key, device_locked, verified_boot_state, verified_boot_hash })
    })
}
