use asn1::{Asn1Read, BitString, ObjectIdentifier, SequenceOf, SetOf, Tlv};
use chrono::{DateTime, TimeZone, Utc};

#[derive(Asn1Read)]
/// Represents the root structure of a [X.509 v3 certificate](https://www.rfc-editor.org/rfc/rfc5280#section-4.1).
/// The `tbs_certificate` is kept undecoded, since its raw bytes are the signed payload.
/// See how to map these to [asn1 structs](https://docs.rs/asn1/0.15.5/asn1/#structs)
pub struct Certificate<'a> {
    pub tbs_certificate: Tlv<'a>,
    pub signature_algorithm: AlgorithmIdentifier<'a>,
    pub signature_value: BitString<'a>,
}

#[derive(Asn1Read)]
/// [See RFC](https://www.rfc-editor.org/rfc/rfc5280#section-4.1.1.2)
pub struct AlgorithmIdentifier<'a> {
    pub algorithm: ObjectIdentifier,
    pub parameters: Option<Tlv<'a>>,
}

#[derive(Asn1Read)]
pub struct TBSCertificate<'a> {
    #[explicit(0)]
    #[default(0u64)]
    pub version: u64,
    // Negative serials exist in the wild, so the signed form is read.
    pub serial_number: asn1::BigInt<'a>,
    pub signature: AlgorithmIdentifier<'a>,
    // RFC: https://www.rfc-editor.org/rfc/rfc5280#section-4.1.2.4
    // Names are compared byte-for-byte, so they are not decoded any further.
    pub issuer: Tlv<'a>,
    pub validity: Validity,
    pub subject: Tlv<'a>,
    pub subject_public_key_info: SubjectPublicKeyInfo<'a>,
    // If present, version MUST be v2 or v3
    #[implicit(1)]
    pub issuer_unique_id: Option<BitString<'a>>,
    // If present, version MUST be v2 or v3
    #[implicit(2)]
    pub subject_unique_id: Option<BitString<'a>>,
    // If present, version MUST be v3
    #[explicit(3)]
    pub extensions: Option<SequenceOf<'a, Extension<'a>>>,
}

#[derive(Asn1Read)]
pub struct Validity {
    pub not_before: Time,
    pub not_after: Time,
}

#[derive(Asn1Read)]
pub enum Time {
    UTCTime(asn1::UtcTime),
    GeneralizedTime(asn1::GeneralizedTime),
}

impl Time {
    /// Converts the ASN.1 time into an absolute UTC instant.
    pub fn to_date_time(&self) -> Option<DateTime<Utc>> {
        let date_time = match self {
            Time::UTCTime(time) => time.as_datetime(),
            Time::GeneralizedTime(time) => time.as_datetime(),
        };
        Utc.with_ymd_and_hms(
            date_time.year().into(),
            date_time.month().into(),
            date_time.day().into(),
            date_time.hour().into(),
            date_time.minute().into(),
            date_time.second().into(),
        )
        .single()
    }
}

#[derive(Asn1Read)]
pub struct SubjectPublicKeyInfo<'a> {
    pub algorithm: AlgorithmIdentifier<'a>,
    pub subject_public_key: BitString<'a>,
}

#[derive(Asn1Read)]
pub struct Extension<'a> {
    pub extn_id: ObjectIdentifier,
    #[default(false)]
    pub critical: bool,
    /// contains the DER encoding of an ASN.1 value
    /// corresponding to the extension type identified by extnID
    pub extn_value: &'a [u8],
}

#[derive(Asn1Read)]
/// [See RFC](https://www.rfc-editor.org/rfc/rfc5280#section-4.2.1.9)
pub struct BasicConstraints {
    #[default(false)]
    pub ca: bool,
    pub path_len_constraint: Option<u64>,
}

#[derive(Asn1Read)]
pub struct AttestationApplicationId<'a> {
    pub package_infos: SetOf<'a, AttestationPackageInfo<'a>>,
    pub signature_digests: SetOf<'a, &'a [u8]>,
}

#[derive(Asn1Read)]
pub struct AttestationPackageInfo<'a> {
    pub package_name: &'a [u8],
    pub version: i64,
}
