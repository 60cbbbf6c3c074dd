use core::fmt;
use std::collections::BTreeSet;

use asn1::{Explicit, Implicit, Null, SimpleAsn1Readable, Tag};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attestation::{decode_attestation_application_id, error::DecodeError};

/// The decoded [KeyDescription](https://source.android.com/docs/security/features/keystore/attestation#schema)
/// of an attestation certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyDescription {
    /// The [version](https://developer.android.com/training/articles/security-key-attestation#certificate_schema) of the attestation.
    pub attestation_version: i64,
    pub attestation_security_level: SecurityLevel,
    /// Version of the Keymaster or KeyMint implementation.
    pub keymaster_version: i64,
    pub keymaster_security_level: SecurityLevel,
    pub attestation_challenge: Vec<u8>,
    pub unique_id: Vec<u8>,
    pub software_enforced: AuthorizationList,
    pub tee_enforced: AuthorizationList,
}

impl KeyDescription {
    /// The instant after which the key must no longer be used, preferring the hardware enforced value.
    pub fn usage_expire_date_time(&self) -> Option<DateTime<Utc>> {
        self.tee_enforced
            .usage_expire_date_time
            .or(self.software_enforced.usage_expire_date_time)
    }
}

macro_rules! attestation_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$variant_meta:meta])* $variant:ident = $value:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$variant_meta])* $variant = $value, )+
        }

        impl TryFrom<i64> for $name {
            type Error = i64;

            fn try_from(value: i64) -> Result<Self, Self::Error> {
                match value {
                    $( $value => Ok(Self::$variant), )+
                    _ => Err(value),
                }
            }
        }
    };
}

attestation_enum! {
    /// Where the key material and policy enforcement reside.
    SecurityLevel {
        Software = 0,
        TrustedEnvironment = 1,
        /// Only exists in attestation version >= 3
        #[serde(rename = "strongbox")]
        StrongBox = 2,
    }
}

attestation_enum! {
    /// [Tag::PURPOSE](https://source.android.com/docs/security/keystore/tags#purpose)
    KeyPurpose {
        Encrypt = 0,
        Decrypt = 1,
        Sign = 2,
        Verify = 3,
        WrapKey = 5,
        AgreeKey = 6,
        AttestKey = 7,
    }
}

attestation_enum! {
    /// [Tag::ALGORITHM](https://source.android.com/docs/security/keystore/tags#algorithm)
    Algorithm {
        Rsa = 1,
        Ec = 3,
        Aes = 32,
        TripleDes = 33,
        Hmac = 128,
    }
}

attestation_enum! {
    /// [Tag::DIGEST](https://source.android.com/docs/security/keystore/tags#digest)
    Digest {
        None = 0,
        Md5 = 1,
        Sha1 = 2,
        Sha224 = 3,
        Sha256 = 4,
        Sha384 = 5,
        Sha512 = 6,
    }
}

attestation_enum! {
    /// [Tag::PADDING](https://source.android.com/docs/security/keystore/tags#padding)
    Padding {
        None = 1,
        RsaOaep = 2,
        RsaPss = 3,
        RsaPkcs1_1_5Encrypt = 4,
        RsaPkcs1_1_5Sign = 5,
        Pkcs7 = 64,
    }
}

attestation_enum! {
    /// [Tag::EC_CURVE](https://source.android.com/docs/security/keystore/tags#ec_curve)
    EcCurve {
        P224 = 0,
        P256 = 1,
        P384 = 2,
        P521 = 3,
        Curve25519 = 4,
    }
}

attestation_enum! {
    /// [Tag::ORIGIN](https://source.android.com/docs/security/keystore/tags#origin)
    KeyOrigin {
        Generated = 0,
        /// Deprecated, never produced by KeyMint.
        Derived = 1,
        Imported = 2,
        Unknown = 3,
        SecurelyImported = 4,
    }
}

attestation_enum! {
    VerifiedBootState {
        Verified = 0,
        SelfSigned = 1,
        Unverified = 2,
        Failed = 3,
    }
}

macro_rules! authorization_tags {
    ( $( $variant:ident = $number:literal => $name:literal, )+ ) => {
        /// The known context tags of an [AuthorizationList].
        /// [Tag descriptions](https://source.android.com/docs/security/keystore/tags)
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum AuthorizationTag {
            $( $variant = $number, )+
        }

        impl AuthorizationTag {
            /// Maps a context specific DER tag onto a known authorization tag by its number,
            /// whether it is encoded constructed or primitive.
            ///
            /// Returns `None` for tags this crate does not know, which are skipped by the decoder.
            pub fn from_asn1(tag: Tag) -> Option<Self> {
                $(
                    if tag == <Explicit<'static, Null, $number> as SimpleAsn1Readable<'static>>::TAG
                        || tag == <Implicit<'static, Null, $number> as SimpleAsn1Readable<'static>>::TAG
                    {
                        return Some(Self::$variant);
                    }
                )+
                None
            }

            /// The constructed context specific tag the element of this tag is wrapped in.
            pub fn explicit_tag(self) -> Tag {
                match self {
                    $( Self::$variant => {
                        <Explicit<'static, Null, $number> as SimpleAsn1Readable<'static>>::TAG
                    } )+
                }
            }

            pub fn number(self) -> u32 {
                self as u32
            }

            pub fn name(self) -> &'static str {
                match self {
                    $( Self::$variant => $name, )+
                }
            }
        }
    };
}

authorization_tags! {
    Purpose = 1 => "purpose",
    Algorithm = 2 => "algorithm",
    KeySize = 3 => "key_size",
    Digest = 5 => "digest",
    Padding = 6 => "padding",
    EcCurve = 10 => "ec_curve",
    RsaPublicExponent = 200 => "rsa_public_exponent",
    MgfDigest = 203 => "mgf_digest",
    RollbackResistance = 303 => "rollback_resistance",
    EarlyBootOnly = 305 => "early_boot_only",
    ActiveDateTime = 400 => "active_date_time",
    OriginationExpireDateTime = 401 => "origination_expire_date_time",
    UsageExpireDateTime = 402 => "usage_expire_date_time",
    UsageCountLimit = 405 => "usage_count_limit",
    NoAuthRequired = 503 => "no_auth_required",
    UserAuthType = 504 => "user_auth_type",
    AuthTimeout = 505 => "auth_timeout",
    AllowWhileOnBody = 506 => "allow_while_on_body",
    TrustedUserPresenceRequired = 507 => "trusted_user_presence_required",
    TrustedConfirmationRequired = 508 => "trusted_confirmation_required",
    UnlockedDeviceRequired = 509 => "unlocked_device_required",
    AllApplications = 600 => "all_applications",
    ApplicationId = 601 => "application_id",
    CreationDateTime = 701 => "creation_date_time",
    Origin = 702 => "origin",
    RootOfTrust = 704 => "root_of_trust",
    OsVersion = 705 => "os_version",
    OsPatchLevel = 706 => "os_patch_level",
    AttestationApplicationId = 709 => "attestation_application_id",
    AttestationIdBrand = 710 => "attestation_id_brand",
    AttestationIdDevice = 711 => "attestation_id_device",
    AttestationIdProduct = 712 => "attestation_id_product",
    AttestationIdSerial = 713 => "attestation_id_serial",
    AttestationIdImei = 714 => "attestation_id_imei",
    AttestationIdMeid = 715 => "attestation_id_meid",
    AttestationIdManufacturer = 716 => "attestation_id_manufacturer",
    AttestationIdModel = 717 => "attestation_id_model",
    VendorPatchLevel = 718 => "vendor_patch_level",
    BootPatchLevel = 719 => "boot_patch_level",
    DeviceUniqueAttestation = 720 => "device_unique_attestation",
}

impl fmt::Display for AuthorizationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.number(), self.name())
    }
}

/// Which of the two authorization lists of a [KeyDescription] is meant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthorizationListKind {
    SoftwareEnforced,
    TeeEnforced,
}

impl fmt::Display for AuthorizationListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SoftwareEnforced => write!(f, "software enforced"),
            Self::TeeEnforced => write!(f, "tee enforced"),
        }
    }
}

/// The authorizations a key was generated with, each present only if its tag was.
///
/// Presence-only tags are represented as `bool`, which is `false` whenever the tag is absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationList {
    pub purpose: Option<BTreeSet<KeyPurpose>>,
    pub algorithm: Option<Algorithm>,
    pub key_size: Option<u32>,
    pub digest: Option<BTreeSet<Digest>>,
    pub padding: Option<BTreeSet<Padding>>,
    pub ec_curve: Option<EcCurve>,
    pub rsa_public_exponent: Option<u64>,
    pub mgf_digest: Option<BTreeSet<Digest>>,
    pub rollback_resistance: bool,
    pub early_boot_only: bool,
    pub active_date_time: Option<DateTime<Utc>>,
    pub origination_expire_date_time: Option<DateTime<Utc>>,
    pub usage_expire_date_time: Option<DateTime<Utc>>,
    pub usage_count_limit: Option<u32>,
    pub no_auth_required: bool,
    pub user_auth_type: Option<u32>,
    pub auth_timeout: Option<u32>,
    pub allow_while_on_body: bool,
    pub trusted_user_presence_required: bool,
    pub trusted_confirmation_required: bool,
    pub unlocked_device_required: bool,
    pub all_applications: bool,
    pub application_id: Option<Vec<u8>>,
    pub creation_date_time: Option<DateTime<Utc>>,
    pub origin: Option<KeyOrigin>,
    pub root_of_trust: Option<RootOfTrust>,
    pub os_version: Option<u32>,
    pub os_patch_level: Option<u32>,
    /// DER encoded [AttestationApplicationId], see [AuthorizationList::attestation_application].
    pub attestation_application_id: Option<Vec<u8>>,
    pub attestation_id_brand: Option<Vec<u8>>,
    pub attestation_id_device: Option<Vec<u8>>,
    pub attestation_id_product: Option<Vec<u8>>,
    pub attestation_id_serial: Option<Vec<u8>>,
    pub attestation_id_imei: Option<Vec<u8>>,
    pub attestation_id_meid: Option<Vec<u8>>,
    pub attestation_id_manufacturer: Option<Vec<u8>>,
    pub attestation_id_model: Option<Vec<u8>>,
    pub vendor_patch_level: Option<u32>,
    pub boot_patch_level: Option<u32>,
    pub device_unique_attestation: bool,
}

impl AuthorizationList {
    /// Decodes the nested [AttestationApplicationId] if the tag was present.
    pub fn attestation_application(
        &self,
    ) -> Result<Option<AttestationApplicationId>, DecodeError> {
        self.attestation_application_id
            .as_deref()
            .map(decode_attestation_application_id)
            .transpose()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootOfTrust {
    pub verified_boot_key: Vec<u8>,
    pub device_locked: bool,
    pub verified_boot_state: VerifiedBootState,
    /// Absent before attestation version 3.
    pub verified_boot_hash: Option<Vec<u8>>,
}

/// The apps allowed to use the key, identified by package and signing certificate digests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationApplicationId {
    pub package_infos: Vec<AttestationPackageInfo>,
    pub signature_digests: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationPackageInfo {
    pub package_name: String,
    pub version: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_level_mapping() {
        assert_eq!(SecurityLevel::try_from(0), Ok(SecurityLevel::Software));
        assert_eq!(SecurityLevel::try_from(1), Ok(SecurityLevel::TrustedEnvironment));
        assert_eq!(SecurityLevel::try_from(2), Ok(SecurityLevel::StrongBox));
        assert_eq!(SecurityLevel::try_from(3), Err(3));
        assert_eq!(SecurityLevel::try_from(-1), Err(-1));
    }

    #[test]
    fn test_purpose_mapping_rejects_deprecated_derive_key() {
        assert_eq!(KeyPurpose::try_from(2), Ok(KeyPurpose::Sign));
        assert_eq!(KeyPurpose::try_from(7), Ok(KeyPurpose::AttestKey));
        assert_eq!(KeyPurpose::try_from(4), Err(4));
    }

    #[test]
    fn test_authorization_tag_from_asn1() {
        // [701] EXPLICIT, long form tag
        let (tag, _) = Tag::from_bytes(&[0xbf, 0x85, 0x3d]).unwrap();
        assert_eq!(AuthorizationTag::from_asn1(tag), Some(AuthorizationTag::CreationDateTime));
        // [1] EXPLICIT, short form tag
        let (tag, _) = Tag::from_bytes(&[0xa1]).unwrap();
        assert_eq!(AuthorizationTag::from_asn1(tag), Some(AuthorizationTag::Purpose));
        // [1000] EXPLICIT is not known
        let (tag, _) = Tag::from_bytes(&[0xbf, 0x87, 0x68]).unwrap();
        assert_eq!(AuthorizationTag::from_asn1(tag), None);
        // [1] primitive still names the purpose tag
        let (tag, _) = Tag::from_bytes(&[0x81]).unwrap();
        assert_eq!(AuthorizationTag::from_asn1(tag), Some(AuthorizationTag::Purpose));
        assert_ne!(tag, AuthorizationTag::Purpose.explicit_tag());
        // [701] primitive, long form tag
        let (tag, _) = Tag::from_bytes(&[0x9f, 0x85, 0x3d]).unwrap();
        assert_eq!(AuthorizationTag::from_asn1(tag), Some(AuthorizationTag::CreationDateTime));
    }

    #[test]
    fn test_authorization_tag_explicit_tag() {
        let (tag, _) = Tag::from_bytes(&[0xa1]).unwrap();
        assert_eq!(AuthorizationTag::Purpose.explicit_tag(), tag);
        let (tag, _) = Tag::from_bytes(&[0xbf, 0x85, 0x40]).unwrap();
        assert_eq!(AuthorizationTag::RootOfTrust.explicit_tag(), tag);
    }

    #[test]
    fn test_authorization_tag_display() {
        assert_eq!(AuthorizationTag::RootOfTrust.to_string(), "704 (root_of_trust)");
        assert_eq!(AuthorizationTag::Purpose.number(), 1);
    }

    #[test]
    fn test_serialize_security_level() {
        assert_eq!(
            serde_json::to_string(&SecurityLevel::StrongBox).unwrap(),
            "\"strongbox\""
        );
        assert_eq!(
            serde_json::to_string(&SecurityLevel::TrustedEnvironment).unwrap(),
            "\"trusted_environment\""
        );
    }
}
