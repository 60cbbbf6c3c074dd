use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

pub const CHAIN_MAX_LENGTH: usize = 5;
pub const CERT_MAX_LENGTH: usize = 3000;

/// Limits and policies applied by [X509ChainVerifier](crate::X509ChainVerifier).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VerificationConfig {
    /// Maximum number of certificates in a chain, the trusted root included if it is part of it.
    pub max_chain_length: usize,
    /// Maximum length of a single DER encoded certificate.
    pub max_certificate_length: usize,
    /// Hex encoded serial numbers of revoked certificates, optionally `-` prefixed.
    pub revoked_serial_numbers: Vec<String>,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            max_chain_length: CHAIN_MAX_LENGTH,
            max_certificate_length: CERT_MAX_LENGTH,
            revoked_serial_numbers: Vec::new(),
        }
    }
}

impl VerificationConfig {
    /// Parses the revoked serial numbers into the signed integers they denote.
    ///
    /// `0a1b` and `00a1b` name the same serial, `ff0a` and `-f6` do not.
    pub fn revoked_serials(&self) -> Result<Vec<BigInt>, ConfigError> {
        self.revoked_serial_numbers
            .iter()
            .map(|serial_number| {
                BigInt::parse_bytes(serial_number.as_bytes(), 16)
                    .ok_or_else(|| ConfigError::InvalidSerialNumber(serial_number.clone()))
            })
            .collect()
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("revoked serial number `{0}` is not a hex encoded integer")]
    InvalidSerialNumber(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_partial_config() {
        let config: VerificationConfig = serde_json::from_str(
            r#"{"maxChainLength": 4, "revokedSerialNumbers": ["0A1B"]}"#,
        )
        .unwrap();
        assert_eq!(
            config,
            VerificationConfig {
                max_chain_length: 4,
                revoked_serial_numbers: vec!["0A1B".to_string()],
                ..Default::default()
            }
        );
        assert_eq!(config.max_certificate_length, CERT_MAX_LENGTH);
    }

    #[test]
    fn test_revoked_serials_keep_sign() {
        let config = VerificationConfig {
            revoked_serial_numbers: vec!["00ff0a".into(), "FF0A".into(), "-f6".into()],
            ..Default::default()
        };
        assert_eq!(
            config.revoked_serials(),
            Ok(vec![BigInt::from(0xff0a), BigInt::from(0xff0a), BigInt::from(-0xf6)])
        );
        // the two's complement encoding of ff0a is negative
        assert_eq!(BigInt::from_signed_bytes_be(&[0xff, 0x0a]), BigInt::from(-0xf6));
    }

    #[test]
    fn test_reject_invalid_revoked_serial() {
        let config = VerificationConfig {
            revoked_serial_numbers: vec!["0a".into(), "0x0b".into()],
            ..Default::default()
        };
        assert_eq!(
            config.revoked_serials(),
            Err(ConfigError::InvalidSerialNumber("0x0b".into()))
        );
    }
}
