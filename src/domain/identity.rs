use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};

/// Device identity presented to the portal on every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub mac: String,
    pub serial_number: String,
    pub device_id: String,
    pub device_id2: String,
    pub signature: String,
}

impl DeviceIdentity {
    /// Derives serial, device IDs and signature deterministically from the MAC,
    /// so the same MAC always presents the same device.
    pub fn derive(mac: &str) -> Self {
        let clean = mac.trim().to_uppercase().replace(':', "");
        let key = if clean.is_empty() {
            "DEFAULT_KEY".to_string()
        } else {
            clean
        };

        let serial: String = upper_hash(&format!("SN_{key}")).chars().take(13).collect();

        Self {
            mac: mac.trim().to_string(),
            serial_number: serial,
            device_id: upper_hash(&key),
            device_id2: upper_hash(&format!("{key}_SALT_DEV2")),
            signature: upper_hash(&format!("{key}_SIG_SALT")),
        }
    }

    pub fn lower_mac(&self) -> String {
        self.mac.to_lowercase()
    }

    /// Lowercase MAC with every non-alphanumeric byte percent-encoded
    /// (`00%3a1a%3a79...`), as the cookie expects.
    pub fn encoded_mac(&self) -> String {
        utf8_percent_encode(&self.lower_mac(), NON_ALPHANUMERIC).to_string()
    }
}

fn upper_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode_upper(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_is_deterministic() {
        let a = DeviceIdentity::derive("00:1A:79:AB:CD:EF");
        let b = DeviceIdentity::derive("00:1a:79:ab:cd:ef");
        assert_eq!(a.device_id, b.device_id);
        assert_eq!(a.signature, b.signature);
        assert_eq!(a.serial_number.len(), 13);
        assert_eq!(a.device_id.len(), 64);
        assert_ne!(a.device_id, a.device_id2);
    }

    #[test]
    fn test_encoded_mac() {
        let id = DeviceIdentity::derive("00:1A:79:AB:CD:EF");
        assert_eq!(id.lower_mac(), "00:1a:79:ab:cd:ef");
        assert_eq!(id.encoded_mac(), "00%3A1a%3A79%3Aab%3Acd%3Aef");
    }
}
