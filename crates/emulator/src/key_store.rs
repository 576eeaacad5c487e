use crate::error::EmulatorError;

/// Certificates and private keys loaded from a password-protected PKCS12 archive.
#[derive(Debug, Clone, Default)]
pub struct KeyStore {
    certificates: Vec<Vec<u8>>,
    private_keys: Vec<Vec<u8>>,
}

impl KeyStore {
    /// Parses `bytes` as PKCS12, decrypting with `password`.
    ///
    /// Fails with [`EmulatorError::Format`] when the bytes are not a PKCS12
    /// archive or the password does not verify.
    pub fn from_pkcs12(bytes: &[u8], password: &str) -> Result<Self, EmulatorError> {
        let pfx = p12::PFX::parse(bytes)
            .map_err(|e| EmulatorError::Format(format!("not a PKCS12 archive: {:?}", e)))?;

        if !pfx.verify_mac(password) {
            return Err(EmulatorError::Format(
                "password rejected: integrity check failed".to_string(),
            ));
        }

        let certificates = pfx
            .cert_x509_bags(password)
            .map_err(|e| EmulatorError::Format(format!("unreadable certificates: {:?}", e)))?;
        let private_keys = pfx
            .key_bags(password)
            .map_err(|e| EmulatorError::Format(format!("unreadable private keys: {:?}", e)))?;

        Ok(KeyStore {
            certificates,
            private_keys,
        })
    }

    /// Number of entries (certificates and private keys).
    pub fn len(&self) -> usize {
        self.certificates.len() + self.private_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// DER-encoded X.509 certificates.
    pub fn certificates(&self) -> &[Vec<u8>] {
        &self.certificates
    }

    /// PKCS8 DER-encoded private keys.
    pub fn private_keys(&self) -> &[Vec<u8>] {
        &self.private_keys
    }

    /// An HTTP client that trusts every certificate in the store, for talking
    /// to the emulator's self-signed endpoint.
    pub fn http_client(&self) -> Result<reqwest::Client, EmulatorError> {
        let mut builder = reqwest::Client::builder();
        for der in &self.certificates {
            let certificate = reqwest::Certificate::from_der(der)
                .map_err(|e| EmulatorError::Tls(e.to_string()))?;
            builder = builder.add_root_certificate(certificate);
        }
        builder
            .build()
            .map_err(|e| EmulatorError::Tls(e.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn pkcs12_fixture(password: &str) -> Vec<u8> {
        p12::PFX::new(
            b"emulator certificate",
            b"emulator private key",
            None,
            password,
            "cosmosdb-emulator",
        )
        .expect("fixture archive")
        .to_der()
    }

    #[test]
    fn test_loads_entries_with_password() {
        let store = KeyStore::from_pkcs12(&pkcs12_fixture("secret"), "secret").unwrap();
        assert_eq!(store.certificates(), &[b"emulator certificate".to_vec()]);
        assert_eq!(store.private_keys(), &[b"emulator private key".to_vec()]);
        assert_eq!(store.len(), 2);
        assert!(!store.is_empty());
    }

    #[test]
    fn test_wrong_password_is_a_format_error() {
        let err = KeyStore::from_pkcs12(&pkcs12_fixture("secret"), "guess").unwrap_err();
        assert!(matches!(err, EmulatorError::Format(_)));
    }

    #[test]
    fn test_garbage_is_a_format_error() {
        let err = KeyStore::from_pkcs12(b"-----BEGIN CERTIFICATE-----", "secret").unwrap_err();
        assert!(matches!(err, EmulatorError::Format(_)));
    }

    #[test]
    fn test_empty_store_builds_client() {
        let store = KeyStore::default();
        assert!(store.is_empty());
        assert!(store.http_client().is_ok());
    }
}
