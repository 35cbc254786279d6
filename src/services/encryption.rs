use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::entities::EncryptedSecret;
use crate::error::{AppError, Result};

/// Decrypted key/value pairs of one secret bundle
pub type DecryptedSecrets = BTreeMap<String, SecretString>;

/// Serialized form of an encrypted secret bundle: every encryption config
/// with the records it encrypted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedDataBundle {
    #[serde(default)]
    pub entries: Vec<EncryptedDataEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedDataEntry {
    pub config: EncryptionConfig,
    #[serde(default)]
    pub records: Vec<EncryptedRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptionConfig {
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    pub encryption_type: EncryptionType,
    #[serde(default)]
    pub account_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EncryptionType {
    Local,
    AwsKms,
    GcpKms,
    AzureVault,
    Vault,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedRecord {
    /// Secret key, becomes the key in the decrypted map
    pub name: String,
    /// Base64 of nonce followed by ciphertext
    pub encrypted_value: String,
}

impl EncryptedDataBundle {
    pub fn parse(secret: &EncryptedSecret) -> Result<Self> {
        serde_json::from_slice(secret.as_bytes())
            .map_err(|e| AppError::DecryptionError(format!("Malformed secret bundle: {}", e)))
    }

    pub fn serialize(&self) -> Result<EncryptedSecret> {
        Ok(EncryptedSecret::new(serde_json::to_string(self)?))
    }
}

/// The decryption capability consumed by secret provisioning.
#[async_trait]
pub trait SecretDecryptor: Send + Sync {
    async fn decrypt(&self, secret: &EncryptedSecret) -> Result<DecryptedSecrets>;
}

/// Decrypts bundles whose records were encrypted locally with AES-256-GCM.
pub struct LocalSecretDecryptor {
    key: Key<Aes256Gcm>,
}

impl LocalSecretDecryptor {
    pub fn new(key_base64: &str) -> Result<Self> {
        let key_bytes = Base64::decode_vec(key_base64)
            .map_err(|e| AppError::ConfigurationError(format!("Invalid key format: {}", e)))?;

        if key_bytes.len() != 32 {
            return Err(AppError::ConfigurationError(
                "Key must be 32 bytes (256 bits) long".to_string(),
            ));
        }

        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);

        Ok(Self { key: *key })
    }

    pub fn from_env() -> Result<Self> {
        let key_base64 = std::env::var("DELEGATE_SECRET_KEY").map_err(|_| {
            AppError::ConfigurationError(
                "DELEGATE_SECRET_KEY environment variable not set".to_string(),
            )
        })?;

        Self::new(&key_base64)
    }

    pub fn generate_key() -> String {
        let key = Aes256Gcm::generate_key(OsRng);
        Base64::encode_string(key.as_slice())
    }

    /// Encrypt a single record value. Used by tooling and tests to produce
    /// bundles this decryptor accepts.
    pub fn encrypt_value(&self, plaintext: &str) -> Result<String> {
        let cipher = Aes256Gcm::new(&self.key);
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| AppError::DecryptionError(format!("Encryption failed: {}", e)))?;

        let mut combined = nonce.to_vec();
        combined.extend_from_slice(&ciphertext);

        Ok(Base64::encode_string(&combined))
    }

    /// Build a serialized single-config bundle from plain key/value pairs.
    pub fn seal(&self, config_uuid: &str, records: &[(&str, &str)]) -> Result<EncryptedSecret> {
        let records = records
            .iter()
            .map(|(name, value)| {
                Ok(EncryptedRecord {
                    name: name.to_string(),
                    encrypted_value: self.encrypt_value(value)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        EncryptedDataBundle {
            entries: vec![EncryptedDataEntry {
                config: EncryptionConfig {
                    uuid: config_uuid.to_string(),
                    name: "local".to_string(),
                    encryption_type: EncryptionType::Local,
                    account_id: String::new(),
                },
                records,
            }],
        }
        .serialize()
    }

    fn decrypt_value(&self, record: &EncryptedRecord) -> Result<SecretString> {
        let combined = Base64::decode_vec(&record.encrypted_value).map_err(|e| {
            AppError::DecryptionError(format!(
                "Invalid ciphertext format for '{}': {}",
                record.name, e
            ))
        })?;

        if combined.len() < 12 {
            return Err(AppError::DecryptionError(format!(
                "Ciphertext too short for '{}'",
                record.name
            )));
        }

        let (nonce_bytes, ciphertext_bytes) = combined.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        let cipher = Aes256Gcm::new(&self.key);
        let plaintext = cipher.decrypt(nonce, ciphertext_bytes).map_err(|_| {
            AppError::DecryptionError(format!("Decryption failed for '{}'", record.name))
        })?;

        String::from_utf8(plaintext)
            .map(SecretString::from)
            .map_err(|_| {
                AppError::DecryptionError(format!("Invalid UTF-8 in decrypted '{}'", record.name))
            })
    }
}

#[async_trait]
impl SecretDecryptor for LocalSecretDecryptor {
    async fn decrypt(&self, secret: &EncryptedSecret) -> Result<DecryptedSecrets> {
        let bundle = EncryptedDataBundle::parse(secret)?;
        let mut decrypted = DecryptedSecrets::new();

        for entry in &bundle.entries {
            if entry.config.encryption_type != EncryptionType::Local {
                return Err(AppError::DecryptionError(format!(
                    "Encryption config {} uses {:?}, only LOCAL is supported by this decryptor",
                    entry.config.uuid, entry.config.encryption_type
                )));
            }
            for record in &entry.records {
                decrypted.insert(record.name.clone(), self.decrypt_value(record)?);
            }
        }

        Ok(decrypted)
    }
}

// Factory function for creating the decryption service
pub fn create_secret_decryptor() -> Result<Arc<dyn SecretDecryptor>> {
    let service = LocalSecretDecryptor::from_env()?;
    Ok(Arc::new(service))
}
