//! Encrypted secret store.
//!
//! Values are sealed with AES-256-GCM under a key derived (SHA-256) from
//! the stable machine identifier, so a copied database file is useless
//! on another host. Plaintext exists only in the memory of this process
//! and is never logged.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use rusqlite::{OptionalExtension, params};
use sha2::{Digest, Sha256};

use crate::database::{ChangeEvent, Database};
use crate::error::{StorageError, StorageResult};
use crate::models::{SecretCategory, SecretInfo};
use crate::row;

const NONCE_LEN: usize = 12;

/// Encrypted name/value store.
#[derive(Debug, Clone)]
pub struct SecretStore {
    db: Database,
    cipher_key: [u8; 32],
}

impl SecretStore {
    /// Build a store keyed to this machine.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self::with_key_material(db, gobby_core::machine_id())
    }

    /// Build a store with explicit key material (tests).
    #[must_use]
    pub fn with_key_material(db: Database, material: &str) -> Self {
        let digest = Sha256::digest(material.as_bytes());
        let mut cipher_key = [0u8; 32];
        cipher_key.copy_from_slice(&digest);
        Self { db, cipher_key }
    }

    /// Store (or replace) a secret.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Crypto`] when sealing fails.
    pub fn set(&self, name: &str, category: SecretCategory, value: &str) -> StorageResult<()> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.cipher_key));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, value.as_bytes())
            .map_err(|_| StorageError::Crypto("encryption failed".to_string()))?;

        self.db.with_transaction(|conn| {
            conn.execute(
                "INSERT INTO secrets (name, category, ciphertext, nonce, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(name) DO UPDATE SET
                     category = excluded.category,
                     ciphertext = excluded.ciphertext,
                     nonce = excluded.nonce",
                params![
                    name,
                    category.as_str(),
                    ciphertext,
                    nonce_bytes.as_slice(),
                    row::now()
                ],
            )?;
            Ok((
                (),
                vec![ChangeEvent {
                    entity: "secret",
                    op: "updated",
                    id: name.to_string(),
                }],
            ))
        })
    }

    /// Decrypt and return a secret value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown names and
    /// [`StorageError::Crypto`] when the stored blob cannot be opened
    /// (wrong machine, corrupt row).
    pub fn get(&self, name: &str) -> StorageResult<String> {
        let (ciphertext, nonce_bytes): (Vec<u8>, Vec<u8>) = self
            .db
            .with_conn(|conn| {
                let pair = conn
                    .query_row(
                        "SELECT ciphertext, nonce FROM secrets WHERE name = ?1",
                        params![name],
                        |r| Ok((r.get(0)?, r.get(1)?)),
                    )
                    .optional()?;
                pair.ok_or_else(|| StorageError::not_found("secret", name))
            })?;

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.cipher_key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| StorageError::Crypto(format!("cannot decrypt secret '{name}'")))?;
        String::from_utf8(plaintext)
            .map_err(|_| StorageError::Crypto(format!("secret '{name}' is not utf-8")))
    }

    /// List secret metadata. Values are never included.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub fn list(&self) -> StorageResult<Vec<SecretInfo>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT name, category, created_at FROM secrets ORDER BY name")?;
            let rows = stmt.query_map([], |r| {
                let category: String = r.get("category")?;
                Ok(SecretInfo {
                    name: r.get("name")?,
                    category: SecretCategory::parse(&category).unwrap_or_default(),
                    created_at: row::ts_column(r, "created_at")?,
                })
            })?;
            let mut secrets = Vec::new();
            for secret in rows {
                secrets.push(secret?);
            }
            Ok(secrets)
        })
    }

    /// Delete a secret.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for unknown names.
    pub fn delete(&self, name: &str) -> StorageResult<()> {
        self.db.with_transaction(|conn| {
            let deleted = conn.execute("DELETE FROM secrets WHERE name = ?1", params![name])?;
            if deleted == 0 {
                return Err(StorageError::not_found("secret", name));
            }
            Ok((
                (),
                vec![ChangeEvent {
                    entity: "secret",
                    op: "deleted",
                    id: name.to_string(),
                }],
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SecretStore {
        SecretStore::with_key_material(Database::open_in_memory().unwrap(), "test-machine")
    }

    #[test]
    fn test_round_trip() {
        let store = store();
        store.set("api_key", SecretCategory::Llm, "sk-something").unwrap();
        assert_eq!(store.get("api_key").unwrap(), "sk-something");
    }

    #[test]
    fn test_overwrite_replaces_value() {
        let store = store();
        store.set("k", SecretCategory::General, "one").unwrap();
        store.set("k", SecretCategory::General, "two").unwrap();
        assert_eq!(store.get("k").unwrap(), "two");
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_list_has_no_values() {
        let store = store();
        store.set("k", SecretCategory::Mcp, "hidden").unwrap();
        let listed = store.list().unwrap();
        assert_eq!(listed[0].name, "k");
        assert_eq!(listed[0].category, SecretCategory::Mcp);
        // SecretInfo has no value field; serialize to be sure.
        let json = serde_json::to_string(&listed).unwrap();
        assert!(!json.contains("hidden"));
    }

    #[test]
    fn test_wrong_machine_key_fails_closed() {
        let db = Database::open_in_memory().unwrap();
        let writer = SecretStore::with_key_material(db.clone(), "machine-a");
        writer.set("k", SecretCategory::General, "v").unwrap();

        let reader = SecretStore::with_key_material(db, "machine-b");
        assert!(matches!(reader.get("k"), Err(StorageError::Crypto(_))));
    }

    #[test]
    fn test_delete() {
        let store = store();
        store.set("k", SecretCategory::General, "v").unwrap();
        store.delete("k").unwrap();
        assert!(matches!(store.get("k"), Err(StorageError::NotFound { .. })));
        assert!(store.delete("k").is_err());
    }
}
