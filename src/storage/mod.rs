//! Token persistence.
//!
//! The only durable state is a dotenv-shaped `KEY=VALUE` text file holding
//! both accounts' emails and token pairs. It is rewritten after every
//! token change so an interrupted run resumes with current credentials.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::types::Account;

/// Read the token file into a key-value map.
/// Returns None if the file doesn't exist (fresh start).
pub fn load_entries(path: &Path) -> Result<Option<BTreeMap<String, String>>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read token file {}", path.display()))?;

    let mut entries = BTreeMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            entries.insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    Ok(Some(entries))
}

/// Merge one account's email and token pair into the token file and
/// rewrite it. Entries for the other account (and anything else in the
/// file) are preserved. The write goes through a temp file + rename so a
/// crash mid-write never truncates the credentials.
pub fn record_tokens(path: &Path, account: &Account) -> Result<()> {
    let mut entries = load_entries(path)?.unwrap_or_default();

    let prefix = format!("ACCOUNT_{}", account.slot);
    entries.insert(format!("{prefix}_EMAIL"), account.email.clone());
    entries.insert(format!("{prefix}_TOKEN"), account.access_token_text());
    entries.insert(
        format!("{prefix}_REFRESH_TOKEN"),
        account.refresh_token_text(),
    );

    write_entries(path, &entries)?;
    debug!(path = %path.display(), account = %account.slot, "Tokens persisted");
    Ok(())
}

fn write_entries(path: &Path, entries: &BTreeMap<String, String>) -> Result<()> {
    let mut contents = String::new();
    for (key, value) in entries {
        contents.push_str(key);
        contents.push('=');
        contents.push_str(value);
        contents.push('\n');
    }

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, &contents)
        .with_context(|| format!("Failed to write token file {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace token file {}", path.display()))?;
    Ok(())
}

/// Delete the token file (for testing or reset).
pub fn delete(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to delete token file {}", path.display()))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AccountSlot;
    use secrecy::SecretString;
    use std::path::PathBuf;

    fn temp_path() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("shuttle_test_tokens_{}.env", uuid::Uuid::new_v4()));
        p
    }

    fn account(slot: AccountSlot, email: &str, token: &str, refresh: &str) -> Account {
        Account {
            slot,
            email: email.to_string(),
            pay_id: String::new(),
            wallet: String::new(),
            access_token: Some(SecretString::new(token.to_string())),
            refresh_token: Some(SecretString::new(refresh.to_string())),
            proxy: "http://proxy:10000".to_string(),
        }
    }

    #[test]
    fn test_record_and_load() {
        let path = temp_path();
        let a = account(AccountSlot::A, "a@example.com", "tok-a", "ref-a");
        record_tokens(&path, &a).unwrap();

        let entries = load_entries(&path).unwrap().unwrap();
        assert_eq!(entries["ACCOUNT_A_EMAIL"], "a@example.com");
        assert_eq!(entries["ACCOUNT_A_TOKEN"], "tok-a");
        assert_eq!(entries["ACCOUNT_A_REFRESH_TOKEN"], "ref-a");

        delete(&path).unwrap();
    }

    #[test]
    fn test_record_preserves_other_account() {
        let path = temp_path();
        let a = account(AccountSlot::A, "a@example.com", "tok-a", "ref-a");
        let b = account(AccountSlot::B, "b@example.com", "tok-b", "ref-b");
        record_tokens(&path, &a).unwrap();
        record_tokens(&path, &b).unwrap();

        // Rotating A's token must not clobber B's entries.
        let mut a2 = a.clone();
        a2.access_token = Some(SecretString::new("tok-a2".to_string()));
        record_tokens(&path, &a2).unwrap();

        let entries = load_entries(&path).unwrap().unwrap();
        assert_eq!(entries["ACCOUNT_A_TOKEN"], "tok-a2");
        assert_eq!(entries["ACCOUNT_B_TOKEN"], "tok-b");
        assert_eq!(entries["ACCOUNT_B_EMAIL"], "b@example.com");

        delete(&path).unwrap();
    }

    #[test]
    fn test_missing_tokens_written_empty() {
        let path = temp_path();
        let mut a = account(AccountSlot::A, "a@example.com", "", "");
        a.access_token = None;
        a.refresh_token = None;
        record_tokens(&path, &a).unwrap();

        let entries = load_entries(&path).unwrap().unwrap();
        assert_eq!(entries["ACCOUNT_A_TOKEN"], "");
        assert_eq!(entries["ACCOUNT_A_REFRESH_TOKEN"], "");

        delete(&path).unwrap();
    }

    #[test]
    fn test_load_nonexistent() {
        let path = PathBuf::from("/tmp/shuttle_nonexistent_tokens_12345.env");
        assert!(load_entries(&path).unwrap().is_none());
    }

    #[test]
    fn test_load_skips_comments_and_blanks() {
        let path = temp_path();
        std::fs::write(&path, "# comment\n\nACCOUNT_A_TOKEN=tok\nbroken-line\n").unwrap();
        let entries = load_entries(&path).unwrap().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries["ACCOUNT_A_TOKEN"], "tok");
        delete(&path).unwrap();
    }

    #[test]
    fn test_delete_nonexistent_ok() {
        assert!(delete(Path::new("/tmp/shuttle_does_not_exist_xyz.env")).is_ok());
    }
}
