//! Admin key files.
//!
//! A key file holds one hex-encoded Ed25519 secret and nothing else. On
//! Unix it is created with mode `0600`.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use remit_protocol::crypto::keys::Keypair;

/// File name inside the data directory.
pub const ADMIN_KEY_FILE: &str = "admin.key";

/// Generates a keypair and writes it to `data_dir/admin.key`.
///
/// Refuses to replace an existing key unless `force` is set.
pub fn generate(data_dir: &Path, force: bool) -> Result<(PathBuf, Keypair)> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let key_path = data_dir.join(ADMIN_KEY_FILE);
    if key_path.exists() && !force {
        bail!(
            "{} already exists (pass --force to replace it)",
            key_path.display()
        );
    }

    let keypair = Keypair::generate();
    std::fs::write(&key_path, keypair.secret_hex())
        .with_context(|| format!("failed to write admin key to {}", key_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to restrict {}", key_path.display()))?;
    }

    Ok((key_path, keypair))
}

/// Reads a key file written by [`generate`].
pub fn load(path: &Path) -> Result<Keypair> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read key file {}", path.display()))?;
    Keypair::from_secret_hex(&contents)
        .with_context(|| format!("{} does not hold a valid secret key", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let (path, keypair) = generate(dir.path(), false).unwrap();
        assert_eq!(path, dir.path().join(ADMIN_KEY_FILE));

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.address(), keypair.address());
    }

    #[test]
    fn existing_key_is_kept_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let (path, first) = generate(dir.path(), false).unwrap();
        assert!(generate(dir.path(), false).is_err());
        assert_eq!(load(&path).unwrap().address(), first.address());

        let (_, second) = generate(dir.path(), true).unwrap();
        assert_ne!(second.address(), first.address());
    }

    #[cfg(unix)]
    #[test]
    fn key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = generate(dir.path(), false).unwrap();
        let mode = std::fs::metadata(path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn garbage_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(ADMIN_KEY_FILE);
        std::fs::write(&path, "not a key").unwrap();
        assert!(load(&path).is_err());
    }
}
