use std::ffi::OsString;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::keys::{Key, ListingFormat};
use crate::{CryptoError, CryptoGateway, Result};

/// GnuPG over its command line.
///
/// Every encrypt/decrypt stages data through a fresh private temp directory
/// that is removed when the call returns, whatever the outcome. Concurrent
/// calls never share scratch files.
#[derive(Debug, Clone)]
pub struct GpgGateway {
    program: PathBuf,
    homedir: Option<PathBuf>,
    keyserver: Option<String>,
    listing: ListingFormat,
    scratch: Option<PathBuf>,
}

impl GpgGateway {
    pub fn new() -> Self {
        Self {
            program: default_program(),
            homedir: None,
            keyserver: None,
            listing: ListingFormat::default(),
            scratch: None,
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Use a keyring other than the invoking user's default.
    pub fn with_homedir(mut self, homedir: impl Into<PathBuf>) -> Self {
        self.homedir = Some(homedir.into());
        self
    }

    pub fn with_keyserver(mut self, keyserver: impl Into<String>) -> Self {
        self.keyserver = Some(keyserver.into());
        self
    }

    pub fn with_listing_format(mut self, listing: ListingFormat) -> Self {
        self.listing = listing;
        self
    }

    /// Parent for per-call scratch directories. Defaults to the system temp dir.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch = Some(dir.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        if let Some(home) = &self.homedir {
            cmd.arg("--homedir").arg(home);
        }
        cmd.args(["--batch", "--yes", "--display-charset", "utf-8"]);
        cmd.stdin(Stdio::null());
        cmd
    }

    fn scratch(&self) -> io::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("talkie-");
        match &self.scratch {
            Some(dir) => builder.tempdir_in(dir),
            None => builder.tempdir(),
        }
    }

    /// Run to completion; a non-zero exit becomes [`CryptoError::Subprocess`].
    fn run(&self, command: &'static str, args: Vec<OsString>) -> Result<Output> {
        let output = self.command().args(&args).output()?;
        if !output.status.success() {
            return Err(CryptoError::Subprocess {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }

    fn list_keys(&self, mode: &'static str, search: &str) -> Result<Vec<Key>> {
        let mut args: Vec<OsString> = match self.listing {
            ListingFormat::Colons => vec!["--with-colons".into(), "--fixed-list-mode".into()],
            ListingFormat::Human => vec!["--keyid-format".into(), "short".into()],
        };
        args.push(mode.into());
        let search = search.trim();
        if !search.is_empty() {
            args.push(search.into());
        }

        let output = self.command().args(&args).output()?;
        let keys = self.listing.parse(&String::from_utf8_lossy(&output.stdout));
        if output.status.success() {
            return Ok(keys);
        }

        // A search with no match exits 2; only that is an empty listing.
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !search.is_empty() && keys.is_empty() && output.status.code() == Some(2) && reports_no_match(&stderr) {
            debug!("gpg {} {:?}: no match", mode, search);
            return Ok(keys);
        }

        Err(CryptoError::Subprocess {
            command: mode.trim_start_matches('-'),
            status: output.status.to_string(),
            stderr,
        })
    }
}

impl Default for GpgGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoGateway for GpgGateway {
    fn encrypt(&self, sender: &str, recipient: &str, plaintext: &mut dyn Read) -> Result<Vec<u8>> {
        if sender.is_empty() {
            return Err(CryptoError::InvalidArgument("empty sender identity"));
        }
        if recipient.is_empty() {
            return Err(CryptoError::InvalidArgument("empty recipient"));
        }

        let scratch = self.scratch()?;
        let src = scratch.path().join("message");
        let dst = scratch.path().join("message.gpg");
        stage(plaintext, &src)?;

        self.run(
            "encrypt",
            vec![
                "--trust-model".into(),
                "always".into(),
                "-u".into(),
                sender.into(),
                "-r".into(),
                recipient.into(),
                "-o".into(),
                dst.clone().into(),
                "--sign".into(),
                "--encrypt".into(),
                src.into(),
            ],
        )?;

        let ciphertext = std::fs::read(&dst)?;
        debug!("Encrypted {} bytes for {}", ciphertext.len(), recipient);
        Ok(ciphertext)
    }

    fn decrypt(&self, identity: &str, ciphertext: &mut dyn Read) -> Result<Vec<u8>> {
        if identity.is_empty() {
            return Err(CryptoError::InvalidArgument("empty identity"));
        }
        if self.list_secret_keys(identity)?.is_empty() {
            return Err(CryptoError::NoSecretKey(identity.to_string()));
        }

        let scratch = self.scratch()?;
        let src = scratch.path().join("message.gpg");
        let dst = scratch.path().join("message");
        stage(ciphertext, &src)?;

        self.run(
            "decrypt",
            vec![
                "-u".into(),
                identity.into(),
                "-o".into(),
                dst.clone().into(),
                "--decrypt".into(),
                src.into(),
            ],
        )?;

        Ok(std::fs::read(&dst)?)
    }

    fn list_public_keys(&self, search: &str) -> Result<Vec<Key>> {
        self.list_keys("--list-public-keys", search)
    }

    fn list_secret_keys(&self, search: &str) -> Result<Vec<Key>> {
        self.list_keys("--list-secret-keys", search)
    }

    fn fetch_remote_key(&self, fingerprint: &str) -> Result<()> {
        if fingerprint.trim().is_empty() {
            return Err(CryptoError::InvalidArgument("empty fingerprint"));
        }

        let mut args: Vec<OsString> = Vec::new();
        if let Some(server) = &self.keyserver {
            args.push("--keyserver".into());
            args.push(server.into());
        }
        args.push("--recv-keys".into());
        args.push(fingerprint.trim().into());

        self.run("recv-keys", args).inspect_err(|e| warn!("Key fetch for {} failed: {}", fingerprint, e))?;
        info!("Imported key {} from key server", fingerprint);
        Ok(())
    }
}

fn reports_no_match(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    ["no public key", "no secret key", "not found"]
        .iter()
        .any(|needle| stderr.contains(needle))
}

fn stage(src: &mut dyn Read, path: &Path) -> io::Result<()> {
    let mut file = File::create(path)?;
    io::copy(src, &mut file)?;
    file.sync_all()
}

fn default_program() -> PathBuf {
    let candidate = if cfg!(target_os = "macos") {
        "/usr/local/bin/gpg"
    } else {
        "/usr/bin/gpg"
    };
    if Path::new(candidate).exists() {
        PathBuf::from(candidate)
    } else {
        PathBuf::from("gpg")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fresh keyring with one passphrase-less key. Needs `gpg` on the host.
    fn ephemeral_keyring(uid: &str) -> (tempfile::TempDir, GpgGateway) {
        let home = tempfile::tempdir().unwrap();
        let gateway = GpgGateway::new().with_homedir(home.path());
        let status = gateway
            .command()
            .args(["--pinentry-mode", "loopback", "--passphrase", ""])
            .args(["--quick-generate-key", uid, "default", "default", "never"])
            .status()
            .unwrap();
        assert!(status.success());
        (home, gateway)
    }

    #[test]
    fn missing_binary_is_an_io_error() {
        let gateway = GpgGateway::new().with_program("/nonexistent/talkie-gpg");
        let err = gateway.encrypt("a", "b", &mut &b"hello"[..]).unwrap_err();
        assert!(matches!(err, CryptoError::Io(_)));
    }

    #[test]
    fn empty_identities_are_rejected_before_spawning() {
        let gateway = GpgGateway::new().with_program("/nonexistent/talkie-gpg");
        assert!(matches!(
            gateway.encrypt("", "b", &mut &b""[..]),
            Err(CryptoError::InvalidArgument(_))
        ));
        assert!(matches!(
            gateway.decrypt("", &mut &b""[..]),
            Err(CryptoError::InvalidArgument(_))
        ));
        assert!(matches!(gateway.fetch_remote_key(" "), Err(CryptoError::InvalidArgument(_))));
    }

    /// Stand-in gpg: copies the last argument to the `-o` path.
    #[cfg(unix)]
    const COPY_TO_OUTPUT: &str = r#"out=""
while [ $# -gt 1 ]; do
  [ "$1" = "-o" ] && out="$2"
  shift
done
cp "$1" "$out""#;

    /// Writes an executable shell script standing in for gpg.
    #[cfg(unix)]
    fn fake_gpg(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("gpg");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Gateway running `body` as its gpg, scratching under a private dir.
    #[cfg(unix)]
    fn scripted(body: &str) -> (tempfile::TempDir, tempfile::TempDir, GpgGateway) {
        let bin = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let gateway = GpgGateway::new()
            .with_program(fake_gpg(bin.path(), body))
            .with_scratch_dir(scratch.path());
        (bin, scratch, gateway)
    }

    #[cfg(unix)]
    fn leftovers(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[cfg(unix)]
    #[test]
    fn encrypt_removes_scratch_files_on_success() {
        let (_bin, scratch, gateway) = scripted(COPY_TO_OUTPUT);

        let out = gateway.encrypt("AAA111", "BBB222", &mut &b"payload"[..]).unwrap();
        assert_eq!(out, b"payload");
        assert_eq!(leftovers(scratch.path()), 0);
    }

    #[cfg(unix)]
    #[test]
    fn tool_failure_is_a_subprocess_error_and_cleans_up() {
        let (_bin, scratch, gateway) = scripted("echo 'gpg: signing failed: General error' >&2\nexit 2");

        let err = gateway.encrypt("AAA111", "BBB222", &mut &b"payload"[..]).unwrap_err();
        match err {
            CryptoError::Subprocess { command, stderr, .. } => {
                assert_eq!(command, "encrypt");
                assert!(stderr.contains("General error"), "{stderr}");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(leftovers(scratch.path()), 0);
    }

    #[cfg(unix)]
    #[test]
    fn concurrent_encrypts_use_separate_scratch_dirs() {
        let bin = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let log = bin.path().join("inputs.log");
        let body = format!("sleep 1\nfor last; do :; done\necho \"$last\" >> '{}'\n{}", log.display(), COPY_TO_OUTPUT);
        let gateway = GpgGateway::new()
            .with_program(fake_gpg(bin.path(), &body))
            .with_scratch_dir(scratch.path());

        let (first, second) = std::thread::scope(|s| {
            let a = s.spawn(|| gateway.encrypt("AAA111", "BBB222", &mut &b"first"[..]));
            let b = s.spawn(|| gateway.encrypt("AAA111", "BBB222", &mut &b"second"[..]));
            (a.join().unwrap(), b.join().unwrap())
        });
        assert_eq!(first.unwrap(), b"first");
        assert_eq!(second.unwrap(), b"second");

        let inputs = std::fs::read_to_string(&log).unwrap();
        let dirs: Vec<_> = inputs.lines().map(|l| Path::new(l).parent().unwrap().to_path_buf()).collect();
        assert_eq!(dirs.len(), 2);
        assert_ne!(dirs[0], dirs[1]);
        assert_eq!(leftovers(scratch.path()), 0);
    }

    #[cfg(unix)]
    #[test]
    fn decrypt_stages_through_scratch() {
        let body = format!(
            "case \" $* \" in\n  *\" --list-secret-keys \"*)\n    printf 'sec:u:3072:1:AAAA1111AAAA1111:1614643200::::::scESC:\\nuid:u::::::::Alice <alice@example.com>:\\n'\n    exit 0 ;;\nesac\n{}",
            COPY_TO_OUTPUT
        );
        let (_bin, scratch, gateway) = scripted(&body);

        let plain = gateway.decrypt("AAAA1111AAAA1111", &mut &b"sealed"[..]).unwrap();
        assert_eq!(plain, b"sealed");
        assert_eq!(leftovers(scratch.path()), 0);
    }

    #[cfg(unix)]
    #[test]
    fn broken_keyring_is_not_an_empty_listing() {
        let (_bin, _scratch, gateway) =
            scripted("echo \"gpg: keyblock resource '/x/pubring.kbx': General error\" >&2\nexit 2");

        assert!(matches!(gateway.list_public_keys(""), Err(CryptoError::Subprocess { .. })));
        assert!(matches!(gateway.list_secret_keys("AAA111"), Err(CryptoError::Subprocess { .. })));
        // the tool failure surfaces instead of a missing key
        assert!(matches!(
            gateway.decrypt("AAA111", &mut &b"sealed"[..]),
            Err(CryptoError::Subprocess { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn unmatched_search_is_an_empty_listing() {
        let (_bin, _scratch, gateway) = scripted("echo 'gpg: error reading key: No public key' >&2\nexit 2");
        assert!(gateway.list_public_keys("NOPE").unwrap().is_empty());

        let (_bin, _scratch, gateway) = scripted("echo 'gpg: error reading key: No secret key' >&2\nexit 2");
        assert!(gateway.list_secret_keys("NOPE").unwrap().is_empty());
        assert!(matches!(
            gateway.decrypt("NOPE", &mut &b"sealed"[..]),
            Err(CryptoError::NoSecretKey(_))
        ));

        // the same stderr without a search term is still a failure
        assert!(matches!(gateway.list_secret_keys(""), Err(CryptoError::Subprocess { .. })));
    }

    #[test]
    #[ignore = "requires a gpg binary"]
    fn gpg_round_trip() {
        let (_home, gateway) = ephemeral_keyring("Tester <tester@example.com>");

        let secret = gateway.list_secret_keys("tester@example.com").unwrap();
        assert_eq!(secret.len(), 1);
        let fingerprint = secret[0].fingerprint.clone();

        let ciphertext = gateway.encrypt(&fingerprint, &fingerprint, &mut &b"hello"[..]).unwrap();
        assert_ne!(ciphertext, b"hello");

        let plaintext = gateway.decrypt(&fingerprint, &mut ciphertext.as_slice()).unwrap();
        assert_eq!(plaintext, b"hello");
    }

    #[test]
    #[ignore = "requires a gpg binary"]
    fn gpg_decrypt_without_secret_key_fails() {
        let (_home, gateway) = ephemeral_keyring("Tester <tester@example.com>");
        let err = gateway.decrypt("NOSUCHKEY", &mut &b"junk"[..]).unwrap_err();
        assert!(matches!(err, CryptoError::NoSecretKey(_)));
    }

    #[test]
    #[ignore = "requires a gpg binary"]
    fn gpg_unknown_search_is_empty() {
        let (_home, gateway) = ephemeral_keyring("Tester <tester@example.com>");
        assert!(gateway.list_public_keys("nobody@example.invalid").unwrap().is_empty());
        assert_eq!(gateway.list_public_keys("").unwrap().len(), 1);
    }

    #[test]
    #[ignore = "requires a gpg binary"]
    fn gpg_listing_formats_agree() {
        let (_home, gateway) = ephemeral_keyring("Tester <tester@example.com>");
        let full = gateway.list_public_keys("").unwrap();
        let short = gateway
            .clone()
            .with_listing_format(ListingFormat::Human)
            .list_public_keys("")
            .unwrap();

        assert_eq!(full.len(), 1);
        assert_eq!(short.len(), 1);
        assert_eq!(full[0].email, short[0].email);
        assert!(full[0].fingerprint.ends_with(&short[0].fingerprint));
    }
}
