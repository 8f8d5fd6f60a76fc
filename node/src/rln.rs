//! Rate-limiting nullifier (RLN) credentials and keystores.
//!
//! Credentials arrive as a JSON object with the keystore password, the Ethereum
//! client and contract addresses, and one or more private keys whose names end
//! with the credential id they belong to.

use crate::{
    flags::{FlagValue, Flags},
    variant::{Capability, Flavor},
    Error,
};
use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, warn};
use waku_interop_utils::Retry;

/// How long a keystore may take to appear after registration.
pub const KEYSTORE_WAIT: Retry = Retry::new(Duration::from_secs(180), Duration::from_millis(500));

const PASSWORD: &str = "rln-relay-cred-password";
const CLIENT_ADDRESS: &str = "rln-relay-eth-client-address";
const CONTRACT_ADDRESS: &str = "rln-relay-eth-contract-address";

/// Minimum number of entries a usable credential set has.
const MIN_ENTRIES: usize = 4;

/// Which credential set to use, and where it comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RlnRequest {
    /// JSON credentials.
    pub source: String,
    /// Credential id (suffix of the private key entry).
    pub id: String,
}

impl RlnRequest {
    pub fn new(source: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            id: id.into(),
        }
    }
}

/// Parsed credential set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    entries: BTreeMap<String, Option<String>>,
}

impl Credentials {
    pub fn parse(source: &str) -> Result<Self, Error> {
        let entries = serde_json::from_str(source)
            .map_err(|err| Error::Rln(format!("credentials are not a json object: {err}")))?;
        Ok(Self { entries })
    }

    /// Whether every required entry is present and set.
    pub fn is_complete(&self) -> bool {
        self.entries.len() >= MIN_ENTRIES && self.entries.values().all(Option::is_some)
    }

    fn value(&self, key: &str) -> Result<&str, Error> {
        self.entries
            .get(key)
            .and_then(|value| value.as_deref())
            .ok_or_else(|| Error::Rln(format!("{key} is not set")))
    }

    /// Private key whose entry name ends with `id`.
    pub fn private_key(&self, id: &str) -> Result<&str, Error> {
        let key = self
            .entries
            .keys()
            .find(|key| key.ends_with(id))
            .ok_or_else(|| Error::Rln("no matching key was found".into()))?;
        self.value(key)
    }
}

/// Flags, mounts and keystore location for an RLN-enabled container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Setup {
    pub flags: Flags,
    pub volumes: Vec<String>,
    pub keystore: PathBuf,
}

/// Path of the keystore for credential `id` under `dir`.
pub fn keystore_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("keystore_{id}")).join("keystore.json")
}

/// Build the RLN part of a container invocation.
///
/// `registration` selects the one-shot keystore generation subcommand instead of
/// a relay with RLN enabled. Incomplete credentials yield `Ok(None)` so callers
/// can proceed without RLN.
pub fn prepare(
    flavor: &dyn Flavor,
    request: &RlnRequest,
    dir: &Path,
    registration: bool,
) -> Result<Option<Setup>, Error> {
    let credentials = Credentials::parse(&request.source)?;
    if !credentials.is_complete() {
        warn!("one or more of required rln credentials were not set properly");
        return Ok(None);
    }
    let private_key = credentials.private_key(&request.id)?;
    if !flavor.supports(Capability::Rln) {
        return Err(Error::Unsupported {
            variant: flavor.variant(),
            operation: "rln",
        });
    }

    let mut flags = Flags::new();
    if registration {
        flags.set("generateRlnKeystore", FlagValue::Bare);
        flags.set("--execute", FlagValue::Bare);
    } else {
        flags.set("rln-relay", "true");
    }
    flags.set("rln-relay-cred-path", "/keystore/keystore.json");
    flags.set(PASSWORD, credentials.value(PASSWORD)?);
    flags.set(CLIENT_ADDRESS, credentials.value(CLIENT_ADDRESS)?);
    flags.set(CONTRACT_ADDRESS, credentials.value(CONTRACT_ADDRESS)?);
    flags.set("rln-relay-eth-private-key", private_key);

    let tree = dir.join(format!("rln_tree_{}", request.id));
    let keystore_dir = dir.join(format!("keystore_{}", request.id));
    let volumes = vec![
        format!("{}:/etc/rln_tree", tree.display()),
        format!("{}:/keystore", keystore_dir.display()),
    ];
    Ok(Some(Setup {
        flags,
        volumes,
        keystore: keystore_path(dir, &request.id),
    }))
}

/// Wait for a keystore file to appear.
pub async fn wait_for_keystore(path: &Path) -> Result<(), Error> {
    wait_for_keystore_with(path, KEYSTORE_WAIT).await
}

pub async fn wait_for_keystore_with(path: &Path, policy: Retry) -> Result<(), Error> {
    debug!(path = ?path, "waiting for keystore");
    policy
        .run(|| async {
            if tokio::fs::try_exists(path).await? {
                Ok(())
            } else {
                Err(Error::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} does not exist", path.display()),
                )))
            }
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::{GoWaku, Nwaku};

    const CREDENTIALS: &str = r#"{
        "rln-relay-cred-password": "password",
        "rln-relay-eth-client-address": "wss://sepolia.example",
        "rln-relay-eth-contract-address": "0xF471d71E9b1455bBF4b85d475afb9BB0954A29c4",
        "rln-relay-eth-private-key-1": "0xaaaa",
        "rln-relay-eth-private-key-2": "0xbbbb"
    }"#;

    #[test]
    fn test_credentials() {
        let credentials = Credentials::parse(CREDENTIALS).unwrap();
        assert!(credentials.is_complete());
        assert_eq!(credentials.private_key("1").unwrap(), "0xaaaa");
        assert_eq!(credentials.private_key("2").unwrap(), "0xbbbb");
        assert!(credentials.private_key("3").is_err());

        let incomplete = Credentials::parse(r#"{"rln-relay-cred-password": null, "a": "1", "b": "2", "c": "3"}"#).unwrap();
        assert!(!incomplete.is_complete());
        assert!(Credentials::parse("not json").is_err());
    }

    #[test]
    fn test_prepare_relay() {
        let dir = Path::new("/work");
        let setup = prepare(&Nwaku, &RlnRequest::new(CREDENTIALS, "2"), dir, false)
            .unwrap()
            .unwrap();
        assert_eq!(setup.flags.get_text("rln-relay"), Some("true"));
        assert_eq!(
            setup.flags.get_text("rln-relay-eth-private-key"),
            Some("0xbbbb")
        );
        assert_eq!(
            setup.volumes,
            vec![
                "/work/rln_tree_2:/etc/rln_tree".to_string(),
                "/work/keystore_2:/keystore".to_string()
            ]
        );
        assert_eq!(setup.keystore, PathBuf::from("/work/keystore_2/keystore.json"));
    }

    #[test]
    fn test_prepare_registration() {
        let setup = prepare(&Nwaku, &RlnRequest::new(CREDENTIALS, "1"), Path::new("."), true)
            .unwrap()
            .unwrap();
        let args = setup.flags.to_args();
        assert_eq!(args[0], "generateRlnKeystore");
        assert_eq!(args[1], "--execute");
        assert!(args.contains(&"--rln-relay-cred-password=password".to_string()));
        assert!(!setup.flags.contains("rln-relay"));
    }

    #[test]
    fn test_prepare_incomplete_and_unsupported() {
        let incomplete = RlnRequest::new(r#"{"rln-relay-cred-password": "p"}"#, "1");
        assert!(prepare(&Nwaku, &incomplete, Path::new("."), false)
            .unwrap()
            .is_none());

        let err = prepare(&GoWaku, &RlnRequest::new(CREDENTIALS, "1"), Path::new("."), false)
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
    }

    #[tokio::test]
    async fn test_wait_for_keystore() {
        let dir = tempfile::tempdir().unwrap();
        let path = keystore_path(dir.path(), "1");
        let policy = Retry::new(Duration::from_secs(5), Duration::from_millis(20));

        // Keystore shows up while waiting
        let writer = {
            let path = path.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
                tokio::fs::write(&path, b"{}").await.unwrap();
            })
        };
        wait_for_keystore_with(&path, policy).await.unwrap();
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_missing_keystore() {
        let dir = tempfile::tempdir().unwrap();
        let path = keystore_path(dir.path(), "9");
        let policy = Retry::new(Duration::from_millis(100), Duration::from_millis(20));
        let err = wait_for_keystore_with(&path, policy).await.unwrap_err();
        assert!(err.mentions("does not exist"));
    }
}
