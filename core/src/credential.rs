//! RPC credential lookup from the node's data directory.
//!
//! Nothing here is cached: the node rewrites its cookie on every start, so
//! callers resolve again for each use.

use std::path::{Path, PathBuf};

use crate::error::HarnessError;
use crate::types::Credential;

pub const COOKIE_FILE_NAME: &str = ".cookie";
pub const DEFAULT_CONF_NAME: &str = "BGL.conf";

#[derive(Debug, Clone)]
pub struct CredentialResolver {
    datadir: PathBuf,
    chain: String,
    conf_name: String,
}

impl CredentialResolver {
    pub fn new(datadir: impl Into<PathBuf>, chain: impl Into<String>) -> Self {
        Self {
            datadir: datadir.into(),
            chain: chain.into(),
            conf_name: DEFAULT_CONF_NAME.to_owned(),
        }
    }

    pub fn with_conf_name(mut self, conf_name: impl Into<String>) -> Self {
        self.conf_name = conf_name.into();
        self
    }

    pub fn cookie_path(&self) -> PathBuf {
        self.datadir.join(&self.chain).join(COOKIE_FILE_NAME)
    }

    pub fn conf_path(&self) -> PathBuf {
        self.datadir.join(&self.conf_name)
    }

    pub fn cookie_exists(&self) -> bool {
        self.cookie_path().is_file()
    }

    /// Read the current credential. Explicit `rpcuser=`/`rpcpassword=` lines in
    /// the node config are taken first; a cookie, when present, overrides them.
    pub fn resolve(&self) -> Result<Credential, HarnessError> {
        let mut user = None;
        let mut password = None;

        let conf_path = self.conf_path();
        if let Some(conf) = read_optional(&conf_path)? {
            for line in conf.lines() {
                let line = line.trim();
                if let Some(v) = line.strip_prefix("rpcuser=") {
                    user = Some(v.to_owned());
                } else if let Some(v) = line.strip_prefix("rpcpassword=") {
                    password = Some(v.to_owned());
                }
            }
        }

        let cookie_path = self.cookie_path();
        if let Some(cookie) = read_optional(&cookie_path)? {
            let (u, p) = cookie
                .trim_end()
                .split_once(':')
                .ok_or_else(|| HarnessError::CredentialUnavailable {
                    path: cookie_path.clone(),
                    reason: "cookie is not of the form user:password".into(),
                })?;
            user = Some(u.to_owned());
            password = Some(p.to_owned());
        }

        match (user, password) {
            (Some(username), Some(password)) => Ok(Credential { username, password }),
            _ => Err(HarnessError::CredentialUnavailable {
                path: cookie_path,
                reason: "no cookie and no rpcuser/rpcpassword in node config".into(),
            }),
        }
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, HarnessError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(HarnessError::CredentialUnavailable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}
