use std::fs;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyStoreError {
    #[error("policy storage i/o failure: {0}")]
    Io(#[from] io::Error),
    #[error("policy storage is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),
}

/// The durable parental policy: PIN, whitelist, setup-completion flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    #[serde(default)]
    parental_pin: Option<String>,
    #[serde(default)]
    parental_whitelist: Vec<String>,
    #[serde(default)]
    first_run_completed: bool,
}

/// Owner of the persisted parental policy.
///
/// Every mutation writes through to the backing file; a store without a path
/// keeps the policy in memory only.
pub struct PolicyStore {
    path: Option<PathBuf>,
    state: PolicySnapshot,
}

impl PolicyStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: PolicySnapshot::default(),
        }
    }

    /// Opens the store at `path`. A missing file yields empty defaults; a
    /// present but unreadable file is an error, never a silent reset.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, PolicyStoreError> {
        let path = path.into();
        let state = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => PolicySnapshot::default(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path: Some(path),
            state,
        })
    }

    /// Point-in-time copy of the policy, for the parental management view.
    pub fn snapshot(&self) -> PolicySnapshot {
        self.state.clone()
    }

    pub fn pin(&self) -> Option<&str> {
        self.state.parental_pin.as_deref()
    }

    /// Stores the PIN zero-padded to four digits.
    pub fn set_pin(&mut self, pin: &str) -> Result<(), PolicyStoreError> {
        self.state.parental_pin = Some(format!("{:0>4}", pin.trim()));
        self.persist()
    }

    pub fn check_pin(&self, candidate: &str) -> bool {
        self.state.parental_pin.as_deref() == Some(candidate.trim())
    }

    pub fn whitelist(&self) -> &[String] {
        &self.state.parental_whitelist
    }

    pub fn set_whitelist(&mut self, list: Vec<String>) -> Result<(), PolicyStoreError> {
        self.state.parental_whitelist = list;
        self.persist()
    }

    /// Appends `url` unless already present. Returns whether it was added.
    pub fn add_to_whitelist(&mut self, url: &str) -> Result<bool, PolicyStoreError> {
        if self.is_whitelisted(url) {
            return Ok(false);
        }
        self.state.parental_whitelist.push(url.to_string());
        self.persist()?;
        Ok(true)
    }

    pub fn remove_from_whitelist(&mut self, url: &str) -> Result<bool, PolicyStoreError> {
        let before = self.state.parental_whitelist.len();
        self.state.parental_whitelist.retain(|entry| entry != url);
        if self.state.parental_whitelist.len() == before {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    pub fn is_whitelisted(&self, url: &str) -> bool {
        self.state.parental_whitelist.iter().any(|entry| entry == url)
    }

    /// True until setup has both completed and produced a PIN.
    pub fn is_first_run(&self) -> bool {
        !self.state.first_run_completed || self.state.parental_pin.is_none()
    }

    pub fn mark_first_run_completed(&mut self) -> Result<(), PolicyStoreError> {
        self.state.first_run_completed = true;
        self.persist()
    }

    /// The contract the setup wizard drives: PIN, initial whitelist, flag.
    pub fn complete_first_run(
        &mut self,
        pin: &str,
        whitelist: Vec<String>,
    ) -> Result<(), PolicyStoreError> {
        self.state.parental_pin = Some(format!("{:0>4}", pin.trim()));
        self.state.parental_whitelist = whitelist;
        self.state.first_run_completed = true;
        self.persist()
    }

    fn persist(&self) -> Result<(), PolicyStoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let contents = serde_json::to_string_pretty(&self.state)?;
        fs::write(path, contents)?;
        Ok(())
    }
}
