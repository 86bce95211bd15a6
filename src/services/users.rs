use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use color_eyre::eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};

/// A remote account whose library is mirrored.
///
/// Two identities are the same account iff `(login, remote_uid)` match; the
/// local `id` is only a position in the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserIdentity {
    #[serde(default)]
    pub id: Option<u32>,
    pub login: String,
    #[serde(rename = "uid")]
    pub remote_uid: u64,
}

impl PartialEq for UserIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.login == other.login && self.remote_uid == other.remote_uid
    }
}

impl Eq for UserIdentity {}

impl Hash for UserIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.login.hash(state);
        self.remote_uid.hash(state);
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct UsersFile {
    users_counter: usize,
    users: Vec<UserIdentity>,
}

/// Result of [`UserRegistry::add`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddUserOutcome {
    Added(UserIdentity),
    AlreadyPresent(UserIdentity),
}

/// Known users, persisted as a flat JSON list.
///
/// Nothing is read until a method is called; every call goes to disk so the
/// file stays the single source of truth.
pub struct UserRegistry {
    path: PathBuf,
}

impl UserRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn list(&self) -> Result<Vec<UserIdentity>> {
        Ok(self.load()?.users)
    }

    pub fn get(&self, id: u32) -> Result<Option<UserIdentity>> {
        Ok(self
            .load()?
            .users
            .into_iter()
            .find(|user| user.id == Some(id)))
    }

    pub fn add(&self, user: UserIdentity) -> Result<AddUserOutcome> {
        let mut file = self.load()?;

        if let Some(existing) = file.users.iter().find(|u| **u == user) {
            tracing::info!(
                "User {} ({}) is already registered",
                existing.login,
                existing.remote_uid
            );
            return Ok(AddUserOutcome::AlreadyPresent(existing.clone()));
        }

        file.users.push(user);
        renumber(&mut file);
        self.save(&file)?;

        let added = file
            .users
            .last()
            .cloned()
            .ok_or_else(|| color_eyre::eyre::eyre!("User list is empty after insert"))?;
        tracing::info!(
            "Registered user {} with uid {} as id {:?}",
            added.login,
            added.remote_uid,
            added.id
        );
        Ok(AddUserOutcome::Added(added))
    }

    /// Remove the user with local `id`. Returns whether anything was removed.
    pub fn remove(&self, id: u32) -> Result<bool> {
        let mut file = self.load()?;
        let before = file.users.len();
        file.users.retain(|user| user.id != Some(id));
        let removed = file.users.len() != before;

        renumber(&mut file);
        self.save(&file)?;

        if removed {
            tracing::info!("Removed user with id {}", id);
        } else {
            tracing::warn!("No user with id {} to remove", id);
        }
        Ok(removed)
    }

    fn load(&self) -> Result<UsersFile> {
        if !self.path.exists() {
            let empty = UsersFile::default();
            self.save(&empty)?;
            return Ok(empty);
        }

        let contents = std::fs::read_to_string(&self.path)
            .wrap_err_with(|| format!("Failed to read users file: {}", self.path.display()))?;
        serde_json::from_str(&contents)
            .wrap_err_with(|| format!("Failed to parse users file: {}", self.path.display()))
    }

    fn save(&self, file: &UsersFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).wrap_err_with(|| {
                format!("Failed to create users directory: {}", parent.display())
            })?;
        }

        let contents =
            serde_json::to_string_pretty(file).wrap_err("Failed to serialize users file")?;

        // Write beside the target and rename so a crash never leaves a torn file
        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, contents)
            .wrap_err_with(|| format!("Failed to write users file: {}", temp_path.display()))?;
        std::fs::rename(&temp_path, &self.path)
            .wrap_err_with(|| format!("Failed to replace users file: {}", self.path.display()))?;
        Ok(())
    }
}

fn renumber(file: &mut UsersFile) {
    for (index, user) in file.users.iter_mut().enumerate() {
        user.id = Some(index as u32 + 1);
    }
    file.users_counter = file.users.len();
}
