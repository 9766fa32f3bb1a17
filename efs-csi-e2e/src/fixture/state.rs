//! Per-executor fixture lifecycle state.

use crate::error::SetupError;

/// The role the embedding test runner assigned to this executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Provisions the fixture and owns its teardown.
    Leader,
    /// Adopts the leader's broadcast and never touches the fixture itself.
    Follower,
}

/// The resolved fixture of one executor.
///
/// Written exactly once, by the leader's setup or by adopting the leader's
/// broadcast, and read-only afterwards. Test cases only read the file system id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureState {
    file_system_id: String,
    role: Role,
    delete_file_system: bool,
    destroy_driver: bool,
}

impl FixtureState {
    pub(crate) fn leader(
        file_system_id: String,
        delete_file_system: bool,
        destroy_driver: bool,
    ) -> Self {
        Self {
            file_system_id,
            role: Role::Leader,
            delete_file_system,
            destroy_driver,
        }
    }

    /// Adopt the leader's broadcast payload verbatim.
    ///
    /// Followers are never responsible for teardown.
    pub fn adopt(payload: &[u8]) -> Result<Self, SetupError> {
        let file_system_id =
            std::str::from_utf8(payload).map_err(|e| SetupError::Broadcast {
                reason: format!("payload is not UTF-8: {e}"),
            })?;
        if file_system_id.is_empty() {
            return Err(SetupError::Broadcast {
                reason: "payload is empty".to_string(),
            });
        }

        Ok(Self {
            file_system_id: file_system_id.to_string(),
            role: Role::Follower,
            delete_file_system: false,
            destroy_driver: false,
        })
    }

    /// The payload broadcast from the leader to every other executor.
    pub fn payload(&self) -> Vec<u8> {
        self.file_system_id.as_bytes().to_vec()
    }

    pub fn file_system_id(&self) -> &str {
        &self.file_system_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// This executor created the file system and deletes it at teardown.
    pub fn owns_deletion(&self) -> bool {
        self.delete_file_system
    }

    /// This executor deployed the driver and removes it at teardown.
    pub fn owns_driver_teardown(&self) -> bool {
        self.destroy_driver
    }
}
