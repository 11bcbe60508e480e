//! The identity a service is known by to the operating system

use crate::error::IdentityError;

/// Identifies a service to the service manager. The id is the key used by every lookup
/// (registration, start and stop), so changing it after installation orphans the registration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServiceIdentity {
    /// The name of the service, as known by the operating system
    id: String,
    /// The display name of the service for the user
    name: String,
    /// The description of the service as presented to the user
    description: String,
}

impl ServiceIdentity {
    /// Build a new identity.
    /// # Arguments
    /// * id - The unique key of the service, must not be empty or contain whitespace
    /// * name - The display name of the service
    /// * description - The description of the service
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Self, IdentityError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(IdentityError::EmptyId);
        }
        if id
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '/' | '\\' | '"'))
        {
            return Err(IdentityError::InvalidId(id));
        }
        Ok(Self {
            id,
            name: name.into(),
            description: description.into(),
        })
    }

    /// The unique key of the service
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The display name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// The name of the event log source the service writes to on windows
    pub fn log_source(&self) -> String {
        format!("{} Log", self.id)
    }
}
