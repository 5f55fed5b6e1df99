use crate::{Result, SyncError};
use std::fmt;

pub const IDENTITY_DELIMITER: &str = "@@";

/// Registry-qualified service name, `group@@service`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServiceIdentity {
    pub group: String,
    pub service: String,
}

impl ServiceIdentity {
    pub fn new(group: impl Into<String>, service: impl Into<String>) -> ServiceIdentity {
        ServiceIdentity {
            group: group.into(),
            service: service.into(),
        }
    }

    pub fn parse(composite: &str) -> Result<ServiceIdentity> {
        let segments: Vec<&str> = composite.split(IDENTITY_DELIMITER).collect();
        match segments.as_slice() {
            [group, service] if !group.is_empty() && !service.is_empty() => Ok(ServiceIdentity::new(*group, *service)),
            _ => SyncError::MalformedIdentity(composite.to_owned()).into(),
        }
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.group, IDENTITY_DELIMITER, self.service)
    }
}
