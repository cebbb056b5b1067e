//! Platform identities.
//!
//! Every chat, sender and recipient on the platform is addressed as
//! `user@server`, where the server part distinguishes direct chats from
//! groups, broadcasts and newsletters. Parsing is total: malformed input
//! yields an [`AddressError`], never a half-built address.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,

    #[error("address '{0}' is missing the @server part")]
    MissingServer(String),

    #[error("address '{0}' has an empty user part")]
    EmptyUser(String),

    #[error("unknown address server '{0}'")]
    UnknownServer(String),
}

/// The server half of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressServer {
    Individual,
    Group,
    Broadcast,
    Newsletter,
}

impl AddressServer {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressServer::Individual => "individual",
            AddressServer::Group => "group",
            AddressServer::Broadcast => "broadcast",
            AddressServer::Newsletter => "newsletter",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "individual" => Some(AddressServer::Individual),
            "group" => Some(AddressServer::Group),
            "broadcast" => Some(AddressServer::Broadcast),
            "newsletter" => Some(AddressServer::Newsletter),
            _ => None,
        }
    }
}

impl fmt::Display for AddressServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully qualified platform identity (`user@server`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChatAddress {
    pub user: String,
    pub server: AddressServer,
}

impl ChatAddress {
    pub fn new(user: impl Into<String>, server: AddressServer) -> Self {
        Self {
            user: user.into(),
            server,
        }
    }

    /// Shorthand for a direct-chat address.
    pub fn individual(user: impl Into<String>) -> Self {
        Self::new(user, AddressServer::Individual)
    }

    pub fn parse(s: &str) -> Result<Self, AddressError> {
        if s.is_empty() {
            return Err(AddressError::Empty);
        }
        let (user, server) = s
            .split_once('@')
            .ok_or_else(|| AddressError::MissingServer(s.to_string()))?;
        if user.is_empty() {
            return Err(AddressError::EmptyUser(s.to_string()));
        }
        let server =
            AddressServer::parse(server).ok_or_else(|| AddressError::UnknownServer(server.to_string()))?;
        Ok(Self {
            user: user.to_string(),
            server,
        })
    }

    pub fn is_group(&self) -> bool {
        self.server == AddressServer::Group
    }
}

impl fmt::Display for ChatAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.server)
    }
}

impl FromStr for ChatAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
