//! Context address parsing
//!
//! A context address names a storage container (a file share) and an item
//! path inside it: `<container>/<item-path>`. The split happens at the first
//! `/`, so the item may itself contain nested segments.

use crate::error::{Error, Result};
use std::fmt;

/// Configuration key reported for malformed addresses
const CONTEXT_KEY: &str = "context";

/// A parsed context address
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContextAddress {
    container: String,
    item: String,
}

impl ContextAddress {
    /// Split `address` into container and item at the first `/`
    ///
    /// Both halves must be non-empty. Malformed input fails here instead of
    /// surfacing later as a confusing authentication or not-found error.
    ///
    /// # Example
    ///
    /// ```
    /// use build_context::ContextAddress;
    ///
    /// let addr = ContextAddress::parse("builds/app/context.tar.gz").unwrap();
    /// assert_eq!(addr.container(), "builds");
    /// assert_eq!(addr.item(), "app/context.tar.gz");
    /// ```
    pub fn parse(address: &str) -> Result<Self> {
        let Some((container, item)) = address.split_once('/') else {
            return Err(malformed(address, "expected <container>/<item>"));
        };
        if container.is_empty() {
            return Err(malformed(address, "container is empty"));
        }
        if item.is_empty() {
            return Err(malformed(address, "item is empty"));
        }
        Ok(Self {
            container: container.to_string(),
            item: item.to_string(),
        })
    }

    /// Storage container (file share) name
    pub fn container(&self) -> &str {
        &self.container
    }

    /// Item path within the container
    pub fn item(&self) -> &str {
        &self.item
    }
}

impl std::str::FromStr for ContextAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ContextAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.item)
    }
}

fn malformed(address: &str, reason: &str) -> Error {
    Error::config(
        CONTEXT_KEY,
        format!("malformed context address {address:?}: {reason}"),
    )
}
