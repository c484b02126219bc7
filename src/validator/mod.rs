//! Connection admission.
use crate::types::ClientInfo;

/// Decides whether a newly connected client may join.
///
/// A server holds at most one validator. Without one every client is
/// admitted and the transport skips collecting handshake headers.
///
/// Any `Fn(&ClientInfo) -> bool` is a validator:
///
/// ```rust
/// use wsmessenger::{types::ClientInfo, validator::ClientValidator};
///
/// let validator = |client: &ClientInfo| client.attribute("region") != Some("blocked");
/// assert!(!validator.validate(&ClientInfo::new("c1").with_attribute("region", "blocked")));
/// ```
pub trait ClientValidator: Send + Sync {
    /// Returns true to admit `client`.
    fn validate(&self, client: &ClientInfo) -> bool;
}

impl<F> ClientValidator for F
where
    F: Fn(&ClientInfo) -> bool + Send + Sync,
{
    fn validate(&self, client: &ClientInfo) -> bool {
        self(client)
    }
}

/// Admits clients whose handshake carries `attribute` with one of the
/// allowed values.
#[derive(Debug, Clone)]
pub struct AttributeValidator {
    attribute: String,
    allowed: Vec<String>,
}

impl AttributeValidator {
    /// Requires `attribute` to be present and equal to one of `allowed`.
    pub fn new<S, I, V>(attribute: S, allowed: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Self {
            attribute: attribute.into(),
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }
}

impl ClientValidator for AttributeValidator {
    fn validate(&self, client: &ClientInfo) -> bool {
        client
            .attribute(&self.attribute)
            .is_some_and(|value| self.allowed.iter().any(|a| a == value))
    }
}
