//! Customer identity handle passed to notification handlers.

use elarian_protocol::enums::CUSTOMER_NUMBER_PROVIDER;

use crate::error::ClientError;

const DEFAULT_PROVIDER: &str = "CELLULAR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerNumberRef {
    pub number: String,
    /// Canonical `CUSTOMER_NUMBER_PROVIDER` name, e.g. `CELLULAR`
    pub provider: String,
}

/// Identifies a customer by platform id, by number, or both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerHandle {
    id: Option<String>,
    number: Option<CustomerNumberRef>,
}

impl CustomerHandle {
    /// Build a handle; fails when neither `id` nor `number` is given, or the
    /// provider is not a known provider name. The provider defaults to
    /// `CELLULAR`.
    pub fn new(
        id: Option<String>,
        number: Option<String>,
        provider: Option<&str>,
    ) -> Result<Self, ClientError> {
        if id.is_none() && number.is_none() {
            return Err(ClientError::MissingIdentity);
        }

        let number = match number {
            Some(number) => {
                let provider = provider.unwrap_or(DEFAULT_PROVIDER);
                CUSTOMER_NUMBER_PROVIDER.code_of(provider)?;
                Some(CustomerNumberRef {
                    number,
                    provider: provider.to_ascii_uppercase(),
                })
            }
            None => None,
        };

        Ok(Self { id, number })
    }

    /// Provider already validated by the decoder.
    pub(crate) fn from_parts(id: String, number: Option<CustomerNumberRef>) -> Self {
        Self { id: Some(id), number }
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            number: None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn number(&self) -> Option<&CustomerNumberRef> {
        self.number.as_ref()
    }
}
