//! Numeric enum families and their canonical names.
//!
//! On the wire, enum fields are integers. Each family maps codes to prefixed
//! names (`MESSAGING_CHANNEL_SMS`); handlers see the name with the family
//! prefix stripped (`SMS`).

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnumError {
    #[error("Invalid {family} value {code}")]
    UnknownCode { family: &'static str, code: i32 },

    #[error("Invalid {family} name {name}. Must be one of {allowed:?}")]
    UnknownName {
        family: &'static str,
        name: String,
        allowed: Vec<&'static str>,
    },
}

/// A table of `(code, prefixed name)` pairs sharing one prefix.
#[derive(Debug)]
pub struct EnumFamily {
    pub prefix: &'static str,
    values: &'static [(i32, &'static str)],
}

impl EnumFamily {
    const fn new(prefix: &'static str, values: &'static [(i32, &'static str)]) -> Self {
        Self { prefix, values }
    }

    /// Canonical (prefix-stripped) name for `code`.
    pub fn name_of(&self, code: i32) -> Result<&'static str, EnumError> {
        self.values
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, full)| self.strip(full))
            .ok_or(EnumError::UnknownCode {
                family: self.prefix,
                code,
            })
    }

    /// Code for a canonical name, matched case-insensitively.
    pub fn code_of(&self, name: &str) -> Result<i32, EnumError> {
        self.values
            .iter()
            .find(|(_, full)| self.strip(full).eq_ignore_ascii_case(name))
            .map(|(code, _)| *code)
            .ok_or_else(|| EnumError::UnknownName {
                family: self.prefix,
                name: name.to_string(),
                allowed: self.valid_names(),
            })
    }

    /// Canonical names excluding UNSPECIFIED.
    pub fn valid_names(&self) -> Vec<&'static str> {
        self.values
            .iter()
            .map(|(_, full)| self.strip(full))
            .filter(|name| *name != "UNSPECIFIED")
            .collect()
    }

    fn strip(&self, full: &'static str) -> &'static str {
        full.strip_prefix(self.prefix)
            .and_then(|rest| rest.strip_prefix('_'))
            .unwrap_or(full)
    }
}

pub const MESSAGING_CHANNEL: EnumFamily = EnumFamily::new(
    "MESSAGING_CHANNEL",
    &[
        (0, "MESSAGING_CHANNEL_UNSPECIFIED"),
        (1, "MESSAGING_CHANNEL_SMS"),
        (2, "MESSAGING_CHANNEL_VOICE"),
        (3, "MESSAGING_CHANNEL_USSD"),
        (4, "MESSAGING_CHANNEL_FB_MESSENGER"),
        (5, "MESSAGING_CHANNEL_TELEGRAM"),
        (6, "MESSAGING_CHANNEL_WHATSAPP"),
        (7, "MESSAGING_CHANNEL_EMAIL"),
    ],
);

pub const CUSTOMER_NUMBER_PROVIDER: EnumFamily = EnumFamily::new(
    "CUSTOMER_NUMBER_PROVIDER",
    &[
        (0, "CUSTOMER_NUMBER_PROVIDER_UNSPECIFIED"),
        (1, "CUSTOMER_NUMBER_PROVIDER_FACEBOOK"),
        (2, "CUSTOMER_NUMBER_PROVIDER_CELLULAR"),
        (3, "CUSTOMER_NUMBER_PROVIDER_TELEGRAM"),
        (4, "CUSTOMER_NUMBER_PROVIDER_APP"),
        (5, "CUSTOMER_NUMBER_PROVIDER_EMAIL"),
    ],
);

pub const PAYMENT_CHANNEL: EnumFamily = EnumFamily::new(
    "PAYMENT_CHANNEL",
    &[(0, "PAYMENT_CHANNEL_UNSPECIFIED"), (1, "PAYMENT_CHANNEL_CELLULAR")],
);

pub const PAYMENT_STATUS: EnumFamily = EnumFamily::new(
    "PAYMENT_STATUS",
    &[
        (0, "PAYMENT_STATUS_UNSPECIFIED"),
        (100, "PAYMENT_STATUS_QUEUED"),
        (101, "PAYMENT_STATUS_PENDING_CONFIRMATION"),
        (102, "PAYMENT_STATUS_PENDING_VALIDATION"),
        (103, "PAYMENT_STATUS_VALIDATED"),
        (200, "PAYMENT_STATUS_INVALID_REQUEST"),
        (201, "PAYMENT_STATUS_NOT_SUPPORTED"),
        (202, "PAYMENT_STATUS_INSUFFICIENT_FUNDS"),
        (203, "PAYMENT_STATUS_APPLICATION_ERROR"),
        (204, "PAYMENT_STATUS_NOT_ALLOWED"),
        (205, "PAYMENT_STATUS_DUPLICATE_REQUEST"),
        (206, "PAYMENT_STATUS_INVALID_PURSE"),
        (207, "PAYMENT_STATUS_INVALID_WALLET"),
        (299, "PAYMENT_STATUS_DECOMMISSIONED_CUSTOMER_ID"),
        (300, "PAYMENT_STATUS_SUCCESS"),
        (301, "PAYMENT_STATUS_PASS_THROUGH"),
        (400, "PAYMENT_STATUS_FAILED"),
        (401, "PAYMENT_STATUS_THROTTLED"),
        (402, "PAYMENT_STATUS_EXPIRED"),
        (403, "PAYMENT_STATUS_REJECTED"),
        (500, "PAYMENT_STATUS_REVERSED"),
    ],
);

pub const MESSAGE_DELIVERY_STATUS: EnumFamily = EnumFamily::new(
    "MESSAGE_DELIVERY_STATUS",
    &[
        (0, "MESSAGE_DELIVERY_STATUS_UNSPECIFIED"),
        (100, "MESSAGE_DELIVERY_STATUS_QUEUED"),
        (101, "MESSAGE_DELIVERY_STATUS_SENT"),
        (300, "MESSAGE_DELIVERY_STATUS_DELIVERED"),
        (301, "MESSAGE_DELIVERY_STATUS_READ"),
        (302, "MESSAGE_DELIVERY_STATUS_RECEIVED"),
        (303, "MESSAGE_DELIVERY_STATUS_SESSION_INITIATED"),
        (400, "MESSAGE_DELIVERY_STATUS_FAILED"),
        (401, "MESSAGE_DELIVERY_STATUS_NO_SESSION"),
        (402, "MESSAGE_DELIVERY_STATUS_NO_CONSENT"),
        (403, "MESSAGE_DELIVERY_STATUS_INSUFFICIENT_CREDIT"),
        (404, "MESSAGE_DELIVERY_STATUS_NOT_ALLOWED"),
    ],
);

pub const MESSAGING_SESSION_END_REASON: EnumFamily = EnumFamily::new(
    "MESSAGING_SESSION_END_REASON",
    &[
        (0, "MESSAGING_SESSION_END_REASON_UNSPECIFIED"),
        (100, "MESSAGING_SESSION_END_REASON_NORMAL_CLEARING"),
        (200, "MESSAGING_SESSION_END_REASON_INACTIVITY"),
        (300, "MESSAGING_SESSION_END_REASON_FAILURE"),
    ],
);

pub const MESSAGE_REACTION: EnumFamily = EnumFamily::new(
    "MESSAGE_REACTION",
    &[
        (0, "MESSAGE_REACTION_UNSPECIFIED"),
        (100, "MESSAGE_REACTION_CLICKED"),
        (200, "MESSAGE_REACTION_UNSUBSCRIBED"),
        (201, "MESSAGE_REACTION_COMPLAINED"),
    ],
);
