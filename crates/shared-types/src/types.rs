use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Returned when a stored or submitted enum string is not recognized
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {kind} value: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Lifecycle of a single signature placement.
///
/// `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignatureStatus {
    Pending,
    Signed,
    Rejected,
    Expired,
    Cancelled,
}

impl SignatureStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Transitions only ever leave `Pending`
    pub fn can_transition_to(self, next: SignatureStatus) -> bool {
        self == Self::Pending && next != Self::Pending
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Signed => "SIGNED",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

/// How the signer produced their mark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignatureType {
    Digital,
    Initials,
    Image,
    Text,
}

impl SignatureType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Digital => "DIGITAL",
            Self::Initials => "INITIALS",
            Self::Image => "IMAGE",
            Self::Text => "TEXT",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Digital => "Digital Signature",
            Self::Initials => "Initials",
            Self::Image => "Image Signature",
            Self::Text => "Text Signature",
        }
    }
}

/// Status of a public signing link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkStatus {
    Active,
    Used,
    Expired,
    Revoked,
}

impl LinkStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Used => "USED",
            Self::Expired => "EXPIRED",
            Self::Revoked => "REVOKED",
        }
    }
}

/// Status of the owning document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Pending,
    AwaitingSignatures,
    Processing,
    Signed,
    Archived,
    Rejected,
    Cancelled,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::AwaitingSignatures => "AWAITING_SIGNATURES",
            Self::Processing => "PROCESSING",
            Self::Signed => "SIGNED",
            Self::Archived => "ARCHIVED",
            Self::Rejected => "REJECTED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

macro_rules! impl_str_conversions {
    ($ty:ident, $kind:literal, [$($variant:ident),+ $(,)?]) => {
        impl FromStr for $ty {
            type Err = ParseEnumError;

            /// Case-insensitive; unknown values are an error, never a default
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let upper = s.trim().to_ascii_uppercase();
                $(
                    if upper == $ty::$variant.as_str() {
                        return Ok($ty::$variant);
                    }
                )+
                Err(ParseEnumError {
                    kind: $kind,
                    value: s.to_string(),
                })
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

impl_str_conversions!(
    SignatureStatus,
    "signature status",
    [Pending, Signed, Rejected, Expired, Cancelled]
);
impl_str_conversions!(SignatureType, "signature type", [Digital, Initials, Image, Text]);
impl_str_conversions!(LinkStatus, "link status", [Active, Used, Expired, Revoked]);
impl_str_conversions!(
    DocumentStatus,
    "document status",
    [Pending, AwaitingSignatures, Processing, Signed, Archived, Rejected, Cancelled]
);
