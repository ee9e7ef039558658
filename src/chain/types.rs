//! toncenter v3 wire types

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::cell::{boc, Cell, CellError};

/// Response of `GET /transactions`
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionsResponse {
    #[serde(default)]
    pub transactions: Vec<RawTransaction>,
}

/// One account transaction as returned by toncenter v3
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTransaction {
    /// Base64 transaction hash
    pub hash: String,
    /// Logical time, unique and increasing per account
    #[serde(deserialize_with = "deserialize_string_to_u64")]
    pub lt: u64,
    /// Unix time of the block
    #[serde(default)]
    pub now: i64,
    #[serde(default)]
    pub description: TransactionDescription,
    #[serde(default)]
    pub in_msg: Option<RawMessage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionDescription {
    #[serde(default)]
    pub aborted: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMessage {
    /// Absent for external messages
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    /// Attached value in nanoton; absent for external messages
    #[serde(default, deserialize_with = "deserialize_opt_string_to_u128")]
    pub value: Option<u128>,
    #[serde(default)]
    pub bounced: Option<bool>,
    #[serde(default)]
    pub message_content: Option<MessageContent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageContent {
    /// Base64 bag of cells
    #[serde(default)]
    pub body: Option<String>,
}

impl RawMessage {
    pub fn body_b64(&self) -> Option<&str> {
        self.message_content
            .as_ref()
            .and_then(|c| c.body.as_deref())
            .filter(|b| !b.is_empty())
    }
}

/// A TVM stack entry, in both get-method arguments and results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackEntry {
    /// `num`, `cell`, `slice`, `list`, `tuple`...
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl StackEntry {
    /// A slice argument holding `cell`
    pub fn slice(cell: &Cell) -> Result<Self, CellError> {
        Ok(Self {
            kind: "slice".to_string(),
            value: serde_json::Value::String(boc::to_base64(cell)?),
        })
    }

    /// Parse a `cell` or `slice` entry
    pub fn as_cell(&self) -> Result<Arc<Cell>, CellError> {
        if self.kind != "cell" && self.kind != "slice" {
            return Err(CellError::MalformedBoc("stack entry is not a cell"));
        }
        let encoded = self
            .value
            .as_str()
            .ok_or(CellError::MalformedBoc("stack entry value is not a string"))?;
        boc::from_base64(encoded)
    }

    /// Parse a `num` entry (`0x`-prefixed hex, possibly negative)
    pub fn as_num(&self) -> Option<i128> {
        if self.kind != "num" {
            return None;
        }
        let raw = self.value.as_str()?;
        let (negative, digits) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let value = match digits.strip_prefix("0x") {
            Some(hex) => i128::from_str_radix(hex, 16).ok()?,
            None => digits.parse::<i128>().ok()?,
        };
        Some(if negative { -value } else { value })
    }
}

/// Request body of `POST /runGetMethod`
#[derive(Debug, Clone, Serialize)]
pub struct GetMethodRequest<'a> {
    pub address: String,
    pub method: &'a str,
    pub stack: Vec<StackEntry>,
}

/// Response of `POST /runGetMethod`
#[derive(Debug, Clone, Deserialize)]
pub struct GetMethodResult {
    #[serde(default)]
    pub gas_used: i64,
    pub exit_code: i32,
    #[serde(default)]
    pub stack: Vec<StackEntry>,
}

/// Response of `GET /account`
#[derive(Debug, Clone, Deserialize)]
pub struct AccountState {
    pub status: AccountStatus,
}

/// Lifecycle state of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Uninit,
    Frozen,
    Nonexist,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Uninit => "uninit",
            AccountStatus::Frozen => "frozen",
            AccountStatus::Nonexist => "nonexist",
        }
    }
}

/// Deserialize a value that may be either a JSON string or a number
fn deserialize_string_to_u64<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrU64Visitor;

    impl de::Visitor<'_> for StringOrU64Visitor {
        type Value = u64;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or unsigned integer")
        }

        fn visit_u64<E>(self, value: u64) -> std::result::Result<u64, E>
        where
            E: de::Error,
        {
            Ok(value)
        }

        fn visit_i64<E>(self, value: i64) -> std::result::Result<u64, E>
        where
            E: de::Error,
        {
            u64::try_from(value)
                .map_err(|_| E::custom(format!("i64 {} out of range for u64", value)))
        }

        fn visit_str<E>(self, value: &str) -> std::result::Result<u64, E>
        where
            E: de::Error,
        {
            value.parse::<u64>().map_err(de::Error::custom)
        }
    }

    deserializer.deserialize_any(StringOrU64Visitor)
}

/// Deserialize an optional amount given as a decimal string or number
fn deserialize_opt_string_to_u128<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<u128>, D::Error>
where
    D: Deserializer<'de>,
{
    struct OptAmountVisitor;

    impl<'de> de::Visitor<'de> for OptAmountVisitor {
        type Value = Option<u128>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("null, a decimal string or unsigned integer")
        }

        fn visit_none<E>(self) -> std::result::Result<Option<u128>, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> std::result::Result<Option<u128>, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_some<D>(self, deserializer: D) -> std::result::Result<Option<u128>, D::Error>
        where
            D: Deserializer<'de>,
        {
            deserializer.deserialize_any(self)
        }

        fn visit_u64<E>(self, value: u64) -> std::result::Result<Option<u128>, E>
        where
            E: de::Error,
        {
            Ok(Some(u128::from(value)))
        }

        fn visit_str<E>(self, value: &str) -> std::result::Result<Option<u128>, E>
        where
            E: de::Error,
        {
            value.parse::<u128>().map(Some).map_err(de::Error::custom)
        }
    }

    deserializer.deserialize_option(OptAmountVisitor)
}
