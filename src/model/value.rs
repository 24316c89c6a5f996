use crate::error::RetroError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of indicator types.
///
/// The snake_case tags are a durable storage format: they are written to
/// the database and to transported batches, so existing tags must never
/// change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    DomainName,
    IpAddr,
    Url,
    EmailAddress,
    FileHashMd5,
    FileHashSha1,
    FileHashSha256,
}

impl ValueType {
    pub const ALL: [ValueType; 7] = [
        ValueType::DomainName,
        ValueType::IpAddr,
        ValueType::Url,
        ValueType::EmailAddress,
        ValueType::FileHashMd5,
        ValueType::FileHashSha1,
        ValueType::FileHashSha256,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::DomainName => "domain_name",
            ValueType::IpAddr => "ip_addr",
            ValueType::Url => "url",
            ValueType::EmailAddress => "email_address",
            ValueType::FileHashMd5 => "file_hash_md5",
            ValueType::FileHashSha1 => "file_hash_sha1",
            ValueType::FileHashSha256 => "file_hash_sha256",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = RetroError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ValueType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| RetroError::Parse(format!("Unknown value type: {}", s)))
    }
}

/// An observed or reported artifact: data plus its type tag
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Value {
    pub data: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
}

impl Value {
    pub fn new(data: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            data: data.into(),
            value_type,
        }
    }

    pub fn domain(data: impl Into<String>) -> Self {
        Self::new(data, ValueType::DomainName)
    }

    pub fn ip_addr(data: impl Into<String>) -> Self {
        Self::new(data, ValueType::IpAddr)
    }

    pub fn sha256(data: impl Into<String>) -> Self {
        Self::new(data, ValueType::FileHashSha256)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.value_type, self.data)
    }
}
