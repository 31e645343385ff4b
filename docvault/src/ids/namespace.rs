//! Identifier namespaces: shape, formatting and member collections.

use super::parser::parse_digits;
use crate::utils::{Result, VaultError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// One identifier-bearing field in one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceField {
    pub collection: String,
    pub field: String,
}

impl SourceField {
    pub fn new(collection: &str, field: &str) -> Self {
        Self {
            collection: collection.to_string(),
            field: field.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,

    /// Literal prefix such as `T-`; `None` for bare digits
    #[serde(default)]
    pub prefix: Option<String>,

    /// Minimum digit count; shorter values are zero-padded
    #[serde(default)]
    pub pad_width: usize,

    /// Value handed out when no identifier exists yet
    pub start: u64,

    /// Lower bound for allocation on sparse data; defaults to `start - 1`
    #[serde(default)]
    pub floor: Option<u64>,

    pub sources: Vec<SourceField>,
}

impl Namespace {
    pub const CUSTOMER: &'static str = "customer";
    pub const T_SERIES: &'static str = "t";

    /// Bare-digit customer invoice numbers.
    pub fn customer() -> Self {
        Self {
            name: Self::CUSTOMER.to_string(),
            prefix: None,
            pad_width: 0,
            start: 101_660,
            floor: Some(101_659),
            sources: vec![
                SourceField::new("invoices", "invoiceNumber"),
                SourceField::new("customerInvoices", "invoiceNumber"),
            ],
        }
    }

    /// `T-` prefixed invoice numbers, zero-padded to six digits.
    pub fn t_series() -> Self {
        Self {
            name: Self::T_SERIES.to_string(),
            prefix: Some("T-".to_string()),
            pad_width: 6,
            start: 100_001,
            floor: Some(100_000),
            sources: vec![
                SourceField::new("tInvoices", "invoiceNumber"),
                SourceField::new("invoices", "tNumber"),
            ],
        }
    }

    pub fn floor(&self) -> u64 {
        self.floor.unwrap_or_else(|| self.start.saturating_sub(1))
    }

    /// Render a value in this namespace's presentation format.
    pub fn format(&self, value: u64) -> String {
        let digits = format!("{:0width$}", value, width = self.pad_width);
        match &self.prefix {
            Some(prefix) => format!("{prefix}{digits}"),
            None => digits,
        }
    }

    /// Largest value the namespace can present: `pad_width` digits for prefixed
    /// namespaces, unbounded for bare ones.
    pub fn max_value(&self) -> u64 {
        match self.prefix {
            Some(_) if (1..20).contains(&self.pad_width) => 10u64.pow(self.pad_width as u32) - 1,
            _ => u64::MAX,
        }
    }

    /// Integer value of a stored field if it has this namespace's shape.
    ///
    /// Bare namespaces accept only all-digit strings and non-negative integers.
    /// Prefixed namespaces also accept `<prefix><digits>` (prefix case-insensitive),
    /// with bare digits treated as the re-padded form; a foreign prefix or a digit
    /// run longer than `pad_width` does not belong to the namespace.
    pub fn conform(&self, value: &Value) -> Option<u64> {
        let parsed = match value {
            Value::Number(n) => n.as_u64(),
            Value::String(raw) => {
                let raw = raw.trim();
                let digits = match &self.prefix {
                    Some(prefix) => match raw.get(..prefix.len()) {
                        Some(head) if head.eq_ignore_ascii_case(prefix) => raw[prefix.len()..].trim_start(),
                        _ => raw,
                    },
                    None => raw,
                };
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                if self.prefix.is_some() && self.pad_width > 0 && digits.len() > self.pad_width {
                    return None;
                }
                parse_digits(digits)
            }
            _ => None,
        }?;
        (parsed <= self.max_value()).then_some(parsed)
    }

    /// Validate a caller-supplied candidate.
    pub fn parse_candidate(&self, candidate: &str) -> Result<u64> {
        self.conform(&Value::String(candidate.to_string()))
            .ok_or_else(|| VaultError::InvalidIdentifier {
                namespace: self.name.clone(),
                value: candidate.to_string(),
            })
    }

    pub fn identifier(&self, value: u64) -> Identifier {
        Identifier {
            namespace: self.name.clone(),
            value,
            text: self.format(value),
        }
    }
}

/// An allocated identifier: logical value plus its presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    pub namespace: String,
    pub value: u64,
    pub text: String,
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Lookup table of configured namespaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceRegistry {
    namespaces: Vec<Namespace>,
}

impl NamespaceRegistry {
    pub fn new(namespaces: Vec<Namespace>) -> Self {
        Self { namespaces }
    }

    pub fn get(&self, name: &str) -> Result<&Namespace> {
        self.namespaces
            .iter()
            .find(|ns| ns.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| VaultError::UnknownNamespace(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Namespace> {
        self.namespaces.iter()
    }
}

impl Default for NamespaceRegistry {
    fn default() -> Self {
        Self::new(vec![Namespace::customer(), Namespace::t_series()])
    }
}
