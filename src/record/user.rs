// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Users of the broker.
//!
//! The category gates which operations a user may perform. Enforcement lives
//! outside this crate; the helpers here only answer the question.

use super::{AnyRecord, Record, RecordKind, Timestamp};
use crate::error::Result;
use crate::pem;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserCategory {
    /// Creates topics and events.
    Publisher,
    /// Creates subscriptions.
    Subscriber,
    /// Can do anything.
    Admin,
    /// Can do nothing.
    Nobody,
}

impl fmt::Display for UserCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserCategory::Publisher => write!(f, "Publisher"),
            UserCategory::Subscriber => write!(f, "Subscriber"),
            UserCategory::Admin => write!(f, "Admin"),
            UserCategory::Nobody => write!(f, "Nobody"),
        }
    }
}

/// A user of the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    name: String,
    category: UserCategory,
    #[serde(default)]
    description: String,
    #[serde(default)]
    public_key_pem: Option<String>,
    #[serde(default)]
    last_change: Option<Timestamp>,
}

impl User {
    pub fn new(name: impl Into<String>, category: UserCategory, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category,
            description: description.into(),
            public_key_pem: None,
            last_change: None,
        }
    }

    /// Attach a public key given as DER bytes.
    #[must_use]
    pub fn with_public_key_der(mut self, der: &[u8]) -> Self {
        self.public_key_pem = Some(pem::encode_public_key(der));
        self
    }

    /// Attach a public key already in PEM armor.
    ///
    /// Fails if the armor does not decode.
    pub fn with_public_key_pem(mut self, armor: impl Into<String>) -> Result<Self> {
        let armor = armor.into();
        pem::decode_public_key(&armor)?;
        self.public_key_pem = Some(armor);
        Ok(self)
    }

    #[must_use]
    pub fn stamped(mut self, at: Timestamp) -> Self {
        self.last_change = Some(at);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> UserCategory {
        self.category
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn public_key_pem(&self) -> Option<&str> {
        self.public_key_pem.as_deref()
    }

    /// Decode the stored public key to DER bytes.
    pub fn public_key_der(&self) -> Result<Option<Vec<u8>>> {
        self.public_key_pem
            .as_deref()
            .map(pem::decode_public_key)
            .transpose()
    }

    pub fn can_publish(&self) -> bool {
        matches!(self.category, UserCategory::Publisher | UserCategory::Admin)
    }

    pub fn can_subscribe(&self) -> bool {
        matches!(self.category, UserCategory::Subscriber | UserCategory::Admin)
    }

    pub fn is_admin(&self) -> bool {
        self.category == UserCategory::Admin
    }
}

impl Record for User {
    type Key = String;
    const KIND: RecordKind = RecordKind::User;

    fn key(&self) -> String {
        self.name.clone()
    }

    fn last_change(&self) -> Option<Timestamp> {
        self.last_change
    }

    fn touch(&mut self, at: Timestamp) {
        self.last_change = Some(at);
    }

    fn merge_favor_other(&mut self, other: &Self) {
        self.name.clone_from(&other.name);
        self.category = other.category;
        self.description.clone_from(&other.description);
        self.public_key_pem.clone_from(&other.public_key_pem);
        self.last_change = other.last_change;
    }

    fn update_from(&mut self, other: &Self) -> Result<()> {
        self.category = other.category;
        self.description.clone_from(&other.description);
        self.public_key_pem.clone_from(&other.public_key_pem);
        Ok(())
    }

    fn from_any(any: AnyRecord) -> Option<Self> {
        match any {
            AnyRecord::User(u) => Some(u),
            _ => None,
        }
    }
}
