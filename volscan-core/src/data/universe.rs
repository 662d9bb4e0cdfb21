//! Universe file: the instrument list for stores without their own
//! instrument table.
//!
//! ```toml
//! [[instruments]]
//! symbol = "sh.600000"
//! name = "Pudong Bank"
//! tradable = true
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::store::StoreError;
use crate::domain::Instrument;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Universe {
    #[serde(default)]
    pub instruments: Vec<Instrument>,
}

impl Universe {
    pub fn from_file(path: &Path) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Universe(format!("read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, StoreError> {
        toml::from_str(content).map_err(|e| StoreError::Universe(format!("parse universe TOML: {e}")))
    }

    pub fn to_toml(&self) -> Result<String, StoreError> {
        toml::to_string_pretty(self).map_err(|e| StoreError::Universe(format!("serialize: {e}")))
    }

    pub fn get(&self, symbol: &str) -> Option<&Instrument> {
        self.instruments.iter().find(|i| i.symbol == symbol)
    }

    /// Insert or replace by symbol, keeping the list sorted.
    pub fn upsert(&mut self, instrument: Instrument) {
        match self
            .instruments
            .binary_search_by(|i| i.symbol.as_str().cmp(&instrument.symbol))
        {
            Ok(pos) => self.instruments[pos] = instrument,
            Err(pos) => self.instruments.insert(pos, instrument),
        }
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }
}
