//! Reads the list of switches to back up.
//!
//! The inventory is a CSV file with a header row. The columns `name` and `ip`
//! are required, `username` and `password` are optional and fall back to the
//! default [`Credentials`] per row when absent or empty.

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use derive_more::{Display, Error, From};

use crate::credentials::Credentials;
use crate::error::{BackupError, ErrorKind};
use crate::snapshot::sanitize;

const NAME_COLUMN: &str = "name";
const ADDRESS_COLUMN: &str = "ip";
const USERNAME_COLUMN: &str = "username";
const PASSWORD_COLUMN: &str = "password";

/// One switch listed in the inventory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InventoryRecord {
    pub name: String,
    pub address: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl InventoryRecord {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            username: None,
            password: None,
        }
    }

    /// Credentials for this row, each missing field replaced by its default.
    pub fn credentials(&self, defaults: &Credentials) -> Credentials {
        Credentials {
            username: self
                .username
                .clone()
                .unwrap_or_else(|| defaults.username.clone()),
            password: self
                .password
                .clone()
                .unwrap_or_else(|| defaults.password.clone()),
        }
    }
}

#[derive(Debug, Display, Error, From)]
/// Errors on reading the inventory.
pub enum InventoryError {
    /// The inventory file does not exist.
    #[display("Inventory not found: {_0:?}")]
    NotFound(#[error(ignore)] PathBuf),
    /// The header row lacks required columns.
    #[display("Inventory is missing required column(s): {_0:?}")]
    MissingColumns(#[error(ignore)] Vec<String>),
    /// A data row has an empty required cell.
    #[display("Inventory row {row} has no value for column '{column}'")]
    MissingValue { row: usize, column: &'static str },
    /// Two rows would share one snapshot directory.
    #[display("Inventory row {row}: switch {name:?} collides with {other:?}")]
    DuplicateName {
        row: usize,
        name: String,
        other: String,
    },
    /// The inventory file exists but can't be read.
    #[from]
    #[display("Reading the inventory failed: {_0}")]
    Io(io::Error),
    /// The inventory isn't valid CSV.
    #[from]
    #[display("Parsing the inventory failed: {_0}")]
    Csv(csv::Error),
}

impl InventoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) | Self::Io(_) => ErrorKind::InventoryNotFound,
            Self::MissingColumns(_)
            | Self::MissingValue { .. }
            | Self::DuplicateName { .. }
            | Self::Csv(_) => ErrorKind::InventorySchemaInvalid,
        }
    }
}

impl From<InventoryError> for BackupError {
    fn from(err: InventoryError) -> Self {
        BackupError::new(err.kind(), err.to_string())
    }
}

/// All records of an inventory file, in file order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Inventory {
    records: Vec<InventoryRecord>,
}

impl Inventory {
    /// Reads and validates the inventory at `path`.
    pub fn read(path: &Path) -> Result<Self, InventoryError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(InventoryError::NotFound(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        log::debug!(target: "inventory", "Reading inventory: {}", path.display());

        Self::from_reader(file)
    }

    /// Parses an inventory from any CSV source.
    pub fn from_reader(reader: impl io::Read) -> Result<Self, InventoryError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        let column = |name: &str| headers.iter().position(|h| h == name);

        let (name_idx, address_idx) = match (column(NAME_COLUMN), column(ADDRESS_COLUMN)) {
            (Some(name_idx), Some(address_idx)) => (name_idx, address_idx),
            (name_idx, address_idx) => {
                let missing = [(NAME_COLUMN, name_idx), (ADDRESS_COLUMN, address_idx)]
                    .into_iter()
                    .filter(|(_, idx)| idx.is_none())
                    .map(|(name, _)| name.to_string())
                    .collect();
                return Err(InventoryError::MissingColumns(missing));
            }
        };
        let username_idx = column(USERNAME_COLUMN);
        let password_idx = column(PASSWORD_COLUMN);

        let mut records = Vec::new();
        // sanitized name -> name, names that sanitize to nothing fail later on their own
        let mut seen = HashMap::new();
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            let row = row + 1;

            let cell = |idx: Option<usize>| {
                idx.and_then(|idx| record.get(idx))
                    .filter(|value| !value.is_empty())
                    .map(str::to_string)
            };

            let name = cell(Some(name_idx)).ok_or(InventoryError::MissingValue {
                row,
                column: NAME_COLUMN,
            })?;
            let address = cell(Some(address_idx)).ok_or(InventoryError::MissingValue {
                row,
                column: ADDRESS_COLUMN,
            })?;

            let key = sanitize(&name);
            if !key.is_empty() {
                if let Some(other) = seen.insert(key, name.clone()) {
                    return Err(InventoryError::DuplicateName { row, name, other });
                }
            }

            records.push(InventoryRecord {
                name,
                address,
                username: cell(username_idx),
                password: cell(password_idx),
            });
        }
        log::debug!(target: "inventory", "Inventory lists {} switch(es)", records.len());

        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, InventoryRecord> {
        self.records.iter()
    }
}

impl From<Vec<InventoryRecord>> for Inventory {
    fn from(records: Vec<InventoryRecord>) -> Self {
        Self { records }
    }
}

impl<'a> IntoIterator for &'a Inventory {
    type Item = &'a InventoryRecord;
    type IntoIter = std::slice::Iter<'a, InventoryRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
