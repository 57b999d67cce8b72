//! Collections of the structured store and their secondary indexes.

use color_eyre::{eyre::eyre, Report};
use std::fmt;
use std::str::FromStr;

/// Bumped whenever a collection or index is added.
pub const SCHEMA_VERSION: i64 = 1;

/// A secondary index over one record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexDef {
  pub name: &'static str,
  pub field: &'static str,
  pub unique: bool,
}

const fn index(name: &'static str, unique: bool) -> IndexDef {
  IndexDef {
    name,
    field: name,
    unique,
  }
}

const APPOINTMENT_INDEXES: &[IndexDef] = &[
  index("patientId", false),
  index("doctorId", false),
  index("date", false),
];
const DOCTOR_INDEXES: &[IndexDef] = &[index("specialty", false), index("name", false)];
const PATIENT_INDEXES: &[IndexDef] = &[index("name", false), index("email", true)];

/// Record collections known to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
  Appointments,
  Doctors,
  Patients,
}

impl Collection {
  pub const ALL: [Collection; 3] = [
    Collection::Appointments,
    Collection::Doctors,
    Collection::Patients,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Appointments => "appointments",
      Self::Doctors => "doctors",
      Self::Patients => "patients",
    }
  }

  /// Field holding the primary key.
  pub fn key_field(&self) -> &'static str {
    "id"
  }

  pub fn indexes(&self) -> &'static [IndexDef] {
    match self {
      Self::Appointments => APPOINTMENT_INDEXES,
      Self::Doctors => DOCTOR_INDEXES,
      Self::Patients => PATIENT_INDEXES,
    }
  }

  pub fn index(&self, name: &str) -> Option<&'static IndexDef> {
    self.indexes().iter().find(|index| index.name == name)
  }
}

impl fmt::Display for Collection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Collection {
  type Err = Report;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::ALL
      .into_iter()
      .find(|collection| collection.as_str() == s)
      .ok_or_else(|| eyre!("Unknown collection: {}", s))
  }
}
