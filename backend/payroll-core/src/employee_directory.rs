// src/employee_directory.rs
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("File I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    #[error("Roster JSON processing error")]
    Json(#[from] serde_json::Error),

    #[error("Duplicate employee id in roster: {0}")]
    DuplicateEmployee(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    /// Personnel file number.
    #[serde(default)]
    pub file_number: Option<String>,
}

/// Existence lookups for employees. The ledger itself never consults it.
#[async_trait]
pub trait EmployeeDirectory: Send + Sync {
    async fn find_employee(&self, employee_id: &str) -> Result<Option<Employee>, DirectoryError>;
}

#[derive(Debug, Default, Clone)]
pub struct RosterDirectory {
    employees: HashMap<String, Employee>,
}

impl RosterDirectory {
    pub fn from_employees(employees: Vec<Employee>) -> Result<Self, DirectoryError> {
        let mut by_id = HashMap::with_capacity(employees.len());
        for employee in employees {
            if by_id.contains_key(&employee.id) {
                return Err(DirectoryError::DuplicateEmployee(employee.id));
            }
            by_id.insert(employee.id.clone(), employee);
        }
        Ok(Self { employees: by_id })
    }

    /// Loads a JSON array of employees. No path means an empty roster.
    pub fn load(path: Option<&Path>) -> Result<Self, DirectoryError> {
        let Some(path) = path else {
            warn!("No employee roster configured; every employee lookup will fail");
            return Ok(Self::default());
        };

        let json_string = fs::read_to_string(path).map_err(|e| DirectoryError::Io {
            source: e,
            context: format!("Failed to read roster file: {:?}", path),
        })?;
        let employees: Vec<Employee> = serde_json::from_str(&json_string)?;
        let directory = Self::from_employees(employees)?;
        info!("Loaded {} employees from roster {:?}", directory.len(), path);
        Ok(directory)
    }

    pub fn len(&self) -> usize {
        self.employees.len()
    }
}

#[async_trait]
impl EmployeeDirectory for RosterDirectory {
    async fn find_employee(&self, employee_id: &str) -> Result<Option<Employee>, DirectoryError> {
        Ok(self.employees.get(employee_id).cloned())
    }
}
