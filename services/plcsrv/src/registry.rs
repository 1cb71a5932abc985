//! Variable registry
//!
//! Source of the variable set a start request polls. The service reads it from
//! configuration; other deployments can plug in a database or remote catalogue.

use async_trait::async_trait;
use errors::{PlcsrvError, PlcsrvResult};
use parking_lot::RwLock;

use crate::types::VariableSet;

/// Supplies the variables for the next polling run
#[async_trait]
pub trait VariableRegistry: Send + Sync {
    async fn variables(&self) -> PlcsrvResult<VariableSet>;

    /// Replace the whole set
    ///
    /// Read-only registries keep the default, which rejects the call.
    async fn apply(&self, variables: VariableSet) -> PlcsrvResult<()> {
        let _ = variables;
        Err(PlcsrvError::InvalidState(
            "variable registry is read-only".to_string(),
        ))
    }
}

/// Registry backed by an in-memory set, usually taken from configuration
#[derive(Debug, Default)]
pub struct StaticVariableRegistry {
    variables: RwLock<VariableSet>,
}

impl StaticVariableRegistry {
    pub fn new(variables: VariableSet) -> Self {
        Self {
            variables: RwLock::new(variables),
        }
    }

    /// Swap the set; takes effect on the next start
    pub fn replace(&self, variables: VariableSet) {
        *self.variables.write() = variables;
    }

    pub fn len(&self) -> usize {
        self.variables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.read().is_empty()
    }
}

#[async_trait]
impl VariableRegistry for StaticVariableRegistry {
    async fn variables(&self) -> PlcsrvResult<VariableSet> {
        Ok(self.variables.read().clone())
    }

    async fn apply(&self, variables: VariableSet) -> PlcsrvResult<()> {
        self.replace(variables);
        Ok(())
    }
}
