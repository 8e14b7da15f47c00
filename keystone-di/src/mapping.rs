//! Build key mapping turns a requested key into the key which is actually built, e.g. a service
//! trait into its implementation, or a closed generic service into the matching closure of the
//! implementation definition.

use crate::build_key::{BuildKey, GenericDefinition, TypeInfo};
use crate::error::BuildError;
use crate::registry::TypeCatalog;
use itertools::Itertools;

pub trait BuildKeyMappingPolicy: Send + Sync {
    fn map(&self, build_key: &BuildKey, catalog: &TypeCatalog) -> Result<BuildKey, BuildError>;
}

/// Maps to a fixed destination key.
pub struct BuildKeyMapping {
    destination: BuildKey,
}

impl BuildKeyMapping {
    pub fn new(destination: BuildKey) -> Self {
        Self { destination }
    }
}

impl BuildKeyMappingPolicy for BuildKeyMapping {
    fn map(&self, _build_key: &BuildKey, _catalog: &TypeCatalog) -> Result<BuildKey, BuildError> {
        Ok(self.destination.clone())
    }
}

/// Maps closed generic keys to the closure of the destination definition with the same type
/// arguments.
pub struct GenericTypeBuildKeyMapping {
    destination: &'static GenericDefinition,
    name: Option<String>,
}

impl GenericTypeBuildKeyMapping {
    pub fn new(destination: &'static GenericDefinition, name: Option<String>) -> Self {
        Self { destination, name }
    }
}

impl BuildKeyMappingPolicy for GenericTypeBuildKeyMapping {
    fn map(&self, build_key: &BuildKey, catalog: &TypeCatalog) -> Result<BuildKey, BuildError> {
        let type_info = build_key.type_info();
        let arguments = type_info.generic_arguments();
        if arguments.len() != self.destination.arity() {
            return Err(BuildError::GenericArityMismatch {
                type_name: type_info.name().to_string(),
                expected: self.destination.arity(),
                actual: arguments.len(),
            });
        }

        catalog
            .closed_generic(self.destination, arguments)
            .map(|closed| BuildKey::new(closed, self.name.clone()))
            .ok_or_else(|| BuildError::MissingClosedGeneric {
                definition: self.destination.name().to_string(),
                arguments: arguments.iter().map(TypeInfo::name).join(", "),
            })
    }
}
