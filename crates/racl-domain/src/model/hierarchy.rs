//! Entity types and the application's class hierarchy.
//!
//! ACL classes are plain type names. The storage layer only knows the names;
//! which class extends which is knowledge the surrounding application owns, so
//! it is registered here and queried transitively.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

/// A Rust type that stands for a protected domain entity class.
///
/// ```
/// use racl_domain::model::EntityType;
///
/// struct Document;
/// impl EntityType for Document {
///     const CLASS_NAME: &'static str = "app.Document";
/// }
/// assert_eq!(Document::CLASS_NAME, "app.Document");
/// ```
pub trait EntityType {
    /// Fully qualified class name stored in the class table.
    const CLASS_NAME: &'static str;
}

/// Registry of `child -> parent` class declarations.
#[derive(Debug, Default)]
pub struct EntityClassHierarchy {
    parents: RwLock<HashMap<String, String>>,
}

impl EntityClassHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `child` as a direct subclass of `parent`, replacing any previous declaration.
    pub fn declare(&self, child: impl Into<String>, parent: impl Into<String>) {
        self.parents.write().insert(child.into(), parent.into());
    }

    /// Builder-style variant of [`declare`](Self::declare).
    pub fn with(self, child: impl Into<String>, parent: impl Into<String>) -> Self {
        self.declare(child, parent);
        self
    }

    /// Direct parent of `class_name`, if declared.
    pub fn parent_of(&self, class_name: &str) -> Option<String> {
        self.parents.read().get(class_name).cloned()
    }

    /// Returns true if `child` extends `parent` directly or indirectly.
    ///
    /// A class is not its own child. Cyclic declarations terminate.
    pub fn is_child(&self, parent: &str, child: &str) -> bool {
        let parents = self.parents.read();
        let mut seen = HashSet::new();
        let mut current = parents.get(child);
        while let Some(class_name) = current {
            if class_name == parent {
                return true;
            }
            if !seen.insert(class_name.as_str()) {
                return false;
            }
            current = parents.get(class_name);
        }
        false
    }
}
