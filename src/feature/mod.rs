//! On-disk feature flags.
//!
//! Every optional on-disk format change is a feature identified by a
//! reverse-DNS style guid such as `com.delphix:async_destroy`. A feature is
//! *disabled* as long as the pool has never heard of it, *enabled* once its
//! entry exists with a reference count of zero and *active* while that count
//! is positive. An active feature changes the on-disk format, so software
//! that does not understand it may not open the pool (or may only open it
//! read-only if the feature is read-only compatible).
//!
//! The `FeatureRegistry` is the static catalogue of known features and their
//! dependencies. The `FeatureActivation` protocol moves a pool's features
//! between the three states.

use std::collections::HashMap;
use std::fmt;
use std::ops::BitOr;

mod activation;
mod errors;
mod table;

pub use self::activation::{
    FeatureActivation, FeatureMap, FeatureObjects, FeatureState, UnsupportedFeature,
    SPA_VERSION_BEFORE_FEATURES, SPA_VERSION_FEATURES,
};
pub use self::errors::*;
pub use self::table::SpaFeature;

/// Guid of the feature every per-dataset feature has to depend on.
pub const EXTENSIBLE_DATASET_GUID: &str = "com.delphix:extensible_dataset";

/// Position of a feature in its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeatureId(pub usize);

impl FeatureId {
    /// Index into the registry.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Behavioural flags of a feature.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FeatureFlags(u8);

impl FeatureFlags {
    /// No flags.
    pub const NONE: FeatureFlags = FeatureFlags(0);
    /// Readers that do not understand the feature may still open the pool
    /// read-only while it is active.
    pub const READONLY_COMPAT: FeatureFlags = FeatureFlags(1 << 0);
    /// The feature must be understood before the metadata object set can be
    /// read at all, so it is also recorded in the pool label.
    pub const MOS: FeatureFlags = FeatureFlags(1 << 1);
    /// The feature becomes active as soon as it is enabled.
    pub const ACTIVATE_ON_ENABLE: FeatureFlags = FeatureFlags(1 << 2);
    /// The feature is reference counted per dataset.
    pub const PER_DATASET: FeatureFlags = FeatureFlags(1 << 3);

    /// Returns whether all flags of `other` are set.
    pub fn contains(self, other: FeatureFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for FeatureFlags {
    type Output = FeatureFlags;
    fn bitor(self, rhs: FeatureFlags) -> FeatureFlags {
        FeatureFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for FeatureFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let names = [
            (FeatureFlags::READONLY_COMPAT, "READONLY_COMPAT"),
            (FeatureFlags::MOS, "MOS"),
            (FeatureFlags::ACTIVATE_ON_ENABLE, "ACTIVATE_ON_ENABLE"),
            (FeatureFlags::PER_DATASET, "PER_DATASET"),
        ];
        let set: Vec<_> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", set.join("|"))
        }
    }
}

/// Shape of the per-dataset data of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureType {
    /// Present or not.
    Boolean,
    /// An array of integers.
    Uint64Array,
}

/// Static description of a feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureDescriptor {
    /// Position in the registry.
    pub id: FeatureId,
    /// Globally unique, reverse-DNS style name.
    pub guid: String,
    /// Short name used in user interfaces.
    pub name: String,
    /// Human readable description, stored on disk when enabled.
    pub description: String,
    /// Behavioural flags.
    pub flags: FeatureFlags,
    /// Per-dataset data shape.
    pub kind: FeatureType,
    /// Features that must be enabled before this one.
    pub depends: Vec<FeatureId>,
    /// Whether this build implements the feature. Unsupported features are
    /// skipped by lookups and cannot be enabled.
    pub supported: bool,
}

impl FeatureDescriptor {
    /// Describes a boolean feature.
    pub fn new(
        id: FeatureId,
        guid: &str,
        name: &str,
        description: &str,
        flags: FeatureFlags,
        depends: Vec<FeatureId>,
    ) -> Self {
        FeatureDescriptor {
            id,
            guid: guid.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            flags,
            kind: FeatureType::Boolean,
            depends,
            supported: true,
        }
    }

    /// Changes the per-dataset data shape.
    pub fn with_type(mut self, kind: FeatureType) -> Self {
        self.kind = kind;
        self
    }

    /// Marks whether this build implements the feature.
    pub fn with_supported(mut self, supported: bool) -> Self {
        self.supported = supported;
        self
    }

    /// Returns whether the feature is read-only compatible.
    pub fn is_readonly_compat(&self) -> bool {
        self.flags.contains(FeatureFlags::READONLY_COMPAT)
    }
}

/// Checks the syntax of a feature guid.
///
/// A guid consists of a lowercase reverse-DNS organisation, a single colon
/// and a lowercase short name. Dots and dashes are only allowed before the
/// colon, underscores only after it.
pub fn is_valid_guid(guid: &str) -> bool {
    let mut has_colon = false;
    for c in guid.chars() {
        if c == ':' {
            if has_colon {
                return false;
            }
            has_colon = true;
            continue;
        }
        let valid = c.is_ascii_lowercase()
            || c.is_ascii_digit()
            || (has_colon && c == '_')
            || (!has_colon && (c == '.' || c == '-'));
        if !valid {
            return false;
        }
    }
    has_colon
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    New,
    Active,
    Done,
}

/// The catalogue of features known to this build.
#[derive(Debug, Clone)]
pub struct FeatureRegistry {
    features: Vec<FeatureDescriptor>,
    by_guid: HashMap<String, FeatureId>,
    checks_disabled: bool,
}

lazy_static! {
    static ref BUILTIN: FeatureRegistry = match FeatureRegistry::new(table::builtin_features()) {
        Ok(registry) => registry,
        Err(e) => panic!("built-in feature table is inconsistent: {}", e),
    };
}

impl FeatureRegistry {
    /// Validates `features` and builds a registry from them.
    ///
    /// Every descriptor's id must equal its position. Registration fails on
    /// malformed or duplicate guids, on features that are both read-only
    /// compatible and needed to read the metadata object set, on dependency
    /// cycles and on per-dataset features that do not (transitively) depend
    /// on the extensible dataset feature.
    pub fn new(features: Vec<FeatureDescriptor>) -> Result<Self> {
        let mut by_guid = HashMap::new();
        for (position, feature) in features.iter().enumerate() {
            if feature.id.index() != position {
                bail!(ErrorKind::InvalidRegistry(format!(
                    "{} has id {} but is registered at {}",
                    feature.name,
                    feature.id.index(),
                    position
                )));
            }
            if !is_valid_guid(&feature.guid) {
                bail!(ErrorKind::InvalidGuid(feature.guid.clone()));
            }
            if feature.flags.contains(FeatureFlags::READONLY_COMPAT)
                && feature.flags.contains(FeatureFlags::MOS)
            {
                bail!(ErrorKind::InvalidRegistry(format!(
                    "{} is both read-only compatible and needed to read the MOS",
                    feature.name
                )));
            }
            if let Some(dep) = feature.depends.iter().find(|dep| dep.index() >= features.len()) {
                bail!(ErrorKind::InvalidRegistry(format!(
                    "{} depends on unknown feature {}",
                    feature.name,
                    dep.index()
                )));
            }
            if by_guid.insert(feature.guid.clone(), feature.id).is_some() {
                bail!(ErrorKind::InvalidRegistry(format!(
                    "{} registered twice",
                    feature.guid
                )));
            }
        }

        let registry = FeatureRegistry {
            features,
            by_guid,
            checks_disabled: false,
        };
        registry.check_acyclic()?;

        let extensible = registry.by_guid.get(EXTENSIBLE_DATASET_GUID).cloned();
        for feature in &registry.features {
            if !feature.flags.contains(FeatureFlags::PER_DATASET) {
                continue;
            }
            let extends = extensible.map_or(false, |ext| registry.depends_on(feature.id, ext));
            if !extends {
                bail!(ErrorKind::InvalidRegistry(format!(
                    "per-dataset feature {} does not depend on {}",
                    feature.name, EXTENSIBLE_DATASET_GUID
                )));
            }
        }
        Ok(registry)
    }

    /// The features known to this build.
    pub fn builtin() -> &'static FeatureRegistry {
        &BUILTIN
    }

    /// Makes `is_supported_by_this_build` accept every guid. Meant for
    /// debugging pools with features this build does not understand.
    pub fn with_checks_disabled(mut self, disabled: bool) -> Self {
        self.checks_disabled = disabled;
        self
    }

    /// Returns whether feature checks are disabled.
    pub fn checks_disabled(&self) -> bool {
        self.checks_disabled
    }

    fn check_acyclic(&self) -> Result<()> {
        let mut visit = vec![Visit::New; self.features.len()];
        for root in 0..self.features.len() {
            if visit[root] != Visit::New {
                continue;
            }
            visit[root] = Visit::Active;
            let mut stack = vec![(root, 0)];
            while let Some((index, next)) = stack.pop() {
                match self.features[index].depends.get(next) {
                    Some(dep) => {
                        stack.push((index, next + 1));
                        match visit[dep.index()] {
                            Visit::New => {
                                visit[dep.index()] = Visit::Active;
                                stack.push((dep.index(), 0));
                            }
                            Visit::Active => {
                                bail!(ErrorKind::InvalidRegistry(format!(
                                    "dependency cycle through {}",
                                    self.features[dep.index()].name
                                )));
                            }
                            Visit::Done => {}
                        }
                    }
                    None => visit[index] = Visit::Done,
                }
            }
        }
        Ok(())
    }

    /// Number of registered features.
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Returns whether no feature is registered.
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// The descriptor of `id`.
    ///
    /// # Panics
    /// Panics if `id` does not belong to this registry.
    pub fn get(&self, id: FeatureId) -> &FeatureDescriptor {
        &self.features[id.index()]
    }

    /// Iterates over all descriptors in id order.
    pub fn iter(&self) -> impl Iterator<Item = &FeatureDescriptor> {
        self.features.iter()
    }

    /// Finds a supported feature by guid.
    pub fn lookup_guid(&self, guid: &str) -> Option<FeatureId> {
        self.by_guid
            .get(guid)
            .cloned()
            .filter(|&id| self.get(id).supported)
    }

    /// Finds a supported feature by short name.
    pub fn lookup_name(&self, name: &str) -> Option<FeatureId> {
        self.features
            .iter()
            .find(|f| f.supported && f.name == name)
            .map(|f| f.id)
    }

    /// Returns whether this build understands the feature `guid`, or
    /// feature checks are disabled altogether.
    pub fn is_supported_by_this_build(&self, guid: &str) -> bool {
        self.checks_disabled || self.lookup_guid(guid).is_some()
    }

    /// `id` and everything it transitively depends on, dependencies first.
    /// `id` itself is always the last element.
    pub fn closure(&self, id: FeatureId) -> Vec<FeatureId> {
        let mut seen = vec![false; self.features.len()];
        let mut order = Vec::new();
        seen[id.index()] = true;
        let mut stack = vec![(id, 0)];
        while let Some((current, next)) = stack.pop() {
            match self.get(current).depends.get(next) {
                Some(&dep) => {
                    stack.push((current, next + 1));
                    if !seen[dep.index()] {
                        seen[dep.index()] = true;
                        stack.push((dep, 0));
                    }
                }
                None => order.push(current),
            }
        }
        order
    }

    /// Returns whether `id` transitively depends on `dependency`.
    pub fn depends_on(&self, id: FeatureId, dependency: FeatureId) -> bool {
        id != dependency && self.closure(id).contains(&dependency)
    }
}
