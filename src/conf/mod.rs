//! Hierarchical key/value configuration tree.
//!
//! `Params` wraps a YAML value and exposes the narrow accessors the
//! runtime needs: child lookup, scalar/list/ordered-pair views and a
//! union merge for template composition. Mapping order is preserved, so
//! e.g. the `schedule` subtree keeps the order tasks were written in.

use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use crate::errors::PollerError;

#[derive(Clone, Debug, Default)]
pub struct Params {
    root: Value,
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl Params {
    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    pub fn from_yaml(text: &str) -> Result<Self, PollerError> {
        let root = serde_yaml::from_str(text)
            .map_err(|e| PollerError::Config(format!("parse yaml: {e}")))?;
        Ok(Self { root })
    }

    pub fn load(path: &Path) -> Result<Self, PollerError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PollerError::Config(format!("read ({}): {e}", path.display())))?;
        Self::from_yaml(&text)
    }

    pub fn is_null(&self) -> bool {
        self.root.is_null()
    }

    pub fn has_child(&self, key: &str) -> bool {
        self.root.get(key).is_some()
    }

    /// Subtree under `key`, if present.
    pub fn child(&self, key: &str) -> Option<Params> {
        self.root.get(key).cloned().map(Self::from_value)
    }

    /// Scalar child rendered as a string (strings, numbers, bools).
    pub fn child_string(&self, key: &str) -> Option<String> {
        self.root.get(key).and_then(scalar_to_string)
    }

    /// True when the child is present and spells a false value
    /// (`False`/`false`), the conventional way config disables a flag.
    pub fn child_is_false(&self, key: &str) -> bool {
        self.child_string(key)
            .is_some_and(|v| v.eq_ignore_ascii_case("false"))
    }

    /// Child as a list of strings. A scalar becomes a single-element
    /// list; a mapping yields its keys in order.
    pub fn child_list(&self, key: &str) -> Vec<String> {
        match self.root.get(key) {
            Some(Value::Sequence(seq)) => seq.iter().filter_map(scalar_to_string).collect(),
            Some(Value::Mapping(map)) => map
                .iter()
                .filter_map(|(k, _)| scalar_to_string(k))
                .collect(),
            Some(other) => scalar_to_string(other).into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// The tree's own top-level scalar pairs, in document order.
    pub fn pairs(&self) -> Vec<(String, String)> {
        match &self.root {
            Value::Mapping(map) => map
                .iter()
                .filter_map(|(k, v)| Some((scalar_to_string(k)?, scalar_to_string(v)?)))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Scalar pairs of the mapping under `key`, in document order.
    pub fn child_pairs(&self, key: &str) -> Vec<(String, String)> {
        self.child(key).map(|p| p.pairs()).unwrap_or_default()
    }

    /// Top-level keys, in document order.
    pub fn keys(&self) -> Vec<String> {
        match &self.root {
            Value::Mapping(map) => map
                .iter()
                .filter_map(|(k, _)| scalar_to_string(k))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn set_child_string(&mut self, key: &str, value: &str) {
        if !self.root.is_mapping() {
            self.root = Value::Mapping(Mapping::new());
        }
        if let Value::Mapping(map) = &mut self.root {
            map.insert(
                Value::String(key.to_string()),
                Value::String(value.to_string()),
            );
        }
    }

    /// Union merge: copy every top-level key of `other` that this tree
    /// does not already have. Existing keys win.
    pub fn union(&mut self, other: &Params) {
        let Value::Mapping(theirs) = &other.root else {
            return;
        };
        if !self.root.is_mapping() {
            self.root = Value::Mapping(Mapping::new());
        }
        if let Value::Mapping(ours) = &mut self.root {
            for (k, v) in theirs {
                if !ours.contains_key(k) {
                    ours.insert(k.clone(), v.clone());
                }
            }
        }
    }
}

/// Parameters of one poller from the top-level config file.
pub fn poller_params(config: &Path, name: &str) -> Result<Params, PollerError> {
    let root = Params::load(config)?;
    let pollers = root.child("pollers").ok_or_else(|| {
        PollerError::Config(format!("no pollers defined in ({})", config.display()))
    })?;
    pollers
        .child(name)
        .ok_or_else(|| PollerError::Config(format!("poller ({name}) not defined")))
}

/// The `exporters` section of the config file, empty when absent.
pub fn exporter_params(config: &Path) -> Result<Params, PollerError> {
    let root = Params::load(config)?;
    Ok(root.child("exporters").unwrap_or_default())
}

/// Optional collector template override at `HOME_PATH/conf/<class>.yaml`.
pub fn import_template(home: &Path, class: &str) -> Result<Option<Params>, PollerError> {
    let path: PathBuf = home
        .join("conf")
        .join(format!("{}.yaml", class.to_lowercase()));
    if !path.exists() {
        return Ok(None);
    }
    Params::load(&path).map(Some)
}
