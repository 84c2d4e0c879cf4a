//! Catalog name mapping.
//!
//! A published name is the upstream's name passed through the per-kind
//! rename table, then prefixed with `{namespace}_` unless the upstream hides
//! its prefix.

use std::collections::BTreeMap;

use switchyard_core::constants::NAMESPACE_SEPARATOR;
use switchyard_settings::{MappingConfig, RenameTables};

/// Maps upstream catalog names onto gateway names for one upstream.
#[derive(Clone, Debug)]
pub struct NameMapper {
    namespace: String,
    hide_prefix: bool,
    rename: RenameTables,
}

impl NameMapper {
    /// Mapper for `namespace` with the upstream's mapping settings.
    pub fn new(namespace: impl Into<String>, mapping: &MappingConfig) -> Self {
        Self {
            namespace: namespace.into(),
            hide_prefix: mapping.hide_namespace_prefix,
            rename: mapping.rename.clone(),
        }
    }

    /// Namespace this mapper prefixes with.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Published tool name.
    pub fn tool(&self, name: &str) -> String {
        self.apply(&self.rename.tools, name)
    }

    /// Published resource name.
    pub fn resource(&self, name: &str) -> String {
        self.apply(&self.rename.resources, name)
    }

    /// Published prompt name.
    pub fn prompt(&self, name: &str) -> String {
        self.apply(&self.rename.prompts, name)
    }

    fn apply(&self, table: &BTreeMap<String, String>, name: &str) -> String {
        let local = table.get(name).map_or(name, String::as_str);
        if self.hide_prefix || self.namespace.is_empty() {
            local.to_owned()
        } else {
            format!("{}{NAMESPACE_SEPARATOR}{local}", self.namespace)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(hide: bool) -> MappingConfig {
        let mut m = MappingConfig::default();
        m.hide_namespace_prefix = hide;
        let _ = m.rename.tools.insert("add".into(), "sum".into());
        let _ = m.rename.prompts.insert("greet".into(), "hello".into());
        m
    }

    #[test]
    fn prefix_after_rename() {
        let mapper = NameMapper::new("math", &mapping(false));
        assert_eq!(mapper.tool("add"), "math_sum");
        assert_eq!(mapper.tool("mul"), "math_mul");
        assert_eq!(mapper.prompt("greet"), "math_hello");
        assert_eq!(mapper.resource("readme"), "math_readme");
    }

    #[test]
    fn hidden_prefix_keeps_rename() {
        let mapper = NameMapper::new("math", &mapping(true));
        assert_eq!(mapper.tool("add"), "sum");
        assert_eq!(mapper.tool("mul"), "mul");
    }

    #[test]
    fn tables_are_per_kind() {
        let mapper = NameMapper::new("m", &mapping(false));
        assert_eq!(mapper.resource("add"), "m_add");
    }
}
