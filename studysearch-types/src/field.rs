//! Field schema metadata. A [`PropertyDescriptor`] declares how one indexed
//! field behaves; a [`CollectionRegistry`] groups descriptors per collection
//! and derives the global union plus the subcollection hierarchy.

use std::collections::HashMap;

use log::warn;
use serde::{Deserialize, Serialize};

/// The storage/indexing shape of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    TokenizedString,
    Long,
    Facet,
    Date,
}

/// How a facet dimension is laid out in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacetKind {
    /// Flat labels, `|`-separated inside the source value.
    Plain,
    /// A path whose i-th segment is the depth-i ancestor (the ontology facet).
    Hierarchical,
}

/// Source-value normalisers, dispatched by name. The extractor pipeline that
/// feeds the indexer is external; these cover the normalisation the indexer
/// still owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserKind {
    Identity,
    LowerCase,
    /// Parse as i64, rejecting the value otherwise.
    Long,
    /// Derive a calendar year label from an epoch-millis value.
    YearOfMillis,
}

impl Default for ParserKind {
    fn default() -> Self {
        ParserKind::Identity
    }
}

impl ParserKind {
    /// Apply the parser to a raw extracted value. `None` drops the value.
    pub fn apply(self, raw: &str) -> Option<String> {
        match self {
            ParserKind::Identity => Some(raw.to_string()),
            ParserKind::LowerCase => Some(raw.to_lowercase()),
            ParserKind::Long => raw.trim().parse::<i64>().ok().map(|v| v.to_string()),
            ParserKind::YearOfMillis => {
                let millis = raw.trim().parse::<i64>().ok()?;
                if millis < 0 {
                    return None;
                }
                // Days-to-civil conversion; only the year is needed.
                let days = millis / 86_400_000;
                Some(year_of_epoch_days(days).to_string())
            }
        }
    }
}

fn year_of_epoch_days(days: i64) -> i64 {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    if mp < 10 {
        y
    } else {
        y + 1
    }
}

/// Immutable description of one indexed field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    /// Display title for the UI.
    #[serde(default)]
    pub title: String,
    pub kind: FieldKind,
    /// Named analyzer; `None` picks the default for the kind.
    #[serde(default)]
    pub analyzer: Option<String>,
    /// Source extractors, logically OR-ed. Owned by the external extractor
    /// pipeline, carried here for completeness.
    #[serde(default)]
    pub json_paths: Vec<String>,
    #[serde(default)]
    pub sortable: bool,
    #[serde(default)]
    pub multi_valued: bool,
    #[serde(default)]
    pub facet_kind: Option<FacetKind>,
    /// When false, labels equal to `default_value` are hidden from facet output.
    #[serde(default = "default_true")]
    pub na_visible: bool,
    #[serde(default)]
    pub parser: ParserKind,
    /// Stored and returned with hits.
    #[serde(default)]
    pub retrieved: bool,
    /// The query expander may add ontology terms on this field.
    #[serde(default)]
    pub expanded: bool,
    #[serde(default)]
    pub to_lower_case: bool,
    #[serde(default)]
    pub default_value: Option<String>,
    /// Facet counts on this dimension require an authorised principal.
    #[serde(default)]
    pub private: bool,
    /// Validation regex for incoming values.
    #[serde(default)]
    pub match_pattern: Option<String>,
}

fn default_true() -> bool {
    true
}

impl PropertyDescriptor {
    pub fn new<N: Into<String>>(name: N, kind: FieldKind) -> Self {
        let name = name.into();
        Self {
            title: name.clone(),
            name,
            kind,
            analyzer: None,
            json_paths: Vec::new(),
            sortable: false,
            multi_valued: false,
            facet_kind: None,
            na_visible: true,
            parser: ParserKind::default(),
            retrieved: false,
            expanded: false,
            to_lower_case: false,
            default_value: None,
            private: false,
            match_pattern: None,
        }
    }

    pub fn title<T: Into<String>>(mut self, title: T) -> Self {
        self.title = title.into();
        self
    }

    pub fn analyzer<A: Into<String>>(mut self, analyzer: A) -> Self {
        self.analyzer = Some(analyzer.into());
        self
    }

    pub fn sortable(mut self) -> Self {
        self.sortable = true;
        self
    }

    pub fn multi_valued(mut self) -> Self {
        self.multi_valued = true;
        self
    }

    pub fn facet(mut self, facet_kind: FacetKind) -> Self {
        self.facet_kind = Some(facet_kind);
        self
    }

    pub fn na_hidden(mut self) -> Self {
        self.na_visible = false;
        self
    }

    pub fn parser(mut self, parser: ParserKind) -> Self {
        self.parser = parser;
        self
    }

    pub fn retrieved(mut self) -> Self {
        self.retrieved = true;
        self
    }

    pub fn expanded(mut self) -> Self {
        self.expanded = true;
        self
    }

    pub fn lower_cased(mut self) -> Self {
        self.to_lower_case = true;
        self
    }

    pub fn default_value<V: Into<String>>(mut self, value: V) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn private(mut self) -> Self {
        self.private = true;
        self
    }

    pub fn is_facet(&self) -> bool {
        self.kind == FieldKind::Facet
    }

    /// The label hidden by facet formatting when `na_visible` is off.
    pub fn na_label(&self) -> &str {
        self.default_value.as_deref().unwrap_or("N/A")
    }
}

/// Collection name → descriptor list, the derived global registry, and the
/// subcollection hierarchy.
#[derive(Debug, Default)]
pub struct CollectionRegistry {
    collections: HashMap<String, Vec<PropertyDescriptor>>,
    global: HashMap<String, PropertyDescriptor>,
    children: HashMap<String, Vec<String>>,
    parents: HashMap<String, String>,
}

impl CollectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a collection. Descriptors join the global registry by name;
    /// the first registration of a name wins there.
    pub fn register<N: Into<String>>(&mut self, name: N, descriptors: Vec<PropertyDescriptor>) {
        let name = name.into();
        for d in &descriptors {
            self.global.entry(d.name.clone()).or_insert_with(|| d.clone());
        }
        self.collections.insert(name, descriptors);
    }

    /// Attach `child` under `parent`. A second parent for the same child is
    /// a warning, not an error; the first parent stays.
    pub fn set_parent(&mut self, child: &str, parent: &str) {
        if let Some(existing) = self.parents.get(child) {
            warn!(
                "collection '{}' already has parent '{}', ignoring '{}'",
                child, existing, parent
            );
            return;
        }
        self.parents.insert(child.to_string(), parent.to_string());
        self.children
            .entry(parent.to_string())
            .or_insert_with(Vec::new)
            .push(child.to_string());
    }

    pub fn collection(&self, name: &str) -> Option<&[PropertyDescriptor]> {
        self.collections.get(name).map(|v| v.as_slice())
    }

    pub fn collection_names(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(|k| k.as_str())
    }

    /// Descriptor lookup: collection overlay first, then the global union.
    pub fn descriptor(&self, collection: &str, field: &str) -> Option<&PropertyDescriptor> {
        self.collections
            .get(collection)
            .and_then(|ds| ds.iter().find(|d| d.name == field))
            .or_else(|| self.global.get(field))
    }

    pub fn global_descriptor(&self, field: &str) -> Option<&PropertyDescriptor> {
        self.global.get(field)
    }

    pub fn global_descriptors(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.global.values()
    }

    /// The descriptors in effect for a collection: its own list when known,
    /// the global union otherwise.
    pub fn effective(&self, collection: &str) -> Vec<&PropertyDescriptor> {
        match self.collections.get(collection) {
            Some(ds) => ds.iter().collect(),
            None => self.global.values().collect(),
        }
    }

    pub fn children(&self, parent: &str) -> &[String] {
        self.children.get(parent).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn parent(&self, child: &str) -> Option<&str> {
        self.parents.get(child).map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(name: &str) -> PropertyDescriptor {
        PropertyDescriptor::new(name, FieldKind::String)
    }

    #[test]
    fn global_union_first_registration_wins() {
        let mut reg = CollectionRegistry::new();
        reg.register("public", vec![desc("title").title("Title")]);
        reg.register("arrays", vec![desc("title").title("Array title")]);
        assert_eq!(reg.global_descriptor("title").unwrap().title, "Title");
        assert_eq!(reg.descriptor("arrays", "title").unwrap().title, "Array title");
    }

    #[test]
    fn duplicate_parent_keeps_first() {
        let mut reg = CollectionRegistry::new();
        reg.set_parent("arrays-sub", "arrays");
        reg.set_parent("arrays-sub", "public");
        assert_eq!(reg.parent("arrays-sub"), Some("arrays"));
        assert_eq!(reg.children("arrays"), &["arrays-sub".to_string()]);
        assert!(reg.children("public").is_empty());
    }

    #[test]
    fn year_parser() {
        // 2021-01-01T00:00:00Z
        assert_eq!(ParserKind::YearOfMillis.apply("1609459200000"), Some("2021".into()));
        assert_eq!(ParserKind::YearOfMillis.apply("not-a-number"), None);
    }
}
