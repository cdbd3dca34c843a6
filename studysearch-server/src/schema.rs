//! Index names, field names, the default PropertyDescriptor sets and the
//! descriptor → tantivy schema compiler.

use tantivy::schema::{
    FacetOptions, IndexRecordOption, NumericOptions, Schema, SchemaBuilder, TextFieldIndexing,
    TextOptions, FAST, INDEXED, STORED,
};

use studysearch_types::{
    CollectionRegistry, FacetKind, FieldKind, ParserKind, PropertyDescriptor,
};

use crate::analyzers;

// Named indexes.
pub const SUBMISSION: &str = "submission";
pub const PAGETAB: &str = "pagetab";
pub const FILES: &str = "files";
pub const EFO: &str = "efo";

/// Directory name for a named index under the base path. `facet_index` is
/// reserved in the layout; facet data lives inside `submission_index`.
pub fn index_dir(name: &str) -> &'static str {
    match name {
        SUBMISSION => "submission_index",
        PAGETAB => "pagetab_index",
        FILES => "file_index",
        EFO => "efo_index",
        _ => "unknown_index",
    }
}

pub const FACET_DIR_RESERVED: &str = "facet_index";

// Submission fields.
pub const FIELD_ID: &str = "id";
pub const FIELD_ACCESSION: &str = "accession";
pub const FIELD_ACCESS: &str = "access";
pub const FIELD_RELEASE_TIME: &str = "release_time";
pub const FIELD_MODIFICATION_TIME: &str = "modification_time";
pub const FIELD_CONTENT: &str = "content";
pub const FIELD_TITLE: &str = "title";
pub const FIELD_AUTHOR: &str = "author";
pub const FIELD_FILE_COUNT: &str = "file_count";
pub const FIELD_LINK_COUNT: &str = "link_count";
pub const FIELD_VIEW_COUNT: &str = "view_count";
pub const FIELD_IS_PUBLIC: &str = "is_public";

// Facet dimensions.
pub const FACET_COLLECTION: &str = "collection";
pub const FACET_RELEASE_YEAR: &str = "release_year";
pub const FACET_STUDY_TYPE: &str = "study_type";
pub const FACET_ONTOLOGY: &str = "ontology";

// File fields.
pub const FILE_OWNER: &str = "owner";
pub const FILE_PATH: &str = "file_path";
pub const FILE_NAME: &str = "file_name";
pub const FILE_SIZE: &str = "file_size";
pub const FILE_SECTION: &str = "file_section";
pub const FILE_TYPE: &str = "file_type";
pub const FILE_IS_DIRECTORY: &str = "file_isDirectory";

// Pagetab fields.
pub const PAGETAB_ACCESSION: &str = "accession";
pub const PAGETAB_CONTENT: &str = "pagetab";

// EFO fields.
pub const EFO_ID: &str = "id";
pub const EFO_TERM: &str = "term";
pub const EFO_ALT_TERM: &str = "alternative_term";
pub const EFO_PARENT: &str = "parent";
pub const EFO_SYNONYM: &str = "synonym";
pub const EFO_CHILD_TERM: &str = "child_term";
pub const EFO_EXPANSION: &str = "expansion";
pub const EFO_PATH: &str = "path";

/// The stored sentinel for a missing release time.
pub const RELEASE_TIME_ABSENT: i64 = -1;

/// Suffix of the hidden sort companion of a sortable string field.
pub const SORT_FIELD_SUFFIX: &str = "_sort";

/// Pack the lower-cased first eight bytes of a string into a big-endian u64,
/// giving a fast field that orders like the string itself.
pub fn string_sort_key(value: &str) -> u64 {
    let lower = value.to_lowercase();
    let mut bytes = [0u8; 8];
    for (i, b) in lower.as_bytes().iter().take(8).enumerate() {
        bytes[i] = *b;
    }
    u64::from_be_bytes(bytes)
}

/// The default submission descriptors of the `public` collection.
pub fn submission_descriptors() -> Vec<PropertyDescriptor> {
    vec![
        PropertyDescriptor::new(FIELD_ID, FieldKind::String)
            .analyzer(analyzers::KEYWORD)
            .retrieved(),
        PropertyDescriptor::new(FIELD_ACCESSION, FieldKind::String)
            .title("Accession")
            .analyzer(analyzers::KEYWORD_LC)
            .lower_cased()
            .retrieved(),
        PropertyDescriptor::new(FIELD_ACCESS, FieldKind::String)
            .analyzer(analyzers::KEYWORD_LC)
            .lower_cased()
            .multi_valued(),
        PropertyDescriptor::new(FIELD_RELEASE_TIME, FieldKind::Long)
            .title("Release time")
            .sortable()
            .retrieved(),
        PropertyDescriptor::new(FIELD_MODIFICATION_TIME, FieldKind::Long).retrieved(),
        PropertyDescriptor::new(FIELD_CONTENT, FieldKind::TokenizedString)
            .title("Content")
            .analyzer(analyzers::SIMPLE_LC)
            .retrieved()
            .expanded(),
        PropertyDescriptor::new(FIELD_TITLE, FieldKind::TokenizedString)
            .title("Title")
            .analyzer(analyzers::SIMPLE_LC)
            .sortable()
            .retrieved()
            .expanded(),
        PropertyDescriptor::new(FIELD_AUTHOR, FieldKind::TokenizedString)
            .title("Author")
            .analyzer(analyzers::SIMPLE_LC)
            .multi_valued()
            .retrieved(),
        PropertyDescriptor::new(FIELD_FILE_COUNT, FieldKind::Long)
            .title("Files")
            .sortable()
            .retrieved(),
        PropertyDescriptor::new(FIELD_LINK_COUNT, FieldKind::Long)
            .title("Links")
            .sortable()
            .retrieved(),
        PropertyDescriptor::new(FIELD_VIEW_COUNT, FieldKind::Long)
            .title("Views")
            .sortable()
            .retrieved(),
        PropertyDescriptor::new(FIELD_IS_PUBLIC, FieldKind::String)
            .analyzer(analyzers::KEYWORD)
            .retrieved(),
        PropertyDescriptor::new(FACET_COLLECTION, FieldKind::Facet)
            .title("Collection")
            .facet(FacetKind::Plain)
            .lower_cased()
            .multi_valued()
            .retrieved(),
        PropertyDescriptor::new(FACET_RELEASE_YEAR, FieldKind::Facet)
            .title("Released")
            .facet(FacetKind::Plain)
            .parser(ParserKind::YearOfMillis)
            .na_hidden()
            .default_value("N/A"),
        PropertyDescriptor::new(FACET_STUDY_TYPE, FieldKind::Facet)
            .title("Study type")
            .facet(FacetKind::Plain)
            .lower_cased()
            .multi_valued()
            .na_hidden()
            .default_value("N/A"),
        PropertyDescriptor::new(FACET_ONTOLOGY, FieldKind::Facet)
            .title("Ontology")
            .facet(FacetKind::Hierarchical)
            .multi_valued(),
    ]
}

pub fn file_descriptors() -> Vec<PropertyDescriptor> {
    vec![
        PropertyDescriptor::new(FIELD_ID, FieldKind::String)
            .analyzer(analyzers::KEYWORD)
            .retrieved(),
        PropertyDescriptor::new(FILE_OWNER, FieldKind::String)
            .analyzer(analyzers::KEYWORD_LC)
            .lower_cased()
            .retrieved(),
        PropertyDescriptor::new(FILE_PATH, FieldKind::String)
            .analyzer(analyzers::KEYWORD)
            .retrieved(),
        PropertyDescriptor::new(FILE_NAME, FieldKind::TokenizedString)
            .analyzer(analyzers::SIMPLE_LC)
            .retrieved(),
        PropertyDescriptor::new(FILE_SIZE, FieldKind::Long).sortable().retrieved(),
        PropertyDescriptor::new(FILE_SECTION, FieldKind::String)
            .analyzer(analyzers::KEYWORD)
            .retrieved(),
        PropertyDescriptor::new(FILE_TYPE, FieldKind::String)
            .analyzer(analyzers::KEYWORD_LC)
            .lower_cased()
            .retrieved(),
        PropertyDescriptor::new(FILE_IS_DIRECTORY, FieldKind::String)
            .analyzer(analyzers::KEYWORD)
            .retrieved(),
    ]
}

/// The registry used when no collection configuration is supplied.
pub fn default_registry() -> CollectionRegistry {
    let mut registry = CollectionRegistry::new();
    registry.register("public", submission_descriptors());
    registry
}

/// Compile a descriptor list into a tantivy schema.
pub fn build_schema(descriptors: &[PropertyDescriptor]) -> Schema {
    let mut builder = SchemaBuilder::new();
    for d in descriptors {
        add_field(&mut builder, d);
    }
    builder.build()
}

fn add_field(builder: &mut SchemaBuilder, d: &PropertyDescriptor) {
    match d.kind {
        FieldKind::String => {
            let analyzer = d.analyzer.as_deref().unwrap_or(analyzers::KEYWORD);
            builder.add_text_field(&d.name, text_options(analyzer, d.retrieved, false));
            if d.sortable {
                builder.add_u64_field(&format!("{}{}", d.name, SORT_FIELD_SUFFIX), FAST);
            }
        }
        FieldKind::TokenizedString => {
            let analyzer = d.analyzer.as_deref().unwrap_or(analyzers::SIMPLE_LC);
            builder.add_text_field(&d.name, text_options(analyzer, d.retrieved, true));
            if d.sortable {
                builder.add_u64_field(&format!("{}{}", d.name, SORT_FIELD_SUFFIX), FAST);
            }
        }
        FieldKind::Long | FieldKind::Date => {
            let mut opts: NumericOptions = (INDEXED | STORED).into();
            if d.sortable {
                opts = opts | FAST;
            }
            builder.add_i64_field(&d.name, opts);
        }
        FieldKind::Facet => {
            builder.add_facet_field(&d.name, FacetOptions::default().set_stored());
        }
    }
}

fn text_options(analyzer: &str, stored: bool, positions: bool) -> TextOptions {
    let record = if positions {
        IndexRecordOption::WithFreqsAndPositions
    } else {
        IndexRecordOption::Basic
    };
    let indexing = TextFieldIndexing::default()
        .set_tokenizer(analyzer)
        .set_index_option(record);
    let opts = TextOptions::default().set_indexing_options(indexing);
    if stored {
        opts.set_stored()
    } else {
        opts
    }
}

pub fn submission_schema() -> Schema {
    build_schema(&submission_descriptors())
}

pub fn file_schema() -> Schema {
    build_schema(&file_descriptors())
}

pub fn pagetab_schema() -> Schema {
    let mut builder = SchemaBuilder::new();
    builder.add_text_field(
        PAGETAB_ACCESSION,
        text_options(analyzers::KEYWORD_LC, true, false),
    );
    // Raw page-tab payload, stored only.
    builder.add_text_field(PAGETAB_CONTENT, TextOptions::default().set_stored());
    builder.build()
}

pub fn efo_schema() -> Schema {
    let mut builder = SchemaBuilder::new();
    builder.add_text_field(EFO_ID, text_options(analyzers::KEYWORD, true, false));
    builder.add_text_field(EFO_TERM, text_options(analyzers::KEYWORD_LC, true, false));
    builder.add_text_field(EFO_ALT_TERM, text_options(analyzers::KEYWORD_LC, true, false));
    builder.add_text_field(EFO_PARENT, TextOptions::default().set_stored());
    builder.add_text_field(EFO_SYNONYM, TextOptions::default().set_stored());
    builder.add_text_field(EFO_CHILD_TERM, TextOptions::default().set_stored());
    builder.add_text_field(EFO_EXPANSION, text_options(analyzers::KEYWORD_LC, false, false));
    builder.add_text_field(EFO_PATH, TextOptions::default().set_stored());
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_schema_has_required_fields() {
        let schema = submission_schema();
        for field in &[FIELD_ID, FIELD_ACCESSION, FIELD_ACCESS, FIELD_RELEASE_TIME, FIELD_CONTENT, FIELD_TITLE] {
            assert!(schema.get_field(field).is_some(), "missing {}", field);
        }
        // sortable strings get a hidden companion
        assert!(schema.get_field("title_sort").is_some());
        assert!(schema.get_field("content_sort").is_none());
    }

    #[test]
    fn sort_key_orders_like_strings() {
        let a = string_sort_key("Apple");
        let b = string_sort_key("banana");
        let c = string_sort_key("Cherry study");
        assert!(a < b && b < c);
        assert_eq!(string_sort_key("APPLE"), string_sort_key("apple"));
    }

    #[test]
    fn dir_layout() {
        assert_eq!(index_dir(SUBMISSION), "submission_index");
        assert_eq!(index_dir(FILES), "file_index");
        assert_eq!(index_dir(EFO), "efo_index");
        assert_eq!(index_dir(PAGETAB), "pagetab_index");
    }
}
