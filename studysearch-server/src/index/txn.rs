//! Per-submission index transactions: coordinated replacement of the
//! submission, file and pagetab documents of one accession, ordered commits
//! with an `updateTime` stamp, and idempotent deletion.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use tantivy::schema::{Facet, Field, Schema};
use tantivy::{Document, Term};

use studysearch_types::{
    CollectionRegistry, Error, FacetKind, FieldKind, IndexSubmissionRequest, ParserKind,
    PropertyDescriptor, Result,
};

use crate::index::pool::SharedPool;
use crate::ontology::store::OntologyStore;
use crate::schema::{
    string_sort_key, FACET_RELEASE_YEAR, FIELD_ACCESS, FIELD_ACCESSION, FIELD_CONTENT, FIELD_ID,
    FIELD_IS_PUBLIC, FIELD_MODIFICATION_TIME, FIELD_RELEASE_TIME, FIELD_TITLE, FILES, FILE_IS_DIRECTORY,
    FILE_OWNER, FILE_SIZE, PAGETAB, PAGETAB_ACCESSION, PAGETAB_CONTENT, RELEASE_TIME_ABSENT,
    SORT_FIELD_SUFFIX, SUBMISSION,
};

/// Fields the submission builder fills outside the descriptor loop.
const SPECIAL_FIELDS: &[&str] = &[
    FIELD_ID,
    FIELD_ACCESSION,
    FIELD_ACCESS,
    FIELD_RELEASE_TIME,
    FIELD_IS_PUBLIC,
];

pub struct IndexTransactionManager {
    pool: SharedPool,
    registry: Arc<CollectionRegistry>,
    ontology: Arc<OntologyStore>,
}

impl IndexTransactionManager {
    pub fn new(pool: SharedPool, registry: Arc<CollectionRegistry>, ontology: Arc<OntologyStore>) -> Self {
        Self { pool, registry, ontology }
    }

    /// Replace every document belonging to `accession`: pagetab and file
    /// docs are deleted by owner first, then rewritten, then the submission
    /// doc is upserted by id. Visibility requires a later [`commit`].
    ///
    /// [`commit`]: IndexTransactionManager::commit
    pub async fn update_submission(
        &self,
        accession: &str,
        request: &IndexSubmissionRequest,
    ) -> Result<()> {
        let acc_lc = accession.to_lowercase();

        {
            let schema = self.pool.schema(PAGETAB)?;
            let acc_field = field(&schema, PAGETAB_ACCESSION)?;
            let writer = self.pool.writer(PAGETAB)?;
            let w = writer.lock().await;
            w.delete_term(Term::from_field_text(acc_field, &acc_lc));
            if let Some(pagetab) = &request.pagetab {
                let mut doc = Document::new();
                doc.add_text(acc_field, &acc_lc);
                doc.add_text(field(&schema, PAGETAB_CONTENT)?, pagetab);
                w.add_document(doc)?;
            }
        }

        {
            let schema = self.pool.schema(FILES)?;
            let owner_field = field(&schema, FILE_OWNER)?;
            let writer = self.pool.writer(FILES)?;
            let w = writer.lock().await;
            w.delete_term(Term::from_field_text(owner_field, &acc_lc));
            for doc in build_file_docs(&schema, accession, &request.files)? {
                w.add_document(doc)?;
            }
        }

        {
            let schema = self.pool.schema(SUBMISSION)?;
            let id_field = field(&schema, FIELD_ID)?;
            let doc = build_submission_doc(
                &schema,
                &self.registry.effective("public"),
                &self.ontology,
                accession,
                &request.fields,
            )?;
            let writer = self.pool.writer(SUBMISSION)?;
            let w = writer.lock().await;
            w.delete_term(Term::from_field_text(id_field, accession));
            w.add_document(doc)?;
        }

        debug!("updated submission '{}'", accession);
        Ok(())
    }

    /// Stamp, commit the three coupled indexes in order, refresh readers.
    pub async fn commit(&self) -> Result<()> {
        self.pool.commit_submission_related().await?;
        self.pool.refresh_all();
        Ok(())
    }

    /// Remove the submission, its file documents and its pagetab document,
    /// then commit. Safe to re-run.
    pub async fn delete_submission(&self, accession: &str) -> Result<()> {
        let acc_lc = accession.to_lowercase();

        {
            let schema = self.pool.schema(SUBMISSION)?;
            let acc_field = field(&schema, FIELD_ACCESSION)?;
            let writer = self.pool.writer(SUBMISSION)?;
            let w = writer.lock().await;
            w.delete_term(Term::from_field_text(acc_field, &acc_lc));
        }
        {
            let schema = self.pool.schema(FILES)?;
            let owner_field = field(&schema, FILE_OWNER)?;
            let writer = self.pool.writer(FILES)?;
            let w = writer.lock().await;
            w.delete_term(Term::from_field_text(owner_field, &acc_lc));
        }
        {
            let schema = self.pool.schema(PAGETAB)?;
            let acc_field = field(&schema, PAGETAB_ACCESSION)?;
            let writer = self.pool.writer(PAGETAB)?;
            let w = writer.lock().await;
            w.delete_term(Term::from_field_text(acc_field, &acc_lc));
        }

        self.commit().await
    }
}

fn field(schema: &Schema, name: &str) -> Result<Field> {
    schema
        .get_field(name)
        .ok_or_else(|| Error::UnknownField(name.into()))
}

fn first_i64(values: Option<&Vec<String>>) -> Option<i64> {
    values?.iter().find_map(|v| v.trim().parse::<i64>().ok())
}

/// Build the submission document from the flat field map the external
/// extractor delivered.
pub fn build_submission_doc(
    schema: &Schema,
    descriptors: &[&PropertyDescriptor],
    ontology: &OntologyStore,
    accession: &str,
    fields: &HashMap<String, Vec<String>>,
) -> Result<Document> {
    let mut doc = Document::new();

    let access_tags: Vec<String> = fields
        .get(FIELD_ACCESS)
        .map(|vs| {
            vs.iter()
                .flat_map(|v| v.split_whitespace())
                .map(|t| t.to_lowercase())
                .collect()
        })
        .unwrap_or_default();
    let is_public = access_tags.iter().any(|t| t == "public");

    doc.add_text(field(schema, FIELD_ID)?, accession);
    doc.add_text(field(schema, FIELD_ACCESSION)?, accession.to_lowercase());
    let access_field = field(schema, FIELD_ACCESS)?;
    for tag in &access_tags {
        doc.add_text(access_field, tag);
    }

    // Release time: explicit value, else the modification time for public
    // records, else the absence sentinel.
    let release_time = first_i64(fields.get(FIELD_RELEASE_TIME))
        .or_else(|| {
            if is_public {
                first_i64(fields.get(FIELD_MODIFICATION_TIME))
            } else {
                None
            }
        })
        .unwrap_or(RELEASE_TIME_ABSENT);
    doc.add_i64(field(schema, FIELD_RELEASE_TIME)?, release_time);
    doc.add_text(
        field(schema, FIELD_IS_PUBLIC)?,
        if is_public { "true" } else { "false" },
    );

    for d in descriptors {
        if SPECIAL_FIELDS.contains(&d.name.as_str()) {
            continue;
        }
        match d.kind {
            FieldKind::Long | FieldKind::Date => {
                let value = first_i64(fields.get(&d.name))
                    .or_else(|| d.default_value.as_ref().and_then(|v| v.parse().ok()))
                    .unwrap_or(0);
                doc.add_i64(field(schema, &d.name)?, value);
            }
            FieldKind::String | FieldKind::TokenizedString => {
                let f = field(schema, &d.name)?;
                let mut first = true;
                if let Some(values) = fields.get(&d.name) {
                    for raw in values {
                        let value = normalise(d, raw);
                        if let Some(value) = value {
                            if first && d.sortable {
                                add_sort_key(schema, &mut doc, &d.name, &value)?;
                            }
                            doc.add_text(f, &value);
                            first = false;
                        }
                    }
                }
                if first {
                    if let Some(default) = &d.default_value {
                        doc.add_text(f, default);
                    }
                }
            }
            FieldKind::Facet => add_facet_values(schema, &mut doc, d, ontology, fields, release_time)?,
        }
    }

    Ok(doc)
}

fn normalise(d: &PropertyDescriptor, raw: &str) -> Option<String> {
    let value = if d.to_lower_case {
        raw.to_lowercase()
    } else {
        raw.to_string()
    };
    d.parser.apply(&value)
}

fn add_sort_key(schema: &Schema, doc: &mut Document, name: &str, value: &str) -> Result<()> {
    let sort_field = field(schema, &format!("{}{}", name, SORT_FIELD_SUFFIX))?;
    doc.add_u64(sort_field, string_sort_key(value));
    Ok(())
}

fn add_facet_values(
    schema: &Schema,
    doc: &mut Document,
    d: &PropertyDescriptor,
    ontology: &OntologyStore,
    fields: &HashMap<String, Vec<String>>,
    release_time: i64,
) -> Result<()> {
    let f = field(schema, &d.name)?;
    match d.facet_kind {
        Some(FacetKind::Hierarchical) => {
            if let Some(values) = fields.get(&d.name) {
                for raw in values {
                    for path in raw.split('|').filter(|p| !p.trim().is_empty()) {
                        let segments: Vec<String> =
                            path.split('/').map(|s| s.trim().to_lowercase()).collect();
                        doc.add_facet(f, Facet::from_path(segments));
                    }
                }
            } else {
                // Derive the ontology facet from terms found in the text.
                let mut text = String::new();
                for name in &[FIELD_TITLE, FIELD_CONTENT] {
                    if let Some(values) = fields.get(*name) {
                        for v in values {
                            text.push_str(v);
                            text.push(' ');
                        }
                    }
                }
                for term in ontology.find_efo_terms(&text) {
                    if let Some(mut segments) = ontology.facet_segments(&term) {
                        if !segments.is_empty() {
                            doc.add_facet(f, Facet::from_path(segments.drain(..)));
                        }
                    }
                }
            }
        }
        _ => {
            let mut labels: Vec<String> = Vec::new();
            if let Some(values) = fields.get(&d.name) {
                for raw in values {
                    for piece in raw.split('|') {
                        let piece = piece.trim();
                        if piece.is_empty() {
                            continue;
                        }
                        let label = if d.to_lower_case {
                            piece.to_lowercase()
                        } else {
                            piece.to_string()
                        };
                        if let Some(label) = d.parser.apply(&label) {
                            labels.push(label);
                        }
                    }
                }
            }
            // The release-year dimension is derived from the release time
            // when the extractor supplied no label.
            if labels.is_empty() && d.name == FACET_RELEASE_YEAR && release_time != RELEASE_TIME_ABSENT {
                if let Some(year) = ParserKind::YearOfMillis.apply(&release_time.to_string()) {
                    labels.push(year);
                }
            }
            if labels.is_empty() {
                if let Some(default) = &d.default_value {
                    labels.push(default.clone());
                }
            }
            for label in labels {
                doc.add_facet(f, Facet::from_path(std::iter::once(label)));
            }
        }
    }
    Ok(())
}

/// One document per file, `id = accession + "-" + position` (1-based).
pub fn build_file_docs(
    schema: &Schema,
    accession: &str,
    files: &[HashMap<String, String>],
) -> Result<Vec<Document>> {
    let mut docs = Vec::with_capacity(files.len());
    let id_field = field(schema, FIELD_ID)?;
    let owner_field = field(schema, FILE_OWNER)?;
    let size_field = field(schema, FILE_SIZE)?;
    for (position, file) in files.iter().enumerate() {
        let mut doc = Document::new();
        doc.add_text(id_field, format!("{}-{}", accession, position + 1));
        doc.add_text(owner_field, accession.to_lowercase());
        let size = file
            .get(FILE_SIZE)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(0);
        doc.add_i64(size_field, size);
        for name in &[
            crate::schema::FILE_PATH,
            crate::schema::FILE_NAME,
            crate::schema::FILE_SECTION,
            crate::schema::FILE_TYPE,
        ] {
            if let Some(value) = file.get(*name) {
                doc.add_text(field(schema, name)?, value);
            }
        }
        let is_dir = file
            .get(FILE_IS_DIRECTORY)
            .map(|v| v == "true")
            .unwrap_or(false);
        doc.add_text(
            field(schema, FILE_IS_DIRECTORY)?,
            if is_dir { "true" } else { "false" },
        );
        docs.push(doc);
    }
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{file_schema, submission_descriptors, submission_schema};

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, Vec<String>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), vec![v.to_string()]))
            .collect()
    }

    #[test]
    fn submission_doc_normalises_accession_and_access() {
        let schema = submission_schema();
        let descriptors = submission_descriptors();
        let refs: Vec<&PropertyDescriptor> = descriptors.iter().collect();
        let ontology = OntologyStore::new();
        let doc = build_submission_doc(
            &schema,
            &refs,
            &ontology,
            "S-BSST1",
            &fields(&[
                ("access", "Public user1"),
                ("title", "Human leukocyte study"),
                ("content", "leukocyte is a cell"),
                ("release_time", "1609459200000"),
            ]),
        )
        .unwrap();

        let acc = schema.get_field(FIELD_ACCESSION).unwrap();
        assert_eq!(doc.get_first(acc).unwrap().as_text(), Some("s-bsst1"));
        let access = schema.get_field(FIELD_ACCESS).unwrap();
        let tags: Vec<&str> = doc.get_all(access).filter_map(|v| v.as_text()).collect();
        assert_eq!(tags, vec!["public", "user1"]);
        let public = schema.get_field(FIELD_IS_PUBLIC).unwrap();
        assert_eq!(doc.get_first(public).unwrap().as_text(), Some("true"));
    }

    #[test]
    fn missing_release_time_uses_modification_for_public() {
        let schema = submission_schema();
        let descriptors = submission_descriptors();
        let refs: Vec<&PropertyDescriptor> = descriptors.iter().collect();
        let ontology = OntologyStore::new();
        let doc = build_submission_doc(
            &schema,
            &refs,
            &ontology,
            "S-BSST2",
            &fields(&[("access", "public"), ("modification_time", "1000")]),
        )
        .unwrap();
        let rt = schema.get_field(FIELD_RELEASE_TIME).unwrap();
        assert_eq!(doc.get_first(rt).unwrap().as_i64(), Some(1000));

        let doc = build_submission_doc(
            &schema,
            &refs,
            &ontology,
            "S-BSST3",
            &fields(&[("access", "user2"), ("modification_time", "1000")]),
        )
        .unwrap();
        assert_eq!(doc.get_first(rt).unwrap().as_i64(), Some(RELEASE_TIME_ABSENT));
    }

    #[test]
    fn file_docs_get_positional_ids() {
        let schema = file_schema();
        let mut file = HashMap::new();
        file.insert("file_name".to_string(), "raw.csv".to_string());
        file.insert("file_size".to_string(), "1234".to_string());
        let docs = build_file_docs(&schema, "S-BSST1", &[file.clone(), file]).unwrap();
        assert_eq!(docs.len(), 2);
        let id = schema.get_field(FIELD_ID).unwrap();
        assert_eq!(docs[0].get_first(id).unwrap().as_text(), Some("S-BSST1-1"));
        assert_eq!(docs[1].get_first(id).unwrap().as_text(), Some("S-BSST1-2"));
        let owner = schema.get_field(FILE_OWNER).unwrap();
        assert_eq!(docs[0].get_first(owner).unwrap().as_text(), Some("s-bsst1"));
    }
}
