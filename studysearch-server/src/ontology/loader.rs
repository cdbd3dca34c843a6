//! Writes ontology node records into the ontology index: stored node data,
//! the keyword expansion tokens, derived child terms and the depth-encoded
//! ancestor path.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};
use tantivy::schema::{Field, Schema};
use tantivy::Document;

use studysearch_types::{Error, Result};

use crate::index::pool::SharedPool;
use crate::schema::{
    EFO, EFO_ALT_TERM, EFO_CHILD_TERM, EFO_EXPANSION, EFO_ID, EFO_PARENT, EFO_PATH, EFO_SYNONYM,
    EFO_TERM,
};

/// One extracted ontology node, as produced by the external OWL pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OntologyNodeRecord {
    pub id: String,
    pub term: String,
    #[serde(default)]
    pub alternative_terms: Vec<String>,
    /// Direct parents, ordered; the first is the canonical parent.
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

pub struct OntologyLoader {
    pool: SharedPool,
}

impl OntologyLoader {
    pub fn new(pool: SharedPool) -> Self {
        Self { pool }
    }

    /// Rebuild the ontology index from `records`, then commit and refresh.
    pub async fn load_records(&self, records: &[OntologyNodeRecord]) -> Result<usize> {
        let schema = self.pool.schema(EFO)?;
        let fields = EfoFields::resolve(&schema)?;

        // Children by any listed parent feed the expansion lookup.
        let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut terms: HashMap<&str, &str> = HashMap::new();
        for record in records {
            terms.insert(record.id.as_str(), record.term.as_str());
        }
        for record in records {
            for parent in &record.parents {
                children
                    .entry(parent.as_str())
                    .or_insert_with(Vec::new)
                    .push(record.term.as_str());
            }
        }
        // Canonical-parent chains for the depth-encoded path.
        let canonical: HashMap<&str, &str> = records
            .iter()
            .filter_map(|r| r.parents.first().map(|p| (r.id.as_str(), p.as_str())))
            .collect();

        let writer = self.pool.writer(EFO)?;
        {
            let mut w = writer.lock().await;
            w.delete_all_documents()?;
            for record in records {
                let doc = build_doc(&fields, record, &children, &canonical, &terms);
                w.add_document(doc)?;
            }
            w.commit()?;
        }
        self.pool.refresh(EFO)?;
        info!("loaded {} ontology nodes", records.len());
        Ok(records.len())
    }

    /// Load a JSON array of node records from disk.
    pub async fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let content = fs::read_to_string(path.as_ref())?;
        let records: Vec<OntologyNodeRecord> = serde_json::from_str(&content)
            .map_err(|e| Error::Internal(format!("invalid ontology node file: {}", e)))?;
        self.load_records(&records).await
    }
}

struct EfoFields {
    id: Field,
    term: Field,
    alt: Field,
    parent: Field,
    synonym: Field,
    child: Field,
    expansion: Field,
    path: Field,
}

impl EfoFields {
    fn resolve(schema: &Schema) -> Result<Self> {
        let get = |name: &str| {
            schema
                .get_field(name)
                .ok_or_else(|| Error::UnknownField(name.into()))
        };
        Ok(Self {
            id: get(EFO_ID)?,
            term: get(EFO_TERM)?,
            alt: get(EFO_ALT_TERM)?,
            parent: get(EFO_PARENT)?,
            synonym: get(EFO_SYNONYM)?,
            child: get(EFO_CHILD_TERM)?,
            expansion: get(EFO_EXPANSION)?,
            path: get(EFO_PATH)?,
        })
    }
}

fn build_doc(
    fields: &EfoFields,
    record: &OntologyNodeRecord,
    children: &HashMap<&str, Vec<&str>>,
    canonical: &HashMap<&str, &str>,
    terms: &HashMap<&str, &str>,
) -> Document {
    let mut doc = Document::new();
    doc.add_text(fields.id, &record.id);
    doc.add_text(fields.term, &record.term);
    doc.add_text(fields.expansion, &record.term);
    for alt in &record.alternative_terms {
        doc.add_text(fields.alt, alt);
        doc.add_text(fields.expansion, alt);
    }
    for parent in &record.parents {
        doc.add_text(fields.parent, parent);
    }
    for synonym in &record.synonyms {
        doc.add_text(fields.synonym, synonym);
    }
    if let Some(kids) = children.get(record.id.as_str()) {
        for kid in kids {
            doc.add_text(fields.child, *kid);
        }
    }
    for (depth, ancestor) in ancestor_chain(record.id.as_str(), canonical, terms)
        .iter()
        .enumerate()
    {
        doc.add_text(fields.path, format!("{}/{}", depth, ancestor));
    }
    doc
}

/// `[root term, …, own term]` over the canonical-parent chain.
fn ancestor_chain<'a>(
    id: &'a str,
    canonical: &HashMap<&'a str, &'a str>,
    terms: &HashMap<&'a str, &'a str>,
) -> Vec<String> {
    let mut chain_ids = vec![id];
    let mut seen: std::collections::HashSet<&str> = std::collections::HashSet::new();
    let mut current = id;
    while let Some(parent) = canonical.get(current) {
        if !seen.insert(parent) {
            break;
        }
        chain_ids.push(parent);
        current = parent;
    }
    chain_ids.reverse();
    chain_ids
        .into_iter()
        .filter_map(|cid| terms.get(cid).map(|t| t.to_string()))
        .collect()
}

#[cfg(test)]
pub mod tests {
    use super::*;

    pub fn leukocyte_records() -> Vec<OntologyNodeRecord> {
        vec![
            OntologyNodeRecord {
                id: "efo:cell".into(),
                term: "cell".into(),
                alternative_terms: vec![],
                parents: vec![],
                synonyms: vec![],
            },
            OntologyNodeRecord {
                id: "efo:leukocyte".into(),
                term: "leukocyte".into(),
                alternative_terms: vec!["white blood cell".into()],
                parents: vec!["efo:cell".into()],
                synonyms: vec!["white blood cell".into()],
            },
            OntologyNodeRecord {
                id: "efo:osteoclast".into(),
                term: "osteoclast".into(),
                alternative_terms: vec![],
                parents: vec!["efo:leukocyte".into()],
                synonyms: vec![],
            },
        ]
    }

    #[test]
    fn chains_run_root_first() {
        let records = leukocyte_records();
        let canonical: HashMap<&str, &str> = records
            .iter()
            .filter_map(|r| r.parents.first().map(|p| (r.id.as_str(), p.as_str())))
            .collect();
        let terms: HashMap<&str, &str> = records
            .iter()
            .map(|r| (r.id.as_str(), r.term.as_str()))
            .collect();
        assert_eq!(
            ancestor_chain("efo:osteoclast", &canonical, &terms),
            vec!["cell", "leukocyte", "osteoclast"]
        );
    }
}
