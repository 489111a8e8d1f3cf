//! Lexical candidate index over tantivy
//!
//! In-process BM25 index feeding the lexical leg of retrieval. Scores are
//! normalised to [0, 1] within each result set before fusion with the dense
//! leg.

use std::path::Path;

use parking_lot::Mutex;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Schema, Value, STORED, STRING, TEXT};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};

use voxbridge_core::RetrievedChunk;

use crate::RagError;

const WRITER_HEAP_BYTES: usize = 30_000_000;

pub struct SparseIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    id_field: Field,
    content_field: Field,
}

impl SparseIndex {
    /// Open or create an index in the given directory.
    pub fn open_in_dir(path: impl AsRef<Path>) -> Result<Self, RagError> {
        let schema = Self::schema();
        let dir = tantivy::directory::MmapDirectory::open(path.as_ref())
            .map_err(|e| RagError::Sparse(e.to_string()))?;
        let index = Index::open_or_create(dir, schema).map_err(|e| RagError::Sparse(e.to_string()))?;
        Self::from_index(index)
    }

    /// Ephemeral in-memory index (tests, cache-only deployments).
    pub fn in_memory() -> Result<Self, RagError> {
        let index = Index::create_in_ram(Self::schema());
        Self::from_index(index)
    }

    fn schema() -> Schema {
        let mut builder = Schema::builder();
        builder.add_text_field("id", STRING | STORED);
        builder.add_text_field("content", TEXT | STORED);
        builder.build()
    }

    fn from_index(index: Index) -> Result<Self, RagError> {
        let schema = index.schema();
        let id_field = schema
            .get_field("id")
            .map_err(|e| RagError::Sparse(e.to_string()))?;
        let content_field = schema
            .get_field("content")
            .map_err(|e| RagError::Sparse(e.to_string()))?;

        let writer = index
            .writer(WRITER_HEAP_BYTES)
            .map_err(|e| RagError::Sparse(e.to_string()))?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e: tantivy::TantivyError| RagError::Sparse(e.to_string()))?;

        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            id_field,
            content_field,
        })
    }

    /// Add a document. Visible to searches after `commit`.
    pub fn add_document(&self, source_id: &str, content: &str) -> Result<(), RagError> {
        let mut doc = TantivyDocument::default();
        doc.add_text(self.id_field, source_id);
        doc.add_text(self.content_field, content);
        self.writer
            .lock()
            .add_document(doc)
            .map_err(|e| RagError::Sparse(e.to_string()))?;
        Ok(())
    }

    pub fn commit(&self) -> Result<(), RagError> {
        self.writer
            .lock()
            .commit()
            .map_err(|e| RagError::Sparse(e.to_string()))?;
        self.reader
            .reload()
            .map_err(|e| RagError::Sparse(e.to_string()))?;
        Ok(())
    }

    /// BM25 search, scores normalised to [0, 1] within the result set.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<RetrievedChunk>, RagError> {
        if limit == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.content_field]);
        // Free text from STT: lenient parsing, ignore syntax errors
        let (parsed, _errors) = parser.parse_query_lenient(query);

        let top_docs = searcher
            .search(&parsed, &TopDocs::with_limit(limit))
            .map_err(|e| RagError::Sparse(e.to_string()))?;

        let max_score = top_docs
            .first()
            .map(|(score, _)| *score)
            .filter(|s| *s > 0.0)
            .unwrap_or(1.0);

        let mut chunks = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| RagError::Sparse(e.to_string()))?;

            let id = doc
                .get_first(self.id_field)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let text = doc
                .get_first(self.content_field)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();

            chunks.push(RetrievedChunk {
                text,
                source_id: id,
                score: (score / max_score).clamp(0.0, 1.0),
                rank: 0,
            });
        }
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> SparseIndex {
        let index = SparseIndex::in_memory().unwrap();
        index
            .add_document("doc-paris", "Paris is the capital of France")
            .unwrap();
        index
            .add_document("doc-berlin", "Berlin is the capital of Germany")
            .unwrap();
        index
            .add_document("doc-recipe", "A recipe for sourdough bread")
            .unwrap();
        index.commit().unwrap();
        index
    }

    #[test]
    fn test_relevant_document_ranks_first() {
        let index = seeded();
        let results = index.search("capital of France", 10).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].source_id, "doc-paris");
        assert!(results[0].score <= 1.0 && results[0].score > 0.0);
    }

    #[test]
    fn test_empty_query_returns_nothing() {
        let index = seeded();
        assert!(index.search("   ", 10).unwrap().is_empty());
    }

    #[test]
    fn test_uncommitted_documents_invisible() {
        let index = SparseIndex::in_memory().unwrap();
        index.add_document("doc", "some text").unwrap();
        // No commit yet
        assert!(index.search("text", 10).unwrap().is_empty());
    }

    #[test]
    fn test_query_syntax_is_tolerated() {
        let index = seeded();
        // Unbalanced quotes and operators must not error
        let result = index.search("capital AND (of \"France", 10);
        assert!(result.is_ok());
    }

    #[test]
    fn test_on_disk_index_reopens() {
        let dir = tempfile::tempdir().unwrap();

        {
            let index = SparseIndex::open_in_dir(dir.path()).unwrap();
            index
                .add_document("doc", "persistent lexical content")
                .unwrap();
            index.commit().unwrap();
        }

        let reopened = SparseIndex::open_in_dir(dir.path()).unwrap();
        let results = reopened.search("lexical", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source_id, "doc");
    }
}
