use crate::Metadata;
use serde::{Deserialize, Serialize};

/// One stored entry: an opaque string id, the vector, and optional metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub vector: Vec<f64>,
    pub metadata: Option<Metadata>,
}

impl Record {
    pub fn new(id: String, vector: Vec<f64>, metadata: Option<Metadata>) -> Self {
        Record {
            id,
            vector,
            metadata,
        }
    }
}

/// One entry of an index search result, ordered by ascending distance.
#[derive(Clone, Debug, PartialEq)]
pub struct Neighbor {
    pub id: String,
    pub distance: f64,
}

/// A facade search result: a neighbor with its metadata materialized from
/// storage.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchResult {
    pub id: String,
    pub distance: f64,
    pub metadata: Option<Metadata>,
}

/// One page of ids from a paginated listing. `next_cursor` is present iff
/// more ids follow; feed it back to get the next page.
#[derive(Clone, Debug, PartialEq)]
pub struct Page {
    pub ids: Vec<String>,
    pub next_cursor: Option<String>,
}

impl Page {
    pub fn has_more(&self) -> bool {
        self.next_cursor.is_some()
    }
}
