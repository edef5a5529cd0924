//! Run-level provenance ledger.
//!
//! Records are kept in insertion order but every digest is taken over the
//! `(fixture_id, seq)` ordering, so evaluation order never leaks into a
//! hash. Two digests are exposed: a content hash over the ordered list and
//! a chain hash folding `{prev, rec}` pairwise.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::canonical::{sha256_stable, to_canonical_value};
use crate::error::EglError;

pub const LEDGER_RECORD_SCHEMA_ID: &str = "EGL.SPE_LEDGER_RECORD";
pub const LEDGER_RECORD_VERSION: &str = "0.1.0";

/// Sequence numbers within one fixture.
pub mod seq {
    pub const DECISION: u64 = 1;
    pub const PLAN_FREEZE: u64 = 2;
    pub const EXECUTION: u64 = 3;
    /// Commit half of a draft commit, after its draft write.
    pub const DRAFT_COMMIT: u64 = 4;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    #[serde(default)]
    pub schema_id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub fixture_id: String,
    #[serde(default)]
    pub seq: u64,
    #[serde(default)]
    pub kind: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl LedgerRecord {
    pub fn new(fixture_id: &str, seq: u64, kind: &str) -> Self {
        Self {
            schema_id: LEDGER_RECORD_SCHEMA_ID.to_string(),
            version: LEDGER_RECORD_VERSION.to_string(),
            fixture_id: fixture_id.to_string(),
            seq,
            kind: kind.to_string(),
            fields: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Merge every key of an object; non-objects are ignored.
    pub fn merge(mut self, extra: &Value) -> Self {
        if let Some(map) = extra.as_object() {
            for (k, v) in map {
                self.fields.insert(k.clone(), v.clone());
            }
        }
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn to_value(&self) -> Result<Value, EglError> {
        to_canonical_value(self)
    }
}

fn ordered(records: &[LedgerRecord]) -> Vec<&LedgerRecord> {
    let mut out: Vec<&LedgerRecord> = records.iter().collect();
    out.sort_by(|a, b| a.fixture_id.cmp(&b.fixture_id).then(a.seq.cmp(&b.seq)));
    out
}

/// Content digest of the ordered records. Bare hex.
pub fn canonical_hash(records: &[LedgerRecord]) -> Result<String, EglError> {
    let values = ordered(records)
        .into_iter()
        .map(LedgerRecord::to_value)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(sha256_stable(&Value::Array(values)))
}

/// History digest: `h = H({prev: h, rec: H(record)})` over the ordered
/// records, starting from the empty string. Bare hex.
pub fn chain_hash(records: &[LedgerRecord]) -> Result<String, EglError> {
    let mut h = String::new();
    for record in ordered(records) {
        let rec = sha256_stable(&record.to_value()?);
        h = sha256_stable(&serde_json::json!({"prev": h, "rec": rec}));
    }
    Ok(h)
}

/// Append-only record set for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProvenanceLedger {
    records: Vec<LedgerRecord>,
}

impl ProvenanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<LedgerRecord>) -> Self {
        Self { records }
    }

    pub fn append(&mut self, record: LedgerRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in `(fixture_id, seq)` order.
    pub fn ordered(&self) -> Vec<&LedgerRecord> {
        ordered(&self.records)
    }

    pub fn find(&self, fixture_id: &str, kind: &str) -> Option<&LedgerRecord> {
        self.records
            .iter()
            .find(|r| r.fixture_id == fixture_id && r.kind == kind)
    }

    pub fn canonical_hash(&self) -> Result<String, EglError> {
        canonical_hash(&self.records)
    }

    pub fn chain_hash(&self) -> Result<String, EglError> {
        chain_hash(&self.records)
    }
}
