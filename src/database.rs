//! Embedded document store built on redb
//!
//! Each collection is a redb table mapping a hex ObjectId to a JSON document.
//! Fields declared unique for a collection are mirrored in a secondary index
//! table, which both enforces uniqueness and serves equality lookups without
//! a scan. Every mutating call (`insert_one`, `update_one`, `delete_one`)
//! matches and writes inside a single write transaction. redb only admits
//! one write transaction at a time, so a filter match and the mutation that
//! follows it are atomic with respect to other writers.

use std::cmp::Ordering;
use std::sync::OnceLock;

use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, Table, TableDefinition};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// A stored document: a JSON object whose `_id` field holds the hex ObjectId
pub type Document = Map<String, Value>;

/// Registered users
///
/// Key: ObjectId hex (e.g. "65f1c0ffee0000000000abcd")
/// Value: JSON-serialized user document
pub const TABLE_USERS: TableDefinition<&str, &str> = TableDefinition::new("users");

/// Shared routes with their embedded checkpoints and like counters
///
/// Key: ObjectId hex
/// Value: JSON-serialized route document
pub const TABLE_ROUTES: TableDefinition<&str, &str> = TableDefinition::new("Routes");

/// Secondary index for unique fields
///
/// Key: "{collection}:{field}:{json value}"
/// Value: ObjectId hex of the owning document
///
/// Example:
/// - Key: 'users:email:"ann@example.com"'
/// - Value: "65f1c0ffee0000000000abcd"
pub const TABLE_UNIQUE_INDEX: TableDefinition<&str, &str> = TableDefinition::new("unique_index_v1");

const ID_FIELD: &str = "_id";

/// Errors raised by the document store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document store used before a connection was established")]
    NotInitialized,

    #[error("document store is already connected")]
    AlreadyConnected,

    #[error("duplicate value for unique field `{0}`")]
    Duplicate(String),

    #[error("malformed document: {0}")]
    Malformed(String),

    #[error(transparent)]
    Database(#[from] redb::DatabaseError),

    #[error(transparent)]
    Transaction(#[from] redb::TransactionError),

    #[error(transparent)]
    Table(#[from] redb::TableError),

    #[error(transparent)]
    Storage(#[from] redb::StorageError),

    #[error(transparent)]
    Commit(#[from] redb::CommitError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// The collections known to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Users,
    Routes,
}

impl Collection {
    fn table(self) -> TableDefinition<'static, &'static str, &'static str> {
        match self {
            Self::Users => TABLE_USERS,
            Self::Routes => TABLE_ROUTES,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Routes => "Routes",
        }
    }

    /// Fields whose values may appear in at most one document
    ///
    /// Uniqueness is checked in this order; the first clash is reported.
    pub fn unique_fields(self) -> &'static [&'static str] {
        match self {
            Self::Users => &["email", "username"],
            Self::Routes => &[],
        }
    }

    fn index_key(self, field: &str, value: &Value) -> String {
        format!("{}:{}:{}", self.name(), field, value)
    }
}

#[derive(Debug, Clone)]
enum Condition {
    Eq(String, Value),
    Contains(String, Value),
    NotContains(String, Value),
    LessThan(String, f64),
}

impl Condition {
    fn matches(&self, doc: &Document) -> bool {
        match self {
            Self::Eq(field, expected) => doc.get(field) == Some(expected),
            Self::Contains(field, member) => doc
                .get(field)
                .and_then(Value::as_array)
                .is_some_and(|items| items.contains(member)),
            // A missing field counts as "not containing" the member
            Self::NotContains(field, member) => !doc
                .get(field)
                .and_then(Value::as_array)
                .is_some_and(|items| items.contains(member)),
            Self::LessThan(field, bound) => doc
                .get(field)
                .and_then(Value::as_f64)
                .is_some_and(|value| value < *bound),
        }
    }
}

/// Match conditions for a query or an update
///
/// All conditions must hold. A filter built with [`Filter::by_id`] is
/// resolved with a direct key lookup instead of a table scan.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    id: Option<ObjectId>,
    conditions: Vec<Condition>,
}

impl Filter {
    /// Matches every document
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches the document with the given identifier
    pub fn by_id(id: ObjectId) -> Self {
        Self {
            id: Some(id),
            conditions: Vec::new(),
        }
    }

    /// Field equals `value` exactly
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Eq(field.into(), value.into()));
        self
    }

    /// Array field contains `member`
    pub fn contains(mut self, field: impl Into<String>, member: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::Contains(field.into(), member.into()));
        self
    }

    /// Array field is missing or does not contain `member`
    pub fn not_contains(mut self, field: impl Into<String>, member: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::NotContains(field.into(), member.into()));
        self
    }

    /// Numeric field is strictly below `bound`
    pub fn less_than(mut self, field: impl Into<String>, bound: f64) -> Self {
        self.conditions.push(Condition::LessThan(field.into(), bound));
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        let id_matches = match self.id {
            Some(id) => doc.get(ID_FIELD).and_then(Value::as_str) == Some(id.to_hex().as_str()),
            None => true,
        };
        id_matches && self.conditions.iter().all(|condition| condition.matches(doc))
    }

    /// First equality condition on one of `fields`
    fn indexed_eq(&self, fields: &[&str]) -> Option<(&str, &Value)> {
        self.conditions.iter().find_map(|condition| match condition {
            Condition::Eq(field, value) if fields.contains(&field.as_str()) => {
                Some((field.as_str(), value))
            }
            _ => None,
        })
    }
}

#[derive(Debug, Clone)]
enum Operation {
    Set(String, Value),
    Inc(String, i64),
    AddToSet(String, Value),
    Pull(String, Value),
}

/// Field-level mutations applied to a single document
#[derive(Debug, Clone, Default)]
pub struct Update {
    operations: Vec<Operation>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace (or introduce) a field
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.operations
            .push(Operation::Set(field.into(), value.into()));
        self
    }

    /// Add `by` to a numeric field, treating a missing field as zero
    pub fn inc(mut self, field: impl Into<String>, by: i64) -> Self {
        self.operations.push(Operation::Inc(field.into(), by));
        self
    }

    /// Append `member` to an array field unless already present
    pub fn add_to_set(mut self, field: impl Into<String>, member: impl Into<Value>) -> Self {
        self.operations
            .push(Operation::AddToSet(field.into(), member.into()));
        self
    }

    /// Remove every occurrence of `member` from an array field
    pub fn pull(mut self, field: impl Into<String>, member: impl Into<Value>) -> Self {
        self.operations
            .push(Operation::Pull(field.into(), member.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    fn apply(&self, doc: &mut Document) -> Result<(), StoreError> {
        for operation in &self.operations {
            match operation {
                Operation::Set(field, _)
                | Operation::Inc(field, _)
                | Operation::AddToSet(field, _)
                | Operation::Pull(field, _)
                    if field == ID_FIELD =>
                {
                    return Err(StoreError::Malformed(format!("`{ID_FIELD}` is immutable")));
                }
                Operation::Set(field, value) => {
                    doc.insert(field.clone(), value.clone());
                }
                Operation::Inc(field, by) => {
                    let next = match doc.get(field) {
                        None | Some(Value::Null) => Value::from(*by),
                        Some(current) => match (current.as_i64(), current.as_f64()) {
                            (Some(int), _) => int.checked_add(*by).map(Value::from).ok_or_else(
                                || StoreError::Malformed(format!("incrementing `{field}` overflows")),
                            )?,
                            (None, Some(float)) => Value::from(float + *by as f64),
                            _ => {
                                return Err(StoreError::Malformed(format!(
                                    "cannot increment non-numeric field `{field}`"
                                )))
                            }
                        },
                    };
                    doc.insert(field.clone(), next);
                }
                Operation::AddToSet(field, member) => {
                    let items = doc
                        .entry(field.clone())
                        .or_insert_with(|| Value::Array(Vec::new()));
                    let Value::Array(items) = items else {
                        return Err(StoreError::Malformed(format!(
                            "cannot add to non-array field `{field}`"
                        )));
                    };
                    if !items.contains(member) {
                        items.push(member.clone());
                    }
                }
                Operation::Pull(field, member) => match doc.get_mut(field) {
                    None => {}
                    Some(Value::Array(items)) => items.retain(|item| item != member),
                    Some(_) => {
                        return Err(StoreError::Malformed(format!(
                            "cannot pull from non-array field `{field}`"
                        )))
                    }
                },
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Single-field ordering for [`Store::find`]
#[derive(Debug, Clone)]
pub struct Sort {
    field: String,
    direction: Direction,
}

impl Sort {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Ascending,
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Descending,
        }
    }

    fn compare(&self, a: &Document, b: &Document) -> Ordering {
        let ordering = compare_values(a.get(&self.field), b.get(&self.field));
        match self.direction {
            Direction::Ascending => ordering,
            Direction::Descending => ordering.reverse(),
        }
    }
}

/// Missing and null sort before numbers, numbers before strings.
/// Strings that both parse as RFC 3339 timestamps compare chronologically.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Number(_)) => 1,
            Some(Value::String(_)) => 2,
            Some(_) => 3,
        }
    }

    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => {
            match (
                DateTime::parse_from_rfc3339(x),
                DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(x), Ok(y)) => x.with_timezone(&Utc).cmp(&y.with_timezone(&Utc)),
                _ => x.cmp(y),
            }
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Outcome of [`Store::update_one`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateResult {
    /// Number of documents the filter matched (0 or 1)
    pub matched: u64,
    /// Number of documents whose content actually changed (0 or 1)
    pub modified: u64,
}

/// Handle to the document store
///
/// Constructed once at startup and shared through an `Arc`. The underlying
/// database is attached exactly once by [`Store::connect`]; any operation
/// attempted before that fails with [`StoreError::NotInitialized`].
#[derive(Default)]
pub struct Store {
    db: OnceLock<Database>,
}

impl Store {
    /// Creates an unconnected handle
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a handle and connects it to the database file at `db_path`
    ///
    /// ```no_run
    /// # use routeshare::database::Store;
    /// let store = Store::open("routes.db").expect("Failed to open store");
    /// ```
    pub fn open(db_path: &str) -> Result<Self, StoreError> {
        let store = Self::new();
        store.connect(db_path)?;
        Ok(store)
    }

    /// Opens (or creates) the database file and its collections
    pub fn connect(&self, db_path: &str) -> Result<(), StoreError> {
        if self.is_connected() {
            return Err(StoreError::AlreadyConnected);
        }
        let db = init_db(db_path)?;
        self.db.set(db).map_err(|_| StoreError::AlreadyConnected)
    }

    pub fn is_connected(&self) -> bool {
        self.db.get().is_some()
    }

    fn db(&self) -> Result<&Database, StoreError> {
        self.db.get().ok_or(StoreError::NotInitialized)
    }

    /// Inserts a document under a freshly generated identifier
    ///
    /// Fails with [`StoreError::Duplicate`] when one of the collection's
    /// unique fields already holds the same value elsewhere. The check and the
    /// insert share one write transaction.
    pub fn insert_one(&self, collection: Collection, mut doc: Document) -> Result<ObjectId, StoreError> {
        let id = ObjectId::new();
        let key = id.to_hex();
        doc.insert(ID_FIELD.to_string(), Value::String(key.clone()));

        let write_txn = self.db()?.begin_write()?;
        {
            let mut table = write_txn.open_table(collection.table())?;
            let mut index = write_txn.open_table(TABLE_UNIQUE_INDEX)?;

            claim_unique_values(&mut index, collection, None, &doc)?;

            let json = serde_json::to_string(&doc)?;
            table.insert(key.as_str(), json.as_str())?;
        }
        write_txn.commit()?;

        Ok(id)
    }

    /// Returns the first document matching `filter`
    pub fn find_one(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Option<Document>, StoreError> {
        let read_txn = self.db()?.begin_read()?;
        let table = read_txn.open_table(collection.table())?;
        let index = read_txn.open_table(TABLE_UNIQUE_INDEX)?;
        Ok(candidates(&table, &index, collection, filter)?
            .into_iter()
            .next())
    }

    /// Returns every document matching `filter`
    ///
    /// Without a sort the store's natural order (ascending identifier, i.e.
    /// insertion order) is kept. Sorting is stable, so ties keep that order.
    pub fn find(
        &self,
        collection: Collection,
        filter: &Filter,
        sort: Option<&Sort>,
    ) -> Result<Vec<Document>, StoreError> {
        let read_txn = self.db()?.begin_read()?;
        let table = read_txn.open_table(collection.table())?;
        let index = read_txn.open_table(TABLE_UNIQUE_INDEX)?;
        let mut docs = candidates(&table, &index, collection, filter)?;
        if let Some(sort) = sort {
            docs.sort_by(|a, b| sort.compare(a, b));
        }
        Ok(docs)
    }

    /// Applies `update` to the first document matching `filter`
    ///
    /// Matching and mutation happen in the same write transaction. Changing a
    /// unique field moves its index entry, or fails with
    /// [`StoreError::Duplicate`] if the new value is taken.
    pub fn update_one(
        &self,
        collection: Collection,
        filter: &Filter,
        update: &Update,
    ) -> Result<UpdateResult, StoreError> {
        let write_txn = self.db()?.begin_write()?;
        let result = {
            let mut table = write_txn.open_table(collection.table())?;
            let mut index = write_txn.open_table(TABLE_UNIQUE_INDEX)?;
            match candidates(&table, &index, collection, filter)?
                .into_iter()
                .next()
            {
                None => UpdateResult::default(),
                Some(mut doc) => {
                    let before = doc.clone();
                    update.apply(&mut doc)?;
                    let modified = doc != before;
                    if modified {
                        claim_unique_values(&mut index, collection, Some(&before), &doc)?;
                        let key = document_key(&doc)?;
                        let json = serde_json::to_string(&doc)?;
                        table.insert(key.as_str(), json.as_str())?;
                    }
                    UpdateResult {
                        matched: 1,
                        modified: u64::from(modified),
                    }
                }
            }
        };
        write_txn.commit()?;

        Ok(result)
    }

    /// Removes the first document matching `filter`, returning how many
    /// documents were deleted (0 or 1)
    pub fn delete_one(&self, collection: Collection, filter: &Filter) -> Result<u64, StoreError> {
        let write_txn = self.db()?.begin_write()?;
        let deleted = {
            let mut table = write_txn.open_table(collection.table())?;
            let mut index = write_txn.open_table(TABLE_UNIQUE_INDEX)?;
            match candidates(&table, &index, collection, filter)?
                .into_iter()
                .next()
            {
                None => 0,
                Some(doc) => {
                    let key = document_key(&doc)?;
                    table.remove(key.as_str())?;
                    for field in collection.unique_fields() {
                        if let Some(value) = doc.get(*field) {
                            index.remove(collection.index_key(field, value).as_str())?;
                        }
                    }
                    1
                }
            }
        };
        write_txn.commit()?;

        Ok(deleted)
    }
}

/// Initializes the embedded database and creates the collection tables
///
/// # Arguments
///
/// * `db_path` - File path where the database should be stored (e.g., "routes.db")
pub fn init_db(db_path: &str) -> Result<Database, StoreError> {
    let db = Database::create(db_path)?;

    let write_txn = db.begin_write()?;
    {
        write_txn.open_table(TABLE_USERS)?;
        write_txn.open_table(TABLE_ROUTES)?;
        write_txn.open_table(TABLE_UNIQUE_INDEX)?;
    }
    write_txn.commit()?;

    Ok(db)
}

/// Serializes a typed record into a storable document
pub fn to_document<T: Serialize>(record: &T) -> Result<Document, StoreError> {
    match serde_json::to_value(record)? {
        Value::Object(doc) => Ok(doc),
        other => Err(StoreError::Malformed(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

fn document_key(doc: &Document) -> Result<String, StoreError> {
    doc.get(ID_FIELD)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| StoreError::Malformed(format!("document without `{ID_FIELD}`")))
}

fn scan<T>(table: &T) -> Result<Vec<Document>, StoreError>
where
    T: ReadableTable<&'static str, &'static str>,
{
    let mut docs = Vec::new();
    for entry in table.iter()? {
        let (_, value) = entry?;
        docs.push(serde_json::from_str::<Document>(value.value())?);
    }
    Ok(docs)
}

/// Registers `doc`'s unique values in the index, releasing the values held
/// by `previous` (the same document before an update)
fn claim_unique_values(
    index: &mut Table<'_, &'static str, &'static str>,
    collection: Collection,
    previous: Option<&Document>,
    doc: &Document,
) -> Result<(), StoreError> {
    let key = document_key(doc)?;
    for field in collection.unique_fields() {
        let old = previous.and_then(|previous| previous.get(*field));
        let new = doc.get(*field);
        if old == new {
            continue;
        }
        if let Some(value) = new {
            let index_key = collection.index_key(field, value);
            let owner = index.get(index_key.as_str())?.map(|owner| owner.value().to_string());
            if owner.is_some_and(|owner| owner != key) {
                return Err(StoreError::Duplicate((*field).to_string()));
            }
        }
    }
    for field in collection.unique_fields() {
        let old = previous.and_then(|previous| previous.get(*field));
        let new = doc.get(*field);
        if old == new {
            continue;
        }
        if let Some(value) = old {
            index.remove(collection.index_key(field, value).as_str())?;
        }
        if let Some(value) = new {
            index.insert(collection.index_key(field, value).as_str(), key.as_str())?;
        }
    }
    Ok(())
}

fn candidates<T, I>(
    table: &T,
    index: &I,
    collection: Collection,
    filter: &Filter,
) -> Result<Vec<Document>, StoreError>
where
    T: ReadableTable<&'static str, &'static str>,
    I: ReadableTable<&'static str, &'static str>,
{
    let id = match (filter.id, filter.indexed_eq(collection.unique_fields())) {
        (Some(id), _) => Some(id.to_hex()),
        (None, Some((field, value))) => {
            match index.get(collection.index_key(field, value).as_str())? {
                Some(owner) => Some(owner.value().to_string()),
                // Nothing holds this value, so nothing can match
                None => return Ok(Vec::new()),
            }
        }
        (None, None) => None,
    };

    let docs = match id {
        Some(id) => match table.get(id.as_str())? {
            Some(value) => vec![serde_json::from_str::<Document>(value.value())?],
            None => Vec::new(),
        },
        None => scan(table)?,
    };
    Ok(docs.into_iter().filter(|doc| filter.matches(doc)).collect())
}
