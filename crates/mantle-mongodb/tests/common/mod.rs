//! In-memory execution collaborator for integration tests
//!
//! Stores documents per collection and answers the commands the collection
//! layer sends: plain queries, `count`, `group` and the `$eval` group script.
//! Reduce functions cannot be run as JavaScript here, so tests register a
//! Rust closure for each reduce source they use.

#![allow(dead_code)]

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use mantle_mongodb::{Database, QueryCommand, Reply, Result, WriteCommand};
use parking_lot::Mutex;
use std::collections::HashMap;

pub type ReduceFn = fn(&Document, &mut Document);

/// `prev.count++`
pub const COUNT_REDUCE: &str = "function(obj, prev) { prev.count++; }";

/// `prev.total += obj.qty`
pub const SUM_QTY_REDUCE: &str = "function(obj, prev) { prev.total += obj.qty; }";

#[derive(Default)]
struct State {
    collections: HashMap<String, Vec<Document>>,
    writes: Vec<WriteCommand>,
    queries: Vec<QueryCommand>,
    last_error: Document,
    forced_last_error: Option<Document>,
    reducers: Vec<(String, ReduceFn)>,
    collection_info: HashMap<String, Document>,
    rename_error: Option<String>,
    rename_calls: usize,
    group_disabled: bool,
    forced_command_reply: Option<Document>,
}

pub struct MockDatabase {
    name: String,
    state: Mutex<State>,
}

impl MockDatabase {
    pub fn new(name: &str) -> Self {
        let db = Self {
            name: name.to_string(),
            state: Mutex::new(State::default()),
        };
        db.register_reducer(COUNT_REDUCE, |_, prev| {
            let count = number(prev.get("count")) + 1;
            prev.insert("count", count);
        });
        db.register_reducer(SUM_QTY_REDUCE, |obj, prev| {
            let total = number(prev.get("total")) + number(obj.get("qty"));
            prev.insert("total", total);
        });
        db
    }

    pub fn register_reducer(&self, source: &str, reduce: ReduceFn) {
        self.state.lock().reducers.push((source.to_string(), reduce));
    }

    pub fn seed(&self, collection: &str, documents: Vec<Document>) {
        self.state
            .lock()
            .collections
            .entry(collection.to_string())
            .or_default()
            .extend(documents);
    }

    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.state
            .lock()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn writes(&self) -> Vec<WriteCommand> {
        self.state.lock().writes.clone()
    }

    pub fn queries(&self) -> Vec<QueryCommand> {
        self.state.lock().queries.clone()
    }

    pub fn rename_calls(&self) -> usize {
        self.state.lock().rename_calls
    }

    /// Makes `last_error` answer with `status` instead of the simulated one
    pub fn force_last_error(&self, status: Document) {
        self.state.lock().forced_last_error = Some(status);
    }

    pub fn fail_rename(&self, errmsg: &str) {
        self.state.lock().rename_error = Some(errmsg.to_string());
    }

    pub fn set_collection_info(&self, collection: &str, info: Document) {
        self.state
            .lock()
            .collection_info
            .insert(collection.to_string(), info);
    }

    /// Makes every `$cmd` query answer with `reply`
    pub fn force_command_reply(&self, reply: Document) {
        self.state.lock().forced_command_reply = Some(reply);
    }

    /// Answers the `group` command like a server that does not know it
    pub fn disable_group_command(&self) {
        self.state.lock().group_disabled = true;
    }
}

#[async_trait]
impl Database for MockDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, command: WriteCommand) -> Result<()> {
        let mut state = self.state.lock();
        state.writes.push(command.clone());

        let status = match command {
            WriteCommand::Insert(insert) => {
                let n = insert.documents.len() as i64;
                state
                    .collections
                    .entry(collection_of(&insert.namespace))
                    .or_default()
                    .extend(insert.documents);
                doc! { "ok": 1, "n": n }
            }
            WriteCommand::Update(update) => {
                let is_modifier = update.is_modifier();
                let rows = state
                    .collections
                    .entry(collection_of(&update.namespace))
                    .or_default();
                let mut matched = 0i64;
                for row in rows.iter_mut() {
                    if !matches(row, &update.selector) {
                        continue;
                    }
                    matched += 1;
                    if is_modifier {
                        apply_modifiers(row, &update.document);
                    } else {
                        let id = row.get("_id").cloned();
                        *row = update.document.clone();
                        if let Some(id) = id {
                            row.insert("_id", id);
                        }
                    }
                    if !update.flags.multi {
                        break;
                    }
                }

                if matched > 0 {
                    doc! { "ok": 1, "n": matched, "updatedExisting": true }
                } else if update.flags.upsert {
                    let mut inserted = if is_modifier {
                        update.selector.clone()
                    } else {
                        update.document.clone()
                    };
                    if let Some(id) = update.selector.get("_id") {
                        inserted.insert("_id", id.clone());
                    }
                    let id = inserted.get("_id").cloned().unwrap_or(Bson::Null);
                    rows.push(inserted);
                    doc! { "ok": 1, "n": 1, "updatedExisting": false, "upserted": id }
                } else {
                    doc! { "ok": 1, "n": 0, "updatedExisting": false }
                }
            }
            WriteCommand::Delete(delete) => {
                let rows = state
                    .collections
                    .entry(collection_of(&delete.namespace))
                    .or_default();
                let before = rows.len();
                rows.retain(|row| !matches(row, &delete.selector));
                doc! { "ok": 1, "n": (before - rows.len()) as i64 }
            }
        };
        state.last_error = status;
        Ok(())
    }

    async fn query(&self, query: QueryCommand) -> Result<Reply> {
        let mut state = self.state.lock();
        state.queries.push(query.clone());

        if query.is_command() {
            if let Some(reply) = state.forced_command_reply.clone() {
                return Ok(Reply::new(vec![reply]));
            }
            return Ok(Reply::new(vec![run_command(&state, &query.selector)]));
        }

        let rows = state
            .collections
            .get(&collection_of(&query.namespace))
            .cloned()
            .unwrap_or_default();
        let filter = match query.selector.get_document("$query") {
            Ok(filter) => filter.clone(),
            Err(_) => query.selector.clone(),
        };

        let limit = match query.limit.unsigned_abs() as usize {
            0 => usize::MAX,
            n => n,
        };
        let documents = rows
            .iter()
            .filter(|row| matches(row, &filter))
            .skip(query.skip as usize)
            .take(limit)
            .map(|row| project(row, query.fields.as_ref()))
            .collect();
        Ok(Reply::new(documents))
    }

    async fn last_error(&self) -> Result<Document> {
        let state = self.state.lock();
        Ok(state
            .forced_last_error
            .clone()
            .unwrap_or_else(|| state.last_error.clone()))
    }

    async fn rename_collection(&self, from: &str, to: &str) -> Result<Document> {
        let mut state = self.state.lock();
        state.rename_calls += 1;
        if let Some(errmsg) = state.rename_error.clone() {
            return Ok(doc! { "ok": 0, "errmsg": errmsg });
        }
        let rows = state.collections.remove(from).unwrap_or_default();
        state.collections.insert(to.to_string(), rows);
        Ok(doc! { "ok": 1 })
    }

    async fn drop_collection(&self, name: &str) -> Result<bool> {
        Ok(self.state.lock().collections.remove(name).is_some())
    }

    async fn collection_info(&self, name: &str) -> Result<Option<Document>> {
        Ok(self.state.lock().collection_info.get(name).cloned())
    }
}

fn collection_of(namespace: &str) -> String {
    namespace
        .split_once('.')
        .map(|(_, collection)| collection.to_string())
        .unwrap_or_default()
}

fn run_command(state: &State, selector: &Document) -> Document {
    if let Ok(collection) = selector.get_str("count") {
        let filter = selector.get_document("query").cloned().unwrap_or_default();
        let n = state
            .collections
            .get(collection)
            .map(|rows| rows.iter().filter(|row| matches(row, &filter)).count())
            .unwrap_or(0);
        // servers report counts as doubles
        return doc! { "n": n as f64, "ok": 1.0 };
    }

    if let Ok(group) = selector.get_document("group") {
        if state.group_disabled {
            return doc! { "ok": 0, "errmsg": "no such cmd: group" };
        }
        let source = match group.get("$reduce") {
            Some(Bson::JavaScriptCode(code)) => code.clone(),
            Some(Bson::JavaScriptCodeWithScope(code)) => code.code.clone(),
            _ => return doc! { "ok": 0, "errmsg": "missing $reduce" },
        };
        let Some(reduce) = find_reducer(state, |registered| registered == source) else {
            return doc! { "ok": 0, "errmsg": "unknown reduce function" };
        };
        let collection = group.get_str("ns").unwrap_or_default();
        let keys: Vec<String> = group
            .get_document("key")
            .map(|key| key.keys().cloned().collect())
            .unwrap_or_default();
        let cond = group.get_document("cond").cloned().unwrap_or_default();
        let initial = group.get_document("initial").cloned().unwrap_or_default();

        let buckets = bucket(state, collection, &keys, &cond, &initial, reduce);
        return doc! { "retval": buckets, "count": 0, "keys": 0, "ok": 1 };
    }

    if let Some(Bson::JavaScriptCodeWithScope(script)) = selector.get("$eval") {
        let Some(reduce) = find_reducer(state, |registered| {
            script
                .code
                .contains(&format!("var reduce_function = {};", registered))
        }) else {
            return doc! { "ok": 0, "errmsg": "eval: unknown script" };
        };
        let scope = &script.scope;
        let collection = scope.get_str("ns").unwrap_or_default();
        let keys: Vec<String> = scope
            .get_array("keys")
            .map(|keys| {
                keys.iter()
                    .filter_map(|key| key.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let cond = scope.get_document("condition").cloned().unwrap_or_default();
        let initial = scope.get_document("initial").cloned().unwrap_or_default();

        let buckets = bucket(state, collection, &keys, &cond, &initial, reduce);
        return doc! { "retval": { "result": buckets }, "ok": 1.0 };
    }

    doc! { "ok": 0, "errmsg": "no such cmd" }
}

fn find_reducer(state: &State, predicate: impl Fn(&str) -> bool) -> Option<ReduceFn> {
    state
        .reducers
        .iter()
        .find(|(source, _)| predicate(source))
        .map(|(_, reduce)| *reduce)
}

fn bucket(
    state: &State,
    collection: &str,
    keys: &[String],
    cond: &Document,
    initial: &Document,
    reduce: ReduceFn,
) -> Vec<Bson> {
    let mut buckets: Vec<(Document, Document)> = Vec::new();
    let rows = state.collections.get(collection).cloned().unwrap_or_default();

    for row in rows.iter().filter(|row| matches(row, cond)) {
        let mut key = Document::new();
        for field in keys {
            key.insert(field.clone(), row.get(field).cloned().unwrap_or(Bson::Null));
        }

        let position = match buckets.iter().position(|(existing, _)| *existing == key) {
            Some(position) => position,
            None => {
                let mut aggregate = key.clone();
                for (field, value) in initial {
                    aggregate.insert(field.clone(), value.clone());
                }
                buckets.push((key, aggregate));
                buckets.len() - 1
            }
        };
        reduce(row, &mut buckets[position].1);
    }

    buckets
        .into_iter()
        .map(|(_, aggregate)| Bson::Document(aggregate))
        .collect()
}

/// Equality plus `$gt`, `$gte`, `$lt`, `$lte` and `$ne`
pub fn matches(row: &Document, filter: &Document) -> bool {
    filter.iter().all(|(field, expected)| {
        let actual = row.get(field);
        match expected {
            Bson::Document(ops) if ops.keys().all(|op| op.starts_with('$')) && !ops.is_empty() => {
                ops.iter().all(|(op, operand)| {
                    let (a, b) = (number_opt(actual), number_opt(Some(operand)));
                    match op.as_str() {
                        "$gt" => matches!((a, b), (Some(a), Some(b)) if a > b),
                        "$gte" => matches!((a, b), (Some(a), Some(b)) if a >= b),
                        "$lt" => matches!((a, b), (Some(a), Some(b)) if a < b),
                        "$lte" => matches!((a, b), (Some(a), Some(b)) if a <= b),
                        "$ne" => actual != Some(operand),
                        _ => false,
                    }
                })
            }
            _ => actual == Some(expected),
        }
    })
}

fn apply_modifiers(row: &mut Document, update: &Document) {
    if let Ok(set) = update.get_document("$set") {
        for (field, value) in set {
            row.insert(field.clone(), value.clone());
        }
    }
    if let Ok(inc) = update.get_document("$inc") {
        for (field, value) in inc {
            let total = number(row.get(field)) + number(Some(value));
            row.insert(field.clone(), total);
        }
    }
}

fn project(row: &Document, fields: Option<&Document>) -> Document {
    let Some(fields) = fields else {
        return row.clone();
    };
    let mut projected = Document::new();
    if let Some(id) = row.get("_id") {
        projected.insert("_id", id.clone());
    }
    for (field, include) in fields {
        if number_opt(Some(include)) == Some(1.0) {
            if let Some(value) = row.get(field) {
                projected.insert(field.clone(), value.clone());
            }
        }
    }
    projected
}

fn number_opt(value: Option<&Bson>) -> Option<f64> {
    match value? {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

/// Integer view of a numeric field; missing or non-numeric counts as 0
pub fn number(value: Option<&Bson>) -> i64 {
    number_opt(value).map(|n| n as i64).unwrap_or(0)
}
