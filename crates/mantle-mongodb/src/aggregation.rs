//! Grouping: native `group` command or a server-side reduce script
//!
//! Both strategies take the same [`GroupSpec`] and return the same shape, a
//! list of bucket documents. [`GroupMode`] picks one per call.
//!
//! The script path exists for servers without the `group` command. It renders
//! a generic scan/bucket/fold function, splices the caller's reduce function
//! into it and evaluates it with `$eval`.

use crate::command::QueryCommand;
use crate::database::{errmsg_or, is_ok, Reply};
use crate::Result;
use bson::{doc, Bson, Document, JavaScriptCodeWithScope};
use mantle_common::MantleError;

/// Caller-supplied fold step, as JavaScript source
///
/// The function receives `(obj, prev)`: the current row and the bucket's
/// accumulator, which it updates in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Reducer {
    pub code: String,
    /// Variables the reduce function closes over
    pub scope: Option<Document>,
}

impl Reducer {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            scope: None,
        }
    }

    pub fn with_scope(code: impl Into<String>, scope: Document) -> Self {
        Self {
            code: code.into(),
            scope: Some(scope),
        }
    }

    fn to_bson(&self) -> Bson {
        match &self.scope {
            Some(scope) => Bson::JavaScriptCodeWithScope(JavaScriptCodeWithScope {
                code: self.code.clone(),
                scope: scope.clone(),
            }),
            None => Bson::JavaScriptCode(self.code.clone()),
        }
    }
}

impl From<&str> for Reducer {
    fn from(code: &str) -> Self {
        Reducer::new(code)
    }
}

/// What to group and how to fold each bucket
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSpec {
    pub keys: Vec<String>,
    pub condition: Document,
    pub initial: Document,
    pub reduce: Reducer,
}

impl GroupSpec {
    pub fn new<K: Into<String>>(
        keys: impl IntoIterator<Item = K>,
        condition: Document,
        initial: Document,
        reduce: impl Into<Reducer>,
    ) -> Self {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            condition,
            initial,
            reduce: reduce.into(),
        }
    }

    fn key_document(&self) -> Document {
        let mut key = Document::new();
        for field in &self.keys {
            key.insert(field.clone(), 1);
        }
        key
    }
}

/// One way of running a group: the command it sends and how to read the reply
pub trait GroupStrategy: Send + Sync {
    /// Administrative command to send through `<database>.$cmd`
    fn command(&self, database: &str, collection: &str, spec: &GroupSpec) -> QueryCommand;

    /// Extracts the bucket list from the reply
    fn unwrap_reply(&self, reply: Reply) -> Result<Vec<Document>>;
}

/// Which strategy a group call uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupMode {
    /// The server's `group` command
    Command,
    /// A reduce script run through `$eval`
    #[default]
    Script,
}

impl GroupMode {
    pub fn strategy(self) -> Box<dyn GroupStrategy> {
        match self {
            GroupMode::Command => Box::new(NativeGroup),
            GroupMode::Script => Box::new(ScriptGroup::default()),
        }
    }
}

/// `{group: {ns, $reduce, key, cond, initial}}`
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeGroup;

impl GroupStrategy for NativeGroup {
    fn command(&self, database: &str, collection: &str, spec: &GroupSpec) -> QueryCommand {
        let selector = doc! {
            "group": {
                "ns": collection,
                "$reduce": spec.reduce.to_bson(),
                "key": spec.key_document(),
                "cond": spec.condition.clone(),
                "initial": spec.initial.clone(),
            }
        };
        QueryCommand::db_command(database, selector)
    }

    fn unwrap_reply(&self, reply: Reply) -> Result<Vec<Document>> {
        let document = reply.into_primary().unwrap_or_default();
        match document.get("retval") {
            Some(retval) if *retval != Bson::Null => bucket_list(retval),
            _ => Err(MantleError::Operation(format!(
                "group command failed: {}",
                errmsg_or(&document, "no result returned")
            ))),
        }
    }
}

/// Generic grouping function; the reduce function replaces the placeholder
const GROUP_SCRIPT: &str = r#"function () {
    var c = db[ns].find(condition);
    var map = new Map();
    var reduce_function = __REDUCE__;
    while (c.hasNext()) {
        var obj = c.next();

        var key = {};
        for (var i = 0; i < keys.length; i++) {
            var k = keys[i];
            key[k] = obj[k];
        }

        var aggObj = map.get(key);
        if (aggObj == null) {
            var newObj = Object.extend({}, key);
            aggObj = Object.extend(newObj, initial);
            map.put(key, aggObj);
        }
        reduce_function(obj, aggObj);
    }
    return {"result": map.values()};
}"#;

const REDUCE_PLACEHOLDER: &str = "__REDUCE__";

/// Renders the grouping script and its scope
#[derive(Debug, Clone)]
pub struct ScriptTemplate {
    source: String,
}

impl Default for ScriptTemplate {
    fn default() -> Self {
        Self {
            source: GROUP_SCRIPT.to_string(),
        }
    }
}

impl ScriptTemplate {
    /// A template with custom source; it must contain `__REDUCE__` exactly once
    pub fn new(source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        if source.matches(REDUCE_PLACEHOLDER).count() != 1 {
            return Err(MantleError::Validation(format!(
                "group script template must contain {} exactly once",
                REDUCE_PLACEHOLDER
            )));
        }
        Ok(Self { source })
    }

    /// Script text with `reduce` spliced in
    pub fn render_code(&self, reduce: &Reducer) -> String {
        self.source.replacen(REDUCE_PLACEHOLDER, &reduce.code, 1)
    }

    /// Scope the script runs with
    ///
    /// Built fresh on every call: the reducer's own scope is cloned and never
    /// modified, so concurrent groups sharing a `Reducer` cannot see each
    /// other's bindings.
    pub fn render_scope(&self, collection: &str, spec: &GroupSpec) -> Document {
        let mut scope = spec.reduce.scope.clone().unwrap_or_default();
        scope.insert("ns", collection);
        scope.insert(
            "keys",
            spec.keys.iter().cloned().map(Bson::String).collect::<Vec<_>>(),
        );
        scope.insert("condition", spec.condition.clone());
        scope.insert("initial", spec.initial.clone());
        scope
    }

    pub fn render(&self, collection: &str, spec: &GroupSpec) -> JavaScriptCodeWithScope {
        JavaScriptCodeWithScope {
            code: self.render_code(&spec.reduce),
            scope: self.render_scope(collection, spec),
        }
    }
}

/// `{$eval: <rendered script>, args: []}`
#[derive(Debug, Clone, Default)]
pub struct ScriptGroup {
    template: ScriptTemplate,
}

impl ScriptGroup {
    pub fn new(template: ScriptTemplate) -> Self {
        Self { template }
    }

    pub fn template(&self) -> &ScriptTemplate {
        &self.template
    }
}

impl GroupStrategy for ScriptGroup {
    fn command(&self, database: &str, collection: &str, spec: &GroupSpec) -> QueryCommand {
        let script = self.template.render(collection, spec);
        let selector = doc! {
            "$eval": Bson::JavaScriptCodeWithScope(script),
            "args": [],
        };
        QueryCommand::db_command(database, selector)
    }

    fn unwrap_reply(&self, reply: Reply) -> Result<Vec<Document>> {
        let document = reply.into_primary().unwrap_or_default();
        if !is_ok(&document) {
            return Err(MantleError::Operation(format!(
                "eval failed: {}",
                errmsg_or(&document, "no result returned")
            )));
        }

        match document.get("retval") {
            Some(Bson::Document(wrapper)) => match wrapper.get("result") {
                Some(result) => bucket_list(result),
                None => Err(unexpected_shape(&Bson::Document(wrapper.clone()))),
            },
            Some(retval) => bucket_list(retval),
            None => Err(MantleError::Operation(format!(
                "eval failed: {}",
                errmsg_or(&document, "no result returned")
            ))),
        }
    }
}

/// Reads a list of bucket documents
fn bucket_list(value: &Bson) -> Result<Vec<Document>> {
    let items = value.as_array().ok_or_else(|| unexpected_shape(value))?;
    items
        .iter()
        .map(|item| {
            item.as_document()
                .cloned()
                .ok_or_else(|| unexpected_shape(item))
        })
        .collect()
}

fn unexpected_shape(value: &Bson) -> MantleError {
    MantleError::Deserialization(format!("unexpected group result: {}", value))
}
