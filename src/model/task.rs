use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::error::ModelError;
use crate::datastore::is_valid_key;

/// Application defined task fields.
pub type Fields = Map<String, Value>;

pub const ID_FIELD: &str = "id";

/// Store assigned identifier of a task, also its key under the board's task collection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn parse(input: &str) -> Result<Self, ModelError> {
        if input.is_empty() {
            return Err(ModelError::MissingParameter("id"));
        }
        if !is_valid_key(input) {
            return Err(ModelError::InvalidId(input.to_string()));
        }
        Ok(Self(input.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A task record: its fields plus the `id` field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Task(Fields);

impl Task {
    pub fn new(id: &TaskId, mut fields: Fields) -> Self {
        fields.insert(ID_FIELD.into(), Value::String(id.to_string()));
        Self(fields)
    }

    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self(fields)),
            _ => None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.0.get(ID_FIELD).and_then(Value::as_str)
    }

    pub fn fields(&self) -> &Fields {
        &self.0
    }

    pub fn into_fields(self) -> Fields {
        self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskList {
    pub tasks: Vec<Task>,
    pub num_tasks: usize,
}

impl From<Vec<Task>> for TaskList {
    fn from(tasks: Vec<Task>) -> Self {
        Self {
            num_tasks: tasks.len(),
            tasks,
        }
    }
}

/// Reads a request `item`, given either as a JSON object or as a string holding one.
pub fn parse_item(item: Option<&Value>) -> Result<Fields, ModelError> {
    let parsed;
    let item = match item {
        None | Some(Value::Null) => return Err(ModelError::MissingParameter("item")),
        Some(Value::String(encoded)) => {
            parsed = serde_json::from_str::<Value>(encoded)
                .map_err(|err| ModelError::MalformedItem(err.to_string()))?;
            &parsed
        }
        Some(value) => value,
    };

    match item {
        Value::Object(fields) => Ok(fields.clone()),
        Value::Null => Err(ModelError::MissingParameter("item")),
        _ => Err(ModelError::MalformedItem("item must be a JSON object".into())),
    }
}

/// The `id` an update item refers to.
pub fn item_id(fields: &Fields) -> Result<TaskId, ModelError> {
    match fields.get(ID_FIELD) {
        Some(Value::String(id)) => TaskId::parse(id),
        Some(Value::Null) | None => Err(ModelError::MissingParameter("id")),
        Some(other) => Err(ModelError::InvalidId(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_item_as_object_or_string() {
        let object = json!({"title": "x", "points": 3});
        let encoded = json!(object.to_string());

        let from_object = parse_item(Some(&object)).unwrap();
        let from_string = parse_item(Some(&encoded)).unwrap();

        assert_eq!(from_object, from_string);
        assert_eq!(from_object["title"], "x");
    }

    #[test]
    fn test_bad_items() {
        assert_eq!(
            parse_item(None),
            Err(ModelError::MissingParameter("item"))
        );
        assert_eq!(
            parse_item(Some(&Value::Null)),
            Err(ModelError::MissingParameter("item"))
        );
        assert!(matches!(
            parse_item(Some(&json!("{title"))),
            Err(ModelError::MalformedItem(_))
        ));
        assert!(matches!(
            parse_item(Some(&json!([1, 2]))),
            Err(ModelError::MalformedItem(_))
        ));
        assert!(matches!(
            parse_item(Some(&json!("\"just a string\""))),
            Err(ModelError::MalformedItem(_))
        ));
    }

    #[test]
    fn test_item_id() {
        let fields = json!({"id": "-Mabc", "title": "x"}).as_object().unwrap().clone();
        assert_eq!(item_id(&fields).unwrap().as_str(), "-Mabc");

        let fields = json!({"title": "x"}).as_object().unwrap().clone();
        assert_eq!(item_id(&fields), Err(ModelError::MissingParameter("id")));

        let fields = json!({"id": "../R&D"}).as_object().unwrap().clone();
        assert!(matches!(item_id(&fields), Err(ModelError::InvalidId(_))));

        let fields = json!({"id": 7}).as_object().unwrap().clone();
        assert!(matches!(item_id(&fields), Err(ModelError::InvalidId(_))));
    }

    #[test]
    fn test_task_carries_its_id() {
        let id = TaskId::parse("-Mabc").unwrap();
        let fields = json!({"title": "x", "id": "spoofed"}).as_object().unwrap().clone();

        let task = Task::new(&id, fields);

        assert_eq!(task.id(), Some("-Mabc"));
        assert_eq!(
            serde_json::to_value(TaskList::from(vec![task])).unwrap(),
            json!({"tasks": [{"title": "x", "id": "-Mabc"}], "num_tasks": 1})
        );
    }
}
