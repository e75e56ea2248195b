use super::entity::Entity;
use crate::core::{DbError, FromValue, Result, Value};
use std::collections::BTreeMap;

/// Related records loaded into, or attached to, an owner record.
#[derive(Debug, Clone, PartialEq)]
pub enum RelationValue {
    One(Box<Record>),
    Many(Vec<Record>),
}

/// Dynamic form of an entity instance.
///
/// Field values are keyed by field name (not storage column); related
/// records are keyed by relationship name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: BTreeMap<String, Value>,
    relations: BTreeMap<String, RelationValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Typed field access; an absent field reads as NULL.
    pub fn get_as<T: FromValue>(&self, field: &str) -> Result<T> {
        let value = self.fields.get(field).unwrap_or(&Value::Null);
        T::from_value(value).map_err(|err| match err {
            DbError::TypeMismatch(msg) => DbError::TypeMismatch(format!("field '{}': {}", field, msg)),
            other => other,
        })
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn with_one(mut self, name: impl Into<String>, record: Record) -> Self {
        self.relations
            .insert(name.into(), RelationValue::One(Box::new(record)));
        self
    }

    pub fn with_many(mut self, name: impl Into<String>, records: Vec<Record>) -> Self {
        self.relations.insert(name.into(), RelationValue::Many(records));
        self
    }

    pub fn set_relation(&mut self, name: impl Into<String>, value: RelationValue) {
        self.relations.insert(name.into(), value);
    }

    pub fn relation(&self, name: &str) -> Option<&RelationValue> {
        self.relations.get(name)
    }

    pub fn take_relation(&mut self, name: &str) -> Option<RelationValue> {
        self.relations.remove(name)
    }

    pub fn relations(&self) -> &BTreeMap<String, RelationValue> {
        &self.relations
    }

    /// Materializes a to-many relation; absent means not loaded (empty).
    pub fn many<T: Entity>(&self, name: &str) -> Result<Vec<T>> {
        match self.relations.get(name) {
            None => Ok(Vec::new()),
            Some(RelationValue::Many(records)) => records.iter().cloned().map(T::from_record).collect(),
            Some(RelationValue::One(record)) => Ok(vec![T::from_record((**record).clone())?]),
        }
    }

    /// Materializes a to-one relation.
    pub fn one<T: Entity>(&self, name: &str) -> Result<Option<T>> {
        match self.relations.get(name) {
            None => Ok(None),
            Some(RelationValue::One(record)) => T::from_record((**record).clone()).map(Some),
            Some(RelationValue::Many(records)) => records.first().cloned().map(T::from_record).transpose(),
        }
    }

    /// Plain JSON object: fields by name, relations nested under their
    /// relationship name.
    pub fn to_json(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        for (field, value) in &self.fields {
            object.insert(field.clone(), value_to_json(value));
        }
        for (name, relation) in &self.relations {
            let nested = match relation {
                RelationValue::One(record) => record.to_json(),
                RelationValue::Many(records) => serde_json::Value::Array(records.iter().map(Record::to_json).collect()),
            };
            object.insert(name.clone(), nested);
        }
        serde_json::Value::Object(object)
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Float(f) => serde_json::Value::from(*f),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Timestamp(ts) => serde_json::Value::String(ts.to_rfc3339()),
    }
}

/// Records of a slice of entities, for building to-many relations.
pub fn records_of<T: Entity>(entities: &[T]) -> Vec<Record> {
    entities.iter().map(Entity::to_record).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_reads_as_null() {
        let record = Record::new().with("name", "Eko");
        assert_eq!(record.get_as::<String>("name").unwrap(), "Eko");
        assert_eq!(record.get_as::<Option<String>>("middle_name").unwrap(), None);
        assert!(matches!(
            record.get_as::<i64>("name"),
            Err(DbError::TypeMismatch(msg)) if msg.contains("field 'name'")
        ));
    }

    #[test]
    fn test_relations_and_json() {
        let record = Record::new()
            .with("id", 1)
            .with_many("Todos", vec![Record::new().with("title", "A")]);

        assert!(matches!(record.relation("Todos"), Some(RelationValue::Many(items)) if items.len() == 1));
        let json = record.to_json();
        assert_eq!(json["id"], 1);
        assert_eq!(json["Todos"][0]["title"], "A");
    }
}
