//! Model capabilities and the per-type schema registry.
//!
//! Callers describe their types through [`Model`]; the builder only ever sees
//! them as object-safe [`Target`]s, so a single value and a collection flow
//! through the same pipeline.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::DbError;
use crate::results::{CustomDbRow, ResultSet};
use crate::types::RowValues;

/// Has-many / has-one relation a model can preload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relation {
    pub name: &'static str,
    pub table: &'static str,
    /// Column on the related table holding this model's primary key.
    pub foreign_key: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSchema {
    pub name: &'static str,
    pub table: Option<&'static str>,
    pub primary_key: &'static str,
    pub columns: &'static [&'static str],
    pub relations: &'static [Relation],
}

impl ModelSchema {
    #[must_use]
    pub const fn new(
        name: &'static str,
        primary_key: &'static str,
        columns: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            table: None,
            primary_key,
            columns,
            relations: &[],
        }
    }

    #[must_use]
    pub const fn table(mut self, table: &'static str) -> Self {
        self.table = Some(table);
        self
    }

    #[must_use]
    pub const fn relations(mut self, relations: &'static [Relation]) -> Self {
        self.relations = relations;
        self
    }
}

/// Lifecycle points a model can react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelHook {
    BeforeSave,
    BeforeCreate,
    AfterCreate,
    BeforeUpdate,
    AfterUpdate,
    AfterSave,
    BeforeDelete,
    AfterDelete,
    AfterFind,
}

pub trait Model: Clone + Default + Send + Sync + 'static {
    fn schema() -> ModelSchema;

    /// Column values, in `schema().columns` order.
    fn values(&self) -> Vec<RowValues>;

    /// # Errors
    /// Implementations reject unknown columns or values of the wrong shape.
    fn set_value(&mut self, column: &str, value: RowValues) -> Result<(), DbError>;

    /// # Errors
    /// Propagates [`Model::set_value`] failures.
    fn from_row(row: &CustomDbRow) -> Result<Self, DbError> {
        let schema = Self::schema();
        let mut model = Self::default();
        for (column, value) in row.iter() {
            if schema.columns.contains(&column) {
                model.set_value(column, value.clone())?;
            }
        }
        Ok(model)
    }

    /// # Errors
    /// An error aborts the running operation.
    fn hook(&mut self, _hook: ModelHook) -> Result<(), DbError> {
        Ok(())
    }

    /// Receive preloaded rows for `relation`.
    ///
    /// # Errors
    /// The default rejects every relation.
    fn attach(&mut self, relation: &str, _rows: &[CustomDbRow]) -> Result<(), DbError> {
        Err(DbError::Unimplemented(format!(
            "{} does not accept preloaded {relation}",
            Self::schema().name
        )))
    }
}

/// One record as the pipeline sees it.
pub trait Record: Send + Sync {
    fn values(&self) -> Vec<RowValues>;
    /// # Errors
    /// See [`Model::set_value`].
    fn set_value(&mut self, column: &str, value: RowValues) -> Result<(), DbError>;
    /// # Errors
    /// See [`Model::hook`].
    fn hook(&mut self, hook: ModelHook) -> Result<(), DbError>;
    /// # Errors
    /// See [`Model::attach`].
    fn attach(&mut self, relation: &str, rows: &[CustomDbRow]) -> Result<(), DbError>;
}

impl<M: Model> Record for M {
    fn values(&self) -> Vec<RowValues> {
        Model::values(self)
    }

    fn set_value(&mut self, column: &str, value: RowValues) -> Result<(), DbError> {
        Model::set_value(self, column, value)
    }

    fn hook(&mut self, hook: ModelHook) -> Result<(), DbError> {
        Model::hook(self, hook)
    }

    fn attach(&mut self, relation: &str, rows: &[CustomDbRow]) -> Result<(), DbError> {
        Model::attach(self, relation, rows)
    }
}

/// Object-safe view of whatever a terminal call reads into or writes from.
pub trait Target: Send + Sync + 'static {
    fn model_type(&self) -> TypeId;
    fn schema(&self) -> ModelSchema;
    fn is_collection(&self) -> bool;
    fn records(&self) -> Vec<&dyn Record>;
    fn records_mut(&mut self) -> Vec<&mut dyn Record>;
    /// Replace contents with decoded rows and return how many were loaded.
    ///
    /// # Errors
    /// Row decoding errors.
    fn load(&mut self, rows: &ResultSet) -> Result<usize, DbError>;
    fn clone_box(&self) -> Box<dyn Target>;
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<M: Model> Target for M {
    fn model_type(&self) -> TypeId {
        TypeId::of::<M>()
    }

    fn schema(&self) -> ModelSchema {
        M::schema()
    }

    fn is_collection(&self) -> bool {
        false
    }

    fn records(&self) -> Vec<&dyn Record> {
        vec![self as &dyn Record]
    }

    fn records_mut(&mut self) -> Vec<&mut dyn Record> {
        vec![self as &mut dyn Record]
    }

    fn load(&mut self, rows: &ResultSet) -> Result<usize, DbError> {
        match rows.first() {
            Some(row) => {
                *self = M::from_row(row)?;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn clone_box(&self) -> Box<dyn Target> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl<M: Model> Target for Vec<M> {
    fn model_type(&self) -> TypeId {
        TypeId::of::<M>()
    }

    fn schema(&self) -> ModelSchema {
        M::schema()
    }

    fn is_collection(&self) -> bool {
        true
    }

    fn records(&self) -> Vec<&dyn Record> {
        self.iter().map(|m| m as &dyn Record).collect()
    }

    fn records_mut(&mut self) -> Vec<&mut dyn Record> {
        self.iter_mut().map(|m| m as &mut dyn Record).collect()
    }

    fn load(&mut self, rows: &ResultSet) -> Result<usize, DbError> {
        let decoded = rows
            .results
            .iter()
            .map(M::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        *self = decoded;
        Ok(self.len())
    }

    fn clone_box(&self) -> Box<dyn Target> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl Clone for Box<dyn Target> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl std::fmt::Debug for dyn Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("model", &self.schema().name)
            .field("collection", &self.is_collection())
            .finish()
    }
}

/// Schema facts resolved once per model type.
#[derive(Debug, Clone)]
pub struct ModelStruct {
    pub schema: ModelSchema,
    pub primary_index: Option<usize>,
    pub created_at: Option<usize>,
    pub updated_at: Option<usize>,
    pub deleted_at: Option<usize>,
}

impl ModelStruct {
    fn resolve(schema: ModelSchema) -> Self {
        let position = |name: &str| schema.columns.iter().position(|c| *c == name);
        Self {
            primary_index: position(schema.primary_key),
            created_at: position("created_at"),
            updated_at: position("updated_at"),
            deleted_at: position("deleted_at"),
            schema,
        }
    }

    #[must_use]
    pub fn has_column(&self, column: &str) -> bool {
        self.schema.columns.contains(&column)
    }

    #[must_use]
    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.schema.relations.iter().find(|r| r.name == name)
    }

    /// Table name under the root's naming policy.
    #[must_use]
    pub fn table_name(&self, singular: bool) -> String {
        if let Some(table) = self.schema.table {
            return table.to_string();
        }
        let snake = to_snake_case(self.schema.name);
        if singular { snake } else { pluralize(&snake) }
    }
}

#[derive(Debug, Default)]
pub struct ModelRegistry {
    structs: RwLock<HashMap<TypeId, Arc<ModelStruct>>>,
}

impl ModelRegistry {
    /// Cached schema for the target's model type, resolving it on first use.
    pub fn get(&self, target: &dyn Target) -> Arc<ModelStruct> {
        let key = target.model_type();
        {
            let structs = match self.structs.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(found) = structs.get(&key) {
                return Arc::clone(found);
            }
        }
        let resolved = Arc::new(ModelStruct::resolve(target.schema()));
        let mut structs = match self.structs.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(structs.entry(key).or_insert(resolved))
    }
}

#[must_use]
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let chars: Vec<char> = name.chars().collect();
    for (i, c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev_lower = i > 0 && (chars[i - 1].is_lowercase() || chars[i - 1].is_ascii_digit());
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let prev_upper = i > 0 && chars[i - 1].is_uppercase();
            if i > 0 && (prev_lower || (prev_upper && next_lower)) {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(*c);
        }
    }
    out
}

#[must_use]
pub fn pluralize(word: &str) -> String {
    const IRREGULAR: [(&str, &str); 5] = [
        ("person", "people"),
        ("child", "children"),
        ("man", "men"),
        ("woman", "women"),
        ("mouse", "mice"),
    ];
    let (stem, last) = match word.rfind('_') {
        Some(idx) => word.split_at(idx + 1),
        None => ("", word),
    };
    if let Some((_, plural)) = IRREGULAR.iter().find(|(single, _)| *single == last) {
        return format!("{stem}{plural}");
    }
    if last.ends_with('y') && !last.ends_with("ay") && !last.ends_with("ey") && !last.ends_with("oy") && !last.ends_with("uy") {
        return format!("{}ies", &word[..word.len() - 1]);
    }
    if ["s", "x", "z", "ch", "sh"].iter().any(|suffix| last.ends_with(suffix)) {
        return format!("{word}es");
    }
    format!("{word}s")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naming_policy() {
        assert_eq!(to_snake_case("CreditCard"), "credit_card");
        assert_eq!(to_snake_case("HTTPRequest"), "http_request");
        assert_eq!(pluralize("user"), "users");
        assert_eq!(pluralize("credit_card"), "credit_cards");
        assert_eq!(pluralize("company"), "companies");
        assert_eq!(pluralize("address"), "addresses");
        assert_eq!(pluralize("admin_person"), "admin_people");
    }
}
