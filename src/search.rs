use crate::types::RowValues;

/// A filter as given to `where_`, `or`, `not`, `having` or inline on a terminal call.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// SQL fragment with `?` placeholders.
    Sql { sql: String, args: Vec<RowValues> },
    /// Column equality pairs; these also seed `first_or_init`/`first_or_create`.
    Columns(Vec<(String, RowValues)>),
    /// Match on the target's primary key.
    PrimaryKey(RowValues),
}

impl Condition {
    #[must_use]
    pub fn sql(sql: impl Into<String>, args: Vec<RowValues>) -> Self {
        Condition::Sql {
            sql: sql.into(),
            args,
        }
    }

    #[must_use]
    pub fn eq(column: impl Into<String>, value: impl Into<RowValues>) -> Self {
        Condition::Columns(vec![(column.into(), value.into())])
    }

    pub fn columns<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<RowValues>,
        I: IntoIterator<Item = (K, V)>,
    {
        Condition::Columns(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<&str> for Condition {
    fn from(sql: &str) -> Self {
        Condition::sql(sql, Vec::new())
    }
}

impl From<String> for Condition {
    fn from(sql: String) -> Self {
        Condition::sql(sql, Vec::new())
    }
}

impl From<i64> for Condition {
    fn from(id: i64) -> Self {
        Condition::PrimaryKey(RowValues::Int(id))
    }
}

impl From<RowValues> for Condition {
    fn from(id: RowValues) -> Self {
        Condition::PrimaryKey(id)
    }
}

impl From<(&str, Vec<RowValues>)> for Condition {
    fn from((sql, args): (&str, Vec<RowValues>)) -> Self {
        Condition::sql(sql, args)
    }
}

impl<const N: usize> From<(&str, [RowValues; N])> for Condition {
    fn from((sql, args): (&str, [RowValues; N])) -> Self {
        Condition::sql(sql, args.into())
    }
}

impl From<Vec<(&str, RowValues)>> for Condition {
    fn from(pairs: Vec<(&str, RowValues)>) -> Self {
        Condition::columns(pairs)
    }
}

impl<const N: usize> From<[(&str, RowValues); N]> for Condition {
    fn from(pairs: [(&str, RowValues); N]) -> Self {
        Condition::columns(pairs)
    }
}

/// Attribute pairs for `attrs`, `assign` and the update family.
pub type Attrs = Vec<(String, RowValues)>;

pub(crate) fn into_attrs<K, V, I>(pairs: I) -> Attrs
where
    K: Into<String>,
    V: Into<RowValues>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Later pairs overwrite earlier ones with the same column.
pub(crate) fn merge_attrs(into: &mut Attrs, from: Attrs) {
    for (column, value) in from {
        match into.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => into.push((column, value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Preload {
    pub relation: String,
    pub conditions: Vec<Condition>,
}

/// Accumulated query intent. Cloned deeply with its builder.
#[derive(Debug, Clone, Default)]
pub struct Search {
    pub(crate) where_conditions: Vec<Condition>,
    pub(crate) or_conditions: Vec<Condition>,
    pub(crate) not_conditions: Vec<Condition>,
    pub(crate) having_conditions: Vec<Condition>,
    pub(crate) join_conditions: Vec<Condition>,
    pub(crate) init_attrs: Attrs,
    pub(crate) assign_attrs: Attrs,
    pub(crate) select: Option<Condition>,
    pub(crate) omits: Vec<String>,
    pub(crate) orders: Vec<String>,
    pub(crate) preload: Vec<Preload>,
    pub(crate) offset: Option<u64>,
    pub(crate) limit: Option<u64>,
    pub(crate) group: Option<String>,
    pub(crate) table_name: Option<String>,
    pub(crate) raw: bool,
    pub(crate) unscoped: bool,
    pub(crate) ignore_order: bool,
}

impl Search {
    pub(crate) fn where_(&mut self, cond: Condition) {
        self.where_conditions.push(cond);
    }

    pub(crate) fn or(&mut self, cond: Condition) {
        self.or_conditions.push(cond);
    }

    pub(crate) fn not(&mut self, cond: Condition) {
        self.not_conditions.push(cond);
    }

    pub(crate) fn order(&mut self, value: String, reorder: bool) {
        if reorder {
            self.orders.clear();
        }
        if !value.trim().is_empty() {
            self.orders.push(value);
        }
    }

    pub(crate) fn preload(&mut self, relation: String, conditions: Vec<Condition>) {
        self.preload.retain(|p| p.relation != relation);
        self.preload.push(Preload {
            relation,
            conditions,
        });
    }

    pub(crate) fn has_conditions(&self) -> bool {
        !self.where_conditions.is_empty()
            || !self.or_conditions.is_empty()
            || !self.not_conditions.is_empty()
    }

    #[must_use]
    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    #[must_use]
    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    #[must_use]
    pub fn orders(&self) -> &[String] {
        &self.orders
    }

    #[must_use]
    pub fn where_conditions(&self) -> &[Condition] {
        &self.where_conditions
    }

    #[must_use]
    pub fn table_name(&self) -> Option<&str> {
        self.table_name.as_deref()
    }

    #[must_use]
    pub fn is_unscoped(&self) -> bool {
        self.unscoped
    }
}
