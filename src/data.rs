//! Data rows and data source chaining.

use crate::error::InterpreterError;
use crate::template::Variables;
use anyhow::Result;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// One row of variables produced by a data source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputData {
    /// 1-based row number within its source; 0 for synthetic rows.
    #[serde(default)]
    pub row_number: usize,
    /// Set only on the final row of a source.
    #[serde(default)]
    pub last_row: bool,
    #[serde(default)]
    pub vars: IndexMap<String, String>,
}

impl InputData {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single synthetic row, flagged as last.
    pub fn single(vars: IndexMap<String, String>) -> Self {
        Self {
            row_number: 1,
            last_row: true,
            vars,
        }
    }

    pub fn with_row(mut self, row_number: usize, last_row: bool) -> Self {
        self.row_number = row_number;
        self.last_row = last_row;
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn put(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Right-biased merge: keys of `other` win, and so does its row
    /// metadata.
    pub fn add(&self, other: &InputData) -> InputData {
        let mut vars = self.vars.clone();
        for (k, v) in &other.vars {
            vars.insert(k.clone(), v.clone());
        }
        InputData {
            row_number: other.row_number,
            last_row: other.last_row,
            vars,
        }
    }
}

impl Variables for InputData {
    fn var(&self, name: &str) -> Option<&str> {
        self.get(name)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for InputData {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        InputData::single(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// A named, lazily loaded producer of rows.
///
/// `load` receives the scope accumulated so far, so a loader may resolve
/// its own location through it.
pub trait DataSourceLoader: Send + Sync {
    fn name(&self) -> &str;

    fn is_loadable(&self, _scope: &InputData) -> bool {
        true
    }

    fn load(&self, scope: &InputData) -> Result<Vec<InputData>>;
}

/// A loader plus the row it contributes when used as a shared source.
#[derive(Clone)]
pub struct DataSource {
    loader: Arc<dyn DataSourceLoader>,
    row: Option<usize>,
}

impl DataSource {
    pub fn new(loader: Arc<dyn DataSourceLoader>) -> Self {
        Self { loader, row: None }
    }

    /// Select a 1-based row; row 1 is used when unset.
    pub fn with_row(mut self, row: usize) -> Self {
        self.row = Some(row);
        self
    }

    pub fn name(&self) -> &str {
        self.loader.name()
    }

    pub fn is_loadable(&self, scope: &InputData) -> bool {
        self.loader.is_loadable(scope)
    }

    /// Load every row, numbering them from 1 and flagging the final one.
    pub fn load_rows(&self, scope: &InputData) -> Result<Vec<InputData>> {
        let rows = self.loader.load(scope)?;
        let total = rows.len();
        debug!("Loaded {} row(s) from data source '{}'", total, self.name());
        Ok(rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| row.with_row(i + 1, i + 1 == total))
            .collect())
    }

    /// Load the configured row.
    pub fn load_row(&self, scope: &InputData) -> Result<InputData> {
        let index = self.row.unwrap_or(1);
        let rows = self.load_rows(scope)?;
        if index == 0 || index > rows.len() {
            return Err(InterpreterError::DataSource {
                name: self.name().to_string(),
                message: format!(
                    "row {index} requested but source has {} row(s)",
                    rows.len()
                ),
            }
            .into());
        }
        Ok(rows.into_iter().nth(index - 1).unwrap_or_default())
    }
}

impl PartialEq for DataSource {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for DataSource {}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSource")
            .field("name", &self.name())
            .field("row", &self.row)
            .finish()
    }
}

/// Fold shared sources into one row, later sources overriding earlier
/// ones. A source that is not loadable given the scope so far is skipped.
pub fn reduce_share_input(
    sources: &[DataSource],
    initial: &InputData,
) -> Result<InputData> {
    let mut scope = initial.clone();
    for source in sources {
        if !source.is_loadable(&scope) {
            debug!("Skipping data source '{}': not loadable", source.name());
            continue;
        }
        let row = source.load_row(&scope)?;
        scope = scope.add(&row);
    }
    Ok(scope)
}

/// Same fold as [`reduce_share_input`], collecting the sources that were
/// usable instead of the merged data.
pub fn filter_loadable_source(
    sources: &[DataSource],
    initial: &InputData,
) -> Result<Vec<DataSource>> {
    let mut scope = initial.clone();
    let mut usable = Vec::new();
    for source in sources {
        if !source.is_loadable(&scope) {
            continue;
        }
        let row = source.load_row(&scope)?;
        scope = scope.add(&row);
        usable.push(source.clone());
    }
    Ok(usable)
}

/// Combine shared variables with a test case's own rows. Without an own
/// source the shared row is the only row.
pub fn combine_rows(
    shared: &InputData,
    own: Option<&DataSource>,
) -> Result<Vec<InputData>> {
    let base = shared.clone().with_row(1, true);
    let Some(source) = own else {
        return Ok(vec![base]);
    };
    if !source.is_loadable(shared) {
        return Ok(vec![base]);
    }
    let rows = source.load_rows(shared)?;
    if rows.is_empty() {
        return Ok(vec![base]);
    }
    Ok(rows.iter().map(|row| shared.add(row)).collect())
}
