//! Aggregating wrappers: fold or de-duplicate the output of an inner chain.

use std::sync::Arc;

use anyhow::Result;
use retl_core::bag::ConcurrentKeyBag;
use retl_core::error::EtlError;
use retl_core::record::{
    deep_get, expect_kind, path_display, scalar_key, Context, KeyPath, Record, Value, ValueKind,
};
use retl_core::{flat_map_apply, Operator, Transformer};
use serde_json::Map;

use crate::{apply_value_mappers, MapConfig, ValueMapper};

/// Folding step: `(accumulator, inner output value) -> new accumulator`.
pub type Reducer = Arc<dyn Fn(Value, &Value) -> Value + Send + Sync>;

fn default_inner_paths(inner: &mut [Box<dyn Transformer>]) {
    let underscore = vec!["_".to_owned()];
    for stage in inner.iter_mut() {
        stage.set_default_paths(&underscore, "_");
    }
}

/// Applies an inner chain to the input value (wrapped as `{_: value}`) and
/// folds the chain's `_` outputs into a single accumulator.
///
/// Produces one record with the accumulator at `output_key` plus the
/// configured copies. Inner transformers with unset paths default to
/// reading and writing `_`.
pub struct Reduce {
    cfg: MapConfig,
    inner: Vec<Arc<dyn Transformer>>,
    initial_value: Value,
    reducer: Reducer,
}

impl Reduce {
    pub fn new(
        input_key_path: Option<KeyPath>,
        input_kind: ValueKind,
        output_key: &str,
        mut inner: Vec<Box<dyn Transformer>>,
        initial_value: Value,
        reducer: Reducer,
    ) -> Self {
        default_inner_paths(&mut inner);
        Self {
            cfg: MapConfig::new(input_key_path, input_kind, Some(output_key)),
            inner: inner.into_iter().map(Arc::from).collect(),
            initial_value,
            reducer,
        }
    }

    pub fn copy_values(mut self, copies: Vec<(String, KeyPath)>) -> Self {
        self.cfg.copy_values_key_paths = copies;
        self
    }

    pub fn remove_keys(mut self, keys: Vec<KeyPath>) -> Self {
        self.cfg.remove_key_paths = keys;
        self
    }

    /// Reducer counting the inner outputs.
    pub fn count() -> Reducer {
        Arc::new(|acc, _| Value::from(acc.as_i64().unwrap_or(0) + 1))
    }
}

impl Operator for Reduce {
    fn name(&self) -> &str {
        "reduce"
    }
}

impl Transformer for Reduce {
    fn transform(&self, item: Record, ctx: &mut Context) -> Result<Vec<Record>> {
        let input = self.cfg.resolve_input(&item)?;
        let mut wrapped = Map::new();
        wrapped.insert("_".to_owned(), input);

        let underscore = vec!["_".to_owned()];
        let mut accumulator = self.initial_value.clone();
        for res in flat_map_apply(wrapped, &self.inner, ctx)? {
            let value = deep_get(&res, &underscore).cloned().unwrap_or(Value::Null);
            accumulator = (self.reducer)(accumulator, &value);
        }
        Ok(vec![self.cfg.build_output(&item, accumulator)])
    }
}

/// De-duplicates the output of an inner chain per bag key.
///
/// For each outer input the bag entry is cleared, the inner chain runs, and
/// every inner output's unique value (after normalisation) is tested against
/// the shared bag: depending on `yield_unique_values` either first
/// occurrences or repeats survive. The bag entry is cleared again on
/// completion.
pub struct UniqueFilter {
    bag_key_path: KeyPath,
    bag_key_kind: ValueKind,
    unique_key_path: KeyPath,
    unique_kind: ValueKind,
    inner: Vec<Arc<dyn Transformer>>,
    bag: Arc<ConcurrentKeyBag>,
    normalizers: Vec<ValueMapper>,
    yield_unique_values: bool,
}

impl UniqueFilter {
    pub fn new(
        bag_key_path: KeyPath,
        bag_key_kind: ValueKind,
        unique_key_path: KeyPath,
        unique_kind: ValueKind,
        inner: Vec<Box<dyn Transformer>>,
        bag: Arc<ConcurrentKeyBag>,
    ) -> Self {
        Self {
            bag_key_path,
            bag_key_kind,
            unique_key_path,
            unique_kind,
            inner: inner.into_iter().map(Arc::from).collect(),
            bag,
            normalizers: Vec::new(),
            yield_unique_values: true,
        }
    }

    /// Normalisation chain applied to each unique value before the bag test.
    pub fn normalizers(mut self, normalizers: Vec<ValueMapper>) -> Self {
        self.normalizers = normalizers;
        self
    }

    /// Keep repeats instead of first occurrences.
    pub fn yield_duplicates(mut self) -> Self {
        self.yield_unique_values = false;
        self
    }

    fn scalar_at(
        &self,
        record: &Record,
        keys: &[String],
        kind: ValueKind,
    ) -> Result<String, EtlError> {
        let value = deep_get(record, keys).ok_or_else(|| EtlError::MissingKey(path_display(keys)))?;
        expect_kind(keys, kind, value)?;
        scalar_key(value).ok_or_else(|| EtlError::TypeMismatch {
            path: path_display(keys),
            expected: "scalar",
            actual: ValueKind::of(value).name(),
        })
    }
}

impl Operator for UniqueFilter {
    fn name(&self) -> &str {
        "unique-filter"
    }
}

impl Transformer for UniqueFilter {
    fn transform(&self, item: Record, ctx: &mut Context) -> Result<Vec<Record>> {
        let bag_key = self.scalar_at(&item, &self.bag_key_path, self.bag_key_kind)?;
        self.bag.clear(&bag_key);

        let mut out = Vec::new();
        let result: Result<()> = (|| {
            for res in flat_map_apply(item, &self.inner, ctx)? {
                let value = deep_get(&res, &self.unique_key_path)
                    .ok_or_else(|| EtlError::MissingKey(path_display(&self.unique_key_path)))?;
                expect_kind(&self.unique_key_path, self.unique_kind, value)?;
                let normalized = apply_value_mappers(value.clone(), &self.normalizers)
                    .ok_or_else(|| {
                        anyhow::anyhow!(
                            "unique value at `{}` became null after normalisation",
                            path_display(&self.unique_key_path)
                        )
                    })?;
                let unique_key = scalar_key(&normalized).ok_or_else(|| EtlError::TypeMismatch {
                    path: path_display(&self.unique_key_path),
                    expected: "scalar",
                    actual: ValueKind::of(&normalized).name(),
                })?;
                let added = self.bag.add_if_absent(&bag_key, &unique_key);
                if self.yield_unique_values == added {
                    out.push(res);
                }
            }
            Ok(())
        })();
        self.bag.clear(&bag_key);
        result?;
        Ok(out)
    }
}
