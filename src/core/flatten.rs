use crate::domain::model::{
    BreakdownTree, Decomposition, DecompositionResult, DecompositionShape, FieldValue, FlatRecord,
    Metrics, DEFAULT_METRIC,
};
use crate::domain::ports::{ConfigProvider, Transform};
use crate::utils::error::{FlattenError, Result};
use crate::utils::validation::{validate_field_names, validate_non_empty_string, Validate};
use serde_json::Value;

/// 扁平化設定，建構時驗證一次之後不再變動
#[derive(Debug, Clone, PartialEq)]
pub struct FlattenerConfig {
    fields: Vec<String>,
    default_metric: String,
    shape: DecompositionShape,
}

impl FlattenerConfig {
    pub fn new(
        fields: Vec<String>,
        default_metric: impl Into<String>,
        shape: DecompositionShape,
    ) -> Result<Self> {
        let config = Self {
            fields,
            default_metric: default_metric.into(),
            shape,
        };
        config.validate()?;
        Ok(config)
    }

    /// 使用預設指標名稱與逐點輸入
    pub fn with_fields<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Result<Self> {
        Self::new(
            fields.into_iter().map(Into::into).collect(),
            DEFAULT_METRIC,
            DecompositionShape::Points,
        )
    }

    pub fn from_provider<C: ConfigProvider>(provider: &C) -> Result<Self> {
        Self::new(
            provider.fields().to_vec(),
            provider.default_metric(),
            provider.shape(),
        )
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn default_metric(&self) -> &str {
        &self.default_metric
    }

    pub fn shape(&self) -> DecompositionShape {
        self.shape
    }

    fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field == name)
    }
}

impl Validate for FlattenerConfig {
    fn validate(&self) -> Result<()> {
        validate_field_names("flatten.fields", &self.fields)?;
        validate_non_empty_string("flatten.default_metric", &self.default_metric)?;
        if self.field_index(&self.default_metric).is_some() {
            return Err(FlattenError::InvalidConfigValueError {
                field: "flatten.default_metric".to_string(),
                value: self.default_metric.clone(),
                reason: "Metric name collides with a decomposition field".to_string(),
            });
        }
        Ok(())
    }
}

/// 把分解結果轉成扁平記錄。除了設定之外不保留任何狀態。
#[derive(Debug, Clone)]
pub struct Flattener {
    config: FlattenerConfig,
}

impl Flattener {
    pub fn new(config: FlattenerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FlattenerConfig {
        &self.config
    }

    /// 逐點輸入永遠產生剛好一筆記錄
    pub fn flatten_point(&self, point: DecompositionResult) -> Result<FlatRecord> {
        self.check_metrics(&point.metrics)?;

        if self.config.fields.is_empty() && !point.path.is_empty() {
            return Err(FlattenError::malformed(format!(
                "path has {} entries but no decomposition fields are configured",
                point.path.len()
            )));
        }
        if point.path.is_empty() && !self.config.fields.is_empty() {
            return Err(FlattenError::malformed(format!(
                "path is empty but decomposition fields [{}] are configured",
                self.config.fields.join(", ")
            )));
        }

        let mut slots = vec![FieldValue::Unset; self.config.fields.len()];
        for (name, value) in point.path {
            let index = self.config.field_index(&name).ok_or_else(|| {
                FlattenError::malformed(format!(
                    "field '{}' is not one of the configured fields [{}]",
                    name,
                    self.config.fields.join(", ")
                ))
            })?;
            if !is_scalar(&value) {
                return Err(FlattenError::malformed(format!(
                    "field '{}' has a non-scalar value: {}",
                    name, value
                )));
            }
            if !slots[index].is_unset() {
                return Err(FlattenError::malformed(format!(
                    "field '{}' appears more than once in the path",
                    name
                )));
            }
            slots[index] = FieldValue::Set(value);
        }

        Ok(self.record(slots, point.metrics))
    }

    /// 巢狀輸入依 key 順序深度優先展開，每個葉節點一筆記錄
    pub fn flatten_tree(&self, tree: &BreakdownTree) -> Result<Vec<FlatRecord>> {
        let mut records = Vec::new();
        let mut prefix = Vec::with_capacity(self.config.fields.len());
        self.walk(&tree.tree, &mut prefix, &mut records)?;
        tracing::trace!("🌳 Tree expanded into {} records", records.len());
        Ok(records)
    }

    /// 輸入的形狀必須與設定的 `shape` 相同
    pub fn flatten(&self, input: Decomposition) -> Result<Vec<FlatRecord>> {
        match (input, self.config.shape) {
            (Decomposition::Point(point), DecompositionShape::Points) => {
                Ok(vec![self.flatten_point(point)?])
            }
            (Decomposition::Tree(tree), DecompositionShape::Nested) => self.flatten_tree(&tree),
            (input, shape) => Err(FlattenError::malformed(format!(
                "{} input does not match the configured '{}' shape",
                input.kind(),
                shape.as_str()
            ))),
        }
    }

    /// 同步展開整批輸入，遇到第一個錯誤就停止
    pub fn flatten_all<I>(&self, inputs: I) -> Result<Vec<FlatRecord>>
    where
        I: IntoIterator<Item = Decomposition>,
    {
        let mut records = Vec::new();
        for input in inputs {
            records.extend(self.flatten(input)?);
        }
        Ok(records)
    }

    fn walk(
        &self,
        node: &Value,
        prefix: &mut Vec<FieldValue>,
        records: &mut Vec<FlatRecord>,
    ) -> Result<()> {
        let depth = prefix.len();
        match node {
            Value::Number(number) => {
                let metrics = Metrics::from([(self.config.default_metric.clone(), number.clone())]);
                self.check_metrics(&metrics)?;
                records.push(self.leaf_record(prefix, metrics));
                Ok(())
            }
            Value::Object(children) if depth < self.config.fields.len() => {
                for (key, child) in children {
                    prefix.push(FieldValue::Set(Value::String(key.clone())));
                    let result = self.walk(child, prefix, records);
                    prefix.pop();
                    result?;
                }
                Ok(())
            }
            Value::Object(entries) => {
                let mut metrics = Metrics::new();
                for (name, value) in entries {
                    let Value::Number(number) = value else {
                        return Err(FlattenError::malformed(format!(
                            "metric '{}' at depth {} is not a number: {}",
                            name, depth, value
                        )));
                    };
                    metrics.insert(name.clone(), number.clone());
                }
                self.check_metrics(&metrics)?;
                records.push(self.leaf_record(prefix, metrics));
                Ok(())
            }
            other => Err(FlattenError::malformed(format!(
                "unexpected value at depth {} of breakdown tree: {}",
                depth, other
            ))),
        }
    }

    fn leaf_record(&self, prefix: &[FieldValue], metrics: Metrics) -> FlatRecord {
        let mut slots = prefix.to_vec();
        slots.resize(self.config.fields.len(), FieldValue::Unset);
        self.record(slots, metrics)
    }

    fn record(&self, slots: Vec<FieldValue>, metrics: Metrics) -> FlatRecord {
        let fields = self.config.fields.iter().cloned().zip(slots).collect();
        FlatRecord::new(fields, metrics)
    }

    fn check_metrics(&self, metrics: &Metrics) -> Result<()> {
        if metrics.is_empty() {
            return Err(FlattenError::malformed("decomposition result has no metrics"));
        }
        if let Some(name) = metrics
            .keys()
            .find(|name| self.config.field_index(name).is_some())
        {
            return Err(FlattenError::malformed(format!(
                "metric '{}' collides with a decomposition field",
                name
            )));
        }
        Ok(())
    }
}

/// null、陣列與物件不能當作欄位值
fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

impl Transform for Flattener {
    type Input = Decomposition;
    type Output = FlatRecord;

    fn apply(&self, input: Decomposition) -> Result<Vec<FlatRecord>> {
        self.flatten(input)
    }
}
