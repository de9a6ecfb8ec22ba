use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Number, Value};
use std::collections::BTreeMap;

/// 單一指標時使用的預設指標名稱
pub const DEFAULT_METRIC: &str = "value";

pub type Metrics = BTreeMap<String, Number>;

/// 以路徑表示的分解結果，例如
/// `{"path": [["region", "us-east"], ["status", "500"]], "metrics": {"count": 3}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDecompositionResult")]
pub struct DecompositionResult {
    pub path: Vec<(String, Value)>,
    pub metrics: Metrics,
}

/// 反序列化用的中間格式，允許 `"value": n` 的單一指標簡寫，
/// 路徑也可以寫成 `"fields": {"region": "us-east"}`。未知的 key 一律拒絕。
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawDecompositionResult {
    #[serde(default)]
    path: Option<Vec<(String, Value)>>,
    #[serde(default)]
    fields: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    metrics: Option<Metrics>,
    #[serde(default)]
    value: Option<Number>,
}

impl RawDecompositionResult {
    /// 簡寫的單一指標以 `default_metric` 為名稱
    pub fn into_result(self, default_metric: &str) -> std::result::Result<DecompositionResult, String> {
        let path = match (self.path, self.fields) {
            (Some(_), Some(_)) => {
                return Err("decomposition result has both 'path' and 'fields'".to_string())
            }
            (Some(path), None) => path,
            (None, Some(fields)) => fields.into_iter().collect(),
            (None, None) => Vec::new(),
        };
        let metrics = match (self.metrics, self.value) {
            (Some(_), Some(_)) => {
                return Err("decomposition result has both 'metrics' and 'value'".to_string())
            }
            (Some(metrics), None) => metrics,
            (None, Some(value)) => Metrics::from([(default_metric.to_string(), value)]),
            (None, None) => Metrics::new(),
        };
        Ok(DecompositionResult { path, metrics })
    }
}

impl TryFrom<RawDecompositionResult> for DecompositionResult {
    type Error = String;

    fn try_from(raw: RawDecompositionResult) -> std::result::Result<Self, Self::Error> {
        raw.into_result(DEFAULT_METRIC)
    }
}

impl DecompositionResult {
    pub fn new(path: Vec<(String, Value)>, metrics: Metrics) -> Self {
        Self { path, metrics }
    }

    /// 單一指標的便利建構
    pub fn single(path: Vec<(String, Value)>, metric: &str, value: impl Into<Number>) -> Self {
        Self {
            path,
            metrics: Metrics::from([(metric.to_string(), value.into())]),
        }
    }
}

/// 巢狀的分解結果樹：第 d 層的 key 是第 d 個欄位的值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BreakdownTree {
    pub tree: Value,
}

impl BreakdownTree {
    pub fn new(tree: Value) -> Self {
        Self { tree }
    }
}

/// 進入扁平化 stage 的輸入單位
#[derive(Debug, Clone, PartialEq)]
pub enum Decomposition {
    Point(DecompositionResult),
    Tree(BreakdownTree),
}

impl Decomposition {
    pub fn kind(&self) -> &'static str {
        match self {
            Decomposition::Point(_) => "point",
            Decomposition::Tree(_) => "tree",
        }
    }
}

impl From<DecompositionResult> for Decomposition {
    fn from(point: DecompositionResult) -> Self {
        Decomposition::Point(point)
    }
}

impl From<BreakdownTree> for Decomposition {
    fn from(tree: BreakdownTree) -> Self {
        Decomposition::Tree(tree)
    }
}

/// 上游聚合器輸出的形狀：逐點的路徑，或是巢狀的樹
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecompositionShape {
    #[default]
    Points,
    Nested,
}

impl DecompositionShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecompositionShape::Points => "points",
            DecompositionShape::Nested => "nested",
        }
    }
}

impl std::str::FromStr for DecompositionShape {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "points" => Ok(DecompositionShape::Points),
            "nested" => Ok(DecompositionShape::Nested),
            other => Err(format!("unknown decomposition shape '{}' (expected points or nested)", other)),
        }
    }
}

/// 欄位值；`Unset` 表示該筆分解結果沒有指定此欄位
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Set(Value),
    Unset,
}

impl FieldValue {
    pub fn is_unset(&self) -> bool {
        matches!(self, FieldValue::Unset)
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            FieldValue::Set(value) => Some(value),
            FieldValue::Unset => None,
        }
    }

    /// 表格輸出用的字串表示
    pub fn to_cell(&self, unset_placeholder: &str) -> String {
        match self {
            FieldValue::Set(Value::String(s)) => s.clone(),
            FieldValue::Set(value) => value.to_string(),
            FieldValue::Unset => unset_placeholder.to_string(),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            FieldValue::Set(value) => value.serialize(serializer),
            FieldValue::Unset => serializer.serialize_none(),
        }
    }
}

/// 扁平化後的記錄：先是所有設定欄位（依設定順序），再是指標
#[derive(Debug, Clone, PartialEq)]
pub struct FlatRecord {
    fields: Vec<(String, FieldValue)>,
    metrics: Metrics,
}

impl FlatRecord {
    pub(crate) fn new(fields: Vec<(String, FieldValue)>, metrics: Metrics) -> Self {
        Self { fields, metrics }
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn metric(&self, name: &str) -> Option<&Number> {
        self.metrics.get(name)
    }

    pub fn fields(&self) -> &[(String, FieldValue)] {
        &self.fields
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn to_json(&self) -> Value {
        let mut object = serde_json::Map::new();
        for (name, value) in &self.fields {
            let json = value.as_value().cloned().unwrap_or(Value::Null);
            object.insert(name.clone(), json);
        }
        for (name, value) in &self.metrics {
            object.insert(name.clone(), Value::Number(value.clone()));
        }
        Value::Object(object)
    }
}

impl Serialize for FlatRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + self.metrics.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        for (name, value) in &self.metrics {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_with_metrics() {
        let point: DecompositionResult = serde_json::from_value(json!({
            "path": [["region", "us-east"], ["status", "500"]],
            "metrics": {"count": 3}
        }))
        .unwrap();

        assert_eq!(point.path.len(), 2);
        assert_eq!(point.path[0], ("region".to_string(), json!("us-east")));
        assert_eq!(point.metrics.get("count").unwrap().as_u64(), Some(3));
    }

    #[test]
    fn test_deserialize_single_value_shorthand() {
        let point: DecompositionResult = serde_json::from_value(json!({
            "path": [["region", "eu"]],
            "value": 42
        }))
        .unwrap();

        assert_eq!(point.metrics.len(), 1);
        assert_eq!(point.metrics.get(DEFAULT_METRIC).unwrap().as_u64(), Some(42));
    }

    #[test]
    fn test_deserialize_rejects_metrics_and_value() {
        let result: std::result::Result<DecompositionResult, _> =
            serde_json::from_value(json!({"path": [], "metrics": {"count": 1}, "value": 2}));
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_fields_object_as_path() {
        let point: DecompositionResult = serde_json::from_value(json!({
            "fields": {"region": "us-east", "status": "500"},
            "value": 42
        }))
        .unwrap();

        assert_eq!(point.path.len(), 2);
        assert!(point.path.contains(&("status".to_string(), json!("500"))));
    }

    #[test]
    fn test_deserialize_rejects_unknown_keys() {
        let misspelled: std::result::Result<DecompositionResult, _> =
            serde_json::from_value(json!({"pth": [["region", "eu"]], "value": 1}));
        assert!(misspelled.is_err());

        let both: std::result::Result<DecompositionResult, _> = serde_json::from_value(
            json!({"path": [["region", "eu"]], "fields": {"region": "eu"}, "value": 1}),
        );
        assert!(both.is_err());
    }

    #[test]
    fn test_flat_record_serializes_flat_with_null_for_unset() {
        let record = FlatRecord::new(
            vec![
                ("region".to_string(), FieldValue::Set(json!("us-east"))),
                ("status".to_string(), FieldValue::Unset),
            ],
            Metrics::from([("count".to_string(), Number::from(10))]),
        );

        let text = serde_json::to_string(&record).unwrap();
        assert_eq!(text, r#"{"region":"us-east","status":null,"count":10}"#);
        assert_eq!(record.to_json(), json!({"region": "us-east", "status": null, "count": 10}));
    }

    #[test]
    fn test_field_value_to_cell() {
        assert_eq!(FieldValue::Set(json!("500")).to_cell(""), "500");
        assert_eq!(FieldValue::Set(json!(500)).to_cell(""), "500");
        assert_eq!(FieldValue::Unset.to_cell("-"), "-");
    }
}
