use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// 服务端返回的文件 / 目录节点。
/// id 可能是字符串也可能是数字，这里统一成字符串。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveNode {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub parent: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub last_modified: Option<i64>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Dir,
    #[default]
    File,
}

impl DriveNode {
    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Dir
    }
}

/// 所有接口共用的 `{error, data}` 响应外壳。
#[derive(Debug, Deserialize)]
pub(crate) struct ApiEnvelope<T> {
    #[serde(default)]
    pub error: Value,
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// 按 JSON 的真假规则判断 error；为真时返回可读的错误描述。
    pub fn reported_error(&self) -> Option<String> {
        if !is_truthy(&self.error) {
            return None;
        }
        Some(match &self.error {
            Value::String(message) => message.clone(),
            other => other.to_string(),
        })
    }
}

pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub(crate) fn id_from_value(value: Value) -> Result<String, String> {
    match value {
        Value::String(id) if !id.is_empty() => Ok(id),
        Value::Number(id) => Ok(id.to_string()),
        other => Err(format!("invalid node id: {other}")),
    }
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    id_from_value(Value::deserialize(deserializer)?).map_err(D::Error::custom)
}

fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => id_from_value(value).map(Some).map_err(D::Error::custom),
    }
}
