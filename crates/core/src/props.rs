use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// 扁平的字符串键值属性集
///
/// 负载均衡算法的profile参数以 `<属性名>=<值>` 的形式配置，
/// 各算法按需读取并带默认值解析。解析失败时返回默认值由
/// 调用方决定是否视为配置错误（见各算法profile的校验逻辑）。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TypedProps(HashMap<String, String>);

impl TypedProps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|s| s.as_str())
    }

    /// 读取字符串属性，缺失时返回默认值
    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.0
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    /// 读取整数属性，缺失或无法解析时返回 `None`
    pub fn try_get_i64(&self, key: &str) -> Option<Result<i64, String>> {
        self.0.get(key).map(|v| {
            v.trim()
                .parse::<i64>()
                .map_err(|_| format!("属性 {key} 的值 '{v}' 不是有效整数"))
        })
    }

    /// 读取浮点属性，缺失或无法解析时返回 `None`
    pub fn try_get_f64(&self, key: &str) -> Option<Result<f64, String>> {
        self.0.get(key).map(|v| {
            v.trim()
                .parse::<f64>()
                .map_err(|_| format!("属性 {key} 的值 '{v}' 不是有效浮点数"))
        })
    }

    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        match self.try_get_i64(key) {
            Some(Ok(v)) => v,
            _ => default,
        }
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        match self.try_get_f64(key) {
            Some(Ok(v)) => v,
            _ => default,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn into_map(self) -> HashMap<String, String> {
        self.0
    }
}

impl From<HashMap<String, String>> for TypedProps {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TypedProps {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
