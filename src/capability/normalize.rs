//! 模型输出归一化：所有结构化解析的唯一入口
//!
//! 三级降级：严格 JSON 解析 -> 启发式文本扫描 -> 调用方的确定性兜底。
//! 列表字段容忍裸标量（自动包成单元素列表），分数字段容忍字符串、百分比与 0-10 / 0-100 刻度。

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::core::CapabilityError;

/// 从文本中取出 JSON：```json 围栏优先，其次第一个 { / [ 到最后一个 } / ]
pub fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        let body = rest.find("```").map(|end| &rest[..end]).unwrap_or(rest);
        return Some(body.trim());
    }
    let object = trimmed
        .find('{')
        .zip(trimmed.rfind('}'))
        .filter(|(s, e)| s < e);
    let array = trimmed
        .find('[')
        .zip(trimmed.rfind(']'))
        .filter(|(s, e)| s < e);
    let (start, end) = match (object, array) {
        (Some(o), Some(a)) => {
            if a.0 < o.0 {
                a
            } else {
                o
            }
        }
        (Some(o), None) => o,
        (None, Some(a)) => a,
        (None, None) => return None,
    };
    Some(&trimmed[start..=end])
}

/// 严格解析：提取 JSON 并反序列化为 T
pub fn normalize<T: DeserializeOwned>(raw: &str) -> Result<T, CapabilityError> {
    let json = extract_json(raw)
        .ok_or_else(|| CapabilityError::Malformed(format!("no JSON found in: {}", preview(raw))))?;
    serde_json::from_str(json).map_err(|e| CapabilityError::Malformed(format!("{e}: {}", preview(json))))
}

/// 解析为 serde_json::Value（用于形状不固定的输出，如工具调用）
pub fn normalize_value(raw: &str) -> Result<Value, CapabilityError> {
    normalize::<Value>(raw)
}

fn preview(s: &str) -> String {
    let s = s.trim();
    if s.chars().count() > 120 {
        format!("{}...", s.chars().take(120).collect::<String>())
    } else {
        s.to_string()
    }
}

/// 任意值转为字符串列表：null -> []，标量 -> [标量]，数组逐项转换
pub fn coerce_list(v: &Value) -> Vec<String> {
    match v {
        Value::Null => Vec::new(),
        Value::String(s) if s.trim().is_empty() => Vec::new(),
        Value::Array(items) => items.iter().flat_map(coerce_list).collect(),
        other => vec![coerce_string(other)],
    }
}

pub fn coerce_string(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .map(coerce_string)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("; "),
        other => other.to_string(),
    }
}

/// 把 0-1、0-10、0-100、百分比、"8/10" 统一为 [0, 1]
pub fn coerce_score(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64().map(scale_score),
        Value::String(s) => parse_score_text(s),
        Value::Bool(true) => Some(1.0),
        Value::Bool(false) => Some(0.0),
        _ => None,
    }
}

fn parse_score_text(s: &str) -> Option<f64> {
    let s = s.trim();
    if let Some(pct) = s.strip_suffix('%') {
        return pct.trim().parse::<f64>().ok().map(|v| clamp01(v / 100.0));
    }
    if let Some((a, b)) = s.split_once('/') {
        let a: f64 = a.trim().parse().ok()?;
        let b: f64 = b.trim().parse().ok()?;
        if b > 0.0 {
            return Some(clamp01(a / b));
        }
        return None;
    }
    s.parse::<f64>().ok().map(scale_score)
}

fn scale_score(v: f64) -> f64 {
    if v.is_nan() {
        return 0.0;
    }
    if v > 1.0 && v <= 10.0 {
        clamp01(v / 10.0)
    } else if v > 10.0 {
        clamp01(v / 100.0)
    } else {
        clamp01(v)
    }
}

fn clamp01(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// serde: 列表字段容忍裸标量
pub fn one_or_many<'de, D>(d: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(d)?;
    Ok(coerce_list(&v))
}

/// serde: 分数字段容忍字符串与其他刻度；无法识别时为 None
pub fn lenient_score<'de, D>(d: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(d)?;
    Ok(coerce_score(&v))
}

/// serde: 字符串字段容忍数字、列表等
pub fn lenient_string<'de, D>(d: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(d)?;
    Ok(coerce_string(&v))
}

/// 启发式：在自由文本中找 "score: 0.7" / "satisfaction 8/10" / "quality = 75%"
pub fn scan_score(text: &str) -> Option<f64> {
    let re = regex::Regex::new(
        r"(?i)(?:score|satisfaction|quality|rating)[^0-9\n]{0,20}([0-9]+(?:\.[0-9]+)?)\s*(%|/\s*[0-9]+)?",
    )
    .ok()?;
    let caps = re.captures(text)?;
    let number = caps.get(1)?.as_str();
    match caps.get(2).map(|m| m.as_str().replace(' ', "")) {
        Some(suffix) if suffix == "%" => parse_score_text(&format!("{number}%")),
        Some(suffix) => parse_score_text(&format!("{number}{suffix}")),
        None => parse_score_text(number),
    }
}

/// 启发式：取出以 "- " / "* " / "1. " 开头的行
pub fn scan_bullets(text: &str) -> Vec<String> {
    let numbered = regex::Regex::new(r"^\d+[.)]\s+").ok();
    text.lines()
        .filter_map(|line| {
            let l = line.trim();
            if let Some(rest) = l.strip_prefix("- ").or_else(|| l.strip_prefix("* ")) {
                return Some(rest.trim().to_string());
            }
            let re = numbered.as_ref()?;
            re.find(l).map(|m| l[m.end()..].trim().to_string())
        })
        .filter(|s| !s.is_empty())
        .collect()
}

/// 启发式：取出 "key: value" 行的值（不区分大小写）
pub fn scan_field(text: &str, key: &str) -> Option<String> {
    let key = key.to_lowercase();
    text.lines().find_map(|line| {
        let (k, v) = line.split_once(':')?;
        let k = k.trim().trim_matches(|c| c == '*' || c == '"' || c == '-').trim();
        if k.to_lowercase() == key && !v.trim().is_empty() {
            Some(v.trim().trim_matches('"').trim_end_matches(',').trim().to_string())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, Debug)]
    struct Draft {
        #[serde(default, deserialize_with = "one_or_many")]
        missing: Vec<String>,
        #[serde(default, deserialize_with = "lenient_score")]
        score: Option<f64>,
        #[serde(default, deserialize_with = "lenient_string")]
        reasoning: String,
    }

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(extract_json("```json\n{\"a\":1}\n```"), Some("{\"a\":1}"));
        assert_eq!(extract_json("Sure! {\"a\":1} done"), Some("{\"a\":1}"));
        assert_eq!(extract_json("[1, 2]"), Some("[1, 2]"));
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn test_scalar_list_is_coerced() {
        let d: Draft = normalize(r#"{"missing": "error handling", "score": "0.6"}"#).unwrap();
        assert_eq!(d.missing, vec!["error handling".to_string()]);
        assert_eq!(d.score, Some(0.6));
        let d: Draft = normalize(r#"{"missing": null, "score": 8, "reasoning": ["a", "b"]}"#).unwrap();
        assert!(d.missing.is_empty());
        assert_eq!(d.score, Some(0.8));
        assert_eq!(d.reasoning, "a; b");
    }

    #[test]
    fn test_garbage_is_malformed() {
        let r: Result<Draft, _> = normalize("lorem ipsum");
        assert!(matches!(r, Err(CapabilityError::Malformed(_))));
        let r: Result<Draft, _> = normalize("{not json}");
        assert!(matches!(r, Err(CapabilityError::Malformed(_))));
    }

    #[test]
    fn test_score_scales() {
        assert_eq!(coerce_score(&serde_json::json!(0.9)), Some(0.9));
        assert_eq!(coerce_score(&serde_json::json!(75)), Some(0.75));
        assert_eq!(coerce_score(&serde_json::json!("80%")), Some(0.8));
        assert_eq!(coerce_score(&serde_json::json!("7/10")), Some(0.7));
        assert_eq!(coerce_score(&serde_json::json!(-3)), Some(0.0));
        assert_eq!(coerce_score(&serde_json::json!("high")), None);
    }

    #[test]
    fn test_scan_heuristics() {
        assert_eq!(scan_score("Overall score: 0.7, decent"), Some(0.7));
        assert_eq!(scan_score("Satisfaction is 8/10"), Some(0.8));
        assert_eq!(scan_score("quality = 45%"), Some(0.45));
        assert_eq!(scan_score("nothing here"), None);

        let text = "Missing:\n- tests\n* docs\n2. examples\nplain";
        assert_eq!(scan_bullets(text), vec!["tests", "docs", "examples"]);
        assert_eq!(
            scan_field("Recommended_Action: replan\n", "recommended_action"),
            Some("replan".to_string())
        );
    }
}
