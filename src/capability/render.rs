//! 报告渲染：render(template_id, data) -> String
//!
//! minijinja 模板，纯函数、确定性、无外部调用。未知模板或渲染失败时输出按键排序的 `key: value` 清单。

use std::collections::BTreeMap;

use minijinja::Environment;

const FINAL_REPORT: &str = include_str!("templates/final_report.md");
const SITUATION_REPORT: &str = include_str!("templates/situation_report.md");
const TECHNICAL_DETAIL: &str = include_str!("templates/technical_detail.md");

pub type RenderData = BTreeMap<String, String>;

/// 模板引擎封装
pub struct ReportRenderer {
    env: Environment<'static>,
}

impl Default for ReportRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        for (id, source) in [
            ("final_report", FINAL_REPORT),
            ("situation_report", SITUATION_REPORT),
            ("technical_detail", TECHNICAL_DETAIL),
        ] {
            if let Err(e) = env.add_template(id, source) {
                tracing::warn!(template = id, error = %e, "template rejected, falling back to listing");
            }
        }
        Self { env }
    }

    pub fn render(&self, template_id: &str, data: &RenderData) -> String {
        let rendered = self
            .env
            .get_template(template_id)
            .and_then(|t| t.render(data));
        match rendered {
            Ok(text) => tidy(&text),
            Err(e) => {
                if self.env.get_template(template_id).is_ok() {
                    tracing::warn!(template = template_id, error = %e, "render failed");
                }
                listing(template_id, data)
            }
        }
    }
}

/// 压缩连续空行
fn tidy(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() && out.last().map(|l| l.is_empty()).unwrap_or(true) {
            continue;
        }
        out.push(line);
    }
    while out.last().map(|l| l.is_empty()).unwrap_or(false) {
        out.pop();
    }
    out.join("\n")
}

fn listing(template_id: &str, data: &RenderData) -> String {
    let mut lines = vec![format!("[{template_id}]")];
    lines.extend(data.iter().map(|(k, v)| format!("{k}: {v}")));
    lines.join("\n")
}

/// 便捷构造：render_data([("answer", text), ...])
pub fn render_data<K, V, I>(pairs: I) -> RenderData
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
