//! Toolset Skills — a read-only context block built from an attached
//! toolset's enabled `agentskills-v1` bundles (spec §4.5.6). Skill text is
//! appended to the system prompt but MUST NOT appear in any event payload;
//! only the bundle count is ever emitted.

use base64::Engine;
use serde_json::Value;

#[derive(Debug, Clone)]
pub enum SkillMd {
    Utf8(String),
    Base64(String),
}

impl SkillMd {
    fn decode(&self) -> Option<String> {
        match self {
            SkillMd::Utf8(s) => Some(s.clone()),
            SkillMd::Base64(b) => base64::engine::general_purpose::STANDARD.decode(b).ok().and_then(|bytes| String::from_utf8(bytes).ok()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SkillBundle {
    pub id: String,
    pub enabled: bool,
    pub skill_md: SkillMd,
}

#[derive(Debug, Clone)]
pub struct Toolset {
    pub id: String,
    pub bundles: Vec<SkillBundle>,
}

impl Toolset {
    pub fn from_value(v: &Value) -> Option<Self> {
        let id = v.get("id").and_then(Value::as_str)?.to_string();
        let bundles = v
            .get("bundles")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(parse_bundle).collect())
            .unwrap_or_default();
        Some(Self { id, bundles })
    }
}

fn parse_bundle(v: &Value) -> Option<SkillBundle> {
    let id = v.get("id").and_then(Value::as_str)?.to_string();
    let enabled = v.get("enabled").and_then(Value::as_bool).unwrap_or(true);
    let skill_md = if let Some(utf8) = v.get("skillMd").and_then(|m| m.get("utf8")).and_then(Value::as_str) {
        SkillMd::Utf8(utf8.to_string())
    } else {
        let base64 = v.get("skillMd").and_then(|m| m.get("base64")).and_then(Value::as_str)?.to_string();
        SkillMd::Base64(base64)
    };
    Some(SkillBundle { id, enabled, skill_md })
}

#[derive(Debug, Clone)]
pub struct ToolsetSkillsConfig {
    pub max_bundles: usize,
    pub max_chars_per_bundle: usize,
    pub max_total_chars: usize,
}

impl Default for ToolsetSkillsConfig {
    fn default() -> Self {
        Self { max_bundles: 8, max_chars_per_bundle: 20_000, max_total_chars: 80_000 }
    }
}

/// Builds the read-only context block plus the bundle count actually
/// included, or `None` if the toolset has no enabled bundles.
pub fn build_context_block(toolset: &Toolset, cfg: &ToolsetSkillsConfig) -> Option<(String, usize)> {
    let mut block = String::from("# Toolset Skills (read-only context)\n");
    let mut total_chars = block.len();
    let mut count = 0;

    for bundle in toolset.bundles.iter().filter(|b| b.enabled).take(cfg.max_bundles) {
        let Some(text) = bundle.skill_md.decode() else { continue };
        let truncated: String = text.chars().take(cfg.max_chars_per_bundle).collect();
        if total_chars + truncated.len() > cfg.max_total_chars {
            break;
        }
        block.push_str(&format!("\n## {}\n{}\n", bundle.id, truncated));
        total_chars += truncated.len();
        count += 1;
    }

    if count == 0 {
        None
    } else {
        Some((block, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn skips_disabled_bundles() {
        let toolset = Toolset {
            id: "t1".into(),
            bundles: vec![
                SkillBundle { id: "a".into(), enabled: false, skill_md: SkillMd::Utf8("ignored".into()) },
                SkillBundle { id: "b".into(), enabled: true, skill_md: SkillMd::Utf8("keep me".into()) },
            ],
        };
        let (block, count) = build_context_block(&toolset, &ToolsetSkillsConfig::default()).unwrap();
        assert_eq!(count, 1);
        assert!(block.contains("keep me"));
        assert!(!block.contains("ignored"));
    }

    #[test]
    fn decodes_base64_skill_md() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("hello skill");
        let toolset = Toolset { id: "t1".into(), bundles: vec![SkillBundle { id: "a".into(), enabled: true, skill_md: SkillMd::Base64(encoded) }] };
        let (block, _) = build_context_block(&toolset, &ToolsetSkillsConfig::default()).unwrap();
        assert!(block.contains("hello skill"));
    }

    #[test]
    fn respects_max_bundles_limit() {
        let bundles = (0..10).map(|i| SkillBundle { id: format!("b{i}"), enabled: true, skill_md: SkillMd::Utf8("x".into()) }).collect();
        let toolset = Toolset { id: "t1".into(), bundles };
        let cfg = ToolsetSkillsConfig { max_bundles: 3, ..Default::default() };
        let (_, count) = build_context_block(&toolset, &cfg).unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn no_bundles_returns_none() {
        let toolset = Toolset::from_value(&json!({"id": "t1", "bundles": []})).unwrap();
        assert!(build_context_block(&toolset, &ToolsetSkillsConfig::default()).is_none());
    }
}
