use serde_json::{Map, Value};
use tracing::{error, info};

use crate::collaborators::ChatCompletion;
use crate::error::RepaintError;
use crate::models::{FeatureMeta, TransformedMeta};

const EXTRACT_INSTRUCTION: &str = "Extract features of image from description. Write a json with fields:\n\
object - main objects of image (string)\n\
env - image environment description (string)\n\
type - a type of image (string \"photo\", \"painting\", \"art\", etc)\n\
style - a style of image\n\
interior - true if the main object is an interior without people (boolean)\n\
humans - true if image contains humans (boolean)\n\
face - true if the main object is a human and face is in focus (boolean)\n\
photo - true if the image is a photo (boolean)\n\
sketch - true if the image is a scribble, sketch or ink painting (boolean)\n\n\
Return only a JSON without any explanations.\n\n";

pub fn extraction_prompt(caption: &str) -> String {
    format!("{EXTRACT_INSTRUCTION}Description: {caption}")
}

pub fn transform_prompt(original: &FeatureMeta, style: &str) -> String {
    format!(
        "change image JSON meta to remake it to \"{style}\". Change type of image accordingly to new meta if needed. \
         Add additional string fields to JSON if needed. Return only a JSON without any explanations.\n{}",
        original.to_pretty_json()
    )
}

/// First balanced `{...}` block in `text`. Braces inside JSON strings (and
/// escaped quotes inside those) do not count towards nesting.
pub fn first_json_block(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(first_json_block(text)?) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Asks the chat collaborator for the structured feature record of a caption.
pub async fn extract_meta(chat: &dyn ChatCompletion, caption: &str) -> Result<FeatureMeta, RepaintError> {
    let text = chat.complete(&extraction_prompt(caption)).await?;
    if text.trim().is_empty() {
        return Err(RepaintError::MetaExtract("no response from the chat service".into()));
    }
    match parse_object(&text) {
        Some(map) => Ok(FeatureMeta(map)),
        None => {
            error!("❌ Cannot parse feature JSON from response: {}", text);
            Err(RepaintError::MetaExtract("try a bit later".into()))
        }
    }
}

/// Post-processing applied to whatever the transformer returned:
/// photos become "photography", input-describing flags are copied from the
/// original, then the prompt is assembled from the string fields.
pub fn finish_transform(original: &FeatureMeta, mut restyled: FeatureMeta, style: &str) -> TransformedMeta {
    if restyled.flag("photo") {
        restyled.set("type", Value::String("photography".into()));
    }
    for key in FeatureMeta::PRESERVED_FLAGS {
        match original.0.get(key) {
            Some(value) => restyled.set(key, value.clone()),
            None => {
                restyled.0.shift_remove(key);
            }
        }
    }
    let prompt = assemble_prompt(&restyled, style);
    TransformedMeta { meta: restyled, prompt }
}

pub fn assemble_prompt(meta: &FeatureMeta, style: &str) -> String {
    let mut parts: Vec<&str> = meta.string_values().collect();
    let suffix = format!("({style}):1.2");
    parts.push(&suffix);
    parts.join(", ")
}

/// Restyles the original meta for `style`. Never cached: every repaint asks again.
pub async fn transform_meta(chat: &dyn ChatCompletion, original: &FeatureMeta, style: &str) -> Result<TransformedMeta, RepaintError> {
    let text = chat.complete(&transform_prompt(original, style)).await?;
    if text.trim().is_empty() {
        return Err(RepaintError::MetaTransform("no response from the chat service".into()));
    }
    let restyled = parse_object(&text).map(FeatureMeta).ok_or_else(|| {
        error!("❌ Cannot parse restyled JSON from response: {}", text);
        RepaintError::MetaTransform("try a bit later".into())
    })?;
    let transformed = finish_transform(original, restyled, style);
    info!("🧩 Restyled meta for [{}]: {}", style, transformed.meta.to_pretty_json());
    Ok(transformed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn meta(value: Value) -> FeatureMeta {
        serde_json::from_value(value).unwrap()
    }

    struct Canned(&'static str);

    #[async_trait]
    impl ChatCompletion for Canned {
        async fn complete(&self, _prompt: &str) -> Result<String, RepaintError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn json_block_skips_surrounding_chatter() {
        let text = "Sure! Here it is:\n{\"object\": \"cat\", \"nested\": {\"a\": 1}}\nHope that helps {not json}";
        assert_eq!(first_json_block(text), Some("{\"object\": \"cat\", \"nested\": {\"a\": 1}}"));
    }

    #[test]
    fn json_block_ignores_braces_inside_strings() {
        let text = r#"{"env": "a room with a } sign", "q": "say \"{hi}\""} trailing }"#;
        assert_eq!(first_json_block(text), Some(r#"{"env": "a room with a } sign", "q": "say \"{hi}\""}"#));
    }

    #[test]
    fn json_block_absent_or_unbalanced() {
        assert_eq!(first_json_block("no structure here"), None);
        assert_eq!(first_json_block("{\"object\": \"cat\""), None);
        assert_eq!(first_json_block("} {"), None);
    }

    #[test]
    fn prompt_omits_booleans_and_keeps_order() {
        let m = meta(json!({"object": "cat", "type": "painting", "interior": false}));
        assert_eq!(assemble_prompt(&m, "Abstract"), "cat, painting, (Abstract):1.2");
    }

    #[test]
    fn preserved_flags_come_from_original() {
        let original = meta(json!({"object": "room", "interior": true, "sketch": false, "face": false}));
        let restyled = meta(json!({"object": "room", "interior": false, "sketch": true, "face": true, "humans": true}));
        let out = finish_transform(&original, restyled, "Fashion");
        assert_eq!(out.meta.0.get("interior"), Some(&json!(true)));
        assert_eq!(out.meta.0.get("sketch"), Some(&json!(false)));
        assert_eq!(out.meta.0.get("face"), Some(&json!(false)));
        assert_eq!(out.meta.0.get("humans"), Some(&json!(true)));
    }

    #[test]
    fn preserved_flag_missing_in_original_is_dropped() {
        let original = meta(json!({"object": "room"}));
        let restyled = meta(json!({"object": "room", "sketch": true}));
        let out = finish_transform(&original, restyled, "Abstract");
        assert!(out.meta.0.get("sketch").is_none());
    }

    #[test]
    fn photo_flag_forces_photography_type() {
        let original = meta(json!({"object": "dog"}));
        let restyled = meta(json!({"object": "dog", "type": "painting", "photo": true}));
        let out = finish_transform(&original, restyled, "Documentary");
        assert_eq!(out.meta.text("type"), Some("photography"));
        assert_eq!(out.prompt, "dog, photography, (Documentary):1.2");
    }

    #[test]
    fn photo_flag_false_keeps_returned_type() {
        let original = meta(json!({}));
        let restyled = meta(json!({"type": "ink drawing", "photo": false}));
        let out = finish_transform(&original, restyled, "Conceptual");
        assert_eq!(out.meta.text("type"), Some("ink drawing"));
    }

    #[test]
    fn extraction_prompt_embeds_caption() {
        let prompt = extraction_prompt("a cat on a sofa");
        assert!(prompt.starts_with("Extract features of image from description."));
        assert!(prompt.ends_with("Description: a cat on a sofa"));
    }

    #[tokio::test]
    async fn extract_parses_first_block() {
        let chat = Canned("Result: {\"object\": \"cat\", \"photo\": true}");
        let m = extract_meta(&chat, "cat").await.unwrap();
        assert_eq!(m.text("object"), Some("cat"));
        assert!(m.flag("photo"));
    }

    #[tokio::test]
    async fn extract_fails_on_empty_and_garbage() {
        assert!(matches!(extract_meta(&Canned("  "), "cat").await, Err(RepaintError::MetaExtract(_))));
        let err = extract_meta(&Canned("{object: cat}"), "cat").await.unwrap_err();
        assert!(err.to_string().contains("try a bit later"));
        assert!(matches!(extract_meta(&Canned("[1, 2]"), "cat").await, Err(RepaintError::MetaExtract(_))));
    }

    #[tokio::test]
    async fn transform_fails_without_structured_content() {
        let original = meta(json!({"object": "cat"}));
        let err = transform_meta(&Canned("I cannot do that"), &original, "Abstract").await.unwrap_err();
        assert!(matches!(err, RepaintError::MetaTransform(_)));
    }

    #[tokio::test]
    async fn transform_builds_prompt() {
        let original = meta(json!({"object": "cat", "interior": false, "sketch": false, "face": false}));
        let chat = Canned("{\"object\": \"cat\", \"type\": \"painting\", \"interior\": true, \"mood\": \"playful\"}");
        let out = transform_meta(&chat, &original, "Abstract").await.unwrap();
        assert_eq!(out.prompt, "cat, painting, playful, (Abstract):1.2");
        assert_eq!(out.meta.0.get("interior"), Some(&json!(false)));
    }
}
