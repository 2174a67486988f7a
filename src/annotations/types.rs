//! Annotation domain types and the strict decoder for overlay input.
//!
//! The HTTP body is untyped JSON from a script running in an arbitrary
//! page; nothing becomes a domain object until every guard has passed.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BridgeError, Result};

/// Annotation text cap (bytes).
pub const MAX_TEXT_BYTES: usize = 10 * 1024;
/// Largest accepted viewport dimension.
pub const MAX_VIEWPORT_DIM: f64 = 100_000.0;
/// Store-wide annotation cap; creation past this fails, nothing is evicted.
pub const MAX_ANNOTATIONS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorConfidence {
    Stable,
    Fragile,
}

impl SelectorConfidence {
    /// Anything that is not literally `"stable"` is fragile.
    fn from_raw(raw: Option<&str>) -> Self {
        match raw {
            Some("stable") => SelectorConfidence::Stable,
            _ => SelectorConfidence::Fragile,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationStatus {
    Open,
    Resolved,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ViewportSize {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    /// Degenerate rects (no area) are not worth a screenshot.
    pub fn is_capturable(&self) -> bool {
        self.width > 0.0 && self.height > 0.0 && self.width.is_finite() && self.height.is_finite()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentInfo {
    pub component: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Per-element context for multi-element annotations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDescriptor {
    pub selector: String,
    #[serde(default)]
    pub selector_confidence: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rect: Option<Rect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub react_source: Option<ComponentInfo>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub id: String,
    pub url: String,
    pub selector: String,
    pub selector_confidence: SelectorConfidence,
    pub text: String,
    pub status: AnnotationStatus,
    pub viewport: ViewportSize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_info: Option<ComponentInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_data_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elements: Option<Vec<ElementDescriptor>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor_point: Option<Point>,
    pub created_at: String,
    pub updated_at: String,
}

/// Raw creation body as posted by the overlay.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAnnotationBody {
    pub url: String,
    pub selector: String,
    #[serde(default)]
    pub selector_confidence: Option<String>,
    pub text: String,
    pub viewport: RawViewport,
    #[serde(default)]
    pub react_source: Option<ComponentInfo>,
    #[serde(default)]
    pub element_rect: Option<Rect>,
    #[serde(default)]
    pub elements: Option<Vec<ElementDescriptor>>,
    #[serde(default)]
    pub anchor_point: Option<Point>,
}

#[derive(Debug, Deserialize)]
pub struct RawViewport {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Deserialize)]
pub struct PatchAnnotationBody {
    #[serde(default)]
    pub text: Option<String>,
}

pub fn iso_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn validate_text(text: &str) -> Result<()> {
    if text.len() > MAX_TEXT_BYTES {
        return Err(BridgeError::BadRequest(format!(
            "Text exceeds {MAX_TEXT_BYTES} bytes"
        )));
    }
    Ok(())
}

fn validate_dimension(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 || value > MAX_VIEWPORT_DIM {
        return Err(BridgeError::BadRequest(format!(
            "Invalid viewport {name}: {value}"
        )));
    }
    Ok(())
}

impl CreateAnnotationBody {
    /// Run every guard, then build the domain object. The element rect is
    /// returned separately — it drives screenshot capture, it is not part
    /// of the persisted annotation.
    pub fn into_annotation(self) -> Result<(Annotation, Option<Rect>)> {
        validate_text(&self.text)?;
        validate_dimension("width", self.viewport.width)?;
        validate_dimension("height", self.viewport.height)?;

        let now = iso_now();
        let annotation = Annotation {
            id: Uuid::new_v4().to_string(),
            url: self.url,
            selector: self.selector,
            selector_confidence: SelectorConfidence::from_raw(
                self.selector_confidence.as_deref(),
            ),
            text: self.text,
            status: AnnotationStatus::Open,
            viewport: ViewportSize {
                width: self.viewport.width,
                height: self.viewport.height,
            },
            component_info: self.react_source,
            screenshot_data_url: None,
            elements: self.elements,
            anchor_point: self.anchor_point,
            created_at: now.clone(),
            updated_at: now,
        };
        Ok((annotation, self.element_rect))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(v: serde_json::Value) -> CreateAnnotationBody {
        serde_json::from_value(v).expect("deserializable body")
    }

    fn minimal() -> serde_json::Value {
        json!({
            "url": "http://localhost:3000/",
            "selector": "#app",
            "selectorConfidence": "stable",
            "text": "button is misaligned",
            "viewport": {"width": 800, "height": 600}
        })
    }

    #[test]
    fn minimal_body_builds_an_open_annotation() {
        let (ann, rect) = body(minimal()).into_annotation().unwrap();
        assert_eq!(ann.status, AnnotationStatus::Open);
        assert_eq!(ann.selector_confidence, SelectorConfidence::Stable);
        assert_eq!(ann.created_at, ann.updated_at);
        assert!(rect.is_none());
        assert!(Uuid::parse_str(&ann.id).is_ok());
    }

    #[test]
    fn unknown_confidence_maps_to_fragile() {
        let mut v = minimal();
        v["selectorConfidence"] = json!("very-sure");
        let (ann, _) = body(v).into_annotation().unwrap();
        assert_eq!(ann.selector_confidence, SelectorConfidence::Fragile);

        let mut v = minimal();
        v.as_object_mut().unwrap().remove("selectorConfidence");
        let (ann, _) = body(v).into_annotation().unwrap();
        assert_eq!(ann.selector_confidence, SelectorConfidence::Fragile);
    }

    #[test]
    fn oversized_text_is_rejected_with_explicit_message() {
        let mut v = minimal();
        v["text"] = json!("x".repeat(MAX_TEXT_BYTES + 1));
        let err = body(v).into_annotation().unwrap_err();
        assert!(err.to_string().contains("Text exceeds"));
    }

    #[test]
    fn text_at_the_limit_is_accepted() {
        let mut v = minimal();
        v["text"] = json!("x".repeat(MAX_TEXT_BYTES));
        assert!(body(v).into_annotation().is_ok());
    }

    #[test]
    fn negative_and_oversized_viewports_are_rejected() {
        for (w, h) in [(-1.0, 600.0), (200_000.0, 600.0), (800.0, -0.5), (800.0, 1e9)] {
            let mut v = minimal();
            v["viewport"] = json!({"width": w, "height": h});
            assert!(body(v).into_annotation().is_err(), "{w}x{h}");
        }
    }

    #[test]
    fn multi_element_form_is_preserved() {
        let mut v = minimal();
        v["elements"] = json!([
            {"selector": ".a", "selectorConfidence": "stable",
             "rect": {"x": 0, "y": 0, "width": 10, "height": 10}},
            {"selector": ".b"}
        ]);
        v["anchorPoint"] = json!({"x": 50, "y": 50});
        let (ann, _) = body(v).into_annotation().unwrap();
        let elements = ann.elements.unwrap();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].selector, ".a");
        let anchor = ann.anchor_point.unwrap();
        assert_eq!((anchor.x, anchor.y), (50.0, 50.0));
    }

    #[test]
    fn element_rect_is_surfaced_for_capture() {
        let mut v = minimal();
        v["elementRect"] = json!({"x": 1, "y": 2, "width": 30, "height": 40});
        let (_, rect) = body(v).into_annotation().unwrap();
        assert!(rect.unwrap().is_capturable());
    }

    #[test]
    fn degenerate_rects_are_not_capturable() {
        let zero = Rect { x: 0.0, y: 0.0, width: 0.0, height: 10.0 };
        assert!(!zero.is_capturable());
    }

    #[test]
    fn serialized_annotation_uses_wire_field_names() {
        let (ann, _) = body(minimal()).into_annotation().unwrap();
        let value = serde_json::to_value(&ann).unwrap();
        assert!(value.get("selectorConfidence").is_some());
        assert!(value.get("createdAt").is_some());
        assert_eq!(value["status"], "open");
        // Absent optionals stay off the wire entirely.
        assert!(value.get("screenshotDataUrl").is_none());
    }
}
