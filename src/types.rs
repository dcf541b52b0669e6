use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::coords;

/// Maximum planner round trips per search before the loop gives up.
pub const MAX_TURNS_PER_SEARCH: usize = 15;
pub const VIEWPORT_WIDTH: u32 = 1440;
pub const VIEWPORT_HEIGHT: u32 = 900;
pub const SEED_URL: &str = "https://www.google.com";
pub const SCROLL_MAGNITUDE: i64 = 500;

/// Fixed browser viewport for one search session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: VIEWPORT_WIDTH,
            height: VIEWPORT_HEIGHT,
        }
    }
}

impl Viewport {
    /// Map a planner coordinate pair on the 0..=1000 grid to viewport pixels.
    /// Out-of-range inputs are clamped onto the grid first, and the far edge
    /// lands on the last pixel row/column.
    pub fn point(&self, x: i64, y: i64) -> (i64, i64) {
        (
            on_screen(coords::clamp(x), self.width),
            on_screen(coords::clamp(y), self.height),
        )
    }
}

fn on_screen(coord: i64, dimension: u32) -> i64 {
    let last = i64::from(dimension.saturating_sub(1));
    coords::denormalize(coord, dimension).min(last)
}

/// A function call exactly as the planner sent it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
    /// Opaque signature some models attach to calls; echoed back verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl ActionCall {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
            signature: None,
        }
    }

    /// The planner's explanation when it wants a human to confirm this call
    /// before it runs.
    pub fn confirmation_request(&self) -> Option<String> {
        let decision = self.args.get("safety_decision")?;
        if decision.get("decision")?.as_str()? != "require_confirmation" {
            return None;
        }
        Some(
            decision
                .get("explanation")
                .and_then(Value::as_str)
                .unwrap_or("no explanation given")
                .to_string(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

/// A decoded planner instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    OpenBrowser,
    ClickAt { x: i64, y: i64 },
    TypeTextAt {
        x: i64,
        y: i64,
        text: String,
        press_enter: bool,
    },
    ScrollDocument { direction: Option<ScrollDirection> },
    Navigate { url: String },
    WaitFiveSeconds,
    GoBack,
    /// Anything the executor does not know how to perform.
    Unsupported { name: String },
}

#[derive(Deserialize)]
struct PointArgs {
    #[serde(deserialize_with = "grid_coord")]
    x: i64,
    #[serde(deserialize_with = "grid_coord")]
    y: i64,
}

#[derive(Deserialize)]
struct TypeArgs {
    #[serde(deserialize_with = "grid_coord")]
    x: i64,
    #[serde(deserialize_with = "grid_coord")]
    y: i64,
    text: String,
    #[serde(default = "default_press_enter")]
    press_enter: bool,
}

fn default_press_enter() -> bool {
    true
}

/// Grid coordinates may arrive as integers or floats; floats are floored.
fn grid_coord<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() {
        return Err(serde::de::Error::custom("coordinate is not a finite number"));
    }
    Ok(value.floor() as i64)
}

#[derive(Deserialize)]
struct ScrollArgs {
    direction: String,
}

#[derive(Deserialize)]
struct NavigateArgs {
    url: String,
}

impl Action {
    /// Decode a raw call. Unknown names are not an error; malformed
    /// arguments for a known name are.
    pub fn decode(call: &ActionCall) -> Result<Self, serde_json::Error> {
        let args = || {
            if call.args.is_null() {
                Value::Object(Default::default())
            } else {
                call.args.clone()
            }
        };
        let action = match call.name.as_str() {
            "open_web_browser" => Action::OpenBrowser,
            "click_at" => {
                let PointArgs { x, y } = serde_json::from_value(args())?;
                Action::ClickAt { x, y }
            }
            "type_text_at" => {
                let a: TypeArgs = serde_json::from_value(args())?;
                Action::TypeTextAt {
                    x: a.x,
                    y: a.y,
                    text: a.text,
                    press_enter: a.press_enter,
                }
            }
            "scroll_document" => {
                let ScrollArgs { direction } = serde_json::from_value(args())?;
                let direction =
                    serde_json::from_value(Value::String(direction.to_lowercase())).ok();
                Action::ScrollDocument { direction }
            }
            "navigate" => {
                let NavigateArgs { url } = serde_json::from_value(args())?;
                Action::Navigate { url }
            }
            "wait_5_seconds" => Action::WaitFiveSeconds,
            "go_back" => Action::GoBack,
            other => Action::Unsupported {
                name: other.to_string(),
            },
        };
        Ok(action)
    }
}

/// Outcome of one executed action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionResult {
    Ok,
    Error { message: String },
}

impl ActionResult {
    pub fn error(message: impl fmt::Display) -> Self {
        ActionResult::Error {
            message: message.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ActionResult::Ok)
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ActionResult::Ok => None,
            ActionResult::Error { message } => Some(message),
        }
    }
}

/// PNG bytes shared by every observation of one batch.
pub type Screenshot = Arc<[u8]>;

/// Environment feedback for a single executed action.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub action: String,
    pub result: ActionResult,
    pub url: String,
    pub screenshot: Screenshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Goal prompt and environment feedback.
    User,
    /// Planner replies.
    Model,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    Image { mime_type: String, data: Screenshot },
    Call(ActionCall),
    Observation(Observation),
}

/// One entry of the planner conversation log.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Role::User,
            parts,
        }
    }

    pub fn model(parts: Vec<Part>) -> Self {
        Self {
            role: Role::Model,
            parts,
        }
    }

    pub fn calls(&self) -> Vec<ActionCall> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Call(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    /// All text parts joined by newlines.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(t) if !t.trim().is_empty() => Some(t.trim()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Structured car listing. Never populated yet; the planner's raw text is
/// handed back as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarRecommendation {
    pub make: String,
    pub model: String,
    pub year: u16,
    pub price: f64,
    pub condition: String,
    pub description: String,
}

/// What a car search hands back to its caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CarSearchResult {
    pub success: bool,
    pub raw_text: String,
    pub recommendations: Vec<CarRecommendation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CarSearchResult {
    pub fn found(raw_text: String) -> Self {
        Self {
            success: true,
            raw_text,
            recommendations: Vec::new(),
            error: None,
        }
    }

    pub fn failed(message: impl fmt::Display) -> Self {
        Self {
            success: false,
            raw_text: String::new(),
            recommendations: Vec::new(),
            error: Some(message.to_string()),
        }
    }
}

/// Progress events published while a search runs.
#[derive(Clone, Debug, PartialEq)]
pub enum AgentEvent {
    Thinking { turn: usize },
    Step { number: usize, description: String },
    StepError { message: String },
    TaskComplete { summary: String },
    TaskError { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_known_actions() {
        let call = ActionCall::new("click_at", json!({"x": 500, "y": 250}));
        assert_eq!(Action::decode(&call).unwrap(), Action::ClickAt { x: 500, y: 250 });

        let call = ActionCall::new(
            "type_text_at",
            json!({"x": 10, "y": 20, "text": "toyota camry"}),
        );
        assert_eq!(
            Action::decode(&call).unwrap(),
            Action::TypeTextAt {
                x: 10,
                y: 20,
                text: "toyota camry".into(),
                press_enter: true,
            }
        );

        let call = ActionCall::new("wait_5_seconds", Value::Null);
        assert_eq!(Action::decode(&call).unwrap(), Action::WaitFiveSeconds);
    }

    #[test]
    fn unknown_name_is_unsupported_not_error() {
        let call = ActionCall::new("drag_and_drop", json!({"x": 1}));
        assert_eq!(
            Action::decode(&call).unwrap(),
            Action::Unsupported {
                name: "drag_and_drop".into()
            }
        );
    }

    #[test]
    fn malformed_args_are_an_error() {
        let call = ActionCall::new("navigate", json!({"href": "https://example.com"}));
        assert!(Action::decode(&call).is_err());
    }

    #[test]
    fn odd_scroll_direction_decodes_to_none() {
        let call = ActionCall::new("scroll_document", json!({"direction": "sideways"}));
        assert_eq!(
            Action::decode(&call).unwrap(),
            Action::ScrollDocument { direction: None }
        );
        let call = ActionCall::new("scroll_document", json!({"direction": "DOWN"}));
        assert_eq!(
            Action::decode(&call).unwrap(),
            Action::ScrollDocument {
                direction: Some(ScrollDirection::Down)
            }
        );
    }

    #[test]
    fn turn_text_skips_blank_parts() {
        let turn = Turn::model(vec![
            Part::Text("  ".into()),
            Part::Text("Found 4 Toyota options".into()),
            Part::Call(ActionCall::new("go_back", Value::Null)),
        ]);
        assert_eq!(turn.text(), "Found 4 Toyota options");
        assert_eq!(turn.calls().len(), 1);
    }

    #[test]
    fn viewport_point_clamps_to_grid() {
        let vp = Viewport::default();
        assert_eq!(vp.point(500, 500), (720, 450));
        assert_eq!(vp.point(-20, 1200), (0, 899));
        assert_eq!(vp.point(1000, 1000), (1439, 899));
    }

    #[test]
    fn float_coordinates_are_floored() {
        let call = ActionCall::new("click_at", json!({"x": 512.7, "y": 500.0}));
        assert_eq!(Action::decode(&call).unwrap(), Action::ClickAt { x: 512, y: 500 });

        let call = ActionCall::new("type_text_at", json!({"x": 10.2, "y": 20.9, "text": "rav4"}));
        let Action::TypeTextAt { x, y, .. } = Action::decode(&call).unwrap() else {
            panic!("expected type_text_at");
        };
        assert_eq!((x, y), (10, 20));

        let call = ActionCall::new("click_at", json!({"x": "left", "y": 5}));
        assert!(Action::decode(&call).is_err());
    }

    #[test]
    fn detects_confirmation_requests() {
        let call = ActionCall::new(
            "click_at",
            json!({
                "x": 10,
                "y": 10,
                "safety_decision": {
                    "decision": "require_confirmation",
                    "explanation": "Accepting cookies"
                }
            }),
        );
        assert_eq!(call.confirmation_request().as_deref(), Some("Accepting cookies"));

        let call = ActionCall::new(
            "click_at",
            json!({"x": 10, "y": 10, "safety_decision": {"decision": "regular"}}),
        );
        assert_eq!(call.confirmation_request(), None);
        assert_eq!(ActionCall::new("go_back", Value::Null).confirmation_request(), None);
    }
}
