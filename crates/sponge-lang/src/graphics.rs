//! Graphics command records emitted by the `turtle` and `canvas` modules.
//!
//! Both serialize to the `{"action": ...}` object shape consumed by
//! graphics front ends, so a stream of commands can be logged or shipped
//! across a process boundary unchanged.

use serde::{Deserialize, Serialize};

/// One turtle operation. Angles are degrees; distances are canvas units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum TurtleCommand {
    Forward { value: f64 },
    Backward { value: f64 },
    Left { value: f64 },
    Right { value: f64 },
    Setheading { value: f64 },
    Setposition { x: f64, y: f64 },
    Penup,
    Pendown,
    Pensize { value: f64 },
    Pencolor { value: String },
    Fillcolor { value: String },
    Circle { radius: f64, extent: f64 },
    #[serde(rename = "begin_fill")]
    BeginFill,
    #[serde(rename = "end_fill")]
    EndFill,
    Speed { value: f64 },
    Hideturtle,
    Showturtle,
    /// `"standard"` or `"logo"`; clears every turtle.
    Mode { value: String },
    Reset,
    Stop,
}

/// One 2D canvas operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum DrawCommand {
    FillRect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    StrokeRect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    ClearRect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    MoveTo {
        x: f64,
        y: f64,
    },
    LineTo {
        x: f64,
        y: f64,
    },
    FillStyle {
        color: String,
    },
    StrokeStyle {
        color: String,
    },
    LineWidth {
        value: f64,
    },
    BeginPath,
    ClosePath,
    Stroke,
    Fill,
    #[serde(rename_all = "camelCase")]
    Arc {
        x: f64,
        y: f64,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
        counterclockwise: bool,
    },
    FillText {
        text: String,
        x: f64,
        y: f64,
    },
    Reset,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turtle_command_wire_shape() {
        let json = serde_json::to_value(TurtleCommand::Forward { value: 10.0 }).unwrap();
        assert_eq!(json, serde_json::json!({"action": "forward", "value": 10.0}));
        let json = serde_json::to_value(TurtleCommand::BeginFill).unwrap();
        assert_eq!(json, serde_json::json!({"action": "begin_fill"}));
    }

    #[test]
    fn draw_command_wire_shape() {
        let cmd: DrawCommand = serde_json::from_value(serde_json::json!({
            "action": "arc", "x": 1.0, "y": 2.0, "radius": 3.0,
            "startAngle": 0.0, "endAngle": 1.5, "counterclockwise": false
        }))
        .unwrap();
        assert!(matches!(cmd, DrawCommand::Arc { end_angle, .. } if end_angle == 1.5));
        let json = serde_json::to_value(DrawCommand::FillStyle {
            color: "red".into(),
        })
        .unwrap();
        assert_eq!(json["action"], "fillStyle");
    }
}
