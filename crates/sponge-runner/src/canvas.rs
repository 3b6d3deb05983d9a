#![forbid(unsafe_code)]

//! Headless replay target for graphics commands.
//!
//! [`VirtualCanvas`] applies turtle commands to per-turtle pen state and
//! records the resulting line segments and filled polygons, plus every
//! 2D draw command verbatim. Two canvases compare equal as drawings when
//! their geometry matches to within a hundredth of a unit.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sponge_lang::{DrawCommand, TurtleCommand};

/// Turtle id used by the coordinator to broadcast a stop to every turtle.
pub const ALL_TURTLES: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurtleMode {
    Standard,
    Logo,
}

#[derive(Debug, Clone, PartialEq)]
struct Pen {
    x: f64,
    y: f64,
    /// Degrees counter-clockwise from east, whatever the mode.
    heading: f64,
    down: bool,
    width: f64,
    color: String,
    fill_color: String,
    fill: Option<Vec<(f64, f64)>>,
    visible: bool,
    speed: f64,
}

impl Pen {
    fn home(mode: TurtleMode) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            heading: match mode {
                TurtleMode::Standard => 0.0,
                TurtleMode::Logo => 90.0,
            },
            down: true,
            width: 1.0,
            color: "black".to_string(),
            fill_color: "black".to_string(),
            fill: None,
            visible: true,
            speed: 6.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub turtle: u32,
    pub from: (f64, f64),
    pub to: (f64, f64),
    pub color: String,
    pub width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub turtle: u32,
    pub points: Vec<(f64, f64)>,
    pub color: String,
}

/// Everything a program drew.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Drawing {
    pub segments: Vec<Segment>,
    pub fills: Vec<Fill>,
    pub draw_commands: Vec<DrawCommand>,
}

fn cents(v: f64) -> i64 {
    // Rounded to 0.01; -0.0 and 0.0 agree.
    let r = (v * 100.0).round();
    if r == 0.0 { 0 } else { r as i64 }
}

type SegmentKey = (u32, [i64; 4], String, i64);

impl Drawing {
    fn segment_keys(&self) -> Vec<SegmentKey> {
        self.segments
            .iter()
            .map(|s| {
                (
                    s.turtle,
                    [cents(s.from.0), cents(s.from.1), cents(s.to.0), cents(s.to.1)],
                    s.color.clone(),
                    cents(s.width),
                )
            })
            .collect()
    }

    fn fill_keys(&self) -> Vec<(u32, Vec<(i64, i64)>, String)> {
        self.fills
            .iter()
            .map(|f| {
                (
                    f.turtle,
                    f.points.iter().map(|&(x, y)| (cents(x), cents(y))).collect(),
                    f.color.clone(),
                )
            })
            .collect()
    }

    /// Same geometry, colours and canvas commands, to within 0.01.
    #[must_use]
    pub fn same_as(&self, other: &Drawing) -> bool {
        self.segment_keys() == other.segment_keys()
            && self.fill_keys() == other.fill_keys()
            && self.draw_commands == other.draw_commands
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty() && self.fills.is_empty() && self.draw_commands.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct VirtualCanvas {
    mode: TurtleMode,
    pens: BTreeMap<u32, Pen>,
    drawing: Drawing,
    commands: usize,
}

impl Default for VirtualCanvas {
    fn default() -> Self {
        Self {
            mode: TurtleMode::Standard,
            pens: BTreeMap::new(),
            drawing: Drawing::default(),
            commands: 0,
        }
    }
}

impl VirtualCanvas {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn mode(&self) -> TurtleMode {
        self.mode
    }

    #[must_use]
    pub fn drawing(&self) -> &Drawing {
        &self.drawing
    }

    pub fn into_drawing(self) -> Drawing {
        self.drawing
    }

    /// Number of commands applied so far.
    #[must_use]
    pub fn command_count(&self) -> usize {
        self.commands
    }

    /// Position and heading of a turtle, heading in the current mode's
    /// convention.
    #[must_use]
    pub fn position(&self, turtle: u32) -> Option<(f64, f64, f64)> {
        self.pens.get(&turtle).map(|p| {
            let heading = match self.mode {
                TurtleMode::Standard => p.heading,
                TurtleMode::Logo => 90.0 - p.heading,
            };
            (p.x, p.y, heading.rem_euclid(360.0))
        })
    }

    #[must_use]
    pub fn is_visible(&self, turtle: u32) -> Option<bool> {
        self.pens.get(&turtle).map(|p| p.visible)
    }

    #[must_use]
    pub fn speed(&self, turtle: u32) -> Option<f64> {
        self.pens.get(&turtle).map(|p| p.speed)
    }

    pub fn draw(&mut self, commands: &[DrawCommand]) {
        self.commands += commands.len();
        for cmd in commands {
            if matches!(cmd, DrawCommand::Reset) {
                self.drawing.draw_commands.clear();
            } else {
                self.drawing.draw_commands.push(cmd.clone());
            }
        }
    }

    /// Apply one command. A negative id is a broadcast and only `stop`
    /// is meaningful for it.
    pub fn apply(&mut self, turtle: i64, command: &TurtleCommand) {
        self.commands += 1;
        let Ok(id) = u32::try_from(turtle) else {
            return;
        };
        let mode = self.mode;
        if let TurtleCommand::Mode { value } = command {
            self.mode = if value == "logo" {
                TurtleMode::Logo
            } else {
                TurtleMode::Standard
            };
            self.pens.clear();
            self.drawing.segments.clear();
            self.drawing.fills.clear();
            return;
        }
        let pen = self.pens.entry(id).or_insert_with(|| Pen::home(mode));
        match command {
            TurtleCommand::Forward { value } => move_by(&mut self.drawing, id, pen, *value),
            TurtleCommand::Backward { value } => move_by(&mut self.drawing, id, pen, -*value),
            TurtleCommand::Left { value } => pen.heading += value,
            TurtleCommand::Right { value } => pen.heading -= value,
            TurtleCommand::Setheading { value } => {
                pen.heading = match mode {
                    TurtleMode::Standard => *value,
                    TurtleMode::Logo => 90.0 - value,
                };
            }
            TurtleCommand::Setposition { x, y } => move_to(&mut self.drawing, id, pen, *x, *y),
            TurtleCommand::Penup => pen.down = false,
            TurtleCommand::Pendown => pen.down = true,
            TurtleCommand::Pensize { value } => pen.width = *value,
            TurtleCommand::Pencolor { value } => pen.color.clone_from(value),
            TurtleCommand::Fillcolor { value } => pen.fill_color.clone_from(value),
            TurtleCommand::Circle { radius, extent } => {
                circle(&mut self.drawing, id, pen, *radius, *extent);
            }
            TurtleCommand::BeginFill => pen.fill = Some(vec![(pen.x, pen.y)]),
            TurtleCommand::EndFill => {
                if let Some(points) = pen.fill.take()
                    && points.len() > 2
                {
                    self.drawing.fills.push(Fill {
                        turtle: id,
                        points,
                        color: pen.fill_color.clone(),
                    });
                }
            }
            TurtleCommand::Speed { value } => pen.speed = *value,
            TurtleCommand::Hideturtle => pen.visible = false,
            TurtleCommand::Showturtle => pen.visible = true,
            TurtleCommand::Reset => {
                *pen = Pen::home(mode);
                self.drawing.segments.retain(|s| s.turtle != id);
                self.drawing.fills.retain(|f| f.turtle != id);
            }
            TurtleCommand::Mode { .. } | TurtleCommand::Stop => {}
        }
    }
}

fn move_by(drawing: &mut Drawing, id: u32, pen: &mut Pen, distance: f64) {
    let rad = pen.heading.to_radians();
    let x = pen.x + distance * rad.cos();
    let y = pen.y + distance * rad.sin();
    move_to(drawing, id, pen, x, y);
}

fn move_to(drawing: &mut Drawing, id: u32, pen: &mut Pen, x: f64, y: f64) {
    if pen.down {
        drawing.segments.push(Segment {
            turtle: id,
            from: (pen.x, pen.y),
            to: (x, y),
            color: pen.color.clone(),
            width: pen.width,
        });
    }
    pen.x = x;
    pen.y = y;
    if let Some(points) = &mut pen.fill {
        points.push((x, y));
    }
}

/// Polygon approximation with the same step count as CPython's turtle.
fn circle(drawing: &mut Drawing, id: u32, pen: &mut Pen, radius: f64, extent: f64) {
    let frac = extent.abs() / 360.0;
    let steps = 1 + ((11.0 + radius.abs() / 6.0).min(59.0) * frac) as u32;
    let mut w = extent / f64::from(steps);
    let mut w2 = 0.5 * w;
    let mut l = 2.0 * radius * w2.to_radians().sin();
    if radius < 0.0 {
        l = -l;
        w = -w;
        w2 = -w2;
    }
    pen.heading += w2;
    for _ in 0..steps {
        move_by(drawing, id, pen, l);
        pen.heading += w;
    }
    pen.heading -= w2;
}
