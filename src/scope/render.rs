use serde::{Deserialize, Serialize};

use crate::scope::config::CanvasConfig;
use crate::scope::decimate::Decimation;
use crate::scope::error::ScopeError;
use crate::scope::trace::{SharedTrace, Trace};

/// Stroke color with components in `0.0..=1.0`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    #[serde(default = "opaque")]
    pub a: f64,
}

fn opaque() -> f64 {
    1.0
}

impl Color {
    pub const BLACK: Color = Color::rgb(0.0, 0.0, 0.0);
    pub const WHITE: Color = Color::rgb(1.0, 1.0, 1.0);
    pub const RED: Color = Color::rgb(1.0, 0.0, 0.0);
    pub const GREEN: Color = Color::rgb(0.0, 1.0, 0.0);
    pub const BLUE: Color = Color::rgb(0.0, 0.0, 1.0);
    pub const CYAN: Color = Color::rgb(0.0, 1.0, 1.0);
    pub const MAGENTA: Color = Color::rgb(1.0, 0.0, 1.0);
    pub const YELLOW: Color = Color::rgb(1.0, 1.0, 0.0);

    /// Default colors handed out to traces that do not pick one.
    pub const PALETTE: [Color; 7] = [
        Color::GREEN,
        Color::BLUE,
        Color::RED,
        Color::CYAN,
        Color::MAGENTA,
        Color::YELLOW,
        Color::WHITE,
    ];

    pub const fn rgb(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub const fn with_alpha(self, a: f64) -> Self {
        Self { a, ..self }
    }

    pub fn palette(index: usize) -> Self {
        Self::PALETTE[index % Self::PALETTE.len()]
    }

    /// 8-bit RGB channels, clamped.
    pub fn to_rgb8(&self) -> (u8, u8, u8) {
        let channel = |v: f64| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        (channel(self.r), channel(self.g), channel(self.b))
    }
}

/// The minimal vector drawing API the renderer needs from a GUI or raster backend.
pub trait DrawingSurface {
    fn set_line_width(&mut self, width: f64);
    fn set_color(&mut self, color: Color);
    fn move_to(&mut self, x: f64, y: f64);
    fn line_to(&mut self, x: f64, y: f64);
    /// Strokes every path started since the last stroke.
    fn stroke(&mut self) -> Result<(), ScopeError>;
    fn point(&mut self, x: f64, y: f64) -> Result<(), ScopeError>;
    fn save(&mut self);
    fn restore(&mut self);
}

/// Value-to-screen mapping for one trace on a canvas `height` pixels tall.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VerticalMap {
    height: f64,
    scale: f64,
    offset: f64,
}

impl VerticalMap {
    /// `None` when `vscale` cannot produce a finite mapping.
    pub fn new(height: u32, vscale: f64, voffset: f64) -> Option<Self> {
        let height = f64::from(height);
        let scale = height / vscale / 10.0;
        if vscale == 0.0 || !scale.is_finite() {
            return None;
        }
        Some(Self {
            height,
            scale,
            offset: -voffset * height / 10.0,
        })
    }

    pub fn y(&self, value: f64) -> f64 {
        self.height - value * self.scale + self.offset
    }
}

/// Draws the reticle and every trace onto a [`DrawingSurface`].
#[derive(Clone, Debug)]
pub struct Renderer {
    pub background: Color,
    pub reticle: Color,
    pub line_width: f64,
    /// Both canvas dimensions must reach this for the fine dot grid to be drawn.
    pub fine_grid_min_px: u32,
    /// Samples spanned by the canvas width at `hscale == 1`.
    pub calibration: f64,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::from_config(&CanvasConfig::default())
    }
}

const DIVISIONS: i32 = 10;
const FINE_STEPS: u32 = 100;

impl Renderer {
    pub fn from_config(canvas: &CanvasConfig) -> Self {
        Self {
            background: canvas.background,
            reticle: canvas.reticle,
            line_width: canvas.line_width,
            fine_grid_min_px: canvas.fine_grid_min_px,
            calibration: canvas.horizontal_calibration,
        }
    }

    /// Redraws a full frame. A zero-sized canvas draws nothing.
    pub fn draw(
        &self,
        surface: &mut dyn DrawingSurface,
        width: u32,
        height: u32,
        traces: &[SharedTrace],
    ) -> Result<(), ScopeError> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        self.draw_reticle(surface, width, height)?;
        for trace in traces {
            trace
                .lock()
                .draw(surface, width, height, self.calibration, self.line_width)?;
        }
        Ok(())
    }

    pub fn draw_reticle(
        &self,
        surface: &mut dyn DrawingSurface,
        width: u32,
        height: u32,
    ) -> Result<(), ScopeError> {
        let (w, h) = (f64::from(width), f64::from(height));
        surface.save();
        surface.set_line_width(self.line_width);
        surface.set_color(self.reticle);
        let half = DIVISIONS / 2;
        for x in -half..=half {
            for y in -half..=half {
                let dx = if x == 0 { 5.0 } else { 2.0 };
                let dy = if y == 0 { 5.0 } else { 2.0 };
                let xx = f64::from(x + half) * w / f64::from(DIVISIONS);
                let yy = f64::from(y + half) * h / f64::from(DIVISIONS);
                surface.move_to(xx - dx / 2.0, yy);
                surface.line_to(xx + dx / 2.0, yy);
                surface.move_to(xx, yy - dy / 2.0);
                surface.line_to(xx, yy + dy / 2.0);
            }
        }
        let stroked = surface.stroke();
        let dotted = if stroked.is_ok()
            && width >= self.fine_grid_min_px
            && height >= self.fine_grid_min_px
        {
            fine_grid(surface, w, h)
        } else {
            Ok(())
        };
        surface.restore();
        stroked.and(dotted)
    }
}

fn fine_grid(surface: &mut dyn DrawingSurface, w: f64, h: f64) -> Result<(), ScopeError> {
    let divisions = f64::from(DIVISIONS);
    let steps = f64::from(FINE_STEPS);
    for line in 0..=DIVISIONS {
        let gx = f64::from(line) * w / divisions;
        let gy = f64::from(line) * h / divisions;
        for step in 0..=FINE_STEPS {
            let t = f64::from(step) / steps;
            surface.point(t * w, gy)?;
            surface.point(gx, t * h)?;
        }
    }
    Ok(())
}

impl Trace {
    /// Draws the reference line at the trace's offset followed by its decimation.
    /// Degenerate geometry or an empty buffer draws nothing.
    pub fn draw(
        &mut self,
        surface: &mut dyn DrawingSurface,
        width: u32,
        height: u32,
        calibration: f64,
        line_width: f64,
    ) -> Result<(), ScopeError> {
        if self.is_empty() {
            return Ok(());
        }
        let style = *self.style();
        let Some(map) = VerticalMap::new(height, style.vscale, style.voffset) else {
            return Ok(());
        };
        let Some(form) = self.decimation(width, calibration) else {
            return Ok(());
        };

        surface.save();
        surface.set_line_width(line_width);
        surface.set_color(style.color);
        let baseline = map.y(0.0);
        surface.move_to(0.0, baseline);
        surface.line_to(f64::from(width), baseline);
        match form {
            Decimation::Sparse(points) => {
                polyline(surface, points.iter().map(|&[x, v]| (x, map.y(v))));
            }
            Decimation::Dense(columns) => {
                let xs = (0..).map(f64::from);
                polyline(surface, xs.clone().zip(columns.iter().map(|c| map.y(c.min))));
                polyline(surface, xs.zip(columns.iter().map(|c| map.y(c.max))));
            }
        }
        let result = surface.stroke();
        surface.restore();
        result
    }
}

fn polyline(surface: &mut dyn DrawingSurface, points: impl Iterator<Item = (f64, f64)>) {
    let mut started = false;
    for (x, y) in points {
        if started {
            surface.line_to(x, y);
        } else {
            surface.move_to(x, y);
            started = true;
        }
    }
}

/// One recorded call on a [`CommandSurface`].
#[derive(Clone, Debug, PartialEq)]
pub enum DrawCommand {
    LineWidth(f64),
    Color(Color),
    /// A stroked path from one `move_to` through its `line_to`s.
    Polyline(Vec<(f64, f64)>),
    Point(f64, f64),
    Save,
    Restore,
}

/// Records draw calls so they can be replayed by a GUI layer or inspected.
#[derive(Clone, Debug, Default)]
pub struct CommandSurface {
    commands: Vec<DrawCommand>,
    pending: Vec<Vec<(f64, f64)>>,
}

impl CommandSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn take(&mut self) -> Vec<DrawCommand> {
        self.pending.clear();
        std::mem::take(&mut self.commands)
    }

    pub fn polylines(&self) -> impl Iterator<Item = &Vec<(f64, f64)>> {
        self.commands.iter().filter_map(|c| match c {
            DrawCommand::Polyline(points) => Some(points),
            _ => None,
        })
    }

    pub fn points(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, DrawCommand::Point(..)))
            .count()
    }
}

impl DrawingSurface for CommandSurface {
    fn set_line_width(&mut self, width: f64) {
        self.commands.push(DrawCommand::LineWidth(width));
    }

    fn set_color(&mut self, color: Color) {
        self.commands.push(DrawCommand::Color(color));
    }

    fn move_to(&mut self, x: f64, y: f64) {
        self.pending.push(vec![(x, y)]);
    }

    fn line_to(&mut self, x: f64, y: f64) {
        match self.pending.last_mut() {
            Some(path) => path.push((x, y)),
            None => self.pending.push(vec![(x, y)]),
        }
    }

    fn stroke(&mut self) -> Result<(), ScopeError> {
        self.commands
            .extend(self.pending.drain(..).map(DrawCommand::Polyline));
        Ok(())
    }

    fn point(&mut self, x: f64, y: f64) -> Result<(), ScopeError> {
        self.commands.push(DrawCommand::Point(x, y));
        Ok(())
    }

    fn save(&mut self) {
        self.commands.push(DrawCommand::Save);
    }

    fn restore(&mut self) {
        self.commands.push(DrawCommand::Restore);
    }
}
