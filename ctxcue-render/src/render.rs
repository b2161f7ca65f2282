use ab_glyph::{Font, FontArc, Glyph as FontGlyph, PxScale, ScaleFont, point};
use anyhow::{Result, ensure};
use bytemuck::{cast_slice, cast_slice_mut};
use ctxcue_cache::{TextId, intern, resolve};
use ctxcue_core::{
    Corner, GridCell, Glyph, PALETTE, Phase, PlacedItem, SearchDisplay, Stimulus, TargetShape,
    TrialState,
};
use ctxcue_timing::{CalibrationStats, HighPrecisionTimer, Timer};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tiny_skia::{
    Color, LineCap, Paint, PathBuilder, Pixmap, PremultipliedColorU8, Rect, Stroke, Transform,
};

const BACKGROUND: [u8; 4] = [255, 255, 255, 255];
const TEXT_COLOR: [u8; 4] = [0, 0, 0, 255];
const STROKE_WIDTH: f32 = 5.0;
const FONT_SIZE: f32 = 36.0;
const LINE_SPACING: f32 = 40.0;
/// The search grid is laid out for an 800x600 area, offset 100 px into it.
const REFERENCE_AREA: (f32, f32) = (800.0, 600.0);
const GRID_MARGIN: f32 = 100.0;

/// Index of the fixation cross in the static cache; glyphs occupy the slots
/// before it, one per glyph and palette colour.
const FIXATION_INDEX: usize = Glyph::COUNT * PALETTE.len();
const STATIC_COUNT: usize = FIXATION_INDEX + 1;

fn glyph_index(item: &PlacedItem) -> usize {
    item.glyph.cache_id() * PALETTE.len() + item.color % PALETTE.len()
}

/// Read a TrueType font, or `None` with a warning. Messages are not drawn
/// without one; the search task itself needs no font.
pub fn load_font(path: &Path) -> Option<FontArc> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "font not readable, text disabled");
            return None;
        }
    };
    match FontArc::try_from_vec(bytes) {
        Ok(font) => Some(font),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "invalid font, text disabled");
            None
        }
    }
}

struct TextCache {
    font: Option<FontArc>,
    size_px: f32,
    map: HashMap<TextId, Arc<Pixmap>>,
}

impl TextCache {
    fn new(font: Option<FontArc>, size_px: f32) -> Self {
        Self {
            font,
            size_px,
            map: HashMap::new(),
        }
    }

    fn get_or_render(&mut self, id: TextId) -> Option<Arc<Pixmap>> {
        if let Some(p) = self.map.get(&id) {
            return Some(Arc::clone(p));
        }
        let font = self.font.as_ref()?;
        let text = resolve(id)?;
        let pm = Arc::new(render_text_pixmap(&text, self.size_px, font, TEXT_COLOR)?);
        self.map.insert(id, Arc::clone(&pm));
        Some(pm)
    }
}

/// Rasterise one line of text into a tightly cropped premultiplied pixmap.
pub fn render_text_pixmap(
    text: &str,
    font_size: f32,
    font: &FontArc,
    color: [u8; 4],
) -> Option<Pixmap> {
    let scale = PxScale::from(font_size);
    let sf = font.as_scaled(scale);

    let mut pen_x = 0.0f32;
    let mut glyphs = Vec::<FontGlyph>::new();
    for ch in text.chars() {
        let id = font.glyph_id(ch);
        if let Some(prev) = glyphs.last() {
            pen_x += sf.kern(prev.id, id);
        }
        glyphs.push(FontGlyph {
            id,
            scale,
            position: point(pen_x, sf.ascent()),
        });
        pen_x += sf.h_advance(id);
    }

    let outlines: Vec<_> = glyphs
        .into_iter()
        .filter_map(|g| font.outline_glyph(g))
        .collect();
    if outlines.is_empty() {
        return None;
    }

    let (mut min_x, mut min_y) = (f32::INFINITY, f32::INFINITY);
    let (mut max_x, mut max_y) = (f32::NEG_INFINITY, f32::NEG_INFINITY);
    for out in &outlines {
        let b = out.px_bounds();
        min_x = min_x.min(b.min.x);
        min_y = min_y.min(b.min.y);
        max_x = max_x.max(b.max.x);
        max_y = max_y.max(b.max.y);
    }

    let w = (max_x.ceil() - min_x.floor()).max(1.0) as u32;
    let h = (max_y.ceil() - min_y.floor()).max(1.0) as u32;
    let mut pm = Pixmap::new(w, h)?;
    let stride = w as usize;
    let dst = pm.pixels_mut();

    for out in &outlines {
        let b = out.px_bounds();
        out.draw(|x, y, cov| {
            if cov <= f32::EPSILON {
                return;
            }
            let ix = (x as f32 + b.min.x - min_x).floor() as i32;
            let iy = (y as f32 + b.min.y - min_y).floor() as i32;
            if ix < 0 || iy < 0 || ix >= w as i32 || iy >= h as i32 {
                return;
            }
            let i = iy as usize * stride + ix as usize;

            // Source over, premultiplied.
            let a = (cov * color[3] as f32 / 255.0).clamp(0.0, 1.0);
            let sa = (a * 255.0) as u8;
            let premul = |c: u8| ((c as f32 * a) as u8).min(sa);
            let bg = dst[i];
            let inv = 1.0 - a;
            let blend = |s: u8, d: u8| s.saturating_add((d as f32 * inv) as u8);
            let out_a = blend(sa, bg.alpha());
            if let Some(px) = PremultipliedColorU8::from_rgba(
                blend(premul(color[0]), bg.red()).min(out_a),
                blend(premul(color[1]), bg.green()).min(out_a),
                blend(premul(color[2]), bg.blue()).min(out_a),
                out_a,
            ) {
                dst[i] = px;
            }
        });
    }

    Some(pm)
}

/// Stroke one search item, centred in a square pixmap two tiles wide.
pub fn render_glyph_pixmap(glyph: Glyph, color: [u8; 4], tile: f32) -> Option<Pixmap> {
    let size = (2.0 * tile + 2.0 * STROKE_WIDTH).ceil() as u32;
    let mut pixmap = Pixmap::new(size, size)?;
    let c = size as f32 * 0.5;
    let half = (tile * 0.5).floor();

    let mut pb = PathBuilder::new();
    let mut segment = |from: (f32, f32), to: (f32, f32)| {
        pb.move_to(from.0, from.1);
        pb.line_to(to.0, to.1);
    };
    match glyph {
        Glyph::Target(shape) => {
            // The vertical stroke is the T's crossbar.
            segment((c, c - half), (c, c + half));
            match shape {
                TargetShape::Left => segment((c - half, c), (c, c)),
                TargetShape::Right => segment((c, c), (c + half, c)),
            }
        }
        Glyph::Distractor(corner) => {
            let (up, left) = match corner {
                Corner::UpLeft => (true, true),
                Corner::UpRight => (true, false),
                Corner::DownLeft => (false, true),
                Corner::DownRight => (false, false),
            };
            segment((c, c), (c, if up { c - tile } else { c + tile }));
            segment((c, c), (if left { c - half } else { c + half }, c));
        }
    }
    let path = pb.finish()?;

    let mut paint = Paint::default();
    paint.anti_alias = true;
    paint.set_color_rgba8(color[0], color[1], color[2], color[3]);
    let stroke = Stroke {
        width: STROKE_WIDTH,
        line_cap: LineCap::Butt,
        ..Stroke::default()
    };
    pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
    Some(pixmap)
}

fn render_fixation_pixmap() -> Option<Pixmap> {
    let size = 40u32;
    let mut pm = Pixmap::new(size, size)?;
    let mut paint = Paint::default();
    paint.anti_alias = false;
    paint.set_color_rgba8(TEXT_COLOR[0], TEXT_COLOR[1], TEXT_COLOR[2], TEXT_COLOR[3]);

    let h = Rect::from_xywh(0.0, (size as f32 - 2.0) * 0.5, size as f32, 2.0)?;
    pm.fill_rect(h, &paint, Transform::identity(), None);
    let v = Rect::from_xywh((size as f32 - 2.0) * 0.5, 0.0, 2.0, size as f32)?;
    pm.fill_rect(v, &paint, Transform::identity(), None);
    Some(pm)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    pub clear: Duration,
    pub phase: Duration,
    pub copy: Duration,
    pub total: Duration,
    pub dirty_count: usize,
}

/// What the session wants on screen this frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameContent<'a> {
    pub display: Option<&'a SearchDisplay>,
    pub trial_state: Option<&'a TrialState>,
    pub message: Option<&'a str>,
}

pub trait Renderer {
    fn clear_dirty(&mut self, dirty: &[Rect]);
    fn blit_cached(&mut self, index: usize, pos: (f32, f32));
    fn blit_text(&mut self, id: TextId, pos: (f32, f32));
}

pub trait PhaseRenderer<P: Phase>: Renderer {
    fn render_phase(&mut self, phase: &P, content: &FrameContent<'_>) -> Result<()>;
}

pub struct SkiaRenderer {
    width: u32,
    height: u32,
    center: (f32, f32),
    tile: f32,

    static_cache: Vec<Option<Pixmap>>,
    text_cache: TextCache,

    canvas: Pixmap,
    dirty_regions: Vec<Rect>,
    first_frame: bool,

    component_timers: HashMap<&'static str, HighPrecisionTimer>,
    clear_buffer: Vec<u8>,
}

impl SkiaRenderer {
    pub fn new(width: u32, height: u32, tile: f32, font: Option<FontArc>) -> Result<Self> {
        let canvas = blank_canvas(width, height)?;
        let mut renderer = SkiaRenderer {
            width,
            height,
            center: (width as f32 / 2.0, height as f32 / 2.0),
            tile,
            static_cache: Vec::with_capacity(STATIC_COUNT),
            text_cache: TextCache::new(font, FONT_SIZE),
            canvas,
            dirty_regions: Vec::with_capacity(32),
            first_frame: true,
            component_timers: ["phase", "clear", "copy"]
                .iter()
                .map(|&k| (k, HighPrecisionTimer::new()))
                .collect(),
            clear_buffer: clear_buffer(width, height),
        };
        renderer.init_cache();
        tracing::debug!(width, height, tile, "renderer ready");
        Ok(renderer)
    }

    pub fn resize(&mut self, new_width: u32, new_height: u32) -> Result<()> {
        self.canvas = blank_canvas(new_width, new_height)?;
        self.width = new_width;
        self.height = new_height;
        self.center = (new_width as f32 / 2.0, new_height as f32 / 2.0);
        self.clear_buffer = clear_buffer(new_width, new_height);
        self.dirty_regions.clear();
        self.first_frame = true;
        Ok(())
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn init_cache(&mut self) {
        let mut glyphs = vec![None; FIXATION_INDEX];
        let all = [
            Glyph::Target(TargetShape::Left),
            Glyph::Target(TargetShape::Right),
        ]
        .into_iter()
        .chain(Corner::ALL.into_iter().map(Glyph::Distractor));
        for glyph in all {
            for (color, rgba) in PALETTE.iter().enumerate() {
                let index = glyph_index(&PlacedItem {
                    cell: GridCell::new(0, 0),
                    glyph,
                    color,
                });
                glyphs[index] = render_glyph_pixmap(glyph, *rgba, self.tile);
            }
        }
        self.static_cache = glyphs;
        self.static_cache.push(render_fixation_pixmap());
    }

    /// Screen position of a grid cell's centre.
    pub fn cell_position(&self, cell: GridCell) -> (f32, f32) {
        let origin = (
            self.center.0 - REFERENCE_AREA.0 * 0.5 + GRID_MARGIN,
            self.center.1 - REFERENCE_AREA.1 * 0.5 + GRID_MARGIN,
        );
        (
            origin.0 + cell.x as f32 * self.tile,
            origin.1 + cell.y as f32 * self.tile,
        )
    }

    /// Timing of one render stage ("phase", "clear" or "copy") over recent frames.
    pub fn component_stats(&self, name: &str) -> Option<CalibrationStats> {
        self.component_timers.get(name).map(|t| t.calibration_stats())
    }

    fn blit_message(&mut self, message: &str) {
        let lines: Vec<&str> = message.lines().collect();
        let first_y = self.center.1 - (lines.len().saturating_sub(1)) as f32 * LINE_SPACING * 0.5;
        for (i, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let id = intern(line);
            self.blit_text(id, (self.center.0, first_y + i as f32 * LINE_SPACING));
        }
    }

    fn clear_dirty(&mut self, dirty: &[Rect]) {
        let stride = self.width as usize * 4;
        let canvas_data = self.canvas.data_mut();

        for rect in dirty {
            let Some((x0, y0, x1, y1)) = clip(rect, self.width, self.height) else {
                continue;
            };
            let row_len = (x1 - x0) * 4;
            for y in y0..y1 {
                let off = y * stride + x0 * 4;
                canvas_data[off..off + row_len]
                    .copy_from_slice(&self.clear_buffer[off..off + row_len]);
            }
        }
    }

    fn copy_dirty_region(&self, dirty: &Rect, frame_buffer: &mut [u8]) {
        let Some((x0, y0, x1, y1)) = clip(dirty, self.width, self.height) else {
            return;
        };
        let bytes = (x1 - x0) * 4;
        let row_bytes = self.width as usize * 4;
        let canvas_data = self.canvas.data();

        for row in y0..y1 {
            let off = row * row_bytes + x0 * 4;
            frame_buffer[off..off + bytes].copy_from_slice(&canvas_data[off..off + bytes]);
        }
    }

    fn coalesce_dirty(rects: &mut Vec<Rect>) {
        rects.sort_by(|a, b| a.y().total_cmp(&b.y()).then(a.x().total_cmp(&b.x())));
        let mut out: Vec<Rect> = Vec::with_capacity(rects.len());
        for r in rects.drain(..) {
            if let Some(last) = out.last_mut() {
                let same_row =
                    (r.y() - last.y()).abs() < 1.0 && (r.height() - last.height()).abs() < 1.0;
                let touching = r.x() <= last.x() + last.width() + 1.0;
                if same_row && touching {
                    let nx = last.x().min(r.x());
                    let nx2 = (last.x() + last.width()).max(r.x() + r.width());
                    if let Some(merged) = Rect::from_xywh(nx, last.y(), nx2 - nx, last.height()) {
                        *last = merged;
                        continue;
                    }
                }
            }
            out.push(r);
        }
        *rects = out;
    }

    /// Draw `content` and copy every changed region into `frame_buffer`
    /// (RGBA8, `width * height * 4` bytes).
    pub fn render_frame<P, T>(
        &mut self,
        phase: &P,
        content: &FrameContent<'_>,
        frame_buffer: &mut [u8],
        timer: &T,
    ) -> Result<FrameStats>
    where
        P: Phase,
        T: Timer<Timestamp = u64>,
    {
        ensure!(
            frame_buffer.len() == self.clear_buffer.len(),
            "frame buffer holds {} bytes, renderer expects {}",
            frame_buffer.len(),
            self.clear_buffer.len()
        );

        if self.first_frame {
            self.first_frame = false;
            self.canvas.data_mut().copy_from_slice(&self.clear_buffer);
            frame_buffer.copy_from_slice(&self.clear_buffer);
            self.dirty_regions.clear();
        }

        let old_dirty = std::mem::take(&mut self.dirty_regions);
        let t_clear = {
            let t = timer.now();
            SkiaRenderer::clear_dirty(self, &old_dirty);
            timer.elapsed(t)
        };

        let t_phase = {
            let t = timer.now();
            self.render_phase(phase, content)?;
            timer.elapsed(t)
        };

        let mut present_rects = old_dirty;
        present_rects.extend_from_slice(&self.dirty_regions);
        SkiaRenderer::coalesce_dirty(&mut present_rects);

        let t_copy = {
            let t = timer.now();
            for rect in &present_rects {
                self.copy_dirty_region(rect, frame_buffer);
            }
            timer.elapsed(t)
        };

        for (name, d) in [("phase", t_phase), ("clear", t_clear), ("copy", t_copy)] {
            if let Some(component) = self.component_timers.get_mut(name) {
                component.record_frame(d);
            }
        }

        Ok(FrameStats {
            clear: t_clear,
            phase: t_phase,
            copy: t_copy,
            total: t_clear + t_phase + t_copy,
            dirty_count: self.dirty_regions.len(),
        })
    }

    /// Composite a premultiplied pixmap centred on `pos` and mark it dirty.
    fn blit_pixmap(&mut self, pixmap: &Pixmap, pos: (f32, f32)) {
        let (w, h) = (pixmap.width() as i32, pixmap.height() as i32);
        let (cw, ch) = (self.width as i32, self.height as i32);
        let x = (pos.0 - w as f32 * 0.5).floor() as i32;
        let y = (pos.1 - h as f32 * 0.5).floor() as i32;

        if x + w <= 0 || y + h <= 0 || x >= cw || y >= ch {
            return;
        }

        let dst_x = x.max(0) as usize;
        let dst_y = y.max(0) as usize;
        let src_x = (-x).max(0) as usize;
        let src_y = (-y).max(0) as usize;
        let copy_w = (w as usize - src_x).min(cw as usize - dst_x);
        let copy_h = (h as usize - src_y).min(ch as usize - dst_y);
        if copy_w == 0 || copy_h == 0 {
            return;
        }

        let src_stride = pixmap.width() as usize;
        let dst_stride = self.width as usize;
        let src_u32: &[u32] = cast_slice(pixmap.data());
        let dst_u32: &mut [u32] = cast_slice_mut(self.canvas.data_mut());

        let fully_opaque = (0..copy_h).all(|row| {
            let start = (src_y + row) * src_stride + src_x;
            src_u32[start..start + copy_w].iter().all(|&p| p >> 24 == 0xFF)
        });

        for row in 0..copy_h {
            let src_start = (src_y + row) * src_stride + src_x;
            let dst_start = (dst_y + row) * dst_stride + dst_x;
            let src_row = &src_u32[src_start..src_start + copy_w];
            let dst_row = &mut dst_u32[dst_start..dst_start + copy_w];

            if fully_opaque {
                dst_row.copy_from_slice(src_row);
                continue;
            }
            for (d, &s) in dst_row.iter_mut().zip(src_row) {
                let sa = s >> 24;
                if sa == 0 {
                    continue;
                }
                let inv = 255 - sa;
                let channel = |shift: u32| {
                    let sc = (s >> shift) & 0xFF;
                    let dc = (*d >> shift) & 0xFF;
                    (sc + (dc * inv + 127) / 255).min(255)
                };
                *d = (channel(24) << 24) | (channel(16) << 16) | (channel(8) << 8) | channel(0);
            }
        }

        if let Some(rect) =
            Rect::from_xywh(dst_x as f32, dst_y as f32, copy_w as f32, copy_h as f32)
        {
            self.dirty_regions.push(rect);
        }
    }
}

fn blank_canvas(width: u32, height: u32) -> Result<Pixmap> {
    let mut canvas = Pixmap::new(width, height)
        .ok_or_else(|| anyhow::anyhow!("cannot allocate a {width}x{height} canvas"))?;
    canvas.fill(Color::from_rgba8(
        BACKGROUND[0],
        BACKGROUND[1],
        BACKGROUND[2],
        BACKGROUND[3],
    ));
    Ok(canvas)
}

fn clear_buffer(width: u32, height: u32) -> Vec<u8> {
    BACKGROUND
        .into_iter()
        .cycle()
        .take((width * height * 4) as usize)
        .collect()
}

/// Pixel bounds of `rect` inside a `width` x `height` surface.
fn clip(rect: &Rect, width: u32, height: u32) -> Option<(usize, usize, usize, usize)> {
    let x0 = rect.x().floor().clamp(0.0, width as f32) as usize;
    let y0 = rect.y().floor().clamp(0.0, height as f32) as usize;
    let x1 = (rect.x() + rect.width()).ceil().clamp(0.0, width as f32) as usize;
    let y1 = (rect.y() + rect.height()).ceil().clamp(0.0, height as f32) as usize;
    (x1 > x0 && y1 > y0).then_some((x0, y0, x1, y1))
}

impl Renderer for SkiaRenderer {
    fn clear_dirty(&mut self, dirty: &[Rect]) {
        SkiaRenderer::clear_dirty(self, dirty);
    }

    fn blit_cached(&mut self, index: usize, pos: (f32, f32)) {
        // Taken out for the blit so the canvas can be borrowed mutably.
        let Some(pixmap) = self.static_cache.get_mut(index).and_then(Option::take) else {
            return;
        };
        self.blit_pixmap(&pixmap, pos);
        self.static_cache[index] = Some(pixmap);
    }

    fn blit_text(&mut self, id: TextId, pos: (f32, f32)) {
        if let Some(pm) = self.text_cache.get_or_render(id) {
            self.blit_pixmap(&pm, pos);
        }
    }
}

impl<P> PhaseRenderer<P> for SkiaRenderer
where
    P: Phase,
{
    fn render_phase(&mut self, phase: &P, content: &FrameContent<'_>) -> Result<()> {
        match phase {
            p if p.is_search() => match content.trial_state {
                Some(TrialState::Fixation) => {
                    self.blit_cached(FIXATION_INDEX, self.center);
                }
                Some(TrialState::Search) => {
                    if let Some(display) = content.display {
                        for item in &display.items {
                            let pos = self.cell_position(item.cell);
                            self.blit_cached(glyph_index(item), pos);
                        }
                    }
                }
                Some(TrialState::Complete) | None => {}
            },
            _ => {
                if let Some(message) = content.message {
                    self.blit_message(message);
                }
            }
        }
        Ok(())
    }
}
