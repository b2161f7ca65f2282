pub mod render;

pub use ab_glyph::FontArc;
pub use render::{
    FrameContent, FrameStats, PhaseRenderer, Renderer, SkiaRenderer, load_font,
    render_glyph_pixmap, render_text_pixmap,
};
