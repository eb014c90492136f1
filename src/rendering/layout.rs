//! Block layout for the page body.
//!
//! Block elements stack vertically inside their parent's content box; inline
//! content is flattened into wrapped text runs on a fixed 8px glyph cell
//! grid (`h1`/`h2` at scale 2). Replaced `<img>` elements are laid out as
//! blocks. The `<html>`/`<body>` background propagates to the canvas.

use std::collections::HashMap;
use std::sync::Arc;

use image::RgbaImage;
use scraper::{ElementRef, Html, Node};

use crate::rendering::style::{Cascade, ComputedStyle, Rgba, MAX_LENGTH};
use crate::Viewport;

/// Glyph cell edge at scale 1, in pixels
pub const CELL: u32 = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoxModel {
    pub margin: u32,
    pub padding: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutBox {
    pub rect: Rect,
    pub box_model: BoxModel,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayoutContent {
    /// A block box; only boxes with a background are kept
    Block { background: Rgba },
    /// Wrapped text, lines separated by `\n`
    Text { text: String, color: Rgba, scale: u32 },
    Image { image: Arc<RgbaImage> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutNode {
    pub lb: LayoutBox,
    pub content: LayoutContent,
}

/// Result of a layout pass, nodes in paint order.
#[derive(Debug, Clone, Default)]
pub struct LayoutTree {
    pub canvas_background: Option<Rgba>,
    pub nodes: Vec<LayoutNode>,
}

const SKIPPED: &[&str] = &[
    "head", "script", "style", "title", "meta", "link", "noscript", "template", "base",
];

const BLOCKS: &[&str] = &[
    "address", "article", "aside", "blockquote", "body", "dd", "details", "div", "dl", "dt",
    "fieldset", "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6",
    "header", "hr", "html", "li", "main", "nav", "ol", "p", "pre", "section", "summary", "table",
    "tbody", "td", "tfoot", "th", "thead", "tr", "ul",
];

fn default_margin(tag: &str) -> u32 {
    match tag {
        "body" | "p" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "ul" | "ol" | "blockquote"
        | "pre" | "figure" => 8,
        _ => 0,
    }
}

fn text_scale(tag: &str) -> u32 {
    match tag {
        "h1" | "h2" => 2,
        _ => 1,
    }
}

fn coord(v: u32) -> i32 {
    v.min(i32::MAX as u32) as i32
}

/// Compute the layout of `document` for `viewport`.
pub fn layout_document(
    document: &Html,
    cascade: &Cascade<'_>,
    images: &HashMap<String, Arc<RgbaImage>>,
    viewport: Viewport,
) -> LayoutTree {
    let root = document.root_element();
    let root_style = cascade.compute(&root, &ComputedStyle::default());
    if root_style.display_none {
        return LayoutTree::default();
    }

    let Some(body) = root
        .children()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "body")
    else {
        return LayoutTree {
            canvas_background: root_style.background,
            nodes: Vec::new(),
        };
    };
    let body_style = cascade.compute(&body, &root_style);

    let mut ctx = LayoutContext {
        cascade,
        images,
        viewport,
        nodes: Vec::new(),
    };

    // The root background paints the canvas; without one the body's does,
    // and the body box itself then paints nothing.
    let canvas_background = root_style.background.or(body_style.background);
    if !body_style.display_none {
        let paint_body = root_style.background.is_some();
        ctx.layout_block(&body, &body_style, 0, 0, viewport.width, paint_body);
    }

    LayoutTree {
        canvas_background,
        nodes: ctx.nodes,
    }
}

struct LayoutContext<'a> {
    cascade: &'a Cascade<'a>,
    images: &'a HashMap<String, Arc<RgbaImage>>,
    viewport: Viewport,
    nodes: Vec<LayoutNode>,
}

/// Inline text collected between block children. A `<br>` starts a new
/// segment.
#[derive(Default)]
struct TextRun {
    segments: Vec<String>,
}

impl TextRun {
    fn push(&mut self, text: &str) {
        if self.segments.is_empty() {
            self.segments.push(String::new());
        }
        if let Some(last) = self.segments.last_mut() {
            last.push_str(text);
        }
    }

    fn line_break(&mut self) {
        if self.segments.is_empty() {
            self.segments.push(String::new());
        }
        self.segments.push(String::new());
    }

    fn is_blank(&self) -> bool {
        self.segments.iter().all(|s| s.trim().is_empty())
    }
}

impl LayoutContext<'_> {
    /// Lay out a block and its subtree at `(x, y)` inside `avail_width`.
    /// Returns the outer height (margins included). Positions and sizes
    /// saturate rather than wrap on absurd style values.
    fn layout_block(
        &mut self,
        el: &ElementRef<'_>,
        style: &ComputedStyle,
        x: u32,
        y: u32,
        avail_width: u32,
        paint_background: bool,
    ) -> u32 {
        let tag = el.value().name();
        let margin = style.margin.unwrap_or_else(|| default_margin(tag));
        let padding = style.padding.unwrap_or(0);

        let box_x = x.saturating_add(margin);
        let box_y = y.saturating_add(margin);
        let box_width = style
            .width
            .map(|w| w.resolve(avail_width).saturating_add(padding.saturating_mul(2)))
            .unwrap_or_else(|| avail_width.saturating_sub(margin.saturating_mul(2)));

        let slot = match (paint_background, style.background) {
            (true, Some(background)) => {
                self.nodes.push(LayoutNode {
                    lb: LayoutBox {
                        rect: Rect { x: coord(box_x), y: coord(box_y), width: box_width, height: 0 },
                        box_model: BoxModel { margin, padding },
                    },
                    content: LayoutContent::Block { background },
                });
                Some(self.nodes.len() - 1)
            }
            _ => None,
        };

        let content_x = box_x.saturating_add(padding);
        let content_width = box_width.saturating_sub(padding.saturating_mul(2));
        let content_top = box_y.saturating_add(padding);
        let mut cursor = content_top;
        let mut run = TextRun::default();
        let scale = text_scale(tag);

        for child in el.children() {
            match child.value() {
                Node::Text(text) => run.push(text),
                Node::Element(element) => {
                    let name = element.name();
                    if SKIPPED.contains(&name) {
                        continue;
                    }
                    let Some(child_el) = ElementRef::wrap(child) else {
                        continue;
                    };
                    let child_style = self.cascade.compute(&child_el, style);
                    if child_style.display_none {
                        continue;
                    }
                    if name == "br" {
                        run.line_break();
                    } else if name == "img" {
                        let used = self.flush_text(&mut run, content_x, cursor, content_width, style.color, scale);
                        cursor = cursor.saturating_add(used);
                        let used = self.layout_image(&child_el, &child_style, content_x, cursor, content_width);
                        cursor = cursor.saturating_add(used);
                    } else if BLOCKS.contains(&name) {
                        let used = self.flush_text(&mut run, content_x, cursor, content_width, style.color, scale);
                        cursor = cursor.saturating_add(used);
                        let used = self.layout_block(&child_el, &child_style, content_x, cursor, content_width, true);
                        cursor = cursor.saturating_add(used);
                    } else {
                        collect_inline_text(&child_el, &mut run);
                    }
                }
                _ => {}
            }
        }
        let used = self.flush_text(&mut run, content_x, cursor, content_width, style.color, scale);
        cursor = cursor.saturating_add(used);

        let content_height = cursor - content_top;
        let box_height = style
            .height
            .map(|h| h.resolve(self.viewport.height))
            .unwrap_or(content_height)
            .saturating_add(padding.saturating_mul(2));

        if let Some(i) = slot {
            self.nodes[i].lb.rect.height = box_height;
        }
        box_height.saturating_add(margin.saturating_mul(2))
    }

    fn layout_image(
        &mut self,
        el: &ElementRef<'_>,
        style: &ComputedStyle,
        x: u32,
        y: u32,
        avail_width: u32,
    ) -> u32 {
        let image = el.value().attr("src").and_then(|src| self.images.get(src)).cloned();
        let natural = image.as_ref().map(|img| img.dimensions());

        let attr_len = |name: &str| {
            el.value()
                .attr(name)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(|v| v.min(MAX_LENGTH as u64) as u32)
        };
        let width = style.width.map(|w| w.resolve(avail_width)).or_else(|| attr_len("width"));
        let height = style.height.map(|h| h.resolve(self.viewport.height)).or_else(|| attr_len("height"));

        let (width, height) = match (width, height, natural) {
            (Some(w), Some(h), _) => (w, h),
            (Some(w), None, Some((nw, nh))) if nw > 0 => (w, scale_dim(w, nh, nw)),
            (None, Some(h), Some((nw, nh))) if nh > 0 => (scale_dim(h, nw, nh), h),
            (None, None, Some((nw, nh))) => (nw.min(MAX_LENGTH), nh.min(MAX_LENGTH)),
            (w, h, _) => (w.unwrap_or(0), h.unwrap_or(0)),
        };

        if let Some(image) = image {
            if width > 0 && height > 0 {
                self.nodes.push(LayoutNode {
                    lb: LayoutBox {
                        rect: Rect { x: coord(x), y: coord(y), width, height },
                        box_model: BoxModel { margin: 0, padding: 0 },
                    },
                    content: LayoutContent::Image { image },
                });
            }
        }
        height
    }

    /// Wrap and emit the pending text run. Returns the height used.
    fn flush_text(
        &mut self,
        run: &mut TextRun,
        x: u32,
        y: u32,
        width: u32,
        color: Rgba,
        scale: u32,
    ) -> u32 {
        let run = std::mem::take(run);
        if run.is_blank() {
            return 0;
        }

        let cell = CELL * scale;
        let chars_per_line = (width / cell).max(1) as usize;
        let mut lines = Vec::new();
        for segment in &run.segments {
            let mut cur = String::new();
            for word in segment.split_whitespace() {
                if !cur.is_empty() && cur.chars().count() + 1 + word.chars().count() > chars_per_line {
                    lines.push(std::mem::take(&mut cur));
                }
                if !cur.is_empty() {
                    cur.push(' ');
                }
                cur.push_str(word);
            }
            lines.push(cur);
        }
        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }

        let height = u32::try_from(lines.len()).unwrap_or(u32::MAX).saturating_mul(cell);
        self.nodes.push(LayoutNode {
            lb: LayoutBox {
                rect: Rect { x: coord(x), y: coord(y), width, height },
                box_model: BoxModel { margin: 0, padding: 0 },
            },
            content: LayoutContent::Text { text: lines.join("\n"), color, scale },
        });
        height
    }
}

/// `len * num / den` in 64 bits, capped at [`MAX_LENGTH`]
fn scale_dim(len: u32, num: u32, den: u32) -> u32 {
    (len as u64 * num as u64 / den as u64).min(MAX_LENGTH as u64) as u32
}

fn collect_inline_text(el: &ElementRef<'_>, run: &mut TextRun) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => run.push(text),
            Node::Element(element) if element.name() == "br" => run.line_break(),
            Node::Element(element) if !SKIPPED.contains(&element.name()) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_inline_text(&child_el, run);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::style::parse_stylesheet;

    fn layout(html: &str, css: &str, width: u32, height: u32) -> LayoutTree {
        let doc = Html::parse_document(html);
        let rules = parse_stylesheet(css);
        let cascade = Cascade { rules: &rules, mutations: &[] };
        layout_document(&doc, &cascade, &HashMap::new(), Viewport { width, height })
    }

    #[test]
    fn body_background_propagates_to_canvas() {
        let tree = layout("<html><body style='background:#ff0000'></body></html>", "", 64, 32);
        assert_eq!(tree.canvas_background, Some((255, 0, 0, 255)));
        assert!(tree.nodes.is_empty());
    }

    #[test]
    fn blocks_stack_vertically() {
        let tree = layout(
            "<html><body><div class=a></div><div class=b></div></body></html>",
            ".a { height: 10px; background: red } .b { height: 20px; background: blue }",
            100,
            100,
        );
        assert_eq!(tree.nodes.len(), 2);
        let a = &tree.nodes[0].lb.rect;
        let b = &tree.nodes[1].lb.rect;
        assert_eq!((a.x, a.y, a.width, a.height), (8, 8, 84, 10));
        assert_eq!((b.x, b.y, b.width, b.height), (8, 18, 84, 20));
    }

    #[test]
    fn text_wraps_on_cell_grid() {
        let tree = layout(
            "<html><body style='margin:0'><p style='margin:0'>aaaa bbbb cccc</p></body></html>",
            "",
            80,
            100,
        );
        match &tree.nodes[0].content {
            LayoutContent::Text { text, scale, .. } => {
                assert_eq!(*scale, 1);
                assert_eq!(text, "aaaa bbbb\ncccc");
            }
            other => panic!("unexpected node {:?}", other),
        }
        assert_eq!(tree.nodes[0].lb.rect.height, 16);
    }

    #[test]
    fn hidden_and_head_content_is_skipped() {
        let tree = layout(
            "<html><head><title>T</title></head><body><div style='display:none'>x</div><script>var a=1;</script></body></html>",
            "",
            100,
            100,
        );
        assert!(tree.nodes.is_empty());
    }

    #[test]
    fn absurd_box_sizes_saturate_instead_of_overflowing() {
        let tree = layout(
            "<html><body><div class=a><div class=b>text</div></div><div class=c></div></body></html>",
            ".a { margin: 5000000000px; padding: 4294967295px; background: red }
             .b { width: 1e12px; height: 4000000000px; background: blue }
             .c { height: 10px; background: green }",
            64,
            64,
        );
        assert!(!tree.nodes.is_empty());
        for node in &tree.nodes {
            assert!(node.lb.rect.x >= 0 && node.lb.rect.y >= 0);
        }
        let a = &tree.nodes[0].lb.rect;
        assert_eq!((a.x, a.y), (8 + MAX_LENGTH as i32, 8 + MAX_LENGTH as i32));
    }

    #[test]
    fn oversized_image_attributes_are_capped() {
        let doc = Html::parse_document(
            "<html><body style='margin:0'><img src='a.png' width='4000000000'><img src='b.png' height='99999999999'></body></html>",
        );
        let rules = parse_stylesheet("");
        let cascade = Cascade { rules: &rules, mutations: &[] };
        let mut images = HashMap::new();
        images.insert("a.png".to_string(), Arc::new(RgbaImage::new(1, 3)));
        images.insert("b.png".to_string(), Arc::new(RgbaImage::new(3, 1)));
        let tree = layout_document(&doc, &cascade, &images, Viewport { width: 32, height: 32 });

        assert_eq!(tree.nodes.len(), 2);
        let a = &tree.nodes[0].lb.rect;
        assert_eq!((a.width, a.height), (MAX_LENGTH, MAX_LENGTH));
        let b = &tree.nodes[1].lb.rect;
        assert_eq!((b.width, b.height), (MAX_LENGTH, MAX_LENGTH));
        assert_eq!(b.y, MAX_LENGTH as i32);
    }
}
