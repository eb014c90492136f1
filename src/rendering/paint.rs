//! Display list: the ordered paint commands produced from a layout pass

use std::sync::Arc;

use image::RgbaImage;

use crate::rendering::layout::{LayoutContent, LayoutTree};
use crate::rendering::style::Rgba;

#[derive(Debug, Clone, PartialEq)]
pub enum PaintCommand {
    SolidRect {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        rgba: Rgba,
    },
    Text {
        x: i32,
        y: i32,
        text: String,
        rgba: Rgba,
        scale: u32,
    },
    Image {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        image: Arc<RgbaImage>,
    },
}

/// Canvas background plus commands in back-to-front order.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayList {
    pub background: Rgba,
    pub commands: Vec<PaintCommand>,
}

impl DisplayList {
    /// A list that only clears the canvas.
    pub fn blank(background: Rgba) -> Self {
        Self { background, commands: Vec::new() }
    }
}

/// Turn a layout tree into paint commands. `default_background` is used
/// when neither the root nor the body set one.
pub fn build_display_list(tree: &LayoutTree, default_background: Rgba) -> DisplayList {
    let commands = tree
        .nodes
        .iter()
        .map(|node| {
            let r = &node.lb.rect;
            match &node.content {
                LayoutContent::Block { background } => PaintCommand::SolidRect {
                    x: r.x,
                    y: r.y,
                    width: r.width,
                    height: r.height,
                    rgba: *background,
                },
                LayoutContent::Text { text, color, scale } => PaintCommand::Text {
                    x: r.x,
                    y: r.y,
                    text: text.clone(),
                    rgba: *color,
                    scale: *scale,
                },
                LayoutContent::Image { image } => PaintCommand::Image {
                    x: r.x,
                    y: r.y,
                    width: r.width,
                    height: r.height,
                    image: Arc::clone(image),
                },
            }
        })
        .collect();

    DisplayList {
        background: tree.canvas_background.unwrap_or(default_background),
        commands,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::layout::{BoxModel, LayoutBox, LayoutNode, Rect};
    use crate::rendering::style::WHITE;

    #[test]
    fn block_nodes_become_solid_rects() {
        let tree = LayoutTree {
            canvas_background: None,
            nodes: vec![LayoutNode {
                lb: LayoutBox {
                    rect: Rect { x: 0, y: 0, width: 10, height: 10 },
                    box_model: BoxModel { margin: 0, padding: 0 },
                },
                content: LayoutContent::Block { background: (255, 0, 0, 255) },
            }],
        };
        let list = build_display_list(&tree, WHITE);
        assert_eq!(list.background, WHITE);
        match &list.commands[0] {
            PaintCommand::SolidRect { width, rgba, .. } => {
                assert_eq!(*width, 10);
                assert_eq!(*rgba, (255, 0, 0, 255));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn canvas_background_overrides_default() {
        let tree = LayoutTree { canvas_background: Some((1, 2, 3, 255)), nodes: vec![] };
        assert_eq!(build_display_list(&tree, WHITE).background, (1, 2, 3, 255));
    }
}
