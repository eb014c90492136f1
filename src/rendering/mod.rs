//! In-process content stack: document state, style cascade, layout, paint
//! and raster.
//!
//! A [`Page`] accumulates what the loader reports (document, stylesheets,
//! decoded images, script style mutations) and produces a [`DisplayList`]
//! for a viewport on demand. It lives on the driver thread only.

pub mod layout;
pub mod paint;
pub mod raster;
pub mod style;

use std::collections::HashMap;
use std::sync::Arc;

use image::RgbaImage;
use scraper::{Html, Selector};

use crate::Viewport;
pub use paint::{DisplayList, PaintCommand};
pub use style::{Declaration, Rgba, StyleMutation, StyleRule};

/// Document state for the single page being captured.
#[derive(Default)]
pub struct Page {
    document: Option<Html>,
    title: Option<String>,
    rules: Vec<StyleRule>,
    images: HashMap<String, Arc<RgbaImage>>,
    mutations: Vec<(Selector, Vec<Declaration>)>,
}

impl Page {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the document. Inline `<style>` blocks are parsed right away;
    /// linked stylesheets arrive later through [`Page::add_stylesheet`].
    pub fn set_document(&mut self, html: &str) {
        let document = Html::parse_document(html);
        self.rules.clear();
        self.images.clear();
        self.mutations.clear();

        if let Ok(style_sel) = Selector::parse("style") {
            for node in document.select(&style_sel) {
                let css = node.text().collect::<String>();
                self.rules.extend(style::parse_stylesheet(&css));
            }
        }
        self.title = Selector::parse("title").ok().and_then(|sel| {
            document
                .select(&sel)
                .next()
                .map(|n| n.text().collect::<String>().trim().to_string())
        });
        self.document = Some(document);
    }

    pub fn add_stylesheet(&mut self, css: &str) {
        self.rules.extend(style::parse_stylesheet(css));
    }

    /// Register a decoded image under the `src` it was referenced by.
    pub fn add_image(&mut self, src: &str, image: Arc<RgbaImage>) {
        self.images.insert(src.to_string(), image);
    }

    /// Append script style writes. Returns how many were applicable.
    pub fn apply_mutations(&mut self, mutations: Vec<StyleMutation>) -> usize {
        let mut applied = 0;
        for m in mutations {
            match Selector::parse(&m.selector) {
                Ok(selector) => {
                    self.mutations.push((selector, m.declarations));
                    applied += 1;
                }
                Err(_) => log::debug!("ignoring style mutation for selector {:?}", m.selector),
            }
        }
        applied
    }

    pub fn set_title(&mut self, title: String) {
        self.title = Some(title);
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Lay out and paint the current state for `viewport`.
    pub fn display_list(&self, viewport: Viewport, default_background: Rgba) -> DisplayList {
        let Some(document) = &self.document else {
            return DisplayList::blank(default_background);
        };
        let cascade = style::Cascade {
            rules: &self.rules,
            mutations: &self.mutations,
        };
        let tree = layout::layout_document(document, &cascade, &self.images, viewport);
        paint::build_display_list(&tree, default_background)
    }
}
