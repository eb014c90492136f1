//! Minimal CSS support: colors, declarations, flat stylesheets and the
//! per-element cascade used by layout.
//!
//! Cascade order is source order only (no specificity): stylesheet rules as
//! they arrived, then the `style` attribute, then script mutations.

use scraper::{ElementRef, Selector};

/// Straight (non-premultiplied) RGBA8 color
pub type Rgba = (u8, u8, u8, u8);

pub const BLACK: Rgba = (0, 0, 0, 255);
pub const WHITE: Rgba = (255, 255, 255, 255);
pub const TRANSPARENT: Rgba = (0, 0, 0, 0);

/// A single `property: value` pair, property lowercased.
pub type Declaration = (String, String);

/// A parsed style rule: one (possibly grouped) selector and its declarations.
#[derive(Debug, Clone)]
pub struct StyleRule {
    pub selector: Selector,
    pub declarations: Vec<Declaration>,
}

/// Style writes recorded by scripts, keyed by the selector used to reach
/// the element (`body`, `html`, `#id`, or any `querySelector` argument).
#[derive(Debug, Clone, PartialEq)]
pub struct StyleMutation {
    pub selector: String,
    pub declarations: Vec<Declaration>,
}

/// Upper bound for any resolved length. Layout works in `u32` with
/// saturating arithmetic, so this keeps box coordinates far from overflow.
pub const MAX_LENGTH: u32 = crate::surface::MAX_SURFACE_DIMENSION * 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Length {
    Px(u32),
    Percent(f32),
}

impl Length {
    pub fn parse(value: &str) -> Option<Length> {
        let v = value.trim().to_ascii_lowercase();
        if let Some(p) = v.strip_suffix('%') {
            return p.trim().parse::<f32>().ok().filter(|p| *p >= 0.0).map(Length::Percent);
        }
        let num = v.strip_suffix("px").unwrap_or(&v).trim();
        num.parse::<f32>()
            .ok()
            .filter(|n| *n >= 0.0)
            .map(|n| Length::Px(clamp_length(n)))
    }

    /// Resolve against `reference` (the containing width), capped at [`MAX_LENGTH`].
    pub fn resolve(self, reference: u32) -> u32 {
        match self {
            Length::Px(px) => px.min(MAX_LENGTH),
            Length::Percent(p) => clamp_length(reference as f32 * p / 100.0),
        }
    }
}

fn clamp_length(n: f32) -> u32 {
    if n.is_nan() {
        return 0;
    }
    n.round().min(MAX_LENGTH as f32) as u32
}

/// Computed values for the handful of properties layout understands.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedStyle {
    pub display_none: bool,
    pub background: Option<Rgba>,
    pub color: Rgba,
    pub width: Option<Length>,
    pub height: Option<Length>,
    pub margin: Option<u32>,
    pub padding: Option<u32>,
}

impl Default for ComputedStyle {
    fn default() -> Self {
        Self {
            display_none: false,
            background: None,
            color: BLACK,
            width: None,
            height: None,
            margin: None,
            padding: None,
        }
    }
}

impl ComputedStyle {
    /// Initial style of a child: only `color` inherits.
    pub fn inherit(parent: &ComputedStyle) -> Self {
        Self {
            color: parent.color,
            ..Default::default()
        }
    }

    pub fn apply(&mut self, declarations: &[Declaration]) {
        for (prop, value) in declarations {
            match prop.as_str() {
                "background" | "background-color" => {
                    // shorthand: first token that parses as a color wins
                    let color = parse_color(value)
                        .or_else(|| value.split_whitespace().find_map(parse_color));
                    if let Some(c) = color {
                        self.background = if c.3 == 0 { None } else { Some(c) };
                    }
                }
                "color" => {
                    if let Some(c) = parse_color(value) {
                        self.color = c;
                    }
                }
                "display" => self.display_none = value.trim().eq_ignore_ascii_case("none"),
                "width" => self.width = Length::parse(value),
                "height" => self.height = Length::parse(value),
                "margin" => self.margin = first_px(value),
                "padding" => self.padding = first_px(value),
                _ => {}
            }
        }
    }
}

fn first_px(value: &str) -> Option<u32> {
    match value.split_whitespace().next().and_then(Length::parse) {
        Some(Length::Px(px)) => Some(px),
        _ => None,
    }
}

/// Parse `a: b; c: d` into lowercased-property declarations.
pub fn parse_declarations(block: &str) -> Vec<Declaration> {
    block
        .split(';')
        .filter_map(|decl| {
            let (prop, value) = decl.split_once(':')?;
            let prop = prop.trim().to_ascii_lowercase();
            let value = value.trim().trim_end_matches("!important").trim();
            if prop.is_empty() || value.is_empty() {
                None
            } else {
                Some((prop, value.to_string()))
            }
        })
        .collect()
}

/// Parse a flat stylesheet. At-rules (and anything nested inside them) and
/// rules with selectors scraper cannot parse are skipped.
pub fn parse_stylesheet(css: &str) -> Vec<StyleRule> {
    let css = strip_comments(css);
    let mut rules = Vec::new();
    let mut rest = css.as_str();

    while let Some(open) = rest.find('{') {
        let prelude = rest[..open].trim();
        let Some(close) = matching_brace(rest, open) else {
            break;
        };
        let body = &rest[open + 1..close];
        rest = &rest[close + 1..];

        if prelude.starts_with('@') || prelude.is_empty() {
            continue;
        }
        match Selector::parse(prelude) {
            Ok(selector) => rules.push(StyleRule {
                selector,
                declarations: parse_declarations(body),
            }),
            Err(_) => log::debug!("skipping unsupported selector {:?}", prelude),
        }
    }
    rules
}

fn strip_comments(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    let mut rest = css;
    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find("*/") {
            Some(end) => rest = &rest[start + 2 + end + 2..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

fn matching_brace(s: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, ch) in s[open..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Everything the cascade needs, borrowed from the page for one layout pass.
pub struct Cascade<'a> {
    pub rules: &'a [StyleRule],
    pub mutations: &'a [(Selector, Vec<Declaration>)],
}

impl Cascade<'_> {
    pub fn compute(&self, element: &ElementRef<'_>, parent: &ComputedStyle) -> ComputedStyle {
        let mut style = ComputedStyle::inherit(parent);
        for rule in self.rules.iter().filter(|r| r.selector.matches(element)) {
            style.apply(&rule.declarations);
        }
        if let Some(inline) = element.value().attr("style") {
            style.apply(&parse_declarations(inline));
        }
        for (selector, declarations) in self.mutations {
            if selector.matches(element) {
                style.apply(declarations);
            }
        }
        style
    }
}

/// Parse a CSS color: named colors, `#rgb`, `#rgba`, `#rrggbb`, `#rrggbbaa`,
/// `rgb()` and `rgba()`.
pub fn parse_color(value: &str) -> Option<Rgba> {
    let v = value.trim().to_ascii_lowercase();
    if let Some(hex) = v.strip_prefix('#') {
        return parse_hex(hex);
    }
    if let Some(args) = v
        .strip_prefix("rgba(")
        .or_else(|| v.strip_prefix("rgb("))
        .and_then(|a| a.strip_suffix(')'))
    {
        return parse_rgb_args(args);
    }
    named_color(&v)
}

fn parse_hex(hex: &str) -> Option<Rgba> {
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let nibble = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok().map(|n| n * 17);
    let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    match hex.len() {
        3 => Some((nibble(0)?, nibble(1)?, nibble(2)?, 255)),
        4 => Some((nibble(0)?, nibble(1)?, nibble(2)?, nibble(3)?)),
        6 => Some((byte(0)?, byte(2)?, byte(4)?, 255)),
        8 => Some((byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
        _ => None,
    }
}

fn parse_rgb_args(args: &str) -> Option<Rgba> {
    let parts: Vec<&str> = args
        .split(|c| c == ',' || c == '/' || c == ' ')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() != 3 && parts.len() != 4 {
        return None;
    }
    let channel = |p: &str| -> Option<u8> {
        if let Some(pct) = p.strip_suffix('%') {
            let f: f32 = pct.parse().ok()?;
            Some((f.clamp(0.0, 100.0) * 2.55).round() as u8)
        } else {
            let f: f32 = p.parse().ok()?;
            Some(f.clamp(0.0, 255.0).round() as u8)
        }
    };
    let alpha = match parts.get(3) {
        Some(p) => {
            let a = if let Some(pct) = p.strip_suffix('%') {
                pct.parse::<f32>().ok()? / 100.0
            } else {
                p.parse::<f32>().ok()?
            };
            (a.clamp(0.0, 1.0) * 255.0).round() as u8
        }
        None => 255,
    };
    Some((channel(parts[0])?, channel(parts[1])?, channel(parts[2])?, alpha))
}

fn named_color(name: &str) -> Option<Rgba> {
    let c = match name {
        "black" => BLACK,
        "white" => WHITE,
        "transparent" => TRANSPARENT,
        "red" => (255, 0, 0, 255),
        "lime" => (0, 255, 0, 255),
        "green" => (0, 128, 0, 255),
        "blue" => (0, 0, 255, 255),
        "yellow" => (255, 255, 0, 255),
        "cyan" | "aqua" => (0, 255, 255, 255),
        "magenta" | "fuchsia" => (255, 0, 255, 255),
        "gray" | "grey" => (128, 128, 128, 255),
        "silver" => (192, 192, 192, 255),
        "maroon" => (128, 0, 0, 255),
        "navy" => (0, 0, 128, 255),
        "olive" => (128, 128, 0, 255),
        "purple" => (128, 0, 128, 255),
        "teal" => (0, 128, 128, 255),
        "orange" => (255, 165, 0, 255),
        "pink" => (255, 192, 203, 255),
        "brown" => (165, 42, 42, 255),
        "rebeccapurple" => (102, 51, 153, 255),
        _ => return None,
    };
    Some(c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    #[test]
    fn parses_color_forms() {
        assert_eq!(parse_color("#ff0000"), Some((255, 0, 0, 255)));
        assert_eq!(parse_color("#0f0"), Some((0, 255, 0, 255)));
        assert_eq!(parse_color("#0000ff80"), Some((0, 0, 255, 128)));
        assert_eq!(parse_color("rgb(1, 2, 3)"), Some((1, 2, 3, 255)));
        assert_eq!(parse_color("rgba(10,20,30,0.5)"), Some((10, 20, 30, 128)));
        assert_eq!(parse_color(" Red "), Some((255, 0, 0, 255)));
        assert_eq!(parse_color("#ggg"), None);
        assert_eq!(parse_color("url(x.png)"), None);
    }

    #[test]
    fn background_shorthand_picks_color_token() {
        let mut style = ComputedStyle::default();
        style.apply(&parse_declarations("background: url(a.png) no-repeat #00ff00"));
        assert_eq!(style.background, Some((0, 255, 0, 255)));
        style.apply(&parse_declarations("background-color: transparent"));
        assert_eq!(style.background, None);
    }

    #[test]
    fn stylesheet_skips_at_rules_and_comments() {
        let css = "/* head */ body { background: red; }\n@media print { p { color: blue } }\n#main, .x { width: 50%; margin: 4px 2px }";
        let rules = parse_stylesheet(css);
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].declarations, vec![("background".to_string(), "red".to_string())]);
        assert_eq!(rules[1].declarations.len(), 2);
    }

    #[test]
    fn cascade_applies_rules_then_inline_then_mutations() {
        let doc = Html::parse_document(
            r#"<html><body><div id="a" class="box" style="color: green"></div></body></html>"#,
        );
        let rules = parse_stylesheet(".box { background: red; color: blue } div { width: 10px }");
        let mutations = vec![(
            Selector::parse("#a").unwrap(),
            vec![("background-color".to_string(), "#0000ff".to_string())],
        )];
        let cascade = Cascade { rules: &rules, mutations: &mutations };
        let sel = Selector::parse("#a").unwrap();
        let el = doc.select(&sel).next().unwrap();
        let style = cascade.compute(&el, &ComputedStyle::default());
        assert_eq!(style.color, (0, 128, 0, 255));
        assert_eq!(style.background, Some((0, 0, 255, 255)));
        assert_eq!(style.width, Some(Length::Px(10)));
    }

    #[test]
    fn lengths_resolve_against_reference() {
        assert_eq!(Length::parse("25%").map(|l| l.resolve(200)), Some(50));
        assert_eq!(Length::parse("12px"), Some(Length::Px(12)));
        assert_eq!(Length::parse("auto"), None);
    }

    #[test]
    fn huge_lengths_are_capped() {
        assert_eq!(Length::parse("5000000000px"), Some(Length::Px(MAX_LENGTH)));
        assert_eq!(Length::parse("1e30"), Some(Length::Px(MAX_LENGTH)));
        assert_eq!(Length::parse("1e9%").map(|l| l.resolve(640)), Some(MAX_LENGTH));
        assert_eq!(Length::Px(u32::MAX).resolve(0), MAX_LENGTH);

        let mut style = ComputedStyle::default();
        style.apply(&parse_declarations("margin: 9999999999px; padding: 4294967295px"));
        assert_eq!(style.margin, Some(MAX_LENGTH));
        assert_eq!(style.padding, Some(MAX_LENGTH));
    }
}
