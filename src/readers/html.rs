use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::ops::Range;
use std::sync::{Arc, OnceLock};

use image::RgbaImage;
use parley::style::{FontStack, FontStyle, FontWeight, StyleProperty};
use tracing::{debug, info};

use crate::{
    core::{color::parse_rgba, Fraction, Frame, GravityType},
    error::{ReaderError, Result},
    readers::{Reader, ReaderInfo},
};

const DEFAULT_FONT_SIZE: f32 = 16.0;
const DEFAULT_FONT_FAMILY: &str = "sans-serif";

fn font_database() -> Arc<usvg::fontdb::Database> {
    static FONTS: OnceLock<Arc<usvg::fontdb::Database>> = OnceLock::new();
    FONTS
        .get_or_init(|| {
            let mut db = usvg::fontdb::Database::new();
            db.load_system_fonts();
            debug!("Loaded {} font faces", db.len());
            Arc::new(db)
        })
        .clone()
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Element {
    tag: String,
    attrs: HashMap<String, String>,
    children: Vec<Node>,
}

impl Element {
    fn new(tag: &str) -> Self {
        Self { tag: tag.to_string(), attrs: HashMap::new(), children: Vec::new() }
    }

    fn id(&self) -> Option<&str> {
        self.attrs.get("id").map(String::as_str)
    }

    fn classes(&self) -> impl Iterator<Item = &str> {
        self.attrs.get("class").into_iter().flat_map(|c| c.split_whitespace())
    }
}

const VOID_TAGS: &[&str] = &["br", "hr", "img", "meta", "link", "input"];

/// Replace named and numeric character references
fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        rest = &rest[start..];

        let decoded = rest.find(';').filter(|end| *end <= 10).and_then(|end| {
            let entity = &rest[1..end];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                "copy" => Some('©'),
                "reg" => Some('®'),
                "hellip" => Some('…'),
                "mdash" => Some('—'),
                "ndash" => Some('–'),
                _ => entity.strip_prefix('#').and_then(|num| {
                    let code = match num.strip_prefix(|c| c == 'x' || c == 'X') {
                        Some(hex) => u32::from_str_radix(hex, 16).ok(),
                        None => num.parse::<u32>().ok(),
                    };
                    code.and_then(char::from_u32)
                }),
            };
            ch.map(|c| (c, end))
        });

        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Split `p class="a b" id=x` into a lowercase tag name and attributes
fn parse_tag(src: &str) -> (String, HashMap<String, String>) {
    let src = src.trim();
    let name_end = src.find(char::is_whitespace).unwrap_or(src.len());
    let name = src[..name_end].to_lowercase();
    let mut attrs = HashMap::new();

    let mut rest = src[name_end..].trim_start();
    while !rest.is_empty() {
        let key_end = rest.find(|c: char| c == '=' || c.is_whitespace()).unwrap_or(rest.len());
        let key = rest[..key_end].to_lowercase();
        rest = rest[key_end..].trim_start();

        let value = if let Some(after_eq) = rest.strip_prefix('=') {
            let after_eq = after_eq.trim_start();
            match after_eq.chars().next() {
                Some(quote @ ('"' | '\'')) => {
                    let body = &after_eq[1..];
                    let end = body.find(quote).unwrap_or(body.len());
                    rest = body.get(end + 1..).unwrap_or("");
                    body[..end].to_string()
                }
                _ => {
                    let end = after_eq.find(char::is_whitespace).unwrap_or(after_eq.len());
                    rest = &after_eq[end..];
                    after_eq[..end].to_string()
                }
            }
        } else {
            String::new()
        };

        if !key.is_empty() {
            attrs.insert(key, decode_entities(&value));
        }
        rest = rest.trim_start();
    }

    (name, attrs)
}

/// Lenient HTML fragment parser. Unknown tags are kept, stray end tags are
/// ignored and unclosed elements close at the end of input. `<style>` blocks
/// are returned separately.
fn parse_html(src: &str) -> (Vec<Node>, String) {
    fn attach(stack: &mut [Element], node: Node) {
        if let Some(parent) = stack.last_mut() {
            parent.children.push(node);
        }
    }

    let mut stack = vec![Element::new("#root")];
    let mut styles = String::new();
    let mut rest = src;

    while !rest.is_empty() {
        if let Some(comment) = rest.strip_prefix("<!--") {
            rest = comment.find("-->").map(|i| &comment[i + 3..]).unwrap_or("");
            continue;
        }

        if !rest.starts_with('<') {
            let end = rest.find('<').unwrap_or(rest.len());
            attach(&mut stack, Node::Text(decode_entities(&rest[..end])));
            rest = &rest[end..];
            continue;
        }

        let Some(end) = rest.find('>') else {
            attach(&mut stack, Node::Text(decode_entities(rest)));
            break;
        };
        let tag_src = &rest[1..end];
        rest = &rest[end + 1..];

        if let Some(closing) = tag_src.strip_prefix('/') {
            let name = closing.trim().to_lowercase();
            if let Some(pos) = stack.iter().rposition(|e| e.tag == name) {
                if pos > 0 {
                    while stack.len() > pos {
                        if let Some(done) = stack.pop() {
                            attach(&mut stack, Node::Element(done));
                        }
                    }
                }
            }
            continue;
        }
        if tag_src.starts_with('!') || tag_src.starts_with('?') {
            continue;
        }

        let self_closing = tag_src.ends_with('/');
        let (name, attrs) = parse_tag(tag_src.trim_end_matches('/'));

        if name == "style" || name == "script" {
            let close = format!("</{}", name);
            let body_end = rest.to_ascii_lowercase().find(&close).unwrap_or(rest.len());
            if name == "style" {
                styles.push_str(&rest[..body_end]);
                styles.push('\n');
            }
            rest = &rest[body_end..];
            rest = rest.find('>').map(|i| &rest[i + 1..]).unwrap_or("");
            continue;
        }

        let element = Element { tag: name, attrs, children: Vec::new() };
        if self_closing || VOID_TAGS.contains(&element.tag.as_str()) {
            attach(&mut stack, Node::Element(element));
        } else {
            stack.push(element);
        }
    }

    while stack.len() > 1 {
        if let Some(done) = stack.pop() {
            attach(&mut stack, Node::Element(done));
        }
    }
    let root = stack.pop().map(|r| r.children).unwrap_or_default();
    (root, styles)
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Selector {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
}

impl Selector {
    /// Parse a compound selector such as `*`, `p`, `.note`, `#title` or `p.note`
    fn parse(src: &str) -> Option<Self> {
        let src = src.trim();
        if src.is_empty() || src.contains(|c: char| c.is_whitespace() || ">+~:[".contains(c)) {
            return None;
        }

        let mut selector = Selector::default();
        let mut kind = ' ';
        let mut token = String::new();

        let flush = |kind: char, token: &mut String, selector: &mut Selector| {
            if token.is_empty() {
                return;
            }
            let value = std::mem::take(token);
            match kind {
                '.' => selector.classes.push(value),
                '#' => selector.id = Some(value),
                _ if value != "*" => selector.tag = Some(value.to_lowercase()),
                _ => {}
            }
        };

        for c in src.chars() {
            if c == '.' || c == '#' {
                flush(kind, &mut token, &mut selector);
                kind = c;
            } else {
                token.push(c);
            }
        }
        flush(kind, &mut token, &mut selector);
        Some(selector)
    }

    fn specificity(&self) -> u32 {
        self.id.as_ref().map_or(0, |_| 100) + self.classes.len() as u32 * 10 + self.tag.as_ref().map_or(0, |_| 1)
    }

    fn matches(&self, element: &Element) -> bool {
        if self.tag.as_ref().is_some_and(|t| *t != element.tag) {
            return false;
        }
        if self.id.as_ref().is_some_and(|id| Some(id.as_str()) != element.id()) {
            return false;
        }
        self.classes.iter().all(|c| element.classes().any(|ec| ec == c))
    }
}

#[derive(Debug, Clone)]
struct Rule {
    selector: Selector,
    specificity: u32,
    order: usize,
    declarations: Vec<(String, String)>,
}

fn parse_declarations(body: &str) -> Vec<(String, String)> {
    body.split(';')
        .filter_map(|decl| decl.split_once(':'))
        .map(|(prop, value)| {
            let value = value.trim().trim_end_matches("!important").trim();
            (prop.trim().to_lowercase(), value.to_string())
        })
        .filter(|(prop, value)| !prop.is_empty() && !value.is_empty())
        .collect()
}

fn strip_css_comments(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let mut rest = src;
    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        rest = rest[start + 2..].find("*/").map(|end| &rest[start + 2 + end + 2..]).unwrap_or("");
    }
    out.push_str(rest);
    out
}

fn parse_css(src: &str) -> Vec<Rule> {
    let src = strip_css_comments(src);
    let mut rules = Vec::new();

    for block in src.split('}') {
        let Some((selectors, body)) = block.split_once('{') else { continue };
        let declarations = parse_declarations(body);
        if declarations.is_empty() {
            continue;
        }

        for selector_src in selectors.split(',') {
            match Selector::parse(selector_src) {
                Some(selector) => rules.push(Rule {
                    specificity: selector.specificity(),
                    order: rules.len(),
                    selector,
                    declarations: declarations.clone(),
                }),
                None => debug!("Skipping unsupported CSS selector '{}'", selector_src.trim()),
            }
        }
    }
    rules
}

#[derive(Debug, Clone, PartialEq)]
struct TextStyle {
    font_family: String,
    font_size: f32,
    color: [u8; 4],
    bold: bool,
    italic: bool,
    underline: bool,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_family: DEFAULT_FONT_FAMILY.to_string(),
            font_size: DEFAULT_FONT_SIZE,
            color: [0, 0, 0, 255],
            bold: false,
            italic: false,
            underline: false,
        }
    }
}

/// Font size in px; `parent` resolves relative units
fn parse_font_size(value: &str, parent: f32) -> Option<f32> {
    let value = value.trim().to_lowercase();
    let keyword = match value.as_str() {
        "xx-small" => Some(9.0),
        "x-small" => Some(10.0),
        "small" => Some(13.0),
        "medium" => Some(16.0),
        "large" => Some(18.0),
        "x-large" => Some(24.0),
        "xx-large" => Some(32.0),
        "smaller" => Some(parent / 1.2),
        "larger" => Some(parent * 1.2),
        _ => None,
    };
    if keyword.is_some() {
        return keyword;
    }

    let number = |suffix: &str| value.strip_suffix(suffix).and_then(|n| n.trim().parse::<f32>().ok());
    number("pt")
        .map(|pt| pt * 96.0 / 72.0)
        .or_else(|| number("px"))
        .or_else(|| number("em").map(|em| em * parent))
        .or_else(|| number("%").map(|pct| pct / 100.0 * parent))
        .or_else(|| value.parse::<f32>().ok())
        .filter(|size| *size > 0.0)
}

fn apply_declaration(style: &mut TextStyle, parent_size: f32, prop: &str, value: &str) {
    match prop {
        "font-family" => style.font_family = value.replace('"', "'"),
        "font-size" => {
            if let Some(size) = parse_font_size(value, parent_size) {
                style.font_size = size;
            }
        }
        "color" => {
            if let Ok(color) = parse_rgba(value) {
                style.color = color;
            }
        }
        "font-weight" => {
            style.bold = match value.trim() {
                "bold" | "bolder" => true,
                "normal" | "lighter" => false,
                v => v.parse::<u32>().map(|w| w >= 600).unwrap_or(style.bold),
            }
        }
        "font-style" => style.italic = matches!(value.trim(), "italic" | "oblique"),
        "text-decoration" | "text-decoration-line" => style.underline = value.contains("underline"),
        "font" => {
            // Shorthand: only pick out the size and family
            let mut parts = value.split_whitespace();
            while let Some(part) = parts.next() {
                if let Some(size) = parse_font_size(part.split('/').next().unwrap_or(part), parent_size) {
                    style.font_size = size;
                    let family: Vec<&str> = parts.by_ref().collect();
                    if !family.is_empty() {
                        style.font_family = family.join(" ").replace('"', "'");
                    }
                    break;
                }
                match part {
                    "bold" => style.bold = true,
                    "italic" => style.italic = true,
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

fn is_block(tag: &str) -> bool {
    matches!(
        tag,
        "p" | "div" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "li" | "ul" | "ol" | "body" | "html" | "center" | "blockquote" | "hr"
    )
}

/// User-agent defaults for a tag, applied before author rules
fn apply_tag_defaults(style: &mut TextStyle, tag: &str, parent_size: f32) {
    let heading = |scale: f32, style: &mut TextStyle| {
        style.font_size = parent_size * scale;
        style.bold = true;
    };
    match tag {
        "h1" => heading(2.0, style),
        "h2" => heading(1.5, style),
        "h3" => heading(1.17, style),
        "h4" => heading(1.0, style),
        "h5" => heading(0.83, style),
        "h6" => heading(0.67, style),
        "b" | "strong" => style.bold = true,
        "i" | "em" => style.italic = true,
        "u" => style.underline = true,
        "small" => style.font_size = parent_size / 1.2,
        "big" => style.font_size = parent_size * 1.2,
        _ => {}
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String, TextStyle),
    LineBreak(TextStyle),
    Block,
}

struct StyleResolver {
    rules: Vec<Rule>,
}

impl StyleResolver {
    fn new(css: &str) -> Self {
        let mut rules = parse_css(css);
        rules.sort_by_key(|r| (r.specificity, r.order));
        Self { rules }
    }

    fn resolve(&self, element: &Element, parent: &TextStyle) -> TextStyle {
        let mut style = parent.clone();
        apply_tag_defaults(&mut style, &element.tag, parent.font_size);

        for rule in self.rules.iter().filter(|r| r.selector.matches(element)) {
            for (prop, value) in &rule.declarations {
                apply_declaration(&mut style, parent.font_size, prop, value);
            }
        }
        if let Some(inline) = element.attrs.get("style") {
            for (prop, value) in parse_declarations(inline) {
                apply_declaration(&mut style, parent.font_size, &prop, &value);
            }
        }
        style
    }

    fn flatten(&self, nodes: &[Node], parent: &TextStyle, out: &mut Vec<Segment>) {
        for node in nodes {
            match node {
                Node::Text(text) => out.push(Segment::Text(text.clone(), parent.clone())),
                Node::Element(element) => {
                    let style = self.resolve(element, parent);
                    if element.tag == "br" {
                        out.push(Segment::LineBreak(style));
                        continue;
                    }

                    let block = is_block(&element.tag);
                    if block {
                        out.push(Segment::Block);
                    }
                    if element.tag == "li" {
                        out.push(Segment::Text("• ".to_string(), style.clone()));
                    }
                    self.flatten(&element.children, &style, out);
                    if block {
                        out.push(Segment::Block);
                    }
                }
            }
        }
    }
}

/// The fragment as one string, whitespace collapsed and blocks separated by
/// newlines, with the style of each byte range
#[derive(Debug, Clone, Default, PartialEq)]
struct Paragraph {
    text: String,
    spans: Vec<(Range<usize>, TextStyle)>,
}

impl Paragraph {
    fn from_segments(segments: &[Segment]) -> Self {
        let mut paragraph = Paragraph::default();
        // Collapsed whitespace keeps the style it was written in
        let mut pending_space: Option<&TextStyle> = None;

        for segment in segments {
            match segment {
                Segment::Block => {
                    if !paragraph.at_line_start() {
                        let style = paragraph.spans.last().map(|(_, s)| s.clone()).unwrap_or_default();
                        paragraph.push("\n", &style);
                    }
                    pending_space = None;
                }
                Segment::LineBreak(style) => {
                    paragraph.push("\n", style);
                    pending_space = None;
                }
                Segment::Text(text, style) => {
                    let mut buf = [0u8; 4];
                    for c in text.chars() {
                        if c.is_whitespace() && c != '\u{a0}' {
                            pending_space.get_or_insert(style);
                            continue;
                        }
                        if let Some(space_style) = pending_space.take() {
                            if !paragraph.at_line_start() {
                                paragraph.push(" ", space_style);
                            }
                        }
                        paragraph.push(c.encode_utf8(&mut buf), style);
                    }
                }
            }
        }
        paragraph.trim_trailing_newlines();
        paragraph
    }

    fn at_line_start(&self) -> bool {
        self.text.is_empty() || self.text.ends_with('\n')
    }

    fn push(&mut self, text: &str, style: &TextStyle) {
        let start = self.text.len();
        self.text.push_str(text);
        let end = self.text.len();
        match self.spans.last_mut() {
            Some((range, last)) if range.end == start && last == style => range.end = end,
            _ => self.spans.push((start..end, style.clone())),
        }
    }

    fn trim_trailing_newlines(&mut self) {
        while self.text.ends_with('\n') {
            self.text.pop();
            let len = self.text.len();
            if let Some((range, _)) = self.spans.last_mut() {
                range.end = range.end.min(len);
                if range.is_empty() {
                    self.spans.pop();
                }
            }
        }
    }
}

/// A laid out line: the bytes it shows and its vertical metrics
#[derive(Debug, Clone, PartialEq)]
struct LineBox {
    range: Range<usize>,
    /// Top of the line box to the baseline
    ascent: f32,
    height: f32,
}

/// Shape the paragraph with parley and break it into lines no wider than
/// `max_width`, using the advances and metrics of the resolved fonts
fn break_lines(paragraph: &Paragraph, max_width: f32) -> Vec<LineBox> {
    if paragraph.text.is_empty() {
        return Vec::new();
    }

    let mut font_ctx = parley::FontContext::default();
    let mut layout_ctx: parley::LayoutContext<()> = parley::LayoutContext::new();
    let text = paragraph.text.as_str();

    let mut builder = layout_ctx.ranged_builder(&mut font_ctx, text, 1.0, true);
    builder.push_default(StyleProperty::FontStack(FontStack::Source(Cow::Borrowed(DEFAULT_FONT_FAMILY))));
    builder.push_default(StyleProperty::FontSize(DEFAULT_FONT_SIZE));
    for (range, style) in &paragraph.spans {
        builder.push(
            StyleProperty::FontStack(FontStack::Source(Cow::Owned(style.font_family.clone()))),
            range.clone(),
        );
        builder.push(StyleProperty::FontSize(style.font_size), range.clone());
        if style.bold {
            builder.push(StyleProperty::FontWeight(FontWeight::BOLD), range.clone());
        }
        if style.italic {
            builder.push(StyleProperty::FontStyle(FontStyle::Italic), range.clone());
        }
    }

    let mut layout: parley::Layout<()> = builder.build(text);
    layout.break_all_lines(Some(max_width));
    layout.align(Some(max_width), parley::Alignment::Start, parley::AlignmentOptions::default());

    let lines: Vec<LineBox> = layout
        .lines()
        .map(|line| {
            let m = line.metrics();
            LineBox {
                range: line.text_range(),
                ascent: m.leading * 0.5 + m.ascent,
                height: m.ascent + m.descent + m.leading,
            }
        })
        .collect();
    debug!("Laid out {} bytes of HTML text into {} lines", text.len(), lines.len());
    lines
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

fn svg_fill(color: [u8; 4]) -> String {
    let mut fill = format!("fill=\"#{:02x}{:02x}{:02x}\"", color[0], color[1], color[2]);
    if color[3] < 255 {
        let _ = write!(fill, " fill-opacity=\"{:.3}\"", color[3] as f32 / 255.0);
    }
    fill
}

/// Renders an HTML fragment styled with CSS onto a solid background, and
/// serves the result as an endless still
pub struct HtmlReader {
    width: u32,
    height: u32,
    x_offset: i32,
    y_offset: i32,
    gravity: GravityType,
    html: String,
    css: String,
    background_color: String,
    info: ReaderInfo,
    frame: Option<Arc<Frame>>,
}

impl HtmlReader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        width: u32,
        height: u32,
        x_offset: i32,
        y_offset: i32,
        gravity: GravityType,
        html: impl Into<String>,
        css: impl Into<String>,
        background_color: impl Into<String>,
    ) -> Self {
        Self {
            width,
            height,
            x_offset,
            y_offset,
            gravity,
            html: html.into(),
            css: css.into(),
            background_color: background_color.into(),
            info: ReaderInfo::default(),
            frame: None,
        }
    }

    fn paragraph(&self) -> Paragraph {
        let (nodes, embedded_css) = parse_html(&self.html);
        let resolver = StyleResolver::new(&format!("{}\n{}", self.css, embedded_css));

        let mut segments = Vec::new();
        resolver.flatten(&nodes, &TextStyle::default(), &mut segments);
        Paragraph::from_segments(&segments)
    }

    /// The SVG document that gets rasterised for this reader
    pub fn to_svg(&self) -> Result<String> {
        let background = parse_rgba(&self.background_color)?;
        let paragraph = self.paragraph();
        let lines = break_lines(&paragraph, self.width as f32);
        Ok(self.svg_document(&paragraph, &lines, background))
    }

    fn svg_document(&self, paragraph: &Paragraph, lines: &[LineBox], background: [u8; 4]) -> String {
        let (w, h) = (self.width as f32, self.height as f32);
        let doc_height: f32 = lines.iter().map(|l| l.height).sum();
        let mut y = match self.gravity.vertical_factor() {
            f if f <= 0.0 => self.y_offset as f32,
            f if f < 1.0 => (h - doc_height) / 2.0 + self.y_offset as f32,
            _ => h - doc_height + self.y_offset as f32,
        };
        let (x, anchor) = match self.gravity.horizontal_factor() {
            f if f <= 0.0 => (self.x_offset as f32, "start"),
            f if f < 1.0 => (w / 2.0 + self.x_offset as f32, "middle"),
            _ => (w + self.x_offset as f32, "end"),
        };

        let mut svg = String::new();
        let _ = write!(
            svg,
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{w}\" height=\"{h}\" viewBox=\"0 0 {w} {h}\">"
        );
        let _ = write!(svg, "<rect x=\"0\" y=\"0\" width=\"{w}\" height=\"{h}\" {}/>", svg_fill(background));

        for line in lines {
            let shown = paragraph.text.get(line.range.clone()).unwrap_or("").trim_end();
            let end = line.range.start + shown.len();
            if !shown.is_empty() {
                let baseline = y + line.ascent;
                let _ = write!(svg, "<text x=\"{x:.2}\" y=\"{baseline:.2}\" text-anchor=\"{anchor}\" xml:space=\"preserve\">");
                for (range, s) in &paragraph.spans {
                    let (from, to) = (range.start.max(line.range.start), range.end.min(end));
                    let Some(text) = paragraph.text.get(from..to).filter(|t| !t.is_empty()) else { continue };
                    let _ = write!(
                        svg,
                        "<tspan font-family=\"{}\" font-size=\"{:.2}\" {} font-weight=\"{}\" font-style=\"{}\"{}>{}</tspan>",
                        escape_xml(&s.font_family),
                        s.font_size,
                        svg_fill(s.color),
                        if s.bold { "bold" } else { "normal" },
                        if s.italic { "italic" } else { "normal" },
                        if s.underline { " text-decoration=\"underline\"" } else { "" },
                        escape_xml(text)
                    );
                }
                svg.push_str("</text>");
            }
            y += line.height;
        }
        svg.push_str("</svg>");
        svg
    }

    fn rasterize(&self, svg: &str) -> Result<RgbaImage> {
        let options = usvg::Options {
            fontdb: font_database(),
            ..Default::default()
        };
        let tree = usvg::Tree::from_str(svg, &options)
            .map_err(|e| ReaderError::InvalidFormat { details: format!("html render failed: {}", e) })?;

        let mut pixmap = resvg::tiny_skia::Pixmap::new(self.width, self.height).ok_or_else(|| ReaderError::InvalidFormat {
            details: format!("cannot allocate a {}x{} canvas", self.width, self.height),
        })?;
        resvg::render(&tree, resvg::tiny_skia::Transform::identity(), &mut pixmap.as_mut());

        let mut image = RgbaImage::new(self.width, self.height);
        for (dst, src) in image.pixels_mut().zip(pixmap.pixels()) {
            let c = src.demultiply();
            dst.0 = [c.red(), c.green(), c.blue(), c.alpha()];
        }
        Ok(image)
    }
}

impl Reader for HtmlReader {
    fn name(&self) -> &str {
        "html"
    }

    fn info(&self) -> &ReaderInfo {
        &self.info
    }

    fn open(&mut self) -> Result<()> {
        if self.frame.is_some() {
            return Ok(());
        }

        let svg = self.to_svg()?;
        let image = self.rasterize(&svg)?;

        let fps = Fraction::new(30, 1);
        self.info = ReaderInfo {
            has_video: true,
            has_single_image: true,
            vcodec: "html".to_string(),
            pixel_format: "rgba".to_string(),
            width: self.width,
            height: self.height,
            duration: 60.0 * 60.0 * 24.0,
            fps,
            video_timebase: fps.reciprocal(),
            ..Default::default()
        };
        self.info.update_video_length();
        self.info.update_display_ratio();

        info!("Rendered HTML block onto {}x{} canvas", self.width, self.height);
        self.frame = Some(Arc::new(Frame::from_image(1, image)));
        Ok(())
    }

    fn close(&mut self) {
        self.frame = None;
        self.info.vcodec.clear();
    }

    fn is_open(&self) -> bool {
        self.frame.is_some()
    }

    fn get_frame(&mut self, _number: i64) -> Result<Arc<Frame>> {
        self.frame
            .clone()
            .ok_or_else(|| ReaderError::ReaderClosed { path: self.name().to_string() }.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(width: u32, height: u32, x: i32, y: i32, gravity: GravityType, html: &str, css: &str) -> HtmlReader {
        HtmlReader::new(width, height, x, y, gravity, html, css, "#000000")
    }

    /// One line box per text line, 20px ascent in a 24px box
    fn fixed_lines(paragraph: &Paragraph) -> Vec<LineBox> {
        let mut lines = Vec::new();
        let mut start = 0;
        for part in paragraph.text.split_inclusive('\n') {
            lines.push(LineBox { range: start..start + part.len(), ascent: 20.0, height: 24.0 });
            start += part.len();
        }
        lines
    }

    #[test]
    fn test_entities() {
        assert_eq!(decode_entities("a &amp; b &lt;c&gt; &#65;&#x42;"), "a & b <c> AB");
        assert_eq!(decode_entities("fish & chips"), "fish & chips");
        assert_eq!(decode_entities("&bogus;"), "&bogus;");
    }

    #[test]
    fn test_parse_html_tree() {
        let (nodes, css) = parse_html("<style>p { color: red }</style><p class='x y' id=main>Hi <b>there</p><br/>");
        assert!(css.contains("color: red"));
        assert_eq!(nodes.len(), 2);

        let Node::Element(p) = &nodes[0] else { panic!("expected element") };
        assert_eq!(p.tag, "p");
        assert_eq!(p.id(), Some("main"));
        assert_eq!(p.classes().collect::<Vec<_>>(), vec!["x", "y"]);
        // The unclosed <b> is closed by </p>
        assert!(matches!(&p.children[1], Node::Element(b) if b.tag == "b"));
        assert!(matches!(&nodes[1], Node::Element(br) if br.tag == "br"));
    }

    #[test]
    fn test_selector_specificity() {
        let rules = parse_css("/* c */ * { color: #111 } p { color: #222 } .note, #t { color: #333 } div > p { color: red }");
        assert_eq!(rules.len(), 4);
        assert_eq!(rules[0].specificity, 0);
        assert_eq!(rules[1].specificity, 1);
        assert_eq!(rules[2].specificity, 10);
        assert_eq!(rules[3].specificity, 100);

        let compound = Selector::parse("p.note#t").unwrap();
        assert_eq!(compound.specificity(), 111);
    }

    #[test]
    fn test_cascade() {
        let resolver = StyleResolver::new("#t { color: #00ff00 } .big { font-size: 24pt } p { color: #ff0000; font-family: \"Serif\" }");
        let (nodes, _) = parse_html("<p id='t' class='big' style='font-style: italic'>x</p>");
        let Node::Element(p) = &nodes[0] else { panic!("expected element") };

        let style = resolver.resolve(p, &TextStyle::default());
        assert_eq!(style.color, [0, 255, 0, 255]);
        assert_eq!(style.font_size, 32.0);
        assert_eq!(style.font_family, "'Serif'");
        assert!(style.italic);
    }

    #[test]
    fn test_font_sizes() {
        assert_eq!(parse_font_size("12pt", 16.0), Some(16.0));
        assert_eq!(parse_font_size("2em", 10.0), Some(20.0));
        assert_eq!(parse_font_size("150%", 10.0), Some(15.0));
        assert_eq!(parse_font_size("large", 10.0), Some(18.0));
        assert_eq!(parse_font_size("huge", 10.0), None);
    }

    #[test]
    fn test_paragraph_collapses_whitespace() {
        let html = "<h1>Title</h1><p>one two   three\n four</p>line<br>next<br>";
        let paragraph = reader(200, 100, 0, 0, GravityType::TopLeft, html, "").paragraph();

        assert_eq!(paragraph.text, "Title\none two three four\nline\nnext");
        let (title, style) = &paragraph.spans[0];
        assert_eq!(&paragraph.text[title.clone()], "Title\n");
        assert_eq!(style.font_size, 32.0);
        assert!(style.bold);
        assert!(paragraph.spans[1..].iter().all(|(_, s)| s.font_size == DEFAULT_FONT_SIZE && !s.bold));
    }

    #[test]
    fn test_paragraph_spans_follow_inline_styles() {
        let html = "<p>plain <b>bold</b> <i>it</i></p>";
        let paragraph = reader(200, 100, 0, 0, GravityType::TopLeft, html, "").paragraph();

        assert_eq!(paragraph.text, "plain bold it");
        let pieces: Vec<(&str, bool, bool)> = paragraph
            .spans
            .iter()
            .map(|(r, s)| (&paragraph.text[r.clone()], s.bold, s.italic))
            .collect();
        assert_eq!(pieces, vec![("plain ", false, false), ("bold", true, false), (" ", false, false), ("it", false, true)]);
    }

    #[test]
    fn test_svg_gravity_bottom_right() {
        let reader = reader(
            1280, 720, -16, -16, GravityType::BottomRight,
            "<p>Hello &amp; welcome</p>",
            "* { font-size: 20px; color: #ffffff }",
        );
        let paragraph = reader.paragraph();
        let svg = reader.svg_document(&paragraph, &fixed_lines(&paragraph), [0, 0, 0, 255]);

        assert!(svg.contains("text-anchor=\"end\""));
        assert!(svg.contains("x=\"1264.00\""));
        // One 24px line: top = 720 - 24 - 16, baseline 20 below
        assert!(svg.contains("y=\"700.00\""));
        assert!(svg.contains("Hello &amp; welcome"));
        assert!(svg.contains("fill=\"#ffffff\""));
    }

    #[test]
    fn test_svg_lines_stack_and_center() {
        let reader = reader(100, 100, 0, 0, GravityType::Center, "<p>a</p><p>b</p>", "");
        let paragraph = reader.paragraph();
        let svg = reader.svg_document(&paragraph, &fixed_lines(&paragraph), [0x12, 0x34, 0x56, 255]);

        assert!(svg.contains("text-anchor=\"middle\""));
        assert!(svg.contains("x=\"50.00\""));
        assert!(svg.contains("fill=\"#123456\""));
        // 48px of text centred in 100px: tops at 26 and 50
        assert!(svg.contains("y=\"46.00\""));
        assert!(svg.contains("y=\"70.00\""));
        // Line breaks are not drawn
        assert!(!svg.contains("a\n"));

        let bad = HtmlReader::new(100, 100, 0, 0, GravityType::Center, "", "", "not-a-color");
        assert!(bad.to_svg().is_err());
    }

    #[test]
    fn test_render_background() {
        let mut reader = HtmlReader::new(32, 16, 0, 0, GravityType::Center, "", "", "#ff0000");
        assert!(reader.get_frame(1).is_err());
        reader.open().unwrap();

        let frame = reader.get_frame(10).unwrap();
        assert_eq!((frame.width(), frame.height()), (32, 16));
        assert_eq!(frame.get_pixel(0, 0), [255, 0, 0, 255]);
        assert_eq!(reader.info().video_length, 60 * 60 * 24 * 30);
        assert_eq!(reader.info().display_ratio, Fraction::new(2, 1));
    }
}
