//! Parsed page → standalone HTML document.
//!
//! Every piece of page content is untrusted and goes through [`escape_html`]
//! before it reaches the output, including titles substituted into `href`.

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

use crate::link_graph::LinkGraph;
use crate::markup::{Block, LinkKind, Node, PathKind};
use crate::sanitize::{sanitize_dir_name, sanitize_file_name, shadows_page_artifact};

/// Leaf file every page directory renders to.
pub const PAGE_HTML: &str = "text.html";

/// Characters that cannot appear raw in a URL, as `encodeURI` treats them.
const URI: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'\\')
    .add(b'^')
    .add(b'|');

/// Relative paths additionally escape query, fragment and `%` so titles stay literal.
const PATH: &AsciiSet = &URI.add(b'#').add(b'%').add(b'?').add(b'[').add(b']');

const SEGMENT: &AsciiSet = &PATH.add(b'/');

pub struct RenderContext<'a> {
    pub project: &'a str,
    /// Remote origin, e.g. `https://scrapbox.io`, without trailing slash.
    pub origin: &'a str,
    pub title: &'a str,
    /// Path segments between the destination root and this page's directory.
    pub depth: usize,
    pub links: &'a LinkGraph,
}

impl RenderContext<'_> {
    fn up(&self) -> String {
        "../".repeat(self.depth)
    }

    fn page_href(&self, title: &str) -> String {
        format!(
            "{}{}/{PAGE_HTML}",
            self.up(),
            utf8_percent_encode(&sanitize_dir_name(title), PATH)
        )
    }

    fn remote_href(&self, root_path: &str) -> String {
        format!("{}{}", self.origin, utf8_percent_encode(root_path, URI))
    }
}

pub fn escape_html(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => output.push_str("&amp;"),
            '\'' => output.push_str("&#x27;"),
            '`' => output.push_str("&#x60;"),
            '"' => output.push_str("&quot;"),
            '<' => output.push_str("&lt;"),
            '>' => output.push_str("&gt;"),
            _ => output.push(ch),
        }
    }
    output
}

pub(crate) fn encode_path(path: &str) -> String {
    utf8_percent_encode(path, PATH).to_string()
}

pub fn render_page(blocks: &[Block], ctx: &RenderContext<'_>) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>");
    html.push_str(&escape_html(ctx.title));
    html.push_str("</title></head><body>\n");
    html.push_str(&format!(
        "<a href=\"{}\">top</a>, <a href=\"{}\">online</a>, <a href=\"./\">source</a>\n",
        escape_html(&format!("{}index.html", ctx.up())),
        escape_html(&format!(
            "{}/{}/{}",
            ctx.origin,
            utf8_percent_encode(ctx.project, SEGMENT),
            utf8_percent_encode(ctx.title, SEGMENT)
        )),
    ));

    for block in blocks {
        render_block(block, ctx, &mut html);
        html.push('\n');
    }

    render_one_hop(ctx, &mut html);
    render_two_hop(ctx, &mut html);
    html.push_str("</body></html>\n");
    html
}

fn render_block(block: &Block, ctx: &RenderContext<'_>, html: &mut String) {
    match block {
        Block::Title(text) => {
            html.push_str("<h1>");
            html.push_str(&escape_html(text));
            html.push_str("</h1>");
        }
        Block::Line { indent, nodes } => {
            html.push_str(&format!("<p style=\"margin-left:{indent}em;\">"));
            render_nodes(nodes, ctx, html);
            html.push_str("</p>");
        }
        Block::Table {
            indent,
            name,
            cells,
        } => {
            html.push_str(&format!("<table style=\"margin-left:{indent}em;\">"));
            html.push_str("<caption>table:");
            html.push_str(&escape_html(name));
            html.push_str("</caption>");
            for row in cells {
                html.push_str("<tr>");
                for cell in row {
                    html.push_str("<td>");
                    render_nodes(cell, ctx, html);
                    html.push_str("</td>");
                }
                html.push_str("</tr>");
            }
            html.push_str("</table>");
        }
        Block::CodeBlock { file_name, .. } => {
            let name = sanitize_file_name(file_name.trim());
            if shadows_page_artifact(&name) {
                html.push_str(&format!("<p>code:{}</p>", escape_html(file_name)));
                return;
            }
            html.push_str(&format!(
                "<p><a href=\"{}\">code:{}</a></p>",
                escape_html(&encode_path(&name)),
                escape_html(file_name)
            ));
        }
    }
}

pub fn render_nodes(nodes: &[Node], ctx: &RenderContext<'_>, html: &mut String) {
    for node in nodes {
        render_node(node, ctx, html);
    }
}

fn render_node(node: &Node, ctx: &RenderContext<'_>, html: &mut String) {
    match node {
        Node::Plain(text) => html.push_str(&escape_html(text)),
        Node::Helpfeel(text) => html.push_str(&escape_html(text)),
        Node::Blank(space) => html.push_str(&escape_html(space)),
        Node::Quote(children) => wrap("q", children, ctx, html),
        Node::Strong(children) => wrap("strong", children, ctx, html),
        Node::Decoration { decos, nodes } => {
            let tags = decoration_tags(decos);
            if tags.is_empty() {
                wrap("span", nodes, ctx, html);
                return;
            }
            for tag in &tags {
                html.push_str(&format!("<{tag}>"));
            }
            render_nodes(nodes, ctx, html);
            for tag in tags.iter().rev() {
                html.push_str(&format!("</{tag}>"));
            }
        }
        Node::NumberList { number, nodes } => {
            html.push_str(&format!("<span>{number}. "));
            render_nodes(nodes, ctx, html);
            html.push_str("</span>");
        }
        Node::Formula(formula) => {
            html.push_str(&format!("<code>math:{}</code>", escape_html(formula)));
        }
        Node::Code(text) => html.push_str(&format!("<code>{}</code>", escape_html(text))),
        Node::CommandLine { symbol, text } => {
            html.push_str(&format!(
                "<code>{}</code>",
                escape_html(&format!("{symbol} {text}"))
            ));
        }
        Node::Image { src, .. } => {
            html.push_str(&anchor(&utf8_percent_encode(src, URI).to_string(), "[image]"));
        }
        Node::GoogleMap {
            latitude,
            longitude,
            zoom,
            place,
        } => {
            let url = format!("https://www.google.com/maps/@{latitude},{longitude},{zoom}z");
            let label = if place.is_empty() { "[map]" } else { place.as_str() };
            html.push_str(&anchor(&url, label));
        }
        Node::Link {
            kind,
            href,
            content,
        } => match kind {
            LinkKind::Absolute => {
                let label = if content.is_empty() { href } else { content };
                html.push_str(&anchor(&utf8_percent_encode(href, URI).to_string(), label));
            }
            LinkKind::Root => html.push_str(&anchor(&ctx.remote_href(href), href)),
            LinkKind::Relative => html.push_str(&anchor(&ctx.page_href(href), href)),
        },
        Node::Icon { kind, path, .. } => {
            let label = format!("[{path}.icon]");
            let target = match kind {
                PathKind::Root => ctx.remote_href(path),
                PathKind::Relative => ctx.page_href(path),
            };
            html.push_str(&anchor(&target, &label));
        }
        Node::HashTag(tag) => html.push_str(&anchor(&ctx.page_href(tag), &format!("#{tag}"))),
    }
}

fn wrap(tag: &str, children: &[Node], ctx: &RenderContext<'_>, html: &mut String) {
    html.push_str(&format!("<{tag}>"));
    render_nodes(children, ctx, html);
    html.push_str(&format!("</{tag}>"));
}

fn anchor(href: &str, label: &str) -> String {
    format!(
        "<a href=\"{}\">{}</a>",
        escape_html(href),
        escape_html(label)
    )
}

fn decoration_tags(decos: &str) -> Vec<&'static str> {
    let mut tags = Vec::new();
    for ch in decos.chars() {
        let tag = match ch {
            '*' => "b",
            '/' => "i",
            '-' => "s",
            '_' => "u",
            _ => continue,
        };
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

fn render_one_hop(ctx: &RenderContext<'_>, html: &mut String) {
    html.push_str("<h1>1 hop links</h1><ul>");
    for title in &ctx.links.one_hop {
        html.push_str("<li>");
        html.push_str(&anchor(&ctx.page_href(title), title));
        html.push_str("</li>");
    }
    html.push_str("</ul>\n");
}

fn render_two_hop(ctx: &RenderContext<'_>, html: &mut String) {
    let Some(groups) = &ctx.links.two_hop else {
        html.push_str("<p>2 hop links are unavailable for this source.</p>\n");
        return;
    };
    html.push_str("<h1>2 hop links</h1>");
    let mut seen_groups = Vec::new();
    for group in groups {
        if seen_groups.contains(&&group.via) {
            continue;
        }
        seen_groups.push(&group.via);
        html.push_str("<h2>");
        html.push_str(&escape_html(&group.via));
        html.push_str("</h2><ul>");
        let mut seen = Vec::new();
        for title in &group.titles {
            if seen.contains(&title) {
                continue;
            }
            seen.push(title);
            html.push_str("<li>");
            html.push_str(&anchor(&ctx.page_href(title), title));
            html.push_str("</li>");
        }
        html.push_str("</ul>");
    }
    html.push('\n');
}
