//! Cosense page notation.
//!
//! A page is a list of lines. The first line is the title; indented
//! `code:` and `table:` lines open blocks that own every following line
//! indented deeper than they are. Everything else is a line of inline
//! nodes, where brackets, backquotes, hashtags and bare URLs carry markup.

pub const MAX_NESTING: usize = 32;

const DECORATION_CHARS: &str = "*!\"#%&'()+,-./{|}<>_~";
const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarkupError {
    #[error("line {line}: brackets nested too deeply")]
    NestingTooDeep { line: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Title(String),
    Line {
        indent: usize,
        nodes: Vec<Node>,
    },
    Table {
        indent: usize,
        name: String,
        cells: Vec<Vec<Vec<Node>>>,
    },
    CodeBlock {
        indent: usize,
        file_name: String,
        content: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// `https://…`
    Absolute,
    /// `/project/page`
    Root,
    /// Another page in the same project.
    Relative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Relative,
    Root,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Plain(String),
    Strong(Vec<Node>),
    Quote(Vec<Node>),
    Decoration {
        decos: String,
        nodes: Vec<Node>,
    },
    Formula(String),
    Code(String),
    CommandLine {
        symbol: char,
        text: String,
    },
    Image {
        src: String,
        strong: bool,
    },
    Link {
        kind: LinkKind,
        href: String,
        content: String,
    },
    Icon {
        kind: PathKind,
        path: String,
        strong: bool,
    },
    HashTag(String),
    NumberList {
        number: u64,
        nodes: Vec<Node>,
    },
    Blank(String),
    Helpfeel(String),
    GoogleMap {
        latitude: String,
        longitude: String,
        zoom: u32,
        place: String,
    },
}

/// Parses a whole page given as newline-joined text.
pub fn parse_page(text: &str) -> Result<Vec<Block>, MarkupError> {
    let lines = text.split('\n').collect::<Vec<_>>();
    parse_lines(&lines)
}

pub fn parse_lines<S: AsRef<str>>(lines: &[S]) -> Result<Vec<Block>, MarkupError> {
    let mut blocks = Vec::new();
    let mut index = 0;

    while index < lines.len() {
        let line = lines[index].as_ref();
        let line_number = index + 1;
        if index == 0 {
            blocks.push(Block::Title(line.trim().to_string()));
            index += 1;
            continue;
        }

        let indent = indent_width(line);
        let body = skip_chars(line, indent);

        if let Some(name) = body.strip_prefix("code:") {
            let end = nested_end(lines, index + 1, indent);
            let content = lines[index + 1..end]
                .iter()
                .map(|nested| skip_chars(nested.as_ref(), indent + 1))
                .collect::<Vec<_>>()
                .join("\n");
            blocks.push(Block::CodeBlock {
                indent,
                file_name: name.trim().to_string(),
                content,
            });
            index = end;
            continue;
        }

        if let Some(name) = body.strip_prefix("table:") {
            let end = nested_end(lines, index + 1, indent);
            let mut cells = Vec::new();
            for (offset, nested) in lines[index + 1..end].iter().enumerate() {
                let row_line = line_number + offset + 1;
                let row = skip_chars(nested.as_ref(), indent + 1)
                    .split('\t')
                    .map(|cell| parse_inline(cell, 0, row_line))
                    .collect::<Result<Vec<_>, _>>()?;
                cells.push(row);
            }
            blocks.push(Block::Table {
                indent,
                name: name.trim().to_string(),
                cells,
            });
            index = end;
            continue;
        }

        blocks.push(Block::Line {
            indent,
            nodes: parse_line_nodes(body, line_number)?,
        });
        index += 1;
    }

    Ok(blocks)
}

/// Same-project pages a parsed page links to (bracket links and hashtags), first-seen order.
pub fn outgoing_links(blocks: &[Block]) -> Vec<String> {
    let mut links = Vec::new();
    for block in blocks {
        match block {
            Block::Line { nodes, .. } => collect_links(nodes, &mut links),
            Block::Table { cells, .. } => {
                for cell in cells.iter().flatten() {
                    collect_links(cell, &mut links);
                }
            }
            Block::Title(_) | Block::CodeBlock { .. } => {}
        }
    }
    links
}

fn collect_links(nodes: &[Node], links: &mut Vec<String>) {
    for node in nodes {
        match node {
            Node::Link {
                kind: LinkKind::Relative,
                href,
                ..
            }
            | Node::HashTag(href) => {
                if !links.contains(href) {
                    links.push(href.clone());
                }
            }
            Node::Strong(children)
            | Node::Quote(children)
            | Node::Decoration {
                nodes: children, ..
            }
            | Node::NumberList {
                nodes: children, ..
            } => collect_links(children, links),
            _ => {}
        }
    }
}

fn indent_width(line: &str) -> usize {
    line.chars()
        .take_while(|ch| matches!(ch, ' ' | '\t' | '\u{3000}'))
        .count()
}

fn skip_chars(line: &str, count: usize) -> &str {
    match line.char_indices().nth(count) {
        Some((offset, _)) => &line[offset..],
        None => "",
    }
}

fn nested_end<S: AsRef<str>>(lines: &[S], start: usize, indent: usize) -> usize {
    let mut end = start;
    while end < lines.len() && indent_width(lines[end].as_ref()) > indent {
        end += 1;
    }
    end
}

fn parse_line_nodes(body: &str, line: usize) -> Result<Vec<Node>, MarkupError> {
    if let Some(rest) = body.strip_prefix('>') {
        return Ok(vec![Node::Quote(parse_inline(rest, 1, line)?)]);
    }
    if let Some(rest) = body.strip_prefix("? ") {
        return Ok(vec![Node::Helpfeel(rest.to_string())]);
    }
    for symbol in ['$', '%'] {
        if let Some(rest) = body.strip_prefix(symbol).and_then(|rest| rest.strip_prefix(' ')) {
            return Ok(vec![Node::CommandLine {
                symbol,
                text: rest.to_string(),
            }]);
        }
    }
    if let Some((number, rest)) = split_number_list(body) {
        return Ok(vec![Node::NumberList {
            number,
            nodes: parse_inline(rest, 1, line)?,
        }]);
    }
    parse_inline(body, 0, line)
}

fn split_number_list(body: &str) -> Option<(u64, &str)> {
    let digits = body.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let rest = body[digits..].strip_prefix(". ")?;
    let number = body[..digits].parse().ok()?;
    Some((number, rest))
}

fn parse_inline(text: &str, depth: usize, line: usize) -> Result<Vec<Node>, MarkupError> {
    if depth > MAX_NESTING {
        return Err(MarkupError::NestingTooDeep { line });
    }

    let mut nodes = Vec::new();
    let mut plain = String::new();
    let mut rest = text;
    let mut at_boundary = true;

    while let Some(ch) = rest.chars().next() {
        if let Some((node, consumed)) = match_token(rest, at_boundary, depth, line)? {
            if !plain.is_empty() {
                nodes.push(Node::Plain(std::mem::take(&mut plain)));
            }
            nodes.push(node);
            rest = &rest[consumed..];
            at_boundary = false;
            continue;
        }
        plain.push(ch);
        at_boundary = ch.is_whitespace();
        rest = &rest[ch.len_utf8()..];
    }

    if !plain.is_empty() {
        nodes.push(Node::Plain(plain));
    }
    Ok(nodes)
}

/// Tries to read one markup token at the start of `rest`; returns it with its byte length.
fn match_token(
    rest: &str,
    at_boundary: bool,
    depth: usize,
    line: usize,
) -> Result<Option<(Node, usize)>, MarkupError> {
    if let Some(after) = rest.strip_prefix('`') {
        return Ok(after
            .find('`')
            .map(|end| (Node::Code(after[..end].to_string()), end + 2)));
    }

    if let Some(after) = rest.strip_prefix("[[") {
        let Some(end) = after.find("]]") else {
            return Ok(None);
        };
        let inner = &after[..end];
        if inner.is_empty() {
            return Ok(None);
        }
        let node = if is_image_url(inner) {
            Node::Image {
                src: inner.to_string(),
                strong: true,
            }
        } else if let Some(path) = inner.strip_suffix(".icon") {
            icon_node(path, true)
        } else {
            Node::Strong(parse_inline(inner, depth + 1, line)?)
        };
        return Ok(Some((node, end + 4)));
    }

    if let Some(after) = rest.strip_prefix('[') {
        let decos_len = after
            .chars()
            .take_while(|ch| DECORATION_CHARS.contains(*ch))
            .count();
        if decos_len > 0 && after[decos_len..].starts_with(' ') {
            let Some(end) = matching_close(after) else {
                return Ok(None);
            };
            let node = Node::Decoration {
                decos: after[..decos_len].to_string(),
                nodes: parse_inline(&after[decos_len + 1..end], depth + 1, line)?,
            };
            return Ok(Some((node, end + 2)));
        }

        let Some(end) = after.find(']') else {
            return Ok(None);
        };
        return Ok(classify_bracket(&after[..end]).map(|node| (node, end + 2)));
    }

    if at_boundary && let Some(after) = rest.strip_prefix('#') {
        let end = after.find(char::is_whitespace).unwrap_or(after.len());
        if end == 0 {
            return Ok(None);
        }
        return Ok(Some((Node::HashTag(after[..end].to_string()), end + 1)));
    }

    if at_boundary && (rest.starts_with("https://") || rest.starts_with("http://")) {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let href = &rest[..end];
        if is_url(href) {
            let node = Node::Link {
                kind: LinkKind::Absolute,
                href: href.to_string(),
                content: String::new(),
            };
            return Ok(Some((node, end)));
        }
    }

    Ok(None)
}

/// Byte offset of the `]` closing a `[` whose contents start at `after`, honoring nesting.
fn matching_close(after: &str) -> Option<usize> {
    let mut open = 1usize;
    for (offset, ch) in after.char_indices() {
        match ch {
            '[' => open += 1,
            ']' => {
                open -= 1;
                if open == 0 {
                    return Some(offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn classify_bracket(inner: &str) -> Option<Node> {
    if inner.is_empty() {
        return None;
    }
    if inner.trim().is_empty() {
        return Some(Node::Blank(inner.to_string()));
    }
    if let Some(formula) = inner.strip_prefix("$ ") {
        return Some(Node::Formula(formula.to_string()));
    }
    if let Some(map) = parse_google_map(inner) {
        return Some(map);
    }
    if let Some(path) = inner.strip_suffix(".icon") {
        return Some(icon_node(path, false));
    }
    if is_image_url(inner) {
        return Some(Node::Image {
            src: inner.to_string(),
            strong: false,
        });
    }
    if let Some((href, content)) = split_external_link(inner) {
        return Some(Node::Link {
            kind: LinkKind::Absolute,
            href: href.to_string(),
            content: content.to_string(),
        });
    }
    let kind = if inner.starts_with('/') {
        LinkKind::Root
    } else {
        LinkKind::Relative
    };
    Some(Node::Link {
        kind,
        href: inner.to_string(),
        content: String::new(),
    })
}

fn icon_node(path: &str, strong: bool) -> Node {
    let kind = if path.starts_with('/') {
        PathKind::Root
    } else {
        PathKind::Relative
    };
    Node::Icon {
        kind,
        path: path.to_string(),
        strong,
    }
}

/// `[url]`, `[url label]` and `[label url]` all link to `url`.
fn split_external_link(inner: &str) -> Option<(&str, &str)> {
    if is_url(inner) {
        return Some((inner, ""));
    }
    if let Some((first, label)) = inner.split_once(char::is_whitespace)
        && is_url(first)
    {
        return Some((first, label.trim()));
    }
    if let Some((label, last)) = inner.rsplit_once(char::is_whitespace)
        && is_url(last)
    {
        return Some((last, label.trim()));
    }
    None
}

fn is_url(value: &str) -> bool {
    let rest = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"));
    matches!(rest, Some(rest) if !rest.is_empty() && !value.contains(char::is_whitespace))
}

fn is_image_url(value: &str) -> bool {
    if !is_url(value) {
        return false;
    }
    let path = value
        .split(['?', '#'])
        .next()
        .unwrap_or(value)
        .to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
        || path.starts_with("https://gyazo.com/")
        || path.starts_with("https://i.gyazo.com/")
}

/// `[N35.68,E139.76,Z14]`, optionally with a place name before or after the coordinates.
fn parse_google_map(inner: &str) -> Option<Node> {
    if let Some(node) = parse_coordinates(inner, "") {
        return Some(node);
    }
    if let Some((coords, place)) = inner.split_once(' ')
        && let Some(node) = parse_coordinates(coords, place.trim())
    {
        return Some(node);
    }
    let (place, coords) = inner.rsplit_once(' ')?;
    parse_coordinates(coords, place.trim())
}

fn parse_coordinates(value: &str, place: &str) -> Option<Node> {
    let mut parts = value.split(',');
    let latitude = signed_degree(parts.next()?, 'N', 'S')?;
    let longitude = signed_degree(parts.next()?, 'E', 'W')?;
    let zoom = match parts.next() {
        Some(zoom) => zoom.strip_prefix('Z')?.parse().ok()?,
        None => 14,
    };
    if parts.next().is_some() {
        return None;
    }
    Some(Node::GoogleMap {
        latitude,
        longitude,
        zoom,
        place: place.to_string(),
    })
}

fn signed_degree(value: &str, positive: char, negative: char) -> Option<String> {
    let (sign, number) = if let Some(number) = value.strip_prefix(positive) {
        ("", number)
    } else {
        ("-", value.strip_prefix(negative)?)
    };
    let valid = !number.is_empty()
        && number.chars().all(|ch| ch.is_ascii_digit() || ch == '.')
        && number.parse::<f64>().is_ok();
    valid.then(|| format!("{sign}{number}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(text: &str) -> Node {
        Node::Plain(text.to_string())
    }

    fn relative(href: &str) -> Node {
        Node::Link {
            kind: LinkKind::Relative,
            href: href.to_string(),
            content: String::new(),
        }
    }

    fn line_nodes(text: &str) -> Vec<Node> {
        let blocks = parse_page(&format!("title\n{text}")).expect("parse");
        match blocks.into_iter().nth(1) {
            Some(Block::Line { nodes, .. }) => nodes,
            other => panic!("expected line block, got {other:?}"),
        }
    }

    #[test]
    fn first_line_is_title_and_indent_is_counted() {
        let blocks = parse_page("My Page\n  indented\nflat").expect("parse");
        assert_eq!(blocks[0], Block::Title("My Page".to_string()));
        assert_eq!(
            blocks[1],
            Block::Line {
                indent: 2,
                nodes: vec![plain("indented")]
            }
        );
        assert_eq!(
            blocks[2],
            Block::Line {
                indent: 0,
                nodes: vec![plain("flat")]
            }
        );
    }

    #[test]
    fn code_block_owns_deeper_indented_lines() {
        let blocks =
            parse_page("Notes\ncode:foo.py\n print(1)\n  if x:\nafter").expect("parse");
        assert_eq!(
            blocks[1],
            Block::CodeBlock {
                indent: 0,
                file_name: "foo.py".to_string(),
                content: "print(1)\n if x:".to_string(),
            }
        );
        assert_eq!(
            blocks[2],
            Block::Line {
                indent: 0,
                nodes: vec![plain("after")]
            }
        );
    }

    #[test]
    fn nested_code_block_strips_its_own_indent() {
        let blocks = parse_page("t\n code:a/b.rs\n  fn main() {}\n x").expect("parse");
        assert_eq!(
            blocks[1],
            Block::CodeBlock {
                indent: 1,
                file_name: "a/b.rs".to_string(),
                content: "fn main() {}".to_string(),
            }
        );
    }

    #[test]
    fn table_rows_split_on_tabs() {
        let blocks = parse_page("t\ntable:scores\n name\t[Alice]\n 1\t2").expect("parse");
        assert_eq!(
            blocks[1],
            Block::Table {
                indent: 0,
                name: "scores".to_string(),
                cells: vec![
                    vec![vec![plain("name")], vec![relative("Alice")]],
                    vec![vec![plain("1")], vec![plain("2")]],
                ],
            }
        );
    }

    #[test]
    fn bracket_links_are_classified() {
        assert_eq!(line_nodes("see [Notes]"), vec![plain("see "), relative("Notes")]);
        assert_eq!(
            line_nodes("[/other/Page]"),
            vec![Node::Link {
                kind: LinkKind::Root,
                href: "/other/Page".to_string(),
                content: String::new(),
            }]
        );
        assert_eq!(
            line_nodes("[https://example.com docs]"),
            vec![Node::Link {
                kind: LinkKind::Absolute,
                href: "https://example.com".to_string(),
                content: "docs".to_string(),
            }]
        );
        assert_eq!(
            line_nodes("[docs https://example.com]"),
            vec![Node::Link {
                kind: LinkKind::Absolute,
                href: "https://example.com".to_string(),
                content: "docs".to_string(),
            }]
        );
    }

    #[test]
    fn strong_decoration_and_nesting() {
        assert_eq!(
            line_nodes("[[bold [Link]]]"),
            vec![Node::Strong(vec![plain("bold [Link")]), plain("]")]
        );
        assert_eq!(
            line_nodes("[*/ loud [Page] text]"),
            vec![Node::Decoration {
                decos: "*/".to_string(),
                nodes: vec![plain("loud "), relative("Page"), plain(" text")],
            }]
        );
    }

    #[test]
    fn images_icons_and_maps() {
        assert_eq!(
            line_nodes("[https://example.com/cat.PNG]"),
            vec![Node::Image {
                src: "https://example.com/cat.PNG".to_string(),
                strong: false
            }]
        );
        assert_eq!(
            line_nodes("[[alice.icon]]"),
            vec![Node::Icon {
                kind: PathKind::Relative,
                path: "alice".to_string(),
                strong: true
            }]
        );
        assert_eq!(
            line_nodes("[N35.68,E139.76,Z14 Tokyo]"),
            vec![Node::GoogleMap {
                latitude: "35.68".to_string(),
                longitude: "139.76".to_string(),
                zoom: 14,
                place: "Tokyo".to_string(),
            }]
        );
    }

    #[test]
    fn inline_code_formula_blank_hashtag_and_url() {
        assert_eq!(
            line_nodes("`x<y` [$ a^2] [ ] #tag https://example.com/a?b=c end"),
            vec![
                Node::Code("x<y".to_string()),
                plain(" "),
                Node::Formula("a^2".to_string()),
                plain(" "),
                Node::Blank(" ".to_string()),
                plain(" "),
                Node::HashTag("tag".to_string()),
                plain(" "),
                Node::Link {
                    kind: LinkKind::Absolute,
                    href: "https://example.com/a?b=c".to_string(),
                    content: String::new(),
                },
                plain(" end"),
            ]
        );
        assert_eq!(line_nodes("a#b"), vec![plain("a#b")]);
        assert_eq!(line_nodes("[] [unclosed"), vec![plain("[] [unclosed")]);
    }

    #[test]
    fn line_prefixes_select_container_nodes() {
        assert_eq!(line_nodes("> quoted"), vec![Node::Quote(vec![plain(" quoted")])]);
        assert_eq!(line_nodes("? help"), vec![Node::Helpfeel("help".to_string())]);
        assert_eq!(
            line_nodes("$ cargo test"),
            vec![Node::CommandLine {
                symbol: '$',
                text: "cargo test".to_string()
            }]
        );
        assert_eq!(
            line_nodes("12. item [x]"),
            vec![Node::NumberList {
                number: 12,
                nodes: vec![plain("item "), relative("x")],
            }]
        );
    }

    #[test]
    fn outgoing_links_walk_containers_and_tables() {
        let blocks = parse_page(
            "t\n[A] #B [https://example.com]\n> [* [C]]\ntable:x\n [A]\t[D]\ncode:e\n [E]",
        )
        .expect("parse");
        assert_eq!(
            outgoing_links(&blocks),
            vec![
                "A".to_string(),
                "B".to_string(),
                "C".to_string(),
                "D".to_string()
            ]
        );
    }

    #[test]
    fn pathological_nesting_is_rejected() {
        let text = format!("t\n{}x{}", "[* ".repeat(40), "]".repeat(40));
        assert_eq!(
            parse_page(&text),
            Err(MarkupError::NestingTooDeep { line: 2 })
        );
    }
}
