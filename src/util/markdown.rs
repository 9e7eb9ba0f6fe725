//! HTML to markdown conversion for Rally rich-text fields.
//!
//! Only the markup Rally's editor commonly produces is translated. Any other
//! tag is copied into the output unchanged so nothing is silently lost.

/// Convert an HTML fragment into markdown text.
pub fn html_to_markdown(html: &str) -> String {
    let mut writer = Writer::new();
    for token in tokenize(html) {
        writer.token(token);
    }
    writer.finish()
}

#[derive(Debug, PartialEq)]
enum Token<'a> {
    Text(&'a str),
    Tag {
        name: String,
        closing: bool,
        raw: &'a str,
    },
    Comment(&'a str),
}

fn tokenize(input: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut rest = input;

    while !rest.is_empty() {
        match rest.find('<') {
            None => {
                tokens.push(Token::Text(rest));
                break;
            }
            Some(0) => {}
            Some(i) => {
                tokens.push(Token::Text(&rest[..i]));
                rest = &rest[i..];
            }
        }

        if rest.starts_with("<!--") {
            let end = rest.find("-->").map(|e| e + 3).unwrap_or(rest.len());
            tokens.push(Token::Comment(&rest[..end]));
            rest = &rest[end..];
            continue;
        }

        match parse_tag(rest) {
            Some((token, len)) => {
                tokens.push(token);
                rest = &rest[len..];
            }
            None => {
                // A bare '<' that does not open a tag.
                tokens.push(Token::Text(&rest[..1]));
                rest = &rest[1..];
            }
        }
    }

    tokens
}

fn parse_tag(s: &str) -> Option<(Token<'_>, usize)> {
    let closing = s[1..].starts_with('/');
    let name_start = if closing { 2 } else { 1 };
    let name: String = s[name_start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    if name.is_empty() {
        return None;
    }
    let end = tag_end(s)?;
    let raw = &s[..=end];
    Some((
        Token::Tag {
            name: name.to_ascii_lowercase(),
            closing,
            raw,
        },
        end + 1,
    ))
}

/// Byte offset of the `>` closing the tag, skipping quoted attribute values.
fn tag_end(s: &str) -> Option<usize> {
    let mut quote = None;
    for (i, c) in s.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '>' => return Some(i),
            None => {}
        }
    }
    None
}

/// Value of `name="..."` (or single-quoted) inside a raw tag.
fn attribute(raw: &str, name: &str) -> Option<String> {
    let lower = raw.to_ascii_lowercase();
    let mut search_from = 0;
    while let Some(pos) = lower[search_from..].find(name) {
        let start = search_from + pos;
        search_from = start + name.len();

        let preceded_by_space = lower[..start]
            .chars()
            .last()
            .is_some_and(|c| c.is_ascii_whitespace());
        if !preceded_by_space {
            continue;
        }
        let after = raw[search_from..].trim_start();
        let Some(after) = after.strip_prefix('=') else {
            continue;
        };
        let after = after.trim_start();
        let quote = after.chars().next()?;
        if quote == '"' || quote == '\'' {
            let body = &after[1..];
            let close = body.find(quote)?;
            return Some(decode_entities(&body[..close]));
        }
        let value: String = after
            .chars()
            .take_while(|c| !c.is_ascii_whitespace() && *c != '>' && *c != '/')
            .collect();
        return Some(decode_entities(&value));
    }
    None
}

fn decode_entities(text: &str) -> String {
    html_escape::decode_html_entities(text).into_owned()
}

enum FrameKind {
    /// Bold, italic or code span, closed with the same marker.
    Inline(&'static str),
    Link(Option<String>),
    Quote,
    Pre,
}

struct Frame {
    kind: FrameKind,
    buf: String,
    /// Whitespace arrived before any content.
    leading_space: bool,
}

struct ListState {
    ordered: bool,
    counter: usize,
}

struct Writer {
    root: String,
    /// Open inline spans, links, quotes and preformatted blocks, innermost last.
    frames: Vec<Frame>,
    lists: Vec<ListState>,
}

impl Writer {
    fn new() -> Self {
        Self {
            root: String::new(),
            frames: Vec::new(),
            lists: Vec::new(),
        }
    }

    fn buf(&mut self) -> &mut String {
        match self.frames.last_mut() {
            Some(frame) => &mut frame.buf,
            None => &mut self.root,
        }
    }

    fn push_frame(&mut self, kind: FrameKind) {
        self.frames.push(Frame {
            kind,
            buf: String::new(),
            leading_space: false,
        });
    }

    fn in_pre(&self) -> bool {
        self.frames.iter().any(|f| matches!(f.kind, FrameKind::Pre))
    }

    fn token(&mut self, token: Token<'_>) {
        match token {
            Token::Text(text) => self.text(text),
            Token::Comment(raw) => self.buf().push_str(raw),
            Token::Tag { name, closing, raw } => {
                if self.in_pre() && !(closing && name == "pre") {
                    self.buf().push_str(raw);
                } else if closing {
                    self.close(&name, raw);
                } else {
                    self.open(&name, raw);
                }
            }
        }
    }

    fn text(&mut self, text: &str) {
        let decoded = decode_entities(text);
        if self.in_pre() {
            self.buf().push_str(&decoded);
            return;
        }
        let buf = self.buf();
        let mut leading_space = false;
        for c in decoded.chars() {
            if c.is_whitespace() {
                if buf.is_empty() {
                    leading_space = true;
                } else if !buf.ends_with([' ', '\n']) {
                    buf.push(' ');
                }
            } else {
                buf.push(c);
            }
        }
        if leading_space {
            if let Some(frame) = self.frames.last_mut() {
                frame.leading_space = true;
            }
        }
    }

    fn open(&mut self, name: &str, raw: &str) {
        match name {
            "p" | "div" => self.block(),
            "br" => self.line_break(),
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                self.block();
                let level = name[1..].parse::<usize>().unwrap_or(1);
                let prefix = format!("{} ", "#".repeat(level));
                self.buf().push_str(&prefix);
            }
            "strong" | "b" => self.push_frame(FrameKind::Inline("**")),
            "em" | "i" => self.push_frame(FrameKind::Inline("_")),
            "code" => self.push_frame(FrameKind::Inline("`")),
            "ul" | "ol" => {
                if self.lists.is_empty() {
                    self.block();
                } else {
                    self.line();
                }
                self.lists.push(ListState {
                    ordered: name == "ol",
                    counter: 0,
                });
            }
            "li" => {
                self.line();
                let depth = self.lists.len().saturating_sub(1);
                let marker = match self.lists.last_mut() {
                    Some(list) if list.ordered => {
                        list.counter += 1;
                        format!("{}. ", list.counter)
                    }
                    _ => "- ".to_string(),
                };
                let indent = "  ".repeat(depth);
                let buf = self.buf();
                buf.push_str(&indent);
                buf.push_str(&marker);
            }
            "a" => self.push_frame(FrameKind::Link(attribute(raw, "href"))),
            "blockquote" => {
                self.block();
                self.push_frame(FrameKind::Quote);
            }
            "pre" => {
                self.block();
                self.push_frame(FrameKind::Pre);
            }
            "img" => match attribute(raw, "src") {
                Some(src) => {
                    let alt = attribute(raw, "alt").unwrap_or_default();
                    self.buf().push_str(&format!("![{alt}]({src})"));
                }
                None => self.buf().push_str(raw),
            },
            "html" | "body" | "span" | "thead" | "tbody" | "tfoot" => {}
            _ => self.buf().push_str(raw),
        }
    }

    fn close(&mut self, name: &str, raw: &str) {
        match name {
            "p" | "div" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => self.block(),
            "br" => {}
            "strong" | "b" => self.close_inline("**"),
            "em" | "i" => self.close_inline("_"),
            "code" => self.close_inline("`"),
            "ul" | "ol" => {
                self.lists.pop();
                if self.lists.is_empty() {
                    self.block();
                } else {
                    self.line();
                }
            }
            "li" => {}
            "a" => {
                if matches!(self.top_kind(), Some(FrameKind::Link(_))) {
                    self.pop_frame();
                }
            }
            "blockquote" => {
                if matches!(self.top_kind(), Some(FrameKind::Quote)) {
                    self.pop_frame();
                }
            }
            "pre" => {
                if matches!(self.top_kind(), Some(FrameKind::Pre)) {
                    self.pop_frame();
                }
            }
            "img" | "html" | "body" | "span" | "thead" | "tbody" | "tfoot" => {}
            _ => self.buf().push_str(raw),
        }
    }

    fn close_inline(&mut self, marker: &str) {
        if matches!(self.top_kind(), Some(FrameKind::Inline(m)) if *m == marker) {
            self.pop_frame();
        }
    }

    fn top_kind(&self) -> Option<&FrameKind> {
        self.frames.last().map(|f| &f.kind)
    }

    fn pop_frame(&mut self) {
        let Some(frame) = self.frames.pop() else {
            return;
        };
        let trailing_space = frame.buf.ends_with(' ');
        match frame.kind {
            FrameKind::Inline(marker) => {
                let text = frame.buf.trim();
                let rendered = if text.is_empty() {
                    String::new()
                } else {
                    format!("{marker}{text}{marker}")
                };
                self.push_inline(frame.leading_space, &rendered, trailing_space);
            }
            FrameKind::Link(href) => {
                let text = frame.buf.trim();
                let rendered = match href {
                    Some(href) if text.is_empty() => format!("[{href}]({href})"),
                    Some(href) => format!("[{text}]({href})"),
                    None => text.to_string(),
                };
                self.push_inline(frame.leading_space, &rendered, trailing_space);
            }
            FrameKind::Quote => {
                let quoted: Vec<String> = frame
                    .buf
                    .trim()
                    .lines()
                    .map(|line| {
                        let line = line.trim_end();
                        if line.is_empty() {
                            ">".to_string()
                        } else {
                            format!("> {line}")
                        }
                    })
                    .collect();
                self.block();
                self.buf().push_str(&quoted.join("\n"));
                self.block();
            }
            FrameKind::Pre => {
                let body = frame.buf.trim_matches('\n');
                self.buf().push_str(&format!("```\n{body}\n```"));
                self.block();
            }
        }
    }

    /// Append an inline span, keeping edge whitespace outside its markers.
    fn push_inline(&mut self, leading_space: bool, rendered: &str, trailing_space: bool) {
        if leading_space || (rendered.is_empty() && trailing_space) {
            self.space();
        }
        if rendered.is_empty() {
            return;
        }
        let buf = self.buf();
        buf.push_str(rendered);
        if trailing_space {
            buf.push(' ');
        }
    }

    /// A single separating space. An enclosing frame with no content yet
    /// records it instead, so it ends up outside that frame's markers too.
    fn space(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            if frame.buf.is_empty() {
                frame.leading_space = true;
                return;
            }
        }
        let buf = self.buf();
        if !buf.is_empty() && !buf.ends_with([' ', '\n']) {
            buf.push(' ');
        }
    }

    /// End the current paragraph with a blank line.
    fn block(&mut self) {
        let buf = self.buf();
        trim_trailing_spaces(buf);
        if buf.is_empty() {
            return;
        }
        while !buf.ends_with("\n\n") {
            buf.push('\n');
        }
    }

    /// Make sure the next output starts on a fresh line.
    fn line(&mut self) {
        let buf = self.buf();
        trim_trailing_spaces(buf);
        if !buf.is_empty() && !buf.ends_with('\n') {
            buf.push('\n');
        }
    }

    fn line_break(&mut self) {
        let buf = self.buf();
        trim_trailing_spaces(buf);
        buf.push('\n');
    }

    fn finish(mut self) -> String {
        while !self.frames.is_empty() {
            self.pop_frame();
        }
        let raw = self.root;

        let mut out = String::with_capacity(raw.len());
        let mut blank_run = 0;
        for line in raw.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                blank_run += 1;
                if blank_run > 1 {
                    continue;
                }
            } else {
                blank_run = 0;
            }
            out.push_str(line);
            out.push('\n');
        }
        out.trim().to_string()
    }
}

fn trim_trailing_spaces(buf: &mut String) {
    let trimmed = buf.trim_end_matches(' ').len();
    buf.truncate(trimmed);
}
