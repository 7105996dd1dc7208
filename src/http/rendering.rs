use chrono::{DateTime, Local};

use crate::http::http_core::{self, HttpStatus};
use crate::store::StoredEntry;

const GIT_HASH: &str = env!("GIT_HASH");

enum Node {
    Element(HtmlElement),
    Text(String),
}

pub struct HtmlElement {
    tag: &'static str,
    attributes: Vec<(&'static str, String)>,
    // None for void elements such as <hr> and <link>
    children: Option<Vec<Node>>,
}

impl HtmlElement {
    pub fn new(tag: &'static str) -> HtmlElement {
        HtmlElement {
            tag,
            attributes: Vec::new(),
            children: Some(Vec::new()),
        }
    }

    pub fn void(tag: &'static str) -> HtmlElement {
        HtmlElement {
            tag,
            attributes: Vec::new(),
            children: None,
        }
    }

    pub fn attr<S: Into<String>>(mut self, key: &'static str, value: S) -> HtmlElement {
        self.attributes.push((key, value.into()));
        self
    }

    pub fn text<S: Into<String>>(mut self, text: S) -> HtmlElement {
        if let Some(children) = &mut self.children {
            children.push(Node::Text(text.into()));
        }
        self
    }

    pub fn child(mut self, child: HtmlElement) -> HtmlElement {
        self.push(child);
        self
    }

    pub fn push(&mut self, child: HtmlElement) {
        if let Some(children) = &mut self.children {
            children.push(Node::Element(child));
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out);
        out
    }

    fn render_into(&self, out: &mut String) {
        out.push('<');
        out.push_str(self.tag);
        for (key, value) in &self.attributes {
            out.push_str(&format!(" {}=\"{}\"", key, escape(value)));
        }
        out.push('>');

        if let Some(children) = &self.children {
            for child in children {
                match child {
                    Node::Element(el) => el.render_into(out),
                    Node::Text(text) => out.push_str(&escape(text)),
                }
            }
            out.push_str(&format!("</{}>", self.tag));
        }
    }
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn page(title: &str) -> (HtmlElement, HtmlElement) {
    let head = HtmlElement::new("head")
        .child(HtmlElement::void("meta").attr("charset", "utf-8"))
        .child(HtmlElement::new("title").text(title))
        // Keeps browsers from requesting /favicon.ico
        .child(
            HtmlElement::void("link")
                .attr("rel", "shortcut icon")
                .attr("href", "data:image/x-icon;,")
                .attr("type", "image/x-icon"),
        );
    (head, HtmlElement::new("body"))
}

fn generate_default_footer() -> HtmlElement {
    HtmlElement::new("footer")
        .child(HtmlElement::void("hr"))
        .child(
            HtmlElement::new("pre")
                .text(format!("Rendered with chunkdrop revision {}.", GIT_HASH)),
        )
}

pub fn format_upload_time(entry: &StoredEntry) -> String {
    DateTime::<Local>::from(entry.modified)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// Page listing uploaded videos, each with an inline player. `href_prefix`
/// is the URL path the files are served under.
pub fn render_listing(videos: &[StoredEntry], href_prefix: &str) -> String {
    let (head, mut body) = page("Uploaded videos");
    let head = head.child(HtmlElement::new("style").text(
        "body { font-family: sans-serif; } \
         td { padding: 0.25em 1em; font-family: monospace; } \
         video { max-width: 320px; }",
    ));

    body.push(HtmlElement::new("h1").text("Uploaded videos"));
    body.push(HtmlElement::void("hr"));

    if videos.is_empty() {
        body.push(HtmlElement::new("p").text("No videos have been uploaded yet."));
    } else {
        let mut table = HtmlElement::new("table").child(
            HtmlElement::new("tr")
                .child(HtmlElement::new("th").text("Video"))
                .child(HtmlElement::new("th").text("File"))
                .child(HtmlElement::new("th").text("Uploaded"))
                .child(HtmlElement::new("th").text("Bytes")),
        );
        for video in videos {
            let href = format!("{}{}", href_prefix, percent_encode(&video.name));
            table.push(
                HtmlElement::new("tr")
                    .child(
                        HtmlElement::new("td").child(
                            HtmlElement::new("video")
                                .attr("controls", "controls")
                                .attr("preload", "metadata")
                                .attr("src", href.clone()),
                        ),
                    )
                    .child(
                        HtmlElement::new("td")
                            .child(HtmlElement::new("a").attr("href", href).text(video.name.clone())),
                    )
                    .child(HtmlElement::new("td").text(format_upload_time(video)))
                    .child(HtmlElement::new("td").text(video.len.to_string())),
            );
        }
        body.push(table);
    }

    body.push(generate_default_footer());
    HtmlElement::new("html").child(head).child(body).render()
}

pub fn render_error(status: &HttpStatus, msg: Option<String>) -> String {
    let title = format!(
        "{} {}",
        http_core::status_to_code(status),
        http_core::status_to_message(status)
    );
    let (head, mut body) = page(&title);

    body.push(HtmlElement::new("h1").text(title));
    body.push(HtmlElement::void("hr"));
    if let Some(msg) = msg {
        body.push(HtmlElement::new("pre").attr("class", "error").text(msg));
    }
    body.push(generate_default_footer());

    HtmlElement::new("html").child(head).child(body).render()
}

fn percent_encode(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for b in name.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}
