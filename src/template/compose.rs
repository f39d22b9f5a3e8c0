//! Turn a rendered section structure into HTML and plain-text bodies.
//!
//! Known sections are emitted in a fixed order; anything else in the
//! structure is left for consumers of the rendered JSON.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComposedBody {
    pub html: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Link {
    label: String,
    url: String,
}

#[derive(Default)]
struct Writer {
    html: Vec<String>,
    text: Vec<String>,
}

impl Writer {
    fn push(&mut self, html: String, text: String) {
        self.html.push(html);
        if !text.trim().is_empty() {
            self.text.push(text);
        }
    }
}

/// Compose the email body from a rendered structure.
pub fn compose(subject: &str, structure: &Value) -> ComposedBody {
    let mut out = Writer::default();

    if let Some(header) = structure.get("header").and_then(|v| text_of(v, &["text", "title"])) {
        out.push(
            format!("<div class=\"header\">{}</div>", escape(&header)),
            header,
        );
    }

    if let Some(hero) = structure.get("hero") {
        compose_hero(hero, &mut out);
    }

    if let Some(title) = structure.get("title").and_then(|v| text_of(v, &["text"])) {
        out.push(format!("<h1>{}</h1>", escape(&title)), title);
    }

    if let Some(body) = structure.get("body") {
        for paragraph in paragraphs(body) {
            out.push(format!("<p>{}</p>", escape(&paragraph)), paragraph);
        }
    }

    if let Some(facts) = structure.get("factsTable") {
        compose_facts(facts, &mut out);
    }

    if let Some(visual) = structure.get("visualBlock") {
        compose_visual(visual, &mut out);
    }

    if let Some(actions) = structure.get("actions") {
        let links = links(actions);
        if !links.is_empty() {
            let html = links
                .iter()
                .map(|l| {
                    format!(
                        "<a class=\"button\" href=\"{}\">{}</a>",
                        escape(&l.url),
                        escape(&l.label)
                    )
                })
                .collect::<Vec<_>>()
                .join("");
            let text = links
                .iter()
                .map(|l| format!("{}: {}", l.label, l.url))
                .collect::<Vec<_>>()
                .join("\n");
            out.push(format!("<div class=\"actions\">{}</div>", html), text);
        }
    }

    if let Some(support) = structure.get("supportLinks") {
        let links = links(support);
        if !links.is_empty() {
            let html = links
                .iter()
                .map(|l| format!("<a href=\"{}\">{}</a>", escape(&l.url), escape(&l.label)))
                .collect::<Vec<_>>()
                .join(" | ");
            let text = links
                .iter()
                .map(|l| format!("{} ({})", l.label, l.url))
                .collect::<Vec<_>>()
                .join("\n");
            out.push(format!("<div class=\"support\">{}</div>", html), text);
        }
    }

    if let Some(footer) = structure.get("footer").and_then(|v| text_of(v, &["text"])) {
        out.push(
            format!("<div class=\"footer\">{}</div>", escape(&footer)),
            footer,
        );
    }

    let html = format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{}</title></head><body>{}</body></html>",
        escape(subject),
        out.html.join("")
    );

    ComposedBody {
        html,
        text: out.text.join("\n\n"),
    }
}

fn compose_hero(hero: &Value, out: &mut Writer) {
    if let Some(title) = hero.as_str() {
        out.push(
            format!("<div class=\"hero\"><h2>{}</h2></div>", escape(title)),
            title.to_string(),
        );
        return;
    }

    let title = string_field(hero, "title");
    let subtitle = string_field(hero, "subtitle");
    let image = string_field(hero, "imageUrl");

    let mut html = String::from("<div class=\"hero\">");
    if let Some(url) = &image {
        html.push_str(&format!("<img src=\"{}\" alt=\"\">", escape(url)));
    }
    if let Some(title) = &title {
        html.push_str(&format!("<h2>{}</h2>", escape(title)));
    }
    if let Some(subtitle) = &subtitle {
        html.push_str(&format!("<p>{}</p>", escape(subtitle)));
    }
    html.push_str("</div>");

    let text = [title, subtitle]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join("\n");
    out.push(html, text);
}

fn compose_facts(facts: &Value, out: &mut Writer) {
    let rows: Vec<(String, String)> = match facts {
        Value::Array(items) => items
            .iter()
            .filter_map(|row| {
                let label = string_field(row, "label")?;
                let value = row.get("value").map(scalar_text).unwrap_or_default();
                Some((label, value))
            })
            .collect(),
        Value::Object(map) => map
            .iter()
            .map(|(label, value)| (label.clone(), scalar_text(value)))
            .collect(),
        _ => Vec::new(),
    };

    if rows.is_empty() {
        return;
    }

    let html_rows: String = rows
        .iter()
        .map(|(label, value)| {
            format!(
                "<tr><th>{}</th><td>{}</td></tr>",
                escape(label),
                escape(value)
            )
        })
        .collect();
    let text = rows
        .iter()
        .map(|(label, value)| format!("{}: {}", label, value))
        .collect::<Vec<_>>()
        .join("\n");

    out.push(format!("<table class=\"facts\">{}</table>", html_rows), text);
}

fn compose_visual(visual: &Value, out: &mut Writer) {
    let (image, alt, caption) = match visual {
        Value::String(url) => (Some(url.clone()), None, None),
        _ => (
            string_field(visual, "imageUrl"),
            string_field(visual, "alt"),
            string_field(visual, "caption"),
        ),
    };

    let mut html = String::from("<figure>");
    if let Some(url) = &image {
        html.push_str(&format!(
            "<img src=\"{}\" alt=\"{}\">",
            escape(url),
            escape(alt.as_deref().unwrap_or(""))
        ));
    }
    if let Some(caption) = &caption {
        html.push_str(&format!("<figcaption>{}</figcaption>", escape(caption)));
    }
    html.push_str("</figure>");

    if image.is_some() || caption.is_some() {
        out.push(html, caption.or(alt).unwrap_or_default());
    }
}

fn text_of(value: &Value, keys: &[&str]) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(_) => keys.iter().find_map(|k| string_field(value, k)),
        _ => None,
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn paragraphs(body: &Value) -> Vec<String> {
    match body {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|item| text_of(item, &["text"]))
            .collect(),
        Value::Object(_) => text_of(body, &["text"]).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn links(value: &Value) -> Vec<Link> {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![value],
        _ => Vec::new(),
    };

    items
        .into_iter()
        .filter_map(|item| {
            Some(Link {
                label: string_field(item, "label")?,
                url: string_field(item, "url")?,
            })
        })
        .collect()
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Escape text for HTML element and attribute content
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sections_in_order() {
        let body = compose(
            "Welcome",
            &json!({
                "footer": "Bye",
                "title": "Hi Ana",
                "body": ["First", "Second"],
                "actions": [{"label": "Start", "url": "https://example.com/start"}]
            }),
        );

        assert_eq!(
            body.text,
            "Hi Ana\n\nFirst\n\nSecond\n\nStart: https://example.com/start\n\nBye"
        );
        let title_at = body.html.find("<h1>Hi Ana</h1>").unwrap();
        let footer_at = body.html.find("class=\"footer\"").unwrap();
        assert!(title_at < footer_at);
        assert!(body.html.contains("<title>Welcome</title>"));
    }

    #[test]
    fn test_html_escaped() {
        let body = compose("<x>", &json!({"title": "Tom & \"Jerry\" <script>"}));
        assert!(body.html.contains("Tom &amp; &quot;Jerry&quot; &lt;script&gt;"));
        assert!(!body.html.contains("<script>"));
        assert_eq!(body.text, "Tom & \"Jerry\" <script>");
    }

    #[test]
    fn test_facts_table_rows_and_map() {
        let rows = compose("s", &json!({"factsTable": [{"label": "Order", "value": 42}]}));
        assert!(rows.html.contains("<tr><th>Order</th><td>42</td></tr>"));
        assert_eq!(rows.text, "Order: 42");

        let map = compose("s", &json!({"factsTable": {"Plan": "Pro"}}));
        assert_eq!(map.text, "Plan: Pro");
    }

    #[test]
    fn test_unknown_sections_ignored() {
        let body = compose("s", &json!({"custom": {"x": 1}}));
        assert!(body.text.is_empty());
    }

    #[test]
    fn test_hero_and_support_links() {
        let body = compose(
            "s",
            &json!({
                "hero": {"title": "Big", "subtitle": "small", "imageUrl": "https://img"},
                "supportLinks": [{"label": "Help", "url": "https://help"}, {"label": "broken"}]
            }),
        );
        assert!(body.html.contains("<img src=\"https://img\" alt=\"\">"));
        assert_eq!(body.text, "Big\nsmall\n\nHelp (https://help)");
    }
}
