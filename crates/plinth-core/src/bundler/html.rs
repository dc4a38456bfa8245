//! HTML document emission.
//!
//! The document references every entry's files in load order: stylesheets
//! as `<link>` before `</head>`, scripts before `</body>`.

use super::emit::EntryFiles;
use indexmap::IndexMap;

/// Build the document from `template`, or from the built-in one titled
/// `title` when there is none.
///
/// With `inject` off the template is returned untouched.
#[must_use]
pub fn render_html(
    template: Option<&str>,
    title: &str,
    inject: bool,
    entrypoints: &IndexMap<String, EntryFiles>,
    public_path: &str,
) -> String {
    let mut html = template.map_or_else(|| default_template(title), str::to_string);
    if !inject {
        return html;
    }

    let mut styles: Vec<&str> = Vec::new();
    let mut scripts: Vec<&str> = Vec::new();
    for files in entrypoints.values() {
        for css in &files.css {
            if !styles.contains(&css.as_str()) {
                styles.push(css);
            }
        }
        for js in &files.js {
            if !scripts.contains(&js.as_str()) {
                scripts.push(js);
            }
        }
    }

    let links: String = styles
        .iter()
        .map(|f| format!("  <link rel=\"stylesheet\" href=\"{}\">\n", attr(public_path, f)))
        .collect();
    let tags: String = scripts
        .iter()
        .map(|f| format!("  <script src=\"{}\"></script>\n", attr(public_path, f)))
        .collect();

    insert_before(&mut html, "</head>", &links);
    insert_before(&mut html, "</body>", &tags);
    html
}

fn attr(public_path: &str, file: &str) -> String {
    format!("{public_path}{file}")
        .replace('&', "&amp;")
        .replace('"', "&quot;")
}

/// Insert before the closing tag, or append when the tag is missing.
fn insert_before(html: &mut String, closing: &str, text: &str) {
    if text.is_empty() {
        return;
    }
    match html.to_ascii_lowercase().rfind(closing) {
        Some(pos) => html.insert_str(pos, text),
        None => html.push_str(text),
    }
}

fn default_template(title: &str) -> String {
    let title = title
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>{title}</title>
</head>
<body>
  <div id="root"></div>
</body>
</html>
"#
    )
}
