use std::collections::BTreeMap;

use crate::render::{PAGE_HTML, encode_path, escape_html};
use crate::sanitize::sanitize_dir_name;

pub const INDEX_HTML: &str = "index.html";

/// Top-level listing of every page, grouped under the first character of the title.
pub fn render_index(project: &str, titles: &[String]) -> String {
    let mut groups: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for title in titles {
        let key = title.chars().next().map(String::from).unwrap_or_default();
        let group = groups.entry(key).or_default();
        if !group.contains(&title.as_str()) {
            group.push(title);
        }
    }
    for group in groups.values_mut() {
        group.sort_unstable();
    }

    let project = escape_html(project);
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>pages of ");
    html.push_str(&project);
    html.push_str("</title></head><body>\n<h1>pages of ");
    html.push_str(&project);
    html.push_str("</h1>\n");

    for key in groups.keys() {
        html.push_str(&format!(
            "<a href=\"#{}\" style=\"padding-inline-end:4px;\">{}</a>",
            escape_html(&encode_path(key)),
            escape_html(key)
        ));
    }
    html.push_str("\n<ul>\n");

    for (key, group) in &groups {
        let key = escape_html(key);
        html.push_str(&format!("<li id=\"{key}\">{key}<ul>"));
        for title in group {
            html.push_str(&format!(
                "<li><a href=\"{}/{PAGE_HTML}\">{}</a></li>",
                escape_html(&encode_path(&sanitize_dir_name(title))),
                escape_html(title)
            ));
        }
        html.push_str("</ul></li>\n");
    }

    html.push_str("</ul></body></html>\n");
    html
}
