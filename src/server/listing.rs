use std::fmt::Write;

use chrono::{DateTime, FixedOffset, Utc};

use crate::cache::AddressRecord;

pub const PASSWORD_FORM: &str = r#"<html><body>
<form action="/list" method="post">
    Password: <input type="password" name="password">
    <input type="submit" value="Submit">
</form>
</body></html>"#;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DISPLAY_OFFSET_SECS: i32 = 8 * 3600;

/// Renders records as an HTML table, timestamps shown in UTC+8.
pub fn render(records: &[AddressRecord]) -> String {
    let mut html = String::from(
        "<html><body><table border='1'>\
         <tr><th>Host</th><th>IPv6</th><th>IPv4</th><th>Timestamp (UTC+8)</th></tr>",
    );

    for record in records {
        // Writing into a String cannot fail.
        let _ = write!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape(&record.host),
            escape(&record.ipv6),
            escape(&record.ipv4),
            display_time(&record.last_seen),
        );
    }

    html.push_str("</table></body></html>");
    html
}

fn display_time(ts: &DateTime<Utc>) -> String {
    match FixedOffset::east_opt(DISPLAY_OFFSET_SECS) {
        Some(offset) => ts.with_timezone(&offset).format(TIME_FORMAT).to_string(),
        None => ts.format(TIME_FORMAT).to_string(),
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
