//! Human-readable output.

use chrono::{DateTime, Utc};
use tagscope_core::{EngineStatus, FieldGroup, Resource};

pub fn fields(groups: &[FieldGroup]) {
    if groups.is_empty() {
        println!("(no fields)");
        return;
    }
    for g in groups {
        println!("{}", g.name);
        for f in &g.fields {
            println!("  {:<24} {}", f.name, f.count);
            for v in &f.values {
                println!("    {:<22} {}", v.value, v.count);
            }
        }
    }
}

fn tag_list(r: &Resource) -> String {
    let tags: Vec<String> = r.tags.iter().map(|t| format!("{}={}", t.key, t.value)).collect();
    if tags.is_empty() { "-".to_string() } else { tags.join(",") }
}

pub fn resources(items: &[Resource], count: u64) {
    println!("{:<18} {:<28} {:<14} TAGS", "TYPE", "ID", "REGION");
    for r in items {
        println!("{:<18} {:<28} {:<14} {}", r.kind, r.label(), r.region, tag_list(r));
    }
    println!("showing {} of {}", items.len(), count);
}

pub fn resource(r: &Resource) {
    println!("type:   {}", r.kind);
    println!("id:     {}", r.id);
    if let Some(d) = r.display_id.as_deref().filter(|d| *d != r.id) {
        println!("name:   {}", d);
    }
    println!("region: {}", r.region);
    if !r.tags.is_empty() {
        println!("tags:");
        for t in &r.tags {
            println!("  {} = {}", t.key, t.value);
        }
    }
    if !r.properties.is_empty() {
        println!("properties:");
        for p in &r.properties {
            println!("  {} = {}", p.name, p.value);
        }
    }
}

pub fn engine(s: &EngineStatus) {
    let state = serde_json::to_value(s.status).ok().and_then(|v| v.as_str().map(String::from)).unwrap_or_default();
    let age = s.fetched_at.as_deref().map(|ts| render_age(ts, Utc::now())).unwrap_or_else(|| "-".to_string());
    println!("status: {}  (fetched {} ago)", state, age);
    if let Some(msg) = &s.error_message {
        println!("error:  {}", msg);
    }
}

/// Age of an RFC 3339 timestamp relative to `now`, e.g. `3h12m`. `-` when unparseable.
pub fn render_age(ts: &str, now: DateTime<Utc>) -> String {
    let Ok(at) = DateTime::parse_from_rfc3339(ts) else { return "-".to_string() };
    let mut secs = (now - at.with_timezone(&Utc)).num_seconds().max(0) as u64;
    let days = secs / 86_400; secs %= 86_400;
    let hours = secs / 3600; secs %= 3600;
    let mins = secs / 60; secs %= 60;
    if days > 0 { format!("{}d{}h", days, hours) }
    else if hours > 0 { format!("{}h{}m", hours, mins) }
    else if mins > 0 { format!("{}m", mins) }
    else { format!("{}s", secs) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ages() {
        let now = DateTime::parse_from_rfc3339("2024-05-02T12:00:00Z").unwrap().with_timezone(&Utc);
        assert_eq!(render_age("2024-05-02T11:59:30Z", now), "30s");
        assert_eq!(render_age("2024-05-02T09:48:00Z", now), "2h12m");
        assert_eq!(render_age("2024-04-30T10:00:00Z", now), "2d2h");
        assert_eq!(render_age("yesterday", now), "-");
        assert_eq!(render_age("2024-05-03T00:00:00Z", now), "0s");
    }
}
