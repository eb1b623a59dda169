//! Rendering of registry data for the terminal

use chrono::{DateTime, Utc};
use permwatch_host::{Application, ApplicationView, IgnoreRuleSet, RegistryEvent};
use serde::Serialize;
use std::fmt::Write;

/// Output mode selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            Self::Json
        } else {
            Self::Text
        }
    }
}

#[derive(Serialize)]
struct ScanOutput<'a> {
    scanned_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    view: &'a ApplicationView,
}

/// Render the split application view
pub fn render_view(
    view: &ApplicationView,
    scanned_at: Option<DateTime<Utc>>,
    format: OutputFormat,
) -> serde_json::Result<String> {
    if format == OutputFormat::Json {
        return serde_json::to_string_pretty(&ScanOutput { scanned_at, view });
    }

    let mut out = String::new();
    section(&mut out, "Warnable", &view.warnable);
    out.push('\n');
    section(&mut out, "Ignored", &view.ignored);
    if let Some(at) = scanned_at {
        let _ = writeln!(out, "\nLast scan: {}", at.to_rfc3339());
    }
    Ok(out)
}

fn section(out: &mut String, title: &str, apps: &[Application]) {
    let _ = writeln!(out, "{} ({})", title, apps.len());
    if apps.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    for app in apps {
        let _ = writeln!(
            out,
            "  {}  {}  [{}]",
            app.package_id,
            app.display_name,
            app.warnable_permissions.join(", ")
        );
    }
}

/// Render one application in detail
pub fn render_application(app: &Application, format: OutputFormat) -> serde_json::Result<String> {
    if format == OutputFormat::Json {
        return serde_json::to_string_pretty(app);
    }

    let mut out = String::new();
    let _ = writeln!(out, "{} ({})", app.display_name, app.package_id);
    let _ = writeln!(out, "  warnable:      {}", list(&app.warnable_permissions));
    let _ = writeln!(out, "  not warnable:  {}", list(&app.nonwarnable_permissions));
    let _ = writeln!(out, "  ignored:       {}", if app.temporarily_ignored { "yes" } else { "no" });
    Ok(out)
}

/// Render the persisted ignore rules
pub fn render_rules(rules: &IgnoreRuleSet, format: OutputFormat) -> serde_json::Result<String> {
    if format == OutputFormat::Json {
        return serde_json::to_string_pretty(rules);
    }
    if rules.is_empty() {
        return Ok("No ignore rules\n".to_string());
    }

    let mut out = String::new();
    let _ = writeln!(out, "Ignored everywhere:");
    for permission in &rules.global_permission_ignores {
        let _ = writeln!(out, "  {}", permission);
    }
    let _ = writeln!(out, "Ignored per app:");
    for (package_id, permissions) in &rules.per_app_permission_ignores {
        let permissions: Vec<&str> = permissions.iter().map(String::as_str).collect();
        let _ = writeln!(out, "  {}: {}", package_id, permissions.join(", "));
    }
    let _ = writeln!(out, "Apps on the ignore list:");
    for package_id in &rules.temporary_app_ignores {
        let _ = writeln!(out, "  {}", package_id);
    }
    Ok(out)
}

#[derive(Serialize)]
struct EventOutput<'a> {
    event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    application: Option<&'a Application>,
    #[serde(skip_serializing_if = "Option::is_none")]
    applications: Option<usize>,
}

/// Render one registry event as a single line
pub fn render_event(event: &RegistryEvent, format: OutputFormat) -> serde_json::Result<String> {
    let applications = match event {
        RegistryEvent::DatabaseUpdated(apps) => Some(apps.len()),
        _ => None,
    };

    if format == OutputFormat::Json {
        return serde_json::to_string(&EventOutput {
            event: event.kind(),
            application: event.application(),
            applications,
        });
    }

    Ok(match (event.application(), applications) {
        (Some(app), _) => format!(
            "{} {} [{}]",
            event.kind(),
            app.package_id,
            app.warnable_permissions.join(", ")
        ),
        (None, Some(count)) => format!("{} {} apps", event.kind(), count),
        (None, None) => event.kind().to_string(),
    })
}

fn list(permissions: &[String]) -> String {
    if permissions.is_empty() {
        "-".to_string()
    } else {
        permissions.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(id: &str, warnable: &[&str]) -> Application {
        Application::new(id)
            .with_warnable_permissions(warnable.iter().map(|p| p.to_string()).collect())
    }

    #[test]
    fn test_render_view_text() {
        let view = ApplicationView::from_snapshot(vec![app("com.example.a", &["CAMERA"])]);
        let out = render_view(&view, None, OutputFormat::Text).unwrap();

        assert!(out.contains("Warnable (1)"));
        assert!(out.contains("com.example.a  com.example.a  [CAMERA]"));
        assert!(out.contains("Ignored (0)\n  (none)"));
        assert!(!out.contains("Last scan"));
    }

    #[test]
    fn test_render_view_json() {
        let view = ApplicationView::from_snapshot(vec![app("com.example.a", &["CAMERA"])]);
        let out = render_view(&view, Some(Utc::now()), OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();

        assert_eq!(value["warnable"][0]["package_id"], "com.example.a");
        assert!(value["ignored"].as_array().unwrap().is_empty());
        assert!(value["scanned_at"].is_string());
    }

    #[test]
    fn test_render_rules() {
        let mut rules = IgnoreRuleSet::default();
        assert_eq!(render_rules(&rules, OutputFormat::Text).unwrap(), "No ignore rules\n");

        rules.global_permission_ignores.insert("SMS".into());
        rules
            .per_app_permission_ignores
            .entry("com.example.a".into())
            .or_default()
            .insert("CAMERA".into());
        let out = render_rules(&rules, OutputFormat::Text).unwrap();
        assert!(out.contains("  SMS\n"));
        assert!(out.contains("  com.example.a: CAMERA\n"));
    }

    #[test]
    fn test_render_event() {
        let event = RegistryEvent::AppPermissionsUpdated(app("com.example.a", &[]));
        assert_eq!(
            render_event(&event, OutputFormat::Text).unwrap(),
            "app_permissions_updated com.example.a []"
        );

        let event = RegistryEvent::DatabaseUpdated(vec![app("a", &["CAMERA"])]);
        let json = render_event(&event, OutputFormat::Json).unwrap();
        assert_eq!(json, r#"{"event":"database_updated","applications":1}"#);
    }
}
