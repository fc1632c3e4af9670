//! Placeholder substitution for nginx and xinetd templates.
//!
//! Templates are plain text containing `{host}`, `{fullhost}`, `{local_ip}`
//! and `{port}`. Unknown placeholders are left untouched.

/// Values substituted into a site template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars {
    pub host: String,
    /// Fully qualified host name; `{fullhost}` falls back to `host`.
    pub full_host: Option<String>,
    pub local_ip: String,
    /// `{port}` is only replaced when set.
    pub port: Option<u16>,
}

impl TemplateVars {
    pub fn new(host: impl Into<String>, local_ip: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            full_host: None,
            local_ip: local_ip.into(),
            port: None,
        }
    }

    pub fn with_full_host(mut self, full_host: impl Into<String>) -> Self {
        self.full_host = Some(full_host.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

/// Renders `template` with `vars`.
pub fn render(template: &str, vars: &TemplateVars) -> String {
    let full_host = vars.full_host.as_deref().unwrap_or(&vars.host);

    let mut rendered = template
        .replace("{fullhost}", full_host)
        .replace("{host}", &vars.host)
        .replace("{local_ip}", &vars.local_ip);

    if let Some(port) = vars.port {
        rendered = rendered.replace("{port}", &port.to_string());
    }
    rendered
}
