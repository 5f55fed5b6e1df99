use crate::sync::ServiceAddress;
use crate::{Result, SyncError};
use std::path::Path;

const BUILTIN_TEMPLATE: &str = "\
# Generated by upstream_sync for service {{service_name}}
upstream {{upstream_name}} {
{{servers}}
}

server {
    listen {{port}};
    server_name {{server_name}};

    location / {
        proxy_pass http://{{upstream_name}};
    }
}
";

/// Fields supplied to the template for one service.
#[derive(Debug)]
pub struct RenderContext<'a> {
    pub service_name: &'a str,
    pub addresses: &'a [ServiceAddress],
    pub server_name: &'a str,
    pub port: u16,
    pub upstream_name: &'a str,
}

impl<'a> RenderContext<'a> {
    fn servers(&self) -> String {
        self.addresses.iter()
            .map(|addr| match addr.weight {
                0 => format!("    server {}:{} down;", addr.ip, addr.port),
                weight => format!("    server {}:{} weight={};", addr.ip, addr.port, weight),
            })
            .collect::<Vec<String>>()
            .join("\n")
    }

    fn lookup(&self, key: &str) -> Option<String> {
        match key {
            "service_name" => Some(self.service_name.to_owned()),
            "servers" => Some(self.servers()),
            "server_name" => Some(self.server_name.to_owned()),
            "port" => Some(self.port.to_string()),
            "upstream_name" => Some(self.upstream_name.to_owned()),
            _ => None,
        }
    }
}

/// nginx config template with `{{field}}` placeholders.
#[derive(Clone, Debug)]
pub struct ConfigTemplate {
    source: String,
}

impl Default for ConfigTemplate {
    fn default() -> Self {
        ConfigTemplate {
            source: BUILTIN_TEMPLATE.to_owned(),
        }
    }
}

impl ConfigTemplate {
    pub fn new(source: impl Into<String>) -> ConfigTemplate {
        ConfigTemplate {
            source: source.into(),
        }
    }

    pub fn from_file(path: &Path) -> Result<ConfigTemplate> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Template(format!("cannot read {}: {}", path.display(), e)))?;

        let template = ConfigTemplate::new(source);
        template.check()?;
        Ok(template)
    }

    /// Rejects templates with unknown or unterminated placeholders.
    pub fn check(&self) -> Result<()> {
        let sample = RenderContext {
            service_name: "",
            addresses: &[],
            server_name: "",
            port: 1,
            upstream_name: "",
        };
        self.render(&sample).map(|_| ())
    }

    pub fn render(&self, ctx: &RenderContext<'_>) -> Result<String> {
        let mut out = String::with_capacity(self.source.len() + 64 * ctx.addresses.len());
        let mut rest = self.source.as_str();

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find("}}")
                .ok_or_else(|| SyncError::Template("unterminated placeholder".to_owned()))?;

            let key = after[..end].trim();
            let value = ctx.lookup(key)
                .ok_or_else(|| SyncError::Template(format!("unknown placeholder {}", key)))?;
            out.push_str(&value);

            rest = &after[end + 2..];
        }
        out.push_str(rest);

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addresses() -> Vec<ServiceAddress> {
        vec![
            ServiceAddress { ip: "10.0.0.1".to_owned(), port: 8080, weight: 1 },
            ServiceAddress { ip: "10.0.0.2".to_owned(), port: 8081, weight: 5 },
        ]
    }

    fn context(addresses: &[ServiceAddress]) -> RenderContext<'_> {
        RenderContext {
            service_name: "svc1",
            addresses,
            server_name: "svc1.example.com",
            port: 80,
            upstream_name: "svc1-up",
        }
    }

    #[test]
    fn builtin_renders_all_fields() {
        let addrs = addresses();
        let out = ConfigTemplate::default().render(&context(&addrs)).unwrap();

        assert!(out.contains("upstream svc1-up {"));
        assert!(out.contains("    server 10.0.0.1:8080 weight=1;"));
        assert!(out.contains("    server 10.0.0.2:8081 weight=5;"));
        assert!(out.contains("listen 80;"));
        assert!(out.contains("server_name svc1.example.com;"));
        assert!(out.contains("proxy_pass http://svc1-up;"));
        assert!(out.contains("service svc1"));
    }

    #[test]
    fn drained_address_is_marked_down() {
        let addrs = vec![ServiceAddress { ip: "10.0.0.3".to_owned(), port: 8080, weight: 0 }];
        let out = ConfigTemplate::default().render(&context(&addrs)).unwrap();

        assert!(out.contains("    server 10.0.0.3:8080 down;"));
        assert!(!out.contains("weight=0"));
    }

    #[test]
    fn custom_template_with_spaces_in_placeholders() {
        let template = ConfigTemplate::new("upstream {{ upstream_name }} {\n{{servers}}\n}\n");
        let addrs = addresses();
        let out = template.render(&context(&addrs)).unwrap();

        assert_eq!(
            out,
            "upstream svc1-up {\n    server 10.0.0.1:8080 weight=1;\n    server 10.0.0.2:8081 weight=5;\n}\n"
        );
    }

    #[test]
    fn unknown_placeholder_fails() {
        let template = ConfigTemplate::new("{{nope}}");
        assert!(matches!(template.check(), Err(SyncError::Template(_))));
    }

    #[test]
    fn unterminated_placeholder_fails() {
        let template = ConfigTemplate::new("upstream {{upstream_name");
        assert!(template.check().is_err());
    }
}
