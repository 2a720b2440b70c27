//! Which SMTP server delivers a tenant's reports.

use reportd_core::config::PlatformSmtp;
use reportd_core::error::{ReportError, Result};
use reportd_core::{SmtpSettings, TenantSettings};

const DEFAULT_RELAY_PORT: u16 = 25;

/// Resolve the SMTP settings for `tenant`.
///
/// Tenants on platform-managed mail use the platform relay when its host is
/// set and fall back to their own settings otherwise. Tenants that opted out
/// must have their own settings.
pub fn resolve_smtp(tenant: &TenantSettings, platform: &PlatformSmtp) -> Result<SmtpSettings> {
    if tenant.use_platform_smtp {
        if platform.is_configured() {
            return Ok(platform_relay(platform));
        }
        return tenant.smtp.clone().ok_or_else(|| {
            ReportError::SmtpNotConfigured(format!(
                "tenant {}: platform relay has no host and no tenant SMTP is set",
                tenant.tenant_id
            ))
        });
    }
    tenant.smtp.clone().ok_or_else(|| {
        ReportError::SmtpNotConfigured(format!("tenant {}: SMTP configuration not set", tenant.tenant_id))
    })
}

fn platform_relay(platform: &PlatformSmtp) -> SmtpSettings {
    let (host, port) = split_host_port(platform.host.trim());
    SmtpSettings {
        host,
        port,
        username: platform.user.clone(),
        password: platform.password.clone(),
        from: platform.from.clone(),
        // Opportunistic STARTTLS, see `SmtpMailer`.
        use_tls: false,
    }
}

/// `host:port` with a numeric port, else the whole string on port 25.
fn split_host_port(raw: &str) -> (String, u16) {
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() == 2 {
        let port = parts[1].parse().unwrap_or(DEFAULT_RELAY_PORT);
        return (parts[0].to_string(), port);
    }
    (raw.to_string(), DEFAULT_RELAY_PORT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn own_smtp() -> SmtpSettings {
        SmtpSettings {
            host: "mail.tenant.example".into(),
            port: 587,
            username: "reports".into(),
            password: "pw".into(),
            from: "reports@tenant.example".into(),
            use_tls: true,
        }
    }

    fn platform(host: &str) -> PlatformSmtp {
        PlatformSmtp {
            host: host.into(),
            user: "relay".into(),
            password: "secret".into(),
            from: "noreply@platform.example".into(),
        }
    }

    #[test]
    fn test_platform_relay_with_port() {
        let tenant = TenantSettings::new(1);
        let smtp = resolve_smtp(&tenant, &platform("relay.internal:2525")).unwrap();
        assert_eq!(smtp.host, "relay.internal");
        assert_eq!(smtp.port, 2525);
        assert_eq!(smtp.username, "relay");
        assert!(!smtp.use_tls);
    }

    #[test]
    fn test_platform_relay_default_port() {
        let tenant = TenantSettings::new(1);
        assert_eq!(resolve_smtp(&tenant, &platform("relay.internal")).unwrap().port, 25);
        assert_eq!(resolve_smtp(&tenant, &platform("relay.internal:smtp")).unwrap().port, 25);
    }

    #[test]
    fn test_platform_unset_falls_back_to_tenant() {
        let mut tenant = TenantSettings::new(2);
        tenant.smtp = Some(own_smtp());
        assert_eq!(resolve_smtp(&tenant, &platform("")).unwrap(), own_smtp());

        tenant.smtp = None;
        let err = resolve_smtp(&tenant, &platform("")).unwrap_err();
        assert!(matches!(err, ReportError::SmtpNotConfigured(_)));
    }

    #[test]
    fn test_opted_out_needs_own_settings() {
        let mut tenant = TenantSettings::new(3);
        tenant.use_platform_smtp = false;
        assert!(resolve_smtp(&tenant, &platform("relay.internal")).is_err());

        tenant.smtp = Some(own_smtp());
        let smtp = resolve_smtp(&tenant, &platform("relay.internal")).unwrap();
        assert_eq!(smtp.host, "mail.tenant.example");
    }
}
