use sha2::{Digest, Sha256};

/// Kubernetes object names (DNS-1123 subdomain) max length.
pub const MAX_SECRET_NAME_LEN: usize = 253;
/// Kubernetes label values max length.
pub const MAX_LABEL_VALUE_LEN: usize = 63;

// ---------------------------------------------------------------------------
// Sanitizers
// ---------------------------------------------------------------------------

/// Map a free-form identifier into the DNS-1123 subdomain domain used for
/// Secret names: lowercase, `[a-z0-9-]` only, no dash runs, no leading or
/// trailing dashes, at most 253 characters.
///
/// Idempotent: `sanitize_secret_name(sanitize_secret_name(x)) ==
/// sanitize_secret_name(x)`.
pub fn sanitize_secret_name(raw: &str) -> String {
    sanitize_secret_name_with_budget(raw, MAX_SECRET_NAME_LEN)
}

/// Like [`sanitize_secret_name`] but leaves room for a caller-chosen prefix so
/// that `prefix.len() + result.len() <= 253`.
pub fn sanitize_secret_name_with_budget(raw: &str, budget: usize) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_dash = true; // swallow leading dashes
    for c in raw.chars() {
        let c = c.to_ascii_lowercase();
        let mapped = if c.is_ascii_lowercase() || c.is_ascii_digit() {
            c
        } else {
            '-'
        };
        if mapped == '-' {
            if last_dash {
                continue;
            }
            last_dash = true;
        } else {
            last_dash = false;
        }
        out.push(mapped);
    }
    out.truncate(budget);
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Derive `prefix + sanitize(raw)` with the sanitized part truncated so the
/// whole name fits in 253 characters.
pub fn prefixed_secret_name(prefix: &str, raw: &str) -> String {
    let budget = MAX_SECRET_NAME_LEN.saturating_sub(prefix.len());
    format!("{prefix}{}", sanitize_secret_name_with_budget(raw, budget))
}

fn is_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-'
}

fn trim_label_edges(s: &str) -> &str {
    s.trim_matches(|c| c == '-' || c == '_' || c == '.')
}

/// Map a free-form string into the Kubernetes label-value domain:
/// `[A-Za-z0-9_.-]`, no leading/trailing `-_.`, at most 63 characters.
///
/// Idempotent like [`sanitize_secret_name`].
pub fn sanitize_label_value(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| if is_label_char(c) { c } else { '-' })
        .collect();
    let mut out = trim_label_edges(&mapped).to_owned();
    out.truncate(MAX_LABEL_VALUE_LEN);
    // Truncation can expose a trailing separator again.
    trim_label_edges(&out).to_owned()
}

/// Sanitize the caller-chosen suffix of a label key (the part after the
/// `agentapi.proxy/tag-` prefix). Same character class as label values.
pub fn sanitize_label_key_suffix(raw: &str) -> String {
    sanitize_label_value(raw)
}

/// SHA-256 of the raw team id, hex-encoded, truncated to 63 characters.
///
/// Team ids may contain `/` and other characters outside the label domain;
/// hashing keeps them queryable by equality while the raw id lives in an
/// annotation.
pub fn hash_team_id(team_id: &str) -> String {
    let digest = Sha256::digest(team_id.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(MAX_LABEL_VALUE_LEN);
    hex
}

// ---------------------------------------------------------------------------
// Session resource names
// ---------------------------------------------------------------------------

pub fn deployment_name(session_id: &str) -> String {
    format!("agentapi-session-{session_id}")
}

pub fn service_name(session_id: &str) -> String {
    format!("{}-svc", deployment_name(session_id))
}

pub fn pvc_name(session_id: &str) -> String {
    format!("{}-pvc", deployment_name(session_id))
}

pub fn session_settings_secret_name(session_id: &str) -> String {
    format!("agentapi-session-{session_id}-settings")
}

pub fn team_env_secret_name(session_id: &str) -> String {
    format!("agentapi-session-{session_id}-team-env")
}

// Secrets keyed off the Service name.

pub fn initial_message_secret_name(service_name: &str) -> String {
    format!("{service_name}-initial-message")
}

pub fn webhook_payload_secret_name(service_name: &str) -> String {
    format!("{service_name}-webhook-payload")
}

pub fn github_token_secret_name(service_name: &str) -> String {
    format!("{service_name}-github-token")
}

pub fn personal_api_key_secret_name(service_name: &str) -> String {
    format!("{service_name}-personal-api-key")
}

pub fn oneshot_settings_secret_name(service_name: &str) -> String {
    format!("{service_name}-oneshot-settings")
}

// ---------------------------------------------------------------------------
// User / team scoped names
// ---------------------------------------------------------------------------

/// Agent credentials secret, keyed by user *or* team.
pub fn agent_env_secret_name(owner: &str) -> String {
    prefixed_secret_name("agent-env-", owner)
}

/// Legacy agent credentials prefix, still recognized by the migrator.
pub fn legacy_agent_credentials_secret_name(owner: &str) -> String {
    prefixed_secret_name("agent-credentials-", owner)
}

pub fn mcp_servers_secret_name(owner: &str) -> String {
    prefixed_secret_name("mcp-servers-", owner)
}

pub fn notification_subscriptions_secret_name(user_id: &str) -> String {
    prefixed_secret_name("notification-subscriptions-", user_id)
}

/// Per-user or per-team `settings.json` overlay consumed by the compiler.
pub fn settings_overlay_secret_name(owner: &str) -> String {
    prefixed_secret_name("agentapi-settings-", owner)
}

/// Live agent credential file, written by the in-Pod credentials-sync sidecar.
pub fn live_agent_env_secret_name(user_id: &str) -> String {
    prefixed_secret_name("agentapi-agent-env-", user_id)
}

/// Per-user persisted API key (reused across sessions).
pub fn user_api_key_secret_name(user_id: &str) -> String {
    prefixed_secret_name("agentapi-personal-api-key-", user_id)
}

// ---------------------------------------------------------------------------
// Long-lived agent (StatefulSet path)
// ---------------------------------------------------------------------------

pub fn agent_stateful_set_name(agent_id: &str) -> String {
    format!("agent-{agent_id}")
}

pub fn agent_headless_service_name(agent_id: &str) -> String {
    format!("agent-{agent_id}-headless")
}

/// Per-team service account pre-created for session Pods.
pub fn team_service_account_name(team_id: &str) -> String {
    prefixed_secret_name("agentapi-proxy-team-", team_id)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn secret_name_replaces_disallowed() {
        assert_eq!(sanitize_secret_name("org/team-slug"), "org-team-slug");
        assert_eq!(sanitize_secret_name("user@example.com"), "user-example-com");
    }

    #[test]
    fn secret_name_collapses_dash_runs() {
        assert_eq!(sanitize_secret_name("multiple---dashes"), "multiple-dashes");
    }

    #[test]
    fn secret_name_trims_edges() {
        assert_eq!(sanitize_secret_name("--x--"), "x");
        assert_eq!(sanitize_secret_name("///"), "");
    }

    #[test]
    fn secret_name_lowercases() {
        assert_eq!(sanitize_secret_name("Alice"), "alice");
    }

    #[test]
    fn prefixed_name_fits_budget() {
        let long = "a".repeat(300);
        let name = prefixed_secret_name("agent-env-", &long);
        assert!(name.len() <= MAX_SECRET_NAME_LEN);
        assert!(name.starts_with("agent-env-a"));
    }

    #[test]
    fn label_value_trims_and_keeps_case() {
        assert_eq!(
            sanitize_label_value("--leading-trailing--"),
            "leading-trailing"
        );
        assert_eq!(sanitize_label_value("Alice_B.c"), "Alice_B.c");
    }

    #[test]
    fn label_value_truncates_to_63() {
        let long = "a".repeat(100);
        assert_eq!(sanitize_label_value(&long).len(), 63);
    }

    #[test]
    fn label_value_trims_after_truncation() {
        // 62 chars then a separator at position 63: truncation alone would
        // leave a trailing dash.
        let raw = format!("{}-tail", "a".repeat(62));
        let out = sanitize_label_value(&raw);
        assert!(!out.ends_with('-'));
        assert!(out.len() <= 63);
    }

    #[test]
    fn team_hash_is_stable_and_label_safe() {
        let h1 = hash_team_id("org/team-a");
        let h2 = hash_team_id("org/team-a");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 63);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(h1, hash_team_id("org/team-b"));
    }

    #[test]
    fn derived_names() {
        assert_eq!(deployment_name("s1"), "agentapi-session-s1");
        assert_eq!(service_name("s1"), "agentapi-session-s1-svc");
        assert_eq!(pvc_name("s1"), "agentapi-session-s1-pvc");
        assert_eq!(
            session_settings_secret_name("s1"),
            "agentapi-session-s1-settings"
        );
        assert_eq!(
            initial_message_secret_name(&service_name("s1")),
            "agentapi-session-s1-svc-initial-message"
        );
    }

    proptest! {
        #[test]
        fn secret_sanitize_idempotent(raw in ".{0,300}") {
            let once = sanitize_secret_name(&raw);
            prop_assert_eq!(sanitize_secret_name(&once), once.clone());
            prop_assert!(once.len() <= MAX_SECRET_NAME_LEN);
        }

        #[test]
        fn label_sanitize_idempotent(raw in ".{0,120}") {
            let once = sanitize_label_value(&raw);
            prop_assert_eq!(sanitize_label_value(&once), once.clone());
            prop_assert!(once.len() <= MAX_LABEL_VALUE_LEN);
        }

        #[test]
        fn prefixed_name_never_exceeds_limit(raw in ".{0,400}") {
            prop_assert!(prefixed_secret_name("agent-env-", &raw).len() <= MAX_SECRET_NAME_LEN);
        }
    }
}
